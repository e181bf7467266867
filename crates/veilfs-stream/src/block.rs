//! Byte-granular access on top of block-aligned primitives.

use veilfs_core::VeilResult;

/// Block-aligned backend operations, plus provided methods that lift them
/// to reads, writes, and resizes at arbitrary offsets.
///
/// `read_block` fills `out` (sized `block_size`) and returns how many bytes
/// the block actually holds; zero means past end of stream. `write_block`
/// persists a block of `data.len()` bytes (`<= block_size`); only the last
/// block of a stream may be short. `adjust_logical_size` moves the end of
/// the backing store without rewriting retained blocks.
pub trait BlockAccess {
    fn block_size(&self) -> usize;
    fn read_block(&mut self, block: u64, out: &mut [u8]) -> VeilResult<usize>;
    fn write_block(&mut self, block: u64, data: &[u8]) -> VeilResult<()>;
    fn adjust_logical_size(&mut self, new_size: u64) -> VeilResult<()>;
    fn size(&self) -> VeilResult<u64>;

    /// Read up to `buf.len()` bytes at `offset`; short at end of stream.
    fn read(&mut self, offset: u64, buf: &mut [u8]) -> VeilResult<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let block_size = self.block_size();
        let mut scratch = vec![0u8; block_size];
        let mut pos = offset;
        let mut filled = 0usize;
        while filled < buf.len() {
            let block = pos / block_size as u64;
            let begin = (pos % block_size as u64) as usize;
            let want = (buf.len() - filled).min(block_size - begin);
            let got = if begin == 0 && want == block_size {
                self.read_block(block, &mut buf[filled..filled + want])?
            } else {
                scratch.fill(0);
                let held = self.read_block(block, &mut scratch)?;
                if held <= begin {
                    0
                } else {
                    let n = held.min(begin + want) - begin;
                    buf[filled..filled + n].copy_from_slice(&scratch[begin..begin + n]);
                    n
                }
            };
            filled += got;
            pos += got as u64;
            if got < want {
                break;
            }
        }
        Ok(filled)
    }

    /// Write `data` at `offset`, zero-extending any gap past the current
    /// end first. Partial blocks are read-modify-written.
    fn write(&mut self, offset: u64, data: &[u8]) -> VeilResult<()> {
        let current = self.size()?;
        if offset > current {
            self.unchecked_resize(current, offset)?;
        }
        if data.is_empty() {
            return Ok(());
        }
        self.unchecked_write(offset, data)
    }

    fn unchecked_write(&mut self, offset: u64, data: &[u8]) -> VeilResult<()> {
        let block_size = self.block_size();
        let mut scratch = vec![0u8; block_size];
        let mut pos = offset;
        let mut written = 0usize;
        while written < data.len() {
            let block = pos / block_size as u64;
            let begin = (pos % block_size as u64) as usize;
            let count = (data.len() - written).min(block_size - begin);
            if begin == 0 && count == block_size {
                self.write_block(block, &data[written..written + count])?;
            } else {
                scratch.fill(0);
                let held = self.read_block(block, &mut scratch)?;
                scratch[begin..begin + count].copy_from_slice(&data[written..written + count]);
                self.write_block(block, &scratch[..held.max(begin + count)])?;
            }
            written += count;
            pos += count as u64;
        }
        Ok(())
    }

    /// Grow (zero-extending) or shrink to exactly `new_size` bytes.
    fn resize(&mut self, new_size: u64) -> VeilResult<()> {
        let current = self.size()?;
        self.unchecked_resize(current, new_size)
    }

    fn unchecked_resize(&mut self, current: u64, new_size: u64) -> VeilResult<()> {
        if new_size == current {
            return Ok(());
        }
        let block_size = self.block_size() as u64;
        if new_size < current {
            // Rewrite the new last block so the stream ends at an
            // authenticated boundary.
            let residue = (new_size % block_size) as usize;
            if residue > 0 {
                let block = new_size / block_size;
                let mut scratch = vec![0u8; block_size as usize];
                self.read_block(block, &mut scratch)?;
                self.write_block(block, &scratch[..residue])?;
            }
        } else {
            // A short old last block must be re-persisted zero-padded:
            // the backing store's own zero extension would corrupt it.
            let old_residue = (current % block_size) as usize;
            if old_residue > 0 {
                let old_block = current / block_size;
                let new_block = new_size / block_size;
                let mut scratch = vec![0u8; block_size as usize];
                self.read_block(old_block, &mut scratch)?;
                let extend_to = if old_block == new_block {
                    (new_size % block_size) as usize
                } else {
                    block_size as usize
                };
                self.write_block(old_block, &scratch[..extend_to])?;
            }
        }
        self.adjust_logical_size(new_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Backing store of whole blocks, mirroring how the crypt stream
    /// behaves minus the cryptography.
    struct VecBlocks {
        block_size: usize,
        blocks: Vec<Vec<u8>>,
    }

    impl VecBlocks {
        fn new(block_size: usize) -> Self {
            VecBlocks {
                block_size,
                blocks: Vec::new(),
            }
        }
    }

    impl BlockAccess for VecBlocks {
        fn block_size(&self) -> usize {
            self.block_size
        }

        fn read_block(&mut self, block: u64, out: &mut [u8]) -> VeilResult<usize> {
            match self.blocks.get(block as usize) {
                None => Ok(0),
                Some(data) => {
                    out[..data.len()].copy_from_slice(data);
                    Ok(data.len())
                }
            }
        }

        fn write_block(&mut self, block: u64, data: &[u8]) -> VeilResult<()> {
            while self.blocks.len() <= block as usize {
                self.blocks.push(vec![0u8; self.block_size]);
            }
            self.blocks[block as usize] = data.to_vec();
            Ok(())
        }

        fn adjust_logical_size(&mut self, new_size: u64) -> VeilResult<()> {
            let block_size = self.block_size as u64;
            let full = (new_size / block_size) as usize;
            let residue = (new_size % block_size) as usize;
            let want = full + usize::from(residue > 0);
            while self.blocks.len() < want {
                self.blocks.push(vec![0u8; self.block_size]);
            }
            self.blocks.truncate(want);
            if residue > 0 {
                let last = &mut self.blocks[want - 1];
                last.resize(residue, 0);
            } else if let Some(last) = self.blocks.last_mut() {
                last.resize(self.block_size, 0);
            }
            Ok(())
        }

        fn size(&self) -> VeilResult<u64> {
            match self.blocks.last() {
                None => Ok(0),
                Some(last) => {
                    Ok((self.blocks.len() - 1) as u64 * self.block_size as u64 + last.len() as u64)
                }
            }
        }
    }

    #[test]
    fn write_then_read_crossing_blocks() {
        let mut s = VecBlocks::new(10);
        let data: Vec<u8> = (0..35).collect();
        s.write(7, &data).unwrap();
        assert_eq!(s.size().unwrap(), 42);

        let mut buf = vec![0u8; 60];
        let n = s.read(0, &mut buf).unwrap();
        assert_eq!(n, 42);
        assert!(buf[..7].iter().all(|&b| b == 0));
        assert_eq!(&buf[7..42], &data[..]);
    }

    #[test]
    fn write_past_eof_zero_fills_gap() {
        let mut s = VecBlocks::new(10);
        s.write(0, b"abc").unwrap();
        s.write(25, b"xyz").unwrap();
        assert_eq!(s.size().unwrap(), 28);

        let mut buf = vec![0u8; 28];
        assert_eq!(s.read(0, &mut buf).unwrap(), 28);
        assert_eq!(&buf[..3], b"abc");
        assert!(buf[3..25].iter().all(|&b| b == 0));
        assert_eq!(&buf[25..], b"xyz");
    }

    #[test]
    fn shrink_to_unaligned_boundary() {
        let mut s = VecBlocks::new(10);
        let data: Vec<u8> = (0..30).collect();
        s.write(0, &data).unwrap();
        s.resize(13).unwrap();
        assert_eq!(s.size().unwrap(), 13);

        let mut buf = vec![0u8; 30];
        assert_eq!(s.read(0, &mut buf).unwrap(), 13);
        assert_eq!(&buf[..13], &data[..13]);
    }

    #[test]
    fn grow_zero_extends() {
        let mut s = VecBlocks::new(10);
        s.write(0, b"abcde").unwrap();
        s.resize(27).unwrap();
        assert_eq!(s.size().unwrap(), 27);

        let mut buf = vec![1u8; 30];
        assert_eq!(s.read(0, &mut buf).unwrap(), 27);
        assert_eq!(&buf[..5], b"abcde");
        assert!(buf[5..27].iter().all(|&b| b == 0));
    }

    #[test]
    fn grow_within_same_block() {
        let mut s = VecBlocks::new(10);
        s.write(0, b"ab").unwrap();
        s.resize(7).unwrap();
        assert_eq!(s.size().unwrap(), 7);

        let mut buf = vec![1u8; 10];
        assert_eq!(s.read(0, &mut buf).unwrap(), 7);
        assert_eq!(&buf[..7], b"ab\0\0\0\0\0");
    }

    #[test]
    fn read_past_eof_is_empty() {
        let mut s = VecBlocks::new(10);
        s.write(0, b"abc").unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(s.read(100, &mut buf).unwrap(), 0);
    }
}
