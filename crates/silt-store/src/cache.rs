#![forbid(unsafe_code)]
//! Direct-mapped read cache over device-sized blocks.
//!
//! One line per slot, indexed by block number modulo the line count.
//! A newly fetched block evicts whatever shared its line. Lines are
//! filled only from device reads; fresher copies in the current block
//! or the write-back ring are consulted before the cache, so a line
//! never shadows bytes that have not reached the device.

use silt_error::Result;
use silt_types::{BlockSize, ByteOffset};

#[derive(Debug)]
struct CacheLine {
    /// Device offset of the cached block, `None` while the line is empty
    /// or mid-fill.
    tag: Option<ByteOffset>,
    data: Vec<u8>,
}

#[derive(Debug)]
pub(crate) struct ReadCache {
    lines: Vec<CacheLine>,
    block_size: BlockSize,
}

impl ReadCache {
    pub(crate) fn new(block_size: BlockSize, lines: usize) -> Self {
        let lines = (0..lines)
            .map(|_| CacheLine {
                tag: None,
                data: vec![0_u8; block_size.as_usize()],
            })
            .collect();
        Self { lines, block_size }
    }

    fn index(&self, block_start: ByteOffset) -> usize {
        let lines = u64::try_from(self.lines.len()).unwrap_or(u64::MAX);
        let slot = self.block_size.block_of(block_start).0 % lines;
        usize::try_from(slot).unwrap_or(0)
    }

    /// Copy `dst.len()` bytes starting at `in_block` if the block at
    /// `block_start` is resident. Returns `false` on a miss.
    pub(crate) fn copy_from(
        &self,
        block_start: ByteOffset,
        in_block: usize,
        dst: &mut [u8],
    ) -> bool {
        let line = &self.lines[self.index(block_start)];
        if line.tag != Some(block_start) {
            return false;
        }
        dst.copy_from_slice(&line.data[in_block..in_block + dst.len()]);
        true
    }

    /// Fill the line for `block_start` by calling `read` on its buffer and
    /// return the cached block. The line is invalidated before the read;
    /// a failed fill leaves it invalid.
    pub(crate) fn fill<F>(&mut self, block_start: ByteOffset, read: F) -> Result<&[u8]>
    where
        F: FnOnce(&mut [u8]) -> Result<()>,
    {
        let index = self.index(block_start);
        let line = &mut self.lines[index];
        line.tag = None;
        read(&mut line.data)?;
        line.tag = Some(block_start);
        Ok(&line.data)
    }
}
