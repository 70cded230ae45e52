#![forbid(unsafe_code)]
//! Block assembler: accumulates appended bytes into the single in-memory
//! current block and hands exactly-filled blocks downstream.

use silt_error::{Result, SiltError};
use silt_types::{BlockSize, ByteOffset};

/// The current (still-filling) block plus the logical write cursor.
///
/// Owned by the store's producer side; all mutation is `&mut self`, no
/// interior mutability. Invariant: bytes of `block` at and past the
/// cursor's in-block position are zero (zeroed at construction and after
/// every hand-off), so the buffer itself is the zero-padded image of the
/// partial block.
#[derive(Debug)]
pub(crate) struct BlockAssembler {
    block: Vec<u8>,
    block_size: BlockSize,
    cursor: ByteOffset,
}

impl BlockAssembler {
    pub(crate) fn new(block_size: BlockSize, cursor: ByteOffset) -> Self {
        Self {
            block: vec![0_u8; block_size.as_usize()],
            block_size,
            cursor,
        }
    }

    /// Load the trailing block image when resuming at a mid-block cursor.
    ///
    /// Bytes before the cursor come from `image`; the tail stays zero.
    pub(crate) fn preload(&mut self, image: &[u8]) {
        let fill = self.fill();
        self.block[..fill].copy_from_slice(&image[..fill]);
        self.block[fill..].fill(0);
    }

    /// Logical write cursor: byte offset of the next append.
    pub(crate) fn cursor(&self) -> ByteOffset {
        self.cursor
    }

    /// In-block position of the cursor (0 when block-aligned).
    pub(crate) fn fill(&self) -> usize {
        self.block_size.offset_in_block(self.cursor)
    }

    /// Device offset of the block currently being filled.
    pub(crate) fn block_start(&self) -> ByteOffset {
        self.block_size.block_floor(self.cursor)
    }

    /// Whether the current block is the one starting at `block_start` and
    /// holds any bytes.
    pub(crate) fn holds(&self, block_start: ByteOffset) -> bool {
        self.fill() > 0 && self.block_start() == block_start
    }

    /// Copy `dst.len()` bytes of the current block starting at `in_block`.
    pub(crate) fn copy_from(&self, in_block: usize, dst: &mut [u8]) {
        dst.copy_from_slice(&self.block[in_block..in_block + dst.len()]);
    }

    /// Zero-padded image of the partial block (explicit flush support).
    pub(crate) fn padded_block(&self) -> &[u8] {
        &self.block
    }

    /// Append `bytes`, handing each exactly-filled block to `sink` as
    /// `(destined device offset, full block image)` and starting a fresh
    /// zeroed block. The cursor advances by the exact byte count appended.
    pub(crate) fn append<F>(&mut self, bytes: &[u8], mut sink: F) -> Result<()>
    where
        F: FnMut(ByteOffset, &[u8]) -> Result<()>,
    {
        let mut src = bytes;
        while !src.is_empty() {
            let fill = self.fill();
            let room = self.block_size.as_usize() - fill;
            if src.len() >= room {
                let next = self.advanced(room)?;
                self.block[fill..].copy_from_slice(&src[..room]);
                sink(self.block_start(), &self.block)?;
                self.block.fill(0);
                self.cursor = next;
                src = &src[room..];
            } else {
                let next = self.advanced(src.len())?;
                self.block[fill..fill + src.len()].copy_from_slice(src);
                self.cursor = next;
                src = &[];
            }
        }
        Ok(())
    }

    fn advanced(&self, bytes: usize) -> Result<ByteOffset> {
        let bytes = u64::try_from(bytes)
            .map_err(|_| SiltError::Geometry("append length overflows u64".to_owned()))?;
        self.cursor
            .checked_add(bytes)
            .ok_or_else(|| SiltError::Geometry("write cursor overflows u64".to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BS: u32 = 4096;

    fn assembler() -> BlockAssembler {
        BlockAssembler::new(BlockSize::new(BS).expect("valid"), ByteOffset::ZERO)
    }

    fn collecting_sink(
        sunk: &mut Vec<(u64, Vec<u8>)>,
    ) -> impl FnMut(ByteOffset, &[u8]) -> Result<()> + '_ {
        |dst, block| {
            sunk.push((dst.0, block.to_vec()));
            Ok(())
        }
    }

    #[test]
    fn partial_append_advances_cursor_without_handoff() {
        let mut asm = assembler();
        let mut sunk = Vec::new();
        asm.append(&[0xAA; 100], collecting_sink(&mut sunk))
            .expect("append");
        assert!(sunk.is_empty());
        assert_eq!(asm.cursor(), ByteOffset(100));
        assert_eq!(asm.fill(), 100);
        assert_eq!(asm.block_start(), ByteOffset::ZERO);
    }

    #[test]
    fn exact_block_fill_hands_off_and_zeroes() {
        let mut asm = assembler();
        let mut sunk = Vec::new();
        asm.append(&[0x55; BS as usize], collecting_sink(&mut sunk))
            .expect("append");
        assert_eq!(sunk.len(), 1);
        assert_eq!(sunk[0].0, 0);
        assert_eq!(sunk[0].1, vec![0x55; BS as usize]);
        assert_eq!(asm.cursor(), ByteOffset(u64::from(BS)));
        assert_eq!(asm.fill(), 0);
        assert_eq!(asm.padded_block(), vec![0_u8; BS as usize].as_slice());
    }

    #[test]
    fn multi_block_append_splits_in_order() {
        let mut asm = assembler();
        let payload: Vec<u8> = (0..BS as usize * 2 + 500)
            .map(|i| u8::try_from(i % 251).expect("fits"))
            .collect();
        let mut sunk = Vec::new();
        asm.append(&payload, collecting_sink(&mut sunk)).expect("append");

        assert_eq!(sunk.len(), 2);
        assert_eq!(sunk[0].0, 0);
        assert_eq!(sunk[1].0, u64::from(BS));
        assert_eq!(sunk[0].1, payload[..BS as usize]);
        assert_eq!(sunk[1].1, payload[BS as usize..BS as usize * 2]);
        assert_eq!(asm.cursor(), ByteOffset(u64::from(BS) * 2 + 500));
        assert_eq!(asm.fill(), 500);
        assert_eq!(asm.block_start(), ByteOffset(u64::from(BS) * 2));
    }

    #[test]
    fn appends_accumulate_across_calls() {
        let mut asm = assembler();
        let mut sunk = Vec::new();
        asm.append(&[1_u8; 4000], collecting_sink(&mut sunk))
            .expect("first");
        asm.append(&[2_u8; 200], collecting_sink(&mut sunk))
            .expect("second");

        assert_eq!(sunk.len(), 1);
        let block = &sunk[0].1;
        assert!(block[..4000].iter().all(|b| *b == 1));
        assert!(block[4000..].iter().all(|b| *b == 2));
        assert_eq!(asm.fill(), 104);
    }

    #[test]
    fn padded_block_is_payload_then_zeros() {
        let mut asm = assembler();
        asm.append(&[7_u8; 300], |_, _| Ok(())).expect("append");
        let padded = asm.padded_block();
        assert!(padded[..300].iter().all(|b| *b == 7));
        assert!(padded[300..].iter().all(|b| *b == 0));
    }

    #[test]
    fn holds_tracks_the_current_block_only() {
        let mut asm = assembler();
        assert!(!asm.holds(ByteOffset::ZERO));
        asm.append(&[9_u8; 10], |_, _| Ok(())).expect("append");
        assert!(asm.holds(ByteOffset::ZERO));
        assert!(!asm.holds(ByteOffset(u64::from(BS))));

        let mut out = [0_u8; 4];
        asm.copy_from(2, &mut out);
        assert_eq!(out, [9, 9, 9, 9]);
    }

    #[test]
    fn mid_block_resume_preloads_prefix() {
        let bs = BlockSize::new(BS).expect("valid");
        let mut asm = BlockAssembler::new(bs, ByteOffset(u64::from(BS) + 700));
        let mut image = vec![0xEE_u8; BS as usize];
        image[700..].fill(0xFF);
        asm.preload(&image);

        assert_eq!(asm.fill(), 700);
        assert_eq!(asm.block_start(), ByteOffset(u64::from(BS)));
        let mut out = [0_u8; 2];
        asm.copy_from(698, &mut out);
        assert_eq!(out, [0xEE, 0xEE]);
        assert!(asm.padded_block()[700..].iter().all(|b| *b == 0));
    }

    #[test]
    fn empty_append_is_a_no_op() {
        let mut asm = assembler();
        asm.append(&[], |_, _| panic!("no hand-off expected"))
            .expect("append");
        assert_eq!(asm.cursor(), ByteOffset::ZERO);
    }

    #[test]
    fn sink_error_leaves_cursor_unchanged() {
        let mut asm = assembler();
        let err = asm
            .append(&[0_u8; BS as usize], |_, _| {
                Err(SiltError::Config("sink refused".to_owned()))
            })
            .unwrap_err();
        assert!(matches!(err, SiltError::Config(_)));
        assert_eq!(asm.cursor(), ByteOffset::ZERO);
    }
}
