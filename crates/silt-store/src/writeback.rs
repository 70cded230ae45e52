#![forbid(unsafe_code)]
//! Bounded write-back ring and the persister loop that drains it.
//!
//! The ring is a fixed-capacity FIFO of full blocks awaiting device
//! writes. Producers block when it is full; the persister thread pulls
//! the oldest block, writes it out, and only then releases the slot, so
//! a block stays findable by readers for the whole time it is in
//! flight. The first device write failure latches permanently: every
//! later enqueue, drain wait, and health check reports it, and both
//! condition variables are woken so no thread stays parked.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use silt_device::BlockDevice;
use silt_error::{Result, SiltError};
use silt_types::{BlockSize, ByteOffset};

use crate::metrics::StoreMetrics;

/// Recorded cause of the first failed device write.
#[derive(Debug, Clone)]
pub(crate) struct WriteBackFailure {
    offset: ByteOffset,
    detail: String,
}

impl WriteBackFailure {
    fn to_error(&self) -> SiltError {
        SiltError::WriteBack {
            offset: self.offset.0,
            detail: self.detail.clone(),
        }
    }
}

#[derive(Debug)]
struct Slot {
    dst: ByteOffset,
    data: Vec<u8>,
}

#[derive(Debug)]
struct RingState {
    slots: Vec<Slot>,
    /// Next slot to fill.
    head: usize,
    /// Oldest occupied slot.
    tail: usize,
    count: usize,
    stop: bool,
    /// Bytes durable on the device: end offset of the highest
    /// acknowledged block write.
    durable: u64,
    failure: Option<WriteBackFailure>,
}

#[derive(Debug)]
pub(crate) struct WriteBackRing {
    state: Mutex<RingState>,
    /// Signalled when a slot frees up or the failure latches.
    space: Condvar,
    /// Signalled when a block arrives, shutdown begins, or the failure
    /// latches.
    item: Condvar,
    block_size: BlockSize,
}

impl WriteBackRing {
    /// A ring of `slot_count` preallocated block slots. `durable_floor`
    /// seeds the durable watermark when resuming an existing log.
    pub(crate) fn new(slot_count: usize, block_size: BlockSize, durable_floor: ByteOffset) -> Self {
        let slots = (0..slot_count)
            .map(|_| Slot {
                dst: ByteOffset::ZERO,
                data: vec![0_u8; block_size.as_usize()],
            })
            .collect();
        Self {
            state: Mutex::new(RingState {
                slots,
                head: 0,
                tail: 0,
                count: 0,
                stop: false,
                durable: durable_floor.0,
                failure: None,
            }),
            space: Condvar::new(),
            item: Condvar::new(),
            block_size,
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, RingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Report the latched failure, if any.
    pub(crate) fn check(&self) -> Result<()> {
        match &self.lock_state().failure {
            Some(failure) => Err(failure.to_error()),
            None => Ok(()),
        }
    }

    /// Queue a full block destined for `dst`. Blocks while the ring is
    /// full; fails once a write-back failure has latched.
    pub(crate) fn enqueue(&self, dst: ByteOffset, block: &[u8]) -> Result<()> {
        let mut state = self.lock_state();
        loop {
            if let Some(failure) = &state.failure {
                return Err(failure.to_error());
            }
            if state.count < state.slots.len() {
                break;
            }
            state = self.space.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
        let capacity = state.slots.len();
        let head = state.head;
        state.slots[head].dst = dst;
        state.slots[head].data.copy_from_slice(block);
        state.head = (head + 1) % capacity;
        state.count += 1;
        tracing::trace!(
            target: "silt::writeback",
            offset = dst.0,
            occupied = state.count,
            "block_enqueued"
        );
        drop(state);
        self.item.notify_one();
        Ok(())
    }

    /// Copy `dst.len()` bytes at `in_block` from the queued block for
    /// `block_start`, if present. Scans newest to oldest so a block
    /// re-queued at the same offset wins over its earlier copy.
    pub(crate) fn copy_from(
        &self,
        block_start: ByteOffset,
        in_block: usize,
        dst: &mut [u8],
    ) -> bool {
        let state = self.lock_state();
        let capacity = state.slots.len();
        for age in (0..state.count).rev() {
            let slot = &state.slots[(state.tail + age) % capacity];
            if slot.dst == block_start {
                dst.copy_from_slice(&slot.data[in_block..in_block + dst.len()]);
                return true;
            }
        }
        false
    }

    /// Wait for the oldest queued block and copy it into `scratch`,
    /// returning its destination offset. The slot stays occupied until
    /// [`Self::advance_tail`] acknowledges the device write, so readers
    /// keep finding the block while it is in flight. Returns `None` when
    /// the failure has latched or shutdown began and the ring is empty.
    pub(crate) fn next_block(&self, scratch: &mut [u8]) -> Option<ByteOffset> {
        let mut state = self.lock_state();
        loop {
            if state.failure.is_some() {
                return None;
            }
            if state.count > 0 {
                break;
            }
            if state.stop {
                return None;
            }
            state = self.item.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
        let slot = &state.slots[state.tail];
        scratch.copy_from_slice(&slot.data);
        Some(slot.dst)
    }

    /// Release the slot handed out by [`Self::next_block`] after its
    /// device write succeeded, raising the durable watermark past `dst`.
    pub(crate) fn advance_tail(&self, dst: ByteOffset) {
        let mut state = self.lock_state();
        let capacity = state.slots.len();
        state.tail = (state.tail + 1) % capacity;
        state.count -= 1;
        let end = dst.0.saturating_add(self.block_size.as_u64());
        state.durable = state.durable.max(end);
        drop(state);
        self.space.notify_all();
    }

    /// Latch the first write failure and wake every parked thread.
    pub(crate) fn latch_failure(&self, offset: ByteOffset, detail: String) {
        let mut state = self.lock_state();
        if state.failure.is_none() {
            state.failure = Some(WriteBackFailure { offset, detail });
        }
        drop(state);
        self.space.notify_all();
        self.item.notify_all();
    }

    /// Tell the persister to exit once the backlog is drained.
    pub(crate) fn begin_shutdown(&self) {
        let mut state = self.lock_state();
        state.stop = true;
        drop(state);
        self.item.notify_all();
    }

    /// Block until every queued block has reached the device, or return
    /// the latched failure.
    pub(crate) fn wait_drained(&self) -> Result<()> {
        let mut state = self.lock_state();
        loop {
            if let Some(failure) = &state.failure {
                return Err(failure.to_error());
            }
            if state.count == 0 {
                return Ok(());
            }
            state = self.space.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// End offset of the durable prefix of the log.
    pub(crate) fn durable_bytes(&self) -> u64 {
        self.lock_state().durable
    }

    #[cfg(test)]
    fn occupied(&self) -> usize {
        self.lock_state().count
    }
}

/// Persister loop: drain the ring to the device until shutdown or the
/// first write failure. Runs on the store's dedicated thread.
pub(crate) fn run_persister(
    ring: &WriteBackRing,
    device: &dyn BlockDevice,
    metrics: &StoreMetrics,
) {
    let block_size = device.block_size();
    let mut scratch = vec![0_u8; block_size.as_usize()];
    while let Some(dst) = ring.next_block(&mut scratch) {
        let block = block_size.block_of(dst);
        match device.write_block(block, &scratch) {
            Ok(()) => {
                ring.advance_tail(dst);
                metrics.record_persist();
                tracing::debug!(
                    target: "silt::writeback",
                    offset = dst.0,
                    block = block.0,
                    "block_persisted"
                );
            }
            Err(error) => {
                tracing::error!(
                    target: "silt::writeback",
                    offset = dst.0,
                    block = block.0,
                    error = %error,
                    "write_back_failed"
                );
                ring.latch_failure(dst, error.to_string());
                return;
            }
        }
    }
    tracing::debug!(
        target: "silt::writeback",
        durable = ring.durable_bytes(),
        "persister_stopped"
    );
}
