#![forbid(unsafe_code)]
//! Append-only log-structured block store.
//!
//! A [`LogStore`] turns a block device into a byte-addressed append log.
//! Appends land in the in-memory current block; each block that fills
//! completely moves into a bounded write-back ring, and a dedicated
//! persister thread drains the ring to the device in arrival order.
//! Reads see every appended byte immediately, durable or not, by
//! consulting sources freshest first for each block touched:
//!
//! 1. the current (still-filling) block,
//! 2. the write-back ring, newest copy first,
//! 3. the direct-mapped read cache,
//! 4. the device, filling the cache on the way.
//!
//! The first failed device write latches permanently: every later
//! append, read, flush, and close reports it instead of touching a log
//! with a hole in it.

mod assembler;
mod cache;
mod metrics;
mod writeback;

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use silt_device::{BlockDevice, ByteBlockDevice, FileByteDevice};
use silt_error::{Result, SiltError};
use silt_types::{BlockSize, ByteOffset};

use crate::assembler::BlockAssembler;
use crate::cache::ReadCache;
use crate::metrics::StoreMetrics;
use crate::writeback::{WriteBackRing, run_persister};

pub use crate::metrics::MetricsSnapshot;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tunables for [`LogStore::with_device`] and [`LogStore::open_with`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreConfig {
    /// Capacity of the write-back ring, in blocks. Appends block once
    /// this many full blocks await the device.
    pub ring_slots: usize,
    /// Number of direct-mapped read cache lines.
    pub cache_lines: usize,
    /// Device capacity, in blocks, when the backing file has to be
    /// created. Ignored for existing files and caller-supplied devices.
    pub device_blocks: u64,
    /// Write cursor to resume at when reopening an existing log. The
    /// caller asserts that the log below this offset is intact; `None`
    /// starts a fresh log at offset zero.
    pub resume_at: Option<ByteOffset>,
}

impl Default for StoreConfig {
    /// 32 ring slots, 256 cache lines, 16384 blocks for new files, and
    /// a fresh log.
    fn default() -> Self {
        Self {
            ring_slots: 32,
            cache_lines: 256,
            device_blocks: 16 * 1024,
            resume_at: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Append-only byte log over a [`BlockDevice`].
///
/// Single-writer: appends and reads take `&mut self`. Persistence runs
/// on a background thread owned by the store; [`LogStore::close`] (or
/// drop) stops it after draining queued blocks.
pub struct LogStore {
    device: Arc<dyn BlockDevice>,
    block_size: BlockSize,
    assembler: BlockAssembler,
    ring: Arc<WriteBackRing>,
    cache: ReadCache,
    metrics: Arc<StoreMetrics>,
    persister: Option<JoinHandle<()>>,
}

impl fmt::Debug for LogStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogStore")
            .field("block_size", &self.block_size)
            .field("write_cursor", &self.assembler.cursor())
            .finish_non_exhaustive()
    }
}

impl LogStore {
    /// Open `path` as a fresh log with the default block size and
    /// configuration, creating the backing file if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, BlockSize::DEFAULT, StoreConfig::default())
    }

    /// Open the backing file at `path`, creating it at
    /// `config.device_blocks` blocks when missing.
    pub fn open_with(
        path: impl AsRef<Path>,
        block_size: BlockSize,
        config: StoreConfig,
    ) -> Result<Self> {
        let path = path.as_ref();
        let bytes = if path.exists() {
            FileByteDevice::open(path)?
        } else {
            if config.device_blocks == 0 {
                return Err(SiltError::Config(
                    "device_blocks must be non-zero".to_owned(),
                ));
            }
            let len = block_size
                .as_u64()
                .checked_mul(config.device_blocks)
                .ok_or_else(|| SiltError::Config("device capacity overflows u64".to_owned()))?;
            FileByteDevice::create(path, len)?
        };
        let device = ByteBlockDevice::new(bytes, block_size)?;
        Self::with_device(Arc::new(device), config)
    }

    /// Build a store over an already-opened device and start its
    /// persister thread.
    pub fn with_device(device: Arc<dyn BlockDevice>, config: StoreConfig) -> Result<Self> {
        if config.ring_slots == 0 {
            return Err(SiltError::Config("ring_slots must be non-zero".to_owned()));
        }
        if config.cache_lines == 0 {
            return Err(SiltError::Config("cache_lines must be non-zero".to_owned()));
        }
        let block_size = device.block_size();
        let cursor = config.resume_at.unwrap_or(ByteOffset::ZERO);
        let capacity = block_size.as_u64().saturating_mul(device.block_count());
        if cursor.0 > capacity {
            return Err(SiltError::Config(format!(
                "resume offset {cursor} past device capacity {capacity}"
            )));
        }

        let mut assembler = BlockAssembler::new(block_size, cursor);
        if !block_size.is_block_aligned(cursor) {
            // Mid-block resume: a pre-close flush left the padded tail
            // block on the device. Reload its prefix so the block keeps
            // filling from the cursor.
            let mut image = vec![0_u8; block_size.as_usize()];
            device.read_block(block_size.block_of(cursor), &mut image)?;
            assembler.preload(&image);
        }

        let ring = Arc::new(WriteBackRing::new(
            config.ring_slots,
            block_size,
            block_size.block_floor(cursor),
        ));
        let metrics = Arc::new(StoreMetrics::default());
        let persister = {
            let ring = Arc::clone(&ring);
            let device = Arc::clone(&device);
            let metrics = Arc::clone(&metrics);
            thread::Builder::new()
                .name("silt-persister".to_owned())
                .spawn(move || run_persister(&ring, device.as_ref(), &metrics))?
        };

        tracing::info!(
            target: "silt::store",
            block_size = block_size.get(),
            ring_slots = config.ring_slots,
            cache_lines = config.cache_lines,
            cursor = cursor.0,
            "store_opened"
        );

        Ok(Self {
            device,
            block_size,
            assembler,
            ring,
            cache: ReadCache::new(block_size, config.cache_lines),
            metrics,
            persister: Some(persister),
        })
    }

    /// Append `bytes` at the write cursor.
    ///
    /// The bytes are readable as soon as this returns; durability
    /// follows asynchronously as filled blocks reach the device. Blocks
    /// while the write-back ring is full.
    pub fn append(&mut self, bytes: &[u8]) -> Result<()> {
        self.ring.check()?;
        let ring = &self.ring;
        let metrics = &self.metrics;
        self.assembler.append(bytes, |dst, block| {
            ring.enqueue(dst, block)?;
            metrics.record_enqueue();
            Ok(())
        })?;
        self.metrics
            .record_append(u64::try_from(bytes.len()).unwrap_or(u64::MAX));
        tracing::trace!(
            target: "silt::store",
            len = bytes.len(),
            cursor = self.assembler.cursor().0,
            "appended"
        );
        Ok(())
    }

    /// Read exactly `buf.len()` bytes starting at `offset`.
    ///
    /// The whole range must lie below the write cursor; a zero-length
    /// read at the cursor itself succeeds. Each block of the range is
    /// served from the freshest source that holds it: the current
    /// block, the write-back ring, the read cache, then the device.
    pub fn read_at(&mut self, offset: ByteOffset, buf: &mut [u8]) -> Result<()> {
        self.ring.check()?;
        let len = u64::try_from(buf.len())
            .map_err(|_| SiltError::Geometry("read length overflows u64".to_owned()))?;
        let cursor = self.assembler.cursor();
        let out_of_bounds = || SiltError::OutOfBounds {
            offset: offset.0,
            len,
            cursor: cursor.0,
        };
        let end = offset.checked_add(len).ok_or_else(out_of_bounds)?;
        if end > cursor {
            return Err(out_of_bounds());
        }

        let mut pos = offset;
        let mut copied = 0_usize;
        while copied < buf.len() {
            let in_block = self.block_size.offset_in_block(pos);
            let take = (self.block_size.as_usize() - in_block).min(buf.len() - copied);
            let block_start = self.block_size.block_floor(pos);
            self.fetch(block_start, in_block, &mut buf[copied..copied + take])?;
            let step = u64::try_from(take).unwrap_or(u64::MAX);
            pos = pos
                .checked_add(step)
                .ok_or_else(|| SiltError::Geometry("read position overflows u64".to_owned()))?;
            copied += take;
        }
        self.metrics.record_read(len);
        Ok(())
    }

    /// Serve one in-block range from the freshest source holding its
    /// block. Cache lines fill from device reads only; anything newer
    /// was already found in the current block or the ring.
    fn fetch(&mut self, block_start: ByteOffset, in_block: usize, dst: &mut [u8]) -> Result<()> {
        if self.assembler.holds(block_start) {
            self.assembler.copy_from(in_block, dst);
            self.metrics.record_current_hit();
            return Ok(());
        }
        if self.ring.copy_from(block_start, in_block, dst) {
            self.metrics.record_ring_hit();
            return Ok(());
        }
        if self.cache.copy_from(block_start, in_block, dst) {
            self.metrics.record_cache_hit();
            return Ok(());
        }
        let device = Arc::clone(&self.device);
        let block = self.block_size.block_of(block_start);
        let data = self
            .cache
            .fill(block_start, |line| device.read_block(block, line))?;
        dst.copy_from_slice(&data[in_block..in_block + dst.len()]);
        self.metrics.record_device_fill();
        Ok(())
    }

    /// Make every appended byte durable.
    ///
    /// A partial trailing block is queued as a zero-padded copy; the
    /// ring then drains and the device syncs. The current block keeps
    /// filling afterwards, and once full it is queued again at the same
    /// offset, overwriting the padded image with the complete block.
    pub fn flush(&mut self) -> Result<()> {
        self.ring.check()?;
        if self.assembler.fill() > 0 {
            self.ring
                .enqueue(self.assembler.block_start(), self.assembler.padded_block())?;
            self.metrics.record_enqueue();
            tracing::debug!(
                target: "silt::store",
                offset = self.assembler.block_start().0,
                fill = self.assembler.fill(),
                "partial_block_flushed"
            );
        }
        self.ring.wait_drained()?;
        self.device.sync()?;
        self.metrics.record_flush();
        tracing::debug!(
            target: "silt::store",
            durable = self.ring.durable_bytes(),
            "flushed"
        );
        Ok(())
    }

    /// Stop the persister and release the store.
    ///
    /// Queued full blocks are written out first. The partial trailing
    /// block is not padded out; its bytes persist only if [`Self::flush`]
    /// ran after the last append. Reports a latched write-back failure
    /// if one occurred.
    pub fn close(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        let Some(persister) = self.persister.take() else {
            return Ok(());
        };
        self.ring.begin_shutdown();
        let joined = persister.join();
        self.ring.check()?;
        if joined.is_err() {
            return Err(SiltError::WriteBack {
                offset: self.ring.durable_bytes(),
                detail: "persister thread panicked".to_owned(),
            });
        }
        self.device.sync()?;
        tracing::info!(
            target: "silt::store",
            durable = self.ring.durable_bytes(),
            cursor = self.assembler.cursor().0,
            "store_closed"
        );
        Ok(())
    }

    /// Block size of the backing device.
    #[must_use]
    pub fn block_size(&self) -> BlockSize {
        self.block_size
    }

    /// Logical end of the log: the offset the next append lands at.
    #[must_use]
    pub fn write_cursor(&self) -> ByteOffset {
        self.assembler.cursor()
    }

    /// Every byte below this offset has reached the device.
    #[must_use]
    pub fn durable_bytes(&self) -> u64 {
        self.ring.durable_bytes().min(self.assembler.cursor().0)
    }

    /// Point-in-time counter snapshot.
    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

impl Drop for LogStore {
    fn drop(&mut self) {
        if self.persister.is_some() {
            if let Err(error) = self.shutdown() {
                tracing::warn!(
                    target: "silt::store",
                    error = %error,
                    "drop_shutdown_failed"
                );
            }
        }
    }
}
