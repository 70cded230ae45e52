#![forbid(unsafe_code)]
//! Device layer for the silt log store.
//!
//! Two traits: [`ByteDevice`] is the positional-I/O substrate
//! (pread/pwrite semantics), and [`BlockDevice`] is the whole-block
//! contract the store consumes. [`ByteBlockDevice`] adapts any byte device
//! into a block device, validating geometry at construction and enforcing
//! whole-block access on every call.
//!
//! Devices are fixed-size: a backing file is a disk image, created at a
//! chosen capacity and never grown by I/O.

use silt_error::{Result, SiltError};
use silt_types::{BlockNumber, BlockSize};

use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::Arc;

/// Byte-addressed device for fixed-offset I/O.
pub trait ByteDevice: Send + Sync {
    /// Total length in bytes.
    fn len_bytes(&self) -> u64;

    /// Read exactly `buf.len()` bytes from `offset` into `buf`.
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Write all bytes in `buf` to `offset`.
    fn write_all_at(&self, offset: u64, buf: &[u8]) -> Result<()>;

    /// Flush pending writes to stable storage.
    fn sync(&self) -> Result<()>;
}

/// Block-addressed I/O interface.
///
/// The unit of I/O is exactly one block: `buf.len()` must equal
/// `block_size()` for both reads and writes.
pub trait BlockDevice: Send + Sync {
    /// Device block size in bytes.
    fn block_size(&self) -> BlockSize;

    /// Total number of blocks.
    fn block_count(&self) -> u64;

    /// Read one whole block into `buf`.
    fn read_block(&self, block: BlockNumber, buf: &mut [u8]) -> Result<()>;

    /// Write one whole block from `buf`.
    fn write_block(&self, block: BlockNumber, buf: &[u8]) -> Result<()>;

    /// Flush pending writes to stable storage.
    fn sync(&self) -> Result<()>;
}

/// File-backed byte device using `pread`/`pwrite` style I/O.
///
/// Uses `std::os::unix::fs::FileExt`, which is thread-safe and does not
/// require a shared seek position.
#[derive(Debug, Clone)]
pub struct FileByteDevice {
    file: Arc<File>,
    len: u64,
    writable: bool,
}

impl FileByteDevice {
    /// Open an existing image read-write, falling back to read-only.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let (file, writable) = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path.as_ref())
            .map(|file| (file, true))
            .or_else(|_| {
                OpenOptions::new()
                    .read(true)
                    .open(path.as_ref())
                    .map(|file| (file, false))
            })?;
        let len = file.metadata()?.len();
        Ok(Self {
            file: Arc::new(file),
            len,
            writable,
        })
    }

    /// Create a new image of `len_bytes` zeros. Fails if the path exists.
    pub fn create(path: impl AsRef<Path>, len_bytes: u64) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path.as_ref())?;
        file.set_len(len_bytes)?;
        Ok(Self {
            file: Arc::new(file),
            len: len_bytes,
            writable: true,
        })
    }

    #[must_use]
    pub fn is_writable(&self) -> bool {
        self.writable
    }
}

impl ByteDevice for FileByteDevice {
    fn len_bytes(&self) -> u64 {
        self.len
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let end = range_end(offset, buf.len())?;
        if end > self.len {
            return Err(SiltError::Geometry(format!(
                "read out of bounds: offset={offset} len={} device_len={}",
                buf.len(),
                self.len
            )));
        }
        self.file.read_exact_at(buf, offset)?;
        Ok(())
    }

    fn write_all_at(&self, offset: u64, buf: &[u8]) -> Result<()> {
        if !self.writable {
            return Err(SiltError::ReadOnly);
        }
        let end = range_end(offset, buf.len())?;
        if end > self.len {
            return Err(SiltError::Geometry(format!(
                "write out of bounds: offset={offset} len={} device_len={}",
                buf.len(),
                self.len
            )));
        }
        self.file.write_all_at(buf, offset)?;
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

/// In-memory byte device over a fixed-size buffer.
///
/// Backs ephemeral stores and most of the test suite. Shared freely via
/// `Arc` so a test can inspect device contents while a store owns it.
#[derive(Debug)]
pub struct MemByteDevice {
    bytes: Mutex<Vec<u8>>,
}

impl MemByteDevice {
    #[must_use]
    pub fn new(len: usize) -> Self {
        Self {
            bytes: Mutex::new(vec![0_u8; len]),
        }
    }

    /// Copy of the device contents in `range` (test inspection).
    pub fn snapshot(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let mut out = vec![0_u8; len];
        self.read_exact_at(offset, &mut out)?;
        Ok(out)
    }
}

impl ByteDevice for MemByteDevice {
    fn len_bytes(&self) -> u64 {
        u64::try_from(self.bytes.lock().len()).unwrap_or(0)
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let (start, end) = mem_range(offset, buf.len())?;
        let bytes = self.bytes.lock();
        if end > bytes.len() {
            return Err(SiltError::Geometry(format!(
                "read out of bounds: offset={offset} len={} device_len={}",
                buf.len(),
                bytes.len()
            )));
        }
        buf.copy_from_slice(&bytes[start..end]);
        drop(bytes);
        Ok(())
    }

    fn write_all_at(&self, offset: u64, buf: &[u8]) -> Result<()> {
        let (start, end) = mem_range(offset, buf.len())?;
        let mut bytes = self.bytes.lock();
        if end > bytes.len() {
            return Err(SiltError::Geometry(format!(
                "write out of bounds: offset={offset} len={} device_len={}",
                buf.len(),
                bytes.len()
            )));
        }
        bytes[start..end].copy_from_slice(buf);
        drop(bytes);
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }
}

fn range_end(offset: u64, len: usize) -> Result<u64> {
    let len = u64::try_from(len)
        .map_err(|_| SiltError::Geometry("I/O length overflows u64".to_owned()))?;
    offset
        .checked_add(len)
        .ok_or_else(|| SiltError::Geometry("I/O range overflows u64".to_owned()))
}

fn mem_range(offset: u64, len: usize) -> Result<(usize, usize)> {
    let start = usize::try_from(offset)
        .map_err(|_| SiltError::Geometry("offset overflows usize".to_owned()))?;
    let end = start
        .checked_add(len)
        .ok_or_else(|| SiltError::Geometry("I/O range overflows usize".to_owned()))?;
    Ok((start, end))
}

/// Whole-block adapter over any [`ByteDevice`].
#[derive(Debug)]
pub struct ByteBlockDevice<D: ByteDevice> {
    inner: D,
    block_size: BlockSize,
    block_count: u64,
}

impl<D: ByteDevice> ByteBlockDevice<D> {
    /// Wrap `inner`, requiring its length to be a whole number of blocks.
    pub fn new(inner: D, block_size: BlockSize) -> Result<Self> {
        let len = inner.len_bytes();
        let remainder = len % block_size.as_u64();
        if remainder != 0 {
            return Err(SiltError::Geometry(format!(
                "device length is not block-aligned: len_bytes={len} block_size={block_size} remainder={remainder}"
            )));
        }
        let block_count = len / block_size.as_u64();
        Ok(Self {
            inner,
            block_size,
            block_count,
        })
    }

    #[must_use]
    pub fn inner(&self) -> &D {
        &self.inner
    }

    fn block_offset(&self, block: BlockNumber) -> Result<u64> {
        if block.0 >= self.block_count {
            return Err(SiltError::Geometry(format!(
                "block out of range: block={} block_count={}",
                block.0, self.block_count
            )));
        }
        block
            .to_byte_offset(self.block_size)
            .map(|offset| offset.0)
            .ok_or_else(|| SiltError::Geometry("block offset overflow".to_owned()))
    }

    fn check_buf(&self, len: usize) -> Result<()> {
        if len != self.block_size.as_usize() {
            return Err(SiltError::Geometry(format!(
                "block I/O buffer size mismatch: got={len} expected={}",
                self.block_size
            )));
        }
        Ok(())
    }
}

impl<D: ByteDevice> BlockDevice for ByteBlockDevice<D> {
    fn block_size(&self) -> BlockSize {
        self.block_size
    }

    fn block_count(&self) -> u64 {
        self.block_count
    }

    fn read_block(&self, block: BlockNumber, buf: &mut [u8]) -> Result<()> {
        self.check_buf(buf.len())?;
        let offset = self.block_offset(block)?;
        self.inner.read_exact_at(offset, buf)
    }

    fn write_block(&self, block: BlockNumber, buf: &[u8]) -> Result<()> {
        self.check_buf(buf.len())?;
        let offset = self.block_offset(block)?;
        self.inner.write_all_at(offset, buf)
    }

    fn sync(&self) -> Result<()> {
        self.inner.sync()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BS: u32 = 4096;

    fn mem_block_device(blocks: usize) -> ByteBlockDevice<MemByteDevice> {
        let mem = MemByteDevice::new(BS as usize * blocks);
        ByteBlockDevice::new(mem, BlockSize::new(BS).expect("valid")).expect("device")
    }

    #[test]
    fn mem_device_round_trips_blocks() {
        let dev = mem_block_device(4);
        assert_eq!(dev.block_count(), 4);
        assert_eq!(dev.block_size().get(), BS);

        dev.write_block(BlockNumber(2), &[7_u8; BS as usize])
            .expect("write");
        let mut buf = vec![0_u8; BS as usize];
        dev.read_block(BlockNumber(2), &mut buf).expect("read");
        assert_eq!(buf, vec![7_u8; BS as usize]);
    }

    #[test]
    fn unwritten_blocks_read_as_zero() {
        let dev = mem_block_device(2);
        let mut buf = vec![0xFF_u8; BS as usize];
        dev.read_block(BlockNumber(1), &mut buf).expect("read");
        assert_eq!(buf, vec![0_u8; BS as usize]);
    }

    #[test]
    fn misaligned_length_is_rejected() {
        let mem = MemByteDevice::new(BS as usize + 1);
        let err = ByteBlockDevice::new(mem, BlockSize::new(BS).expect("valid")).unwrap_err();
        assert!(matches!(err, SiltError::Geometry(_)), "got {err:?}");
    }

    #[test]
    fn block_out_of_range_is_rejected() {
        let dev = mem_block_device(2);
        let mut buf = vec![0_u8; BS as usize];
        let err = dev.read_block(BlockNumber(2), &mut buf).unwrap_err();
        assert!(matches!(err, SiltError::Geometry(_)), "got {err:?}");
        let err = dev.write_block(BlockNumber(9), &buf).unwrap_err();
        assert!(matches!(err, SiltError::Geometry(_)), "got {err:?}");
    }

    #[test]
    fn partial_buffers_are_rejected() {
        let dev = mem_block_device(2);
        let mut short = vec![0_u8; 100];
        let err = dev.read_block(BlockNumber(0), &mut short).unwrap_err();
        assert!(matches!(err, SiltError::Geometry(_)), "got {err:?}");
        let err = dev.write_block(BlockNumber(0), &short).unwrap_err();
        assert!(matches!(err, SiltError::Geometry(_)), "got {err:?}");
    }

    #[test]
    fn non_power_of_two_block_size_works() {
        let bs = BlockSize::new(1000).expect("valid");
        let mem = MemByteDevice::new(3000);
        let dev = ByteBlockDevice::new(mem, bs).expect("device");
        assert_eq!(dev.block_count(), 3);

        dev.write_block(BlockNumber(1), &[9_u8; 1000]).expect("write");
        let mut buf = vec![0_u8; 1000];
        dev.read_block(BlockNumber(1), &mut buf).expect("read");
        assert_eq!(buf, vec![9_u8; 1000]);
    }

    #[test]
    fn mem_snapshot_reads_raw_bytes() {
        let dev = mem_block_device(2);
        let mut block = vec![0_u8; BS as usize];
        block[..4].copy_from_slice(b"silt");
        dev.write_block(BlockNumber(0), &block).expect("write");

        let head = dev.inner().snapshot(0, 4).expect("snapshot");
        assert_eq!(&head, b"silt");
    }

    #[test]
    fn file_device_persists_across_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("image.dat");
        let bs = BlockSize::new(BS).expect("valid");

        {
            let file = FileByteDevice::create(&path, u64::from(BS) * 4).expect("create");
            assert!(file.is_writable());
            let dev = ByteBlockDevice::new(file, bs).expect("device");
            dev.write_block(BlockNumber(3), &[0xAB_u8; BS as usize])
                .expect("write");
            dev.sync().expect("sync");
        }

        let file = FileByteDevice::open(&path).expect("open");
        let dev = ByteBlockDevice::new(file, bs).expect("device");
        assert_eq!(dev.block_count(), 4);
        let mut buf = vec![0_u8; BS as usize];
        dev.read_block(BlockNumber(3), &mut buf).expect("read");
        assert_eq!(buf, vec![0xAB_u8; BS as usize]);
    }

    #[test]
    fn create_refuses_existing_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("image.dat");
        FileByteDevice::create(&path, 4096).expect("first create");
        let err = FileByteDevice::create(&path, 4096).unwrap_err();
        assert!(matches!(err, SiltError::Io(_)), "got {err:?}");
    }

    #[test]
    fn file_reads_past_end_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("image.dat");
        let file = FileByteDevice::create(&path, 4096).expect("create");
        let mut buf = [0_u8; 8];
        let err = file.read_exact_at(4090, &mut buf).unwrap_err();
        assert!(matches!(err, SiltError::Geometry(_)), "got {err:?}");
    }
}
