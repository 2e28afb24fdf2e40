//! Bounds-checked access to guest linear memory.
//!
//! A [`GuestMemory`] borrows the instance's memory for the duration of one
//! syscall. All values are little-endian; any access that would leave the
//! current memory size fails with [`Errno::Fault`] and touches nothing.

use super::types::{Errno, IOVEC_SIZE};

/// One `(pointer, length)` entry of an iovec array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoVec {
    /// Guest offset of the buffer.
    pub buf: u32,
    /// Buffer length in bytes.
    pub len: u32,
}

/// Borrowed view over guest linear memory.
pub struct GuestMemory<'a> {
    data: &'a mut [u8],
}

impl<'a> GuestMemory<'a> {
    /// Wrap the instance's memory bytes.
    pub fn new(data: &'a mut [u8]) -> Self {
        Self { data }
    }

    /// Current memory size in bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    fn range(&self, offset: u32, len: usize) -> Result<std::ops::Range<usize>, Errno> {
        let start = offset as usize;
        let end = start.checked_add(len).ok_or(Errno::Fault)?;
        if end > self.data.len() {
            return Err(Errno::Fault);
        }
        Ok(start..end)
    }

    /// Borrow `len` bytes at `offset`.
    pub fn slice(&self, offset: u32, len: u32) -> Result<&[u8], Errno> {
        let range = self.range(offset, len as usize)?;
        Ok(&self.data[range])
    }

    /// Mutably borrow `len` bytes at `offset`.
    pub fn slice_mut(&mut self, offset: u32, len: u32) -> Result<&mut [u8], Errno> {
        let range = self.range(offset, len as usize)?;
        Ok(&mut self.data[range])
    }

    /// Copy `bytes` into memory at `offset`.
    pub fn write_bytes(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Errno> {
        let range = self.range(offset, bytes.len())?;
        self.data[range].copy_from_slice(bytes);
        Ok(())
    }

    /// Read a u32.
    pub fn read_u32(&self, offset: u32) -> Result<u32, Errno> {
        let range = self.range(offset, 4)?;
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&self.data[range]);
        Ok(u32::from_le_bytes(raw))
    }

    /// Read a u64.
    pub fn read_u64(&self, offset: u32) -> Result<u64, Errno> {
        let range = self.range(offset, 8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&self.data[range]);
        Ok(u64::from_le_bytes(raw))
    }

    /// Write a u16.
    pub fn write_u16(&mut self, offset: u32, value: u16) -> Result<(), Errno> {
        self.write_bytes(offset, &value.to_le_bytes())
    }

    /// Write a u32.
    pub fn write_u32(&mut self, offset: u32, value: u32) -> Result<(), Errno> {
        self.write_bytes(offset, &value.to_le_bytes())
    }

    /// Write a u64.
    pub fn write_u64(&mut self, offset: u32, value: u64) -> Result<(), Errno> {
        self.write_bytes(offset, &value.to_le_bytes())
    }

    /// Decode `count` iovec entries starting at `iovs`.
    ///
    /// Only the array itself is validated here; each buffer is checked when
    /// it is accessed.
    pub fn read_iovecs(&self, iovs: u32, count: u32) -> Result<Vec<IoVec>, Errno> {
        let total = count.checked_mul(IOVEC_SIZE).ok_or(Errno::Fault)?;
        self.range(iovs, total as usize)?;

        (0..count)
            .map(|i| {
                let entry = iovs + i * IOVEC_SIZE;
                Ok(IoVec {
                    buf: self.read_u32(entry)?,
                    len: self.read_u32(entry + 4)?,
                })
            })
            .collect()
    }

    /// Concatenate the guest buffers named by `iovecs`, skipping empty ones.
    pub fn gather(&self, iovecs: &[IoVec]) -> Result<Vec<u8>, Errno> {
        let mut out = Vec::new();
        for iov in iovecs.iter().filter(|iov| iov.len > 0) {
            out.extend_from_slice(self.slice(iov.buf, iov.len)?);
        }
        Ok(out)
    }

    /// Distribute `src` across the buffers named by `iovecs`, in order.
    ///
    /// Each buffer is filled completely before the next one is started and
    /// copying stops as soon as `src` is exhausted. Returns the number of
    /// bytes copied. Every buffer that will be touched is validated before
    /// anything is written.
    pub fn scatter(&mut self, iovecs: &[IoVec], src: &[u8]) -> Result<usize, Errno> {
        let mut plan = Vec::new();
        let mut left = src.len();
        for iov in iovecs {
            if left == 0 {
                break;
            }
            let take = left.min(iov.len as usize);
            plan.push((self.range(iov.buf, take)?, take));
            left -= take;
        }

        let mut copied = 0;
        for (range, take) in plan {
            self.data[range].copy_from_slice(&src[copied..copied + take]);
            copied += take;
        }
        Ok(copied)
    }
}
