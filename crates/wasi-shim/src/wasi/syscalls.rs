//! WASI preview1 entry points.
//!
//! Every call takes guest offsets and scalars, writes its results into guest
//! memory and returns an [`Errno`]. Failures are always reported to the
//! guest as codes; nothing in here raises a host fault.

use super::fd::{DescriptorTable, StdioStreams};
use super::memory::{GuestMemory, IoVec};
use super::stream::{Stream, StreamRead};
use super::types::{
    Errno, Rights, Whence, FDSTAT_FLAGS_OFFSET, FDSTAT_FILETYPE_OFFSET,
    FDSTAT_RIGHTS_BASE_OFFSET, FDSTAT_RIGHTS_INHERITING_OFFSET, FDSTAT_SIZE,
};
use crate::config::ShimConfig;
use crate::error::Result;

type Outcome<T> = std::result::Result<T, Errno>;

/// What the host should do after `proc_exit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitAction {
    /// Stop the guest and report the code.
    Terminate(i32),
    /// Return to the guest.
    Continue,
}

/// A NUL-joined string table as handed to `args_get`/`environ_get`.
#[derive(Debug, Clone)]
struct StringTable {
    /// Byte offset of each entry inside `buf`.
    offsets: Vec<u32>,
    /// Every entry followed by a NUL.
    buf: Vec<u8>,
}

impl StringTable {
    fn new<'a>(entries: impl IntoIterator<Item = &'a str>) -> Self {
        let mut offsets = Vec::new();
        let mut buf = Vec::new();
        for entry in entries {
            offsets.push(buf.len() as u32);
            buf.extend_from_slice(entry.as_bytes());
            buf.push(0);
        }
        if offsets.is_empty() {
            buf.push(0);
        }
        Self { offsets, buf }
    }

    fn count(&self) -> u32 {
        self.offsets.len() as u32
    }

    fn buf_len(&self) -> u32 {
        self.buf.len() as u32
    }

    fn write_sizes(&self, mem: &mut GuestMemory<'_>, count_ptr: u32, size_ptr: u32) -> Errno {
        if count_ptr == 0 || size_ptr == 0 {
            return Errno::Inval;
        }
        let result = (|| -> Outcome<()> {
            mem.slice(count_ptr, 4)?;
            mem.slice(size_ptr, 4)?;
            mem.write_u32(count_ptr, self.count())?;
            mem.write_u32(size_ptr, self.buf_len())
        })();
        to_errno(result)
    }

    fn write(&self, mem: &mut GuestMemory<'_>, ptrs: u32, buf: u32) -> Errno {
        if ptrs == 0 || buf == 0 {
            return Errno::Inval;
        }
        let result = (|| -> Outcome<()> {
            mem.slice(ptrs, self.count() * 4)?;
            mem.slice(buf, self.buf_len())?;
            for (i, offset) in self.offsets.iter().enumerate() {
                mem.write_u32(ptrs + i as u32 * 4, buf + offset)?;
            }
            mem.write_bytes(buf, &self.buf)
        })();
        to_errno(result)
    }
}

fn to_errno(result: Outcome<()>) -> Errno {
    match result {
        Ok(()) => Errno::Success,
        Err(errno) => errno,
    }
}

/// Host state behind the `wasi_snapshot_preview1` imports.
#[derive(Debug)]
pub struct WasiShim {
    args: StringTable,
    environ: StringTable,
    fds: DescriptorTable,
    return_on_exit: bool,
    exit_code: Option<i32>,
}

impl WasiShim {
    /// Build the shim from a config and the standard streams.
    ///
    /// Fails if the standard descriptors do not land on ids 0, 1 and 2.
    pub fn new(config: &ShimConfig, streams: StdioStreams) -> Result<Self> {
        let fds = DescriptorTable::with_stdio(config.table_size, config.stdio, streams)?;
        let environ: Vec<String> = config
            .env
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect();

        Ok(Self {
            args: StringTable::new(config.args.iter().map(String::as_str)),
            environ: StringTable::new(environ.iter().map(String::as_str)),
            fds,
            return_on_exit: config.return_on_exit,
            exit_code: None,
        })
    }

    /// Build the shim with streams wired to the host console.
    pub fn with_console(config: &ShimConfig) -> Result<Self> {
        Self::new(config, StdioStreams::console())
    }

    /// Descriptor table.
    pub fn fds(&self) -> &DescriptorTable {
        &self.fds
    }

    /// Mutable descriptor table, for hosts adding descriptors before start.
    pub fn fds_mut(&mut self) -> &mut DescriptorTable {
        &mut self.fds
    }

    /// Code passed to `proc_exit`, if the guest called it.
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    /// Emit buffered partial lines on every output stream.
    pub fn flush(&mut self) {
        self.fds.flush_all();
    }

    /// `args_sizes_get(argc, argv_buf_size)`
    pub fn args_sizes_get(&self, mem: &mut GuestMemory<'_>, argc: u32, argv_buf_size: u32) -> Errno {
        tracing::trace!(argc, argv_buf_size, "args_sizes_get");
        self.args.write_sizes(mem, argc, argv_buf_size)
    }

    /// `args_get(argv, argv_buf)`
    pub fn args_get(&self, mem: &mut GuestMemory<'_>, argv: u32, argv_buf: u32) -> Errno {
        tracing::trace!(argv, argv_buf, "args_get");
        self.args.write(mem, argv, argv_buf)
    }

    /// `environ_sizes_get(environc, environ_buf_size)`
    pub fn environ_sizes_get(&self, mem: &mut GuestMemory<'_>, environc: u32, environ_buf_size: u32) -> Errno {
        tracing::trace!(environc, environ_buf_size, "environ_sizes_get");
        self.environ.write_sizes(mem, environc, environ_buf_size)
    }

    /// `environ_get(environ, environ_buf)`
    pub fn environ_get(&self, mem: &mut GuestMemory<'_>, environ: u32, environ_buf: u32) -> Errno {
        tracing::trace!(environ, environ_buf, "environ_get");
        self.environ.write(mem, environ, environ_buf)
    }

    /// `fd_close(fd)`. Descriptors are never reused, so this always succeeds.
    pub fn fd_close(&mut self, fd: u32) -> Errno {
        tracing::trace!(fd, "fd_close");
        Errno::Success
    }

    /// `fd_fdstat_get(fd, fdstat)`
    pub fn fd_fdstat_get(&self, mem: &mut GuestMemory<'_>, fd: u32, fdstat: u32) -> Errno {
        tracing::trace!(fd, fdstat, "fd_fdstat_get");
        if fdstat == 0 {
            return Errno::Inval;
        }
        let entry = match self.fds.get(fd, Rights::empty(), Rights::empty()) {
            Ok(entry) => entry,
            Err(errno) => return errno,
        };

        let mut record = [0u8; FDSTAT_SIZE];
        put(&mut record, FDSTAT_FILETYPE_OFFSET, &entry.filetype.raw().to_le_bytes());
        put(&mut record, FDSTAT_FLAGS_OFFSET, &0u16.to_le_bytes());
        put(&mut record, FDSTAT_RIGHTS_BASE_OFFSET, &entry.rights_base.bits().to_le_bytes());
        put(
            &mut record,
            FDSTAT_RIGHTS_INHERITING_OFFSET,
            &entry.rights_inheriting.bits().to_le_bytes(),
        );
        to_errno(mem.write_bytes(fdstat, &record))
    }

    /// `fd_prestat_get(fd, prestat)`. No directories are preopened.
    pub fn fd_prestat_get(&self, _mem: &mut GuestMemory<'_>, fd: u32, prestat: u32) -> Errno {
        tracing::trace!(fd, prestat, "fd_prestat_get");
        Errno::Badf
    }

    /// `fd_prestat_dir_name(fd, path, path_len)`. No directories are preopened.
    pub fn fd_prestat_dir_name(&self, _mem: &mut GuestMemory<'_>, fd: u32, path: u32, path_len: u32) -> Errno {
        tracing::trace!(fd, path, path_len, "fd_prestat_dir_name");
        Errno::Badf
    }

    /// `fd_seek(fd, offset, whence, newoffset)`
    ///
    /// The new position is written to `newoffset` unless it is null.
    pub fn fd_seek(
        &mut self,
        mem: &mut GuestMemory<'_>,
        fd: u32,
        offset: i64,
        whence: u8,
        newoffset: u32,
    ) -> Errno {
        tracing::trace!(fd, offset, whence, newoffset, "fd_seek");
        let result = (|| -> Outcome<()> {
            let entry = self.fds.get_mut(fd, Rights::FD_SEEK, Rights::empty())?;
            if !matches!(entry.stream, Stream::File(_)) {
                // standard streams always succeed; the position is best effort
                if newoffset != 0 {
                    let _ = mem.write_u64(newoffset, 0);
                }
                return Ok(());
            }
            let whence = Whence::try_from(whence)?;
            let position = entry.stream.seek(offset, whence)?;
            if newoffset != 0 {
                mem.write_u64(newoffset, position)?;
            }
            Ok(())
        })();
        to_errno(result)
    }

    /// `fd_tell(fd, offset)`
    pub fn fd_tell(&self, mem: &mut GuestMemory<'_>, fd: u32, offset: u32) -> Errno {
        tracing::trace!(fd, offset, "fd_tell");
        if offset == 0 {
            return Errno::Inval;
        }
        let result = self
            .fds
            .get(fd, Rights::FD_TELL, Rights::empty())
            .and_then(|entry| mem.write_u64(offset, entry.stream.tell()));
        to_errno(result)
    }

    /// `fd_read(fd, iovs, iovs_len, nread)`
    ///
    /// Takes one chunk from the stream and scatters it over the iovecs.
    /// On failure 0 is written to `nread`.
    pub fn fd_read(&mut self, mem: &mut GuestMemory<'_>, fd: u32, iovs: u32, iovs_len: u32, nread: u32) -> Errno {
        tracing::trace!(fd, iovs, iovs_len, nread, "fd_read");
        if iovs == 0 || nread == 0 {
            return Errno::Inval;
        }

        let result = (|| -> Outcome<usize> {
            let entry = self.fds.get_mut(fd, Rights::FD_READ, Rights::empty())?;
            let iovecs = mem.read_iovecs(iovs, iovs_len)?;
            let capacity = validate_buffers(mem, &iovecs)?;
            match entry.stream.read(capacity)? {
                StreamRead::Data(bytes) => mem.scatter(&iovecs, &bytes),
                StreamRead::Cancelled => Err(Errno::Canceled),
            }
        })();

        finish_io(mem, nread, result)
    }

    /// `fd_write(fd, iovs, iovs_len, nwritten)`
    ///
    /// Gathers the iovecs into one buffer and hands it to the stream in a
    /// single write. On failure 0 is written to `nwritten`.
    pub fn fd_write(&mut self, mem: &mut GuestMemory<'_>, fd: u32, iovs: u32, iovs_len: u32, nwritten: u32) -> Errno {
        tracing::trace!(fd, iovs, iovs_len, nwritten, "fd_write");
        if iovs == 0 || nwritten == 0 {
            return Errno::Inval;
        }

        let result = (|| -> Outcome<usize> {
            let entry = self.fds.get_mut(fd, Rights::FD_WRITE, Rights::empty())?;
            let iovecs = mem.read_iovecs(iovs, iovs_len)?;
            let bytes = mem.gather(&iovecs)?;
            io_count(bytes.len())?;
            entry.stream.write(&bytes)
        })();

        finish_io(mem, nwritten, result)
    }

    /// `proc_exit(rval)`
    ///
    /// Records the code and flushes output. The guest always sees success;
    /// stopping it is up to the host, as told by the returned action.
    pub fn proc_exit(&mut self, rval: i32) -> ExitAction {
        tracing::debug!("proc_exit({})", rval);
        self.exit_code = Some(rval);
        self.flush();
        if self.return_on_exit {
            ExitAction::Terminate(rval)
        } else {
            ExitAction::Continue
        }
    }
}

fn put(record: &mut [u8], offset: u32, bytes: &[u8]) {
    let start = offset as usize;
    record[start..start + bytes.len()].copy_from_slice(bytes);
}

/// Check every iovec buffer and return their total length.
fn validate_buffers(mem: &GuestMemory<'_>, iovecs: &[IoVec]) -> Outcome<usize> {
    let mut total = 0usize;
    for iov in iovecs {
        mem.slice(iov.buf, iov.len)?;
        total = total.saturating_add(iov.len as usize);
    }
    Ok(total)
}

/// A transfer size as the guest's u32 count.
fn io_count(count: usize) -> Outcome<u32> {
    u32::try_from(count).map_err(|_| Errno::Overflow)
}

fn finish_io(mem: &mut GuestMemory<'_>, out: u32, result: Outcome<usize>) -> Errno {
    match result.and_then(io_count) {
        Ok(count) => to_errno(mem.write_u32(out, count)),
        Err(errno) => {
            let _ = mem.write_u32(out, 0);
            errno
        }
    }
}
