//! WASI preview1 wire types.
//!
//! Numeric values are the ABI contract with the guest: libc branches on the
//! exact errno and filetype numbers, so none of them may be renumbered.

use bitflags::bitflags;
use std::fmt;

/// WASI error codes (errno values).
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Errno {
    /// No error.
    Success = 0,
    /// Argument list too long.
    TooBig = 1,
    /// Permission denied.
    Acces = 2,
    /// Address in use.
    Addrinuse = 3,
    /// Address not available.
    Addrnotavail = 4,
    /// Address family not supported.
    Afnosupport = 5,
    /// Resource unavailable, or operation would block.
    Again = 6,
    /// Connection already in progress.
    Already = 7,
    /// Bad file descriptor.
    Badf = 8,
    /// Bad message.
    Badmsg = 9,
    /// Device or resource busy.
    Busy = 10,
    /// Operation canceled.
    Canceled = 11,
    /// No child processes.
    Child = 12,
    /// Connection aborted.
    Connaborted = 13,
    /// Connection refused.
    Connrefused = 14,
    /// Connection reset.
    Connreset = 15,
    /// Resource deadlock would occur.
    Deadlk = 16,
    /// Destination address required.
    Destaddrreq = 17,
    /// Mathematics argument out of domain of function.
    Dom = 18,
    /// Reserved.
    Dquot = 19,
    /// File exists.
    Exist = 20,
    /// Bad address.
    Fault = 21,
    /// File too large.
    Fbig = 22,
    /// Host is unreachable.
    Hostunreach = 23,
    /// Identifier removed.
    Idrm = 24,
    /// Illegal byte sequence.
    Ilseq = 25,
    /// Operation in progress.
    Inprogress = 26,
    /// Interrupted function.
    Intr = 27,
    /// Invalid argument.
    Inval = 28,
    /// I/O error.
    Io = 29,
    /// Socket is connected.
    Isconn = 30,
    /// Is a directory.
    Isdir = 31,
    /// Too many levels of symbolic links.
    Loop = 32,
    /// File descriptor value too large.
    Mfile = 33,
    /// Too many links.
    Mlink = 34,
    /// Message too large.
    Msgsize = 35,
    /// Reserved.
    Multihop = 36,
    /// Filename too long.
    Nametoolong = 37,
    /// Network is down.
    Netdown = 38,
    /// Connection aborted by network.
    Netreset = 39,
    /// Network unreachable.
    Netunreach = 40,
    /// Too many files open in system.
    Nfile = 41,
    /// No buffer space available.
    Nobufs = 42,
    /// No such device.
    Nodev = 43,
    /// No such file or directory.
    Noent = 44,
    /// Executable file format error.
    Noexec = 45,
    /// No locks available.
    Nolck = 46,
    /// Reserved.
    Nolink = 47,
    /// Not enough space.
    Nomem = 48,
    /// No message of the desired type.
    Nomsg = 49,
    /// Protocol not available.
    Noprotoopt = 50,
    /// No space left on device.
    Nospc = 51,
    /// Function not supported.
    Nosys = 52,
    /// The socket is not connected.
    Notconn = 53,
    /// Not a directory or a symbolic link to a directory.
    Notdir = 54,
    /// Directory not empty.
    Notempty = 55,
    /// State not recoverable.
    Notrecoverable = 56,
    /// Not a socket.
    Notsock = 57,
    /// Not supported, or operation not supported on socket.
    Notsup = 58,
    /// Inappropriate I/O control operation.
    Notty = 59,
    /// No such device or address.
    Nxio = 60,
    /// Value too large to be stored in data type.
    Overflow = 61,
    /// Previous owner died.
    Ownerdead = 62,
    /// Operation not permitted.
    Perm = 63,
    /// Broken pipe.
    Pipe = 64,
    /// Protocol error.
    Proto = 65,
    /// Protocol not supported.
    Protonosupport = 66,
    /// Protocol wrong type for socket.
    Prototype = 67,
    /// Result too large.
    Range = 68,
    /// Read-only file system.
    Rofs = 69,
    /// Invalid seek.
    Spipe = 70,
    /// No such process.
    Srch = 71,
    /// Reserved.
    Stale = 72,
    /// Connection timed out.
    Timedout = 73,
    /// Text file busy.
    Txtbsy = 74,
    /// Cross-device link.
    Xdev = 75,
    /// Extension: Capabilities insufficient.
    Notcapable = 76,
}

impl Errno {
    /// Raw value handed back to the guest.
    pub fn raw(self) -> u16 {
        self as u16
    }

    /// The POSIX-style symbolic name, e.g. `EBADF`.
    pub fn name(self) -> &'static str {
        use Errno::*;
        match self {
            Success => "ESUCCESS",
            TooBig => "E2BIG",
            Acces => "EACCES",
            Addrinuse => "EADDRINUSE",
            Addrnotavail => "EADDRNOTAVAIL",
            Afnosupport => "EAFNOSUPPORT",
            Again => "EAGAIN",
            Already => "EALREADY",
            Badf => "EBADF",
            Badmsg => "EBADMSG",
            Busy => "EBUSY",
            Canceled => "ECANCELED",
            Child => "ECHILD",
            Connaborted => "ECONNABORTED",
            Connrefused => "ECONNREFUSED",
            Connreset => "ECONNRESET",
            Deadlk => "EDEADLK",
            Destaddrreq => "EDESTADDRREQ",
            Dom => "EDOM",
            Dquot => "EDQUOT",
            Exist => "EEXIST",
            Fault => "EFAULT",
            Fbig => "EFBIG",
            Hostunreach => "EHOSTUNREACH",
            Idrm => "EIDRM",
            Ilseq => "EILSEQ",
            Inprogress => "EINPROGRESS",
            Intr => "EINTR",
            Inval => "EINVAL",
            Io => "EIO",
            Isconn => "EISCONN",
            Isdir => "EISDIR",
            Loop => "ELOOP",
            Mfile => "EMFILE",
            Mlink => "EMLINK",
            Msgsize => "EMSGSIZE",
            Multihop => "EMULTIHOP",
            Nametoolong => "ENAMETOOLONG",
            Netdown => "ENETDOWN",
            Netreset => "ENETRESET",
            Netunreach => "ENETUNREACH",
            Nfile => "ENFILE",
            Nobufs => "ENOBUFS",
            Nodev => "ENODEV",
            Noent => "ENOENT",
            Noexec => "ENOEXEC",
            Nolck => "ENOLCK",
            Nolink => "ENOLINK",
            Nomem => "ENOMEM",
            Nomsg => "ENOMSG",
            Noprotoopt => "ENOPROTOOPT",
            Nospc => "ENOSPC",
            Nosys => "ENOSYS",
            Notconn => "ENOTCONN",
            Notdir => "ENOTDIR",
            Notempty => "ENOTEMPTY",
            Notrecoverable => "ENOTRECOVERABLE",
            Notsock => "ENOTSOCK",
            Notsup => "ENOTSUP",
            Notty => "ENOTTY",
            Nxio => "ENXIO",
            Overflow => "EOVERFLOW",
            Ownerdead => "EOWNERDEAD",
            Perm => "EPERM",
            Pipe => "EPIPE",
            Proto => "EPROTO",
            Protonosupport => "EPROTONOSUPPORT",
            Prototype => "EPROTOTYPE",
            Range => "ERANGE",
            Rofs => "EROFS",
            Spipe => "ESPIPE",
            Srch => "ESRCH",
            Stale => "ESTALE",
            Timedout => "ETIMEDOUT",
            Txtbsy => "ETXTBSY",
            Xdev => "EXDEV",
            Notcapable => "ENOTCAPABLE",
        }
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.raw())
    }
}

impl From<Errno> for i32 {
    fn from(errno: Errno) -> i32 {
        errno as i32
    }
}

/// Descriptor kind as reported by `fd_fdstat_get`.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Filetype {
    /// The type of the descriptor or file is unknown.
    Unknown = 0,
    /// A block device inode.
    BlockDevice = 1,
    /// A character device inode.
    CharacterDevice = 2,
    /// A directory inode.
    Directory = 3,
    /// A regular file inode.
    RegularFile = 4,
    /// A datagram socket.
    SocketDgram = 5,
    /// A byte-stream socket.
    SocketStream = 6,
    /// A symbolic link inode.
    SymbolicLink = 7,
}

impl Filetype {
    /// Raw value written into the fdstat record.
    pub fn raw(self) -> u16 {
        self as u16
    }
}

/// Reference point for `fd_seek`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    /// Seek relative to start-of-file.
    Set,
    /// Seek relative to current position.
    Cur,
    /// Seek relative to end-of-file.
    End,
}

impl TryFrom<u8> for Whence {
    type Error = Errno;

    fn try_from(raw: u8) -> Result<Self, Errno> {
        match raw {
            0 => Ok(Whence::Set),
            1 => Ok(Whence::Cur),
            2 => Ok(Whence::End),
            _ => Err(Errno::Inval),
        }
    }
}

bitflags! {
    /// File descriptor rights, determining which actions may be performed.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Rights: u64 {
        const FD_DATASYNC = 1 << 0;
        const FD_READ = 1 << 1;
        const FD_SEEK = 1 << 2;
        const FD_FDSTAT_SET_FLAGS = 1 << 3;
        const FD_SYNC = 1 << 4;
        const FD_TELL = 1 << 5;
        const FD_WRITE = 1 << 6;
        const FD_ADVISE = 1 << 7;
        const FD_ALLOCATE = 1 << 8;
        const PATH_CREATE_DIRECTORY = 1 << 9;
        const PATH_CREATE_FILE = 1 << 10;
        const PATH_LINK_SOURCE = 1 << 11;
        const PATH_LINK_TARGET = 1 << 12;
        const PATH_OPEN = 1 << 13;
        const FD_READDIR = 1 << 14;
        const PATH_READLINK = 1 << 15;
        const PATH_RENAME_SOURCE = 1 << 16;
        const PATH_RENAME_TARGET = 1 << 17;
        const PATH_FILESTAT_GET = 1 << 18;
        const PATH_FILESTAT_SET_SIZE = 1 << 19;
        const PATH_FILESTAT_SET_TIMES = 1 << 20;
        const FD_FILESTAT_GET = 1 << 21;
        const FD_FILESTAT_SET_SIZE = 1 << 22;
        const FD_FILESTAT_SET_TIMES = 1 << 23;
        const PATH_SYMLINK = 1 << 24;
        const PATH_REMOVE_DIRECTORY = 1 << 25;
        const PATH_UNLINK_FILE = 1 << 26;
        const POLL_FD_READWRITE = 1 << 27;
        const SOCK_SHUTDOWN = 1 << 28;
        const SOCK_ACCEPT = 1 << 29;
    }
}

/// Byte size of the `fdstat` record.
pub const FDSTAT_SIZE: usize = 24;
/// Offset of `fs_filetype` (u16) in `fdstat`.
pub const FDSTAT_FILETYPE_OFFSET: u32 = 0;
/// Offset of `fs_flags` (u16) in `fdstat`.
pub const FDSTAT_FLAGS_OFFSET: u32 = 2;
/// Offset of `fs_rights_base` (u64) in `fdstat`.
pub const FDSTAT_RIGHTS_BASE_OFFSET: u32 = 8;
/// Offset of `fs_rights_inheriting` (u64) in `fdstat`.
pub const FDSTAT_RIGHTS_INHERITING_OFFSET: u32 = 16;

/// Byte size of one `iovec`/`ciovec` entry: u32 pointer, u32 length.
pub const IOVEC_SIZE: u32 = 8;
