//! Rights assigned to descriptors at creation time.
//!
//! Masks follow the libuv-wasi tables, except character devices which get a
//! fixed stdio mask. Once a descriptor exists its masks never change.

use super::types::{Filetype, Rights};

/// Access mode a descriptor was opened with.
///
/// The raw values match `O_RDONLY`/`O_WRONLY`/`O_RDWR`; standard streams are
/// always created read-write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessMode {
    /// Reading only.
    ReadOnly = 0,
    /// Writing only.
    WriteOnly = 1,
    /// Reading and writing.
    #[default]
    ReadWrite = 2,
}

/// Base rights granted to the standard streams.
pub const STDIO_BASE: Rights = Rights::FD_READ
    .union(Rights::FD_WRITE)
    .union(Rights::FD_SEEK)
    .union(Rights::FD_TELL)
    .union(Rights::FD_SYNC)
    .union(Rights::FD_DATASYNC)
    .union(Rights::FD_FDSTAT_SET_FLAGS);

/// Base rights of a regular file.
pub const REGULAR_FILE_BASE: Rights = Rights::FD_DATASYNC
    .union(Rights::FD_READ)
    .union(Rights::FD_SEEK)
    .union(Rights::FD_FDSTAT_SET_FLAGS)
    .union(Rights::FD_SYNC)
    .union(Rights::FD_TELL)
    .union(Rights::FD_WRITE)
    .union(Rights::FD_ADVISE)
    .union(Rights::FD_ALLOCATE)
    .union(Rights::FD_FILESTAT_GET)
    .union(Rights::FD_FILESTAT_SET_SIZE)
    .union(Rights::FD_FILESTAT_SET_TIMES)
    .union(Rights::POLL_FD_READWRITE);

/// Base rights of a directory.
pub const DIRECTORY_BASE: Rights = Rights::FD_FDSTAT_SET_FLAGS
    .union(Rights::FD_SYNC)
    .union(Rights::FD_ADVISE)
    .union(Rights::PATH_CREATE_DIRECTORY)
    .union(Rights::PATH_CREATE_FILE)
    .union(Rights::PATH_LINK_SOURCE)
    .union(Rights::PATH_LINK_TARGET)
    .union(Rights::PATH_OPEN)
    .union(Rights::FD_READDIR)
    .union(Rights::PATH_READLINK)
    .union(Rights::PATH_RENAME_SOURCE)
    .union(Rights::PATH_RENAME_TARGET)
    .union(Rights::PATH_FILESTAT_GET)
    .union(Rights::PATH_FILESTAT_SET_SIZE)
    .union(Rights::PATH_FILESTAT_SET_TIMES)
    .union(Rights::FD_FILESTAT_GET)
    .union(Rights::FD_FILESTAT_SET_TIMES)
    .union(Rights::PATH_SYMLINK)
    .union(Rights::PATH_UNLINK_FILE)
    .union(Rights::PATH_REMOVE_DIRECTORY)
    .union(Rights::POLL_FD_READWRITE);

/// Base rights of a socket.
pub const SOCKET_BASE: Rights = Rights::FD_READ
    .union(Rights::FD_FDSTAT_SET_FLAGS)
    .union(Rights::FD_WRITE)
    .union(Rights::FD_FILESTAT_GET)
    .union(Rights::POLL_FD_READWRITE)
    .union(Rights::SOCK_SHUTDOWN);

/// Compute `(base, inheriting)` rights for a new descriptor.
///
/// `_fd` is the raw host descriptor the entry stands in for. The masks do
/// not depend on it.
pub fn rights_for(_fd: u32, access: AccessMode, filetype: Filetype) -> (Rights, Rights) {
    let (mut base, inheriting) = match filetype {
        Filetype::CharacterDevice => (STDIO_BASE, Rights::empty()),
        Filetype::RegularFile => (REGULAR_FILE_BASE, Rights::empty()),
        Filetype::Directory => (DIRECTORY_BASE, DIRECTORY_BASE | REGULAR_FILE_BASE),
        Filetype::SocketDgram | Filetype::SocketStream => (SOCKET_BASE, Rights::all()),
        Filetype::BlockDevice | Filetype::Unknown | Filetype::SymbolicLink => {
            (Rights::all(), Rights::all())
        }
    };

    match access {
        AccessMode::ReadOnly => base.remove(Rights::FD_WRITE),
        AccessMode::WriteOnly => base.remove(Rights::FD_READ),
        AccessMode::ReadWrite => {}
    }

    (base, inheriting)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stdio_rights() {
        let (base, inheriting) = rights_for(1, AccessMode::ReadWrite, Filetype::CharacterDevice);
        assert_eq!(base, STDIO_BASE);
        assert!(base.contains(Rights::FD_READ | Rights::FD_WRITE | Rights::FD_SEEK));
        assert!(base.contains(Rights::FD_TELL | Rights::FD_SYNC | Rights::FD_DATASYNC));
        assert!(base.contains(Rights::FD_FDSTAT_SET_FLAGS));
        assert!(!base.contains(Rights::FD_READDIR));
        assert!(inheriting.is_empty());
    }

    #[test]
    fn test_access_mode_masks() {
        let (ro, _) = rights_for(3, AccessMode::ReadOnly, Filetype::RegularFile);
        assert!(ro.contains(Rights::FD_READ));
        assert!(!ro.contains(Rights::FD_WRITE));

        let (wo, _) = rights_for(3, AccessMode::WriteOnly, Filetype::RegularFile);
        assert!(!wo.contains(Rights::FD_READ));
        assert!(wo.contains(Rights::FD_WRITE));
    }

    #[test]
    fn test_directory_inherits_file_rights() {
        let (base, inheriting) = rights_for(3, AccessMode::ReadWrite, Filetype::Directory);
        assert!(base.contains(Rights::PATH_OPEN));
        assert!(inheriting.contains(REGULAR_FILE_BASE));
    }

    #[test]
    fn test_stdio_mask_is_fd_independent() {
        for fd in [0, 1, 2, 17] {
            assert_eq!(
                rights_for(fd, AccessMode::ReadWrite, Filetype::CharacterDevice).0,
                STDIO_BASE
            );
        }
    }
}
