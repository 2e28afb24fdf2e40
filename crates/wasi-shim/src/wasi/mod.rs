//! WASI preview1 host implementation.
//!
//! Everything in this module is independent of the wasm engine: syscalls
//! operate on a [`GuestMemory`] view and a [`DescriptorTable`], which makes
//! them testable against plain byte buffers.

mod fd;
mod memory;
mod rights;
mod stream;
mod syscalls;
mod types;


pub use fd::{Descriptor, DescriptorTable, StdioStreams};
pub use memory::{GuestMemory, IoVec};
pub use rights::{
    rights_for, AccessMode, DIRECTORY_BASE, REGULAR_FILE_BASE, SOCKET_BASE, STDIO_BASE,
};
pub use stream::{
    CaptureSink, ConsoleSink, LineSink, LineSource, MemoryFile, ScriptedInput, StandardInput,
    StandardOutput, StdinLines, Stream, StreamRead,
};
pub use syscalls::{ExitAction, WasiShim};
pub use types::{
    Errno, Filetype, Rights, Whence, FDSTAT_FILETYPE_OFFSET, FDSTAT_FLAGS_OFFSET,
    FDSTAT_RIGHTS_BASE_OFFSET, FDSTAT_RIGHTS_INHERITING_OFFSET, FDSTAT_SIZE, IOVEC_SIZE,
};

/// Import module name for every WASI preview1 function.
pub const MODULE_NAME: &str = "wasi_snapshot_preview1";
