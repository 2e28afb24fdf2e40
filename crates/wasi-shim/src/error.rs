//! Error types for the shim crate.
//!
//! Guest-visible failures are [`Errno`](crate::wasi::Errno) values returned
//! through the ABI. Everything here is a host-level fault: the instance is
//! stopped instead of handing a code back to the guest.

use thiserror::Error;

/// Shim error type
#[derive(Error, Debug)]
pub enum ShimError {
    /// WebAssembly engine error (compile, link, instantiate)
    #[error("WASM error: {0}")]
    Wasm(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// The instance does not export a usable linear memory
    #[error("no memory export found")]
    MissingMemory,

    /// A required export is absent or has the wrong type
    #[error("export '{0}' not found")]
    MissingExport(String),

    /// An export that must be absent for this entry point is present
    #[error("export '{0}' must not be present")]
    UnexpectedExport(String),

    /// `start`/`initialize` called twice on the same instance
    #[error("WASI instance has already started")]
    AlreadyStarted,

    /// A standard descriptor did not land on its fixed table slot
    #[error("standard descriptor {name} landed at table id {actual}, expected {expected}")]
    StdioSlotMismatch {
        /// Stream name (`<stdin>`, `<stdout>`, `<stderr>`)
        name: &'static str,
        /// Slot the descriptor had to occupy
        expected: u32,
        /// Slot it actually occupied
        actual: u32,
    },

    /// The guest's asyncify state did not match what the protocol requires
    #[error("asyncify state error: expected {expected:?}, found {actual:?}")]
    AsyncifyState {
        /// Required state
        expected: crate::asyncify::AsyncifyState,
        /// Observed state
        actual: crate::asyncify::AsyncifyState,
    },

    /// Any other suspend/resume protocol violation
    #[error("asyncify protocol violation: {0}")]
    AsyncifyProtocol(String),

    /// The guest trapped
    #[error("guest trapped: {0}")]
    Trap(String),

    /// The guest called `proc_exit`
    #[error(transparent)]
    Exit(#[from] ProcExit),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed JSON configuration
    #[error("invalid configuration file: {0}")]
    Json(#[from] serde_json::Error),
}

/// Termination requested by the guest through `proc_exit`.
///
/// Raised as a host error out of the import so the guest stops executing;
/// the instance driver turns it back into an exit code.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("guest exited with code {0}")]
pub struct ProcExit(pub i32);

/// Result type alias for shim operations
pub type Result<T> = std::result::Result<T, ShimError>;
