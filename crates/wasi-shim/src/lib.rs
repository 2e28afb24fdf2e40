//! # WASI Shim
//!
//! Host-side WASI preview1 emulation with an asyncify suspend/resume engine.
//!
//! A sandboxed guest with one linear memory and no OS access gets arguments,
//! environment, standard streams and in-memory files through a
//! capability-checked descriptor table. Guests instrumented with asyncify
//! can additionally call host imports that complete later: the guest
//! unwinds, the host awaits, and the guest rewinds into the same call.
//!
//! ## Layers
//!
//! | Module | Role |
//! |--------|------|
//! | [`wasi`] | Syscalls over a borrowed byte view of guest memory |
//! | [`asyncify`] | Suspend/resume protocol, independent of the engine |
//! | `runtime` | wasmtime linker, store and instance glue |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use wasi_shim::{HostImports, ShimConfig, ShimRuntime};
//!
//! let config = ShimConfig::default().args(["hello.wasm", "--name", "world"]);
//! let runtime = ShimRuntime::new(config)?;
//! let module = runtime.load_module("hello.wasm")?;
//! let mut instance = runtime.instantiate(&module, &HostImports::new())?;
//!
//! let outcome = instance.start().await?;
//! std::process::exit(outcome.code());
//! ```
//!
//! ## Features
//!
//! - `runtime` (default) - wasmtime glue

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod asyncify;
pub mod config;
pub mod error;
pub mod wasi;

#[cfg(feature = "runtime")]
pub mod runtime;

// Re-export main types
pub use asyncify::{AsyncifyState, HostValue, PendingValue};
pub use config::{AsyncifyConfig, ShimConfig, StdioFds};
pub use error::{ProcExit, Result, ShimError};
pub use wasi::{Errno, StdioStreams, WasiShim};

#[cfg(feature = "runtime")]
pub use runtime::{
    HostFn, HostImports, RunOutcome, ShimCallResult, ShimInstance, ShimModule, ShimRuntime, Val,
    ValType,
};
