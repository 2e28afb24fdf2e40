//! wasmtime glue.
//!
//! WASI syscalls and user imports are registered on a [`wasmtime::Linker`];
//! every import runs through the asyncify interceptor and every export
//! call through the asyncify driver when the module carries the control
//! exports.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use wasi_shim::runtime::{HostImports, ShimRuntime};
//! use wasi_shim::ShimConfig;
//!
//! let runtime = ShimRuntime::new(ShimConfig::default().arg("hello.wasm"))?;
//! let module = runtime.load_module("hello.wasm")?;
//! let mut instance = runtime.instantiate(&module, &HostImports::new())?;
//! let outcome = instance.start().await?;
//! ```

mod engine;
mod host_functions;
mod imports;


pub use engine::{RunOutcome, ShimCallResult, ShimInstance, ShimModule, ShimRuntime};
pub use imports::{HostFn, HostImports};
pub use wasmtime::{Val, ValType};

use crate::asyncify::{Asyncify, AsyncifyHost, AsyncifyState};
use crate::error::{ProcExit, Result, ShimError};
use crate::wasi::WasiShim;

use wasmtime::{AsContextMut, Caller, Instance, Memory, Store, StoreLimits, TypedFunc};

/// Store data for a shim instance.
pub struct ShimHost {
    wasi: WasiShim,
    memory: Option<Memory>,
    asyncify: Asyncify<Vec<Val>>,
    controls: Option<AsyncifyControls>,
    limits: StoreLimits,
}

/// Handles on the guest's asyncify control exports.
#[derive(Clone)]
struct AsyncifyControls {
    get_state: TypedFunc<(), i32>,
    start_unwind: TypedFunc<i32, ()>,
    stop_unwind: TypedFunc<(), ()>,
    start_rewind: TypedFunc<i32, ()>,
    stop_rewind: TypedFunc<(), ()>,
}

impl AsyncifyControls {
    /// Find the control exports. `None` if the module is not instrumented;
    /// an error if it is only partly instrumented.
    fn lookup(instance: &Instance, store: &mut Store<ShimHost>) -> Result<Option<Self>> {
        if instance.get_func(&mut *store, "asyncify_get_state").is_none() {
            return Ok(None);
        }

        fn typed<P, R>(instance: &Instance, store: &mut Store<ShimHost>, name: &str) -> Result<TypedFunc<P, R>>
        where
            P: wasmtime::WasmParams,
            R: wasmtime::WasmResults,
        {
            instance
                .get_typed_func::<P, R>(&mut *store, name)
                .map_err(|e| ShimError::MissingExport(format!("{}: {}", name, e)))
        }

        Ok(Some(Self {
            get_state: typed(instance, store, "asyncify_get_state")?,
            start_unwind: typed(instance, store, "asyncify_start_unwind")?,
            stop_unwind: typed(instance, store, "asyncify_stop_unwind")?,
            start_rewind: typed(instance, store, "asyncify_start_rewind")?,
            stop_rewind: typed(instance, store, "asyncify_stop_rewind")?,
        }))
    }
}

/// Anything that owns or borrows the store.
trait HostContext: AsContextMut<Data = ShimHost> {
    fn host(&mut self) -> &mut ShimHost;
}

impl HostContext for Store<ShimHost> {
    fn host(&mut self) -> &mut ShimHost {
        self.data_mut()
    }
}

impl HostContext for Caller<'_, ShimHost> {
    fn host(&mut self) -> &mut ShimHost {
        self.data_mut()
    }
}

/// A store or caller paired with the control exports.
struct Controlled<'a, C: HostContext> {
    ctx: &'a mut C,
    controls: AsyncifyControls,
}

impl<'a, C: HostContext> Controlled<'a, C> {
    fn new(ctx: &'a mut C, controls: AsyncifyControls) -> Self {
        Self { ctx, controls }
    }

    fn context(&mut self) -> &mut C {
        &mut *self.ctx
    }
}

impl<C: HostContext> AsyncifyHost for Controlled<'_, C> {
    type Value = Vec<Val>;

    fn state(&mut self) -> Result<AsyncifyState> {
        let raw = self
            .controls
            .get_state
            .call(&mut *self.ctx, ())
            .map_err(guest_error)?;
        AsyncifyState::try_from(raw)
    }

    fn start_unwind(&mut self, data_ptr: u32) -> Result<()> {
        self.controls
            .start_unwind
            .call(&mut *self.ctx, data_ptr as i32)
            .map_err(guest_error)
    }

    fn stop_unwind(&mut self) -> Result<()> {
        self.controls
            .stop_unwind
            .call(&mut *self.ctx, ())
            .map_err(guest_error)
    }

    fn start_rewind(&mut self, data_ptr: u32) -> Result<()> {
        self.controls
            .start_rewind
            .call(&mut *self.ctx, data_ptr as i32)
            .map_err(guest_error)
    }

    fn stop_rewind(&mut self) -> Result<()> {
        self.controls
            .stop_rewind
            .call(&mut *self.ctx, ())
            .map_err(guest_error)
    }

    fn asyncify(&mut self) -> &mut Asyncify<Vec<Val>> {
        &mut self.ctx.host().asyncify
    }
}

/// Recover a host error from a wasmtime error, or describe the trap.
fn guest_error(err: wasmtime::Error) -> ShimError {
    let err = match err.downcast::<ShimError>() {
        Ok(shim) => return shim,
        Err(err) => err,
    };
    match err.downcast::<ProcExit>() {
        Ok(exit) => ShimError::Exit(exit),
        Err(err) => ShimError::Trap(format!("{:#}", err)),
    }
}

/// Zero value of a numeric type, returned to a guest that is unwinding.
fn zero_value(ty: &ValType) -> Result<Val> {
    match ty {
        ValType::I32 => Ok(Val::I32(0)),
        ValType::I64 => Ok(Val::I64(0)),
        ValType::F32 => Ok(Val::F32(0)),
        ValType::F64 => Ok(Val::F64(0)),
        ValType::V128 => Ok(Val::V128(0u128.into())),
        ValType::Ref(_) => Err(ShimError::AsyncifyProtocol(
            "reference-typed results cannot cross a suspension".into(),
        )),
    }
}
