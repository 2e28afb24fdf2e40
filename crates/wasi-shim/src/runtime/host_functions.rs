//! WASI preview1 host functions.
//!
//! Registers the `wasi_snapshot_preview1` imports on a wasmtime linker.
//! Each import borrows guest memory for the duration of the call and hands
//! it to [`WasiShim`](crate::wasi::WasiShim).
//!
//! ## Import Module
//!
//! ```wat
//! (import "wasi_snapshot_preview1" "fd_write"
//!   (func $fd_write (param i32 i32 i32 i32) (result i32)))
//! ```

use wasmtime::{Caller, Linker, Memory, Val};

use super::imports::intercept;
use super::ShimHost;
use crate::asyncify::HostValue;
use crate::error::{ProcExit, Result, ShimError};
use crate::wasi::{Errno, ExitAction, GuestMemory, WasiShim, MODULE_NAME};

/// WASI preview1 functions exposed to guests.
pub struct WasiHostFunctions;

impl WasiHostFunctions {
    /// Register every supported WASI function with the wasmtime linker.
    pub fn register(linker: &mut Linker<ShimHost>) -> Result<()> {
        Self::register_args(linker)?;
        Self::register_environ(linker)?;
        Self::register_fd(linker)?;
        Self::register_proc_exit(linker)?;
        Ok(())
    }

    fn register_args(linker: &mut Linker<ShimHost>) -> Result<()> {
        linker
            .func_wrap(
                MODULE_NAME,
                "args_sizes_get",
                |mut caller: Caller<'_, ShimHost>, argc: i32, argv_buf_size: i32| {
                    syscall(&mut caller, |wasi, mem| {
                        wasi.args_sizes_get(mem, argc as u32, argv_buf_size as u32)
                    })
                },
            )
            .map_err(|e| registration_failed("args_sizes_get", e))?;

        linker
            .func_wrap(
                MODULE_NAME,
                "args_get",
                |mut caller: Caller<'_, ShimHost>, argv: i32, argv_buf: i32| {
                    syscall(&mut caller, |wasi, mem| {
                        wasi.args_get(mem, argv as u32, argv_buf as u32)
                    })
                },
            )
            .map_err(|e| registration_failed("args_get", e))?;
        Ok(())
    }

    fn register_environ(linker: &mut Linker<ShimHost>) -> Result<()> {
        linker
            .func_wrap(
                MODULE_NAME,
                "environ_sizes_get",
                |mut caller: Caller<'_, ShimHost>, environc: i32, environ_buf_size: i32| {
                    syscall(&mut caller, |wasi, mem| {
                        wasi.environ_sizes_get(mem, environc as u32, environ_buf_size as u32)
                    })
                },
            )
            .map_err(|e| registration_failed("environ_sizes_get", e))?;

        linker
            .func_wrap(
                MODULE_NAME,
                "environ_get",
                |mut caller: Caller<'_, ShimHost>, environ: i32, environ_buf: i32| {
                    syscall(&mut caller, |wasi, mem| {
                        wasi.environ_get(mem, environ as u32, environ_buf as u32)
                    })
                },
            )
            .map_err(|e| registration_failed("environ_get", e))?;
        Ok(())
    }

    fn register_fd(linker: &mut Linker<ShimHost>) -> Result<()> {
        linker
            .func_wrap(
                MODULE_NAME,
                "fd_close",
                |mut caller: Caller<'_, ShimHost>, fd: i32| {
                    syscall(&mut caller, |wasi, _| wasi.fd_close(fd as u32))
                },
            )
            .map_err(|e| registration_failed("fd_close", e))?;

        linker
            .func_wrap(
                MODULE_NAME,
                "fd_fdstat_get",
                |mut caller: Caller<'_, ShimHost>, fd: i32, fdstat: i32| {
                    syscall(&mut caller, |wasi, mem| {
                        wasi.fd_fdstat_get(mem, fd as u32, fdstat as u32)
                    })
                },
            )
            .map_err(|e| registration_failed("fd_fdstat_get", e))?;

        linker
            .func_wrap(
                MODULE_NAME,
                "fd_prestat_get",
                |mut caller: Caller<'_, ShimHost>, fd: i32, prestat: i32| {
                    syscall(&mut caller, |wasi, mem| {
                        wasi.fd_prestat_get(mem, fd as u32, prestat as u32)
                    })
                },
            )
            .map_err(|e| registration_failed("fd_prestat_get", e))?;

        linker
            .func_wrap(
                MODULE_NAME,
                "fd_prestat_dir_name",
                |mut caller: Caller<'_, ShimHost>, fd: i32, path: i32, path_len: i32| {
                    syscall(&mut caller, |wasi, mem| {
                        wasi.fd_prestat_dir_name(mem, fd as u32, path as u32, path_len as u32)
                    })
                },
            )
            .map_err(|e| registration_failed("fd_prestat_dir_name", e))?;

        linker
            .func_wrap(
                MODULE_NAME,
                "fd_seek",
                |mut caller: Caller<'_, ShimHost>,
                 fd: i32,
                 offset: i64,
                 whence: i32,
                 newoffset: i32| {
                    // out-of-range values map to an invalid whence
                    let whence = u8::try_from(whence).unwrap_or(u8::MAX);
                    syscall(&mut caller, |wasi, mem| {
                        wasi.fd_seek(mem, fd as u32, offset, whence, newoffset as u32)
                    })
                },
            )
            .map_err(|e| registration_failed("fd_seek", e))?;

        linker
            .func_wrap(
                MODULE_NAME,
                "fd_tell",
                |mut caller: Caller<'_, ShimHost>, fd: i32, offset: i32| {
                    syscall(&mut caller, |wasi, mem| {
                        wasi.fd_tell(mem, fd as u32, offset as u32)
                    })
                },
            )
            .map_err(|e| registration_failed("fd_tell", e))?;

        linker
            .func_wrap(
                MODULE_NAME,
                "fd_read",
                |mut caller: Caller<'_, ShimHost>,
                 fd: i32,
                 iovs: i32,
                 iovs_len: i32,
                 nread: i32| {
                    syscall(&mut caller, |wasi, mem| {
                        wasi.fd_read(mem, fd as u32, iovs as u32, iovs_len as u32, nread as u32)
                    })
                },
            )
            .map_err(|e| registration_failed("fd_read", e))?;

        linker
            .func_wrap(
                MODULE_NAME,
                "fd_write",
                |mut caller: Caller<'_, ShimHost>,
                 fd: i32,
                 iovs: i32,
                 iovs_len: i32,
                 nwritten: i32| {
                    syscall(&mut caller, |wasi, mem| {
                        wasi.fd_write(mem, fd as u32, iovs as u32, iovs_len as u32, nwritten as u32)
                    })
                },
            )
            .map_err(|e| registration_failed("fd_write", e))?;
        Ok(())
    }

    fn register_proc_exit(linker: &mut Linker<ShimHost>) -> Result<()> {
        linker
            .func_wrap(
                MODULE_NAME,
                "proc_exit",
                |mut caller: Caller<'_, ShimHost>, rval: i32| -> wasmtime::Result<()> {
                    match caller.data_mut().wasi.proc_exit(rval) {
                        ExitAction::Terminate(code) => Err(ProcExit(code).into()),
                        ExitAction::Continue => Ok(()),
                    }
                },
            )
            .map_err(|e| registration_failed("proc_exit", e))?;
        Ok(())
    }
}

/// Run one syscall against the caller's memory, under the asyncify
/// interceptor.
fn syscall<F>(caller: &mut Caller<'_, ShimHost>, f: F) -> wasmtime::Result<i32>
where
    F: FnOnce(&mut WasiShim, &mut GuestMemory<'_>) -> Errno,
{
    let memory = get_memory(caller)?;
    let values = intercept(caller, |caller| {
        let (data, host) = memory.data_and_store_mut(caller);
        let errno = f(&mut host.wasi, &mut GuestMemory::new(data));
        Ok(HostValue::Ready(vec![Val::I32(errno.into())]))
    })?;

    // None while unwinding; the guest discards the result
    Ok(values
        .and_then(|values| values.first().and_then(Val::i32))
        .unwrap_or(0))
}

/// Get the guest memory, falling back to the caller's `memory` export.
fn get_memory(caller: &mut Caller<'_, ShimHost>) -> Result<Memory> {
    if let Some(memory) = caller.data().memory {
        return Ok(memory);
    }
    caller
        .get_export("memory")
        .and_then(|e| e.into_memory())
        .ok_or(ShimError::MissingMemory)
}

fn registration_failed(name: &str, e: wasmtime::Error) -> ShimError {
    ShimError::Wasm(format!("failed to register {}: {}", name, e))
}
