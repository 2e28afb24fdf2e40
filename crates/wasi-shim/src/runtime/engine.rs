//! Engine, module and instance types over wasmtime.

use super::host_functions::WasiHostFunctions;
use super::imports::HostImports;
use super::{guest_error, Controlled, ShimHost};
use crate::asyncify::{drive_export, Asyncify, CONTROL_EXPORTS};
use crate::config::ShimConfig;
use crate::error::{Result, ShimError};
use crate::wasi::{GuestMemory, StdioStreams, WasiShim};

use std::path::Path;
use std::time::Instant;

use wasmtime::*;

/// Compiles modules and creates instances sharing one engine.
pub struct ShimRuntime {
    engine: Engine,
    config: ShimConfig,
}

/// A compiled WebAssembly module.
pub struct ShimModule {
    module: Module,
    name: String,
}

/// How `start` finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// `_start` returned normally.
    Returned,
    /// The guest called `proc_exit` with this code.
    Exited(i32),
}

impl RunOutcome {
    /// Process exit code: 0 for a normal return.
    pub fn code(self) -> i32 {
        match self {
            RunOutcome::Returned => 0,
            RunOutcome::Exited(code) => code,
        }
    }
}

/// Result of an export call with timing information.
#[derive(Debug, Clone)]
pub struct ShimCallResult {
    /// Values returned by the export
    pub values: Vec<Val>,
    /// Wall time in microseconds, suspensions included
    pub execution_time_us: u64,
    /// Fuel consumed (if fuel metering enabled)
    pub fuel_consumed: Option<u64>,
}

/// An instantiated module with WASI and asyncify wiring.
pub struct ShimInstance {
    store: Store<ShimHost>,
    instance: Instance,
    started: bool,
}

impl ShimRuntime {
    /// Create a runtime with the given configuration.
    pub fn new(config: ShimConfig) -> Result<Self> {
        let mut engine_config = Config::new();

        engine_config.cranelift_opt_level(match config.optimization_level {
            0 => OptLevel::None,
            1 => OptLevel::Speed,
            _ => OptLevel::SpeedAndSize,
        });

        if config.fuel_limit.is_some() {
            engine_config.consume_fuel(true);
        }

        let engine = Engine::new(&engine_config)
            .map_err(|e| ShimError::Wasm(format!("engine creation failed: {}", e)))?;

        Ok(Self { engine, config })
    }

    /// Load a module from a `.wasm` or `.wat` file.
    pub fn load_module(&self, path: impl AsRef<Path>) -> Result<ShimModule> {
        let path = path.as_ref();
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_string();

        let module = Module::from_file(&self.engine, path)
            .map_err(|e| ShimError::Wasm(format!("module load failed: {}", e)))?;

        Ok(ShimModule { module, name })
    }

    /// Load a module from binary or text bytes.
    pub fn load_module_bytes(&self, name: &str, bytes: impl AsRef<[u8]>) -> Result<ShimModule> {
        let module = Module::new(&self.engine, bytes)
            .map_err(|e| ShimError::Wasm(format!("module creation failed: {}", e)))?;

        Ok(ShimModule {
            module,
            name: name.to_string(),
        })
    }

    /// Instantiate with standard streams wired to the host console.
    pub fn instantiate(&self, module: &ShimModule, imports: &HostImports) -> Result<ShimInstance> {
        self.instantiate_with(module, imports, StdioStreams::console())
    }

    /// Instantiate with the given standard streams.
    pub fn instantiate_with(
        &self,
        module: &ShimModule,
        imports: &HostImports,
        streams: StdioStreams,
    ) -> Result<ShimInstance> {
        let wasi = WasiShim::new(&self.config, streams)?;
        let limits = StoreLimitsBuilder::new()
            .memory_size(self.config.max_memory)
            .build();
        let host = ShimHost {
            wasi,
            memory: None,
            asyncify: Asyncify::new(self.config.asyncify),
            controls: None,
            limits,
        };

        let mut store = Store::new(&self.engine, host);
        store.limiter(|state| &mut state.limits);

        if let Some(fuel) = self.config.fuel_limit {
            store
                .set_fuel(fuel)
                .map_err(|e| ShimError::Wasm(format!("fuel setup failed: {}", e)))?;
        }

        let mut linker: Linker<ShimHost> = Linker::new(&self.engine);
        WasiHostFunctions::register(&mut linker)?;
        imports.register(&mut linker)?;

        if self.config.trap_unknown_imports {
            linker
                .define_unknown_imports_as_traps(&module.module)
                .map_err(|e| ShimError::Wasm(format!("failed to define traps: {}", e)))?;
        }

        let instance = linker
            .instantiate(&mut store, &module.module)
            .map_err(|e| ShimError::Wasm(format!("instantiation failed: {}", e)))?;

        let memory = instance.get_memory(&mut store, "memory");
        store.data_mut().memory = memory;

        let controls = super::AsyncifyControls::lookup(&instance, &mut store)?;
        if let Some(controls) = controls {
            let memory = memory.ok_or(ShimError::MissingMemory)?;
            let (data, host) = memory.data_and_store_mut(&mut store);
            host.asyncify.write_bounds(&mut GuestMemory::new(data))?;
            host.controls = Some(controls);
            tracing::debug!(module = %module.name, "asyncify exports detected");
        }

        Ok(ShimInstance {
            store,
            instance,
            started: false,
        })
    }

    /// Get the configuration.
    pub fn config(&self) -> &ShimConfig {
        &self.config
    }
}

impl ShimModule {
    /// Get the module name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get exported function names.
    pub fn exports(&self) -> impl Iterator<Item = &str> {
        self.module.exports().filter_map(|e| {
            if matches!(e.ty(), ExternType::Func(_)) {
                Some(e.name())
            } else {
                None
            }
        })
    }

    /// Get imports as `(module, name)` pairs.
    pub fn imports(&self) -> impl Iterator<Item = (&str, &str)> {
        self.module.imports().map(|i| (i.module(), i.name()))
    }

    /// Whether the module carries the asyncify control exports.
    pub fn is_asyncified(&self) -> bool {
        let exports: Vec<&str> = self.exports().collect();
        CONTROL_EXPORTS.iter().all(|name| exports.contains(name))
    }
}

impl ShimInstance {
    /// Call an export.
    ///
    /// When the module is asyncify-instrumented the call may suspend on
    /// pending host values; otherwise it runs to completion synchronously.
    pub async fn call(&mut self, name: &str, params: &[Val]) -> Result<ShimCallResult> {
        let func = self
            .instance
            .get_func(&mut self.store, name)
            .ok_or_else(|| ShimError::MissingExport(name.to_string()))?;
        let mut results = vec![Val::I32(0); func.ty(&self.store).results().len()];

        let start = Instant::now();
        let fuel_before = self.store.get_fuel().ok();

        let controls = match self.store.data().controls.clone() {
            Some(controls) if !CONTROL_EXPORTS.contains(&name) => Some(controls),
            _ => None,
        };
        match controls {
            Some(controls) => {
                let mut host = Controlled::new(&mut self.store, controls);
                drive_export(&mut host, |h| {
                    func.call(h.context(), params, &mut results)
                        .map_err(guest_error)
                })
                .await?;
            }
            None => func
                .call(&mut self.store, params, &mut results)
                .map_err(guest_error)?,
        }

        let fuel_after = self.store.get_fuel().ok();
        let fuel_consumed = fuel_before.zip(fuel_after).map(|(b, a)| b - a);

        Ok(ShimCallResult {
            values: results,
            execution_time_us: start.elapsed().as_micros() as u64,
            fuel_consumed,
        })
    }

    /// Run a command module's `_start`.
    ///
    /// `_initialize` must not be exported. A `proc_exit` from the guest is
    /// reported as [`RunOutcome::Exited`]; buffered output is flushed either
    /// way.
    pub async fn start(&mut self) -> Result<RunOutcome> {
        self.mark_started()?;
        if !self.has_func("_start") {
            return Err(ShimError::MissingExport("_start".into()));
        }
        if self.has_export("_initialize") {
            return Err(ShimError::UnexpectedExport("_initialize".into()));
        }

        let outcome = match self.call("_start", &[]).await {
            Ok(_) => Ok(RunOutcome::Returned),
            Err(ShimError::Exit(exit)) => Ok(RunOutcome::Exited(exit.0)),
            Err(e) => Err(e),
        };
        self.store.data_mut().wasi.flush();
        outcome
    }

    /// Run a reactor module's `_initialize`, if it has one.
    ///
    /// `_start` must not be exported.
    pub async fn initialize(&mut self) -> Result<()> {
        self.mark_started()?;
        if self.has_export("_start") {
            return Err(ShimError::UnexpectedExport("_start".into()));
        }
        if self.has_func("_initialize") {
            self.call("_initialize", &[]).await?;
        }
        Ok(())
    }

    fn mark_started(&mut self) -> Result<()> {
        if self.started {
            return Err(ShimError::AlreadyStarted);
        }
        self.started = true;
        Ok(())
    }

    fn has_export(&mut self, name: &str) -> bool {
        self.instance.get_export(&mut self.store, name).is_some()
    }

    fn has_func(&mut self, name: &str) -> bool {
        self.instance.get_func(&mut self.store, name).is_some()
    }

    /// Whether exports are driven through the suspend/resume protocol.
    pub fn is_asyncified(&self) -> bool {
        self.store.data().controls.is_some()
    }

    /// Code passed to `proc_exit`, if the guest called it.
    pub fn exit_code(&self) -> Option<i32> {
        self.store.data().wasi.exit_code()
    }

    /// The WASI state.
    pub fn wasi(&self) -> &WasiShim {
        &self.store.data().wasi
    }

    /// Mutable WASI state, for adding descriptors or flushing output.
    pub fn wasi_mut(&mut self) -> &mut WasiShim {
        &mut self.store.data_mut().wasi
    }

    /// Write bytes to guest memory at the given offset.
    pub fn write_memory(&mut self, offset: u32, data: &[u8]) -> Result<()> {
        let memory = self.get_memory()?;
        let mut mem = GuestMemory::new(memory.data_mut(&mut self.store));
        mem.write_bytes(offset, data)
            .map_err(|_| ShimError::Wasm("memory write out of bounds".to_string()))
    }

    /// Read bytes from guest memory at the given offset.
    pub fn read_memory(&mut self, offset: u32, len: u32) -> Result<Vec<u8>> {
        let memory = self.get_memory()?;
        let mem = GuestMemory::new(memory.data_mut(&mut self.store));
        mem.slice(offset, len)
            .map(<[u8]>::to_vec)
            .map_err(|_| ShimError::Wasm("memory read out of bounds".to_string()))
    }

    fn get_memory(&self) -> Result<Memory> {
        self.store.data().memory.ok_or(ShimError::MissingMemory)
    }

    /// Get remaining fuel (if fuel metering enabled).
    pub fn remaining_fuel(&self) -> Option<u64> {
        self.store.get_fuel().ok()
    }

    /// Get list of exported function names.
    pub fn exported_functions(&mut self) -> Vec<String> {
        let names: Vec<_> = self
            .instance
            .exports(&mut self.store)
            .map(|e| e.name().to_string())
            .collect();
        names
            .into_iter()
            .filter(|name| self.instance.get_func(&mut self.store, name).is_some())
            .collect()
    }
}
