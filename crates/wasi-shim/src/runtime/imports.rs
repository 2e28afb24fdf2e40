//! User-supplied host imports.

use std::fmt;
use std::sync::Arc;

use wasmtime::{Caller, FuncType, Linker, Val, ValType};

use super::{zero_value, Controlled, ShimHost};
use crate::asyncify::{intercept_import, HostValue};
use crate::error::{Result, ShimError};

/// A host import body.
///
/// Receives the guest's arguments and produces the results, either now or
/// as a future. A pending future must own everything it needs; it cannot
/// borrow guest memory.
pub type HostFn = Arc<dyn Fn(&[Val]) -> HostValue<Vec<Val>> + Send + Sync>;

#[derive(Clone)]
struct HostImport {
    module: String,
    name: String,
    params: Vec<ValType>,
    results: Vec<ValType>,
    func: HostFn,
}

/// Imports to link next to WASI, keyed by `(module, name)`.
#[derive(Clone, Default)]
pub struct HostImports {
    entries: Vec<HostImport>,
}

impl HostImports {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Define an import. A later definition with the same key replaces an
    /// earlier one.
    pub fn define<F>(
        &mut self,
        module: impl Into<String>,
        name: impl Into<String>,
        params: impl IntoIterator<Item = ValType>,
        results: impl IntoIterator<Item = ValType>,
        func: F,
    ) -> &mut Self
    where
        F: Fn(&[Val]) -> HostValue<Vec<Val>> + Send + Sync + 'static,
    {
        let import = HostImport {
            module: module.into(),
            name: name.into(),
            params: params.into_iter().collect(),
            results: results.into_iter().collect(),
            func: Arc::new(func),
        };
        self.entries
            .retain(|e| e.module != import.module || e.name != import.name);
        self.entries.push(import);
        self
    }

    /// Number of defined imports.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no imports are defined.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `(module, name)` of every defined import.
    pub fn names(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|e| (e.module.as_str(), e.name.as_str()))
    }

    pub(super) fn register(&self, linker: &mut Linker<ShimHost>) -> Result<()> {
        for import in &self.entries {
            let ty = FuncType::new(
                linker.engine(),
                import.params.iter().cloned(),
                import.results.iter().cloned(),
            );
            let entry = import.clone();
            linker
                .func_new(
                    &import.module,
                    &import.name,
                    ty,
                    move |mut caller: Caller<'_, ShimHost>, params: &[Val], results: &mut [Val]| {
                        let func = entry.func.clone();
                        let produced = intercept(&mut caller, |_| Ok(func(params)))?;
                        fill_results(&entry, produced, results)?;
                        Ok(())
                    },
                )
                .map_err(|e| {
                    ShimError::Wasm(format!(
                        "failed to register {}.{}: {}",
                        import.module, import.name, e
                    ))
                })?;
        }
        Ok(())
    }
}

impl fmt::Debug for HostImports {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|e| format!("{}.{}", e.module, e.name)))
            .finish()
    }
}

fn fill_results(import: &HostImport, produced: Option<Vec<Val>>, results: &mut [Val]) -> Result<()> {
    let values = match produced {
        Some(values) => values,
        None => import
            .results
            .iter()
            .map(zero_value)
            .collect::<Result<Vec<_>>>()?,
    };

    if values.len() != results.len() {
        return Err(ShimError::Trap(format!(
            "import {}.{} produced {} values, expected {}",
            import.module,
            import.name,
            values.len(),
            results.len()
        )));
    }
    for (slot, value) in results.iter_mut().zip(values) {
        *slot = value;
    }
    Ok(())
}

/// Run an import body under the asyncify interceptor, or directly when the
/// module is not instrumented.
///
/// `Ok(None)` means the guest has started unwinding.
pub(super) fn intercept<'c, F>(caller: &mut Caller<'c, ShimHost>, call: F) -> Result<Option<Vec<Val>>>
where
    F: FnOnce(&mut Caller<'c, ShimHost>) -> Result<HostValue<Vec<Val>>>,
{
    match caller.data().controls.clone() {
        Some(controls) => {
            let mut host = Controlled::new(caller, controls);
            intercept_import(&mut host, |h| call(h.context()))
        }
        None => match call(caller)? {
            HostValue::Ready(values) => Ok(Some(values)),
            HostValue::Pending(_) => Err(ShimError::AsyncifyProtocol(
                "host import returned a pending value but the module has no asyncify exports"
                    .into(),
            )),
        },
    }
}
