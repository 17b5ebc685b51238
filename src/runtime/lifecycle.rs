//! Interpreter lifecycle and the bridge context
//!
//! CPython allows one interpreter per process and cannot be restarted once
//! finalized. Process-wide bookkeeping lives in [`RUNTIME`]; each [`Bridge`]
//! is a context owning one loaded module on top of it.

use super::exception::{report, runtime_live, ExceptionState};
use super::resolver::ModuleHandle;
use crate::config::BridgeConfig;
use crate::errors::{BridgeError, Result};
use crate::interop::decode::{self, CallResult, FormatElement, TupleField};
use crate::interop::layout::{FieldValue, Record, RecordDescriptor};
use crate::interop::marshal::{self, ArrayBackend, ForeignArray};
use crate::interop::types::{ArrayDescriptor, ForeignValue};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use pyo3::prelude::*;
use pyo3::types::PyList;
use std::marker::PhantomData;
use std::path::Path;
use tracing::{debug, info, info_span, warn};

#[derive(Debug, Default)]
struct RuntimeState {
    /// The interpreter was started by this crate rather than the host.
    started_here: bool,
    finalized: bool,
    contexts: usize,
}

impl RuntimeState {
    fn should_finalize(&self, requested: bool) -> bool {
        requested && self.started_here && self.contexts == 0 && !self.finalized
    }
}

static RUNTIME: Lazy<Mutex<RuntimeState>> = Lazy::new(|| Mutex::new(RuntimeState::default()));

/// A live interpreter plus one loaded module.
///
/// Bound to the thread that created it.
#[derive(Debug)]
pub struct Bridge {
    module: ModuleHandle,
    arrays: ArrayBackend,
    config: BridgeConfig,
    _not_send: PhantomData<*const ()>,
}

impl Bridge {
    /// Start (or join) the interpreter and import `unit_name`.
    ///
    /// The current directory is put on `sys.path` so a module next to the
    /// host binary resolves.
    pub fn initialize(unit_name: &str) -> Result<Self> {
        Self::with_config(&BridgeConfig::for_module(unit_name).with_search_path("."))
    }

    pub fn with_config(config: &BridgeConfig) -> Result<Self> {
        let span = info_span!("bridge_init", module = %config.module);
        let _enter = span.enter();

        {
            let mut state = RUNTIME.lock();
            if state.finalized {
                return Err(BridgeError::initialization(
                    "the interpreter was finalized and cannot be restarted in this process",
                ));
            }

            if runtime_live() {
                if state.started_here {
                    debug!("Joining the interpreter started by an earlier bridge");
                } else {
                    warn!("Py_Initialize has been called, reusing the running interpreter");
                }
            } else {
                pyo3::prepare_freethreaded_python();
                state.started_here = runtime_live();
                if !state.started_here {
                    return Err(BridgeError::initialization("Py_Initialize did not start an interpreter"));
                }
                info!("Python interpreter started");
            }
        }

        // The GIL is taken with RUNTIME unlocked; Drop locks RUNTIME while
        // the GIL may be held.
        let (module, arrays) = Python::with_gil(|py| -> Result<_> {
            extend_sys_path(py, &config.search_paths)?;
            let arrays = ArrayBackend::load(py, config.array_interop)?;
            let module = ModuleHandle::resolve(py, &config.module)?;
            Ok((module, arrays))
        })?;

        let contexts = {
            let mut state = RUNTIME.lock();
            state.contexts += 1;
            state.contexts
        };
        debug!(contexts, numpy = arrays.is_numpy(), "Bridge ready");

        Ok(Self {
            module,
            arrays,
            config: config.clone(),
            _not_send: PhantomData,
        })
    }

    /// Release the module and, when configured and this crate started the
    /// interpreter, finalize it once the last bridge is gone.
    ///
    /// After finalization no bridge can be created again in this process.
    pub fn shutdown(self) {
        let finalize = self.config.finalize_on_shutdown;
        let module = self.module.name().to_string();

        // Drop while holding the GIL so references are released right away.
        Python::with_gil(|_py| drop(self));

        let finalizing = {
            let mut state = RUNTIME.lock();
            let finalizing = state.should_finalize(finalize);
            if finalizing {
                state.finalized = true;
            } else {
                debug!(module = %module, contexts = state.contexts, "Bridge shut down");
            }
            finalizing
        };

        if finalizing {
            // SAFETY: no bridge is alive and this thread does not hold the
            // GIL; PyGILState_Ensure acquires it for the finalizer.
            let status = unsafe {
                pyo3::ffi::PyGILState_Ensure();
                pyo3::ffi::Py_FinalizeEx()
            };
            if status < 0 {
                warn!("Py_FinalizeEx could not flush buffered data");
            }
            info!(module = %module, "Python interpreter finalized");
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn module_name(&self) -> &str {
        self.module.name()
    }

    pub(crate) fn module_handle(&self) -> &ModuleHandle {
        &self.module
    }

    pub fn uses_numpy(&self) -> bool {
        self.arrays.is_numpy()
    }

    /// Replace the loaded module with `name`.
    ///
    /// On failure the previous module stays loaded.
    pub fn load_module(&mut self, name: &str) -> Result<()> {
        let module = Python::with_gil(|py| ModuleHandle::resolve(py, name))?;
        info!(from = %self.module.name(), to = name, "Switched bridge module");
        self.module = module;
        Ok(())
    }

    /// Re-execute the current module's source.
    pub fn reload_module(&mut self) -> Result<()> {
        Python::with_gil(|py| self.module.reload(py))
    }

    pub fn has_symbol(&self, name: &str) -> bool {
        Python::with_gil(|py| self.module.symbols(py).contains(name))
    }

    /// Public callables of the loaded module, sorted.
    pub fn callables(&self) -> Vec<String> {
        Python::with_gil(|py| self.module.symbols(py).callables())
    }

    /// Fetch, clear and log the pending Python exception.
    pub fn report(&self) -> Option<ExceptionState> {
        Python::with_gil(report)
    }

    /// Expose a native buffer to Python without copying.
    pub fn wrap_array<'a>(&self, desc: &ArrayDescriptor<'a>) -> Result<ForeignArray<'a>> {
        Python::with_gil(|py| marshal::wrap_array(py, &self.arrays, desc))
    }

    pub fn decode_list<T: FormatElement>(&self, result: &CallResult, element_format: &str) -> Result<Vec<Vec<T>>> {
        Python::with_gil(|py| decode::decode_list(py, result.as_ref(py), element_format))
    }

    pub fn decode_tuple(&self, result: &CallResult, positional_format: &str) -> Result<Vec<TupleField>> {
        Python::with_gil(|py| decode::decode_tuple(py, result.as_ref(py), positional_format))
    }

    pub fn decode_record<T: Record>(&self, result: &CallResult) -> Result<T> {
        Python::with_gil(|py| decode::decode_record(result.as_ref(py)))
    }

    /// Unpack a returned record without a matching Rust type.
    pub fn decode_record_fields(&self, result: &CallResult, descriptor: &RecordDescriptor) -> Result<Vec<FieldValue>> {
        Python::with_gil(|py| decode::decode_record_fields(result.as_ref(py), descriptor))
    }

    pub fn classify(&self, result: &CallResult) -> Result<ForeignValue> {
        result.classify()
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        let mut state = RUNTIME.lock();
        state.contexts = state.contexts.saturating_sub(1);
    }
}

fn extend_sys_path(py: Python<'_>, paths: &[impl AsRef<Path>]) -> Result<()> {
    if paths.is_empty() {
        return Ok(());
    }

    let sys_path: &PyList = py
        .import("sys")
        .and_then(|sys| sys.getattr("path"))
        .and_then(|path| Ok(path.downcast::<PyList>()?))
        .map_err(|err| BridgeError::initialization(format!("sys.path unavailable: {}", ExceptionState::from_err(py, &err))))?;

    for path in paths.iter().rev() {
        let entry = path.as_ref().to_string_lossy().into_owned();
        let present = sys_path.contains(entry.as_str()).unwrap_or(false);
        if !present {
            sys_path
                .insert(0, entry.as_str())
                .map_err(|err| BridgeError::initialization(format!("sys.path insert failed: {}", ExceptionState::from_err(py, &err))))?;
            debug!(path = %entry, "Added module search path");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finalize_only_when_started_here() {
        let mut state = RuntimeState::default();
        assert!(!state.should_finalize(true));

        state.started_here = true;
        assert!(state.should_finalize(true));
        assert!(!state.should_finalize(false));
    }

    #[test]
    fn test_finalize_waits_for_last_context() {
        let mut state = RuntimeState {
            started_here: true,
            finalized: false,
            contexts: 1,
        };
        assert!(!state.should_finalize(true));

        state.contexts = 0;
        state.finalized = true;
        assert!(!state.should_finalize(true));
    }
}
