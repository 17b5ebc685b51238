//! Call dispatch
//!
//! Three calling modes over the same lookup-and-invoke path:
//!
//! - `call_checked` returns failures as [`BridgeError`] values.
//! - `call` leaves the failure pending on the Python error indicator and
//!   returns `None`, for hosts that poll with [`Bridge::report`].
//! - `call_unchecked` discards the result.

use super::decode::CallResult;
use super::marshal::ArgList;
use crate::errors::{BridgeError, Result};
use crate::runtime::exception::{log_state, ExceptionState};
use crate::runtime::Bridge;
use pyo3::exceptions::PyNameError;
use pyo3::prelude::*;
use tracing::{debug, debug_span, warn};

/// Why a dispatch did not produce a value.
enum CallError {
    MissingSymbol { symbol: String, module: String },
    Raised(PyErr),
}

impl CallError {
    fn into_pyerr(self) -> PyErr {
        match self {
            Self::MissingSymbol { symbol, module } => {
                PyNameError::new_err(format!("name '{}' is not defined in module '{}'", symbol, module))
            }
            Self::Raised(err) => err,
        }
    }
}

impl Bridge {
    fn dispatch(&self, py: Python<'_>, name: &str, args: &ArgList<'_>) -> std::result::Result<PyObject, CallError> {
        let symbols = self.module_handle().symbols(py);
        let callable = symbols.get(name).ok_or_else(|| CallError::MissingSymbol {
            symbol: name.to_string(),
            module: symbols.module_name().to_string(),
        })?;

        let result = if args.is_empty() {
            callable.call0()
        } else {
            callable.call1(args.to_tuple(py))
        };
        result.map(Into::into).map_err(CallError::Raised)
    }

    /// Call `name` with `args`; failures come back as errors.
    ///
    /// A Python exception is fetched (clearing the indicator), logged and
    /// returned as [`BridgeError::Runtime`]. An exception that was already
    /// pending before the call is put back afterwards.
    pub fn call_checked(&self, name: &str, args: &ArgList<'_>) -> Result<CallResult> {
        let span = debug_span!("call", symbol = name, args = args.len(), mode = "checked");
        let _enter = span.enter();

        Python::with_gil(|py| {
            let pending = PyErr::take(py);
            let outcome = self.dispatch(py, name, args);
            if let Some(pending) = pending {
                pending.restore(py);
            }

            match outcome {
                Ok(object) => {
                    debug!("Call returned");
                    Ok(CallResult::new(object))
                }
                Err(CallError::MissingSymbol { symbol, module }) => {
                    Err(BridgeError::SymbolNotFound { symbol, module })
                }
                Err(CallError::Raised(err)) => {
                    let state = ExceptionState::from_err(py, &err);
                    log_state(&state);
                    Err(BridgeError::Runtime(state))
                }
            }
        })
    }

    /// Call `name` with `args`, reporting failure through the error indicator.
    ///
    /// On failure the exception stays pending and `None` is returned; a
    /// missing symbol raises `NameError`. A stale exception pending before
    /// the call survives a successful call and is dropped (with a warning)
    /// when the call fails.
    pub fn call(&self, name: &str, args: &ArgList<'_>) -> Option<CallResult> {
        let span = debug_span!("call", symbol = name, args = args.len(), mode = "ambient");
        let _enter = span.enter();

        Python::with_gil(|py| {
            let stale = PyErr::take(py);
            match self.dispatch(py, name, args) {
                Ok(object) => {
                    if let Some(stale) = stale {
                        stale.restore(py);
                    }
                    Some(CallResult::new(object))
                }
                Err(err) => {
                    if let Some(stale) = stale {
                        warn!(
                            stale = %ExceptionState::from_err(py, &stale).type_name,
                            "Dropping unreported exception superseded by a failed call"
                        );
                    }
                    debug!("Call failed, exception left pending");
                    err.into_pyerr().restore(py);
                    None
                }
            }
        })
    }

    /// Call `name` and drop the result. Failures stay pending as in [`call`](Self::call).
    pub fn call_unchecked(&self, name: &str, args: &ArgList<'_>) {
        if self.call(name, args).is_none() {
            debug!(symbol = name, "Unchecked call failed");
        }
    }
}
