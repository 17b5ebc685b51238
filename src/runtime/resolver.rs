//! Module loading and symbol lookup

use crate::errors::{BridgeError, Result};
use crate::runtime::exception::ExceptionState;
use pyo3::prelude::*;
use pyo3::types::{PyDict, PyModule};
use tracing::{debug, info};

/// Owns one strong reference to an imported module.
///
/// Dropping the handle releases the reference.
#[derive(Debug)]
pub struct ModuleHandle {
    name: String,
    module: Py<PyModule>,
}

impl ModuleHandle {
    /// Import `name`, blocking until the module body has run.
    pub fn resolve(py: Python<'_>, name: &str) -> Result<Self> {
        let module = PyModule::import(py, name).map_err(|err| BridgeError::ModuleNotFound {
            module: name.to_string(),
            cause: Some(ExceptionState::from_err(py, &err)),
        })?;

        // Modules always carry a __dict__; anything else is a broken import hook.
        if module.getattr("__dict__").is_err() {
            return Err(BridgeError::SymbolTable {
                module: name.to_string(),
            });
        }

        info!(module = name, "Imported Python module");
        Ok(Self {
            name: name.to_string(),
            module: module.into(),
        })
    }

    /// Re-execute the module source via `importlib.reload`.
    pub fn reload(&mut self, py: Python<'_>) -> Result<()> {
        let reloaded = py
            .import("importlib")
            .and_then(|importlib| importlib.call_method1("reload", (self.module.as_ref(py),)))
            .and_then(|module| Ok(module.downcast::<PyModule>()?))
            .map_err(|err| BridgeError::ModuleNotFound {
                module: self.name.clone(),
                cause: Some(ExceptionState::from_err(py, &err)),
            })?;

        debug!(module = %self.name, "Reloaded Python module");
        self.module = reloaded.into();
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn module<'py>(&'py self, py: Python<'py>) -> &'py PyModule {
        self.module.as_ref(py)
    }

    /// Borrow the module namespace as a symbol table.
    pub fn symbols<'py>(&'py self, py: Python<'py>) -> SymbolTable<'py> {
        SymbolTable {
            module: &self.name,
            dict: self.module.as_ref(py).dict(),
        }
    }
}

/// Read-only view over a module's `__dict__`.
///
/// Borrowed from a [`ModuleHandle`]; it cannot outlive it.
#[derive(Debug, Clone, Copy)]
pub struct SymbolTable<'py> {
    module: &'py str,
    dict: &'py PyDict,
}

impl<'py> SymbolTable<'py> {
    pub fn module_name(&self) -> &'py str {
        self.module
    }

    pub fn get(&self, name: &str) -> Option<&'py PyAny> {
        self.dict.get_item(name).ok().flatten()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Names of the public callables, sorted.
    pub fn callables(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .dict
            .iter()
            .filter(|(_, value)| value.is_callable())
            .filter_map(|(key, _)| key.extract::<String>().ok())
            .filter(|name| !name.starts_with('_'))
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.dict.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dict.is_empty()
    }
}
