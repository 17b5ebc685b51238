//! Exception introspection
//!
//! CPython keeps at most one pending exception per thread. Fetching it here
//! clears the indicator, so a failure is reported exactly once.

use pyo3::{PyAny, PyErr, PyResult, Python};
use serde::Serialize;
use std::fmt;
use tracing::{error, warn};

/// One traceback entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StackFrame {
    pub file: String,
    pub line: u32,
    pub function: String,
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "  File \"{}\", line {}, in {}", self.file, self.line, self.function)
    }
}

/// A fetched Python exception: type name, message and traceback frames.
///
/// `frames` is ordered innermost (the raising frame) to outermost. It is
/// empty when the failure happened on the native side of a call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExceptionState {
    pub type_name: String,
    pub message: String,
    pub frames: Vec<StackFrame>,
}

impl ExceptionState {
    pub fn new(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            message: message.into(),
            frames: Vec::new(),
        }
    }

    /// Build the state from an already fetched exception.
    pub fn from_err(py: Python<'_>, err: &PyErr) -> Self {
        let type_name = err
            .get_type(py)
            .name()
            .map(str::to_owned)
            .unwrap_or_else(|_| "<unknown>".to_string());

        let message = match err.value(py).str() {
            Ok(text) => text.to_string_lossy().into_owned(),
            Err(_) => String::from("<unprintable exception>"),
        };

        let frames = err
            .traceback(py)
            .map(|tb| traceback_frames(tb.as_ref()))
            .unwrap_or_default();

        Self {
            type_name,
            message,
            frames,
        }
    }

    /// The raising frame, if the exception came from Python code.
    pub fn innermost(&self) -> Option<&StackFrame> {
        self.frames.first()
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{{\"type_name\":{:?}}}", self.type_name))
    }
}

impl fmt::Display for ExceptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.type_name, self.message)?;
        for frame in &self.frames {
            write!(f, "\n{}", frame)?;
        }
        Ok(())
    }
}

fn traceback_frames(tb: &PyAny) -> Vec<StackFrame> {
    match walk_traceback(tb) {
        Ok(frames) => frames,
        Err(err) => {
            warn!(cause = %err, "Could not read traceback frames");
            Vec::new()
        }
    }
}

/// Traceback objects link outermost to innermost through `tb_next`.
fn walk_traceback(tb: &PyAny) -> PyResult<Vec<StackFrame>> {
    let mut frames = Vec::new();
    let mut cursor = tb;

    while !cursor.is_none() {
        let code = cursor.getattr("tb_frame")?.getattr("f_code")?;
        frames.push(StackFrame {
            file: code.getattr("co_filename")?.extract()?,
            line: cursor.getattr("tb_lineno")?.extract()?,
            function: code.getattr("co_name")?.extract()?,
        });
        cursor = cursor.getattr("tb_next")?;
    }

    frames.reverse();
    Ok(frames)
}

/// Whether an interpreter is running in this process.
pub fn runtime_live() -> bool {
    // SAFETY: Py_IsInitialized may be called at any time, with or without the GIL.
    unsafe { pyo3::ffi::Py_IsInitialized() != 0 }
}

/// Fetch and clear the pending exception, logging it.
///
/// Returns `None` when nothing is pending.
pub fn report(py: Python<'_>) -> Option<ExceptionState> {
    let err = PyErr::take(py)?;
    let state = ExceptionState::from_err(py, &err);
    log_state(&state);
    Some(state)
}

/// Like [`report`], but safe to call before the interpreter is started.
pub fn report_if_live() -> Option<ExceptionState> {
    if !runtime_live() {
        error!("Python runtime is not initialized");
        return None;
    }
    Python::with_gil(report)
}

pub(crate) fn log_state(state: &ExceptionState) {
    error!(
        exception.type_name = %state.type_name,
        exception.message = %state.message,
        exception.frames = state.frames.len(),
        "{}",
        state
    );
}
