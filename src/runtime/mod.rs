//! Embedded interpreter runtime
//!
//! - `lifecycle.rs` - interpreter start/finalize and the [`Bridge`] context
//! - `resolver.rs` - module import and symbol lookup
//! - `exception.rs` - fetching and reporting Python exceptions

pub mod exception;
mod lifecycle;
pub mod resolver;

pub use exception::{report_if_live, runtime_live, ExceptionState, StackFrame};
pub use lifecycle::Bridge;
pub use resolver::{ModuleHandle, SymbolTable};
