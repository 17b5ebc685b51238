//! Embed a CPython interpreter in a native host.
//!
//! A [`Bridge`] starts (or joins) the interpreter, imports one module and
//! calls its functions. Arrays cross without copying, fixed-layout records
//! cross as `(format, bytes)` tuples, and results decode into native
//! vectors, tuples or records. Python exceptions surface as
//! [`ExceptionState`] values with their traceback frames.
//!
//! ```no_run
//! use pybridge::{ArgList, ArrayDescriptor, Bridge, ElementType};
//!
//! # fn main() -> pybridge::Result<()> {
//! let bridge = Bridge::initialize("bridge_main")?;
//! let pixels = vec![0u8; 480 * 640 * 3];
//! let image = bridge.wrap_array(&ArrayDescriptor::image(480, 640, 3, ElementType::U8, &pixels))?;
//!
//! let mut args = ArgList::new();
//! args.push_array(image).push("frame-0");
//! let result = bridge.call_checked("load_image", &args)?;
//! let rows: Vec<Vec<f32>> = bridge.decode_list(&result, "f")?;
//! # drop(rows);
//! bridge.shutdown();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod errors;
pub mod infrastructure;
pub mod interop;
pub mod runtime;

pub use config::{ArrayInterop, BridgeConfig};
pub use errors::{BridgeError, Result};
pub use interop::{
    ArgList, ArrayDescriptor, CallResult, ElementType, ForeignValue, NativeValue, Record, RecordDescriptor, Scalar,
    TupleField,
};
pub use runtime::{Bridge, ExceptionState, StackFrame};
