//! Interoperability - moving values across the native/Python boundary
//!
//! Architecture:
//! - `types.rs` - element types, array descriptors, native and foreign values
//! - `layout.rs` - struct-format parsing and record layouts
//! - `marshal.rs` - native → Python (zero-copy arrays, records, tuples)
//! - `call.rs` - symbol dispatch in checked, ambient and unchecked modes
//! - `decode.rs` - Python → native (lists of lists, tuples, records)

pub mod types;
pub mod layout;
pub mod marshal;
mod call;
pub mod decode;

pub use types::{ArrayDescriptor, Dims, ElementType, ForeignValue, NativeValue, Scalar};
pub use layout::{
    record_bytes, record_from_bytes, Alignment, ByteOrder, FieldKind, FieldValue, LayoutMode, Record,
    RecordDescriptor, RecordFormat,
};
pub use marshal::{build_value, wrap_array, wrap_struct, wrap_tuple, wrap_value, ArgList, ArrayBackend, ForeignArray};
pub use decode::{
    classify, decode_list, decode_record, decode_record_fields, decode_tuple, CallResult, Directive, FormatElement,
    TupleField,
};
