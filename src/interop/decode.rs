//! Python → native conversions for call results
//!
//! Decoding is all-or-nothing: the first item that does not fit aborts the
//! whole decode and nothing partial is returned.

use super::layout::{record_from_bytes, FieldValue, Record, RecordDescriptor};
use super::types::{ElementType, ForeignValue, Scalar};
use crate::errors::{BridgeError, Result};
use crate::runtime::exception::{log_state, ExceptionState};
use pyo3::exceptions::{PyOverflowError, PyTypeError};
use pyo3::prelude::*;
use pyo3::types::{PyBool, PyBytes, PyFloat, PyList, PyLong, PyString, PyTuple};
use std::fmt;

/// Owned reference to a value returned from Python.
///
/// Dropping it releases the reference.
#[derive(Debug)]
pub struct CallResult {
    object: PyObject,
}

impl CallResult {
    pub fn new(object: PyObject) -> Self {
        Self { object }
    }

    pub fn as_object(&self) -> &PyObject {
        &self.object
    }

    pub fn into_object(self) -> PyObject {
        self.object
    }

    pub fn as_ref<'py>(&'py self, py: Python<'py>) -> &'py PyAny {
        self.object.as_ref(py)
    }

    pub fn is_none(&self) -> bool {
        Python::with_gil(|py| self.object.is_none(py))
    }

    pub fn type_name(&self) -> String {
        Python::with_gil(|py| type_name(self.object.as_ref(py)))
    }

    /// Classify into the closed [`ForeignValue`] variants, copying data out.
    pub fn classify(&self) -> Result<ForeignValue> {
        Python::with_gil(|py| classify(py, self.object.as_ref(py)))
    }
}

impl Clone for CallResult {
    fn clone(&self) -> Self {
        Python::with_gil(|py| Self::new(self.object.clone_ref(py)))
    }
}

/// One directive of the element / positional format vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    Byte,
    UByte,
    Short,
    UShort,
    Int,
    UInt,
    Long,
    LongLong,
    Float,
    Double,
    Bool,
    Str,
    Bytes,
    Object,
}

impl Directive {
    pub fn from_code(code: char) -> Option<Self> {
        Some(match code {
            'b' => Self::Byte,
            'B' => Self::UByte,
            'h' => Self::Short,
            'H' => Self::UShort,
            'i' => Self::Int,
            'I' => Self::UInt,
            'l' => Self::Long,
            'q' => Self::LongLong,
            'f' => Self::Float,
            'd' => Self::Double,
            '?' => Self::Bool,
            's' => Self::Str,
            'y' => Self::Bytes,
            'O' => Self::Object,
            _ => return None,
        })
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let mut chars = name.chars();
        if let (Some(code), None) = (chars.next(), chars.next()) {
            return Self::from_code(code);
        }
        Some(match name.to_ascii_lowercase().as_str() {
            "byte" => Self::Byte,
            "ubyte" => Self::UByte,
            "short" => Self::Short,
            "ushort" => Self::UShort,
            "int" | "integer" => Self::Int,
            "uint" => Self::UInt,
            "long" => Self::Long,
            "longlong" | "int64" => Self::LongLong,
            "float" => Self::Float,
            "double" => Self::Double,
            "bool" => Self::Bool,
            "str" | "string" => Self::Str,
            "bytes" => Self::Bytes,
            "object" => Self::Object,
            _ => return None,
        })
    }

    /// Parse a format: `"sisO"`, `"string,integer,string,object"` or a
    /// single name such as `"float"`.
    pub fn parse_format(format: &str) -> Result<Vec<Self>> {
        let format = format.trim();
        let unknown = |token: &str| {
            BridgeError::unsupported_element(format!("format directive '{}' in \"{}\"", token, format))
        };

        if format.contains(',') {
            return format
                .split(',')
                .map(str::trim)
                .map(|token| Self::from_name(token).ok_or_else(|| unknown(token)))
                .collect();
        }
        if let Some(directive) = Self::from_name(format) {
            return Ok(vec![directive]);
        }
        format
            .chars()
            .filter(|c| !c.is_whitespace())
            .map(|c| Self::from_code(c).ok_or_else(|| unknown(&c.to_string())))
            .collect()
    }

    fn int_range(self) -> Option<(i128, i128)> {
        let long_bits = std::mem::size_of::<std::os::raw::c_long>() as u32 * 8;
        Some(match self {
            Self::Byte => (i8::MIN.into(), i8::MAX.into()),
            Self::UByte => (0, u8::MAX.into()),
            Self::Short => (i16::MIN.into(), i16::MAX.into()),
            Self::UShort => (0, u16::MAX.into()),
            Self::Int => (i32::MIN.into(), i32::MAX.into()),
            Self::UInt => (0, u32::MAX.into()),
            Self::Long => (-(1i128 << (long_bits - 1)), (1i128 << (long_bits - 1)) - 1),
            Self::LongLong => (i64::MIN.into(), i64::MAX.into()),
            _ => return None,
        })
    }

    pub fn is_integer(self) -> bool {
        self.int_range().is_some()
    }

    fn extract_int(self, item: &PyAny) -> PyResult<i64> {
        let value: i64 = item.extract()?;
        match self.int_range() {
            Some((min, max)) if (min..=max).contains(&i128::from(value)) => Ok(value),
            Some(_) => Err(PyOverflowError::new_err(format!(
                "{} does not fit directive '{}'",
                value, self
            ))),
            None => Err(PyTypeError::new_err(format!("'{}' is not an integer directive", self))),
        }
    }

    fn code(self) -> char {
        match self {
            Self::Byte => 'b',
            Self::UByte => 'B',
            Self::Short => 'h',
            Self::UShort => 'H',
            Self::Int => 'i',
            Self::UInt => 'I',
            Self::Long => 'l',
            Self::LongLong => 'q',
            Self::Float => 'f',
            Self::Double => 'd',
            Self::Bool => '?',
            Self::Str => 's',
            Self::Bytes => 'y',
            Self::Object => 'O',
        }
    }
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Native element types `decode_list` can produce.
pub trait FormatElement: Sized {
    /// Whether items parsed with `directive` can be stored as `Self`.
    fn accepts(directive: Directive) -> bool;

    fn from_item(item: &PyAny, directive: Directive) -> PyResult<Self>;
}

impl FormatElement for f32 {
    fn accepts(directive: Directive) -> bool {
        matches!(directive, Directive::Float)
    }

    fn from_item(item: &PyAny, _directive: Directive) -> PyResult<Self> {
        Ok(item.extract::<f64>()? as f32)
    }
}

impl FormatElement for f64 {
    fn accepts(directive: Directive) -> bool {
        matches!(directive, Directive::Float | Directive::Double)
    }

    fn from_item(item: &PyAny, directive: Directive) -> PyResult<Self> {
        let value: f64 = item.extract()?;
        Ok(match directive {
            Directive::Float => f64::from(value as f32),
            _ => value,
        })
    }
}

macro_rules! int_element {
    ($ty:ty, $($directive:ident),+) => {
        impl FormatElement for $ty {
            fn accepts(directive: Directive) -> bool {
                matches!(directive, $(Directive::$directive)|+)
            }

            fn from_item(item: &PyAny, directive: Directive) -> PyResult<Self> {
                let value = directive.extract_int(item)?;
                <$ty>::try_from(value).map_err(|_| {
                    PyOverflowError::new_err(format!("{} does not fit {}", value, stringify!($ty)))
                })
            }
        }
    };
}

int_element!(i8, Byte);
int_element!(u8, UByte);
int_element!(i16, Byte, UByte, Short);
int_element!(u16, UByte, UShort);
int_element!(i32, Byte, UByte, Short, UShort, Int);
int_element!(u32, UByte, UShort, UInt);
int_element!(i64, Byte, UByte, Short, UShort, Int, UInt, Long, LongLong);

impl FormatElement for bool {
    fn accepts(directive: Directive) -> bool {
        matches!(directive, Directive::Bool)
    }

    fn from_item(item: &PyAny, _directive: Directive) -> PyResult<Self> {
        item.extract()
    }
}

impl FormatElement for String {
    fn accepts(directive: Directive) -> bool {
        matches!(directive, Directive::Str)
    }

    fn from_item(item: &PyAny, _directive: Directive) -> PyResult<Self> {
        item.extract()
    }
}

pub(crate) fn type_name(obj: &PyAny) -> String {
    obj.get_type()
        .name()
        .map(str::to_owned)
        .unwrap_or_else(|_| "<unknown>".to_string())
}

fn reported(py: Python<'_>, err: PyErr) -> BridgeError {
    let state = ExceptionState::from_err(py, &err);
    log_state(&state);
    BridgeError::Runtime(state)
}

/// Decode a list of lists, parsing every item with one directive.
pub fn decode_list<T: FormatElement>(
    py: Python<'_>,
    obj: &PyAny,
    element_format: &str,
) -> Result<Vec<Vec<T>>> {
    let directive = match Directive::parse_format(element_format)?.as_slice() {
        [single] => *single,
        other => {
            return Err(BridgeError::shape_mismatch(
                "exactly one element directive",
                format!("{} in \"{}\"", other.len(), element_format),
            ))
        }
    };
    if !T::accepts(directive) {
        return Err(BridgeError::shape_mismatch(
            format!("a directive storable as {}", std::any::type_name::<T>()),
            format!("'{}'", directive),
        ));
    }

    let outer = obj
        .downcast::<PyList>()
        .map_err(|_| BridgeError::not_a_list(type_name(obj)))?;

    let mut rows = Vec::with_capacity(outer.len());
    for (index, row) in outer.iter().enumerate() {
        let inner = row
            .downcast::<PyList>()
            .map_err(|_| BridgeError::not_a_list(format!("{} at index {}", type_name(row), index)))?;

        let mut parsed = Vec::with_capacity(inner.len());
        for item in inner.iter() {
            parsed.push(T::from_item(item, directive).map_err(|err| reported(py, err))?);
        }
        rows.push(parsed);
    }
    Ok(rows)
}

/// A positionally decoded tuple field
#[derive(Debug, Clone)]
pub enum TupleField {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Bytes(Vec<u8>),
    Object(CallResult),
}

impl TupleField {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&CallResult> {
        match self {
            Self::Object(obj) => Some(obj),
            _ => None,
        }
    }
}

fn decode_field(item: &PyAny, directive: Directive) -> PyResult<TupleField> {
    Ok(match directive {
        Directive::Float | Directive::Double => TupleField::Float(f64::from_item(item, directive)?),
        Directive::Bool => TupleField::Bool(item.extract()?),
        Directive::Str => TupleField::Str(item.extract()?),
        Directive::Bytes => TupleField::Bytes(item.downcast::<PyBytes>()?.as_bytes().to_vec()),
        Directive::Object => TupleField::Object(CallResult::new(item.into())),
        int => TupleField::Int(int.extract_int(item)?),
    })
}

/// Destructure a tuple positionally. Arity and every field kind must match.
pub fn decode_tuple(py: Python<'_>, obj: &PyAny, positional_format: &str) -> Result<Vec<TupleField>> {
    let directives = Directive::parse_format(positional_format)?;
    let tuple = obj
        .downcast::<PyTuple>()
        .map_err(|_| BridgeError::shape_mismatch("tuple", type_name(obj)))?;

    if tuple.len() != directives.len() {
        return Err(BridgeError::shape_mismatch(
            format!("{} fields for \"{}\"", directives.len(), positional_format),
            format!("{} fields", tuple.len()),
        ));
    }

    tuple
        .iter()
        .zip(&directives)
        .enumerate()
        .map(|(index, (item, &directive))| {
            decode_field(item, directive).map_err(|err| {
                let cause = ExceptionState::from_err(py, &err);
                BridgeError::shape_mismatch(
                    format!("field {} as '{}'", index, directive),
                    format!("{} ({})", type_name(item), cause.message),
                )
            })
        })
        .collect()
}

/// Read back a record returned as `bytes`.
pub fn decode_record<T: Record>(obj: &PyAny) -> Result<T> {
    let blob = obj
        .downcast::<PyBytes>()
        .map_err(|_| BridgeError::shape_mismatch("bytes", type_name(obj)))?;
    record_from_bytes(blob.as_bytes())
}

/// Unpack a returned `bytes` blob field by field.
pub fn decode_record_fields(obj: &PyAny, descriptor: &RecordDescriptor) -> Result<Vec<FieldValue>> {
    let blob = obj
        .downcast::<PyBytes>()
        .map_err(|_| BridgeError::shape_mismatch("bytes", type_name(obj)))?;
    descriptor.format().unpack(blob.as_bytes())
}

/// Copy a Python value into the closed [`ForeignValue`] shape.
pub fn classify(py: Python<'_>, obj: &PyAny) -> Result<ForeignValue> {
    if obj.is_none() {
        return Ok(ForeignValue::None);
    }
    if let Ok(b) = obj.downcast::<PyBool>() {
        return Ok(ForeignValue::Scalar(Scalar::Bool(b.is_true())));
    }
    if obj.is_instance_of::<PyLong>() {
        let value: i64 = obj
            .extract()
            .map_err(|_| BridgeError::unsupported_element("integer wider than 64 bits"))?;
        return Ok(ForeignValue::Scalar(Scalar::Int(value)));
    }
    if let Ok(f) = obj.downcast::<PyFloat>() {
        return Ok(ForeignValue::Scalar(Scalar::Float(f.value())));
    }
    if let Ok(s) = obj.downcast::<PyString>() {
        let text = s.to_str().map_err(|err| reported(py, err))?;
        return Ok(ForeignValue::Scalar(Scalar::Str(text.to_string())));
    }
    if let Ok(bytes) = obj.downcast::<PyBytes>() {
        return Ok(ForeignValue::Blob(bytes.as_bytes().to_vec()));
    }
    if let Ok(tuple) = obj.downcast::<PyTuple>() {
        let items = tuple.iter().map(|item| classify(py, item)).collect::<Result<_>>()?;
        return Ok(ForeignValue::Tuple(items));
    }
    if let Ok(list) = obj.downcast::<PyList>() {
        let items = list.iter().map(|item| classify(py, item)).collect::<Result<_>>()?;
        return Ok(ForeignValue::List(items));
    }

    classify_buffer(py, obj)
}

fn classify_buffer(py: Python<'_>, obj: &PyAny) -> Result<ForeignValue> {
    let unsupported = || BridgeError::unsupported_element(type_name(obj));

    let view = py
        .import("builtins")
        .and_then(|builtins| builtins.getattr("memoryview"))
        .and_then(|memoryview| memoryview.call1((obj,)))
        .map_err(|_| unsupported())?;

    let format: String = view.getattr("format").and_then(|f| f.extract()).map_err(|err| reported(py, err))?;
    let element = ElementType::from_format(&format)?;
    let dims: Vec<usize> = view.getattr("shape").and_then(|s| s.extract()).map_err(|err| reported(py, err))?;
    let data: Vec<u8> = view
        .call_method0("tobytes")
        .and_then(|b| Ok(b.downcast::<PyBytes>()?.as_bytes().to_vec()))
        .map_err(|err| reported(py, err))?;

    Ok(ForeignValue::Array { dims, element, data })
}
