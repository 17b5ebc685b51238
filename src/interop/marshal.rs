//! Native → Python conversions
//!
//! Arrays are exposed without copying: the Python object aliases the caller's
//! buffer. Records travel as `(format, bytes)` tuples. Everything else is
//! converted by value, in positional order.

use super::layout::{record_bytes, Record, RecordDescriptor};
use super::types::{ArrayDescriptor, NativeValue};
use crate::config::ArrayInterop;
use crate::errors::{BridgeError, Result};
use crate::runtime::exception::ExceptionState;
use pyo3::prelude::*;
use pyo3::types::{PyBytes, PyList, PyModule, PyTuple};
use pyo3::{ffi, PyErr};
use std::marker::PhantomData;
use std::os::raw::{c_char, c_int};
use tracing::{debug, trace};

/// `PyBUF_READ`: the memoryview rejects writes from Python.
const PYBUF_READ: c_int = 0x100;

pub(crate) fn runtime_error(py: Python<'_>, err: PyErr) -> BridgeError {
    BridgeError::Runtime(ExceptionState::from_err(py, &err))
}

/// How arrays are presented on the Python side.
#[derive(Debug)]
pub enum ArrayBackend {
    Memoryview,
    Numpy(Py<PyModule>),
}

impl ArrayBackend {
    pub fn load(py: Python<'_>, interop: ArrayInterop) -> Result<Self> {
        match interop {
            ArrayInterop::Memoryview => Ok(Self::Memoryview),
            ArrayInterop::Numpy => py
                .import("numpy")
                .map(|numpy| Self::Numpy(numpy.into()))
                .map_err(|err| {
                    BridgeError::initialization(format!(
                        "numpy array interop requested but unavailable: {}",
                        ExceptionState::from_err(py, &err)
                    ))
                }),
            ArrayInterop::Auto => match py.import("numpy") {
                Ok(numpy) => Ok(Self::Numpy(numpy.into())),
                Err(_) => {
                    debug!("numpy not importable, arrays will be passed as memoryviews");
                    Ok(Self::Memoryview)
                }
            },
        }
    }

    pub fn is_numpy(&self) -> bool {
        matches!(self, Self::Numpy(_))
    }
}

/// A Python array object aliasing a native buffer borrowed for `'a`.
///
/// The borrow keeps the buffer alive while this handle (or an [`ArgList`]
/// holding it) exists. Python code that stores the array beyond the call
/// outlives that guarantee; callers must not let it.
#[derive(Debug)]
pub struct ForeignArray<'a> {
    object: PyObject,
    _buffer: PhantomData<&'a [u8]>,
}

impl<'a> ForeignArray<'a> {
    pub fn as_object(&self) -> &PyObject {
        &self.object
    }
}

/// Expose `desc.data` to Python as an array of `desc.dims`, without copying.
pub fn wrap_array<'a>(
    py: Python<'_>,
    backend: &ArrayBackend,
    desc: &ArrayDescriptor<'a>,
) -> Result<ForeignArray<'a>> {
    desc.validate()?;

    let len = ffi::Py_ssize_t::try_from(desc.data.len())
        .map_err(|_| BridgeError::shape_mismatch("buffer below isize::MAX bytes", desc.data.len().to_string()))?;

    // SAFETY: the view is read-only, so Python never writes through the
    // mutable pointer. The buffer outlives the view for 'a (see ForeignArray).
    let view: &PyAny = unsafe {
        let raw = ffi::PyMemoryView_FromMemory(desc.data.as_ptr() as *mut c_char, len, PYBUF_READ);
        py.from_owned_ptr_or_err(raw)
    }
    .map_err(|err| runtime_error(py, err))?;

    let shape = PyTuple::new(py, desc.dims.iter());
    let shaped = view
        .call_method1("cast", (desc.element.format_char().to_string(), shape))
        .map_err(|err| runtime_error(py, err))?;

    let object = match backend {
        ArrayBackend::Memoryview => shaped,
        ArrayBackend::Numpy(numpy) => numpy
            .as_ref(py)
            .call_method1("asarray", (shaped,))
            .map_err(|err| runtime_error(py, err))?,
    };

    trace!(dims = ?desc.dims.as_slice(), element = ?desc.element, "Wrapped native array");
    Ok(ForeignArray {
        object: object.into(),
        _buffer: PhantomData,
    })
}

/// Package a record as `(format, bytes)`.
///
/// `alignment` must be 4 or 8; it is appended to `format` as `0i` / `0d`.
/// The final format must encode exactly `size_of::<T>()` bytes.
pub fn wrap_struct<T: Record>(py: Python<'_>, format: &str, alignment: u32, record: &T) -> Result<PyObject> {
    let descriptor = RecordDescriptor::for_record::<T>(format, alignment)?;
    wrap_record(py, &descriptor, record)
}

/// [`wrap_struct`] with a descriptor built up front.
pub fn wrap_record<T: Record>(py: Python<'_>, descriptor: &RecordDescriptor, record: &T) -> Result<PyObject> {
    let bytes = record_bytes(record);
    if bytes.len() != descriptor.size() {
        return Err(BridgeError::shape_mismatch(
            format!("{} bytes from \"{}\"", descriptor.size(), descriptor.final_format()),
            format!("{} bytes", bytes.len()),
        ));
    }

    let blob: PyObject = PyBytes::new(py, bytes).into();
    Ok((descriptor.final_format(), blob).to_object(py))
}

/// Convert one native value.
pub fn wrap_value(py: Python<'_>, value: &NativeValue) -> PyObject {
    match value {
        NativeValue::None => py.None(),
        NativeValue::Bool(v) => v.to_object(py),
        NativeValue::Int(v) => v.to_object(py),
        NativeValue::UInt(v) => v.to_object(py),
        NativeValue::Float(v) => v.to_object(py),
        NativeValue::Str(v) => v.to_object(py),
        NativeValue::Bytes(v) => PyBytes::new(py, v).into(),
        NativeValue::Tuple(items) => wrap_tuple(py, items).into_py(py),
        NativeValue::List(items) => {
            PyList::new(py, items.iter().map(|item| wrap_value(py, item))).into()
        }
        NativeValue::Object(obj) => obj.clone_ref(py),
    }
}

/// Build a tuple, preserving the order of `items`.
pub fn wrap_tuple(py: Python<'_>, items: &[NativeValue]) -> Py<PyTuple> {
    PyTuple::new(py, items.iter().map(|item| wrap_value(py, item))).into()
}

/// Build a value from a directive string, one value per directive.
///
/// Directives: `s` str, `y` bytes, `b B h H i I l k q K n` integers of the
/// matching C width, `f d` floats, `?` bool, `O` any value, `(...)` a
/// nested tuple. A single top-level directive yields the bare value;
/// several yield a tuple. Kind or range mismatches fail without coercion.
pub fn build_value(py: Python<'_>, format: &str, values: &[NativeValue]) -> Result<PyObject> {
    let codes: Vec<char> = format.chars().filter(|c| !c.is_whitespace()).collect();
    let mut builder = ValueBuilder {
        py,
        format,
        codes: &codes,
        pos: 0,
        values,
        next: 0,
    };

    let mut items = builder.sequence(None)?;
    if builder.next != values.len() {
        return Err(BridgeError::shape_mismatch(
            format!("{} values for \"{}\"", builder.next, format),
            format!("{} values", values.len()),
        ));
    }

    Ok(match items.len() {
        0 => py.None(),
        1 => items.remove(0),
        _ => PyTuple::new(py, items).into(),
    })
}

struct ValueBuilder<'f, 'py> {
    py: Python<'py>,
    format: &'f str,
    codes: &'f [char],
    pos: usize,
    values: &'f [NativeValue],
    next: usize,
}

impl<'f, 'py> ValueBuilder<'f, 'py> {
    fn sequence(&mut self, close: Option<char>) -> Result<Vec<PyObject>> {
        let mut items = Vec::new();
        loop {
            let Some(&code) = self.codes.get(self.pos) else {
                if close.is_some() {
                    return Err(self.malformed("unbalanced '('"));
                }
                return Ok(items);
            };
            self.pos += 1;

            if Some(code) == close {
                return Ok(items);
            }
            match code {
                '(' => {
                    let inner = self.sequence(Some(')'))?;
                    items.push(PyTuple::new(self.py, inner).into());
                }
                ')' => return Err(self.malformed("unbalanced ')'")),
                _ => {
                    let value = self.take(code)?;
                    items.push(self.convert(code, value)?);
                }
            }
        }
    }

    fn take(&mut self, code: char) -> Result<&'f NativeValue> {
        let value = self.values.get(self.next).ok_or_else(|| {
            BridgeError::shape_mismatch(
                format!("a value for '{}' in \"{}\"", code, self.format),
                format!("{} values", self.values.len()),
            )
        })?;
        self.next += 1;
        Ok(value)
    }

    fn convert(&self, code: char, value: &NativeValue) -> Result<PyObject> {
        let py = self.py;
        let mismatch = || {
            BridgeError::unsupported_element(format!(
                "{} value for directive '{}'",
                value.kind_name(),
                code
            ))
        };

        match code {
            's' => match value {
                NativeValue::Str(s) => Ok(s.to_object(py)),
                _ => Err(mismatch()),
            },
            'y' => match value {
                NativeValue::Bytes(b) => Ok(PyBytes::new(py, b).into()),
                _ => Err(mismatch()),
            },
            'f' | 'd' => match value {
                NativeValue::Float(v) => Ok(v.to_object(py)),
                _ => Err(mismatch()),
            },
            '?' => match value {
                NativeValue::Bool(v) => Ok(v.to_object(py)),
                _ => Err(mismatch()),
            },
            'O' => Ok(wrap_value(py, value)),
            _ => {
                let (min, max) = int_range(code).ok_or_else(|| {
                    BridgeError::unsupported_element(format!("build directive '{}' in \"{}\"", code, self.format))
                })?;
                let v = match value {
                    NativeValue::Int(v) => i128::from(*v),
                    NativeValue::UInt(v) => i128::from(*v),
                    _ => return Err(mismatch()),
                };
                if v < min || v > max {
                    return Err(BridgeError::unsupported_element(format!(
                        "{} out of range for directive '{}'",
                        v, code
                    )));
                }
                Ok(match value {
                    NativeValue::UInt(u) => u.to_object(py),
                    _ => (v as i64).to_object(py),
                })
            }
        }
    }

    fn malformed(&self, reason: &str) -> BridgeError {
        BridgeError::shape_mismatch("a balanced build format", format!("\"{}\" ({})", self.format, reason))
    }
}

fn int_range(code: char) -> Option<(i128, i128)> {
    fn signed(bits: u32) -> (i128, i128) {
        (-(1i128 << (bits - 1)), (1i128 << (bits - 1)) - 1)
    }
    fn unsigned(bits: u32) -> (i128, i128) {
        (0, (1i128 << bits) - 1)
    }
    let long_bits = (std::mem::size_of::<std::os::raw::c_long>() * 8) as u32;
    let size_bits = (std::mem::size_of::<isize>() * 8) as u32;

    Some(match code {
        'b' => signed(8),
        'B' => unsigned(8),
        'h' => signed(16),
        'H' => unsigned(16),
        'i' => signed(32),
        'I' => unsigned(32),
        'l' => signed(long_bits),
        'k' => unsigned(long_bits),
        'q' => signed(64),
        'K' => unsigned(64),
        'n' => signed(size_bits),
        _ => return None,
    })
}

/// Positional arguments for one call.
///
/// Holds arrays borrowed for `'a`, so the list cannot outlive their buffers.
#[derive(Debug, Default)]
pub struct ArgList<'a> {
    items: Vec<PyObject>,
    _borrow: PhantomData<&'a [u8]>,
}

impl<'a> ArgList<'a> {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            _borrow: PhantomData,
        }
    }

    pub fn push(&mut self, value: impl Into<NativeValue>) -> &mut Self {
        let value = value.into();
        let object = Python::with_gil(|py| wrap_value(py, &value));
        self.items.push(object);
        self
    }

    pub fn push_tuple(&mut self, items: &[NativeValue]) -> &mut Self {
        let object = Python::with_gil(|py| wrap_tuple(py, items).into_py(py));
        self.items.push(object);
        self
    }

    pub fn push_array(&mut self, array: ForeignArray<'a>) -> &mut Self {
        self.items.push(array.object);
        self
    }

    /// Push a record as one `(format, bytes)` argument.
    pub fn push_struct<T: Record>(&mut self, format: &str, alignment: u32, record: &T) -> Result<&mut Self> {
        let object = Python::with_gil(|py| wrap_struct(py, format, alignment, record))?;
        self.items.push(object);
        Ok(self)
    }

    pub fn push_object(&mut self, object: PyObject) -> &mut Self {
        self.items.push(object);
        self
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn to_tuple<'py>(&self, py: Python<'py>) -> &'py PyTuple {
        PyTuple::new(py, self.items.iter().map(|item| item.clone_ref(py)))
    }
}
