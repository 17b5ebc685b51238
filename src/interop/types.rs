//! Value types crossing the boundary
//!
//! Native side: [`ElementType`], [`ArrayDescriptor`], [`NativeValue`].
//! Python side, seen natively: [`ForeignValue`].

use crate::errors::{BridgeError, Result};
use pyo3::PyObject;
use smallvec::SmallVec;

/// Element type of an array buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ElementType {
    U8,
    I8,
    U16,
    I16,
    I32,
    F32,
    F64,
}

impl ElementType {
    pub const ALL: [ElementType; 7] = [
        Self::U8,
        Self::I8,
        Self::U16,
        Self::I16,
        Self::I32,
        Self::F32,
        Self::F64,
    ];

    /// Size of one element in bytes
    #[inline]
    pub const fn size(self) -> usize {
        match self {
            Self::U8 | Self::I8 => 1,
            Self::U16 | Self::I16 => 2,
            Self::I32 | Self::F32 => 4,
            Self::F64 => 8,
        }
    }

    /// Buffer-protocol format character for this element
    #[inline]
    pub const fn format_char(self) -> char {
        match self {
            Self::U8 => 'B',
            Self::I8 => 'b',
            Self::U16 => 'H',
            Self::I16 => 'h',
            Self::I32 => 'i',
            Self::F32 => 'f',
            Self::F64 => 'd',
        }
    }

    /// Inverse of [`format_char`](Self::format_char), tolerating a native-order `@` prefix.
    pub fn from_format(format: &str) -> Result<Self> {
        let code = format.strip_prefix('@').unwrap_or(format);
        Self::ALL
            .iter()
            .copied()
            .find(|ty| code.len() == 1 && code.starts_with(ty.format_char()))
            .ok_or_else(|| BridgeError::unsupported_element(format!("buffer format '{}'", format)))
    }

    /// Map an OpenCV `Mat::depth()` code.
    ///
    /// `CV_16F` (7) and anything unknown are rejected.
    pub fn from_cv_depth(depth: i32) -> Result<Self> {
        match depth {
            0 => Ok(Self::U8),
            1 => Ok(Self::I8),
            2 => Ok(Self::U16),
            3 => Ok(Self::I16),
            4 => Ok(Self::I32),
            5 => Ok(Self::F32),
            6 => Ok(Self::F64),
            other => Err(BridgeError::unsupported_element(format!("image depth {}", other))),
        }
    }

    #[inline]
    pub const fn is_float(self) -> bool {
        matches!(self, Self::F32 | Self::F64)
    }
}

pub type Dims = SmallVec<[usize; 4]>;

/// A caller-owned buffer described for zero-copy exposure.
///
/// The descriptor only borrows `data`; the bridge never copies or frees it.
#[derive(Debug, Clone)]
pub struct ArrayDescriptor<'a> {
    pub dims: Dims,
    pub element: ElementType,
    pub data: &'a [u8],
}

impl<'a> ArrayDescriptor<'a> {
    pub fn new(dims: &[usize], element: ElementType, data: &'a [u8]) -> Self {
        Self {
            dims: dims.iter().copied().collect(),
            element,
            data,
        }
    }

    /// 2-D view of an interleaved image: `rows x (cols * channels)`.
    pub fn image(
        rows: usize,
        cols: usize,
        channels: usize,
        element: ElementType,
        data: &'a [u8],
    ) -> Self {
        Self::new(&[rows, cols * channels], element, data)
    }

    /// `None` when the product of the dims overflows `usize`.
    pub fn element_count(&self) -> Option<usize> {
        self.dims.iter().try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
    }

    pub fn byte_len(&self) -> Option<usize> {
        self.element_count()?.checked_mul(self.element.size())
    }

    /// The buffer must hold exactly `product(dims)` elements.
    pub fn validate(&self) -> Result<()> {
        if self.dims.is_empty() {
            return Err(BridgeError::shape_mismatch("at least one dimension", "none"));
        }
        if self.dims.contains(&0) {
            return Err(BridgeError::shape_mismatch(
                "non-zero extents",
                format!("dims {:?}", self.dims.as_slice()),
            ));
        }
        let expected = self.byte_len().ok_or_else(|| {
            BridgeError::shape_mismatch(
                "a byte length that fits in usize",
                format!("dims {:?} of {:?}", self.dims.as_slice(), self.element),
            )
        })?;
        if self.data.len() != expected {
            return Err(BridgeError::shape_mismatch(
                format!("{} bytes for dims {:?} of {:?}", expected, self.dims.as_slice(), self.element),
                format!("{} bytes", self.data.len()),
            ));
        }
        Ok(())
    }
}

/// Native value to be turned into a Python object.
#[derive(Debug)]
pub enum NativeValue {
    None,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Tuple(Vec<NativeValue>),
    List(Vec<NativeValue>),
    /// An already built Python object, passed through untouched.
    Object(PyObject),
}

impl NativeValue {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::UInt(_) => "uint",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::Bytes(_) => "bytes",
            Self::Tuple(_) => "tuple",
            Self::List(_) => "list",
            Self::Object(_) => "object",
        }
    }
}

impl From<bool> for NativeValue {
    fn from(v: bool) -> Self { Self::Bool(v) }
}

impl From<i32> for NativeValue {
    fn from(v: i32) -> Self { Self::Int(v.into()) }
}

impl From<i64> for NativeValue {
    fn from(v: i64) -> Self { Self::Int(v) }
}

impl From<u32> for NativeValue {
    fn from(v: u32) -> Self { Self::UInt(v.into()) }
}

impl From<u64> for NativeValue {
    fn from(v: u64) -> Self { Self::UInt(v) }
}

impl From<usize> for NativeValue {
    fn from(v: usize) -> Self { Self::UInt(v as u64) }
}

impl From<f32> for NativeValue {
    fn from(v: f32) -> Self { Self::Float(v.into()) }
}

impl From<f64> for NativeValue {
    fn from(v: f64) -> Self { Self::Float(v) }
}

impl From<&str> for NativeValue {
    fn from(v: &str) -> Self { Self::Str(v.to_string()) }
}

impl From<String> for NativeValue {
    fn from(v: String) -> Self { Self::Str(v) }
}

impl From<&[u8]> for NativeValue {
    fn from(v: &[u8]) -> Self { Self::Bytes(v.to_vec()) }
}

impl From<PyObject> for NativeValue {
    fn from(v: PyObject) -> Self { Self::Object(v) }
}

/// Scalar Python values
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

/// A Python result classified into the shapes the bridge understands.
#[derive(Debug, Clone, PartialEq)]
pub enum ForeignValue {
    None,
    Scalar(Scalar),
    Tuple(Vec<ForeignValue>),
    List(Vec<ForeignValue>),
    Blob(Vec<u8>),
    /// Any buffer-protocol object other than `bytes` (memoryview, ndarray, ...).
    Array {
        dims: Vec<usize>,
        element: ElementType,
        data: Vec<u8>,
    },
}

impl ForeignValue {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Scalar(_) => "scalar",
            Self::Tuple(_) => "tuple",
            Self::List(_) => "list",
            Self::Blob(_) => "blob",
            Self::Array { .. } => "array",
        }
    }

    pub fn as_list(&self) -> Option<&[ForeignValue]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Scalar(Scalar::Float(v)) => Some(*v),
            Self::Scalar(Scalar::Int(v)) => Some(*v as f64),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_sizes() {
        assert_eq!(ElementType::U8.size(), 1);
        assert_eq!(ElementType::I16.size(), 2);
        assert_eq!(ElementType::F32.size(), 4);
        assert_eq!(ElementType::F64.size(), 8);
    }

    #[test]
    fn test_cv_depth_mapping() {
        assert_eq!(ElementType::from_cv_depth(0).unwrap(), ElementType::U8);
        assert_eq!(ElementType::from_cv_depth(5).unwrap(), ElementType::F32);
        assert!(matches!(
            ElementType::from_cv_depth(7),
            Err(BridgeError::UnsupportedElementType { .. })
        ));
        assert!(ElementType::from_cv_depth(-1).is_err());
    }

    #[test]
    fn test_format_char_inverse() {
        for ty in ElementType::ALL {
            let code = ty.format_char().to_string();
            assert_eq!(ElementType::from_format(&code).unwrap(), ty);
        }
        assert_eq!(ElementType::from_format("@f").unwrap(), ElementType::F32);
        assert!(ElementType::from_format("Zd").is_err());
        assert!(ElementType::from_format("q").is_err());
    }

    #[test]
    fn test_image_descriptor_expands_channels() {
        let data = vec![0u8; 4 * 5 * 3];
        let desc = ArrayDescriptor::image(4, 5, 3, ElementType::U8, &data);
        assert_eq!(desc.dims.as_slice(), &[4, 15]);
        assert!(desc.validate().is_ok());
    }

    #[test]
    fn test_descriptor_length_mismatch() {
        let data = vec![0u8; 10];
        let desc = ArrayDescriptor::new(&[2, 2], ElementType::F32, &data);
        assert!(matches!(desc.validate(), Err(BridgeError::ShapeMismatch { .. })));

        let desc = ArrayDescriptor::new(&[], ElementType::U8, &data);
        assert!(desc.validate().is_err());

        let desc = ArrayDescriptor::new(&[0, 10], ElementType::U8, &[]);
        assert!(desc.validate().is_err());
    }

    #[test]
    fn test_descriptor_size_overflow() {
        let data = vec![0u8; 16];
        let desc = ArrayDescriptor::new(&[usize::MAX, 2], ElementType::U8, &data);
        assert_eq!(desc.element_count(), None);
        assert!(matches!(desc.validate(), Err(BridgeError::ShapeMismatch { .. })));

        let desc = ArrayDescriptor::new(&[usize::MAX / 2], ElementType::F64, &data);
        assert!(desc.element_count().is_some());
        assert_eq!(desc.byte_len(), None);
        assert!(matches!(desc.validate(), Err(BridgeError::ShapeMismatch { .. })));

        let desc = ArrayDescriptor::new(&[2, 2], ElementType::F32, &data);
        assert_eq!(desc.byte_len(), Some(16));
        assert!(desc.validate().is_ok());
    }
}
