//! Fixed-layout records described by struct-module format strings
//!
//! A format such as `"if8sdh2i0i"` is parsed once into a [`RecordFormat`]
//! that knows every field's kind and byte offset. The same string is sent to
//! Python next to the raw bytes, so both sides must agree on the layout; the
//! size check in [`RecordDescriptor::for_record`] catches disagreements on
//! the native side before anything is sent.

use crate::errors::{BridgeError, Result};
use std::mem::{align_of, size_of};
use std::os::raw::{c_long, c_ulong};

/// Declared record alignment, appended to the format as a zero-count directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alignment {
    Four,
    Eight,
}

impl Alignment {
    pub const fn bytes(self) -> u32 {
        match self {
            Self::Four => 4,
            Self::Eight => 8,
        }
    }

    /// `0i` pads to int alignment, `0d` to double alignment.
    pub const fn directive(self) -> &'static str {
        match self {
            Self::Four => "0i",
            Self::Eight => "0d",
        }
    }
}

impl TryFrom<u32> for Alignment {
    type Error = BridgeError;

    fn try_from(alignment: u32) -> Result<Self> {
        match alignment {
            4 => Ok(Self::Four),
            8 => Ok(Self::Eight),
            other => Err(BridgeError::UnsupportedAlignment { alignment: other }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    pub const fn native() -> Self {
        if cfg!(target_endian = "little") {
            Self::Little
        } else {
            Self::Big
        }
    }
}

/// `@` uses native sizes and alignment; the other prefixes use standard
/// sizes and no padding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutMode {
    Native,
    Standard(ByteOrder),
}

impl LayoutMode {
    fn from_prefix(c: char) -> Option<Self> {
        match c {
            '@' => Some(Self::Native),
            '=' => Some(Self::Standard(ByteOrder::native())),
            '<' => Some(Self::Standard(ByteOrder::Little)),
            '>' | '!' => Some(Self::Standard(ByteOrder::Big)),
            _ => None,
        }
    }

    fn byte_order(self) -> ByteOrder {
        match self {
            Self::Native => ByteOrder::native(),
            Self::Standard(order) => order,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Pad,
    Char,
    I8,
    U8,
    Bool,
    I16,
    U16,
    I32,
    U32,
    Long,
    ULong,
    I64,
    U64,
    ISize,
    USize,
    F32,
    F64,
    Bytes,
    Pointer,
}

impl FieldKind {
    fn from_code(code: char) -> Option<Self> {
        Some(match code {
            'x' => Self::Pad,
            'c' => Self::Char,
            'b' => Self::I8,
            'B' => Self::U8,
            '?' => Self::Bool,
            'h' => Self::I16,
            'H' => Self::U16,
            'i' => Self::I32,
            'I' => Self::U32,
            'l' => Self::Long,
            'L' => Self::ULong,
            'q' => Self::I64,
            'Q' => Self::U64,
            'n' => Self::ISize,
            'N' => Self::USize,
            'f' => Self::F32,
            'd' => Self::F64,
            's' => Self::Bytes,
            'P' => Self::Pointer,
            _ => return None,
        })
    }

    /// Size in bytes of one item; `None` if the kind has no size in `mode`.
    fn size(self, mode: LayoutMode) -> Option<usize> {
        let native = mode == LayoutMode::Native;
        Some(match self {
            Self::Pad | Self::Char | Self::I8 | Self::U8 | Self::Bool | Self::Bytes => 1,
            Self::I16 | Self::U16 => 2,
            Self::I32 | Self::U32 | Self::F32 => 4,
            Self::Long if native => size_of::<c_long>(),
            Self::ULong if native => size_of::<c_ulong>(),
            Self::Long | Self::ULong => 4,
            Self::I64 | Self::U64 | Self::F64 => 8,
            Self::ISize | Self::USize if native => size_of::<isize>(),
            Self::Pointer if native => size_of::<*const u8>(),
            Self::ISize | Self::USize | Self::Pointer => return None,
        })
    }

    fn native_align(self) -> usize {
        match self {
            Self::Pad | Self::Char | Self::I8 | Self::U8 | Self::Bool | Self::Bytes => 1,
            Self::I16 | Self::U16 => align_of::<i16>(),
            Self::I32 | Self::U32 => align_of::<i32>(),
            Self::F32 => align_of::<f32>(),
            Self::Long | Self::ULong => align_of::<c_long>(),
            Self::I64 | Self::U64 => align_of::<i64>(),
            Self::ISize | Self::USize => align_of::<isize>(),
            Self::F64 => align_of::<f64>(),
            Self::Pointer => align_of::<*const u8>(),
        }
    }

    fn is_signed(self) -> bool {
        matches!(self, Self::I8 | Self::I16 | Self::I32 | Self::Long | Self::I64 | Self::ISize)
    }

    fn is_unsigned(self) -> bool {
        matches!(
            self,
            Self::U8 | Self::U16 | Self::U32 | Self::ULong | Self::U64 | Self::USize | Self::Pointer
        )
    }
}

/// One value-carrying directive of a record: `count` consecutive items of
/// `size` bytes starting at `offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub kind: FieldKind,
    pub offset: usize,
    /// Byte width of one item; for `Bytes` this is the declared length.
    pub size: usize,
    /// Number of items. Always 1 for `Bytes`.
    pub count: usize,
}

impl Field {
    /// Offsets of the individual items.
    pub fn offsets(&self) -> impl Iterator<Item = usize> {
        let Field { offset, size, .. } = *self;
        (0..self.count).map(move |i| offset + i * size)
    }
}

/// Largest size a struct format may describe, the same bound `struct.calcsize` enforces.
const MAX_RECORD_SIZE: usize = isize::MAX as usize;

/// A decoded field value
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Int(i64),
    UInt(u64),
    Float(f64),
    Bool(bool),
    Char(u8),
    Bytes(Vec<u8>),
}

impl FieldValue {
    fn kind_name(&self) -> &'static str {
        match self {
            Self::Int(_) => "int",
            Self::UInt(_) => "uint",
            Self::Float(_) => "float",
            Self::Bool(_) => "bool",
            Self::Char(_) => "char",
            Self::Bytes(_) => "bytes",
        }
    }
}

/// Parsed struct format
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFormat {
    source: String,
    mode: LayoutMode,
    fields: Vec<Field>,
    size: usize,
}

impl RecordFormat {
    pub fn parse(format: &str) -> Result<Self> {
        let mut chars = format.chars().peekable();
        let mode = match chars.peek().copied().and_then(LayoutMode::from_prefix) {
            Some(mode) => {
                chars.next();
                mode
            }
            None => LayoutMode::Native,
        };

        let mut fields = Vec::new();
        let mut offset = 0usize;
        let mut count: Option<usize> = None;

        for c in chars {
            if c.is_whitespace() {
                if count.is_some() {
                    return Err(format_error(format, "repeat count followed by whitespace"));
                }
                continue;
            }
            if let Some(digit) = c.to_digit(10) {
                let current = count.unwrap_or(0);
                count = Some(
                    current
                        .checked_mul(10)
                        .and_then(|v| v.checked_add(digit as usize))
                        .ok_or_else(|| format_error(format, "repeat count overflow"))?,
                );
                continue;
            }

            let kind = FieldKind::from_code(c)
                .ok_or_else(|| BridgeError::unsupported_element(format!("format code '{}' in \"{}\"", c, format)))?;
            let item_size = kind
                .size(mode)
                .ok_or_else(|| format_error(format, &format!("'{}' is only valid in native mode", c)))?;
            let repeat = count.take().unwrap_or(1);

            if mode == LayoutMode::Native {
                offset = align_up(offset, kind.native_align()).ok_or_else(|| too_long(format))?;
            }

            let width = match kind {
                FieldKind::Pad | FieldKind::Bytes => Some(repeat),
                _ => item_size.checked_mul(repeat),
            };
            let end = width
                .and_then(|width| offset.checked_add(width))
                .filter(|&end| end <= MAX_RECORD_SIZE)
                .ok_or_else(|| too_long(format))?;

            match kind {
                FieldKind::Pad => {}
                FieldKind::Bytes => fields.push(Field { kind, offset, size: repeat, count: 1 }),
                _ if repeat == 0 => {}
                _ => fields.push(Field { kind, offset, size: item_size, count: repeat }),
            }
            offset = end;
        }

        if count.is_some() {
            return Err(format_error(format, "repeat count without a format code"));
        }

        Ok(Self {
            source: format.to_string(),
            mode,
            fields,
            size: offset,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn mode(&self) -> LayoutMode {
        self.mode
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Number of values `unpack` yields and `pack` expects.
    pub fn value_count(&self) -> usize {
        self.fields.iter().map(|field| field.count).sum()
    }

    /// Total encoded size in bytes, matching `struct.calcsize`.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Decode a blob into one value per field.
    pub fn unpack(&self, bytes: &[u8]) -> Result<Vec<FieldValue>> {
        if bytes.len() != self.size {
            return Err(BridgeError::shape_mismatch(
                format!("{} bytes for \"{}\"", self.size, self.source),
                format!("{} bytes", bytes.len()),
            ));
        }
        let order = self.mode.byte_order();

        Ok(self
            .fields
            .iter()
            .flat_map(|field| field.offsets().map(move |at| (field, at)))
            .map(|(field, at)| {
                let raw = &bytes[at..at + field.size];
                match field.kind {
                    FieldKind::Bytes => FieldValue::Bytes(raw.to_vec()),
                    FieldKind::Char => FieldValue::Char(raw[0]),
                    FieldKind::Bool => FieldValue::Bool(raw[0] != 0),
                    FieldKind::F32 => FieldValue::Float(f32::from_bits(read_uint(raw, order) as u32).into()),
                    FieldKind::F64 => FieldValue::Float(f64::from_bits(read_uint(raw, order))),
                    kind if kind.is_signed() => FieldValue::Int(sign_extend(read_uint(raw, order), field.size)),
                    _ => FieldValue::UInt(read_uint(raw, order)),
                }
            })
            .collect())
    }

    /// Encode one value per field. Values must match their field's kind and
    /// fit its width; short `Bytes` values are zero padded, long ones truncated.
    pub fn pack(&self, values: &[FieldValue]) -> Result<Vec<u8>> {
        let expected = self.value_count();
        if values.len() != expected {
            return Err(BridgeError::shape_mismatch(
                format!("{} values for \"{}\"", expected, self.source),
                format!("{} values", values.len()),
            ));
        }
        let order = self.mode.byte_order();
        let mut out = vec![0u8; self.size];

        let slots = self
            .fields
            .iter()
            .flat_map(|field| field.offsets().map(move |at| (field, at)));
        for ((field, at), value) in slots.zip(values) {
            let slot = &mut out[at..at + field.size];
            match (field.kind, value) {
                (FieldKind::Bytes, FieldValue::Bytes(data)) => {
                    let n = data.len().min(field.size);
                    slot[..n].copy_from_slice(&data[..n]);
                }
                (FieldKind::Char, FieldValue::Char(c)) => slot[0] = *c,
                (FieldKind::Bool, FieldValue::Bool(b)) => slot[0] = u8::from(*b),
                (FieldKind::F32, FieldValue::Float(v)) => write_uint(slot, u64::from((*v as f32).to_bits()), order),
                (FieldKind::F64, FieldValue::Float(v)) => write_uint(slot, v.to_bits(), order),
                (kind, FieldValue::Int(v)) if kind.is_signed() || kind.is_unsigned() => {
                    check_range(i128::from(*v), kind, field.size)?;
                    write_uint(slot, *v as u64, order);
                }
                (kind, FieldValue::UInt(v)) if kind.is_signed() || kind.is_unsigned() => {
                    check_range(i128::from(*v), kind, field.size)?;
                    write_uint(slot, *v, order);
                }
                (kind, value) => {
                    return Err(BridgeError::unsupported_element(format!(
                        "{} value for {:?} field at offset {}",
                        value.kind_name(),
                        kind,
                        at
                    )))
                }
            }
        }

        Ok(out)
    }
}

fn format_error(format: &str, reason: &str) -> BridgeError {
    BridgeError::shape_mismatch("a valid struct format", format!("\"{}\" ({})", format, reason))
}

fn too_long(format: &str) -> BridgeError {
    format_error(format, "total struct size too long")
}

#[inline]
fn align_up(offset: usize, align: usize) -> Option<usize> {
    Some(offset.checked_add(align - 1)? / align * align)
}

fn read_uint(raw: &[u8], order: ByteOrder) -> u64 {
    let fold = |acc: u64, b: &u8| (acc << 8) | u64::from(*b);
    match order {
        ByteOrder::Big => raw.iter().fold(0, fold),
        ByteOrder::Little => raw.iter().rev().fold(0, fold),
    }
}

fn write_uint(slot: &mut [u8], value: u64, order: ByteOrder) {
    let le = value.to_le_bytes();
    let width = slot.len();
    slot.copy_from_slice(&le[..width]);
    if order == ByteOrder::Big {
        slot.reverse();
    }
}

fn sign_extend(value: u64, size: usize) -> i64 {
    let shift = 64 - size * 8;
    ((value << shift) as i64) >> shift
}

fn check_range(value: i128, kind: FieldKind, size: usize) -> Result<()> {
    let bits = size as u32 * 8;
    let (min, max) = if kind.is_signed() {
        (-(1i128 << (bits - 1)), (1i128 << (bits - 1)) - 1)
    } else {
        (0, (1i128 << bits) - 1)
    };
    if value < min || value > max {
        return Err(BridgeError::unsupported_element(format!(
            "{} out of range for {:?}",
            value, kind
        )));
    }
    Ok(())
}

/// Plain-old-data records that can be shipped as raw bytes.
///
/// # Safety
/// Implementors must be `#[repr(C)]` (optionally `packed`), contain only
/// primitive numeric fields or arrays of them, and have no padding bytes:
/// every byte of the value must be initialized.
pub unsafe trait Record: Copy + 'static {}

/// View a record as its raw bytes.
pub fn record_bytes<T: Record>(record: &T) -> &[u8] {
    // SAFETY: `Record` guarantees every byte of `T` is initialized.
    unsafe { std::slice::from_raw_parts(record as *const T as *const u8, size_of::<T>()) }
}

/// Rebuild a record from exactly `size_of::<T>()` bytes.
pub fn record_from_bytes<T: Record>(bytes: &[u8]) -> Result<T> {
    if bytes.len() != size_of::<T>() {
        return Err(BridgeError::shape_mismatch(
            format!("{} bytes for {}", size_of::<T>(), std::any::type_name::<T>()),
            format!("{} bytes", bytes.len()),
        ));
    }
    // SAFETY: length checked above; `Record` types accept any bit pattern of
    // their numeric fields, and the read tolerates any alignment.
    Ok(unsafe { std::ptr::read_unaligned(bytes.as_ptr() as *const T) })
}

/// Format plus alignment for one record type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordDescriptor {
    format: RecordFormat,
    alignment: Alignment,
}

impl RecordDescriptor {
    /// Appends the alignment directive to `format` and parses the result.
    pub fn new(format: &str, alignment: u32) -> Result<Self> {
        let alignment = Alignment::try_from(alignment)?;
        let final_format = format!("{}{}", format, alignment.directive());
        Ok(Self {
            format: RecordFormat::parse(&final_format)?,
            alignment,
        })
    }

    /// Like [`new`](Self::new), and also checks the encoded size against `T`.
    pub fn for_record<T: Record>(format: &str, alignment: u32) -> Result<Self> {
        let descriptor = Self::new(format, alignment)?;
        if descriptor.size() != size_of::<T>() {
            return Err(BridgeError::shape_mismatch(
                format!("{} bytes ({})", size_of::<T>(), std::any::type_name::<T>()),
                format!("{} bytes from \"{}\"", descriptor.size(), descriptor.final_format()),
            ));
        }
        Ok(descriptor)
    }

    pub fn final_format(&self) -> &str {
        self.format.as_str()
    }

    pub fn format(&self) -> &RecordFormat {
        &self.format
    }

    pub fn alignment(&self) -> Alignment {
        self.alignment
    }

    pub fn size(&self) -> usize {
        self.format.size()
    }
}
