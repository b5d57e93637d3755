use std::fmt;

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Wire value types. The discriminants are the type codes used in value
/// frames and in the `Typ` field of the schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum ValueType {
    U7 = 0,
    U8 = 1,
    U32 = 2,
    I32 = 3,
    Ascii7 = 4,
    Ascii8 = 5,
    I16 = 6,
    U16 = 7,
    I64 = 8,
    U64 = 9,
}

impl ValueType {
    /// Number of value bits; zero for the text kinds.
    pub fn bits(&self) -> u32 {
        return match self {
            ValueType::U7 => 7,
            ValueType::U8 => 8,
            ValueType::U16 | ValueType::I16 => 16,
            ValueType::U32 | ValueType::I32 => 32,
            ValueType::U64 | ValueType::I64 => 64,
            ValueType::Ascii7 | ValueType::Ascii8 => 0,
        };
    }

    /// Encoded width in bytes. Text kinds have no fixed width.
    pub fn width(&self) -> Option<usize> {
        if !self.is_numeric() {
            return None;
        }
        return Some(((self.bits() + 6) / 7) as usize);
    }

    pub fn is_numeric(&self) -> bool {
        !matches!(self, ValueType::Ascii7 | ValueType::Ascii8)
    }

    pub fn is_signed(&self) -> bool {
        matches!(self, ValueType::I16 | ValueType::I32 | ValueType::I64)
    }

    pub fn min(&self) -> i128 {
        if self.is_signed() {
            return -(1i128 << (self.bits() - 1));
        }
        return 0;
    }

    pub fn max(&self) -> i128 {
        let bits = self.bits();
        if bits == 0 {
            return 0;
        }
        if self.is_signed() {
            return (1i128 << (bits - 1)) - 1;
        }
        return (1i128 << bits) - 1;
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            ValueType::U7 => "u7",
            ValueType::U8 => "u8",
            ValueType::U16 => "u16",
            ValueType::U32 => "u32",
            ValueType::U64 => "u64",
            ValueType::I16 => "i16",
            ValueType::I32 => "i32",
            ValueType::I64 => "i64",
            ValueType::Ascii7 => "ascii7",
            ValueType::Ascii8 => "ascii8",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    RangeError { value_type: ValueType, value: i128 },
    ShortInput { needed: usize, available: usize },
    Unsupported(ValueType),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CodecError::RangeError { value_type, value } => {
                write!(f, "value {} out of range for {}", value, value_type)
            }
            CodecError::ShortInput { needed, available } => {
                write!(f, "need {} bytes, only {} available", needed, available)
            }
            CodecError::Unsupported(value_type) => write!(f, "{} is not supported", value_type),
        }
    }
}

impl std::error::Error for CodecError {}

#[derive(Debug, Clone)]
pub struct TypeError {
    pub message: String,
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "invalid value type: {}", self.message)
    }
}

impl std::error::Error for TypeError {}

// Values /////////////////////////////////////////////////////////////////

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackedValue {
    U7(u8),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    I16(i16),
    I32(i32),
    I64(i64),
    Ascii7(String),
    Ascii8(Vec<u8>),
}

impl PackedValue {
    /// Builds a numeric value of the given kind, checking its range.
    pub fn from_integer(value_type: ValueType, value: i128) -> Result<Self, CodecError> {
        if !value_type.is_numeric() {
            return Err(CodecError::Unsupported(value_type));
        }
        if value < value_type.min() || value > value_type.max() {
            return Err(CodecError::RangeError { value_type, value });
        }
        return Ok(match value_type {
            ValueType::U7 => PackedValue::U7(value as u8),
            ValueType::U8 => PackedValue::U8(value as u8),
            ValueType::U16 => PackedValue::U16(value as u16),
            ValueType::U32 => PackedValue::U32(value as u32),
            ValueType::U64 => PackedValue::U64(value as u64),
            ValueType::I16 => PackedValue::I16(value as i16),
            ValueType::I32 => PackedValue::I32(value as i32),
            ValueType::I64 => PackedValue::I64(value as i64),
            ValueType::Ascii7 | ValueType::Ascii8 => unreachable!(),
        });
    }

    pub fn value_type(&self) -> ValueType {
        return match self {
            PackedValue::U7(_) => ValueType::U7,
            PackedValue::U8(_) => ValueType::U8,
            PackedValue::U16(_) => ValueType::U16,
            PackedValue::U32(_) => ValueType::U32,
            PackedValue::U64(_) => ValueType::U64,
            PackedValue::I16(_) => ValueType::I16,
            PackedValue::I32(_) => ValueType::I32,
            PackedValue::I64(_) => ValueType::I64,
            PackedValue::Ascii7(_) => ValueType::Ascii7,
            PackedValue::Ascii8(_) => ValueType::Ascii8,
        };
    }

    pub fn as_i128(&self) -> Result<i128, TypeError> {
        return match self {
            PackedValue::U7(value) | PackedValue::U8(value) => Ok(*value as i128),
            PackedValue::U16(value) => Ok(*value as i128),
            PackedValue::U32(value) => Ok(*value as i128),
            PackedValue::U64(value) => Ok(*value as i128),
            PackedValue::I16(value) => Ok(*value as i128),
            PackedValue::I32(value) => Ok(*value as i128),
            PackedValue::I64(value) => Ok(*value as i128),
            PackedValue::Ascii7(_) | PackedValue::Ascii8(_) => Err(TypeError {
                message: format!("{} is not numeric", self.value_type()),
            }),
        };
    }

    /// Boolean reading of a numeric value.
    pub fn is_yes(&self) -> Result<bool, TypeError> {
        return Ok(self.as_i128()? != 0);
    }

    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        return match self {
            PackedValue::Ascii7(text) => encode_ascii7(text.as_bytes()),
            PackedValue::Ascii8(_) => Err(CodecError::Unsupported(ValueType::Ascii8)),
            _ => match self.as_i128() {
                Ok(value) => encode_integer(self.value_type(), value),
                Err(_) => Err(CodecError::Unsupported(self.value_type())),
            },
        };
    }
}

impl fmt::Display for PackedValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PackedValue::Ascii7(text) => write!(f, "{}", text),
            PackedValue::Ascii8(bytes) => write!(f, "{}", hex::encode(bytes)),
            _ => match self.as_i128() {
                Ok(value) => write!(f, "{}", value),
                Err(e) => write!(f, "{}", e),
            },
        }
    }
}

// Codec //////////////////////////////////////////////////////////////////

fn mask(bits: u32) -> u128 {
    (1u128 << bits) - 1
}

/// Bits carried by the last byte of a numeric encoding. The other bytes
/// carry seven bits each, most significant first.
fn tail_bits(value_type: ValueType, width: usize) -> u32 {
    value_type.bits() - 7 * (width as u32 - 1)
}

/// Encodes an integer with the packed layout of the given kind. Signed
/// values go out as their two's complement bit pattern.
pub fn encode_integer(value_type: ValueType, value: i128) -> Result<Vec<u8>, CodecError> {
    let Some(width) = value_type.width() else {
        return Err(CodecError::Unsupported(value_type));
    };
    if value < value_type.min() || value > value_type.max() {
        return Err(CodecError::RangeError { value_type, value });
    }

    let pattern = (value as u128) & mask(value_type.bits());
    let tail = tail_bits(value_type, width);
    let mut bytes = vec![0u8; width];
    bytes[width - 1] = ((pattern & mask(tail)) << (7 - tail)) as u8;
    let mut rest = pattern >> tail;
    for byte in bytes[..width - 1].iter_mut().rev() {
        *byte = (rest & 0x7f) as u8;
        rest >>= 7;
    }
    return Ok(bytes);
}

fn encode_ascii7(text: &[u8]) -> Result<Vec<u8>, CodecError> {
    if let Some(byte) = text.iter().find(|byte| **byte >= 0x80) {
        return Err(CodecError::RangeError {
            value_type: ValueType::Ascii7,
            value: *byte as i128,
        });
    }
    return Ok(text.to_vec());
}

/// Decodes a value of the given kind from the front of `bytes`. Text
/// kinds consume the whole slice.
pub fn decode(value_type: ValueType, bytes: &[u8]) -> Result<PackedValue, CodecError> {
    match value_type {
        ValueType::Ascii7 => {
            let text = bytes.iter().map(|byte| (byte & 0x7f) as char).collect();
            return Ok(PackedValue::Ascii7(text));
        }
        ValueType::Ascii8 => return Err(CodecError::Unsupported(value_type)),
        _ => {}
    }

    let Some(width) = value_type.width() else {
        return Err(CodecError::Unsupported(value_type));
    };
    if bytes.len() < width {
        return Err(CodecError::ShortInput {
            needed: width,
            available: bytes.len(),
        });
    }

    let tail = tail_bits(value_type, width);
    let mut pattern: u128 = 0;
    for byte in &bytes[..width - 1] {
        pattern = (pattern << 7) | (byte & 0x7f) as u128;
    }
    pattern = (pattern << tail) | (((bytes[width - 1] & 0x7f) >> (7 - tail)) as u128 & mask(tail));

    return Ok(match value_type {
        ValueType::U7 => PackedValue::U7(pattern as u8),
        ValueType::U8 => PackedValue::U8(pattern as u8),
        ValueType::U16 => PackedValue::U16(pattern as u16),
        ValueType::U32 => PackedValue::U32(pattern as u32),
        ValueType::U64 => PackedValue::U64(pattern as u64),
        ValueType::I16 => PackedValue::I16(pattern as u16 as i16),
        ValueType::I32 => PackedValue::I32(pattern as u32 as i32),
        ValueType::I64 => PackedValue::I64(pattern as u64 as i64),
        ValueType::Ascii7 | ValueType::Ascii8 => unreachable!(),
    });
}
