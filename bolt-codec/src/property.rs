use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use bytestring::ByteString;

use crate::error::{DecodeError, EncodeError};
use crate::types::{MAX_NAME_LEN, MAX_PROPERTY_SIZE};
use crate::utils::{read_u24, take, to_string, write_u24, Decode, Encode};

prim_enum! {
    /// Low six bits of a property's leading byte
    pub enum PropertyType {
        String = 1,
        Blob = 2,
        I32 = 3,
        F64 = 4,
        Flag = 5,
        Id = 32,
        Topic = 33,
        CorrId = 34,
        ReplyTo = 35,
        Selector = 36,
        Compress = 37
    }
}

impl PropertyType {
    /// Named kinds carry their name on the wire, reserved kinds are identified by type alone.
    #[inline]
    pub fn is_named(self) -> bool {
        (self as u8) < 32
    }
}

/// Width of a property's length field, stored in the top two bits of its leading byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeMode {
    Small = 1,
    Medium = 2,
    Large = 3,
}

impl SizeMode {
    pub fn for_len(len: usize) -> Result<SizeMode, EncodeError> {
        match len {
            0..=0xff => Ok(SizeMode::Small),
            0x100..=0xffff => Ok(SizeMode::Medium),
            0x1_0000..=MAX_PROPERTY_SIZE => Ok(SizeMode::Large),
            _ => Err(EncodeError::PropertyTooLarge(len)),
        }
    }

    fn from_bits(bits: u8) -> Result<SizeMode, DecodeError> {
        match bits {
            1 => Ok(SizeMode::Small),
            2 => Ok(SizeMode::Medium),
            3 => Ok(SizeMode::Large),
            _ => Err(DecodeError::InvalidSizeMode(bits)),
        }
    }

    /// Number of bytes used by the length field.
    #[inline]
    pub fn width(self) -> usize {
        self as usize
    }
}

/// Value of a named property.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(ByteString),
    Blob(Bytes),
    I32(i32),
    F64(f64),
    Flag(bool),
}

impl Value {
    #[inline]
    pub fn typ(&self) -> PropertyType {
        match self {
            Value::String(_) => PropertyType::String,
            Value::Blob(_) => PropertyType::Blob,
            Value::I32(_) => PropertyType::I32,
            Value::F64(_) => PropertyType::F64,
            Value::Flag(_) => PropertyType::Flag,
        }
    }

    #[inline]
    fn len(&self) -> usize {
        match self {
            Value::String(s) => s.len(),
            Value::Blob(b) => b.len(),
            Value::I32(_) => 4,
            Value::F64(_) => 8,
            Value::Flag(_) => 1,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        if let Value::String(s) = self {
            Some(s)
        } else {
            None
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        if let Value::I32(v) = self {
            Some(*v)
        } else {
            None
        }
    }

    fn put(&self, buf: &mut BytesMut) {
        match self {
            Value::String(s) => buf.extend_from_slice(s.as_bytes()),
            Value::Blob(b) => buf.extend_from_slice(b),
            Value::I32(v) => buf.put_i32(*v),
            Value::F64(v) => buf.put_f64(*v),
            Value::Flag(v) => buf.put_u8(u8::from(*v)),
        }
    }

    fn read(typ: PropertyType, mut src: Bytes) -> Result<Value, DecodeError> {
        let v = match typ {
            PropertyType::String => Value::String(to_string(src)?),
            PropertyType::Blob => Value::Blob(src),
            PropertyType::I32 => {
                ensure!(src.remaining() == 4, DecodeError::InvalidLength);
                Value::I32(src.get_i32())
            }
            PropertyType::F64 => {
                ensure!(src.remaining() == 8, DecodeError::InvalidLength);
                Value::F64(src.get_f64())
            }
            PropertyType::Flag => {
                ensure!(src.remaining() == 1, DecodeError::InvalidLength);
                Value::Flag(src.get_u8() != 0)
            }
            _ => return Err(DecodeError::MalformedPacket),
        };
        Ok(v)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "{}", s),
            Value::Blob(b) => write!(f, "<{} bytes>", b.len()),
            Value::I32(v) => write!(f, "{}", v),
            Value::F64(v) => write!(f, "{}", v),
            Value::Flag(v) => write!(f, "{}", v),
        }
    }
}

/// One entry of a [`Meta`](crate::Meta) block.
#[derive(Debug, Clone, PartialEq)]
pub enum Property {
    Named { name: ByteString, value: Value },
    Id(ByteString),
    Topic(ByteString),
    CorrId(ByteString),
    ReplyTo(ByteString),
    Selector(ByteString),
    Compress(bool),
}

impl Property {
    #[inline]
    pub fn named<N: Into<ByteString>>(name: N, value: Value) -> Self {
        Property::Named { name: name.into(), value }
    }

    pub fn typ(&self) -> PropertyType {
        match self {
            Property::Named { value, .. } => value.typ(),
            Property::Id(_) => PropertyType::Id,
            Property::Topic(_) => PropertyType::Topic,
            Property::CorrId(_) => PropertyType::CorrId,
            Property::ReplyTo(_) => PropertyType::ReplyTo,
            Property::Selector(_) => PropertyType::Selector,
            Property::Compress(_) => PropertyType::Compress,
        }
    }

    /// Length of the payload that follows the length field: the name-length
    /// byte, the name and the value.
    pub fn payload_len(&self) -> usize {
        1 + match self {
            Property::Named { name, value } => name.len() + value.len(),
            Property::Id(s)
            | Property::Topic(s)
            | Property::CorrId(s)
            | Property::ReplyTo(s)
            | Property::Selector(s) => s.len(),
            Property::Compress(_) => 1,
        }
    }
}

impl Encode for Property {
    fn encoded_size(&self) -> usize {
        let len = self.payload_len();
        let width = SizeMode::for_len(len).map(SizeMode::width).unwrap_or(3);
        1 + width + len
    }

    fn encode(&self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        if let Property::Named { name, .. } = self {
            ensure!(name.len() <= MAX_NAME_LEN, EncodeError::NameTooLong(name.len()));
        }
        let len = self.payload_len();
        let mode = SizeMode::for_len(len)?;
        buf.put_u8(((mode as u8) << 6) | u8::from(self.typ()));
        match mode {
            SizeMode::Small => buf.put_u8(len as u8),
            SizeMode::Medium => buf.put_u16(len as u16),
            SizeMode::Large => write_u24(len, buf),
        }
        match self {
            Property::Named { name, value } => {
                buf.put_u8(name.len() as u8);
                buf.extend_from_slice(name.as_bytes());
                value.put(buf);
            }
            Property::Id(s)
            | Property::Topic(s)
            | Property::CorrId(s)
            | Property::ReplyTo(s)
            | Property::Selector(s) => {
                buf.put_u8(0);
                buf.extend_from_slice(s.as_bytes());
            }
            Property::Compress(v) => {
                buf.put_u8(0);
                buf.put_u8(u8::from(*v));
            }
        }
        Ok(())
    }
}

impl Decode for Property {
    fn decode(src: &mut Bytes) -> Result<Self, DecodeError> {
        ensure!(src.has_remaining(), DecodeError::InvalidLength);
        let enctype = src.get_u8();
        let mode = SizeMode::from_bits(enctype >> 6)?;
        let typ = PropertyType::try_from(enctype & 0x3f)?;
        let len = match mode {
            SizeMode::Small => {
                ensure!(src.has_remaining(), DecodeError::InvalidLength);
                src.get_u8() as usize
            }
            SizeMode::Medium => {
                ensure!(src.remaining() >= 2, DecodeError::InvalidLength);
                src.get_u16() as usize
            }
            SizeMode::Large => read_u24(src)?,
        };
        ensure!(len >= 1, DecodeError::InvalidLength);
        let mut payload = take(src, len)?;

        let name_len = payload.get_u8() as usize;
        let name = take(&mut payload, name_len)?;
        if typ.is_named() {
            let name = to_string(name)?;
            return Ok(Property::Named { name, value: Value::read(typ, payload)? });
        }

        let p = match typ {
            PropertyType::Id => Property::Id(to_string(payload)?),
            PropertyType::Topic => Property::Topic(to_string(payload)?),
            PropertyType::CorrId => Property::CorrId(to_string(payload)?),
            PropertyType::ReplyTo => Property::ReplyTo(to_string(payload)?),
            PropertyType::Selector => Property::Selector(to_string(payload)?),
            PropertyType::Compress => {
                ensure!(payload.remaining() == 1, DecodeError::InvalidLength);
                Property::Compress(payload.get_u8() != 0)
            }
            _ => return Err(DecodeError::MalformedPacket),
        };
        Ok(p)
    }
}

impl fmt::Display for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Property::Named { name, value } => write!(f, "{}:{:?}={}", name, value.typ(), value),
            Property::Id(s) => write!(f, "ID={}", s),
            Property::Topic(s) => write!(f, "TOPIC={}", s),
            Property::CorrId(s) => write!(f, "CORR_ID={}", s),
            Property::ReplyTo(s) => write!(f, "REPLY_TO={}", s),
            Property::Selector(s) => write!(f, "SELECTOR={}", s),
            Property::Compress(v) => write!(f, "COMPRESS={}", v),
        }
    }
}
