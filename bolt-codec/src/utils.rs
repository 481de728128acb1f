use bytes::{Buf, BufMut, Bytes, BytesMut};
use bytestring::ByteString;

use crate::error::{DecodeError, EncodeError};

macro_rules! ensure {
    ($cond:expr, $e:expr) => {
        if !($cond) {
            return Err($e);
        }
    };
}

macro_rules! prim_enum {
    (
        $( #[$enum_attr:meta] )*
        pub enum $name:ident {
            $(
                $( #[$enum_item_attr:meta] )*
                $var:ident=$val:expr
            ),+
        }) => {
        $( #[$enum_attr] )*
        #[repr(u8)]
        #[derive(Debug, Eq, PartialEq, Copy, Clone, Hash)]
        pub enum $name {
            $(
                $( #[$enum_item_attr] )*
                $var = $val
            ),+
        }
        impl std::convert::TryFrom<u8> for $name {
            type Error = $crate::error::DecodeError;
            fn try_from(v: u8) -> Result<Self, $crate::error::DecodeError> {
                match v {
                    $($val => Ok($name::$var)),+
                    ,_ => Err($crate::error::DecodeError::InvalidValue { kind: stringify!($name), value: v })
                }
            }
        }
        impl From<$name> for u8 {
            fn from(v: $name) -> Self {
                v as u8
            }
        }
    };
}

pub trait Decode: Sized {
    fn decode(src: &mut Bytes) -> Result<Self, DecodeError>;
}

pub trait Encode {
    fn encoded_size(&self) -> usize;

    fn encode(&self, buf: &mut BytesMut) -> Result<(), EncodeError>;
}

impl<T: Encode> Encode for Option<T> {
    fn encoded_size(&self) -> usize {
        if let Some(v) = self {
            v.encoded_size()
        } else {
            0
        }
    }
    fn encode(&self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        if let Some(v) = self {
            v.encode(buf)
        } else {
            Ok(())
        }
    }
}

pub(crate) fn take(src: &mut Bytes, len: usize) -> Result<Bytes, DecodeError> {
    ensure!(src.remaining() >= len, DecodeError::InvalidLength);
    Ok(src.split_to(len))
}

pub(crate) fn to_string(b: Bytes) -> Result<ByteString, DecodeError> {
    ByteString::try_from(b).map_err(|_| DecodeError::Utf8Error)
}

#[inline]
pub(crate) fn read_u24(src: &mut Bytes) -> Result<usize, DecodeError> {
    ensure!(src.remaining() >= 3, DecodeError::InvalidLength);
    let top = src.get_u8() as usize;
    let bottom = src.get_u16() as usize;
    Ok((top << 16) | bottom)
}

#[inline]
pub(crate) fn write_u24(len: usize, dst: &mut BytesMut) {
    dst.put_u8((len >> 16) as u8);
    dst.put_u16((len & 0xffff) as u16);
}
