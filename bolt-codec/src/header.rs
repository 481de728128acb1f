use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{DecodeError, EncodeError};
use crate::types::{MessageKind, FLAG_BODY, FLAG_META, HEADER_LEN, MAX_FRAME_SIZE, SYNC};
use crate::utils::{Decode, Encode};

/// Fixed 8-byte frame header.
///
/// ```text
/// +----------------+------+------+-------+-----+
/// | size: i32 (BE) | type | sync | flags | pad |
/// +----------------+------+------+-------+-----+
/// ```
///
/// `size` counts the bytes following the header and is the only authority on
/// where the frame ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    size: usize,
    typ: u8,
    flags: u8,
}

impl Header {
    pub fn new(kind: MessageKind, size: usize, has_meta: bool, has_body: bool) -> Result<Self, EncodeError> {
        ensure!(size <= MAX_FRAME_SIZE, EncodeError::FrameTooLarge(size));
        let mut flags = 0;
        if has_meta {
            flags |= FLAG_META;
        }
        if has_body {
            flags |= FLAG_BODY;
        }
        Ok(Header { size, typ: kind.into(), flags })
    }

    /// Parses a header from exactly [`HEADER_LEN`] bytes.
    pub fn parse(src: &[u8; HEADER_LEN]) -> Result<Self, DecodeError> {
        let size = i32::from_be_bytes([src[0], src[1], src[2], src[3]]);
        ensure!(src[5] == SYNC, DecodeError::BadSync(src[5]));
        ensure!(size >= 0, DecodeError::InvalidSize(size));
        Ok(Header { size: size as usize, typ: src[4], flags: src[6] })
    }

    /// Body length, excluding the header itself.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Header plus body length.
    #[inline]
    pub fn frame_len(&self) -> usize {
        HEADER_LEN + self.size
    }

    /// Raw type tag. Unknown tags are carried through untouched.
    #[inline]
    pub fn typ(&self) -> u8 {
        self.typ
    }

    #[inline]
    pub fn kind(&self) -> Result<MessageKind, DecodeError> {
        MessageKind::try_from(self.typ)
    }

    #[inline]
    pub fn has_meta(&self) -> bool {
        self.flags & FLAG_META != 0
    }

    #[inline]
    pub fn has_body(&self) -> bool {
        self.flags & FLAG_BODY != 0
    }
}

impl Decode for Header {
    fn decode(src: &mut Bytes) -> Result<Self, DecodeError> {
        ensure!(src.remaining() >= HEADER_LEN, DecodeError::InvalidLength);
        let mut raw = [0u8; HEADER_LEN];
        src.copy_to_slice(&mut raw);
        Header::parse(&raw)
    }
}

impl Encode for Header {
    fn encoded_size(&self) -> usize {
        HEADER_LEN
    }

    fn encode(&self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        let size = i32::try_from(self.size).map_err(|_| EncodeError::FrameTooLarge(self.size))?;
        buf.put_i32(size);
        buf.put_u8(self.typ);
        buf.put_u8(SYNC);
        buf.put_u8(self.flags);
        buf.put_u8(0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let h = Header::new(MessageKind::Publish, 300, true, false).unwrap();
        let mut buf = BytesMut::new();
        h.encode(&mut buf).unwrap();
        assert_eq!(&buf[..], &[0, 0, 1, 44, 22, 0xB5, 0x01, 0]);

        let parsed = Header::decode(&mut buf.freeze()).unwrap();
        assert_eq!(parsed, h);
        assert_eq!(parsed.kind().unwrap(), MessageKind::Publish);
        assert!(parsed.has_meta());
        assert!(!parsed.has_body());
        assert_eq!(parsed.frame_len(), 308);
    }

    #[test]
    fn test_header_rejects_corruption() {
        assert!(matches!(Header::parse(&[0, 0, 0, 1, 3, 0xB4, 0, 0]), Err(DecodeError::BadSync(0xB4))));
        assert!(matches!(Header::parse(&[0xff, 0xff, 0xff, 0xff, 3, 0xB5, 0, 0]), Err(DecodeError::InvalidSize(-1))));
    }

    #[test]
    fn test_header_pad_is_ignored() {
        let h = Header::parse(&[0, 0, 0, 0, 3, 0xB5, 0x02, 0x7f]).unwrap();
        assert_eq!(h.size(), 0);
        assert!(h.has_body());
    }
}
