use std::fmt;

use bytes::{Buf, Bytes, BytesMut};
use bytestring::ByteString;
use once_cell::sync::OnceCell;

use crate::error::{DecodeError, EncodeError};
use crate::header::Header;
use crate::meta::Meta;
use crate::types::{MessageKind, HEADER_LEN};
use crate::utils::{Decode, Encode};

#[derive(Debug, Clone, Default, PartialEq)]
struct Content {
    meta: Option<Meta>,
    body: Option<Bytes>,
}

/// A complete frame.
///
/// Outbound messages are encoded when they are built. Inbound messages keep
/// their raw bytes and decode meta and body on first access. Either way the
/// frame bytes never change, so fan-out shares one buffer.
#[derive(Clone)]
pub struct Message {
    header: Header,
    raw: Bytes,
    content: OnceCell<Content>,
}

impl Message {
    pub fn new(kind: MessageKind, meta: Option<Meta>, body: Option<Bytes>) -> Result<Self, EncodeError> {
        let size = meta.encoded_size() + body.as_ref().map(|b| b.len()).unwrap_or_default();
        let header = Header::new(kind, size, meta.is_some(), body.is_some())?;

        let mut buf = BytesMut::with_capacity(header.frame_len());
        header.encode(&mut buf)?;
        meta.encode(&mut buf)?;
        if let Some(body) = &body {
            buf.extend_from_slice(body);
        }
        debug_assert_eq!(buf.len(), header.frame_len());

        Ok(Message { header, raw: buf.freeze(), content: OnceCell::with_value(Content { meta, body }) })
    }

    #[inline]
    pub fn with_meta(kind: MessageKind, meta: Meta) -> Result<Self, EncodeError> {
        Self::new(kind, Some(meta), None)
    }

    #[inline]
    pub fn empty(kind: MessageKind) -> Result<Self, EncodeError> {
        Self::new(kind, None, None)
    }

    /// Wraps a frame whose header has already been validated.
    pub(crate) fn from_frame(header: Header, raw: Bytes) -> Self {
        debug_assert_eq!(raw.len(), header.frame_len());
        Message { header, raw, content: OnceCell::new() }
    }

    /// Parses a complete frame, header included.
    pub fn decode(mut raw: Bytes) -> Result<Self, DecodeError> {
        let header = Header::decode(&mut raw.clone())?;
        ensure!(raw.len() >= header.frame_len(), DecodeError::InvalidLength);
        raw.truncate(header.frame_len());
        Ok(Self::from_frame(header, raw))
    }

    #[inline]
    pub fn header(&self) -> &Header {
        &self.header
    }

    #[inline]
    pub fn kind(&self) -> Result<MessageKind, DecodeError> {
        self.header.kind()
    }

    /// The encoded frame, header included.
    #[inline]
    pub fn bytes(&self) -> &Bytes {
        &self.raw
    }

    #[inline]
    pub fn into_bytes(self) -> Bytes {
        self.raw
    }

    /// Length of the whole frame.
    #[inline]
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.header.size() == 0
    }

    fn content(&self) -> Result<&Content, DecodeError> {
        self.content.get_or_try_init(|| {
            let mut src = self.raw.slice(HEADER_LEN..);
            let meta = if self.header.has_meta() { Some(Meta::decode(&mut src)?) } else { None };
            let body = if self.header.has_body() {
                Some(src.split_to(src.remaining()))
            } else {
                ensure!(!src.has_remaining(), DecodeError::MalformedPacket);
                None
            };
            Ok(Content { meta, body })
        })
    }

    #[inline]
    pub fn meta(&self) -> Result<Option<&Meta>, DecodeError> {
        Ok(self.content()?.meta.as_ref())
    }

    #[inline]
    pub fn body(&self) -> Result<Option<&Bytes>, DecodeError> {
        Ok(self.content()?.body.as_ref())
    }

    #[inline]
    pub fn topic(&self) -> Result<Option<&ByteString>, DecodeError> {
        Ok(self.meta()?.and_then(Meta::topic))
    }

    #[inline]
    pub fn id(&self) -> Result<Option<&ByteString>, DecodeError> {
        Ok(self.meta()?.and_then(Meta::id))
    }
}

impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("Message");
        match self.kind() {
            Ok(kind) => d.field("kind", &kind),
            Err(_) => d.field("kind", &self.header.typ()),
        };
        d.field("size", &self.header.size())
            .field("meta", &self.header.has_meta())
            .field("body", &self.header.has_body())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::Value;

    #[test]
    fn test_message_round_trip() {
        let mut meta = Meta::new();
        meta.set_topic("A.B.C").set_id("1").add("priority", Value::I32(5));
        let body = Bytes::from_static(b"payload bytes");
        let m = Message::new(MessageKind::Publish, Some(meta.clone()), Some(body.clone())).unwrap();
        assert_eq!(m.len(), HEADER_LEN + meta.encoded_size() + body.len());

        let decoded = Message::decode(m.bytes().clone()).unwrap();
        assert_eq!(decoded.kind().unwrap(), MessageKind::Publish);
        assert!(decoded.header().has_meta());
        assert!(decoded.header().has_body());
        assert_eq!(decoded.meta().unwrap(), Some(&meta));
        assert_eq!(decoded.body().unwrap(), Some(&body));
        assert_eq!(decoded.topic().unwrap().map(|t| t.to_string()), Some("A.B.C".to_string()));
        assert_eq!(decoded, m);
    }

    #[test]
    fn test_presence_flags() {
        let m = Message::empty(MessageKind::Welcome).unwrap();
        assert_eq!(m.len(), HEADER_LEN);
        assert!(m.is_empty());
        let decoded = Message::decode(m.into_bytes()).unwrap();
        assert_eq!(decoded.meta().unwrap(), None);
        assert_eq!(decoded.body().unwrap(), None);

        let m = Message::new(MessageKind::Echo, None, Some(Bytes::new())).unwrap();
        let decoded = Message::decode(m.into_bytes()).unwrap();
        assert!(decoded.header().has_body());
        assert_eq!(decoded.body().unwrap(), Some(&Bytes::new()));
    }

    #[test]
    fn test_lazy_decode_reports_corrupt_meta() {
        // meta flag set but the block claims a negative property count
        let raw = Bytes::from_static(&[0, 0, 0, 6, 22, 0xB5, 0x01, 0, 0, 0, 0, 6, 0xff, 0xff]);
        let m = Message::decode(raw).unwrap();
        assert_eq!(m.kind().unwrap(), MessageKind::Publish);
        assert!(matches!(m.meta(), Err(DecodeError::InvalidPropertyCount(-1))));
    }

    #[test]
    fn test_unknown_kind_is_carried() {
        let raw = Bytes::from_static(&[0, 0, 0, 0, 99, 0xB5, 0, 0]);
        let m = Message::decode(raw).unwrap();
        assert_eq!(m.header().typ(), 99);
        assert!(m.kind().is_err());
    }
}
