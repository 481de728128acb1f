use std::collections::BTreeMap;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use bytestring::ByteString;

use crate::error::{DecodeError, EncodeError};
use crate::property::{Property, Value};
use crate::types::{MAX_PROPERTIES, META_PREFIX_LEN};
use crate::utils::{take, Decode, Encode};

/// Message metadata: reserved properties with direct accessors plus a set of
/// named properties where the last write for a name wins.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Meta {
    id: Option<ByteString>,
    topic: Option<ByteString>,
    corr_id: Option<ByteString>,
    reply_to: Option<ByteString>,
    selector: Option<ByteString>,
    compress: Option<bool>,
    properties: BTreeMap<ByteString, Value>,
}

impl Meta {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn id(&self) -> Option<&ByteString> {
        self.id.as_ref()
    }

    #[inline]
    pub fn topic(&self) -> Option<&ByteString> {
        self.topic.as_ref()
    }

    #[inline]
    pub fn corr_id(&self) -> Option<&ByteString> {
        self.corr_id.as_ref()
    }

    #[inline]
    pub fn reply_to(&self) -> Option<&ByteString> {
        self.reply_to.as_ref()
    }

    #[inline]
    pub fn selector(&self) -> Option<&ByteString> {
        self.selector.as_ref()
    }

    #[inline]
    pub fn compress(&self) -> bool {
        self.compress.unwrap_or(false)
    }

    #[inline]
    pub fn set_id<S: Into<ByteString>>(&mut self, id: S) -> &mut Self {
        self.id = Some(id.into());
        self
    }

    #[inline]
    pub fn set_topic<S: Into<ByteString>>(&mut self, topic: S) -> &mut Self {
        self.topic = Some(topic.into());
        self
    }

    #[inline]
    pub fn set_corr_id<S: Into<ByteString>>(&mut self, corr_id: S) -> &mut Self {
        self.corr_id = Some(corr_id.into());
        self
    }

    #[inline]
    pub fn set_reply_to<S: Into<ByteString>>(&mut self, reply_to: S) -> &mut Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    #[inline]
    pub fn set_selector<S: Into<ByteString>>(&mut self, selector: S) -> &mut Self {
        self.selector = Some(selector.into());
        self
    }

    #[inline]
    pub fn set_compress(&mut self, compress: bool) -> &mut Self {
        self.compress = Some(compress);
        self
    }

    /// Adds a named property, replacing any earlier one of the same name.
    #[inline]
    pub fn add<N: Into<ByteString>>(&mut self, name: N, value: Value) -> &mut Self {
        self.properties.insert(name.into(), value);
        self
    }

    #[inline]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    #[inline]
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    #[inline]
    pub fn get_i32(&self, name: &str) -> Option<i32> {
        self.get(name).and_then(Value::as_i32)
    }

    #[inline]
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.properties.remove(name)
    }

    /// Named properties, ordered by name.
    pub fn properties(&self) -> impl Iterator<Item = (&ByteString, &Value)> {
        self.properties.iter()
    }

    /// Every property in wire order: reserved ones first, then named ones.
    pub fn iter(&self) -> impl Iterator<Item = Property> + '_ {
        let reserved = [
            self.id.clone().map(Property::Id),
            self.topic.clone().map(Property::Topic),
            self.corr_id.clone().map(Property::CorrId),
            self.reply_to.clone().map(Property::ReplyTo),
            self.selector.clone().map(Property::Selector),
            self.compress.map(Property::Compress),
        ];
        reserved
            .into_iter()
            .flatten()
            .chain(self.properties.iter().map(|(name, value)| Property::named(name.clone(), value.clone())))
    }

    /// Total number of properties, reserved ones included.
    pub fn len(&self) -> usize {
        let reserved = [
            self.id.is_some(),
            self.topic.is_some(),
            self.corr_id.is_some(),
            self.reply_to.is_some(),
            self.selector.is_some(),
            self.compress.is_some(),
        ];
        reserved.iter().filter(|set| **set).count() + self.properties.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn insert(&mut self, p: Property) {
        match p {
            Property::Named { name, value } => {
                self.properties.insert(name, value);
            }
            Property::Id(s) => self.id = Some(s),
            Property::Topic(s) => self.topic = Some(s),
            Property::CorrId(s) => self.corr_id = Some(s),
            Property::ReplyTo(s) => self.reply_to = Some(s),
            Property::Selector(s) => self.selector = Some(s),
            Property::Compress(v) => self.compress = Some(v),
        }
    }
}

impl Encode for Meta {
    fn encoded_size(&self) -> usize {
        META_PREFIX_LEN + self.iter().map(|p| p.encoded_size()).sum::<usize>()
    }

    fn encode(&self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        let count = self.len();
        ensure!(count <= MAX_PROPERTIES, EncodeError::TooManyProperties(count));
        let size = self.encoded_size();
        let size = i32::try_from(size).map_err(|_| EncodeError::FrameTooLarge(size))?;
        buf.put_i32(size);
        buf.put_i16(count as i16);
        for p in self.iter() {
            p.encode(buf)?;
        }
        Ok(())
    }
}

impl Decode for Meta {
    fn decode(src: &mut Bytes) -> Result<Self, DecodeError> {
        ensure!(src.remaining() >= META_PREFIX_LEN, DecodeError::InvalidLength);
        let size = src.get_i32();
        ensure!(size >= META_PREFIX_LEN as i32, DecodeError::InvalidLength);
        let count = src.get_i16() as i32;
        ensure!((0..=MAX_PROPERTIES as i32).contains(&count), DecodeError::InvalidPropertyCount(count));

        let declared = size as usize - META_PREFIX_LEN;
        let mut block = take(src, declared)?;
        let mut meta = Meta::new();
        for _ in 0..count {
            meta.insert(Property::decode(&mut block)?);
        }
        if block.has_remaining() {
            return Err(DecodeError::MetaSizeMismatch {
                declared: size as usize,
                consumed: size as usize - block.remaining(),
            });
        }
        Ok(meta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Meta {
        let mut meta = Meta::new();
        meta.set_id("7").set_topic("APP.A.B").set_reply_to("R.7").set_compress(true);
        meta.add("count", Value::I32(3))
            .add("ratio", Value::F64(0.25))
            .add("name", Value::String("bolt".into()))
            .add("raw", Value::Blob(Bytes::from_static(b"\x00\x01")))
            .add("ok", Value::Flag(true));
        meta
    }

    #[test]
    fn test_meta_round_trip() {
        let meta = sample();
        assert_eq!(meta.len(), 9);

        let mut buf = BytesMut::new();
        meta.encode(&mut buf).unwrap();
        assert_eq!(buf.len(), meta.encoded_size());
        assert_eq!(&buf[..4], &(meta.encoded_size() as i32).to_be_bytes());
        assert_eq!(&buf[4..6], &9i16.to_be_bytes());

        let decoded = Meta::decode(&mut buf.freeze()).unwrap();
        assert_eq!(decoded, meta);
        assert_eq!(decoded.topic(), Some(&ByteString::from_static("APP.A.B")));
        assert_eq!(decoded.get_i32("count"), Some(3));
        assert_eq!(decoded.get_str("name"), Some("bolt"));
        assert!(decoded.compress());
        assert!(decoded.corr_id().is_none());
    }

    #[test]
    fn test_last_write_wins() {
        let mut meta = Meta::new();
        meta.add("k", Value::I32(1)).add("k", Value::String("two".into()));
        assert_eq!(meta.len(), 1);
        assert_eq!(meta.get_str("k"), Some("two"));
        assert_eq!(meta.remove("k"), Some(Value::String("two".into())));
        assert!(meta.is_empty());
    }

    #[test]
    fn test_empty_meta() {
        let meta = Meta::new();
        let mut buf = BytesMut::new();
        meta.encode(&mut buf).unwrap();
        assert_eq!(&buf[..], &[0, 0, 0, 6, 0, 0]);
        assert!(Meta::decode(&mut buf.freeze()).unwrap().is_empty());
    }

    #[test]
    fn test_decode_rejects_bad_counts() {
        let mut raw = Bytes::from_static(&[0, 0, 0, 6, 0x27, 0x11]);
        assert!(matches!(Meta::decode(&mut raw), Err(DecodeError::InvalidPropertyCount(10_001))));

        let mut raw = Bytes::from_static(&[0, 0, 0, 6, 0xff, 0xff]);
        assert!(matches!(Meta::decode(&mut raw), Err(DecodeError::InvalidPropertyCount(-1))));
    }

    #[test]
    fn test_decode_rejects_size_mismatch() {
        let mut meta = Meta::new();
        meta.set_topic("A");
        let mut buf = BytesMut::new();
        meta.encode(&mut buf).unwrap();

        // declared size larger than what the properties consume
        let mut grown = BytesMut::new();
        grown.put_i32(buf.len() as i32 + 2);
        grown.extend_from_slice(&buf[4..]);
        grown.extend_from_slice(&[0, 0]);
        assert!(matches!(
            Meta::decode(&mut grown.freeze()),
            Err(DecodeError::MetaSizeMismatch { declared: 12, consumed: 10 })
        ));

        // declared size smaller than the properties need
        let mut shrunk = BytesMut::new();
        shrunk.put_i32(buf.len() as i32 - 1);
        shrunk.extend_from_slice(&buf[4..]);
        assert!(matches!(Meta::decode(&mut shrunk.freeze()), Err(DecodeError::InvalidLength)));
    }
}
