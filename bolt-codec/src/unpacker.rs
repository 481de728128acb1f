use bytes::BytesMut;

use crate::error::DecodeError;
use crate::header::Header;
use crate::message::Message;
use crate::types::HEADER_LEN;

#[derive(Debug)]
enum State {
    FrameHeader { buf: [u8; HEADER_LEN], filled: usize },
    Frame { header: Header, buf: BytesMut },
    Failed,
}

impl Default for State {
    fn default() -> Self {
        State::FrameHeader { buf: [0; HEADER_LEN], filled: 0 }
    }
}

/// Restartable frame parser fed with whatever chunks the socket yields.
///
/// Bytes are never lost between calls and frames are emitted in order. The
/// first error is final: the unpacker refuses all further input.
#[derive(Debug, Default)]
pub struct Unpacker {
    state: State,
    max_size: usize,
}

impl Unpacker {
    /// Create an `Unpacker` rejecting frames whose body exceeds `max_size`.
    ///
    /// If max size is `0`, size is unlimited.
    pub fn new(max_size: usize) -> Self {
        Unpacker { state: State::default(), max_size }
    }

    pub fn set_max_size(&mut self, max_size: usize) {
        self.max_size = max_size;
    }

    #[inline]
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    #[inline]
    pub fn is_failed(&self) -> bool {
        matches!(self.state, State::Failed)
    }

    /// Whether a partial frame is buffered.
    #[inline]
    pub fn is_partial(&self) -> bool {
        match &self.state {
            State::FrameHeader { filled, .. } => *filled > 0,
            State::Frame { .. } => true,
            State::Failed => false,
        }
    }

    /// Feeds `data`, calling `on_message` once per completed frame.
    ///
    /// Returns the number of frames emitted.
    pub fn unpack<F>(&mut self, data: &[u8], mut on_message: F) -> Result<usize, DecodeError>
    where
        F: FnMut(Message),
    {
        let mut data = data;
        let mut count = 0;
        loop {
            match &mut self.state {
                State::Failed => return Err(DecodeError::Failed),
                State::FrameHeader { buf, filled } => {
                    if data.is_empty() {
                        return Ok(count);
                    }
                    let n = (HEADER_LEN - *filled).min(data.len());
                    buf[*filled..*filled + n].copy_from_slice(&data[..n]);
                    *filled += n;
                    data = &data[n..];
                    if *filled < HEADER_LEN {
                        return Ok(count);
                    }
                    let raw = *buf;
                    let header = match self.check(&raw) {
                        Ok(header) => header,
                        Err(e) => {
                            self.state = State::Failed;
                            return Err(e);
                        }
                    };
                    let mut frame = BytesMut::with_capacity(header.frame_len());
                    frame.extend_from_slice(&raw);
                    self.state = State::Frame { header, buf: frame };
                }
                State::Frame { header, buf } => {
                    let n = (header.frame_len() - buf.len()).min(data.len());
                    buf.extend_from_slice(&data[..n]);
                    data = &data[n..];
                    if buf.len() < header.frame_len() {
                        return Ok(count);
                    }
                    let header = *header;
                    let frame = std::mem::take(buf).freeze();
                    self.state = State::default();
                    on_message(Message::from_frame(header, frame));
                    count += 1;
                }
            }
        }
    }

    fn check(&self, raw: &[u8; HEADER_LEN]) -> Result<Header, DecodeError> {
        let header = Header::parse(raw)?;
        if self.max_size != 0 && header.size() > self.max_size {
            return Err(DecodeError::MaxSizeExceeded { size: header.size(), max: self.max_size });
        }
        Ok(header)
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::meta::Meta;
    use crate::property::Value;
    use crate::types::MessageKind;

    fn stream() -> (Vec<Message>, Vec<u8>) {
        let mut meta = Meta::new();
        meta.set_topic("A.B").add("n", Value::I32(1));
        let msgs = vec![
            Message::empty(MessageKind::Welcome).unwrap(),
            Message::new(MessageKind::Publish, Some(meta), Some(Bytes::from(vec![7u8; 1000]))).unwrap(),
            Message::new(MessageKind::Echo, None, Some(Bytes::from_static(b"ping"))).unwrap(),
        ];
        let raw = msgs.iter().flat_map(|m| m.bytes().to_vec()).collect();
        (msgs, raw)
    }

    fn unpack_chunks(raw: &[u8], chunk: usize) -> Vec<Message> {
        let mut unpacker = Unpacker::new(0);
        let mut out = Vec::new();
        for c in raw.chunks(chunk) {
            unpacker.unpack(c, |m| out.push(m)).unwrap();
        }
        assert!(!unpacker.is_partial());
        out
    }

    #[test]
    fn test_single_chunk() {
        let (msgs, raw) = stream();
        let mut unpacker = Unpacker::new(0);
        let mut out = Vec::new();
        assert_eq!(unpacker.unpack(&raw, |m| out.push(m)).unwrap(), 3);
        assert_eq!(out, msgs);
        assert_eq!(out[1].meta().unwrap().and_then(|m| m.get_i32("n")), Some(1));
    }

    #[test]
    fn test_chunking_is_invisible() {
        let (msgs, raw) = stream();
        for chunk in [1, 3, 7, 8, 9, 512] {
            assert_eq!(unpack_chunks(&raw, chunk), msgs, "chunk size {}", chunk);
        }
    }

    #[test]
    fn test_partial_frame_waits() {
        let (_, raw) = stream();
        let mut unpacker = Unpacker::new(0);
        let mut out = Vec::new();
        assert_eq!(unpacker.unpack(&raw[..12], |m| out.push(m)).unwrap(), 1);
        assert!(unpacker.is_partial());
        assert_eq!(unpacker.unpack(&raw[12..], |m| out.push(m)).unwrap(), 2);
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn test_bad_sync_fails_for_good() {
        let mut unpacker = Unpacker::new(0);
        let res = unpacker.unpack(&[0, 0, 0, 0, 3, 0xAA, 0, 0], |_| {});
        assert!(matches!(res, Err(DecodeError::BadSync(0xAA))));
        assert!(unpacker.is_failed());

        let (_, raw) = stream();
        assert!(matches!(unpacker.unpack(&raw, |_| {}), Err(DecodeError::Failed)));
    }

    #[test]
    fn test_negative_size() {
        let mut unpacker = Unpacker::new(0);
        let res = unpacker.unpack(&[0x80, 0, 0, 0, 3, 0xB5, 0, 0], |_| {});
        assert!(matches!(res, Err(DecodeError::InvalidSize(_))));
    }

    #[test]
    fn test_max_size() {
        let mut unpacker = Unpacker::new(16);
        let mut out = Vec::new();
        let ok = Message::new(MessageKind::Echo, None, Some(Bytes::from(vec![1u8; 16]))).unwrap();
        unpacker.unpack(ok.bytes(), |m| out.push(m)).unwrap();
        assert_eq!(out.len(), 1);

        let big = Message::new(MessageKind::Echo, None, Some(Bytes::from(vec![1u8; 17]))).unwrap();
        let res = unpacker.unpack(big.bytes(), |m| out.push(m));
        assert!(matches!(res, Err(DecodeError::MaxSizeExceeded { size: 17, max: 16 })));
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_messages_before_corruption_are_delivered() {
        let (msgs, mut raw) = stream();
        raw.extend_from_slice(&[0, 0, 0, 0, 3, 0x00, 0, 0]);
        let mut unpacker = Unpacker::new(0);
        let mut out = Vec::new();
        assert!(unpacker.unpack(&raw, |m| out.push(m)).is_err());
        assert_eq!(out, msgs);
    }
}
