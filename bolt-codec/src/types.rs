use std::fmt;

/// Second byte of every header, used to detect a desynchronised stream
pub const SYNC: u8 = 0xB5;
pub const HEADER_LEN: usize = 8;
/// `i32` total size plus `i16` property count
pub const META_PREFIX_LEN: usize = 6;
pub const MAX_PROPERTIES: usize = 10_000;
pub const MAX_NAME_LEN: usize = 255;
/// Largest payload a LARGE (3-byte length) property can describe
pub const MAX_PROPERTY_SIZE: usize = 0xFF_FF_FF;
pub const MAX_FRAME_SIZE: usize = i32::MAX as usize;

pub const FLAG_META: u8 = 0b0000_0001;
pub const FLAG_BODY: u8 = 0b0000_0010;

pub const DEFAULT_PORT: u16 = 9100;

prim_enum! {
    /// Message type tag carried in the frame header
    pub enum MessageKind {
        Void = 0,
        /// Sent by the broker right after a connection is accepted
        Welcome = 1,
        Goodbye = 2,
        Echo = 3,
        Error = 4,
        Ack = 5,
        Negotiate = 10,
        Statistics = 11,
        Subscribe = 20,
        Unsubscribe = 21,
        Publish = 22,
        Request = 23,
        Reply = 24
    }
}

impl MessageKind {
    /// Kinds that are routed to subscribers by topic.
    #[inline]
    pub fn is_distributable(self) -> bool {
        matches!(self, MessageKind::Publish | MessageKind::Request | MessageKind::Reply)
    }

    #[inline]
    pub fn name(self) -> &'static str {
        match self {
            MessageKind::Void => "VOID",
            MessageKind::Welcome => "WELCOME",
            MessageKind::Goodbye => "GOODBYE",
            MessageKind::Echo => "ECHO",
            MessageKind::Error => "ERROR",
            MessageKind::Ack => "ACK",
            MessageKind::Negotiate => "NEGOTIATE",
            MessageKind::Statistics => "STATISTICS",
            MessageKind::Subscribe => "SUBSCRIBE",
            MessageKind::Unsubscribe => "UNSUBSCRIBE",
            MessageKind::Publish => "PUBLISH",
            MessageKind::Request => "REQUEST",
            MessageKind::Reply => "REPLY",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
