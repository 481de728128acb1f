#![deny(unsafe_code)]

//! Wire codec of the bolt message broker
//!
//! ## Frame Layout:
//! - **Header**: fixed 8 bytes carrying body size, type tag, sync byte `0xB5` and presence flags
//! - **Meta**: optional self-describing property list (`i32` size, `i16` count, properties)
//! - **Body**: optional opaque bytes filling the rest of the frame
//!
//! ## Components:
//! - [`Message`]: an immutable encoded frame with lazily decoded meta and body
//! - [`Meta`] / [`Property`]: typed, optionally named metadata
//! - [`Unpacker`]: incremental parser reassembling frames from arbitrary chunks
//!
//! ```
//! use bolt_codec::{Message, MessageKind, Meta, Unpacker};
//!
//! let mut meta = Meta::new();
//! meta.set_topic("NEWS.TODAY");
//! let msg = Message::with_meta(MessageKind::Publish, meta).unwrap();
//!
//! let mut unpacker = Unpacker::new(1024);
//! let mut received = Vec::new();
//! unpacker.unpack(msg.bytes(), |m| received.push(m)).unwrap();
//! assert_eq!(received[0].topic().unwrap().map(|t| t.to_string()), Some("NEWS.TODAY".into()));
//! ```

#[macro_use]
mod utils;

/// Error types for encoding/decoding operations
pub mod error;

/// Shared constants and the message type tag
pub mod types;

mod header;
mod message;
mod meta;
mod property;
mod unpacker;

pub use error::{DecodeError, EncodeError};
pub use header::Header;
pub use message::Message;
pub use meta::Meta;
pub use property::{Property, PropertyType, SizeMode, Value};
pub use types::MessageKind;
pub use unpacker::Unpacker;
pub use utils::{Decode, Encode};
