//! Utilities shared by the bolt crates
//!
//! ## Core Features:
//! - **Byte Size Handling**: Human-readable byte size parsing/formatting with [`Bytesize`]
//! - **Duration Conversion**: String-to-Duration parsing supporting multiple time units
//! - **Timestamp Utilities**: Millisecond timestamps
//! - **Counter Implementation**: Thread-safe counter tracking current and peak values ([`Counter`])
//!
//! ```
//! use bolt_utils::{Bytesize, to_duration};
//!
//! let size = Bytesize::from("10M");
//! assert_eq!(size.as_usize(), 10 * 1024 * 1024);
//!
//! let timeout = to_duration("1s500ms");
//! assert_eq!(timeout.as_millis(), 1500);
//! ```

#![deny(unsafe_code)]

use std::fmt;
use std::ops::Deref;
use std::time::Duration;

use serde::{
    de::{self, Deserializer},
    ser::Serializer,
    Deserialize, Serialize,
};

mod counter;

pub use counter::Counter;

/// Timestamp representation in milliseconds since Unix epoch
pub type TimestampMillis = i64;

const BYTESIZE_K: usize = 1024;
const BYTESIZE_M: usize = 1048576;
const BYTESIZE_G: usize = 1073741824;

/// Human-readable byte size representation with parsing/serialization support
///
/// # Example:
/// ```
/// use bolt_utils::Bytesize;
///
/// let size = Bytesize::from("100K");
/// assert_eq!(size.as_usize(), 102_400);
///
/// let size = Bytesize::from(1024);
/// assert_eq!(size.string(), "1K");
/// ```
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct Bytesize(pub usize);

impl Bytesize {
    #[inline]
    pub fn as_usize(&self) -> usize {
        self.0
    }

    /// Format bytesize to human-readable string
    ///
    /// # Example:
    /// ```
    /// let mixed = bolt_utils::Bytesize(2148532224);
    /// assert_eq!(mixed.string(), "2G1M");
    /// ```
    #[inline]
    pub fn string(&self) -> String {
        let mut v = self.0;
        let mut res = String::new();

        let g = v / BYTESIZE_G;
        if g > 0 {
            res.push_str(&format!("{}G", g));
            v %= BYTESIZE_G;
        }

        let m = v / BYTESIZE_M;
        if m > 0 {
            res.push_str(&format!("{}M", m));
            v %= BYTESIZE_M;
        }

        let k = v / BYTESIZE_K;
        if k > 0 {
            res.push_str(&format!("{}K", k));
            v %= BYTESIZE_K;
        }

        if v > 0 || res.is_empty() {
            res.push_str(&format!("{}B", v));
        }

        res
    }
}

impl Deref for Bytesize {
    type Target = usize;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<usize> for Bytesize {
    fn from(v: usize) -> Self {
        Bytesize(v)
    }
}

impl From<&str> for Bytesize {
    fn from(v: &str) -> Self {
        Bytesize(to_bytesize(v))
    }
}

impl std::str::FromStr for Bytesize {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let v = to_bytesize(s);
        if v == 0 && !s.trim_start_matches('0').trim_end_matches(['B', 'b']).is_empty() {
            return Err(anyhow::anyhow!("invalid byte size `{}`", s));
        }
        Ok(Bytesize(v))
    }
}

impl fmt::Debug for Bytesize {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.string())
    }
}

impl fmt::Display for Bytesize {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.string())
    }
}

impl Serialize for Bytesize {
    #[inline]
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.string())
    }
}

impl<'de> Deserialize<'de> for Bytesize {
    #[inline]
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct BytesizeVisitor;

        impl de::Visitor<'_> for BytesizeVisitor {
            type Value = Bytesize;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a byte size such as `100K` or an integer")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Bytesize, E> {
                Ok(Bytesize(v as usize))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Bytesize, E> {
                usize::try_from(v).map(Bytesize).map_err(E::custom)
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Bytesize, E> {
                Ok(Bytesize(to_bytesize(v)))
            }
        }

        deserializer.deserialize_any(BytesizeVisitor)
    }
}

/// Parse human-readable byte size string to usize
///
/// # Example:
/// ```
/// let bytes = bolt_utils::to_bytesize("2G512K");
/// assert_eq!(bytes, 2148007936);
///
/// assert_eq!(bolt_utils::to_bytesize("4096"), 4096);
/// ```
#[inline]
pub fn to_bytesize(text: &str) -> usize {
    let text = text.trim().to_uppercase().replace("GB", "G").replace("MB", "M").replace("KB", "K");
    if let Ok(v) = text.parse::<usize>() {
        return v;
    }
    text.split_inclusive(['G', 'M', 'K', 'B'])
        .map(|x| {
            let mut chars = x.chars();
            let u = match chars.nth_back(0) {
                None => return 0,
                Some(u) => u,
            };
            let v = match chars.as_str().parse::<usize>() {
                Err(_e) => return 0,
                Ok(v) => v,
            };
            match u {
                'B' => v,
                'K' => v * BYTESIZE_K,
                'M' => v * BYTESIZE_M,
                'G' => v * BYTESIZE_G,
                _ => 0,
            }
        })
        .sum()
}

/// Deserialize Duration from human-readable string format
#[inline]
pub fn deserialize_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let v = String::deserialize(deserializer)?;
    Ok(to_duration(&v))
}

/// Convert human-readable duration string to Duration
///
/// # Supported units:
/// - ms: milliseconds
/// - s: seconds
/// - m: minutes
/// - h: hours
/// - d: days
///
/// A bare number is read as milliseconds.
///
/// # Example:
/// ```
/// let duration = bolt_utils::to_duration("1h30m15s");
/// assert_eq!(duration.as_secs(), 5415);
///
/// assert_eq!(bolt_utils::to_duration("250").as_millis(), 250);
/// ```
#[inline]
pub fn to_duration(text: &str) -> Duration {
    let text = text.trim().to_lowercase();
    if let Ok(ms) = text.parse::<u64>() {
        return Duration::from_millis(ms);
    }
    let text = text.replace("ms", "Y");
    let ms: u64 = text
        .split_inclusive(['s', 'm', 'h', 'd', 'Y'])
        .map(|x| {
            let mut chars = x.chars();
            let u = match chars.nth_back(0) {
                None => return 0,
                Some(u) => u,
            };
            let v = match chars.as_str().parse::<u64>() {
                Err(_e) => return 0,
                Ok(v) => v,
            };
            match u {
                'Y' => v,
                's' => v * 1000,
                'm' => v * 60000,
                'h' => v * 3600000,
                'd' => v * 86400000,
                _ => 0,
            }
        })
        .sum();
    Duration::from_millis(ms)
}

/// Get current timestamp in milliseconds
#[inline]
pub fn timestamp_millis() -> TimestampMillis {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|t| t.as_millis() as i64)
        .unwrap_or_else(|_| chrono::Local::now().timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytesize() {
        assert_eq!(to_bytesize("10M"), 10 * 1024 * 1024);
        assert_eq!(to_bytesize("100kb"), 100 * 1024);
        assert_eq!(to_bytesize("1G1K"), BYTESIZE_G + BYTESIZE_K);
        assert_eq!(to_bytesize("65536"), 65536);
        assert_eq!(Bytesize(3 * BYTESIZE_M + 12).string(), "3M12B");
        assert_eq!(Bytesize(0).string(), "0B");
        assert!("12Q".parse::<Bytesize>().is_err());
        assert_eq!("64K".parse::<Bytesize>().unwrap(), Bytesize(65536));
    }

    #[test]
    fn test_duration() {
        assert_eq!(to_duration("100ms"), Duration::from_millis(100));
        assert_eq!(to_duration("5s"), Duration::from_secs(5));
        assert_eq!(to_duration("1m30s"), Duration::from_secs(90));
        assert_eq!(to_duration("10"), Duration::from_millis(10));
        assert_eq!(to_duration("bogus"), Duration::ZERO);
    }
}
