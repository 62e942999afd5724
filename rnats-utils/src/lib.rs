//! Utilities shared by the rnats crates
//!
//! ## Core Features:
//! - **Byte Size Handling**: Human-readable byte size parsing/formatting with [`Bytesize`]
//! - **Duration Conversion**: String-to-Duration parsing supporting multiple time units
//! - **Counter Implementation**: Lock-free resettable counter ([`Counter`])
//! - **Serde Helpers**: Deserializers for durations and optional limits
//!
//! ```
//! use rnats_utils::{to_bytesize, to_duration, Bytesize};
//!
//! assert_eq!(Bytesize::from("8M").as_usize(), 8 * 1024 * 1024);
//! assert_eq!(to_bytesize("1K512B"), 1536);
//! assert_eq!(to_duration("250ms").as_millis(), 250);
//! ```

#![deny(unsafe_code)]

use std::fmt;
use std::ops::Deref;
use std::time::Duration;

use serde::de::{self, Deserializer};
use serde::{ser::Serializer, Deserialize, Serialize};

mod counter;

pub use counter::Counter;

const BYTESIZE_K: usize = 1024;
const BYTESIZE_M: usize = 1048576;
const BYTESIZE_G: usize = 1073741824;

/// Human-readable byte size, e.g. `"64M"` or `"1G512M"`
///
/// ```
/// let size = rnats_utils::Bytesize::from("2G512M");
/// assert_eq!(size.as_usize(), 2_684_354_560);
/// assert_eq!(rnats_utils::Bytesize::from(1024).string(), "1K");
/// ```
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct Bytesize(pub usize);

impl Bytesize {
    #[inline]
    pub fn as_usize(&self) -> usize {
        self.0
    }

    #[inline]
    pub fn as_u64(&self) -> u64 {
        self.0 as u64
    }

    /// Format bytesize to human-readable string
    pub fn string(&self) -> String {
        let mut v = self.0;
        let mut res = String::new();
        for (unit, name) in [(BYTESIZE_G, 'G'), (BYTESIZE_M, 'M'), (BYTESIZE_K, 'K')] {
            let n = v / unit;
            if n > 0 {
                res.push_str(&format!("{}{}", n, name));
                v %= unit;
            }
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
        Ok(Bytesize(to_bytesize(&String::deserialize(deserializer)?)))
    }
}

/// Parse human-readable byte size string to usize
///
/// A bare number is taken as bytes. Unparsable parts count as zero.
///
/// ```
/// assert_eq!(rnats_utils::to_bytesize("2G512K"), 2148007936);
/// assert_eq!(rnats_utils::to_bytesize("8mb"), 8388608);
/// assert_eq!(rnats_utils::to_bytesize("4096"), 4096);
/// ```
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

/// Convert human-readable duration string to Duration
///
/// # Supported units:
/// - ms: milliseconds
/// - s: seconds
/// - m: minutes
/// - h: hours
/// - d: days
///
/// Text that does not parse maps to zero, see [`parse_duration`] for the
/// checked variant.
///
/// ```
/// assert_eq!(rnats_utils::to_duration("1h30m15s").as_secs(), 5415);
/// assert_eq!(rnats_utils::to_duration("1s500ms").as_millis(), 1500);
/// ```
#[inline]
pub fn to_duration(text: &str) -> Duration {
    parse_duration(text).unwrap_or(Duration::ZERO)
}

/// Parse a human-readable duration, `None` on an unknown unit, a missing
/// number or overflow. A bare `0` is accepted without unit.
///
/// ```
/// use std::time::Duration;
///
/// assert_eq!(rnats_utils::parse_duration("2m30s"), Some(Duration::from_secs(150)));
/// assert_eq!(rnats_utils::parse_duration("5x"), None);
/// ```
pub fn parse_duration(text: &str) -> Option<Duration> {
    // `Y` stands in for `ms` so every unit is a single char
    let text = text.trim().to_lowercase().replace("ms", "Y");
    if text == "0" {
        return Some(Duration::ZERO);
    }
    if text.is_empty() {
        return None;
    }
    let mut ms: u64 = 0;
    for part in text.split_inclusive(['s', 'm', 'h', 'd', 'Y']) {
        let mut chars = part.chars();
        let unit = match chars.nth_back(0)? {
            'Y' => 1,
            's' => 1000,
            'm' => 60_000,
            'h' => 3_600_000,
            'd' => 86_400_000,
            _ => return None,
        };
        let v = chars.as_str().parse::<u64>().ok()?;
        ms = ms.checked_add(v.checked_mul(unit)?)?;
    }
    Some(Duration::from_millis(ms))
}

/// Deserialize Duration from human-readable string format; empty text is zero
#[inline]
pub fn deserialize_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let v = String::deserialize(deserializer)?;
    if v.trim().is_empty() {
        return Ok(Duration::ZERO);
    }
    parse_duration(&v).ok_or_else(|| de::Error::custom(format!("invalid duration {:?}", v)))
}

/// Deserialize an optional byte size; empty, `unlimited` and `none` map to `None`
#[inline]
pub fn deserialize_bytesize_option<'de, D>(deserializer: D) -> std::result::Result<Option<usize>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = String::deserialize(deserializer)?;
    Ok(match v.trim().to_ascii_lowercase().as_str() {
        "" | "unlimited" | "none" => None,
        v => Some(to_bytesize(v)),
    })
}
