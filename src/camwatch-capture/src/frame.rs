//! Encoded frames and channel identifiers

use std::fmt;
use std::time::Instant;

use crate::error::CaptureError;

/// Separator between the channel name and the timestamp in clip filenames.
/// Never valid inside a channel name.
pub const FILENAME_DELIM: &str = "__";

/// Maximum channel name length in characters
const MAX_CHANNEL_LEN: usize = 100;

/// Name of one camera channel
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(String);

impl ChannelId {
    /// Validate a channel name.
    ///
    /// Channel names end up as the first field of clip filenames, so they
    /// must not contain the filename delimiter, path separators or control
    /// characters.
    pub fn new(name: impl Into<String>) -> Result<Self, CaptureError> {
        let name = name.into();

        if name.is_empty() || name.trim() != name {
            return Err(CaptureError::InvalidChannel(name));
        }
        if name.chars().count() > MAX_CHANNEL_LEN {
            return Err(CaptureError::InvalidChannel(name));
        }
        if name.contains(FILENAME_DELIM) || name == "." || name == ".." {
            return Err(CaptureError::InvalidChannel(name));
        }
        let bad_char = name.chars().any(|c| {
            matches!(c, '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|') || c.is_control()
        });
        if bad_char {
            return Err(CaptureError::InvalidChannel(name));
        }

        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ChannelId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// One encoded camera frame as delivered by the transport
#[derive(Debug, Clone)]
pub struct Frame {
    pub channel: ChannelId,
    /// Encoded image bytes (JPEG, PNG, ...)
    pub data: Vec<u8>,
    /// Monotonic arrival time
    pub arrived_at: Instant,
}

impl Frame {
    pub fn new(channel: ChannelId, data: Vec<u8>, arrived_at: Instant) -> Self {
        Self {
            channel,
            data,
            arrived_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_id_accepts_plain_names() {
        assert_eq!(ChannelId::new("front-door").unwrap().as_str(), "front-door");
        assert_eq!(ChannelId::new("garage_1").unwrap().to_string(), "garage_1");
        assert!(ChannelId::new("Back Yard").is_ok());
    }

    #[test]
    fn test_channel_id_rejects_delimiter_and_paths() {
        assert!(ChannelId::new("").is_err());
        assert!(ChannelId::new("cam__2").is_err());
        assert!(ChannelId::new("a/b").is_err());
        assert!(ChannelId::new("..").is_err());
        assert!(ChannelId::new(" padded").is_err());
        assert!(ChannelId::new("tab\there").is_err());
        assert!(ChannelId::new("x".repeat(101)).is_err());
    }
}
