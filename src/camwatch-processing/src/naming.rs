//! Clip file naming: `<channel>__<YYYY-MM-DDTHH-MM-SS>.<ext>`
//!
//! The timestamp is the local wall-clock time of the clip's first frame,
//! whole seconds only. It carries no UTC offset, so the name does not
//! round-trip during a DST fall-back hour: a clip created in the second
//! occurrence of that hour parses back to the first, one hour earlier.
//! Ordering by filename can also interleave the two occurrences.

use chrono::{DateTime, Local, NaiveDateTime, TimeZone};

use camwatch_capture::FILENAME_DELIM;

use crate::encoder::VideoFormat;
use crate::error::ProcessingError;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H-%M-%S";

/// Channel and creation time recovered from a clip filename
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipName {
    pub channel: String,
    pub created: DateTime<Local>,
}

/// Filename without extension for a clip of `channel` created at `created`
pub fn clip_stem(channel: &str, created: &DateTime<Local>) -> String {
    format!(
        "{}{}{}",
        channel,
        FILENAME_DELIM,
        created.format(TIMESTAMP_FORMAT)
    )
}

/// Strip a known video extension, returning the stem and the format
pub fn strip_extension(filename: &str) -> Option<(&str, VideoFormat)> {
    let (stem, ext) = filename.rsplit_once('.')?;
    let format = VideoFormat::from_extension(ext)?;
    Some((stem, format))
}

/// Parse `<channel>__<timestamp>.<ext>`.
///
/// The timestamp is taken after the last delimiter, so channel names are
/// recovered intact even though the timestamp itself contains separators.
pub fn parse_clip_name(filename: &str) -> Result<ClipName, ProcessingError> {
    let invalid = || ProcessingError::InvalidFilename(filename.to_string());

    let (stem, _) = strip_extension(filename).ok_or_else(invalid)?;
    let (channel, stamp) = stem.rsplit_once(FILENAME_DELIM).ok_or_else(invalid)?;
    if channel.is_empty() {
        return Err(invalid());
    }

    let naive = NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).map_err(|_| invalid())?;
    // Ambiguous local times (DST fold) resolve to the earlier instant
    let created = Local
        .from_local_datetime(&naive)
        .earliest()
        .ok_or_else(invalid)?;

    Ok(ClipName {
        channel: channel.to_string(),
        created,
    })
}
