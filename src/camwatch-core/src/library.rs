//! File-level view of the videos directory

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::PathBuf;

use anyhow::{bail, Result};
use chrono::{DateTime, Local};
use tracing::{debug, info};

use camwatch_processing::{parse_clip_name, strip_extension, VideoFormat};

pub struct VideoLibrary {
    dir: PathBuf,
    formats: Vec<VideoFormat>,
}

impl VideoLibrary {
    pub fn new(dir: impl Into<PathBuf>, formats: Vec<VideoFormat>) -> Self {
        Self {
            dir: dir.into(),
            formats,
        }
    }

    pub fn dir(&self) -> &std::path::Path {
        &self.dir
    }

    /// Clip files of one format with their creation time, newest first.
    /// Files whose name does not parse sort last, by name.
    fn entries(&self, format: VideoFormat) -> Result<Vec<(String, Option<DateTime<Local>>)>> {
        let read = match fs::read_dir(&self.dir) {
            Ok(read) => read,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        for entry in read {
            let entry = entry?;
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if !matches!(strip_extension(&name), Some((_, f)) if f == format) {
                continue;
            }
            let created = parse_clip_name(&name).ok().map(|c| c.created);
            entries.push((name, created));
        }

        entries.sort_by(|a, b| match (&a.1, &b.1) {
            (Some(x), Some(y)) => y.cmp(x).then_with(|| a.0.cmp(&b.0)),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => a.0.cmp(&b.0),
        });
        Ok(entries)
    }

    /// Filenames of one format, newest first
    pub fn list_filenames(&self, format: VideoFormat) -> Result<Vec<String>> {
        Ok(self.entries(format)?.into_iter().map(|(name, _)| name).collect())
    }

    /// Filenames grouped by creation date (`YYYY-MM-DD`), newest first
    /// within each day. Unparsable names are left out.
    pub fn filenames_by_date(&self, format: VideoFormat) -> Result<BTreeMap<String, Vec<String>>> {
        let mut by_date: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (name, created) in self.entries(format)? {
            if let Some(created) = created {
                by_date
                    .entry(created.format("%Y-%m-%d").to_string())
                    .or_default()
                    .push(name);
            }
        }
        Ok(by_date)
    }

    /// Delete every configured format of a clip. `name` may be the bare
    /// stem or any of its filenames. Returns the filenames removed.
    pub fn delete_video(&self, name: &str) -> Result<Vec<String>> {
        let stem = strip_extension(name).map(|(stem, _)| stem).unwrap_or(name);
        if stem.is_empty() || stem.contains(['/', '\\']) || stem == "." || stem == ".." {
            bail!("invalid video name: {}", name);
        }

        let mut removed = Vec::new();
        for format in &self.formats {
            let filename = format!("{}.{}", stem, format.extension());
            match fs::remove_file(self.dir.join(&filename)) {
                Ok(()) => {
                    debug!("deleted {}", filename);
                    removed.push(filename);
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        if removed.is_empty() {
            bail!("no video named {}", stem);
        }
        info!("deleted {} file(s) for {}", removed.len(), stem);
        Ok(removed)
    }
}
