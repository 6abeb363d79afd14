//! JSON Lines output sink.
//!
//! # File Format
//!
//! UTF-8, one [`PostRecord`] object per line:
//! ```text
//! {"text":"hello","created_at":"2024-01-01T00:00:00Z","author":"alice.test","uri":"at://...","has_images":false,"reply_to":null}
//! ```
//!
//! The file is opened in append mode for every write and closed again, so
//! each saved post is on disk before the next event is read and an existing
//! file is never truncated.

use crate::{Error, Result};
use metrics::counter;
use skyscrape_core::PostRecord;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// Appends posts to a `.jsonl` file.
#[derive(Debug)]
pub struct JsonlSink {
    path: PathBuf,
    count: u64,
}

impl JsonlSink {
    /// Create a sink for `path`. The file is created on the first save.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            count: 0,
        }
    }

    /// Output file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of posts saved by this sink.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Append one post as a JSON line.
    ///
    /// The count only advances once the line has been written.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be opened or written.
    pub fn save(&mut self, post: &PostRecord) -> Result<u64> {
        let mut line = serde_json::to_vec(post)?;
        line.push(b'\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(&line)?;

        self.count += 1;
        counter!("posts_saved_total").increment(1);
        Ok(self.count)
    }

    /// Read every post back from a sink file.
    ///
    /// Blank lines are skipped.
    ///
    /// # Errors
    ///
    /// Fails on the first line that is not a valid post object.
    pub fn read_all(path: impl AsRef<Path>) -> Result<Vec<PostRecord>> {
        let reader = BufReader::new(File::open(path.as_ref())?);
        let mut posts = Vec::new();

        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let post = serde_json::from_str(&line).map_err(|e| {
                Error::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("line {}: {}", index + 1, e),
                ))
            })?;
            posts.push(post);
        }

        Ok(posts)
    }
}
