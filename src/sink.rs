//! Delivery of finished images.
//!
//! A [`ResultSink`] is the one consumer of every [`CompositeResult`]. The
//! result is moved in, so its encoded buffer is released as soon as the sink
//! is done with it, whether delivery succeeded or not.

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::pipeline::CompositeResult;

/// Receives finished images from the batch pipeline.
pub trait ResultSink {
    /// Take ownership of one result.
    ///
    /// # Errors
    ///
    /// Returns an error if the result could not be delivered; the pipeline
    /// treats this like a failed item.
    fn deliver(&mut self, result: CompositeResult) -> Result<()>;
}

/// Writes each result into a directory under its suggested filename.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
    written: Vec<PathBuf>,
}

impl DirectorySink {
    /// Sink writing into `dir`, created on first delivery if missing.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            written: Vec::new(),
        }
    }

    /// Output directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Files written so far, in delivery order.
    #[must_use]
    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }
}

impl ResultSink for DirectorySink {
    fn deliver(&mut self, result: CompositeResult) -> Result<()> {
        if !self.dir.exists() {
            std::fs::create_dir_all(&self.dir)?;
        }
        let path = self.dir.join(&result.suggested_filename);
        std::fs::write(&path, result.image.as_bytes())?;
        tracing::debug!(path = %path.display(), bytes = result.image.len(), "wrote result");
        self.written.push(path);
        Ok(())
    }
}

/// Keeps results in memory, in delivery order.
#[derive(Debug, Default)]
pub struct MemorySink {
    results: Vec<CompositeResult>,
}

impl MemorySink {
    /// Empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Results delivered so far.
    #[must_use]
    pub fn results(&self) -> &[CompositeResult] {
        &self.results
    }

    /// Take all delivered results.
    #[must_use]
    pub fn into_results(self) -> Vec<CompositeResult> {
        self.results
    }
}

impl ResultSink for MemorySink {
    fn deliver(&mut self, result: CompositeResult) -> Result<()> {
        self.results.push(result);
        Ok(())
    }
}
