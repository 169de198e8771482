//! Error types for the watermark-batch crate.

/// Errors that can occur while compositing and exporting watermarked images.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A background or watermark image could not be decoded.
    #[error("failed to decode {what}: {source}")]
    Decode {
        /// Which input failed (for example `"watermark"` or `"source image 3"`).
        what: String,
        /// Underlying decoder error.
        #[source]
        source: image::ImageError,
    },

    /// The composited canvas could not be encoded.
    #[error("failed to encode output image: {0}")]
    Encode(#[source] image::ImageError),

    /// An I/O error occurred while reading inputs or delivering a result.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The image format is not supported.
    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),

    /// A job parameter is out of range.
    #[error("invalid job configuration: {0}")]
    InvalidConfig(String),

    /// A job configuration file could not be parsed.
    #[error("failed to parse job configuration: {0}")]
    Config(#[from] serde_json::Error),

    /// The compositing worker pool could not be created.
    #[error("failed to build worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),

    /// A single item stopped a fail-fast batch run.
    #[error("item {} failed: {source}", .index + 1)]
    ItemFailed {
        /// Zero-based index of the failing source image.
        index: usize,
        /// The error that item produced.
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub(crate) fn decode(what: impl Into<String>, source: image::ImageError) -> Self {
        Self::Decode {
            what: what.into(),
            source,
        }
    }
}

/// A specialized `Result` type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let io_err = Error::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert!(io_err.to_string().contains("gone"));

        let unsupported = Error::UnsupportedFormat("tiff".to_string());
        assert!(unsupported.to_string().contains("tiff"));

        let invalid = Error::InvalidConfig("quality 0.2 outside 0.5..=1.0".to_string());
        assert!(invalid.to_string().contains("quality 0.2"));
    }

    #[test]
    fn item_failed_reports_one_based_index() {
        let err = Error::ItemFailed {
            index: 6,
            source: Box::new(Error::InvalidConfig("boom".to_string())),
        };
        let msg = err.to_string();
        assert!(msg.starts_with("item 7 failed"));
        assert!(msg.contains("boom"));
    }

    #[test]
    fn decode_error_names_the_input() {
        let source = image::load_from_memory(b"not an image").unwrap_err();
        let err = Error::decode("watermark", source);
        assert!(err.to_string().contains("watermark"));
    }
}
