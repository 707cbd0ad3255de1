use std::path::PathBuf;
use thiserror::Error;

/// Structured error types for the leaf segmentation service.
///
/// Each variant carries the context of the stage that failed.
#[derive(Error, Debug)]
pub enum LeafSegError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Filesystem error: {operation} failed for {path:?}")]
    FileSystem {
        path: PathBuf,
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to decode image: {reason}")]
    Decode { reason: String },

    #[error("Image processing error: {operation} failed (file: {path})")]
    ImageProcessing {
        path: String,
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Model error: {operation} failed")]
    Model {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Validation error: {field} {reason}")]
    Validation { field: String, reason: String },
}

pub type Result<T> = std::result::Result<T, LeafSegError>;

impl LeafSegError {
    pub(crate) fn model(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        let reason: String = reason.into();
        Self::Model {
            operation: operation.into(),
            source: reason.into(),
        }
    }

    pub(crate) fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Whether the failure was caused by the caller's input rather than the service.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Decode { .. } | Self::Validation { .. })
    }
}

/// Convert I/O errors to filesystem errors.
///
/// Code that knows the path and operation should build
/// `LeafSegError::FileSystem` directly; this is the fallback.
impl From<std::io::Error> for LeafSegError {
    fn from(err: std::io::Error) -> Self {
        Self::FileSystem {
            path: PathBuf::from("unknown"),
            operation: "unknown".to_string(),
            source: err,
        }
    }
}

impl From<image::ImageError> for LeafSegError {
    fn from(err: image::ImageError) -> Self {
        Self::ImageProcessing {
            path: "unknown".to_string(),
            operation: "image processing".to_string(),
            source: Box::new(err),
        }
    }
}

impl From<ort::Error> for LeafSegError {
    fn from(err: ort::Error) -> Self {
        Self::Model {
            operation: "ort operation".to_string(),
            source: Box::new(err),
        }
    }
}

/// Shape errors come out of tensor reshaping around inference, so they are
/// reported as model errors.
impl From<ndarray::ShapeError> for LeafSegError {
    fn from(err: ndarray::ShapeError) -> Self {
        Self::Model {
            operation: "tensor shape conversion".to_string(),
            source: Box::new(err),
        }
    }
}

#[cfg(feature = "opencv")]
impl From<opencv::Error> for LeafSegError {
    fn from(err: opencv::Error) -> Self {
        Self::ImageProcessing {
            path: "<memory>".to_string(),
            operation: "opencv".to_string(),
            source: Box::new(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_errors_are_client_errors() {
        let err = LeafSegError::Decode {
            reason: "bad padding".to_string(),
        };
        assert!(err.is_client_error());
        assert_eq!(err.to_string(), "Failed to decode image: bad padding");
    }

    #[test]
    fn model_errors_are_server_errors() {
        let err = LeafSegError::model("inference", "session poisoned");
        assert!(!err.is_client_error());
        assert_eq!(err.to_string(), "Model error: inference failed");
    }
}
