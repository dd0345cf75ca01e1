//! Error types for decoding and rendering.

/// Errors from the DICOM layer.
///
/// `InvalidFormat` and `NoRenderableData` describe the input, not the
/// system; callers report them as client errors.
#[derive(Debug, thiserror::Error)]
pub enum DicomError {
    #[error("Invalid DICOM: {0}")]
    InvalidFormat(String),
    #[error("No renderable pixel data: {0}")]
    NoRenderableData(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dicom_error_display() {
        let err = DicomError::InvalidFormat("missing DICM prefix".to_string());
        assert_eq!(err.to_string(), "Invalid DICOM: missing DICM prefix");

        let err = DicomError::NoRenderableData("no pixel data element".to_string());
        assert_eq!(
            err.to_string(),
            "No renderable pixel data: no pixel data element"
        );
    }

    #[test]
    fn test_dicom_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: DicomError = io_err.into();
        assert!(matches!(err, DicomError::Io(_)));
    }
}
