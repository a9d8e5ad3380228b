use thiserror::Error;

/// Domain errors raised inside a stage's `process`. `AlreadyExists` and
/// `Unclassifiable` are benign terminal outcomes the owning stage swallows in
/// its error hook; everything else takes the worker's retry path.
#[derive(Error, Debug)]
pub enum ProcessingError {
    #[error("content validation failed: {0}")]
    Validation(String),
    #[error("content already exists: {0}")]
    AlreadyExists(String),
    #[error("content could not be classified: {0}")]
    Unclassifiable(String),
    #[error("error processing content: {0}")]
    Processing(String),
}

/// Recovers the domain error from the boxed error the worker kernel hands to
/// `handle_error`.
pub fn as_processing_error(error: &rabbitmq::ProcessorError) -> Option<&ProcessingError> {
    error.downcast_ref::<ProcessingError>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downcast_from_boxed_error() {
        let boxed: rabbitmq::ProcessorError =
            ProcessingError::AlreadyExists("https://example.com/a".to_string()).into();
        assert!(matches!(
            as_processing_error(&boxed),
            Some(ProcessingError::AlreadyExists(_))
        ));

        let foreign: rabbitmq::ProcessorError = "something else".to_string().into();
        assert!(as_processing_error(&foreign).is_none());
    }
}
