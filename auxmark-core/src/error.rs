use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Document discovery failed: {0}")]
    Discovery(String),

    #[error("No markdown documents to process")]
    NoDocuments,

    #[error("No detectors enabled")]
    NoDetectors,

    #[error("Detector already registered: {0}")]
    DuplicateDetector(String),

    #[error("Document is already a bundle: {0}")]
    AlreadyBundle(String),

    #[error("Run interrupted")]
    Interrupted,

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
