use thiserror::Error;

#[derive(Error, Debug)]
pub enum OptimizerError {
    #[error("Unsupported image format: {0}")]
    UnsupportedFormat(String),

    #[error("Image decoding error: {0}")]
    Decode(#[from] image::ImageError),

    #[error("Encoding error: {0}")]
    Encode(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Content not found: {0}")]
    NotFound(String),

    #[error("Store IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store backend error: {0}")]
    Backend(String),
}

impl OptimizerError {
    /// Short machine-readable kind, used in logs and the admin API.
    pub fn kind(&self) -> &'static str {
        match self {
            OptimizerError::UnsupportedFormat(_) => "unsupported_format",
            OptimizerError::Decode(_) => "decode_error",
            OptimizerError::Encode(_) => "encode_error",
            OptimizerError::Store(_) => "store_error",
            OptimizerError::Io(_) => "io_error",
        }
    }
}
