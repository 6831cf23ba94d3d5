//! Error kinds for the engine.
//!
//! `InvalidArgument`, `UnsupportedImageFormat` and `MalformedModel` are
//! ordinary caller errors. `SizeMismatch` signals a broken internal
//! invariant between channels or layers; once inference has started the
//! only error a caller should ever see is `Cancelled`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("unsupported image format: {0}")]
    UnsupportedImageFormat(String),

    #[error("malformed model: {0}")]
    MalformedModel(String),

    #[error("size mismatch: {0}")]
    SizeMismatch(String),

    #[error("cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, Error>;
