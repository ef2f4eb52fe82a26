// crates/mediaport-ffmpeg/src/error.rs

use ffmpeg_the_third as ffmpeg;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("required property not set: {0}")]
    MissingProperty(&'static str),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("the owning source has been closed or dropped")]
    SourceGone,

    #[error("the owning sink has been closed or dropped")]
    SinkGone,

    #[error("stream is finalised; no further writes are accepted")]
    Finalised,

    #[error("encoder setup failed previously; stream is unusable")]
    EncoderFailed,

    #[error(transparent)]
    Backend(#[from] ffmpeg::Error),
}

pub type Result<T> = std::result::Result<T, MediaError>;
