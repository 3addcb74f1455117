// src/error.rs
use thiserror::Error;

/// Failure to turn a file or URL into bytes. Fatal to the request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AcquireError {
    #[error("font source is empty")]
    EmptyPayload,

    #[error("invalid font URL: {url:?}")]
    InvalidUrl { url: String },

    #[error("font request failed: {status} {status_text}")]
    Http { status: u16, status_text: String },

    #[error("network error: {message}")]
    Network { message: String },

    #[error("font file unreadable: {message}")]
    Unreadable { message: String },

    #[error("unsupported font format: {extension}")]
    UnsupportedFormat { extension: String },
}

/// Failure in the base64 / data URI layer. Fatal to the request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("cannot encode an empty font buffer")]
    EmptyInput,

    #[error("malformed data URI: {reason}")]
    MalformedDataUri { reason: String },

    #[error("invalid base64 payload: {message}")]
    InvalidBase64 { message: String },
}

/// Failure reported by a platform surface. Logged, never propagated to callers of `acquire`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SurfaceError {
    #[error("DOM operation failed: {0}")]
    Dom(String),

    #[error("font face load rejected for {family}: {message}")]
    FaceLoad { family: String, message: String },

    #[error("verification sandbox unavailable: {0}")]
    Sandbox(String),

    #[error("raster comparison failed: {0}")]
    Raster(String),
}

/// Errors surfaced by the load cache.
///
/// `Clone` because one in-flight result is handed to every waiter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FontError {
    #[error("font acquisition failed for {source_name}: {source}")]
    Acquisition {
        source_name: String,
        #[source]
        source: AcquireError,
    },

    #[error("font encoding failed: {0}")]
    Encoding(#[from] EncodeError),

    #[error("font {family} was released while loading")]
    Released { family: String },

    #[error("unknown font family: {family}")]
    UnknownFamily { family: String },
}

impl FontError {
    pub fn is_acquisition(&self) -> bool {
        matches!(self, FontError::Acquisition { .. })
    }
}

pub type FontResult<T> = Result<T, FontError>;
