//! Error types for the offerdoc library.
//!
//! Two types reflect two levels of reporting:
//!
//! * [`OfferError`]: what went wrong. Every variant belongs to exactly one
//!   [`ErrorKind`], so callers can tell bad request data apart from a broken
//!   template setup, a failing external converter, or an unwritable disk.
//!
//! * [`PipelineError`]: where it went wrong. The generator wraps every
//!   per-request failure with the request id and the [`Stage`] that was
//!   active, which is what ends up in logs and in the CLI's exit message.

use crate::output::Stage;
use std::path::PathBuf;
use thiserror::Error;

/// Coarse classification of an [`OfferError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad or missing request data. Never touches the output directory.
    Validation,
    /// Broken template/fragment setup. Normally caught when the library loads.
    Configuration,
    /// External converter or rasteriser failure. The caller may retry.
    Conversion,
    /// I/O failure creating or writing working/output paths.
    Resource,
}

/// All errors produced while loading the content library or generating an offer.
#[derive(Debug, Error)]
pub enum OfferError {
    // ── Validation errors ─────────────────────────────────────────────────
    /// A placeholder the template marks as required has no value.
    #[error("Required placeholder '{name}' has no value in the request")]
    MissingRequiredPlaceholder { name: String },

    /// The request references a product fragment the library does not hold.
    #[error("Unknown product '{id}'\nAvailable products: {available}")]
    UnknownProduct { id: String, available: String },

    /// The request names a template family the library does not define.
    #[error("Unknown template family '{family}'")]
    UnknownTemplate { family: String },

    /// Any other malformed request field.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // ── Configuration errors ──────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The library manifest could not be read or parsed.
    #[error("Invalid library manifest '{path}': {detail}")]
    InvalidManifest { path: PathBuf, detail: String },

    /// The family's anchor does not name one of its skeleton fragments.
    #[error("Template family '{family}': anchor '{anchor}' is not one of its fragments")]
    AnchorNotFound { family: String, anchor: String },

    /// The family's anchor paragraph pattern matches nothing in the anchor fragment.
    #[error("Template family '{family}': no paragraph in '{anchor}' matches /{pattern}/")]
    AnchorParagraphNotFound {
        family: String,
        anchor: String,
        pattern: String,
    },

    /// A skeleton or product fragment could not be loaded.
    #[error("Failed to load fragment '{path}': {detail}")]
    FragmentLoad { path: PathBuf, detail: String },

    /// A document part is not the OOXML we expect.
    #[error("Malformed document: {0}")]
    MalformedDocument(String),

    // ── Conversion errors ─────────────────────────────────────────────────
    /// The external converter exited with a non-zero status.
    #[error("Converter '{program}' failed (exit code {exit_code:?}): {stderr}")]
    ConverterFailed {
        program: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    /// The external converter did not finish in time and was killed.
    #[error("Converter '{program}' timed out after {secs}s")]
    ConverterTimeout { program: String, secs: u64 },

    /// The external converter could not be started at all.
    #[error("Converter '{program}' is not available: {detail}")]
    ConverterUnavailable { program: String, detail: String },

    /// The converter cannot produce the requested format.
    #[error("Converter cannot produce '{format}' output")]
    UnsupportedConversion { format: String },

    /// A page of the fixed-layout document could not be rasterised.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    // ── Resource errors ───────────────────────────────────────────────────
    /// A filesystem operation on a working or output path failed.
    #[error("Failed to {op} '{path}': {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A background task panicked or was cancelled.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl OfferError {
    /// Shorthand for [`OfferError::Io`].
    pub fn io(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        OfferError::Io {
            op,
            path: path.into(),
            source,
        }
    }

    /// The kind this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            OfferError::MissingRequiredPlaceholder { .. }
            | OfferError::UnknownProduct { .. }
            | OfferError::UnknownTemplate { .. }
            | OfferError::InvalidRequest(_) => ErrorKind::Validation,

            OfferError::InvalidConfig(_)
            | OfferError::InvalidManifest { .. }
            | OfferError::AnchorNotFound { .. }
            | OfferError::AnchorParagraphNotFound { .. }
            | OfferError::FragmentLoad { .. }
            | OfferError::MalformedDocument(_) => ErrorKind::Configuration,

            OfferError::ConverterFailed { .. }
            | OfferError::ConverterTimeout { .. }
            | OfferError::ConverterUnavailable { .. }
            | OfferError::UnsupportedConversion { .. }
            | OfferError::RasterisationFailed { .. } => ErrorKind::Conversion,

            OfferError::Io { .. } | OfferError::Internal(_) => ErrorKind::Resource,
        }
    }

    /// Conversion failures may succeed on a second attempt; nothing else will.
    ///
    /// The pipeline itself never retries.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Conversion
    }
}

/// A per-request failure: the error plus the request id and stage it hit.
#[derive(Debug, Error)]
#[error("Request {request_id} failed while {stage}: {source}")]
pub struct PipelineError {
    pub request_id: String,
    pub stage: Stage,
    #[source]
    pub source: OfferError,
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        self.source.kind()
    }
}

pub type Result<T> = std::result::Result<T, OfferError>;
