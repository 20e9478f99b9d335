//! Output types: the per-request stage machine and the final artifact descriptor.

use crate::request::OutputFormat;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// Where a request is in the pipeline.
///
/// ```text
/// validated → assembling → assembled → converting → converted → finalized
///      └───────────┴────────────┴───────────┴────────────┴──→ failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Validated,
    Assembling,
    Assembled,
    Converting,
    Converted,
    Finalized,
    Failed,
}

impl Stage {
    /// `finalized` and `failed` accept no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Finalized | Stage::Failed)
    }

    /// The single forward successor, if any.
    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::Validated => Some(Stage::Assembling),
            Stage::Assembling => Some(Stage::Assembled),
            Stage::Assembled => Some(Stage::Converting),
            Stage::Converting => Some(Stage::Converted),
            Stage::Converted => Some(Stage::Finalized),
            Stage::Finalized | Stage::Failed => None,
        }
    }

    /// Whether `self → to` is a legal transition.
    pub fn can_transition_to(self, to: Stage) -> bool {
        if self.is_terminal() {
            return false;
        }
        to == Stage::Failed || self.next() == Some(to)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Validated => "validated",
            Stage::Assembling => "assembling",
            Stage::Assembled => "assembled",
            Stage::Converting => "converting",
            Stage::Converted => "converted",
            Stage::Finalized => "finalized",
            Stage::Failed => "failed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The finalized deliverable of one request.
///
/// Everything referenced here lives under `output_dir` and is never
/// modified again by the pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct OutputArtifact {
    /// Request identifier; also the name of `output_dir`.
    pub request_id: String,

    /// Format the caller asked for.
    pub format: OutputFormat,

    /// `<output-root>/<request-id>`.
    pub output_dir: PathBuf,

    /// The main file: the `.docx` / `.pdf`, or the first page image for image sets.
    pub primary_path: PathBuf,

    /// Size of the primary file, or of all page images for image sets.
    pub byte_size: u64,

    /// Number of page images written, when any were produced.
    pub page_count: Option<usize>,

    /// Page images in page order (`page_1`, `page_2`, …). Empty when none were produced.
    pub page_images: Vec<PathBuf>,

    /// Folder holding `page_images`, when any were produced.
    pub image_dir: Option<PathBuf>,

    /// Wall-clock time from validation to finalization.
    pub elapsed_ms: u64,
}
