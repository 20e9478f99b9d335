//! External document conversion (structured document → fixed layout).
//!
//! The converter is a black box behind [`DocumentConverter`]. The production
//! implementation drives LibreOffice headless; tests plug in fakes.

use crate::error::{OfferError, Result};
use crate::request::OutputFormat;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Longest stderr excerpt carried in an error.
const STDERR_EXCERPT: usize = 2000;

/// Converts an assembled document into another format.
#[async_trait]
pub trait DocumentConverter: Send + Sync {
    /// Convert `input` into `format`, writing into `out_dir`, within `timeout`.
    /// Returns the path of the produced file.
    async fn convert(
        &self,
        input: &Path,
        format: OutputFormat,
        out_dir: &Path,
        timeout: Duration,
    ) -> Result<PathBuf>;

    /// Whether the converter can run at all on this machine.
    async fn is_available(&self) -> bool {
        true
    }
}

/// LibreOffice (`soffice --headless --convert-to pdf`).
///
/// Each run uses its own user profile under `out_dir`, so concurrent
/// conversions never fight over one profile lock.
#[derive(Debug, Clone)]
pub struct SofficeConverter {
    program: String,
}

impl SofficeConverter {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn command(&self, input: &Path, out_dir: &Path) -> Result<Command> {
        let profile = std::path::absolute(out_dir.join("lo-profile"))
            .map_err(|e| OfferError::io("resolve path", out_dir, e))?;
        let mut cmd = Command::new(&self.program);
        cmd.arg(format!("-env:UserInstallation={}", file_url(&profile)))
            .arg("--headless")
            .arg("--norestore")
            .arg("--convert-to")
            .arg("pdf")
            .arg("--outdir")
            .arg(out_dir)
            .arg(input)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        Ok(cmd)
    }
}

impl Default for SofficeConverter {
    fn default() -> Self {
        Self::new("soffice")
    }
}

#[async_trait]
impl DocumentConverter for SofficeConverter {
    async fn convert(
        &self,
        input: &Path,
        format: OutputFormat,
        out_dir: &Path,
        timeout: Duration,
    ) -> Result<PathBuf> {
        if format != OutputFormat::FixedLayout {
            return Err(OfferError::UnsupportedConversion {
                format: format.to_string(),
            });
        }
        let started = Instant::now();
        debug!(program = %self.program, input = %input.display(), "Running converter");

        let output = match tokio::time::timeout(timeout, self.command(input, out_dir)?.output()).await {
            Err(_) => {
                warn!(program = %self.program, secs = timeout.as_secs(), "Converter timed out; killed");
                return Err(OfferError::ConverterTimeout {
                    program: self.program.clone(),
                    secs: timeout.as_secs(),
                });
            }
            Ok(Err(e)) => {
                return Err(OfferError::ConverterUnavailable {
                    program: self.program.clone(),
                    detail: e.to_string(),
                })
            }
            Ok(Ok(output)) => output,
        };

        if !output.status.success() {
            return Err(OfferError::ConverterFailed {
                program: self.program.clone(),
                exit_code: output.status.code(),
                stderr: excerpt(&output.stderr),
            });
        }

        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let produced = out_dir.join(format!("{stem}.pdf"));
        if !produced.is_file() {
            // soffice exits 0 when it silently refuses (e.g. a locked profile).
            return Err(OfferError::ConverterFailed {
                program: self.program.clone(),
                exit_code: output.status.code(),
                stderr: format!("no output produced; {}", excerpt(&output.stderr)),
            });
        }

        info!(
            program = %self.program,
            output = %produced.display(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Converted to fixed layout"
        );
        Ok(produced)
    }

    async fn is_available(&self) -> bool {
        let probe = Command::new(&self.program)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status();
        matches!(
            tokio::time::timeout(Duration::from_secs(30), probe).await,
            Ok(Ok(status)) if status.success()
        )
    }
}

fn excerpt(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    match text.char_indices().rev().nth(STDERR_EXCERPT) {
        Some((cut, _)) => format!("…{}", &text[cut..]),
        None => text.to_string(),
    }
}

/// `file://` URL for an absolute path, as LibreOffice's `-env:` options expect.
fn file_url(path: &Path) -> String {
    let raw = path.to_string_lossy().replace('\\', "/");
    let encoded = raw.replace('%', "%25").replace(' ', "%20");
    if encoded.starts_with('/') {
        format!("file://{encoded}")
    } else {
        format!("file:///{encoded}")
    }
}
