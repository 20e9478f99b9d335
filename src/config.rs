//! Configuration types for offer generation.
//!
//! Every knob lives in [`PipelineConfig`], built via its
//! [`PipelineConfigBuilder`] and handed to the generator at construction.
//! Two generators with different configs can run side by side in one
//! process (the test-suite does exactly that).

use crate::error::OfferError;
use chrono::format::{Item, StrftimeItems};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the assembly and conversion pipeline.
///
/// # Example
/// ```rust
/// use offerdoc::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .output_root("/srv/offers/output")
///     .work_root("/srv/offers/temp")
///     .dpi(100)
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Finalized request folders are published here. Default: `output`.
    pub output_root: PathBuf,

    /// Per-request working directories are created (and removed) here. Default: `temp`.
    pub work_root: PathBuf,

    /// Rasterisation resolution in dots per inch. Range: 36–600. Default: 100.
    pub dpi: u32,

    /// Cap on either edge of a rendered page, in pixels. Default: 4000.
    pub max_rendered_pixels: u32,

    /// Page image encoding. Default: JPEG.
    pub image_format: ImageFormat,

    /// JPEG quality 1–100. Ignored for PNG. Default: 90.
    pub jpeg_quality: u8,

    /// Name of the sub-folder holding page images. Default: `jpg`.
    pub image_subfolder: String,

    /// Pages rasterised and encoded at the same time. Default: 4.
    pub render_concurrency: usize,

    /// Also write page images for `docx` and `pdf` requests. Default: false.
    pub render_previews: bool,

    /// External converter executable. Default: `soffice`.
    pub converter_program: String,

    /// Upper bound on one converter run, in seconds. Default: 120.
    pub converter_timeout_secs: u64,

    /// Path to a pdfium shared library. None = system library search.
    pub pdfium_library: Option<PathBuf>,

    /// Prefix of generated request ids (`<prefix>_<uuid>`). Default: `oferta`.
    pub request_prefix: String,

    /// How numeric placeholder values are printed.
    pub number_format: NumberFormat,

    /// `chrono` format string for date placeholder values. Default: `%d.%m.%Y`.
    pub date_format: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            output_root: PathBuf::from("output"),
            work_root: PathBuf::from("temp"),
            dpi: 100,
            max_rendered_pixels: 4000,
            image_format: ImageFormat::default(),
            jpeg_quality: 90,
            image_subfolder: "jpg".to_string(),
            render_concurrency: 4,
            render_previews: false,
            converter_program: "soffice".to_string(),
            converter_timeout_secs: 120,
            pdfium_library: None,
            request_prefix: "oferta".to_string(),
            number_format: NumberFormat::default(),
            date_format: "%d.%m.%Y".to_string(),
        }
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn converter_timeout(&self) -> Duration {
        Duration::from_secs(self.converter_timeout_secs)
    }

    /// Where in-flight outputs are built before being published.
    pub fn staging_root(&self) -> PathBuf {
        self.output_root.join(".staging")
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn output_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.output_root = path.into();
        self
    }

    pub fn work_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.work_root = path.into();
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi;
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn image_format(mut self, format: ImageFormat) -> Self {
        self.config.image_format = format;
        self
    }

    pub fn jpeg_quality(mut self, quality: u8) -> Self {
        self.config.jpeg_quality = quality;
        self
    }

    pub fn image_subfolder(mut self, name: impl Into<String>) -> Self {
        self.config.image_subfolder = name.into();
        self
    }

    pub fn render_concurrency(mut self, n: usize) -> Self {
        self.config.render_concurrency = n;
        self
    }

    pub fn render_previews(mut self, v: bool) -> Self {
        self.config.render_previews = v;
        self
    }

    pub fn converter_program(mut self, program: impl Into<String>) -> Self {
        self.config.converter_program = program.into();
        self
    }

    pub fn converter_timeout_secs(mut self, secs: u64) -> Self {
        self.config.converter_timeout_secs = secs;
        self
    }

    pub fn pdfium_library(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_library = Some(path.into());
        self
    }

    pub fn request_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.request_prefix = prefix.into();
        self
    }

    pub fn number_format(mut self, format: NumberFormat) -> Self {
        self.config.number_format = format;
        self
    }

    pub fn date_format(mut self, format: impl Into<String>) -> Self {
        self.config.date_format = format.into();
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, OfferError> {
        let c = &self.config;
        if !(36..=600).contains(&c.dpi) {
            return Err(OfferError::InvalidConfig(format!(
                "DPI must be 36–600, got {}",
                c.dpi
            )));
        }
        if c.render_concurrency == 0 {
            return Err(OfferError::InvalidConfig(
                "Render concurrency must be ≥ 1".into(),
            ));
        }
        if c.converter_timeout_secs == 0 {
            return Err(OfferError::InvalidConfig(
                "Converter timeout must be ≥ 1 second".into(),
            ));
        }
        if !(1..=100).contains(&c.jpeg_quality) {
            return Err(OfferError::InvalidConfig(format!(
                "JPEG quality must be 1–100, got {}",
                c.jpeg_quality
            )));
        }
        if c.output_root == c.work_root {
            return Err(OfferError::InvalidConfig(
                "Output root and work root must differ".into(),
            ));
        }
        if c.image_subfolder.is_empty() || c.image_subfolder.contains(['/', '\\']) {
            return Err(OfferError::InvalidConfig(format!(
                "Image sub-folder must be a plain name, got '{}'",
                c.image_subfolder
            )));
        }
        if c.request_prefix.is_empty() || c.request_prefix.starts_with('.') {
            return Err(OfferError::InvalidConfig(
                "Request prefix must be non-empty and must not start with '.'".into(),
            ));
        }
        if StrftimeItems::new(&c.date_format).any(|item| matches!(item, Item::Error)) {
            return Err(OfferError::InvalidConfig(format!(
                "Invalid date format '{}'",
                c.date_format
            )));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Encoding of page images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    /// Lossy, small. What offer previews have always used. (default)
    #[default]
    Jpeg,
    /// Lossless.
    Png,
}

impl ImageFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "jpg",
            ImageFormat::Png => "png",
        }
    }
}

/// How numeric placeholder values are printed.
///
/// The default (`.` decimal point, no grouping, two decimals) prints
/// `5000.0` as `5000.00`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumberFormat {
    pub decimal_separator: char,
    pub thousands_separator: Option<char>,
    pub decimals: usize,
}

impl Default for NumberFormat {
    fn default() -> Self {
        Self {
            decimal_separator: '.',
            thousands_separator: None,
            decimals: 2,
        }
    }
}

impl NumberFormat {
    /// Format a fractional value with the fixed number of decimals.
    pub fn format_number(&self, value: f64) -> String {
        let fixed = format!("{:.*}", self.decimals, value.abs());
        let (int_part, frac_part) = match fixed.split_once('.') {
            Some((i, f)) => (i, Some(f)),
            None => (fixed.as_str(), None),
        };
        let mut out = String::with_capacity(fixed.len() + 4);
        if value.is_sign_negative() && fixed.bytes().any(|b| b.is_ascii_digit() && b != b'0') {
            out.push('-');
        }
        out.push_str(&self.group(int_part));
        if let Some(frac) = frac_part {
            out.push(self.decimal_separator);
            out.push_str(frac);
        }
        out
    }

    /// Format a whole value: grouping applies, decimals do not.
    pub fn format_integer(&self, value: i64) -> String {
        let digits = value.unsigned_abs().to_string();
        let grouped = self.group(&digits);
        if value < 0 {
            format!("-{grouped}")
        } else {
            grouped
        }
    }

    fn group(&self, digits: &str) -> String {
        let Some(sep) = self.thousands_separator else {
            return digits.to_string();
        };
        let len = digits.len();
        let mut out = String::with_capacity(len + len / 3);
        for (i, ch) in digits.chars().enumerate() {
            if i > 0 && (len - i) % 3 == 0 {
                out.push(sep);
            }
            out.push(ch);
        }
        out
    }
}
