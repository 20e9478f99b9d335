//! Request types handed to the generator by the HTTP/CLI layer.
//!
//! The JSON shape matches what the offer forms already post: placeholder
//! values sit at the top level next to `produkty` and `output_format`.
//!
//! ```json
//! {
//!   "NazwaFirmyKlienta": "Test Firma Sp. z o.o.",
//!   "Wynagrodzenie": 5000.0,
//!   "Szacowanyczaspracy": 40,
//!   "waznosc-oferty": { "date": "2024-12-10" },
//!   "produkty": ["1.docx", "3.docx"],
//!   "output_format": "jpg"
//! }
//! ```

use crate::error::{OfferError, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Requested deliverable format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum OutputFormat {
    /// The assembled `.docx`, unconverted. (default)
    #[default]
    #[serde(rename = "docx", alias = "structured-document")]
    StructuredDocument,
    /// A `.pdf` produced by the external converter.
    #[serde(rename = "pdf", alias = "fixed-layout-document")]
    FixedLayout,
    /// One raster image per page of the fixed-layout rendition.
    #[serde(rename = "jpg", alias = "image-set")]
    ImageSet,
}

impl OutputFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            OutputFormat::StructuredDocument => "docx",
            OutputFormat::FixedLayout => "pdf",
            OutputFormat::ImageSet => "jpg",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = OfferError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "docx" | "structured-document" => Ok(OutputFormat::StructuredDocument),
            "pdf" | "fixed-layout-document" => Ok(OutputFormat::FixedLayout),
            "jpg" | "jpeg" | "png" | "image-set" => Ok(OutputFormat::ImageSet),
            other => Err(OfferError::InvalidRequest(format!(
                "unknown output format '{other}' (expected docx, pdf or jpg)"
            ))),
        }
    }
}

/// A value supplied for one placeholder.
///
/// Dates are written as `{"date": "YYYY-MM-DD"}` so they can be told apart
/// from free text and rendered in the configured display format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PlaceholderValue {
    /// Explicit `null`: treated exactly like an absent key.
    Null,
    Integer(i64),
    Number(f64),
    Date { date: NaiveDate },
    Text(String),
}

impl PlaceholderValue {
    pub fn is_null(&self) -> bool {
        matches!(self, PlaceholderValue::Null)
    }
}

impl From<&str> for PlaceholderValue {
    fn from(s: &str) -> Self {
        PlaceholderValue::Text(s.to_string())
    }
}

impl From<String> for PlaceholderValue {
    fn from(s: String) -> Self {
        PlaceholderValue::Text(s)
    }
}

impl From<i64> for PlaceholderValue {
    fn from(n: i64) -> Self {
        PlaceholderValue::Integer(n)
    }
}

impl From<f64> for PlaceholderValue {
    fn from(n: f64) -> Self {
        PlaceholderValue::Number(n)
    }
}

impl From<NaiveDate> for PlaceholderValue {
    fn from(date: NaiveDate) -> Self {
        PlaceholderValue::Date { date }
    }
}

/// One offer to generate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OfferRequest {
    /// Product fragment identifiers, in the order they appear in the offer.
    #[serde(default, rename = "produkty", alias = "products")]
    pub products: Vec<String>,

    #[serde(default, rename = "output_format", alias = "format")]
    pub format: OutputFormat,

    /// Placeholder name → value. Every other top-level JSON key lands here.
    #[serde(flatten)]
    pub placeholders: BTreeMap<String, PlaceholderValue>,
}

impl OfferRequest {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            ..Self::default()
        }
    }

    pub fn with_placeholder(mut self, name: impl Into<String>, value: impl Into<PlaceholderValue>) -> Self {
        self.placeholders.insert(name.into(), value.into());
        self
    }

    pub fn with_product(mut self, id: impl Into<String>) -> Self {
        self.products.push(id.into());
        self
    }

    /// Look up a non-null value.
    pub fn value(&self, name: &str) -> Option<&PlaceholderValue> {
        self.placeholders.get(name).filter(|v| !v.is_null())
    }

    /// Shape checks that need no library access.
    pub fn validate(&self) -> Result<()> {
        for id in &self.products {
            if id.trim().is_empty() {
                return Err(OfferError::InvalidRequest("empty product identifier".into()));
            }
            if id.contains('/') || id.contains('\\') || id == ".." {
                return Err(OfferError::InvalidRequest(format!(
                    "product identifier '{id}' must be a plain file name"
                )));
            }
        }
        if self.placeholders.keys().any(|k| k.trim().is_empty()) {
            return Err(OfferError::InvalidRequest("empty placeholder name".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flat_form_payload() {
        let json = r#"{
            "NazwaFirmyKlienta": "Test Firma Sp. z o.o.",
            "Sygnatura-sprawy": null,
            "Wynagrodzenie": 5000.0,
            "Szacowanyczaspracy": 40,
            "waznosc-oferty": {"date": "2024-12-10"},
            "produkty": ["1.docx", "3.docx"],
            "output_format": "jpg"
        }"#;
        let req: OfferRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.products, vec!["1.docx", "3.docx"]);
        assert_eq!(req.format, OutputFormat::ImageSet);
        assert_eq!(
            req.placeholders["NazwaFirmyKlienta"],
            PlaceholderValue::Text("Test Firma Sp. z o.o.".into())
        );
        assert_eq!(req.placeholders["Szacowanyczaspracy"], PlaceholderValue::Integer(40));
        assert_eq!(req.placeholders["Wynagrodzenie"], PlaceholderValue::Number(5000.0));
        assert_eq!(
            req.placeholders["waznosc-oferty"],
            PlaceholderValue::Date {
                date: NaiveDate::from_ymd_opt(2024, 12, 10).unwrap()
            }
        );
        assert!(req.value("Sygnatura-sprawy").is_none());
    }

    #[test]
    fn format_defaults_to_docx() {
        let req: OfferRequest = serde_json::from_str(r#"{"temat": "CRM"}"#).unwrap();
        assert_eq!(req.format, OutputFormat::StructuredDocument);
        assert!(req.products.is_empty());
    }

    #[test]
    fn format_aliases() {
        assert_eq!("image-set".parse::<OutputFormat>().unwrap(), OutputFormat::ImageSet);
        assert_eq!("PDF".parse::<OutputFormat>().unwrap(), OutputFormat::FixedLayout);
        assert!("odt".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn rejects_path_like_product_ids() {
        let req = OfferRequest::new(OutputFormat::FixedLayout).with_product("../secret.docx");
        assert!(matches!(req.validate(), Err(OfferError::InvalidRequest(_))));
    }
}
