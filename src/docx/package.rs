//! The OOXML zip container.
//!
//! A `.docx` is a zip of parts. [`DocxPackage`] keeps every part as raw bytes
//! in archive order, so parts we never touch (themes, fonts, settings) are
//! written back exactly as they were read.

use super::xml::XmlDocument;
use crate::error::{OfferError, Result};
use std::io::{Cursor, Read, Write};
use std::path::Path;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

pub const CONTENT_TYPES_PART: &str = "[Content_Types].xml";
pub const PACKAGE_RELS_PART: &str = "_rels/.rels";
const DEFAULT_MAIN_DOCUMENT: &str = "word/document.xml";
const OFFICE_DOCUMENT_REL: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument";

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DocxPackage {
    parts: Vec<(String, Vec<u8>)>,
}

impl DocxPackage {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut archive = ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| OfferError::MalformedDocument(format!("not a zip package: {e}")))?;

        let mut parts = Vec::with_capacity(archive.len());
        for i in 0..archive.len() {
            let mut file = archive
                .by_index(i)
                .map_err(|e| OfferError::MalformedDocument(format!("zip entry {i}: {e}")))?;
            if file.is_dir() {
                continue;
            }
            let name = file.name().to_string();
            let mut data = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut data).map_err(|e| {
                OfferError::MalformedDocument(format!("zip entry '{name}': {e}"))
            })?;
            parts.push((name, data));
        }

        let package = Self { parts };
        if !package.has_part(CONTENT_TYPES_PART) {
            return Err(OfferError::MalformedDocument(format!(
                "package has no {CONTENT_TYPES_PART}"
            )));
        }
        Ok(package)
    }

    /// Read and parse a `.docx` file. Load failures are reported against `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| OfferError::FragmentLoad {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
        Self::from_bytes(&bytes).map_err(|e| OfferError::FragmentLoad {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        // [Content_Types].xml first: some consumers sniff it at offset 0.
        let ordered = self
            .parts
            .iter()
            .filter(|(n, _)| n == CONTENT_TYPES_PART)
            .chain(self.parts.iter().filter(|(n, _)| n != CONTENT_TYPES_PART));

        for (name, data) in ordered {
            writer
                .start_file(name.as_str(), options)
                .map_err(|e| OfferError::Internal(format!("zip write '{name}': {e}")))?;
            writer
                .write_all(data)
                .map_err(|e| OfferError::Internal(format!("zip write '{name}': {e}")))?;
        }
        let cursor = writer
            .finish()
            .map_err(|e| OfferError::Internal(format!("zip finish: {e}")))?;
        Ok(cursor.into_inner())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let bytes = self.to_bytes()?;
        std::fs::write(path, bytes).map_err(|e| OfferError::io("write document", path, e))
    }

    pub fn part_names(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().map(|(n, _)| n.as_str())
    }

    pub fn has_part(&self, name: &str) -> bool {
        self.parts.iter().any(|(n, _)| n == name)
    }

    pub fn part(&self, name: &str) -> Option<&[u8]> {
        self.parts
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, d)| d.as_slice())
    }

    /// Insert or overwrite a part, keeping its original position when it exists.
    pub fn set_part(&mut self, name: impl Into<String>, data: Vec<u8>) {
        let name = name.into();
        match self.parts.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = data,
            None => self.parts.push((name, data)),
        }
    }

    pub fn read_xml(&self, name: &str) -> Result<XmlDocument> {
        let data = self
            .part(name)
            .ok_or_else(|| OfferError::MalformedDocument(format!("missing part '{name}'")))?;
        XmlDocument::parse(data)
            .map_err(|e| OfferError::MalformedDocument(format!("part '{name}': {e}")))
    }

    pub fn write_xml(&mut self, name: &str, doc: &XmlDocument) -> Result<()> {
        let bytes = doc.to_bytes()?;
        self.set_part(name, bytes);
        Ok(())
    }

    /// Path of the main document part, from the package relationships.
    pub fn main_document_part(&self) -> Result<String> {
        if !self.has_part(PACKAGE_RELS_PART) {
            return Ok(DEFAULT_MAIN_DOCUMENT.to_string());
        }
        let rels = self.read_xml(PACKAGE_RELS_PART)?;
        let target = rels
            .root
            .elements()
            .find(|r| r.attr("Type") == Some(OFFICE_DOCUMENT_REL))
            .and_then(|r| r.attr("Target"))
            .map(|t| t.trim_start_matches('/').to_string());
        Ok(target.unwrap_or_else(|| DEFAULT_MAIN_DOCUMENT.to_string()))
    }

    /// A part name not yet used in this package, derived from `wanted`.
    ///
    /// `word/media/image1.png` → `word/media/image1_2.png`, `…_3.png`, …
    pub fn unique_part_name(&self, wanted: &str) -> String {
        if !self.has_part(wanted) {
            return wanted.to_string();
        }
        let (stem, ext) = match wanted.rsplit_once('.') {
            Some((s, e)) if !s.ends_with('/') => (s, Some(e)),
            _ => (wanted, None),
        };
        (2..)
            .map(|n| match ext {
                Some(ext) => format!("{stem}_{n}.{ext}"),
                None => format!("{stem}_{n}"),
            })
            .find(|candidate| !self.has_part(candidate))
            .unwrap_or_else(|| wanted.to_string())
    }
}
