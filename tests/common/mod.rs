//! Shared fixtures: a content library written to a temp dir, and fake
//! converter/rasteriser implementations so no external binary is needed.

#![allow(dead_code)]

use async_trait::async_trait;
use image::{DynamicImage, RgbImage};
use offerdoc::docx::DocxPackage;
use offerdoc::{
    ContentLibrary, DocumentConverter, OfferError, OfferGenerator, OutputFormat, PageRasterizer,
    PageSink, PipelineConfig, PipelineConfigBuilder, RenderOptions,
};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

// ── DOCX fixtures ────────────────────────────────────────────────────────────

const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/></Types>"#;

const PACKAGE_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/></Relationships>"#;

const DOCUMENT_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"></Relationships>"#;

fn escape(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

/// One paragraph; every element of `runs` becomes its own run. Runs
/// starting with `*` are bold (the `*` is dropped).
pub fn paragraph_xml(runs: &[&str]) -> String {
    let mut xml = String::from("<w:p>");
    for run in runs {
        match run.strip_prefix('*') {
            Some(text) => xml.push_str(&format!(
                r#"<w:r><w:rPr><w:b/></w:rPr><w:t xml:space="preserve">{}</w:t></w:r>"#,
                escape(text)
            )),
            None => xml.push_str(&format!(
                r#"<w:r><w:t xml:space="preserve">{}</w:t></w:r>"#,
                escape(run)
            )),
        }
    }
    xml.push_str("</w:p>");
    xml
}

/// A complete `.docx` whose body holds `paragraphs`, each given as runs.
pub fn docx_bytes(paragraphs: &[&[&str]]) -> Vec<u8> {
    let body: String = paragraphs.iter().map(|runs| paragraph_xml(runs)).collect();
    let document = format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><w:body>{body}<w:sectPr><w:pgSz w:w="11906" w:h="16838"/></w:sectPr></w:body></w:document>"#
    );

    let mut zip = ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();
    for (name, data) in [
        ("[Content_Types].xml", CONTENT_TYPES.to_string()),
        ("_rels/.rels", PACKAGE_RELS.to_string()),
        ("word/_rels/document.xml.rels", DOCUMENT_RELS.to_string()),
        ("word/document.xml", document),
    ] {
        zip.start_file(name, options).unwrap();
        zip.write_all(data.as_bytes()).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

/// Texts of the non-empty, non-page-break paragraphs of a `.docx`, in order.
pub fn docx_texts(path: &Path) -> Vec<String> {
    let pkg = DocxPackage::open(path).unwrap();
    let doc = pkg.read_xml("word/document.xml").unwrap();
    offerdoc::docx::text::all_paragraph_texts(&doc)
        .into_iter()
        .filter(|t| !t.is_empty() && t != "\n")
        .collect()
}

// ── Library on disk ──────────────────────────────────────────────────────────

/// A temp dir holding `library/`, `output/` and `temp/`.
pub struct Fixture {
    pub root: TempDir,
}

impl Fixture {
    /// Library with two families:
    ///
    /// * `wolftax`: Title, Intro, TOC, Summary, Terms, Back; anchor TOC;
    ///   `klient` required.
    /// * `aidrops`: one file; products go after the `Opis:` paragraph.
    ///
    /// Products `P1.docx`, `P2.docx`, `P3.docx`.
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let lib = root.path().join("library");
        std::fs::create_dir_all(lib.join("templates")).unwrap();
        std::fs::create_dir_all(lib.join("products")).unwrap();

        let write = |rel: &str, paragraphs: &[&[&str]]| {
            std::fs::write(lib.join(rel), docx_bytes(paragraphs)).unwrap();
        };
        write("templates/title.docx", &[&["Title"], &["Oferta dla ", "*{{", "klient", "}}"], &["Temat: ", "{{te", "mat}}"]]);
        write("templates/intro.docx", &[&["Intro"]]);
        write("templates/toc.docx", &[&["TOC"]]);
        write("templates/summary.docx", &[&["Summary"], &["*{{temat}}", " – podsumowanie"]]);
        write("templates/terms.docx", &[&["Terms"], &["Ważna do {{waznosc}}"]]);
        write("templates/back.docx", &[&["Back"]]);
        write("templates/oferta.docx", &[&["Oferta {{klient}}"], &["Opis:\t{{opis}}"], &["Cena"]]);
        write("products/P1.docx", &[&["P1"]]);
        write("products/P2.docx", &[&["P2"]]);
        write("products/P3.docx", &[&["P3 dla {{klient}}"]]);
        std::fs::write(lib.join("products/~$P1.docx"), b"lock").unwrap();

        let manifest = r#"{
            "families": {
                "wolftax": {
                    "fragments": [
                        {"name": "Title", "file": "title.docx"},
                        {"name": "Intro", "file": "intro.docx"},
                        {"name": "TOC", "file": "toc.docx"},
                        {"name": "Summary", "file": "summary.docx"},
                        {"name": "Terms", "file": "terms.docx"},
                        {"name": "Back", "file": "back.docx"}
                    ],
                    "anchor": "TOC",
                    "required_placeholders": ["klient"],
                    "defaults": {"waznosc": "30 dni"}
                },
                "aidrops": {
                    "fragments": [{"file": "oferta.docx"}],
                    "anchor": "oferta",
                    "anchor_paragraph": "Opis:\\s+",
                    "unresolved": "keep"
                }
            },
            "products": {"P3.docx": {"restart_numbering": true}}
        }"#;
        std::fs::write(lib.join("manifest.json"), manifest).unwrap();
        Self { root }
    }

    pub fn manifest(&self) -> PathBuf {
        self.root.path().join("library/manifest.json")
    }

    pub fn output_root(&self) -> PathBuf {
        self.root.path().join("output")
    }

    pub fn work_root(&self) -> PathBuf {
        self.root.path().join("temp")
    }

    pub fn library(&self) -> Arc<ContentLibrary> {
        Arc::new(ContentLibrary::load(&self.manifest()).unwrap())
    }

    pub fn config(&self) -> PipelineConfigBuilder {
        PipelineConfig::builder()
            .output_root(self.output_root())
            .work_root(self.work_root())
    }

    pub fn generator(&self, config: PipelineConfig, converter: Arc<FakeConverter>) -> OfferGenerator {
        OfferGenerator::new(self.library(), config, converter, Arc::new(FakeRasterizer))
    }

    /// Entries directly under `dir`; empty if it does not exist.
    pub fn entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = match std::fs::read_dir(dir) {
            Ok(rd) => rd
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .collect(),
            Err(_) => Vec::new(),
        };
        names.sort();
        names
    }

    /// True when no request left anything in the work root or the staging area.
    pub fn no_leftovers(&self) -> bool {
        Self::entries(&self.work_root()).is_empty()
            && Self::entries(&self.output_root().join(".staging")).is_empty()
    }
}

// ── Fake external tools ──────────────────────────────────────────────────────

/// Writes `<stem>.pdf` holding the page count: one page per explicit page
/// break in the document, plus one.
#[derive(Default)]
pub struct FakeConverter {
    pub delay: Option<Duration>,
    pub calls: AtomicUsize,
}

impl FakeConverter {
    pub fn hanging(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl DocumentConverter for FakeConverter {
    async fn convert(
        &self,
        input: &Path,
        format: OutputFormat,
        out_dir: &Path,
        timeout: Duration,
    ) -> offerdoc::error::Result<PathBuf> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert_eq!(format, OutputFormat::FixedLayout);
        if let Some(delay) = self.delay {
            if tokio::time::timeout(timeout, tokio::time::sleep(delay)).await.is_err() {
                return Err(OfferError::ConverterTimeout {
                    program: "fake".into(),
                    secs: timeout.as_secs(),
                });
            }
        }
        let pkg = DocxPackage::open(input)?;
        let main = String::from_utf8_lossy(pkg.part("word/document.xml").unwrap_or_default()).into_owned();
        let pages = main.matches(r#"w:type="page""#).count() + 1;
        let stem = input.file_stem().unwrap().to_string_lossy().into_owned();
        let out = out_dir.join(format!("{stem}.pdf"));
        std::fs::write(&out, format!("%PDF-1.7\n% pages: {pages}\n")).unwrap();
        Ok(out)
    }
}

/// Reads the page count written by [`FakeConverter`]; pages are solid
/// images whose width is `dpi / 10` pixels and height is the page number.
pub struct FakeRasterizer;

impl PageRasterizer for FakeRasterizer {
    fn render_pages(
        &self,
        pdf: &Path,
        options: &RenderOptions,
        sink: &mut PageSink<'_>,
    ) -> offerdoc::error::Result<usize> {
        let text = std::fs::read_to_string(pdf).map_err(|e| OfferError::io("read", pdf, e))?;
        let pages: usize = text
            .lines()
            .find_map(|l| l.strip_prefix("% pages: ")?.trim().parse().ok())
            .ok_or_else(|| OfferError::RasterisationFailed {
                page: 0,
                detail: "not a fake pdf".into(),
            })?;
        for index in 0..pages {
            let image = RgbImage::from_pixel(options.dpi / 10, index as u32 + 1, image::Rgb([240, 240, 240]));
            sink(index, pages, DynamicImage::ImageRgb8(image))?;
        }
        Ok(pages)
    }
}
