//! # offerdoc
//!
//! Assemble offer documents from DOCX templates and product fragments, fill
//! in `{{placeholders}}`, and deliver them as DOCX, PDF, or one image per page.
//!
//! ## Pipeline Overview
//!
//! ```text
//! OfferRequest
//!  │
//!  ├─ 1. Validate   family, product ids, required placeholders (no I/O)
//!  ├─ 2. Merge      skeleton fragments + products at the anchor, page breaks between
//!  ├─ 3. Substitute tokens split across runs keep the first run's formatting
//!  ├─ 4. Convert    LibreOffice headless → PDF (timeout, isolated profile)
//!  ├─ 5. Rasterize  pdfium → page_1 … page_N (parallel, page-ordered)
//!  └─ 6. Publish    <output-root>/<request-id>/ appears in one rename
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use offerdoc::{ContentLibrary, OfferGenerator, OfferRequest, OutputFormat, PipelineConfig};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let library = Arc::new(ContentLibrary::load(Path::new("library/manifest.json"))?);
//!     let config = PipelineConfig::builder().output_root("output").build()?;
//!     let generator = OfferGenerator::with_system_tools(library, config);
//!
//!     let request = OfferRequest::new(OutputFormat::ImageSet)
//!         .with_placeholder("temat", "CRM rollout")
//!         .with_product("1.docx");
//!     let artifact = generator.generate("wolftax", &request).await?;
//!     println!("{} pages in {}", artifact.page_count.unwrap_or(0), artifact.output_dir.display());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `offerdoc` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! offerdoc = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod docx;
pub mod error;
pub mod generate;
pub mod library;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod request;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ImageFormat, NumberFormat, PipelineConfig, PipelineConfigBuilder};
pub use error::{ErrorKind, OfferError, PipelineError};
pub use generate::OfferGenerator;
pub use library::{ContentLibrary, FamilySpec, LibraryHealth, ProductFragment, TemplateDescriptor};
pub use output::{OutputArtifact, Stage};
pub use pipeline::convert::{DocumentConverter, SofficeConverter};
pub use pipeline::rasterize::{PageRasterizer, PageSink, PdfiumRasterizer, RenderOptions};
pub use pipeline::substitute::UnresolvedPolicy;
pub use pipeline::workspace::{list_offers, OfferListing};
pub use progress::{NoopProgressCallback, OfferProgressCallback, ProgressCallback};
pub use request::{OfferRequest, OutputFormat, PlaceholderValue};
