//! End-to-end offer generation: validate → assemble → convert → finalize.
//!
//! [`OfferGenerator`] owns everything a request needs (the shared library,
//! the configuration, the converter and the rasteriser) and runs one request
//! per [`OfferGenerator::generate`] call. Calls are independent; run as many
//! concurrently as the host allows.
//!
//! Every request gets a scratch directory and a staged output directory.
//! Both are guards, so whichever way `generate` returns (or if its future is
//! dropped half-way) the scratch directory is gone and the output root holds
//! either the finished `<request-id>/` folder or nothing at all.

use crate::config::PipelineConfig;
use crate::error::{OfferError, PipelineError, Result};
use crate::library::ContentLibrary;
use crate::output::{OutputArtifact, Stage};
use crate::pipeline::assemble::{assemble, prepare, AssemblyArtifact};
use crate::pipeline::convert::{DocumentConverter, SofficeConverter};
use crate::pipeline::rasterize::{
    rasterize_to_dir, ImageSetOptions, PageRasterizer, PdfiumRasterizer, RenderOptions,
};
use crate::pipeline::workspace::{RequestId, RequestWorkspace, StagedOutput};
use crate::progress::ProgressCallback;
use crate::request::{OfferRequest, OutputFormat};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

/// Generates offers from one content library under one configuration.
#[derive(Clone)]
pub struct OfferGenerator {
    library: Arc<ContentLibrary>,
    config: PipelineConfig,
    converter: Arc<dyn DocumentConverter>,
    rasterizer: Arc<dyn PageRasterizer>,
    progress: Option<ProgressCallback>,
}

impl OfferGenerator {
    pub fn new(
        library: Arc<ContentLibrary>,
        config: PipelineConfig,
        converter: Arc<dyn DocumentConverter>,
        rasterizer: Arc<dyn PageRasterizer>,
    ) -> Self {
        Self {
            library,
            config,
            converter,
            rasterizer,
            progress: None,
        }
    }

    /// LibreOffice for conversion, pdfium for rasterisation, both as configured.
    pub fn with_system_tools(library: Arc<ContentLibrary>, config: PipelineConfig) -> Self {
        let converter = Arc::new(SofficeConverter::new(config.converter_program.clone()));
        let rasterizer = Arc::new(PdfiumRasterizer::new(config.pdfium_library.clone()));
        Self::new(library, config, converter, rasterizer)
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    pub fn library(&self) -> &ContentLibrary {
        &self.library
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn converter(&self) -> &Arc<dyn DocumentConverter> {
        &self.converter
    }

    /// Generate one offer from template `family`.
    ///
    /// # Errors
    /// Every failure is a [`PipelineError`] carrying the request id and the
    /// stage that was active. Validation failures happen before any
    /// directory is created.
    pub async fn generate(
        &self,
        family: &str,
        request: &OfferRequest,
    ) -> std::result::Result<OutputArtifact, PipelineError> {
        let started = Instant::now();
        let id = RequestId::generate(&self.config.request_prefix);
        let mut tracker = StageTracker::new(&id, self.progress.clone());
        info!(request_id = %id, family, format = %request.format, products = request.products.len(), "Offer requested");

        // ── Step 1: Validate (library reads only) ────────────────────────────
        if let Err(e) = prepare(&self.library, family, request) {
            return Err(tracker.fail(e));
        }
        tracker.advance(Stage::Validated);

        match self.run(&id, family, request, &mut tracker, started).await {
            Ok(artifact) => Ok(artifact),
            Err(e) => Err(tracker.fail(e)),
        }
    }

    async fn run(
        &self,
        id: &RequestId,
        family: &str,
        request: &OfferRequest,
        tracker: &mut StageTracker,
        started: Instant,
    ) -> Result<OutputArtifact> {
        let workspace = RequestWorkspace::create(&self.config.work_root, id)?;
        let staged = StagedOutput::create(&self.config.output_root, &self.config.staging_root(), id)?;

        // ── Step 2: Assemble (merge + substitute) off the async workers ──────
        tracker.advance(Stage::Assembling);
        let assembled = {
            let library = Arc::clone(&self.library);
            let config = self.config.clone();
            let family = family.to_string();
            let request = request.clone();
            let work_dir = workspace.path().to_path_buf();
            let stem = id.to_string();
            tokio::task::spawn_blocking(move || {
                let plan = prepare(&library, &family, &request)?;
                assemble(&plan, &config, &work_dir, &stem)
            })
            .await
            .map_err(|e| OfferError::Internal(format!("Assembly task panicked: {e}")))??
        };
        tracker.advance(Stage::Assembled);

        // ── Step 3: Convert into the staged output directory ─────────────────
        tracker.advance(Stage::Converting);
        let outputs = self
            .convert(id, &assembled, request.format, &workspace, &staged)
            .await?;
        tracker.advance(Stage::Converted);

        // ── Step 4: Publish ──────────────────────────────────────────────────
        let byte_size = if request.format == OutputFormat::ImageSet {
            total_size(&outputs.images)?
        } else {
            file_size(&outputs.primary)?
        };
        let primary_path = staged.published(&outputs.primary);
        let page_images: Vec<PathBuf> = outputs.images.iter().map(|p| staged.published(p)).collect();
        let image_dir = outputs.image_dir.as_deref().map(|d| staged.published(d));
        let output_dir = staged.commit()?;
        drop(workspace);

        let artifact = OutputArtifact {
            request_id: id.to_string(),
            format: request.format,
            output_dir,
            primary_path,
            byte_size,
            page_count: image_dir.as_ref().map(|_| page_images.len()),
            page_images,
            image_dir,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        tracker.advance(Stage::Finalized);
        info!(
            request_id = %id,
            primary = %artifact.primary_path.display(),
            byte_size = artifact.byte_size,
            pages = ?artifact.page_count,
            elapsed_ms = artifact.elapsed_ms,
            "Offer finalized"
        );
        Ok(artifact)
    }

    async fn convert(
        &self,
        id: &RequestId,
        assembled: &AssemblyArtifact,
        format: OutputFormat,
        workspace: &RequestWorkspace,
        staged: &StagedOutput,
    ) -> Result<StagedFiles> {
        let primary_name = |ext: &str| staged.path().join(format!("{id}.{ext}"));
        let want_images = format == OutputFormat::ImageSet || self.config.render_previews;

        let pdf = if format == OutputFormat::StructuredDocument && !want_images {
            None
        } else {
            Some(
                self.converter
                    .convert(
                        &assembled.path,
                        OutputFormat::FixedLayout,
                        workspace.path(),
                        self.config.converter_timeout(),
                    )
                    .await?,
            )
        };

        let primary = match (format, &pdf) {
            (OutputFormat::StructuredDocument, _) => {
                let target = primary_name("docx");
                move_file(&assembled.path, &target).await?;
                Some(target)
            }
            (OutputFormat::FixedLayout, Some(pdf)) => {
                let target = primary_name("pdf");
                move_file(pdf, &target).await?;
                Some(target)
            }
            _ => None,
        };

        let (images, image_dir) = if want_images {
            let source = match (&primary, &pdf) {
                (Some(p), _) if format == OutputFormat::FixedLayout => p.clone(),
                (_, Some(pdf)) => pdf.clone(),
                _ => {
                    return Err(OfferError::Internal(
                        "page images requested without a fixed-layout document".into(),
                    ))
                }
            };
            let dir = staged.path().join(&self.config.image_subfolder);
            let images = rasterize_to_dir(
                Arc::clone(&self.rasterizer),
                &source,
                &dir,
                &self.image_options(),
                self.progress.clone(),
            )
            .await?;
            debug!(request_id = %id, pages = images.len(), "Page images written");
            (images, Some(dir))
        } else {
            (Vec::new(), None)
        };

        let primary = match primary {
            Some(p) => p,
            None => images.first().cloned().ok_or_else(|| OfferError::RasterisationFailed {
                page: 0,
                detail: "document has no pages".into(),
            })?,
        };
        Ok(StagedFiles {
            primary,
            images,
            image_dir,
        })
    }

    fn image_options(&self) -> ImageSetOptions {
        ImageSetOptions {
            render: RenderOptions {
                dpi: self.config.dpi,
                max_pixels: self.config.max_rendered_pixels,
            },
            format: self.config.image_format,
            jpeg_quality: self.config.jpeg_quality,
            concurrency: self.config.render_concurrency,
        }
    }
}

/// Files written to the staging directory by the conversion step.
struct StagedFiles {
    primary: PathBuf,
    images: Vec<PathBuf>,
    image_dir: Option<PathBuf>,
}

/// Walks the stage machine of one request and reports every move.
struct StageTracker {
    request_id: String,
    stage: Stage,
    progress: Option<ProgressCallback>,
}

impl StageTracker {
    fn new(id: &RequestId, progress: Option<ProgressCallback>) -> Self {
        Self {
            request_id: id.to_string(),
            stage: Stage::Validated,
            progress,
        }
    }

    fn advance(&mut self, to: Stage) {
        // The first call confirms `validated`, the state the tracker starts in.
        if to != self.stage {
            debug_assert!(self.stage.can_transition_to(to), "{} → {to}", self.stage);
            self.stage = to;
        }
        info!(request_id = %self.request_id, stage = %to, "Stage reached");
        if let Some(cb) = &self.progress {
            cb.on_stage(&self.request_id, to);
        }
    }

    /// Move to `failed` and wrap `source` with the stage it interrupted.
    fn fail(&mut self, source: OfferError) -> PipelineError {
        let stage = self.stage;
        error!(
            request_id = %self.request_id,
            stage = %stage,
            kind = ?source.kind(),
            error = %source,
            "Offer generation failed"
        );
        self.stage = Stage::Failed;
        if let Some(cb) = &self.progress {
            cb.on_stage(&self.request_id, Stage::Failed);
        }
        PipelineError {
            request_id: self.request_id.clone(),
            stage,
            source,
        }
    }
}

/// Rename, falling back to copy + remove across filesystems.
async fn move_file(from: &Path, to: &Path) -> Result<()> {
    if tokio::fs::rename(from, to).await.is_ok() {
        return Ok(());
    }
    tokio::fs::copy(from, to)
        .await
        .map_err(|e| OfferError::io("copy file", to, e))?;
    tokio::fs::remove_file(from)
        .await
        .map_err(|e| OfferError::io("remove file", from, e))
}

fn file_size(path: &Path) -> Result<u64> {
    Ok(std::fs::metadata(path)
        .map_err(|e| OfferError::io("stat file", path, e))?
        .len())
}

fn total_size(paths: &[PathBuf]) -> Result<u64> {
    paths.iter().map(|p| file_size(p)).sum()
}
