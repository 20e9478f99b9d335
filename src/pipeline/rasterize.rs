//! Page rasterisation: fixed-layout document → one image file per page.
//!
//! pdfium is a blocking C library holding process-global state, so one
//! `spawn_blocking` task binds it, opens the document once and renders every
//! page in order. Rendered pages travel over a bounded channel to encoder
//! tasks that run in parallel (`buffer_unordered`). File names come from the
//! page index, never from completion order, so `page_1 … page_N` always match
//! the document's page order.

use crate::config::ImageFormat;
use crate::error::{OfferError, Result};
use crate::progress::ProgressCallback;
use futures::stream::{self, StreamExt};
use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Resolution and size limits for one render.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderOptions {
    pub dpi: u32,
    /// Cap on either edge, in pixels.
    pub max_pixels: u32,
}

/// Receives each rendered page: `(index, total_pages, image)`, index 0-based.
pub type PageSink<'a> = dyn FnMut(usize, usize, DynamicImage) -> Result<()> + 'a;

/// Renders the pages of a fixed-layout document. Implementations are blocking.
pub trait PageRasterizer: Send + Sync {
    /// Render every page of `pdf`, handing each image to `sink` as soon as it
    /// is ready. Returns the page count.
    fn render_pages(&self, pdf: &Path, options: &RenderOptions, sink: &mut PageSink<'_>) -> Result<usize>;
}

/// pdfium-backed rasteriser.
///
/// pdfium is bound once per document inside the blocking task, so a process
/// that never rasterises never needs the library installed.
#[derive(Debug, Clone, Default)]
pub struct PdfiumRasterizer {
    library: Option<PathBuf>,
}

impl PdfiumRasterizer {
    /// `library`: path to the pdfium shared library (file or directory).
    /// `None` searches the working directory, then the system library path.
    pub fn new(library: Option<PathBuf>) -> Self {
        Self { library }
    }

    fn bind(&self) -> Result<Pdfium> {
        let bindings = match &self.library {
            Some(path) if path.is_dir() => {
                Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(path))
            }
            Some(path) => Pdfium::bind_to_library(path),
            None => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
                .or_else(|_| Pdfium::bind_to_system_library()),
        }
        .map_err(|e| OfferError::RasterisationFailed {
            page: 0,
            detail: format!("pdfium library not available: {e:?}"),
        })?;
        Ok(Pdfium::new(bindings))
    }
}

impl PageRasterizer for PdfiumRasterizer {
    fn render_pages(&self, pdf: &Path, options: &RenderOptions, sink: &mut PageSink<'_>) -> Result<usize> {
        let pdfium = self.bind()?;
        let document = pdfium
            .load_pdf_from_file(pdf, None)
            .map_err(|e| OfferError::RasterisationFailed {
                page: 0,
                detail: format!("cannot open '{}': {e:?}", pdf.display()),
            })?;

        let pages = document.pages();
        let total = pages.len() as usize;
        info!(pages = total, "PDF loaded");

        let render_config = PdfRenderConfig::new()
            .scale_page_by_factor(options.dpi as f32 / 72.0)
            .set_maximum_width(options.max_pixels as i32)
            .set_maximum_height(options.max_pixels as i32);

        for (index, page) in pages.iter().enumerate() {
            let bitmap = page
                .render_with_config(&render_config)
                .map_err(|e| OfferError::RasterisationFailed {
                    page: index + 1,
                    detail: format!("{e:?}"),
                })?;
            let image = bitmap.as_image();
            debug!(page = index + 1, width = image.width(), height = image.height(), "Rendered page");
            sink(index, total, image)?;
        }
        Ok(total)
    }
}

/// Where and how page images are written.
#[derive(Debug, Clone)]
pub struct ImageSetOptions {
    pub render: RenderOptions,
    pub format: ImageFormat,
    pub jpeg_quality: u8,
    /// Pages encoded at once; also the number of rendered pages held in memory.
    pub concurrency: usize,
}

/// Render every page of `pdf` into `dir` as `page_<n>.<ext>`, n = 1..=N.
///
/// Returns the paths in page order.
pub async fn rasterize_to_dir(
    rasterizer: Arc<dyn PageRasterizer>,
    pdf: &Path,
    dir: &Path,
    options: &ImageSetOptions,
    progress: Option<ProgressCallback>,
) -> Result<Vec<PathBuf>> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| OfferError::io("create directory", dir, e))?;
    info!(dpi = options.render.dpi, dir = %dir.display(), "Rasterising pages");

    let concurrency = options.concurrency.max(1);
    let (tx, rx) = mpsc::channel::<(usize, usize, DynamicImage)>(concurrency);
    let renderer = {
        let pdf = pdf.to_path_buf();
        let render = options.render;
        tokio::task::spawn_blocking(move || {
            rasterizer.render_pages(&pdf, &render, &mut |index, total, image| {
                tx.blocking_send((index, total, image))
                    .map_err(|_| OfferError::Internal("page receiver dropped".into()))
            })
        })
    };

    let rendered = stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|page| (page, rx)) });
    let results: Vec<Result<(usize, PathBuf)>> = rendered
        .map(|(index, total, image)| {
            let path = dir.join(format!("page_{}.{}", index + 1, options.format.extension()));
            let (format, quality) = (options.format, options.jpeg_quality);
            let progress = progress.clone();
            async move {
                let written = tokio::task::spawn_blocking(move || {
                    write_image(&image, &path, format, quality, index)?;
                    Ok::<_, OfferError>(path)
                })
                .await
                .map_err(|e| OfferError::Internal(format!("Encode task panicked: {e}")))??;
                if let Some(cb) = &progress {
                    cb.on_page_rendered(index + 1, total);
                }
                Ok((index, written))
            }
        })
        .buffer_unordered(concurrency)
        .collect()
        .await;

    let total = renderer
        .await
        .map_err(|e| OfferError::Internal(format!("Render task panicked: {e}")))??;
    let mut pages = results.into_iter().collect::<Result<Vec<_>>>()?;
    pages.sort_by_key(|(index, _)| *index);
    if pages.len() != total {
        return Err(OfferError::RasterisationFailed {
            page: pages.len() + 1,
            detail: format!("{} of {total} pages rendered", pages.len()),
        });
    }
    Ok(pages.into_iter().map(|(_, path)| path).collect())
}

fn write_image(
    image: &DynamicImage,
    path: &Path,
    format: ImageFormat,
    jpeg_quality: u8,
    index: usize,
) -> Result<()> {
    let file = std::fs::File::create(path).map_err(|e| OfferError::io("create file", path, e))?;
    let mut out = BufWriter::new(file);
    let encoded = match format {
        // JPEG has no alpha channel.
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(image.to_rgb8())
            .write_with_encoder(JpegEncoder::new_with_quality(&mut out, jpeg_quality)),
        ImageFormat::Png => image.write_to(&mut out, image::ImageFormat::Png),
    };
    encoded.map_err(|e| OfferError::RasterisationFailed {
        page: index + 1,
        detail: format!("encoding failed: {e}"),
    })?;
    std::io::Write::flush(&mut out).map_err(|e| OfferError::io("write file", path, e))?;
    Ok(())
}
