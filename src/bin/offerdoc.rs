//! CLI binary for offerdoc.
//!
//! A thin shim over the library crate that maps CLI flags and `OFFERDOC_*`
//! environment variables to `PipelineConfig`, runs one command, and prints
//! the result.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use offerdoc::{
    list_offers, ContentLibrary, DocumentConverter, ErrorKind, ImageFormat, OfferError,
    OfferGenerator, OfferProgressCallback, OfferRequest, OutputFormat, PipelineConfig,
    PipelineError, ProgressCallback, SofficeConverter, Stage,
};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Spinner while assembling and converting; a page bar once rasterising starts.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(spinner_style);
        bar.set_prefix("Offer");
        bar.set_message("validating…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl OfferProgressCallback for CliProgressCallback {
    fn on_stage(&self, _request_id: &str, stage: Stage) {
        match stage {
            Stage::Finalized | Stage::Failed => self.bar.finish_and_clear(),
            other => self.bar.set_message(format!("{other}…")),
        }
    }

    fn on_page_rendered(&self, _page_num: usize, total_pages: usize) {
        if self.bar.length() != Some(total_pages as u64) {
            let style = ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}/{len} pages",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ");
            self.bar.set_length(total_pages as u64);
            self.bar.set_style(style);
            self.bar.set_prefix("Rendering");
        }
        self.bar.inc(1);
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Offer as page images (default folder layout: output/<id>/jpg/page_N.jpg)
  offerdoc generate --family wolftax --request form.json --format jpg

  # PDF, request read from stdin
  cat form.json | offerdoc generate --family aidrops --request - --format pdf

  # What the library holds
  offerdoc products
  offerdoc check

  # Finished offers, newest first
  offerdoc offers --json

REQUEST FILE:
  A flat JSON object: every key is a placeholder, except
    "produkty"       ordered list of product fragment ids ("1.docx", …)
    "output_format"  docx | pdf | jpg
  Dates are written {"date": "2024-12-10"}; null values count as missing.

EXIT CODES:
  0 ok   2 invalid request   3 library/configuration   4 converter   5 filesystem
"#;

/// Assemble offer documents from DOCX templates and convert them to PDF or images.
#[derive(Parser, Debug)]
#[command(
    name = "offerdoc",
    version,
    about = "Assemble offer documents from DOCX templates and product fragments",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Content library manifest (JSON).
    #[arg(long, short = 'l', global = true, env = "OFFERDOC_LIBRARY", default_value = "library/manifest.json")]
    library: PathBuf,

    /// Finalized offers are published here.
    #[arg(long, global = true, env = "OFFERDOC_OUTPUT_ROOT", default_value = "output")]
    output_root: PathBuf,

    /// Per-request scratch directories are created here.
    #[arg(long, global = true, env = "OFFERDOC_WORK_ROOT", default_value = "temp")]
    work_root: PathBuf,

    /// Print machine-readable JSON instead of text.
    #[arg(long, global = true, env = "OFFERDOC_JSON")]
    json: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "OFFERDOC_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "OFFERDOC_QUIET")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate one offer.
    Generate(GenerateArgs),
    /// List product fragment ids.
    Products,
    /// Validate the library and probe the converter.
    Check(ConverterArgs),
    /// List finalized offers, newest first.
    Offers,
}

#[derive(Args, Debug)]
struct GenerateArgs {
    /// Template family to use.
    #[arg(long, short = 'f', env = "OFFERDOC_FAMILY")]
    family: String,

    /// Request JSON file, or `-` for stdin.
    #[arg(long, short = 'r')]
    request: PathBuf,

    /// Override the request's output format: docx, pdf or jpg.
    #[arg(long, value_parser = OutputFormat::from_str)]
    format: Option<OutputFormat>,

    /// Rendering DPI (36–600).
    #[arg(long, env = "OFFERDOC_DPI", default_value_t = 100,
          value_parser = clap::value_parser!(u32).range(36..=600))]
    dpi: u32,

    /// Page image encoding.
    #[arg(long, env = "OFFERDOC_IMAGE_FORMAT", value_enum, default_value = "jpeg")]
    image_format: ImageFormatArg,

    /// JPEG quality (1–100).
    #[arg(long, env = "OFFERDOC_JPEG_QUALITY", default_value_t = 90)]
    jpeg_quality: u8,

    /// Sub-folder for page images.
    #[arg(long, env = "OFFERDOC_IMAGE_SUBFOLDER", default_value = "jpg")]
    image_subfolder: String,

    /// Pages rasterised at once.
    #[arg(short, long, env = "OFFERDOC_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Also write page images for docx/pdf output.
    #[arg(long, env = "OFFERDOC_PREVIEWS")]
    previews: bool,

    /// Prefix of request ids.
    #[arg(long, env = "OFFERDOC_REQUEST_PREFIX", default_value = "oferta")]
    request_prefix: String,

    /// Path to the pdfium shared library (file or directory).
    #[arg(long, env = "OFFERDOC_PDFIUM_LIBRARY")]
    pdfium_library: Option<PathBuf>,

    /// Disable the progress bar.
    #[arg(long, env = "OFFERDOC_NO_PROGRESS")]
    no_progress: bool,

    #[command(flatten)]
    converter: ConverterArgs,
}

#[derive(Args, Debug)]
struct ConverterArgs {
    /// External converter executable.
    #[arg(long, env = "OFFERDOC_CONVERTER", default_value = "soffice")]
    converter: String,

    /// Converter timeout in seconds.
    #[arg(long, env = "OFFERDOC_CONVERTER_TIMEOUT", default_value_t = 120)]
    converter_timeout: u64,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ImageFormatArg {
    Jpeg,
    Png,
}

impl From<ImageFormatArg> for ImageFormat {
    fn from(v: ImageFormatArg) -> Self {
        match v {
            ImageFormatArg::Jpeg => ImageFormat::Jpeg,
            ImageFormatArg::Png => ImageFormat::Png,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar gives all the feedback that matters; keep library
    // INFO logs out of its way unless asked for.
    let show_progress = matches!(&cli.command, Command::Generate(a) if !a.no_progress)
        && !cli.quiet
        && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match run(&cli, show_progress).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {e:#}", red("✘"));
            ExitCode::from(exit_code(&e))
        }
    }
}

async fn run(cli: &Cli, show_progress: bool) -> Result<()> {
    match &cli.command {
        Command::Generate(args) => generate(cli, args, show_progress).await,
        Command::Products => {
            let library = load_library(&cli.library)?;
            let ids = library.product_ids();
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&ids)?);
            } else {
                for id in ids {
                    println!("{id}");
                }
            }
            Ok(())
        }
        Command::Check(args) => check(cli, args).await,
        Command::Offers => {
            let offers = list_offers(&cli.output_root).context("Failed to list offers")?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&offers)?);
            } else {
                for offer in offers {
                    let created = offer
                        .created
                        .map(|c| c.format("%Y-%m-%d %H:%M:%S").to_string())
                        .unwrap_or_else(|| "-".into());
                    println!("{}  {}  {}", created, bold(&offer.name), dim(&format!("{} files", offer.files.len())));
                }
            }
            Ok(())
        }
    }
}

async fn generate(cli: &Cli, args: &GenerateArgs, show_progress: bool) -> Result<()> {
    let mut request = read_request(&args.request)?;
    if let Some(format) = args.format {
        request.format = format;
    }
    let library = Arc::new(load_library(&cli.library)?);
    let config = build_config(cli, args)?;

    let mut generator = OfferGenerator::with_system_tools(library, config);
    if show_progress {
        generator = generator.with_progress(CliProgressCallback::new() as ProgressCallback);
    }

    let artifact = generator.generate(&args.family, &request).await?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&artifact)?);
    } else if !cli.quiet {
        println!("{}", artifact.primary_path.display());
        eprintln!(
            "{}  {}  {}  {} bytes  {}ms",
            green("✔"),
            bold(&artifact.request_id),
            artifact.format,
            artifact.byte_size,
            artifact.elapsed_ms,
        );
        if let (Some(dir), Some(pages)) = (&artifact.image_dir, artifact.page_count) {
            eprintln!("   {}", dim(&format!("{pages} page images in {}", dir.display())));
        }
    }
    Ok(())
}

async fn check(cli: &Cli, args: &ConverterArgs) -> Result<()> {
    let library = load_library(&cli.library)?;
    let health = library.health();
    let converter = SofficeConverter::new(args.converter.clone());
    let available = converter.is_available().await;

    if cli.json {
        let report = serde_json::json!({
            "library": health,
            "converter": { "program": converter.program(), "available": available },
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{} library: {}, {} products", green("✔"), health.status, health.product_count);
        for family in &health.families {
            println!(
                "  {}  fragments: {}  anchor: {}",
                bold(&family.name),
                family.fragments.join(", "),
                family.anchor
            );
            println!("    {}", dim(&format!("placeholders: {}", family.placeholders.join(", "))));
        }
        let mark = if available { green("✔") } else { red("✘") };
        println!("{mark} converter: {}", converter.program());
    }
    if !available {
        anyhow::bail!("Converter '{}' is not available", converter.program());
    }
    Ok(())
}

fn load_library(manifest: &Path) -> Result<ContentLibrary> {
    ContentLibrary::load(manifest)
        .with_context(|| format!("Failed to load content library from {}", manifest.display()))
}

fn read_request(path: &Path) -> Result<OfferRequest> {
    let text = if path == Path::new("-") {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read request from stdin")?;
        buf
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read request from {}", path.display()))?
    };
    serde_json::from_str(&text).context("Request is not valid JSON")
}

/// Map CLI args to `PipelineConfig`.
fn build_config(cli: &Cli, args: &GenerateArgs) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .output_root(&cli.output_root)
        .work_root(&cli.work_root)
        .dpi(args.dpi)
        .image_format(args.image_format.into())
        .jpeg_quality(args.jpeg_quality)
        .image_subfolder(&args.image_subfolder)
        .render_concurrency(args.concurrency)
        .render_previews(args.previews)
        .request_prefix(&args.request_prefix)
        .converter_program(&args.converter.converter)
        .converter_timeout_secs(args.converter.converter_timeout);
    if let Some(path) = &args.pdfium_library {
        builder = builder.pdfium_library(path);
    }
    builder.build().context("Invalid configuration")
}

/// Exit code by error kind; anything without a pipeline error is a usage failure.
fn exit_code(e: &anyhow::Error) -> u8 {
    let kind = e
        .downcast_ref::<PipelineError>()
        .map(PipelineError::kind)
        .or_else(|| e.downcast_ref::<OfferError>().map(OfferError::kind));
    match kind {
        Some(ErrorKind::Validation) => 2,
        Some(ErrorKind::Configuration) => 3,
        Some(ErrorKind::Conversion) => 4,
        Some(ErrorKind::Resource) => 5,
        None => 1,
    }
}
