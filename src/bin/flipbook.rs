//! CLI binary for flipbook-convert.
//!
//! A thin shim over the library crate: maps flags to `ConversionConfig`,
//! keeps the catalog in a JSON file beside the media root (never inside it,
//! since the media root is served) and prints results.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use flipbook_convert::{
    convert_many, viewer_payload, Catalog, ConversionConfig, ConversionOutcome,
    ConversionProgressCallback, Converter, Document, DocumentId, JsonFileCatalog,
    PdfiumRasterizer, ProgressCallback, SkipReason,
};
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io;
use std::path::{Path, PathBuf};
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

/// Terminal progress bar for one document at a time.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    /// Stays hidden until a job actually opens a PDF, so skipped documents
    /// print nothing but their summary line.
    fn new() -> Arc<Self> {
        let bar = ProgressBar::with_draw_target(Some(0), ProgressDrawTarget::hidden());
        Arc::new(Self { bar })
    }
}

impl ConversionProgressCallback for CliProgressCallback {
    fn on_conversion_start(&self, doc_id: &str, total_pages: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ");
        self.bar.set_draw_target(ProgressDrawTarget::stderr());
        self.bar.set_style(style);
        self.bar.set_length(total_pages as u64);
        self.bar.reset();
        self.bar.set_prefix(format!("Document {doc_id}"));
        self.bar.enable_steady_tick(Duration::from_millis(80));
    }

    fn on_page_complete(&self, _doc_id: &str, page_num: usize, total: usize, bytes: usize) {
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}",
            green("✓"),
            page_num,
            total,
            dim(&format!("{:>7} bytes", bytes)),
        ));
        self.bar.inc(1);
    }

    fn on_conversion_failed(&self, doc_id: &str, error: &str) {
        self.bar.println(format!("  {} {}: {}", red("✗"), doc_id, red(error)));
        self.bar.finish_and_clear();
    }

    fn on_conversion_complete(&self, _doc_id: &str, _total_pages: usize) {
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Register a booklet and convert it
  flipbook add 42 brochure.pdf --title "Spring catalogue" --event "Expo 2026"

  # Retry a failed conversion, or force a full re-render
  flipbook convert 42
  flipbook convert 42 --force

  # Convert everything that still has no pages
  flipbook convert --all

  # Page URLs handed to the viewer
  flipbook pages 42 --json

  # Access grants
  flipbook grant alice 42
  flipbook view 42 --user alice --ip 203.0.113.9
  flipbook views 42

ENVIRONMENT VARIABLES:
  FLIPBOOK_MEDIA_ROOT   Directory holding books/, thumbnails/ and pdfs/
  FLIPBOOK_CATALOG      Catalog file (default: catalog.json beside the media root)
  FLIPBOOK_MEDIA_URL    Public URL prefix of the media root (default /media/)
  PDFIUM_LIB_PATH       Path to libpdfium (file or directory)
  RUST_LOG              Overrides the log filter (e.g. flipbook_convert=debug)
"#;

/// Convert PDF booklets into protected flipbook page images.
#[derive(Parser, Debug)]
#[command(
    name = "flipbook",
    version,
    about = "Convert PDF booklets into protected flipbook page images",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Media root directory.
    #[arg(long, global = true, env = "FLIPBOOK_MEDIA_ROOT", default_value = "media")]
    media_root: PathBuf,

    /// Catalog file; defaults to `catalog.json` next to the media root.
    #[arg(long, global = true, env = "FLIPBOOK_CATALOG")]
    catalog: Option<PathBuf>,

    /// Public URL prefix for files under the media root.
    #[arg(long, global = true, env = "FLIPBOOK_MEDIA_URL", default_value = "/media/")]
    media_url: String,

    /// Path to the pdfium shared library or its directory.
    #[arg(long, global = true, env = "PDFIUM_LIB_PATH")]
    pdfium_lib: Option<PathBuf>,

    /// Documents converted concurrently by `convert --all`.
    #[arg(long, global = true, env = "FLIPBOOK_WORKERS", default_value_t = 2)]
    workers: usize,

    /// Whole-job timeout in seconds.
    #[arg(long, global = true, env = "FLIPBOOK_JOB_TIMEOUT", default_value_t = 600)]
    job_timeout: u64,

    /// Print JSON instead of human-readable text.
    #[arg(long, global = true)]
    json: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "FLIPBOOK_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "FLIPBOOK_QUIET")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register a PDF as a new document and convert it.
    Add {
        id: String,
        pdf: PathBuf,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        event: Option<String>,
        /// Operator-supplied thumbnail image; copied under thumbnails/.
        #[arg(long)]
        thumbnail: Option<PathBuf>,
        /// Register without publishing.
        #[arg(long)]
        unpublished: bool,
    },
    /// Convert documents that have no pages yet.
    Convert {
        /// Document ids; omit with --all.
        ids: Vec<String>,
        /// Every document that still needs conversion.
        #[arg(long, conflicts_with = "ids")]
        all: bool,
        /// Reset and re-render even if already converted.
        #[arg(long)]
        force: bool,
    },
    /// Derive a thumbnail from page 1 for converted documents lacking one.
    Backfill { id: String },
    /// List page URLs of a converted document.
    Pages { id: String },
    /// Show catalog entries and their conversion status.
    Status { id: Option<String> },
    /// Give a user access to a document.
    Grant { user: String, id: String },
    /// Take a user's access away.
    Revoke { user: String, id: String },
    /// Produce the viewer payload for a user.
    View {
        id: String,
        #[arg(long)]
        user: String,
        /// Client address recorded with the view.
        #[arg(long)]
        ip: Option<String>,
    },
    /// List recorded views of a document.
    Views { id: String },
    /// Print the page count of a PDF without converting it.
    Inspect { pdf: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let converts = matches!(
        cli.command,
        Command::Add { .. } | Command::Convert { .. } | Command::Backfill { .. }
    );
    let show_progress = converts && !cli.quiet && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else if cli.json || show_progress {
        "warn"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn ConversionProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;

    let catalog_path = cli
        .catalog
        .clone()
        .unwrap_or_else(|| default_catalog_path(&cli.media_root));
    let catalog = Arc::new(
        JsonFileCatalog::open(&catalog_path)
            .with_context(|| format!("Failed to open catalog {}", catalog_path.display()))?,
    );
    let converter = Arc::new(Converter::new(config, catalog.clone()));

    match cli.command {
        Command::Add {
            ref id,
            ref pdf,
            ref title,
            ref event,
            ref thumbnail,
            unpublished,
        } => {
            let id = parse_id(id)?;
            probe_pdfium(&cli)?;
            let upload = NewDocument {
                id: id.clone(),
                pdf: pdf.clone(),
                title: title.clone(),
                event: event.clone(),
                thumbnail: thumbnail.clone(),
                unpublished,
            };
            let outcome = register(&converter, upload).await?;
            report(&cli, &id, &outcome)?;
        }

        Command::Convert {
            ref ids,
            all,
            force,
        } => {
            probe_pdfium(&cli)?;
            let ids: Vec<DocumentId> = if all {
                catalog
                    .list()?
                    .into_iter()
                    .filter(|d| force || d.needs_conversion())
                    .map(|d| d.id)
                    .collect()
            } else {
                ids.iter().map(|s| parse_id(s)).collect::<Result<_>>()?
            };
            if ids.is_empty() {
                if !cli.quiet {
                    eprintln!("Nothing to convert");
                }
                return Ok(());
            }

            let mut failed = 0usize;
            if force {
                for id in &ids {
                    let outcome = converter.convert_document_forced(id).await;
                    failed += usize::from(matches!(outcome, ConversionOutcome::Failed { .. }));
                    report(&cli, id, &outcome)?;
                }
            } else {
                let mut stream = convert_many(Arc::clone(&converter), ids, cli.workers);
                while let Some((id, outcome)) = stream.next().await {
                    failed += usize::from(matches!(outcome, ConversionOutcome::Failed { .. }));
                    report(&cli, &id, &outcome)?;
                }
            }
            if failed > 0 {
                anyhow::bail!("{failed} document(s) failed to convert");
            }
        }

        Command::Backfill { ref id } => {
            probe_pdfium(&cli)?;
            let id = parse_id(id)?;
            match converter.backfill_thumbnail(&id).await? {
                Some(reference) => println!("{}", converter.url_resolver().media(&reference)),
                None if !cli.quiet => eprintln!("No thumbnail needed for {id}"),
                None => {}
            }
        }

        Command::Pages { ref id } => {
            let id = parse_id(id)?;
            let doc = catalog
                .get(&id)?
                .with_context(|| format!("Document {id} not found"))?;
            let urls = converter.url_resolver().pages(&id, doc.total_pages);
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&urls)?);
            } else {
                for url in urls {
                    println!("{url}");
                }
            }
        }

        Command::Status { ref id } => {
            let docs = match id {
                Some(id) => {
                    let id = parse_id(id)?;
                    vec![catalog
                        .get(&id)?
                        .with_context(|| format!("Document {id} not found"))?]
                }
                None => catalog.list()?,
            };
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&docs)?);
            } else {
                for d in &docs {
                    println!(
                        "{:<12} {:<14} {:>4} pages {}  {}{}",
                        d.id.as_str(),
                        d.status.to_string(),
                        d.total_pages,
                        dim(&format!("({} on disk)", converter.layout().existing_pages(&d.id))),
                        bold(&d.title),
                        d.last_error
                            .as_deref()
                            .map(|e| format!("  {}", red(e)))
                            .unwrap_or_default(),
                    );
                }
            }
        }

        Command::Grant { ref user, ref id } => {
            catalog.grant(user, &parse_id(id)?)?;
        }

        Command::Revoke { ref user, ref id } => {
            catalog.revoke(user, &parse_id(id)?)?;
        }

        Command::View {
            ref id,
            ref user,
            ref ip,
        } => {
            let id = parse_id(id)?;
            let payload = viewer_payload(
                catalog.as_ref(),
                &converter.url_resolver(),
                user,
                ip.as_deref(),
                &id,
            )?;
            println!("{}", serde_json::to_string_pretty(&payload)?);
        }

        Command::Views { ref id } => {
            let views = catalog.views(&parse_id(id)?)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&views)?);
            } else {
                for v in &views {
                    println!(
                        "{:>12}  {:<20} {}",
                        v.viewed_at,
                        v.user,
                        dim(v.ip.as_deref().unwrap_or("-")),
                    );
                }
            }
        }

        Command::Inspect { ref pdf } => {
            probe_pdfium(&cli)?;
            let pages = converter
                .inspect(pdf)
                .await
                .context("Failed to inspect PDF")?;
            if cli.json {
                println!("{}", serde_json::json!({ "file": pdf, "pages": pages }));
            } else {
                println!("File:   {}", pdf.display());
                println!("Pages:  {}", pages);
            }
        }
    }

    Ok(())
}

/// Map CLI args to `ConversionConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ConversionConfig> {
    let mut builder = ConversionConfig::builder()
        .media_root(&cli.media_root)
        .media_url(&cli.media_url)
        .workers(cli.workers)
        .job_timeout_secs(cli.job_timeout);
    if let Some(ref lib) = cli.pdfium_lib {
        builder = builder.pdfium_library(lib);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }
    builder.build().context("Invalid configuration")
}

/// `<parent of media-root>/catalog.json`.
fn default_catalog_path(media_root: &Path) -> PathBuf {
    match media_root.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.join("catalog.json"),
        _ => PathBuf::from("catalog.json"),
    }
}

/// Arguments of `flipbook add`.
struct NewDocument {
    id: DocumentId,
    pdf: PathBuf,
    title: Option<String>,
    event: Option<String>,
    thumbnail: Option<PathBuf>,
    unpublished: bool,
}

/// Copy the upload (and thumbnail) under the media root, then create and
/// convert the document. An id that is already registered is refused before
/// anything is copied, so its files are never replaced.
async fn register(converter: &Converter, upload: NewDocument) -> Result<ConversionOutcome> {
    let NewDocument {
        id,
        pdf,
        title,
        event,
        thumbnail,
        unpublished,
    } = upload;
    if converter.catalog().get(&id)?.is_some() {
        anyhow::bail!("Document {id} already exists; use `convert {id} --force` to re-render it");
    }

    let media_root = converter.layout().media_root();
    let stored_pdf = store_upload(media_root, "pdfs", &id, &pdf, "pdf").await?;

    let title = title.unwrap_or_else(|| default_title(&pdf));
    let mut doc = Document::new(id.clone(), title, stored_pdf);
    if let Some(event) = event {
        doc = doc.with_event(event);
    }
    if let Some(thumb) = thumbnail {
        let ext = thumb.extension().and_then(|e| e.to_str()).unwrap_or("jpg");
        let stored = store_upload(media_root, "thumbnails", &id, &thumb, ext).await?;
        let reference = stored
            .strip_prefix(media_root)
            .unwrap_or(stored.as_path())
            .to_string_lossy()
            .replace('\\', "/");
        doc = doc.with_thumbnail(reference);
    }
    if unpublished {
        doc = doc.unpublished();
    }

    converter
        .create_document(doc)
        .await
        .context("Failed to register document")
}

fn parse_id(s: &str) -> Result<DocumentId> {
    s.parse::<DocumentId>()
        .with_context(|| format!("Invalid document id '{s}'"))
}

/// Fail before touching the catalog when pdfium cannot be loaded.
fn probe_pdfium(cli: &Cli) -> Result<()> {
    PdfiumRasterizer::new(cli.pdfium_lib.clone())
        .probe()
        .context("PDFium is not available")
}

/// Copy an uploaded file to `<media-root>/<subdir>/<id>.<ext>`.
async fn store_upload(
    media_root: &Path,
    subdir: &str,
    id: &DocumentId,
    src: &Path,
    ext: &str,
) -> Result<PathBuf> {
    let dir = media_root.join(subdir);
    tokio::fs::create_dir_all(&dir)
        .await
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    let dest = dir.join(format!("{id}.{ext}"));
    tokio::fs::copy(src, &dest)
        .await
        .with_context(|| format!("Failed to copy {} to {}", src.display(), dest.display()))?;
    Ok(dest)
}

fn default_title(pdf: &Path) -> String {
    pdf.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "Untitled".to_string())
}

fn report(cli: &Cli, id: &DocumentId, outcome: &ConversionOutcome) -> Result<()> {
    if cli.json {
        let line = serde_json::json!({ "id": id, "result": outcome });
        println!("{line}");
        return Ok(());
    }
    if cli.quiet {
        return Ok(());
    }
    match outcome {
        ConversionOutcome::Converted(r) => eprintln!(
            "{} {}  {} pages  {}ms{}",
            green("✔"),
            bold(id.as_str()),
            r.total_pages,
            r.duration_ms,
            if r.thumbnail_generated {
                dim("  (thumbnail generated)")
            } else {
                String::new()
            },
        ),
        ConversionOutcome::Skipped(SkipReason::AlreadyConverted { total_pages }) => eprintln!(
            "{} {}  already converted ({} pages)",
            dim("–"),
            bold(id.as_str()),
            total_pages
        ),
        ConversionOutcome::Skipped(reason) => {
            eprintln!("{} {}  skipped: {:?}", dim("–"), bold(id.as_str()), reason)
        }
        ConversionOutcome::Failed { error } => {
            eprintln!("{} {}  {}", red("✘"), bold(id.as_str()), red(error))
        }
    }
    Ok(())
}
