//! CLI binary for edgequake-extract.
//!
//! A thin shim over the library crate: maps flags (with env fallbacks) to
//! `ExtractionConfig`, then either serves the HTTP API or analyzes a single
//! URL and prints the result as JSON.

use anyhow::{bail, Context, Result};
use clap::Parser;
use edgequake_extract::server::{router, AuthConfig, DEFAULT_SECRET_HEADER};
use edgequake_extract::{
    AnalysisRequest, DocumentMode, ExtractionConfig, ExtractionSchema, Extractor,
    RasterBackendKind, ResourceKind,
};
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Instant;
use tracing::info;
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

const AFTER_HELP: &str = r#"EXAMPLES:
  # Serve on :8080, guarded by a shared secret
  EXTRACT_SHARED_SECRET=s3cret edgequake-extract --bind 0.0.0.0:8080

  # Analyze one plan set and print the JSON result
  edgequake-extract --analyze https://example.com/plans/lot-12.pdf \
      --context builder="Acme Homes" --context community="Willow Creek"

  # Use a custom schema and the poppler renderer
  edgequake-extract --schema schema.json --raster-backend poppler

  # Call a chat provider through edgequake-llm instead of the Responses API
  edgequake-extract --provider anthropic --model claude-sonnet-4-20250514

REQUEST (POST /analyze):
  {"resourceUrl": "https://…/plan.pdf", "declaredType": "pdf",
   "context": {"builder": "Acme Homes"}}
  Header: x-api-key: <secret>

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          Key for the Responses API backend
  EXTRACT_SHARED_SECRET   Shared secret expected on /analyze
  EDGEQUAKE_PROVIDER      Use an edgequake-llm provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Model ID
  PDFIUM_LIB_PATH         Directory or file of libpdfium
  RUST_LOG                Log filter (overrides --verbose)
"#;

/// Extract structured JSON from construction drawings with a vision LLM.
#[derive(Parser, Debug)]
#[command(
    name = "edgequake-extract",
    version,
    about = "Extract structured JSON from plan PDFs and site photos using Vision LLMs",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Analyze this URL once, print the result, and exit instead of serving.
    #[arg(long, value_name = "URL")]
    analyze: Option<String>,

    /// Declared type for --analyze (pdf, png, image/jpeg, …).
    #[arg(long = "type", value_name = "HINT", requires = "analyze")]
    declared_type: Option<String>,

    /// Context entry for --analyze, as key=value. Repeatable.
    #[arg(long = "context", value_name = "KEY=VALUE", value_parser = parse_context, requires = "analyze")]
    context: Vec<(String, String)>,

    // ── Server ───────────────────────────────────────────────────────────
    /// Address to listen on.
    #[arg(long, env = "EXTRACT_BIND", default_value = "0.0.0.0:8080")]
    bind: SocketAddr,

    /// Shared secret required on /analyze. Unset disables the check.
    #[arg(long, env = "EXTRACT_SHARED_SECRET", hide_env_values = true)]
    secret: Option<String>,

    /// Header carrying the shared secret.
    #[arg(long, env = "EXTRACT_SECRET_HEADER", default_value = DEFAULT_SECRET_HEADER)]
    secret_header: String,

    // ── Model ────────────────────────────────────────────────────────────
    /// Model ID.
    #[arg(long, env = "EDGEQUAKE_MODEL", default_value = "gpt-4.1")]
    model: String,

    /// edgequake-llm provider name. Unset uses the Responses API directly.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// API key for the Responses API backend.
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Base URL of the Responses API.
    #[arg(long, env = "EXTRACT_API_BASE", default_value = "https://api.openai.com/v1")]
    api_base: String,

    /// Sampling temperature (0.0–2.0).
    #[arg(long, env = "EXTRACT_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Max output tokens per call.
    #[arg(long, env = "EXTRACT_MAX_TOKENS", default_value_t = 4096)]
    max_tokens: usize,

    /// Image detail hint (low, high, auto).
    #[arg(long, env = "EXTRACT_IMAGE_DETAIL", default_value = "high")]
    image_detail: String,

    /// JSON file with an ExtractionSchema replacing the built-in plan review schema.
    #[arg(long, env = "EXTRACT_SCHEMA")]
    schema: Option<PathBuf>,

    /// Text file replacing the built-in instructions.
    #[arg(long, env = "EXTRACT_INSTRUCTIONS")]
    instructions: Option<PathBuf>,

    // ── Rendering ────────────────────────────────────────────────────────
    /// Target render DPI (36–400); lowered automatically for oversized sheets.
    #[arg(long, env = "EXTRACT_DPI", default_value_t = 150,
          value_parser = clap::value_parser!(u32).range(36..=400))]
    dpi: u32,

    /// Leading pages rendered per document.
    #[arg(long, env = "EXTRACT_MAX_PAGES", default_value_t = 3)]
    max_pages: usize,

    /// Pixel budget per rendered page.
    #[arg(long, env = "EXTRACT_MAX_PIXELS", default_value_t = 12_000_000)]
    max_pixels: u64,

    /// Largest source download in bytes.
    #[arg(long, env = "EXTRACT_MAX_BYTES", default_value_t = 50 * 1024 * 1024)]
    max_bytes: u64,

    /// Render backend.
    #[arg(long, env = "EXTRACT_RASTER_BACKEND", value_enum, default_value = "pdfium")]
    raster_backend: RasterArg,

    /// Directory or file of the pdfium library.
    #[arg(long, env = "PDFIUM_LIB_PATH")]
    pdfium_lib: Option<PathBuf>,

    /// Directory holding pdfinfo and pdftoppm.
    #[arg(long, env = "EXTRACT_POPPLER_BIN")]
    poppler_bin: Option<PathBuf>,

    /// Rasterize documents locally, or hand the link to the model.
    #[arg(long, env = "EXTRACT_DOCUMENT_MODE", value_enum, default_value = "rasterize")]
    document_mode: ModeArg,

    /// Kind assumed for links with no recognisable extension.
    #[arg(long, env = "EXTRACT_AMBIGUOUS_KIND", value_enum, default_value = "document")]
    ambiguous_kind: KindArg,

    // ── Timeouts ─────────────────────────────────────────────────────────
    /// Source download timeout in seconds.
    #[arg(long, env = "EXTRACT_DOWNLOAD_TIMEOUT", default_value_t = 60)]
    download_timeout: u64,

    /// Render timeout in seconds.
    #[arg(long, env = "EXTRACT_RENDER_TIMEOUT", default_value_t = 90)]
    render_timeout: u64,

    /// Model call timeout in seconds.
    #[arg(long, env = "EXTRACT_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    // ── Output ───────────────────────────────────────────────────────────
    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "EXTRACT_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "EXTRACT_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum RasterArg {
    Pdfium,
    Poppler,
}

impl From<RasterArg> for RasterBackendKind {
    fn from(v: RasterArg) -> Self {
        match v {
            RasterArg::Pdfium => RasterBackendKind::Pdfium,
            RasterArg::Poppler => RasterBackendKind::Poppler,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ModeArg {
    Rasterize,
    Direct,
}

impl From<ModeArg> for DocumentMode {
    fn from(v: ModeArg) -> Self {
        match v {
            ModeArg::Rasterize => DocumentMode::Rasterize,
            ModeArg::Direct => DocumentMode::DirectIngest,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum KindArg {
    Image,
    Document,
}

impl From<KindArg> for ResourceKind {
    fn from(v: KindArg) -> Self {
        match v {
            KindArg::Image => ResourceKind::Image,
            KindArg::Document => ResourceKind::PaginatedDocument,
        }
    }
}

fn parse_context(s: &str) -> Result<(String, String), String> {
    let (k, v) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{s}'"))?;
    if k.trim().is_empty() {
        return Err(format!("empty key in '{s}'"));
    }
    Ok((k.trim().to_string(), v.trim().to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
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

    let config = build_config(&cli).await?;
    let extractor = Extractor::from_config(config).context("Failed to initialise extractor")?;

    // ── One-shot mode ────────────────────────────────────────────────────
    if let Some(ref url) = cli.analyze {
        let mut request = AnalysisRequest::new(url.clone());
        if let Some(ref hint) = cli.declared_type {
            request = request.with_declared_type(hint.clone());
        }
        for (k, v) in &cli.context {
            request = request.with_context(k.clone(), v.clone());
        }

        let start = Instant::now();
        match extractor.analyze(&request).await {
            Ok(result) => {
                let json = serde_json::to_string_pretty(&result)
                    .context("Failed to serialise result")?;
                println!("{json}");
                if !cli.quiet {
                    eprintln!(
                        "{} {} as {}  {}",
                        green("✔"),
                        url,
                        result.source_kind.as_str(),
                        dim(&format!(
                            "{} image(s), {}ms",
                            result.pages_sent,
                            start.elapsed().as_millis()
                        )),
                    );
                }
                return Ok(());
            }
            Err(e) => {
                eprintln!("{} {} ({})", red("✘"), e, e.kind().as_str());
                bail!("analysis failed");
            }
        }
    }

    // ── Server mode ──────────────────────────────────────────────────────
    let auth = AuthConfig::new(cli.secret.clone(), &cli.secret_header)
        .context("Invalid shared-secret settings")?;
    let app = router(extractor, auth);

    let listener = tokio::net::TcpListener::bind(cli.bind)
        .await
        .with_context(|| format!("Failed to bind {}", cli.bind))?;
    info!("Listening on http://{}", cli.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutting down");
    }
}

/// Map CLI arguments to an `ExtractionConfig`.
async fn build_config(cli: &Cli) -> Result<ExtractionConfig> {
    let mut builder = ExtractionConfig::builder()
        .model(&cli.model)
        .api_base_url(&cli.api_base)
        .temperature(cli.temperature)
        .max_output_tokens(cli.max_tokens)
        .image_detail(&cli.image_detail)
        .target_dpi(cli.dpi)
        .max_pages(cli.max_pages)
        .max_pixels_per_page(cli.max_pixels)
        .max_source_bytes(cli.max_bytes)
        .raster_backend(cli.raster_backend.into())
        .document_mode(cli.document_mode.into())
        .ambiguous_kind(cli.ambiguous_kind.into())
        .download_timeout_secs(cli.download_timeout)
        .render_timeout_secs(cli.render_timeout)
        .api_timeout_secs(cli.api_timeout);

    if let Some(ref key) = cli.api_key {
        builder = builder.api_key(key);
    }
    if let Some(ref name) = cli.provider {
        builder = builder.provider_name(name);
    }
    if let Some(ref path) = cli.pdfium_lib {
        builder = builder.pdfium_lib_path(path);
    }
    if let Some(ref dir) = cli.poppler_bin {
        builder = builder.poppler_bin_dir(dir);
    }

    if let Some(ref path) = cli.schema {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read schema file: {}", path.display()))?;
        let schema: ExtractionSchema = serde_json::from_str(&raw)
            .with_context(|| format!("Schema file is not a valid schema: {}", path.display()))?;
        builder = builder.schema(schema);
    }

    if let Some(ref path) = cli.instructions {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read instructions file: {}", path.display()))?;
        builder = builder.instructions(text);
    }

    builder.build().context("Invalid configuration")
}
