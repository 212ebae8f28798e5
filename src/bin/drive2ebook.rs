//! CLI binary for drive2ebook.
//!
//! A thin shim over the library crate: it plays the presentation role,
//! rendering controller snapshots to the terminal and turning flags and
//! Ctrl-C into controller commands.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use drive2ebook::{
    ConversionMode, Gateway, GatewayConfig, HostEnvironment, HttpGateway, JobOutcome, JobRequest,
    JsonFileStorage, SessionStore, WorkflowController, WorkflowSnapshot, WorkflowState,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
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
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── Terminal host ────────────────────────────────────────────────────────────

/// The terminal has no address bar: "navigating" prints the link, and the
/// address is whatever the user pasted back with `--redirected-to`.
struct TerminalHost {
    address: Mutex<Option<String>>,
}

impl TerminalHost {
    fn new(address: Option<String>) -> Self {
        Self {
            address: Mutex::new(address),
        }
    }
}

impl HostEnvironment for TerminalHost {
    fn navigate(&self, url: &str) {
        eprintln!(
            "{} Open this link in a browser to connect Google Drive:\n\n  {}\n",
            cyan("◆"),
            bold(url)
        );
    }

    fn current_address(&self) -> Option<String> {
        self.address.lock().ok().and_then(|a| a.clone())
    }

    fn replace_address(&self, address: &str) {
        if let Ok(mut slot) = self.address.lock() {
            *slot = Some(address.to_string());
        }
    }
}

// ── CLI ──────────────────────────────────────────────────────────────────────

const AFTER_HELP: &str = r#"EXAMPLES:
  # Connect Google Drive (prints a link, waits until you approve it)
  drive2ebook login

  # Build a PDF ebook from a folder of page photos
  drive2ebook convert https://drive.google.com/drive/folders/1AbC... -o book.pdf

  # OCR the pages with Gemini (key is remembered for next time)
  drive2ebook convert --ocr --api-key AIza... https://drive.google.com/drive/folders/1AbC...

  # Stop a conversion started from another terminal
  drive2ebook cancel

ENVIRONMENT VARIABLES:
  DRIVE2EBOOK_SERVER      Backend address (default http://localhost:8000)
  DRIVE2EBOOK_API_KEY     Gemini API key for --ocr
  DRIVE2EBOOK_STATE_FILE  Where the API key is remembered
"#;

/// Turn a Google Drive folder of page images into a PDF ebook or OCR text.
#[derive(Parser, Debug)]
#[command(
    name = "drive2ebook",
    version,
    about = "Turn a Google Drive folder of page images into a PDF ebook or OCR text",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Backend base URL.
    #[arg(long, global = true, env = "DRIVE2EBOOK_SERVER", default_value = drive2ebook::config::DEFAULT_BASE_URL)]
    server: String,

    /// File where the OCR API key is remembered.
    #[arg(long, global = true, env = "DRIVE2EBOOK_STATE_FILE")]
    state_file: Option<PathBuf>,

    /// Give up on a conversion after this many seconds.
    #[arg(long, global = true, env = "DRIVE2EBOOK_SUBMIT_TIMEOUT", default_value_t = 600)]
    submit_timeout: u64,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "DRIVE2EBOOK_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "DRIVE2EBOOK_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connect a Google Drive account.
    Login {
        /// Address the browser landed on after approving (contains `status=success`).
        #[arg(long)]
        redirected_to: Option<String>,

        /// Seconds to wait for the approval before giving up.
        #[arg(long, default_value_t = 180)]
        wait: u64,
    },

    /// Disconnect the Google Drive account.
    Logout,

    /// Show whether the backend is reachable and signed in.
    Status {
        /// Print the workflow snapshot as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Convert a Drive folder and download the result.
    Convert {
        /// Google Drive folder link.
        folder: String,

        /// Smart OCR mode (requires a Gemini API key).
        #[arg(long)]
        ocr: bool,

        /// Gemini API key. Falls back to the remembered one.
        #[arg(long, env = "DRIVE2EBOOK_API_KEY", hide_env_values = true)]
        api_key: Option<String>,

        /// Where to save the result. Defaults to the server-suggested name.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Disable the progress bar.
        #[arg(long)]
        no_progress: bool,
    },

    /// Ask the backend to stop the running conversion.
    Cancel,
}

struct App {
    gateway: Arc<HttpGateway>,
    controller: WorkflowController,
    quiet: bool,
}

fn build_app(cli: &Cli) -> Result<App> {
    let config = GatewayConfig::builder()
        .base_url(&cli.server)
        .submit_timeout_secs(cli.submit_timeout)
        .build()
        .context("Invalid backend settings")?;

    let state_file = match &cli.state_file {
        Some(path) => path.clone(),
        None => JsonFileStorage::default_path()
            .context("No config directory on this platform; pass --state-file")?,
    };

    let gateway = Arc::new(HttpGateway::new(config.clone()).context("Failed to build HTTP client")?);
    let storage = Arc::new(JsonFileStorage::new(state_file));
    let session = Arc::new(SessionStore::new(gateway.clone(), storage));
    let controller = WorkflowController::new(gateway.clone(), session, config.download_url());

    Ok(App {
        gateway,
        controller,
        quiet: cli.quiet,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let show_progress = match &cli.command {
        Command::Convert { no_progress, .. } => !cli.quiet && !no_progress,
        _ => false,
    };
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

    let app = build_app(&cli)?;

    match cli.command {
        Command::Login {
            redirected_to,
            wait,
        } => login(&app, redirected_to, wait).await,
        Command::Logout => {
            app.controller.sign_out().await;
            if !app.quiet {
                eprintln!("{} Signed out", green("✔"));
            }
            Ok(())
        }
        Command::Status { json } => status(&app, json).await,
        Command::Convert {
            folder,
            ocr,
            api_key,
            output,
            ..
        } => {
            let mode = if ocr {
                ConversionMode::Ocr
            } else {
                ConversionMode::Pdf
            };
            convert(&app, mode, folder, api_key, output, show_progress).await
        }
        Command::Cancel => {
            app.gateway
                .cancel()
                .await
                .context("Failed to reach the backend")?;
            if !app.quiet {
                eprintln!("{} Cancellation requested", green("✔"));
            }
            Ok(())
        }
    }
}

async fn login(app: &App, redirected_to: Option<String>, wait_secs: u64) -> Result<()> {
    let host = TerminalHost::new(redirected_to);
    if app.controller.initialize(&host).await {
        if !app.quiet {
            let snapshot = app.controller.snapshot();
            let line = snapshot
                .status_message
                .unwrap_or_else(|| "Google Drive already connected".to_string());
            eprintln!("{} {}", green("✔"), line);
        }
        return Ok(());
    }

    app.controller
        .begin_authorization(&host)
        .await
        .context("Error connecting to backend. Make sure the server is running.")?;

    const POLL: Duration = Duration::from_secs(2);
    let attempts = (wait_secs / POLL.as_secs()).max(1) as u32;
    if app.controller.wait_for_session(attempts, POLL).await {
        if !app.quiet {
            eprintln!("{} Successfully connected to Google Drive!", green("✔"));
        }
        Ok(())
    } else {
        bail!("Timed out after {wait_secs}s waiting for Google Drive authorization")
    }
}

async fn status(app: &App, json: bool) -> Result<()> {
    let host = TerminalHost::new(None);
    app.controller.initialize(&host).await;
    let snapshot = app.controller.snapshot();

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&snapshot).context("Failed to serialise status")?
        );
        return Ok(());
    }

    let connected = if snapshot.authenticated {
        green("connected")
    } else {
        red("not connected")
    };
    let key = if app.controller.session().credential().is_some() {
        "saved"
    } else {
        "none"
    };
    println!("Server:        {}", app.gateway.config().base_url);
    println!("Google Drive:  {connected}");
    println!("OCR API key:   {key}");
    Ok(())
}

async fn convert(
    app: &App,
    mode: ConversionMode,
    folder: String,
    api_key: Option<String>,
    output: Option<PathBuf>,
    show_progress: bool,
) -> Result<()> {
    let host = TerminalHost::new(None);
    app.controller.initialize(&host).await;

    // Prefill from storage, the way an input field would be.
    let credential = api_key.or_else(|| app.controller.session().credential());
    let request = JobRequest {
        mode,
        source_reference: folder,
        credential,
    };

    app.controller.select_mode(mode);
    let ticket = app.controller.start(request)?;

    let renderer = show_progress.then(|| {
        let bar = new_progress_bar(mode);
        tokio::spawn(render_progress(app.controller.subscribe(), bar))
    });

    let interrupt = {
        let controller = app.controller.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("{} Cancelling… press Ctrl-C again to stop waiting", cyan("◆"));
                controller.cancel();
            }
            if tokio::signal::ctrl_c().await.is_ok() {
                controller.shutdown().await;
            }
        })
    };

    let outcome = ticket.wait().await;
    interrupt.abort();
    if let Some(renderer) = renderer {
        let _ = renderer.await;
    }

    let artifact = match outcome {
        Some(JobOutcome::Completed(artifact)) => artifact,
        Some(JobOutcome::Failed(detail)) => bail!("Conversion failed: {detail}"),
        None => bail!("Conversion abandoned before the server answered"),
    };

    let downloaded = app
        .gateway
        .download(&artifact)
        .await
        .context("Failed to download the result")?;

    let path = output.unwrap_or_else(|| {
        downloaded
            .file_name
            .as_deref()
            .map(PathBuf::from)
            .unwrap_or_else(|| default_output_name(mode))
    });
    tokio::fs::write(&path, &downloaded.bytes)
        .await
        .with_context(|| format!("Failed to write '{}'", path.display()))?;

    if !app.quiet {
        eprintln!(
            "{} Conversion successful!  {}  →  {}",
            green("✔"),
            dim(&format!("{} bytes", downloaded.bytes.len())),
            bold(&path.display().to_string()),
        );
    }
    Ok(())
}

fn default_output_name(mode: ConversionMode) -> PathBuf {
    match mode {
        ConversionMode::Pdf => PathBuf::from("your_ebook.pdf"),
        ConversionMode::Ocr => PathBuf::from("ocr_results.zip"),
    }
}

fn new_progress_bar(mode: ConversionMode) -> ProgressBar {
    let bar = ProgressBar::new(100);
    let style = ProgressStyle::with_template(
        "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}%  {wide_msg}  ⏱ {elapsed_precise}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("█▉▊▋▌▍▎▏  ")
    .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

    bar.set_style(style);
    bar.set_prefix(match mode {
        ConversionMode::Pdf => "Ebook",
        ConversionMode::Ocr => "Smart OCR",
    });
    bar.set_message("Starting...");
    bar.enable_steady_tick(Duration::from_millis(80));
    bar
}

/// Mirror snapshots onto the bar until the job leaves the active states.
async fn render_progress(mut rx: watch::Receiver<WorkflowSnapshot>, bar: ProgressBar) {
    loop {
        let done = {
            let snapshot = rx.borrow_and_update();
            if let Some(job) = &snapshot.job {
                bar.set_position(u64::from(job.progress_percent));
                bar.set_message(job.progress_message.clone());
                if job.stream_finished {
                    bar.disable_steady_tick();
                }
            }
            if snapshot.state == WorkflowState::Cancelling {
                bar.set_prefix("Cancelling");
            }
            !snapshot.state.is_active()
        };
        if done || rx.changed().await.is_err() {
            break;
        }
    }
    bar.finish_and_clear();
}
