//! CLI binary for p2r-relay.
//!
//! A thin shim over the library crate: builds an event (from a file, stdin,
//! or flags), runs the handler locally and prints the response a serverless
//! trigger would have returned.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use p2r_relay::{
    handle, Deadline, HandlerOutput, RelayConfig, RelayProgressCallback, RmapiCredentials,
    ToolOptions,
};
use std::collections::HashMap;
use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
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

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a progress bar over targets plus one log line
/// per finished target.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}/{len} targets  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Relaying");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
        })
    }

    fn elapsed_secs(&self, idx: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&idx))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl RelayProgressCallback for CliProgressCallback {
    fn on_request_start(&self, total_targets: usize) {
        self.bar.set_length(total_targets as u64);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Relaying {total_targets} target(s)…"))
        ));
    }

    fn on_target_start(&self, idx: usize, _total: usize, target: &str) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(idx, Instant::now());
        }
        self.bar.set_message(target.to_string());
    }

    fn on_target_complete(&self, idx: usize, total: usize, target: &str, _exit_code: i32) {
        let secs = self.elapsed_secs(idx);
        self.bar.println(format!(
            "  {} {:>3}/{:<3}  {}  {}",
            green("✓"),
            idx,
            total,
            target,
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_target_error(&self, idx: usize, total: usize, target: &str, error: &str) {
        let secs = self.elapsed_secs(idx);
        self.bar.println(format!(
            "  {} {:>3}/{:<3}  {}  {}  {}",
            red("✗"),
            idx,
            total,
            target,
            red(error),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_request_complete(&self, total_targets: usize, success_count: usize) {
        self.bar.finish_and_clear();
        let failed = total_targets.saturating_sub(success_count);
        if failed == 0 {
            eprintln!("{} {} target(s) relayed", green("✔"), bold(&success_count.to_string()));
        } else {
            eprintln!(
                "{} {}/{} target(s) relayed  ({} failed)",
                red("✘"),
                bold(&success_count.to_string()),
                total_targets,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Send one paper to the tablet
  p2r-relay https://arxiv.org/abs/1706.03762

  # Several targets, blank pages, custom folder
  p2r-relay --blank --remarkable-path /Papers a.pdf https://arxiv.org/abs/2106.09685

  # Replay a captured trigger event
  p2r-relay --event event.json

  # Read the event from stdin and print the detailed outcome
  cat event.json | p2r-relay --event - --json

  # Keep the PDF instead of uploading (body comes back base64-encoded)
  p2r-relay --no-upload paper.pdf

ENVIRONMENT VARIABLES:
  P2R_PROGRAM          Tool to run (default: p2r)
  P2R_WORK_ROOT        Directory for per-target working directories
  P2R_TIMEOUT_SECS     Request budget in seconds
  RMAPI_USER_TOKEN     rmapi user token (staged into rmapi.conf)
  RMAPI_DEVICE_TOKEN   rmapi device token
  RUST_LOG             Overrides the log filter
"#;

/// Run paper2remarkable for each target and print the relay response.
#[derive(Parser, Debug)]
#[command(
    name = "p2r-relay",
    version,
    about = "Run paper2remarkable under a deadline and relay its result",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Targets (URLs or local files). Ignored when --event is given.
    targets: Vec<String>,

    /// Read the trigger event from this JSON file ("-" for stdin).
    #[arg(long, value_name = "FILE")]
    event: Option<PathBuf>,

    /// Tool to run.
    #[arg(long, env = "P2R_PROGRAM", default_value = "p2r")]
    program: String,

    /// Directory for per-target working directories (default: system temp dir).
    #[arg(long, env = "P2R_WORK_ROOT")]
    work_root: Option<PathBuf>,

    /// Request budget in seconds.
    #[arg(short, long, env = "P2R_TIMEOUT_SECS", default_value_t = 900)]
    timeout: u64,

    /// Targets run at once.
    #[arg(short, long, default_value_t = 1)]
    concurrency: usize,

    /// Do not look for PDFs left in the working directory.
    #[arg(long)]
    no_artifacts: bool,

    // ── Tool flags (used when building the event from targets) ──────────
    /// Don't pass --verbose to the tool.
    #[arg(long)]
    tool_quiet: bool,

    /// Pass --blank.
    #[arg(long)]
    blank: bool,

    /// Pass --center.
    #[arg(long)]
    center: bool,

    /// Pass --right.
    #[arg(long)]
    right: bool,

    /// Pass --no-crop.
    #[arg(long)]
    no_crop: bool,

    /// Pass --no-upload.
    #[arg(long)]
    no_upload: bool,

    /// Pass --remarkable-path <PATH>.
    #[arg(long, value_name = "PATH")]
    remarkable_path: Option<String>,

    /// Pass --filename <NAME>.
    #[arg(long, value_name = "NAME")]
    filename: Option<String>,

    // ── Output ───────────────────────────────────────────────────────────
    /// Print the detailed per-target outcome instead of the trigger response.
    #[arg(long)]
    json: bool,

    /// Disable the progress bar.
    #[arg(long)]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs (includes the tool's output).
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let show_progress = !cli.quiet && !cli.no_progress && !cli.verbose;
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

    let event = build_event(&cli)?;
    let config = build_config(&cli, show_progress)?;
    let deadline = Deadline::after(config.default_timeout());

    let output = handle(&event, Some(deadline), &config)
        .await
        .context("Relay failed")?;

    let status = output.status_code();
    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&output).context("Failed to serialise output")?
        );
    } else {
        let response = output.to_response().context("Failed to build response")?;
        println!(
            "{}",
            serde_json::to_string_pretty(&response).context("Failed to serialise response")?
        );
    }

    if !cli.quiet && !show_progress {
        print_summary(&output);
    }

    if status != 200 {
        std::process::exit(1);
    }
    Ok(())
}

/// Event from `--event`, or a direct payload assembled from flags.
fn build_event(cli: &Cli) -> Result<serde_json::Value> {
    if let Some(ref path) = cli.event {
        let text = if path.as_os_str() == "-" {
            let mut buf = String::new();
            io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read event from stdin")?;
            buf
        } else {
            std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read event from {:?}", path))?
        };
        return serde_json::from_str(&text).context("Event is not valid JSON");
    }

    if cli.targets.is_empty() {
        anyhow::bail!("No targets given; pass URLs/paths or --event <FILE>");
    }

    let options = ToolOptions {
        verbose: !cli.tool_quiet,
        blank: cli.blank,
        center: cli.center,
        right: cli.right,
        disable_cropping: cli.no_crop,
        no_upload: cli.no_upload,
        remarkable_path: cli.remarkable_path.clone(),
        filename: cli.filename.clone(),
    };
    let mut event = serde_json::to_value(&options).context("Failed to build event")?;
    event["inputs"] = serde_json::json!(cli.targets);
    Ok(event)
}

/// Map CLI args to `RelayConfig`.
fn build_config(cli: &Cli, show_progress: bool) -> Result<RelayConfig> {
    let mut builder = RelayConfig::builder()
        .program(cli.program.clone())
        .default_timeout_secs(cli.timeout)
        .concurrency(cli.concurrency)
        .collect_artifacts(!cli.no_artifacts);

    if let Some(ref root) = cli.work_root {
        builder = builder.work_root(root.clone());
    }
    if let Some(creds) = RmapiCredentials::from_env().context("Invalid rmapi credentials")? {
        builder = builder.credentials(creds);
    }
    if show_progress {
        builder = builder.progress_callback(CliProgressCallback::new());
    }

    builder.build().context("Invalid configuration")
}

fn print_summary(output: &HandlerOutput) {
    for outcome in &output.outcomes {
        let mark = if outcome.succeeded() { green("✓") } else { red("✗") };
        let detail = match outcome.error {
            Some(ref e) => red(&e.to_string()),
            None => dim(&format!("exit {}", outcome.exit_code.unwrap_or(0))),
        };
        eprintln!("{mark} {}  {detail}", outcome.target);
    }
    eprintln!(
        "{}/{} targets succeeded in {}ms",
        output.stats.succeeded, output.stats.total_targets, output.stats.total_duration_ms
    );
}
