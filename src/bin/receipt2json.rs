//! CLI binary for edgequake-receipt.
//!
//! A thin shim over the library crate: maps flags to `ExtractionConfig`,
//! runs one independent extraction per image, and turns typed errors into
//! readable messages and exit codes.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_receipt::config::{DEFAULT_ENDPOINT, DEFAULT_MODEL};
use edgequake_receipt::{
    BankMode, DepositMode, Endpoint, ExtractionConfig, ExtractionOutput, Extractor,
    FailoverPolicy, OutputFormat, PresenceTokens, ReceiptError, WireFormat,
};
use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────

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

const AFTER_HELP: &str = r#"EXAMPLES:
  # Default OpenAI-compatible endpoint
  export RECEIPT_API_KEY=sk-...
  receipt2json receipt.jpg

  # Several receipts, four at a time, JSON on stdout
  receipt2json --json -c 4 scans/*.jpg > receipts.json

  # Gemini directly
  receipt2json --wire gemini --model gemini-2.0-flash receipt.png

  # Through a CORS relay, falling back to a second endpoint
  receipt2json --relay https://relay.example/? \
      --fallback-endpoint https://api.openai.com/v1/chat/completions receipt.jpg

  # Any edgequake-llm provider (key from ANTHROPIC_API_KEY etc.)
  receipt2json --provider anthropic --model claude-sonnet-4-20250514 receipt.jpg

  # Report only whether a deposit identifier is printed, skip the bank
  receipt2json --deposit presence --no-bank receipt.jpg

EXIT CODES:
  0  every image extracted
  1  unexpected failure (unreadable prompt file, I/O)
  2  invalid configuration (missing key, bad URL, bad value)
  3  image unreadable or unsupported
  4  endpoint unreachable
  5  timed out
  6  credentials rejected (HTTP 401/403)
  7  rate limited (HTTP 429)
  8  other upstream error
  9  model reply had no extractable fields
"#;

/// Extract bank-receipt fields from images using Vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "receipt2json",
    version,
    about = "Extract bank-receipt fields from images using Vision LLMs",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Receipt images (JPEG, PNG, WebP, GIF).
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Inference endpoint URL.
    #[arg(long, env = "RECEIPT_ENDPOINT")]
    endpoint: Option<String>,

    /// Additional endpoints tried when the previous one cannot be reached.
    #[arg(long = "fallback-endpoint", env = "RECEIPT_FALLBACK_ENDPOINTS", value_delimiter = ',')]
    fallback_endpoints: Vec<String>,

    /// Relay prefix prepended to every endpoint URL.
    #[arg(long, env = "RECEIPT_RELAY")]
    relay: Option<String>,

    /// Request dialect spoken by the endpoints.
    #[arg(long, env = "RECEIPT_WIRE", value_enum, default_value = "openai")]
    wire: WireArg,

    /// When to move on to the next endpoint.
    #[arg(long, env = "RECEIPT_FAILOVER", value_enum, default_value = "on-connect-error")]
    failover: FailoverArg,

    /// API key sent to the endpoints.
    #[arg(long, env = "RECEIPT_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Endpoints do not require a key (local gateway, self-hosted model).
    #[arg(long, env = "RECEIPT_NO_AUTH")]
    no_auth: bool,

    /// Vision model ID.
    #[arg(long, env = "RECEIPT_MODEL", default_value = DEFAULT_MODEL)]
    model: String,

    /// Use an edgequake-llm provider (openai, anthropic, gemini, ollama, ...)
    /// instead of raw HTTP endpoints.
    #[arg(long, env = "RECEIPT_PROVIDER")]
    provider: Option<String>,

    /// Report the deposit identifier itself, or only whether one is printed.
    #[arg(long, env = "RECEIPT_DEPOSIT", value_enum, default_value = "value")]
    deposit: DepositArg,

    /// Token printed for a present deposit identifier (presence mode).
    #[arg(long, default_value = "present")]
    present_token: String,

    /// Token printed for a missing deposit identifier (presence mode).
    #[arg(long, default_value = "absent")]
    absent_token: String,

    /// Do not ask for the bank name.
    #[arg(long, env = "RECEIPT_NO_BANK")]
    no_bank: bool,

    /// Placeholder reported as bank name with `--no-bank`.
    #[arg(long, default_value = "-")]
    bank_placeholder: String,

    /// Reply format requested from the model.
    #[arg(long, env = "RECEIPT_FORMAT", value_enum, default_value = "json")]
    format: FormatArg,

    /// Keep ambiguous identifiers unassigned instead of splitting them by length.
    #[arg(long)]
    no_tie_break: bool,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, env = "RECEIPT_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Per-image call timeout in seconds.
    #[arg(long, env = "RECEIPT_TIMEOUT", default_value_t = 60)]
    timeout: u64,

    /// Max output tokens.
    #[arg(long, env = "RECEIPT_MAX_TOKENS", default_value_t = 1000)]
    max_tokens: usize,

    /// Sampling temperature (0.0–2.0).
    #[arg(long, env = "RECEIPT_TEMPERATURE", default_value_t = 0.0)]
    temperature: f32,

    /// Nucleus sampling (0.0–1.0]; 1.0 disables it.
    #[arg(long, env = "RECEIPT_TOP_P", default_value_t = 0.1)]
    top_p: f32,

    /// Number of images processed at once.
    #[arg(short, long, env = "RECEIPT_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Print structured JSON instead of a table.
    #[arg(long)]
    json: bool,

    /// Also print the model reply as received.
    #[arg(long)]
    raw: bool,

    /// Disable progress bar.
    #[arg(long)]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all output except results and errors.
    #[arg(short, long)]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum WireArg {
    Openai,
    Gemini,
}

impl From<WireArg> for WireFormat {
    fn from(v: WireArg) -> Self {
        match v {
            WireArg::Openai => WireFormat::OpenAiChat,
            WireArg::Gemini => WireFormat::GeminiGenerateContent,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum FailoverArg {
    Never,
    OnConnectError,
}

impl From<FailoverArg> for FailoverPolicy {
    fn from(v: FailoverArg) -> Self {
        match v {
            FailoverArg::Never => FailoverPolicy::Never,
            FailoverArg::OnConnectError => FailoverPolicy::OnConnectError,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum DepositArg {
    Value,
    Presence,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum FormatArg {
    Json,
    Labels,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {e:#}", red("error:"));
            ExitCode::from(1)
        }
    }
}

async fn run() -> Result<ExitCode> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
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

    // ── Build extractor ──────────────────────────────────────────────────
    let config = match build_config(&cli).await? {
        Ok(config) => config,
        Err(e) => return Ok(report_fatal(&e)),
    };
    let extractor = match Extractor::new(config) {
        Ok(extractor) => extractor,
        Err(e) => return Ok(report_fatal(&e)),
    };

    // ── Run extractions ──────────────────────────────────────────────────
    let bar = if show_progress {
        let bar = ProgressBar::new(cli.inputs.len() as u64);
        bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  [{bar:32.green/238}] {pos}/{len}  ⏱ {elapsed_precise}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  "),
        );
        bar.set_prefix("Extracting");
        bar.enable_steady_tick(Duration::from_millis(80));
        bar
    } else {
        ProgressBar::hidden()
    };

    let extractor = &extractor;
    let bar_ref = &bar;
    let mut results: Vec<(usize, PathBuf, Result<ExtractionOutput, ReceiptError>)> =
        stream::iter(cli.inputs.iter().cloned().enumerate())
            .map(|(idx, path)| async move {
                let result = extractor.extract_file(&path).await;
                let name = path.display().to_string();
                match &result {
                    Ok(_) => bar_ref.println(format!("  {} {}", green("✓"), name)),
                    Err(e) => bar_ref.println(format!("  {} {}  {}", red("✗"), name, dim(&e.to_string()))),
                }
                bar_ref.inc(1);
                (idx, path, result)
            })
            .buffer_unordered(cli.concurrency.max(1))
            .collect()
            .await;
    bar.finish_and_clear();
    results.sort_by_key(|(idx, _, _)| *idx);

    // ── Print ────────────────────────────────────────────────────────────
    if cli.json {
        let items: Vec<serde_json::Value> = results
            .iter()
            .map(|(_, path, result)| match result {
                Ok(output) => {
                    let mut item = json!({
                        "input": path.display().to_string(),
                        "record": output.record,
                        "strategy": output.strategy,
                        "stats": output.stats,
                    });
                    if cli.raw {
                        item["raw_text"] = json!(output.raw_text);
                    }
                    item
                }
                Err(e) => json!({
                    "input": path.display().to_string(),
                    "error": describe_error(e).0,
                }),
            })
            .collect();
        let text = if items.len() == 1 {
            serde_json::to_string_pretty(&items[0])
        } else {
            serde_json::to_string_pretty(&items)
        }
        .context("Failed to serialise output")?;
        println!("{text}");
    } else {
        for (_, path, result) in &results {
            print_table(path, result, cli.raw);
        }
    }

    // ── Exit code ────────────────────────────────────────────────────────
    let failed: Vec<&ReceiptError> = results.iter().filter_map(|(_, _, r)| r.as_ref().err()).collect();
    if !cli.quiet && !cli.json && results.len() > 1 {
        let ok = results.len() - failed.len();
        eprintln!(
            "{} {}/{} receipts extracted",
            if failed.is_empty() { green("✔") } else { red("✘") },
            bold(&ok.to_string()),
            results.len()
        );
    }
    Ok(match failed.first() {
        None => ExitCode::SUCCESS,
        Some(e) => ExitCode::from(describe_error(e).1),
    })
}

/// Map CLI args to `ExtractionConfig`.
///
/// The outer `Result` is for CLI-level failures (unreadable prompt file); the
/// inner one carries library validation errors so they keep their exit code.
async fn build_config(cli: &Cli) -> Result<Result<ExtractionConfig, ReceiptError>> {
    let system_prompt = if let Some(ref path) = cli.system_prompt {
        Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read system prompt from {:?}", path))?,
        )
    } else {
        None
    };

    let wire: WireFormat = cli.wire.into();
    let primary = match (&cli.endpoint, wire) {
        (Some(url), _) => url.clone(),
        (None, WireFormat::GeminiGenerateContent) => Endpoint::gemini(&cli.model).url,
        (None, WireFormat::OpenAiChat) => DEFAULT_ENDPOINT.to_string(),
    };
    let endpoints: Vec<Endpoint> = std::iter::once(primary)
        .chain(cli.fallback_endpoints.iter().cloned())
        .map(|url| {
            let mut endpoint = match &cli.relay {
                Some(prefix) => Endpoint::relay(prefix.clone(), url),
                None => Endpoint::direct(url),
            }
            .with_wire(wire);
            if cli.no_auth {
                endpoint = endpoint.without_auth();
            }
            endpoint
        })
        .collect();

    let bank_mode = if cli.no_bank {
        BankMode::Disabled {
            placeholder: cli.bank_placeholder.clone(),
        }
    } else {
        BankMode::Extract
    };

    let mut builder = ExtractionConfig::builder()
        .endpoints(endpoints)
        .model(cli.model.clone())
        .deposit_mode(match cli.deposit {
            DepositArg::Value => DepositMode::Value,
            DepositArg::Presence => DepositMode::Presence,
        })
        .presence_tokens(PresenceTokens {
            present: cli.present_token.clone(),
            absent: cli.absent_token.clone(),
        })
        .bank_mode(bank_mode)
        .output_format(match cli.format {
            FormatArg::Json => OutputFormat::Json,
            FormatArg::Labels => OutputFormat::Labels,
        })
        .identifier_tie_break(!cli.no_tie_break)
        .failover(cli.failover.into())
        .timeout_secs(cli.timeout)
        .max_tokens(cli.max_tokens)
        .temperature(cli.temperature)
        .top_p(if cli.top_p >= 1.0 { None } else { Some(cli.top_p) });

    if let Some(ref key) = cli.api_key {
        builder = builder.api_key(key.clone());
    }
    if let Some(ref name) = cli.provider {
        builder = builder.provider_name(name.clone());
    }
    if let Some(prompt) = system_prompt {
        builder = builder.system_prompt(prompt);
    }

    Ok(builder.build())
}

/// One human-readable line and an exit code per error class.
fn describe_error(e: &ReceiptError) -> (String, u8) {
    match e {
        ReceiptError::Configuration(msg) => (format!("configuration: {msg}"), 2),
        ReceiptError::Encoding { input, reason } => {
            (format!("cannot use image {input}: {reason}"), 3)
        }
        ReceiptError::Transport { endpoint, reason } => {
            (format!("could not reach {endpoint}: {reason}"), 4)
        }
        ReceiptError::Timeout { elapsed_ms } => (
            format!("no reply within {:.1}s", *elapsed_ms as f64 / 1000.0),
            5,
        ),
        ReceiptError::Auth { endpoint, status, .. } => (
            format!("{endpoint} rejected the API key (HTTP {status}); check --api-key / RECEIPT_API_KEY"),
            6,
        ),
        ReceiptError::RateLimit {
            endpoint,
            retry_after_secs,
            ..
        } => (
            match retry_after_secs {
                Some(s) => format!("rate limited by {endpoint}; retry in {s}s"),
                None => format!("rate limited by {endpoint}; retry later"),
            },
            7,
        ),
        ReceiptError::Upstream {
            endpoint,
            status,
            body,
        } => (format!("{endpoint} failed (HTTP {status}): {body}"), 8),
        ReceiptError::Normalization { reason, excerpt } => (
            format!("no receipt fields in model reply ({reason}): {excerpt}"),
            9,
        ),
    }
}

fn report_fatal(e: &ReceiptError) -> ExitCode {
    let (msg, code) = describe_error(e);
    eprintln!("{} {msg}", red("error:"));
    ExitCode::from(code)
}

fn print_table(path: &std::path::Path, result: &Result<ExtractionOutput, ReceiptError>, raw: bool) {
    println!("{}", bold(&path.display().to_string()));
    match result {
        Ok(output) => {
            for (field, value) in output.record.iter() {
                println!("  {:<16} {}", field.key(), value);
            }
            if raw {
                println!("  {}", dim("── raw reply ──"));
                for line in output.raw_text.lines() {
                    println!("  {}", dim(line));
                }
            }
        }
        Err(e) => println!("  {} {}", red("error:"), describe_error(e).0),
    }
}
