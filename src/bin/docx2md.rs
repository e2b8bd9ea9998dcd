//! CLI binary for edgequake-docx2md.
//!
//! A thin shim over the library's [`Session`]: one-shot conversion driven by
//! flags, or an interactive prompt that feeds the session one command at a
//! time.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_docx2md::actions::write_atomic;
use edgequake_docx2md::pipeline::intake::format_bytes;
use edgequake_docx2md::{
    Confirmation, ConversionSettings, Docx2MdError, Operation, Session, SessionConfig,
    SessionObserver, Severity, SizeLimits, StatusMessage, Theme,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
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

// ── CLI observer using indicatif ─────────────────────────────────────────────

/// Shows the loader as a spinner and prints status messages to stderr.
struct CliObserver {
    /// Spinner while an operation is in flight.
    bar: Mutex<Option<ProgressBar>>,
    show_progress: bool,
    quiet: bool,
    /// Answer every confirmation with yes.
    assume_yes: bool,
    /// Ask on the terminal instead of using the default answer.
    ask: bool,
}

impl CliObserver {
    fn new(show_progress: bool, quiet: bool, assume_yes: bool, ask: bool) -> Arc<Self> {
        Arc::new(Self {
            bar: Mutex::new(None),
            show_progress,
            quiet,
            assume_yes,
            ask,
        })
    }

    fn print(&self, line: String) {
        if let Ok(slot) = self.bar.lock() {
            if let Some(bar) = &*slot {
                bar.println(line);
                return;
            }
        }
        eprintln!("{line}");
    }
}

impl SessionObserver for CliObserver {
    fn on_loader(&self, operation: Option<Operation>) {
        if !self.show_progress {
            return;
        }
        let Ok(mut slot) = self.bar.lock() else {
            return;
        };
        match operation {
            Some(op) => {
                let bar = slot.get_or_insert_with(|| {
                    let bar = ProgressBar::new_spinner();
                    bar.set_style(
                        ProgressStyle::with_template("{spinner:.cyan} {msg}  {elapsed:.dim}")
                            .unwrap_or_else(|_| ProgressStyle::default_spinner())
                            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]),
                    );
                    bar.enable_steady_tick(Duration::from_millis(80));
                    bar
                });
                bar.set_message(op.message());
            }
            None => {
                if let Some(bar) = slot.take() {
                    bar.finish_and_clear();
                }
            }
        }
    }

    fn on_status(&self, status: &StatusMessage) {
        if self.quiet && status.severity != Severity::Error {
            return;
        }
        let line = match status.severity {
            Severity::Success => format!("{} {}", green("✔"), status.text),
            Severity::Info => format!("{} {}", cyan("ℹ"), status.text),
            Severity::Warning => format!("{} {}", yellow("⚠"), status.text),
            Severity::Error => format!("{} {}", red("✘"), red(&status.text)),
        };
        self.print(line);
        if status.retry {
            self.print(dim("  type `retry` to try again"));
        }
    }

    fn confirm(&self, question: Confirmation) -> bool {
        if self.assume_yes {
            return true;
        }
        if !self.ask || !io::stdin().is_terminal() {
            return question.default_answer();
        }
        let hint = if question.default_answer() { "[Y/n]" } else { "[y/N]" };
        eprint!("{} {} {} ", cyan("?"), question.prompt(), dim(hint));
        let _ = io::stderr().flush();
        let mut answer = String::new();
        if io::stdin().lock().read_line(&mut answer).is_err() {
            return question.default_answer();
        }
        match answer.trim().to_ascii_lowercase().as_str() {
            "y" | "yes" => true,
            "n" | "no" => false,
            _ => question.default_answer(),
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Basic conversion (stdout)
  docx2md report.docx

  # Save next to other notes as notes/report.md
  docx2md report.docx -o notes/

  # Convert to a specific file, with * bullets and <br> line breaks
  docx2md report.docx -o report.md --list-style='*' --line-break br

  # Also write the HTML preview as a standalone page
  docx2md report.docx -o report.md --html report.html --theme dark

  # JSON output (Markdown, preview, engine notes, timings)
  docx2md --json report.docx > report.json

  # Remember preferences for next time
  docx2md --set listStyle=+ --set underlineHandling=italic --save-settings

  # Interactive session
  docx2md --interactive

SETTINGS (persisted as conversionSettings):
  Key                Values               Default
  ─────────────────  ───────────────────  ───────
  imageHandling      base64 | ignore      base64
  listStyle          - | * | +            -
  lineBreak          space | br           space
  underlineHandling  ignore | u | italic  ignore
  disablePreview     true | false         false

ENVIRONMENT VARIABLES:
  DOCX2MD_OUTPUT        Default for --output
  DOCX2MD_CONFIG_DIR    Where preferences are stored
  DOCX2MD_NO_PERSIST    Keep preferences in memory only
  DOCX2MD_TIMEOUT       Engine timeout in seconds
  RUST_LOG              Override the log filter (e.g. edgequake_docx2md=debug)

Preferences live in <config dir>/edgequake-docx2md/ by default.
"#;

const INTERACTIVE_HELP: &str = "\
Commands:
  open <path>           Select a .docx file and convert it
  reconvert             Convert the cached file again with current settings
  retry                 Retry after a transient failure
  clear                 Drop the cached file and its output
  show                  Print the Markdown
  html [path]           Print the preview HTML, or save it as a page
  settings              Show active settings (and the unsaved draft)
  set <key> <value>     Change a setting in the draft
  save                  Persist the draft and apply it
  cancel                Discard the draft
  reset                 Return all settings to their defaults
  preview on|off        Show or hide the preview for this session
  copy                  Copy the Markdown to the clipboard
  download [dir]        Save the Markdown as <name>.md (default: current dir)
  theme [light|dark]    Toggle or set the theme
  status                Show session state
  help                  This text
  quit                  Leave";

/// Convert Word (.docx) documents to Markdown.
#[derive(Parser, Debug)]
#[command(
    name = "docx2md",
    version,
    about = "Convert Word (.docx) documents to Markdown",
    long_about = "Convert Word (.docx) documents to Markdown with an HTML preview, adjustable \
formatting (list markers, line breaks, underline, images) and preferences that persist \
between runs.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// The .docx file to convert.
    input: Option<PathBuf>,

    /// Write Markdown here instead of stdout. A directory gets `<name>.md`.
    #[arg(short, long, env = "DOCX2MD_OUTPUT")]
    output: Option<PathBuf>,

    /// Also write the HTML preview as a standalone page.
    #[arg(long)]
    html: Option<PathBuf>,

    /// Output structured JSON (ConversionResult) instead of Markdown.
    #[arg(long)]
    json: bool,

    /// Copy the Markdown to the clipboard.
    #[arg(long)]
    copy: bool,

    /// Images: base64 (inline data URIs) or ignore.
    #[arg(long, value_name = "MODE")]
    image_handling: Option<String>,

    /// Bullet marker: -, * or +.
    #[arg(long, value_name = "MARKER", allow_hyphen_values = true)]
    list_style: Option<String>,

    /// Hard line breaks: space (two spaces + newline) or br (keep <br>).
    #[arg(long, value_name = "MODE")]
    line_break: Option<String>,

    /// Underlined text: ignore, u (<u> tags) or italic.
    #[arg(long, value_name = "MODE")]
    underline: Option<String>,

    /// Skip the HTML preview.
    #[arg(long)]
    no_preview: bool,

    /// Set any setting by key, e.g. --set listStyle=+ (repeatable).
    #[arg(long = "set", value_name = "KEY=VALUE", allow_hyphen_values = true)]
    set: Vec<String>,

    /// Persist the settings given on this command line.
    #[arg(long)]
    save_settings: bool,

    /// Erase saved preferences before doing anything else.
    #[arg(long)]
    reset_settings: bool,

    /// Print the active settings and exit if there is nothing else to do.
    #[arg(long)]
    show_settings: bool,

    /// Theme for the preview: light, dark or toggle (persisted).
    #[arg(long, value_name = "THEME")]
    theme: Option<String>,

    /// Directory for persisted preferences.
    #[arg(long, env = "DOCX2MD_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    /// Keep preferences in memory only.
    #[arg(long, env = "DOCX2MD_NO_PERSIST")]
    no_persist: bool,

    /// Engine timeout in seconds.
    #[arg(long, env = "DOCX2MD_TIMEOUT", default_value_t = 60,
          value_parser = clap::value_parser!(u64).range(1..))]
    timeout: u64,

    /// Maximum accepted file size in MiB.
    #[arg(long, value_name = "MIB", value_parser = clap::value_parser!(u64).range(1..))]
    max_size: Option<u64>,

    /// Answer yes to every confirmation.
    #[arg(short, long)]
    yes: bool,

    /// Start an interactive session (after converting INPUT, if given).
    #[arg(short, long)]
    interactive: bool,

    /// Disable the spinner.
    #[arg(long)]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
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
    // The status line already tells the user what happened; library INFO
    // logs only show with -v.
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Build session ────────────────────────────────────────────────────
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && io::stderr().is_terminal();
    let observer = CliObserver::new(show_progress, cli.quiet, cli.yes, cli.interactive);
    let config = build_config(&cli)?;
    let mut session = Session::builder()
        .config(config)
        .observer(observer)
        .build();

    // ── Settings and theme ───────────────────────────────────────────────
    if cli.reset_settings && !session.reset_settings().await.context("Failed to reset settings")? {
        eprintln!("{}", dim("Reset cancelled."));
    }

    let settings = apply_overrides(&cli, session.settings())?;
    if cli.save_settings {
        session.open_settings()?;
        session.set_draft(settings);
        let saved = session.save_settings().await?;
        if let Some(e) = saved.warnings.first() {
            anyhow::bail!("Could not save preferences: {e}");
        }
    } else if settings != session.settings() {
        session.apply_transient_settings(settings).await?;
    }

    if let Some(ref theme) = cli.theme {
        let theme = match theme.to_ascii_lowercase().as_str() {
            "toggle" => session.toggle_theme().await?,
            other => {
                let t = Theme::parse(other)
                    .with_context(|| format!("Unknown theme '{other}' (expected light, dark or toggle)"))?;
                session.set_theme(t).await?
            }
        };
        if !cli.quiet {
            eprintln!("{} {} theme", cyan("◆"), bold(theme.as_str()));
        }
    }

    if cli.show_settings {
        println!("{}", session.settings());
    }

    // ── Run conversion ───────────────────────────────────────────────────
    if let Some(ref input) = cli.input {
        match session.open_file(input).await.map(|_| ()) {
            Ok(()) => emit_outputs(&cli, &mut session)?,
            // Already on the status line; the prompt can retry.
            Err(_) if cli.interactive => {}
            Err(e) => {
                return Err(e).with_context(|| format!("Conversion failed for {}", input.display()))
            }
        }
    }

    if cli.interactive {
        run_interactive(&mut session).await?;
    }

    Ok(())
}

/// Map CLI args to `SessionConfig`.
fn build_config(cli: &Cli) -> Result<SessionConfig> {
    let mut builder = SessionConfig::builder().engine_timeout_secs(cli.timeout);
    if let Some(mib) = cli.max_size {
        let max = mib
            .checked_mul(edgequake_docx2md::config::MIB)
            .with_context(|| format!("--max-size {mib} MiB does not fit in a byte count"))?;
        builder = builder.limits(SizeLimits::with_max(max));
    }
    builder = if cli.no_persist {
        builder.ephemeral()
    } else if let Some(ref dir) = cli.config_dir {
        builder.storage_dir(dir)
    } else {
        builder
    };
    builder.build().context("Invalid configuration")
}

/// Apply per-run setting flags on top of `base`.
fn apply_overrides(cli: &Cli, base: ConversionSettings) -> Result<ConversionSettings> {
    let mut s = base;
    let named = [
        ("imageHandling", &cli.image_handling),
        ("listStyle", &cli.list_style),
        ("lineBreak", &cli.line_break),
        ("underlineHandling", &cli.underline),
    ];
    for (key, value) in named {
        if let Some(value) = value {
            s.set_from_str(key, value)?;
        }
    }
    if cli.no_preview {
        s.disable_preview = true;
    }
    for pair in &cli.set {
        let (key, value) = pair
            .split_once('=')
            .with_context(|| format!("Expected KEY=VALUE, got '{pair}'"))?;
        s.set_from_str(key.trim(), value)?;
    }
    Ok(s)
}

/// Write the converted document wherever the flags ask for it.
fn emit_outputs(cli: &Cli, session: &mut Session) -> Result<()> {
    let Some(result) = session.result().cloned() else {
        return Ok(());
    };

    if cli.json {
        let json = serde_json::to_string_pretty(&result).context("Failed to serialise output")?;
        println!("{json}");
    } else if let Some(ref output) = cli.output {
        let path = if output.is_dir() || output.to_string_lossy().ends_with(std::path::MAIN_SEPARATOR) {
            session
                .download(output)
                .context("Failed to save Markdown")?
                .map(|r| r.path)
        } else {
            write_atomic(output, result.markdown.as_bytes())
                .with_context(|| format!("Failed to write {}", output.display()))?;
            Some(output.clone())
        };
        if let (Some(path), false) = (path, cli.quiet) {
            eprintln!(
                "{}  {}  →  {}  {}",
                green("✔"),
                result.file_name,
                bold(&path.display().to_string()),
                dim(&format!(
                    "({}, {}ms)",
                    format_bytes(result.stats.markdown_bytes as u64),
                    result.stats.total_duration_ms
                )),
            );
        }
    } else {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        handle
            .write_all(result.markdown.as_bytes())
            .context("Failed to write to stdout")?;
        if !result.markdown.ends_with('\n') {
            handle.write_all(b"\n").ok();
        }
    }

    if !cli.quiet {
        for note in &result.messages {
            eprintln!("  {} {}", yellow("•"), dim(note));
        }
    }

    if let Some(ref html_path) = cli.html {
        match session.preview_document() {
            Some(page) => write_atomic(html_path, page.as_bytes())
                .with_context(|| format!("Failed to write {}", html_path.display()))?,
            None => eprintln!("{} Preview is disabled; no HTML written.", yellow("⚠")),
        }
    }

    if cli.copy {
        // The session already reported the outcome on the status line.
        let _ = session.copy();
    }
    Ok(())
}

// ── Interactive prompt ───────────────────────────────────────────────────────

/// Read commands from stdin and feed them to the session until `quit`.
async fn run_interactive(session: &mut Session) -> Result<()> {
    eprintln!(
        "{} {}  {}",
        cyan("◆"),
        bold("docx2md interactive session"),
        dim("(type `help` for commands)")
    );
    let stdin = io::stdin();
    loop {
        eprint!("{} ", cyan("docx2md>"));
        io::stderr().flush().ok();

        let mut line = String::new();
        // std's stdin is shared with confirmation prompts; reading it here
        // keeps both on the same buffer.
        let read = tokio::task::block_in_place(|| stdin.lock().read_line(&mut line))
            .context("Failed to read from stdin")?;
        if read == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (cmd, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let rest = rest.trim();

        match run_command(session, cmd, rest).await {
            Ok(true) => continue,
            Ok(false) => break,
            Err(e) => report(&e),
        }
    }
    Ok(())
}

/// Run one prompt command. `Ok(false)` ends the session.
async fn run_command(session: &mut Session, cmd: &str, arg: &str) -> Result<bool, Docx2MdError> {
    match cmd {
        "open" => {
            if arg.is_empty() {
                eprintln!("usage: open <path>");
            } else {
                session.open_file(arg).await?;
            }
        }
        "reconvert" => {
            session.reconvert().await?;
        }
        "retry" => {
            session.retry().await?;
        }
        "clear" => {
            if !session.clear_file_memory()? {
                eprintln!("{}", dim("No file loaded in memory."));
            }
        }
        "show" => match session.result() {
            Some(r) => print!("{}", r.markdown),
            None => eprintln!("{}", dim("Nothing converted yet.")),
        },
        "html" => {
            if arg.is_empty() {
                println!("{}", session.preview().html());
            } else {
                match session.preview_document() {
                    Some(page) => {
                        write_atomic(Path::new(arg), page.as_bytes())?;
                        eprintln!("{} Preview saved to {}", green("✔"), arg);
                    }
                    None => eprintln!("{}", dim("No rendered preview.")),
                }
            }
        }
        "settings" => {
            println!("{}", session.settings());
            if let Some(draft) = session.draft() {
                println!("\n{}\n{}", bold("unsaved draft:"), draft);
            }
        }
        "set" => {
            let Some((key, value)) = arg.split_once(char::is_whitespace) else {
                eprintln!("usage: set <key> <value>   keys: {}", ConversionSettings::KEYS.join(", "));
                return Ok(true);
            };
            if session.draft().is_none() {
                session.open_settings()?;
            }
            session.update_draft(key, value.trim())?;
        }
        "save" => {
            if session.draft().is_none() {
                session.open_settings()?;
            }
            session.save_settings().await?;
        }
        "cancel" => session.close_settings(),
        "reset" => {
            session.reset_settings().await?;
        }
        "preview" => match arg {
            "on" => session.toggle_preview(true).await?,
            "off" => session.toggle_preview(false).await?,
            _ => eprintln!("usage: preview on|off"),
        },
        "copy" => {
            session.copy()?;
        }
        "download" => {
            let dir = if arg.is_empty() { "." } else { arg };
            session.download(dir)?;
        }
        "theme" => {
            let theme = match Theme::parse(arg) {
                Some(t) => session.set_theme(t).await?,
                None => session.toggle_theme().await?,
            };
            eprintln!("{} {} theme", cyan("◆"), theme);
        }
        "status" => print_status(session),
        "help" | "?" => eprintln!("{INTERACTIVE_HELP}"),
        "quit" | "exit" | "q" => return Ok(false),
        other => eprintln!("Unknown command '{other}'. Type `help` for the list."),
    }
    Ok(true)
}

/// Errors the session does not put on the status line itself.
fn report(e: &Docx2MdError) {
    if matches!(
        e,
        Docx2MdError::Busy { .. } | Docx2MdError::InvalidSettings(_) | Docx2MdError::Internal(_)
    ) {
        eprintln!("{} {}", red("✘"), e);
    }
}

fn print_status(session: &Session) {
    let snap = session.snapshot();
    let yes_no = |b: bool| if b { green("yes") } else { dim("no") };
    println!("File:      {}", snap.file_info.as_deref().unwrap_or("-"));
    println!("In memory: {}", yes_no(snap.has_source));
    println!("Converted: {}", yes_no(snap.has_result));
    println!("Preview:   {}", if snap.preview_enabled { "on" } else { "off" });
    println!("Theme:     {} ({})", snap.theme, dim(snap.theme_toggle_label));
    if let Some(op) = snap.operation {
        println!("Running:   {op}");
    }
    if let Some(status) = snap.status {
        println!("Status:    [{}] {}", status.severity, status.text);
    }
    let c = snap.controls;
    println!(
        "Actions:   copy={} download={} clear={}",
        yes_no(c.copy),
        yes_no(c.download),
        yes_no(c.clear)
    );
}
