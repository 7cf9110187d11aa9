//! Volley CLI
//!
//! Usage:
//!   volley --text "your text here"          # Analyse one text (topics, entailments)
//!   volley --duo                            # Interactive dialogue (Name: text)
//!   volley --script dialogue.txt            # Batch dialogue with scripted revisions
//!   volley --serve                          # HTTP API server
//!   volley --duo --json                     # JSON output

use clap::{ArgAction, Parser, ValueEnum};
use colored::Colorize;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use async_trait::async_trait;
use tracing::{info, warn};

use volley::config::EngineConfig;
use volley::core::{
    load_and_validate_snapshot, run_server, save_snapshot, Embedder, HashingEmbedder,
    NullEmbedder, ProgressionController, ScriptedGenerator, TurnGenerator,
};
use volley::error::GeneratorError;
use volley::types::{MoveKind, Turn, TurnOutcome};
use volley::VERSION;

#[derive(Parser, Debug)]
#[command(
    name = "volley",
    version = VERSION,
    about = "Volley - keep multi-agent discussions moving",
    long_about = "Volley gates each candidate turn of a multi-speaker discussion.\n\n\
                  A draft that repeats recent turns, or adds no implication,\n\
                  application, counterexample or test, is sent back for revision.\n\
                  Orbiting tensions get consequence tests, then a forced pivot,\n\
                  and a synthesis is requested at a fixed cadence.\n\n\
                  Modes:\n  \
                  --text     Analyse one text\n  \
                  --duo      Interactive dialogue (prefix lines with Name:)\n  \
                  --script   Batch dialogue from a file\n  \
                  --serve    HTTP API server"
)]
struct Args {
    /// Text to analyse (single mode)
    #[arg(short, long)]
    text: Option<String>,

    /// Interactive dialogue mode - lines prefixed with a speaker name
    #[arg(short, long)]
    duo: bool,

    /// Batch mode - `Name: text` lines, indented `> revision` lines
    #[arg(long, value_name = "FILE")]
    script: Option<PathBuf>,

    /// Run as HTTP API server
    #[arg(short, long)]
    serve: bool,

    /// Server address
    #[arg(long, default_value = "127.0.0.1:3000")]
    addr: String,

    /// JSON engine configuration (defaults apply to missing fields)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Committed turns between syntheses (overrides the config file)
    #[arg(long)]
    cadence: Option<u64>,

    /// Revision requests per turn (overrides the config file)
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Embedding provider for semantic topics and redundancy
    #[arg(long, value_enum, default_value_t = EmbedderKind::Hashing)]
    embedder: EmbedderKind,

    /// Resume from a saved snapshot
    #[arg(long, value_name = "FILE")]
    resume: Option<PathBuf>,

    /// Speaker name used when committing interventions
    #[arg(long, default_value = "moderator")]
    moderator: String,

    /// Output as JSON (logs too)
    #[arg(long)]
    json: bool,

    /// Disable colors in output
    #[arg(long)]
    no_color: bool,

    /// More logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Directory for snapshots
    #[arg(long, default_value = "./snapshots")]
    snapshot_dir: PathBuf,

    /// Do not save a snapshot when the session ends
    #[arg(long)]
    no_snapshot: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum EmbedderKind {
    /// Deterministic feature hashing, no model server
    Hashing,
    /// Keyword topics and lexical redundancy only
    None,
}

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    volley::logging::init(args.verbose, args.json);
    if args.no_color {
        colored::control::set_override(false);
    }

    match run(&args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: &Args) -> CliResult<()> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::from_json_file(path)?,
        None => EngineConfig::default(),
    };
    if let Some(cadence) = args.cadence {
        config.synthesis.cadence = cadence;
    }
    if let Some(max_attempts) = args.max_attempts {
        config.refinement.max_attempts = max_attempts;
    }
    config.validate()?;
    let embedder: Arc<dyn Embedder> = match args.embedder {
        EmbedderKind::Hashing => Arc::new(HashingEmbedder::default()),
        EmbedderKind::None => Arc::new(NullEmbedder::new()),
    };

    if args.serve {
        print_header("API Server", args);
        let snapshot_dir = (!args.no_snapshot).then(|| args.snapshot_dir.clone());
        return run_server(&args.addr, config, embedder, snapshot_dir).await;
    }

    let mut controller = match &args.resume {
        Some(path) => {
            let snapshot = load_and_validate_snapshot(path)?;
            ProgressionController::restore(&snapshot, config, embedder).await?
        }
        None => ProgressionController::new(config, embedder).await?,
    };

    if let Some(text) = &args.text {
        return run_single(&controller, text, args).await;
    }
    if let Some(path) = &args.script {
        run_script(&mut controller, path, args).await?;
    } else {
        run_duo(&mut controller, args).await?;
    }
    finish(&controller, args)
}

/// Analyse a single text
async fn run_single(controller: &ProgressionController, text: &str, args: &Args) -> CliResult<()> {
    let (topics, report) = controller.analyze(text).await;

    if args.json {
        let output = serde_json::json!({
            "topics": topics,
            "entailments": report.tags,
            "hits": report.hits,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    let topics: Vec<&str> = topics.iter().map(String::as_str).collect();
    let tags: Vec<&str> = report.tags.iter().map(|t| t.code()).collect();
    if args.no_color {
        println!("topics={} | entail={}", topics.join(","), tags.join(","));
    } else {
        println!("{} {}", "topics:".bold(), topics.join(", "));
        let verdict = if report.has_entailment() {
            tags.join(", ").green()
        } else {
            "none".yellow()
        };
        println!("{} {}", "entailments:".bold(), verdict);
    }
    Ok(())
}

/// Interactive dialogue: drafts from stdin, revisions answered on stdin
async fn run_duo(controller: &mut ProgressionController, args: &Args) -> CliResult<()> {
    print_header("Dialogue Mode", args);
    println!("Prefix each line with a speaker name, e.g.");
    println!("  Ada: If structure binds choice, then blame must be graded.");
    println!("Revision requests are answered on the next line; an empty line keeps the draft.");
    if !args.no_snapshot {
        println!("Snapshot will be saved to: {}", args.snapshot_dir.display());
    }
    println!("Type 'quit' to exit.");
    println!();

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("{}", format_prompt(controller));
        stdout.flush()?;

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(_) => break,
        }

        let line = line.trim();
        if line.eq_ignore_ascii_case("quit") || line.eq_ignore_ascii_case("exit") {
            println!("\nSession ended. Turns: {}", controller.history().len());
            break;
        }
        if line.is_empty() {
            continue;
        }

        let Some((speaker, text)) = parse_speaker_prefix(line) else {
            println!("{}", "⚠ Please prefix with a speaker name (e.g., 'Ada: Hello')".yellow());
            continue;
        };

        let mut generator = StdinGenerator::new(text);
        match controller.propose_and_commit(&speaker, &mut generator).await {
            Ok(outcome) => report_outcome(controller, &outcome, args).await?,
            Err(e) => warn!(speaker = %speaker, error = %e, "turn not committed"),
        }
    }
    Ok(())
}

/// Batch dialogue from a script file
async fn run_script(controller: &mut ProgressionController, path: &Path, args: &Args) -> CliResult<()> {
    let content = std::fs::read_to_string(path)?;
    let turns = parse_script(&content);
    info!(path = %path.display(), turns = turns.len(), "script loaded");
    if !args.json {
        print_header("Script Mode", args);
    }

    for turn in turns {
        let mut generator = ScriptedGenerator::new(turn.drafts);
        let outcome = controller.propose_and_commit(&turn.speaker, &mut generator).await?;
        report_outcome(controller, &outcome, args).await?;
    }
    Ok(())
}

/// Print an outcome, then commit and print its interventions
async fn report_outcome(
    controller: &mut ProgressionController,
    outcome: &TurnOutcome,
    args: &Args,
) -> CliResult<()> {
    if args.json {
        println!("{}", serde_json::to_string(outcome)?);
    } else if args.no_color {
        println!("{}", outcome.to_parseable_string());
    } else {
        println!("{}", outcome.to_terminal_string());
    }

    for intervention in &outcome.interventions {
        if !args.json {
            if args.no_color {
                println!("{}", intervention.to_parseable_string());
            } else {
                println!("{}", intervention.to_terminal_string());
            }
        }
        let turn = controller.commit_intervention(intervention, &args.moderator).await;
        if args.json {
            println!("{}", serde_json::to_string(&turn)?);
        } else if args.verbose > 0 {
            println!("{}", format_transcript_line(&turn));
        }
    }

    if let Some(dyad) = controller.rotation_advice() {
        if !args.json {
            let advice = format!("  ↻ {} used its volley budget; bring in another speaker", dyad);
            println!("{}", if args.no_color { advice.normal() } else { advice.blue() });
        }
    }
    Ok(())
}

/// Save the closing snapshot unless disabled
fn finish(controller: &ProgressionController, args: &Args) -> CliResult<()> {
    if args.no_snapshot || controller.history().is_empty() {
        return Ok(());
    }
    let path = save_snapshot(&controller.snapshot(), &args.snapshot_dir)?;
    if !args.json {
        println!();
        println!("{}", format!("  SNAPSHOT SAVED: {}", path.display()).cyan());
    }
    Ok(())
}

/// Draft from the dialogue line; revisions read from stdin
struct StdinGenerator {
    draft: String,
}

impl StdinGenerator {
    fn new(text: &str) -> Self {
        Self { draft: text.to_string() }
    }
}

#[async_trait]
impl TurnGenerator for StdinGenerator {
    async fn generate(&mut self, revision: Option<&str>) -> Result<String, GeneratorError> {
        let Some(instruction) = revision else {
            return Ok(self.draft.clone());
        };

        print!("{} {} > ", "  revise:".yellow().bold(), instruction.dimmed());
        io::stdout()
            .flush()
            .map_err(|e| GeneratorError::Transport(e.to_string()))?;

        let mut line = String::new();
        io::stdin()
            .lock()
            .read_line(&mut line)
            .map_err(|e| GeneratorError::Transport(e.to_string()))?;

        // Empty answer (or EOF) keeps the draft
        let line = line.trim();
        if !line.is_empty() {
            self.draft = line.to_string();
        }
        Ok(self.draft.clone())
    }
}

/// One scripted turn: initial draft followed by revisions
#[derive(Debug, Clone, PartialEq)]
struct ScriptTurn {
    speaker: String,
    drafts: Vec<String>,
}

/// Parse `Name: text` lines with indented `> revision` continuations.
/// Blank lines and `#` comments are skipped.
fn parse_script(content: &str) -> Vec<ScriptTurn> {
    let mut turns: Vec<ScriptTurn> = Vec::new();
    for raw in content.lines() {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        if let Some(revision) = trimmed.strip_prefix('>') {
            let revision = revision.trim();
            match turns.last_mut() {
                Some(turn) if !revision.is_empty() => turn.drafts.push(revision.to_string()),
                Some(_) => {}
                None => warn!(line = raw, "revision before any turn, skipped"),
            }
            continue;
        }
        match parse_speaker_prefix(trimmed) {
            Some((speaker, text)) => turns.push(ScriptTurn {
                speaker,
                drafts: vec![text.to_string()],
            }),
            None => warn!(line = raw, "line without speaker prefix, skipped"),
        }
    }
    turns
}

/// Split `Name: text`. Names are one to 32 characters and may not be empty.
fn parse_speaker_prefix(line: &str) -> Option<(String, &str)> {
    let (name, text) = line.trim().split_once(':')?;
    let name = name.trim();
    let text = text.trim();
    if name.is_empty() || name.chars().count() > 32 || text.is_empty() {
        return None;
    }
    Some((name.to_string(), text))
}

/// Print header
fn print_header(mode: &str, args: &Args) {
    if args.no_color {
        println!("========================================");
        println!("  Volley v{} - {}", VERSION, mode);
        println!("========================================");
    } else {
        println!("{}", "╔══════════════════════════════════════════════╗".bold());
        println!("{}", format!("║  Volley v{} - {}", VERSION, mode).bold());
        println!("{}", "╚══════════════════════════════════════════════╝".bold());
    }
    println!();
}

/// Prompt with the active tension and its phase
fn format_prompt(controller: &ProgressionController) -> String {
    match controller.active_tension() {
        Some(pair) => {
            let phase = controller.tension_phase(pair);
            format!(
                "[#{} | {} | {}] > ",
                controller.history().next_index(),
                pair,
                phase.to_string().color(phase.color())
            )
        }
        None => format!("[#{}] > ", controller.history().next_index()),
    }
}

/// Transcript line coloured by move kind
fn format_transcript_line(turn: &Turn) -> String {
    let line = format!("#{} {} [{}]: {}", turn.index, turn.speaker, turn.kind, turn.text);
    match turn.kind {
        MoveKind::Ordinary => line.normal().to_string(),
        MoveKind::ConsequenceTest => line.yellow().to_string(),
        MoveKind::PivotAnnouncement => line.red().to_string(),
        MoveKind::Synthesis => line.cyan().to_string(),
    }
}

// =============================================================================
// TESTS
// =============================================================================
