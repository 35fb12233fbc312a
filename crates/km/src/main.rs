//! km - keyboard macros from the command line
//!
//! Records a key sequence into a named macro, replays stored macros against
//! a scratch buffer and manages the macro directory. Every command prints a
//! JSON envelope on stdout; logs go to stderr (`RUST_LOG`, default `warn`).

use anyhow::Result;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use kmacro::prelude::*;
use kmacro::recorder::ReplayStats;
use kmacro::ErrorCode;

#[derive(Parser)]
#[command(name = "km")]
#[command(about = "km - record and replay Emacs-style keyboard macros")]
#[command(version)]
struct Cli {
    /// Engine config file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Macro directory, overrides the config
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record a key sequence as a named macro
    Record {
        name: String,
        /// Keys in Emacs notation, e.g. `C-a M-u C-e`
        #[arg(required = true, num_args = 1..)]
        keys: Vec<String>,
        /// Buffer contents while recording
        #[arg(long, default_value = "")]
        text: String,
        /// Key binding to remember with the macro
        #[arg(long)]
        binding: Option<String>,
        #[arg(long)]
        auto_pair: bool,
    },
    /// Replay a stored macro against a scratch buffer
    Play {
        name: String,
        #[arg(long, default_value = "")]
        text: String,
        #[arg(short = 'n', long, default_value = "1")]
        times: u32,
        #[arg(long)]
        auto_pair: bool,
    },
    /// List stored macros
    List,
    /// Show the events of a stored macro
    Show {
        name: String,
        /// Single comma-joined line
        #[arg(long)]
        compact: bool,
    },
    /// Delete a stored macro
    Delete { name: String },
}

#[derive(Serialize)]
struct Output<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<Error>,
}

impl<T: Serialize> Output<T> {
    fn ok(data: T) -> Self {
        Self { success: true, data: Some(data), error: None }
    }
    fn err(e: Error) -> Output<()> {
        Output { success: false, data: None, error: Some(e) }
    }
}

fn print_json<T: Serialize>(output: &T) {
    match serde_json::to_string_pretty(output) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error: {}", e),
    }
}

#[derive(Serialize)]
struct PlayResult {
    name: String,
    text: String,
    caret: usize,
    stats: ReplayStats,
}

// ── Main ────────────────────────────────────────────────────────────────────

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = open_engine(cli.config.as_deref(), cli.dir).and_then(|engine| match cli.command {
        Commands::Record { name, keys, text, binding, auto_pair } => {
            record(engine, &name, &keys.join(" "), &text, binding, auto_pair)
        }
        Commands::Play { name, text, times, auto_pair } => play(engine, &name, &text, times, auto_pair),
        Commands::List => list(engine),
        Commands::Show { name, compact } => show(&engine, &name, compact),
        Commands::Delete { name } => delete(engine, &name),
    });

    if let Err(e) = result {
        match e.downcast_ref::<Error>() {
            Some(err) => print_json(&Output::<()>::err(err.clone())),
            None => eprintln!("Error: {:#}", e),
        }
        std::process::exit(1);
    }
}

fn open_engine(config: Option<&std::path::Path>, dir: Option<PathBuf>) -> Result<MacroEngine> {
    let mut config = match config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    if dir.is_some() {
        config.macro_dir = dir;
    }
    Ok(MacroEngine::open(config)?)
}

fn session(engine: MacroEngine, text: &str, auto_pair: bool) -> ScratchSession {
    let mut editor = ScratchEditor::new(&engine.config().commands).with_text(text);
    editor.set_auto_pair(auto_pair);
    ScratchSession::with_editor(engine, editor)
}

/// Load one stored macro into the registry through the deferred queue
fn load_named(session: &mut ScratchSession, name: &str) -> Result<()> {
    session
        .engine_mut()
        .load_from_storage(AutoLoadPolicy::Subset(vec![name.to_string()]))?;
    session.run_deferred();
    if let Some(failure) = session.editor().load_failures().first() {
        return Err(failure.error.clone().into());
    }
    Ok(())
}

// ── Commands ────────────────────────────────────────────────────────────────

fn record(
    engine: MacroEngine,
    name: &str,
    keys: &str,
    text: &str,
    binding: Option<String>,
    auto_pair: bool,
) -> Result<()> {
    let mut session = session(engine, text, auto_pair);
    session.engine_mut().start_definition(false)?;
    let pressed = session.press_keys(keys);
    if let Err(e) = pressed {
        session.engine_mut().end_definition(true);
        return Err(e.into());
    }
    // the keys may already have ended the definition themselves
    if session.engine().is_defining() {
        session.engine_mut().end_definition(false);
    }

    let engine = session.engine_mut();
    engine.name_current_with_binding(name, binding)?;
    let path = engine.save(name)?;
    let events = engine.lookup(name).map_or(0, EventLog::len);
    tracing::info!(name, events, path = %path.display(), "macro recorded");

    print_json(&Output::ok(serde_json::json!({
        "name": name,
        "events": events,
        "path": path,
        "text": session.editor().text(),
    })));
    Ok(())
}

fn play(engine: MacroEngine, name: &str, text: &str, times: u32, auto_pair: bool) -> Result<()> {
    let mut session = session(engine, text, auto_pair);
    load_named(&mut session, name)?;

    let interrupt = session.engine().interrupt();
    ctrlc::set_handler(move || interrupt.trigger())?;

    session.execute_named(name, times)?;
    let editor = session.editor();
    print_json(&Output::ok(PlayResult {
        name: name.to_string(),
        text: editor.text(),
        caret: editor.caret(),
        stats: session.engine().last_replay_stats(),
    }));
    Ok(())
}

fn list(engine: MacroEngine) -> Result<()> {
    let mut session = session(engine, "", false);
    session.engine_mut().load_from_storage(AutoLoadPolicy::All)?;
    session.run_deferred();

    let engine = session.engine();
    let macros: Vec<_> = engine
        .completions()
        .into_iter()
        .map(|(name, id)| {
            let entry = engine.registry().entry(&name);
            serde_json::json!({
                "name": name,
                "id": id.0,
                "events": entry.map_or(0, |e| e.log.len()),
                "binding": entry.and_then(|e| e.binding_hint.clone()),
            })
        })
        .collect();
    print_json(&Output::ok(serde_json::json!({
        "macros": macros,
        "failures": session.editor().load_failures(),
    })));
    Ok(())
}

fn show(engine: &MacroEngine, name: &str, compact: bool) -> Result<()> {
    let storage = engine
        .storage()
        .ok_or_else(|| Error::storage("No macro directory configured"))?;
    if !storage.exists(name) {
        return Err(Error::macro_not_found(name).into());
    }
    let stored = storage.load(name)?;
    let events: serde_json::Value = if compact {
        stored.log.to_compact().into()
    } else {
        stored.log.iter().map(|e| e.to_string()).collect::<Vec<_>>().into()
    };
    print_json(&Output::ok(serde_json::json!({
        "name": stored.name,
        "binding": stored.binding,
        "saved_at": stored.saved_at.map(|t| t.to_rfc3339()),
        "events": events,
    })));
    Ok(())
}

fn delete(mut engine: MacroEngine, name: &str) -> Result<()> {
    match engine.delete(name) {
        Ok(()) => {
            print_json(&Output::ok(serde_json::json!({ "deleted": name })));
            Ok(())
        }
        Err(e) if e.code == ErrorCode::MacroNotFound => Err(e.into()),
        Err(e) => Err(anyhow::Error::new(e).context(format!("deleting {}", name))),
    }
}
