//! `rota` command line host.
//!
//! # Responsibility
//! - Wire the SQLite local store and the optional shared-directory remote
//!   into one `SyncCoordinator` per invocation.
//! - Render snapshots and relay mutations; every rule lives in `rota_core`.
//!
//! # Invariants
//! - `reset` asks twice unless `--yes` is given.
//! - Rejected mutations exit non-zero without writing anything.

use clap::{Parser, Subcommand};
use log::{info, warn};
use rota_core::{
    default_log_level, init_logging, Applied, DirRemoteStore, LocalStoreError, LocalWrite,
    RemoteApplyOutcome, RemoteStore, RemoteWrite, RotationError, RotationState, SqliteKvStore,
    SyncConfig, SyncCoordinator, WriteReport,
};
use std::fmt::{Display, Formatter};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

const DEFAULT_DB_FILE_NAME: &str = "rota.sqlite3";
const BAR_WIDTH: f64 = 20.0;

#[derive(Debug, Parser)]
#[command(name = "rota", version, about = "Shared duty rotation")]
struct Cli {
    /// SQLite file holding the local copy.
    #[arg(long, env = "ROTA_DB_PATH")]
    db: Option<PathBuf>,

    /// Directory shared between devices; omit for local-only mode.
    #[arg(long, env = "ROTA_REMOTE_DIR")]
    remote_dir: Option<PathBuf>,

    /// Absolute directory for rotating log files; logging is off without it.
    #[arg(long, env = "ROTA_LOG_DIR")]
    log_dir: Option<String>,

    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show whose turn it is and the rotation order.
    Show,
    /// Show the sync status.
    Status,
    /// Add a person at the end of the rotation.
    Add { name: String },
    /// Remove the person at a 1-based position.
    Delete { position: usize },
    /// Record that the current person did their turn.
    Done,
    /// Pass the turn on without recording it.
    Skip,
    /// Remove everyone and all history.
    Reset {
        #[arg(long)]
        yes: bool,
    },
    /// Completion counts per person.
    Stats,
    /// Most recent completions, newest first.
    History {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Follow remote changes until Ctrl-C.
    Watch,
}

#[derive(Debug)]
enum CliError {
    Local(LocalStoreError),
    Rotation(RotationError),
    InvalidPosition(usize),
    Io(std::io::Error),
}

impl Display for CliError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local(err) => write!(f, "cannot open local store: {err}"),
            Self::Rotation(err) => write!(f, "{err}"),
            Self::InvalidPosition(position) => {
                write!(f, "position {position} is invalid; positions start at 1")
            }
            Self::Io(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for CliError {}

impl From<LocalStoreError> for CliError {
    fn from(value: LocalStoreError) -> Self {
        Self::Local(value)
    }
}

impl From<RotationError> for CliError {
    fn from(value: RotationError) -> Self {
        Self::Rotation(value)
    }
}

impl From<std::io::Error> for CliError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

type Coordinator = SyncCoordinator<SqliteKvStore>;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Some(log_dir) = cli.log_dir.as_deref() {
        let level = cli.log_level.as_deref().unwrap_or_else(|| default_log_level());
        if let Err(err) = init_logging(level, log_dir) {
            eprintln!("warning: logging disabled: {err}");
        }
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let db_path = cli
        .db
        .unwrap_or_else(|| std::env::temp_dir().join(DEFAULT_DB_FILE_NAME));
    let local = SqliteKvStore::open(&db_path)?;
    let remote = cli.remote_dir.map(|dir| -> Arc<dyn RemoteStore> {
        Arc::new(DirRemoteStore::new(dir))
    });

    let mut sync = SyncCoordinator::new(SyncConfig::from_env(), local, remote);
    let report = sync.start().await;
    sync.apply_pending_remote_changes();
    info!(
        "event=cli_start module=cli status=ok db={} source={:?} subscribed={}",
        db_path.display(),
        report.source,
        report.subscribed
    );

    match cli.command.unwrap_or(Command::Show) {
        Command::Show => print_rotation(sync.state()),
        Command::Status => print_status(&sync),
        Command::Add { name } => match sync.add_person(&name).await? {
            Some(Applied { value, writes }) => {
                println!("Added {value}.");
                print_writes(&sync, &writes);
            }
            None => println!("Nothing added: name is blank."),
        },
        Command::Delete { position } => {
            let index = position
                .checked_sub(1)
                .ok_or(CliError::InvalidPosition(position))?;
            let Applied { value, writes } = sync.delete_person(index).await?;
            println!("Removed {value}.");
            print_writes(&sync, &writes);
            print_up_next(sync.state());
        }
        Command::Done => match sync.mark_done().await {
            Some(Applied { value, writes }) => {
                println!("{} is done.", value.person);
                print_writes(&sync, &writes);
                print_up_next(sync.state());
            }
            None => println!("Nobody in the rotation yet."),
        },
        Command::Skip => match sync.skip().await {
            Some(Applied { value, writes }) => {
                println!("Skipped {value}.");
                print_writes(&sync, &writes);
                print_up_next(sync.state());
            }
            None => println!("Nobody in the rotation yet."),
        },
        Command::Reset { yes } => {
            if !yes && !confirm_reset(&mut std::io::stdin().lock(), &mut std::io::stdout())? {
                println!("Reset cancelled.");
                return Ok(());
            }
            let writes = sync.reset().await;
            println!("Rotation cleared.");
            print_writes(&sync, &writes);
        }
        Command::Stats => print_stats(&sync),
        Command::History { limit } => print_history(sync.state(), limit),
        Command::Watch => watch(&mut sync).await,
    }

    sync.close_subscription();
    Ok(())
}

async fn watch(sync: &mut Coordinator) {
    if !sync.is_subscribed() {
        println!("No remote feed ({}).", sync.status());
        return;
    }

    print_up_next(sync.state());
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            change = sync.next_remote_change() => {
                let Some(change) = change else {
                    warn!("event=watch module=cli status=stopped reason=feed_closed");
                    break;
                };
                match sync.apply_remote_change(change) {
                    RemoteApplyOutcome::Replaced => print_up_next(sync.state()),
                    RemoteApplyOutcome::Failed => println!("{}", sync.status()),
                    RemoteApplyOutcome::Ignored | RemoteApplyOutcome::Unchanged => {}
                }
            }
        }
    }
}

/// Two-step gate: a yes/no question, then typing `reset`.
fn confirm_reset(input: &mut impl BufRead, output: &mut impl Write) -> Result<bool, CliError> {
    if !ask(input, output, "Remove everyone and all history? [y/N] ", is_yes)? {
        return Ok(false);
    }
    ask(
        input,
        output,
        "This cannot be undone. Type `reset` to confirm: ",
        |answer| answer == "reset",
    )
}

fn ask(
    input: &mut impl BufRead,
    output: &mut impl Write,
    prompt: &str,
    accept: impl Fn(&str) -> bool,
) -> Result<bool, CliError> {
    write!(output, "{prompt}")?;
    output.flush()?;
    let mut answer = String::new();
    input.read_line(&mut answer)?;
    Ok(accept(answer.trim()))
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.to_ascii_lowercase().as_str(), "y" | "yes")
}

fn print_rotation(state: &RotationState) {
    if state.is_empty() {
        println!("Nobody in the rotation yet. Add someone with `rota add <name>`.");
        return;
    }
    print_up_next(state);
    for (index, person) in state.people().iter().enumerate() {
        let marker = if index == state.current_index() { ">" } else { " " };
        println!("{marker} {}. {person}", index + 1);
    }
}

fn print_up_next(state: &RotationState) {
    match state.current_person() {
        Some(person) => println!("Up next: {person}"),
        None => println!("Nobody in the rotation yet."),
    }
}

fn print_status(sync: &Coordinator) {
    println!("Sync: {}", sync.status());
    println!("Collection: {}/{}", sync.config().collection, sync.config().document_id);
    println!("People: {}", sync.state().people().len());
    println!("Completions: {}", sync.state().history().len());
}

fn print_writes(sync: &Coordinator, writes: &WriteReport) {
    if let LocalWrite::Failed(message) = &writes.local {
        eprintln!("warning: local save failed: {message}");
    }
    if let RemoteWrite::Failed(err) = &writes.remote {
        eprintln!("warning: {} ({err})", sync.status().message);
    }
}

fn print_stats(sync: &Coordinator) {
    let stats = sync.statistics();
    if stats.ranking.is_empty() {
        println!("No statistics yet.");
        return;
    }
    println!("Completions: {}", stats.total);
    for stat in &stats.ranking {
        let bar = "#".repeat((stat.bar_scale * BAR_WIDTH).round() as usize);
        println!(
            "{:<16} {:>4} {:>3}% {bar}",
            stat.name, stat.count, stat.percentage
        );
    }
}

fn print_history(state: &RotationState, limit: usize) {
    let recent = state.recent_history(limit);
    if recent.is_empty() {
        println!("No completions yet.");
        return;
    }
    for entry in recent {
        println!(
            "{}  {}",
            entry.timestamp.format("%Y-%m-%d %H:%M UTC"),
            entry.person
        );
    }
}

#[cfg(test)]
mod tests {
    use super::{confirm_reset, Cli, Command};
    use clap::{CommandFactory, Parser};
    use std::io::Cursor;

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn show_is_the_default_command() {
        let cli = Cli::try_parse_from(["rota"]).expect("parse");
        assert!(cli.command.is_none());

        let cli = Cli::try_parse_from(["rota", "delete", "2"]).expect("parse");
        assert!(matches!(cli.command, Some(Command::Delete { position: 2 })));
    }

    #[test]
    fn reset_requires_both_answers() {
        let mut prompts = Vec::new();
        let mut input = Cursor::new("yes\nreset\n");
        assert!(confirm_reset(&mut input, &mut prompts).expect("confirmed"));
        assert!(String::from_utf8(prompts).expect("utf-8").contains("Type `reset`"));

        let mut input = Cursor::new("y\nnope\n");
        let confirmed =
            confirm_reset(&mut input, &mut Vec::<u8>::new()).expect("second step declined");
        assert!(!confirmed);
    }

    #[test]
    fn declining_first_question_skips_second() {
        let mut prompts = Vec::new();
        let mut input = Cursor::new("n\nreset\n");

        assert!(!confirm_reset(&mut input, &mut prompts).expect("declined"));
        assert!(!String::from_utf8(prompts).expect("utf-8").contains("Type `reset`"));

        let mut input = Cursor::new("reset\n");
        let confirmed =
            confirm_reset(&mut input, &mut Vec::<u8>::new()).expect("only second answer");
        assert!(!confirmed);
    }
}
