use std::io::{stdout, Write};
use std::path::PathBuf;
use std::sync::mpsc::{channel, Receiver};
use std::thread;
use std::time::Duration;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use rand::rngs::StdRng;
use rand::SeedableRng;

mod advisor;
mod autoplay;
mod controller;
mod engine;
mod error;
mod extract;
mod play;
mod session;
mod stats;
mod store;
mod stream;

use advisor::CommandAdvisor;
use autoplay::{AutoPlayConfig, AutoPlayer, StopHandle};
use controller::Controller;
use extract::{CommandExtractor, MoveExtractor};
use play::{Play, Terminal};
use session::{Session, SessionEvent};
use stats::Stats;
use store::{JsonlStore, MemoryStore, StoreWriter};
use stream::parser::Phase;

#[derive(Parser)]
#[command(name = "agent48", version, about = "2048, played by hand or by a text generation service")]
struct Cli {
    #[command(flatten)]
    verbose: Verbosity<InfoLevel>,

    /// Where log output goes.
    #[arg(long, default_value = "./agent48.log")]
    log_file: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Play in the terminal with the arrow keys.
    Play {
        /// Append games to this JSONL log instead of keeping them in memory.
        #[arg(long)]
        store: Option<PathBuf>,

        #[arg(long)]
        seed: Option<u64>,
    },
    /// Let the advisor play until the game is over.
    Auto(AutoArgs),
    /// Print aggregate stats from a JSONL game log.
    Stats { store: PathBuf },
}

#[derive(Args)]
struct AutoArgs {
    /// Shell command asked for each move; reads the request on stdin, streams its reply on stdout.
    #[arg(long)]
    advisor_cmd: String,

    /// Shell command that turns a free form answer into `{"move": "<direction>"}`.
    #[arg(long)]
    extractor_cmd: String,

    #[arg(long)]
    store: Option<PathBuf>,

    #[arg(long, default_value_t = 0)]
    move_delay_ms: u64,

    #[arg(long, default_value_t = autoplay::DEFAULT_ERROR_COOLDOWN.as_secs())]
    error_cooldown_secs: u64,

    #[arg(long)]
    max_moves: Option<u32>,

    /// Give up after this many failed cycles in a row; at least 1.
    #[arg(long, default_value_t = autoplay::DEFAULT_MAX_FAILURES, value_parser = clap::value_parser!(u32).range(1..))]
    max_failures: u32,

    #[arg(long)]
    seed: Option<u64>,
}

impl From<&AutoArgs> for AutoPlayConfig {
    fn from(args: &AutoArgs) -> Self {
        Self {
            move_delay: Duration::from_millis(args.move_delay_ms),
            error_cooldown: Duration::from_secs(args.error_cooldown_secs),
            max_moves: args.max_moves,
            max_consecutive_failures: args.max_failures,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {}] {}",
                record.level(),
                record.target(),
                message,
            ))
        })
        .level(cli.verbose.log_level_filter())
        .chain(fern::log_file(&cli.log_file)?)
        .apply()?;

    match &cli.command {
        Command::Play { store, seed } => play(store.as_ref(), *seed),
        Command::Auto(args) => auto(args),
        Command::Stats { store: path } => {
            let entries = store::jsonl::read_entries(path)?;
            println!("{}", Stats::from_entries(&entries));
            Ok(())
        }
    }
}

fn open_store(path: Option<&PathBuf>) -> Result<StoreWriter> {
    let writer = match path {
        Some(path) => StoreWriter::spawn(JsonlStore::open(path)?)?,
        None => StoreWriter::spawn(MemoryStore::new())?,
    };
    Ok(writer)
}

fn rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

fn play(store: Option<&PathBuf>, seed: Option<u64>) -> Result<()> {
    let session = Session::new(open_store(store)?);
    let session = {
        let mut terminal = Terminal::new(stdout().lock())?;
        Play::new(session, rng(seed)).run(&mut terminal)?
    };
    let view = session.view();
    session.close()?;
    println!("final score {} after {} moves", view.score, view.moves);
    Ok(())
}

fn auto(args: &AutoArgs) -> Result<()> {
    let config = AutoPlayConfig::from(args);
    let (tx, rx) = channel();
    let mut session = Session::new(open_store(args.store.as_ref())?).with_events(tx);
    let printer = thread::Builder::new()
        .name("events".to_string())
        .spawn(move || print_events(rx))?;

    session.new_game(rng(args.seed))?;
    let mut controller = Controller::new(
        session,
        CommandAdvisor::new(&args.advisor_cmd),
        MoveExtractor::new(CommandExtractor::new(&args.extractor_cmd)),
    )
    .with_retry_after(config.error_cooldown);

    let stop = StopHandle::default();
    stop.stop_on_interrupt()?;
    let summary = AutoPlayer::new(config).run(&mut controller, &stop)?;

    let view = controller.session().view();
    // closing the session drops the event sender, which ends the printer
    controller.into_session().close()?;
    if printer.join().is_err() {
        log::error!("event printer panicked");
    }
    println!(
        "{}: {} moves in {} cycles, {} failed",
        summary.reason, summary.moves, summary.cycles, summary.failures
    );
    if let (Some(game_id), Some(started_at)) = (view.game_id, view.started_at) {
        let elapsed = chrono::Utc::now() - started_at;
        println!(
            "game {game_id}: score {} in {}s",
            view.score,
            elapsed.num_seconds()
        );
    }
    Ok(())
}

fn print_events(rx: Receiver<SessionEvent>) {
    let mut out = stdout().lock();
    let mut phase = None;
    for event in rx {
        let result = match event {
            SessionEvent::GameStarted { game_id, board } => match game_id {
                Some(id) => write!(out, "game {id}\n{board}"),
                None => write!(out, "game (not saved)\n{board}"),
            },
            SessionEvent::CycleStarted { allowed } => {
                phase = None;
                writeln!(out, "\nlegal moves: {allowed}")
            }
            SessionEvent::Appended { phase: p, fragment } => {
                let header = match (phase, p) {
                    (Some(prev), p) if prev == p => Ok(()),
                    (_, Phase::Reasoning) => write!(out, "\n-- thinking --\n"),
                    (_, Phase::Answer) => write!(out, "\n-- answer --\n"),
                };
                phase = Some(p);
                header.and_then(|_| write!(out, "{fragment}"))
            }
            SessionEvent::Extracting => writeln!(out),
            SessionEvent::MoveApplied {
                direction,
                score_delta,
                score,
                board,
            } => write!(out, "{direction} +{score_delta} (score {score})\n{board}"),
            SessionEvent::NoOp { direction } => writeln!(out, "{direction} does not move anything"),
            SessionEvent::CycleFailed { message } => writeln!(out, "error: {message}"),
            SessionEvent::GameOver {
                score,
                moves,
                max_tile,
            } => writeln!(out, "game over: score {score} in {moves} moves, highest tile {max_tile}"),
        };
        if let Err(e) = result.and_then(|_| out.flush()) {
            log::error!("writing to stdout: {e}");
            break;
        }
    }
}

#[cfg(test)]
mod test {
    use rstest::*;

    use super::*;

    fn auto_args(extra: &[&str]) -> Vec<String> {
        ["agent48", "auto", "--advisor-cmd", "advise", "--extractor-cmd", "extract"]
            .iter()
            .chain(extra)
            .map(|s| s.to_string())
            .collect()
    }

    #[test]
    fn auto_defaults() {
        let cli = Cli::try_parse_from(auto_args(&[])).unwrap();
        let Command::Auto(args) = cli.command else {
            panic!("expected the auto subcommand");
        };
        let config = AutoPlayConfig::from(&args);
        assert_eq!(config.max_consecutive_failures, autoplay::DEFAULT_MAX_FAILURES);
        assert_eq!(config.error_cooldown, autoplay::DEFAULT_ERROR_COOLDOWN);
        assert_eq!(config.max_moves, None);
    }

    #[rstest]
    #[case::zero("0", false)]
    #[case::one("1", true)]
    #[case::many("12", true)]
    fn max_failures_must_be_positive(#[case] value: &str, #[case] accepted: bool) {
        let parsed = Cli::try_parse_from(auto_args(&["--max-failures", value]));
        assert_eq!(parsed.is_ok(), accepted);
    }
}
