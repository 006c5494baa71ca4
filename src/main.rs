use clap::{error::ErrorKind, Args, CommandFactory, Parser, Subcommand};
use crossterm::{
    event::{DisableMouseCapture, EnableMouseCapture},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
    tty::IsTty,
};
use easel::{
    config::{Condition, Config, ConfigStore, FileConfigStore, InputMode},
    dispatch::{DispatchReport, DispatchSettings, StopReason},
    runtime::{response_backend, CrosstermEventSource},
    session::{RunMode, Session, SessionFiles},
    summary::Summary,
    terminal::{PortTimings, TerminalPort},
};
use ratatui::{backend::CrosstermBackend, Terminal};
use std::{
    error::Error,
    fs::OpenOptions,
    io::{self, stdin},
    path::{Path, PathBuf},
};

/// painting and context experiment runner with resumable sessions
#[derive(Parser, Debug, Clone)]
#[clap(
    version,
    about,
    long_about = "Presents paintings and their study contexts, collects timed answers from a pointer or button box, and appends every trial to a results file that doubles as the resume checkpoint.",
    args_conflicts_with_subcommands = true
)]
pub struct Cli {
    #[clap(subcommand)]
    command: Option<Command>,

    #[clap(flatten)]
    run: RunArgs,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// run or resume a session (the default)
    Run(RunArgs),
    /// per-phase accuracy and reaction time of a results file
    Summary {
        /// results file to summarize
        results: PathBuf,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// configuration file (defaults to the per-user config location)
    #[clap(long)]
    config: Option<PathBuf>,

    /// subject id used in file names
    #[clap(short = 's', long)]
    subject: Option<String>,

    /// trial ordering of the procedure
    #[clap(short = 'c', long, value_enum)]
    condition: Option<Condition>,

    /// device the subject answers with
    #[clap(short = 'i', long, value_enum)]
    input_mode: Option<InputMode>,

    /// procedural file, instead of {subject}_{BF|IF}_FullExpProc.csv
    #[clap(long)]
    procedure: Option<PathBuf>,

    /// results file, instead of the name derived from subject and condition
    #[clap(long)]
    results: Option<PathBuf>,

    /// instruction image list, instead of InstructStim.csv
    #[clap(long)]
    instructions: Option<PathBuf>,

    /// repeat only the generalization test block, logging to a separate file
    #[clap(long)]
    gen_test_retest: bool,

    /// where log output goes, instead of {subject}_{BF|IF}_session.log
    #[clap(long)]
    log_file: Option<PathBuf>,
}

impl RunArgs {
    fn mode(&self) -> RunMode {
        if self.gen_test_retest {
            RunMode::GenTestRetest
        } else {
            RunMode::Full
        }
    }

    /// Command line values win over the config file.
    fn apply(&self, mut cfg: Config) -> Config {
        if let Some(subject) = &self.subject {
            cfg.subject_id = subject.clone();
        }
        if let Some(condition) = self.condition {
            cfg.condition = condition;
        }
        if let Some(input_mode) = self.input_mode {
            cfg.input_mode = input_mode;
        }
        cfg
    }

    fn load_config(&self) -> easel::Result<Config> {
        let store = match &self.config {
            Some(path) => FileConfigStore::with_path(path),
            None => FileConfigStore::new(),
        };
        let cfg = self.apply(store.load()?);
        cfg.validate()?;
        Ok(cfg)
    }

    fn files(&self, cfg: &Config) -> SessionFiles {
        let mut files = SessionFiles::from_config(cfg, self.mode());
        if let Some(path) = &self.procedure {
            files = files.with_procedure(path);
        }
        if let Some(path) = &self.results {
            files = files.with_results(path);
        }
        if let Some(path) = &self.instructions {
            files = files.with_instructions(path);
        }
        files
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    match cli.command {
        Some(Command::Summary { results }) => summarize(&results),
        Some(Command::Run(args)) => run(&args),
        None => run(&cli.run),
    }
}

fn fail(kind: ErrorKind, message: impl std::fmt::Display) -> ! {
    let mut cmd = Cli::command();
    cmd.error(kind, message).exit()
}

fn summarize(results: &Path) -> Result<(), Box<dyn Error>> {
    match Summary::load(results) {
        Ok(summary) => {
            print!("{summary}");
            Ok(())
        }
        Err(e) => fail(ErrorKind::Io, e),
    }
}

fn init_logging(path: &Path) -> Result<(), Box<dyn Error>> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Pipe(Box::new(file)))
        .try_init()?;
    Ok(())
}

fn run(args: &RunArgs) -> Result<(), Box<dyn Error>> {
    let cfg = args
        .load_config()
        .unwrap_or_else(|e| fail(ErrorKind::ValueValidation, e));
    init_logging(&args.log_file.clone().unwrap_or_else(|| cfg.log_file()))?;

    let mode = args.mode();
    let mut session =
        Session::open(&cfg, args.files(&cfg), mode).unwrap_or_else(|e| fail(ErrorKind::Io, e));

    if session.is_complete() {
        println!(
            "{} is already complete ({} rows)",
            session.files().results.display(),
            session.state().resume_index
        );
        return Ok(());
    }

    if !stdin().is_tty() {
        fail(ErrorKind::Io, "stdin must be a tty");
    }

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    if cfg.input_mode == InputMode::Pointer {
        execute!(stdout, EnableMouseCapture)?;
    }
    let terminal = Terminal::new(CrosstermBackend::new(stdout))?;

    let mut port = TerminalPort::new(
        terminal,
        response_backend(cfg.input_mode, CrosstermEventSource::new()),
        cfg.input_mode,
        PortTimings::from_config(&cfg),
    );
    let outcome = session.run(&mut port, DispatchSettings::from_config(&cfg));

    disable_raw_mode()?;
    execute!(
        port.terminal_mut().backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    port.terminal_mut().show_cursor()?;

    match outcome {
        Ok(report) => {
            println!("{}", describe(&report, &session));
            Ok(())
        }
        Err(e) => fail(ErrorKind::Io, e),
    }
}

fn describe(report: &DispatchReport, session: &Session) -> String {
    let results = session.files().results.display();
    match &report.stopped {
        StopReason::Completed => {
            format!("session complete: {} rows logged to {results}", report.logged)
        }
        StopReason::SessionMarker { session_id, .. } => format!(
            "reached {session_id}: {} rows logged to {results}, run again to continue",
            report.logged
        ),
        StopReason::Quit { line } => format!(
            "quit at procedure line {line}: {} rows logged to {results}, run again to resume",
            report.logged
        ),
    }
}
