use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::config::Config;
use crate::dispatch::{check_instructions, DispatchReport, DispatchSettings, RunPlan, TrialDispatcher};
use crate::error::{Result, SessionError};
use crate::instructions::InstructionIndex;
use crate::presentation::PresentationPort;
use crate::procedure::ProceduralTable;
use crate::results::{CreateOutcome, ResultsLog, ResumeState};

/// Which part of the procedure a run covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    #[default]
    Full,
    /// Repeat only the generalization test block, logging to its own file.
    GenTestRetest,
}

/// Input and output files of a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionFiles {
    pub procedure: PathBuf,
    pub results: PathBuf,
    pub instructions: PathBuf,
}

impl SessionFiles {
    /// File names derived from subject id and condition.
    pub fn from_config(cfg: &Config, mode: RunMode) -> Self {
        Self {
            procedure: cfg.procedure_file(),
            results: match mode {
                RunMode::Full => cfg.results_file(),
                RunMode::GenTestRetest => cfg.retest_results_file(),
            },
            instructions: cfg.instructions_file(),
        }
    }

    pub fn with_procedure<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.procedure = path.as_ref().to_path_buf();
        self
    }

    pub fn with_results<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.results = path.as_ref().to_path_buf();
        self
    }

    pub fn with_instructions<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.instructions = path.as_ref().to_path_buf();
        self
    }
}

/// Where a session picks up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionState {
    /// Data rows already in the results file.
    pub resume_index: usize,
    /// Instruction screens shown before the first row this run dispatches.
    pub instruction_count: usize,
}

/// An opened session: inputs parsed, results file created or resumed.
#[derive(Debug)]
pub struct Session {
    mode: RunMode,
    files: SessionFiles,
    table: ProceduralTable,
    instructions: InstructionIndex,
    created: CreateOutcome,
    state: SessionState,
    plan: RunPlan,
    log: ResultsLog,
}

impl Session {
    pub fn open(cfg: &Config, files: SessionFiles, mode: RunMode) -> Result<Self> {
        cfg.validate()?;
        info!(
            "subject {} condition {} input {} display {}x{}",
            cfg.subject_id, cfg.condition, cfg.input_mode, cfg.display.width, cfg.display.height
        );

        let table = ProceduralTable::parse(&files.procedure, &cfg.parse_options())?;
        let instructions = InstructionIndex::load(&files.instructions, &cfg.image_root())?;

        let created = ResultsLog::create(&files.results, &cfg.schema)?;
        let resume = match created {
            CreateOutcome::Created => {
                info!("created {}", files.results.display());
                ResumeState::default()
            }
            CreateOutcome::AlreadyExists => {
                let rows = ResultsLog::read_rows(&files.results)?;
                let header = ResultsLog::read_header(&files.results)?;
                if header.iter().ne(cfg.schema.header()) {
                    warn!(
                        "{} has a different column layout than the configured schema",
                        files.results.display()
                    );
                }
                if mode == RunMode::Full {
                    warn_on_phase_mismatch(&table, &rows);
                }
                ResumeState::from_rows(&rows)
            }
        };

        let plan = match mode {
            RunMode::Full => RunPlan::resume(resume, table.len())?,
            RunMode::GenTestRetest => RunPlan::gen_test_retest(&table, resume.row_count)?
                .ok_or_else(|| {
                    SessionError::Config(format!(
                        "{} has no GenTest rows to re-test",
                        files.procedure.display()
                    ))
                })?,
        };
        check_instructions(&table, &plan, &instructions, cfg.instruction_source)?;

        let state = SessionState {
            resume_index: resume.row_count,
            instruction_count: plan.instructions_shown,
        };
        if state.resume_index > 0 {
            info!(
                "resuming {} at row {} of {}",
                files.results.display(),
                plan.rows.start,
                table.len()
            );
        }

        let log = ResultsLog::open_append(&files.results, &cfg.schema)?;
        Ok(Self {
            mode,
            files,
            table,
            instructions,
            created,
            state,
            plan,
            log,
        })
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    pub fn files(&self) -> &SessionFiles {
        &self.files
    }

    pub fn table(&self) -> &ProceduralTable {
        &self.table
    }

    pub fn created(&self) -> CreateOutcome {
        self.created
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn plan(&self) -> &RunPlan {
        &self.plan
    }

    /// Nothing left to dispatch.
    pub fn is_complete(&self) -> bool {
        self.plan.is_complete()
    }

    pub fn run<P: PresentationPort + ?Sized>(
        &mut self,
        port: &mut P,
        settings: DispatchSettings,
    ) -> Result<DispatchReport> {
        let report =
            TrialDispatcher::new(&self.table, &self.instructions, settings, port, &mut self.log)
                .run(&self.plan)?;
        info!(
            "logged {} rows to {}, stopped: {:?}",
            report.logged,
            self.log.path().display(),
            report.stopped
        );
        Ok(report)
    }
}

/// A results file written against a different procedure would resume at
/// the wrong row; flag it without refusing to run.
fn warn_on_phase_mismatch(table: &ProceduralTable, rows: &[csv::StringRecord]) {
    for (index, (row, trial)) in rows.iter().zip(table.iter()).enumerate() {
        let logged = row.get(1).unwrap_or("");
        if logged != trial.phase {
            warn!(
                "results row {} has phase '{}' but procedure line {} has '{}'",
                index + 1,
                logged,
                trial.line,
                trial.phase
            );
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::StopReason;
    use crate::presentation::{ScriptedAnswer, ScriptedPort};
    use assert_matches::assert_matches;
    use std::fs;
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    const PROCEDURE: &str = "SessionId,Phase,Painting,Artist,Schedule,ConDir,ConName,ConCat,Block,Notes\n\
        S1,instruct,NA,NA,NA,NA,NA,NA,NA,0\n\
        S1,Study,p/a.jpg,Monet,1,c/a.jpg,l,mm,B1\n\
        S1,Study,p/b.jpg,Turner,2,c/b.jpg,r,nat,B1\n\
        S1,instruct,NA,NA,NA,NA,NA,NA,NA,1\n\
        S1,GenTest,p/c.jpg,Monet,3\n\
        S1,GenTest,p/d.jpg,Turner,4\n\
        Session2,,\n\
        S2,RecTest,p/a.jpg,Monet,5,c/a.jpg,l,mm,B3\n";

    fn setup() -> (TempDir, SessionFiles) {
        let dir = tempdir().unwrap();
        let files = SessionFiles {
            procedure: dir.path().join("001_BF_FullExpProc.csv"),
            results: dir.path().join("001_BF_FullExpResults.csv"),
            instructions: dir.path().join("InstructStim.csv"),
        };
        fs::write(&files.procedure, PROCEDURE).unwrap();
        fs::write(&files.instructions, "Path\nwelcome.png\ntest.png\n").unwrap();
        (dir, files)
    }

    fn scripted(answers: &[&str]) -> ScriptedPort {
        ScriptedPort::new(
            answers.iter().map(|a| ScriptedAnswer::Choose(a.to_string())),
            Duration::from_millis(5),
        )
    }

    #[test]
    fn test_file_names_from_config() {
        let cfg = Config::default();
        let files = SessionFiles::from_config(&cfg, RunMode::GenTestRetest)
            .with_procedure("custom.csv");
        assert_eq!(files.procedure, PathBuf::from("custom.csv"));
        assert_eq!(files.results, PathBuf::from("001_BF_GenTestRetestResults.csv"));
        assert_eq!(files.instructions, PathBuf::from("InstructStim.csv"));
    }

    #[test]
    fn test_fresh_session_runs_to_marker() {
        let (_dir, files) = setup();
        let cfg = Config::default();
        let mut session = Session::open(&cfg, files.clone(), RunMode::Full).unwrap();
        assert_eq!(session.created(), CreateOutcome::Created);
        assert_eq!(session.state(), SessionState::default());

        let mut port = scripted(&["Monet", "Turner", "Monet", "Monet"]);
        let report = session.run(&mut port, DispatchSettings::default()).unwrap();
        assert_eq!(report.logged, 7);
        assert_matches!(report.stopped, StopReason::SessionMarker { .. });

        let rows = ResultsLog::read_rows(&files.results).unwrap();
        assert_eq!(rows.len(), 7);
        assert_eq!(&rows[5][16], "Monet");
        assert_eq!(&rows[5][14], "0");
    }

    #[test]
    fn test_reopen_resumes_after_logged_rows() {
        let (_dir, files) = setup();
        let cfg = Config::default();

        let mut first = Session::open(&cfg, files.clone(), RunMode::Full).unwrap();
        let mut port = scripted(&["Monet", "Turner", "Monet", "Monet"]);
        first.run(&mut port, DispatchSettings::default()).unwrap();
        drop(first);

        let mut second = Session::open(&cfg, files.clone(), RunMode::Full).unwrap();
        assert_eq!(second.created(), CreateOutcome::AlreadyExists);
        assert_eq!(
            second.state(),
            SessionState {
                resume_index: 7,
                instruction_count: 2
            }
        );
        assert_eq!(second.plan().rows, 7..8);

        let mut port = scripted(&["c/a.jpg"]);
        let report = second.run(&mut port, DispatchSettings::default()).unwrap();
        assert_eq!(report.stopped, StopReason::Completed);

        let rows = ResultsLog::read_rows(&files.results).unwrap();
        assert_eq!(rows.len(), 8);
        assert_eq!(&rows[7][1], "RecTest");

        let third = Session::open(&cfg, files, RunMode::Full).unwrap();
        assert!(third.is_complete());
    }

    #[test]
    fn test_more_results_than_trials_is_rejected() {
        let (_dir, files) = setup();
        let cfg = Config::default();
        let mut results = cfg.schema.header().join(",");
        results.push('\n');
        for _ in 0..9 {
            results.push_str("S1,NA\n");
        }
        fs::write(&files.results, results).unwrap();

        assert_matches!(
            Session::open(&cfg, files, RunMode::Full),
            Err(SessionError::ResumeOutOfRange { logged: 9, trials: 8 })
        );
    }

    #[test]
    fn test_malformed_procedure_creates_no_results_file() {
        let (_dir, files) = setup();
        fs::write(
            &files.procedure,
            "SessionId,Phase\nS1,Study,p/a.jpg,Monet\n",
        )
        .unwrap();

        assert_matches!(
            Session::open(&Config::default(), files.clone(), RunMode::Full),
            Err(SessionError::MalformedInput { line: 2, .. })
        );
        assert!(!files.results.exists());
    }

    #[test]
    fn test_missing_instruction_screen_fails_at_open() {
        let (_dir, files) = setup();
        fs::write(&files.instructions, "Path\nwelcome.png\n").unwrap();
        assert_matches!(
            Session::open(&Config::default(), files, RunMode::Full),
            Err(SessionError::InstructionNotFound { .. })
        );
    }

    #[test]
    fn test_retest_logs_to_its_own_file() {
        let (dir, files) = setup();
        let files = files.with_results(dir.path().join("001_BF_GenTestRetestResults.csv"));
        let cfg = Config::default();

        let mut session = Session::open(&cfg, files.clone(), RunMode::GenTestRetest).unwrap();
        assert_eq!(session.plan().rows, 3..6);
        assert_eq!(session.state().instruction_count, 1);

        let mut port = scripted(&["Turner", "Turner"]);
        let report = session.run(&mut port, DispatchSettings::default()).unwrap();
        assert_eq!(report.logged, 3);
        assert_eq!(port.shown[0], "instruction:images/test.png");

        let rows = ResultsLog::read_rows(&files.results).unwrap();
        let phases: Vec<_> = rows.iter().map(|r| r[1].to_string()).collect();
        assert_eq!(phases, vec!["instruct", "GenTest", "GenTest"]);
        assert!(!dir.path().join("001_BF_FullExpResults.csv").exists());

        let again = Session::open(&cfg, files, RunMode::GenTestRetest).unwrap();
        assert!(again.is_complete());
    }
}
