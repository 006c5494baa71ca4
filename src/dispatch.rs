use std::ops::Range;
use std::path::PathBuf;
use std::time::Duration;

use log::{debug, info};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::config::Config;
use crate::context::ContextIndex;
use crate::error::{Result, SessionError};
use crate::instructions::{InstructionIndex, InstructionSource};
use crate::presentation::{Feedback, PresentationPort, Proceed, ResponseOutcome, StimulusLayout};
use crate::procedure::{ProceduralTable, TrialKind, TrialSpec};
use crate::results::{ResultRecord, ResultSink, ResumeState, TrialOutcome};
use crate::runtime::ExperimentClock;
use crate::scoring::{reaction_time, ReactionTime, NO_ANSWER};

/// The part of the configuration the dispatcher reads
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchSettings {
    pub response_timeout: Duration,
    pub instruction_source: InstructionSource,
    /// Prefix for painting and context paths.
    pub stimulus_root: PathBuf,
}

impl DispatchSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            response_timeout: cfg.response_timeout(),
            instruction_source: cfg.instruction_source,
            stimulus_root: cfg.stimulus_root(),
        }
    }
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Which rows of the table a run dispatches
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPlan {
    pub rows: Range<usize>,
    /// Instruction screens already shown before `rows.start`.
    pub instructions_shown: usize,
}

impl RunPlan {
    pub fn full(trials: usize) -> Self {
        Self {
            rows: 0..trials,
            instructions_shown: 0,
        }
    }

    /// Continue after the rows already in the results file.
    pub fn resume(state: ResumeState, trials: usize) -> Result<Self> {
        if state.row_count > trials {
            return Err(SessionError::ResumeOutOfRange {
                logged: state.row_count,
                trials,
            });
        }
        Ok(Self {
            rows: state.row_count..trials,
            instructions_shown: state.instruction_count,
        })
    }

    /// Re-run of the generalization test block, skipping `logged` rows already
    /// written to the re-test log. `None` if the table has no `GenTest` rows.
    pub fn gen_test_retest(table: &ProceduralTable, logged: usize) -> Result<Option<Self>> {
        let Some(window) = gen_test_window(table) else {
            return Ok(None);
        };
        if logged > window.len() {
            return Err(SessionError::ResumeOutOfRange {
                logged,
                trials: window.len(),
            });
        }
        let start = window.start + logged;
        Ok(Some(Self {
            rows: start..window.end,
            instructions_shown: table.instructions_before(start),
        }))
    }

    pub fn is_complete(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.rows.len()
    }
}

/// Rows of the first generalization test, together with the instruction
/// screens that lead into it.
pub fn gen_test_window(table: &ProceduralTable) -> Option<Range<usize>> {
    let trials = table.trials();
    let first = trials.iter().position(|t| t.kind == TrialKind::GenTest)?;

    let mut start = first;
    while start > 0 && trials[start - 1].kind == TrialKind::Instruct {
        start -= 1;
    }
    let end = trials[first..]
        .iter()
        .position(|t| t.kind != TrialKind::GenTest)
        .map_or(trials.len(), |offset| first + offset);

    Some(start..end)
}

/// Resolve every instruction screen a plan will need, so a bad reference
/// fails before the subject sits down rather than halfway through.
pub fn check_instructions(
    table: &ProceduralTable,
    plan: &RunPlan,
    instructions: &InstructionIndex,
    source: InstructionSource,
) -> Result<()> {
    let mut shown = plan.instructions_shown;
    for trial in &table.trials()[plan.rows.clone()] {
        if trial.kind == TrialKind::Instruct {
            instructions.resolve(source, shown, &trial.instruction_ref)?;
            shown += 1;
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// Every planned row was dispatched.
    Completed,
    /// A terminal session marker was logged.
    SessionMarker { line: u64, session_id: String },
    /// The subject or operator quit; the in-flight row was not logged.
    Quit { line: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub logged: usize,
    /// Table index of the first row not logged by this run.
    pub next_index: usize,
    pub stopped: StopReason,
}

/// Walks the procedural table and runs one trial handler per row.
pub struct TrialDispatcher<'a, P: PresentationPort + ?Sized, S: ResultSink + ?Sized> {
    table: &'a ProceduralTable,
    instructions: &'a InstructionIndex,
    settings: DispatchSettings,
    artists: Vec<String>,
    contexts: ContextIndex,
    clock: ExperimentClock,
    rng: StdRng,
    port: &'a mut P,
    sink: &'a mut S,
    instructions_shown: usize,
}

impl<'a, P: PresentationPort + ?Sized, S: ResultSink + ?Sized> TrialDispatcher<'a, P, S> {
    pub fn new(
        table: &'a ProceduralTable,
        instructions: &'a InstructionIndex,
        settings: DispatchSettings,
        port: &'a mut P,
        sink: &'a mut S,
    ) -> Self {
        Self {
            table,
            instructions,
            settings,
            artists: table.artists(),
            contexts: table.context_index(),
            clock: ExperimentClock::start(),
            rng: StdRng::from_entropy(),
            port,
            sink,
            instructions_shown: 0,
        }
    }

    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    pub fn artists(&self) -> &[String] {
        &self.artists
    }

    pub fn run(&mut self, plan: &RunPlan) -> Result<DispatchReport> {
        self.instructions_shown = plan.instructions_shown;
        info!(
            "dispatching rows {}..{} ({} instruction screens already shown)",
            plan.rows.start, plan.rows.end, plan.instructions_shown
        );

        let table = self.table;
        let mut logged = 0;
        for index in plan.rows.clone() {
            let Some(trial) = table.get(index) else {
                return Err(SessionError::ResumeOutOfRange {
                    logged: index,
                    trials: table.len(),
                });
            };

            let Some(outcome) = self.run_trial(trial)? else {
                info!("quit at line {} before it was logged", trial.line);
                return Ok(DispatchReport {
                    logged,
                    next_index: index,
                    stopped: StopReason::Quit { line: trial.line },
                });
            };

            let record = ResultRecord::new(trial, outcome);
            self.sink.append(&record)?;
            logged += 1;
            debug!(
                "line {} {}: accuracy={} rt={} response={}",
                trial.line,
                trial.kind.label(),
                record.outcome.accuracy,
                record.outcome.reaction_time,
                record.outcome.response
            );

            match trial.kind {
                TrialKind::SessionBoundary { terminal: true } => {
                    info!("session marker {} at line {}", trial.session_id, trial.line);
                    return Ok(DispatchReport {
                        logged,
                        next_index: index + 1,
                        stopped: StopReason::SessionMarker {
                            line: trial.line,
                            session_id: trial.session_id.clone(),
                        },
                    });
                }
                TrialKind::SessionBoundary { terminal: false } | TrialKind::Passthrough => {}
                TrialKind::Instruct
                | TrialKind::Study
                | TrialKind::GenTest
                | TrialKind::RecTest
                | TrialKind::GenRecTest => self.port.show_buffer()?,
            }
        }

        Ok(DispatchReport {
            logged,
            next_index: plan.rows.end,
            stopped: StopReason::Completed,
        })
    }

    /// `None` means the subject quit during the trial.
    fn run_trial(&mut self, trial: &TrialSpec) -> Result<Option<TrialOutcome>> {
        match trial.kind {
            TrialKind::Instruct => self.instruct(trial),
            TrialKind::Study => self.study(trial),
            TrialKind::GenTest => self.gen_test(trial),
            TrialKind::RecTest => self.rec_test(trial),
            TrialKind::GenRecTest => self.gen_rec_test(trial),
            TrialKind::SessionBoundary { .. } | TrialKind::Passthrough => {
                Ok(Some(TrialOutcome::not_applicable()))
            }
        }
    }

    fn instruct(&mut self, trial: &TrialSpec) -> Result<Option<TrialOutcome>> {
        let screen = self.instructions.resolve(
            self.settings.instruction_source,
            self.instructions_shown,
            &trial.instruction_ref,
        )?;
        let proceed = self.port.show_instruction(&screen.image)?;
        self.instructions_shown += 1;
        Ok(match proceed {
            Proceed::Continue => Some(TrialOutcome::not_applicable()),
            Proceed::Quit => None,
        })
    }

    fn study(&mut self, trial: &TrialSpec) -> Result<Option<TrialOutcome>> {
        let mut roster = self.artists.clone();
        roster.shuffle(&mut self.rng);
        let layout = StimulusLayout::Study {
            painting: self.stimulus(&trial.painting),
            context: self.stimulus(&trial.context_path),
            artists: roster,
        };

        let Some((response, rt)) = self.collect(&layout)? else {
            return Ok(None);
        };
        self.port.show_feedback(&Feedback {
            correct_artist: trial.artist.clone(),
            painting: self.stimulus(&trial.painting),
            context: self.stimulus(&trial.context_path),
        })?;
        Ok(Some(TrialOutcome::scored(response, &trial.artist, rt)))
    }

    fn gen_test(&mut self, trial: &TrialSpec) -> Result<Option<TrialOutcome>> {
        let layout = StimulusLayout::GenTest {
            painting: self.stimulus(&trial.painting),
            artists: self.artists.clone(),
        };
        Ok(self
            .collect(&layout)?
            .map(|(response, rt)| TrialOutcome::scored(response, &trial.artist, rt)))
    }

    fn rec_test(&mut self, trial: &TrialSpec) -> Result<Option<TrialOutcome>> {
        let category = trial.context_category.ok_or_else(|| {
            SessionError::malformed(
                "procedure",
                trial.line,
                "recognition row has no context category",
            )
        })?;
        let contexts =
            self.contexts
                .sample_with_rng(&trial.painting, &trial.artist, category, &mut self.rng);
        let layout = StimulusLayout::RecTest {
            painting: self.stimulus(&trial.painting),
            contexts,
        };
        Ok(self
            .collect(&layout)?
            .map(|(response, rt)| TrialOutcome::scored(response, &trial.context_path, rt)))
    }

    fn gen_rec_test(&mut self, trial: &TrialSpec) -> Result<Option<TrialOutcome>> {
        let layout = StimulusLayout::GenRecTest {
            context: self.stimulus(&trial.context_path),
            artists: self.artists.clone(),
        };
        Ok(self
            .collect(&layout)?
            .map(|(response, rt)| TrialOutcome::scored(response, &trial.artist, rt)))
    }

    /// Present a layout and wait for one answer. Timeouts become "No answer".
    fn collect(&mut self, layout: &StimulusLayout) -> Result<Option<(String, ReactionTime)>> {
        let onset = self.port.present(layout)?;
        let onset_secs = self.clock.seconds_at(onset);

        match self
            .port
            .await_response(layout, self.settings.response_timeout)?
        {
            ResponseOutcome::Selected { slot, at } => match layout.choices().get(slot) {
                Some(choice) => {
                    let choice = choice.clone();
                    self.port.show_selection(layout, slot)?;
                    Ok(Some((
                        choice,
                        reaction_time(self.clock.seconds_at(at), onset_secs),
                    )))
                }
                None => {
                    debug!("slot {slot} has no choice, treated as no answer");
                    Ok(Some((NO_ANSWER.to_string(), reaction_time(0.0, onset_secs))))
                }
            },
            ResponseOutcome::Timeout => {
                debug!("no response within {:?}", self.settings.response_timeout);
                Ok(Some((NO_ANSWER.to_string(), reaction_time(0.0, onset_secs))))
            }
            ResponseOutcome::Quit => Ok(None),
        }
    }

    fn stimulus(&self, path: &str) -> PathBuf {
        self.settings.stimulus_root.join(path)
    }
}
