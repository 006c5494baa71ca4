use crate::error::Result;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// What a trial puts on screen. Choices are listed in slot order and are the
/// exact strings recorded as the subject's response.
#[derive(Debug, Clone, PartialEq)]
pub enum StimulusLayout {
    Study {
        painting: PathBuf,
        context: PathBuf,
        artists: Vec<String>,
    },
    GenTest {
        painting: PathBuf,
        artists: Vec<String>,
    },
    RecTest {
        painting: PathBuf,
        contexts: Vec<String>,
    },
    GenRecTest {
        context: PathBuf,
        artists: Vec<String>,
    },
}

impl StimulusLayout {
    pub fn choices(&self) -> &[String] {
        match self {
            Self::Study { artists, .. }
            | Self::GenTest { artists, .. }
            | Self::GenRecTest { artists, .. } => artists,
            Self::RecTest { contexts, .. } => contexts,
        }
    }
}

/// Corrective feedback shown after a study trial
#[derive(Debug, Clone, PartialEq)]
pub struct Feedback {
    pub correct_artist: String,
    pub painting: PathBuf,
    pub context: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseOutcome {
    Selected { slot: usize, at: Instant },
    Timeout,
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Proceed {
    Continue,
    Quit,
}

/// Everything the dispatcher needs from the display and input hardware.
pub trait PresentationPort {
    /// Show an instruction image and wait for the subject to continue.
    fn show_instruction(&mut self, image: &Path) -> Result<Proceed>;

    /// Put the trial's stimuli on screen; returns the onset time.
    fn present(&mut self, layout: &StimulusLayout) -> Result<Instant>;

    /// Wait up to `timeout` for the subject to pick one of the layout's choices.
    fn await_response(
        &mut self,
        layout: &StimulusLayout,
        timeout: Duration,
    ) -> Result<ResponseOutcome>;

    /// Briefly mark the chosen slot.
    fn show_selection(&mut self, layout: &StimulusLayout, slot: usize) -> Result<()>;

    fn show_feedback(&mut self, feedback: &Feedback) -> Result<()>;

    /// Blank screen between trials.
    fn show_buffer(&mut self) -> Result<()>;
}

/// Answer a [`ScriptedPort`] gives for the next trial
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptedAnswer {
    /// Pick the choice with this label; times out if it is not on screen.
    Choose(String),
    Slot(usize),
    Timeout,
    Quit,
}

/// Presentation port that replays canned answers, for tests and dry runs.
///
/// Every response arrives `latency` after onset. Instruction screens
/// continue unless the script's next entry is `Quit`.
#[derive(Debug, Default)]
pub struct ScriptedPort {
    script: VecDeque<ScriptedAnswer>,
    latency: Duration,
    pub shown: Vec<String>,
    pub layouts: Vec<StimulusLayout>,
    pub feedback: Vec<Feedback>,
}

impl ScriptedPort {
    pub fn new<I: IntoIterator<Item = ScriptedAnswer>>(script: I, latency: Duration) -> Self {
        Self {
            script: script.into_iter().collect(),
            latency,
            ..Self::default()
        }
    }

    pub fn remaining(&self) -> usize {
        self.script.len()
    }
}

impl PresentationPort for ScriptedPort {
    fn show_instruction(&mut self, image: &Path) -> Result<Proceed> {
        self.shown.push(format!("instruction:{}", image.display()));
        if self.script.front() == Some(&ScriptedAnswer::Quit) {
            self.script.pop_front();
            return Ok(Proceed::Quit);
        }
        Ok(Proceed::Continue)
    }

    fn present(&mut self, layout: &StimulusLayout) -> Result<Instant> {
        self.layouts.push(layout.clone());
        Ok(Instant::now())
    }

    fn await_response(
        &mut self,
        layout: &StimulusLayout,
        _timeout: Duration,
    ) -> Result<ResponseOutcome> {
        let at = Instant::now() + self.latency;
        let outcome = match self.script.pop_front() {
            Some(ScriptedAnswer::Choose(label)) => {
                match layout.choices().iter().position(|c| *c == label) {
                    Some(slot) => ResponseOutcome::Selected { slot, at },
                    None => ResponseOutcome::Timeout,
                }
            }
            Some(ScriptedAnswer::Slot(slot)) if slot < layout.choices().len() => {
                ResponseOutcome::Selected { slot, at }
            }
            Some(ScriptedAnswer::Quit) => ResponseOutcome::Quit,
            Some(ScriptedAnswer::Slot(_)) | Some(ScriptedAnswer::Timeout) | None => {
                ResponseOutcome::Timeout
            }
        };
        Ok(outcome)
    }

    fn show_selection(&mut self, layout: &StimulusLayout, slot: usize) -> Result<()> {
        self.shown
            .push(format!("selected:{}", layout.choices()[slot]));
        Ok(())
    }

    fn show_feedback(&mut self, feedback: &Feedback) -> Result<()> {
        self.feedback.push(feedback.clone());
        Ok(())
    }

    fn show_buffer(&mut self) -> Result<()> {
        self.shown.push("buffer".to_string());
        Ok(())
    }
}
