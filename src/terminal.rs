use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use log::debug;
use ratatui::{backend::Backend, Terminal};

use crate::config::{Config, InputMode};
use crate::error::Result;
use crate::presentation::{Feedback, PresentationPort, Proceed, ResponseOutcome, StimulusLayout};
use crate::runtime::{ResponseBackend, Wait};
use crate::ui::{Screen, ScreenGeometry, ScreenView};

/// How long the port holds each transient screen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortTimings {
    pub feedback: Duration,
    pub buffer: Duration,
    pub selection_echo: Duration,
}

impl PortTimings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            feedback: Duration::from_secs_f64(cfg.feedback_delay_secs),
            buffer: Duration::from_secs_f64(cfg.buffer_delay_secs),
            selection_echo: Duration::from_secs_f64(cfg.selection_echo_secs),
        }
    }

    pub fn instant() -> Self {
        Self {
            feedback: Duration::ZERO,
            buffer: Duration::ZERO,
            selection_echo: Duration::ZERO,
        }
    }
}

/// Presentation port drawing on a ratatui terminal
pub struct TerminalPort<B: Backend> {
    terminal: Terminal<B>,
    responses: Box<dyn ResponseBackend>,
    mode: InputMode,
    timings: PortTimings,
    geometry: ScreenGeometry,
    /// A quit key was pressed while the previous screen was up.
    quit_pending: bool,
}

impl<B: Backend> TerminalPort<B> {
    pub fn new(
        terminal: Terminal<B>,
        responses: Box<dyn ResponseBackend>,
        mode: InputMode,
        timings: PortTimings,
    ) -> Self {
        Self {
            terminal,
            responses,
            mode,
            timings,
            geometry: ScreenGeometry::default(),
            quit_pending: false,
        }
    }

    pub fn terminal(&self) -> &Terminal<B> {
        &self.terminal
    }

    pub fn terminal_mut(&mut self) -> &mut Terminal<B> {
        &mut self.terminal
    }

    fn draw(&mut self, screen: Screen<'_>) -> Result<()> {
        let view = ScreenView::new(screen, self.mode);
        let mut geometry = ScreenGeometry::default();
        self.terminal.draw(|f| {
            geometry = view.geometry(f.area());
            f.render_widget(&view, f.area());
        })?;
        self.geometry = geometry;
        Ok(())
    }

    /// Forget input given before the screen just drawn; only a quit survives.
    fn settle(&mut self) {
        self.quit_pending |= self.responses.discard_pending();
    }

    fn hold(duration: Duration) {
        if !duration.is_zero() {
            thread::sleep(duration);
        }
    }
}

impl<B: Backend> PresentationPort for TerminalPort<B> {
    fn show_instruction(&mut self, image: &Path) -> Result<Proceed> {
        self.draw(Screen::Instruction(image))?;
        self.settle();
        if std::mem::take(&mut self.quit_pending) {
            return Ok(Proceed::Quit);
        }
        loop {
            match self.responses.await_continue(self.geometry.next) {
                Wait::Done(proceed) => return Ok(proceed),
                Wait::Resized => {
                    debug!("terminal resized, redrawing instruction");
                    self.draw(Screen::Instruction(image))?;
                }
            }
        }
    }

    fn present(&mut self, layout: &StimulusLayout) -> Result<Instant> {
        self.draw(Screen::Trial {
            layout,
            highlight: None,
        })?;
        self.settle();
        Ok(Instant::now())
    }

    fn await_response(
        &mut self,
        layout: &StimulusLayout,
        timeout: Duration,
    ) -> Result<ResponseOutcome> {
        if std::mem::take(&mut self.quit_pending) {
            return Ok(ResponseOutcome::Quit);
        }
        let deadline = Instant::now() + timeout;
        loop {
            let regions = self.geometry.choices.clone();
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.responses.await_selection(&regions, remaining) {
                Wait::Done(outcome) => return Ok(outcome),
                Wait::Resized => {
                    debug!("terminal resized, redrawing trial");
                    self.draw(Screen::Trial {
                        layout,
                        highlight: None,
                    })?;
                }
            }
        }
    }

    /// Pointer subjects see their click land; only button-box input gets the echo.
    fn show_selection(&mut self, layout: &StimulusLayout, slot: usize) -> Result<()> {
        if self.mode == InputMode::Pointer {
            return Ok(());
        }
        self.draw(Screen::Trial {
            layout,
            highlight: Some(slot),
        })?;
        Self::hold(self.timings.selection_echo);
        Ok(())
    }

    fn show_feedback(&mut self, feedback: &Feedback) -> Result<()> {
        self.draw(Screen::Feedback(feedback))?;
        Self::hold(self.timings.feedback);
        Ok(())
    }

    fn show_buffer(&mut self) -> Result<()> {
        self.terminal.clear()?;
        self.draw(Screen::Blank)?;
        Self::hold(self.timings.buffer);
        Ok(())
    }
}
