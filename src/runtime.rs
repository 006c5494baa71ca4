use std::sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError};
use std::thread;
use std::time::{Duration, Instant};

use crossterm::event::{
    self, Event as CtEvent, KeyCode, KeyEvent, KeyModifiers, MouseButton, MouseEvent,
    MouseEventKind,
};
use ratatui::layout::{Position, Rect};

use crate::config::InputMode;
use crate::presentation::{Proceed, ResponseOutcome};

/// Unified event type consumed by the response backends
#[derive(Clone, Debug)]
pub enum SessionEvent {
    Key(KeyEvent),
    Click { column: u16, row: u16 },
    Resize,
}

/// Source of terminal events (keyboard, mouse, resize)
pub trait EventSource: Send + 'static {
    /// Block for up to `timeout` waiting for an event.
    /// Returns Ok(event) if an event arrives before the timeout, or Err(Timeout) if it expires.
    fn recv_timeout(&self, timeout: Duration) -> Result<SessionEvent, RecvTimeoutError>;

    /// An event already queued, without waiting.
    fn try_recv(&self) -> Result<SessionEvent, TryRecvError>;
}

/// Production event source using crossterm
pub struct CrosstermEventSource {
    rx: Receiver<SessionEvent>,
}

impl CrosstermEventSource {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();

        thread::spawn(move || loop {
            let evt = match event::read() {
                Ok(CtEvent::Key(key)) => SessionEvent::Key(key),
                Ok(CtEvent::Mouse(MouseEvent {
                    kind: MouseEventKind::Down(MouseButton::Left),
                    column,
                    row,
                    ..
                })) => SessionEvent::Click { column, row },
                Ok(CtEvent::Resize(_, _)) => SessionEvent::Resize,
                Ok(_) => continue,
                Err(_) => break,
            };
            if tx.send(evt).is_err() {
                break;
            }
        });

        Self { rx }
    }
}

impl Default for CrosstermEventSource {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSource for CrosstermEventSource {
    fn recv_timeout(&self, timeout: Duration) -> Result<SessionEvent, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }

    fn try_recv(&self) -> Result<SessionEvent, TryRecvError> {
        self.rx.try_recv()
    }
}

/// Test event source for unit tests
pub struct TestEventSource {
    rx: Receiver<SessionEvent>,
    paced: bool,
}

impl TestEventSource {
    pub fn new(rx: Receiver<SessionEvent>) -> Self {
        Self { rx, paced: false }
    }

    /// Nothing ever looks pending: each queued event reaches the next wait, as
    /// if it were pressed after its screen was drawn.
    pub fn paced(rx: Receiver<SessionEvent>) -> Self {
        Self { rx, paced: true }
    }
}

impl EventSource for TestEventSource {
    fn recv_timeout(&self, timeout: Duration) -> Result<SessionEvent, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }

    fn try_recv(&self) -> Result<SessionEvent, TryRecvError> {
        if self.paced {
            return Err(TryRecvError::Empty);
        }
        self.rx.try_recv()
    }
}

/// Throw away everything queued on `events`. Returns true if a quit key was
/// among the discarded events.
fn discard_queued<E: EventSource>(events: &E) -> bool {
    let mut quit = false;
    while let Ok(event) = events.try_recv() {
        if let SessionEvent::Key(key) = event {
            quit |= is_quit(&key);
        }
    }
    quit
}

/// Configurable ticker interface
pub trait Ticker: Send + Sync + 'static {
    fn interval(&self) -> Duration;
}

/// Fixed interval ticker
#[derive(Clone, Copy, Debug)]
pub struct FixedTicker {
    interval: Duration,
}

impl FixedTicker {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl Ticker for FixedTicker {
    fn interval(&self) -> Duration {
        self.interval
    }
}

/// Refresh cadence of the pointer poll loop (one 60 Hz frame).
pub const FRAME_INTERVAL: Duration = Duration::from_micros(16_667);

/// Monotonic clock started with the session; timestamps are seconds since start.
#[derive(Clone, Copy, Debug)]
pub struct ExperimentClock {
    origin: Instant,
}

impl ExperimentClock {
    pub fn start() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    pub fn seconds_at(&self, at: Instant) -> f64 {
        at.saturating_duration_since(self.origin).as_secs_f64()
    }
}

impl Default for ExperimentClock {
    fn default() -> Self {
        Self::start()
    }
}

pub fn is_quit(key: &KeyEvent) -> bool {
    key.code == KeyCode::Esc
        || (key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c'))
}

fn hit_test(regions: &[Rect], column: u16, row: u16) -> Option<usize> {
    regions
        .iter()
        .position(|r| r.contains(Position::new(column, row)))
}

/// How a backend wait ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait<T> {
    Done(T),
    /// The terminal changed size; the caller redraws and waits again.
    Resized,
}

/// Waits for one answer (or a continue signal) from the subject.
///
/// `regions` are the on-screen answer buttons in slot order. Backends that
/// do not hit-test only use its length.
pub trait ResponseBackend {
    /// Drop input that arrived before the current screen was drawn. Returns
    /// true if it held a quit key.
    fn discard_pending(&mut self) -> bool;
    fn await_selection(&mut self, regions: &[Rect], timeout: Duration) -> Wait<ResponseOutcome>;
    fn await_continue(&mut self, next: Rect) -> Wait<Proceed>;
}

/// Pointer input: polls for clicks once per frame and hit-tests them against
/// the answer regions until the deadline.
pub struct PollingBackend<E: EventSource, T: Ticker> {
    events: E,
    ticker: T,
}

impl<E: EventSource, T: Ticker> PollingBackend<E, T> {
    pub fn new(events: E, ticker: T) -> Self {
        Self { events, ticker }
    }
}

impl<E: EventSource, T: Ticker> ResponseBackend for PollingBackend<E, T> {
    fn discard_pending(&mut self) -> bool {
        discard_queued(&self.events)
    }

    fn await_selection(&mut self, regions: &[Rect], timeout: Duration) -> Wait<ResponseOutcome> {
        let deadline = Instant::now() + timeout;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Wait::Done(ResponseOutcome::Timeout);
            }
            let wait = self.ticker.interval().min(deadline - now);

            match self.events.recv_timeout(wait) {
                Ok(SessionEvent::Click { column, row }) => {
                    if let Some(slot) = hit_test(regions, column, row) {
                        return Wait::Done(ResponseOutcome::Selected {
                            slot,
                            at: Instant::now(),
                        });
                    }
                }
                Ok(SessionEvent::Key(key)) if is_quit(&key) => {
                    return Wait::Done(ResponseOutcome::Quit)
                }
                Ok(SessionEvent::Resize) => return Wait::Resized,
                Ok(_) | Err(RecvTimeoutError::Timeout) => {}
                // Nothing more will arrive; let the clock run out.
                Err(RecvTimeoutError::Disconnected) => thread::sleep(wait),
            }
        }
    }

    fn await_continue(&mut self, next: Rect) -> Wait<Proceed> {
        loop {
            match self.events.recv_timeout(self.ticker.interval()) {
                Ok(SessionEvent::Click { column, row })
                    if hit_test(&[next], column, row).is_some() =>
                {
                    return Wait::Done(Proceed::Continue)
                }
                Ok(SessionEvent::Key(key)) if is_quit(&key) => return Wait::Done(Proceed::Quit),
                Ok(SessionEvent::Resize) => return Wait::Resized,
                Ok(_) | Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return Wait::Done(Proceed::Quit),
            }
        }
    }
}

/// Button-box input: blocks for one of an enumerated set of keys with the
/// remaining trial time as the maximum wait.
pub struct KeyWaitBackend<E: EventSource> {
    events: E,
    keys: [char; 6],
}

impl<E: EventSource> KeyWaitBackend<E> {
    pub fn new(events: E, keys: [char; 6]) -> Self {
        Self { events, keys }
    }

    fn slot_for(&self, key: &KeyEvent) -> Option<usize> {
        match key.code {
            KeyCode::Char(c) => self.keys.iter().position(|k| *k == c),
            _ => None,
        }
    }
}

impl<E: EventSource> ResponseBackend for KeyWaitBackend<E> {
    fn discard_pending(&mut self) -> bool {
        discard_queued(&self.events)
    }

    fn await_selection(&mut self, regions: &[Rect], timeout: Duration) -> Wait<ResponseOutcome> {
        let deadline = Instant::now() + timeout;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Wait::Done(ResponseOutcome::Timeout);
            }

            match self.events.recv_timeout(deadline - now) {
                Ok(SessionEvent::Key(key)) if is_quit(&key) => {
                    return Wait::Done(ResponseOutcome::Quit)
                }
                Ok(SessionEvent::Key(key)) => match self.slot_for(&key) {
                    Some(slot) if slot < regions.len() => {
                        return Wait::Done(ResponseOutcome::Selected {
                            slot,
                            at: Instant::now(),
                        })
                    }
                    _ => {}
                },
                Ok(SessionEvent::Resize) => return Wait::Resized,
                Ok(_) => {}
                Err(RecvTimeoutError::Timeout) => return Wait::Done(ResponseOutcome::Timeout),
                Err(RecvTimeoutError::Disconnected) => {
                    thread::sleep(deadline.saturating_duration_since(Instant::now()));
                    return Wait::Done(ResponseOutcome::Timeout);
                }
            }
        }
    }

    fn await_continue(&mut self, _next: Rect) -> Wait<Proceed> {
        loop {
            match self.events.recv_timeout(Duration::from_secs(3600)) {
                Ok(SessionEvent::Key(key)) if is_quit(&key) => return Wait::Done(Proceed::Quit),
                Ok(SessionEvent::Key(key)) if self.slot_for(&key).is_some() => {
                    return Wait::Done(Proceed::Continue)
                }
                Ok(SessionEvent::Resize) => return Wait::Resized,
                Ok(_) | Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return Wait::Done(Proceed::Quit),
            }
        }
    }
}

/// Pick the backend for an input mode.
pub fn response_backend<E: EventSource>(mode: InputMode, events: E) -> Box<dyn ResponseBackend> {
    match mode.response_keys() {
        Some(keys) => Box::new(KeyWaitBackend::new(events, keys)),
        None => Box::new(PollingBackend::new(events, FixedTicker::new(FRAME_INTERVAL))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn key(c: char) -> SessionEvent {
        SessionEvent::Key(KeyEvent::new(KeyCode::Char(c), KeyModifiers::NONE))
    }

    fn regions(n: u16) -> Vec<Rect> {
        (0..n).map(|i| Rect::new(i * 10, 20, 8, 3)).collect()
    }

    #[test]
    fn polling_backend_times_out_without_clicks() {
        let (_tx, rx) = mpsc::channel();
        let mut backend = PollingBackend::new(
            TestEventSource::new(rx),
            FixedTicker::new(Duration::from_millis(1)),
        );

        let started = Instant::now();
        let outcome = backend.await_selection(&regions(3), Duration::from_millis(20));
        assert_matches!(outcome, Wait::Done(ResponseOutcome::Timeout));
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn polling_backend_hit_tests_clicks() {
        let (tx, rx) = mpsc::channel();
        // a miss, then a click inside the second button
        tx.send(SessionEvent::Click { column: 9, row: 21 }).unwrap();
        tx.send(SessionEvent::Click { column: 12, row: 22 }).unwrap();
        let mut backend = PollingBackend::new(
            TestEventSource::new(rx),
            FixedTicker::new(Duration::from_millis(1)),
        );

        let outcome = backend.await_selection(&regions(3), Duration::from_secs(1));
        assert_matches!(outcome, Wait::Done(ResponseOutcome::Selected { slot: 1, .. }));
    }

    #[test]
    fn polling_backend_ignores_keys_but_honours_quit() {
        let (tx, rx) = mpsc::channel();
        tx.send(key('s')).unwrap();
        tx.send(SessionEvent::Key(KeyEvent::new(KeyCode::Esc, KeyModifiers::NONE)))
            .unwrap();
        let mut backend = PollingBackend::new(
            TestEventSource::new(rx),
            FixedTicker::new(Duration::from_millis(1)),
        );
        assert_matches!(
            backend.await_selection(&regions(3), Duration::from_secs(1)),
            Wait::Done(ResponseOutcome::Quit)
        );
    }

    #[test]
    fn polling_backend_continue_needs_click_on_next() {
        let (tx, rx) = mpsc::channel();
        tx.send(SessionEvent::Click { column: 0, row: 0 }).unwrap();
        tx.send(SessionEvent::Click { column: 71, row: 28 }).unwrap();
        let mut backend = PollingBackend::new(
            TestEventSource::new(rx),
            FixedTicker::new(Duration::from_millis(1)),
        );
        assert_eq!(
            backend.await_continue(Rect::new(70, 27, 8, 3)),
            Wait::Done(Proceed::Continue)
        );
    }

    #[test]
    fn key_backend_maps_keys_to_slots() {
        let (tx, rx) = mpsc::channel();
        tx.send(key('x')).unwrap();
        tx.send(key('1')).unwrap();
        let mut backend = KeyWaitBackend::new(
            TestEventSource::new(rx),
            InputMode::ButtonBoxA.response_keys().unwrap(),
        );
        assert_matches!(
            backend.await_selection(&regions(6), Duration::from_secs(1)),
            Wait::Done(ResponseOutcome::Selected { slot: 3, .. })
        );
    }

    #[test]
    fn key_backend_ignores_slots_without_a_choice() {
        let (tx, rx) = mpsc::channel();
        tx.send(key('l')).unwrap();
        let mut backend = KeyWaitBackend::new(
            TestEventSource::new(rx),
            InputMode::ButtonBoxB.response_keys().unwrap(),
        );
        // 'l' is slot 5 but only four answers are on screen
        assert_matches!(
            backend.await_selection(&regions(4), Duration::from_millis(20)),
            Wait::Done(ResponseOutcome::Timeout)
        );
    }

    #[test]
    fn key_backend_times_out() {
        let (_tx, rx) = mpsc::channel();
        let mut backend = KeyWaitBackend::new(
            TestEventSource::new(rx),
            InputMode::ButtonBoxB.response_keys().unwrap(),
        );
        assert_matches!(
            backend.await_selection(&regions(6), Duration::from_millis(10)),
            Wait::Done(ResponseOutcome::Timeout)
        );
    }

    #[test]
    fn key_backend_continue_on_any_mapped_key() {
        let (tx, rx) = mpsc::channel();
        tx.send(key('q')).unwrap();
        tx.send(key('k')).unwrap();
        let mut backend = KeyWaitBackend::new(
            TestEventSource::new(rx),
            InputMode::ButtonBoxB.response_keys().unwrap(),
        );
        assert_eq!(
            backend.await_continue(Rect::default()),
            Wait::Done(Proceed::Continue)
        );
    }

    #[test]
    fn continue_quits_when_source_closes() {
        let (tx, rx) = mpsc::channel::<SessionEvent>();
        drop(tx);
        let mut backend = KeyWaitBackend::new(
            TestEventSource::new(rx),
            InputMode::ButtonBoxA.response_keys().unwrap(),
        );
        assert_eq!(
            backend.await_continue(Rect::default()),
            Wait::Done(Proceed::Quit)
        );
    }

    #[test]
    fn discard_pending_drops_early_presses() {
        let (tx, rx) = mpsc::channel();
        tx.send(key('d')).unwrap();
        tx.send(key('f')).unwrap();
        let mut backend = KeyWaitBackend::new(
            TestEventSource::new(rx),
            InputMode::ButtonBoxB.response_keys().unwrap(),
        );
        assert!(!backend.discard_pending());
        assert_matches!(
            backend.await_selection(&regions(6), Duration::from_millis(20)),
            Wait::Done(ResponseOutcome::Timeout)
        );
    }

    #[test]
    fn discard_pending_reports_queued_quit() {
        let (tx, rx) = mpsc::channel();
        tx.send(SessionEvent::Click { column: 1, row: 1 }).unwrap();
        tx.send(SessionEvent::Key(KeyEvent::new(KeyCode::Esc, KeyModifiers::NONE)))
            .unwrap();
        let mut backend = PollingBackend::new(
            TestEventSource::new(rx),
            FixedTicker::new(Duration::from_millis(1)),
        );
        assert!(backend.discard_pending());
        assert!(!backend.discard_pending());
    }

    #[test]
    fn paced_source_never_reports_pending() {
        let (tx, rx) = mpsc::channel();
        tx.send(key('d')).unwrap();
        let mut backend = KeyWaitBackend::new(
            TestEventSource::paced(rx),
            InputMode::ButtonBoxB.response_keys().unwrap(),
        );
        assert!(!backend.discard_pending());
        assert_matches!(
            backend.await_selection(&regions(6), Duration::from_secs(1)),
            Wait::Done(ResponseOutcome::Selected { slot: 1, .. })
        );
    }

    #[test]
    fn resize_interrupts_waits() {
        let (tx, rx) = mpsc::channel();
        tx.send(SessionEvent::Resize).unwrap();
        tx.send(SessionEvent::Resize).unwrap();
        let mut backend = PollingBackend::new(
            TestEventSource::new(rx),
            FixedTicker::new(Duration::from_millis(1)),
        );
        assert_matches!(
            backend.await_selection(&regions(3), Duration::from_secs(1)),
            Wait::Resized
        );
        assert_eq!(backend.await_continue(Rect::default()), Wait::Resized);
    }

    #[test]
    fn ctrl_c_is_quit() {
        assert!(is_quit(&KeyEvent::new(
            KeyCode::Char('c'),
            KeyModifiers::CONTROL
        )));
        assert!(!is_quit(&KeyEvent::new(KeyCode::Char('c'), KeyModifiers::NONE)));
    }

    #[test]
    fn clock_measures_from_start() {
        let clock = ExperimentClock::start();
        let later = Instant::now() + Duration::from_millis(1500);
        assert!(clock.seconds_at(later) >= 1.5);
    }
}
