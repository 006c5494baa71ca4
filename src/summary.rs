use std::fmt;
use std::path::Path;

use csv::{ReaderBuilder, StringRecord};

use crate::error::{Result, SessionError};
use crate::scoring::{NA, NO_ANSWER};

/// Scored trials of one phase
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseSummary {
    pub phase: String,
    pub trials: usize,
    pub answered: usize,
    pub correct: usize,
    reaction_times: Vec<f64>,
}

impl PhaseSummary {
    fn new(phase: &str) -> Self {
        Self {
            phase: phase.to_string(),
            trials: 0,
            answered: 0,
            correct: 0,
            reaction_times: Vec::new(),
        }
    }

    /// Fraction of trials scored correct, unanswered trials included.
    pub fn accuracy(&self) -> Option<f64> {
        match self.trials {
            0 => None,
            n => Some(self.correct as f64 / n as f64),
        }
    }

    /// Mean reaction time over answered trials.
    pub fn mean_rt(&self) -> Option<f64> {
        mean(&self.reaction_times)
    }

    pub fn std_dev_rt(&self) -> Option<f64> {
        std_dev(&self.reaction_times)
    }
}

/// Per-phase accuracy and reaction time of a results file, in the order the
/// phases first appear.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Summary {
    pub phases: Vec<PhaseSummary>,
}

struct Columns {
    phase: usize,
    accuracy: usize,
    reaction_time: usize,
    response: usize,
}

impl Columns {
    fn locate(header: &StringRecord, source_name: &str) -> Result<Self> {
        let find = |name: &str| {
            header.iter().position(|h| h.trim() == name).ok_or_else(|| {
                SessionError::malformed(source_name, 1, format!("missing column '{name}'"))
            })
        };
        Ok(Self {
            phase: find("Phase")?,
            accuracy: find("Accuracy")?,
            reaction_time: find("Reaction Time")?,
            response: find("Selected Artist")?,
        })
    }
}

impl Summary {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut rdr = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(path)?;
        let source_name = path.display().to_string();
        let columns = Columns::locate(rdr.headers()?, &source_name)?;

        let mut summary = Self::default();
        for record in rdr.records() {
            let record = record?;
            let line = record.position().map(|p| p.line()).unwrap_or_default();
            let field = |i: usize| record.get(i).unwrap_or("").trim();

            let correct = match field(columns.accuracy) {
                NA | "" => continue,
                "1" => true,
                "0" => false,
                other => {
                    return Err(SessionError::malformed(
                        &source_name,
                        line,
                        format!("accuracy must be 0, 1 or NA, found '{other}'"),
                    ))
                }
            };

            let phase = summary.phase_mut(field(columns.phase));
            phase.trials += 1;
            if correct {
                phase.correct += 1;
            }
            if field(columns.response) != NO_ANSWER {
                phase.answered += 1;
                if let Ok(rt) = field(columns.reaction_time).parse::<f64>() {
                    phase.reaction_times.push(rt);
                }
            }
        }
        Ok(summary)
    }

    fn phase_mut(&mut self, phase: &str) -> &mut PhaseSummary {
        let index = match self.phases.iter().position(|p| p.phase == phase) {
            Some(index) => index,
            None => {
                self.phases.push(PhaseSummary::new(phase));
                self.phases.len() - 1
            }
        };
        &mut self.phases[index]
    }

    pub fn get(&self, phase: &str) -> Option<&PhaseSummary> {
        self.phases.iter().find(|p| p.phase == phase)
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
}

/// Population standard deviation.
fn std_dev(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    Some(variance.sqrt())
}

fn or_dash(value: Option<f64>, decimals: usize) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{v:.decimals$}"))
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:<12} {:>6} {:>8} {:>7} {:>8} {:>8} {:>8}",
            "phase", "trials", "answered", "correct", "accuracy", "mean rt", "sd rt"
        )?;
        for p in &self.phases {
            writeln!(
                f,
                "{:<12} {:>6} {:>8} {:>7} {:>8} {:>8} {:>8}",
                p.phase,
                p.trials,
                p.answered,
                p.correct,
                or_dash(p.accuracy(), 3),
                or_dash(p.mean_rt(), 3),
                or_dash(p.std_dev_rt(), 3),
            )?;
        }
        Ok(())
    }
}
