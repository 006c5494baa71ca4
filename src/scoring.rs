use std::fmt;

/// Response recorded when the subject lets a trial time out.
pub const NO_ANSWER: &str = "No answer";

/// Placeholder for outcome columns of rows that collect no response.
pub const NA: &str = "NA";

const RT_DECIMALS: i32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accuracy {
    Correct,
    Incorrect,
    NotApplicable,
}

impl fmt::Display for Accuracy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Correct => write!(f, "1"),
            Self::Incorrect => write!(f, "0"),
            Self::NotApplicable => write!(f, "{NA}"),
        }
    }
}

/// Reaction time in seconds, already rounded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReactionTime {
    Seconds(f64),
    NotApplicable,
}

impl fmt::Display for ReactionTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Seconds(secs) => write!(f, "{secs}"),
            Self::NotApplicable => write!(f, "{NA}"),
        }
    }
}

/// Exact string comparison. "No answer" gets no special treatment.
pub fn score(response: &str, correct: &str) -> Accuracy {
    if response == correct {
        Accuracy::Correct
    } else {
        Accuracy::Incorrect
    }
}

/// Seconds between stimulus onset and response, both read from the session clock.
/// A response time of exactly zero means "no response" and yields zero.
pub fn reaction_time(response_at: f64, onset: f64) -> ReactionTime {
    if response_at == 0.0 {
        ReactionTime::Seconds(0.0)
    } else {
        ReactionTime::Seconds(round_to(response_at - onset, RT_DECIMALS))
    }
}

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
