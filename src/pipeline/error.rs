use std::fmt;

use thiserror::Error;

/// The two concurrent stages of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Fetch,
    Transcode,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Fetch => write!(f, "fetch"),
            Phase::Transcode => write!(f, "transcode"),
        }
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("no words in input")]
    EmptyInput,

    #[error("invalid option: {0}")]
    InvalidOption(String),

    #[error("no clips found{}", format_missing(.missing))]
    PlanEmpty { missing: Vec<String> },

    #[error("{phase} phase failed for {failed}/{eligible} segments: {details}")]
    FailureRateExceeded {
        phase: Phase,
        failed: usize,
        eligible: usize,
        details: String,
    },

    #[error("{phase} phase timed out after completing {completed}/{total} segments")]
    PhaseTimeout {
        phase: Phase,
        completed: usize,
        total: usize,
    },

    #[error("concatenation failed: {0}")]
    ConcatFailed(String),

    #[error("operation cancelled")]
    Cancelled,
}

fn format_missing(missing: &[String]) -> String {
    if missing.is_empty() {
        String::new()
    } else {
        format!(" (missing words: {})", missing.join(", "))
    }
}
