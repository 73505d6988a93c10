//! Classification lines for the logger collaborator.

use crate::logger::LeveledLogger;
use crate::types::{FilteringOutcome, MappingOutcome, SuiteKind};
use std::fmt;
use tracing::Level;

/// Outcome of one suite kind
pub trait Outcome: fmt::Display + Copy {
    /// Suite producing this outcome
    const KIND: SuiteKind;
    /// Outcome reported for an aborted suite
    const INCONCLUSIVE: Self;

    /// Whether the suite reached a classification
    fn is_conclusive(&self) -> bool;
}

impl Outcome for MappingOutcome {
    const KIND: SuiteKind = SuiteKind::Mapping;
    const INCONCLUSIVE: Self = Self::Inconclusive;

    fn is_conclusive(&self) -> bool {
        *self != Self::Inconclusive
    }
}

impl Outcome for FilteringOutcome {
    const KIND: SuiteKind = SuiteKind::Filtering;
    const INCONCLUSIVE: Self = Self::Inconclusive;

    fn is_conclusive(&self) -> bool {
        *self != Self::Inconclusive
    }
}

/// A severity-tagged classification message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportLine {
    /// Severity
    pub level: Level,
    /// Message text
    pub message: String,
}

/// Classify `outcome` into its report line
pub fn classify<O: Outcome>(outcome: O) -> ReportLine {
    let level = if outcome.is_conclusive() {
        Level::INFO
    } else {
        Level::WARN
    };
    ReportLine {
        level,
        message: format!("NAT {} behavior: {outcome}", O::KIND),
    }
}

/// Hand `line` to `logger`
pub fn emit(logger: &dyn LeveledLogger, line: &ReportLine) {
    logger.log(line.level, format_args!("{}", line.message));
}
