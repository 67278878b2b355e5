//! Ordered, individually reported cleanup steps.
//!
//! A failed step never stops the steps after it; the caller gets the full
//! list of outcomes and decides how to present them.
use std::fmt::{self, Display};

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Done,
    Skipped(String),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeardownStep {
    pub name: String,
    pub outcome: StepOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    steps: Vec<TeardownStep>,
}

impl TeardownReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs one step and records its outcome. Errors are recorded, not returned.
    pub fn step<F>(&mut self, name: &str, f: F)
    where
        F: FnOnce() -> Result<StepOutcome>,
    {
        let outcome = match f() {
            Ok(outcome) => outcome,
            Err(err) => {
                log::warn!("teardown step {:?} failed: {}", name, err);
                StepOutcome::Failed(err.to_string())
            }
        };
        log::debug!("teardown step {:?}: {:?}", name, outcome);
        self.steps.push(TeardownStep {
            name: name.to_owned(),
            outcome,
        });
    }

    pub fn extend(&mut self, other: TeardownReport) {
        self.steps.extend(other.steps);
    }

    pub fn steps(&self) -> &[TeardownStep] {
        &self.steps
    }

    pub fn failures(&self) -> impl Iterator<Item = &TeardownStep> {
        self.steps
            .iter()
            .filter(|s| matches!(s.outcome, StepOutcome::Failed(_)))
    }

    pub fn is_clean(&self) -> bool {
        self.failures().next().is_none()
    }
}

impl Display for TeardownReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for step in &self.steps {
            match &step.outcome {
                StepOutcome::Done => writeln!(f, "  {:<24}ok", step.name)?,
                StepOutcome::Skipped(why) => writeln!(f, "  {:<24}skipped ({})", step.name, why)?,
                StepOutcome::Failed(why) => writeln!(f, "  {:<24}FAILED: {}", step.name, why)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SshboxError;

    #[test]
    fn test_failed_step_does_not_stop_later_steps() {
        let mut report = TeardownReport::new();
        let mut ran_last = false;
        report.step("first", || Ok(StepOutcome::Done));
        report.step("second", || {
            Err(SshboxError::Runtime {
                command: "umount".to_string(),
                stderr: "target is busy".to_string(),
            })
        });
        report.step("third", || {
            ran_last = true;
            Ok(StepOutcome::Skipped("nothing to do".to_string()))
        });

        assert!(ran_last);
        assert_eq!(report.steps().len(), 3);
        assert!(!report.is_clean());
        let failed: Vec<_> = report.failures().map(|s| s.name.as_str()).collect();
        assert_eq!(failed, vec!["second"]);

        let summary = report.to_string();
        assert!(summary.contains("FAILED"));
        assert!(summary.contains("target is busy"));
    }
}
