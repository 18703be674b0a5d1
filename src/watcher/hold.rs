use crate::scheduler::{HoldReason, JobState, StatusRow};

/// Text the scheduler puts in `LastRejMatchReason` when no slot fits.
pub const NO_MATCH_MARKER: &str = "no match found";

/// What a sub-job's status row calls for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubJobCondition {
    Healthy,
    /// Container image could not be used. Fatal.
    InvalidImage(String),
    /// Duration or execute-time limit hit. Release, counted as a resubmission.
    ExecutionTimeExceeded(String),
    /// Memory request exceeded. Raise the request, then release.
    MemoryExceeded(String),
    /// Idle with no matching machine. Hold for a human.
    NoMatch(String),
    UnhandledHold { code: i32, reason: String },
}

pub fn classify(row: &StatusRow) -> SubJobCondition {
    let reason = row.hold_reason.clone().unwrap_or_default();
    match row.hold_reason() {
        Some(HoldReason::InvalidImage) => return SubJobCondition::InvalidImage(reason),
        Some(HoldReason::JobDurationExceeded | HoldReason::ExecuteTimeExceeded) => {
            return SubJobCondition::ExecutionTimeExceeded(reason)
        }
        Some(HoldReason::MemoryExceeded) => return SubJobCondition::MemoryExceeded(reason),
        Some(HoldReason::Other(code)) => return SubJobCondition::UnhandledHold { code, reason },
        None => {}
    }

    if row.state() == JobState::Idle {
        if let Some(rejection) = &row.last_rej_match_reason {
            if rejection.to_ascii_lowercase().contains(NO_MATCH_MARKER) {
                return SubJobCondition::NoMatch(rejection.clone());
            }
        }
    }
    SubJobCondition::Healthy
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hold_codes() {
        assert_eq!(
            classify(&StatusRow::held(3, 35, "image not found")),
            SubJobCondition::InvalidImage("image not found".to_string())
        );
        assert!(matches!(
            classify(&StatusRow::held(3, 46, "MaxJobDuration")),
            SubJobCondition::ExecutionTimeExceeded(_)
        ));
        assert!(matches!(
            classify(&StatusRow::held(3, 47, "execute")),
            SubJobCondition::ExecutionTimeExceeded(_)
        ));
        assert!(matches!(
            classify(&StatusRow::held(3, 34, "memory usage exceeded")),
            SubJobCondition::MemoryExceeded(_)
        ));
        assert_eq!(
            classify(&StatusRow::held(3, 12, "transfer failed")),
            SubJobCondition::UnhandledHold {
                code: 12,
                reason: "transfer failed".to_string()
            }
        );
    }

    #[test]
    fn idle_without_match() {
        let mut row = StatusRow::new(3, JobState::Idle);
        row.last_rej_match_reason = Some("No match found".to_string());
        assert!(matches!(classify(&row), SubJobCondition::NoMatch(_)));
    }

    #[test]
    fn running_and_plain_idle_are_healthy() {
        assert_eq!(
            classify(&StatusRow::new(3, JobState::Running)),
            SubJobCondition::Healthy
        );
        assert_eq!(
            classify(&StatusRow::new(3, JobState::Idle)),
            SubJobCondition::Healthy
        );
    }
}
