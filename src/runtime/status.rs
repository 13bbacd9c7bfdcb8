use super::OrchestrationStatus;
use crate::Event;

/// Derive an instance's status from its history alone.
pub fn status_from_history(history: &[Event]) -> OrchestrationStatus {
    for e in history.iter().rev() {
        match e {
            Event::OrchestrationCompleted { output } => {
                return OrchestrationStatus::Completed { output: output.clone() };
            }
            Event::OrchestrationFailed { error } => {
                return OrchestrationStatus::Failed { error: error.clone() };
            }
            Event::OrchestrationTerminated { reason } => {
                return OrchestrationStatus::Terminated { reason: reason.clone() };
            }
            Event::OrchestrationContinuedAsNew { input } => {
                return OrchestrationStatus::ContinuedAsNew { input: input.clone() };
            }
            _ => {}
        }
    }
    if is_paused(history) {
        OrchestrationStatus::Suspended
    } else {
        OrchestrationStatus::Running
    }
}

/// True when the most recent pause/resume marker is a pause.
pub fn is_paused(history: &[Event]) -> bool {
    history
        .iter()
        .rev()
        .find_map(|e| match e {
            Event::ExecutionSuspended { .. } => Some(true),
            Event::ExecutionResumed => Some(false),
            _ => None,
        })
        .unwrap_or(false)
}
