use std::collections::HashSet;

use tracing::{debug, warn};

use super::detect;
use crate::Event;

/// What happened to one delivered event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Appended,
    /// A completion for this id is already recorded.
    Duplicate,
    /// No matching schedule, or not an event a host may deliver.
    Dropped,
    /// Completion kind disagrees with the scheduled kind, or an external event name with its
    /// subscription.
    Mismatch(String),
}

/// Summary of a batch of delivered events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Intake {
    pub appended: usize,
    pub duplicates: usize,
    pub dropped: usize,
    /// Reason of the first cancellation request in the batch.
    pub cancel: Option<String>,
    /// First completion kind mismatch in the batch.
    pub mismatch: Option<String>,
}

/// Append one host-delivered event to `history` if it belongs there.
pub fn append_completion(history: &mut Vec<Event>, event: Event) -> Delivery {
    match &event {
        Event::OrchestrationCancelRequested { .. } | Event::ExecutionSuspended { .. } | Event::ExecutionResumed => {
            history.push(event);
            return Delivery::Appended;
        }
        _ => {}
    }
    let Some((id, _)) = event.completed_task() else {
        warn!(event = ?event, "ignoring event that is not a completion");
        return Delivery::Dropped;
    };
    if detect::scheduled_kind(history, id).is_none() {
        warn!(id, "ignoring completion with no matching schedule");
        return Delivery::Dropped;
    }
    if let Some(msg) = detect::completion_kind_mismatch(history, &event) {
        return Delivery::Mismatch(msg);
    }
    if history
        .iter()
        .any(|e| e.completed_task().is_some_and(|(cid, _)| cid == id))
    {
        debug!(id, "duplicate completion ignored");
        return Delivery::Duplicate;
    }
    history.push(event);
    Delivery::Appended
}

/// Append a batch of delivered events in order.
pub fn append_batch(history: &mut Vec<Event>, events: Vec<Event>) -> Intake {
    let mut intake = Intake::default();
    for event in events {
        let cancel = match &event {
            Event::OrchestrationCancelRequested { reason } => Some(reason.clone()),
            _ => None,
        };
        match append_completion(history, event) {
            Delivery::Appended => {
                intake.appended += 1;
                if intake.cancel.is_none() {
                    intake.cancel = cancel;
                }
            }
            Delivery::Duplicate => intake.duplicates += 1,
            Delivery::Dropped => intake.dropped += 1,
            Delivery::Mismatch(msg) => {
                if intake.mismatch.is_none() {
                    intake.mismatch = Some(msg);
                }
            }
        }
    }
    intake
}

/// Build the `ExternalEvent` for a raised event named `name`, bound to the
/// oldest subscription that has not received one yet.
pub fn correlate_external(history: &[Event], name: &str, data: String) -> Option<Event> {
    let delivered: HashSet<u64> = history
        .iter()
        .filter_map(|e| match e {
            Event::ExternalEvent { id, .. } => Some(*id),
            _ => None,
        })
        .collect();
    let id = history.iter().find_map(|e| match e {
        Event::ExternalSubscribed { id, name: n } if n == name && !delivered.contains(id) => Some(*id),
        _ => None,
    });
    match id {
        Some(id) => Some(Event::ExternalEvent {
            id,
            name: name.to_string(),
            data,
        }),
        None => {
            debug!(name, "no open subscription for raised event");
            None
        }
    }
}
