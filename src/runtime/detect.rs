//! Checks that catch orchestration code drifting away from its recorded history.

use crate::{ClaimedIdsSnapshot, Event, TaskKind};

/// Recorded scheduling ids that the code never re-issued during the turn.
pub fn unclaimed_schedules(claims: &ClaimedIdsSnapshot) -> Vec<u64> {
    claims.recorded.difference(&claims.claimed).copied().collect()
}

pub(crate) fn describe_unclaimed(history: &[Event], ids: &[u64]) -> String {
    let names: Vec<String> = ids
        .iter()
        .map(|id| match scheduled_kind(history, *id) {
            Some((kind, name)) if name.is_empty() => format!("{id} ({kind})"),
            Some((kind, name)) => format!("{id} ({kind} '{name}')"),
            None => id.to_string(),
        })
        .collect();
    format!(
        "history recorded scheduling of {} that the code no longer issues",
        names.join(", ")
    )
}

/// Kind and name of the scheduling event recorded for `id`.
pub fn scheduled_kind(history: &[Event], id: u64) -> Option<(TaskKind, String)> {
    history.iter().find_map(|e| {
        e.scheduled_task()
            .filter(|(sid, _, _)| *sid == id)
            .map(|(_, kind, name)| (kind, name.to_string()))
    })
}

/// A completion whose kind disagrees with what was scheduled under its id, or an external
/// event whose name is not the one subscribed to.
pub fn completion_kind_mismatch(history: &[Event], completion: &Event) -> Option<String> {
    let (id, kind) = completion.completed_task()?;
    let (scheduled, name) = scheduled_kind(history, id)?;
    if scheduled != kind {
        return Some(format!(
            "sequence {id}: {kind} completion delivered for scheduled {scheduled} '{name}'"
        ));
    }
    match completion {
        Event::ExternalEvent { name: raised, .. } if *raised != name => Some(format!(
            "sequence {id}: external event '{raised}' delivered to subscription '{name}'"
        )),
        _ => None,
    }
}
