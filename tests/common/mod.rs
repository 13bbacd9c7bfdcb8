#![allow(dead_code)]

use dtf_core::{Action, Event, OrchestrationInstance, Runtime, TurnOutcome, TurnReport};
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_test_writer()
        .try_init();
}

/// History as a host would hand it to the first turn of a fresh instance.
pub fn started_history(name: &str, input: &str) -> Vec<Event> {
    vec![
        Event::OrchestrationStarted {
            name: name.to_string(),
            version: None,
            input: input.to_string(),
            parent_instance: None,
            parent_id: None,
        },
        Event::OrchestratorStarted { timestamp_ms: 0 },
    ]
}

/// Run every `CallActivity` through `f` and turn the results into completions.
pub fn complete_activities(actions: &[Action], f: impl Fn(&str, &str) -> Result<String, String>) -> Vec<Event> {
    actions
        .iter()
        .filter_map(|a| match a {
            Action::CallActivity { id, name, input } => Some(match f(name, input) {
                Ok(result) => Event::ActivityCompleted { id: *id, result },
                Err(error) => Event::ActivityFailed { id: *id, error },
            }),
            _ => None,
        })
        .collect()
}

pub fn fire_timers(actions: &[Action]) -> Vec<Event> {
    actions
        .iter()
        .filter_map(|a| match a {
            Action::CreateTimer { id, fire_at_ms } => Some(Event::TimerFired {
                id: *id,
                fire_at_ms: *fire_at_ms,
            }),
            _ => None,
        })
        .collect()
}

/// Minimal host loop: dispatch activities through `activity`, fire timers as
/// soon as virtual time allows, and run turns until the execution ends or
/// nothing is left to deliver.
pub fn drive(
    runtime: &Runtime,
    instance: &mut OrchestrationInstance,
    start_ms: u64,
    activity: impl Fn(&str, &str) -> Result<String, String>,
) -> Vec<TurnReport> {
    let mut reports = Vec::new();
    let mut now = start_ms;
    let mut events = Vec::new();
    for _ in 0..100 {
        let report = runtime.execute_turn(instance, events, now).expect("turn runs");
        let done = matches!(
            report.outcome,
            TurnOutcome::Completed { .. }
                | TurnOutcome::Failed { .. }
                | TurnOutcome::Terminated { .. }
                | TurnOutcome::ContinuedAsNew { .. }
        );
        events = complete_activities(&report.actions, &activity);
        let timers = fire_timers(&report.actions);
        for t in &timers {
            if let Event::TimerFired { fire_at_ms, .. } = t {
                now = now.max(*fire_at_ms);
            }
        }
        events.extend(timers);
        now += 1;
        reports.push(report);
        if done || events.is_empty() {
            break;
        }
    }
    reports
}
