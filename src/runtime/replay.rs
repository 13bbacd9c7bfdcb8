use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use tracing::{debug, warn};

use super::detect;
use crate::error::OrchestrationFailure;
use crate::runtime::{OrchestrationHandler, TurnOutcome};
use crate::{Action, Event, LogLevel, OrchestrationContext};

/// Everything one replayed turn produced.
#[derive(Debug, Clone)]
pub struct ReplayResult {
    pub history: Vec<Event>,
    pub actions: Vec<Action>,
    pub logs: Vec<(LogLevel, String)>,
    pub outcome: TurnOutcome,
}

pub trait ReplayEngine: Send + Sync {
    /// Replays one turn of `handler` against `history` and classifies how it ended.
    fn replay(
        &self,
        history: Vec<Event>,
        instance_id: &str,
        turn_index: u64,
        handler: Arc<dyn OrchestrationHandler>,
        input: String,
    ) -> ReplayResult;
}

pub struct DefaultReplayEngine;

impl Default for DefaultReplayEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl DefaultReplayEngine {
    pub fn new() -> Self {
        Self
    }
}

impl ReplayEngine for DefaultReplayEngine {
    fn replay(
        &self,
        history: Vec<Event>,
        instance_id: &str,
        turn_index: u64,
        handler: Arc<dyn OrchestrationHandler>,
        input: String,
    ) -> ReplayResult {
        let baseline = history.len();
        let ctx = OrchestrationContext::with_metadata(history, instance_id, turn_index);
        let polled = catch_unwind(AssertUnwindSafe(|| {
            let fut = handler.invoke(ctx.clone(), input);
            crate::poll_turn(ctx.clone(), fut)
        }));

        let turn = match polled {
            Ok(turn) => turn,
            Err(payload) => {
                let msg = panic_message(payload.as_ref());
                warn!(instance = %instance_id, turn_index, panic = %msg, "orchestration panicked");
                let mut history = ctx.history_snapshot();
                history.truncate(baseline);
                return ReplayResult {
                    history,
                    actions: Vec::new(),
                    logs: ctx.take_log_buffer(),
                    outcome: TurnOutcome::Failed {
                        error: OrchestrationFailure::Application(format!("orchestration panicked: {msg}")),
                    },
                };
            }
        };

        let divergence = turn.nondeterminism.clone().or_else(|| {
            let unclaimed = detect::unclaimed_schedules(&turn.claims);
            (!unclaimed.is_empty()).then(|| detect::describe_unclaimed(&turn.history, &unclaimed))
        });
        if let Some(msg) = divergence {
            let mut history = turn.history;
            history.truncate(baseline);
            return ReplayResult {
                history,
                actions: Vec::new(),
                logs: turn.logs,
                outcome: TurnOutcome::Failed {
                    error: OrchestrationFailure::Nondeterminism(msg),
                },
            };
        }

        let mut actions = turn.actions;
        let outcome = match (turn.continue_as_new, turn.output) {
            (Some((input, version)), _) => {
                actions.retain(|a| !matches!(a, Action::ContinueAsNew { .. }));
                TurnOutcome::ContinuedAsNew { input, version }
            }
            (None, Some(Ok(output))) => TurnOutcome::Completed { output },
            (None, Some(Err(error))) => TurnOutcome::Failed {
                error: OrchestrationFailure::Application(error),
            },
            (None, None) => TurnOutcome::Suspended,
        };
        debug!(
            instance = %instance_id,
            turn_index,
            actions = actions.len(),
            outcome = ?outcome,
            "turn replayed"
        );
        ReplayResult {
            history: turn.history,
            actions,
            logs: turn.logs,
            outcome,
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
