use crate::error::{OrchestrationFailure, RuntimeError};
use crate::{Action, Event, LogLevel, OrchestrationContext};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub mod completions;
pub mod detect;
pub mod registry;
pub mod replay;
pub mod status;
pub mod worker;

pub use registry::{OrchestrationFactory, OrchestrationRegistry, OrchestrationRegistryBuilder};
pub use replay::{DefaultReplayEngine, ReplayEngine, ReplayResult};
pub use worker::{TurnRequest, TurnResponse, Worker};

/// Lifecycle state of an orchestration instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrchestrationStatus {
    Running,
    Completed { output: String },
    Failed { error: String },
    /// The previous execution continued as new; the next turn starts fresh.
    ContinuedAsNew { input: String },
    /// Paused by an operator; events are recorded but code does not run.
    Suspended,
    Terminated { reason: String },
}

impl OrchestrationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrchestrationStatus::Completed { .. }
                | OrchestrationStatus::Failed { .. }
                | OrchestrationStatus::Terminated { .. }
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            OrchestrationStatus::Running => "Running",
            OrchestrationStatus::Completed { .. } => "Completed",
            OrchestrationStatus::Failed { .. } => "Failed",
            OrchestrationStatus::ContinuedAsNew { .. } => "ContinuedAsNew",
            OrchestrationStatus::Suspended => "Suspended",
            OrchestrationStatus::Terminated { .. } => "Terminated",
        }
    }
}

/// Trait implemented by orchestration handlers that can be invoked by the runtime.
#[async_trait]
pub trait OrchestrationHandler: Send + Sync {
    async fn invoke(&self, ctx: OrchestrationContext, input: String) -> Result<String, String>;
}

/// Function wrapper that implements `OrchestrationHandler`.
pub struct FnOrchestration<F, Fut>(pub F)
where
    F: Fn(OrchestrationContext, String) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<String, String>> + Send + 'static;

#[async_trait]
impl<F, Fut> OrchestrationHandler for FnOrchestration<F, Fut>
where
    F: Fn(OrchestrationContext, String) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<String, String>> + Send + 'static,
{
    async fn invoke(&self, ctx: OrchestrationContext, input: String) -> Result<String, String> {
        (self.0)(ctx, input).await
    }
}

/// Parent linkage of a sub-orchestration instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentLink {
    pub instance: String,
    pub id: u64,
}

/// Host-owned state of one orchestration instance. The runtime mutates it in
/// place on every turn; the host persists `history` (or the per-turn deltas in
/// `TurnReport::new_events`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestrationInstance {
    pub instance_id: String,
    pub name: String,
    /// Version pinned when the execution started; `None` for unversioned registrations.
    pub version: Option<String>,
    pub input: String,
    pub status: OrchestrationStatus,
    /// Starts at 1 and increments on every continue-as-new.
    pub execution_id: u64,
    pub turn_index: u64,
    pub history: Vec<Event>,
    pub parent: Option<ParentLink>,
}

impl OrchestrationInstance {
    /// Current sequence position into history.
    pub fn sequence_position(&self) -> usize {
        self.history.len()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Completion event to deliver to the parent once this child finished.
    pub fn parent_notification(&self) -> Option<(String, Event)> {
        let parent = self.parent.as_ref()?;
        let event = match &self.status {
            OrchestrationStatus::Completed { output } => Event::SubOrchestrationCompleted {
                id: parent.id,
                result: output.clone(),
            },
            OrchestrationStatus::Failed { error } => Event::SubOrchestrationFailed {
                id: parent.id,
                error: error.clone(),
            },
            OrchestrationStatus::Terminated { reason } => Event::SubOrchestrationFailed {
                id: parent.id,
                error: format!("terminated: {reason}"),
            },
            _ => return None,
        };
        Some((parent.instance.clone(), event))
    }
}

/// How a turn ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The code is waiting on a task without a recorded completion.
    Suspended,
    Completed { output: String },
    Failed { error: OrchestrationFailure },
    ContinuedAsNew { input: String, version: Option<String> },
    Terminated { reason: String },
    /// The instance is paused; the code was not run.
    Paused,
}

impl TurnOutcome {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TurnOutcome::Completed { .. } | TurnOutcome::Failed { .. } | TurnOutcome::Terminated { .. }
        )
    }
}

/// Everything the host needs after a turn: commands to dispatch, the outcome,
/// and the history entries to append to durable storage.
#[derive(Debug, Clone)]
pub struct TurnReport {
    pub instance_id: String,
    pub execution_id: u64,
    pub turn_index: u64,
    pub actions: Vec<Action>,
    pub outcome: TurnOutcome,
    pub new_events: Vec<Event>,
    pub logs: Vec<(LogLevel, String)>,
}

fn default_max_concurrent_turns() -> usize {
    8
}

fn default_history_warn_threshold() -> usize {
    10_000
}

/// Runtime tuning knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeOptions {
    /// Upper bound on turns a `Worker` runs at once.
    #[serde(default = "default_max_concurrent_turns")]
    pub max_concurrent_turns: usize,
    /// Emit orchestration `trace_*` buffers through `tracing` after each turn.
    pub flush_orchestration_logs: bool,
    /// History length above which a turn logs a continue-as-new hint.
    #[serde(default = "default_history_warn_threshold")]
    pub history_warn_threshold: usize,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            max_concurrent_turns: default_max_concurrent_turns(),
            flush_orchestration_logs: true,
            history_warn_threshold: default_history_warn_threshold(),
        }
    }
}

impl RuntimeOptions {
    pub fn from_json_str(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

/// Turn processor: takes an instance plus newly delivered events, replays the
/// orchestration once, and reports commands and outcome. Holds no per-instance
/// state, so one `Runtime` serves any number of instances concurrently.
pub struct Runtime {
    registry: OrchestrationRegistry,
    engine: Arc<dyn ReplayEngine>,
    options: RuntimeOptions,
}

impl Runtime {
    pub fn new(registry: OrchestrationRegistry, options: RuntimeOptions) -> Self {
        Self::with_engine(registry, options, Arc::new(DefaultReplayEngine::new()))
    }

    pub fn with_engine(registry: OrchestrationRegistry, options: RuntimeOptions, engine: Arc<dyn ReplayEngine>) -> Self {
        Self {
            registry,
            engine,
            options,
        }
    }

    pub fn registry(&self) -> &OrchestrationRegistry {
        &self.registry
    }

    pub fn options(&self) -> &RuntimeOptions {
        &self.options
    }

    /// Create a new instance, pinning the version the registry resolves now.
    pub fn start_instance(
        &self,
        instance_id: impl Into<String>,
        name: impl Into<String>,
        version: Option<&str>,
        input: impl Into<String>,
    ) -> Result<OrchestrationInstance, RuntimeError> {
        self.start_instance_with_parent(instance_id, name, version, input, None)
    }

    pub fn start_instance_with_parent(
        &self,
        instance_id: impl Into<String>,
        name: impl Into<String>,
        version: Option<&str>,
        input: impl Into<String>,
        parent: Option<ParentLink>,
    ) -> Result<OrchestrationInstance, RuntimeError> {
        let instance_id = instance_id.into();
        let name = name.into();
        let version = self.registry.resolve_version(&name, version)?;
        debug!(instance = %instance_id, name = %name, version = ?version, "instance created");
        Ok(OrchestrationInstance {
            instance_id,
            name,
            version,
            input: input.into(),
            status: OrchestrationStatus::Running,
            execution_id: 1,
            turn_index: 0,
            history: Vec::new(),
            parent,
        })
    }

    /// Create the child instance requested by a `StartSubOrchestration` or
    /// `StartOrchestrationDetached` action of `parent`.
    pub fn start_child(&self, parent: &OrchestrationInstance, action: &Action) -> Option<Result<OrchestrationInstance, RuntimeError>> {
        match action {
            Action::StartSubOrchestration {
                id,
                name,
                version,
                instance,
                input,
            } => Some(self.start_instance_with_parent(
                instance.clone(),
                name.clone(),
                version.as_deref(),
                input.clone(),
                Some(ParentLink {
                    instance: parent.instance_id.clone(),
                    id: *id,
                }),
            )),
            Action::StartOrchestrationDetached {
                name,
                version,
                instance,
                input,
                ..
            } => Some(self.start_instance(
                instance.clone(),
                name.clone(),
                version.as_deref(),
                input.clone(),
            )),
            _ => None,
        }
    }

    /// Correlate a raised external event with the oldest open subscription.
    pub fn raise_event(&self, instance: &OrchestrationInstance, name: &str, data: impl Into<String>) -> Option<Event> {
        completions::correlate_external(&instance.history, name, data.into())
    }

    /// Run one turn of `instance`.
    ///
    /// `new_events` are completions (and control events such as cancellation)
    /// delivered since the previous turn; `now_ms` becomes the turn's virtual time.
    pub fn execute_turn(
        &self,
        instance: &mut OrchestrationInstance,
        new_events: Vec<Event>,
        now_ms: u64,
    ) -> Result<TurnReport, RuntimeError> {
        if instance.is_terminal() {
            return Err(RuntimeError::InstanceTerminal {
                instance: instance.instance_id.clone(),
                status: instance.status.label().to_string(),
            });
        }
        let turn_index = instance.turn_index;
        let execution_id = instance.execution_id;
        let baseline = instance.history.len();
        let mut history = std::mem::take(&mut instance.history);
        if history.is_empty() {
            history.push(Event::OrchestrationStarted {
                name: instance.name.clone(),
                version: instance.version.clone(),
                input: instance.input.clone(),
                parent_instance: instance.parent.as_ref().map(|p| p.instance.clone()),
                parent_id: instance.parent.as_ref().map(|p| p.id),
            });
        }
        history.push(Event::OrchestratorStarted { timestamp_ms: now_ms });
        let intake = completions::append_batch(&mut history, new_events);
        debug!(
            instance = %instance.instance_id,
            turn_index,
            execution_id,
            appended = intake.appended,
            duplicates = intake.duplicates,
            dropped = intake.dropped,
            "turn started"
        );

        let (history, actions, logs, outcome) = if let Some(msg) = intake.mismatch {
            (history, Vec::new(), Vec::new(), TurnOutcome::Failed {
                error: OrchestrationFailure::Nondeterminism(msg),
            })
        } else if let Some(reason) = intake.cancel {
            (history, Vec::new(), Vec::new(), TurnOutcome::Terminated { reason })
        } else if status::is_paused(&history) {
            (history, Vec::new(), Vec::new(), TurnOutcome::Paused)
        } else {
            match self.registry.resolve(&instance.name, instance.version.as_deref()) {
                Ok(handler) => {
                    let input = instance.input.clone();
                    let r = self
                        .engine
                        .replay(history, &instance.instance_id, turn_index, handler, input);
                    (r.history, r.actions, r.logs, r.outcome)
                }
                Err(e) => (history, Vec::new(), Vec::new(), TurnOutcome::Failed { error: e.into() }),
            }
        };

        if self.options.flush_orchestration_logs {
            crate::logging::flush(&instance.instance_id, turn_index, &logs);
        }
        let report = self.finish_turn(instance, history, baseline, actions, logs, outcome);
        if instance.history.len() > self.options.history_warn_threshold {
            warn!(
                instance = %instance.instance_id,
                history_len = instance.history.len(),
                "history is large; consider continue-as-new"
            );
        }
        Ok(report)
    }

    fn finish_turn(
        &self,
        instance: &mut OrchestrationInstance,
        mut history: Vec<Event>,
        baseline: usize,
        actions: Vec<Action>,
        logs: Vec<(LogLevel, String)>,
        outcome: TurnOutcome,
    ) -> TurnReport {
        let turn_index = instance.turn_index;
        let execution_id = instance.execution_id;
        match &outcome {
            TurnOutcome::Suspended => {
                instance.status = OrchestrationStatus::Running;
            }
            TurnOutcome::Paused => {
                instance.status = OrchestrationStatus::Suspended;
            }
            TurnOutcome::Completed { output } => {
                history.push(Event::OrchestrationCompleted { output: output.clone() });
                instance.status = OrchestrationStatus::Completed { output: output.clone() };
                info!(instance = %instance.instance_id, execution_id, "orchestration completed");
            }
            TurnOutcome::Failed { error: failure } => {
                history.push(Event::OrchestrationFailed {
                    error: failure.to_string(),
                });
                instance.status = OrchestrationStatus::Failed {
                    error: failure.to_string(),
                };
                if failure.is_nondeterminism() {
                    error!(instance = %instance.instance_id, execution_id, error = %failure, "replay diverged from history");
                } else {
                    warn!(instance = %instance.instance_id, execution_id, error = %failure, "orchestration failed");
                }
            }
            TurnOutcome::Terminated { reason } => {
                history.push(Event::OrchestrationTerminated { reason: reason.clone() });
                instance.status = OrchestrationStatus::Terminated { reason: reason.clone() };
                info!(instance = %instance.instance_id, execution_id, reason = %reason, "orchestration terminated");
            }
            TurnOutcome::ContinuedAsNew { input, .. } => {
                history.push(Event::OrchestrationContinuedAsNew { input: input.clone() });
            }
        }

        let new_events = history.get(baseline..).map(<[Event]>::to_vec).unwrap_or_default();
        instance.history = history;
        instance.turn_index = instance.turn_index.saturating_add(1);

        if let TurnOutcome::ContinuedAsNew { input, version } = &outcome {
            self.reset_for_new_execution(instance, input.clone(), version.as_deref());
        }

        TurnReport {
            instance_id: instance.instance_id.clone(),
            execution_id,
            turn_index,
            actions,
            outcome,
            new_events,
            logs,
        }
    }

    /// Same identity, fresh history and sequence numbers, re-resolved version.
    fn reset_for_new_execution(&self, instance: &mut OrchestrationInstance, input: String, version: Option<&str>) {
        let next_version = match self.registry.resolve_version(&instance.name, version) {
            Ok(v) => v,
            Err(e) => {
                warn!(instance = %instance.instance_id, error = %e, "continue-as-new target does not resolve");
                version.map(str::to_string)
            }
        };
        instance.history.clear();
        instance.execution_id = instance.execution_id.saturating_add(1);
        instance.turn_index = 0;
        instance.version = next_version;
        instance.input = input.clone();
        instance.status = OrchestrationStatus::ContinuedAsNew { input };
        info!(
            instance = %instance.instance_id,
            execution_id = instance.execution_id,
            version = ?instance.version,
            "orchestration continued as new"
        );
    }
}
