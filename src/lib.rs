//! Deterministic replay core for durable orchestrations.
//!
//! Orchestration code is written as ordinary `async` Rust against an
//! `OrchestrationContext`. Every scheduling call is correlated by sequence
//! number with an append-only history of `Event`s; a turn replays that history
//! by polling the orchestration future exactly once, resolving every task that
//! already has a recorded completion and stopping at the first task that does
//! not. New work surfaces as `Action`s for the host to carry out.
//!
//! - Public data model: `Event`, `Action`
//! - Turn drivers: `run_turn`, `run_turn_with`, and `Executor`
//! - Task handles: `DurableFuture` plus `select`/`join` composition
//! - Host-facing turn processing and versioned registry: `runtime`
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

pub mod error;
pub mod futures;
pub mod ids;
pub mod logging;
pub mod runtime;

pub use error::{OrchestrationFailure, RegistryError, ResolutionError, RuntimeError};
pub use futures::{ContinueAsNew, DurableFuture, DurableOutput, JoinFuture, SelectFuture, TaskKind};
pub use logging::LogLevel;
pub use runtime::{
    OrchestrationFactory, OrchestrationHandler, OrchestrationInstance, OrchestrationRegistry,
    OrchestrationRegistryBuilder, OrchestrationStatus, Runtime, RuntimeOptions, TurnOutcome, TurnReport,
};

use crate::codec::Codec;
use crate::futures::{AggregateDurableFuture, Kind};
use crate::ids::DeterministicIdGenerator;
use serde::{Deserialize, Serialize};

// Typed payload helpers; the public API stays string-first.
pub(crate) mod codec {
    use serde::{Serialize, de::DeserializeOwned};
    use serde_json::Value;

    pub trait Codec {
        fn encode<T: Serialize>(v: &T) -> Result<String, String>;
        fn decode<T: DeserializeOwned>(s: &str) -> Result<T, String>;
    }

    pub struct Json;

    impl Codec for Json {
        fn encode<T: Serialize>(v: &T) -> Result<String, String> {
            // Bare JSON strings travel unquoted; everything else keeps its field order
            match serde_json::to_value(v) {
                Ok(Value::String(s)) => Ok(s),
                Ok(_) => serde_json::to_string(v).map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            }
        }

        fn decode<T: DeserializeOwned>(s: &str) -> Result<T, String> {
            match serde_json::from_str::<T>(s) {
                Ok(v) => Ok(v),
                Err(_) => serde_json::from_value(Value::String(s.to_string())).map_err(|e| e.to_string()),
            }
        }
    }
}

/// Append-only orchestration history entries persisted by the host and
/// consumed during replay. Scheduling events and their completions share the
/// task's sequence number as correlation id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Event {
    /// Fresh start of an execution with its input. Parent linkage is present
    /// for sub-orchestrations.
    OrchestrationStarted {
        name: String,
        version: Option<String>,
        input: String,
        parent_instance: Option<String>,
        parent_id: Option<u64>,
    },
    /// Marks the beginning of a turn; carries the host time used as virtual time.
    OrchestratorStarted { timestamp_ms: u64 },
    OrchestrationCompleted { output: String },
    OrchestrationFailed { error: String },
    /// Execution was ended by an operator cancellation request.
    OrchestrationTerminated { reason: String },

    ActivityScheduled { id: u64, name: String, input: String },
    ActivityCompleted { id: u64, result: String },
    ActivityFailed { id: u64, error: String },

    TimerCreated { id: u64, fire_at_ms: u64 },
    TimerFired { id: u64, fire_at_ms: u64 },

    ExternalSubscribed { id: u64, name: String },
    ExternalEvent { id: u64, name: String, data: String },

    /// Fire-and-forget orchestration start (no result routed back).
    OrchestrationChained {
        id: u64,
        name: String,
        instance: String,
        input: String,
    },

    SubOrchestrationScheduled {
        id: u64,
        name: String,
        version: Option<String>,
        instance: String,
        input: String,
    },
    SubOrchestrationCompleted { id: u64, result: String },
    SubOrchestrationFailed { id: u64, error: String },

    /// A patch branch was taken by this execution.
    PatchApplied { name: String },

    /// Execution ended by continuing as new (terminal for this execution).
    OrchestrationContinuedAsNew { input: String },
    OrchestrationCancelRequested { reason: String },
    ExecutionSuspended { reason: String },
    ExecutionResumed,
}

impl Event {
    /// `(id, kind, name)` when this event records the scheduling of a task.
    pub fn scheduled_task(&self) -> Option<(u64, TaskKind, &str)> {
        match self {
            Event::ActivityScheduled { id, name, .. } => Some((*id, TaskKind::Activity, name.as_str())),
            Event::TimerCreated { id, .. } => Some((*id, TaskKind::Timer, "")),
            Event::ExternalSubscribed { id, name } => Some((*id, TaskKind::External, name.as_str())),
            Event::SubOrchestrationScheduled { id, name, .. } => {
                Some((*id, TaskKind::SubOrchestration, name.as_str()))
            }
            Event::OrchestrationChained { id, name, .. } => Some((*id, TaskKind::Detached, name.as_str())),
            _ => None,
        }
    }

    /// `(id, kind)` when this event resolves a task.
    pub fn completed_task(&self) -> Option<(u64, TaskKind)> {
        match self {
            Event::ActivityCompleted { id, .. } | Event::ActivityFailed { id, .. } => Some((*id, TaskKind::Activity)),
            Event::TimerFired { id, .. } => Some((*id, TaskKind::Timer)),
            Event::ExternalEvent { id, .. } => Some((*id, TaskKind::External)),
            Event::SubOrchestrationCompleted { id, .. } | Event::SubOrchestrationFailed { id, .. } => {
                Some((*id, TaskKind::SubOrchestration))
            }
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Event::OrchestrationCompleted { .. }
                | Event::OrchestrationFailed { .. }
                | Event::OrchestrationTerminated { .. }
                | Event::OrchestrationContinuedAsNew { .. }
        )
    }
}

/// Commands produced by a turn. The host materializes them (dispatching
/// activities, arming timers, starting children); the matching scheduling
/// events are already part of the turn's history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    CallActivity { id: u64, name: String, input: String },
    CreateTimer { id: u64, fire_at_ms: u64 },
    WaitExternal { id: u64, name: String },
    StartOrchestrationDetached {
        id: u64,
        name: String,
        version: Option<String>,
        instance: String,
        input: String,
    },
    /// Optional version selects the child's orchestration version.
    StartSubOrchestration {
        id: u64,
        name: String,
        version: Option<String>,
        instance: String,
        input: String,
    },
    /// Terminal for the current execution.
    ContinueAsNew { input: String, version: Option<String> },
}

#[derive(Debug)]
struct CtxInner {
    history: Vec<Event>,
    actions: Vec<Action>,

    instance_id: String,
    turn_index: u64,

    next_sequence: u64,
    recorded_schedules: BTreeSet<u64>,
    claimed: BTreeSet<u64>,

    // Highest history index the code has observed; drives virtual time and replay detection
    cursor: usize,
    turn_marker: Option<usize>,

    patches: HashMap<String, bool>,
    ids: DeterministicIdGenerator,

    nondeterminism: Option<String>,
    continued_as_new: Option<(String, Option<String>)>,

    log_buffer: Vec<(LogLevel, String)>,
}

impl CtxInner {
    fn new(history: Vec<Event>, instance_id: String, turn_index: u64) -> Self {
        let recorded_schedules = history
            .iter()
            .filter_map(|e| e.scheduled_task().map(|(id, _, _)| id))
            .collect();
        let first_marker = history
            .iter()
            .position(|e| matches!(e, Event::OrchestratorStarted { .. }));
        let turn_marker = history
            .iter()
            .rposition(|e| matches!(e, Event::OrchestratorStarted { .. }));
        let ids = DeterministicIdGenerator::new(&instance_id);
        Self {
            history,
            actions: Vec::new(),
            instance_id,
            turn_index,
            next_sequence: 1,
            recorded_schedules,
            claimed: BTreeSet::new(),
            cursor: first_marker.unwrap_or(0),
            turn_marker,
            patches: HashMap::new(),
            ids,
            nondeterminism: None,
            continued_as_new: None,
            log_buffer: Vec::new(),
        }
    }

    fn halted(&self) -> bool {
        self.nondeterminism.is_some() || self.continued_as_new.is_some()
    }

    fn observe(&mut self, idx: usize) {
        self.cursor = self.cursor.max(idx);
    }

    fn is_replaying(&self) -> bool {
        match self.turn_marker {
            Some(marker) => self.cursor < marker,
            None => self
                .recorded_schedules
                .last()
                .is_some_and(|max| self.next_sequence <= *max),
        }
    }

    fn now_ms(&self) -> u64 {
        self.history
            .iter()
            .take(self.cursor.saturating_add(1))
            .rev()
            .find_map(|e| match e {
                Event::OrchestratorStarted { timestamp_ms } => Some(*timestamp_ms),
                _ => None,
            })
            .unwrap_or(0)
    }

    fn started(&self) -> Option<&Event> {
        self.history
            .iter()
            .rev()
            .find(|e| matches!(e, Event::OrchestrationStarted { .. }))
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_sequence;
        self.next_sequence = self.next_sequence.saturating_add(1);
        id
    }

    fn record_nondeterminism(&mut self, msg: String) {
        if self.nondeterminism.is_none() {
            self.nondeterminism = Some(msg);
        }
    }

    /// Assign the next sequence number and either adopt the recorded
    /// scheduling event for it or record a new one plus its command.
    fn claim_or_schedule(
        &mut self,
        kind: TaskKind,
        name: &str,
        make: impl FnOnce(&Self, u64) -> (Event, Action),
    ) -> u64 {
        let id = self.next_id();
        if self.halted() {
            return id;
        }
        let recorded = self.history.iter().enumerate().find_map(|(idx, e)| {
            e.scheduled_task()
                .filter(|(rid, _, _)| *rid == id)
                .map(|(_, rkind, rname)| (idx, rkind, rname.to_string()))
        });
        match recorded {
            Some((idx, rkind, rname)) if rkind == kind && rname == name => {
                self.claimed.insert(id);
                self.observe(idx);
            }
            Some((_, rkind, rname)) => {
                self.record_nondeterminism(format!(
                    "sequence {id}: code scheduled {kind} '{name}' but history recorded {rkind} '{rname}'"
                ));
            }
            None => {
                let (event, action) = make(&*self, id);
                self.history.push(event);
                self.actions.push(action);
                self.claimed.insert(id);
                let idx = self.history.len().saturating_sub(1);
                self.observe(idx);
            }
        }
        id
    }
}

/// User-facing orchestration context for scheduling and replay-safe helpers.
#[derive(Clone)]
pub struct OrchestrationContext {
    inner: Arc<Mutex<CtxInner>>,
}

impl OrchestrationContext {
    /// Construct a new context from an existing history vector.
    pub fn new(history: Vec<Event>) -> Self {
        Self::with_metadata(history, "", 0)
    }

    /// Construct a context bound to an instance id and host turn counter.
    pub fn with_metadata(history: Vec<Event>, instance_id: impl Into<String>, turn_index: u64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(CtxInner::new(history, instance_id.into(), turn_index))),
        }
    }

    fn take_actions(&self) -> Vec<Action> {
        std::mem::take(&mut self.inner.lock().actions)
    }

    pub(crate) fn history_snapshot(&self) -> Vec<Event> {
        self.inner.lock().history.clone()
    }

    pub fn instance_id(&self) -> String {
        self.inner.lock().instance_id.clone()
    }

    /// The zero-based turn counter assigned by the host for diagnostics.
    pub fn turn_index(&self) -> u64 {
        self.inner.lock().turn_index
    }

    pub fn orchestration_name(&self) -> Option<String> {
        match self.inner.lock().started() {
            Some(Event::OrchestrationStarted { name, .. }) => Some(name.clone()),
            _ => None,
        }
    }

    pub fn orchestration_version(&self) -> Option<String> {
        match self.inner.lock().started() {
            Some(Event::OrchestrationStarted { version, .. }) => version.clone(),
            _ => None,
        }
    }

    /// Input of the current execution, taken from its `OrchestrationStarted` event.
    pub fn get_input(&self) -> String {
        match self.inner.lock().started() {
            Some(Event::OrchestrationStarted { input, .. }) => input.clone(),
            _ => String::new(),
        }
    }

    pub fn get_input_typed<T: serde::de::DeserializeOwned>(&self) -> Result<T, String> {
        codec::Json::decode(&self.get_input())
    }

    /// True while the code is re-executing steps already recorded by earlier turns.
    pub fn is_replaying(&self) -> bool {
        self.inner.lock().is_replaying()
    }

    /// Virtual time: the start timestamp of the turn that recorded the most
    /// recent history entry the code has observed. Never reads the wall clock.
    pub fn current_time_ms(&self) -> u64 {
        self.inner.lock().now_ms()
    }

    /// Deterministic UUID string, stable across replays of this instance.
    pub fn new_guid(&self) -> String {
        let mut inner = self.inner.lock();
        let now = inner.now_ms();
        inner.ids.next(now).to_string()
    }

    /// Whether the named patch branch applies to this instance.
    ///
    /// A recorded `PatchApplied` marker answers `true`. Without a marker the
    /// answer is `false` while replaying (the instance already passed this
    /// point under older code) and `true` at the live frontier, where the marker
    /// is recorded so later replays agree.
    pub fn is_patched(&self, patch_name: impl Into<String>) -> bool {
        let patch_name: String = patch_name.into();
        let mut inner = self.inner.lock();
        if let Some(v) = inner.patches.get(&patch_name) {
            return *v;
        }
        let recorded = inner
            .history
            .iter()
            .any(|e| matches!(e, Event::PatchApplied { name } if name == &patch_name));
        let applied = if recorded {
            true
        } else if inner.is_replaying() || inner.halted() {
            false
        } else {
            inner.history.push(Event::PatchApplied {
                name: patch_name.clone(),
            });
            true
        };
        inner.patches.insert(patch_name, applied);
        applied
    }

    /// Drain the buffered log messages accumulated during the turn.
    pub fn take_log_buffer(&self) -> Vec<(LogLevel, String)> {
        std::mem::take(&mut self.inner.lock().log_buffer)
    }

    /// Buffer a log message unless this statement is being replayed.
    pub fn trace(&self, level: LogLevel, message: impl Into<String>) {
        let mut inner = self.inner.lock();
        if inner.is_replaying() || inner.halted() {
            return;
        }
        inner.log_buffer.push((level, message.into()));
    }

    pub fn trace_info(&self, message: impl Into<String>) {
        self.trace(LogLevel::Info, message);
    }
    pub fn trace_warn(&self, message: impl Into<String>) {
        self.trace(LogLevel::Warn, message);
    }
    pub fn trace_error(&self, message: impl Into<String>) {
        self.trace(LogLevel::Error, message);
    }
    pub fn trace_debug(&self, message: impl Into<String>) {
        self.trace(LogLevel::Debug, message);
    }

    /// End this execution and restart the instance with `input`.
    ///
    /// The returned future never resolves: `return ctx.continue_as_new(x).await;`
    /// stops the orchestration at that statement. Anything scheduled after the
    /// call is discarded.
    pub fn continue_as_new<T>(&self, input: impl Into<String>) -> ContinueAsNew<T> {
        self.record_continue_as_new(input.into(), None);
        ContinueAsNew::new()
    }

    /// Continue as new onto a specific orchestration version.
    pub fn continue_as_new_versioned<T>(
        &self,
        version: impl Into<String>,
        input: impl Into<String>,
    ) -> ContinueAsNew<T> {
        self.record_continue_as_new(input.into(), Some(version.into()));
        ContinueAsNew::new()
    }

    pub fn continue_as_new_typed<In: Serialize, T>(&self, input: &In) -> Result<ContinueAsNew<T>, String> {
        let payload = codec::Json::encode(input)?;
        Ok(self.continue_as_new(payload))
    }

    fn record_continue_as_new(&self, input: String, version: Option<String>) {
        let mut inner = self.inner.lock();
        if inner.halted() {
            return;
        }
        inner.actions.push(Action::ContinueAsNew {
            input: input.clone(),
            version: version.clone(),
        });
        inner.continued_as_new = Some((input, version));
    }

    pub(crate) fn continue_as_new_requested(&self) -> Option<(String, Option<String>)> {
        self.inner.lock().continued_as_new.clone()
    }

    pub(crate) fn nondeterminism(&self) -> Option<String> {
        self.inner.lock().nondeterminism.clone()
    }

    pub(crate) fn claimed_ids_snapshot(&self) -> ClaimedIdsSnapshot {
        let inner = self.inner.lock();
        ClaimedIdsSnapshot {
            claimed: inner.claimed.clone(),
            recorded: inner.recorded_schedules.clone(),
        }
    }
}

impl OrchestrationContext {
    /// Schedule an activity and return a `DurableFuture` correlated to it.
    pub fn schedule_activity(&self, name: impl Into<String>, input: impl Into<String>) -> DurableFuture {
        let name: String = name.into();
        let input: String = input.into();
        let id = self.inner.lock().claim_or_schedule(TaskKind::Activity, &name, |_, id| {
            (
                Event::ActivityScheduled {
                    id,
                    name: name.clone(),
                    input: input.clone(),
                },
                Action::CallActivity {
                    id,
                    name: name.clone(),
                    input: input.clone(),
                },
            )
        });
        DurableFuture(Kind::Activity {
            id,
            name,
            ctx: self.clone(),
        })
    }

    /// Typed helper that serializes input; decode the output with `into_activity_typed`.
    pub fn schedule_activity_typed<In: Serialize>(
        &self,
        name: impl Into<String>,
        input: &In,
    ) -> Result<DurableFuture, String> {
        let payload = codec::Json::encode(input)?;
        Ok(self.schedule_activity(name, payload))
    }

    /// Create a timer firing at an absolute virtual time.
    pub fn create_timer(&self, fire_at_ms: u64) -> DurableFuture {
        let id = self.inner.lock().claim_or_schedule(TaskKind::Timer, "", |_, id| {
            (
                Event::TimerCreated { id, fire_at_ms },
                Action::CreateTimer { id, fire_at_ms },
            )
        });
        DurableFuture(Kind::Timer {
            id,
            ctx: self.clone(),
        })
    }

    /// Create a timer firing `delay_ms` after the current virtual time.
    pub fn schedule_timer(&self, delay_ms: u64) -> DurableFuture {
        let fire_at_ms = self.current_time_ms().saturating_add(delay_ms);
        self.create_timer(fire_at_ms)
    }

    /// Subscribe to an external event by name and return its `DurableFuture`.
    pub fn schedule_wait(&self, name: impl Into<String>) -> DurableFuture {
        let name: String = name.into();
        let id = self.inner.lock().claim_or_schedule(TaskKind::External, &name, |_, id| {
            (
                Event::ExternalSubscribed { id, name: name.clone() },
                Action::WaitExternal { id, name: name.clone() },
            )
        });
        DurableFuture(Kind::External {
            id,
            name,
            ctx: self.clone(),
        })
    }

    /// Wait for an external event, racing it against a timer. Resolves to
    /// `None` if the timer fires first.
    pub fn schedule_wait_with_timeout(
        &self,
        name: &str,
        timeout_ms: u64,
    ) -> impl Future<Output = Option<String>> + Send + use<> {
        let wait = self.schedule_wait(name);
        let timer = self.schedule_timer(timeout_ms);
        let race = self.select2(wait, timer);
        async move {
            match race.await {
                (0, DurableOutput::External(data)) => Some(data),
                _ => None,
            }
        }
    }

    /// Schedule a sub-orchestration; the registry's latest version runs it.
    pub fn schedule_sub_orchestration(&self, name: impl Into<String>, input: impl Into<String>) -> DurableFuture {
        self.schedule_sub_orchestration_versioned(name, None, input)
    }

    pub fn schedule_sub_orchestration_typed<In: Serialize>(
        &self,
        name: impl Into<String>,
        input: &In,
    ) -> Result<DurableFuture, String> {
        let payload = codec::Json::encode(input)?;
        Ok(self.schedule_sub_orchestration(name, payload))
    }

    /// Schedule a sub-orchestration pinned to `version`. The child instance id
    /// is derived from the parent instance and the sequence number.
    pub fn schedule_sub_orchestration_versioned(
        &self,
        name: impl Into<String>,
        version: Option<String>,
        input: impl Into<String>,
    ) -> DurableFuture {
        let name: String = name.into();
        let input: String = input.into();
        let mut inner = self.inner.lock();
        let id = inner.claim_or_schedule(TaskKind::SubOrchestration, &name, |this, id| {
            let instance = child_instance_id(&this.instance_id, id);
            (
                Event::SubOrchestrationScheduled {
                    id,
                    name: name.clone(),
                    version: version.clone(),
                    instance: instance.clone(),
                    input: input.clone(),
                },
                Action::StartSubOrchestration {
                    id,
                    name: name.clone(),
                    version: version.clone(),
                    instance,
                    input: input.clone(),
                },
            )
        });
        let instance = inner
            .history
            .iter()
            .find_map(|e| match e {
                Event::SubOrchestrationScheduled { id: rid, instance, .. } if *rid == id => Some(instance.clone()),
                _ => None,
            })
            .unwrap_or_else(|| child_instance_id(&inner.instance_id, id));
        drop(inner);
        DurableFuture(Kind::SubOrch {
            id,
            name,
            instance,
            ctx: self.clone(),
        })
    }

    /// Start a detached orchestration with an explicit instance id. Nothing is
    /// routed back to this instance.
    pub fn schedule_orchestration(
        &self,
        name: impl Into<String>,
        instance: impl Into<String>,
        input: impl Into<String>,
    ) {
        self.schedule_orchestration_versioned(name, None, instance, input)
    }

    pub fn schedule_orchestration_versioned(
        &self,
        name: impl Into<String>,
        version: Option<String>,
        instance: impl Into<String>,
        input: impl Into<String>,
    ) {
        let name: String = name.into();
        let instance: String = instance.into();
        let input: String = input.into();
        self.inner.lock().claim_or_schedule(TaskKind::Detached, &name, |_, id| {
            (
                Event::OrchestrationChained {
                    id,
                    name: name.clone(),
                    instance: instance.clone(),
                    input: input.clone(),
                },
                Action::StartOrchestrationDetached {
                    id,
                    name: name.clone(),
                    version: version.clone(),
                    instance: instance.clone(),
                    input: input.clone(),
                },
            )
        });
    }
}

fn child_instance_id(parent: &str, id: u64) -> String {
    if parent.is_empty() {
        format!("sub::{id}")
    } else {
        format!("{parent}::sub::{id}")
    }
}

impl OrchestrationContext {
    /// Deterministic select over two futures: returns (winner_index, DurableOutput).
    pub fn select2(&self, a: DurableFuture, b: DurableFuture) -> SelectFuture {
        SelectFuture(AggregateDurableFuture::new_select(self.clone(), vec![a, b]))
    }
    /// Deterministic select over N futures; the earliest completion in history wins.
    pub fn select(&self, futures: Vec<DurableFuture>) -> SelectFuture {
        SelectFuture(AggregateDurableFuture::new_select(self.clone(), futures))
    }
    /// Deterministic join over N futures; outputs come back in history order.
    pub fn join(&self, futures: Vec<DurableFuture>) -> JoinFuture {
        JoinFuture(AggregateDurableFuture::new_join(self.clone(), futures))
    }

    /// History index of the completion for `id`, if one of the right kind exists.
    /// A completion of a different kind is recorded as nondeterminism.
    pub(crate) fn completion_index(&self, id: u64, kind: TaskKind) -> Option<usize> {
        let mut inner = self.inner.lock();
        if inner.halted() {
            return None;
        }
        let found = inner
            .history
            .iter()
            .enumerate()
            .find_map(|(idx, e)| e.completed_task().filter(|(cid, _)| *cid == id).map(|(_, k)| (idx, k)));
        match found {
            Some((idx, k)) if k == kind => Some(idx),
            Some((_, k)) => {
                inner.record_nondeterminism(format!("sequence {id}: expected {kind} completion but history has {k}"));
                None
            }
            None => None,
        }
    }

    /// Resolve the output recorded at `idx` and mark it observed.
    pub(crate) fn consume_output(&self, idx: usize) -> DurableOutput {
        let mut inner = self.inner.lock();
        inner.observe(idx);
        match inner.history.get(idx) {
            Some(Event::ActivityCompleted { result, .. }) => DurableOutput::Activity(Ok(result.clone())),
            Some(Event::ActivityFailed { error, .. }) => DurableOutput::Activity(Err(error.clone())),
            Some(Event::ExternalEvent { data, .. }) => DurableOutput::External(data.clone()),
            Some(Event::SubOrchestrationCompleted { result, .. }) => {
                DurableOutput::SubOrchestration(Ok(result.clone()))
            }
            Some(Event::SubOrchestrationFailed { error, .. }) => DurableOutput::SubOrchestration(Err(error.clone())),
            _ => DurableOutput::Timer,
        }
    }
}

fn poll_once<F: Future + ?Sized>(fut: Pin<&mut F>) -> Poll<F::Output> {
    let mut cx = Context::from_waker(Waker::noop());
    fut.poll(&mut cx)
}

/// Snapshot of sequence numbers issued by the code during one turn, next to
/// the ones the incoming history had already recorded.
#[derive(Debug, Clone, Default)]
pub struct ClaimedIdsSnapshot {
    pub claimed: BTreeSet<u64>,
    pub recorded: BTreeSet<u64>,
}

/// Everything one poll of an orchestration produced.
pub(crate) struct PolledTurn<O> {
    pub history: Vec<Event>,
    pub actions: Vec<Action>,
    pub logs: Vec<(LogLevel, String)>,
    pub output: Option<O>,
    pub continue_as_new: Option<(String, Option<String>)>,
    pub nondeterminism: Option<String>,
    pub claims: ClaimedIdsSnapshot,
}

pub(crate) fn poll_turn<O, F>(ctx: OrchestrationContext, fut: F) -> PolledTurn<O>
where
    F: Future<Output = O>,
{
    let mut fut = std::pin::pin!(fut);
    let output = match poll_once(fut.as_mut()) {
        Poll::Ready(out) => Some(out),
        Poll::Pending => None,
    };
    PolledTurn {
        history: ctx.history_snapshot(),
        actions: ctx.take_actions(),
        logs: ctx.take_log_buffer(),
        output,
        continue_as_new: ctx.continue_as_new_requested(),
        nondeterminism: ctx.nondeterminism(),
        claims: ctx.claimed_ids_snapshot(),
    }
}

/// Tuple returned by `run_turn` and `run_turn_with`: the updated history,
/// commands to execute, per-turn logs, and the output if the code finished.
pub type TurnResult<O> = (Vec<Event>, Vec<Action>, Vec<(LogLevel, String)>, Option<O>);

/// Poll the orchestrator once against `history`.
pub fn run_turn<O, F>(history: Vec<Event>, orchestrator: impl Fn(OrchestrationContext) -> F) -> TurnResult<O>
where
    F: Future<Output = O>,
{
    run_turn_with(history, "", 0, orchestrator)
}

/// Same as `run_turn` but binds the context to an instance id and turn index.
pub fn run_turn_with<O, F>(
    history: Vec<Event>,
    instance_id: &str,
    turn_index: u64,
    orchestrator: impl Fn(OrchestrationContext) -> F,
) -> TurnResult<O>
where
    F: Future<Output = O>,
{
    let ctx = OrchestrationContext::with_metadata(history, instance_id, turn_index);
    let fut = orchestrator(ctx.clone());
    let turn = poll_turn(ctx, fut);
    (turn.history, turn.actions, turn.logs, turn.output)
}

/// Helper for single-threaded, host-driven execution in tests and samples.
pub struct Executor;

impl Executor {
    /// Drives an orchestrator by alternately replaying one turn and invoking
    /// `execute_actions` to materialize requested actions into history, until
    /// the orchestrator completes.
    pub fn drive_to_completion<O, F, X>(
        mut history: Vec<Event>,
        orchestrator: impl Fn(OrchestrationContext) -> F,
        mut execute_actions: X,
    ) -> (Vec<Event>, O)
    where
        F: Future<Output = O>,
        X: FnMut(Vec<Action>, &mut Vec<Event>),
    {
        loop {
            let (hist_after_replay, actions, _logs, output) = run_turn(history, &orchestrator);
            history = hist_after_replay;
            if let Some(out) = output {
                return (history, out);
            }
            execute_actions(actions, &mut history);
        }
    }
}
