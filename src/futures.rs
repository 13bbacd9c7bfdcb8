//! Task handles returned by `OrchestrationContext` scheduling calls.
//!
//! A `DurableFuture` never registers a waker: it resolves from a recorded
//! completion in history or stays pending for the rest of the turn. Pending is
//! the only suspension mechanism, so orchestration code has nothing it could
//! catch or swallow.

use crate::OrchestrationContext;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Shape of a scheduled unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Activity,
    Timer,
    External,
    SubOrchestration,
    Detached,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskKind::Activity => "activity",
            TaskKind::Timer => "timer",
            TaskKind::External => "external event",
            TaskKind::SubOrchestration => "sub-orchestration",
            TaskKind::Detached => "detached orchestration",
        };
        f.write_str(s)
    }
}

/// Output of a `DurableFuture` when awaited directly or through composition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DurableOutput {
    Activity(Result<String, String>),
    Timer,
    External(String),
    SubOrchestration(Result<String, String>),
}

pub(crate) enum Kind {
    Activity {
        id: u64,
        name: String,
        ctx: OrchestrationContext,
    },
    Timer {
        id: u64,
        ctx: OrchestrationContext,
    },
    External {
        id: u64,
        name: String,
        ctx: OrchestrationContext,
    },
    SubOrch {
        id: u64,
        name: String,
        instance: String,
        ctx: OrchestrationContext,
    },
}

/// A unified future for activities, timers, external events, and
/// sub-orchestrations, carrying the task's sequence number.
pub struct DurableFuture(pub(crate) Kind);

impl DurableFuture {
    /// Sequence number assigned when the task was scheduled.
    pub fn sequence(&self) -> u64 {
        match &self.0 {
            Kind::Activity { id, .. } | Kind::Timer { id, .. } | Kind::External { id, .. } | Kind::SubOrch { id, .. } => {
                *id
            }
        }
    }

    pub fn kind(&self) -> TaskKind {
        match &self.0 {
            Kind::Activity { .. } => TaskKind::Activity,
            Kind::Timer { .. } => TaskKind::Timer,
            Kind::External { .. } => TaskKind::External,
            Kind::SubOrch { .. } => TaskKind::SubOrchestration,
        }
    }

    /// Activity, event, or orchestration name; empty for timers.
    pub fn name(&self) -> &str {
        match &self.0 {
            Kind::Activity { name, .. } | Kind::External { name, .. } | Kind::SubOrch { name, .. } => name,
            Kind::Timer { .. } => "",
        }
    }

    /// Child instance id for sub-orchestrations.
    pub fn child_instance(&self) -> Option<&str> {
        match &self.0 {
            Kind::SubOrch { instance, .. } => Some(instance),
            _ => None,
        }
    }

    fn ctx(&self) -> &OrchestrationContext {
        match &self.0 {
            Kind::Activity { ctx, .. } | Kind::Timer { ctx, .. } | Kind::External { ctx, .. } | Kind::SubOrch { ctx, .. } => {
                ctx
            }
        }
    }

    /// Whether history already holds this task's completion.
    pub fn is_completed(&self) -> bool {
        self.ctx().completion_index(self.sequence(), self.kind()).is_some()
    }

    fn completion_index(&self) -> Option<usize> {
        self.ctx().completion_index(self.sequence(), self.kind())
    }
}

impl fmt::Debug for DurableFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DurableFuture")
            .field("sequence", &self.sequence())
            .field("kind", &self.kind())
            .field("name", &self.name())
            .finish()
    }
}

impl Future for DurableFuture {
    type Output = DurableOutput;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.completion_index() {
            Some(idx) => Poll::Ready(self.ctx().consume_output(idx)),
            None => Poll::Pending,
        }
    }
}

impl DurableFuture {
    /// Await an activity result as a raw String.
    pub fn into_activity(self) -> impl Future<Output = Result<String, String>> + Send {
        async move {
            match self.await {
                DurableOutput::Activity(v) => v,
                other => Err(format!("into_activity used on non-activity future: {other:?}")),
            }
        }
    }

    /// Await an activity result decoded to a typed value.
    pub fn into_activity_typed<Out: serde::de::DeserializeOwned>(self) -> impl Future<Output = Result<Out, String>> + Send {
        use crate::codec::Codec;
        let raw = self.into_activity();
        async move {
            let s = raw.await?;
            crate::codec::Json::decode::<Out>(&s)
        }
    }

    /// Resolves when the corresponding timer fires.
    pub fn into_timer(self) -> impl Future<Output = ()> + Send {
        async move {
            match self.await {
                DurableOutput::Timer => {}
                other => panic!("into_timer used on non-timer future: {other:?}"),
            }
        }
    }

    /// Resolves with the payload of the correlated external event.
    pub fn into_event(self) -> impl Future<Output = String> + Send {
        async move {
            match self.await {
                DurableOutput::External(v) => v,
                other => panic!("into_event used on non-external future: {other:?}"),
            }
        }
    }

    /// Await an external event decoded to a typed value.
    pub async fn into_event_typed<T: serde::de::DeserializeOwned>(self) -> Result<T, String> {
        use crate::codec::Codec;
        crate::codec::Json::decode::<T>(&self.into_event().await)
    }

    /// Await a sub-orchestration result as a raw String.
    pub fn into_sub_orchestration(self) -> impl Future<Output = Result<String, String>> + Send {
        async move {
            match self.await {
                DurableOutput::SubOrchestration(v) => v,
                other => Err(format!("into_sub_orchestration used on non-sub-orchestration future: {other:?}")),
            }
        }
    }

    /// Await a sub-orchestration result decoded to a typed value.
    pub async fn into_sub_orchestration_typed<Out: serde::de::DeserializeOwned>(self) -> Result<Out, String> {
        use crate::codec::Codec;
        let s = self.into_sub_orchestration().await?;
        crate::codec::Json::decode::<Out>(&s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AggregateMode {
    Select,
    Join,
}

pub(crate) struct AggregateDurableFuture {
    ctx: OrchestrationContext,
    children: Vec<DurableFuture>,
    mode: AggregateMode,
}

impl AggregateDurableFuture {
    pub(crate) fn new_select(ctx: OrchestrationContext, children: Vec<DurableFuture>) -> Self {
        Self {
            ctx,
            children,
            mode: AggregateMode::Select,
        }
    }

    pub(crate) fn new_join(ctx: OrchestrationContext, children: Vec<DurableFuture>) -> Self {
        Self {
            ctx,
            children,
            mode: AggregateMode::Join,
        }
    }

    /// `(history_index, child_index)` for every child with a recorded completion.
    fn completed(&self) -> Vec<(usize, usize)> {
        self.children
            .iter()
            .enumerate()
            .filter_map(|(i, f)| f.completion_index().map(|idx| (idx, i)))
            .collect()
    }
}

/// Resolves with `(index, output)` of the child whose completion appears
/// first in history, so the winner is the same on every replay.
pub struct SelectFuture(pub(crate) AggregateDurableFuture);

impl Future for SelectFuture {
    type Output = (usize, DurableOutput);

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let agg = &self.0;
        debug_assert_eq!(agg.mode, AggregateMode::Select);
        match agg.completed().into_iter().min() {
            Some((idx, child)) => Poll::Ready((child, agg.ctx.consume_output(idx))),
            None => Poll::Pending,
        }
    }
}

/// Resolves once every child has completed; outputs are in history order.
pub struct JoinFuture(pub(crate) AggregateDurableFuture);

impl Future for JoinFuture {
    type Output = Vec<DurableOutput>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let agg = &self.0;
        debug_assert_eq!(agg.mode, AggregateMode::Join);
        let mut done = agg.completed();
        if done.len() < agg.children.len() {
            return Poll::Pending;
        }
        done.sort_unstable();
        Poll::Ready(done.into_iter().map(|(idx, _)| agg.ctx.consume_output(idx)).collect())
    }
}

/// Returned by `OrchestrationContext::continue_as_new`; never resolves.
#[must_use = "await it so the orchestration stops at the continue-as-new call"]
pub struct ContinueAsNew<T>(PhantomData<fn() -> T>);

impl<T> ContinueAsNew<T> {
    pub(crate) fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Future for ContinueAsNew<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<T> {
        Poll::Pending
    }
}
