use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use super::{OrchestrationInstance, Runtime, TurnReport};
use crate::Event;
use crate::error::RuntimeError;

/// One turn to run: the instance plus events delivered since its last turn.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub instance: OrchestrationInstance,
    pub new_events: Vec<Event>,
    pub now_ms: u64,
}

/// The instance after its turn (unchanged if the turn was rejected) and the result.
#[derive(Debug)]
pub struct TurnResponse {
    pub instance: OrchestrationInstance,
    pub result: Result<TurnReport, RuntimeError>,
}

/// Runs turns of distinct instances in parallel, bounded by
/// `RuntimeOptions::max_concurrent_turns`.
pub struct Worker {
    runtime: Arc<Runtime>,
    permits: Arc<Semaphore>,
}

impl Worker {
    pub fn new(runtime: Arc<Runtime>) -> Self {
        let permits = runtime.options().max_concurrent_turns.max(1);
        Self {
            runtime,
            permits: Arc::new(Semaphore::new(permits)),
        }
    }

    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    /// Run one turn per request. Responses come back in request order. A second
    /// request for an instance already in the batch is rejected with
    /// `InstanceBusy`, since an instance runs at most one turn at a time.
    pub async fn process_batch(&self, requests: Vec<TurnRequest>) -> Vec<TurnResponse> {
        let total = requests.len();
        let mut slots: Vec<Option<TurnResponse>> = (0..total).map(|_| None).collect();
        let mut fallbacks: Vec<Option<OrchestrationInstance>> = (0..total).map(|_| None).collect();
        let mut seen = HashSet::new();
        let mut set = JoinSet::new();

        for (idx, req) in requests.into_iter().enumerate() {
            let id = req.instance.instance_id.clone();
            if !seen.insert(id.clone()) {
                warn!(instance = %id, "instance already has a turn in this batch");
                slots[idx] = Some(TurnResponse {
                    instance: req.instance,
                    result: Err(RuntimeError::InstanceBusy { instance: id }),
                });
                continue;
            }
            fallbacks[idx] = Some(req.instance.clone());
            let permit = match self.permits.clone().acquire_owned().await {
                Ok(p) => p,
                Err(_) => {
                    slots[idx] = Some(TurnResponse {
                        instance: req.instance,
                        result: Err(RuntimeError::TurnAborted {
                            instance: id,
                            reason: "worker permits closed".to_string(),
                        }),
                    });
                    continue;
                }
            };
            let runtime = self.runtime.clone();
            set.spawn_blocking(move || {
                let _permit = permit;
                let TurnRequest {
                    mut instance,
                    new_events,
                    now_ms,
                } = req;
                let result = runtime.execute_turn(&mut instance, new_events, now_ms);
                (idx, TurnResponse { instance, result })
            });
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((idx, resp)) => {
                    debug!(instance = %resp.instance.instance_id, ok = resp.result.is_ok(), "turn finished");
                    slots[idx] = Some(resp);
                }
                Err(e) => error!(error = %e, "turn task aborted"),
            }
        }

        slots
            .into_iter()
            .zip(fallbacks)
            .filter_map(|(slot, fallback)| match (slot, fallback) {
                (Some(resp), _) => Some(resp),
                (None, Some(instance)) => Some(TurnResponse {
                    result: Err(RuntimeError::TurnAborted {
                        instance: instance.instance_id.clone(),
                        reason: "turn task did not finish".to_string(),
                    }),
                    instance,
                }),
                (None, None) => None,
            })
            .collect()
    }
}
