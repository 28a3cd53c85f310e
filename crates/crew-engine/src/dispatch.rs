//! Action dispatch: one [`ActionResult`] per request, in request order.
//!
//! Requests are grouped into lanes. Requests sharing a resource key run one
//! after another in a single lane, keyless `Sequential` tools share one lane,
//! and every other request gets a lane of its own. Lanes run concurrently.
//! [`PathLocks`] additionally serializes same-key calls across dispatchers,
//! so two sub-agents editing one file never interleave.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use futures::future::join_all;
use futures::FutureExt;
use tokio::sync::{broadcast, Mutex, OwnedMutexGuard};
use tracing::{debug, error, instrument, trace, warn};

use crew_core::events::AgentEvent;
use crew_core::messages::{ActionPayload, ActionRequest, ActionResult};
use crew_core::tools::{ErrorKind, ExecutionMode, Tool, ToolArgs, ToolContext, ToolOutput};

use crate::registry::ToolRegistry;
use crate::truncate::truncate_payload;

#[derive(Clone, Debug)]
pub struct DispatchConfig {
    /// Per-action limit. `None` lets actions run until they finish.
    pub action_timeout: Option<Duration>,
    /// When false every request runs in one lane, in order.
    pub parallel: bool,
    /// Bound on textual payloads entering history. `None` keeps them whole.
    pub max_output_chars: Option<usize>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            action_timeout: None,
            parallel: true,
            max_output_chars: Some(50_000),
        }
    }
}

/// Exclusive locks keyed by resource (usually a resolved path). An entry
/// lives only while some caller holds or waits on it.
#[derive(Default)]
pub struct PathLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, key: &str) -> PathGuard<'_> {
        let lock = Arc::clone(self.locks.entry(key.to_string()).or_default().value());
        PathGuard {
            owner: self,
            key: key.to_string(),
            guard: Some(lock.lock_owned().await),
        }
    }
}

/// Held lock from [`PathLocks::acquire`]. Dropping it releases the lock and
/// evicts the entry when nobody else references it.
pub struct PathGuard<'a> {
    owner: &'a PathLocks,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for PathGuard<'_> {
    fn drop(&mut self) {
        // The guard holds a clone of the Arc; release it before counting.
        drop(self.guard.take());
        self.owner
            .locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

pub(crate) fn emit(tx: &broadcast::Sender<AgentEvent>, event: AgentEvent) {
    if tx.send(event).is_err() {
        trace!("no event receivers, event dropped");
    }
}

enum Prepared {
    Ready {
        tool: Arc<dyn Tool>,
        args: ToolArgs,
        key: Option<String>,
    },
    Rejected(ErrorKind, String),
}

#[derive(Hash, PartialEq, Eq)]
enum LaneKey {
    Resource(String),
    Sequential,
    Own(usize),
}

pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    config: DispatchConfig,
    locks: Arc<PathLocks>,
    events: broadcast::Sender<AgentEvent>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<ToolRegistry>,
        config: DispatchConfig,
        locks: Arc<PathLocks>,
        events: broadcast::Sender<AgentEvent>,
    ) -> Self {
        Self {
            registry,
            config,
            locks,
            events,
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Execute every request. Never fails: lookup, validation, execution,
    /// panic and timeout failures all come back as failed results.
    #[instrument(skip_all, fields(agent = %ctx.agent, actions = requests.len()))]
    pub async fn dispatch(&self, requests: &[ActionRequest], ctx: &ToolContext) -> Vec<ActionResult> {
        let prepared: Vec<Prepared> = requests.iter().map(|r| self.prepare(r, ctx)).collect();
        let lanes = self.plan_lanes(&prepared);
        debug!(lanes = lanes.len(), "dispatching");

        let prepared = &prepared;
        let lane_runs = lanes.into_iter().map(|indices| async move {
            let mut done = Vec::with_capacity(indices.len());
            for i in indices {
                done.push((i, self.run_one(&requests[i], &prepared[i], ctx).await));
            }
            done
        });

        let mut slots: Vec<Option<ActionResult>> = (0..requests.len()).map(|_| None).collect();
        for lane in join_all(lane_runs).await {
            for (i, result) in lane {
                slots[i] = Some(result);
            }
        }

        slots
            .into_iter()
            .zip(requests)
            .map(|(slot, request)| {
                slot.unwrap_or_else(|| {
                    ActionResult::failure(request, ErrorKind::Execution, "action was not executed".into())
                })
            })
            .collect()
    }

    fn prepare(&self, request: &ActionRequest, ctx: &ToolContext) -> Prepared {
        let Some(tool) = self.registry.get(&request.name) else {
            return Prepared::Rejected(
                ErrorKind::UnknownAction,
                format!("unknown action '{}'", request.name),
            );
        };
        let Some(descriptor) = self.registry.descriptor(&request.name) else {
            return Prepared::Rejected(
                ErrorKind::UnknownAction,
                format!("unknown action '{}'", request.name),
            );
        };
        match descriptor.validate(&request.arguments) {
            Ok(args) => {
                let key = tool.resource_key(&args, ctx);
                Prepared::Ready { tool, args, key }
            }
            Err(e) => Prepared::Rejected(e.kind(), e.to_string()),
        }
    }

    fn produces_artifact(&self, action: &str) -> bool {
        self.registry
            .descriptor(action)
            .is_some_and(|d| d.produces.is_some())
    }

    fn plan_lanes(&self, prepared: &[Prepared]) -> Vec<Vec<usize>> {
        if !self.config.parallel {
            return vec![(0..prepared.len()).collect()];
        }
        let mut lanes: Vec<Vec<usize>> = Vec::new();
        let mut by_key: HashMap<LaneKey, usize> = HashMap::new();
        for (i, p) in prepared.iter().enumerate() {
            let key = match p {
                Prepared::Ready { key: Some(k), .. } => LaneKey::Resource(k.clone()),
                Prepared::Ready { tool, .. } if tool.execution_mode() == ExecutionMode::Sequential => {
                    LaneKey::Sequential
                }
                _ => LaneKey::Own(i),
            };
            let lane = *by_key.entry(key).or_insert_with(|| {
                lanes.push(Vec::new());
                lanes.len() - 1
            });
            lanes[lane].push(i);
        }
        lanes
    }

    async fn run_one(&self, request: &ActionRequest, prepared: &Prepared, ctx: &ToolContext) -> ActionResult {
        emit(
            &self.events,
            AgentEvent::ActionStart {
                run_id: ctx.run_id.clone(),
                agent: ctx.agent.clone(),
                request_id: request.id.clone(),
                action: request.name.clone(),
            },
        );

        let start = Instant::now();
        let mut result = match prepared {
            Prepared::Rejected(kind, message) => {
                ActionResult::failure(request, *kind, ActionPayload::Text(message.clone()))
            }
            Prepared::Ready { tool, args, key } => {
                let _guard = match key {
                    Some(k) => Some(self.locks.acquire(k).await),
                    None => None,
                };
                self.execute(request, tool.as_ref(), args.clone(), ctx).await
            }
        };
        result.duration_ms = start.elapsed().as_millis() as u64;
        if let Some(limit) = self.config.max_output_chars {
            // Artifact payloads become slot contents and stay whole.
            if !self.produces_artifact(&request.name) {
                result.payload = truncate_payload(result.payload, limit);
            }
        }

        debug!(
            action = %request.name,
            request_id = %request.id,
            duration_ms = result.duration_ms,
            success = result.success,
            error_kind = ?result.error_kind,
            "action finished"
        );

        emit(
            &self.events,
            AgentEvent::ActionEnd {
                run_id: ctx.run_id.clone(),
                agent: ctx.agent.clone(),
                request_id: request.id.clone(),
                action: request.name.clone(),
                success: result.success,
                error_kind: result.error_kind,
                duration_ms: result.duration_ms,
            },
        );
        result
    }

    async fn execute(
        &self,
        request: &ActionRequest,
        tool: &dyn Tool,
        args: ToolArgs,
        ctx: &ToolContext,
    ) -> ActionResult {
        let run = AssertUnwindSafe(tool.execute(args, ctx)).catch_unwind();
        let outcome = match self.config.action_timeout {
            Some(limit) => match tokio::time::timeout(limit, run).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(action = %request.name, timeout = ?limit, "action timed out");
                    return ActionResult::failure(
                        request,
                        ErrorKind::Timeout,
                        format!("action timed out after {limit:?}").into(),
                    );
                }
            },
            None => run.await,
        };

        match outcome {
            Ok(Ok(ToolOutput { payload, failure: None })) => ActionResult::success(request, payload),
            Ok(Ok(ToolOutput { payload, failure: Some(kind) })) => ActionResult::failure(request, kind, payload),
            Ok(Err(e)) => ActionResult::failure(request, e.kind(), ActionPayload::Text(e.to_string())),
            Err(panic) => {
                error!(
                    action = %request.name,
                    panic = %panic_message(&panic),
                    "tool panicked during execution"
                );
                ActionResult::failure(request, ErrorKind::Execution, "tool crashed".into())
            }
        }
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    panic
        .downcast_ref::<String>()
        .map(|s| s.as_str())
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic")
        .to_string()
}
