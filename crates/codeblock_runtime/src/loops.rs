//! Loop Manager
//!
//! Repeating control blocks run their children once per scheduled tick, never
//! by sleeping. Each loop is bounded by an iteration cap, a wall-clock ceiling
//! and a per-owner concurrency limit.
//!
//! ```text
//! Idle -> Scheduled -> Running(n) -> Completed | Cancelled | TimedOut | Error -> Removed
//! ```
//!
//! Every terminal transition removes the loop from tracking, cancels its
//! scheduler task and records it in a bounded history. A tick that finds its
//! loop untracked does nothing.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use codeblock_types::{ActorId, BlockId, ContextId};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::EngineLimits;
use crate::context::ExecutionContext;
use crate::error::{ScriptError, ScriptResult};
use crate::executor::ChildOutcome;
use crate::scheduler::{TaskControl, TaskId};

const HISTORY_LIMIT: usize = 64;

/// Identifier of an active loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LoopId(pub u64);

impl fmt::Display for LoopId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "loop#{}", self.0)
    }
}

/// Lifecycle of a loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Idle,
    Scheduled,
    Running { iteration: u32 },
    Completed,
    Cancelled,
    TimedOut,
    Error,
    /// No longer tracked
    Removed,
}

impl LoopState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LoopState::Completed
                | LoopState::Cancelled
                | LoopState::TimedOut
                | LoopState::Error
                | LoopState::Removed
        )
    }
}

/// Who a loop counts against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LoopOwner {
    Actor(ActorId),
    Server,
}

impl fmt::Display for LoopOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopOwner::Actor(id) => write!(f, "actor {}", id),
            LoopOwner::Server => write!(f, "server"),
        }
    }
}

/// Requested loop shape before clamping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopRequest {
    /// `-1` runs until the iteration cap
    pub iterations: i64,
    pub delay_ticks: i64,
}

impl LoopRequest {
    pub fn new(iterations: i64, delay_ticks: i64) -> Self {
        Self {
            iterations,
            delay_ticks,
        }
    }

    /// Run until the iteration cap
    pub fn unbounded(delay_ticks: i64) -> Self {
        Self::new(-1, delay_ticks)
    }
}

/// A tracked loop
#[derive(Debug, Clone)]
pub struct ActiveLoop {
    pub id: LoopId,
    pub task: Option<TaskId>,
    pub owner: LoopOwner,
    /// Context of the control block that started the loop
    pub context: ExecutionContext,
    pub iterations: u32,
    pub max_iterations: u32,
    pub delay_ticks: u64,
    pub started: Instant,
    pub started_at: DateTime<Utc>,
    pub state: LoopState,
    pub last_results: Vec<ChildOutcome>,
}

impl ActiveLoop {
    pub fn context_id(&self) -> ContextId {
        self.context.id()
    }

    pub fn block(&self) -> BlockId {
        self.context.block_id()
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// A finished loop, kept in history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopRecord {
    pub id: LoopId,
    pub owner: LoopOwner,
    pub graph_id: String,
    pub block: BlockId,
    pub iterations: u32,
    pub state: LoopState,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Loop Manager
// ─────────────────────────────────────────────────────────────────────────────

/// Tracks and drives every active loop
pub struct LoopManager {
    limits: EngineLimits,
    active: DashMap<LoopId, ActiveLoop>,
    history: Mutex<VecDeque<LoopRecord>>,
    next_id: AtomicU64,
}

impl LoopManager {
    pub fn new(limits: EngineLimits) -> Self {
        Self {
            limits,
            active: DashMap::new(),
            history: Mutex::new(VecDeque::with_capacity(HISTORY_LIMIT)),
            next_id: AtomicU64::new(1),
        }
    }

    /// Start repeating the children of the context's current block
    pub fn start(&self, ctx: &ExecutionContext, request: LoopRequest) -> ScriptResult<LoopId> {
        let owner = match ctx.actor() {
            Some(actor) => LoopOwner::Actor(actor),
            None => LoopOwner::Server,
        };
        let limit = self.limits.max_loops_per_actor;
        if self.count_for_owner(owner) >= limit {
            return Err(ScriptError::ConcurrencyLimit {
                owner: owner.to_string(),
                limit,
            });
        }

        let cap = self.limits.max_loop_iterations.max(1);
        let max_iterations = if request.iterations == -1 {
            cap
        } else {
            request.iterations.clamp(1, i64::from(cap)) as u32
        };
        let min_delay = self.limits.min_loop_delay_ticks.max(1);
        let max_delay = self.limits.max_loop_delay_ticks.max(min_delay);
        let delay_ticks = request
            .delay_ticks
            .clamp(min_delay as i64, max_delay as i64) as u64;

        let id = LoopId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.active.insert(
            id,
            ActiveLoop {
                id,
                task: None,
                owner,
                context: ctx.clone(),
                iterations: 0,
                max_iterations,
                delay_ticks,
                started: Instant::now(),
                started_at: Utc::now(),
                state: LoopState::Idle,
                last_results: Vec::new(),
            },
        );

        let engine = Arc::downgrade(ctx.engine());
        let task = ctx.engine().scheduler().schedule_repeating(
            delay_ticks,
            delay_ticks,
            Box::new(move || match engine.upgrade() {
                Some(engine) => engine.loops().tick_loop(id),
                None => TaskControl::Stop,
            }),
        );

        match self.active.get_mut(&id) {
            Some(mut active) => {
                active.task = Some(task);
                active.state = LoopState::Scheduled;
            }
            // Cancelled between insert and scheduling
            None => {
                ctx.engine().scheduler().cancel(task);
            }
        }

        info!(
            loop_id = %id,
            owner = %owner,
            block_id = %ctx.block_id(),
            max_iterations,
            delay_ticks,
            "Loop started"
        );
        Ok(id)
    }

    /// Advance one loop by one iteration; called by its scheduler task
    pub fn tick_loop(&self, id: LoopId) -> TaskControl {
        let (ctx, owner, iterations, max_iterations, elapsed) = match self.active.get(&id) {
            Some(active) => (
                active.context.clone(),
                active.owner,
                active.iterations,
                active.max_iterations,
                active.elapsed(),
            ),
            None => return TaskControl::Stop,
        };

        if let LoopOwner::Actor(actor) = owner {
            if !ctx.host().is_online(actor) {
                debug!(loop_id = %id, actor = %actor, "Owner went offline");
                self.finish(id, LoopState::Cancelled);
                return TaskControl::Stop;
            }
        }

        if iterations >= max_iterations {
            self.finish(id, LoopState::Completed);
            return TaskControl::Stop;
        }

        let ceiling = self.limits.max_loop_duration();
        if elapsed > ceiling {
            let err = ScriptError::Timeout {
                loop_id: id.0,
                elapsed,
            };
            warn!(loop_id = %id, elapsed = ?elapsed, "Loop timed out");
            ctx.host().notify_error(ctx.actor(), &err.to_string());
            self.finish(id, LoopState::TimedOut);
            return TaskControl::Stop;
        }

        if ctx.current_block().is_none() {
            warn!(loop_id = %id, block_id = %ctx.block_id(), "Loop block no longer exists");
            self.finish(id, LoopState::Error);
            return TaskControl::Stop;
        }

        let iteration = iterations + 1;
        match self.active.get_mut(&id) {
            Some(mut active) => {
                active.iterations = iteration;
                active.state = LoopState::Running { iteration };
            }
            None => return TaskControl::Stop,
        }

        let results = ctx.execute_children();

        // A child may have cancelled this loop
        match self.active.get_mut(&id) {
            Some(mut active) => active.last_results = results,
            None => return TaskControl::Stop,
        }

        if iteration >= max_iterations {
            self.finish(id, LoopState::Completed);
            return TaskControl::Stop;
        }
        TaskControl::Continue
    }

    /// Cancel one loop. Returns false if it was not active.
    pub fn cancel(&self, id: LoopId) -> bool {
        self.finish(id, LoopState::Cancelled).is_some()
    }

    /// Cancel every loop of an owner
    pub fn cancel_owner(&self, owner: LoopOwner) -> usize {
        self.cancel_matching(|l| l.owner == owner)
    }

    /// Cancel every loop started from a graph
    pub fn cancel_graph(&self, graph_id: &str) -> usize {
        self.cancel_matching(|l| l.context.graph().id == graph_id)
    }

    /// Emergency stop
    pub fn cancel_all(&self) -> usize {
        let count = self.cancel_matching(|_| true);
        if count > 0 {
            info!(count, "Cancelled all loops");
        }
        count
    }

    fn cancel_matching(&self, pred: impl Fn(&ActiveLoop) -> bool) -> usize {
        let ids: Vec<LoopId> = self
            .active
            .iter()
            .filter(|entry| pred(entry.value()))
            .map(|entry| *entry.key())
            .collect();
        ids.into_iter().filter(|id| self.cancel(*id)).count()
    }

    /// Remove a loop and record how it ended
    fn finish(&self, id: LoopId, state: LoopState) -> Option<LoopRecord> {
        let (_, active) = self.active.remove(&id)?;
        let engine = active.context.engine();

        if let Some(task) = active.task {
            engine.scheduler().cancel(task);
        }

        let record = LoopRecord {
            id,
            owner: active.owner,
            graph_id: active.context.graph().id.clone(),
            block: active.block(),
            iterations: active.iterations,
            state,
            started_at: active.started_at,
            finished_at: Utc::now(),
        };

        {
            let mut history = self.history.lock();
            if history.len() == HISTORY_LIMIT {
                history.pop_front();
            }
            history.push_back(record.clone());
        }

        info!(loop_id = %id, state = ?state, iterations = active.iterations, "Loop finished");
        engine.release_context(active.context_id());
        Some(record)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Introspection
    // ─────────────────────────────────────────────────────────────────────────

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn count_for_owner(&self, owner: LoopOwner) -> usize {
        self.active.iter().filter(|l| l.owner == owner).count()
    }

    pub fn count_for_context(&self, ctx: ContextId) -> usize {
        self.active.iter().filter(|l| l.context_id() == ctx).count()
    }

    pub fn snapshot(&self, id: LoopId) -> Option<ActiveLoop> {
        self.active.get(&id).map(|l| l.clone())
    }

    /// Current state; untracked loops report [`LoopState::Removed`]
    pub fn state(&self, id: LoopId) -> LoopState {
        self.active
            .get(&id)
            .map(|l| l.state)
            .unwrap_or(LoopState::Removed)
    }

    pub fn ids(&self) -> Vec<LoopId> {
        let mut ids: Vec<LoopId> = self.active.iter().map(|l| *l.key()).collect();
        ids.sort();
        ids
    }

    /// Finished loops, oldest first
    pub fn history(&self) -> Vec<LoopRecord> {
        self.history.lock().iter().cloned().collect()
    }

    /// How a finished loop ended
    pub fn record(&self, id: LoopId) -> Option<LoopRecord> {
        self.history.lock().iter().rev().find(|r| r.id == id).cloned()
    }
}
