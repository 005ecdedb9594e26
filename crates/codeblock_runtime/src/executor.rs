//! Script Executor
//!
//! Walks a block chain synchronously: resolve the handler for each block,
//! run it, follow the edge it selects. Nothing here returns an error to the
//! caller; failures are logged, shown to the initiating actor and collected
//! into an [`ExecutionOutcome`].
//!
//! Authored graphs can contain cycles. Every block executed while a chain is
//! active holds one unit of the recursion budget for its actor (or the
//! server), and child chains stack on top of their parent, so a cycle stops
//! after `max_recursion_depth` blocks instead of spinning forever.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};

use codeblock_types::{ActorId, BlockId, CodeBlock};
use dashmap::DashMap;
use tracing::{debug, error, warn};

use crate::context::ExecutionContext;
use crate::error::ScriptError;
use crate::registry::ActionResult;

/// Who a recursion budget belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecursionKey {
    Actor(ActorId),
    Server,
}

/// Summary of one chain run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionOutcome {
    /// Handlers invoked, including failed ones
    pub blocks_executed: usize,
    pub errors: Vec<ScriptError>,
    /// A handler asked the chain to stop
    pub halted: bool,
}

impl ExecutionOutcome {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn merge(&mut self, other: ExecutionOutcome) {
        self.blocks_executed += other.blocks_executed;
        self.errors.extend(other.errors);
        self.halted |= other.halted;
    }
}

/// Result of running one child chain
#[derive(Debug, Clone, PartialEq)]
pub struct ChildOutcome {
    pub block: BlockId,
    pub outcome: ExecutionOutcome,
}

/// Holds one unit of a recursion budget until dropped
struct DepthGuard<'a> {
    depths: &'a DashMap<RecursionKey, usize>,
    key: RecursionKey,
}

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        let emptied = match self.depths.get_mut(&self.key) {
            Some(mut depth) => {
                *depth = depth.saturating_sub(1);
                *depth == 0
            }
            None => false,
        };
        if emptied {
            self.depths.remove_if(&self.key, |_, depth| *depth == 0);
        }
    }
}

/// Synchronous block-chain interpreter
pub struct ScriptExecutor {
    max_depth: usize,
    depths: DashMap<RecursionKey, usize>,
}

impl ScriptExecutor {
    pub fn new(max_depth: usize) -> Self {
        Self {
            max_depth,
            depths: DashMap::new(),
        }
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Current budget use for a key
    pub fn depth(&self, key: RecursionKey) -> usize {
        self.depths.get(&key).map(|d| *d).unwrap_or(0)
    }

    /// Entry point for a triggered script
    ///
    /// Trigger blocks are entry markers and are not dispatched; execution
    /// starts at the trigger's `next`.
    pub fn execute_script(&self, ctx: &ExecutionContext) -> ExecutionOutcome {
        let start = match ctx.current_block() {
            Some(block) if block.is_trigger() => block.next,
            Some(block) => Some(block.id),
            None => None,
        };

        match start {
            Some(start) => self.execute(&ctx.with_block(start)),
            None => ExecutionOutcome::default(),
        }
    }

    /// Run the chain that starts at the context's current block
    pub fn execute(&self, ctx: &ExecutionContext) -> ExecutionOutcome {
        let mut outcome = ExecutionOutcome::default();
        let mut guards = Vec::new();
        let mut cursor = Some(ctx.block_id());

        while let Some(block_id) = cursor.take() {
            let graph = ctx.graph();
            let Some(block) = graph.block(block_id) else {
                debug!(block_id = %block_id, "Edge points at a missing block, ending chain");
                break;
            };

            let Some(guard) = self.enter(ctx.recursion_key()) else {
                let err = ScriptError::RecursionLimit {
                    limit: self.max_depth,
                };
                self.report(ctx, block, &err);
                outcome.errors.push(err);
                break;
            };
            guards.push(guard);

            let block_ctx = ctx.with_block(block_id);
            outcome.blocks_executed += 1;

            match self.dispatch(&block_ctx, block) {
                ActionResult::Continue(message) => {
                    if let Some(message) = message {
                        debug!(block_id = %block_id, action = %block.action, "{}", message);
                    }
                    cursor = block.next;
                }
                ActionResult::Branch(taken) => {
                    debug!(block_id = %block_id, action = %block.action, taken, "Branch");
                    cursor = if taken { block.next } else { block.else_branch };
                }
                ActionResult::Halt => {
                    debug!(block_id = %block_id, action = %block.action, "Chain halted");
                    outcome.halted = true;
                }
                ActionResult::Error(err) => {
                    self.report(&block_ctx, block, &err);
                    if !err.is_chain_stopping() {
                        cursor = block.next;
                    }
                    outcome.errors.push(err);
                }
            }
        }

        drop(guards);
        outcome
    }

    /// Run each child chain of the current block in order
    ///
    /// Child failures are collected, never propagated.
    pub fn execute_children(&self, ctx: &ExecutionContext) -> Vec<ChildOutcome> {
        let Some(block) = ctx.current_block() else {
            return Vec::new();
        };

        block
            .children
            .iter()
            .map(|&child| ChildOutcome {
                block: child,
                outcome: self.execute(&ctx.with_block(child)),
            })
            .collect()
    }

    fn enter(&self, key: RecursionKey) -> Option<DepthGuard<'_>> {
        {
            let mut depth = self.depths.entry(key).or_insert(0);
            if *depth >= self.max_depth {
                return None;
            }
            *depth += 1;
        }
        Some(DepthGuard {
            depths: &self.depths,
            key,
        })
    }

    /// Resolve and run one handler, catching panics
    fn dispatch(&self, ctx: &ExecutionContext, block: &CodeBlock) -> ActionResult {
        let entry = match ctx.engine().registry().require(&block.action) {
            Ok(entry) => entry,
            Err(e) => return ActionResult::Error(e),
        };

        debug!(block_id = %block.id, action = %block.action, "Executing block");

        match catch_unwind(AssertUnwindSafe(|| entry.invoke(ctx, &block.parameters))) {
            Ok(result) => result,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(
                    block_id = %block.id,
                    action = %block.action,
                    panic = %message,
                    "Handler panicked"
                );
                ActionResult::Error(ScriptError::handler(&block.action, message))
            }
        }
    }

    fn report(&self, ctx: &ExecutionContext, block: &CodeBlock, err: &ScriptError) {
        warn!(
            block_id = %block.id,
            action = %block.action,
            actor = ?ctx.actor(),
            graph_id = %ctx.graph().id,
            error = %err,
            "Script error"
        );
        ctx.host()
            .notify_error(ctx.actor(), &format!("{} ({})", err, block.action));
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_guard_releases() {
        let executor = ScriptExecutor::new(2);
        let key = RecursionKey::Server;

        let a = executor.enter(key).unwrap();
        let b = executor.enter(key).unwrap();
        assert!(executor.enter(key).is_none());
        assert_eq!(executor.depth(key), 2);

        drop(b);
        assert_eq!(executor.depth(key), 1);
        drop(a);
        assert_eq!(executor.depth(key), 0);
    }

    #[test]
    fn test_budgets_are_per_actor() {
        let executor = ScriptExecutor::new(1);
        let _server = executor.enter(RecursionKey::Server).unwrap();
        assert!(executor.enter(RecursionKey::Actor(ActorId::new())).is_some());
    }

    #[test]
    fn test_outcome_merge() {
        let mut a = ExecutionOutcome {
            blocks_executed: 2,
            ..Default::default()
        };
        a.merge(ExecutionOutcome {
            blocks_executed: 1,
            errors: vec![ScriptError::UnknownAction("x".into())],
            halted: true,
        });
        assert_eq!(a.blocks_executed, 3);
        assert!(!a.is_ok());
        assert!(a.halted);
    }

    #[test]
    fn test_panic_message() {
        let payload = std::panic::catch_unwind(|| panic!("boom")).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "boom");
    }
}
