//! Invocation wrapper: timeout with heartbeat extension, cancellation, and
//! retry with exponential backoff around a single executor call.
//!
//! Timeouts and cancellation are advisory over the traversal, not the
//! executor body. When either fires, the engine stops polling the executor's
//! future and drops it. An executor that blocks its thread without yielding,
//! or that handed work to a detached task, keeps running until it finishes
//! on its own; the engine can only stop waiting for it and mark the node
//! failed.

use chrono::Utc;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use weavecore::{
    ExecutionEvent, ExecutionResult, FlowError, Heartbeat, Node, NodeConfig, NodeKind, Value,
};

use crate::executor::RunScope;
use crate::runtime::EngineConfig;
use crate::state::NodeRecord;

/// Timeout and retry settings for one node, resolved from its `data` with
/// engine defaults as fallback.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodePolicy {
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl NodePolicy {
    pub fn resolve(node: &Node, kind: NodeKind, config: &EngineConfig) -> Self {
        let default_timeout = if kind.is_generation_class() {
            config.generation_timeout_ms
        } else {
            config.node_timeout_ms
        };
        Self {
            timeout: Duration::from_millis(node.data.get_u64("timeout").unwrap_or(default_timeout)),
            max_retries: node
                .data
                .get_u64("maxRetries")
                .map(|n| n.min(u64::from(u32::MAX)) as u32)
                .unwrap_or(config.default_max_retries),
            retry_delay: Duration::from_millis(
                node.data
                    .get_u64("retryDelay")
                    .unwrap_or(config.default_retry_delay_ms),
            ),
        }
    }

    /// Delay before retry number `attempt + 1`: `retry_delay * 2^attempt`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.retry_delay.saturating_mul(1u32 << attempt.min(20))
    }
}

#[derive(Debug, PartialEq)]
enum Interrupt {
    TimedOut,
    Cancelled,
}

/// Polls `fut` until it completes, the abort token fires, or no heartbeat
/// arrived for `timeout`.
async fn race_deadline<F: Future>(
    fut: F,
    timeout: Duration,
    heartbeat: &Heartbeat,
    abort: &CancellationToken,
) -> Result<F::Output, Interrupt> {
    tokio::pin!(fut);
    let mut deadline = heartbeat.last_beat() + timeout;
    loop {
        tokio::select! {
            biased;
            _ = abort.cancelled() => return Err(Interrupt::Cancelled),
            out = &mut fut => return Ok(out),
            _ = tokio::time::sleep_until(deadline) => {
                let extended = heartbeat.last_beat() + timeout;
                if extended > deadline {
                    deadline = extended;
                } else {
                    return Err(Interrupt::TimedOut);
                }
            }
        }
    }
}

impl RunScope {
    /// Runs one node to a successful result, or fails after the node's retry
    /// budget. Cancellation short-circuits every wait, including backoff.
    pub(crate) async fn invoke(
        &self,
        node: &Node,
        kind: NodeKind,
        config: &NodeConfig,
        input: Value,
    ) -> Result<ExecutionResult, FlowError> {
        self.invoke_linked(node, kind, config, input, None).await
    }

    /// [`invoke`](Self::invoke) on behalf of another executor: every attempt's
    /// heartbeat also beats `caller`.
    pub(crate) async fn invoke_linked(
        &self,
        node: &Node,
        kind: NodeKind,
        config: &NodeConfig,
        input: Value,
        caller: Option<&Heartbeat>,
    ) -> Result<ExecutionResult, FlowError> {
        let policy = NodePolicy::resolve(node, kind, &self.config);
        let started = Instant::now();
        let logger = self.logger_for(node);
        let loop_slot = if kind == NodeKind::Loop {
            Some(self.state.loop_entry(&node.id).await.state)
        } else {
            None
        };

        self.events.emit(ExecutionEvent::NodeStarted {
            execution_id: self.execution_id,
            node_id: node.id.clone(),
            node_type: node.node_type.clone(),
            timestamp: Utc::now(),
        });

        let mut attempt: u32 = 0;
        loop {
            if self.abort.is_cancelled() {
                return Err(self.fail(node, started, attempt, FlowError::Cancelled).await);
            }

            let heartbeat = caller.map(Heartbeat::linked_to).unwrap_or_default();
            let mut ctx = self.context_for(node, &logger, attempt, heartbeat.clone());
            if let Some(slot) = &loop_slot {
                ctx = ctx.with_loop_state(slot.clone());
            }

            let outcome = race_deadline(
                self.registry.dispatch(&node.node_type, config, input.clone(), &ctx),
                policy.timeout,
                &heartbeat,
                &self.abort,
            )
            .await;
            let attempts = attempt + 1;

            let failure = match outcome {
                Ok(result) if result.success => {
                    let elapsed = started.elapsed().as_millis() as u64;
                    tracing::info!("Node {} completed in {}ms", node.id, elapsed);
                    self.events.emit(ExecutionEvent::NodeCompleted {
                        execution_id: self.execution_id,
                        node_id: node.id.clone(),
                        output: result.output.clone(),
                        attempts,
                        duration_ms: elapsed,
                        timestamp: Utc::now(),
                    });
                    self.state
                        .results
                        .record(
                            Some(&result),
                            NodeRecord {
                                node_id: node.id.clone(),
                                node_type: node.node_type.clone(),
                                success: true,
                                output: Some(result.output.clone()),
                                error: None,
                                execution_time_ms: elapsed,
                                attempts,
                            },
                        )
                        .await;
                    return Ok(result);
                }
                // an executor that noticed the abort reports a plain failure
                Ok(_) if self.abort.is_cancelled() => FlowError::Cancelled,
                Ok(result) => FlowError::NodeExecution {
                    node_id: node.id.clone(),
                    attempts,
                    message: result
                        .error
                        .unwrap_or_else(|| "node reported failure".to_string()),
                },
                Err(Interrupt::Cancelled) => FlowError::Cancelled,
                Err(Interrupt::TimedOut) => FlowError::Timeout {
                    node_id: node.id.clone(),
                    attempts,
                    after_ms: policy.timeout.as_millis() as u64,
                },
            };

            if failure.is_cancelled() || attempt >= policy.max_retries {
                return Err(self.fail(node, started, attempts, failure).await);
            }

            let delay = policy.backoff(attempt);
            tracing::warn!(
                "Node {} attempt {}/{} failed: {}. Retrying in {}ms",
                node.id,
                attempts,
                policy.max_retries + 1,
                failure,
                delay.as_millis()
            );
            logger.warn(format!("Attempt {} failed: {}", attempts, failure));
            self.events.emit(ExecutionEvent::NodeRetrying {
                execution_id: self.execution_id,
                node_id: node.id.clone(),
                attempt: attempts,
                delay_ms: delay.as_millis() as u64,
                error: failure.to_string(),
                timestamp: Utc::now(),
            });

            tokio::select! {
                biased;
                _ = self.abort.cancelled() => {
                    return Err(self.fail(node, started, attempts, FlowError::Cancelled).await);
                }
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }

    /// Records a terminal failure for `node` and hands the error back.
    pub(crate) async fn fail(
        &self,
        node: &Node,
        started: Instant,
        attempts: u32,
        error: FlowError,
    ) -> FlowError {
        tracing::error!("Node {} failed: {}", node.id, error);
        self.logger_for(node).error(error.to_string());
        self.events.emit(ExecutionEvent::NodeFailed {
            execution_id: self.execution_id,
            node_id: node.id.clone(),
            error: error.to_string(),
            attempts,
            timestamp: Utc::now(),
        });
        self.state
            .results
            .record(
                None,
                NodeRecord {
                    node_id: node.id.clone(),
                    node_type: node.node_type.clone(),
                    success: false,
                    output: None,
                    error: Some(error.to_string()),
                    execution_time_ms: started.elapsed().as_millis() as u64,
                    attempts,
                },
            )
            .await;
        error
    }
}
