//! Job monitoring over the ComfyUI event stream.
//!
//! [`JobMonitor`] is a plain state machine fed one message at a time, so
//! it can be exercised without a socket. [`await_terminal`] drives it from
//! a WebSocket stream, racing every receive against the timeout and a
//! [`CancellationToken`].

use std::time::{Duration, Instant};

use futures::{Stream, StreamExt};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;

use crate::error::EngineError;
use crate::job::JobHandle;
use crate::messages::{parse_message, ComfyUIMessage};

/// Lifecycle of one monitored job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Submitted,
    Running,
    Complete,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

/// Why a monitor ended in [`JobState::Failed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    Timeout,
    Cancelled,
    StreamClosed,
    StreamError(String),
    Execution {
        node_id: Option<String>,
        message: String,
    },
}

/// State machine for one job.
///
/// * `Submitted -> Running` on the first `executing` message.
/// * `Running -> Complete` on a `status` message with `queue_remaining == 0`.
/// * any -> `Failed` on an `execution_error` for this job, or via [`fail`](Self::fail).
///
/// Terminal states absorb further input.
#[derive(Debug)]
pub struct JobMonitor {
    job_id: String,
    state: JobState,
    failure: Option<FailureReason>,
    nodes_executed: u32,
    protocol_errors: u32,
    last_protocol_error: Option<String>,
}

impl JobMonitor {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            state: JobState::Submitted,
            failure: None,
            nodes_executed: 0,
            protocol_errors: 0,
            last_protocol_error: None,
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn failure(&self) -> Option<&FailureReason> {
        self.failure.as_ref()
    }

    pub fn protocol_errors(&self) -> u32 {
        self.protocol_errors
    }

    /// Advance on one parsed message.
    pub fn feed(&mut self, msg: &ComfyUIMessage) -> JobState {
        if self.state.is_terminal() {
            return self.state;
        }

        match msg {
            ComfyUIMessage::Executing(data) => {
                // Progress of another client's prompt.
                if data.prompt_id.as_deref().is_some_and(|id| id != self.job_id) {
                    return self.state;
                }
                self.nodes_executed += 1;
                tracing::debug!(job_id = %self.job_id, node = ?data.node, "Executing node");
                if self.state == JobState::Submitted {
                    self.state = JobState::Running;
                }
            }
            ComfyUIMessage::Status(data) => {
                let queue_remaining = data.status.exec_info.queue_remaining;
                tracing::debug!(job_id = %self.job_id, queue_remaining, "ComfyUI queue status");
                if self.state == JobState::Running && queue_remaining == 0 {
                    tracing::info!(
                        job_id = %self.job_id,
                        nodes_executed = self.nodes_executed,
                        "Execution complete",
                    );
                    self.state = JobState::Complete;
                }
            }
            ComfyUIMessage::ExecutionError(data) if data.prompt_id == self.job_id => {
                tracing::error!(
                    job_id = %self.job_id,
                    node_id = ?data.node_id,
                    error_type = %data.exception_type,
                    error_message = %data.exception_message,
                    "Execution error",
                );
                return self.fail(FailureReason::Execution {
                    node_id: data.node_id.clone(),
                    message: data.exception_message.clone(),
                });
            }
            ComfyUIMessage::ExecutionError(_) => {}
            ComfyUIMessage::Other(kind) => {
                tracing::trace!(job_id = %self.job_id, kind = %kind, "Ignoring message");
            }
        }

        self.state
    }

    /// Parse and advance on one raw text frame.
    ///
    /// Frames that cannot be parsed are counted and logged but do not
    /// change the state.
    pub fn feed_text(&mut self, text: &str) -> JobState {
        match parse_message(text) {
            Ok(msg) => self.feed(&msg),
            Err(e) => {
                tracing::warn!(
                    job_id = %self.job_id,
                    error = %e,
                    raw_message = %text,
                    "Failed to parse ComfyUI message",
                );
                self.protocol_errors += 1;
                self.last_protocol_error = Some(e.to_string());
                self.state
            }
        }
    }

    /// Force a non-terminal monitor into [`JobState::Failed`].
    pub fn fail(&mut self, reason: FailureReason) -> JobState {
        if !self.state.is_terminal() {
            self.state = JobState::Failed;
            self.failure = Some(reason);
        }
        self.state
    }

    fn into_outcome(self, elapsed: Duration) -> MonitorOutcome {
        MonitorOutcome {
            job_id: self.job_id,
            state: self.state,
            failure: self.failure,
            protocol_errors: self.protocol_errors,
            last_protocol_error: self.last_protocol_error,
            elapsed,
        }
    }
}

/// Final report of one monitoring call.
#[derive(Debug, Clone)]
pub struct MonitorOutcome {
    pub job_id: String,
    pub state: JobState,
    pub failure: Option<FailureReason>,
    pub protocol_errors: u32,
    pub last_protocol_error: Option<String>,
    pub elapsed: Duration,
}

impl MonitorOutcome {
    /// `Ok` only for [`JobState::Complete`].
    pub fn into_result(self) -> Result<(), EngineError> {
        if self.state == JobState::Complete {
            return Ok(());
        }

        let protocol_note = match (&self.last_protocol_error, self.protocol_errors) {
            (Some(last), n) if n > 0 => format!(" ({n} unreadable events, last: {last})"),
            _ => String::new(),
        };

        Err(match self.failure {
            Some(FailureReason::Timeout) => EngineError::Timeout {
                job_id: self.job_id,
                waited: self.elapsed,
                detail: protocol_note,
            },
            Some(FailureReason::Cancelled) => EngineError::Cancelled,
            Some(FailureReason::StreamClosed) => EngineError::Connectivity {
                operation: "monitor",
                detail: format!("event stream closed before job {} finished", self.job_id),
                request_sent: true,
            },
            Some(FailureReason::StreamError(e)) => EngineError::Connectivity {
                operation: "monitor",
                detail: e,
                request_sent: true,
            },
            Some(FailureReason::Execution { node_id, message }) => EngineError::JobFailed {
                job_id: self.job_id,
                detail: match node_id {
                    Some(node) => format!("node {node}: {message}"),
                    None => message,
                },
            },
            None => EngineError::Protocol(format!(
                "monitor for job {} stopped in state {:?}",
                self.job_id, self.state
            )),
        })
    }
}

/// Consume `events` until the job reaches a terminal state.
///
/// The wait is bounded by `timeout` and interrupted by `cancel`. Closing
/// or erroring streams fail the job.
pub async fn await_terminal<S>(
    events: &mut S,
    job: &JobHandle,
    timeout: Duration,
    cancel: &CancellationToken,
) -> MonitorOutcome
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    let started = Instant::now();
    let mut monitor = JobMonitor::new(job.job_id.clone());
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    loop {
        let state = tokio::select! {
            _ = &mut deadline => {
                tracing::warn!(job_id = %job.job_id, timeout_secs = timeout.as_secs(), "Job monitor timed out");
                monitor.fail(FailureReason::Timeout)
            }
            _ = cancel.cancelled() => {
                tracing::info!(job_id = %job.job_id, "Job monitor cancelled");
                monitor.fail(FailureReason::Cancelled)
            }
            frame = events.next() => match frame {
                Some(Ok(Message::Text(text))) => monitor.feed_text(&text),
                Some(Ok(Message::Binary(_))) => {
                    // Preview images.
                    tracing::trace!(job_id = %job.job_id, "Ignoring binary message");
                    monitor.state()
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => monitor.state(),
                Some(Ok(Message::Close(frame))) => {
                    tracing::warn!(job_id = %job.job_id, ?frame, "ComfyUI WebSocket closed");
                    monitor.fail(FailureReason::StreamClosed)
                }
                Some(Err(e)) => {
                    tracing::error!(job_id = %job.job_id, error = %e, "WebSocket receive error");
                    monitor.fail(FailureReason::StreamError(e.to_string()))
                }
                None => monitor.fail(FailureReason::StreamClosed),
            },
        };

        if state.is_terminal() {
            break;
        }
    }

    monitor.into_outcome(started.elapsed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{ExecInfo, ExecutingData, QueueStatus, StatusData};

    fn executing(node: &str) -> ComfyUIMessage {
        ComfyUIMessage::Executing(ExecutingData {
            node: Some(node.into()),
            prompt_id: None,
        })
    }

    fn status(queue_remaining: i64) -> ComfyUIMessage {
        ComfyUIMessage::Status(StatusData {
            status: QueueStatus {
                exec_info: ExecInfo { queue_remaining },
            },
        })
    }

    #[test]
    fn executing_then_empty_queue_completes() {
        let mut monitor = JobMonitor::new("p1");
        assert_eq!(monitor.feed(&executing("A")), JobState::Running);
        assert_eq!(monitor.feed(&executing("B")), JobState::Running);
        assert_eq!(monitor.feed(&status(0)), JobState::Complete);
    }

    #[test]
    fn empty_queue_before_execution_is_ignored() {
        let mut monitor = JobMonitor::new("p1");
        assert_eq!(monitor.feed(&status(0)), JobState::Submitted);
    }

    #[test]
    fn non_zero_queue_keeps_running() {
        let mut monitor = JobMonitor::new("p1");
        monitor.feed(&executing("A"));
        assert_eq!(monitor.feed(&status(2)), JobState::Running);
    }

    #[test]
    fn other_prompts_progress_is_ignored() {
        let mut monitor = JobMonitor::new("p1");
        let foreign = ComfyUIMessage::Executing(ExecutingData {
            node: Some("3".into()),
            prompt_id: Some("p2".into()),
        });
        assert_eq!(monitor.feed(&foreign), JobState::Submitted);
    }

    #[test]
    fn unreadable_frames_are_counted_not_fatal() {
        let mut monitor = JobMonitor::new("p1");
        assert_eq!(monitor.feed_text("garbage"), JobState::Submitted);
        assert_eq!(monitor.feed_text(r#"{"type":"crystools.monitor","data":{}}"#), JobState::Submitted);
        assert_eq!(monitor.protocol_errors(), 1);
    }

    #[test]
    fn terminal_state_absorbs_input() {
        let mut monitor = JobMonitor::new("p1");
        monitor.feed(&executing("A"));
        monitor.feed(&status(0));
        assert_eq!(monitor.fail(FailureReason::Timeout), JobState::Complete);
        assert!(monitor.failure().is_none());
    }
}
