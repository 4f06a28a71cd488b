//! Turn coordinator
//!
//! Consumes one model turn's events, forwards content through the
//! pending buffer, hands tool requests to the scheduler, and feeds the
//! responses back until the model stops asking for tools.

use std::sync::Arc;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::StreamConfig;
use crate::llm::{Conversation, EventStream, ModelBackend};
use crate::observer::TurnObserver;
use crate::stream::{ContentBuffer, StreamEvent};
use crate::tool::{CompletedBatch, ToolCallRequest, ToolScheduler};

/// How a turn (or a whole run) ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed,
    UserCancelled,
    Error(String),
}

/// Everything one model turn produced
#[derive(Debug, Clone)]
pub struct TurnReport {
    pub outcome: TurnOutcome,
    /// Full assistant text of the turn
    pub text: String,
    /// Tool requests accumulated in arrival order
    pub tool_requests: Vec<ToolCallRequest>,
}

pub struct StreamCoordinator {
    backend: Arc<dyn ModelBackend>,
    scheduler: ToolScheduler,
    observer: Arc<dyn TurnObserver>,
    config: StreamConfig,
    interrupt_notified: bool,
}

impl StreamCoordinator {
    pub fn new(
        backend: Arc<dyn ModelBackend>,
        scheduler: ToolScheduler,
        observer: Arc<dyn TurnObserver>,
        config: StreamConfig,
    ) -> Self {
        Self {
            backend,
            scheduler,
            observer,
            config,
            interrupt_notified: false,
        }
    }

    pub fn scheduler(&self) -> &ToolScheduler {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut ToolScheduler {
        &mut self.scheduler
    }

    /// Consume one turn's events until the stream ends, is cancelled, or errors
    pub async fn process_turn(
        &mut self,
        mut events: EventStream,
        cancel: &CancellationToken,
    ) -> TurnReport {
        self.interrupt_notified = false;

        let mut buffer = ContentBuffer::new(self.config.flush_threshold_bytes);
        let mut text = String::new();
        let mut tool_requests = Vec::new();

        let outcome = loop {
            let event = tokio::select! {
                biased;
                () = cancel.cancelled() => Some(StreamEvent::UserCancelled),
                event = events.next() => event,
            };
            let Some(event) = event else {
                break TurnOutcome::Completed;
            };

            match event {
                StreamEvent::Thought(thought) => self.observer.on_thought(&thought),
                StreamEvent::ContentDelta(delta) => {
                    text.push_str(&delta);
                    for chunk in buffer.push(&delta) {
                        self.observer.on_content(&chunk);
                    }
                }
                StreamEvent::ToolCallRequest(request) => {
                    debug!("Model requested tool {} ({})", request.name, request.call_id);
                    tool_requests.push(request);
                }
                StreamEvent::ToolCallResponse(response) => self.observer.on_tool_response(&response),
                StreamEvent::UserCancelled => {
                    let names: Vec<String> = tool_requests.iter().map(|r| r.name.clone()).collect();
                    self.flush(&mut buffer);
                    self.notify_cancelled(&names);
                    break TurnOutcome::UserCancelled;
                }
                StreamEvent::Error(message) => {
                    self.flush(&mut buffer);
                    self.notify_error(&message);
                    break TurnOutcome::Error(message);
                }
                StreamEvent::ChatCompressed(info) => {
                    info!(
                        "Chat compressed: {} -> {} tokens",
                        info.original_token_count, info.new_token_count
                    );
                    self.observer.on_chat_compressed(&info);
                }
                StreamEvent::UsageMetadata(usage) => self.observer.on_usage(&usage),
            }
        };

        self.flush(&mut buffer);
        TurnReport {
            outcome,
            text,
            tool_requests,
        }
    }

    /// Run model turns until the model stops requesting tools
    pub async fn run(
        &mut self,
        conversation: &mut Conversation,
        cancel: &CancellationToken,
    ) -> TurnOutcome {
        for turn in 1..=self.config.max_turns {
            debug!("Starting model turn {}", turn);
            self.interrupt_notified = false;

            let events = match self.backend.stream_turn(conversation, cancel.clone()).await {
                Ok(events) => events,
                Err(crate::Error::Cancelled(_)) => {
                    self.notify_cancelled(&[]);
                    return TurnOutcome::UserCancelled;
                }
                Err(e) => {
                    let message = e.to_string();
                    self.notify_error(&message);
                    return TurnOutcome::Error(message);
                }
            };

            let report = self.process_turn(events, cancel).await;
            let tool_uses = report.tool_requests.iter().map(ToolCallRequest::to_tool_use).collect();
            conversation.push_assistant_turn(&report.text, tool_uses);

            match report.outcome {
                TurnOutcome::Completed => {}
                TurnOutcome::UserCancelled => {
                    self.settle_interrupted(report.tool_requests, conversation, cancel)
                        .await;
                    return TurnOutcome::UserCancelled;
                }
                TurnOutcome::Error(message) => {
                    let fired = CancellationToken::new();
                    fired.cancel();
                    self.settle_interrupted(report.tool_requests, conversation, &fired)
                        .await;
                    return TurnOutcome::Error(message);
                }
            }

            if report.tool_requests.is_empty() {
                return TurnOutcome::Completed;
            }

            let batch = self.scheduler.schedule(report.tool_requests, cancel).await;
            self.resubmit(conversation);

            if cancel.is_cancelled() {
                self.notify_cancelled(&batch.cancelled_tools());
                return TurnOutcome::UserCancelled;
            }
        }

        let message = format!(
            "Stopped after {} consecutive tool turns",
            self.config.max_turns
        );
        warn!("{}", message);
        self.notify_error(&message);
        TurnOutcome::Error(message)
    }

    /// Run client-issued calls; nothing is sent to the model
    pub async fn run_local(
        &mut self,
        requests: Vec<ToolCallRequest>,
        cancel: &CancellationToken,
    ) -> CompletedBatch {
        self.interrupt_notified = false;
        let batch = self.scheduler.schedule(requests, cancel).await;
        if cancel.is_cancelled() {
            self.notify_cancelled(&batch.cancelled_tools());
        }
        batch
    }

    /// Hand unsubmitted model responses back to the conversation.
    ///
    /// Returns how many were submitted; repeating the call submits nothing.
    pub fn resubmit(&mut self, conversation: &mut Conversation) -> usize {
        let responses = self.scheduler.take_unsubmitted_responses();
        let count = responses.len();
        if count > 0 {
            debug!("Submitting {} tool response(s)", count);
            self.backend.continue_with_responses(conversation, responses);
        }
        count
    }

    /// Give every request of an interrupted turn a cancelled response
    async fn settle_interrupted(
        &mut self,
        requests: Vec<ToolCallRequest>,
        conversation: &mut Conversation,
        fired: &CancellationToken,
    ) {
        if requests.is_empty() {
            return;
        }
        self.scheduler.schedule(requests, fired).await;
        self.resubmit(conversation);
    }

    fn flush(&self, buffer: &mut ContentBuffer) {
        if let Some(rest) = buffer.take_remaining() {
            self.observer.on_content(&rest);
        }
    }

    fn notify_cancelled(&mut self, interrupted: &[String]) {
        if self.interrupt_notified {
            return;
        }
        self.interrupt_notified = true;
        info!("Turn cancelled by user");
        self.observer.on_cancelled(interrupted);
    }

    fn notify_error(&mut self, message: &str) {
        if self.interrupt_notified {
            return;
        }
        self.interrupt_notified = true;
        self.observer.on_error(message);
    }
}
