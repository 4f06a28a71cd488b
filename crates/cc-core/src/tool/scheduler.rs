//! Tool call scheduler
//!
//! Drives a batch of tool calls through validation, approval and
//! execution. Every tracked call is owned here and mutated only from the
//! task that awaits [`ToolScheduler::schedule`]; executions run as
//! concurrent futures on that same task and their results are applied
//! in the scheduling loop, so no two updates ever race.

use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::Error;
use crate::observer::TurnObserver;
use crate::tool::{
    ApprovalHandler, ApprovalOutcome, ApprovalSet, CallOrigin, ConfirmationRequest, Tool,
    ToolCallRequest, ToolCallStatus, ToolContext, ToolManager, ToolResponse, TrackedToolCall,
};

/// Snapshot of a batch after every call reached a terminal state
#[derive(Debug, Clone)]
pub struct CompletedBatch {
    pub batch_id: u64,
    pub calls: Vec<TrackedToolCall>,
}

impl CompletedBatch {
    /// Names of the tools whose calls ended cancelled
    pub fn cancelled_tools(&self) -> Vec<String> {
        self.calls
            .iter()
            .filter(|c| c.status == ToolCallStatus::Cancelled)
            .map(|c| c.tool_name().to_string())
            .collect()
    }

    pub fn count(&self, status: ToolCallStatus) -> usize {
        self.calls.iter().filter(|c| c.status == status).count()
    }

    pub fn has_model_calls(&self) -> bool {
        self.calls
            .iter()
            .any(|c| c.request.origin == CallOrigin::Model)
    }
}

enum ApprovalDecision {
    Approved,
    Denied,
    Cancelled,
}

pub struct ToolScheduler {
    tools: Arc<ToolManager>,
    approvals: ApprovalSet,
    approver: Arc<dyn ApprovalHandler>,
    observer: Arc<dyn TurnObserver>,
    calls: Vec<TrackedToolCall>,
    batches: u64,
}

impl ToolScheduler {
    pub fn new(
        tools: Arc<ToolManager>,
        approver: Arc<dyn ApprovalHandler>,
        observer: Arc<dyn TurnObserver>,
    ) -> Self {
        Self {
            tools,
            approvals: ApprovalSet::new(),
            approver,
            observer,
            calls: Vec::new(),
            batches: 0,
        }
    }

    /// Start the session with some roots already approved
    pub fn with_approvals(mut self, approvals: ApprovalSet) -> Self {
        self.approvals = approvals;
        self
    }

    pub fn tools(&self) -> &Arc<ToolManager> {
        &self.tools
    }

    pub fn approvals(&self) -> &ApprovalSet {
        &self.approvals
    }

    /// Calls of the most recent batch
    pub fn calls(&self) -> &[TrackedToolCall] {
        &self.calls
    }

    pub fn is_idle(&self) -> bool {
        self.calls.iter().all(TrackedToolCall::is_terminal)
    }

    /// Run a batch to completion.
    ///
    /// Returns once every call is terminal. When `cancel` fires, calls
    /// that have not finished resolve as cancelled with a synthesized
    /// response, so the batch still completes.
    pub async fn schedule(
        &mut self,
        requests: Vec<ToolCallRequest>,
        cancel: &CancellationToken,
    ) -> CompletedBatch {
        let pending = self
            .calls
            .iter()
            .filter(|c| c.request.origin == CallOrigin::Model && !c.response_submitted)
            .count();
        if pending > 0 {
            warn!("Replacing batch with {} unsubmitted responses", pending);
        }

        self.batches += 1;
        let batch_id = self.batches;
        self.calls = requests.into_iter().map(TrackedToolCall::new).collect();
        info!("Scheduling batch {} with {} tool call(s)", batch_id, self.calls.len());

        for index in 0..self.calls.len() {
            self.publish(index);
        }

        let mut runnable: Vec<(usize, Arc<dyn Tool>)> = Vec::new();
        for index in 0..self.calls.len() {
            if cancel.is_cancelled() {
                self.resolve_cancelled(index);
                continue;
            }

            let request = self.calls[index].request.clone();
            let Some(tool) = self.tools.get(&request.name) else {
                warn!("Tool not found: {}", request.name);
                let message = Error::ToolNotFound(request.name.clone()).to_string();
                self.resolve(index, ToolCallStatus::Error, ToolResponse::new(&request, message, true));
                continue;
            };

            if let Err(e) = tool.validate(&request.args) {
                debug!("Validation failed for {}: {}", request.name, e);
                self.resolve(index, ToolCallStatus::Error, ToolResponse::new(&request, e.to_string(), true));
                continue;
            }

            match self.resolve_approval(index, tool.as_ref(), cancel).await {
                ApprovalDecision::Approved => {
                    self.transition(index, ToolCallStatus::Scheduled);
                    runnable.push((index, tool));
                }
                ApprovalDecision::Denied => {
                    info!("Tool call denied: {}", request.name);
                    self.resolve(index, ToolCallStatus::Cancelled, ToolResponse::denied(&request));
                }
                ApprovalDecision::Cancelled => self.resolve_cancelled(index),
            }
        }

        let mut running = FuturesUnordered::new();
        for (index, tool) in runnable {
            if cancel.is_cancelled() {
                self.resolve_cancelled(index);
                continue;
            }
            self.transition(index, ToolCallStatus::Executing);

            let request = self.calls[index].request.clone();
            info!("Executing tool: {}", request.name);

            let observer = self.observer.clone();
            let call_id = request.call_id.clone();
            let ctx = ToolContext::new(call_id.clone(), cancel.clone()).with_progress(Arc::new(
                move |message: &str| observer.on_tool_progress(&call_id, message),
            ));
            let token = cancel.clone();

            running.push(async move {
                let outcome = tokio::select! {
                    biased;
                    () = token.cancelled() => None,
                    result = tool.execute(request.args, ctx) => Some(result),
                };
                (index, outcome)
            });
        }

        while let Some((index, outcome)) = running.next().await {
            let request = self.calls[index].request.clone();
            match outcome {
                Some(Ok(result)) => {
                    let status = if result.is_error {
                        ToolCallStatus::Error
                    } else {
                        ToolCallStatus::Success
                    };
                    let mut response = ToolResponse::new(&request, result.output, result.is_error);
                    response.data = result.data;
                    self.resolve(index, status, response);
                }
                Some(Err(Error::Cancelled(_))) | None => self.resolve_cancelled(index),
                Some(Err(e)) => {
                    warn!("Tool {} failed: {}", request.name, e);
                    self.resolve(index, ToolCallStatus::Error, ToolResponse::new(&request, e.to_string(), true));
                }
            }
        }

        // Client-issued calls never go back to the model.
        for call in &mut self.calls {
            if call.request.origin == CallOrigin::Client {
                call.response_submitted = true;
            }
        }

        let batch = CompletedBatch {
            batch_id,
            calls: self.calls.clone(),
        };
        info!(
            "Batch {} complete: {} succeeded, {} failed, {} cancelled",
            batch_id,
            batch.count(ToolCallStatus::Success),
            batch.count(ToolCallStatus::Error),
            batch.count(ToolCallStatus::Cancelled)
        );
        self.observer.on_batch_complete(&batch.calls);
        batch
    }

    /// Responses of terminal model-issued calls not yet handed back.
    ///
    /// Each response is returned at most once; a second call yields nothing new.
    pub fn take_unsubmitted_responses(&mut self) -> Vec<ToolResponse> {
        let mut responses = Vec::new();
        for call in &mut self.calls {
            if call.request.origin != CallOrigin::Model
                || call.response_submitted
                || !call.is_terminal()
            {
                continue;
            }
            if let Some(response) = &call.response {
                responses.push(response.clone());
                call.response_submitted = true;
            }
        }
        responses
    }

    async fn resolve_approval(
        &mut self,
        index: usize,
        tool: &dyn Tool,
        cancel: &CancellationToken,
    ) -> ApprovalDecision {
        let request = self.calls[index].request.clone();
        let Some(details) = tool.requires_confirmation(&request.args) else {
            return ApprovalDecision::Approved;
        };

        if self.approvals.contains(&details.root) {
            debug!("'{}' already approved for this session", details.root);
            return ApprovalDecision::Approved;
        }

        self.transition(index, ToolCallStatus::AwaitingApproval);

        let root = details.root.clone();
        let confirmation = ConfirmationRequest {
            call_id: request.call_id,
            tool_name: request.name,
            details,
        };
        let approver = self.approver.clone();
        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => return ApprovalDecision::Cancelled,
            outcome = approver.request_approval(&confirmation) => outcome,
        };

        match outcome {
            ApprovalOutcome::ProceedOnce => ApprovalDecision::Approved,
            ApprovalOutcome::ProceedAlways => {
                info!("Approved '{}' for the rest of the session", root);
                self.approvals.insert(root);
                ApprovalDecision::Approved
            }
            ApprovalOutcome::Deny => ApprovalDecision::Denied,
        }
    }

    fn transition(&mut self, index: usize, status: ToolCallStatus) {
        if self.calls[index].transition(status) {
            self.publish(index);
        }
    }

    fn resolve(&mut self, index: usize, status: ToolCallStatus, response: ToolResponse) {
        if self.calls[index].resolve(status, response) {
            self.publish(index);
        }
    }

    fn resolve_cancelled(&mut self, index: usize) {
        let response = ToolResponse::cancelled(&self.calls[index].request);
        self.resolve(index, ToolCallStatus::Cancelled, response);
    }

    fn publish(&self, index: usize) {
        self.observer.on_tool_status(&self.calls[index]);
    }
}
