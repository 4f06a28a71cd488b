//! Presentation-layer hooks for a running conversation
//!
//! Every method has a no-op default so a front end implements only what
//! it displays.

use crate::llm::Usage;
use crate::stream::CompressionInfo;
use crate::tool::{ToolResponse, TrackedToolCall};

pub trait TurnObserver: Send + Sync {
    /// A finalized chunk of assistant text
    fn on_content(&self, _chunk: &str) {}

    fn on_thought(&self, _text: &str) {}

    /// A tracked call changed status
    fn on_tool_status(&self, _call: &TrackedToolCall) {}

    /// Intermediate output reported by an executing tool
    fn on_tool_progress(&self, _call_id: &str, _message: &str) {}

    /// A tool response surfaced directly by the backend
    fn on_tool_response(&self, _response: &ToolResponse) {}

    /// Fired exactly once per scheduled batch, after every call is terminal
    fn on_batch_complete(&self, _calls: &[TrackedToolCall]) {}

    /// The turn was cancelled; names the tools that were interrupted
    fn on_cancelled(&self, _interrupted_tools: &[String]) {}

    fn on_error(&self, _message: &str) {}

    fn on_chat_compressed(&self, _info: &CompressionInfo) {}

    fn on_usage(&self, _usage: &Usage) {}
}

/// Observer that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl TurnObserver for NoopObserver {}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;
    use crate::tool::ToolCallStatus;

    /// Records every callback for assertions
    #[derive(Default)]
    pub struct RecordingObserver {
        pub content: Mutex<Vec<String>>,
        pub thoughts: Mutex<Vec<String>>,
        pub statuses: Mutex<Vec<(String, ToolCallStatus)>>,
        pub progress: Mutex<Vec<String>>,
        pub batches: Mutex<Vec<Vec<TrackedToolCall>>>,
        pub cancellations: Mutex<Vec<Vec<String>>>,
        pub errors: Mutex<Vec<String>>,
        pub usage: Mutex<Vec<Usage>>,
    }

    impl RecordingObserver {
        pub fn content(&self) -> String {
            self.content.lock().unwrap().concat()
        }

        pub fn chunks(&self) -> Vec<String> {
            self.content.lock().unwrap().clone()
        }

        pub fn batch_count(&self) -> usize {
            self.batches.lock().unwrap().len()
        }

        pub fn cancellation_count(&self) -> usize {
            self.cancellations.lock().unwrap().len()
        }

        pub fn error_count(&self) -> usize {
            self.errors.lock().unwrap().len()
        }

        pub fn statuses_for(&self, call_id: &str) -> Vec<ToolCallStatus> {
            self.statuses
                .lock()
                .unwrap()
                .iter()
                .filter(|(id, _)| id == call_id)
                .map(|(_, status)| *status)
                .collect()
        }
    }

    impl TurnObserver for RecordingObserver {
        fn on_content(&self, chunk: &str) {
            self.content.lock().unwrap().push(chunk.to_string());
        }

        fn on_thought(&self, text: &str) {
            self.thoughts.lock().unwrap().push(text.to_string());
        }

        fn on_tool_status(&self, call: &TrackedToolCall) {
            self.statuses
                .lock()
                .unwrap()
                .push((call.call_id().to_string(), call.status));
        }

        fn on_tool_progress(&self, _call_id: &str, message: &str) {
            self.progress.lock().unwrap().push(message.to_string());
        }

        fn on_batch_complete(&self, calls: &[TrackedToolCall]) {
            self.batches.lock().unwrap().push(calls.to_vec());
        }

        fn on_cancelled(&self, interrupted_tools: &[String]) {
            self.cancellations
                .lock()
                .unwrap()
                .push(interrupted_tools.to_vec());
        }

        fn on_error(&self, message: &str) {
            self.errors.lock().unwrap().push(message.to_string());
        }

        fn on_usage(&self, usage: &Usage) {
            self.usage.lock().unwrap().push(*usage);
        }
    }
}
