//! Tool system for Claude API tool_use
//!
//! Tools are registered in a [`ToolManager`]; a [`ToolScheduler`] runs
//! the calls the model (or the local client) requests.

pub mod approval;
pub mod call;
pub mod definition;
pub mod manager;
pub mod scheduler;
pub mod traits;

pub use approval::{
    handler_for_mode, ApprovalHandler, ApprovalOutcome, ApprovalSet, AutoApprove,
    ConfirmationRequest, DenyAll,
};
pub use call::{CallOrigin, ToolCallRequest, ToolCallStatus, ToolResponse, TrackedToolCall};
pub use definition::SchemaBuilder;
pub use manager::ToolManager;
pub use scheduler::{CompletedBatch, ToolScheduler};
pub use traits::{ConfirmationDetails, ProgressFn, Tool, ToolContext, ToolResult};
