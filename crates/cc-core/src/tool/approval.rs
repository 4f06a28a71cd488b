//! Session-scoped approval state and the approval handler contract

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::ApprovalMode;
use crate::tool::ConfirmationDetails;

/// Answer to an approval prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalOutcome {
    ProceedOnce,
    /// Approve and remember the tool root for the rest of the session
    ProceedAlways,
    Deny,
}

/// Tool roots the user has approved for the current session.
///
/// Owned by one scheduler; two schedulers never share it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApprovalSet {
    roots: BTreeSet<String>,
}

impl ApprovalSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_roots<I, S>(roots: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            roots: roots.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, root: &str) -> bool {
        self.roots.contains(root)
    }

    /// Returns true if the root was newly added
    pub fn insert(&mut self, root: impl Into<String>) -> bool {
        self.roots.insert(root.into())
    }

    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.roots.iter().map(String::as_str)
    }
}

/// Prompt shown for a single call awaiting approval
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationRequest {
    pub call_id: String,
    pub tool_name: String,
    pub details: ConfirmationDetails,
}

/// Presentation-layer side of the approval flow
#[async_trait]
pub trait ApprovalHandler: Send + Sync {
    async fn request_approval(&self, request: &ConfirmationRequest) -> ApprovalOutcome;
}

/// Approves everything without asking
pub struct AutoApprove;

#[async_trait]
impl ApprovalHandler for AutoApprove {
    async fn request_approval(&self, _request: &ConfirmationRequest) -> ApprovalOutcome {
        ApprovalOutcome::ProceedOnce
    }
}

/// Refuses everything that needs confirmation
pub struct DenyAll;

#[async_trait]
impl ApprovalHandler for DenyAll {
    async fn request_approval(&self, _request: &ConfirmationRequest) -> ApprovalOutcome {
        ApprovalOutcome::Deny
    }
}

/// Pick the handler for a configured mode; `prompt` uses the given interactive handler
pub fn handler_for_mode(
    mode: ApprovalMode,
    interactive: Arc<dyn ApprovalHandler>,
) -> Arc<dyn ApprovalHandler> {
    match mode {
        ApprovalMode::Prompt => interactive,
        ApprovalMode::Auto => Arc::new(AutoApprove),
        ApprovalMode::Deny => Arc::new(DenyAll),
    }
}
