//! cc-tools: Built-in tools for cc-agent
//!
//! This crate provides the tools exposed to the model: shell commands and
//! sub-agent delegation.

use std::sync::Arc;

use cc_core::agents::{ExecutorConfig, ProcessSpawner, TaskDelegator};
use cc_core::ToolManager;

pub mod bash;
pub mod delegate;
pub mod spawn;

pub use bash::BashTool;
pub use delegate::DelegateTaskTool;
pub use spawn::SpawnSubAgentTool;

/// Register the general-purpose built-in tools
pub fn register_default_tools(manager: &mut ToolManager) {
    manager.register(Arc::new(BashTool));
}

/// Register `delegate_task` and `spawn_sub_agent`.
///
/// Sub-agents themselves should not get these, or delegation could recurse.
pub fn register_agent_tools(
    manager: &mut ToolManager,
    spawner: Arc<dyn ProcessSpawner>,
    config: ExecutorConfig,
) -> Arc<TaskDelegator> {
    let delegator = Arc::new(TaskDelegator::new(spawner.clone(), config.clone()));
    manager.register(Arc::new(DelegateTaskTool::new(delegator.clone())));
    manager.register(Arc::new(SpawnSubAgentTool::new(spawner, config)));
    delegator
}
