use async_trait::async_trait;

use crate::schemas::DagNode;
use crate::tools::ToolDescriptor;

/// External approver consulted once per invocation of a `dangerous` tool
/// when `require_approval` is set. Approval is per node: a plan with three
/// dangerous nodes asks three times.
#[async_trait]
pub trait ApprovalHandler: Send + Sync {
    async fn approve(&self, descriptor: &ToolDescriptor, node: &DagNode) -> bool;
}

/// Blanket approver used by embedders that gate approval elsewhere.
pub struct ApproveAll;

#[async_trait]
impl ApprovalHandler for ApproveAll {
    async fn approve(&self, _descriptor: &ToolDescriptor, _node: &DagNode) -> bool {
        true
    }
}
