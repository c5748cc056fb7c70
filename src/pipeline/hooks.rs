//! Downstream triggers fired after a run

use crate::error::Result;
use crate::models::Target;
use async_trait::async_trait;

/// Work owned by other subsystems that follows a finished run.
///
/// Both calls are spawned and never awaited by the pipeline.
#[async_trait]
pub trait PostRunHooks: Send + Sync {
    /// Re-evaluate classification rules for freshly tested targets
    async fn apply_tag_rules(&self, targets: &[Target]) -> Result<()>;

    /// Refresh usage accounting for the subscription sources involved
    async fn refresh_usage(&self, sources: &[String]) -> Result<()>;
}

/// Hooks that do nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

#[async_trait]
impl PostRunHooks for NoopHooks {
    async fn apply_tag_rules(&self, _targets: &[Target]) -> Result<()> {
        Ok(())
    }

    async fn refresh_usage(&self, _sources: &[String]) -> Result<()> {
        Ok(())
    }
}
