use std::sync::Arc;

use async_trait::async_trait;

use crate::artifact::SharedCache;
use crate::bundler::{BuildResult, Plugin};
use crate::error::Result;
use crate::host::HostCoordinator;

/// Drives the [`HostCoordinator`] from build hooks
pub struct HostApply {
    coordinator: Arc<HostCoordinator>,
    cache: SharedCache,
}

impl HostApply {
    pub fn new(coordinator: Arc<HostCoordinator>, cache: SharedCache) -> Self {
        Self { coordinator, cache }
    }
}

#[async_trait]
impl Plugin for HostApply {
    fn name(&self) -> &str {
        "host-apply"
    }

    async fn on_start(&self) -> Result<()> {
        self.coordinator.register().await;
        Ok(())
    }

    async fn on_end(&self, result: &BuildResult) -> Result<()> {
        if !result.succeeded() {
            return Ok(());
        }
        let changed = self.cache.lock().await.has_changes();
        self.coordinator.apply_changes(changed).await;
        Ok(())
    }
}
