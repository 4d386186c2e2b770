use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use super::client::PlatformClient;
use crate::error::{EngineError, Result};

/// Lookup table of platform clients keyed by platform tag.
///
/// Populated once at startup; lookups happen per asset during phase
/// execution.
#[derive(Default)]
pub struct PlatformRegistry {
    clients: RwLock<HashMap<String, Arc<dyn PlatformClient>>>,
}

impl PlatformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, platform: impl Into<String>, client: Arc<dyn PlatformClient>) {
        let platform = platform.into();
        info!(platform = %platform, "Platform client registered");
        self.clients.write().insert(platform, client);
    }

    pub fn get(&self, platform: &str) -> Result<Arc<dyn PlatformClient>> {
        self.clients
            .read()
            .get(platform)
            .cloned()
            .ok_or_else(|| EngineError::PlatformNotRegistered(platform.to_string()))
    }

    pub fn contains(&self, platform: &str) -> bool {
        self.clients.read().contains_key(platform)
    }

    pub fn platforms(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.clients.read().keys().cloned().collect();
        tags.sort();
        tags
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::Value;

    use super::*;
    use crate::platform::client::{InstanceState, PatchCompliance, PatchRequest, PatchSummary};

    struct StubClient;

    #[async_trait]
    impl PlatformClient for StubClient {
        async fn reimage_instance(&self, _: &str, _: &str) -> crate::error::Result<()> {
            Ok(())
        }
        async fn reboot_instance(&self, _: &str) -> crate::error::Result<()> {
            Ok(())
        }
        async fn terminate_instance(&self, _: &str) -> crate::error::Result<()> {
            Ok(())
        }
        async fn get_instance_status(&self, _: &str) -> crate::error::Result<InstanceState> {
            Ok(InstanceState::Running)
        }
        async fn apply_patches(
            &self,
            _: &str,
            _: &PatchRequest,
        ) -> crate::error::Result<PatchSummary> {
            Ok(PatchSummary::default())
        }
        async fn get_patch_status(&self, _: &str) -> crate::error::Result<PatchCompliance> {
            Ok(PatchCompliance::Compliant)
        }
        async fn get_patch_compliance_data(&self, _: &str) -> crate::error::Result<Value> {
            Ok(Value::Null)
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = PlatformRegistry::new();
        registry.register("ec2", Arc::new(StubClient));

        assert!(registry.contains("ec2"));
        assert!(registry.get("ec2").is_ok());
        assert_eq!(registry.platforms(), vec!["ec2"]);
    }

    #[test]
    fn test_unknown_platform_is_error() {
        let registry = PlatformRegistry::new();
        let err = registry.get("vsphere").unwrap_err();
        assert!(err.to_string().contains("vsphere"));
    }

    #[tokio::test]
    async fn test_default_wait_returns_on_match() {
        let client = StubClient;
        client
            .wait_for_instance_state("i-1", InstanceState::Running, Duration::from_secs(1))
            .await
            .unwrap();
    }
}
