//! Asset inventory contract.
//!
//! The asset processor reads and updates stored asset records (image
//! references, tags, lifecycle state) and records audit activity rows
//! through this trait. `MemoryInventory` ships for embedding and tests;
//! production deployments implement the trait over their CMDB.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::Result;

/// Stored record for one infrastructure asset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetRecord {
    pub id: String,
    pub name: String,

    #[serde(default)]
    pub platform: String,

    /// Lifecycle state as last observed/recorded ("running", "terminated").
    #[serde(default)]
    pub state: String,

    /// Image the asset currently runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_ref: Option<String>,

    /// Image a pending remediation should move the asset to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_image: Option<String>,

    #[serde(default)]
    pub tags: HashMap<String, String>,

    pub updated_at: DateTime<Utc>,
}

impl AssetRecord {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            platform: String::new(),
            state: String::new(),
            image_ref: None,
            target_image: None,
            tags: HashMap::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = platform.into();
        self
    }

    pub fn with_target_image(mut self, image: impl Into<String>) -> Self {
        self.target_image = Some(image.into());
        self
    }
}

/// Audit activity row recorded after each asset action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub asset_id: String,
    pub action: String,
    pub success: bool,
    pub detail: String,
    pub at: DateTime<Utc>,
}

impl ActivityRecord {
    pub fn new(
        asset_id: impl Into<String>,
        action: impl Into<String>,
        success: bool,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            asset_id: asset_id.into(),
            action: action.into(),
            success,
            detail: detail.into(),
            at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait AssetInventory: Send + Sync {
    async fn get_asset(&self, asset_id: &str) -> Result<Option<AssetRecord>>;

    async fn update_asset(&self, record: AssetRecord) -> Result<()>;

    async fn record_activity(&self, activity: ActivityRecord) -> Result<()>;
}

/// In-memory inventory backed by RwLock-guarded maps.
#[derive(Default)]
pub struct MemoryInventory {
    assets: RwLock<HashMap<String, AssetRecord>>,
    activities: RwLock<Vec<ActivityRecord>>,
}

impl MemoryInventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, record: AssetRecord) {
        self.assets.write().await.insert(record.id.clone(), record);
    }

    pub async fn activities(&self) -> Vec<ActivityRecord> {
        self.activities.read().await.clone()
    }
}

#[async_trait]
impl AssetInventory for MemoryInventory {
    async fn get_asset(&self, asset_id: &str) -> Result<Option<AssetRecord>> {
        Ok(self.assets.read().await.get(asset_id).cloned())
    }

    async fn update_asset(&self, mut record: AssetRecord) -> Result<()> {
        record.updated_at = Utc::now();
        self.assets.write().await.insert(record.id.clone(), record);
        Ok(())
    }

    async fn record_activity(&self, activity: ActivityRecord) -> Result<()> {
        self.activities.write().await.push(activity);
        Ok(())
    }
}
