//! The customization store
//!
//! Owns the catalog, the current selection and everything derived from it.
//! Every action leaves the selection consistent with the layer rules,
//! recomputes the locked groups from scratch, and broadcasts a snapshot.

use rand::Rng;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot, watch};

use super::catalog::{Asset, Category};
use super::rules::{self, Customization, CustomizationEntry, LockedGroups};
use super::state::{Pose, SkinTone, Stage, UiMode};
use crate::backend::RecordStore;
use crate::config::Config;
use crate::error::{ConfiguratorError, ExportError, StoreError};

/// Category whose colour drives the skin material
pub const HEAD_CATEGORY: &str = "Head";

const CATEGORY_SORT: &str = "+position";
const CATEGORY_EXPAND: &str = "colorPalette,cameraPlacement";
const ASSET_SORT: &str = "-created";

/// Error type renderers report from capability requests
pub type CapabilityError = Box<dyn std::error::Error + Send + Sync>;

/// Completion handle for a requested download
#[derive(Debug)]
pub struct PendingDownload {
    outcome: oneshot::Receiver<Result<PathBuf, ExportError>>,
}

impl PendingDownload {
    pub fn new(outcome: oneshot::Receiver<Result<PathBuf, ExportError>>) -> Self {
        Self { outcome }
    }

    /// A download that has already finished
    pub fn ready(result: Result<PathBuf, ExportError>) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result);
        Self::new(rx)
    }

    /// Wait for the export to finish and return the saved file
    pub async fn finished(self) -> Result<PathBuf, ExportError> {
        self.outcome
            .await
            .unwrap_or_else(|_| Err(ExportError::Cancelled))
    }
}

/// Actions only the rendering layer can carry out
pub trait SceneCapabilities: Send + Sync {
    /// Export the live scene as a downloadable model
    fn request_download(&self) -> Result<PendingDownload, CapabilityError>;

    /// Capture the current viewport
    fn request_screenshot(&self) -> Result<(), CapabilityError>;
}

/// Immutable view of the store after an action
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub loading: bool,
    pub customization: Customization,
    pub locked_groups: LockedGroups,
    pub current_category: Option<String>,
    pub mode: UiMode,
    pub pose: Pose,
    pub skin_color: String,
}

/// Central customization state
pub struct CustomizationStore {
    categories_collection: String,
    assets_collection: String,
    loading: bool,
    categories: Vec<Category>,
    assets: Vec<Asset>,
    customization: Customization,
    locked_groups: LockedGroups,
    current_category: Option<String>,
    stage: Stage,
    skin: watch::Sender<SkinTone>,
    snapshot_tx: broadcast::Sender<Snapshot>,
    capabilities: Option<Arc<dyn SceneCapabilities>>,
}

impl std::fmt::Debug for CustomizationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustomizationStore")
            .field("loading", &self.loading)
            .field("categories", &self.categories.len())
            .field("assets", &self.assets.len())
            .field("current_category", &self.current_category)
            .field("stage", &self.stage)
            .field("capabilities", &self.capabilities.is_some())
            .finish()
    }
}

impl CustomizationStore {
    /// Create an empty store; call [`fetch_categories`](Self::fetch_categories) to load it
    pub fn new(config: &Config) -> Self {
        let (skin, _) = watch::channel(SkinTone::from(&config.skin));
        let (snapshot_tx, _) = broadcast::channel(64);

        Self {
            categories_collection: config.backend.categories_collection.clone(),
            assets_collection: config.backend.assets_collection.clone(),
            loading: true,
            categories: Vec::new(),
            assets: Vec::new(),
            customization: Customization::new(),
            locked_groups: LockedGroups::new(),
            current_category: None,
            stage: Stage::default(),
            skin,
            snapshot_tx,
            capabilities: None,
        }
    }

    /// Load categories and assets and build the initial selection
    pub async fn fetch_categories<S>(&mut self, backend: &S) -> Result<Snapshot, ConfiguratorError>
    where
        S: RecordStore + ?Sized,
    {
        let category_records = backend
            .list_records(&self.categories_collection, CATEGORY_SORT, Some(CATEGORY_EXPAND))
            .await?;
        let asset_records = backend
            .list_records(&self.assets_collection, ASSET_SORT, None)
            .await?;

        let assets: Vec<Asset> = asset_records
            .into_iter()
            .filter_map(|record| {
                let asset = Asset::from_value(record);
                if asset.is_none() {
                    tracing::warn!("Skipping asset record that is not an object");
                }
                asset
            })
            .collect();

        let mut categories: Vec<Category> = category_records
            .into_iter()
            .filter_map(|record| {
                let category = Category::from_value(record);
                if category.is_none() {
                    tracing::warn!("Skipping category record that is not an object");
                }
                category
            })
            .collect();

        let mut customization = Customization::new();
        for category in &mut categories {
            category.assets = assets
                .iter()
                .filter(|asset| asset.group().and_then(|g| g.as_str()) == Some(category.id.as_str()))
                .cloned()
                .collect();

            let entry = CustomizationEntry {
                asset: category.default_asset().cloned(),
                color: category.default_color(),
            };
            tracing::debug!(
                "{}: {} assets, default {:?}",
                category.name,
                category.assets.len(),
                entry.asset.as_ref().map(Asset::name)
            );
            customization.insert(category.name.clone(), entry);
        }

        let customization = rules::apply_layer_rules(&customization, &categories);
        self.apply_head_color(&customization);

        tracing::info!(
            "Loaded {} categories and {} assets",
            categories.len(),
            assets.len()
        );

        self.current_category = categories.first().map(|c| c.name.clone());
        self.categories = categories;
        self.assets = assets;
        self.customization = customization;
        self.loading = false;
        self.refresh_locks();

        Ok(self.publish())
    }

    /// Equip `asset` in a category, or clear it with `None`.
    ///
    /// An explicit selection wins: other categories sharing a layer with the
    /// new asset are cleared whatever their position.
    pub fn change_asset(
        &mut self,
        category_name: &str,
        asset: Option<Asset>,
    ) -> Result<Snapshot, StoreError> {
        let category = self
            .categories
            .iter()
            .find(|c| c.name == category_name)
            .ok_or_else(|| StoreError::UnknownCategory(category_name.to_string()))?;

        let layers = asset
            .as_ref()
            .map(|a| rules::layer_ids(a, Some(category)))
            .unwrap_or_default();

        let mut next = self.customization.clone();
        next.entry(category_name.to_string()).or_default().asset = asset;

        self.customization = if layers.is_empty() {
            next
        } else {
            rules::clear_layer_conflicts(&next, &self.categories, category_name, &layers)
        };
        self.refresh_locks();

        Ok(self.publish())
    }

    /// Set the colour of the current category; the head colour is also the skin colour
    pub fn update_color(&mut self, color: &str) -> Result<Snapshot, StoreError> {
        let current = self
            .current_category
            .clone()
            .ok_or(StoreError::NoCurrentCategory)?;

        self.customization.entry(current.clone()).or_default().color = color.to_string();
        if current == HEAD_CATEGORY {
            self.update_skin(color);
        }

        Ok(self.publish())
    }

    /// Pick a random outfit
    pub fn randomize(&mut self) -> Snapshot {
        self.randomize_with(&mut rand::thread_rng())
    }

    /// Pick a random outfit from `rng`.
    ///
    /// Removable categories are left empty with probability 1/(N+1).
    pub fn randomize_with<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Snapshot {
        let mut customization = Customization::new();

        for category in &self.categories {
            let mut asset = None;
            if !category.assets.is_empty() {
                let count = category.assets.len();
                asset = category.assets.get(rng.gen_range(0..count)).cloned();
                if category.removable && rng.gen_range(0..=count) == 0 {
                    asset = None;
                }
            }

            let color = if category.color_palette.is_empty() {
                String::new()
            } else {
                category.color_palette[rng.gen_range(0..category.color_palette.len())].clone()
            };

            customization.insert(category.name.clone(), CustomizationEntry { asset, color });
        }

        let customization = rules::apply_layer_rules(&customization, &self.categories);
        self.apply_head_color(&customization);
        self.customization = customization;
        self.refresh_locks();

        self.publish()
    }

    /// Switch UI mode; customizing always returns to the idle pose
    pub fn set_mode(&mut self, mode: UiMode) -> Snapshot {
        self.stage = self.stage.with_mode(mode);
        self.publish()
    }

    pub fn set_pose(&mut self, pose: Pose) -> Snapshot {
        self.stage = self.stage.with_pose(pose);
        self.publish()
    }

    pub fn set_current_category(&mut self, name: &str) -> Result<Snapshot, StoreError> {
        if !self.categories.iter().any(|c| c.name == name) {
            return Err(StoreError::UnknownCategory(name.to_string()));
        }
        self.current_category = Some(name.to_string());
        Ok(self.publish())
    }

    /// Install the rendering layer's capabilities
    pub fn register_capabilities(&mut self, capabilities: Arc<dyn SceneCapabilities>) {
        if self.capabilities.is_some() {
            tracing::debug!("Replacing registered scene capabilities");
        }
        self.capabilities = Some(capabilities);
    }

    /// Ask the renderer to export the scene.
    ///
    /// The returned handle resolves to the saved file or the export error.
    pub fn download(&self) -> Result<PendingDownload, StoreError> {
        let capabilities = self
            .capabilities
            .as_ref()
            .ok_or(StoreError::CapabilityMissing("download"))?;
        capabilities
            .request_download()
            .map_err(|e| StoreError::Capability {
                capability: "download",
                message: e.to_string(),
            })
    }

    /// Ask the renderer to take a screenshot
    pub fn screenshot(&self) -> Result<(), StoreError> {
        let capabilities = self
            .capabilities
            .as_ref()
            .ok_or(StoreError::CapabilityMissing("screenshot"))?;
        capabilities
            .request_screenshot()
            .map_err(|e| StoreError::Capability {
                capability: "screenshot",
                message: e.to_string(),
            })
    }

    /// Subscribe to snapshots published after each action
    pub fn subscribe(&self) -> broadcast::Receiver<Snapshot> {
        self.snapshot_tx.subscribe()
    }

    /// Observe the shared skin material
    pub fn skin(&self) -> watch::Receiver<SkinTone> {
        self.skin.subscribe()
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            loading: self.loading,
            customization: self.customization.clone(),
            locked_groups: self.locked_groups.clone(),
            current_category: self.current_category.clone(),
            mode: self.stage.mode(),
            pose: self.stage.pose(),
            skin_color: self.skin.borrow().color.clone(),
        }
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    pub fn assets(&self) -> &[Asset] {
        &self.assets
    }

    pub fn customization(&self) -> &Customization {
        &self.customization
    }

    pub fn locked_groups(&self) -> &LockedGroups {
        &self.locked_groups
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    fn update_skin(&self, color: &str) {
        self.skin.send_modify(|skin| skin.color = color.to_string());
    }

    fn apply_head_color(&self, customization: &Customization) {
        let head = customization
            .get(HEAD_CATEGORY)
            .or_else(|| customization.get("head"));
        if let Some(entry) = head.filter(|e| !e.color.is_empty()) {
            self.update_skin(&entry.color);
        }
    }

    fn refresh_locks(&mut self) {
        self.locked_groups = rules::apply_locked_assets(&self.customization, &self.categories);
    }

    fn publish(&self) -> Snapshot {
        let snapshot = self.snapshot();
        let _ = self.snapshot_tx.send(snapshot.clone());
        snapshot
    }
}
