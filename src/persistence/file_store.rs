use super::{PersistenceError, PersistencePort, PreferenceUpdate, SyncPreference};
use crate::config::Network;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

const PREFERENCES_FILE: &str = "sync_preferences.json";
const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PreferenceFile {
	schema_version: u32,
	#[serde(default)]
	selected_network: Option<Network>,
	#[serde(default)]
	networks: BTreeMap<Network, SyncPreference>,
}

impl Default for PreferenceFile {
	fn default() -> Self {
		Self {
			schema_version: SCHEMA_VERSION,
			selected_network: None,
			networks: BTreeMap::new(),
		}
	}
}

/// File-based implementation of PersistencePort
///
/// All preferences live in a single JSON document that is rewritten on every change. Writes go
/// to a temporary file that is fsynced and then renamed over the original, so a crash leaves
/// either the old or the new document on disk.
pub struct FileSyncPreferenceStore {
	path: PathBuf,
	cache: Mutex<PreferenceFile>,
}

impl FileSyncPreferenceStore {
	/// Open (or create) the preference file in `data_dir`.
	pub async fn open(data_dir: impl AsRef<Path>) -> Result<Self, PersistenceError> {
		let data_dir = data_dir.as_ref();
		tokio::fs::create_dir_all(data_dir).await?;
		let path = data_dir.join(PREFERENCES_FILE);

		let cache = match tokio::fs::read_to_string(&path).await {
			Ok(content) => {
				let file: PreferenceFile = serde_json::from_str(&content)?;
				info!(
					"Loaded sync preferences for {} network(s) from {:?}",
					file.networks.len(),
					path
				);
				file
			}
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => PreferenceFile::default(),
			Err(e) => return Err(e.into()),
		};

		Ok(Self {
			path,
			cache: Mutex::new(cache),
		})
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	async fn flush(&self, file: &PreferenceFile) -> Result<(), PersistenceError> {
		let content = serde_json::to_vec_pretty(file)?;
		let tmp_path = self.path.with_extension("json.tmp");

		let mut tmp = tokio::fs::File::create(&tmp_path).await?;
		tmp.write_all(&content).await?;
		tmp.sync_all().await?;
		drop(tmp);

		tokio::fs::rename(&tmp_path, &self.path).await?;
		debug!("Wrote sync preferences to {:?}", self.path);
		Ok(())
	}
}

#[async_trait::async_trait]
impl PersistencePort for FileSyncPreferenceStore {
	async fn load(&self, network: Network) -> Result<Option<SyncPreference>, PersistenceError> {
		Ok(self.cache.lock().await.networks.get(&network).cloned())
	}

	async fn update(
		&self,
		network: Network,
		edit: PreferenceUpdate,
	) -> Result<SyncPreference, PersistenceError> {
		let mut cache = self.cache.lock().await;
		let mut updated = cache.clone();
		let preference = updated
			.networks
			.entry(network)
			.or_insert_with(|| SyncPreference::new(network));
		edit(preference);
		preference.updated_at = Some(chrono::Utc::now());
		let preference = preference.clone();
		self.flush(&updated).await?;
		*cache = updated;
		Ok(preference)
	}

	async fn reset(&self, network: Network) -> Result<(), PersistenceError> {
		let mut cache = self.cache.lock().await;
		if !cache.networks.contains_key(&network) {
			return Ok(());
		}
		let mut updated = cache.clone();
		updated.networks.remove(&network);
		self.flush(&updated).await?;
		*cache = updated;
		info!("Reset sync preference for {}", network);
		Ok(())
	}

	async fn selected_network(&self) -> Result<Option<Network>, PersistenceError> {
		Ok(self.cache.lock().await.selected_network)
	}

	async fn set_selected_network(&self, network: Network) -> Result<(), PersistenceError> {
		let mut cache = self.cache.lock().await;
		let mut updated = cache.clone();
		updated.selected_network = Some(network);
		self.flush(&updated).await?;
		*cache = updated;
		info!("Selected network set to {}", network);
		Ok(())
	}
}
