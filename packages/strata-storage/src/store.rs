//! File-backed entry store. Entry records are the source of truth; everything else under the
//! root can be rebuilt from them.
//!
//! Layout:
//! - `entries/<id>.json`
//! - `versions/<id>/<version>.json`
//! - `index/<scope>.<scope_id>.json`
//! - `audit.jsonl`

use std::{
	io::ErrorKind,
	path::{Path, PathBuf},
};

use serde::{Serialize, de::DeserializeOwned};
use tokio::{
	fs,
	sync::{Mutex, MutexGuard},
};
use uuid::Uuid;

use strata_domain::{MemoryEntry, ScopeRef};

use crate::{Error, Result, index::ScopeIndex};

const ENTRIES_DIR: &str = "entries";
const VERSIONS_DIR: &str = "versions";
const INDEX_DIR: &str = "index";
pub(crate) const AUDIT_FILE: &str = "audit.jsonl";

pub struct Store {
	root: PathBuf,
	stripes: Vec<Mutex<()>>,
	pub(crate) audit_lock: Mutex<()>,
}
impl Store {
	pub async fn open(cfg: &strata_config::Storage) -> Result<Self> {
		if cfg.lock_stripes == 0 {
			return Err(Error::InvalidArgument("lock_stripes must be greater than zero.".to_string()));
		}

		let root = cfg.root.clone();

		for dir in [ENTRIES_DIR, VERSIONS_DIR, INDEX_DIR] {
			fs::create_dir_all(root.join(dir)).await?;
		}

		let stripes = (0..cfg.lock_stripes).map(|_| Mutex::new(())).collect();

		Ok(Self { root, stripes, audit_lock: Mutex::new(()) })
	}

	pub fn root(&self) -> &Path {
		&self.root
	}

	/// Serializes writers of one entry. Unrelated entries usually land on different stripes.
	pub async fn lock(&self, id: Uuid) -> MutexGuard<'_, ()> {
		self.stripes[self.stripe(id)].lock().await
	}

	/// Locks several entries at once, always in stripe order so two callers cannot deadlock.
	pub async fn lock_many(&self, ids: &[Uuid]) -> Vec<MutexGuard<'_, ()>> {
		let mut stripes = ids.iter().map(|id| self.stripe(*id)).collect::<Vec<_>>();

		stripes.sort_unstable();
		stripes.dedup();

		let mut guards = Vec::with_capacity(stripes.len());

		for stripe in stripes {
			guards.push(self.stripes[stripe].lock().await);
		}

		guards
	}

	pub async fn load(&self, id: Uuid) -> Result<MemoryEntry> {
		self.try_load(id).await?.ok_or_else(|| Error::NotFound(format!("entry {id}")))
	}

	pub async fn try_load(&self, id: Uuid) -> Result<Option<MemoryEntry>> {
		read_json(&self.entry_path(id)).await
	}

	/// Writes a brand-new entry. Fails if the id is already taken.
	pub async fn insert(&self, entry: &MemoryEntry) -> Result<()> {
		if fs::try_exists(self.entry_path(entry.id)).await? {
			return Err(Error::Conflict(format!("entry {} already exists", entry.id)));
		}

		self.save(entry).await
	}

	/// Overwrites the current record atomically.
	pub async fn save(&self, entry: &MemoryEntry) -> Result<()> {
		write_json_atomic(&self.entry_path(entry.id), entry).await
	}

	/// Keeps the state of `entry` at its current version for later field merges.
	pub async fn save_version(&self, entry: &MemoryEntry) -> Result<()> {
		let dir = self.root.join(VERSIONS_DIR).join(entry.id.to_string());

		fs::create_dir_all(&dir).await?;

		write_json_atomic(&dir.join(format!("{}.json", entry.version)), entry).await
	}

	pub async fn load_version(&self, id: Uuid, version: u64) -> Result<Option<MemoryEntry>> {
		let path =
			self.root.join(VERSIONS_DIR).join(id.to_string()).join(format!("{version}.json"));

		read_json(&path).await
	}

	/// Removes the entry record and all of its version snapshots.
	pub async fn purge(&self, id: Uuid) -> Result<()> {
		remove_if_exists(&self.entry_path(id)).await?;

		match fs::remove_dir_all(self.root.join(VERSIONS_DIR).join(id.to_string())).await {
			Ok(()) => Ok(()),
			Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
			Err(err) => Err(err.into()),
		}
	}

	pub async fn list_ids(&self) -> Result<Vec<Uuid>> {
		let mut ids = Vec::new();
		let mut dir = fs::read_dir(self.root.join(ENTRIES_DIR)).await?;

		while let Some(item) = dir.next_entry().await? {
			let name = item.file_name();
			let Some(stem) = name.to_str().and_then(|name| name.strip_suffix(".json")) else {
				continue;
			};

			if let Ok(id) = Uuid::parse_str(stem) {
				ids.push(id);
			}
		}

		ids.sort_unstable();

		Ok(ids)
	}

	/// Loads every readable entry in id order. Unreadable records are skipped and logged.
	pub async fn scan(&self) -> Result<Vec<MemoryEntry>> {
		let mut entries = Vec::new();

		for id in self.list_ids().await? {
			match self.try_load(id).await {
				Ok(Some(entry)) => entries.push(entry),
				Ok(None) => {},
				Err(err) => {
					tracing::warn!(error = %err, entry_id = %id, "Skipping unreadable entry record.");
				},
			}
		}

		Ok(entries)
	}

	pub async fn load_index(&self, scope: &ScopeRef) -> Result<Option<ScopeIndex>> {
		let index: Option<ScopeIndex> = read_json(&self.index_path(scope)).await?;

		Ok(index.map(ScopeIndex::reindexed))
	}

	pub async fn save_index(&self, index: &ScopeIndex) -> Result<()> {
		write_json_atomic(&self.index_path(&index.scope), index).await
	}

	pub async fn remove_index(&self, scope: &ScopeRef) -> Result<()> {
		remove_if_exists(&self.index_path(scope)).await
	}

	pub async fn list_index_scopes(&self) -> Result<Vec<ScopeRef>> {
		let mut scopes = Vec::new();
		let mut dir = fs::read_dir(self.root.join(INDEX_DIR)).await?;

		while let Some(item) = dir.next_entry().await? {
			let name = item.file_name();

			if let Some(scope) = name
				.to_str()
				.and_then(|name| name.strip_suffix(".json"))
				.and_then(ScopeRef::parse_key)
			{
				scopes.push(scope);
			}
		}

		scopes.sort();

		Ok(scopes)
	}

	fn stripe(&self, id: Uuid) -> usize {
		(id.as_u128() % self.stripes.len() as u128) as usize
	}

	fn entry_path(&self, id: Uuid) -> PathBuf {
		self.root.join(ENTRIES_DIR).join(format!("{id}.json"))
	}

	fn index_path(&self, scope: &ScopeRef) -> PathBuf {
		self.root.join(INDEX_DIR).join(format!("{}.json", scope.key()))
	}
}

async fn read_json<T>(path: &Path) -> Result<Option<T>>
where
	T: DeserializeOwned,
{
	match fs::read(path).await {
		Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
		Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
		Err(err) => Err(err.into()),
	}
}

/// Writes to a sibling temporary file first, then renames over the target, so readers never see a
/// torn record.
async fn write_json_atomic<T>(path: &Path, value: &T) -> Result<()>
where
	T: Serialize,
{
	let bytes = serde_json::to_vec_pretty(value)?;
	let tmp = path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));

	fs::write(&tmp, &bytes).await?;

	if let Err(err) = fs::rename(&tmp, path).await {
		let _ = fs::remove_file(&tmp).await;

		return Err(err.into());
	}

	Ok(())
}

async fn remove_if_exists(path: &Path) -> Result<()> {
	match fs::remove_file(path).await {
		Ok(()) => Ok(()),
		Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
		Err(err) => Err(err.into()),
	}
}
