//! In-memory cache of per-scope indexes, backed by the index records under the store root.

use std::collections::BTreeSet;

use crate::{Result, StrataService};
use strata_domain::{MemoryEntry, ScopeRef};
use strata_storage::index::ScopeIndex;

impl StrataService {
	/// Mirrors a committed mutation into the scope index and persists the index record.
	pub async fn on_mutation(&self, entry: &MemoryEntry) -> Result<()> {
		self.ensure_index(&entry.scope).await?;

		let projection = self.projection();
		let mut indexes = self.indexes.write().await;
		let Some(index) = indexes.get_mut(&entry.scope) else {
			return Ok(());
		};

		index.apply(entry, projection);

		self.store.save_index(index).await?;

		Ok(())
	}

	/// Access bookkeeping only touches the cached copy. The record is written on the next flush.
	pub(crate) async fn on_access(&self, entry: &MemoryEntry) -> Result<()> {
		self.ensure_index(&entry.scope).await?;

		let projection = self.projection();
		let mut indexes = self.indexes.write().await;

		if let Some(index) = indexes.get_mut(&entry.scope) {
			index.apply(entry, projection);
			self.dirty_scopes.lock().await.insert(entry.scope.clone());
		}

		Ok(())
	}

	/// Writes every index whose cached copy changed since it was last persisted.
	pub async fn flush_indexes(&self) -> Result<usize> {
		let dirty = {
			let mut dirty = self.dirty_scopes.lock().await;

			std::mem::take(&mut *dirty)
		};
		let indexes = self.indexes.read().await;
		let mut flushed = 0;

		for scope in dirty {
			if let Some(index) = indexes.get(&scope) {
				self.store.save_index(index).await?;

				flushed += 1;
			}
		}

		Ok(flushed)
	}

	/// Recomputes one scope's index from canonical records and swaps it in. Returns the number of
	/// entries indexed.
	pub async fn rebuild(&self, scope: &ScopeRef) -> Result<usize> {
		let entries = self.store.scan().await?;
		let index = ScopeIndex::project(scope.clone(), &entries, self.projection());

		self.install_index(index).await
	}

	pub(crate) async fn install_index(&self, index: ScopeIndex) -> Result<usize> {
		let indexed = index.len();
		let scope = index.scope.clone();
		let mut indexes = self.indexes.write().await;

		self.store.save_index(&index).await?;
		indexes.insert(scope.clone(), index);
		self.dirty_scopes.lock().await.remove(&scope);

		tracing::info!(scope = %scope, indexed, "Scope index rebuilt.");

		Ok(indexed)
	}

	/// Forgets a scope that no longer holds any indexed entry.
	pub(crate) async fn evict_index(&self, scope: &ScopeRef) -> Result<()> {
		let mut indexes = self.indexes.write().await;

		self.store.remove_index(scope).await?;
		indexes.remove(scope);
		self.dirty_scopes.lock().await.remove(scope);

		tracing::info!(scope = %scope, "Empty scope index removed.");

		Ok(())
	}

	/// Scopes that currently have an index, cached or on disk.
	pub async fn known_scopes(&self) -> Result<BTreeSet<ScopeRef>> {
		let mut scopes = self.store.list_index_scopes().await?.into_iter().collect::<BTreeSet<_>>();

		scopes.extend(self.indexes.read().await.keys().cloned());

		Ok(scopes)
	}

	pub async fn scope_len(&self, scope: &ScopeRef) -> Result<usize> {
		self.ensure_index(scope).await?;

		Ok(self.indexes.read().await.get(scope).map(ScopeIndex::len).unwrap_or(0))
	}

	/// Runs `f` against the scope's index under a read lock.
	pub(crate) async fn with_index<F, T>(&self, scope: &ScopeRef, f: F) -> Result<T>
	where
		F: FnOnce(&ScopeIndex) -> T,
	{
		self.ensure_index(scope).await?;

		let indexes = self.indexes.read().await;

		match indexes.get(scope) {
			Some(index) => Ok(f(index)),
			None => Ok(f(&ScopeIndex::empty(scope.clone()))),
		}
	}

	/// Loads the scope's index into the cache, rebuilding it when no record exists.
	async fn ensure_index(&self, scope: &ScopeRef) -> Result<()> {
		if self.indexes.read().await.contains_key(scope) {
			return Ok(());
		}

		match self.store.load_index(scope).await {
			Ok(Some(index)) => {
				self.indexes.write().await.entry(scope.clone()).or_insert(index);
			},
			Ok(None) => {
				self.rebuild(scope).await?;
			},
			Err(err) => {
				tracing::warn!(error = %err, scope = %scope, "Unreadable index record. Rebuilding.");

				self.rebuild(scope).await?;
			},
		}

		Ok(())
	}
}
