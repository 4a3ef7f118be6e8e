//! Per-scope lookup structure derived from entry records.
//!
//! An index only ever holds active and aging entries. It carries no timestamps of its own, so
//! rebuilding it from the same records always yields the same bytes.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use strata_domain::{EntryType, LifecycleState, MemoryEntry, Priority, ScopeRef, similarity};

/// Limits applied when projecting an entry into its index summary.
#[derive(Clone, Copy, Debug)]
pub struct Projection {
	pub summary_max_chars: usize,
	pub max_content_terms: usize,
}
impl Projection {
	pub fn from_config(cfg: &strata_config::Memory) -> Self {
		Self {
			summary_max_chars: cfg.summary_max_chars as usize,
			max_content_terms: cfg.max_content_terms as usize,
		}
	}
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct EntrySummary {
	pub id: Uuid,
	#[serde(rename = "type")]
	pub entry_type: EntryType,
	pub subtype: String,
	pub tags: BTreeSet<String>,
	pub priority: Priority,
	#[serde(with = "time::serde::rfc3339")]
	pub created_at: OffsetDateTime,
	pub created_by: String,
	pub lifecycle_state: LifecycleState,
	pub title: Option<String>,
	pub summary: String,
	pub content_terms: Vec<String>,
	pub content_bytes: usize,
	pub access_count: u64,
	pub version: u64,
	pub fingerprint: String,
}
impl EntrySummary {
	pub fn project(entry: &MemoryEntry, projection: Projection) -> Self {
		let content_terms = similarity::terms(&entry.content_text())
			.into_iter()
			.take(projection.max_content_terms)
			.collect();

		Self {
			id: entry.id,
			entry_type: entry.entry_type,
			subtype: entry.subtype.clone(),
			tags: entry.tags.clone(),
			priority: entry.priority,
			created_at: entry.created_at,
			created_by: entry.created_by.clone(),
			lifecycle_state: entry.lifecycle_state,
			title: entry.title().map(str::to_string),
			summary: entry.summary(projection.summary_max_chars),
			content_terms,
			content_bytes: entry.content_bytes(),
			access_count: entry.access_count,
			version: entry.version,
			fingerprint: similarity::content_fingerprint(&entry.content),
		}
	}
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ScopeIndex {
	pub scope: ScopeRef,
	pub entries: BTreeMap<Uuid, EntrySummary>,
	#[serde(skip)]
	by_tag: BTreeMap<String, BTreeSet<Uuid>>,
	#[serde(skip)]
	by_type: BTreeMap<EntryType, BTreeSet<Uuid>>,
}
impl ScopeIndex {
	pub fn empty(scope: ScopeRef) -> Self {
		Self { scope, entries: BTreeMap::new(), by_tag: BTreeMap::new(), by_type: BTreeMap::new() }
	}

	/// Builds a fresh index for `scope` from canonical records. Records of other scopes and records
	/// that are not active or aging are ignored.
	pub fn project<'a, I>(scope: ScopeRef, entries: I, projection: Projection) -> Self
	where
		I: IntoIterator<Item = &'a MemoryEntry>,
	{
		let mut index = Self::empty(scope);

		for entry in entries {
			index.apply(entry, projection);
		}

		index
	}

	/// Restores the lookup maps after deserialization.
	pub fn reindexed(mut self) -> Self {
		self.by_tag.clear();
		self.by_type.clear();

		let summaries = self.entries.values().cloned().collect::<Vec<_>>();

		for summary in &summaries {
			self.link(summary);
		}

		self
	}

	/// Upserts or removes `entry` so the index mirrors its current record. Idempotent.
	pub fn apply(&mut self, entry: &MemoryEntry, projection: Projection) {
		if entry.scope != self.scope {
			return;
		}

		self.remove(entry.id);

		if entry.lifecycle_state.is_indexed() {
			let summary = EntrySummary::project(entry, projection);

			self.link(&summary);
			self.entries.insert(summary.id, summary);
		}
	}

	pub fn remove(&mut self, id: Uuid) -> Option<EntrySummary> {
		let summary = self.entries.remove(&id)?;

		for tag in &summary.tags {
			if let Some(ids) = self.by_tag.get_mut(tag) {
				ids.remove(&id);

				if ids.is_empty() {
					self.by_tag.remove(tag);
				}
			}
		}
		if let Some(ids) = self.by_type.get_mut(&summary.entry_type) {
			ids.remove(&id);

			if ids.is_empty() {
				self.by_type.remove(&summary.entry_type);
			}
		}

		Some(summary)
	}

	pub fn get(&self, id: Uuid) -> Option<&EntrySummary> {
		self.entries.get(&id)
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	/// Entries of the given types, or all entries when `types` is empty.
	pub fn of_types(&self, types: &BTreeSet<EntryType>) -> Vec<&EntrySummary> {
		if types.is_empty() {
			return self.entries.values().collect();
		}

		let mut ids = BTreeSet::new();

		for entry_type in types {
			if let Some(found) = self.by_type.get(entry_type) {
				ids.extend(found.iter().copied());
			}
		}

		ids.iter().filter_map(|id| self.entries.get(id)).collect()
	}

	pub fn tagged(&self, tag: &str) -> BTreeSet<Uuid> {
		self.by_tag.get(tag).cloned().unwrap_or_default()
	}

	fn link(&mut self, summary: &EntrySummary) {
		for tag in &summary.tags {
			self.by_tag.entry(tag.clone()).or_default().insert(summary.id);
		}

		self.by_type.entry(summary.entry_type).or_default().insert(summary.id);
	}
}
