use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::{Result, SYSTEM_ACTOR, StrataService};
use strata_domain::{MemoryEntry, ScopeRef};
use strata_storage::{audit::AuditAction, index::ScopeIndex};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RebuildReport {
	pub rebuilt_scopes: u64,
	pub indexed_entries: u64,
	/// Entry records that could not be read.
	pub skipped_entries: u64,
}

impl StrataService {
	/// Recomputes one scope's index, or every scope's, from canonical records in a single scan.
	/// A full rebuild also removes index records of scopes left without indexed entries.
	pub async fn rebuild_indexes(&self, scope: Option<ScopeRef>) -> Result<RebuildReport> {
		let mut report = RebuildReport::default();
		let mut by_scope = BTreeMap::<ScopeRef, Vec<MemoryEntry>>::new();

		for id in self.store.list_ids().await? {
			match self.store.try_load(id).await {
				Ok(Some(entry)) => {
					if scope.as_ref().map(|scope| &entry.scope == scope).unwrap_or(true) {
						by_scope.entry(entry.scope.clone()).or_default().push(entry);
					}
				},
				Ok(None) => {},
				Err(err) => {
					report.skipped_entries += 1;

					tracing::warn!(
						error = %err,
						entry_id = %id,
						"Rebuild skipped an unreadable record."
					);
				},
			}
		}

		let targets = match scope.as_ref() {
			Some(scope) => BTreeSet::from([scope.clone()]),
			None => {
				let mut targets = self.known_scopes().await?;

				targets.extend(by_scope.keys().cloned());

				targets
			},
		};

		for target in targets {
			let entries = by_scope.get(&target).map(Vec::as_slice).unwrap_or_default();
			let index = ScopeIndex::project(target.clone(), entries, self.projection());

			if index.is_empty() && scope.is_none() {
				self.evict_index(&target).await?;

				continue;
			}

			report.indexed_entries += self.install_index(index).await? as u64;
			report.rebuilt_scopes += 1;
		}

		let mut record = self.audit_record(AuditAction::IndexRebuild, SYSTEM_ACTOR).detail(
			serde_json::json!({
				"rebuilt_scopes": report.rebuilt_scopes,
				"indexed_entries": report.indexed_entries,
				"skipped_entries": report.skipped_entries,
			}),
		);

		if let Some(scope) = scope.as_ref() {
			record = record.scope(scope);
		}

		self.audit(record).await?;

		tracing::info!(
			rebuilt_scopes = report.rebuilt_scopes,
			indexed_entries = report.indexed_entries,
			skipped_entries = report.skipped_entries,
			"Index rebuild finished."
		);

		Ok(report)
	}
}
