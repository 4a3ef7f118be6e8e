use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Result, StrataService};
use strata_domain::{EntryDraft, LifecycleState, MemoryEntry, lifecycle, writegate};
use strata_storage::audit::AuditAction;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CreateResponse {
	pub id: Uuid,
	pub version: u64,
}

impl StrataService {
	pub async fn create(&self, draft: EntryDraft) -> Result<CreateResponse> {
		let entry = self.build_entry(draft)?;

		self.insert_entry(&entry).await?;

		Ok(CreateResponse { id: entry.id, version: entry.version })
	}

	pub(crate) fn build_entry(&self, draft: EntryDraft) -> Result<MemoryEntry> {
		let limit = crate::max_entry_bytes(&self.cfg);
		let gated = writegate::writegate(&draft, limit)
			.map_err(|code| crate::rejected(code, Some(&draft.content), limit))?;
		let now = self.clock.now();
		let created_by = draft.created_by.trim().to_string();

		Ok(MemoryEntry {
			id: Uuid::new_v4(),
			entry_type: draft.entry_type,
			subtype: gated.subtype,
			scope: gated.scope,
			tags: gated.tags,
			priority: draft.priority,
			confidence: draft.confidence,
			created_at: now,
			updated_at: now,
			updated_by: created_by.clone(),
			created_by,
			ttl: draft.ttl.unwrap_or_else(|| lifecycle::default_ttl(&self.cfg, draft.entry_type)),
			content: draft.content,
			references: draft.references,
			access_count: 0,
			last_accessed: None,
			version: 1,
			lifecycle_state: LifecycleState::Active,
			state_changed_at: now,
			activated_at: None,
			protected: draft.protected,
			supersedes: None,
			superseded_by: None,
			promoted_from: None,
		})
	}

	/// Durably writes a new record, then its first version snapshot, index entry, and audit record.
	pub(crate) async fn insert_entry(&self, entry: &MemoryEntry) -> Result<()> {
		self.store.insert(entry).await?;
		self.store.save_version(entry).await?;
		self.on_mutation(entry).await?;

		let record = self
			.audit_record(AuditAction::Create, &entry.created_by)
			.scope(&entry.scope)
			.results([entry.id]);

		self.audit(record).await?;

		tracing::info!(
			entry_id = %entry.id,
			scope = %entry.scope,
			entry_type = %entry.entry_type,
			"Entry created."
		);

		Ok(())
	}
}
