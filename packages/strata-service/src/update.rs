use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result, StrataService};
use strata_domain::{EntryPatch, MemoryEntry, writegate};
use strata_storage::audit::AuditAction;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UpdateRequest {
	pub id: Uuid,
	pub expected_version: u64,
	pub actor: String,
	pub patch: EntryPatch,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UpdateResponse {
	pub id: Uuid,
	pub version: u64,
}

impl StrataService {
	/// Applies `patch` only when the stored version still equals `expected_version`.
	pub async fn update(&self, req: UpdateRequest) -> Result<UpdateResponse> {
		let actor = require_actor(&req.actor)?;
		let _guard = self.lock_entry(req.id).await?;
		let current = self.peek(req.id).await?;
		let patch = self.gate_patch(&req.patch, &current)?;

		if current.version != req.expected_version {
			tracing::info!(
				entry_id = %req.id,
				expected_version = req.expected_version,
				current_version = current.version,
				"Rejected stale update."
			);

			return Err(Error::Conflict {
				current: Box::new(current),
				attempted: Box::new(patch),
				expected_version: req.expected_version,
			});
		}

		let mut next = current;

		patch.apply(&mut next);

		let next = self.commit_update(next, actor, AuditAction::Update).await?;

		Ok(UpdateResponse { id: next.id, version: next.version })
	}

	pub(crate) fn gate_patch(&self, patch: &EntryPatch, entry: &MemoryEntry) -> Result<EntryPatch> {
		let limit = crate::max_entry_bytes(&self.cfg);

		writegate::gate_patch(patch, entry.entry_type, limit)
			.map_err(|code| crate::rejected(code, patch.content.as_ref(), limit))
	}

	/// Bumps the version of an already-modified record, persists it, and records `action`. Callers
	/// hold the entry lock.
	pub(crate) async fn commit_update(
		&self,
		mut entry: MemoryEntry,
		actor: &str,
		action: AuditAction,
	) -> Result<MemoryEntry> {
		self.persist_revision(&mut entry, actor).await?;

		let record = self
			.audit_record(action, actor)
			.scope(&entry.scope)
			.results([entry.id])
			.detail(serde_json::json!({ "version": entry.version }));

		self.audit(record).await?;

		tracing::info!(entry_id = %entry.id, version = entry.version, "Entry updated.");

		Ok(entry)
	}

	/// Writes `entry` as its next version: record, snapshot, then index.
	pub(crate) async fn persist_revision(&self, entry: &mut MemoryEntry, actor: &str) -> Result<()> {
		crate::gate_content_size(&self.cfg, &entry.content)?;

		entry.version += 1;
		entry.updated_at = self.clock.now();
		entry.updated_by = actor.to_string();

		self.store.save(entry).await?;
		self.store.save_version(entry).await?;
		self.on_mutation(entry).await?;

		Ok(())
	}
}

pub(crate) fn require_actor(actor: &str) -> Result<&str> {
	let actor = actor.trim();

	if actor.is_empty() {
		return Err(Error::validation("REJECT_EMPTY_ACTOR", "actor must be non-empty."));
	}

	Ok(actor)
}
