use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result, StrataService};
use strata_domain::LifecycleState;
use strata_storage::audit::AuditAction;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeleteRequest {
	pub id: Uuid,
	pub actor: String,
	#[serde(default)]
	pub hard: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeleteResponse {
	pub id: Uuid,
	pub hard: bool,
	/// `None` when the entry was already soft-deleted.
	pub audit_id: Option<Uuid>,
}

impl StrataService {
	/// Soft delete keeps the payload for the recovery window. Hard delete purges the record and its
	/// version history.
	pub async fn delete(&self, req: DeleteRequest) -> Result<DeleteResponse> {
		let actor = crate::update::require_actor(&req.actor)?;
		let _guard = self.lock_entry(req.id).await?;
		let Some(mut entry) = self.store.try_load(req.id).await? else {
			return Err(Error::not_found(req.id));
		};

		if req.hard {
			self.store.purge(entry.id).await?;

			entry.set_state(LifecycleState::Deleted, self.clock.now());

			self.on_mutation(&entry).await?;

			let record = self
				.audit_record(AuditAction::HardDelete, actor)
				.scope(&entry.scope)
				.sources([entry.id])
				.detail(serde_json::json!({
					"type": entry.entry_type,
					"version": entry.version,
					"tags": entry.tags,
				}));
			let audit_id = self.audit(record).await?;

			tracing::info!(entry_id = %entry.id, "Entry purged.");

			return Ok(DeleteResponse { id: entry.id, hard: true, audit_id: Some(audit_id) });
		}
		if entry.lifecycle_state == LifecycleState::Deleted {
			return Ok(DeleteResponse { id: entry.id, hard: false, audit_id: None });
		}

		let audit_id =
			self.transition(&mut entry, LifecycleState::Deleted, AuditAction::SoftDelete, actor).await?;

		Ok(DeleteResponse { id: entry.id, hard: false, audit_id: Some(audit_id) })
	}
}
