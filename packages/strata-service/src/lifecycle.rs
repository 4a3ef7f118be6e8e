use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result, SYSTEM_ACTOR, StrataService};
use strata_domain::{LifecycleState, MemoryEntry, lifecycle};
use strata_storage::audit::AuditAction;

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleCommand {
	Archive,
	Restore,
	Protect,
	Unprotect,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LifecycleRequest {
	pub id: Uuid,
	pub command: LifecycleCommand,
	pub actor: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LifecycleResponse {
	pub id: Uuid,
	pub lifecycle_state: LifecycleState,
	pub protected: bool,
	/// `None` when the command changed nothing.
	pub audit_id: Option<Uuid>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SweepReport {
	pub scanned: u64,
	pub aged: u64,
	pub archived: u64,
	pub deleted: u64,
	pub purged: u64,
	pub failed: u64,
	pub audit_ids: Vec<Uuid>,
	/// Last entry id visited when the batch stopped early.
	pub next_cursor: Option<Uuid>,
}
impl SweepReport {
	fn absorb(&mut self, other: SweepReport) {
		self.scanned += other.scanned;
		self.aged += other.aged;
		self.archived += other.archived;
		self.deleted += other.deleted;
		self.purged += other.purged;
		self.failed += other.failed;
		self.audit_ids.extend(other.audit_ids);
		self.next_cursor = other.next_cursor;
	}
}

impl StrataService {
	pub async fn lifecycle(&self, req: LifecycleRequest) -> Result<LifecycleResponse> {
		let actor = crate::update::require_actor(&req.actor)?;
		let _guard = self.lock_entry(req.id).await?;
		let Some(mut entry) = self.store.try_load(req.id).await? else {
			return Err(Error::not_found(req.id));
		};
		let now = self.clock.now();
		let audit_id = match req.command {
			LifecycleCommand::Archive => match entry.lifecycle_state {
				LifecycleState::Deleted =>
					return Err(Error::validation(
						"REJECT_INVALID_TRANSITION",
						"Deleted entries must be restored before archiving.",
					)),
				LifecycleState::Archived => None,
				LifecycleState::Active | LifecycleState::Aging => Some(
					self.transition(&mut entry, LifecycleState::Archived, AuditAction::Archive, actor)
						.await?,
				),
			},
			LifecycleCommand::Restore => match entry.lifecycle_state {
				LifecycleState::Active => None,
				LifecycleState::Deleted if !lifecycle::within_recovery_window(&entry, &self.cfg, now) =>
					return Err(Error::NotFound {
						message: format!("Entry {} is past its recovery window.", entry.id),
					}),
				LifecycleState::Aging | LifecycleState::Archived | LifecycleState::Deleted => Some(
					self.transition(&mut entry, LifecycleState::Active, AuditAction::Restore, actor)
						.await?,
				),
			},
			LifecycleCommand::Protect | LifecycleCommand::Unprotect => {
				if entry.lifecycle_state == LifecycleState::Deleted {
					return Err(Error::not_found(entry.id));
				}

				let protect = req.command == LifecycleCommand::Protect;

				self.set_protected(&mut entry, protect, actor).await?
			},
		};

		Ok(LifecycleResponse {
			id: entry.id,
			lifecycle_state: entry.lifecycle_state,
			protected: entry.protected,
			audit_id,
		})
	}

	/// Runs the lifecycle state machine over every stored entry, one bounded batch at a time.
	pub async fn sweep(&self) -> Result<SweepReport> {
		let batch_size = self.cfg.consolidation.batch_size as usize;
		let mut report = SweepReport::default();
		let mut cursor = None;

		loop {
			let batch = self.sweep_batch(cursor, batch_size).await?;
			let next = batch.next_cursor;

			report.absorb(batch);

			match next {
				Some(id) => cursor = Some(id),
				None => break,
			}
		}

		self.flush_indexes().await?;

		tracing::info!(
			scanned = report.scanned,
			aged = report.aged,
			archived = report.archived,
			deleted = report.deleted,
			purged = report.purged,
			failed = report.failed,
			"Lifecycle sweep finished."
		);

		Ok(report)
	}

	/// Sweeps up to `limit` entries with ids after `cursor`. Each entry is handled on its own, so a
	/// sweep stopped at any point leaves every record in a valid state.
	pub async fn sweep_batch(&self, cursor: Option<Uuid>, limit: usize) -> Result<SweepReport> {
		let ids = self.store.list_ids().await?;
		let remaining = ids
			.into_iter()
			.filter(|id| cursor.map(|cursor| *id > cursor).unwrap_or(true))
			.collect::<Vec<_>>();
		let limit = limit.max(1);
		let mut report = SweepReport::default();

		for id in remaining.iter().take(limit) {
			report.scanned += 1;

			if let Err(err) = self.sweep_one(*id, &mut report).await {
				report.failed += 1;

				tracing::warn!(error = %err, entry_id = %id, "Lifecycle sweep skipped an entry.");
			}
		}

		if remaining.len() > limit {
			report.next_cursor = remaining.get(limit - 1).copied();
		}

		Ok(report)
	}

	/// Moves `entry` to `state`, persists it, and records the action. Callers hold the entry lock.
	pub(crate) async fn transition(
		&self,
		entry: &mut MemoryEntry,
		state: LifecycleState,
		action: AuditAction,
		actor: &str,
	) -> Result<Uuid> {
		let from = entry.lifecycle_state;
		let now = self.clock.now();

		entry.set_state(state, now);

		self.store.save(entry).await?;
		self.on_mutation(entry).await?;

		let record = self
			.audit_record(action, actor)
			.scope(&entry.scope)
			.sources([entry.id])
			.results([entry.id])
			.detail(serde_json::json!({ "from": from, "to": state }));
		let audit_id = self.audit(record).await?;

		tracing::info!(entry_id = %entry.id, from = ?from, to = ?state, "Lifecycle transition.");

		Ok(audit_id)
	}

	async fn set_protected(
		&self,
		entry: &mut MemoryEntry,
		protect: bool,
		actor: &str,
	) -> Result<Option<Uuid>> {
		let revive = protect && entry.lifecycle_state == LifecycleState::Aging;

		if entry.protected == protect && !revive {
			return Ok(None);
		}

		entry.protected = protect;

		if revive {
			entry.set_state(LifecycleState::Active, self.clock.now());
		}

		self.store.save(entry).await?;
		self.on_mutation(entry).await?;

		let action = if protect { AuditAction::Protect } else { AuditAction::Unprotect };
		let record = self
			.audit_record(action, actor)
			.scope(&entry.scope)
			.sources([entry.id])
			.results([entry.id]);

		Ok(Some(self.audit(record).await?))
	}

	async fn sweep_one(&self, id: Uuid, report: &mut SweepReport) -> Result<()> {
		let _guard = self.lock_entry(id).await?;
		let Some(mut entry) = self.store.try_load(id).await? else {
			return Ok(());
		};
		let now = self.clock.now();

		if lifecycle::should_purge(&entry, &self.cfg, now) {
			self.store.purge(id).await?;

			let record = self
				.audit_record(AuditAction::Purge, SYSTEM_ACTOR)
				.scope(&entry.scope)
				.sources([id]);

			report.audit_ids.push(self.audit(record).await?);
			report.purged += 1;

			tracing::info!(entry_id = %id, "Purged entry past its recovery window.");

			return Ok(());
		}

		let Some(next) = lifecycle::next_state(&entry, &self.cfg, now) else {
			return Ok(());
		};
		let action = match next {
			LifecycleState::Aging => AuditAction::Age,
			LifecycleState::Archived => AuditAction::Archive,
			LifecycleState::Deleted => AuditAction::SoftDelete,
			LifecycleState::Active => return Ok(()),
		};
		let audit_id = self.transition(&mut entry, next, action, SYSTEM_ACTOR).await?;

		report.audit_ids.push(audit_id);

		match next {
			LifecycleState::Aging => report.aged += 1,
			LifecycleState::Archived => report.archived += 1,
			LifecycleState::Deleted => report.deleted += 1,
			LifecycleState::Active => {},
		}

		Ok(())
	}
}
