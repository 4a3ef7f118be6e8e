//! Policy-driven resolution of stale updates and of contradicting entries.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{Error, Result, StrataService};
use strata_domain::{
	EntryField, EntryPatch, LifecycleState, MemoryEntry, Priority, ScopeRef,
	conflict_policy::{self, ConflictStrategy},
	entry, similarity,
};
use strata_storage::audit::AuditAction;

pub const DISPUTED_TAG: &str = "disputed";
const SUBJECT_FIELD: &str = "subject";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UpdateConflictRequest {
	pub id: Uuid,
	pub expected_version: u64,
	pub actor: String,
	pub patch: EntryPatch,
	/// Overrides the configured policy for this call.
	#[serde(default)]
	pub strategy: Option<ConflictStrategy>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UpdateConflictOutcome {
	Applied { version: u64 },
	Rejected { reason: String },
	Branched { branch_id: Uuid },
	Manual { current: Box<MemoryEntry>, proposed: Box<EntryPatch>, overlapping: Vec<EntryField> },
}

#[derive(Clone, Debug, Serialize)]
pub struct UpdateConflictResponse {
	pub id: Uuid,
	pub strategy: ConflictStrategy,
	#[serde(flatten)]
	pub outcome: UpdateConflictOutcome,
	pub audit_id: Option<Uuid>,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContradictionKind {
	/// Identical, non-empty tag sets.
	TagSet,
	/// Same `subject` content field.
	Subject,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Contradiction {
	pub left: Uuid,
	pub right: Uuid,
	pub kind: ContradictionKind,
	pub similarity: f32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContradictionRequest {
	pub left: Uuid,
	pub right: Uuid,
	pub actor: String,
	#[serde(default)]
	pub strategy: Option<ConflictStrategy>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ContradictionOutcome {
	Superseded { winner: Uuid, loser: Uuid },
	Flagged,
	Manual,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ContradictionResponse {
	pub strategy: ConflictStrategy,
	#[serde(flatten)]
	pub outcome: ContradictionOutcome,
	pub audit_id: Option<Uuid>,
}

impl StrataService {
	/// Settles an update whose `expected_version` may be stale. A current version applies like a
	/// plain update; otherwise the scope/type policy decides.
	pub async fn resolve_update_conflict(
		&self,
		req: UpdateConflictRequest,
	) -> Result<UpdateConflictResponse> {
		let actor = crate::update::require_actor(&req.actor)?;
		let _guard = self.lock_entry(req.id).await?;
		let current = self.peek(req.id).await?;
		let patch = self.gate_patch(&req.patch, &current)?;
		let selected =
			conflict_policy::select_strategy(&self.cfg, current.scope.scope, current.entry_type)
				.strategy;
		let involves_critical =
			current.priority == Priority::Critical || patch.priority == Some(Priority::Critical);
		let strategy = conflict_policy::effective_strategy(
			req.strategy.unwrap_or(selected),
			involves_critical,
		);

		if current.version == req.expected_version {
			let mut next = current;

			patch.apply(&mut next);

			let next = self.commit_update(next, actor, AuditAction::Update).await?;

			return Ok(UpdateConflictResponse {
				id: next.id,
				strategy,
				outcome: UpdateConflictOutcome::Applied { version: next.version },
				audit_id: None,
			});
		}

		tracing::info!(
			entry_id = %current.id,
			expected_version = req.expected_version,
			current_version = current.version,
			strategy = ?strategy,
			"Resolving version conflict."
		);

		match strategy {
			ConflictStrategy::LastWriterWins =>
				self.apply_conflicting(current, &patch, actor, strategy, req.expected_version).await,
			ConflictStrategy::AuthorityWins => {
				let incoming = conflict_policy::creator_rank(&self.cfg, actor);
				let holder = conflict_policy::creator_rank(&self.cfg, &current.updated_by);

				if incoming >= holder {
					return self
						.apply_conflicting(current, &patch, actor, strategy, req.expected_version)
						.await;
				}

				let reason = format!(
					"{actor} (rank {incoming}) is outranked by {} (rank {holder}).",
					current.updated_by
				);
				let record = self
					.audit_record(AuditAction::ConflictResolved, actor)
					.scope(&current.scope)
					.sources([current.id])
					.detail(serde_json::json!({
						"strategy": strategy,
						"expected_version": req.expected_version,
						"current_version": current.version,
						"rejected": true,
					}));
				let audit_id = self.audit(record).await?;

				Ok(UpdateConflictResponse {
					id: current.id,
					strategy,
					outcome: UpdateConflictOutcome::Rejected { reason },
					audit_id: Some(audit_id),
				})
			},
			ConflictStrategy::FieldMerge =>
				self.field_merge(current, patch, actor, req.expected_version).await,
			ConflictStrategy::BranchAndFlag => self.branch_update(current, &patch, actor).await,
			ConflictStrategy::Manual => Ok(manual_update(current, patch, Vec::new(), strategy)),
		}
	}

	/// Pairs of live entries in `scope` that talk about the same thing but disagree in content.
	pub async fn detect_contradictions(&self, scope: &ScopeRef) -> Result<Vec<Contradiction>> {
		let mut live = self
			.store
			.scan()
			.await?
			.into_iter()
			.filter(|entry| {
				&entry.scope == scope
					&& entry.lifecycle_state.is_indexed()
					&& entry.superseded_by.is_none()
			})
			.collect::<Vec<_>>();

		live.sort_by_key(|entry| entry.id);

		let threshold = self.cfg.consolidation.duplicate_similarity;
		let mut found = Vec::new();

		for (i, left) in live.iter().enumerate() {
			for right in &live[i + 1..] {
				if let Some(contradiction) = contradiction(left, right, threshold) {
					found.push(contradiction);
				}
			}
		}

		tracing::debug!(scope = %scope, found = found.len(), "Contradiction scan finished.");

		Ok(found)
	}

	pub async fn resolve_contradiction(
		&self,
		req: ContradictionRequest,
	) -> Result<ContradictionResponse> {
		let actor = crate::update::require_actor(&req.actor)?;

		if req.left == req.right {
			return Err(Error::validation(
				"REJECT_SAME_ENTRY",
				"A contradiction needs two distinct entries.",
			));
		}

		let _guards = self.lock_entries(&[req.left, req.right]).await?;
		let left = self.peek(req.left).await?;
		let right = self.peek(req.right).await?;
		let selected =
			conflict_policy::select_strategy(&self.cfg, left.scope.scope, left.entry_type).strategy;
		let strategy = conflict_policy::effective_strategy(
			req.strategy.unwrap_or(selected),
			left.priority == Priority::Critical || right.priority == Priority::Critical,
		);
		let winner_is_left = match strategy {
			ConflictStrategy::LastWriterWins => Some(newer(&left, &right)),
			ConflictStrategy::AuthorityWins => {
				let left_rank = conflict_policy::creator_rank(&self.cfg, &left.created_by);
				let right_rank = conflict_policy::creator_rank(&self.cfg, &right.created_by);

				Some(if left_rank == right_rank {
					newer(&left, &right)
				} else {
					left_rank > right_rank
				})
			},
			ConflictStrategy::BranchAndFlag => {
				let audit_id = self.flag_disputed(left, right, actor).await?;

				return Ok(ContradictionResponse {
					strategy,
					outcome: ContradictionOutcome::Flagged,
					audit_id: Some(audit_id),
				});
			},
			ConflictStrategy::FieldMerge | ConflictStrategy::Manual => None,
		};
		let (winner, loser) = match winner_is_left {
			Some(true) => (left, right),
			Some(false) => (right, left),
			None => return Ok(manual_contradiction(strategy)),
		};

		if loser.is_exempt() {
			tracing::info!(loser = %loser.id, "Protected entry cannot be superseded automatically.");

			return Ok(manual_contradiction(strategy));
		}

		let (winner, loser, audit_id) = self.supersede(winner, loser, actor, strategy).await?;

		Ok(ContradictionResponse {
			strategy,
			outcome: ContradictionOutcome::Superseded { winner, loser },
			audit_id: Some(audit_id),
		})
	}

	async fn apply_conflicting(
		&self,
		mut current: MemoryEntry,
		patch: &EntryPatch,
		actor: &str,
		strategy: ConflictStrategy,
		expected_version: u64,
	) -> Result<UpdateConflictResponse> {
		let replaced_version = current.version;

		patch.apply(&mut current);

		self.persist_revision(&mut current, actor).await?;

		let record = self
			.audit_record(AuditAction::ConflictResolved, actor)
			.scope(&current.scope)
			.sources([current.id])
			.results([current.id])
			.detail(serde_json::json!({
				"strategy": strategy,
				"expected_version": expected_version,
				"replaced_version": replaced_version,
				"version": current.version,
			}));
		let audit_id = self.audit(record).await?;

		Ok(UpdateConflictResponse {
			id: current.id,
			strategy,
			outcome: UpdateConflictOutcome::Applied { version: current.version },
			audit_id: Some(audit_id),
		})
	}

	/// Replays the patch on top of the current record when it touches none of the fields changed
	/// since the writer's base version.
	async fn field_merge(
		&self,
		current: MemoryEntry,
		patch: EntryPatch,
		actor: &str,
		expected_version: u64,
	) -> Result<UpdateConflictResponse> {
		let strategy = ConflictStrategy::FieldMerge;
		let Some(base) = self.store.load_version(current.id, expected_version).await? else {
			tracing::warn!(
				entry_id = %current.id,
				expected_version,
				"Base version snapshot is missing. Routing to manual."
			);

			return Ok(manual_update(current, patch, Vec::new(), strategy));
		};
		let ours = patch.changed_fields(&base);
		let overlapping =
			overlapping_fields(&base, &current, &patch).into_iter().collect::<Vec<_>>();

		if !overlapping.is_empty() {
			tracing::info!(
				entry_id = %current.id,
				overlapping = overlapping.len(),
				"Field merge found overlapping changes."
			);

			return Ok(manual_update(current, patch, overlapping, strategy));
		}

		let mut proposed = base;

		patch.apply(&mut proposed);

		let replaced_version = current.version;
		let mut merged = current;

		EntryPatch::apply_fields(&proposed, &mut merged, &ours);

		self.persist_revision(&mut merged, actor).await?;

		let record = self
			.audit_record(AuditAction::ConflictResolved, actor)
			.scope(&merged.scope)
			.sources([merged.id])
			.results([merged.id])
			.detail(serde_json::json!({
				"strategy": strategy,
				"expected_version": expected_version,
				"replaced_version": replaced_version,
				"version": merged.version,
				"merged_fields": ours,
			}));
		let audit_id = self.audit(record).await?;

		Ok(UpdateConflictResponse {
			id: merged.id,
			strategy,
			outcome: UpdateConflictOutcome::Applied { version: merged.version },
			audit_id: Some(audit_id),
		})
	}

	/// Stores the rejected write as a separate disputed entry and flags the original.
	async fn branch_update(
		&self,
		mut current: MemoryEntry,
		patch: &EntryPatch,
		actor: &str,
	) -> Result<UpdateConflictResponse> {
		let now = self.clock.now();
		let mut branch = current.clone();

		patch.apply(&mut branch);
		crate::gate_content_size(&self.cfg, &branch.content)?;

		branch.id = Uuid::new_v4();
		branch.created_at = now;
		branch.updated_at = now;
		branch.created_by = actor.to_string();
		branch.updated_by = actor.to_string();
		branch.tags.insert(DISPUTED_TAG.to_string());
		branch.references = vec![current.id];
		branch.access_count = 0;
		branch.last_accessed = None;
		branch.version = 1;
		branch.lifecycle_state = LifecycleState::Active;
		branch.state_changed_at = now;
		branch.activated_at = None;
		branch.protected = false;
		branch.supersedes = None;
		branch.superseded_by = None;
		branch.promoted_from = None;

		self.store.insert(&branch).await?;
		self.store.save_version(&branch).await?;
		self.on_mutation(&branch).await?;

		if current.tags.insert(DISPUTED_TAG.to_string()) {
			self.persist_revision(&mut current, actor).await?;
		}

		let record = self
			.audit_record(AuditAction::Disputed, actor)
			.scope(&current.scope)
			.sources([current.id])
			.results([current.id, branch.id])
			.detail(serde_json::json!({ "strategy": ConflictStrategy::BranchAndFlag }));
		let audit_id = self.audit(record).await?;

		tracing::info!(entry_id = %current.id, branch_id = %branch.id, "Conflicting write branched.");

		Ok(UpdateConflictResponse {
			id: current.id,
			strategy: ConflictStrategy::BranchAndFlag,
			outcome: UpdateConflictOutcome::Branched { branch_id: branch.id },
			audit_id: Some(audit_id),
		})
	}

	async fn flag_disputed(
		&self,
		left: MemoryEntry,
		right: MemoryEntry,
		actor: &str,
	) -> Result<Uuid> {
		let scope = left.scope.clone();
		let ids = [left.id, right.id];

		for mut entry in [left, right] {
			if entry.tags.insert(DISPUTED_TAG.to_string()) {
				self.persist_revision(&mut entry, actor).await?;
			}
		}

		let record = self
			.audit_record(AuditAction::Disputed, actor)
			.scope(&scope)
			.sources(ids)
			.results(ids)
			.detail(serde_json::json!({ "strategy": ConflictStrategy::BranchAndFlag }));
		let audit_id = self.audit(record).await?;

		tracing::info!(left = %ids[0], right = %ids[1], "Contradiction flagged as disputed.");

		Ok(audit_id)
	}

	/// Links `loser` to `winner` and archives it. Callers hold both entry locks.
	async fn supersede(
		&self,
		mut winner: MemoryEntry,
		mut loser: MemoryEntry,
		actor: &str,
		strategy: ConflictStrategy,
	) -> Result<(Uuid, Uuid, Uuid)> {
		if winner.supersedes != Some(loser.id) {
			winner.supersedes = Some(loser.id);

			self.persist_revision(&mut winner, actor).await?;
		}

		loser.superseded_by = Some(winner.id);
		loser.set_state(LifecycleState::Archived, self.clock.now());

		self.store.save(&loser).await?;
		self.on_mutation(&loser).await?;

		let record = self
			.audit_record(AuditAction::ConflictResolved, actor)
			.scope(&winner.scope)
			.sources([winner.id, loser.id])
			.results([winner.id])
			.detail(serde_json::json!({
				"strategy": strategy,
				"winner": winner.id,
				"loser": loser.id,
			}));
		let audit_id = self.audit(record).await?;

		tracing::info!(
			winner = %winner.id,
			loser = %loser.id,
			strategy = ?strategy,
			"Contradiction resolved."
		);

		Ok((winner.id, loser.id, audit_id))
	}
}

fn manual_update(
	current: MemoryEntry,
	patch: EntryPatch,
	overlapping: Vec<EntryField>,
	strategy: ConflictStrategy,
) -> UpdateConflictResponse {
	UpdateConflictResponse {
		id: current.id,
		strategy,
		outcome: UpdateConflictOutcome::Manual {
			current: Box::new(current),
			proposed: Box::new(patch),
			overlapping,
		},
		audit_id: None,
	}
}

fn manual_contradiction(strategy: ConflictStrategy) -> ContradictionResponse {
	ContradictionResponse { strategy, outcome: ContradictionOutcome::Manual, audit_id: None }
}

/// Newer by creation time; the larger id breaks ties.
fn newer(left: &MemoryEntry, right: &MemoryEntry) -> bool {
	(left.created_at, left.id) > (right.created_at, right.id)
}

fn subject(entry: &MemoryEntry) -> Option<String> {
	entry
		.content
		.get(SUBJECT_FIELD)
		.and_then(Value::as_str)
		.map(|subject| subject.trim().to_lowercase())
		.filter(|subject| !subject.is_empty())
}

pub(crate) fn contradiction(
	left: &MemoryEntry,
	right: &MemoryEntry,
	threshold: f32,
) -> Option<Contradiction> {
	if left.entry_type != right.entry_type {
		return None;
	}
	if left.tags.contains(DISPUTED_TAG) && right.tags.contains(DISPUTED_TAG) {
		return None;
	}

	let kind = if !left.tags.is_empty() && left.tags == right.tags {
		ContradictionKind::TagSet
	} else if subject(left).is_some() && subject(left) == subject(right) {
		ContradictionKind::Subject
	} else {
		return None;
	};
	let similarity = similarity::content_similarity(&left.content, &right.content);

	if similarity >= threshold {
		return None;
	}

	Some(Contradiction { left: left.id, right: right.id, kind, similarity })
}

/// Fields changed on both sides since `base`.
pub(crate) fn overlapping_fields(
	base: &MemoryEntry,
	current: &MemoryEntry,
	patch: &EntryPatch,
) -> BTreeSet<EntryField> {
	let theirs = entry::changed_fields(base, current);
	let ours = patch.changed_fields(base);

	theirs.intersection(&ours).cloned().collect()
}
