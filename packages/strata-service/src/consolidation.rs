//! Batch maintenance of one scope: duplicate merge, episodic summarization, promotion to wider
//! scopes, then staleness archival.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::{Error, Result, SYSTEM_ACTOR, StrataService};
use strata_config::Config;
use strata_domain::{
	EntryType, LifecycleState, MemoryEntry, ScopeKind, ScopeRef, entry::truncate_chars, similarity,
};
use strata_storage::audit::AuditAction;

pub const SUMMARIZED_TAG: &str = "summarized";
const DECISION_SUBTYPE: &str = "decision";

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsolidationTrigger {
	#[default]
	Explicit,
	Threshold,
	Schedule,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConsolidationRequest {
	#[serde(flatten)]
	pub scope: ScopeRef,
	/// Resume after this entry id.
	#[serde(default)]
	pub cursor: Option<Uuid>,
	#[serde(default)]
	pub trigger: ConsolidationTrigger,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConsolidationFailureItem {
	pub entry_id: Uuid,
	pub stage: String,
	pub message: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConsolidationReport {
	pub scope: ScopeRef,
	pub trigger: ConsolidationTrigger,
	pub processed: u64,
	pub merged: u64,
	pub summarized: u64,
	pub promoted: u64,
	pub archived: u64,
	pub failures: Vec<ConsolidationFailureItem>,
	pub audit_ids: Vec<Uuid>,
	/// Set when entries remain after this batch.
	pub next_cursor: Option<Uuid>,
}

#[derive(Clone, Copy, Debug)]
enum Stage {
	Merge,
	Summarize,
	Promote,
	Stale,
}
impl Stage {
	fn as_str(self) -> &'static str {
		match self {
			Self::Merge => "merge",
			Self::Summarize => "summarize",
			Self::Promote => "promote",
			Self::Stale => "stale",
		}
	}
}

impl StrataService {
	pub async fn consolidate(&self, req: ConsolidationRequest) -> Result<ConsolidationReport> {
		let now = self.clock.now();
		let batch_size = (self.cfg.consolidation.batch_size as usize).max(1);
		let live = self
			.store
			.scan()
			.await?
			.into_iter()
			.filter(|entry| {
				entry.scope == req.scope
					&& entry.lifecycle_state.is_indexed()
					&& entry.superseded_by.is_none()
			})
			.map(|entry| (entry.id, entry))
			.collect::<BTreeMap<_, _>>();
		let pending = live
			.keys()
			.filter(|id| req.cursor.map(|cursor| **id > cursor).unwrap_or(true))
			.copied()
			.collect::<Vec<_>>();
		let batch = pending.iter().take(batch_size).copied().collect::<Vec<_>>();
		let next_cursor =
			if pending.len() > batch_size { batch.last().copied() } else { None };
		let mut report = ConsolidationReport {
			scope: req.scope.clone(),
			trigger: req.trigger,
			processed: batch.len() as u64,
			merged: 0,
			summarized: 0,
			promoted: 0,
			archived: 0,
			failures: Vec::new(),
			audit_ids: Vec::new(),
			next_cursor,
		};
		let mut retired = BTreeSet::new();

		for id in &batch {
			if retired.contains(id) {
				continue;
			}

			let Some(entry) = live.get(id) else { continue };

			if consolidation_exempt(entry, &self.cfg, now) {
				continue;
			}

			let partner = live.values().find(|other| {
				other.id != entry.id
					&& !retired.contains(&other.id)
					&& !consolidation_exempt(other, &self.cfg, now)
					&& is_duplicate(entry, other, &self.cfg)
			});
			let Some(partner) = partner else { continue };

			match self.merge_pair(entry.id, partner.id).await {
				Ok(Some((loser, audit_id))) => {
					retired.insert(loser);
					report.merged += 1;
					report.audit_ids.push(audit_id);
				},
				Ok(None) => {},
				Err(err) => self.record_failure(&mut report, *id, Stage::Merge, err).await,
			}
		}

		for id in &batch {
			if retired.contains(id) {
				continue;
			}

			match self.summarize_entry(*id, now).await {
				Ok(Some(audit_id)) => {
					report.summarized += 1;
					report.audit_ids.push(audit_id);
				},
				Ok(None) => {},
				Err(err) => self.record_failure(&mut report, *id, Stage::Summarize, err).await,
			}
		}

		for id in &batch {
			if retired.contains(id) {
				continue;
			}

			match self.promote_entry(*id, now).await {
				Ok(audit_ids) => {
					report.promoted += audit_ids.len() as u64;
					report.audit_ids.extend(audit_ids);
				},
				Err(err) => self.record_failure(&mut report, *id, Stage::Promote, err).await,
			}
		}

		for id in &batch {
			if retired.contains(id) {
				continue;
			}

			match self.archive_if_stale(*id, now).await {
				Ok(Some(audit_id)) => {
					retired.insert(*id);
					report.archived += 1;
					report.audit_ids.push(audit_id);
				},
				Ok(None) => {},
				Err(err) => self.record_failure(&mut report, *id, Stage::Stale, err).await,
			}
		}

		tracing::info!(
			scope = %report.scope,
			trigger = ?report.trigger,
			processed = report.processed,
			merged = report.merged,
			summarized = report.summarized,
			promoted = report.promoted,
			archived = report.archived,
			failed = report.failures.len(),
			"Consolidation batch finished."
		);

		Ok(report)
	}

	/// Scopes whose live entry count is above `consolidation.scope_entry_threshold`.
	pub async fn scopes_over_threshold(&self) -> Result<Vec<ScopeRef>> {
		let threshold = self.cfg.consolidation.scope_entry_threshold as usize;
		let mut out = Vec::new();

		for scope in self.known_scopes().await? {
			if self.scope_len(&scope).await? > threshold {
				out.push(scope);
			}
		}

		Ok(out)
	}

	/// Keeps the newer of two duplicates. Returns the retired id and the audit id, or `None` when
	/// either side changed since the batch was planned.
	async fn merge_pair(&self, a: Uuid, b: Uuid) -> Result<Option<(Uuid, Uuid)>> {
		let _guards = self.lock_entries(&[a, b]).await?;
		let left = self.store.try_load(a).await?;
		let right = self.store.try_load(b).await?;
		let (Some(left), Some(right)) = (left, right) else {
			return Ok(None);
		};

		if !is_mergeable(&left) || !is_mergeable(&right) {
			return Ok(None);
		}

		let similarity = similarity::content_similarity(&left.content, &right.content);
		let tag_overlap = similarity::jaccard(&left.tags, &right.tags);
		let (mut winner, mut loser) = if newer_first(&left, &right) {
			(left, right)
		} else {
			(right, left)
		};

		// A run that failed after writing the winner left it linked already.
		if winner.supersedes != Some(loser.id) {
			absorb(&mut winner, &loser);

			self.persist_revision(&mut winner, SYSTEM_ACTOR).await?;
		}

		loser.superseded_by = Some(winner.id);
		loser.set_state(LifecycleState::Archived, self.clock.now());

		self.store.save(&loser).await?;
		self.on_mutation(&loser).await?;

		let record = self
			.audit_record(AuditAction::Merge, SYSTEM_ACTOR)
			.scope(&winner.scope)
			.sources([loser.id, winner.id])
			.results([winner.id])
			.detail(serde_json::json!({
				"similarity": similarity,
				"tag_overlap": tag_overlap,
				"winner_version": winner.version,
			}));
		let audit_id = self.audit(record).await?;

		tracing::info!(winner = %winner.id, loser = %loser.id, "Merged duplicate entries.");

		Ok(Some((loser.id, audit_id)))
	}

	async fn summarize_entry(&self, id: Uuid, now: OffsetDateTime) -> Result<Option<Uuid>> {
		let _guard = self.lock_entry(id).await?;
		let Some(mut entry) = self.store.try_load(id).await? else { return Ok(None) };
		let rules = &self.cfg.consolidation;

		if entry.entry_type != EntryType::Episodic
			|| !is_mergeable(&entry)
			|| consolidation_exempt(&entry, &self.cfg, now)
			|| entry.tags.contains(SUMMARIZED_TAG)
			|| now - entry.created_at < Duration::days(rules.summarize_after_days)
			|| entry.content_bytes() < rules.summarize_min_bytes as usize
		{
			return Ok(None);
		}

		let from_bytes = entry.content_bytes();

		entry.content = summarize_episode(&entry, &self.cfg);
		entry.tags.insert(SUMMARIZED_TAG.to_string());

		self.persist_revision(&mut entry, SYSTEM_ACTOR).await?;

		let record = self
			.audit_record(AuditAction::Summarize, SYSTEM_ACTOR)
			.scope(&entry.scope)
			.sources([entry.id])
			.results([entry.id])
			.detail(serde_json::json!({
				"from_bytes": from_bytes,
				"to_bytes": entry.content_bytes(),
			}));

		Ok(Some(self.audit(record).await?))
	}

	async fn promote_entry(&self, id: Uuid, now: OffsetDateTime) -> Result<Vec<Uuid>> {
		let Some(entry) = self.store.try_load(id).await? else { return Ok(Vec::new()) };

		if entry.entry_type != EntryType::Procedural
			|| !is_mergeable(&entry)
			|| consolidation_exempt(&entry, &self.cfg, now)
		{
			return Ok(Vec::new());
		}

		let mut audit_ids = Vec::new();

		for target in promotion_targets(&entry, &self.cfg) {
			let copy_id = Uuid::new_v5(&entry.id, target.key().as_bytes());

			if self.store.try_load(copy_id).await?.is_some() {
				continue;
			}

			let copy = promoted_copy(&entry, copy_id, target.clone(), now);

			self.store.insert(&copy).await?;
			self.store.save_version(&copy).await?;
			self.on_mutation(&copy).await?;

			let record = self
				.audit_record(AuditAction::Promote, SYSTEM_ACTOR)
				.scope(&target)
				.sources([entry.id])
				.results([copy.id])
				.detail(serde_json::json!({
					"from": entry.scope.key(),
					"to": target.key(),
					"access_count": entry.access_count,
				}));

			audit_ids.push(self.audit(record).await?);

			tracing::info!(entry_id = %entry.id, copy_id = %copy.id, to = %target, "Promoted entry.");
		}

		Ok(audit_ids)
	}

	async fn archive_if_stale(&self, id: Uuid, now: OffsetDateTime) -> Result<Option<Uuid>> {
		let _guard = self.lock_entry(id).await?;
		let Some(mut entry) = self.store.try_load(id).await? else { return Ok(None) };

		if !is_mergeable(&entry)
			|| consolidation_exempt(&entry, &self.cfg, now)
			|| !is_stale(&entry, &self.cfg, now)
		{
			return Ok(None);
		}

		let audit_id = self
			.transition(&mut entry, LifecycleState::Archived, AuditAction::StaleArchive, SYSTEM_ACTOR)
			.await?;

		Ok(Some(audit_id))
	}

	async fn record_failure(
		&self,
		report: &mut ConsolidationReport,
		entry_id: Uuid,
		stage: Stage,
		err: Error,
	) {
		let failure = Error::ConsolidationFailure {
			message: format!("{} of {entry_id} failed: {err}", stage.as_str()),
		};

		tracing::warn!(error = %failure, entry_id = %entry_id, "Consolidation item failed.");

		let record = self
			.audit_record(AuditAction::ConsolidationFailure, SYSTEM_ACTOR)
			.scope(&report.scope)
			.sources([entry_id])
			.detail(serde_json::json!({ "stage": stage.as_str(), "error": err.to_string() }));

		match self.audit(record).await {
			Ok(audit_id) => report.audit_ids.push(audit_id),
			Err(audit_err) => {
				tracing::warn!(error = %audit_err, "Failed to audit a consolidation failure.");
			},
		}

		report.failures.push(ConsolidationFailureItem {
			entry_id,
			stage: stage.as_str().to_string(),
			message: err.to_string(),
		});
	}
}

/// Entries consolidation never touches: protected, critical, too young, or semantic decisions.
pub(crate) fn consolidation_exempt(entry: &MemoryEntry, cfg: &Config, now: OffsetDateTime) -> bool {
	entry.is_exempt()
		|| now - entry.created_at < Duration::days(cfg.consolidation.min_age_days)
		|| (entry.entry_type == EntryType::Semantic && entry.subtype == DECISION_SUBTYPE)
}

pub(crate) fn is_duplicate(a: &MemoryEntry, b: &MemoryEntry, cfg: &Config) -> bool {
	a.entry_type == b.entry_type
		&& a.subtype == b.subtype
		&& similarity::jaccard(&a.tags, &b.tags) >= cfg.consolidation.duplicate_tag_overlap
		&& similarity::content_similarity(&a.content, &b.content)
			>= cfg.consolidation.duplicate_similarity
}

fn is_mergeable(entry: &MemoryEntry) -> bool {
	entry.lifecycle_state.is_indexed() && entry.superseded_by.is_none()
}

fn newer_first(a: &MemoryEntry, b: &MemoryEntry) -> bool {
	(a.created_at, a.id) > (b.created_at, b.id)
}

/// Folds the loser's tags, access history, and identity into the winner.
fn absorb(winner: &mut MemoryEntry, loser: &MemoryEntry) {
	winner.tags.extend(loser.tags.iter().cloned());
	winner.access_count = winner.access_count.saturating_add(loser.access_count);
	winner.last_accessed = winner.last_accessed.max(loser.last_accessed);
	winner.supersedes = Some(loser.id);

	if !winner.references.contains(&loser.id) {
		winner.references.push(loser.id);
	}
}

fn is_stale(entry: &MemoryEntry, cfg: &Config, now: OffsetDateTime) -> bool {
	let window = Duration::days(cfg.consolidation.stale_after_days);

	match entry.last_accessed {
		None => entry.access_count == 0 && now - entry.created_at >= window,
		Some(accessed) => now - accessed >= window,
	}
}

fn promotion_targets(entry: &MemoryEntry, cfg: &Config) -> Vec<ScopeRef> {
	let rules = &cfg.consolidation;
	let mut targets = Vec::new();

	match entry.scope.scope {
		ScopeKind::Agent => {
			if entry.access_count >= rules.promote_team_access
				&& let Some(team) = cfg.scopes.agent_teams.get(&entry.scope.scope_id)
			{
				targets.push(ScopeRef::new(ScopeKind::Team, team.clone()));
			}
			if entry.access_count >= rules.promote_global_access {
				targets.push(ScopeRef::global());
			}
		},
		ScopeKind::Team | ScopeKind::Project =>
			if entry.access_count >= rules.promote_global_access {
				targets.push(ScopeRef::global());
			},
		ScopeKind::Global | ScopeKind::Session => {},
	}

	targets
}

fn promoted_copy(
	source: &MemoryEntry,
	id: Uuid,
	scope: ScopeRef,
	now: OffsetDateTime,
) -> MemoryEntry {
	let mut references = vec![source.id];

	references.extend(source.references.iter().filter(|id| **id != source.id).copied());

	MemoryEntry {
		id,
		scope,
		created_at: now,
		updated_at: now,
		updated_by: SYSTEM_ACTOR.to_string(),
		references,
		access_count: 0,
		last_accessed: None,
		version: 1,
		lifecycle_state: LifecycleState::Active,
		state_changed_at: now,
		activated_at: None,
		protected: false,
		supersedes: None,
		superseded_by: None,
		promoted_from: Some(source.id),
		..source.clone()
	}
}

/// Replaces an episodic payload with its description, outcome, first key facts, and the head of
/// its timeline.
pub(crate) fn summarize_episode(entry: &MemoryEntry, cfg: &Config) -> Value {
	let content = &entry.content;
	let max_chars = cfg.memory.summary_max_chars as usize;
	let rules = &cfg.consolidation;
	let mut out = Map::new();

	if let Some(title) = content.get("title").filter(|title| title.is_string()) {
		out.insert("title".to_string(), title.clone());
	}

	let description = content
		.get("description")
		.and_then(Value::as_str)
		.map(str::to_string)
		.unwrap_or_else(|| entry.summary(max_chars));

	out.insert(
		"description".to_string(),
		Value::String(truncate_chars(description.trim(), max_chars)),
	);

	match content.get("outcome") {
		Some(Value::String(outcome)) => {
			out.insert("outcome".to_string(), Value::String(truncate_chars(outcome, max_chars)));
		},
		Some(outcome) if !outcome.is_null() => {
			out.insert("outcome".to_string(), outcome.clone());
		},
		_ => {},
	}

	for (field, max_items) in
		[("key_facts", rules.key_facts_max_items), ("timeline", rules.timeline_max_items)]
	{
		if let Some(items) = content.get(field).and_then(Value::as_array) {
			let head = items.iter().take(max_items as usize).cloned().collect();

			out.insert(field.to_string(), Value::Array(head));
		}
	}

	out.insert("summarized_from_bytes".to_string(), Value::from(entry.content_bytes()));

	Value::Object(out)
}
