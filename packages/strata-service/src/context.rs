//! Byte-budgeted context packs and session handoff packages.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{
	Error, Result, StrataService,
	search::{Hydrated, QueryRequest},
};
use strata_domain::{EntryDraft, EntryType, MemoryEntry, Priority, ScopeKind};
use strata_storage::audit::AuditAction;

pub const HANDOFF_TAG: &str = "handoff";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContextRequest {
	#[serde(default)]
	pub query: QueryRequest,
	pub max_bytes: usize,
	/// Included in full, first, regardless of budget or rank.
	#[serde(default)]
	pub must_include: Vec<Uuid>,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextForm {
	Full,
	Summary,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContextItem {
	pub id: Uuid,
	/// `None` for must-include entries the query did not rank.
	pub score: Option<f32>,
	pub form: ContextForm,
	pub content: Value,
	pub bytes: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContextPackage {
	pub items: Vec<ContextItem>,
	pub used_bytes: usize,
	pub dropped: u64,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub warnings: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HandoffRequest {
	pub from: String,
	pub session_id: String,
	pub entry_ids: Vec<Uuid>,
	#[serde(default)]
	pub working_state: Value,
	#[serde(default)]
	pub note: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HandoffResponse {
	pub id: Uuid,
	pub included: Vec<Uuid>,
	pub missing: Vec<Uuid>,
	pub audit_id: Uuid,
}

impl StrataService {
	/// Fills `max_bytes` with the best-ranked entries. Entries that do not fit fall back to their
	/// summary, then get dropped.
	pub async fn pack_context(&self, req: ContextRequest) -> Result<ContextPackage> {
		let ranked = self.rank(&req.query).await?;
		let scores =
			ranked.items.iter().map(|item| (item.summary.id, item.score)).collect::<BTreeMap<_, _>>();
		let mut package =
			ContextPackage { items: Vec::new(), used_bytes: 0, dropped: 0, warnings: Vec::new() };
		let mut seen = BTreeSet::new();

		for id in &req.must_include {
			if !seen.insert(*id) {
				continue;
			}

			match self.bounded("Loading a must-include entry", self.peek(*id)).await {
				Ok(entry) => {
					let bytes = entry.content_bytes();

					package.used_bytes += bytes;
					package.items.push(ContextItem {
						id: entry.id,
						score: scores.get(id).copied(),
						form: ContextForm::Full,
						content: entry.content,
						bytes,
					});
				},
				Err(Error::NotFound { .. }) => {
					package.warnings.push(format!("Must-include entry {id} was not found."));
				},
				Err(err) => return Err(err),
			}
		}

		if package.used_bytes > req.max_bytes {
			package.warnings.push(format!(
				"Must-include entries use {} bytes, above the {} byte budget.",
				package.used_bytes, req.max_bytes
			));
		}

		let mut stale_scopes = BTreeSet::new();
		let mut ranked_items = 0;

		for candidate in ranked.items.iter().filter(|item| !seen.contains(&item.summary.id)) {
			if ranked_items >= ranked.limit {
				package.dropped += 1;

				continue;
			}

			let remaining = req.max_bytes.saturating_sub(package.used_bytes);
			let summary = Value::String(candidate.summary.summary.clone());
			let summary_bytes = json_len(&summary);

			if candidate.summary.content_bytes <= remaining {
				match self.hydrate(candidate, ranked.include_archived).await {
					Hydrated::Entry(entry) => {
						let bytes = entry.content_bytes();

						if bytes <= remaining {
							package.used_bytes += bytes;
							package.items.push(ContextItem {
								id: entry.id,
								score: Some(candidate.score),
								form: ContextForm::Full,
								content: entry.content,
								bytes,
							});
							ranked_items += 1;

							continue;
						}
					},
					Hydrated::Inconsistent(scope) => {
						stale_scopes.insert(scope);

						continue;
					},
					Hydrated::Failed(warning) => {
						package.warnings.push(warning);

						continue;
					},
					Hydrated::TimedOut(warning) => {
						package.warnings.push(warning);

						break;
					},
				}
			}

			if summary_bytes <= remaining {
				package.used_bytes += summary_bytes;
				package.items.push(ContextItem {
					id: candidate.summary.id,
					score: Some(candidate.score),
					form: ContextForm::Summary,
					content: summary,
					bytes: summary_bytes,
				});
				ranked_items += 1;
			} else {
				package.dropped += 1;
			}
		}

		self.repair_scopes(stale_scopes).await;

		tracing::debug!(
			items = package.items.len(),
			used_bytes = package.used_bytes,
			dropped = package.dropped,
			"Context package assembled."
		);

		Ok(package)
	}

	/// Stores a bounded bundle of entries plus a working-state snapshot as a working entry in the
	/// receiving session's scope.
	pub async fn handoff(&self, req: HandoffRequest) -> Result<HandoffResponse> {
		let from = crate::update::require_actor(&req.from)?;
		let max_entries = self.cfg.memory.handoff_max_entries as usize;

		if req.entry_ids.len() > max_entries {
			return Err(Error::validation(
				"REJECT_HANDOFF_TOO_LARGE",
				format!("A handoff carries at most {max_entries} entries."),
			));
		}

		let mut seen = BTreeSet::new();
		let mut included = Vec::new();
		let mut missing = Vec::new();

		for id in req.entry_ids.iter().filter(|id| seen.insert(**id)) {
			match self.peek(*id).await {
				Ok(entry) => included.push(entry),
				Err(Error::NotFound { .. }) => missing.push(*id),
				Err(err) => return Err(err),
			}
		}

		let note = req
			.note
			.as_deref()
			.map(str::trim)
			.filter(|note| !note.is_empty())
			.map(str::to_string)
			.unwrap_or_else(|| format!("Handoff from {from}."));
		let mut content = handoff_content(&note, &req.working_state, &included, None);

		if crate::gate_content_size(&self.cfg, &content).is_err() {
			let max_chars = self.cfg.memory.summary_max_chars as usize;

			tracing::info!(
				entries = included.len(),
				"Handoff too large with full entries. Packing summaries instead."
			);

			content = handoff_content(&note, &req.working_state, &included, Some(max_chars));
		}

		let draft = EntryDraft {
			entry_type: EntryType::Working,
			subtype: HANDOFF_TAG.to_string(),
			scope: ScopeKind::Session,
			scope_id: req.session_id.clone(),
			tags: vec![HANDOFF_TAG.to_string()],
			priority: Priority::Normal,
			confidence: 1.0,
			created_by: from.to_string(),
			ttl: None,
			content,
			references: included.iter().map(|entry| entry.id).collect(),
			protected: false,
		};
		let package = self.build_entry(draft)?;

		self.insert_entry(&package).await?;

		let record = self
			.audit_record(AuditAction::Handoff, from)
			.scope(&package.scope)
			.sources(package.references.iter().copied())
			.results([package.id])
			.detail(serde_json::json!({ "missing": missing }));
		let audit_id = self.audit(record).await?;

		tracing::info!(
			package_id = %package.id,
			session_id = %req.session_id,
			included = package.references.len(),
			missing = missing.len(),
			"Handoff package stored."
		);

		Ok(HandoffResponse { id: package.id, included: package.references, missing, audit_id })
	}
}

fn json_len(value: &Value) -> usize {
	serde_json::to_vec(value).map(|bytes| bytes.len()).unwrap_or(0)
}

/// With `summary_chars` set, entries are reduced to their summaries.
fn handoff_content(
	note: &str,
	working_state: &Value,
	entries: &[MemoryEntry],
	summary_chars: Option<usize>,
) -> Value {
	let entries = entries
		.iter()
		.map(|entry| match summary_chars {
			Some(max_chars) => serde_json::json!({
				"id": entry.id,
				"type": entry.entry_type,
				"version": entry.version,
				"summary": entry.summary(max_chars),
			}),
			None => serde_json::json!({
				"id": entry.id,
				"type": entry.entry_type,
				"version": entry.version,
				"content": entry.content,
			}),
		})
		.collect::<Vec<_>>();

	serde_json::json!({ "note": note, "working_state": working_state, "entries": entries })
}
