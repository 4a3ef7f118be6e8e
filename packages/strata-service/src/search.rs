mod filter;
mod ranking;

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{Error, Result, StrataService};
use strata_domain::{
	EntryType, LifecycleState, MemoryEntry, Priority, ScopeKind, ScopeRef, similarity, writegate,
};
use strata_storage::index::EntrySummary;

use self::{filter::ResolvedFilter, ranking::QueryTerms};

const MAX_QUERY_TERMS: usize = 32;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct QueryRequest {
	#[serde(default)]
	pub filter: QueryFilter,
	/// Free-text keywords matched against tags, titles, summaries, and content terms.
	#[serde(default)]
	pub text: Option<String>,
	#[serde(default)]
	pub limit: Option<u32>,
	#[serde(default)]
	pub sort: SortOrder,
	#[serde(default)]
	pub include_archived: bool,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct QueryFilter {
	#[serde(default)]
	pub types: Vec<EntryType>,
	/// Empty means every scope.
	#[serde(default)]
	pub scopes: Vec<ScopeSelector>,
	#[serde(default)]
	pub tags: TagFilter,
	#[serde(default)]
	pub created_by: Option<String>,
	#[serde(default, with = "time::serde::rfc3339::option")]
	pub created_after: Option<OffsetDateTime>,
	#[serde(default, with = "time::serde::rfc3339::option")]
	pub created_before: Option<OffsetDateTime>,
	#[serde(default)]
	pub priorities: Vec<Priority>,
}

/// A scope kind, optionally narrowed to one owner.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScopeSelector {
	pub scope: ScopeKind,
	#[serde(default)]
	pub scope_id: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TagFilter {
	#[serde(default)]
	pub include: Vec<String>,
	#[serde(default)]
	pub exclude: Vec<String>,
	#[serde(default)]
	pub mode: TagMatch,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TagMatch {
	#[default]
	Any,
	All,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
	#[default]
	Relevance,
	Newest,
	Oldest,
	MostAccessed,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueryItem {
	pub id: Uuid,
	pub score: f32,
	pub summary: String,
	pub entry: MemoryEntry,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueryResponse {
	pub items: Vec<QueryItem>,
	pub has_more: bool,
	/// Set when some results were dropped because hydration timed out or failed.
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub warnings: Vec<String>,
}

/// One scored candidate, before hydration.
#[derive(Clone, Debug)]
pub(crate) struct Ranked {
	pub(crate) scope: ScopeRef,
	pub(crate) summary: EntrySummary,
	pub(crate) score: f32,
}

pub(crate) struct RankedQuery {
	pub(crate) items: Vec<Ranked>,
	pub(crate) limit: usize,
	pub(crate) include_archived: bool,
}

pub(crate) enum Hydrated {
	Entry(MemoryEntry),
	Inconsistent(ScopeRef),
	Failed(String),
	TimedOut(String),
}

impl StrataService {
	/// Filters, scores, and orders candidates, then hydrates the top `limit` results.
	pub async fn resolve(&self, req: QueryRequest) -> Result<QueryResponse> {
		let ranked = self.rank(&req).await?;
		let mut items = Vec::with_capacity(ranked.limit);
		let mut warnings = Vec::new();
		let mut stale_scopes = BTreeSet::new();
		let mut consumed = 0;

		for candidate in &ranked.items {
			if items.len() >= ranked.limit {
				break;
			}

			consumed += 1;

			match self.hydrate(candidate, ranked.include_archived).await {
				Hydrated::Entry(entry) => items.push(QueryItem {
					id: entry.id,
					score: candidate.score,
					summary: candidate.summary.summary.clone(),
					entry,
				}),
				Hydrated::Inconsistent(scope) => {
					stale_scopes.insert(scope);
				},
				Hydrated::Failed(warning) => warnings.push(warning),
				Hydrated::TimedOut(warning) => {
					warnings.push(warning);

					break;
				},
			}
		}

		self.repair_scopes(stale_scopes).await;

		Ok(QueryResponse { items, has_more: ranked.items.len() > consumed, warnings })
	}

	/// Candidate selection and scoring without hydration.
	pub(crate) async fn rank(&self, req: &QueryRequest) -> Result<RankedQuery> {
		let limit = self.resolve_limit(req.limit)?;
		let filter = ResolvedFilter::resolve(&req.filter)?;
		let scopes = self.target_scopes(&req.filter.scopes).await?;
		let terms = QueryTerms {
			keywords: req
				.text
				.as_deref()
				.map(|text| similarity::query_terms(text, MAX_QUERY_TERMS))
				.unwrap_or_default(),
			include_tags: filter.include.clone(),
		};
		let now = self.clock.now();
		let mut items = Vec::new();

		for scope in &scopes {
			let candidates = self
				.with_index(scope, |index| {
					filter.narrow(index).into_iter().cloned().collect::<Vec<_>>()
				})
				.await?;

			for summary in candidates {
				if let Some(ranked) = self.score_candidate(scope, summary, &terms, now) {
					items.push(ranked);
				}
			}
		}

		if req.include_archived {
			for entry in self.store.scan().await? {
				if entry.lifecycle_state != LifecycleState::Archived
					|| !archived_scope_selected(&req.filter.scopes, &scopes, &entry.scope)
				{
					continue;
				}

				let summary = EntrySummary::project(&entry, self.projection());

				if !filter.matches(&summary) {
					continue;
				}
				if let Some(ranked) = self.score_candidate(&entry.scope, summary, &terms, now) {
					items.push(ranked);
				}
			}
		}

		items.sort_by(|a, b| ranking::compare(a, b, req.sort));

		Ok(RankedQuery { items, limit, include_archived: req.include_archived })
	}

	/// Loads one ranked candidate and records the access. A candidate whose record no longer
	/// matches its index summary is reported as an inconsistency instead.
	pub(crate) async fn hydrate(&self, candidate: &Ranked, include_archived: bool) -> Hydrated {
		let id = candidate.summary.id;
		let scope = &candidate.scope;
		let accept = |entry: &MemoryEntry| {
			&entry.scope == scope
				&& (entry.lifecycle_state.is_indexed()
					|| (include_archived && entry.lifecycle_state == LifecycleState::Archived))
		};

		match tokio::time::timeout(self.operation_timeout(), self.touch_if(id, accept)).await {
			Ok(Ok(Some(entry))) => Hydrated::Entry(entry),
			Ok(Ok(None)) | Ok(Err(Error::NotFound { .. })) => {
				tracing::warn!(entry_id = %id, scope = %scope, "Index entry does not match its record.");

				Hydrated::Inconsistent(scope.clone())
			},
			Ok(Err(err)) => {
				tracing::warn!(error = %err, entry_id = %id, "Failed to hydrate query result.");

				Hydrated::Failed(format!("Entry {id} could not be loaded: {err}"))
			},
			Err(_) => {
				tracing::warn!(entry_id = %id, "Query result hydration timed out.");

				Hydrated::TimedOut(format!("Hydrating entry {id} timed out; results are partial."))
			},
		}
	}

	/// Rebuilds scopes whose index disagreed with canonical records. Failures are logged only.
	pub(crate) async fn repair_scopes(&self, scopes: BTreeSet<ScopeRef>) {
		for scope in scopes {
			let inconsistency = Error::IndexInconsistency {
				message: format!("Index for {scope} referenced a missing or retired entry."),
			};

			tracing::info!(scope = %scope, reason = %inconsistency, "Rebuilding scope index.");

			if let Err(err) = self.rebuild(&scope).await {
				tracing::warn!(error = %err, scope = %scope, "Scope index repair failed.");
			}
		}
	}

	fn resolve_limit(&self, limit: Option<u32>) -> Result<usize> {
		match limit {
			None => Ok(self.cfg.memory.default_limit as usize),
			Some(0) => Err(Error::InvalidQuery {
				message: "limit must be greater than zero.".to_string(),
			}),
			Some(limit) => Ok(limit.min(self.cfg.memory.max_limit) as usize),
		}
	}

	async fn target_scopes(&self, selectors: &[ScopeSelector]) -> Result<Vec<ScopeRef>> {
		let known = self.known_scopes().await?;

		if selectors.is_empty() {
			return Ok(known.into_iter().collect());
		}

		let mut scopes = BTreeSet::new();

		for selector in selectors {
			match selector.scope_id.as_deref() {
				Some(scope_id) => {
					let scope = writegate::normalize_scope(selector.scope, scope_id).map_err(|_| {
						Error::InvalidQuery { message: format!("Invalid scope_id {scope_id:?}.") }
					})?;

					scopes.insert(scope);
				},
				None => {
					scopes.extend(known.iter().filter(|scope| scope.scope == selector.scope).cloned());
				},
			}
		}

		Ok(scopes.into_iter().collect())
	}

	fn score_candidate(
		&self,
		scope: &ScopeRef,
		summary: EntrySummary,
		terms: &QueryTerms,
		now: OffsetDateTime,
	) -> Option<Ranked> {
		let scored = ranking::score(&summary, terms, &self.cfg, scope.scope, now);

		if !terms.keywords.is_empty() && scored.keyword_hits == 0 {
			return None;
		}

		Some(Ranked { scope: scope.clone(), summary, score: scored.score })
	}
}

/// Scopes holding only archived entries have no index record, so the selectors are matched
/// against the entry's own scope as well.
fn archived_scope_selected(
	selectors: &[ScopeSelector],
	indexed: &[ScopeRef],
	scope: &ScopeRef,
) -> bool {
	selectors.is_empty()
		|| indexed.contains(scope)
		|| selectors
			.iter()
			.any(|selector| selector.scope_id.is_none() && selector.scope == scope.scope)
}
