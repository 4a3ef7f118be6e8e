use std::{cmp::Ordering, collections::BTreeSet};

use time::OffsetDateTime;

use crate::search::{Ranked, SortOrder};
use strata_config::Config;
use strata_domain::{Priority, ScopeKind, similarity};
use strata_storage::index::EntrySummary;

const SECONDS_PER_DAY: f32 = 86_400.0;

/// Normalized terms a query scores against.
#[derive(Debug, Default)]
pub(crate) struct QueryTerms {
	pub(crate) keywords: Vec<String>,
	pub(crate) include_tags: BTreeSet<String>,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Scored {
	pub(crate) score: f32,
	/// Keyword matches across tags, title, summary, and content terms.
	pub(crate) keyword_hits: usize,
}

pub(crate) fn score(
	summary: &EntrySummary,
	terms: &QueryTerms,
	cfg: &Config,
	scope: ScopeKind,
	now: OffsetDateTime,
) -> Scored {
	let ranking = &cfg.ranking;
	let tag_matches = summary
		.tags
		.iter()
		.filter(|tag| terms.include_tags.contains(*tag) || terms.keywords.contains(*tag))
		.count();
	let keyword_tag_matches =
		summary.tags.iter().filter(|tag| terms.keywords.contains(*tag)).count();
	let title_terms = summary.title.as_deref().map(similarity::terms).unwrap_or_default();
	let summary_terms = similarity::terms(&summary.summary);
	let title_hits = count_hits(&terms.keywords, |keyword| title_terms.contains(keyword));
	let summary_hits = count_hits(&terms.keywords, |keyword| summary_terms.contains(keyword));
	let content_hits = count_hits(&terms.keywords, |keyword| {
		summary.content_terms.binary_search_by(|term| term.as_str().cmp(keyword)).is_ok()
	});
	let score = ranking.tag_weight * tag_matches as f32
		+ ranking.title_weight * title_hits as f32
		+ ranking.summary_weight * summary_hits as f32
		+ ranking.content_weight * content_hits as f32
		+ priority_boost(cfg, summary.priority)
		+ recency_factor(cfg, summary.created_at, now)
		+ ranking.access_weight * summary.access_count as f32
		+ scope_weight(cfg, scope);

	Scored { score, keyword_hits: keyword_tag_matches + title_hits + summary_hits + content_hits }
}

pub(crate) fn priority_boost(cfg: &Config, priority: Priority) -> f32 {
	let boost = &cfg.ranking.priority_boost;

	match priority {
		Priority::Critical => boost.critical,
		Priority::High => boost.high,
		Priority::Normal => boost.normal,
		Priority::Low => boost.low,
	}
}

/// 1.0 for a brand-new entry, decaying toward 0.0 with age.
pub(crate) fn recency_factor(cfg: &Config, created_at: OffsetDateTime, now: OffsetDateTime) -> f32 {
	let tau = cfg.ranking.recency_tau_days;

	if tau <= 0.0 {
		return 0.0;
	}

	let age_days = ((now - created_at).as_seconds_f32() / SECONDS_PER_DAY).max(0.0);

	(-age_days / tau).exp()
}

pub(crate) fn scope_weight(cfg: &Config, scope: ScopeKind) -> f32 {
	let weights = &cfg.scopes.weights;

	match scope {
		ScopeKind::Global => weights.global,
		ScopeKind::Team => weights.team,
		ScopeKind::Agent => weights.agent,
		ScopeKind::Project => weights.project,
		ScopeKind::Session => weights.session,
	}
}

/// Total order over ranked candidates. Every sort falls back to newer first, then smaller id.
pub(crate) fn compare(a: &Ranked, b: &Ranked, sort: SortOrder) -> Ordering {
	let by_relevance = || {
		cmp_f32_desc(a.score, b.score)
			.then_with(|| b.summary.created_at.cmp(&a.summary.created_at))
			.then_with(|| a.summary.id.cmp(&b.summary.id))
	};

	match sort {
		SortOrder::Relevance => by_relevance(),
		SortOrder::Newest => b
			.summary
			.created_at
			.cmp(&a.summary.created_at)
			.then_with(|| a.summary.id.cmp(&b.summary.id)),
		SortOrder::Oldest => a
			.summary
			.created_at
			.cmp(&b.summary.created_at)
			.then_with(|| a.summary.id.cmp(&b.summary.id)),
		SortOrder::MostAccessed =>
			b.summary.access_count.cmp(&a.summary.access_count).then_with(by_relevance),
	}
}

pub(crate) fn cmp_f32_desc(a: f32, b: f32) -> Ordering {
	match (a.is_nan(), b.is_nan()) {
		(true, true) => Ordering::Equal,
		(true, false) => Ordering::Greater,
		(false, true) => Ordering::Less,
		(false, false) => b.total_cmp(&a),
	}
}

fn count_hits<F>(keywords: &[String], mut hit: F) -> usize
where
	F: FnMut(&str) -> bool,
{
	keywords.iter().filter(|keyword| hit(keyword.as_str())).count()
}
