use std::collections::BTreeSet;

use time::OffsetDateTime;

use crate::{Error, Result, search::{QueryFilter, TagMatch}};
use strata_domain::{EntryType, Priority};
use strata_storage::index::{EntrySummary, ScopeIndex};

/// A validated, normalized query filter.
#[derive(Debug)]
pub(crate) struct ResolvedFilter {
	pub(crate) types: BTreeSet<EntryType>,
	pub(crate) include: BTreeSet<String>,
	pub(crate) exclude: BTreeSet<String>,
	pub(crate) mode: TagMatch,
	pub(crate) created_by: Option<String>,
	pub(crate) created_after: Option<OffsetDateTime>,
	pub(crate) created_before: Option<OffsetDateTime>,
	pub(crate) priorities: BTreeSet<Priority>,
}
impl ResolvedFilter {
	pub(crate) fn resolve(filter: &QueryFilter) -> Result<Self> {
		let include = normalize_tags(&filter.tags.include)?;
		let exclude = normalize_tags(&filter.tags.exclude)?;

		if let Some(tag) = include.intersection(&exclude).next() {
			return Err(Error::InvalidQuery {
				message: format!("Tag {tag:?} is both included and excluded."),
			});
		}
		if let (Some(after), Some(before)) = (filter.created_after, filter.created_before)
			&& after > before
		{
			return Err(Error::InvalidQuery {
				message: "created_after must not be later than created_before.".to_string(),
			});
		}

		let created_by = filter
			.created_by
			.as_deref()
			.map(str::trim)
			.filter(|creator| !creator.is_empty())
			.map(str::to_string);

		Ok(Self {
			types: filter.types.iter().copied().collect(),
			include,
			exclude,
			mode: filter.tags.mode,
			created_by,
			created_after: filter.created_after,
			created_before: filter.created_before,
			priorities: filter.priorities.iter().copied().collect(),
		})
	}

	/// Candidate summaries from one scope index, narrowed through the type and tag maps before any
	/// per-summary checks run.
	pub(crate) fn narrow<'a>(&self, index: &'a ScopeIndex) -> Vec<&'a EntrySummary> {
		let mut candidates = index.of_types(&self.types);

		if !self.include.is_empty() {
			let mut tagged = self.include.iter().map(|tag| index.tagged(tag));
			let allowed = match self.mode {
				TagMatch::Any => tagged.fold(BTreeSet::new(), |mut acc, ids| {
					acc.extend(ids);

					acc
				}),
				TagMatch::All => {
					let first = tagged.next().unwrap_or_default();

					tagged.fold(first, |acc, ids| acc.intersection(&ids).copied().collect())
				},
			};

			candidates.retain(|summary| allowed.contains(&summary.id));
		}

		candidates.retain(|summary| self.matches(summary));

		candidates
	}

	/// Full predicate check on one summary.
	pub(crate) fn matches(&self, summary: &EntrySummary) -> bool {
		if !self.types.is_empty() && !self.types.contains(&summary.entry_type) {
			return false;
		}
		if !self.include.is_empty() {
			let hit = match self.mode {
				TagMatch::Any => self.include.iter().any(|tag| summary.tags.contains(tag)),
				TagMatch::All => self.include.iter().all(|tag| summary.tags.contains(tag)),
			};

			if !hit {
				return false;
			}
		}
		if self.exclude.iter().any(|tag| summary.tags.contains(tag)) {
			return false;
		}
		if let Some(creator) = self.created_by.as_deref()
			&& summary.created_by != creator
		{
			return false;
		}
		if let Some(after) = self.created_after
			&& summary.created_at < after
		{
			return false;
		}
		if let Some(before) = self.created_before
			&& summary.created_at > before
		{
			return false;
		}
		if !self.priorities.is_empty() && !self.priorities.contains(&summary.priority) {
			return false;
		}

		true
	}
}

fn normalize_tags(tags: &[String]) -> Result<BTreeSet<String>> {
	let mut out = BTreeSet::new();

	for tag in tags {
		let normalized = tag.trim().to_lowercase();

		if normalized.is_empty() {
			return Err(Error::InvalidQuery { message: "Tag filters must not be empty.".to_string() });
		}

		out.insert(normalized);
	}

	Ok(out)
}
