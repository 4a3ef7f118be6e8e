use serde::{Deserialize, Serialize};

use strata_config::{Config, ConflictRule};

use crate::entry::{EntryType, ScopeKind};

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
	LastWriterWins,
	AuthorityWins,
	FieldMerge,
	BranchAndFlag,
	Manual,
}
impl ConflictStrategy {
	pub fn parse(raw: &str) -> Option<Self> {
		match raw {
			"last_writer_wins" => Some(Self::LastWriterWins),
			"authority_wins" => Some(Self::AuthorityWins),
			"field_merge" => Some(Self::FieldMerge),
			"branch_and_flag" => Some(Self::BranchAndFlag),
			"manual" => Some(Self::Manual),
			_ => None,
		}
	}
}

#[derive(Debug)]
pub struct StrategySelection<'a> {
	pub strategy: ConflictStrategy,
	pub matched_rule: Option<&'a ConflictRule>,
}

/// Picks the strategy for a scope/type pair: exact rule, then type rule, then scope rule, then
/// the configured default.
pub fn select_strategy(cfg: &Config, scope: ScopeKind, entry_type: EntryType) -> StrategySelection<'_> {
	let matched_rule = select_rule(cfg, scope.as_str(), entry_type.as_str());
	let raw = matched_rule
		.map(|rule| rule.strategy.as_str())
		.unwrap_or(cfg.conflict.default_strategy.as_str());
	let strategy = ConflictStrategy::parse(raw).unwrap_or(ConflictStrategy::Manual);

	StrategySelection { strategy, matched_rule }
}

/// Critical entries are never settled silently by last-writer-wins.
pub fn effective_strategy(strategy: ConflictStrategy, involves_critical: bool) -> ConflictStrategy {
	if involves_critical && strategy == ConflictStrategy::LastWriterWins {
		ConflictStrategy::Manual
	} else {
		strategy
	}
}

pub fn creator_rank(cfg: &Config, creator: &str) -> i32 {
	cfg.conflict.creator_ranks.get(creator).copied().unwrap_or(0)
}

fn select_rule<'a>(cfg: &'a Config, scope: &str, entry_type: &str) -> Option<&'a ConflictRule> {
	let rules = &cfg.conflict.rules;
	let exact = rules.iter().find(|rule| {
		rule.scope.as_deref() == Some(scope) && rule.entry_type.as_deref() == Some(entry_type)
	});

	if exact.is_some() {
		return exact;
	}

	let type_match = rules
		.iter()
		.find(|rule| rule.scope.is_none() && rule.entry_type.as_deref() == Some(entry_type));

	if type_match.is_some() {
		return type_match;
	}

	let scope_match =
		rules.iter().find(|rule| rule.entry_type.is_none() && rule.scope.as_deref() == Some(scope));

	if scope_match.is_some() {
		return scope_match;
	}

	rules.iter().find(|rule| rule.scope.is_none() && rule.entry_type.is_none())
}
