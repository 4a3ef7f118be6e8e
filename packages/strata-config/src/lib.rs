mod error;
mod types;

pub use error::{Error, Result};
pub use types::{
	Config, Conflict, ConflictRule, Consolidation, Lifecycle, LifecycleThresholds, Memory,
	PriorityBoost, Ranking, ScopeWeights, Scopes, Service, Storage, Worker,
};

use std::{fs, path::Path};

pub const CONFLICT_STRATEGIES: [&str; 5] =
	["last_writer_wins", "authority_wins", "field_merge", "branch_and_flag", "manual"];
pub const SCOPE_KINDS: [&str; 5] = ["global", "team", "agent", "project", "session"];
pub const ENTRY_TYPES: [&str; 5] = ["factual", "procedural", "episodic", "semantic", "working"];

pub fn load(path: &Path) -> Result<Config> {
	let raw = fs::read_to_string(path)
		.map_err(|err| Error::ReadConfig { path: path.to_path_buf(), source: err })?;

	let mut cfg: Config = toml::from_str(&raw)
		.map_err(|err| Error::ParseConfig { path: path.to_path_buf(), source: err })?;

	normalize(&mut cfg);

	validate(&cfg)?;

	Ok(cfg)
}

pub fn validate(cfg: &Config) -> Result<()> {
	for (label, value) in [
		("service.http_bind", &cfg.service.http_bind),
		("service.admin_bind", &cfg.service.admin_bind),
		("service.log_level", &cfg.service.log_level),
	] {
		if value.trim().is_empty() {
			return Err(Error::Validation { message: format!("{label} must be non-empty.") });
		}
	}

	if cfg.storage.root.as_os_str().is_empty() {
		return Err(Error::Validation { message: "storage.root must be non-empty.".to_string() });
	}
	if cfg.storage.lock_stripes == 0 {
		return Err(Error::Validation {
			message: "storage.lock_stripes must be greater than zero.".to_string(),
		});
	}

	validate_memory(cfg)?;
	validate_ranking(cfg)?;
	validate_lifecycle(cfg)?;
	validate_consolidation(cfg)?;
	validate_conflict(cfg)?;

	if cfg.worker.sweep_interval_secs == 0
		|| cfg.worker.consolidation_interval_secs == 0
		|| cfg.worker.rebuild_interval_secs == 0
	{
		return Err(Error::Validation {
			message: "worker intervals must be greater than zero.".to_string(),
		});
	}

	Ok(())
}

fn validate_memory(cfg: &Config) -> Result<()> {
	let memory = &cfg.memory;

	for (label, value) in [
		("memory.max_entry_bytes", memory.max_entry_bytes),
		("memory.default_limit", memory.default_limit),
		("memory.max_limit", memory.max_limit),
		("memory.summary_max_chars", memory.summary_max_chars),
		("memory.max_content_terms", memory.max_content_terms),
		("memory.handoff_max_entries", memory.handoff_max_entries),
	] {
		if value == 0 {
			return Err(Error::Validation {
				message: format!("{label} must be greater than zero."),
			});
		}
	}

	if memory.default_limit > memory.max_limit {
		return Err(Error::Validation {
			message: "memory.default_limit must be less than or equal to memory.max_limit."
				.to_string(),
		});
	}
	if memory.operation_timeout_ms == 0 {
		return Err(Error::Validation {
			message: "memory.operation_timeout_ms must be greater than zero.".to_string(),
		});
	}

	Ok(())
}

fn validate_ranking(cfg: &Config) -> Result<()> {
	let ranking = &cfg.ranking;
	let weights = &cfg.scopes.weights;
	let boost = &ranking.priority_boost;

	for (label, value) in [
		("ranking.tag_weight", ranking.tag_weight),
		("ranking.title_weight", ranking.title_weight),
		("ranking.summary_weight", ranking.summary_weight),
		("ranking.content_weight", ranking.content_weight),
		("ranking.access_weight", ranking.access_weight),
		("ranking.priority_boost.critical", boost.critical),
		("ranking.priority_boost.high", boost.high),
		("ranking.priority_boost.normal", boost.normal),
		("ranking.priority_boost.low", boost.low),
		("scopes.weights.global", weights.global),
		("scopes.weights.team", weights.team),
		("scopes.weights.agent", weights.agent),
		("scopes.weights.project", weights.project),
		("scopes.weights.session", weights.session),
	] {
		if !value.is_finite() {
			return Err(Error::Validation { message: format!("{label} must be a finite number.") });
		}
		if value < 0.0 {
			return Err(Error::Validation { message: format!("{label} must be zero or greater.") });
		}
	}

	if !ranking.recency_tau_days.is_finite() || ranking.recency_tau_days <= 0.0 {
		return Err(Error::Validation {
			message: "ranking.recency_tau_days must be a finite number greater than zero."
				.to_string(),
		});
	}

	Ok(())
}

fn validate_lifecycle(cfg: &Config) -> Result<()> {
	if cfg.lifecycle.purge_deleted_after_hours <= 0 {
		return Err(Error::Validation {
			message: "lifecycle.purge_deleted_after_hours must be greater than zero.".to_string(),
		});
	}

	for (label, thresholds) in [
		("factual", &cfg.lifecycle.factual),
		("procedural", &cfg.lifecycle.procedural),
		("episodic", &cfg.lifecycle.episodic),
		("semantic", &cfg.lifecycle.semantic),
		("working", &cfg.lifecycle.working),
	] {
		for (field, value) in [
			("aging_after_hours", thresholds.aging_after_hours),
			("archive_after_hours", thresholds.archive_after_hours),
			("delete_after_hours", thresholds.delete_after_hours),
		] {
			if value <= 0 {
				return Err(Error::Validation {
					message: format!("lifecycle.{label}.{field} must be greater than zero."),
				});
			}
		}

		if thresholds.default_ttl_hours < 0 {
			return Err(Error::Validation {
				message: format!("lifecycle.{label}.default_ttl_hours must be zero or greater."),
			});
		}
	}

	Ok(())
}

fn validate_consolidation(cfg: &Config) -> Result<()> {
	let consolidation = &cfg.consolidation;

	if consolidation.batch_size == 0 {
		return Err(Error::Validation {
			message: "consolidation.batch_size must be greater than zero.".to_string(),
		});
	}
	if consolidation.min_age_days < 0 {
		return Err(Error::Validation {
			message: "consolidation.min_age_days must be zero or greater.".to_string(),
		});
	}

	for (label, value) in [
		("consolidation.duplicate_similarity", consolidation.duplicate_similarity),
		("consolidation.duplicate_tag_overlap", consolidation.duplicate_tag_overlap),
	] {
		if !value.is_finite() || !(0.0..=1.0).contains(&value) {
			return Err(Error::Validation {
				message: format!("{label} must be in the range 0.0-1.0."),
			});
		}
	}

	if consolidation.promote_team_access == 0 {
		return Err(Error::Validation {
			message: "consolidation.promote_team_access must be greater than zero.".to_string(),
		});
	}
	if consolidation.promote_team_access >= consolidation.promote_global_access {
		return Err(Error::Validation {
			message: "consolidation.promote_team_access must be less than consolidation.promote_global_access."
				.to_string(),
		});
	}
	if consolidation.summarize_after_days < 0 || consolidation.stale_after_days <= 0 {
		return Err(Error::Validation {
			message: "consolidation age thresholds must be positive.".to_string(),
		});
	}

	Ok(())
}

fn validate_conflict(cfg: &Config) -> Result<()> {
	if !CONFLICT_STRATEGIES.contains(&cfg.conflict.default_strategy.as_str()) {
		return Err(Error::Validation {
			message: format!(
				"conflict.default_strategy must be one of {}.",
				CONFLICT_STRATEGIES.join(", ")
			),
		});
	}

	for rule in &cfg.conflict.rules {
		if !CONFLICT_STRATEGIES.contains(&rule.strategy.as_str()) {
			return Err(Error::Validation {
				message: format!(
					"conflict.rules.strategy must be one of {}.",
					CONFLICT_STRATEGIES.join(", ")
				),
			});
		}

		if let Some(scope) = rule.scope.as_deref()
			&& !SCOPE_KINDS.contains(&scope)
		{
			return Err(Error::Validation {
				message: format!("conflict.rules.scope '{scope}' is not a known scope."),
			});
		}
		if let Some(entry_type) = rule.entry_type.as_deref()
			&& !ENTRY_TYPES.contains(&entry_type)
		{
			return Err(Error::Validation {
				message: format!("conflict.rules.entry_type '{entry_type}' is not a known type."),
			});
		}
	}

	Ok(())
}

fn normalize(cfg: &mut Config) {
	cfg.conflict.default_strategy = cfg.conflict.default_strategy.trim().to_ascii_lowercase();

	for rule in &mut cfg.conflict.rules {
		rule.strategy = rule.strategy.trim().to_ascii_lowercase();
		rule.scope = rule
			.scope
			.take()
			.map(|scope| scope.trim().to_ascii_lowercase())
			.filter(|scope| !scope.is_empty());
		rule.entry_type = rule
			.entry_type
			.take()
			.map(|entry_type| entry_type.trim().to_ascii_lowercase())
			.filter(|entry_type| !entry_type.is_empty());
	}

	cfg.scopes.agent_teams.retain(|agent, team| !agent.trim().is_empty() && !team.trim().is_empty());
}
