use std::{collections::HashMap, path::PathBuf};

use serde::Deserialize;

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
	pub service: Service,
	pub storage: Storage,
	pub memory: Memory,
	#[serde(default)]
	pub scopes: Scopes,
	#[serde(default)]
	pub ranking: Ranking,
	pub lifecycle: Lifecycle,
	#[serde(default)]
	pub consolidation: Consolidation,
	#[serde(default)]
	pub conflict: Conflict,
	#[serde(default)]
	pub worker: Worker,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Service {
	pub http_bind: String,
	pub admin_bind: String,
	pub log_level: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Storage {
	/// Directory holding entry records, version snapshots, scope indexes, and the audit log.
	pub root: PathBuf,
	#[serde(default = "default_lock_stripes")]
	pub lock_stripes: u32,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Memory {
	pub max_entry_bytes: u32,
	pub default_limit: u32,
	pub max_limit: u32,
	pub operation_timeout_ms: u64,
	pub summary_max_chars: u32,
	#[serde(default = "default_max_content_terms")]
	pub max_content_terms: u32,
	#[serde(default = "default_handoff_max_entries")]
	pub handoff_max_entries: u32,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Scopes {
	/// Agent id to owning team id. Promotion out of an agent scope needs an entry here.
	pub agent_teams: HashMap<String, String>,
	pub weights: ScopeWeights,
}

/// Additive ranking weight per scope kind.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct ScopeWeights {
	pub global: f32,
	pub team: f32,
	pub agent: f32,
	pub project: f32,
	pub session: f32,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Ranking {
	pub tag_weight: f32,
	pub title_weight: f32,
	pub summary_weight: f32,
	pub content_weight: f32,
	pub access_weight: f32,
	pub recency_tau_days: f32,
	pub priority_boost: PriorityBoost,
}
impl Default for Ranking {
	fn default() -> Self {
		Self {
			tag_weight: 3.0,
			title_weight: 2.5,
			summary_weight: 2.0,
			content_weight: 1.0,
			access_weight: 0.1,
			recency_tau_days: 30.0,
			priority_boost: PriorityBoost::default(),
		}
	}
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PriorityBoost {
	pub critical: f32,
	pub high: f32,
	pub normal: f32,
	pub low: f32,
}
impl Default for PriorityBoost {
	fn default() -> Self {
		Self { critical: 5.0, high: 3.0, normal: 1.0, low: 0.0 }
	}
}

#[derive(Clone, Debug, Deserialize)]
pub struct Lifecycle {
	pub purge_deleted_after_hours: i64,
	pub factual: LifecycleThresholds,
	pub procedural: LifecycleThresholds,
	pub episodic: LifecycleThresholds,
	pub semantic: LifecycleThresholds,
	pub working: LifecycleThresholds,
}

#[derive(Clone, Debug, Deserialize)]
pub struct LifecycleThresholds {
	/// Tₐ: inactivity before an active entry starts aging.
	pub aging_after_hours: i64,
	/// Tᵦ: further inactivity before an aging entry is archived.
	pub archive_after_hours: i64,
	/// Tᶜ: time archived without restore before soft deletion.
	pub delete_after_hours: i64,
	/// TTL assigned when a write omits one. Zero means permanent.
	#[serde(default)]
	pub default_ttl_hours: i64,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Consolidation {
	pub batch_size: u32,
	pub min_age_days: i64,
	pub duplicate_similarity: f32,
	pub duplicate_tag_overlap: f32,
	pub summarize_after_days: i64,
	pub summarize_min_bytes: u32,
	pub timeline_max_items: u32,
	pub key_facts_max_items: u32,
	pub promote_team_access: u64,
	pub promote_global_access: u64,
	pub stale_after_days: i64,
	pub scope_entry_threshold: u32,
}
impl Default for Consolidation {
	fn default() -> Self {
		Self {
			batch_size: 50,
			min_age_days: 7,
			duplicate_similarity: 0.8,
			duplicate_tag_overlap: 0.5,
			summarize_after_days: 30,
			summarize_min_bytes: 2_048,
			timeline_max_items: 5,
			key_facts_max_items: 5,
			promote_team_access: 10,
			promote_global_access: 50,
			stale_after_days: 60,
			scope_entry_threshold: 500,
		}
	}
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Conflict {
	pub default_strategy: String,
	pub rules: Vec<ConflictRule>,
	pub creator_ranks: HashMap<String, i32>,
}
impl Default for Conflict {
	fn default() -> Self {
		Self {
			default_strategy: "field_merge".to_string(),
			rules: Vec::new(),
			creator_ranks: HashMap::new(),
		}
	}
}

#[derive(Clone, Debug, Deserialize)]
pub struct ConflictRule {
	pub scope: Option<String>,
	pub entry_type: Option<String>,
	pub strategy: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Worker {
	pub sweep_interval_secs: u64,
	pub consolidation_interval_secs: u64,
	pub rebuild_interval_secs: u64,
}
impl Default for Worker {
	fn default() -> Self {
		Self {
			sweep_interval_secs: 300,
			consolidation_interval_secs: 3_600,
			rebuild_interval_secs: 21_600,
		}
	}
}

fn default_lock_stripes() -> u32 {
	64
}

fn default_max_content_terms() -> u32 {
	256
}

fn default_handoff_max_entries() -> u32 {
	20
}
