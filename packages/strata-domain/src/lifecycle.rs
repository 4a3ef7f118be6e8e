use strata_config::{Config, LifecycleThresholds};
use time::{Duration, OffsetDateTime};

use crate::entry::{EntryType, LifecycleState, MemoryEntry, Ttl};

pub fn thresholds_for(cfg: &Config, entry_type: EntryType) -> &LifecycleThresholds {
	match entry_type {
		EntryType::Factual => &cfg.lifecycle.factual,
		EntryType::Procedural => &cfg.lifecycle.procedural,
		EntryType::Episodic => &cfg.lifecycle.episodic,
		EntryType::Semantic => &cfg.lifecycle.semantic,
		EntryType::Working => &cfg.lifecycle.working,
	}
}

pub fn default_ttl(cfg: &Config, entry_type: EntryType) -> Ttl {
	let hours = thresholds_for(cfg, entry_type).default_ttl_hours;

	if hours > 0 { Ttl::Hours(hours) } else { Ttl::Permanent }
}

/// Tₐ for this entry. An explicit TTL shortens or lengthens the type default.
pub fn aging_after(entry: &MemoryEntry, cfg: &Config) -> Duration {
	match entry.ttl {
		Ttl::Hours(hours) if hours > 0 => Duration::hours(hours),
		_ => Duration::hours(thresholds_for(cfg, entry.entry_type).aging_after_hours),
	}
}

/// State the sweep should move `entry` to at `now`, if any.
///
/// Inactivity is cumulative, so one sweep may move an active entry straight to `Archived` when
/// it has been idle for Tₐ + Tᵦ. Permanent entries archive but are never deleted.
pub fn next_state(entry: &MemoryEntry, cfg: &Config, now: OffsetDateTime) -> Option<LifecycleState> {
	if entry.is_exempt() {
		return None;
	}

	let thresholds = thresholds_for(cfg, entry.entry_type);
	let aging_after = aging_after(entry, cfg);
	let archive_after = aging_after + Duration::hours(thresholds.archive_after_hours);
	let idle = now - entry.last_activity();

	match entry.lifecycle_state {
		LifecycleState::Active if idle >= archive_after => Some(LifecycleState::Archived),
		LifecycleState::Active if idle >= aging_after => Some(LifecycleState::Aging),
		LifecycleState::Aging if idle >= archive_after => Some(LifecycleState::Archived),
		LifecycleState::Archived
			if entry.ttl != Ttl::Permanent
				&& now - entry.state_changed_at
					>= Duration::hours(thresholds.delete_after_hours) =>
			Some(LifecycleState::Deleted),
		_ => None,
	}
}

/// Soft-deleted entries past the recovery window are purged for good.
pub fn should_purge(entry: &MemoryEntry, cfg: &Config, now: OffsetDateTime) -> bool {
	entry.lifecycle_state == LifecycleState::Deleted
		&& now - entry.state_changed_at >= Duration::hours(cfg.lifecycle.purge_deleted_after_hours)
}

pub fn within_recovery_window(entry: &MemoryEntry, cfg: &Config, now: OffsetDateTime) -> bool {
	entry.lifecycle_state == LifecycleState::Deleted && !should_purge(entry, cfg, now)
}
