use std::{collections::BTreeMap, sync::Arc, time::Duration as StdDuration};

use time::{Duration, OffsetDateTime};
use tokio::time as tokio_time;
use uuid::Uuid;

use crate::Result;
use strata_domain::ScopeRef;
use strata_service::{ConsolidationRequest, ConsolidationTrigger, StrataService};

const POLL_INTERVAL_MS: u64 = 1_000;

/// What a single scheduler tick ran.
#[derive(Clone, Debug, Default)]
pub struct TickReport {
	pub swept: bool,
	pub consolidated: Vec<(ScopeRef, ConsolidationTrigger)>,
	pub rebuilt: bool,
	pub failures: u64,
}

#[derive(Clone, Copy, Debug)]
struct PendingRun {
	cursor: Option<Uuid>,
	trigger: ConsolidationTrigger,
}

/// Decides which maintenance jobs are due. Time comes from the service clock, so tests can drive
/// the schedule without sleeping.
pub struct Scheduler {
	service: Arc<StrataService>,
	last_sweep: Option<OffsetDateTime>,
	last_consolidation: Option<OffsetDateTime>,
	last_rebuild: Option<OffsetDateTime>,
	pending: BTreeMap<ScopeRef, PendingRun>,
}
impl Scheduler {
	pub fn new(service: Arc<StrataService>) -> Self {
		Self {
			service,
			last_sweep: None,
			last_consolidation: None,
			last_rebuild: None,
			pending: BTreeMap::new(),
		}
	}

	/// Scopes whose consolidation stopped at a batch boundary and resume on the next tick.
	pub fn pending_scopes(&self) -> Vec<ScopeRef> {
		self.pending.keys().cloned().collect()
	}

	/// Runs every job that is due. Failures are logged and counted; they never abort the tick.
	pub async fn tick(&mut self) -> TickReport {
		let now = self.service.clock.now();
		let intervals = &self.service.cfg.worker;
		let sweep_due = is_due(self.last_sweep, now, intervals.sweep_interval_secs);
		let consolidation_due =
			is_due(self.last_consolidation, now, intervals.consolidation_interval_secs);
		let rebuild_due = is_due(self.last_rebuild, now, intervals.rebuild_interval_secs);
		let mut report = TickReport::default();

		if sweep_due {
			match self.sweep().await {
				Ok(()) => {
					report.swept = true;
					self.last_sweep = Some(now);
				},
				Err(err) => {
					report.failures += 1;

					tracing::error!(error = %err, "Lifecycle sweep failed.");
				},
			}

			// Threshold checks share the sweep cadence.
			if let Err(err) = self.plan_threshold_runs().await {
				report.failures += 1;

				tracing::error!(error = %err, "Scope threshold scan failed.");
			}
		}
		if consolidation_due {
			match self.plan_scheduled_runs().await {
				Ok(()) => self.last_consolidation = Some(now),
				Err(err) => {
					report.failures += 1;

					tracing::error!(error = %err, "Consolidation planning failed.");
				},
			}
		}

		self.drain_consolidation(&mut report).await;

		if rebuild_due {
			match self.service.rebuild_indexes(None).await {
				Ok(rebuilt) => {
					report.rebuilt = true;
					self.last_rebuild = Some(now);

					tracing::info!(
						scopes = rebuilt.rebuilt_scopes,
						entries = rebuilt.indexed_entries,
						skipped = rebuilt.skipped_entries,
						"Scheduled index rebuild finished."
					);
				},
				Err(err) => {
					report.failures += 1;

					tracing::error!(error = %err, "Scheduled index rebuild failed.");
				},
			}
		}

		report
	}

	async fn sweep(&self) -> Result<()> {
		let report = self.service.sweep().await?;

		if report.failed > 0 {
			tracing::warn!(failed = report.failed, "Lifecycle sweep skipped entries.");
		}

		Ok(())
	}

	async fn plan_threshold_runs(&mut self) -> Result<()> {
		for scope in self.service.scopes_over_threshold().await? {
			self.pending
				.entry(scope)
				.or_insert(PendingRun { cursor: None, trigger: ConsolidationTrigger::Threshold });
		}

		Ok(())
	}

	async fn plan_scheduled_runs(&mut self) -> Result<()> {
		for scope in self.service.known_scopes().await? {
			self.pending
				.entry(scope)
				.or_insert(PendingRun { cursor: None, trigger: ConsolidationTrigger::Schedule });
		}

		Ok(())
	}

	/// Runs one bounded batch per pending scope. Scopes with entries left keep their cursor.
	async fn drain_consolidation(&mut self, report: &mut TickReport) {
		let pending = std::mem::take(&mut self.pending);

		for (scope, run) in pending {
			let req = ConsolidationRequest {
				scope: scope.clone(),
				cursor: run.cursor,
				trigger: run.trigger,
			};

			match self.service.consolidate(req).await {
				Ok(batch) => {
					report.consolidated.push((scope.clone(), run.trigger));

					if !batch.failures.is_empty() {
						report.failures += batch.failures.len() as u64;
					}
					if let Some(cursor) = batch.next_cursor {
						self.pending.insert(scope, PendingRun { cursor: Some(cursor), ..run });
					}
				},
				Err(err) => {
					report.failures += 1;

					tracing::error!(error = %err, scope = %scope, "Consolidation batch failed.");
				},
			}
		}
	}
}

pub async fn run_worker(service: Arc<StrataService>) -> color_eyre::Result<()> {
	let mut scheduler = Scheduler::new(service);

	tracing::info!("Maintenance worker started.");

	loop {
		let report = scheduler.tick().await;

		if report.failures > 0 {
			tracing::warn!(failures = report.failures, "Maintenance tick finished with failures.");
		}

		tokio_time::sleep(StdDuration::from_millis(POLL_INTERVAL_MS)).await;
	}
}

fn is_due(last: Option<OffsetDateTime>, now: OffsetDateTime, interval_secs: u64) -> bool {
	match last {
		None => true,
		Some(last) => now - last >= Duration::seconds(interval_secs as i64),
	}
}
