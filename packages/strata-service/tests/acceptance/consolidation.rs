use serde_json::json;
use uuid::Uuid;

use strata_domain::{EntryType, LifecycleState, ScopeKind, ScopeRef};
use strata_service::{ConsolidationRequest, ConsolidationTrigger};
use strata_storage::audit::AuditAction;

use super::{Harness, draft};

fn request(scope: ScopeRef) -> ConsolidationRequest {
	ConsolidationRequest { scope, cursor: None, trigger: ConsolidationTrigger::Explicit }
}

#[tokio::test]
async fn duplicates_merge_into_the_newer_entry() {
	let harness = Harness::new().await;
	let scope = ScopeRef::new(ScopeKind::Team, "platform");
	let content = json!({ "statement": "The primary database is Postgres 16." });
	let older = harness
		.create(draft(
			EntryType::Factual,
			ScopeKind::Team,
			"platform",
			&["db", "postgres", "ops"],
			content.clone(),
		))
		.await;

	harness.service.read(older).await.expect("Read must succeed.");
	harness.service.read(older).await.expect("Read must succeed.");
	harness.advance_hours(1);

	let newer = harness
		.create(draft(EntryType::Factual, ScopeKind::Team, "platform", &["db", "postgres"], content))
		.await;

	harness.advance_days(8);

	let report = harness.service.consolidate(request(scope)).await.expect("Run must succeed.");

	assert_eq!(report.processed, 2);
	assert_eq!(report.merged, 1);
	assert!(report.failures.is_empty());
	assert!(report.next_cursor.is_none());

	let winner = harness.service.peek(newer).await.expect("Winner must stay live.");
	let loser = harness.service.peek(older).await.expect("Loser stays readable while archived.");

	assert_eq!(
		winner.tags.iter().map(String::as_str).collect::<Vec<_>>(),
		vec!["db", "ops", "postgres"]
	);
	assert_eq!(winner.access_count, 2);
	assert_eq!(winner.supersedes, Some(older));
	assert!(winner.references.contains(&older));
	assert_eq!(winner.version, 2);
	assert_eq!(loser.superseded_by, Some(newer));
	assert_eq!(loser.lifecycle_state, LifecycleState::Archived);

	let merges = harness
		.service
		.store
		.read_audit()
		.await
		.expect("Audit log must load.")
		.into_iter()
		.filter(|record| record.action == AuditAction::Merge)
		.collect::<Vec<_>>();

	assert_eq!(merges.len(), 1);
	assert_eq!(merges[0].result_ids, vec![newer]);
	assert!(report.audit_ids.contains(&merges[0].audit_id));
}

#[tokio::test]
async fn young_entries_and_decisions_are_left_alone() {
	let harness = Harness::new().await;
	let scope = ScopeRef::new(ScopeKind::Team, "platform");
	let mut decision = draft(
		EntryType::Semantic,
		ScopeKind::Team,
		"platform",
		&["architecture"],
		json!({ "concept": "We use event sourcing for billing." }),
	);

	decision.subtype = "decision".to_string();

	harness.create(decision.clone()).await;
	harness.create(decision).await;
	harness.advance_days(8);

	let report =
		harness.service.consolidate(request(scope.clone())).await.expect("Run must succeed.");

	assert_eq!(report.merged, 0);

	let fact = json!({ "statement": "Staging resets nightly." });

	harness
		.create(draft(EntryType::Factual, ScopeKind::Team, "platform", &["env"], fact.clone()))
		.await;
	harness
		.create(draft(EntryType::Factual, ScopeKind::Team, "platform", &["env"], fact))
		.await;

	let young = harness.service.consolidate(request(scope)).await.expect("Run must succeed.");

	assert_eq!(young.merged, 0);
}

#[tokio::test]
async fn old_large_episodes_are_summarized_once() {
	let harness = Harness::new().await;
	let scope = ScopeRef::new(ScopeKind::Session, "s1");
	let timeline = (0..8).map(|i| format!("10:0{i} step {i}")).collect::<Vec<_>>();
	let key_facts = (0..8).map(|i| format!("fact {i}")).collect::<Vec<_>>();
	let id = harness
		.create(draft(
			EntryType::Episodic,
			ScopeKind::Session,
			"s1",
			&["incident"],
			json!({
				"description": "Payments outage caused by an expired certificate.",
				"outcome": "Certificate rotated and alerting added.",
				"key_facts": key_facts,
				"timeline": timeline,
				"raw_log": "x".repeat(2_500),
			}),
		))
		.await;

	harness.advance_days(31);

	let report =
		harness.service.consolidate(request(scope.clone())).await.expect("Run must succeed.");

	assert_eq!(report.summarized, 1);

	let entry = harness.service.peek(id).await.expect("Peek must succeed.");

	assert!(entry.tags.contains("summarized"));
	assert_eq!(entry.version, 2);
	assert_eq!(entry.content["outcome"], "Certificate rotated and alerting added.");
	assert_eq!(entry.content["timeline"].as_array().map(Vec::len), Some(5));
	assert_eq!(entry.content["key_facts"].as_array().map(Vec::len), Some(5));
	assert!(entry.content.get("raw_log").is_none());

	let again = harness.service.consolidate(request(scope)).await.expect("Run must succeed.");

	assert_eq!(again.summarized, 0);
}

#[tokio::test]
async fn popular_agent_procedures_promote_with_lineage() {
	let harness = Harness::new().await;
	let scope = ScopeRef::new(ScopeKind::Agent, "alice");
	let id = harness
		.create(draft(
			EntryType::Procedural,
			ScopeKind::Agent,
			"alice",
			&["deployment"],
			json!({ "steps": ["build", "canary", "ship"] }),
		))
		.await;

	for _ in 0..10 {
		harness.service.read(id).await.expect("Read must succeed.");
	}

	harness.advance_days(8);

	let report =
		harness.service.consolidate(request(scope.clone())).await.expect("Run must succeed.");

	assert_eq!(report.promoted, 1);

	let team = ScopeRef::new(ScopeKind::Team, "platform");
	let copy_id = Uuid::new_v5(&id, team.key().as_bytes());
	let copy = harness.service.peek(copy_id).await.expect("Promoted copy must exist.");

	assert_eq!(copy.scope, team);
	assert_eq!(copy.promoted_from, Some(id));
	assert_eq!(copy.references.first(), Some(&id));
	assert_eq!(copy.version, 1);
	assert_eq!(copy.access_count, 0);
	assert_eq!(copy.content, json!({ "steps": ["build", "canary", "ship"] }));

	let again = harness.service.consolidate(request(scope)).await.expect("Run must succeed.");

	assert_eq!(again.promoted, 0);
}

#[tokio::test]
async fn untouched_entries_are_archived_as_stale() {
	let harness = Harness::new().await;
	let scope = ScopeRef::new(ScopeKind::Agent, "bob");
	let id = harness
		.create(draft(
			EntryType::Semantic,
			ScopeKind::Agent,
			"bob",
			&[],
			json!({ "concept": "Idempotency keys expire after a day." }),
		))
		.await;

	harness.advance_days(61);

	let report = harness.service.consolidate(request(scope)).await.expect("Run must succeed.");

	assert_eq!(report.archived, 1);
	assert_eq!(
		harness.service.peek(id).await.expect("Peek must succeed.").lifecycle_state,
		LifecycleState::Archived
	);

	let audit = harness.service.store.read_audit().await.expect("Audit log must load.");

	assert!(audit.iter().any(|record| record.action == AuditAction::StaleArchive));
}

#[tokio::test]
async fn runs_are_bounded_and_resume_from_the_cursor() {
	let harness = Harness::with_config(|cfg| {
		cfg.consolidation.batch_size = 2;
		cfg.consolidation.scope_entry_threshold = 2;
	})
	.await;
	let scope = ScopeRef::new(ScopeKind::Session, "s1");

	for i in 0..3 {
		harness
			.create(draft(
				EntryType::Working,
				ScopeKind::Session,
				"s1",
				&[],
				json!({ "note": format!("Note {i}.") }),
			))
			.await;
	}

	harness
		.create(draft(EntryType::Working, ScopeKind::Session, "s2", &[], json!({ "note": "Solo." })))
		.await;

	assert_eq!(
		harness.service.scopes_over_threshold().await.expect("Threshold scan must succeed."),
		vec![scope.clone()]
	);

	let first = harness.service.consolidate(request(scope.clone())).await.expect("Run failed.");

	assert_eq!(first.processed, 2);

	let cursor = first.next_cursor.expect("A cursor must be returned while entries remain.");
	let second = harness
		.service
		.consolidate(ConsolidationRequest {
			scope,
			cursor: Some(cursor),
			trigger: ConsolidationTrigger::Threshold,
		})
		.await
		.expect("Run failed.");

	assert_eq!(second.processed, 1);
	assert_eq!(second.trigger, ConsolidationTrigger::Threshold);
	assert!(second.next_cursor.is_none());
}

#[tokio::test]
async fn interrupted_merge_finishes_without_absorbing_twice() {
	let harness = Harness::new().await;
	let scope = ScopeRef::new(ScopeKind::Team, "platform");
	let content = json!({ "statement": "Deploys freeze on Fridays." });
	let older = harness
		.create(draft(EntryType::Factual, ScopeKind::Team, "platform", &["deploy"], content.clone()))
		.await;

	harness.service.read(older).await.expect("Read must succeed.");
	harness.service.read(older).await.expect("Read must succeed.");
	harness.advance_hours(1);

	let newer = harness
		.create(draft(EntryType::Factual, ScopeKind::Team, "platform", &["deploy"], content))
		.await;
	// The winner was written but archiving the loser never happened.
	let mut winner = harness.service.peek(newer).await.expect("Peek must succeed.");

	winner.access_count = 2;
	winner.supersedes = Some(older);
	winner.references.push(older);

	harness.service.store.save(&winner).await.expect("Direct save must succeed.");
	harness.advance_days(8);

	let report = harness.service.consolidate(request(scope)).await.expect("Run must succeed.");

	assert_eq!(report.merged, 1);
	assert!(report.failures.is_empty());

	let winner = harness.service.peek(newer).await.expect("Winner must stay live.");
	let loser = harness.service.peek(older).await.expect("Loser stays readable while archived.");

	assert_eq!(winner.access_count, 2);
	assert_eq!(winner.version, 1);
	assert_eq!(winner.references, vec![older]);
	assert_eq!(loser.superseded_by, Some(newer));
	assert_eq!(loser.lifecycle_state, LifecycleState::Archived);
}

#[tokio::test]
async fn failed_item_is_isolated_from_the_rest_of_the_batch() {
	let harness = Harness::new().await;
	let scope = ScopeRef::new(ScopeKind::Agent, "alice");
	let procedure = harness
		.create(draft(
			EntryType::Procedural,
			ScopeKind::Agent,
			"alice",
			&["deployment"],
			json!({ "steps": ["build", "canary", "ship"] }),
		))
		.await;

	for _ in 0..10 {
		harness.service.read(procedure).await.expect("Read must succeed.");
	}

	let fact = json!({ "statement": "Alice is on call this week." });
	let older = harness
		.create(draft(EntryType::Factual, ScopeKind::Agent, "alice", &["oncall"], fact.clone()))
		.await;

	harness.advance_hours(1);

	let newer = harness
		.create(draft(EntryType::Factual, ScopeKind::Agent, "alice", &["oncall"], fact))
		.await;
	let team = ScopeRef::new(ScopeKind::Team, "platform");
	let blocked = Uuid::new_v5(&procedure, team.key().as_bytes());

	// A directory where the promoted copy should land makes promotion fail.
	std::fs::create_dir_all(
		harness.service.store.root().join("entries").join(format!("{blocked}.json")),
	)
	.expect("Blocking directory must be created.");
	harness.advance_days(8);

	let report = harness.service.consolidate(request(scope)).await.expect("Run must succeed.");

	assert_eq!(report.merged, 1);
	assert_eq!(report.promoted, 0);
	assert_eq!(report.failures.len(), 1);
	assert_eq!(report.failures[0].entry_id, procedure);
	assert_eq!(report.failures[0].stage, "promote");
	assert_eq!(
		harness.service.peek(older).await.expect("Peek must succeed.").superseded_by,
		Some(newer)
	);

	let failures = harness
		.service
		.store
		.read_audit()
		.await
		.expect("Audit log must load.")
		.into_iter()
		.filter(|record| record.action == AuditAction::ConsolidationFailure)
		.collect::<Vec<_>>();

	assert_eq!(failures.len(), 1);
	assert_eq!(failures[0].source_ids, vec![procedure]);
	assert!(report.audit_ids.contains(&failures[0].audit_id));
}
