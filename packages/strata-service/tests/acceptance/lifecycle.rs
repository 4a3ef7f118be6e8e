use serde_json::json;

use strata_domain::{EntryType, LifecycleState, Priority, ScopeKind};
use strata_service::{Error, LifecycleCommand, LifecycleRequest, QueryRequest};
use strata_storage::audit::AuditAction;

use super::{Harness, draft};

fn command(id: uuid::Uuid, command: LifecycleCommand) -> LifecycleRequest {
	LifecycleRequest { id, command, actor: "alice".to_string() }
}

async fn state(harness: &Harness, id: uuid::Uuid) -> LifecycleState {
	harness.service.peek(id).await.expect("Peek must succeed.").lifecycle_state
}

#[tokio::test]
async fn idle_fact_archives_after_ninety_one_days_and_restores() {
	let harness = Harness::new().await;
	let id = harness
		.create(draft(
			EntryType::Factual,
			ScopeKind::Agent,
			"alice",
			&["user", "preference"],
			json!({ "statement": "Prefers concise answers." }),
		))
		.await;

	harness.advance_days(91);

	let report = harness.service.sweep().await.expect("Sweep must succeed.");

	assert_eq!(report.archived, 1);
	assert_eq!(report.audit_ids.len(), 1);

	let archived = harness.service.peek(id).await.expect("Archived entries stay readable.");

	assert_eq!(archived.lifecycle_state, LifecycleState::Archived);
	assert_eq!(archived.version, 1);

	let default_query =
		harness.service.resolve(QueryRequest::default()).await.expect("Query must succeed.");

	assert!(default_query.items.is_empty());

	let restored = harness
		.service
		.lifecycle(command(id, LifecycleCommand::Restore))
		.await
		.expect("Restore must succeed.");

	assert_eq!(restored.lifecycle_state, LifecycleState::Active);
	assert!(restored.audit_id.is_some());

	let entry = harness.service.peek(id).await.expect("Peek must succeed.");

	assert_eq!(entry.access_count, 0);
	assert_eq!(entry.lifecycle_state, LifecycleState::Active);

	let quiet = harness.service.sweep().await.expect("Sweep must succeed.");

	assert_eq!(quiet.archived + quiet.aged, 0);
}

#[tokio::test]
async fn restored_entry_ages_for_the_full_window_before_archiving_again() {
	let harness = Harness::new().await;
	let id = harness
		.create(draft(
			EntryType::Factual,
			ScopeKind::Agent,
			"alice",
			&[],
			json!({ "statement": "Prefers morning meetings." }),
		))
		.await;

	harness.advance_days(91);
	harness.service.sweep().await.expect("Sweep must succeed.");
	harness
		.service
		.lifecycle(command(id, LifecycleCommand::Restore))
		.await
		.expect("Restore must succeed.");

	harness.advance_days(31);
	harness.service.sweep().await.expect("Sweep must succeed.");

	assert_eq!(state(&harness, id).await, LifecycleState::Aging);

	for _ in 0..58 {
		harness.advance_days(1);
		harness.service.sweep().await.expect("Sweep must succeed.");
	}

	assert_eq!(state(&harness, id).await, LifecycleState::Aging);

	harness.advance_days(1);
	harness.service.sweep().await.expect("Sweep must succeed.");

	assert_eq!(state(&harness, id).await, LifecycleState::Archived);
}

#[tokio::test]
async fn protected_and_critical_entries_never_leave_active() {
	let harness = Harness::new().await;
	let mut protected = draft(
		EntryType::Working,
		ScopeKind::Session,
		"s1",
		&[],
		json!({ "note": "Keep me." }),
	);

	protected.protected = true;

	let mut critical = draft(
		EntryType::Working,
		ScopeKind::Session,
		"s1",
		&[],
		json!({ "note": "Never lose this." }),
	);

	critical.priority = Priority::Critical;

	let protected = harness.create(protected).await;
	let critical = harness.create(critical).await;

	for _ in 0..4 {
		harness.advance_days(400);
		harness.service.sweep().await.expect("Sweep must succeed.");
	}

	for id in [protected, critical] {
		let entry = harness.service.peek(id).await.expect("Exempt entries must survive.");

		assert_eq!(entry.lifecycle_state, LifecycleState::Active);
	}
}

#[tokio::test]
async fn working_entries_walk_the_full_state_machine() {
	let harness = Harness::new().await;
	let id = harness
		.create(draft(
			EntryType::Working,
			ScopeKind::Session,
			"s1",
			&[],
			json!({ "note": "Draft plan." }),
		))
		.await;

	harness.advance_hours(25);

	let aged = harness.service.sweep().await.expect("Sweep must succeed.");

	assert_eq!(aged.aged, 1);
	assert_eq!(
		harness.service.peek(id).await.expect("Peek must succeed.").lifecycle_state,
		LifecycleState::Aging
	);

	harness.advance_hours(20);

	let archived = harness.service.sweep().await.expect("Sweep must succeed.");

	assert_eq!(archived.archived, 1);

	harness.advance_hours(49);

	let deleted = harness.service.sweep().await.expect("Sweep must succeed.");

	assert_eq!(deleted.deleted, 1);
	assert!(matches!(harness.service.peek(id).await, Err(Error::NotFound { .. })));

	harness.advance_hours(721);

	let purged = harness.service.sweep().await.expect("Sweep must succeed.");

	assert_eq!(purged.purged, 1);
	assert!(harness.service.store.try_load(id).await.expect("Load must not fail.").is_none());

	let actions = harness
		.service
		.store
		.read_audit()
		.await
		.expect("Audit log must load.")
		.into_iter()
		.filter(|record| record.source_ids.contains(&id))
		.map(|record| record.action)
		.collect::<Vec<_>>();

	assert_eq!(
		actions,
		vec![AuditAction::Age, AuditAction::Archive, AuditAction::SoftDelete, AuditAction::Purge]
	);
}

#[tokio::test]
async fn access_and_protect_revive_aging_entries() {
	let harness = Harness::new().await;
	let read_back = harness
		.create(draft(
			EntryType::Factual,
			ScopeKind::Agent,
			"alice",
			&[],
			json!({ "statement": "A." }),
		))
		.await;
	let pinned = harness
		.create(draft(
			EntryType::Factual,
			ScopeKind::Agent,
			"alice",
			&[],
			json!({ "statement": "B." }),
		))
		.await;

	harness.advance_days(31);
	harness.service.sweep().await.expect("Sweep must succeed.");

	let entry = harness.service.read(read_back).await.expect("Read must succeed.");

	assert_eq!(entry.lifecycle_state, LifecycleState::Active);

	let response = harness
		.service
		.lifecycle(command(pinned, LifecycleCommand::Protect))
		.await
		.expect("Protect must succeed.");

	assert!(response.protected);
	assert_eq!(response.lifecycle_state, LifecycleState::Active);

	let again = harness
		.service
		.lifecycle(command(pinned, LifecycleCommand::Protect))
		.await
		.expect("Repeated protect must succeed.");

	assert!(again.audit_id.is_none());
}

#[tokio::test]
async fn deleted_entries_cannot_be_archived() {
	let harness = Harness::new().await;
	let id = harness
		.create(draft(
			EntryType::Factual,
			ScopeKind::Agent,
			"alice",
			&[],
			json!({ "statement": "Gone." }),
		))
		.await;

	harness
		.service
		.delete(strata_service::DeleteRequest { id, actor: "alice".to_string(), hard: false })
		.await
		.expect("Delete must succeed.");

	match harness.service.lifecycle(command(id, LifecycleCommand::Archive)).await {
		Err(Error::Validation { reason_code, .. }) =>
			assert_eq!(reason_code, "REJECT_INVALID_TRANSITION"),
		other => panic!("Expected a validation error, got {other:?}."),
	}
}

#[tokio::test]
async fn sweep_batches_resume_from_their_cursor() {
	let harness = Harness::new().await;

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

	harness.advance_hours(25);

	let first = harness.service.sweep_batch(None, 2).await.expect("Batch must succeed.");

	assert_eq!(first.scanned, 2);
	assert_eq!(first.aged, 2);

	let cursor = first.next_cursor.expect("A cursor must be returned while entries remain.");
	let second = harness.service.sweep_batch(Some(cursor), 2).await.expect("Batch must succeed.");

	assert_eq!(second.scanned, 1);
	assert_eq!(second.aged, 1);
	assert!(second.next_cursor.is_none());

	let rerun = harness.service.sweep_batch(None, 10).await.expect("Batch must succeed.");

	assert_eq!(rerun.aged + rerun.archived, 0);
}
