use serde_json::json;

use strata_domain::{EntryPatch, EntryType, LifecycleState, ScopeKind};
use strata_service::{
	DeleteRequest, Error, LifecycleCommand, LifecycleRequest, QueryRequest, UpdateRequest,
};

use super::{Harness, draft};

#[tokio::test]
async fn create_then_read_returns_the_written_entry() {
	let harness = Harness::new().await;
	let content = json!({ "statement": "User prefers dark mode.", "source": "settings" });
	let id = harness
		.create(draft(
			EntryType::Factual,
			ScopeKind::Agent,
			"alice",
			&["User", "preference"],
			content.clone(),
		))
		.await;
	let entry = harness.service.read(id).await.expect("Read must succeed.");

	assert_eq!(entry.content, content);
	assert_eq!(entry.version, 1);
	assert_eq!(entry.access_count, 1);
	assert_eq!(entry.lifecycle_state, LifecycleState::Active);
	assert!(entry.tags.contains("user"));

	let again = harness.service.read(id).await.expect("Second read must succeed.");

	assert_eq!(again.access_count, 2);
	assert_eq!(again.version, 1);
}

#[tokio::test]
async fn stale_updates_conflict_and_versions_only_grow() {
	let harness = Harness::new().await;
	let id = harness
		.create(draft(
			EntryType::Factual,
			ScopeKind::Team,
			"platform",
			&["db"],
			json!({ "statement": "Primary is Postgres 15." }),
		))
		.await;
	let patch = |statement: &str| EntryPatch {
		content: Some(json!({ "statement": statement })),
		..Default::default()
	};
	let first = harness
		.service
		.update(UpdateRequest {
			id,
			expected_version: 1,
			actor: "alice".to_string(),
			patch: patch("Primary is Postgres 16."),
		})
		.await
		.expect("Fresh update must succeed.");

	assert_eq!(first.version, 2);

	let stale = harness
		.service
		.update(UpdateRequest {
			id,
			expected_version: 1,
			actor: "bob".to_string(),
			patch: patch("Primary is Postgres 14."),
		})
		.await;

	match stale {
		Err(Error::Conflict { current, attempted, expected_version }) => {
			assert_eq!(current.version, 2);
			assert_eq!(current.content["statement"], "Primary is Postgres 16.");
			assert_eq!(attempted.content, Some(json!({ "statement": "Primary is Postgres 14." })));
			assert_eq!(expected_version, 1);
		},
		other => panic!("Expected a version conflict, got {other:?}."),
	}

	let stored = harness.service.peek(id).await.expect("Peek must succeed.");

	assert_eq!(stored.version, 2);
	assert_eq!(stored.content["statement"], "Primary is Postgres 16.");

	let second = harness
		.service
		.update(UpdateRequest {
			id,
			expected_version: 2,
			actor: "bob".to_string(),
			patch: patch("Primary is Postgres 17."),
		})
		.await
		.expect("Update on the current version must succeed.");

	assert_eq!(second.version, 3);

	let snapshot = harness
		.service
		.store
		.load_version(id, 2)
		.await
		.expect("Version snapshot must load.")
		.expect("Version 2 snapshot must exist.");

	assert_eq!(snapshot.content["statement"], "Primary is Postgres 16.");
}

#[tokio::test]
async fn writes_are_gated() {
	let harness = Harness::new().await;
	let mut anonymous =
		draft(EntryType::Factual, ScopeKind::Agent, "alice", &[], json!({ "statement": "x" }));

	anonymous.created_by = "  ".to_string();

	match harness.service.create(anonymous).await {
		Err(Error::Validation { reason_code, .. }) => assert_eq!(reason_code, "REJECT_EMPTY_CREATOR"),
		other => panic!("Expected a validation error, got {other:?}."),
	}

	let missing_primary =
		draft(EntryType::Procedural, ScopeKind::Agent, "alice", &[], json!({ "note": "x" }));

	match harness.service.create(missing_primary).await {
		Err(Error::Validation { reason_code, .. }) =>
			assert_eq!(reason_code, "REJECT_MISSING_PRIMARY_FIELD"),
		other => panic!("Expected a validation error, got {other:?}."),
	}

	let oversized = draft(
		EntryType::Factual,
		ScopeKind::Agent,
		"alice",
		&[],
		json!({ "statement": "x".repeat(11_000) }),
	);

	match harness.service.create(oversized).await {
		Err(Error::SizeLimitExceeded { size, limit }) => {
			assert_eq!(limit, 10_240);
			assert!(size > limit);
		},
		other => panic!("Expected a size error, got {other:?}."),
	}
}

#[tokio::test]
async fn soft_delete_hides_the_entry_until_restored() {
	let harness = Harness::new().await;
	let id = harness
		.create(draft(
			EntryType::Factual,
			ScopeKind::Agent,
			"alice",
			&["user"],
			json!({ "statement": "Timezone is UTC+2." }),
		))
		.await;
	let deleted = harness
		.service
		.delete(DeleteRequest { id, actor: "alice".to_string(), hard: false })
		.await
		.expect("Soft delete must succeed.");

	assert!(deleted.audit_id.is_some());
	assert!(matches!(harness.service.read(id).await, Err(Error::NotFound { .. })));

	let results =
		harness.service.resolve(QueryRequest::default()).await.expect("Query must succeed.");

	assert!(results.items.iter().all(|item| item.id != id));

	let again = harness
		.service
		.delete(DeleteRequest { id, actor: "alice".to_string(), hard: false })
		.await
		.expect("Repeated soft delete must succeed.");

	assert!(again.audit_id.is_none());

	let restored = harness
		.service
		.lifecycle(LifecycleRequest {
			id,
			command: LifecycleCommand::Restore,
			actor: "alice".to_string(),
		})
		.await
		.expect("Restore inside the recovery window must succeed.");

	assert_eq!(restored.lifecycle_state, LifecycleState::Active);
	assert!(harness.service.read(id).await.is_ok());
}

#[tokio::test]
async fn hard_delete_purges_record_and_history() {
	let harness = Harness::new().await;
	let id = harness
		.create(draft(
			EntryType::Working,
			ScopeKind::Session,
			"s1",
			&[],
			json!({ "note": "Scratch." }),
		))
		.await;

	harness
		.service
		.delete(DeleteRequest { id, actor: "alice".to_string(), hard: true })
		.await
		.expect("Hard delete must succeed.");

	assert!(harness.service.store.try_load(id).await.expect("Load must not fail.").is_none());
	assert!(
		harness.service.store.load_version(id, 1).await.expect("Load must not fail.").is_none()
	);

	let restore = harness
		.service
		.lifecycle(LifecycleRequest {
			id,
			command: LifecycleCommand::Restore,
			actor: "alice".to_string(),
		})
		.await;

	assert!(matches!(restore, Err(Error::NotFound { .. })));
}
