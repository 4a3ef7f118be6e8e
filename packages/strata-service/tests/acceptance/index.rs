use serde_json::json;

use strata_domain::{EntryType, ScopeKind, ScopeRef};
use strata_service::{DeleteRequest, QueryRequest};

use super::{Harness, draft};

#[tokio::test]
async fn rebuilding_twice_yields_identical_index_records() {
	let harness = Harness::new().await;
	let scope = ScopeRef::new(ScopeKind::Team, "platform");

	for i in 0..4 {
		harness
			.create(draft(
				EntryType::Factual,
				ScopeKind::Team,
				"platform",
				&["ops", if i % 2 == 0 { "even" } else { "odd" }],
				json!({ "statement": format!("Fact number {i}.") }),
			))
			.await;
	}

	let path = harness.service.store.root().join("index").join(format!("{}.json", scope.key()));
	let first_count = harness.service.rebuild(&scope).await.expect("Rebuild must succeed.");
	let first = std::fs::read(&path).expect("Index record must exist.");
	let second_count = harness.service.rebuild(&scope).await.expect("Rebuild must succeed.");
	let second = std::fs::read(&path).expect("Index record must exist.");

	assert_eq!(first_count, 4);
	assert_eq!(second_count, 4);
	assert_eq!(first, second);
}

#[tokio::test]
async fn rebuild_recovers_writes_that_missed_the_index() {
	let harness = Harness::new().await;
	let scope = ScopeRef::new(ScopeKind::Agent, "alice");
	let id = harness
		.create(draft(
			EntryType::Factual,
			ScopeKind::Agent,
			"alice",
			&["user"],
			json!({ "statement": "Prefers email." }),
		))
		.await;
	let mut orphan = harness.service.peek(id).await.expect("Peek must succeed.");

	orphan.id = uuid::Uuid::new_v4();

	harness.service.store.insert(&orphan).await.expect("Direct insert must succeed.");

	assert_eq!(harness.service.scope_len(&scope).await.expect("Index must load."), 1);

	let report =
		harness.service.rebuild_indexes(Some(scope.clone())).await.expect("Rebuild failed.");

	assert_eq!(report.rebuilt_scopes, 1);
	assert_eq!(report.indexed_entries, 2);
	assert_eq!(report.skipped_entries, 0);
	assert_eq!(harness.service.scope_len(&scope).await.expect("Index must load."), 2);

	let response =
		harness.service.resolve(QueryRequest::default()).await.expect("Query must succeed.");

	assert_eq!(response.items.len(), 2);
}

#[tokio::test]
async fn full_rebuild_drops_empty_scopes_and_skips_unreadable_records() {
	let harness = Harness::new().await;
	let session = ScopeRef::new(ScopeKind::Session, "s1");
	let team = ScopeRef::new(ScopeKind::Team, "platform");
	let scratch = harness
		.create(draft(EntryType::Working, ScopeKind::Session, "s1", &[], json!({ "note": "Tmp." })))
		.await;

	harness
		.create(draft(
			EntryType::Factual,
			ScopeKind::Team,
			"platform",
			&[],
			json!({ "statement": "Kept." }),
		))
		.await;
	harness
		.service
		.delete(DeleteRequest { id: scratch, actor: "alice".to_string(), hard: true })
		.await
		.expect("Hard delete must succeed.");

	let corrupt = uuid::Uuid::new_v4();

	std::fs::write(
		harness.service.store.root().join("entries").join(format!("{corrupt}.json")),
		b"{ not json",
	)
	.expect("Writing a corrupt record must succeed.");

	assert!(harness.service.known_scopes().await.expect("Scopes must list.").contains(&session));

	let report = harness.service.rebuild_indexes(None).await.expect("Rebuild must succeed.");

	assert_eq!(report.rebuilt_scopes, 1);
	assert_eq!(report.indexed_entries, 1);
	assert_eq!(report.skipped_entries, 1);

	let scopes = harness.service.known_scopes().await.expect("Scopes must list.");

	assert!(!scopes.contains(&session));
	assert!(scopes.contains(&team));
}
