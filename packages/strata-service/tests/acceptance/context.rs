use serde_json::{Value, json};
use uuid::Uuid;

use strata_domain::{EntryType, ScopeKind, ScopeRef};
use strata_service::{
	ContextForm, ContextRequest, Error, HandoffRequest, QueryFilter, QueryRequest, TagFilter,
};

use super::{Harness, draft};

fn fact(i: usize) -> Value {
	json!({ "statement": format!("Service {i} owns billing."), "detail": "d".repeat(300) })
}

fn tagged(tag: &str) -> QueryRequest {
	QueryRequest {
		filter: QueryFilter {
			tags: TagFilter { include: vec![tag.to_string()], ..Default::default() },
			..Default::default()
		},
		..Default::default()
	}
}

#[tokio::test]
async fn budget_prefers_full_entries_then_summaries() {
	let harness = Harness::new().await;

	for i in 0..3 {
		harness
			.create(draft(EntryType::Factual, ScopeKind::Team, "platform", &["billing"], fact(i)))
			.await;
		harness.advance_hours(1);
	}

	let full_bytes = serde_json::to_vec(&fact(0)).expect("Content must serialize.").len();
	let package = harness
		.service
		.pack_context(ContextRequest {
			query: tagged("billing"),
			max_bytes: full_bytes * 2 + 40,
			must_include: Vec::new(),
		})
		.await
		.expect("Packing must succeed.");
	let forms = package.items.iter().map(|item| item.form).collect::<Vec<_>>();

	assert_eq!(forms, vec![ContextForm::Full, ContextForm::Full, ContextForm::Summary]);
	assert_eq!(package.items[2].content, json!("Service 0 owns billing."));
	assert!(package.used_bytes <= full_bytes * 2 + 40);
	assert_eq!(package.dropped, 0);
	assert!(package.items.windows(2).all(|pair| pair[0].score >= pair[1].score));

	let tiny = harness
		.service
		.pack_context(ContextRequest {
			query: tagged("billing"),
			max_bytes: 10,
			must_include: Vec::new(),
		})
		.await
		.expect("Packing must succeed.");

	assert!(tiny.items.is_empty());
	assert_eq!(tiny.dropped, 3);
}

#[tokio::test]
async fn must_include_entries_survive_any_budget() {
	let harness = Harness::new().await;
	let pinned = harness
		.create(draft(
			EntryType::Factual,
			ScopeKind::Agent,
			"alice",
			&["pinned"],
			json!({ "statement": "Never page the CFO." }),
		))
		.await;

	harness
		.create(draft(EntryType::Factual, ScopeKind::Team, "platform", &["billing"], fact(1)))
		.await;

	let missing = Uuid::new_v4();
	let package = harness
		.service
		.pack_context(ContextRequest {
			query: tagged("billing"),
			max_bytes: 5,
			must_include: vec![pinned, missing, pinned],
		})
		.await
		.expect("Packing must succeed.");

	assert_eq!(package.items.len(), 1);
	assert_eq!(package.items[0].id, pinned);
	assert_eq!(package.items[0].form, ContextForm::Full);
	assert!(package.items[0].score.is_none());
	assert_eq!(package.dropped, 1);
	assert_eq!(package.warnings.len(), 2);
}

#[tokio::test]
async fn handoff_stores_a_session_package() {
	let harness = Harness::new().await;
	let first = harness
		.create(draft(
			EntryType::Factual,
			ScopeKind::Agent,
			"alice",
			&["context"],
			json!({ "statement": "Customer is on the enterprise plan." }),
		))
		.await;
	let second = harness
		.create(draft(
			EntryType::Procedural,
			ScopeKind::Agent,
			"alice",
			&["context"],
			json!({ "steps": ["check invoice", "issue credit"] }),
		))
		.await;
	let unknown = Uuid::new_v4();
	let response = harness
		.service
		.handoff(HandoffRequest {
			from: "alice".to_string(),
			session_id: "ticket-42".to_string(),
			entry_ids: vec![first, second, unknown, first],
			working_state: json!({ "step": 2, "waiting_on": "finance" }),
			note: Some("Credit approved, waiting on finance.".to_string()),
		})
		.await
		.expect("Handoff must succeed.");

	assert_eq!(response.included, vec![first, second]);
	assert_eq!(response.missing, vec![unknown]);

	let package = harness.service.read(response.id).await.expect("Package must be readable.");

	assert_eq!(package.entry_type, EntryType::Working);
	assert_eq!(package.scope, ScopeRef::new(ScopeKind::Session, "ticket-42"));
	assert!(package.tags.contains("handoff"));
	assert_eq!(package.references, vec![first, second]);
	assert_eq!(package.content["note"], "Credit approved, waiting on finance.");
	assert_eq!(package.content["working_state"]["waiting_on"], "finance");
	assert_eq!(package.content["entries"].as_array().map(Vec::len), Some(2));
	assert_eq!(package.content["entries"][1]["content"]["steps"][1], "issue credit");
}

#[tokio::test]
async fn oversized_handoffs_are_rejected() {
	let harness = Harness::new().await;
	let ids = (0..21).map(|_| Uuid::new_v4()).collect::<Vec<_>>();
	let result = harness
		.service
		.handoff(HandoffRequest {
			from: "alice".to_string(),
			session_id: "s1".to_string(),
			entry_ids: ids,
			working_state: Value::Null,
			note: None,
		})
		.await;

	match result {
		Err(Error::Validation { reason_code, .. }) =>
			assert_eq!(reason_code, "REJECT_HANDOFF_TOO_LARGE"),
		other => panic!("Expected a validation error, got {other:?}."),
	}
}
