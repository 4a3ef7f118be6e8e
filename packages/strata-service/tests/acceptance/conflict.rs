use serde_json::json;
use uuid::Uuid;

use strata_domain::{
	EntryField, EntryPatch, EntryType, LifecycleState, Priority, ScopeKind, ScopeRef,
	conflict_policy::ConflictStrategy,
};
use strata_service::{
	ContradictionKind, ContradictionOutcome, ContradictionRequest, Error, QueryFilter,
	QueryRequest, TagFilter, UpdateConflictOutcome, UpdateConflictRequest, UpdateRequest,
};

use super::{Harness, draft};

fn content_patch(concept: &str, detail: &str) -> EntryPatch {
	EntryPatch { content: Some(json!({ "concept": concept, "detail": detail })), ..Default::default() }
}

/// A semantic team entry at version 3. Team-scoped semantic entries fall under field merge.
async fn entry_at_version_three(harness: &Harness) -> Uuid {
	let id = harness
		.create(draft(
			EntryType::Semantic,
			ScopeKind::Team,
			"platform",
			&["cache"],
			json!({ "concept": "Read-through cache", "detail": "TTL 60s" }),
		))
		.await;

	for version in 1..3 {
		harness
			.service
			.update(UpdateRequest {
				id,
				expected_version: version,
				actor: "alice".to_string(),
				patch: EntryPatch {
					confidence: Some(0.5 + version as f32 * 0.1),
					..Default::default()
				},
			})
			.await
			.expect("Setup update must succeed.");
	}

	id
}

#[tokio::test]
async fn concurrent_disjoint_updates_merge_into_version_five() {
	let harness = Harness::new().await;
	let id = entry_at_version_three(&harness).await;
	let first = harness
		.service
		.update(UpdateRequest {
			id,
			expected_version: 3,
			actor: "alice".to_string(),
			patch: content_patch("Write-through cache", "TTL 60s"),
		})
		.await
		.expect("First writer must win.");

	assert_eq!(first.version, 4);

	let second_patch = content_patch("Read-through cache", "TTL 300s");
	let stale = harness
		.service
		.update(UpdateRequest {
			id,
			expected_version: 3,
			actor: "bob".to_string(),
			patch: second_patch.clone(),
		})
		.await;

	assert!(matches!(stale, Err(Error::Conflict { .. })));

	let resolved = harness
		.service
		.resolve_update_conflict(UpdateConflictRequest {
			id,
			expected_version: 3,
			actor: "bob".to_string(),
			patch: second_patch,
			strategy: None,
		})
		.await
		.expect("Resolution must succeed.");

	assert_eq!(resolved.strategy, ConflictStrategy::FieldMerge);
	assert!(matches!(resolved.outcome, UpdateConflictOutcome::Applied { version: 5 }));
	assert!(resolved.audit_id.is_some());

	let merged = harness.service.peek(id).await.expect("Peek must succeed.");

	assert_eq!(merged.version, 5);
	assert_eq!(merged.content, json!({ "concept": "Write-through cache", "detail": "TTL 300s" }));
}

#[tokio::test]
async fn overlapping_updates_route_to_manual() {
	let harness = Harness::new().await;
	let id = entry_at_version_three(&harness).await;

	harness
		.service
		.update(UpdateRequest {
			id,
			expected_version: 3,
			actor: "alice".to_string(),
			patch: content_patch("Write-through cache", "TTL 60s"),
		})
		.await
		.expect("First writer must win.");

	let resolved = harness
		.service
		.resolve_update_conflict(UpdateConflictRequest {
			id,
			expected_version: 3,
			actor: "bob".to_string(),
			patch: content_patch("Write-behind cache", "TTL 60s"),
			strategy: None,
		})
		.await
		.expect("Resolution must succeed.");

	match resolved.outcome {
		UpdateConflictOutcome::Manual { current, overlapping, .. } => {
			assert_eq!(current.version, 4);
			assert_eq!(overlapping, vec![EntryField::ContentKey("concept".to_string())]);
		},
		other => panic!("Expected a manual outcome, got {other:?}."),
	}

	assert_eq!(harness.service.peek(id).await.expect("Peek must succeed.").version, 4);
}

#[tokio::test]
async fn critical_entries_never_resolve_by_last_writer() {
	let harness = Harness::new().await;
	let mut critical = draft(
		EntryType::Factual,
		ScopeKind::Team,
		"platform",
		&["oncall"],
		json!({ "statement": "Pager rotation is weekly." }),
	);

	critical.priority = Priority::Critical;

	let id = harness.create(critical).await;
	let patch = |statement: &str| EntryPatch {
		content: Some(json!({ "statement": statement })),
		..Default::default()
	};

	harness
		.service
		.update(UpdateRequest {
			id,
			expected_version: 1,
			actor: "alice".to_string(),
			patch: patch("Pager rotation is biweekly."),
		})
		.await
		.expect("Fresh update must succeed.");

	let resolved = harness
		.service
		.resolve_update_conflict(UpdateConflictRequest {
			id,
			expected_version: 1,
			actor: "bob".to_string(),
			patch: patch("Pager rotation is daily."),
			strategy: Some(ConflictStrategy::LastWriterWins),
		})
		.await
		.expect("Resolution must succeed.");

	assert_eq!(resolved.strategy, ConflictStrategy::Manual);
	assert!(matches!(resolved.outcome, UpdateConflictOutcome::Manual { .. }));
	assert_eq!(
		harness.service.peek(id).await.expect("Peek must succeed.").content["statement"],
		"Pager rotation is biweekly."
	);
}

#[tokio::test]
async fn authority_wins_follows_creator_rank() {
	let harness = Harness::new().await;
	let id = entry_at_version_three(&harness).await;
	let request = |actor: &str, version: u64, detail: &str| UpdateConflictRequest {
		id,
		expected_version: version,
		actor: actor.to_string(),
		patch: content_patch("Read-through cache", detail),
		strategy: Some(ConflictStrategy::AuthorityWins),
	};
	let outranked = harness
		.service
		.resolve_update_conflict(request("bob", 2, "TTL 1s"))
		.await
		.expect("Resolution must succeed.");

	assert!(matches!(outranked.outcome, UpdateConflictOutcome::Rejected { .. }));
	assert!(outranked.audit_id.is_some());

	let senior = harness
		.service
		.resolve_update_conflict(request("alice", 2, "TTL 90s"))
		.await
		.expect("Resolution must succeed.");

	assert!(matches!(senior.outcome, UpdateConflictOutcome::Applied { version: 4 }));
}

#[tokio::test]
async fn branch_and_flag_keeps_both_versions() {
	let harness = Harness::new().await;
	let id = entry_at_version_three(&harness).await;
	let resolved = harness
		.service
		.resolve_update_conflict(UpdateConflictRequest {
			id,
			expected_version: 1,
			actor: "bob".to_string(),
			patch: content_patch("Cache aside", "TTL 10s"),
			strategy: Some(ConflictStrategy::BranchAndFlag),
		})
		.await
		.expect("Resolution must succeed.");
	let UpdateConflictOutcome::Branched { branch_id } = resolved.outcome else {
		panic!("Expected a branched outcome.");
	};
	let original = harness.service.peek(id).await.expect("Original must stay live.");
	let branch = harness.service.peek(branch_id).await.expect("Branch must exist.");

	assert!(original.tags.contains("disputed"));
	assert_eq!(original.content["concept"], "Read-through cache");
	assert!(branch.tags.contains("disputed"));
	assert_eq!(branch.references, vec![id]);
	assert_eq!(branch.created_by, "bob");
	assert_eq!(branch.content["concept"], "Cache aside");
	assert_eq!(branch.version, 1);
}

#[tokio::test]
async fn latest_wins_supersedes_the_older_contradicting_fact() {
	let harness = Harness::new().await;
	let scope = ScopeRef::new(ScopeKind::Team, "platform");
	let older = harness
		.create(draft(
			EntryType::Factual,
			ScopeKind::Team,
			"platform",
			&["billing", "provider"],
			json!({ "statement": "Invoices are generated by Stripe every month." }),
		))
		.await;

	harness.advance_hours(3);

	let newer = harness
		.create(draft(
			EntryType::Factual,
			ScopeKind::Team,
			"platform",
			&["billing", "provider"],
			json!({ "statement": "Adyen replaced the old processor last quarter." }),
		))
		.await;
	let found =
		harness.service.detect_contradictions(&scope).await.expect("Detection must succeed.");

	assert_eq!(found.len(), 1);
	assert_eq!(found[0].kind, ContradictionKind::TagSet);
	assert_eq!(
		[found[0].left, found[0].right].into_iter().collect::<std::collections::BTreeSet<_>>(),
		[older, newer].into_iter().collect()
	);

	let resolved = harness
		.service
		.resolve_contradiction(ContradictionRequest {
			left: older,
			right: newer,
			actor: "alice".to_string(),
			strategy: None,
		})
		.await
		.expect("Resolution must succeed.");

	assert_eq!(resolved.strategy, ConflictStrategy::LastWriterWins);
	assert_eq!(resolved.outcome, ContradictionOutcome::Superseded { winner: newer, loser: older });

	let loser = harness.service.peek(older).await.expect("Loser stays readable.");

	assert_eq!(loser.superseded_by, Some(newer));
	assert_eq!(loser.lifecycle_state, LifecycleState::Archived);

	let response = harness
		.service
		.resolve(QueryRequest {
			filter: QueryFilter {
				tags: TagFilter { include: vec!["billing".to_string()], ..Default::default() },
				..Default::default()
			},
			..Default::default()
		})
		.await
		.expect("Query must succeed.");

	assert_eq!(response.items.iter().map(|item| item.id).collect::<Vec<_>>(), vec![newer]);
	assert!(
		harness.service.detect_contradictions(&scope).await.expect("Detection failed.").is_empty()
	);
}

#[tokio::test]
async fn manual_policy_leaves_contradictions_untouched() {
	let harness = Harness::new().await;
	let left = harness
		.create(draft(
			EntryType::Factual,
			ScopeKind::Global,
			"",
			&["region"],
			json!({ "statement": "Primary region is eu-west-1." }),
		))
		.await;
	let right = harness
		.create(draft(
			EntryType::Factual,
			ScopeKind::Global,
			"",
			&["region"],
			json!({ "statement": "We serve everything out of us-east-2 now." }),
		))
		.await;
	let resolved = harness
		.service
		.resolve_contradiction(ContradictionRequest {
			left,
			right,
			actor: "alice".to_string(),
			strategy: Some(ConflictStrategy::Manual),
		})
		.await
		.expect("Resolution must succeed.");

	assert_eq!(resolved.outcome, ContradictionOutcome::Manual);
	assert!(resolved.audit_id.is_none());

	for id in [left, right] {
		let entry = harness.service.peek(id).await.expect("Peek must succeed.");

		assert_eq!(entry.lifecycle_state, LifecycleState::Active);
		assert!(entry.superseded_by.is_none());
	}
}
