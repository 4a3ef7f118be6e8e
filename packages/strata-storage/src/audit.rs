//! Append-only JSONL audit trail. One record per lifecycle, consolidation, or conflict action.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use tokio::{
	fs::{self, OpenOptions},
	io::AsyncWriteExt,
};
use uuid::Uuid;

use strata_domain::ScopeRef;

use crate::{Result, store::{AUDIT_FILE, Store}};

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
	Create,
	Update,
	SoftDelete,
	HardDelete,
	Purge,
	Restore,
	Protect,
	Unprotect,
	Archive,
	Age,
	Merge,
	Summarize,
	Promote,
	StaleArchive,
	ConflictResolved,
	Disputed,
	ConsolidationFailure,
	IndexRebuild,
	Handoff,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct AuditRecord {
	pub audit_id: Uuid,
	#[serde(with = "time::serde::rfc3339")]
	pub ts: OffsetDateTime,
	pub action: AuditAction,
	pub actor: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub scope: Option<ScopeRef>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub source_ids: Vec<Uuid>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub result_ids: Vec<Uuid>,
	#[serde(default, skip_serializing_if = "Value::is_null")]
	pub detail: Value,
}
impl AuditRecord {
	pub fn new(action: AuditAction, actor: impl Into<String>, ts: OffsetDateTime) -> Self {
		Self {
			audit_id: Uuid::new_v4(),
			ts,
			action,
			actor: actor.into(),
			scope: None,
			source_ids: Vec::new(),
			result_ids: Vec::new(),
			detail: Value::Null,
		}
	}

	pub fn scope(mut self, scope: &ScopeRef) -> Self {
		self.scope = Some(scope.clone());

		self
	}

	pub fn sources(mut self, ids: impl IntoIterator<Item = Uuid>) -> Self {
		self.source_ids.extend(ids);

		self
	}

	pub fn results(mut self, ids: impl IntoIterator<Item = Uuid>) -> Self {
		self.result_ids.extend(ids);

		self
	}

	pub fn detail(mut self, detail: Value) -> Self {
		self.detail = detail;

		self
	}
}

impl Store {
	/// Appends one record and returns its id.
	pub async fn append_audit(&self, record: &AuditRecord) -> Result<Uuid> {
		let mut line = serde_json::to_vec(record)?;

		line.push(b'\n');

		let _guard = self.audit_lock.lock().await;
		let mut file =
			OpenOptions::new().create(true).append(true).open(self.root().join(AUDIT_FILE)).await?;

		file.write_all(&line).await?;
		file.flush().await?;

		Ok(record.audit_id)
	}

	/// Reads the whole trail in append order. Torn or foreign lines are skipped.
	pub async fn read_audit(&self) -> Result<Vec<AuditRecord>> {
		let raw = match fs::read_to_string(self.root().join(AUDIT_FILE)).await {
			Ok(raw) => raw,
			Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
			Err(err) => return Err(err.into()),
		};
		let mut records = Vec::new();

		for (line_no, line) in raw.lines().enumerate() {
			if line.trim().is_empty() {
				continue;
			}

			match serde_json::from_str(line) {
				Ok(record) => records.push(record),
				Err(err) => {
					tracing::warn!(error = %err, line = line_no + 1, "Skipping malformed audit line.");
				},
			}
		}

		Ok(records)
	}
}
