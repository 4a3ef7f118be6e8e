pub mod admin;
pub mod conflict;
pub mod consolidation;
pub mod context;
pub mod create;
pub mod delete;
pub mod lifecycle;
pub mod read;
pub mod search;
pub mod update;

mod error;
mod index;

pub use admin::RebuildReport;
pub use conflict::{
	Contradiction, ContradictionKind, ContradictionOutcome, ContradictionRequest,
	ContradictionResponse, UpdateConflictOutcome, UpdateConflictRequest, UpdateConflictResponse,
};
pub use consolidation::{
	ConsolidationFailureItem, ConsolidationReport, ConsolidationRequest, ConsolidationTrigger,
};
pub use context::{
	ContextForm, ContextItem, ContextPackage, ContextRequest, HandoffRequest, HandoffResponse,
};
pub use create::CreateResponse;
pub use delete::{DeleteRequest, DeleteResponse};
pub use error::{Error, Result};
pub use lifecycle::{LifecycleCommand, LifecycleRequest, LifecycleResponse, SweepReport};
pub use search::{
	QueryFilter, QueryItem, QueryRequest, QueryResponse, ScopeSelector, SortOrder, TagFilter,
	TagMatch,
};
pub use update::{UpdateRequest, UpdateResponse};

use std::{
	collections::{BTreeSet, HashMap},
	future::Future,
	sync::Arc,
	time::Duration,
};

use serde_json::Value;
use tokio::sync::{Mutex, MutexGuard, RwLock};
use uuid::Uuid;

use strata_config::Config;
use strata_domain::{
	Clock, ScopeRef, SystemClock,
	writegate::{self, RejectCode},
};
use strata_storage::{
	audit::{AuditAction, AuditRecord},
	index::{Projection, ScopeIndex},
	store::Store,
};

/// Actor recorded on audit records written by background maintenance.
pub const SYSTEM_ACTOR: &str = "system";

pub struct StrataService {
	pub cfg: Config,
	pub store: Store,
	pub clock: Arc<dyn Clock>,
	indexes: RwLock<HashMap<ScopeRef, ScopeIndex>>,
	dirty_scopes: Mutex<BTreeSet<ScopeRef>>,
}
impl StrataService {
	pub fn new(cfg: Config, store: Store) -> Self {
		Self::with_clock(cfg, store, Arc::new(SystemClock))
	}

	pub fn with_clock(cfg: Config, store: Store, clock: Arc<dyn Clock>) -> Self {
		Self {
			cfg,
			store,
			clock,
			indexes: RwLock::new(HashMap::new()),
			dirty_scopes: Mutex::new(BTreeSet::new()),
		}
	}

	pub(crate) fn projection(&self) -> Projection {
		Projection::from_config(&self.cfg.memory)
	}

	pub(crate) fn operation_timeout(&self) -> Duration {
		Duration::from_millis(self.cfg.memory.operation_timeout_ms)
	}

	/// Runs `fut` under the configured operation timeout.
	pub(crate) async fn bounded<F, T>(&self, what: &str, fut: F) -> Result<T>
	where
		F: Future<Output = Result<T>>,
	{
		match tokio::time::timeout(self.operation_timeout(), fut).await {
			Ok(result) => result,
			Err(_) => Err(Error::Timeout { message: format!("{what} timed out.") }),
		}
	}

	/// Waits for the entry's write lock, giving up after the operation timeout.
	pub(crate) async fn lock_entry(&self, id: Uuid) -> Result<MutexGuard<'_, ()>> {
		tokio::time::timeout(self.operation_timeout(), self.store.lock(id))
			.await
			.map_err(|_| Error::Timeout { message: format!("Waiting for entry {id} timed out.") })
	}

	pub(crate) async fn lock_entries(&self, ids: &[Uuid]) -> Result<Vec<MutexGuard<'_, ()>>> {
		tokio::time::timeout(self.operation_timeout(), self.store.lock_many(ids))
			.await
			.map_err(|_| Error::Timeout { message: "Waiting for entry locks timed out.".to_string() })
	}

	pub(crate) async fn audit(&self, record: AuditRecord) -> Result<Uuid> {
		let action = record.action;
		let audit_id = self.store.append_audit(&record).await?;

		tracing::debug!(audit_id = %audit_id, action = ?action, "Audit record appended.");

		Ok(audit_id)
	}

	pub(crate) fn audit_record(&self, action: AuditAction, actor: &str) -> AuditRecord {
		AuditRecord::new(action, actor, self.clock.now())
	}
}

/// Maps a write-gate rejection onto the error taxonomy. Oversized payloads get their own variant.
pub(crate) fn rejected(code: RejectCode, content: Option<&Value>, limit: usize) -> Error {
	if code == RejectCode::RejectTooLarge {
		let size = content
			.and_then(|content| serde_json::to_vec(content).ok())
			.map(|bytes| bytes.len())
			.unwrap_or(limit.saturating_add(1));

		return Error::SizeLimitExceeded { size, limit };
	}

	Error::Validation { reason_code: code.as_str().to_string(), message: reject_message(code) }
}

fn reject_message(code: RejectCode) -> String {
	let message = match code {
		RejectCode::RejectEmptyCreator => "created_by must be non-empty.",
		RejectCode::RejectInvalidScopeId => "scope_id must be 1-64 letters, digits, '_' or '-'.",
		RejectCode::RejectInvalidTag => "Tags must be lowercase and match [a-z0-9][a-z0-9_.:/-]*.",
		RejectCode::RejectTooManyTags => "Too many tags.",
		RejectCode::RejectInvalidSubtype => "subtype is too long or contains control characters.",
		RejectCode::RejectInvalidConfidence => "confidence must be in the range 0.0-1.0.",
		RejectCode::RejectInvalidTtl => "ttl hours must be greater than zero.",
		RejectCode::RejectContentNotObject => "content must be a JSON object.",
		RejectCode::RejectMissingPrimaryField => "content is missing its primary field.",
		RejectCode::RejectTooLarge => "content exceeds the size limit.",
		RejectCode::RejectEmptyPatch => "No updates provided.",
	};

	message.to_string()
}

pub(crate) fn max_entry_bytes(cfg: &Config) -> usize {
	cfg.memory.max_entry_bytes as usize
}

pub(crate) fn gate_content_size(cfg: &Config, content: &Value) -> Result<usize> {
	let limit = max_entry_bytes(cfg);

	writegate::content_size(content, limit).map_err(|code| rejected(code, Some(content), limit))
}
