use strata_domain::{EntryPatch, MemoryEntry};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Validation failed ({reason_code}): {message}")]
	Validation { reason_code: String, message: String },
	#[error("Not found: {message}")]
	NotFound { message: String },
	#[error(
		"Version conflict on entry {}: expected version {expected_version}, found {}.",
		current.id,
		current.version
	)]
	Conflict { current: Box<MemoryEntry>, attempted: Box<EntryPatch>, expected_version: u64 },
	#[error("Invalid query: {message}")]
	InvalidQuery { message: String },
	#[error("Entry content is {size} bytes, above the {limit} byte limit.")]
	SizeLimitExceeded { size: usize, limit: usize },
	#[error("Index inconsistency: {message}")]
	IndexInconsistency { message: String },
	#[error("Consolidation failure: {message}")]
	ConsolidationFailure { message: String },
	#[error("Storage error: {message}")]
	Storage { message: String },
	#[error("Timeout: {message}")]
	Timeout { message: String },
}
impl Error {
	pub(crate) fn not_found(id: uuid::Uuid) -> Self {
		Self::NotFound { message: format!("Entry {id} not found.") }
	}

	pub(crate) fn validation(reason_code: &str, message: impl Into<String>) -> Self {
		Self::Validation { reason_code: reason_code.to_string(), message: message.into() }
	}
}

impl From<strata_storage::Error> for Error {
	fn from(err: strata_storage::Error) -> Self {
		match err {
			strata_storage::Error::NotFound(message) => Self::NotFound { message },
			strata_storage::Error::InvalidArgument(message) =>
				Self::Validation { reason_code: "REJECT_INVALID_ARGUMENT".to_string(), message },
			other => Self::Storage { message: other.to_string() },
		}
	}
}
