use uuid::Uuid;

use crate::{Error, Result, StrataService};
use strata_domain::{LifecycleState, MemoryEntry};

impl StrataService {
	/// Returns the full entry and records the access. Soft-deleted entries are not readable.
	pub async fn read(&self, id: Uuid) -> Result<MemoryEntry> {
		self.bounded("Reading an entry", self.touch_if(id, |_| true))
			.await?
			.ok_or_else(|| Error::not_found(id))
	}

	/// Loads without access bookkeeping. Used by maintenance paths and handoff packaging.
	pub async fn peek(&self, id: Uuid) -> Result<MemoryEntry> {
		match self.store.try_load(id).await? {
			Some(entry) if entry.lifecycle_state != LifecycleState::Deleted => Ok(entry),
			_ => Err(Error::not_found(id)),
		}
	}

	/// Records an access on the entry when `accept` approves the loaded record. Returns `None`
	/// without touching anything otherwise.
	pub(crate) async fn touch_if<F>(&self, id: Uuid, accept: F) -> Result<Option<MemoryEntry>>
	where
		F: FnOnce(&MemoryEntry) -> bool,
	{
		let _guard = self.lock_entry(id).await?;
		let mut entry = self.peek(id).await?;

		if !accept(&entry) {
			return Ok(None);
		}

		let was = entry.lifecycle_state;

		entry.record_access(self.clock.now());

		self.store.save(&entry).await?;

		if was == entry.lifecycle_state {
			self.on_access(&entry).await?;
		} else {
			tracing::debug!(entry_id = %id, "Access returned an aging entry to active.");

			self.on_mutation(&entry).await?;
		}

		Ok(Some(entry))
	}
}
