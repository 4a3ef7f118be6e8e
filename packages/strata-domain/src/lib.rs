pub mod clock;
pub mod conflict_policy;
pub mod entry;
pub mod lifecycle;
pub mod similarity;
pub mod writegate;

pub use clock::{Clock, SystemClock};
pub use entry::{
	EntryDraft, EntryField, EntryPatch, EntryType, LifecycleState, MemoryEntry, Priority,
	ScopeKind, ScopeRef, Ttl,
};
