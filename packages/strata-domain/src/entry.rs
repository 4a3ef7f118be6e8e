//! Canonical memory record and the request shapes that create or change it.

use std::{
	collections::BTreeSet,
	fmt::{Display, Formatter},
};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::similarity;

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
	Factual,
	Procedural,
	Episodic,
	Semantic,
	Working,
}
impl EntryType {
	pub const ALL: [Self; 5] =
		[Self::Factual, Self::Procedural, Self::Episodic, Self::Semantic, Self::Working];

	pub fn as_str(self) -> &'static str {
		match self {
			Self::Factual => "factual",
			Self::Procedural => "procedural",
			Self::Episodic => "episodic",
			Self::Semantic => "semantic",
			Self::Working => "working",
		}
	}

	pub fn parse(raw: &str) -> Option<Self> {
		Self::ALL.into_iter().find(|entry_type| entry_type.as_str() == raw)
	}

	/// Content field every payload of this type must carry.
	pub fn primary_field(self) -> &'static str {
		match self {
			Self::Factual => "statement",
			Self::Procedural => "steps",
			Self::Episodic => "description",
			Self::Semantic => "concept",
			Self::Working => "note",
		}
	}
}
impl Display for EntryType {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeKind {
	Global,
	Team,
	Agent,
	Project,
	Session,
}
impl ScopeKind {
	pub const ALL: [Self; 5] = [Self::Global, Self::Team, Self::Agent, Self::Project, Self::Session];

	pub fn as_str(self) -> &'static str {
		match self {
			Self::Global => "global",
			Self::Team => "team",
			Self::Agent => "agent",
			Self::Project => "project",
			Self::Session => "session",
		}
	}

	pub fn parse(raw: &str) -> Option<Self> {
		Self::ALL.into_iter().find(|scope| scope.as_str() == raw)
	}
}
impl Display for ScopeKind {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Ownership namespace of an entry: a scope kind plus the owner's identifier.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct ScopeRef {
	pub scope: ScopeKind,
	pub scope_id: String,
}
impl ScopeRef {
	pub const GLOBAL_ID: &'static str = "global";

	pub fn new(scope: ScopeKind, scope_id: impl Into<String>) -> Self {
		Self { scope, scope_id: scope_id.into() }
	}

	pub fn global() -> Self {
		Self::new(ScopeKind::Global, Self::GLOBAL_ID)
	}

	/// Stable key used for index record names, e.g. `agent.alice`.
	pub fn key(&self) -> String {
		format!("{}.{}", self.scope, self.scope_id)
	}

	pub fn parse_key(key: &str) -> Option<Self> {
		let (scope, scope_id) = key.split_once('.')?;
		let scope = ScopeKind::parse(scope)?;

		if scope_id.is_empty() {
			return None;
		}

		Some(Self::new(scope, scope_id))
	}
}
impl Display for ScopeRef {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}:{}", self.scope, self.scope_id)
	}
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
	Critical,
	High,
	#[default]
	Normal,
	Low,
}
impl Priority {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Critical => "critical",
			Self::High => "high",
			Self::Normal => "normal",
			Self::Low => "low",
		}
	}
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum LifecycleState {
	Active,
	Aging,
	Archived,
	Deleted,
}
impl LifecycleState {
	/// Active and aging entries are the only ones a scope index may hold.
	pub fn is_indexed(self) -> bool {
		matches!(self, Self::Active | Self::Aging)
	}
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Ttl {
	Permanent,
	Hours(i64),
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct MemoryEntry {
	pub id: Uuid,
	#[serde(rename = "type")]
	pub entry_type: EntryType,
	pub subtype: String,
	#[serde(flatten)]
	pub scope: ScopeRef,
	pub tags: BTreeSet<String>,
	pub priority: Priority,
	pub confidence: f32,
	#[serde(with = "time::serde::rfc3339")]
	pub created_at: OffsetDateTime,
	#[serde(with = "time::serde::rfc3339")]
	pub updated_at: OffsetDateTime,
	pub created_by: String,
	pub updated_by: String,
	pub ttl: Ttl,
	pub content: Value,
	pub references: Vec<Uuid>,
	pub access_count: u64,
	#[serde(default, with = "time::serde::rfc3339::option")]
	pub last_accessed: Option<OffsetDateTime>,
	pub version: u64,
	pub lifecycle_state: LifecycleState,
	#[serde(with = "time::serde::rfc3339")]
	pub state_changed_at: OffsetDateTime,
	/// Last time a restore, revive or access moved the entry back to `Active`.
	#[serde(default, with = "time::serde::rfc3339::option")]
	pub activated_at: Option<OffsetDateTime>,
	pub protected: bool,
	#[serde(default)]
	pub supersedes: Option<Uuid>,
	#[serde(default)]
	pub superseded_by: Option<Uuid>,
	#[serde(default)]
	pub promoted_from: Option<Uuid>,
}
impl MemoryEntry {
	/// Protected and critical entries never leave `Active` automatically.
	pub fn is_exempt(&self) -> bool {
		self.protected || self.priority == Priority::Critical
	}

	pub fn title(&self) -> Option<&str> {
		self.content.get("title").and_then(Value::as_str).map(str::trim).filter(|t| !t.is_empty())
	}

	/// Compact, human-readable description used by index records and budgeted packs.
	pub fn summary(&self, max_chars: usize) -> String {
		let explicit = self
			.content
			.get("summary")
			.and_then(Value::as_str)
			.map(str::trim)
			.filter(|summary| !summary.is_empty());
		let text = match explicit {
			Some(summary) => summary.to_string(),
			None => match self.content.get(self.entry_type.primary_field()) {
				Some(value) => similarity::flatten_text(value),
				None => similarity::flatten_text(&self.content),
			},
		};

		truncate_chars(text.trim(), max_chars)
	}

	pub fn content_text(&self) -> String {
		similarity::flatten_text(&self.content)
	}

	pub fn content_bytes(&self) -> usize {
		serde_json::to_vec(&self.content).map(|bytes| bytes.len()).unwrap_or(0)
	}

	/// Latest point that counts as activity for lifecycle aging.
	pub fn last_activity(&self) -> OffsetDateTime {
		let mut anchor = self.created_at;

		if let Some(accessed) = self.last_accessed
			&& accessed > anchor
		{
			anchor = accessed;
		}
		if let Some(activated) = self.activated_at
			&& activated > anchor
		{
			anchor = activated;
		}

		anchor
	}

	/// Access bookkeeping shared by reads and query hydration.
	pub fn record_access(&mut self, now: OffsetDateTime) {
		self.access_count = self.access_count.saturating_add(1);
		self.last_accessed = Some(now);

		if self.lifecycle_state == LifecycleState::Aging {
			self.set_state(LifecycleState::Active, now);
		}
	}

	pub fn set_state(&mut self, state: LifecycleState, now: OffsetDateTime) {
		if self.lifecycle_state != state {
			self.lifecycle_state = state;
			self.state_changed_at = now;

			if state == LifecycleState::Active {
				self.activated_at = Some(now);
			}
		}
	}
}

/// A write request as accepted from collaborators.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct EntryDraft {
	#[serde(rename = "type")]
	pub entry_type: EntryType,
	#[serde(default)]
	pub subtype: String,
	pub scope: ScopeKind,
	#[serde(default)]
	pub scope_id: String,
	#[serde(default)]
	pub tags: Vec<String>,
	#[serde(default)]
	pub priority: Priority,
	#[serde(default = "default_confidence")]
	pub confidence: f32,
	pub created_by: String,
	#[serde(default)]
	pub ttl: Option<Ttl>,
	pub content: Value,
	#[serde(default)]
	pub references: Vec<Uuid>,
	#[serde(default)]
	pub protected: bool,
}

/// Partial update. Absent fields are left untouched; `content` replaces the whole payload.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct EntryPatch {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub subtype: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub tags: Option<Vec<String>>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub priority: Option<Priority>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub confidence: Option<f32>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub ttl: Option<Ttl>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub content: Option<Value>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub references: Option<Vec<Uuid>>,
}
impl EntryPatch {
	pub fn is_empty(&self) -> bool {
		self.subtype.is_none()
			&& self.tags.is_none()
			&& self.priority.is_none()
			&& self.confidence.is_none()
			&& self.ttl.is_none()
			&& self.content.is_none()
			&& self.references.is_none()
	}

	/// Fields this patch would change relative to `base`.
	pub fn changed_fields(&self, base: &MemoryEntry) -> BTreeSet<EntryField> {
		let mut after = base.clone();

		self.apply(&mut after);

		changed_fields(base, &after)
	}

	/// Applies the patch verbatim. Callers normalize tags before building the patch.
	pub fn apply(&self, entry: &mut MemoryEntry) {
		if let Some(subtype) = self.subtype.as_ref() {
			entry.subtype = subtype.clone();
		}
		if let Some(tags) = self.tags.as_ref() {
			entry.tags = tags.iter().cloned().collect();
		}
		if let Some(priority) = self.priority {
			entry.priority = priority;
		}
		if let Some(confidence) = self.confidence {
			entry.confidence = confidence;
		}
		if let Some(ttl) = self.ttl {
			entry.ttl = ttl;
		}
		if let Some(content) = self.content.as_ref() {
			entry.content = content.clone();
		}
		if let Some(references) = self.references.as_ref() {
			entry.references = references.clone();
		}
	}

	/// Copies only `fields` from `source` onto `target`. Content keys merge one at a time.
	pub fn apply_fields(source: &MemoryEntry, target: &mut MemoryEntry, fields: &BTreeSet<EntryField>) {
		for field in fields {
			match field {
				EntryField::Subtype => target.subtype = source.subtype.clone(),
				EntryField::Tags => target.tags = source.tags.clone(),
				EntryField::Priority => target.priority = source.priority,
				EntryField::Confidence => target.confidence = source.confidence,
				EntryField::Ttl => target.ttl = source.ttl,
				EntryField::References => target.references = source.references.clone(),
				EntryField::ContentKey(key) => {
					let value = source.content.get(key).cloned();

					if !target.content.is_object() {
						target.content = Value::Object(Default::default());
					}
					if let Some(object) = target.content.as_object_mut() {
						match value {
							Some(value) => {
								object.insert(key.clone(), value);
							},
							None => {
								object.remove(key);
							},
						}
					}
				},
			}
		}
	}
}

/// Unit of change used by field-level merge.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryField {
	Subtype,
	Tags,
	Priority,
	Confidence,
	Ttl,
	References,
	ContentKey(String),
}

pub fn changed_fields(before: &MemoryEntry, after: &MemoryEntry) -> BTreeSet<EntryField> {
	let mut fields = BTreeSet::new();

	if before.subtype != after.subtype {
		fields.insert(EntryField::Subtype);
	}
	if before.tags != after.tags {
		fields.insert(EntryField::Tags);
	}
	if before.priority != after.priority {
		fields.insert(EntryField::Priority);
	}
	if (before.confidence - after.confidence).abs() > f32::EPSILON {
		fields.insert(EntryField::Confidence);
	}
	if before.ttl != after.ttl {
		fields.insert(EntryField::Ttl);
	}
	if before.references != after.references {
		fields.insert(EntryField::References);
	}

	let empty = serde_json::Map::new();
	let before_content = before.content.as_object().unwrap_or(&empty);
	let after_content = after.content.as_object().unwrap_or(&empty);
	let keys: BTreeSet<&String> = before_content.keys().chain(after_content.keys()).collect();

	for key in keys {
		if before_content.get(key) != after_content.get(key) {
			fields.insert(EntryField::ContentKey(key.clone()));
		}
	}

	fields
}

pub fn truncate_chars(text: &str, max_chars: usize) -> String {
	if text.chars().count() <= max_chars {
		return text.to_string();
	}

	if max_chars < 3 {
		return text.chars().take(max_chars).collect();
	}

	let mut out: String = text.chars().take(max_chars - 3).collect();

	out.push_str("...");

	out
}

fn default_confidence() -> f32 {
	1.0
}
