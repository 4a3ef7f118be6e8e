use std::collections::BTreeSet;

use regex::Regex;
use serde_json::Value;

use crate::entry::{EntryDraft, EntryPatch, EntryType, ScopeKind, ScopeRef, Ttl};

const TAG_PATTERN: &str = r"^[a-z0-9][a-z0-9_.:/-]{0,63}$";
const SCOPE_ID_PATTERN: &str = r"^[A-Za-z0-9][A-Za-z0-9_-]{0,63}$";
const MAX_TAGS: usize = 32;
const MAX_SUBTYPE_CHARS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectCode {
	RejectEmptyCreator,
	RejectInvalidScopeId,
	RejectInvalidTag,
	RejectTooManyTags,
	RejectInvalidSubtype,
	RejectInvalidConfidence,
	RejectInvalidTtl,
	RejectContentNotObject,
	RejectMissingPrimaryField,
	RejectTooLarge,
	RejectEmptyPatch,
}
impl RejectCode {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::RejectEmptyCreator => "REJECT_EMPTY_CREATOR",
			Self::RejectInvalidScopeId => "REJECT_INVALID_SCOPE_ID",
			Self::RejectInvalidTag => "REJECT_INVALID_TAG",
			Self::RejectTooManyTags => "REJECT_TOO_MANY_TAGS",
			Self::RejectInvalidSubtype => "REJECT_INVALID_SUBTYPE",
			Self::RejectInvalidConfidence => "REJECT_INVALID_CONFIDENCE",
			Self::RejectInvalidTtl => "REJECT_INVALID_TTL",
			Self::RejectContentNotObject => "REJECT_CONTENT_NOT_OBJECT",
			Self::RejectMissingPrimaryField => "REJECT_MISSING_PRIMARY_FIELD",
			Self::RejectTooLarge => "REJECT_TOO_LARGE",
			Self::RejectEmptyPatch => "REJECT_EMPTY_PATCH",
		}
	}
}

/// A draft that passed the gate, with its normalized pieces.
#[derive(Debug)]
pub struct GatedDraft {
	pub scope: ScopeRef,
	pub tags: BTreeSet<String>,
	pub subtype: String,
	pub content_bytes: usize,
}

pub fn writegate(draft: &EntryDraft, max_entry_bytes: usize) -> Result<GatedDraft, RejectCode> {
	if draft.created_by.trim().is_empty() {
		return Err(RejectCode::RejectEmptyCreator);
	}

	let scope = normalize_scope(draft.scope, &draft.scope_id)?;
	let tags = normalize_tags(&draft.tags)?;
	let subtype = normalize_subtype(&draft.subtype)?;

	check_confidence(draft.confidence)?;

	if let Some(ttl) = draft.ttl {
		check_ttl(ttl)?;
	}

	check_content(draft.entry_type, &draft.content)?;

	let content_bytes = content_size(&draft.content, max_entry_bytes)?;

	Ok(GatedDraft { scope, tags, subtype, content_bytes })
}

/// Validates a patch against the entry type it will be applied to and normalizes its tags.
pub fn gate_patch(
	patch: &EntryPatch,
	entry_type: EntryType,
	max_entry_bytes: usize,
) -> Result<EntryPatch, RejectCode> {
	if patch.is_empty() {
		return Err(RejectCode::RejectEmptyPatch);
	}

	let mut gated = patch.clone();

	if let Some(tags) = patch.tags.as_ref() {
		gated.tags = Some(normalize_tags(tags)?.into_iter().collect());
	}
	if let Some(subtype) = patch.subtype.as_ref() {
		gated.subtype = Some(normalize_subtype(subtype)?);
	}
	if let Some(confidence) = patch.confidence {
		check_confidence(confidence)?;
	}
	if let Some(ttl) = patch.ttl {
		check_ttl(ttl)?;
	}
	if let Some(content) = patch.content.as_ref() {
		check_content(entry_type, content)?;
		content_size(content, max_entry_bytes)?;
	}

	Ok(gated)
}

pub fn normalize_scope(scope: ScopeKind, scope_id: &str) -> Result<ScopeRef, RejectCode> {
	let trimmed = scope_id.trim();

	if scope == ScopeKind::Global && (trimmed.is_empty() || trimmed == ScopeRef::GLOBAL_ID) {
		return Ok(ScopeRef::global());
	}
	if !matches_pattern(SCOPE_ID_PATTERN, trimmed) {
		return Err(RejectCode::RejectInvalidScopeId);
	}

	Ok(ScopeRef::new(scope, trimmed))
}

pub fn normalize_tags(tags: &[String]) -> Result<BTreeSet<String>, RejectCode> {
	let mut out = BTreeSet::new();

	for tag in tags {
		let normalized = tag.trim().to_lowercase();

		if !matches_pattern(TAG_PATTERN, &normalized) {
			return Err(RejectCode::RejectInvalidTag);
		}

		out.insert(normalized);
	}

	if out.len() > MAX_TAGS {
		return Err(RejectCode::RejectTooManyTags);
	}

	Ok(out)
}

pub fn content_size(content: &Value, max_entry_bytes: usize) -> Result<usize, RejectCode> {
	let size = serde_json::to_vec(content).map(|bytes| bytes.len()).unwrap_or(usize::MAX);

	if size > max_entry_bytes {
		return Err(RejectCode::RejectTooLarge);
	}

	Ok(size)
}

fn normalize_subtype(subtype: &str) -> Result<String, RejectCode> {
	let normalized = subtype.trim().to_lowercase();

	if normalized.chars().count() > MAX_SUBTYPE_CHARS || normalized.chars().any(char::is_control) {
		return Err(RejectCode::RejectInvalidSubtype);
	}

	Ok(normalized)
}

fn check_confidence(confidence: f32) -> Result<(), RejectCode> {
	if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
		return Err(RejectCode::RejectInvalidConfidence);
	}

	Ok(())
}

fn check_ttl(ttl: Ttl) -> Result<(), RejectCode> {
	match ttl {
		Ttl::Hours(hours) if hours <= 0 => Err(RejectCode::RejectInvalidTtl),
		_ => Ok(()),
	}
}

fn check_content(entry_type: EntryType, content: &Value) -> Result<(), RejectCode> {
	let Some(object) = content.as_object() else {
		return Err(RejectCode::RejectContentNotObject);
	};
	let primary = object.get(entry_type.primary_field());
	let valid = match entry_type {
		EntryType::Procedural => primary
			.and_then(Value::as_array)
			.map(|steps| !steps.is_empty() && steps.iter().all(is_non_empty_step))
			.unwrap_or(false),
		_ => primary.and_then(Value::as_str).map(|text| !text.trim().is_empty()).unwrap_or(false),
	};

	if !valid {
		return Err(RejectCode::RejectMissingPrimaryField);
	}

	Ok(())
}

fn is_non_empty_step(step: &Value) -> bool {
	match step {
		Value::String(text) => !text.trim().is_empty(),
		Value::Object(map) => !map.is_empty(),
		_ => false,
	}
}

fn matches_pattern(pattern: &str, text: &str) -> bool {
	Regex::new(pattern).map(|re| re.is_match(text)).unwrap_or(false)
}
