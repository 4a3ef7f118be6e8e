use std::collections::BTreeSet;

use serde_json::Value;
use unicode_segmentation::UnicodeSegmentation;

/// Concatenates every string, number, and boolean in a payload, depth first, in key order.
pub fn flatten_text(value: &Value) -> String {
	let mut parts = Vec::new();

	collect_text(value, &mut parts);

	parts.join(" ")
}

/// Lowercased word terms of at least two characters.
pub fn terms(text: &str) -> BTreeSet<String> {
	text.unicode_words()
		.map(str::to_lowercase)
		.filter(|word| word.chars().count() >= 2)
		.collect()
}

/// Like [`terms`], but keeps first-seen order and stops after `max_terms`.
pub fn query_terms(text: &str, max_terms: usize) -> Vec<String> {
	let mut seen = BTreeSet::new();
	let mut out = Vec::new();

	for word in text.unicode_words() {
		let word = word.to_lowercase();

		if word.chars().count() < 2 {
			continue;
		}
		if seen.insert(word.clone()) {
			out.push(word);
		}
		if out.len() >= max_terms {
			break;
		}
	}

	out
}

/// Jaccard overlap. Two empty sets are identical.
pub fn jaccard<T>(left: &BTreeSet<T>, right: &BTreeSet<T>) -> f32
where
	T: Ord,
{
	if left.is_empty() && right.is_empty() {
		return 1.0;
	}

	let intersection = left.intersection(right).count();
	let union = left.len() + right.len() - intersection;

	intersection as f32 / union as f32
}

pub fn content_fingerprint(content: &Value) -> String {
	let canonical = serde_json::to_vec(content).unwrap_or_default();

	blake3::hash(&canonical).to_hex().to_string()
}

pub fn content_similarity(left: &Value, right: &Value) -> f32 {
	if content_fingerprint(left) == content_fingerprint(right) {
		return 1.0;
	}

	jaccard(&terms(&flatten_text(left)), &terms(&flatten_text(right)))
}

fn collect_text(value: &Value, out: &mut Vec<String>) {
	match value {
		Value::Null => {},
		Value::Bool(flag) => out.push(flag.to_string()),
		Value::Number(number) => out.push(number.to_string()),
		Value::String(text) =>
			if !text.trim().is_empty() {
				out.push(text.trim().to_string());
			},
		Value::Array(items) =>
			for item in items {
				collect_text(item, out);
			},
		Value::Object(map) =>
			for item in map.values() {
				collect_text(item, out);
			},
	}
}
