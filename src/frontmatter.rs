//! The on-disk block file format: `---\n<yaml>\n---\n<body>`.
//!
//! This is the "on-disk block format parser" spec.md §1 names as an external
//! collaborator — an interface the rest of the core treats as a black box.
//! It is implemented here with `serde_yaml`, the same YAML-round-trip idiom
//! the teacher's `rules.rs` already uses for its three-tier rule files.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_yaml::Value as YamlValue;

use crate::block::{InformationType, KnowledgeBlock};
use crate::error::MemoryError;

const DELIMITER: &str = "---";

/// Frontmatter keys spec.md §6 requires every block file to carry.
const REQUIRED_KEYS: [&str; 3] = ["id", "title", "created"];

/// Parse a raw block file's text into a [`KnowledgeBlock`].
///
/// Fails with `Corruption` when the file has no frontmatter delimiters, the
/// YAML doesn't parse, a required key is missing, or the recomputed content
/// hash doesn't match the stored one.
pub fn parse_block_file(id_hint: &str, text: &str) -> Result<KnowledgeBlock, MemoryError> {
    let (frontmatter_text, body) = split_frontmatter(id_hint, text)?;

    let yaml: YamlValue = serde_yaml::from_str(frontmatter_text).map_err(|e| {
        MemoryError::corruption("read", id_hint, format!("invalid frontmatter YAML: {e}"))
    })?;
    let map = yaml.as_mapping().ok_or_else(|| {
        MemoryError::corruption("read", id_hint, "frontmatter must be a YAML mapping")
    })?;

    let mut fields: BTreeMap<String, YamlValue> = BTreeMap::new();
    for (k, v) in map {
        let key = k.as_str().ok_or_else(|| {
            MemoryError::corruption("read", id_hint, "frontmatter keys must be strings")
        })?;
        fields.insert(key.to_string(), v.clone());
    }

    for key in REQUIRED_KEYS {
        if !fields.contains_key(key) {
            return Err(MemoryError::corruption(
                "read",
                id_hint,
                format!("missing required frontmatter key `{key}`"),
            ));
        }
    }

    let id = take_string(&mut fields, "id")?;
    let title = take_string(&mut fields, "title")?;
    let created_at = take_timestamp(&mut fields, "created", id_hint)?;
    let updated_at = fields
        .remove("updated")
        .map(|v| yaml_to_timestamp(&v, id_hint))
        .transpose()?
        .unwrap_or(created_at);
    let tags: BTreeSet<String> = fields
        .remove("tags")
        .map(|v| yaml_to_string_list(&v, id_hint))
        .transpose()?
        .unwrap_or_default()
        .into_iter()
        .collect();
    let content_hash = fields
        .remove("content_hash")
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default();
    let access_count = fields
        .remove("access_count")
        .and_then(|v| v.as_u64())
        .unwrap_or(0);
    let last_access = fields
        .remove("last_access")
        .map(|v| yaml_to_timestamp(&v, id_hint))
        .transpose()?
        .unwrap_or(created_at);
    let information_type = fields
        .remove("information_type")
        .and_then(|v| v.as_str().map(str::to_string))
        .map(|s| parse_information_type(&s))
        .unwrap_or_default();
    let archived = fields
        .remove("archived")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    fields.remove("id");
    fields.remove("title");
    fields.remove("created");

    let mut extra = BTreeMap::new();
    for (k, v) in fields {
        let json = yaml_to_json(&v);
        extra.insert(k, json);
    }

    let mut block = KnowledgeBlock {
        id,
        title,
        body: body.to_string(),
        tags,
        created_at,
        updated_at,
        content_hash: content_hash.clone(),
        access_count,
        last_access,
        information_type,
        archived,
        extra,
    };

    if content_hash.is_empty() {
        // Frontmatter predates content-hash tracking: treat the current
        // body as canonical rather than fail a block that was never wrong.
        block.content_hash = block.compute_content_hash();
    } else if !block.hash_is_consistent() {
        return Err(MemoryError::corruption(
            "read",
            block.id.clone(),
            "content_hash does not match body+frontmatter",
        ));
    }

    Ok(block)
}

/// Render a [`KnowledgeBlock`] back into the on-disk block file format.
/// Always recomputes `content_hash` from the block's current fields.
pub fn render_block_file(block: &KnowledgeBlock) -> String {
    let mut map = serde_yaml::Mapping::new();
    map.insert(yaml_str("id"), yaml_str(&block.id));
    map.insert(yaml_str("title"), yaml_str(&block.title));
    map.insert(yaml_str("created"), yaml_str(&block.created_at.to_rfc3339()));
    map.insert(yaml_str("updated"), yaml_str(&block.updated_at.to_rfc3339()));
    map.insert(
        yaml_str("tags"),
        YamlValue::Sequence(block.tags.iter().map(|t| yaml_str(t)).collect()),
    );
    map.insert(yaml_str("content_hash"), yaml_str(&block.content_hash));
    map.insert(
        yaml_str("access_count"),
        YamlValue::Number(block.access_count.into()),
    );
    map.insert(yaml_str("last_access"), yaml_str(&block.last_access.to_rfc3339()));
    map.insert(
        yaml_str("information_type"),
        yaml_str(information_type_str(block.information_type)),
    );
    map.insert(yaml_str("archived"), YamlValue::Bool(block.archived));
    for (k, v) in &block.extra {
        map.insert(yaml_str(k), json_to_yaml(v));
    }

    let yaml_text = serde_yaml::to_string(&YamlValue::Mapping(map))
        .unwrap_or_default();

    format!("{DELIMITER}\n{yaml_text}{DELIMITER}\n{}", block.body)
}

fn split_frontmatter<'a>(id_hint: &str, text: &'a str) -> Result<(&'a str, &'a str), MemoryError> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let rest = text.strip_prefix(DELIMITER).and_then(|s| s.strip_prefix('\n')).ok_or_else(|| {
        MemoryError::corruption("read", id_hint, "file does not start with `---` frontmatter delimiter")
    })?;
    let marker = format!("\n{DELIMITER}\n");
    let idx = rest.find(&marker).ok_or_else(|| {
        MemoryError::corruption("read", id_hint, "missing closing `---` frontmatter delimiter")
    })?;
    let frontmatter = &rest[..idx];
    let body = &rest[idx + marker.len()..];
    Ok((frontmatter, body))
}

fn take_string(fields: &mut BTreeMap<String, YamlValue>, key: &str) -> Result<String, MemoryError> {
    fields
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| MemoryError::corruption("read", key, format!("`{key}` must be a string")))
}

fn take_timestamp(
    fields: &mut BTreeMap<String, YamlValue>,
    key: &str,
    id_hint: &str,
) -> Result<DateTime<Utc>, MemoryError> {
    let v = fields
        .get(key)
        .ok_or_else(|| MemoryError::corruption("read", id_hint, format!("missing `{key}`")))?;
    yaml_to_timestamp(v, id_hint)
}

fn yaml_to_timestamp(v: &YamlValue, id_hint: &str) -> Result<DateTime<Utc>, MemoryError> {
    let s = v.as_str().ok_or_else(|| {
        MemoryError::corruption("read", id_hint, "timestamp field must be a string")
    })?;
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| MemoryError::corruption("read", id_hint, format!("invalid ISO-8601 timestamp `{s}`: {e}")))
}

fn yaml_to_string_list(v: &YamlValue, id_hint: &str) -> Result<Vec<String>, MemoryError> {
    let seq = v.as_sequence().ok_or_else(|| {
        MemoryError::corruption("read", id_hint, "`tags` must be a list of strings")
    })?;
    seq.iter()
        .map(|item| {
            item.as_str().map(|s| s.to_lowercase()).ok_or_else(|| {
                MemoryError::corruption("read", id_hint, "`tags` entries must be strings")
            })
        })
        .collect()
}

fn parse_information_type(s: &str) -> InformationType {
    match s {
        "semi-static" => InformationType::SemiStatic,
        "dynamic" => InformationType::Dynamic,
        "ephemeral" => InformationType::Ephemeral,
        _ => InformationType::Static,
    }
}

fn information_type_str(t: InformationType) -> &'static str {
    match t {
        InformationType::Static => "static",
        InformationType::SemiStatic => "semi-static",
        InformationType::Dynamic => "dynamic",
        InformationType::Ephemeral => "ephemeral",
    }
}

fn yaml_str(s: impl Into<String>) -> YamlValue {
    YamlValue::String(s.into())
}

/// Round-trip an arbitrary YAML scalar/sequence/mapping through JSON so
/// `extra` can be typed as `serde_json::Value` without a second parser.
fn yaml_to_json(v: &YamlValue) -> serde_json::Value {
    serde_json::to_value(YamlJsonBridge(v.clone())).unwrap_or(serde_json::Value::Null)
}

fn json_to_yaml(v: &serde_json::Value) -> YamlValue {
    serde_yaml::to_value(v).unwrap_or(YamlValue::Null)
}

/// Thin newtype so `serde_yaml::Value` (which implements `Serialize`) can be
/// re-serialized through `serde_json::to_value` without an intermediate
/// string buffer.
#[derive(Serialize, Deserialize)]
struct YamlJsonBridge(YamlValue);

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_block() -> KnowledgeBlock {
        let mut block = KnowledgeBlock::new("KB-20260101-001", "Sample", "Body text here.");
        block.tags.insert("rust".into());
        block.extra.insert("source".into(), serde_json::json!("import"));
        block
    }

    #[test]
    fn round_trip_preserves_fields() {
        let block = sample_block();
        let rendered = render_block_file(&block);
        let parsed = parse_block_file(&block.id, &rendered).expect("parse rendered block");

        assert_eq!(parsed.id, block.id);
        assert_eq!(parsed.title, block.title);
        assert_eq!(parsed.body, block.body);
        assert_eq!(parsed.tags, block.tags);
        assert_eq!(parsed.extra, block.extra);
        assert!(parsed.hash_is_consistent());
    }

    #[test]
    fn missing_required_key_is_corruption() {
        let text = "---\nid: x\ntitle: y\n---\nbody";
        let err = parse_block_file("x", text).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Corruption);
    }

    #[test]
    fn no_frontmatter_delimiter_is_corruption() {
        let err = parse_block_file("x", "just a body, no frontmatter").unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Corruption);
    }

    #[test]
    fn tampered_body_fails_hash_check() {
        let block = sample_block();
        let rendered = render_block_file(&block);
        let tampered = rendered.replace("Body text here.", "Tampered body.");
        let err = parse_block_file(&block.id, &tampered).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Corruption);
    }

    #[test]
    fn unknown_keys_round_trip_through_extra() {
        let mut block = sample_block();
        block.extra.insert("custom_flag".into(), serde_json::json!(true));
        let rendered = render_block_file(&block);
        let parsed = parse_block_file(&block.id, &rendered).unwrap();
        assert_eq!(parsed.extra.get("custom_flag"), Some(&serde_json::json!(true)));
    }
}
