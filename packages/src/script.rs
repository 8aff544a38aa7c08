// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Package scripts: the editable, human readable source form of a package.
//!
//! A script is a JSON array with one object per entry. The lower case members
//! `name`, `type` and `modifiedTime` describe the entry, and every other
//! member is a key, named by its dotted path:
//!
//! ```json
//! [
//!   { "name": "Rock", "type": "Texture", "modifiedTime": "1736937600000",
//!     "Source.File": "Textures/rock.png", "Mipmap": true }
//! ]
//! ```
//!
//! Next to each script is an index file (`<script>.idx`) containing the
//! number of entries as text, which is used to estimate loading progress
//! without parsing the script.

use serde_json::{Map, Value};

use crate::{entry::Entry, keys::Variant, result::PackageError};

/// One entry of a package script.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptEntry {
    pub name: String,
    /// The asset type's name, see [`crate::AssetType::name`].
    pub asset_type: String,
    /// Milliseconds since the UNIX epoch. Entries without one are treated as
    /// modified when loaded.
    pub modified_time: Option<u64>,
    pub keys: Vec<(String, Variant)>,
}

impl ScriptEntry {
    pub fn from_entry(entry: &Entry) -> ScriptEntry {
        ScriptEntry {
            name: entry.name(),
            asset_type: entry.asset_type().name().to_string(),
            modified_time: Some(entry.modified_time()),
            keys: entry
                .keys()
                .into_iter()
                .filter_map(|key| Some((key.path, key.val?)))
                .collect(),
        }
    }
}

pub fn index_path(script_path: &str) -> String {
    format!("{script_path}.idx")
}

pub fn encode_index(entry_count: u32) -> Vec<u8> {
    format!("{entry_count}\n").into_bytes()
}

/// The entry count in an index file, 0 if it can't be read.
pub fn decode_index(bytes: &[u8]) -> u32 {
    core::str::from_utf8(bytes)
        .ok()
        .and_then(|text| text.trim().parse().ok())
        .unwrap_or(0)
}

pub fn write_script(entries: &[ScriptEntry]) -> String {
    let entries: Vec<Value> = entries
        .iter()
        .map(|entry| {
            let mut object = Map::new();
            object.insert("name".into(), Value::String(entry.name.clone()));
            object.insert("type".into(), Value::String(entry.asset_type.clone()));
            if let Some(time) = entry.modified_time {
                // As a string, JSON numbers don't round trip u64s everywhere.
                object.insert("modifiedTime".into(), Value::String(time.to_string()));
            }
            for (path, value) in &entry.keys {
                object.insert(path.clone(), value.to_json());
            }
            Value::Object(object)
        })
        .collect();
    let mut text = serde_json::to_string_pretty(&Value::Array(entries)).unwrap_or_default();
    text.push('\n');
    text
}

pub fn parse_script(path: &str, text: &str) -> Result<Vec<ScriptEntry>, PackageError> {
    let script_error = |reason: String| PackageError::Script {
        path: path.to_string(),
        reason,
    };
    let root: Value = serde_json::from_str(text).map_err(|err| script_error(err.to_string()))?;
    let Value::Array(items) = root else {
        return Err(script_error("the script is not an array of entries".into()));
    };

    let mut entries = Vec::with_capacity(items.len());
    for (i, item) in items.into_iter().enumerate() {
        let Value::Object(members) = item else {
            return Err(script_error(format!("entry #{i} is not an object")));
        };
        let string_member = |name: &str| match members.get(name) {
            Some(Value::String(s)) => Ok(s.clone()),
            _ => Err(script_error(format!("entry #{i} has no {name:?}"))),
        };
        let name = string_member("name")?;
        let asset_type = string_member("type")?;
        let modified_time = match members.get("modifiedTime") {
            Some(Value::String(s)) => s.parse().ok(),
            Some(Value::Number(n)) => n.as_u64(),
            _ => None,
        };

        let mut keys = Vec::new();
        for (member, value) in &members {
            if matches!(member.as_str(), "name" | "type" | "modifiedTime") {
                continue;
            }
            let value = Variant::from_json(value)
                .ok_or_else(|| script_error(format!("key {member:?} of {name:?} has an unsupported value")))?;
            keys.push((member.clone(), value));
        }

        entries.push(ScriptEntry {
            name,
            asset_type,
            modified_time,
            keys,
        });
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use crate::{keys::Variant, result::PackageError};

    use super::{decode_index, encode_index, parse_script, write_script, ScriptEntry};

    #[test]
    fn scripts_survive_saving() {
        let entries = vec![
            ScriptEntry {
                name: "Rock".into(),
                asset_type: "Texture".into(),
                modified_time: Some(1_736_937_600_000),
                keys: vec![
                    ("Mipmap".into(), Variant::Bool(false)),
                    ("Source.File".into(), Variant::String("Textures/rock.png".into())),
                ],
            },
            ScriptEntry {
                name: "Sparks".into(),
                asset_type: "Particle".into(),
                modified_time: None,
                keys: vec![("Physics.Mass".into(), Variant::String("1.0 2.0".into()))],
            },
        ];
        let text = write_script(&entries);
        assert_eq!(entries, parse_script("Packages/World.pkg", &text).unwrap());
    }

    #[test]
    fn rejects_malformed_scripts() {
        assert!(matches!(
            parse_script("a.pkg", "{}"),
            Err(PackageError::Script { .. })
        ));
        assert!(matches!(
            parse_script("a.pkg", r#"[{ "type": "Texture" }]"#),
            Err(PackageError::Script { .. })
        ));
        assert!(matches!(
            parse_script("a.pkg", r#"[{ "name": "A", "type": "Texture", "Wrap": [1] }]"#),
            Err(PackageError::Script { .. })
        ));
    }

    #[test]
    fn index_files() {
        assert_eq!(12, decode_index(&encode_index(12)));
        assert_eq!(0, decode_index(b"twelve"));
    }
}
