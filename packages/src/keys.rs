// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Asset metadata: the per-type key schemas ([`KeyDef`]) and the key values
//! stored in entries ([`KeyVal`]).

use std::{
    collections::{BTreeMap, HashMap},
    fmt::{self, Display},
    sync::Arc,
};

use serde_json::Value;

use crate::{
    flags::{platform_flags_for_name, platform_name_for_flags, PFlags},
    result::SinkError,
};

/// A metadata value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Variant {
    String(String),
    Int(i32),
    Bool(bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariantKind {
    String,
    Int,
    Bool,
}

impl Variant {
    pub fn kind(&self) -> VariantKind {
        match self {
            Variant::String(_) => VariantKind::String,
            Variant::Int(_) => VariantKind::Int,
            Variant::Bool(_) => VariantKind::Bool,
        }
    }

    /// Converts a JSON scalar. Numbers become [`Variant::Int`], truncating
    /// fractions.
    pub fn from_json(value: &Value) -> Option<Variant> {
        match value {
            Value::String(s) => Some(Variant::String(s.clone())),
            Value::Bool(b) => Some(Variant::Bool(*b)),
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .map(|i| Variant::Int(i as i32)),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Variant::String(s) => Value::String(s.clone()),
            Variant::Int(i) => Value::from(*i),
            Variant::Bool(b) => Value::Bool(*b),
        }
    }
}

impl Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variant::String(s) => write!(f, "{s:?}"),
            Variant::Int(i) => write!(f, "{i}"),
            Variant::Bool(b) => write!(f, "{b}"),
        }
    }
}

/// The Rust types a [`Variant`] can be read as.
pub trait KeyType: Sized + Clone + PartialEq {
    fn from_variant(value: &Variant) -> Option<Self>;
}

impl KeyType for String {
    fn from_variant(value: &Variant) -> Option<Self> {
        match value {
            Variant::String(s) => Some(s.clone()),
            _ => None,
        }
    }
}

impl KeyType for i32 {
    fn from_variant(value: &Variant) -> Option<Self> {
        match value {
            Variant::Int(i) => Some(*i),
            _ => None,
        }
    }
}

impl KeyType for bool {
    fn from_variant(value: &Variant) -> Option<Self> {
        match value {
            Variant::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

/// How a key is presented and treated: a type in the low four bits, plus
/// flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyStyle(pub u32);

impl KeyStyle {
    pub const VARIANT: u32 = 0;
    /// The value is the path of another asset, and is tracked in the
    /// package's import map.
    pub const IMPORT: u32 = 1;
    /// The value is the path of a source file.
    pub const FILE: u32 = 2;
    pub const CHECK_BOXES: u32 = 3;
    pub const LIST: u32 = 4;
    pub const UNSIGNED: u32 = 5;
    pub const MULTI_LINE: u32 = 6;
    pub const COLOR: u32 = 7;
    pub const TYPE_MASK: u32 = 0xf;

    pub const EDITOR_ONLY: u32 = 1 << 8;
    pub const HIDDEN: u32 = 1 << 9;
    pub const READ_ONLY: u32 = 1 << 10;
    /// The key has no per-platform variants.
    pub const GLOBAL: u32 = 1 << 11;

    pub fn key_type(self) -> u32 {
        self.0 & Self::TYPE_MASK
    }

    pub fn is_import(self) -> bool {
        self.key_type() == Self::IMPORT
    }

    pub fn has(self, flag: u32) -> bool {
        self.0 & flag != 0
    }

    /// Parses either a number or names joined with `|`, e.g.
    /// `"File|ReadOnly"`.
    fn from_json(value: &Value) -> Option<KeyStyle> {
        match value {
            Value::Number(n) => n.as_u64().map(|n| KeyStyle(n as u32)),
            Value::String(s) => {
                let mut style = 0;
                for name in s.split('|').map(str::trim) {
                    style |= match name {
                        "Variant" => Self::VARIANT,
                        "Import" => Self::IMPORT,
                        "File" => Self::FILE,
                        "CheckBoxes" => Self::CHECK_BOXES,
                        "List" => Self::LIST,
                        "Unsigned" => Self::UNSIGNED,
                        "MultiLine" => Self::MULTI_LINE,
                        "Color" => Self::COLOR,
                        "EditorOnly" => Self::EDITOR_ONLY,
                        "Hidden" => Self::HIDDEN,
                        "ReadOnly" => Self::READ_ONLY,
                        "Global" => Self::GLOBAL,
                        _ => return None,
                    };
                }
                Some(KeyStyle(style))
            }
            _ => None,
        }
    }
}

/// The schema of one key of an asset type. Loaded once, shared and never
/// modified afterwards.
#[derive(Debug, Default)]
pub struct KeyDef {
    pub name: String,
    /// The dotted path of the key, e.g. `Source.File`.
    pub path: String,
    pub style: KeyStyle,
    /// The platform this def is specific to, for children named after a
    /// platform.
    pub flags: PFlags,
    /// The platforms of this def's platform-named children.
    pub child_flags: PFlags,
    /// The default value. Keys are type checked against it, so a def without
    /// a default accepts anything.
    pub val: Option<Variant>,
    /// Named schema attributes other than `style` and `value`, e.g. the
    /// options of a list.
    pub pairs: BTreeMap<String, Variant>,
    pub children: BTreeMap<String, Arc<KeyDef>>,
}

impl KeyDef {
    /// Creates a key with this def's default value. Given a target, the key
    /// is that target's variant: `.PlatformName` is appended to its name and
    /// path.
    pub fn create_key(self: &Arc<Self>, flags: PFlags) -> KeyVal {
        let flags = flags.targets();
        let (name, path) = match platform_name_for_flags(flags) {
            Some(platform) => (
                format!("{}.{platform}", self.name),
                format!("{}.{platform}", self.path),
            ),
            None => (self.name.clone(), self.path.clone()),
        };
        KeyVal {
            name,
            path,
            def: self.clone(),
            val: self.val.clone(),
            flags: self.flags | flags,
        }
    }

    /// Returns true if `value` may be stored in a key of this def.
    pub fn accepts(&self, value: &Variant) -> bool {
        match &self.val {
            Some(default) => default.kind() == value.kind(),
            None => true,
        }
    }
}

/// A live key of an entry.
#[derive(Debug, Clone)]
pub struct KeyVal {
    pub name: String,
    /// The dotted path, possibly suffixed with a platform name
    /// (`Source.File.PC`).
    pub path: String,
    pub def: Arc<KeyDef>,
    pub val: Option<Variant>,
    /// The platform this key applies to, empty for generic keys.
    pub flags: PFlags,
}

impl KeyVal {
    /// Creates a key with an explicit value.
    pub fn new(path: &str, def: Arc<KeyDef>, val: Variant) -> KeyVal {
        let name = path.rsplit('.').next().unwrap_or(path).to_string();
        let flags = platform_flags_for_name(&name);
        KeyVal {
            name,
            path: path.to_string(),
            def,
            val: Some(val),
            flags,
        }
    }

    /// An independent copy of this key, specialized for a target the same way
    /// as [`KeyDef::create_key`].
    pub fn clone_for(&self, flags: PFlags) -> KeyVal {
        let flags = flags.targets();
        let mut key = self.clone();
        if let Some(platform) = platform_name_for_flags(flags) {
            key.name = format!("{}.{platform}", key.name);
            key.path = format!("{}.{platform}", key.path);
            key.flags |= flags;
        }
        key
    }

    pub fn is_import(&self) -> bool {
        self.def.style.is_import()
    }
}

/// The key schema of one asset type.
#[derive(Debug)]
pub struct KeyDefs {
    roots: BTreeMap<String, Arc<KeyDef>>,
    by_path: HashMap<String, Arc<KeyDef>>,
    default_def: Arc<KeyDef>,
}

impl Default for KeyDefs {
    fn default() -> Self {
        KeyDefs {
            roots: BTreeMap::new(),
            by_path: HashMap::new(),
            default_def: Arc::new(KeyDef {
                name: "value".to_string(),
                style: KeyStyle(KeyStyle::VARIANT | KeyStyle::EDITOR_ONLY),
                ..Default::default()
            }),
        }
    }
}

impl KeyDefs {
    /// Parses a key schema. The schema is a JSON object where capitalized
    /// members are keys, nested as deep as needed. Within a key, `style` sets
    /// the [`KeyStyle`], `value` the default value, and the other lower case
    /// members are stored in [`KeyDef::pairs`].
    ///
    /// ```json
    /// { "Source": { "File": { "style": "File", "value": "" } },
    ///   "Mipmap": { "value": true, "IPhone": { "value": false } } }
    /// ```
    pub fn parse(json: &str) -> Result<KeyDefs, SinkError> {
        let root: Value =
            serde_json::from_str(json).map_err(|err| SinkError::Parse(err.to_string()))?;
        let Value::Object(members) = root else {
            return Err(SinkError::Parse("key schema is not an object".into()));
        };

        let mut defs = KeyDefs::default();
        for (name, value) in &members {
            if !is_key_name(name) {
                return Err(SinkError::Parse(format!(
                    "top level schema member {name:?} is not a key name"
                )));
            }
            let def = parse_def(name, name, value, true, &mut defs.by_path)?;
            defs.roots.insert(name.clone(), def);
        }
        Ok(defs)
    }

    pub fn roots(&self) -> impl Iterator<Item = &Arc<KeyDef>> {
        self.roots.values()
    }

    /// The def for an exact path.
    pub fn get(&self, path: &str) -> Option<&Arc<KeyDef>> {
        self.by_path.get(path)
    }

    /// The def for a key path: the exact path, or for platform variants like
    /// `Source.File.PC`, the def of `Source.File`. Keys without a schema get
    /// the permissive default def.
    pub fn find(&self, path: &str) -> &Arc<KeyDef> {
        if let Some(def) = self.by_path.get(path) {
            return def;
        }
        if let Some((trimmed, last)) = path.rsplit_once('.') {
            if !platform_flags_for_name(last).is_empty() {
                if let Some(def) = self.by_path.get(trimmed) {
                    return def;
                }
            }
        }
        &self.default_def
    }

    pub fn is_default(&self, def: &Arc<KeyDef>) -> bool {
        Arc::ptr_eq(def, &self.default_def)
    }

    /// Every def that has a default value, i.e. the keys an entry of this type
    /// should start out with.
    pub fn defaults(&self) -> impl Iterator<Item = &Arc<KeyDef>> {
        let mut defs: Vec<&Arc<KeyDef>> = self
            .by_path
            .values()
            .filter(|def| def.val.is_some() && def.flags.is_empty())
            .collect();
        defs.sort_by(|a, b| a.path.cmp(&b.path));
        defs.into_iter()
    }
}

fn is_key_name(name: &str) -> bool {
    name.chars().next().is_some_and(|c| c.is_ascii_uppercase())
}

fn parse_def(
    name: &str,
    path: &str,
    value: &Value,
    at_root: bool,
    by_path: &mut HashMap<String, Arc<KeyDef>>,
) -> Result<Arc<KeyDef>, SinkError> {
    let mut def = KeyDef {
        name: name.to_string(),
        path: path.to_string(),
        flags: if at_root {
            PFlags::NONE
        } else {
            platform_flags_for_name(name)
        },
        ..Default::default()
    };

    let Value::Object(members) = value else {
        // Shorthand: "Key": <default value>
        def.val = Variant::from_json(value);
        if def.val.is_none() {
            return Err(SinkError::Parse(format!("key {path:?} has an invalid value")));
        }
        let def = Arc::new(def);
        by_path.insert(path.to_string(), def.clone());
        return Ok(def);
    };

    for (member, value) in members {
        if is_key_name(member) {
            let child_path = format!("{path}.{member}");
            let child = parse_def(member, &child_path, value, false, by_path)?;
            def.child_flags |= child.flags;
            def.children.insert(member.clone(), child);
        } else if member == "style" {
            def.style = KeyStyle::from_json(value)
                .ok_or_else(|| SinkError::Parse(format!("key {path:?} has an invalid style")))?;
        } else if member == "value" {
            def.val = Some(Variant::from_json(value).ok_or_else(|| {
                SinkError::Parse(format!("key {path:?} has an invalid default value"))
            })?);
        } else if let Some(pair) = Variant::from_json(value) {
            def.pairs.insert(member.clone(), pair);
        }
    }

    let def = Arc::new(def);
    by_path.insert(path.to_string(), def.clone());
    Ok(def)
}
