// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{
    collections::BTreeMap,
    sync::{Arc, Weak},
    time::{SystemTime, UNIX_EPOCH},
};

use parking_lot::RwLock;
use tracing::error;

use crate::{
    asset::Asset,
    asset_type::AssetType,
    flags::{platform_name_for_flags, PFlags, Target, Zone, NUM_TARGETS},
    keys::{KeyDefs, KeyType, KeyVal, Variant},
    package::Package,
    result::PackageError,
};

/// The tag blobs and import indices of an entry loaded from cooked package
/// data. Slot 0 of `tags` is the generic tag, slot `n + 1` is for the target
/// with index `n`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CookedEntry {
    pub tags: [Option<Vec<u8>>; NUM_TARGETS + 1],
    /// Indices into the package's import table.
    pub imports: Vec<u16>,
}

/// A package's metadata record for one asset.
pub struct Entry {
    id: i32,
    asset_type: AssetType,
    package: Weak<Package>,
    defs: Arc<KeyDefs>,
    cooked: Option<CookedEntry>,
    state: RwLock<EntryState>,
}

struct EntryState {
    name: String,
    path: String,
    keys: BTreeMap<String, KeyVal>,
    /// Key path to imported asset path, for the keys with the Import style.
    imports: BTreeMap<String, String>,
    modified_time: u64,
}

#[derive(Default)]
struct ImportChanges {
    added: Vec<String>,
    removed: Vec<String>,
}

impl Entry {
    pub(crate) fn new(
        id: i32,
        name: &str,
        package_name: &str,
        asset_type: AssetType,
        package: Weak<Package>,
        defs: Arc<KeyDefs>,
        cooked: Option<CookedEntry>,
    ) -> Entry {
        Entry {
            id,
            asset_type,
            package,
            defs,
            cooked,
            state: RwLock::new(EntryState {
                name: name.to_string(),
                path: format!("{package_name}/{name}"),
                keys: BTreeMap::new(),
                imports: BTreeMap::new(),
                modified_time: now_millis(),
            }),
        }
    }

    /// The id of the entry, unique among all the entries of every package
    /// and stable for the lifetime of the package manager.
    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn name(&self) -> String {
        self.state.read().name.clone()
    }

    /// `Package/Name`.
    pub fn path(&self) -> String {
        self.state.read().path.clone()
    }

    pub fn asset_type(&self) -> AssetType {
        self.asset_type
    }

    pub fn package(&self) -> Option<Arc<Package>> {
        self.package.upgrade()
    }

    pub fn defs(&self) -> &Arc<KeyDefs> {
        &self.defs
    }

    pub fn is_cooked(&self) -> bool {
        self.cooked.is_some()
    }

    pub fn modified_time(&self) -> u64 {
        self.state.read().modified_time
    }

    pub(crate) fn set_modified_time(&self, modified_time: u64) {
        self.state.write().modified_time = modified_time;
    }

    /// Marks the entry as modified now. The new time is always later than the
    /// previous one, so cookers notice the change.
    pub fn update_modified_time(&self) {
        let mut state = self.state.write();
        state.modified_time = now_millis().max(state.modified_time + 1);
    }

    /// Finds the key for `path`: for a target in `flags`, the target's variant
    /// `path.PlatformName` if there is one, otherwise the generic key. The
    /// returned flags are the target of the key that was found, empty for
    /// generic keys.
    pub fn find_key(&self, path: &str, flags: PFlags) -> Option<(KeyVal, PFlags)> {
        let state = self.state.read();
        let targets = flags.targets();
        if let Some(platform) = platform_name_for_flags(targets) {
            if let Some(key) = state.keys.get(&format!("{path}.{platform}")) {
                let target = targets.first_target().map(Target::flag).unwrap_or_default();
                return Some((key.clone(), target));
            }
        }
        state.keys.get(path).map(|key| (key.clone(), PFlags::NONE))
    }

    /// The value of a key, see [`Entry::find_key`]. Keys missing from the
    /// entry fall back to the schema's default unless
    /// [`PFlags::NO_DEFAULT_KEY`] is set. Values of the wrong type are `None`.
    pub fn key_value<T: KeyType>(&self, path: &str, flags: PFlags) -> Option<T> {
        match self.find_key(path, flags) {
            Some((key, _)) => key.val.as_ref().and_then(T::from_variant),
            None if flags.contains(PFlags::NO_DEFAULT_KEY) => None,
            None => self
                .defs
                .get(path)
                .and_then(|def| def.val.as_ref())
                .and_then(T::from_variant),
        }
    }

    /// Returns the targets of `allflags` whose value for the key is the same
    /// as the first target of `flags`. That target always matches itself if
    /// it's in `allflags`. A key that's absent for two targets matches.
    pub fn match_target_keys<T: KeyType>(&self, path: &str, flags: PFlags, allflags: PFlags) -> PFlags {
        let allflags = allflags.targets();
        let Some(first) = flags.targets().first_target() else {
            return PFlags::NONE;
        };
        let value = self.key_value::<T>(path, first.flag());
        let mut matched = first.flag() & allflags;
        for target in allflags.iter_targets().filter(|target| *target != first) {
            if self.key_value::<T>(path, target.flag()) == value {
                matched |= target.flag();
            }
        }
        matched
    }

    /// Adds or replaces a key. With `apply_default`, a key without a value
    /// gets the schema's default. A value of the wrong type is replaced with
    /// the default too.
    pub fn add_key(&self, mut key: KeyVal, apply_default: bool) {
        if key.val.is_none() && apply_default {
            key.val = key.def.val.clone();
        }
        if let Some(val) = &key.val {
            if !key.def.accepts(val) {
                error!(
                    asset = %self.path(),
                    key = %key.path,
                    "value {val} has the wrong type, resetting the key to its default",
                );
                key.val = key.def.val.clone();
            }
        }

        let changes = {
            let mut state = self.state.write();
            let mut changes = ImportChanges::default();
            if let Some(old) = state.imports.remove(&key.path) {
                changes.removed.push(old);
            }
            if let Some(import) = import_path(&key) {
                state.imports.insert(key.path.clone(), import.clone());
                changes.added.push(import);
            }
            state.keys.insert(key.path.clone(), key);
            changes
        };
        self.apply_import_changes(changes);
    }

    /// Sets a key by path, using the schema's def for it.
    pub fn set_key(&self, path: &str, value: Variant) {
        let def = self.defs.find(path).clone();
        self.add_key(KeyVal::new(path, def, value), false);
    }

    /// Removes keys, returning how many were removed. With a target in
    /// `flags`, only that target's variant `path.PlatformName` is removed.
    /// With [`PFlags::EXACT`], only `path` itself. Otherwise `path` and every
    /// key under it.
    pub fn remove_key(&self, path: &str, flags: PFlags) -> usize {
        let exact = match platform_name_for_flags(flags.targets()) {
            Some(platform) => Some(format!("{path}.{platform}")),
            None if flags.contains(PFlags::EXACT) => Some(path.to_string()),
            None => None,
        };
        let prefix = format!("{path}.");

        let (count, changes) = {
            let mut state = self.state.write();
            let doomed: Vec<String> = match &exact {
                Some(exact) => state.keys.keys().filter(|k| *k == exact).cloned().collect(),
                None => state
                    .keys
                    .keys()
                    .filter(|k| *k == path || k.starts_with(&prefix))
                    .cloned()
                    .collect(),
            };
            let mut changes = ImportChanges::default();
            for key in &doomed {
                state.keys.remove(key);
                if let Some(import) = state.imports.remove(key) {
                    changes.removed.push(import);
                }
            }
            (doomed.len(), changes)
        };
        self.apply_import_changes(changes);
        count
    }

    pub fn keys(&self) -> Vec<KeyVal> {
        self.state.read().keys.values().cloned().collect()
    }

    /// The imported asset path of an Import-styled key.
    pub fn resolve_import(&self, key_path: &str) -> Option<String> {
        self.state.read().imports.get(key_path).cloned()
    }

    /// The distinct asset paths imported by this entry's keys.
    pub fn import_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.state.read().imports.values().cloned().collect();
        paths.sort();
        paths.dedup();
        paths
    }

    /// The asset path of a cooked import, by the index the cooker gave it.
    pub fn resolve(&self, index: usize) -> Option<String> {
        let package_index = *self.cooked.as_ref()?.imports.get(index)?;
        self.package()?.cooked_import(package_index as usize)
    }

    pub fn cooked_imports(&self) -> usize {
        self.cooked.as_ref().map_or(0, |cooked| cooked.imports.len())
    }

    /// Resolves an imported asset path to an asset in `zone`.
    pub fn resolve_asset(&self, import: &str, zone: Zone, flags: PFlags) -> Option<Arc<Asset>> {
        self.package()?.man()?.resolve(import, zone, flags)
    }

    /// Resolves an imported asset path to an entry id, -1 if it doesn't
    /// exist.
    pub fn resolve_import_id(&self, import: &str, flags: PFlags) -> i32 {
        match self.package().and_then(|package| package.man()) {
            Some(man) => man.resolve_id(import, flags),
            None => -1,
        }
    }

    /// The cooked tag data for a target, or the generic tag for `None`. iPad
    /// falls back to the iPhone tag, and every target falls back to the
    /// generic one.
    pub fn tag_data(&self, target: Option<Target>) -> Option<&[u8]> {
        let cooked = self.cooked.as_ref()?;
        let slot = |index: usize| cooked.tags[index].as_deref();
        match target {
            None => slot(0),
            Some(target) => slot(target.index() + 1)
                .or_else(|| match target {
                    Target::IPad => slot(Target::IPhone.index() + 1),
                    _ => None,
                })
                .or_else(|| slot(0)),
        }
    }

    /// Deletes the entry from its package.
    pub fn delete(&self) -> Result<(), PackageError> {
        let package = self.package().ok_or(PackageError::Detached)?;
        package.delete_entry(self.id)
    }

    pub fn rename(&self, name: &str) -> Result<(), PackageError> {
        let package = self.package().ok_or(PackageError::Detached)?;
        package.rename_entry(self.id, name)
    }

    /// Changes the name and package of the entry, returning the old path.
    pub(crate) fn set_path(&self, name: &str, package_name: &str) -> String {
        let mut state = self.state.write();
        state.name = name.to_string();
        let new_path = format!("{package_name}/{name}");
        core::mem::replace(&mut state.path, new_path)
    }

    /// Replaces the value of every Import-styled key pointing at `src` with
    /// `dst`. Returns true if anything changed.
    pub(crate) fn rewrite_imports(&self, src: &str, dst: &str) -> bool {
        let changes = {
            let mut state = self.state.write();
            let EntryState { keys, imports, .. } = &mut *state;
            let mut changes = ImportChanges::default();
            for key in keys.values_mut() {
                if key.is_import() && key.val.as_ref().is_some_and(|val| matches!(val, Variant::String(s) if s == src)) {
                    key.val = Some(Variant::String(dst.to_string()));
                    imports.insert(key.path.clone(), dst.to_string());
                    changes.removed.push(src.to_string());
                    changes.added.push(dst.to_string());
                }
            }
            changes
        };
        if changes.added.is_empty() {
            return false;
        }
        self.update_modified_time();
        self.apply_import_changes(changes);
        true
    }

    fn apply_import_changes(&self, changes: ImportChanges) {
        if changes.added.is_empty() && changes.removed.is_empty() {
            return;
        }
        if let Some(package) = self.package() {
            package.adjust_import_refs(&changes.added, &changes.removed);
        }
    }
}

fn import_path(key: &KeyVal) -> Option<String> {
    match &key.val {
        Some(Variant::String(path)) if key.is_import() && !path.is_empty() => Some(path.clone()),
        _ => None,
    }
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |since| since.as_millis() as u64)
}
