// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Weak},
};

use enum_map::EnumMap;
use parking_lot::{RwLock, RwLockUpgradableReadGuard};
use tracing::{debug, info, warn};

use crate::{
    asset::Asset,
    asset_type::AssetType,
    entry::{CookedEntry, Entry},
    flags::Zone,
    package_man::PackageMan,
    result::PackageError,
    script::{self, ScriptEntry},
};

/// A named collection of entries, loaded from an editable package script or
/// from cooked package data.
pub struct Package {
    man: Weak<PackageMan>,
    state: RwLock<PackageState>,
}

struct PackageState {
    name: String,
    script_path: String,
    cooked: bool,
    entries: BTreeMap<String, Arc<Entry>>,
    by_id: HashMap<i32, Arc<Entry>>,
    lower_names: HashMap<String, i32>,
    assets: EnumMap<Zone, ZoneAssets>,
    /// Reference counts of the asset paths imported by the entries.
    import_refs: BTreeMap<String, usize>,
    /// The import table of cooked package data.
    cooked_imports: Vec<String>,
}

#[derive(Default)]
struct ZoneAssets {
    by_name: HashMap<String, Weak<Asset>>,
    by_id: HashMap<i32, Weak<Asset>>,
}

impl PackageState {
    fn insert(&mut self, entry: Arc<Entry>) {
        let name = entry.name();
        self.lower_names.insert(name.to_lowercase(), entry.id());
        self.by_id.insert(entry.id(), entry.clone());
        self.entries.insert(name, entry);
    }
}

impl Package {
    pub(crate) fn new(man: &Arc<PackageMan>, name: &str, script_path: &str, cooked: bool) -> Arc<Package> {
        Arc::new(Package {
            man: Arc::downgrade(man),
            state: RwLock::new(PackageState {
                name: name.to_string(),
                script_path: script_path.to_string(),
                cooked,
                entries: BTreeMap::new(),
                by_id: HashMap::new(),
                lower_names: HashMap::new(),
                assets: EnumMap::default(),
                import_refs: BTreeMap::new(),
                cooked_imports: Vec::new(),
            }),
        })
    }

    pub fn name(&self) -> String {
        self.state.read().name.clone()
    }

    pub fn script_path(&self) -> String {
        self.state.read().script_path.clone()
    }

    pub fn is_cooked(&self) -> bool {
        self.state.read().cooked
    }

    pub fn man(&self) -> Option<Arc<PackageMan>> {
        self.man.upgrade()
    }

    /// The entries, ordered by name.
    pub fn entries(&self) -> Vec<Arc<Entry>> {
        self.state.read().entries.values().cloned().collect()
    }

    pub fn entry(&self, id: i32) -> Option<Arc<Entry>> {
        self.state.read().by_id.get(&id).cloned()
    }

    pub fn entry_by_name(&self, name: &str) -> Option<Arc<Entry>> {
        self.state.read().entries.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn cooked_import(&self, index: usize) -> Option<String> {
        self.state.read().cooked_imports.get(index).cloned()
    }

    /// The asset paths imported by the entries, with their reference counts.
    pub fn import_refs(&self) -> BTreeMap<String, usize> {
        self.state.read().import_refs.clone()
    }

    /// The asset of an entry in a zone. Assets are shared per zone while
    /// something holds on to them, except in [`Zone::Unique`], where every
    /// call creates a new one.
    pub fn asset(self: &Arc<Self>, id: i32, zone: Zone) -> Option<Arc<Asset>> {
        let entry = self.state.read().by_id.get(&id)?.clone();
        self.asset_for_entry(entry, zone)
    }

    pub fn asset_by_name(self: &Arc<Self>, name: &str, zone: Zone) -> Option<Arc<Asset>> {
        let entry = self.state.read().entries.get(name)?.clone();
        self.asset_for_entry(entry, zone)
    }

    /// Lookups share the read lock. Only a miss takes the upgradable lock,
    /// which checks again before creating the asset, since another thread
    /// may have created it in between.
    fn asset_for_entry(self: &Arc<Self>, entry: Arc<Entry>, zone: Zone) -> Option<Arc<Asset>> {
        let man = self.man.upgrade()?;
        if zone == Zone::Unique {
            return Some(Asset::new(zone, entry, self.clone(), &man));
        }
        let cached = |state: &PackageState| state.assets[zone].by_id.get(&entry.id()).and_then(Weak::upgrade);
        if let Some(asset) = cached(&*self.state.read()) {
            return Some(asset);
        }

        let state = self.state.upgradable_read();
        if let Some(asset) = cached(&*state) {
            return Some(asset);
        }
        let mut state = RwLockUpgradableReadGuard::upgrade(state);
        let asset = Asset::new(zone, entry.clone(), self.clone(), &man);
        let zone_assets = &mut state.assets[zone];
        zone_assets.by_id.insert(entry.id(), Arc::downgrade(&asset));
        zone_assets.by_name.insert(entry.name(), Arc::downgrade(&asset));
        Some(asset)
    }

    /// The live assets of a zone.
    pub fn refed_assets(&self, zone: Zone) -> Vec<Arc<Asset>> {
        let state = self.state.read();
        state.assets[zone]
            .by_id
            .values()
            .filter_map(Weak::upgrade)
            .collect()
    }

    /// Removes the cache entries of a dropped asset. Entries that were already
    /// replaced by a newer asset are left alone.
    pub(crate) fn unlink_asset(&self, zone: Zone, id: i32, name: &str) {
        let mut state = self.state.write();
        let zone_assets = &mut state.assets[zone];
        if zone_assets.by_id.get(&id).is_some_and(|weak| weak.strong_count() == 0) {
            zone_assets.by_id.remove(&id);
        }
        if zone_assets.by_name.get(name).is_some_and(|weak| weak.strong_count() == 0) {
            zone_assets.by_name.remove(name);
        }
    }

    pub(crate) fn adjust_import_refs(&self, added: &[String], removed: &[String]) {
        let mut state = self.state.write();
        for path in added {
            *state.import_refs.entry(path.clone()).or_default() += 1;
        }
        for path in removed {
            if let Some(count) = state.import_refs.get_mut(path) {
                *count -= 1;
                if *count == 0 {
                    state.import_refs.remove(path);
                }
            }
        }
    }

    fn man_or_detached(&self) -> Result<Arc<PackageMan>, PackageError> {
        self.man.upgrade().ok_or(PackageError::Detached)
    }

    fn check_editable(&self) -> Result<(), PackageError> {
        let state = self.state.read();
        if state.cooked {
            return Err(PackageError::Cooked(state.name.clone()));
        }
        Ok(())
    }

    /// Creates a new entry. Names are unique case-insensitively within the
    /// package.
    pub fn create_entry(self: &Arc<Self>, name: &str, asset_type: AssetType) -> Result<Arc<Entry>, PackageError> {
        self.check_editable()?;
        check_name(name)?;
        let man = self.man_or_detached()?;
        let defs = man.key_defs(asset_type);

        let entry = {
            let mut state = self.state.write();
            if state.lower_names.contains_key(&name.to_lowercase()) {
                return Err(PackageError::NameTaken(format!("{}/{name}", state.name)));
            }
            let id = man.next_entry_id();
            let entry = Arc::new(Entry::new(id, name, &state.name, asset_type, Arc::downgrade(self), defs, None));
            state.insert(entry.clone());
            entry
        };
        man.register_entry(entry.id(), self);
        debug!(asset = %entry.path(), "created entry");
        Ok(entry)
    }

    /// Creates a new entry with a copy of the keys of `source`.
    pub fn clone_entry(self: &Arc<Self>, source: &Entry, name: &str) -> Result<Arc<Entry>, PackageError> {
        let entry = self.create_entry(name, source.asset_type())?;
        for key in source.keys() {
            entry.add_key(key, false);
        }
        Ok(entry)
    }

    /// Deletes an entry. Imports of the deleted entry in other entries are
    /// left as they are.
    pub fn delete_entry(&self, id: i32) -> Result<(), PackageError> {
        self.check_editable()?;
        let man = self.man_or_detached()?;
        let entry = {
            let mut state = self.state.write();
            let entry = state
                .by_id
                .remove(&id)
                .ok_or_else(|| PackageError::NotFound(format!("entry {id}")))?;
            let name = entry.name();
            state.entries.remove(&name);
            state.lower_names.remove(&name.to_lowercase());
            for zone_assets in state.assets.values_mut() {
                zone_assets.by_id.remove(&id);
                zone_assets.by_name.remove(&name);
            }
            entry
        };
        self.adjust_import_refs(&[], &entry.import_paths());
        man.unregister_entry(id);
        man.update_imports(&entry.path(), None);
        info!(asset = %entry.path(), "deleted entry");
        Ok(())
    }

    /// Renames an entry and points every import of it in every loaded package
    /// to the new path.
    pub fn rename_entry(&self, id: i32, name: &str) -> Result<(), PackageError> {
        self.check_editable()?;
        check_name(name)?;
        let man = self.man_or_detached()?;
        let (old_path, new_path) = {
            let mut state = self.state.write();
            let entry = state
                .by_id
                .get(&id)
                .cloned()
                .ok_or_else(|| PackageError::NotFound(format!("entry {id}")))?;
            let lower = name.to_lowercase();
            if state.lower_names.get(&lower).is_some_and(|other| *other != id) {
                return Err(PackageError::NameTaken(format!("{}/{name}", state.name)));
            }

            let old_name = entry.name();
            state.entries.remove(&old_name);
            state.lower_names.remove(&old_name.to_lowercase());
            for zone_assets in state.assets.values_mut() {
                if let Some(asset) = zone_assets.by_name.remove(&old_name) {
                    zone_assets.by_name.insert(name.to_string(), asset);
                }
            }
            let package_name = state.name.clone();
            let old_path = entry.set_path(name, &package_name);
            let new_path = entry.path();
            state.entries.insert(name.to_string(), entry.clone());
            state.lower_names.insert(lower, id);
            (old_path, new_path)
        };
        let updated = man.update_imports(&old_path, Some(&new_path));
        info!(from = %old_path, to = %new_path, updated, "renamed entry");
        Ok(())
    }

    /// Rewrites the Import-styled keys pointing at `src` to point at `dst`.
    /// Without a `dst` nothing is changed: deleting an asset doesn't strip the
    /// imports of it. Returns the number of entries that changed.
    pub fn update_imports(&self, src: &str, dst: Option<&str>) -> usize {
        let Some(dst) = dst else {
            return 0;
        };
        if self.is_cooked() {
            return 0;
        }
        self.entries()
            .iter()
            .filter(|entry| entry.rewrite_imports(src, dst))
            .count()
    }

    /// Deletes the package's script and forgets the package. Imports of its
    /// entries in other packages are left as they are.
    pub fn delete(&self) -> Result<(), PackageError> {
        self.check_editable()?;
        let man = self.man_or_detached()?;
        let (name, script_path, entries) = {
            let state = self.state.read();
            let entries: Vec<Arc<Entry>> = state.entries.values().cloned().collect();
            (state.name.clone(), state.script_path.clone(), entries)
        };
        for entry in &entries {
            man.unregister_entry(entry.id());
            man.update_imports(&entry.path(), None);
        }
        delete_if_exists(&man, &script_path)?;
        delete_if_exists(&man, &script::index_path(&script_path))?;
        man.forget_package(&name);
        info!(package = %name, "deleted package");
        Ok(())
    }

    /// Renames the package, moving its script and pointing every import of
    /// its entries to the new paths.
    pub fn rename(self: &Arc<Self>, name: &str) -> Result<(), PackageError> {
        self.check_editable()?;
        check_name(name)?;
        let man = self.man_or_detached()?;
        let old_name = self.name();
        man.rekey_package(&old_name, name, self)?;

        let (old_script, renamed) = {
            let mut state = self.state.write();
            state.name = name.to_string();
            let new_script = man.script_path(name);
            let old_script = core::mem::replace(&mut state.script_path, new_script);
            let renamed: Vec<(String, String)> = state
                .entries
                .values()
                .map(|entry| {
                    let old_path = entry.set_path(&entry.name(), name);
                    (old_path, entry.path())
                })
                .collect();
            (old_script, renamed)
        };

        delete_if_exists(&man, &old_script)?;
        delete_if_exists(&man, &script::index_path(&old_script))?;
        for (old_path, new_path) in &renamed {
            man.update_imports(old_path, Some(new_path));
        }
        info!(from = %old_name, to = %name, "renamed package");
        self.save()
    }

    /// Writes the package script and its entry count sidecar.
    pub fn save(&self) -> Result<(), PackageError> {
        self.check_editable()?;
        let man = self.man_or_detached()?;
        let (script_path, entries) = {
            let state = self.state.read();
            let entries: Vec<ScriptEntry> = state
                .entries
                .values()
                .map(|entry| ScriptEntry::from_entry(entry))
                .collect();
            (state.script_path.clone(), entries)
        };
        let text = script::write_script(&entries);
        man.fs().write(&script_path, text.as_bytes())?;
        man.fs()
            .write(&script::index_path(&script_path), &script::encode_index(entries.len() as u32))?;
        debug!(package = %self.name(), entries = entries.len(), "saved package");
        Ok(())
    }

    /// Creates the entries of a parsed package script. Returns true if an
    /// entry was missing its modification time, meaning the script should be
    /// saved to record one.
    pub(crate) fn load_script_entries(self: &Arc<Self>, entries: Vec<ScriptEntry>) -> Result<bool, PackageError> {
        let mut resave = false;
        for script_entry in entries {
            let asset_type = AssetType::from_name(&script_entry.asset_type).ok_or_else(|| PackageError::Script {
                path: self.script_path(),
                reason: format!(
                    "entry {:?} has an unknown type {:?}",
                    script_entry.name, script_entry.asset_type
                ),
            })?;
            let entry = match self.create_entry(&script_entry.name, asset_type) {
                Ok(entry) => entry,
                Err(PackageError::NameTaken(name)) => {
                    warn!(asset = %name, "skipping duplicate entry in package script");
                    continue;
                }
                Err(err) => return Err(err),
            };
            for (path, value) in script_entry.keys {
                entry.set_key(&path, value);
            }
            match script_entry.modified_time {
                Some(time) => entry.set_modified_time(time),
                None => resave = true,
            }
        }
        Ok(resave)
    }

    /// Inserts the entries of cooked package data.
    pub(crate) fn load_cooked_entries(
        self: &Arc<Self>,
        imports: Vec<String>,
        entries: Vec<(String, AssetType, CookedEntry)>,
    ) {
        let Some(man) = self.man.upgrade() else {
            return;
        };
        let mut ids = Vec::with_capacity(entries.len());
        {
            let mut state = self.state.write();
            state.cooked_imports = imports;
            for (name, asset_type, cooked) in entries {
                let defs = man.key_defs(asset_type);
                let id = man.next_entry_id();
                let entry = Entry::new(id, &name, &state.name, asset_type, Arc::downgrade(self), defs, Some(cooked));
                state.insert(Arc::new(entry));
                ids.push(id);
            }
        }
        for id in ids {
            man.register_entry(id, self);
        }
    }
}

pub(crate) fn check_name(name: &str) -> Result<(), PackageError> {
    if name.is_empty() || name.contains(['/', '\\']) || name.trim() != name {
        return Err(PackageError::InvalidName(name.to_string()));
    }
    Ok(())
}

fn delete_if_exists(man: &PackageMan, path: &str) -> Result<(), PackageError> {
    match man.fs().delete_file(path) {
        Err(err) if !err.is_not_found() => Err(err.into()),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{Arc, Barrier},
        thread,
        time::Duration,
    };

    use crate::{
        asset_type::AssetType,
        flags::{PFlags, Zone},
        keys::Variant,
        result::PackageError,
        test_util::package_man,
    };

    #[test]
    fn entry_names_are_case_insensitively_unique() {
        let (_, man) = package_man();
        let package = man.create_package("World").unwrap();
        package.create_entry("Rock", AssetType::Texture).unwrap();
        assert!(matches!(
            package.create_entry("rock", AssetType::Texture),
            Err(PackageError::NameTaken(_))
        ));
        assert!(matches!(
            package.create_entry("a/b", AssetType::Texture),
            Err(PackageError::InvalidName(_))
        ));
    }

    #[test]
    fn assets_are_shared_per_zone() {
        let (_, man) = package_man();
        let package = man.create_package("World").unwrap();
        let entry = package.create_entry("Rock", AssetType::Texture).unwrap();

        let a = package.asset(entry.id(), Zone::Engine).unwrap();
        let b = package.asset_by_name("Rock", Zone::Engine).unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let other_zone = package.asset(entry.id(), Zone::ContentBrowser).unwrap();
        assert!(!Arc::ptr_eq(&a, &other_zone));

        let unique_a = package.asset(entry.id(), Zone::Unique).unwrap();
        let unique_b = package.asset(entry.id(), Zone::Unique).unwrap();
        assert!(!Arc::ptr_eq(&unique_a, &unique_b));
        assert!(package.refed_assets(Zone::Unique).is_empty());
        assert_eq!(1, package.refed_assets(Zone::Engine).len());

        drop((a, b));
        assert!(package.refed_assets(Zone::Engine).is_empty());
        let c = package.asset(entry.id(), Zone::Engine).unwrap();
        assert_eq!(entry.id(), c.entry().id());
    }

    #[test]
    fn concurrent_lookups_share_assets() {
        let (_, man) = package_man();
        let package = man.create_package("World").unwrap();
        let id = package.create_entry("Rock", AssetType::Texture).unwrap().id();

        let barrier = Barrier::new(8);
        let assets: Vec<_> = thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        package.asset(id, Zone::Engine).unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|handle| handle.join().unwrap()).collect()
        });
        assert!(assets.iter().all(|asset| Arc::ptr_eq(asset, &assets[0])));

        // A lookup that hits the cache doesn't wait for a thread that is
        // about to create an asset.
        let creating = package.state.upgradable_read();
        let (sender, receiver) = crossbeam::channel::bounded(1);
        thread::scope(|scope| {
            scope.spawn(|| sender.send(package.asset(id, Zone::Engine)).unwrap());
            let found = receiver.recv_timeout(Duration::from_secs(10)).unwrap().unwrap();
            assert!(Arc::ptr_eq(&found, &assets[0]));
            drop(creating);
        });
    }

    #[test]
    fn rename_rewrites_imports() {
        let (_, man) = package_man();
        let world = man.create_package("World").unwrap();
        let props = man.create_package("Props").unwrap();
        let texture = world.create_entry("Rock", AssetType::Texture).unwrap();
        let material = props.create_entry("RockMat", AssetType::Material).unwrap();
        material.set_key("Texture1.Source.Texture", Variant::String("World/Rock".into()));
        assert_eq!(Some(&1), props.import_refs().get("World/Rock"));

        texture.rename("Stone").unwrap();
        assert_eq!("World/Stone", texture.path());
        assert!(world.entry_by_name("Rock").is_none());
        assert_eq!(
            Some("World/Stone".to_string()),
            material.key_value::<String>("Texture1.Source.Texture", PFlags::NONE)
        );
        assert_eq!(Some(&1), props.import_refs().get("World/Stone"));
        assert!(!props.import_refs().contains_key("World/Rock"));
    }

    #[test]
    fn delete_leaves_imports_dangling() {
        let (_, man) = package_man();
        let world = man.create_package("World").unwrap();
        let texture = world.create_entry("Rock", AssetType::Texture).unwrap();
        let material = world.create_entry("RockMat", AssetType::Material).unwrap();
        material.set_key("Texture1.Source.Texture", Variant::String("World/Rock".into()));

        let id = texture.id();
        texture.delete().unwrap();
        assert!(man.find_entry(id).is_none());
        assert_eq!(-1, man.resolve_id("World/Rock", PFlags::NONE));
        assert_eq!(
            Some("World/Rock".to_string()),
            material.key_value::<String>("Texture1.Source.Texture", PFlags::NONE)
        );
        assert_eq!(0, world.update_imports("World/Rock", None));
    }

    #[test]
    fn clones_entries() {
        let (_, man) = package_man();
        let world = man.create_package("World").unwrap();
        let rock = world.create_entry("Rock", AssetType::Texture).unwrap();
        rock.set_key("Source.File", Variant::String("rock.png".into()));
        let copy = world.clone_entry(&rock, "Rock2").unwrap();
        assert_ne!(rock.id(), copy.id());
        assert_eq!(
            Some("rock.png".to_string()),
            copy.key_value::<String>("Source.File", PFlags::NONE)
        );
    }

    #[test]
    fn package_rename_moves_script_and_imports() {
        let (fs, man) = package_man();
        let world = man.create_package("World").unwrap();
        let props = man.create_package("Props").unwrap();
        world.create_entry("Rock", AssetType::Texture).unwrap();
        let material = props.create_entry("RockMat", AssetType::Material).unwrap();
        material.set_key("Texture1.Source.Texture", Variant::String("World/Rock".into()));
        world.save().unwrap();

        world.rename("Level1").unwrap();
        let paths = fs.file_paths();
        assert!(paths.contains(&"Packages/Level1.pkg".to_string()));
        assert!(!paths.contains(&"Packages/World.pkg".to_string()));
        assert!(man.resolve_package("Level1", PFlags::NONE).is_some());
        assert!(man.resolve_package("World", PFlags::NONE).is_none());
        assert_eq!(
            Some("Level1/Rock".to_string()),
            material.key_value::<String>("Texture1.Source.Texture", PFlags::NONE)
        );
    }
}
