// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    num::NonZero,
    sync::{
        atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering},
        Arc, Weak,
    },
    thread,
};

use enum_map::EnumMap;
use file_system::{lump::LumpReader, FileError, FileSystem, Media};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::{
    asset::Asset,
    asset_type::AssetType,
    assets,
    binding::{BindError, Binding, BindingKind, CookerFactory, SinkFactory},
    cooker::{self, CookerInstance, CookerType},
    entry::Entry,
    flags::{PFlags, Stage, Target, Zone},
    keys::KeyDefs,
    language::{Language, Languages},
    package::{check_name, Package},
    result::{PackageError, SinkError, SinkResult, Status},
    script,
    sink::{self, MutexPool, SinkType},
    tag::{self, IMPORTS_LUMP, PACKAGE_ID, PACKAGE_SIG},
    time_slice::TimeSlice,
};

/// Where a [`PackageMan`] finds its files, and what it's running on.
#[derive(Debug, Clone)]
pub struct PackageManConfig {
    /// The directory with the package scripts, key schemas and, in cooked
    /// data, the package lumps.
    pub package_dir: String,
    /// The root of the cook output.
    pub cooked_dir: String,
    /// The root of the output of intermediate cookers.
    pub temp_dir: String,
    pub host: Target,
    /// The language loaded at runtime.
    pub language: Language,
    pub cook_threads: usize,
    /// Prefer editable package scripts over cooked package data when both
    /// exist.
    pub tools: bool,
}

impl Default for PackageManConfig {
    fn default() -> Self {
        PackageManConfig {
            package_dir: "Packages".to_string(),
            cooked_dir: "Cooked".to_string(),
            temp_dir: "Temp".to_string(),
            host: Target::PC,
            language: Language::English,
            cook_threads: thread::available_parallelism().map_or(4, NonZero::get),
            tools: true,
        }
    }
}

/// A package script found by [`PackageMan::discover_packages`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageInfo {
    pub name: String,
    pub path: String,
    /// The entry count from the script's index file.
    pub entries: u32,
}

/// The ids of the shaders materials are cooked against. Ids are assigned on
/// first use and persisted, so cooked materials stay valid across cooks.
#[derive(Debug, Default)]
struct ShaderTable {
    ids: BTreeMap<String, u16>,
    dirty: bool,
}

/// The registry of packages, sink and cooker bindings, and key schemas.
/// Every asset operation goes through one of these.
pub struct PackageMan {
    fs: Arc<dyn FileSystem>,
    config: PackageManConfig,
    self_ref: Weak<PackageMan>,
    next_entry_id: AtomicI32,
    next_binding_id: AtomicU64,
    packages: RwLock<BTreeMap<String, Arc<Package>>>,
    /// Discovered package scripts by lower case name.
    scripts: RwLock<BTreeMap<String, PackageInfo>>,
    entries: RwLock<HashMap<i32, Weak<Package>>>,
    key_defs: RwLock<EnumMap<AssetType, Arc<KeyDefs>>>,
    sinks: RwLock<EnumMap<AssetType, BTreeMap<Stage, Arc<SinkFactory>>>>,
    cookers: RwLock<EnumMap<AssetType, Option<Arc<CookerFactory>>>>,
    mutex_pool: MutexPool,
    cancel: AtomicBool,
    shaders: Mutex<ShaderTable>,
    /// Held while loading or creating packages, so the same package is never
    /// loaded twice.
    load_lock: Mutex<()>,
}

impl PackageMan {
    pub fn new(fs: Arc<dyn FileSystem>, config: PackageManConfig) -> Arc<PackageMan> {
        Arc::new_cyclic(|self_ref| PackageMan {
            fs,
            config,
            self_ref: self_ref.clone(),
            next_entry_id: AtomicI32::new(1),
            next_binding_id: AtomicU64::new(1),
            packages: RwLock::new(BTreeMap::new()),
            scripts: RwLock::new(BTreeMap::new()),
            entries: RwLock::new(HashMap::new()),
            key_defs: RwLock::new(EnumMap::default()),
            sinks: RwLock::new(EnumMap::default()),
            cookers: RwLock::new(EnumMap::default()),
            mutex_pool: MutexPool::new(8),
            cancel: AtomicBool::new(false),
            shaders: Mutex::new(ShaderTable::default()),
            load_lock: Mutex::new(()),
        })
    }

    /// Loads the key schemas: `<package dir>/<Type>.keys` if it exists,
    /// otherwise the built-in schema of the type. Also loads the shader ids
    /// of previous cooks.
    pub fn initialize(&self) -> Result<(), SinkError> {
        for asset_type in AssetType::ALL {
            let path = format!("{}/{}.keys", self.config.package_dir, asset_type.name());
            let defs = match self.fs.read(&path, Media::ALL) {
                Ok(bytes) => {
                    let text = String::from_utf8(bytes)
                        .map_err(|_| SinkError::Parse(format!("{path} is not UTF-8")))?;
                    let defs = KeyDefs::parse(&text).map_err(|err| SinkError::Parse(format!("{path}: {err}")))?;
                    debug!(schema = %path, "loaded key schema");
                    defs
                }
                Err(err) if err.is_not_found() => match assets::default_keys(asset_type) {
                    Some(json) => KeyDefs::parse(&json)?,
                    None => KeyDefs::default(),
                },
                Err(err) => return Err(err.into()),
            };
            self.key_defs.write()[asset_type] = Arc::new(defs);
        }

        let shaders_path = self.shaders_path();
        match self.fs.read(&shaders_path, Media::DISK) {
            Ok(bytes) => {
                let ids: BTreeMap<String, u16> = serde_json::from_slice(&bytes)
                    .map_err(|err| SinkError::Parse(format!("{shaders_path}: {err}")))?;
                self.shaders.lock().ids = ids;
            }
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err.into()),
        }
        Ok(())
    }

    pub fn fs(&self) -> &Arc<dyn FileSystem> {
        &self.fs
    }

    pub fn config(&self) -> &PackageManConfig {
        &self.config
    }

    pub fn key_defs(&self, asset_type: AssetType) -> Arc<KeyDefs> {
        self.key_defs.read()[asset_type].clone()
    }

    pub(crate) fn mutex_pool(&self) -> &MutexPool {
        &self.mutex_pool
    }

    pub(crate) fn next_entry_id(&self) -> i32 {
        self.next_entry_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn register_entry(&self, id: i32, package: &Arc<Package>) {
        self.entries.write().insert(id, Arc::downgrade(package));
    }

    pub(crate) fn unregister_entry(&self, id: i32) {
        self.entries.write().remove(&id);
    }

    pub fn script_path(&self, name: &str) -> String {
        format!("{}/{name}.pkg", self.config.package_dir)
    }

    /// The loaded packages, ordered by name.
    pub fn packages(&self) -> Vec<Arc<Package>> {
        self.packages.read().values().cloned().collect()
    }

    /// Finds every package script in the package directory.
    pub fn discover_packages(&self) -> Result<Vec<PackageInfo>, PackageError> {
        let paths = self.fs.find_files(&self.config.package_dir, "pkg", Media::DISK)?;
        let mut found = Vec::with_capacity(paths.len());
        for path in paths {
            let Some(name) = path
                .rsplit('/')
                .next()
                .and_then(|file| file.strip_suffix(".pkg"))
            else {
                continue;
            };
            if path != self.script_path(name) {
                // Scripts in subdirectories aren't packages.
                continue;
            }
            found.push(PackageInfo {
                name: name.to_string(),
                entries: self.package_size(&path),
                path,
            });
        }
        *self.scripts.write() = found
            .iter()
            .map(|info| (info.name.to_lowercase(), info.clone()))
            .collect();
        info!(packages = found.len(), "discovered package scripts");
        Ok(found)
    }

    /// The entry count of a package script, from its index file. 0 if there
    /// is no index.
    pub fn package_size(&self, script_path: &str) -> u32 {
        match self.fs.read(&script::index_path(script_path), Media::DISK) {
            Ok(bytes) => script::decode_index(&bytes),
            Err(_) => 0,
        }
    }

    /// Loads every package: the discovered scripts in tools, the cooked
    /// package lumps otherwise. Packages that fail to load are logged and
    /// skipped. Returns the number of loaded packages.
    pub fn load_all(&self) -> Result<usize, PackageError> {
        let names: Vec<String> = if self.config.tools {
            self.discover_packages()?
                .into_iter()
                .map(|info| info.name)
                .collect()
        } else {
            self.fs
                .find_files(&self.config.package_dir, "lump", Media::ALL)?
                .iter()
                .filter_map(|path| path.rsplit('/').next()?.strip_suffix(".lump"))
                .map(str::to_string)
                .collect()
        };
        let loaded = names
            .iter()
            .filter(|name| self.resolve_package(name, PFlags::LOAD).is_some())
            .count();
        info!(loaded, total = names.len(), "loaded packages");
        Ok(loaded)
    }

    /// Returns the package if it's loaded. With [`PFlags::LOAD`], loads it
    /// if it isn't. Names are case sensitive: asking for a package that only
    /// differs from a loaded one by case fails.
    pub fn resolve_package(&self, name: &str, flags: PFlags) -> Option<Arc<Package>> {
        if let Some(package) = self.packages.read().get(name) {
            return Some(package.clone());
        }
        if !flags.contains(PFlags::LOAD) {
            return None;
        }
        match self.load_package(name) {
            Ok(package) => Some(package),
            Err(err) => {
                error!(package = %name, "failed to load package: {err}");
                None
            }
        }
    }

    /// Loads a package from its script in tools, or from its cooked lump.
    pub fn load_package(&self, name: &str) -> Result<Arc<Package>, PackageError> {
        let _loading = self.load_lock.lock();
        {
            let packages = self.packages.read();
            if let Some(package) = packages.get(name) {
                return Ok(package.clone());
            }
            let lower = name.to_lowercase();
            if let Some(loaded) = packages.keys().find(|loaded| loaded.to_lowercase() == lower) {
                return Err(PackageError::CaseMismatch {
                    requested: name.to_string(),
                    loaded: loaded.clone(),
                });
            }
        }
        let man = self.self_ref.upgrade().ok_or(PackageError::Detached)?;

        let script_path = self.script_path(name);
        let package = if self.config.tools && self.fs.exists(&script_path, Media::DISK) {
            let package = Package::new(&man, name, &script_path, false);
            match self.load_script(&package, &script_path) {
                Ok(resave) => {
                    self.packages.write().insert(name.to_string(), package.clone());
                    if resave {
                        if let Err(err) = package.save() {
                            warn!(package = %name, "failed to save entry modification times: {err}");
                        }
                    }
                    package
                }
                Err(err) => {
                    self.forget_entries(&package);
                    return Err(err);
                }
            }
        } else {
            let package = self.load_bin(&man, name)?;
            self.packages.write().insert(name.to_string(), package.clone());
            package
        };
        info!(package = %name, entries = package.len(), cooked = package.is_cooked(), "loaded package");
        Ok(package)
    }

    fn load_script(&self, package: &Arc<Package>, script_path: &str) -> Result<bool, PackageError> {
        let bytes = self.fs.read(script_path, Media::DISK)?;
        let text = String::from_utf8(bytes).map_err(|_| PackageError::Script {
            path: script_path.to_string(),
            reason: "the script is not UTF-8".to_string(),
        })?;
        let entries = script::parse_script(script_path, &text)?;
        package.load_script_entries(entries)
    }

    /// Loads cooked package data from `<package dir>/<name>.lump`.
    fn load_bin(&self, man: &Arc<PackageMan>, name: &str) -> Result<Arc<Package>, PackageError> {
        let path = format!("{}/{name}.lump", self.config.package_dir);
        let bytes = self.fs.read(&path, Media::ALL)?;
        let corrupt = |reason: String| FileError::CorruptArchive {
            path: path.clone(),
            reason,
        };
        let reader = LumpReader::new(&bytes, PACKAGE_SIG, PACKAGE_ID).map_err(|err| err.into_file_error(&path))?;

        let mut imports = Vec::new();
        let mut entries = Vec::with_capacity(reader.lumps().len());
        for lump in reader.lumps() {
            let tag = reader.tag(lump);
            if lump.name == IMPORTS_LUMP {
                imports = tag::decode_imports(tag, &path).map_err(|err| corrupt(err.to_string()))?;
                continue;
            }
            if tag.is_empty() {
                return Err(corrupt(format!("entry {:?} has no tag data", lump.name)).into());
            }
            let (asset_type, cooked) =
                tag::decode_entry(tag, &lump.name).map_err(|err| corrupt(err.to_string()))?;
            entries.push((lump.name.clone(), asset_type, cooked));
        }

        let package = Package::new(man, name, &path, true);
        package.load_cooked_entries(imports, entries);
        Ok(package)
    }

    fn forget_entries(&self, package: &Package) {
        let mut entries = self.entries.write();
        for entry in package.entries() {
            entries.remove(&entry.id());
        }
    }

    /// Creates a new, empty package. Package names are unique case
    /// insensitively, among the loaded packages and the discovered scripts.
    /// The package script is written on [`Package::save`].
    pub fn create_package(&self, name: &str) -> Result<Arc<Package>, PackageError> {
        check_name(name)?;
        let man = self.self_ref.upgrade().ok_or(PackageError::Detached)?;
        let _loading = self.load_lock.lock();
        self.check_package_name_free(name, None)?;

        let script_path = self.script_path(name);
        let package = Package::new(&man, name, &script_path, false);
        self.packages.write().insert(name.to_string(), package.clone());
        self.scripts.write().insert(
            name.to_lowercase(),
            PackageInfo {
                name: name.to_string(),
                path: script_path,
                entries: 0,
            },
        );
        info!(package = %name, "created package");
        Ok(package)
    }

    fn check_package_name_free(&self, name: &str, except: Option<&str>) -> Result<(), PackageError> {
        let lower = name.to_lowercase();
        let except = except.map(str::to_lowercase);
        let taken = |other: &str| other == lower && Some(other) != except.as_deref();
        let loaded = self.packages.read().keys().any(|loaded| taken(&loaded.to_lowercase()));
        if loaded || self.scripts.read().keys().any(|script| taken(script)) {
            return Err(PackageError::NameTaken(name.to_string()));
        }
        Ok(())
    }

    pub(crate) fn forget_package(&self, name: &str) {
        self.packages.write().remove(name);
        self.scripts.write().remove(&name.to_lowercase());
    }

    pub(crate) fn rekey_package(&self, old: &str, new: &str, package: &Arc<Package>) -> Result<(), PackageError> {
        let _loading = self.load_lock.lock();
        self.check_package_name_free(new, Some(old))?;
        {
            let mut packages = self.packages.write();
            packages.remove(old);
            packages.insert(new.to_string(), package.clone());
        }
        let mut scripts = self.scripts.write();
        scripts.remove(&old.to_lowercase());
        scripts.insert(
            new.to_lowercase(),
            PackageInfo {
                name: new.to_string(),
                path: self.script_path(new),
                entries: package.len() as u32,
            },
        );
        Ok(())
    }

    pub fn delete_package(&self, name: &str) -> Result<(), PackageError> {
        let package = self
            .resolve_package(name, PFlags::LOAD)
            .ok_or_else(|| PackageError::NotFound(format!("package {name}")))?;
        package.delete()
    }

    pub fn rename_package(&self, name: &str, new_name: &str) -> Result<(), PackageError> {
        let package = self
            .resolve_package(name, PFlags::LOAD)
            .ok_or_else(|| PackageError::NotFound(format!("package {name}")))?;
        package.rename(new_name)
    }

    /// Deletes an entry by id.
    pub fn delete(&self, id: i32) -> Result<(), PackageError> {
        let entry = self
            .find_entry(id)
            .ok_or_else(|| PackageError::NotFound(format!("entry {id}")))?;
        entry.delete()
    }

    /// Renames an entry by id.
    pub fn rename(&self, id: i32, name: &str) -> Result<(), PackageError> {
        let entry = self
            .find_entry(id)
            .ok_or_else(|| PackageError::NotFound(format!("entry {id}")))?;
        entry.rename(name)
    }

    /// Points every import of `src` in the loaded packages to `dst`, see
    /// [`Package::update_imports`]. Returns the number of entries changed.
    pub fn update_imports(&self, src: &str, dst: Option<&str>) -> usize {
        self.packages()
            .iter()
            .map(|package| package.update_imports(src, dst))
            .sum()
    }

    /// Saves every loaded editable package.
    pub fn save_all(&self) -> Result<(), PackageError> {
        for package in self.packages() {
            if !package.is_cooked() {
                package.save()?;
            }
        }
        Ok(())
    }

    pub fn save_packages<S: AsRef<str>>(&self, names: &[S]) -> Result<(), PackageError> {
        for name in names {
            let name = name.as_ref();
            let package = self
                .resolve_package(name, PFlags::NONE)
                .ok_or_else(|| PackageError::NotFound(format!("package {name}")))?;
            package.save()?;
        }
        Ok(())
    }

    /// The names of the packages containing the entries.
    pub fn gather_packages(&self, ids: &[i32]) -> BTreeSet<String> {
        let entries = self.entries.read();
        ids.iter()
            .filter_map(|id| entries.get(id)?.upgrade())
            .map(|package| package.name())
            .collect()
    }

    pub fn find_entry(&self, id: i32) -> Option<Arc<Entry>> {
        let package = self.entries.read().get(&id)?.upgrade()?;
        package.entry(id)
    }

    /// The asset of an entry by id, see [`Package::asset`].
    pub fn asset(&self, id: i32, zone: Zone) -> Option<Arc<Asset>> {
        let package = self.entries.read().get(&id)?.upgrade()?;
        package.asset(id, zone)
    }

    /// Resolves a `Package/Name` path to an asset in `zone`, loading the
    /// package if `flags` has [`PFlags::LOAD`].
    pub fn resolve(&self, path: &str, zone: Zone, flags: PFlags) -> Option<Arc<Asset>> {
        let (package, name) = path.split_once('/')?;
        self.resolve_package(package, flags)?.asset_by_name(name, zone)
    }

    pub fn resolve_entry(&self, path: &str, flags: PFlags) -> Option<Arc<Entry>> {
        let (package, name) = path.split_once('/')?;
        self.resolve_package(package, flags)?.entry_by_name(name)
    }

    /// The id of the entry at a `Package/Name` path, -1 if there's no such
    /// entry.
    pub fn resolve_id(&self, path: &str, flags: PFlags) -> i32 {
        self.resolve_entry(path, flags).map_or(-1, |entry| entry.id())
    }

    /// Registers a sink type for its asset type and stage.
    pub fn bind<S: SinkType>(&self) -> Result<Binding, BindError> {
        let mut sinks = self.sinks.write();
        let stages = &mut sinks[S::ASSET_TYPE];
        if stages.contains_key(&S::STAGE) {
            return Err(BindError::SinkAlreadyBound {
                asset_type: S::ASSET_TYPE,
                stage: S::STAGE,
            });
        }
        let id = self.next_binding_id.fetch_add(1, Ordering::Relaxed);
        stages.insert(S::STAGE, Arc::new(SinkFactory::new(id, sink::create_boxed::<S>)));
        debug!(asset_type = S::ASSET_TYPE.name(), stage = S::STAGE.0, "bound sink");
        Ok(Binding::new(
            self.self_ref.clone(),
            BindingKind::Sink {
                asset_type: S::ASSET_TYPE,
                stage: S::STAGE,
                id,
            },
        ))
    }

    pub fn bind_cooker<C: CookerType>(&self) -> Result<Binding, BindError> {
        let mut cookers = self.cookers.write();
        if cookers[C::ASSET_TYPE].is_some() {
            return Err(BindError::CookerAlreadyBound(C::ASSET_TYPE));
        }
        let id = self.next_binding_id.fetch_add(1, Ordering::Relaxed);
        cookers[C::ASSET_TYPE] = Some(Arc::new(CookerFactory {
            id,
            create: cooker::create_boxed::<C>,
        }));
        debug!(asset_type = C::ASSET_TYPE.name(), "bound cooker");
        Ok(Binding::new(
            self.self_ref.clone(),
            BindingKind::Cooker {
                asset_type: C::ASSET_TYPE,
                id,
            },
        ))
    }

    pub(crate) fn unbind(&self, kind: BindingKind) {
        match kind {
            BindingKind::Sink { asset_type, stage, id } => {
                let factory = {
                    let mut sinks = self.sinks.write();
                    let stages = &mut sinks[asset_type];
                    match stages.get(&stage) {
                        Some(factory) if factory.id == id => stages.remove(&stage),
                        _ => None,
                    }
                };
                let Some(factory) = factory else {
                    return;
                };
                for asset in factory.live_assets() {
                    if let Some(slot) = asset.evict(stage, id) {
                        let _ = slot.with(&self.mutex_pool, |sink| {
                            sink.process(&TimeSlice::INFINITE, self, &asset, PFlags::UNLOAD)
                        });
                    }
                }
                debug!(asset_type = asset_type.name(), stage = stage.0, "unbound sink");
            }
            BindingKind::Cooker { asset_type, id } => {
                let mut cookers = self.cookers.write();
                if cookers[asset_type].as_ref().is_some_and(|factory| factory.id == id) {
                    cookers[asset_type] = None;
                    debug!(asset_type = asset_type.name(), "unbound cooker");
                }
            }
        }
    }

    /// Runs the sinks bound for the asset's type in ascending stage order,
    /// creating them for the asset on first use. Stops at the first sink
    /// that doesn't return [`Status::Success`]. With only
    /// [`PFlags::S_ALLOC`], the sinks are created but not run.
    pub fn process(&self, time: &TimeSlice, asset: &Asset, flags: PFlags) -> SinkResult {
        let factories: Vec<(Stage, Arc<SinkFactory>)> = self.sinks.read()[asset.asset_type()]
            .iter()
            .map(|(stage, factory)| (*stage, factory.clone()))
            .collect();
        let alloc_only = flags.contains(PFlags::S_ALLOC);

        for (stage, factory) in factories {
            let slot = asset.slot(stage, &factory);
            if alloc_only {
                continue;
            }
            match slot.with(&self.mutex_pool, |sink| sink.process(time, self, asset, flags)) {
                Ok(Status::Success) => {}
                Ok(status) => return Ok(status),
                Err(err) => {
                    warn!(asset = %asset.path(), stage = stage.0, platform = ?flags.targets(), "processing failed: {err}");
                    return Err(err);
                }
            }
        }
        Ok(Status::Success)
    }

    /// Processes every live asset of a zone, or of every shared zone with
    /// `None`. Returns [`Status::Pending`] if any asset is still pending.
    /// Errors stop the processing unless `ignore_errors` is set.
    pub fn process_all(&self, zone: Option<Zone>, time: &TimeSlice, flags: PFlags, ignore_errors: bool) -> SinkResult {
        let zones: &[Zone] = match zone {
            Some(Zone::Unique) => return Ok(Status::Success),
            Some(Zone::Engine) => &[Zone::Engine],
            Some(Zone::ContentBrowser) => &[Zone::ContentBrowser],
            Some(Zone::Cooker) => &[Zone::Cooker],
            None => &[Zone::Engine, Zone::ContentBrowser, Zone::Cooker],
        };
        let mut pending = false;
        for package in self.packages() {
            for zone in zones {
                for asset in package.refed_assets(*zone) {
                    match self.process(time, &asset, flags) {
                        Ok(Status::Pending) => pending = true,
                        Ok(Status::Success) => {}
                        Err(_) if ignore_errors => {}
                        Err(err) => return Err(err),
                    }
                }
            }
        }
        Ok(if pending { Status::Pending } else { Status::Success })
    }

    pub fn has_cooker(&self, asset_type: AssetType) -> bool {
        self.cookers.read()[asset_type].is_some()
    }

    /// Creates the bound cooker of the asset's type for the asset.
    pub fn create_cooker(
        &self,
        asset: Arc<Asset>,
        cooking: bool,
        languages: Languages,
        targets: PFlags,
    ) -> Result<CookerInstance, SinkError> {
        let asset_type = asset.asset_type();
        let factory = self.cookers.read()[asset_type].clone().ok_or_else(|| {
            SinkError::Generic(format!("{}: no cooker bound for {}", asset.path(), asset_type.name()))
        })?;
        let man = self
            .self_ref
            .upgrade()
            .ok_or_else(|| SinkError::Generic("package manager is gone".to_string()))?;
        Ok(CookerInstance::new(&factory, man, asset, cooking, languages, targets))
    }

    /// The id of a shader, assigning a new one if the shader hasn't been seen
    /// before.
    pub fn shader_id(&self, name: &str) -> Result<u16, SinkError> {
        let mut shaders = self.shaders.lock();
        if let Some(id) = shaders.ids.get(name) {
            return Ok(*id);
        }
        let id = shaders.ids.values().max().map_or(Some(0), |max| max.checked_add(1));
        let id = id.ok_or_else(|| SinkError::Compiler(format!("out of shader ids for {name:?}")))?;
        shaders.ids.insert(name.to_string(), id);
        shaders.dirty = true;
        Ok(id)
    }

    /// Writes the shader ids if new ones were assigned.
    pub fn save_shaders(&self) -> Result<(), SinkError> {
        let mut shaders = self.shaders.lock();
        if !shaders.dirty {
            return Ok(());
        }
        let json = serde_json::to_vec_pretty(&shaders.ids).map_err(|err| SinkError::Io(err.to_string()))?;
        self.fs.write(&self.shaders_path(), &json)?;
        shaders.dirty = false;
        Ok(())
    }

    /// Forgets every shader id, for cooks that start from scratch.
    pub(crate) fn clear_shaders(&self) {
        let mut shaders = self.shaders.lock();
        shaders.ids.clear();
        shaders.dirty = true;
    }

    fn shaders_path(&self) -> String {
        format!("{}/Out/Shaders/Shaders.json", self.config.cooked_dir)
    }

    /// Asks a running cook to stop after the assets being compiled.
    pub fn cancel_cook(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    pub fn reset_cancel_cook(&self) {
        self.cancel.store(false, Ordering::Release);
    }

    pub fn is_cook_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use file_system::{lump::LumpWriter, FileSystem, Media, MemoryFileSystem};

    use crate::{
        asset::Asset,
        asset_type::AssetType,
        entry::CookedEntry,
        flags::{PFlags, Stage, Zone},
        keys::Variant,
        result::{PackageError, SinkError, SinkResult, Status},
        sink::{Sink, SinkType},
        tag::{self, IMPORTS_LUMP, PACKAGE_ID, PACKAGE_SIG},
        test_util::package_man,
        time_slice::TimeSlice,
    };

    use super::{PackageMan, PackageManConfig};

    const SCRIPT: &str = r#"[
        { "name": "Rock", "type": "Texture", "modifiedTime": "1000", "Source.File": "Textures/rock.png" },
        { "name": "RockMat", "type": "Material", "Texture1.Source.Texture": "World/Rock" }
    ]"#;

    #[test]
    fn loads_scripts_on_demand() {
        let (fs, man) = package_man();
        fs.write("Packages/World.pkg", SCRIPT.as_bytes()).unwrap();

        assert!(man.resolve("World/Rock", Zone::Engine, PFlags::NONE).is_none());
        let rock = man.resolve("World/Rock", Zone::Engine, PFlags::LOAD).unwrap();
        assert_eq!(1000, rock.entry().modified_time());
        assert!(!rock.is_cooked());
        assert_eq!(rock.id(), man.resolve_id("World/Rock", PFlags::NONE));
        assert_eq!("World/Rock", man.find_entry(rock.id()).unwrap().path());

        // RockMat had no modification time, so the script was saved with one.
        let saved = String::from_utf8(fs.read("Packages/World.pkg", Media::DISK).unwrap()).unwrap();
        assert_eq!(2, saved.matches("modifiedTime").count());
        assert_eq!(b"2\n".to_vec(), fs.read("Packages/World.pkg.idx", Media::DISK).unwrap());

        assert!(man.resolve_package("world", PFlags::LOAD).is_none());
        assert!(matches!(
            man.load_package("WORLD"),
            Err(PackageError::CaseMismatch { .. })
        ));
    }

    #[test]
    fn broken_scripts_load_nothing() {
        let (fs, man) = package_man();
        fs.write(
            "Packages/Bad.pkg",
            br#"[{ "name": "A", "type": "Texture" }, { "name": "B", "type": "Spaceship" }]"#,
        )
        .unwrap();
        assert!(matches!(man.load_package("Bad"), Err(PackageError::Script { .. })));
        assert!(man.resolve_package("Bad", PFlags::NONE).is_none());
        assert!(man.gather_packages(&[1]).is_empty());
    }

    #[test]
    fn discovers_scripts() {
        let (fs, man) = package_man();
        fs.write("Packages/World.pkg", SCRIPT.as_bytes()).unwrap();
        fs.write("Packages/World.pkg.idx", b"2\n").unwrap();
        fs.write("Packages/Props.pkg", b"[]").unwrap();
        fs.write("Packages/Old/Stale.pkg", b"[]").unwrap();

        let found = man.discover_packages().unwrap();
        let names: Vec<(&str, u32)> = found.iter().map(|info| (info.name.as_str(), info.entries)).collect();
        assert_eq!(vec![("Props", 0), ("World", 2)], names);

        assert!(matches!(man.create_package("world"), Err(PackageError::NameTaken(_))));
        assert_eq!(2, man.load_all().unwrap());
        assert_eq!(2, man.packages().len());
    }

    #[test]
    fn schema_files_override_builtin_schemas() {
        let fs = Arc::new(MemoryFileSystem::new());
        fs.write("Packages/Sound.keys", br#"{ "Volume": { "value": 7 } }"#).unwrap();
        let man = PackageMan::new(fs.clone(), PackageManConfig::default());
        man.initialize().unwrap();
        let package = man.create_package("Sfx").unwrap();
        let entry = package.create_entry("Boom", AssetType::Sound).unwrap();
        assert_eq!(Some(7), entry.key_value::<i32>("Volume", PFlags::NONE));

        fs.write("Packages/Music.keys", b"{ nope").unwrap();
        assert!(matches!(man.initialize(), Err(SinkError::Parse(_))));
    }

    #[test]
    fn loads_cooked_packages() {
        let fs = Arc::new(MemoryFileSystem::new());
        let mut cooked = CookedEntry {
            imports: vec![1],
            ..Default::default()
        };
        cooked.tags[0] = Some(vec![9]);
        let mut writer = LumpWriter::new(PACKAGE_SIG, PACKAGE_ID);
        let imports = vec!["Other/A".to_string(), "World/Rock".to_string()];
        writer
            .write_lump(IMPORTS_LUMP, &[], &tag::encode_imports(&imports).unwrap(), 0, 0)
            .unwrap();
        writer
            .write_lump("RockMat", &[], &tag::encode_entry(AssetType::Material, &cooked).unwrap(), 0, 0)
            .unwrap();
        fs.write("Packages/World.lump", &writer.finish().unwrap()).unwrap();

        let config = PackageManConfig {
            tools: false,
            ..Default::default()
        };
        let man = PackageMan::new(fs, config);
        man.initialize().unwrap();
        let entry = man.resolve_entry("World/RockMat", PFlags::LOAD).unwrap();
        assert!(entry.is_cooked());
        assert_eq!(AssetType::Material, entry.asset_type());
        assert_eq!(Some("World/Rock".to_string()), entry.resolve(0));
        assert_eq!(None, entry.resolve(1));
        assert_eq!(Some(&[9u8][..]), entry.tag_data(None));

        let package = man.resolve_package("World", PFlags::NONE).unwrap();
        assert!(matches!(
            package.create_entry("New", AssetType::Texture),
            Err(PackageError::Cooked(_))
        ));
        assert!(man.resolve_package("Missing", PFlags::LOAD).is_none());
    }

    struct Slow {
        steps: u32,
    }

    impl Sink for Slow {
        fn process(&mut self, time: &TimeSlice, _: &PackageMan, asset: &Asset, flags: PFlags) -> SinkResult {
            if flags.contains(PFlags::UNLOAD) {
                self.steps = 0;
                return Ok(Status::Success);
            }
            if asset.name() == "Broken" {
                return Err(SinkError::Generic("broken".into()));
            }
            while self.steps < 3 {
                if time.expired() {
                    return Ok(Status::Pending);
                }
                self.steps += 1;
            }
            Ok(Status::Success)
        }
    }

    impl SinkType for Slow {
        const ASSET_TYPE: AssetType = AssetType::SkAnimSet;
        const STAGE: Stage = Stage::LOAD;
        fn create(_: &Asset) -> Self {
            Slow { steps: 0 }
        }
    }

    #[test]
    fn process_all_reports_pending_and_errors() {
        let (_, man) = package_man();
        let _binding = man.bind::<Slow>().unwrap();
        let package = man.create_package("Anims").unwrap();
        let walk = package.create_entry("Walk", AssetType::SkAnimSet).unwrap();
        let broken = package.create_entry("Broken", AssetType::SkAnimSet).unwrap();
        let _walk = package.asset(walk.id(), Zone::Engine).unwrap();

        assert_eq!(
            Status::Pending,
            man.process_all(None, &TimeSlice::expired_now(), PFlags::LOAD, false).unwrap()
        );
        assert_eq!(
            Status::Success,
            man.process_all(Some(Zone::Engine), &TimeSlice::INFINITE, PFlags::LOAD, false).unwrap()
        );

        let _broken = package.asset(broken.id(), Zone::Cooker).unwrap();
        assert!(man.process_all(None, &TimeSlice::INFINITE, PFlags::LOAD, false).is_err());
        assert!(man.process_all(None, &TimeSlice::INFINITE, PFlags::LOAD, true).is_ok());
        assert_eq!(
            Status::Success,
            man.process_all(Some(Zone::Engine), &TimeSlice::INFINITE, PFlags::LOAD, false).unwrap()
        );
        assert_eq!(
            Status::Success,
            man.process_all(Some(Zone::Unique), &TimeSlice::INFINITE, PFlags::LOAD, false).unwrap()
        );
    }

    #[test]
    fn tools_operations_by_id() {
        let (fs, man) = package_man();
        let world = man.create_package("World").unwrap();
        let rock = world.create_entry("Rock", AssetType::Texture).unwrap();
        let mat = world.create_entry("RockMat", AssetType::Material).unwrap();
        mat.set_key("Texture1.Source.Texture", Variant::String("World/Rock".into()));

        man.rename(rock.id(), "Boulder").unwrap();
        assert_eq!(
            Some("World/Boulder".to_string()),
            mat.key_value::<String>("Texture1.Source.Texture", PFlags::NONE)
        );
        assert_eq!(
            vec!["World".to_string()],
            man.gather_packages(&[rock.id(), mat.id()]).into_iter().collect::<Vec<_>>()
        );

        man.save_packages(&["World"]).unwrap();
        assert!(fs.exists("Packages/World.pkg", Media::DISK));
        man.delete(rock.id()).unwrap();
        assert!(man.find_entry(rock.id()).is_none());
        assert!(matches!(man.delete(rock.id()), Err(PackageError::NotFound(_))));

        man.rename_package("World", "Level").unwrap();
        assert!(fs.exists("Packages/Level.pkg", Media::DISK));
        man.delete_package("Level").unwrap();
        assert!(!fs.exists("Packages/Level.pkg", Media::DISK));
        assert!(man.packages().is_empty());
    }

    #[test]
    fn shader_ids_are_stable() {
        let (fs, man) = package_man();
        assert_eq!(0, man.shader_id("Lit").unwrap());
        assert_eq!(1, man.shader_id("Unlit").unwrap());
        assert_eq!(0, man.shader_id("Lit").unwrap());
        man.save_shaders().unwrap();

        let again = PackageMan::new(fs, PackageManConfig::default());
        again.initialize().unwrap();
        assert_eq!(1, again.shader_id("Unlit").unwrap());
        assert_eq!(2, again.shader_id("Sky").unwrap());
    }
}
