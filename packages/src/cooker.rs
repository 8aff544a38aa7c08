// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Cookers turn an asset's source data into the binary form the runtime
//! loads, and decide whether that needs to happen at all.
//!
//! Each cooker keeps a small persisted state per asset: "globals", string
//! pairs recording what the cooked data was built from (cooker version, entry
//! modification time, source file times), and the list of assets the cooked
//! data imports. The comparisons in [`CookerContext`] check the current
//! source state against the globals and record the new state as they go.

use std::{collections::BTreeMap, sync::Arc};

use file_system::{FileReadTask, Media, ReadNotify};
use tracing::{debug, warn};

use crate::{
    asset::Asset,
    asset_type::AssetType,
    binary::{BinReader, BinWriter},
    binding::CookerFactory,
    entry::Entry,
    flags::{platform_name_for_flags, CookStatus, PFlags, Target},
    keys::KeyType,
    language::{Language, Languages},
    package_man::PackageMan,
    result::SinkError,
};

const IMPORTS_TAG: u32 = u32::from_le_bytes(*b"IMPT");

/// Builds cooked data for one asset type. A cooker is created per asset per
/// cook, and called once per pass: first the generics pass (no target in
/// `flags`), then a pass per target. `allflags` has every target of the cook.
pub trait Cooker: Send {
    /// The version of the cooked format. Bumping it rebuilds every asset of
    /// the type, and -1 rebuilds them on every cook.
    fn version(&self) -> i32;

    /// Decides whether this pass should build the asset. Comparisons made
    /// here may record the observed source state in the globals.
    fn status(&mut self, cx: &mut CookerContext, flags: PFlags, allflags: PFlags) -> CookStatus;

    /// Builds the cooked data of this pass.
    fn compile(&mut self, cx: &mut CookerContext, flags: PFlags, allflags: PFlags) -> Result<(), SinkError>;
}

/// A cooker that can be bound with [`PackageMan::bind_cooker`].
pub trait CookerType: Cooker + Sized + 'static {
    const ASSET_TYPE: AssetType;
    fn create() -> Self;
}

pub(crate) fn create_boxed<C: CookerType>() -> Box<dyn Cooker> {
    Box::new(C::create())
}

/// An asset path referenced by cooked data, and the targets whose data
/// references it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookImport {
    pub path: String,
    pub pflags: PFlags,
}

/// The directory under `<root>/Out/` the cooked files of a target go to.
pub fn target_dir(target: Option<Target>) -> &'static str {
    match target {
        None => "Generic",
        Some(Target::PC) => "PC",
        Some(Target::IPhone) => "IOS/IPhone",
        Some(Target::IPad) => "IOS/IPad",
        Some(Target::XBox360) => "XBox360",
        Some(Target::PS3) => "PS3",
    }
}

/// The prefix of the globals recorded for a target: `PC/`, or `Generic/`
/// without a target.
pub fn target_path(target: PFlags) -> String {
    match platform_name_for_flags(target) {
        Some(name) => format!("{name}/"),
        None => "Generic/".to_string(),
    }
}

/// Rebuild if any comparison found the source different from what the
/// cooked data was built from, newer or older. Every comparison should have
/// been made before calling this, so they all get to record their state.
pub fn status_from_comparisons(comparisons: &[i32]) -> CookStatus {
    if comparisons.iter().any(|c| *c != 0) {
        CookStatus::NeedRebuild
    } else {
        CookStatus::UpToDate
    }
}

/// The state shared by every cooker: which asset is being cooked and where
/// to, its globals and imports, and the comparisons against them.
pub struct CookerContext {
    man: Arc<PackageMan>,
    asset: Arc<Asset>,
    asset_path: String,
    asset_name: String,
    asset_type: AssetType,
    languages: Languages,
    cooking: bool,
    cook_targets: PFlags,
    version: i32,
    root: String,
    globals: BTreeMap<String, String>,
    imports: Vec<CookImport>,
}

impl CookerContext {
    pub fn man(&self) -> &Arc<PackageMan> {
        &self.man
    }

    pub fn asset(&self) -> &Arc<Asset> {
        &self.asset
    }

    pub fn entry(&self) -> &Arc<Entry> {
        self.asset.entry()
    }

    pub fn asset_path(&self) -> &str {
        &self.asset_path
    }

    pub fn asset_name(&self) -> &str {
        &self.asset_name
    }

    pub fn asset_type(&self) -> AssetType {
        self.asset_type
    }

    /// The languages to build localized data for.
    pub fn languages(&self) -> Languages {
        self.languages
    }

    /// True while cooking, false for intermediate cookers building data for
    /// tools.
    pub fn is_cooking(&self) -> bool {
        self.cooking
    }

    /// `Cooked` while cooking, `Temp` for intermediate cookers.
    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn imports(&self) -> &[CookImport] {
        &self.imports
    }

    pub fn global(&self, key: &str) -> Option<&str> {
        self.globals.get(key).map(String::as_str)
    }

    /// The path of a cooked output file: `<root>/Out/<target dir>/<path>`.
    pub fn file_path(&self, path: &str, pflags: PFlags) -> String {
        format!("{}/Out/{}/{path}", self.root, target_dir(pflags.first_target()))
    }

    pub fn write_file(&self, path: &str, pflags: PFlags, data: &[u8]) -> Result<(), SinkError> {
        let path = self.file_path(path, pflags);
        self.man.fs().write(&path, data)?;
        debug!(asset = %self.asset_path, file = %path, bytes = data.len(), "wrote cooked file");
        Ok(())
    }

    pub fn read_file(&self, path: &str, pflags: PFlags) -> Result<Vec<u8>, SinkError> {
        Ok(self.man.fs().read(&self.file_path(path, pflags), Media::DISK)?)
    }

    pub fn begin_read(&self, path: &str, pflags: PFlags, notify: Option<ReadNotify>) -> FileReadTask {
        self.man
            .fs()
            .begin_read(&self.file_path(path, pflags), Media::DISK, notify)
    }

    /// `<root>/Out/Tags/<asset path>[.pc|.iphone|...].tag`.
    pub fn tag_path(&self, pflags: PFlags) -> String {
        let suffix = match pflags.first_target() {
            None => "",
            Some(Target::PC) => ".pc",
            Some(Target::IPhone) => ".iphone",
            Some(Target::IPad) => ".ipad",
            Some(Target::XBox360) => ".xbox360",
            Some(Target::PS3) => ".ps3",
        };
        format!("{}/Out/Tags/{}{suffix}.tag", self.root, self.asset_path)
    }

    pub fn write_tag(&self, pflags: PFlags, data: &[u8]) -> Result<(), SinkError> {
        Ok(self.man.fs().write(&self.tag_path(pflags), data)?)
    }

    pub fn read_tag(&self, pflags: PFlags) -> Result<Vec<u8>, SinkError> {
        Ok(self.man.fs().read(&self.tag_path(pflags), Media::DISK)?)
    }

    pub fn has_tag(&self, pflags: PFlags) -> bool {
        self.man.fs().exists(&self.tag_path(pflags), Media::DISK)
    }

    /// Records an asset referenced by the cooked data and returns its index
    /// in the import list. Imports without a target (from the generics pass)
    /// apply to every target of the cook.
    pub fn add_import(&mut self, path: &str, pflags: PFlags) -> usize {
        let mut pflags = pflags.targets();
        if pflags.is_empty() {
            pflags = self.cook_targets;
        }
        if let Some(index) = self.imports.iter().position(|import| import.path == path) {
            self.imports[index].pflags |= pflags;
            return index;
        }
        self.imports.push(CookImport {
            path: path.to_string(),
            pflags,
        });
        self.imports.len() - 1
    }

    /// Forgets the imports of the targets a pass is about to rebuild. The
    /// imports stay in place, since the cooked data of the other targets
    /// refers to them by index.
    pub(crate) fn begin_pass(&mut self, flags: PFlags) {
        let mut pass = flags.targets();
        if pass.is_empty() {
            pass = self.cook_targets;
        }
        for import in &mut self.imports {
            import.pflags &= !pass;
        }
    }

    /// Drops the imports at the end of the list that no target uses anymore.
    pub(crate) fn trim_imports(&mut self) {
        while self.imports.last().is_some_and(|import| import.pflags.is_empty()) {
            self.imports.pop();
        }
    }

    /// Compares the cooker version against the one the cooked data was built
    /// with.
    pub fn compare_version(&mut self, target: PFlags) -> i32 {
        let key = format!("{}__cookerVersion", target_path(target));
        let version = self.version;
        let Some(cached) = self.globals.get(&key) else {
            self.globals.insert(key, version.to_string());
            return -1;
        };
        let cached: i32 = cached.parse().unwrap_or(0);
        let c = if version > -1 { cmp(cached, version) } else { -1 };
        if c != 0 {
            self.globals.insert(key, version.to_string());
        }
        c
    }

    /// Compares the entry's modification time against the one the cooked
    /// data was built from.
    pub fn compare_modified_time(&mut self, target: PFlags) -> i32 {
        let key = format!("{}__cookerModifiedTime", target_path(target));
        let modified = self.entry().modified_time();
        let Some(cached) = self.globals.get(&key) else {
            self.globals.insert(key, modified.to_string());
            return -1;
        };
        let cached: u64 = cached.parse().unwrap_or(0);
        let c = cmp(cached, modified);
        if c != 0 {
            self.globals.insert(key, modified.to_string());
        }
        c
    }

    /// Compares a source file's modification time against the one recorded
    /// under `key`. A different file than last time always counts as newer.
    pub fn compare_cached_file_time(&mut self, target: PFlags, key: &str, path: &str) -> i32 {
        let key = format!("{}{key}", target_path(target));
        let file_key = format!("{key}_file");
        let force = self
            .globals
            .get(&file_key)
            .is_some_and(|cached| cached != path);
        self.globals.insert(file_key, path.to_string());

        let cached: Option<u64> = self.globals.get(&key).and_then(|time| time.parse().ok());
        let file_time = match self.man.fs().modified_time(path, Media::DISK) {
            Ok(time) => time,
            Err(err) => {
                debug!(asset = %self.asset_path, file = %path, "can't stat source file: {err}");
                return -1;
            }
        };

        let c = match cached {
            Some(_) if force => -1,
            Some(cached) => cmp(cached, file_time),
            None => -1,
        };
        if c != 0 {
            self.globals.insert(key, file_time.to_string());
        }
        c
    }

    /// Like [`CookerContext::compare_cached_file_time`], with the path read
    /// from the key `key`. If the bool key `localized` is set, every
    /// language's variant of the file is compared too, as is the set of
    /// languages.
    pub fn compare_cached_file_time_key(&mut self, target: PFlags, key: &str, localized: Option<&str>) -> i32 {
        let Some(path) = self.key_value::<String>(key, target) else {
            warn!(
                asset = %self.asset_path,
                platform = ?target,
                "cooker asked for the key {key:?}, which is missing or not a string",
            );
            return -1;
        };

        let Some(localized) = localized else {
            return self.compare_cached_file_time(target, key, &path);
        };

        let mut r = 0;
        for lang in self.languages.iter() {
            let localized_path = lang.localize_path(&path);
            let localized_key = match lang {
                Language::English => key.to_string(),
                _ => format!("{key}_cookerLang_{}", lang.code()),
            };
            // Every variant is compared, so they all get their times cached.
            let z = self.compare_cached_file_time(target, &localized_key, &localized_path);
            r = combine(r, z);
        }
        let lr = self.compare_cached_localize_key(target, localized);
        combine(r, lr)
    }

    /// Compares a string key's value against the one recorded for it.
    pub fn compare_cached_string_key(&mut self, target: PFlags, key: &str) -> i32 {
        let Some(value) = self.key_value::<String>(key, target) else {
            warn!(
                asset = %self.asset_path,
                platform = ?target,
                "cooker asked for the key {key:?}, which is missing or not a string",
            );
            return -1;
        };
        let global = format!("{}{key}", target_path(target));
        if self.globals.get(&global) == Some(&value) {
            return 0;
        }
        self.globals.insert(global, value);
        -1
    }

    fn compare_cached_localize_key(&mut self, target: PFlags, key: &str) -> i32 {
        let Some(localized) = self.key_value::<bool>(key, target) else {
            warn!(
                asset = %self.asset_path,
                platform = ?target,
                "cooker asked for the key {key:?}, which is missing or not a bool",
            );
            return -1;
        };
        if !localized {
            return 0;
        }
        let languages = self.languages.cache_string();
        let global = format!("{}__cookerLocalizedVersion", target_path(target));
        if self.globals.get(&global) == Some(&languages) {
            return 0;
        }
        self.globals.insert(global, languages);
        -1
    }

    fn key_value<T: KeyType>(&self, key: &str, target: PFlags) -> Option<T> {
        self.entry().key_value::<T>(key, target)
    }

    fn globals_path(&self) -> String {
        format!("{}/Out/Globals/{}.globals", self.root, self.asset_path)
    }

    fn imports_path(&self) -> String {
        format!("{}/Out/Globals/{}.imports", self.root, self.asset_path)
    }

    pub(crate) fn load_globals(&mut self) {
        self.globals = match self.man.fs().read(&self.globals_path(), Media::DISK) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|err| {
                warn!(asset = %self.asset_path, "discarding unreadable cooker globals: {err}");
                BTreeMap::new()
            }),
            Err(_) => BTreeMap::new(),
        };
    }

    fn save_globals(&self) -> Result<(), SinkError> {
        let json = serde_json::to_vec_pretty(&self.globals).map_err(|err| SinkError::Io(err.to_string()))?;
        self.man.fs().write(&self.globals_path(), &json)?;
        Ok(())
    }

    /// Replaces the imports with the ones saved by the last successful cook.
    pub(crate) fn load_imports(&mut self) {
        if !self.cooking {
            return;
        }
        self.imports.clear();
        let Ok(bytes) = self.man.fs().read(&self.imports_path(), Media::DISK) else {
            return;
        };
        match decode_imports(&bytes, &self.imports_path()) {
            Ok(imports) => self.imports = imports,
            Err(err) => warn!(asset = %self.asset_path, "discarding unreadable cooker imports: {err}"),
        }
    }

    fn save_imports(&self) -> Result<(), SinkError> {
        if !self.cooking {
            return Ok(());
        }
        let mut writer = BinWriter::new();
        writer.put(IMPORTS_TAG).put(self.imports.len() as u32);
        for import in &self.imports {
            writer
                .put(import.pflags.bits())
                .put(import.path.len() as u32)
                .put_bytes(import.path.as_bytes());
        }
        self.man.fs().write(&self.imports_path(), &writer.into_bytes())?;
        Ok(())
    }

    fn save_state(&self) -> Result<(), SinkError> {
        self.save_globals()?;
        self.save_imports()
    }
}

fn decode_imports(bytes: &[u8], name: &str) -> Result<Vec<CookImport>, SinkError> {
    let mut reader = BinReader::new(bytes, name);
    if reader.get::<u32>()? != IMPORTS_TAG {
        return Err(SinkError::CorruptFile(format!("{name}: not an imports file")));
    }
    let count = reader.get::<u32>()?;
    let mut imports = Vec::with_capacity(count.min(1024) as usize);
    for _ in 0..count {
        let pflags = PFlags::from_bits(reader.get::<u32>()?);
        let len = reader.get::<u32>()? as usize;
        let path = core::str::from_utf8(reader.bytes(len)?)
            .map_err(|_| SinkError::CorruptFile(format!("{name}: import path is not UTF-8")))?;
        imports.push(CookImport {
            path: path.to_string(),
            pflags,
        });
    }
    Ok(imports)
}

fn cmp<T: Ord>(cached: T, current: T) -> i32 {
    match cached.cmp(&current) {
        core::cmp::Ordering::Less => -1,
        core::cmp::Ordering::Equal => 0,
        core::cmp::Ordering::Greater => 1,
    }
}

/// Folds comparison results: the first nonzero result sticks unless a later
/// one is older.
fn combine(r: i32, z: i32) -> i32 {
    if r < z && r != 0 {
        r
    } else {
        z
    }
}

/// A cooker attached to an asset, with its persisted state.
pub struct CookerInstance {
    cooker: Box<dyn Cooker>,
    cx: CookerContext,
}

impl CookerInstance {
    pub(crate) fn new(
        factory: &CookerFactory,
        man: Arc<PackageMan>,
        asset: Arc<Asset>,
        cooking: bool,
        languages: Languages,
        cook_targets: PFlags,
    ) -> CookerInstance {
        let cooker = (factory.create)();
        let root = if cooking {
            man.config().cooked_dir.clone()
        } else {
            man.config().temp_dir.clone()
        };
        let mut cx = CookerContext {
            asset_path: asset.path(),
            asset_name: asset.name(),
            asset_type: asset.asset_type(),
            version: cooker.version(),
            man,
            asset,
            languages,
            cooking,
            cook_targets: cook_targets.targets(),
            root,
            globals: BTreeMap::new(),
            imports: Vec::new(),
        };
        cx.load_globals();
        cx.load_imports();
        CookerInstance { cooker, cx }
    }

    pub fn context(&self) -> &CookerContext {
        &self.cx
    }

    pub fn asset_path(&self) -> &str {
        &self.cx.asset_path
    }

    pub fn imports(&self) -> &[CookImport] {
        &self.cx.imports
    }

    /// Points the cooker at a newer asset handle for the same entry.
    pub(crate) fn attach(&mut self, asset: Arc<Asset>) {
        self.cx.asset = asset;
    }

    pub fn status(&mut self, flags: PFlags, allflags: PFlags) -> CookStatus {
        self.cooker.status(&mut self.cx, flags, allflags)
    }

    /// Compiles one pass of the asset. The imports of the targets the pass
    /// builds are replaced, the others are kept for the passes that are up
    /// to date. On success the globals and imports are saved, on failure
    /// they're reloaded from the last successful compile so the next cook
    /// makes the same decision again.
    pub fn cook(&mut self, flags: PFlags, allflags: PFlags) -> Result<(), SinkError> {
        self.cx.begin_pass(flags);
        match self.cooker.compile(&mut self.cx, flags, allflags) {
            Ok(()) => {
                self.cx.trim_imports();
                self.cx.save_state()
            }
            Err(err) => {
                self.cx.load_globals();
                self.cx.load_imports();
                Err(err)
            }
        }
    }
}

/// A key that decides whether targets can share cooked data.
#[derive(Debug, Clone, Copy)]
pub enum TrackedKey {
    String(&'static str),
    Int(&'static str),
    Bool(&'static str),
}

impl TrackedKey {
    fn matching_targets(self, entry: &Entry, flags: PFlags, allflags: PFlags) -> PFlags {
        match self {
            TrackedKey::String(path) => entry.match_target_keys::<String>(path, flags, allflags),
            TrackedKey::Int(path) => entry.match_target_keys::<i32>(path, flags, allflags),
            TrackedKey::Bool(path) => entry.match_target_keys::<bool>(path, flags, allflags),
        }
    }
}

/// What a pass should do with an asset, see [`TargetPolicy::pass`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    Ignore,
    /// Build the generic data (`None`) or a target's data.
    Build(Option<Target>),
}

/// Decides which passes build an asset, based on whether the targets of a
/// cook agree on the keys that affect the cooked data.
#[derive(Debug, Clone, Copy)]
pub struct TargetPolicy {
    pub keys: &'static [TrackedKey],
    /// GLES and non-GLES targets never share data, for cooked data that
    /// depends on the shader backend.
    pub gles_sensitive: bool,
}

impl TargetPolicy {
    /// The generics pass builds the asset if every target of the cook would
    /// get the same data, and then the target passes are ignored. Otherwise
    /// each target builds its own data, except for iPad when its data would
    /// be the same as iPhone's.
    pub fn pass(&self, entry: &Entry, flags: PFlags, allflags: PFlags) -> Pass {
        let all = allflags.targets();
        let generics_valid = self.generics_valid(entry, all);
        match flags.first_target() {
            None if generics_valid => Pass::Build(None),
            None => Pass::Ignore,
            Some(_) if generics_valid => Pass::Ignore,
            Some(Target::IPad)
                if all.contains(PFlags::TARGET_IPHONE)
                    && self.keys_match(entry, PFlags::TARGET_IPHONE, PFlags::TARGET_IOS) =>
            {
                Pass::Ignore
            }
            Some(target) => Pass::Build(Some(target)),
        }
    }

    fn generics_valid(&self, entry: &Entry, all: PFlags) -> bool {
        let Some(first) = all.first_target() else {
            return true;
        };
        let mixes_gles = all.intersects(PFlags::TARGET_IOS) && all.intersects(PFlags::ALL_TARGETS & !PFlags::TARGET_IOS);
        if self.gles_sensitive && mixes_gles {
            return false;
        }
        self.keys_match(entry, first.flag(), all)
    }

    fn keys_match(&self, entry: &Entry, flags: PFlags, all: PFlags) -> bool {
        self.keys
            .iter()
            .all(|key| key.matching_targets(entry, flags, all) == all)
    }
}
