// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Cooking: building the cooked data of a set of root assets and everything
//! they import, for a set of targets, and packing it into pak files.
//!
//! A cook runs a generics pass (no target) and then a pass per target. Each
//! pass starts from the roots and follows the imports recorded by the
//! cookers, a wave of assets at a time, until no new assets turn up. The
//! assets of a wave are cooked by a pool of worker threads.

use std::{
    collections::{BTreeMap, BTreeSet, VecDeque},
    mem,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use crossbeam::channel::unbounded;
use file_system::{
    lump::{compress, LumpWriter, LUMP_FLAG_COMPRESSED, PAK_ID, PAK_SIG},
    Media,
};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, warn};

use crate::{
    asset::Asset,
    cooker::{target_dir, CookerInstance},
    entry::CookedEntry,
    flags::{CookStatus, PFlags, Target, Zone},
    language::Languages,
    package_man::PackageMan,
    result::SinkError,
    tag::{self, IMPORTS_LUMP, PACKAGE_ID, PACKAGE_SIG},
};

const PACKAGE_LUMP_ALIGNMENT: usize = 4;
const PAK_LUMP_ALIGNMENT: usize = 8;

/// What a finished cook did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CookReport {
    /// Compiles, counted once per pass that built an asset.
    pub compiled: usize,
    /// Assets found up to date, counted per pass.
    pub up_to_date: usize,
    /// The package lumps written.
    pub packages: Vec<String>,
    /// The pak files written. Empty paks are deleted instead.
    pub paks: Vec<String>,
    pub elapsed: Duration,
}

type SharedCooker = Arc<Mutex<CookerInstance>>;

struct CookCommand {
    cooker: SharedCooker,
}

#[derive(Default)]
struct CookQueue {
    pending: VecDeque<CookCommand>,
    in_flight: usize,
    completed: Vec<SharedCooker>,
    /// Set when the pass is over, the workers exit once they see it.
    done: bool,
}

/// The state of one cook, shared by its passes and worker threads.
struct CookState {
    languages: Languages,
    /// The flags of the cook, with every target.
    allflags: PFlags,
    /// One cooker per asset id, for the whole cook.
    cookers: Mutex<BTreeMap<i32, SharedCooker>>,
    /// The assets whose generic data has been checked.
    generics: Mutex<BTreeSet<i32>>,
    queue: Mutex<CookQueue>,
    gate: Condvar,
    failed: AtomicBool,
    error: Mutex<Option<SinkError>>,
    compiled: AtomicUsize,
    up_to_date: AtomicUsize,
}

impl CookState {
    fn new(languages: Languages, allflags: PFlags) -> CookState {
        CookState {
            languages,
            allflags,
            cookers: Mutex::new(BTreeMap::new()),
            generics: Mutex::new(BTreeSet::new()),
            queue: Mutex::new(CookQueue::default()),
            gate: Condvar::new(),
            failed: AtomicBool::new(false),
            error: Mutex::new(None),
            compiled: AtomicUsize::new(0),
            up_to_date: AtomicUsize::new(0),
        }
    }

    /// Records the first error of the cook. Queued commands are dropped, the
    /// ones in flight get to finish.
    fn fail(&self, err: SinkError) {
        self.error.lock().get_or_insert(err);
        self.failed.store(true, Ordering::Release);
        self.gate.notify_all();
    }

    fn has_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    fn take_error(&self) -> Option<SinkError> {
        self.error.lock().take()
    }
}

impl PackageMan {
    /// Cooks the root assets and their imports for the targets in `flags`,
    /// then writes the package lumps and pak files.
    ///
    /// [`PFlags::CLEAN`] deletes the previous cook output first, and
    /// [`PFlags::SCRIPTS_ONLY`] only rebuilds the paks. `compression` is a
    /// deflate level, 0 stores the pak lumps uncompressed.
    pub fn cook<S: AsRef<str>>(
        &self,
        roots: &[S],
        flags: PFlags,
        languages: Languages,
        compression: u32,
    ) -> Result<CookReport, SinkError> {
        if languages.is_empty() {
            return Err(SinkError::Generic("no languages to cook".to_string()));
        }
        let start = Instant::now();
        let targets = flags.targets();
        let flags = flags & !PFlags::ALL_TARGETS;
        info!(targets = ?targets, languages = %languages.cache_string(), roots = roots.len(), "starting cook");

        self.make_build_dirs(flags)?;

        let state = CookState::new(languages, flags | targets);
        let mut report = CookReport::default();
        if !flags.contains(PFlags::SCRIPTS_ONLY) {
            self.cook_plat(&state, roots, flags)
                .inspect_err(|err| error!(platform = "Generic", "cook failed: {err}"))?;
            for target in targets.iter_targets() {
                self.cook_plat(&state, roots, flags | target.flag())
                    .inspect_err(|err| error!(platform = target.name(), "cook failed: {err}"))?;
            }
            self.save_shaders()?;
            report.packages = self.build_package_data(&state)?;
        }
        report.paks = self.build_pak_files(targets, compression)?;

        report.compiled = state.compiled.load(Ordering::Relaxed);
        report.up_to_date = state.up_to_date.load(Ordering::Relaxed);
        report.elapsed = start.elapsed();
        info!(
            compiled = report.compiled,
            up_to_date = report.up_to_date,
            elapsed = ?report.elapsed,
            "cook finished"
        );
        Ok(report)
    }

    fn make_build_dirs(&self, flags: PFlags) -> Result<(), SinkError> {
        let cooked = &self.config().cooked_dir;
        if flags.contains(PFlags::CLEAN) {
            info!("cleaning previous cook output");
            self.fs().delete_dir_all(&format!("{cooked}/Out"))?;
            self.fs().delete_dir_all(&format!("{cooked}/Packages"))?;
            self.clear_shaders();
        }
        self.fs().create_dir_all(&format!("{cooked}/Out"))?;
        self.fs().create_dir_all(&format!("{cooked}/Packages/Base"))?;
        Ok(())
    }

    fn check_cook(&self, state: &CookState) -> Result<(), SinkError> {
        if let Some(err) = state.take_error() {
            return Err(err);
        }
        if self.is_cook_cancelled() {
            info!("cook cancelled");
            return Err(SinkError::Cancelled);
        }
        Ok(())
    }

    /// Runs one pass: the roots first, then the imports of the assets cooked
    /// in the previous wave that apply to this pass. Each asset is visited
    /// once per pass.
    fn cook_plat<S: AsRef<str>>(&self, state: &CookState, roots: &[S], flags: PFlags) -> Result<(), SinkError> {
        let pflags = flags.targets();
        let threads = self.config().cook_threads.max(1);
        debug!(platform = ?pflags, threads, "starting pass");

        let mut visited = BTreeSet::new();
        let mut wave = Vec::new();
        for root in roots {
            let root = root.as_ref();
            let asset = self
                .resolve(root, Zone::Cooker, PFlags::LOAD)
                .ok_or_else(|| SinkError::MissingFile(root.to_string()))?;
            if visited.insert(asset.id()) {
                wave.push(asset);
            }
        }

        *state.queue.lock() = CookQueue::default();
        thread::scope(|scope| {
            for _ in 0..threads {
                scope.spawn(|| self.cook_worker(state, flags));
            }
            let result = self.run_waves(state, wave, &mut visited, pflags);
            state.queue.lock().done = true;
            state.gate.notify_all();
            result
        })
    }

    fn run_waves(
        &self,
        state: &CookState,
        mut wave: Vec<Arc<Asset>>,
        visited: &mut BTreeSet<i32>,
        pflags: PFlags,
    ) -> Result<(), SinkError> {
        // Imports kept for targets outside this cook aren't followed.
        let followed = if pflags.is_empty() { state.allflags.targets() } else { pflags };
        while !wave.is_empty() {
            self.check_cook(state)?;
            let mut commands = Vec::with_capacity(wave.len());
            for asset in wave.drain(..) {
                if let Some(cooker) = self.cooker_for_asset(state, asset)? {
                    commands.push(CookCommand { cooker });
                }
            }

            let completed = {
                let mut queue = state.queue.lock();
                queue.pending.extend(commands);
                state.gate.notify_all();
                while !queue.pending.is_empty() || queue.in_flight > 0 {
                    state.gate.wait(&mut queue);
                }
                mem::take(&mut queue.completed)
            };
            self.check_cook(state)?;

            for cooker in completed {
                let cooker = cooker.lock();
                for import in cooker.imports() {
                    if !import.pflags.intersects(followed) {
                        continue;
                    }
                    let asset = self.resolve(&import.path, Zone::Cooker, PFlags::LOAD).ok_or_else(|| {
                        SinkError::MissingFile(format!("{} (imported by {})", import.path, cooker.asset_path()))
                    })?;
                    if visited.insert(asset.id()) {
                        wave.push(asset);
                    }
                }
            }
        }
        Ok(())
    }

    fn cook_worker(&self, state: &CookState, flags: PFlags) {
        loop {
            let command = {
                let mut queue = state.queue.lock();
                loop {
                    if queue.done {
                        return;
                    }
                    if (state.has_failed() || self.is_cook_cancelled()) && !queue.pending.is_empty() {
                        queue.pending.clear();
                        state.gate.notify_all();
                    }
                    if let Some(command) = queue.pending.pop_front() {
                        queue.in_flight += 1;
                        break command;
                    }
                    state.gate.wait(&mut queue);
                }
            };

            self.run_command(state, &command, flags);

            let mut queue = state.queue.lock();
            queue.in_flight -= 1;
            queue.completed.push(command.cooker);
            state.gate.notify_all();
        }
    }

    fn run_command(&self, state: &CookState, command: &CookCommand, flags: PFlags) {
        let mut cooker = command.cooker.lock();
        let first_visit = state.generics.lock().insert(cooker.context().asset().id());
        if first_visit && !flags.targets().is_empty() {
            // Only reached through the imports of a target, so the generics
            // pass never saw it.
            if !self.cook_asset(state, &mut cooker, flags & !PFlags::ALL_TARGETS) {
                return;
            }
        }
        self.cook_asset(state, &mut cooker, flags);
    }

    /// Runs one pass of a cooker. Returns false if the compile failed.
    fn cook_asset(&self, state: &CookState, cooker: &mut CookerInstance, flags: PFlags) -> bool {
        let platform = flags.first_target().map_or("Generic", Target::name);
        match cooker.status(flags, state.allflags) {
            CookStatus::NeedRebuild => {
                info!(asset = %cooker.asset_path(), platform, "cooking");
                match cooker.cook(flags, state.allflags) {
                    Ok(()) => {
                        state.compiled.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(err) => {
                        error!(asset = %cooker.asset_path(), platform, "cooking failed: {err}");
                        state.fail(err);
                        return false;
                    }
                }
            }
            CookStatus::UpToDate => {
                debug!(asset = %cooker.asset_path(), platform, "up to date");
                state.up_to_date.fetch_add(1, Ordering::Relaxed);
            }
            CookStatus::Ignore => {}
        }
        true
    }

    /// The cooker of an asset for this cook, created on first use. Assets
    /// without a bound cooker are skipped.
    fn cooker_for_asset(&self, state: &CookState, asset: Arc<Asset>) -> Result<Option<SharedCooker>, SinkError> {
        let mut cookers = state.cookers.lock();
        if let Some(cooker) = cookers.get(&asset.id()) {
            cooker.lock().attach(asset);
            return Ok(Some(cooker.clone()));
        }
        if !self.has_cooker(asset.asset_type()) {
            warn!(asset = %asset.path(), asset_type = asset.asset_type().name(), "no cooker bound, skipping");
            return Ok(None);
        }
        let id = asset.id();
        let cooker = Arc::new(Mutex::new(self.create_cooker(
            asset,
            true,
            state.languages,
            state.allflags,
        )?));
        cookers.insert(id, cooker.clone());
        Ok(Some(cooker))
    }

    /// Writes `<cooked>/Out/Packages/<package>.lump` for every package with
    /// cooked assets. Each asset becomes an empty lump tagged with its type,
    /// the tags of its cooked data and its imports, which index the sorted
    /// import table of the package.
    fn build_package_data(&self, state: &CookState) -> Result<Vec<String>, SinkError> {
        let mut packages: BTreeMap<String, BTreeMap<String, SharedCooker>> = BTreeMap::new();
        for cooker in state.cookers.lock().values() {
            let (package, name) = {
                let cooker = cooker.lock();
                let cx = cooker.context();
                (cx.asset().package().name(), cx.asset_name().to_string())
            };
            packages.entry(package).or_default().insert(name, cooker.clone());
        }

        let mut written = Vec::with_capacity(packages.len());
        for (package, cookers) in packages {
            let path = format!("{}/Out/Packages/{package}.lump", self.config().cooked_dir);
            let table: Vec<String> = cookers
                .values()
                .flat_map(|cooker| {
                    let cooker = cooker.lock();
                    cooker
                        .imports()
                        .iter()
                        .map(|import| import.path.clone())
                        .collect::<Vec<_>>()
                })
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();

            let mut writer = LumpWriter::new(PACKAGE_SIG, PACKAGE_ID);
            for (name, cooker) in &cookers {
                let cooker = cooker.lock();
                let cooked = self.cooked_entry(state, &cooker, &table)?;
                let tag = tag::encode_entry(cooker.context().asset_type(), &cooked)?;
                writer
                    .write_lump(name, &[], &tag, 0, PACKAGE_LUMP_ALIGNMENT)
                    .map_err(|err| err.into_file_error(&path))?;
            }
            writer
                .write_lump(IMPORTS_LUMP, &[], &tag::encode_imports(&table)?, 0, PACKAGE_LUMP_ALIGNMENT)
                .map_err(|err| err.into_file_error(&path))?;
            let bytes = writer.finish().map_err(|err| err.into_file_error(&path))?;
            self.fs().write(&path, &bytes)?;
            info!(package = %package, entries = cookers.len(), imports = table.len(), "wrote package data");
            written.push(path);
        }
        Ok(written)
    }

    fn cooked_entry(&self, state: &CookState, cooker: &CookerInstance, table: &[String]) -> Result<CookedEntry, SinkError> {
        let cx = cooker.context();
        let read_tag = |pflags: PFlags| -> Result<Option<Vec<u8>>, SinkError> {
            match self.fs().read(&cx.tag_path(pflags), Media::DISK) {
                Ok(bytes) if bytes.is_empty() => Ok(None),
                Ok(bytes) => Ok(Some(bytes)),
                Err(err) if err.is_not_found() => Ok(None),
                Err(err) => Err(err.into()),
            }
        };

        let mut cooked = CookedEntry::default();
        cooked.tags[0] = read_tag(PFlags::NONE)?;
        for target in state.allflags.iter_targets() {
            cooked.tags[target.index() + 1] = read_tag(target.flag())?;
        }
        for import in cooker.imports() {
            let index = table
                .binary_search(&import.path)
                .map_err(|_| SinkError::Generic(format!("{} missing from the import table", import.path)))?;
            let index = u16::try_from(index)
                .map_err(|_| SinkError::Compiler(format!("too many imports in the package of {}", cx.asset_path())))?;
            cooked.imports.push(index);
        }
        Ok(cooked)
    }

    /// Writes `pak0.pak` with the package data, shaders, scripts and generic
    /// cooked files, and a pak per target with its cooked files. iPad paks
    /// also carry the iPhone files the iPad shares.
    fn build_pak_files(&self, targets: PFlags, compression: u32) -> Result<Vec<String>, SinkError> {
        let cooked = &self.config().cooked_dir;
        let out = format!("{cooked}/Out");
        let base = format!("{cooked}/Packages/Base");
        let mut paks = vec![(
            format!("{base}/pak0.pak"),
            vec![
                (format!("{out}/Packages"), "Packages/"),
                (format!("{out}/Shaders"), "Shaders/"),
                ("Scripts".to_string(), "Scripts/"),
                (format!("{out}/{}", target_dir(None)), "Cooked/"),
            ],
        )];
        for target in targets.iter_targets() {
            let mut sources = Vec::new();
            if target == Target::IPad && targets.contains(PFlags::TARGET_IPHONE) {
                sources.push((format!("{out}/{}", target_dir(Some(Target::IPhone))), "Cooked/"));
            }
            sources.push((format!("{out}/{}", target_dir(Some(target))), "Cooked/"));
            paks.push((format!("{base}/{}.pak", target.name().to_lowercase()), sources));
        }

        let mut written = Vec::new();
        for (path, sources) in paks {
            if self.build_pak(&path, &sources, compression)? {
                written.push(path);
            }
        }
        Ok(written)
    }

    /// Builds one pak. Later sources replace files of earlier ones with the
    /// same name. Returns false if there was nothing to pack.
    fn build_pak(&self, path: &str, sources: &[(String, &str)], compression: u32) -> Result<bool, SinkError> {
        let mut files = BTreeMap::new();
        for (dir, prefix) in sources {
            for file in self.fs().find_files(dir, "", Media::DISK)? {
                if let Some(relative) = file.strip_prefix(dir.as_str()).and_then(|rest| rest.strip_prefix('/')) {
                    files.insert(format!("{prefix}{relative}"), file.clone());
                }
            }
        }

        let writer = Mutex::new(LumpWriter::new(PAK_SIG, PAK_ID));
        let error = Mutex::new(None);
        let (sender, receiver) = unbounded();
        for file in files {
            // Can't fail, the receiver is alive until the end of the function.
            let _ = sender.send(file);
        }
        drop(sender);

        let threads = self.config().cook_threads.max(1);
        thread::scope(|scope| {
            for _ in 0..threads {
                scope.spawn(|| {
                    for (name, file) in receiver.iter() {
                        if error.lock().is_some() || self.is_cook_cancelled() {
                            break;
                        }
                        if let Err(err) = self.pack_file(path, &writer, &name, &file, compression) {
                            error!(pak = %path, file = %file, "packing failed: {err}");
                            error.lock().get_or_insert(err);
                        }
                    }
                });
            }
        });
        if let Some(err) = error.into_inner() {
            return Err(err);
        }
        if self.is_cook_cancelled() {
            return Err(SinkError::Cancelled);
        }

        let mut writer = writer.into_inner();
        if writer.lump_count() == 0 {
            match self.fs().delete_file(path) {
                Ok(()) => info!(pak = %path, "deleted empty pak"),
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err.into()),
            }
            return Ok(false);
        }
        let lumps = writer.lump_count();
        writer.sort_lumps();
        let bytes = writer.finish().map_err(|err| err.into_file_error(path))?;
        self.fs().write(path, &bytes)?;
        info!(pak = %path, lumps, bytes = bytes.len(), "wrote pak");
        Ok(true)
    }

    fn pack_file(
        &self,
        path: &str,
        writer: &Mutex<LumpWriter>,
        name: &str,
        file: &str,
        compression: u32,
    ) -> Result<(), SinkError> {
        let data = self.fs().read(file, Media::DISK)?;
        if data.is_empty() {
            debug!(file = %file, "skipping empty file");
            return Ok(());
        }
        let packed = (compression > 0)
            .then(|| compress(&data, compression))
            .filter(|packed| packed.len() < data.len());
        let mut writer = writer.lock();
        match packed {
            Some(packed) => {
                let size = u32::try_from(data.len())
                    .map_err(|_| SinkError::Io(format!("{file} is too large to pack")))?;
                writer.write_lump(name, &packed, &size.to_le_bytes(), LUMP_FLAG_COMPRESSED, PAK_LUMP_ALIGNMENT)
            }
            None => writer.write_lump(name, &data, &[], 0, PAK_LUMP_ALIGNMENT),
        }
        .map_err(|err| err.into_file_error(path))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use file_system::{
        lump::{LumpReader, PAK_ID, PAK_SIG},
        FileSystem, Media, MemoryFileSystem,
    };

    use crate::{
        asset_type::AssetType,
        assets::{bind_all, Material, MaterialLoader, TextureParser},
        flags::{PFlags, Target, Zone},
        keys::Variant,
        language::Languages,
        package_man::{PackageMan, PackageManConfig},
        result::{SinkError, Status},
        test_util::{package_man, write_png},
        time_slice::TimeSlice,
    };

    const IOS_AND_PC: PFlags = PFlags::from_bits(PFlags::TARGET_PC.bits() | PFlags::TARGET_IOS.bits());

    fn string(value: &str) -> Variant {
        Variant::String(value.to_string())
    }

    fn world(fs: &MemoryFileSystem, man: &PackageMan) {
        write_png(fs, "Textures/rock.png", 4, [90, 80, 70, 255]);
        let package = man.create_package("World").unwrap();
        let rock = package.create_entry("Rock", AssetType::Texture).unwrap();
        rock.set_key("Source.File", string("Textures/rock.png"));
        let cliff = package.create_entry("Cliff", AssetType::Material).unwrap();
        cliff.set_key("Texture1.Source.Texture", string("World/Rock"));
    }

    fn pak_names(fs: &MemoryFileSystem, path: &str) -> Vec<String> {
        let bytes = fs.read(path, Media::DISK).unwrap();
        let reader = LumpReader::new(&bytes, PAK_SIG, PAK_ID).unwrap();
        reader.lumps().iter().map(|lump| lump.name.clone()).collect()
    }

    #[test]
    fn shared_textures_cook_once() {
        let (fs, man) = package_man();
        let _bindings = bind_all(&man).unwrap();
        write_png(&fs, "Textures/rock.png", 4, [90, 80, 70, 255]);
        let package = man.create_package("World").unwrap();
        let rock = package.create_entry("Rock", AssetType::Texture).unwrap();
        rock.set_key("Source.File", string("Textures/rock.png"));

        let report = man.cook(&["World/Rock"], IOS_AND_PC, Languages::ENGLISH, 0).unwrap();
        assert_eq!(1, report.compiled);
        assert!(fs.exists("Cooked/Out/Generic/World/Rock.bin", Media::DISK));
        assert!(!fs.exists("Cooked/Out/PC/World/Rock.bin", Media::DISK));
        assert!(!fs.exists("Cooked/Out/IOS/IPhone/World/Rock.bin", Media::DISK));
        assert_eq!(vec!["Cooked/Packages/Base/pak0.pak".to_string()], report.paks);
        assert_eq!(
            vec!["Cooked/World/Rock.bin", "Packages/World.lump"],
            pak_names(&fs, "Cooked/Packages/Base/pak0.pak")
        );

        let report = man.cook(&["World/Rock"], IOS_AND_PC, Languages::ENGLISH, 0).unwrap();
        assert_eq!(0, report.compiled);
        assert_eq!(1, report.up_to_date);
    }

    #[test]
    fn cooked_data_loads_from_paks() {
        let (fs, man) = package_man();
        let _bindings = bind_all(&man).unwrap();
        world(&fs, &man);
        let report = man
            .cook(&["World/Cliff"], PFlags::TARGET_PC | PFlags::TARGET_IPHONE, Languages::ENGLISH, 6)
            .unwrap();
        // The texture is shared, the material is built per target.
        assert_eq!(3, report.compiled);
        assert_eq!(
            vec![
                "Cooked/Packages/Base/pak0.pak".to_string(),
                "Cooked/Packages/Base/pc.pak".to_string(),
                "Cooked/Packages/Base/iphone.pak".to_string(),
            ],
            report.paks
        );
        assert_eq!(vec!["Cooked/World/Cliff.bin"], pak_names(&fs, "Cooked/Packages/Base/pc.pak"));
        drop(man);

        let config = PackageManConfig {
            tools: false,
            ..PackageManConfig::default()
        };
        let runtime = PackageMan::new(fs.clone(), config);
        runtime.initialize().unwrap();
        let _bindings = bind_all(&runtime).unwrap();
        for pak in ["pak0", "pc"] {
            fs.mount_pak(&format!("Cooked/Packages/Base/{pak}.pak")).unwrap();
        }
        // Only the paks have the cooked files.
        fs.delete_dir_all("Cooked/Out").unwrap();

        let cliff = runtime.resolve("World/Cliff", Zone::Engine, PFlags::LOAD).unwrap();
        assert!(cliff.is_cooked());
        assert_eq!(Some("World/Rock".to_string()), cliff.entry().resolve(0));
        assert_eq!(Status::Success, cliff.process(&TimeSlice::INFINITE, PFlags::LOAD).unwrap());
        let rock = cliff
            .with_sink(|loader: &mut MaterialLoader| loader.texture(0).cloned())
            .flatten()
            .unwrap();
        let mips = rock.with_sink(|parser: &mut TextureParser| parser.images()[0].frames[0].mips.len());
        assert_eq!(Some(3), mips);
    }

    #[test]
    fn ipad_paks_share_iphone_data() {
        let (fs, man) = package_man();
        let _bindings = bind_all(&man).unwrap();
        world(&fs, &man);
        // Materials can't be shared between PC and iOS, but iPad reuses
        // the iPhone data.
        man.cook(&["World/Cliff"], IOS_AND_PC, Languages::ENGLISH, 0).unwrap();
        assert!(fs.exists("Cooked/Out/IOS/IPhone/World/Cliff.bin", Media::DISK));
        assert!(!fs.exists("Cooked/Out/IOS/IPad/World/Cliff.bin", Media::DISK));
        assert_eq!(vec!["Cooked/World/Cliff.bin"], pak_names(&fs, "Cooked/Packages/Base/ipad.pak"));
        assert_eq!(vec!["Cooked/World/Cliff.bin"], pak_names(&fs, "Cooked/Packages/Base/iphone.pak"));
    }

    #[test]
    fn missing_roots_and_imports_fail() {
        let (fs, man) = package_man();
        let _bindings = bind_all(&man).unwrap();
        world(&fs, &man);
        assert!(matches!(
            man.cook(&["World/Nope"], PFlags::TARGET_PC, Languages::ENGLISH, 0),
            Err(SinkError::MissingFile(_))
        ));
        assert!(matches!(
            man.cook(&["World/Rock"], PFlags::TARGET_PC, Languages::NONE, 0),
            Err(SinkError::Generic(_))
        ));

        let package = man.resolve_package("World", PFlags::NONE).unwrap();
        let lava = package.create_entry("Lava", AssetType::Material).unwrap();
        lava.set_key("Texture1.Source.Texture", string("World/Magma"));
        assert!(man.cook(&["World/Lava"], PFlags::TARGET_PC, Languages::ENGLISH, 0).is_err());
        assert!(!fs.exists("Cooked/Packages/Base/pak0.pak", Media::DISK));
    }

    #[test]
    fn cancelled_cooks_stop() {
        let (fs, man) = package_man();
        let _bindings = bind_all(&man).unwrap();
        world(&fs, &man);
        man.cancel_cook();
        assert!(matches!(
            man.cook(&["World/Cliff"], PFlags::TARGET_PC, Languages::ENGLISH, 0),
            Err(SinkError::Cancelled)
        ));
        assert!(!fs.exists("Cooked/Out/Generic/World/Rock.bin", Media::DISK));

        man.reset_cancel_cook();
        man.cook(&["World/Cliff"], PFlags::TARGET_PC, Languages::ENGLISH, 0).unwrap();
        assert!(fs.exists("Cooked/Out/Generic/World/Rock.bin", Media::DISK));
    }

    #[test]
    fn clean_cooks_rebuild_everything() {
        let (fs, man) = package_man();
        let _bindings = bind_all(&man).unwrap();
        world(&fs, &man);
        fs.write("Cooked/Out/Generic/Stale.bin", &[1]).unwrap();
        man.cook(&["World/Rock"], PFlags::TARGET_PC, Languages::ENGLISH, 0).unwrap();
        assert!(pak_names(&fs, "Cooked/Packages/Base/pak0.pak").contains(&"Cooked/Stale.bin".to_string()));

        let report = man
            .cook(&["World/Rock"], PFlags::TARGET_PC | PFlags::CLEAN, Languages::ENGLISH, 0)
            .unwrap();
        assert_eq!(1, report.compiled);
        assert!(!fs.exists("Cooked/Out/Generic/Stale.bin", Media::DISK));
        assert!(fs.exists("Cooked/Out/Shaders/Shaders.json", Media::DISK));

        // Only rebuilding the paks cooks nothing.
        let report = man
            .cook(&["World/Rock"], PFlags::TARGET_PC | PFlags::SCRIPTS_ONLY, Languages::ENGLISH, 0)
            .unwrap();
        assert_eq!(0, report.compiled + report.up_to_date);
        assert_eq!(1, report.paks.len());
    }

    #[test]
    fn import_tables_are_sorted() {
        let (fs, man) = package_man();
        let _bindings = bind_all(&man).unwrap();
        world(&fs, &man);
        write_png(&fs, "Textures/ash.png", 2, [20, 20, 20, 255]);
        let package = man.resolve_package("World", PFlags::NONE).unwrap();
        let ash = package.create_entry("Ash", AssetType::Texture).unwrap();
        ash.set_key("Source.File", string("Textures/ash.png"));
        let cliff = package.entry_by_name("Cliff").unwrap();
        cliff.set_key("Texture2.Source.Texture", string("World/Ash"));

        man.cook(&["World/Cliff"], PFlags::TARGET_PC, Languages::ENGLISH, 0).unwrap();
        let bytes = fs.read("Cooked/Out/Packages/World.lump", Media::DISK).unwrap();
        let reader = LumpReader::new(&bytes, crate::tag::PACKAGE_SIG, crate::tag::PACKAGE_ID).unwrap();
        let names: Vec<&str> = reader.lumps().iter().map(|lump| lump.name.as_str()).collect();
        assert_eq!(vec!["Ash", "Cliff", "Rock", "@imports"], names);
        let imports = reader.find("@imports").unwrap();
        let table = crate::tag::decode_imports(reader.tag(imports), "World.lump").unwrap();
        assert_eq!(vec!["World/Ash", "World/Rock"], table);

        let (_, entry) = crate::tag::decode_entry(reader.tag(reader.find("Cliff").unwrap()), "Cliff").unwrap();
        // Cliff imports Rock first, then Ash.
        assert_eq!(vec![1, 0], entry.imports);
        // Materials carry no tag.
        assert!(entry.tags.iter().all(Option::is_none));

        // Nothing differs between targets, so Rock only has a generic tag.
        let (_, entry) = crate::tag::decode_entry(reader.tag(reader.find("Rock").unwrap()), "Rock").unwrap();
        assert!(entry.imports.is_empty());
        assert!(entry.tags[0].is_some());
        assert!(entry.tags[Target::PC.index() + 1].is_none());
    }
    #[test]
    fn adding_targets_keeps_imports_of_up_to_date_targets() {
        let (fs, man) = package_man();
        let _bindings = bind_all(&man).unwrap();
        world(&fs, &man);
        write_png(&fs, "Textures/moss.png", 2, [0, 128, 0, 255]);
        let package = man.resolve_package("World", PFlags::NONE).unwrap();
        let moss = package.create_entry("Moss", AssetType::Texture).unwrap();
        moss.set_key("Source.File", string("Textures/moss.png"));
        let cliff = package.entry_by_name("Cliff").unwrap();
        cliff.set_key("Texture1.Source.Texture.IPhone", string("World/Moss"));

        let cliff_imports = |fs: &MemoryFileSystem| {
            let bytes = fs.read("Cooked/Out/Packages/World.lump", Media::DISK).unwrap();
            let reader = LumpReader::new(&bytes, crate::tag::PACKAGE_SIG, crate::tag::PACKAGE_ID).unwrap();
            let table = crate::tag::decode_imports(reader.tag(reader.find("@imports").unwrap()), "World.lump").unwrap();
            let (_, entry) = crate::tag::decode_entry(reader.tag(reader.find("Cliff").unwrap()), "Cliff").unwrap();
            entry
                .imports
                .iter()
                .map(|index| table[*index as usize].clone())
                .collect::<Vec<_>>()
        };
        let texture_import = |fs: &MemoryFileSystem, dir: &str| {
            let bytes = fs.read(&format!("Cooked/Out/{dir}/World/Cliff.bin"), Media::DISK).unwrap();
            Material::decode(&bytes, "Cliff.bin").unwrap().textures[0].import
        };

        let pc_and_iphone = PFlags::TARGET_PC | PFlags::TARGET_IPHONE;
        man.cook(&["World/Cliff"], pc_and_iphone, Languages::ENGLISH, 0).unwrap();
        assert_eq!(vec!["World/Rock", "World/Moss"], cliff_imports(&fs));
        assert_eq!(Some(0), texture_import(&fs, "PC"));
        assert_eq!(Some(1), texture_import(&fs, "IOS/IPhone"));

        // Only the new target gets compiled, the others still point at their
        // imports by index.
        let report = man
            .cook(&["World/Cliff"], pc_and_iphone | PFlags::TARGET_PS3, Languages::ENGLISH, 0)
            .unwrap();
        assert_eq!(1, report.compiled);
        assert_eq!(vec!["World/Rock", "World/Moss"], cliff_imports(&fs));
        assert_eq!(Some(0), texture_import(&fs, "PS3"));
        assert_eq!(Some(1), texture_import(&fs, "IOS/IPhone"));

        // Dropping the iPhone's own texture frees its import.
        assert_eq!(1, cliff.remove_key("Texture1.Source.Texture", PFlags::TARGET_IPHONE));
        cliff.update_modified_time();
        man.cook(&["World/Cliff"], pc_and_iphone | PFlags::TARGET_PS3, Languages::ENGLISH, 0)
            .unwrap();
        assert_eq!(vec!["World/Rock"], cliff_imports(&fs));
        assert_eq!(Some(0), texture_import(&fs, "IOS/IPhone"));
    }
}
