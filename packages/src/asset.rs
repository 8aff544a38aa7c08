// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{
    collections::BTreeMap,
    sync::{Arc, Weak},
};

use parking_lot::Mutex;

use crate::{
    asset_type::AssetType,
    binding::SinkFactory,
    cooker::CookerInstance,
    entry::Entry,
    flags::{PFlags, Stage, Zone},
    language::{Language, Languages},
    package::Package,
    package_man::PackageMan,
    result::{SinkError, SinkResult},
    sink::{AsAny, SinkSlot, SinkType},
    time_slice::TimeSlice,
};

/// A live handle to a package entry in some [`Zone`], holding the sinks that
/// load it.
pub struct Asset {
    zone: Zone,
    entry: Arc<Entry>,
    package: Arc<Package>,
    man: Weak<PackageMan>,
    self_ref: Weak<Asset>,
    sinks: Mutex<BTreeMap<Stage, Arc<SinkSlot>>>,
}

impl Asset {
    pub(crate) fn new(zone: Zone, entry: Arc<Entry>, package: Arc<Package>, man: &Arc<PackageMan>) -> Arc<Asset> {
        Arc::new_cyclic(|self_ref| Asset {
            zone,
            entry,
            package,
            man: Arc::downgrade(man),
            self_ref: self_ref.clone(),
            sinks: Mutex::new(BTreeMap::new()),
        })
    }

    pub fn zone(&self) -> Zone {
        self.zone
    }

    pub fn entry(&self) -> &Arc<Entry> {
        &self.entry
    }

    pub fn package(&self) -> &Arc<Package> {
        &self.package
    }

    pub fn id(&self) -> i32 {
        self.entry.id()
    }

    pub fn name(&self) -> String {
        self.entry.name()
    }

    pub fn path(&self) -> String {
        self.entry.path()
    }

    pub fn asset_type(&self) -> AssetType {
        self.entry.asset_type()
    }

    /// True if the asset was loaded from cooked package data, false if it
    /// comes from an editable package script.
    pub fn is_cooked(&self) -> bool {
        self.entry.is_cooked()
    }

    /// Runs the asset's sinks, see [`PackageMan::process`].
    pub fn process(&self, time: &TimeSlice, flags: PFlags) -> SinkResult {
        match self.man.upgrade() {
            Some(man) => man.process(time, self, flags),
            None => Err(SinkError::Generic(format!("{}: package manager is gone", self.path()))),
        }
    }

    /// Runs `f` with the asset's sink of type `S`, if it has been allocated.
    /// The sink is locked like it is while processing.
    ///
    /// The lock isn't reentrant: calling this for the same sink from `f`, or
    /// from that sink's own [`crate::Sink::process`], deadlocks. Other sinks of the
    /// asset, and other assets, can be reached from `f`.
    pub fn with_sink<S: SinkType, R>(&self, f: impl FnOnce(&mut S) -> R) -> Option<R> {
        let man = self.man.upgrade()?;
        let slot = self.sinks.lock().get(&S::STAGE).cloned()?;
        slot.with(man.mutex_pool(), |sink| AsAny::as_any_mut(sink).downcast_mut::<S>().map(f))
    }

    /// Creates a cooker for this asset's entry that builds into the
    /// intermediate directory, for tools loading uncooked assets whose
    /// loaders read cooked data.
    pub fn allocate_intermediate_cooker(&self) -> Result<CookerInstance, SinkError> {
        let gone = || SinkError::Generic(format!("{}: package manager is gone", self.path()));
        let man = self.man.upgrade().ok_or_else(gone)?;
        let this = self.self_ref.upgrade().ok_or_else(gone)?;
        let config = man.config();
        let languages: Languages = [Language::English, config.language].into_iter().collect();
        man.create_cooker(this, false, languages, config.host.flag())
    }

    /// The sink of a stage, created with `factory` if the asset doesn't have
    /// one from it yet.
    pub(crate) fn slot(&self, stage: Stage, factory: &SinkFactory) -> Arc<SinkSlot> {
        let mut sinks = self.sinks.lock();
        if let Some(slot) = sinks.get(&stage) {
            if slot.binding == factory.id {
                return slot.clone();
            }
        }
        let sink = factory.create(self, self.self_ref.clone());
        let slot = Arc::new(SinkSlot::new(factory.id, sink));
        sinks.insert(stage, slot.clone());
        slot
    }

    /// Removes the sink of a stage if it was created by the binding.
    pub(crate) fn evict(&self, stage: Stage, binding: u64) -> Option<Arc<SinkSlot>> {
        let mut sinks = self.sinks.lock();
        if sinks.get(&stage).is_some_and(|slot| slot.binding == binding) {
            sinks.remove(&stage)
        } else {
            None
        }
    }
}

impl Drop for Asset {
    fn drop(&mut self) {
        let sinks = core::mem::take(self.sinks.get_mut());
        let this: &Asset = self;
        if let Some(man) = this.man.upgrade() {
            for slot in sinks.values().rev() {
                let _ = slot.with(man.mutex_pool(), |sink| {
                    sink.process(&TimeSlice::INFINITE, &man, this, PFlags::UNLOAD)
                });
            }
        }
        if this.zone != Zone::Unique {
            this.package.unlink_asset(this.zone, this.entry.id(), &this.entry.name());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use crate::{
        asset::Asset,
        asset_type::AssetType,
        flags::{PFlags, Stage, Zone},
        package_man::PackageMan,
        result::{SinkError, SinkResult, Status},
        sink::{Sink, SinkType},
        test_util::package_man,
        time_slice::TimeSlice,
    };

    static LOG: Mutex<Vec<&'static str>> = Mutex::new(Vec::new());

    fn log(event: &'static str) {
        LOG.lock().unwrap().push(event);
    }

    struct First {
        loaded: bool,
    }
    struct Second {
        fail: bool,
    }

    impl Sink for First {
        fn process(&mut self, _: &TimeSlice, _: &PackageMan, _: &Asset, flags: PFlags) -> SinkResult {
            if flags.contains(PFlags::UNLOAD) {
                self.loaded = false;
                log("first unload");
            } else {
                self.loaded = true;
                log("first");
            }
            Ok(Status::Success)
        }
    }

    impl Sink for Second {
        fn process(&mut self, _: &TimeSlice, _: &PackageMan, asset: &Asset, flags: PFlags) -> SinkResult {
            if flags.contains(PFlags::UNLOAD) {
                log("second unload");
                return Ok(Status::Success);
            }
            if self.fail {
                log("second failed");
                return Err(SinkError::Parse(asset.path()));
            }
            log("second");
            Ok(Status::Success)
        }
    }

    impl SinkType for First {
        const ASSET_TYPE: AssetType = AssetType::Typeface;
        const STAGE: Stage = Stage::PARSER;
        fn create(_: &Asset) -> Self {
            First { loaded: false }
        }
    }

    impl SinkType for Second {
        const ASSET_TYPE: AssetType = AssetType::Typeface;
        const STAGE: Stage = Stage::PROCESS;
        fn create(asset: &Asset) -> Self {
            Second {
                fail: asset.name() == "Broken",
            }
        }
    }

    #[test]
    fn stages_run_in_order_and_unload_in_reverse() {
        let (_, man) = package_man();
        // Bind out of order on purpose.
        let _second = man.bind::<Second>().unwrap();
        let _first = man.bind::<First>().unwrap();
        let package = man.create_package("Type").unwrap();
        let good = package.create_entry("Good", AssetType::Typeface).unwrap();
        let broken = package.create_entry("Broken", AssetType::Typeface).unwrap();

        LOG.lock().unwrap().clear();
        let asset = package.asset(good.id(), Zone::Engine).unwrap();
        assert_eq!(Status::Success, asset.process(&TimeSlice::INFINITE, PFlags::LOAD).unwrap());
        assert_eq!(Some(true), asset.with_sink(|first: &mut First| first.loaded));
        // Other sinks of the asset can be reached while one is locked.
        assert_eq!(
            Some(Some(true)),
            asset.with_sink(|first: &mut First| asset.with_sink(|_: &mut Second| first.loaded))
        );

        // Unloading any number of times is fine.
        for _ in 0..3 {
            assert!(asset.process(&TimeSlice::INFINITE, PFlags::UNLOAD).is_ok());
        }
        assert_eq!(Some(false), asset.with_sink(|first: &mut First| first.loaded));

        drop(asset);
        let broken_asset = package.asset(broken.id(), Zone::Engine).unwrap();
        assert!(matches!(
            broken_asset.process(&TimeSlice::INFINITE, PFlags::LOAD),
            Err(SinkError::Parse(_))
        ));
        drop(broken_asset);

        let log = LOG.lock().unwrap().clone();
        assert_eq!(
            vec![
                "first",
                "second",
                "first unload",
                "second unload",
                "first unload",
                "second unload",
                "first unload",
                "second unload",
                "second unload",
                "first unload",
                "first",
                "second failed",
                "second unload",
                "first unload",
            ],
            log
        );
        assert!(package.refed_assets(Zone::Engine).is_empty());
    }

    struct Counter {
        calls: usize,
    }

    impl Sink for Counter {
        fn process(&mut self, _: &TimeSlice, _: &PackageMan, _: &Asset, _: PFlags) -> SinkResult {
            self.calls += 1;
            Ok(Status::Success)
        }
    }

    impl SinkType for Counter {
        const ASSET_TYPE: AssetType = AssetType::Music;
        const STAGE: Stage = Stage::LOAD;
        fn create(_: &Asset) -> Self {
            Counter { calls: 0 }
        }
    }

    #[test]
    fn alloc_only_creates_sinks() {
        let (_, man) = package_man();
        let _counter = man.bind::<Counter>().unwrap();
        let package = man.create_package("Alloc").unwrap();
        let entry = package.create_entry("A", AssetType::Music).unwrap();
        let asset = package.asset(entry.id(), Zone::Unique).unwrap();

        assert_eq!(None, asset.with_sink(|counter: &mut Counter| counter.calls));
        asset.process(&TimeSlice::INFINITE, PFlags::S_ALLOC).unwrap();
        assert_eq!(Some(0), asset.with_sink(|counter: &mut Counter| counter.calls));
        asset.process(&TimeSlice::INFINITE, PFlags::LOAD).unwrap();
        assert_eq!(Some(1), asset.with_sink(|counter: &mut Counter| counter.calls));
    }

    #[test]
    fn unique_assets_are_never_shared() {
        let (_, man) = package_man();
        let package = man.create_package("Uniq").unwrap();
        let entry = package.create_entry("A", AssetType::Music).unwrap();
        let a = package.asset(entry.id(), Zone::Unique).unwrap();
        let b = package.asset(entry.id(), Zone::Unique).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert!(package.refed_assets(Zone::Unique).is_empty());
    }
}
