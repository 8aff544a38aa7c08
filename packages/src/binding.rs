// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::{
    asset::Asset,
    asset_type::AssetType,
    cooker::Cooker,
    flags::Stage,
    package_man::PackageMan,
    sink::Sink,
};

#[derive(Debug, thiserror::Error)]
pub enum BindError {
    #[error("{asset_type:?} already has a sink bound at stage {stage:?}")]
    SinkAlreadyBound { asset_type: AssetType, stage: Stage },
    #[error("{0:?} already has a cooker bound")]
    CookerAlreadyBound(AssetType),
}

/// Creates the sinks of one stage of an asset type, and remembers the assets
/// it created them for.
pub(crate) struct SinkFactory {
    pub id: u64,
    create: fn(&Asset) -> Box<dyn Sink>,
    assets: Mutex<Vec<Weak<Asset>>>,
}

impl SinkFactory {
    pub fn new(id: u64, create: fn(&Asset) -> Box<dyn Sink>) -> SinkFactory {
        SinkFactory {
            id,
            create,
            assets: Mutex::new(Vec::new()),
        }
    }

    pub fn create(&self, asset: &Asset, asset_ref: Weak<Asset>) -> Box<dyn Sink> {
        let mut assets = self.assets.lock();
        assets.retain(|asset| asset.strong_count() > 0);
        assets.push(asset_ref);
        drop(assets);
        (self.create)(asset)
    }

    pub fn live_assets(&self) -> Vec<Arc<Asset>> {
        self.assets.lock().iter().filter_map(Weak::upgrade).collect()
    }
}

pub(crate) struct CookerFactory {
    pub id: u64,
    pub create: fn() -> Box<dyn Cooker>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BindingKind {
    Sink { asset_type: AssetType, stage: Stage, id: u64 },
    Cooker { asset_type: AssetType, id: u64 },
}

/// Keeps a sink or cooker registered with a [`PackageMan`]. Dropping the
/// binding unregisters it, and removes the bound sinks from every asset.
#[must_use]
pub struct Binding {
    man: Weak<PackageMan>,
    kind: BindingKind,
}

impl Binding {
    pub(crate) fn new(man: Weak<PackageMan>, kind: BindingKind) -> Binding {
        Binding { man, kind }
    }

    pub fn asset_type(&self) -> AssetType {
        match self.kind {
            BindingKind::Sink { asset_type, .. } | BindingKind::Cooker { asset_type, .. } => asset_type,
        }
    }

    /// The stage of a sink binding, `None` for cookers.
    pub fn stage(&self) -> Option<Stage> {
        match self.kind {
            BindingKind::Sink { stage, .. } => Some(stage),
            BindingKind::Cooker { .. } => None,
        }
    }
}

impl Drop for Binding {
    fn drop(&mut self) {
        if let Some(man) = self.man.upgrade() {
            man.unbind(self.kind);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use crate::{
        asset::Asset,
        asset_type::AssetType,
        flags::{PFlags, Stage, Zone},
        package_man::PackageMan,
        result::{SinkResult, Status},
        sink::{Sink, SinkType},
        test_util::package_man,
        time_slice::TimeSlice,
    };

    use super::BindError;

    static UNLOADS: AtomicUsize = AtomicUsize::new(0);

    struct FontSink {
        loaded: bool,
    }

    impl Sink for FontSink {
        fn process(&mut self, _: &TimeSlice, _: &PackageMan, _: &Asset, flags: PFlags) -> SinkResult {
            if flags.contains(PFlags::UNLOAD) {
                if self.loaded {
                    UNLOADS.fetch_add(1, Ordering::SeqCst);
                }
                self.loaded = false;
            } else if flags.contains(PFlags::LOAD) {
                self.loaded = true;
            }
            Ok(Status::Success)
        }
    }

    impl SinkType for FontSink {
        const ASSET_TYPE: AssetType = AssetType::Font;
        const STAGE: Stage = Stage::LOAD;
        fn create(_: &Asset) -> Self {
            FontSink { loaded: false }
        }
    }

    #[test]
    fn double_binding_is_rejected() {
        let (_, man) = package_man();
        let binding = man.bind::<FontSink>().unwrap();
        assert_eq!(Some(Stage::LOAD), binding.stage());
        assert!(matches!(
            man.bind::<FontSink>(),
            Err(BindError::SinkAlreadyBound { .. })
        ));
        drop(binding);
        assert!(man.bind::<FontSink>().is_ok());
    }

    #[test]
    fn unbinding_evicts_sinks() {
        let (_, man) = package_man();
        let binding = man.bind::<FontSink>().unwrap();
        let package = man.create_package("Fonts").unwrap();
        let entry = package.create_entry("Sans", AssetType::Font).unwrap();
        let asset = package.asset(entry.id(), Zone::Engine).unwrap();

        asset.process(&TimeSlice::INFINITE, PFlags::LOAD).unwrap();
        assert_eq!(Some(true), asset.with_sink(|sink: &mut FontSink| sink.loaded));

        drop(binding);
        assert_eq!(1, UNLOADS.load(Ordering::SeqCst));
        assert_eq!(None, asset.with_sink(|sink: &mut FontSink| sink.loaded));
        assert_eq!(1, Arc::strong_count(&asset));
    }
}
