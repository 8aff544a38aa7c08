// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use core::{any::Any, cell::UnsafeCell};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::{
    asset::Asset,
    asset_type::AssetType,
    flags::{PFlags, Stage},
    package_man::PackageMan,
    result::SinkResult,
    time_slice::TimeSlice,
};

/// Upcasting to [`Any`], for getting the concrete type of a boxed sink back.
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// One stage of an asset's processing pipeline, e.g. parsing a texture.
///
/// A sink is a resumable state machine: [`Sink::process`] does as much work
/// as the time slice allows and returns [`crate::Status::Pending`] if there's
/// more to do, picking up where it left off on the next call. Calls are never
/// concurrent for the same sink.
///
/// [`PFlags::UNLOAD`] must always succeed, and unloading an unloaded sink must
/// not change anything.
pub trait Sink: AsAny + Send {
    fn process(&mut self, time: &TimeSlice, man: &PackageMan, asset: &Asset, flags: PFlags) -> SinkResult;
}

/// A sink that can be bound to a stage with [`PackageMan::bind`].
pub trait SinkType: Sink + Sized {
    const ASSET_TYPE: AssetType;
    const STAGE: Stage;
    fn create(asset: &Asset) -> Self;
}

pub(crate) fn create_boxed<S: SinkType>(asset: &Asset) -> Box<dyn Sink> {
    Box::new(S::create(asset))
}

/// Shared mutexes handed out to sinks while they are being processed, so
/// idle sinks don't each need their own.
pub(crate) struct MutexPool {
    free: Mutex<Vec<Arc<Mutex<()>>>>,
}

impl MutexPool {
    pub fn new(initial: usize) -> MutexPool {
        MutexPool {
            free: Mutex::new((0..initial).map(|_| Arc::new(Mutex::new(()))).collect()),
        }
    }

    fn take(&self) -> Arc<Mutex<()>> {
        self.free
            .lock()
            .pop()
            .unwrap_or_else(|| Arc::new(Mutex::new(())))
    }

    fn give(&self, mutex: Arc<Mutex<()>>) {
        self.free.lock().push(mutex);
    }

    #[cfg(test)]
    pub fn available(&self) -> usize {
        self.free.lock().len()
    }
}

/// A sink allocated for an asset, with the bookkeeping that serializes calls
/// into it.
pub(crate) struct SinkSlot {
    /// The id of the binding the sink was created from.
    pub binding: u64,
    gate: Mutex<SlotGate>,
    sink: UnsafeCell<Box<dyn Sink>>,
}

struct SlotGate {
    in_flight: usize,
    mutex: Option<Arc<Mutex<()>>>,
}

// Safety: the sink is only accessed in `SinkSlot::with`, while holding the
// pooled mutex, and every concurrent caller shares the same pooled mutex.
// Sinks are `Send`, so handing them between threads this way is fine.
unsafe impl Sync for SinkSlot {}

impl SinkSlot {
    pub fn new(binding: u64, sink: Box<dyn Sink>) -> SinkSlot {
        SinkSlot {
            binding,
            gate: Mutex::new(SlotGate {
                in_flight: 0,
                mutex: None,
            }),
            sink: UnsafeCell::new(sink),
        }
    }

    /// Runs `f` on the sink. The first of concurrent callers takes a mutex
    /// from the pool, the others wait on the same one, and the last one out
    /// returns it.
    pub fn with<R>(&self, pool: &MutexPool, f: impl FnOnce(&mut dyn Sink) -> R) -> R {
        let mutex = {
            let mut gate = self.gate.lock();
            gate.in_flight += 1;
            gate.mutex.get_or_insert_with(|| pool.take()).clone()
        };
        let _in_flight = InFlight { slot: self, pool };

        let _guard = mutex.lock();
        // Safety: see the Sync impl, we hold the mutex every caller of this
        // slot is using right now.
        let sink = unsafe { &mut *self.sink.get() };
        f(&mut **sink)
    }
}

struct InFlight<'a> {
    slot: &'a SinkSlot,
    pool: &'a MutexPool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut gate = self.slot.gate.lock();
        gate.in_flight -= 1;
        if gate.in_flight == 0 {
            if let Some(mutex) = gate.mutex.take() {
                self.pool.give(mutex);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        thread,
        time::Duration,
    };

    use crate::{
        asset::Asset,
        asset_type::AssetType,
        flags::{PFlags, Stage, Zone},
        package_man::PackageMan,
        result::{SinkError, SinkResult, Status},
        test_util::package_man,
        time_slice::TimeSlice,
    };

    use super::{MutexPool, Sink, SinkSlot, SinkType};

    static INSIDE: AtomicUsize = AtomicUsize::new(0);
    static MAX_INSIDE: AtomicUsize = AtomicUsize::new(0);
    static CALLS: AtomicUsize = AtomicUsize::new(0);

    struct SlowSink;

    impl Sink for SlowSink {
        fn process(&mut self, _: &TimeSlice, _: &PackageMan, _: &Asset, flags: PFlags) -> SinkResult {
            if flags.contains(PFlags::UNLOAD) {
                return Ok(Status::Success);
            }
            let inside = INSIDE.fetch_add(1, Ordering::SeqCst) + 1;
            MAX_INSIDE.fetch_max(inside, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(2));
            CALLS.fetch_add(1, Ordering::SeqCst);
            INSIDE.fetch_sub(1, Ordering::SeqCst);
            Ok(Status::Success)
        }
    }

    impl SinkType for SlowSink {
        const ASSET_TYPE: AssetType = AssetType::Sound;
        const STAGE: Stage = Stage::PARSER;
        fn create(_: &Asset) -> Self {
            SlowSink
        }
    }

    #[test]
    fn sinks_are_single_flight() {
        let (_, man) = package_man();
        let _binding = man.bind::<SlowSink>().unwrap();
        let package = man.create_package("Audio").unwrap();
        let entry = package.create_entry("Boom", AssetType::Sound).unwrap();
        let asset = package.asset(entry.id(), Zone::Engine).unwrap();

        thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..5 {
                        asset.process(&TimeSlice::INFINITE, PFlags::LOAD).unwrap();
                    }
                });
            }
        });
        assert_eq!(1, MAX_INSIDE.load(Ordering::SeqCst));
        assert_eq!(20, CALLS.load(Ordering::SeqCst));
    }

    #[test]
    fn pooled_mutexes_are_returned() {
        struct Noop;
        impl Sink for Noop {
            fn process(&mut self, _: &TimeSlice, _: &PackageMan, _: &Asset, _: PFlags) -> SinkResult {
                Err(SinkError::Generic("nope".into()))
            }
        }

        let pool = MutexPool::new(2);
        let slot = SinkSlot::new(0, Box::new(Noop));
        let (_, man) = package_man();
        let package = man.create_package("P").unwrap();
        let entry = package.create_entry("E", AssetType::Font).unwrap();
        let asset = package.asset(entry.id(), Zone::Unique).unwrap();

        let result = slot.with(&pool, |sink| sink.process(&TimeSlice::INFINITE, &man, &asset, PFlags::LOAD));
        assert!(result.is_err());
        assert_eq!(2, pool.available());

        let nested = slot.with(&pool, |_| pool.available());
        assert_eq!(1, nested);
        assert_eq!(2, pool.available());
    }
}
