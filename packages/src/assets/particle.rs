// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use file_system::Media;
use tracing::trace;

use crate::{
    asset::Asset,
    asset_type::AssetType,
    assets::{cooked_path, key_flags, parse_numbers, payload_name},
    binary::{BinReader, BinWriter},
    cooker::{status_from_comparisons, Cooker, CookerContext, CookerType, Pass, TargetPolicy, TrackedKey},
    entry::Entry,
    flags::{CookStatus, PFlags, Stage},
    language::Language,
    package_man::PackageMan,
    result::{SinkError, SinkResult, Status},
    sink::{Sink, SinkType},
    time_slice::TimeSlice,
};

const NUM_PAIRS: usize = 30;

/// The keys of the value pairs of a style, with their defaults, in the order
/// they're stored in cooked data.
const PAIR_KEYS: [(&str, [f32; 2]); NUM_PAIRS] = [
    ("Physics.Mass", [1.0, 1.0]),
    ("Physics.InitialVelocity", [0.0, 0.0]),
    ("Physics.MaxVelocity", [0.0, 0.0]),
    ("Physics.Gravity", [0.0, 0.0]),
    ("Physics.Drag", [0.0, 0.0]),
    ("Style.FadeIn", [1.0, 1.0]),
    ("Style.FadeOut", [1.0, 1.0]),
    ("Style.Lifetime", [1.0, 1.0]),
    ("Physics.Rotation", [0.0, 0.0]),
    ("Physics.Rotation.Rate", [0.0, 0.0]),
    ("Physics.Rotation.Drift", [0.0, 0.0]),
    ("Physics.Rotation.Drift.Time", [1.0, 1.0]),
    ("Physics.Force.X", [0.0, 0.0]),
    ("Physics.Force.Y", [0.0, 0.0]),
    ("Physics.Force.Z", [0.0, 0.0]),
    ("Physics.Drift.X", [0.0, 0.0]),
    ("Physics.Drift.Y", [0.0, 0.0]),
    ("Physics.Drift.Z", [0.0, 0.0]),
    ("Physics.Drift.X.Phase", [0.0, 0.0]),
    ("Physics.Drift.Y.Phase", [0.0, 0.0]),
    ("Physics.Drift.Z.Phase", [0.0, 0.0]),
    ("Physics.Drift.X.Time", [1.0, 1.0]),
    ("Physics.Drift.Y.Time", [1.0, 1.0]),
    ("Physics.Drift.Z.Time", [1.0, 1.0]),
    ("Style.Size.X", [1.0, 1.0]),
    ("Style.Size.Y", [1.0, 1.0]),
    ("Style.Size.X.Scale", [1.0, 1.0]),
    ("Style.Size.Y.Scale", [1.0, 1.0]),
    ("Style.Size.X.Scale.Time", [1.0, 1.0]),
    ("Style.Size.Y.Scale.Time", [1.0, 1.0]),
];

const MATERIAL_KEY: &str = "Source.Material";

const fn tracked_keys() -> [TrackedKey; NUM_PAIRS + 1] {
    let mut keys = [TrackedKey::String(MATERIAL_KEY); NUM_PAIRS + 1];
    let mut i = 0;
    while i < NUM_PAIRS {
        keys[i + 1] = TrackedKey::String(PAIR_KEYS[i].0);
        i += 1;
    }
    keys
}

const TRACKED_KEYS: [TrackedKey; NUM_PAIRS + 1] = tracked_keys();

/// How a particle emitter's particles look and move. Each pair is a range
/// (min, max) particles pick their value from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParticleStyle {
    pub mass: [f32; 2],
    pub velocity: [f32; 2],
    pub max_velocity: [f32; 2],
    pub gravity: [f32; 2],
    pub drag: [f32; 2],
    pub fade_in: [f32; 2],
    pub fade_out: [f32; 2],
    pub lifetime: [f32; 2],
    pub rotation: [f32; 2],
    pub rotation_rate: [f32; 2],
    pub rotation_drift: [f32; 2],
    pub rotation_drift_time: [f32; 2],
    /// Per axis: x, y, z.
    pub force: [[f32; 2]; 3],
    pub drift: [[f32; 2]; 3],
    pub drift_phase: [[f32; 2]; 3],
    pub drift_time: [[f32; 2]; 3],
    pub size_x: [f32; 2],
    pub size_y: [f32; 2],
    pub size_scale_x: [f32; 2],
    pub size_scale_y: [f32; 2],
    pub size_scale_x_time: [f32; 2],
    pub size_scale_y_time: [f32; 2],
    pub rgba: [f32; 4],
}

impl Default for ParticleStyle {
    fn default() -> Self {
        let mut style = ParticleStyle {
            mass: [0.0; 2],
            velocity: [0.0; 2],
            max_velocity: [0.0; 2],
            gravity: [0.0; 2],
            drag: [0.0; 2],
            fade_in: [0.0; 2],
            fade_out: [0.0; 2],
            lifetime: [0.0; 2],
            rotation: [0.0; 2],
            rotation_rate: [0.0; 2],
            rotation_drift: [0.0; 2],
            rotation_drift_time: [0.0; 2],
            force: [[0.0; 2]; 3],
            drift: [[0.0; 2]; 3],
            drift_phase: [[0.0; 2]; 3],
            drift_time: [[0.0; 2]; 3],
            size_x: [0.0; 2],
            size_y: [0.0; 2],
            size_scale_x: [0.0; 2],
            size_scale_y: [0.0; 2],
            size_scale_x_time: [0.0; 2],
            size_scale_y_time: [0.0; 2],
            rgba: [1.0; 4],
        };
        for (pair, (_, default)) in style.pairs_mut().into_iter().zip(PAIR_KEYS) {
            *pair = default;
        }
        style
    }
}

impl ParticleStyle {
    /// The pairs in [`PAIR_KEYS`] order.
    fn pairs_mut(&mut self) -> [&mut [f32; 2]; NUM_PAIRS] {
        let [force_x, force_y, force_z] = &mut self.force;
        let [drift_x, drift_y, drift_z] = &mut self.drift;
        let [phase_x, phase_y, phase_z] = &mut self.drift_phase;
        let [time_x, time_y, time_z] = &mut self.drift_time;
        [
            &mut self.mass,
            &mut self.velocity,
            &mut self.max_velocity,
            &mut self.gravity,
            &mut self.drag,
            &mut self.fade_in,
            &mut self.fade_out,
            &mut self.lifetime,
            &mut self.rotation,
            &mut self.rotation_rate,
            &mut self.rotation_drift,
            &mut self.rotation_drift_time,
            force_x,
            force_y,
            force_z,
            drift_x,
            drift_y,
            drift_z,
            phase_x,
            phase_y,
            phase_z,
            time_x,
            time_y,
            time_z,
            &mut self.size_x,
            &mut self.size_y,
            &mut self.size_scale_x,
            &mut self.size_scale_y,
            &mut self.size_scale_x_time,
            &mut self.size_scale_y_time,
        ]
    }

    /// Reads the style from an entry's keys. Each key is two numbers, a
    /// missing number keeps the default.
    pub fn from_keys(entry: &Entry, flags: PFlags) -> Result<ParticleStyle, SinkError> {
        let mut style = ParticleStyle::default();
        for (pair, (key, default)) in style.pairs_mut().into_iter().zip(PAIR_KEYS) {
            let value = entry
                .key_value::<String>(key, flags)
                .ok_or_else(|| SinkError::missing_key(key))?;
            *pair = parse_numbers(&value, default);
        }
        Ok(style)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut copy = *self;
        let mut writer = BinWriter::new();
        for pair in copy.pairs_mut() {
            writer.put(*pair);
        }
        writer.put(self.rgba);
        writer.into_bytes()
    }

    pub fn decode(bytes: &[u8], name: &str) -> Result<ParticleStyle, SinkError> {
        let mut reader = BinReader::new(bytes, name);
        let mut style = ParticleStyle::default();
        for pair in style.pairs_mut() {
            *pair = reader.get()?;
        }
        style.rgba = reader.get()?;
        Ok(style)
    }
}

/// Loads a particle emitter's style, from its keys or its cooked payload.
pub struct ParticleParser {
    style: Option<ParticleStyle>,
    material: Option<String>,
}

impl ParticleParser {
    pub fn style(&self) -> Option<&ParticleStyle> {
        self.style.as_ref()
    }

    /// The path of the material the particles are drawn with.
    pub fn material(&self) -> Option<&str> {
        self.material.as_deref()
    }
}

impl Sink for ParticleParser {
    fn process(&mut self, _: &TimeSlice, man: &PackageMan, asset: &Asset, flags: PFlags) -> SinkResult {
        if flags.contains(PFlags::UNLOAD) {
            self.style = None;
            self.material = None;
            return Ok(Status::Success);
        }
        if !flags.intersects(PFlags::LOAD | PFlags::PARSE | PFlags::INFO | PFlags::TRIM) || self.style.is_some() {
            return Ok(Status::Success);
        }

        let entry = asset.entry();
        if asset.is_cooked() {
            let path = cooked_path(asset, Language::English);
            let bytes = man.fs().read(&path, Media::ALL)?;
            self.style = Some(ParticleStyle::decode(&bytes, &path)?);
            self.material = entry.resolve(0);
        } else {
            let flags = key_flags(man, flags);
            self.material = entry
                .key_value::<String>(MATERIAL_KEY, flags)
                .filter(|material| !material.is_empty());
            self.style = Some(ParticleStyle::from_keys(entry, flags)?);
        }
        trace!(asset = %asset.path(), "loaded particle style");
        Ok(Status::Success)
    }
}

impl SinkType for ParticleParser {
    const ASSET_TYPE: AssetType = AssetType::Particle;
    const STAGE: Stage = Stage::PARSER;
    fn create(_: &Asset) -> Self {
        ParticleParser {
            style: None,
            material: None,
        }
    }
}

pub struct ParticleCooker;

impl ParticleCooker {
    const POLICY: TargetPolicy = TargetPolicy {
        keys: &TRACKED_KEYS,
        gles_sensitive: false,
    };
}

impl Cooker for ParticleCooker {
    fn version(&self) -> i32 {
        0
    }

    fn status(&mut self, cx: &mut CookerContext, flags: PFlags, allflags: PFlags) -> CookStatus {
        match Self::POLICY.pass(cx.entry(), flags, allflags) {
            Pass::Ignore => CookStatus::Ignore,
            Pass::Build(_) => status_from_comparisons(&[cx.compare_version(flags), cx.compare_modified_time(flags)]),
        }
    }

    fn compile(&mut self, cx: &mut CookerContext, flags: PFlags, _: PFlags) -> Result<(), SinkError> {
        cx.compare_version(flags);
        cx.compare_modified_time(flags);

        let entry = cx.entry().clone();
        let style = ParticleStyle::from_keys(&entry, flags)?;
        // The material is the only import, so it's import 0 for the loader.
        if let Some(material) = entry
            .key_value::<String>(MATERIAL_KEY, flags)
            .filter(|material| !material.is_empty())
        {
            cx.add_import(&material, flags);
        }
        let path = payload_name(cx.asset_path(), Language::English);
        cx.write_file(&path, flags, &style.encode())
    }
}

impl CookerType for ParticleCooker {
    const ASSET_TYPE: AssetType = AssetType::Particle;
    fn create() -> Self {
        ParticleCooker
    }
}
