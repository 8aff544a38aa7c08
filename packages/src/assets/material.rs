// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Materials: a shader, render state, up to [`NUM_MATERIAL_TEXTURES`]
//! textures and [`NUM_MATERIAL_COLORS`] animated colors.

use std::sync::Arc;

use file_system::Media;
use tracing::{trace, warn};

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

pub const NUM_MATERIAL_TEXTURES: usize = 6;
pub const NUM_MATERIAL_COLORS: usize = 2;

/// Used in place of textures that can't be found.
const MISSING_TEXTURE: &str = "Sys/T_Missing";
const NO_IMPORT: u8 = 255;

macro_rules! key_enum {
    ($(#[$meta:meta])* pub enum $name:ident { $($variant:ident),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
        #[repr(u8)]
        pub enum $name {
            #[default]
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// Parses a value of the key's list.
            pub fn from_name(name: &str) -> Option<$name> {
                match name {
                    $(stringify!($variant) => Some($name::$variant),)+
                    _ => None,
                }
            }

            pub fn from_u8(value: u8) -> Option<$name> {
                Self::ALL.get(value as usize).copied()
            }
        }
    };
}

key_enum! {
    /// The draw order bucket of a material.
    pub enum Sort { Solid, Translucent, Translucent2, Translucent3, Translucent4, Translucent5 }
}

key_enum! {
    pub enum BlendMode { None, Alpha, InvAlpha, Additive, AddBlend, Colorize, InvColorizeD, InvColorizeS }
}

key_enum! {
    pub enum DepthFunc { None, Less, LEqual, Greater, GEqual, Equal }
}

key_enum! {
    /// Where a texture's coordinates come from.
    pub enum TcGen { Vertex, EnvMap }
}

key_enum! {
    pub enum WaveType { Identity, Constant, Square, Sawtooth, Triangle, Noise }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TextureSlot {
    /// The index of the texture in the cooked imports, `None` for an unused
    /// slot. Uncooked materials don't use this, see
    /// [`MaterialParser::texture_ids`].
    pub import: Option<u8>,
    /// Zero-based.
    pub uv_channel: u8,
    pub frames_per_second: f32,
    pub clamp_frames: bool,
    pub tc_gen: TcGen,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WaveAnim {
    pub wave_type: WaveType,
    pub amplitude: f32,
    pub frequency: f32,
    pub phase: f32,
    pub base: f32,
}

/// A color animated between `rgba[0]` and `rgba[1]` by a wave.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorSlot {
    pub rgba: [[u8; 4]; 2],
    pub wave: WaveAnim,
}

impl Default for ColorSlot {
    fn default() -> Self {
        ColorSlot {
            rgba: [[255; 4]; 2],
            wave: WaveAnim::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Material {
    pub shader_id: u16,
    pub procedural: bool,
    pub sort: Sort,
    pub blend_mode: BlendMode,
    pub depth_func: DepthFunc,
    pub double_sided: bool,
    pub depth_write: bool,
    pub lit: bool,
    pub cast_shadows: bool,
    pub receive_shadows: bool,
    pub self_shadow: bool,
    pub specular_exponent: f32,
    pub textures: [TextureSlot; NUM_MATERIAL_TEXTURES],
    pub colors: [ColorSlot; NUM_MATERIAL_COLORS],
}

fn string_key(entry: &Entry, path: &str, flags: PFlags) -> Result<String, SinkError> {
    entry
        .key_value::<String>(path, flags)
        .ok_or_else(|| SinkError::missing_key(path))
}

fn bool_key(entry: &Entry, path: &str, flags: PFlags) -> Result<bool, SinkError> {
    entry
        .key_value::<bool>(path, flags)
        .ok_or_else(|| SinkError::missing_key(path))
}

fn float_key(entry: &Entry, path: &str, flags: PFlags, default: f32) -> Result<f32, SinkError> {
    let [value] = parse_numbers(&string_key(entry, path, flags)?, [default]);
    Ok(value)
}

fn list_key<E>(entry: &Entry, path: &str, flags: PFlags, parse: fn(&str) -> Option<E>) -> Result<E, SinkError> {
    let name = string_key(entry, path, flags)?;
    parse(&name).ok_or_else(|| SinkError::Meta(format!("{path} has an unknown value {name:?}")))
}

/// The texture paths of each slot, `None` for empty slots.
fn texture_paths(entry: &Entry, flags: PFlags) -> [Option<String>; NUM_MATERIAL_TEXTURES] {
    core::array::from_fn(|i| {
        entry
            .key_value::<String>(&format!("Texture{}.Source.Texture", i + 1), flags)
            .filter(|path| !path.is_empty())
    })
}

impl Material {
    /// Reads the material from an entry's keys. Texture imports are left
    /// unset.
    pub fn from_keys(entry: &Entry, flags: PFlags, shader_id: u16) -> Result<Material, SinkError> {
        let mut textures = [TextureSlot::default(); NUM_MATERIAL_TEXTURES];
        for (i, slot) in textures.iter_mut().enumerate() {
            let prefix = format!("Texture{}", i + 1);
            let [uv_channel] = parse_numbers(&string_key(entry, &format!("{prefix}.Source.UVChannel"), flags)?, [1u8]);
            *slot = TextureSlot {
                import: None,
                uv_channel: uv_channel.saturating_sub(1),
                frames_per_second: float_key(entry, &format!("{prefix}.Source.FramesPerSecond"), flags, 0.0)?,
                clamp_frames: bool_key(entry, &format!("{prefix}.Source.ClampTextureFrames"), flags)?,
                tc_gen: list_key(entry, &format!("{prefix}.TcGen"), flags, TcGen::from_name)?,
            };
        }

        let mut colors = [ColorSlot::default(); NUM_MATERIAL_COLORS];
        for (i, slot) in colors.iter_mut().enumerate() {
            let prefix = format!("Color{i}");
            for (rgba, half) in slot.rgba.iter_mut().zip(["A", "B"]) {
                *rgba = parse_numbers(&string_key(entry, &format!("{prefix}.{half}"), flags)?, [255u8; 4]);
            }
            slot.wave = WaveAnim {
                wave_type: list_key(entry, &format!("{prefix}.Wave.Type"), flags, WaveType::from_name)?,
                amplitude: float_key(entry, &format!("{prefix}.Wave.Amplitude"), flags, 0.0)?,
                frequency: float_key(entry, &format!("{prefix}.Wave.Frequency"), flags, 0.0)?,
                phase: float_key(entry, &format!("{prefix}.Wave.Phase"), flags, 0.0)?,
                base: float_key(entry, &format!("{prefix}.Wave.Base"), flags, 0.0)?,
            };
        }

        Ok(Material {
            shader_id,
            procedural: bool_key(entry, "ProceduralTextures", flags)?,
            sort: list_key(entry, "Sort", flags, Sort::from_name)?,
            blend_mode: list_key(entry, "BlendMode", flags, BlendMode::from_name)?,
            depth_func: list_key(entry, "DepthFunc", flags, DepthFunc::from_name)?,
            double_sided: bool_key(entry, "DoubleSided", flags)?,
            depth_write: bool_key(entry, "DepthWrite", flags)?,
            lit: bool_key(entry, "Lit", flags)?,
            cast_shadows: bool_key(entry, "CastShadows", flags)?,
            receive_shadows: bool_key(entry, "ReceiveShadows", flags)?,
            self_shadow: bool_key(entry, "SelfShadow", flags)?,
            specular_exponent: float_key(entry, "SpecularExponent", flags, 1.0)?,
            textures,
            colors,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut writer = BinWriter::new();
        writer.put(self.shader_id).put([
            self.procedural as u8,
            self.sort as u8,
            self.blend_mode as u8,
            self.depth_func as u8,
            self.double_sided as u8,
            self.depth_write as u8,
            self.lit as u8,
            self.cast_shadows as u8,
            self.receive_shadows as u8,
            self.self_shadow as u8,
        ]);
        writer.put(self.specular_exponent);
        for slot in &self.textures {
            writer
                .put(slot.import.unwrap_or(NO_IMPORT))
                .put(slot.uv_channel)
                .put(slot.frames_per_second)
                .put(slot.clamp_frames)
                .put(slot.tc_gen as u8);
        }
        for slot in &self.colors {
            let wave = &slot.wave;
            writer
                .put(slot.rgba)
                .put(wave.wave_type as u8)
                .put([wave.amplitude, wave.frequency, wave.phase, wave.base]);
        }
        writer.into_bytes()
    }

    pub fn decode(bytes: &[u8], name: &str) -> Result<Material, SinkError> {
        fn value<E>(value: u8, parse: fn(u8) -> Option<E>, name: &str) -> Result<E, SinkError> {
            parse(value).ok_or_else(|| SinkError::CorruptFile(format!("{name}: bad enum value {value}")))
        }

        let mut reader = BinReader::new(bytes, name);
        let shader_id = reader.get::<u16>()?;
        let [procedural, sort, blend, depth_func, double_sided, depth_write, lit, cast_shadows, receive_shadows, self_shadow]: [u8; 10] =
            reader.get()?;
        let specular_exponent = reader.get::<f32>()?;

        let mut textures = [TextureSlot::default(); NUM_MATERIAL_TEXTURES];
        for slot in &mut textures {
            let import = reader.get::<u8>()?;
            *slot = TextureSlot {
                import: (import != NO_IMPORT).then_some(import),
                uv_channel: reader.get()?,
                frames_per_second: reader.get()?,
                clamp_frames: reader.get()?,
                tc_gen: value(reader.get()?, TcGen::from_u8, name)?,
            };
        }
        let mut colors = [ColorSlot::default(); NUM_MATERIAL_COLORS];
        for slot in &mut colors {
            slot.rgba = reader.get()?;
            let wave_type = value(reader.get()?, WaveType::from_u8, name)?;
            let [amplitude, frequency, phase, base]: [f32; 4] = reader.get()?;
            slot.wave = WaveAnim {
                wave_type,
                amplitude,
                frequency,
                phase,
                base,
            };
        }

        Ok(Material {
            shader_id,
            procedural: procedural != 0,
            sort: value(sort, Sort::from_u8, name)?,
            blend_mode: value(blend, BlendMode::from_u8, name)?,
            depth_func: value(depth_func, DepthFunc::from_u8, name)?,
            double_sided: double_sided != 0,
            depth_write: depth_write != 0,
            lit: lit != 0,
            cast_shadows: cast_shadows != 0,
            receive_shadows: receive_shadows != 0,
            self_shadow: self_shadow != 0,
            specular_exponent,
            textures,
            colors,
        })
    }
}

/// Resolves a texture path to an entry id. Missing textures are replaced by
/// [`MISSING_TEXTURE`] unless [`PFlags::NO_DEFAULT_MEDIA`] is set.
fn resolve_texture(man: &PackageMan, material: &str, path: &str, flags: PFlags) -> Result<i32, SinkError> {
    let mut id = man.resolve_id(path, PFlags::LOAD);
    if id < 0 && !flags.contains(PFlags::NO_DEFAULT_MEDIA) {
        warn!(asset = %material, texture = %path, "texture not found, using {MISSING_TEXTURE}");
        id = man.resolve_id(MISSING_TEXTURE, PFlags::LOAD);
    }
    let entry = man
        .find_entry(id)
        .ok_or_else(|| SinkError::MissingFile(path.to_string()))?;
    if entry.asset_type() != AssetType::Texture {
        return Err(SinkError::Meta(format!(
            "{material} uses {path} as a texture, but it's a {}",
            entry.asset_type().name()
        )));
    }
    Ok(id)
}

/// Reads a material and resolves its textures to entry ids.
pub struct MaterialParser {
    material: Option<Material>,
    texture_ids: [Option<i32>; NUM_MATERIAL_TEXTURES],
}

impl MaterialParser {
    pub fn material(&self) -> Option<&Material> {
        self.material.as_ref()
    }

    /// The entry ids of the textures in each slot.
    pub fn texture_ids(&self) -> [Option<i32>; NUM_MATERIAL_TEXTURES] {
        self.texture_ids
    }
}

impl Sink for MaterialParser {
    fn process(&mut self, _: &TimeSlice, man: &PackageMan, asset: &Asset, flags: PFlags) -> SinkResult {
        if flags.contains(PFlags::UNLOAD) {
            self.material = None;
            self.texture_ids = [None; NUM_MATERIAL_TEXTURES];
            return Ok(Status::Success);
        }
        if !flags.intersects(PFlags::LOAD | PFlags::PARSE | PFlags::INFO | PFlags::TRIM) || self.material.is_some() {
            return Ok(Status::Success);
        }

        let entry = asset.entry();
        let path = asset.path();
        let mut texture_ids = [None; NUM_MATERIAL_TEXTURES];
        let material = if asset.is_cooked() {
            let cooked = cooked_path(asset, Language::English);
            let material = Material::decode(&man.fs().read(&cooked, Media::ALL)?, &cooked)?;
            for (slot, id) in material.textures.iter().zip(&mut texture_ids) {
                if let Some(import) = slot.import {
                    let texture = entry
                        .resolve(import as usize)
                        .ok_or_else(|| SinkError::CorruptFile(format!("{cooked}: no import {import}")))?;
                    *id = Some(resolve_texture(man, &path, &texture, flags)?);
                }
            }
            material
        } else {
            let key_flags = key_flags(man, flags);
            let shader_id = man.shader_id(&string_key(entry, "Source.Shader", key_flags)?)?;
            let material = Material::from_keys(entry, key_flags, shader_id)?;
            for (texture, id) in texture_paths(entry, key_flags).iter().zip(&mut texture_ids) {
                if let Some(texture) = texture {
                    *id = Some(resolve_texture(man, &path, texture, flags)?);
                }
            }
            material
        };

        self.material = Some(material);
        self.texture_ids = texture_ids;
        trace!(asset = %path, "parsed material");
        Ok(Status::Success)
    }
}

impl SinkType for MaterialParser {
    const ASSET_TYPE: AssetType = AssetType::Material;
    const STAGE: Stage = Stage::PARSER;
    fn create(_: &Asset) -> Self {
        MaterialParser {
            material: None,
            texture_ids: [None; NUM_MATERIAL_TEXTURES],
        }
    }
}

/// Loads the textures of a parsed material, one slot at a time, and keeps
/// them alive while the material is loaded.
pub struct MaterialLoader {
    textures: [Option<Arc<Asset>>; NUM_MATERIAL_TEXTURES],
    next: usize,
    loaded: bool,
}

impl MaterialLoader {
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// The texture asset of a slot.
    pub fn texture(&self, slot: usize) -> Option<&Arc<Asset>> {
        self.textures.get(slot)?.as_ref()
    }
}

impl Sink for MaterialLoader {
    fn process(&mut self, time: &TimeSlice, man: &PackageMan, asset: &Asset, flags: PFlags) -> SinkResult {
        if flags.contains(PFlags::UNLOAD) {
            self.textures = Default::default();
            self.next = 0;
            self.loaded = false;
            return Ok(Status::Success);
        }
        if !flags.contains(PFlags::LOAD) || self.loaded {
            return Ok(Status::Success);
        }

        let ids = asset
            .with_sink(|parser: &mut MaterialParser| parser.texture_ids())
            .ok_or_else(|| SinkError::Generic(format!("{}: the material hasn't been parsed", asset.path())))?;
        let texture_flags = PFlags::LOAD | flags.targets() | (flags & PFlags::NO_DEFAULT_MEDIA);
        while self.next < NUM_MATERIAL_TEXTURES {
            if let Some(id) = ids[self.next] {
                let texture = match &self.textures[self.next] {
                    Some(texture) => texture.clone(),
                    None => {
                        let texture = man
                            .asset(id, asset.zone())
                            .ok_or_else(|| SinkError::MissingFile(format!("texture #{id}")))?;
                        self.textures[self.next] = Some(texture.clone());
                        texture
                    }
                };
                if man.process(time, &texture, texture_flags)? == Status::Pending {
                    return Ok(Status::Pending);
                }
            }
            self.next += 1;
            if self.next < NUM_MATERIAL_TEXTURES && time.expired() {
                return Ok(Status::Pending);
            }
        }
        self.loaded = true;
        Ok(Status::Success)
    }
}

impl SinkType for MaterialLoader {
    const ASSET_TYPE: AssetType = AssetType::Material;
    const STAGE: Stage = Stage::LOAD;
    fn create(_: &Asset) -> Self {
        MaterialLoader {
            textures: Default::default(),
            next: 0,
            loaded: false,
        }
    }
}

macro_rules! material_keys {
    (textures: [$($t:literal),+], colors: [$($c:literal),+]) => {
        &[
            TrackedKey::String("Source.Shader"),
            TrackedKey::String("Sort"),
            TrackedKey::String("BlendMode"),
            TrackedKey::String("DepthFunc"),
            TrackedKey::Bool("DoubleSided"),
            TrackedKey::Bool("DepthWrite"),
            TrackedKey::Bool("ProceduralTextures"),
            TrackedKey::Bool("Lit"),
            TrackedKey::Bool("CastShadows"),
            TrackedKey::Bool("ReceiveShadows"),
            TrackedKey::Bool("SelfShadow"),
            TrackedKey::String("SpecularExponent"),
            $(
                TrackedKey::String(concat!("Texture", $t, ".Source.Texture")),
                TrackedKey::String(concat!("Texture", $t, ".Source.FramesPerSecond")),
                TrackedKey::Bool(concat!("Texture", $t, ".Source.ClampTextureFrames")),
                TrackedKey::String(concat!("Texture", $t, ".Source.UVChannel")),
                TrackedKey::String(concat!("Texture", $t, ".TcGen")),
            )+
            $(
                TrackedKey::String(concat!("Color", $c, ".A")),
                TrackedKey::String(concat!("Color", $c, ".B")),
                TrackedKey::String(concat!("Color", $c, ".Wave.Type")),
                TrackedKey::String(concat!("Color", $c, ".Wave.Amplitude")),
                TrackedKey::String(concat!("Color", $c, ".Wave.Frequency")),
                TrackedKey::String(concat!("Color", $c, ".Wave.Phase")),
                TrackedKey::String(concat!("Color", $c, ".Wave.Base")),
            )+
        ]
    };
}

pub struct MaterialCooker;

impl MaterialCooker {
    /// Materials are compiled against the shader backend, so GLES and other
    /// targets never share them.
    const POLICY: TargetPolicy = TargetPolicy {
        keys: material_keys!(textures: [1, 2, 3, 4, 5, 6], colors: [0, 1]),
        gles_sensitive: true,
    };
}

impl Cooker for MaterialCooker {
    fn version(&self) -> i32 {
        6
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
        let shader_id = cx.man().shader_id(&string_key(&entry, "Source.Shader", flags)?)?;
        let mut material = Material::from_keys(&entry, flags, shader_id)?;
        for (slot, path) in material.textures.iter_mut().zip(texture_paths(&entry, flags)) {
            let Some(path) = path else {
                continue;
            };
            let index = cx.add_import(&path, flags);
            let import = u8::try_from(index)
                .ok()
                .filter(|import| *import != NO_IMPORT)
                .ok_or_else(|| SinkError::Compiler(format!("{}: too many imports", cx.asset_path())))?;
            slot.import = Some(import);
        }
        let path = payload_name(cx.asset_path(), Language::English);
        cx.write_file(&path, flags, &material.encode())
    }
}

impl CookerType for MaterialCooker {
    const ASSET_TYPE: AssetType = AssetType::Material;
    fn create() -> Self {
        MaterialCooker
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use file_system::{FileSystem, Media, MemoryFileSystem};

    use crate::{
        asset_type::AssetType,
        assets::{bind_all, TextureParser},
        flags::{CookStatus, PFlags, Zone},
        keys::Variant,
        language::Languages,
        package::Package,
        package_man::PackageMan,
        result::{SinkError, Status},
        test_util::{package_man, write_png},
        time_slice::TimeSlice,
    };

    use super::{BlendMode, DepthFunc, Material, MaterialLoader, MaterialParser, TcGen, WaveType};

    fn string(value: &str) -> Variant {
        Variant::String(value.to_string())
    }

    fn world(fs: &MemoryFileSystem, man: &PackageMan) -> Arc<Package> {
        write_png(fs, "Textures/rock.png", 2, [128, 128, 128, 255]);
        write_png(fs, "Textures/moss.png", 2, [0, 128, 0, 255]);
        let package = man.create_package("World").unwrap();
        for (name, file) in [("Rock", "Textures/rock.png"), ("Moss", "Textures/moss.png")] {
            let entry = package.create_entry(name, AssetType::Texture).unwrap();
            entry.set_key("Source.File", string(file));
        }
        package
    }

    #[test]
    fn cooked_layout() {
        let (fs, man) = package_man();
        let _bindings = bind_all(&man).unwrap();
        let package = world(&fs, &man);
        let entry = package.create_entry("Cliff", AssetType::Material).unwrap();
        entry.set_key("Texture1.Source.Texture", string("World/Rock"));
        entry.set_key("Texture3.Source.Texture", string("World/Moss"));
        entry.set_key("Texture3.Source.UVChannel", string("2"));
        entry.set_key("Texture3.TcGen", string("EnvMap"));
        entry.set_key("BlendMode", string("Additive"));
        entry.set_key("Color0.A", string("10 20 30"));
        entry.set_key("Color1.Wave.Type", string("Sawtooth"));
        entry.set_key("Color1.Wave.Frequency", string("0.5"));

        let asset = package.asset(entry.id(), Zone::Cooker).unwrap();
        let mut cooker = man.create_cooker(asset, true, Languages::ENGLISH, PFlags::TARGET_PC).unwrap();
        assert_eq!(CookStatus::NeedRebuild, cooker.status(PFlags::NONE, PFlags::TARGET_PC));
        cooker.cook(PFlags::NONE, PFlags::TARGET_PC).unwrap();
        let imports: Vec<&str> = cooker.imports().iter().map(|import| import.path.as_str()).collect();
        assert_eq!(vec!["World/Rock", "World/Moss"], imports);

        let bytes = fs.read("Cooked/Out/Generic/World/Cliff.bin", Media::DISK).unwrap();
        assert_eq!(16 + 6 * 8 + 2 * 25, bytes.len());
        assert_eq!([0, 0], bytes[0..2]);
        assert_eq!(BlendMode::Additive as u8, bytes[4]);
        assert_eq!([0, 0, 255, 1], [bytes[16], bytes[17], bytes[24], bytes[32]]);

        let material = Material::decode(&bytes, "Cliff.bin").unwrap();
        assert_eq!(DepthFunc::Less, material.depth_func);
        assert!(material.depth_write);
        assert_eq!(1.0, material.specular_exponent);
        assert_eq!(Some(1), material.textures[2].import);
        assert_eq!(1, material.textures[2].uv_channel);
        assert_eq!(TcGen::EnvMap, material.textures[2].tc_gen);
        assert_eq!(None, material.textures[5].import);
        assert_eq!([[10, 20, 30, 255], [255; 4]], material.colors[0].rgba);
        assert_eq!(WaveType::Sawtooth, material.colors[1].wave.wave_type);
        assert_eq!(0.5, material.colors[1].wave.frequency);
        assert!(matches!(
            Material::decode(&bytes[..40], "Cliff.bin"),
            Err(SinkError::CorruptFile(_))
        ));
    }

    #[test]
    fn gles_targets_get_their_own_materials() {
        let (fs, man) = package_man();
        let _bindings = bind_all(&man).unwrap();
        let package = world(&fs, &man);
        let entry = package.create_entry("Cliff", AssetType::Material).unwrap();
        let asset = package.asset(entry.id(), Zone::Cooker).unwrap();
        let all = PFlags::TARGET_PC | PFlags::TARGET_IPHONE | PFlags::TARGET_IPAD;
        let mut cooker = man.create_cooker(asset, true, Languages::ENGLISH, all).unwrap();

        assert_eq!(CookStatus::Ignore, cooker.status(PFlags::NONE, all));
        assert_eq!(CookStatus::NeedRebuild, cooker.status(PFlags::TARGET_PC, all));
        assert_eq!(CookStatus::NeedRebuild, cooker.status(PFlags::TARGET_IPHONE, all));
        assert_eq!(CookStatus::Ignore, cooker.status(PFlags::TARGET_IPAD, all));

        cooker.cook(PFlags::TARGET_IPHONE, all).unwrap();
        assert!(fs.exists("Cooked/Out/IOS/IPhone/World/Cliff.bin", Media::DISK));

        // Only PC and PS3 are not GLES, so they can share.
        let pcs = PFlags::TARGET_PC | PFlags::TARGET_PS3;
        assert_eq!(CookStatus::NeedRebuild, cooker.status(PFlags::NONE, pcs));
        assert_eq!(CookStatus::Ignore, cooker.status(PFlags::TARGET_PS3, pcs));
    }

    #[test]
    fn shaders_get_stable_ids() {
        let (fs, man) = package_man();
        let _bindings = bind_all(&man).unwrap();
        let package = world(&fs, &man);
        for (name, shader) in [("Cliff", "Default"), ("Skin", "Skinned"), ("Grass", "Default")] {
            let entry = package.create_entry(name, AssetType::Material).unwrap();
            entry.set_key("Source.Shader", string(shader));
            let asset = package.asset(entry.id(), Zone::Cooker).unwrap();
            let mut cooker = man.create_cooker(asset, true, Languages::ENGLISH, PFlags::TARGET_PC).unwrap();
            cooker.cook(PFlags::NONE, PFlags::TARGET_PC).unwrap();
        }
        let shader_id = |name: &str| {
            let bytes = fs.read(&format!("Cooked/Out/Generic/World/{name}.bin"), Media::DISK).unwrap();
            u16::from_le_bytes([bytes[0], bytes[1]])
        };
        assert_eq!([0, 1, 0], [shader_id("Cliff"), shader_id("Skin"), shader_id("Grass")]);

        man.save_shaders().unwrap();
        let saved = fs.read("Cooked/Out/Shaders/Shaders.json", Media::DISK).unwrap();
        let saved: serde_json::Value = serde_json::from_slice(&saved).unwrap();
        assert_eq!(1, saved["Skinned"]);
    }

    #[test]
    fn missing_textures() {
        let (fs, man) = package_man();
        let _bindings = bind_all(&man).unwrap();
        let package = world(&fs, &man);
        let entry = package.create_entry("Lost", AssetType::Material).unwrap();
        entry.set_key("Texture2.Source.Texture", string("World/Gone"));
        let asset = package.asset(entry.id(), Zone::Engine).unwrap();

        assert!(matches!(
            asset.process(&TimeSlice::INFINITE, PFlags::PARSE),
            Err(SinkError::MissingFile(_))
        ));
        assert!(matches!(
            asset.process(&TimeSlice::INFINITE, PFlags::PARSE | PFlags::NO_DEFAULT_MEDIA),
            Err(SinkError::MissingFile(_))
        ));

        let sys = man.create_package("Sys").unwrap();
        let missing = sys.create_entry("T_Missing", AssetType::Texture).unwrap();
        asset.process(&TimeSlice::INFINITE, PFlags::PARSE).unwrap();
        let ids = asset.with_sink(|parser: &mut MaterialParser| parser.texture_ids()).unwrap();
        assert_eq!([None, Some(missing.id())], [ids[0], ids[1]]);

        let wrong = package.create_entry("NotATexture", AssetType::Material).unwrap();
        let weird = package.create_entry("Weird", AssetType::Material).unwrap();
        weird.set_key("Texture1.Source.Texture", string(&wrong.path()));
        let asset = package.asset(weird.id(), Zone::Engine).unwrap();
        assert!(matches!(
            asset.process(&TimeSlice::INFINITE, PFlags::PARSE),
            Err(SinkError::Meta(_))
        ));
    }

    #[test]
    fn loader_keeps_textures_loaded() {
        let (fs, man) = package_man();
        let _bindings = bind_all(&man).unwrap();
        let package = world(&fs, &man);
        let entry = package.create_entry("Cliff", AssetType::Material).unwrap();
        entry.set_key("Texture1.Source.Texture", string("World/Rock"));
        entry.set_key("Texture4.Source.Texture", string("World/Moss"));
        let asset = package.asset(entry.id(), Zone::Engine).unwrap();

        let mut pending = 0;
        while asset.process(&TimeSlice::expired_now(), PFlags::LOAD).unwrap() == Status::Pending {
            pending += 1;
            assert!(pending < 100);
        }
        // At least one call per slot.
        assert!(pending >= 6);

        let rock = asset
            .with_sink(|loader: &mut MaterialLoader| {
                assert!(loader.is_loaded());
                assert!(loader.texture(1).is_none());
                loader.texture(0).cloned()
            })
            .flatten()
            .unwrap();
        assert_eq!("World/Rock", rock.path());
        assert_eq!(Some(true), rock.with_sink(|parser: &mut TextureParser| parser.is_loaded()));

        asset.process(&TimeSlice::INFINITE, PFlags::UNLOAD).unwrap();
        assert_eq!(Some(true), asset.with_sink(|loader: &mut MaterialLoader| loader.texture(0).is_none()));
    }
}
