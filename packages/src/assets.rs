// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! The asset types with sinks and cookers: textures, materials and particle
//! emitters.

mod material;
mod particle;
mod texture;

use serde_json::{json, Map, Value};

use crate::{
    asset::Asset,
    asset_type::AssetType,
    binding::{BindError, Binding},
    flags::PFlags,
    language::Language,
    package_man::PackageMan,
};

pub use material::{
    BlendMode, ColorSlot, DepthFunc, Material, MaterialCooker, MaterialLoader, MaterialParser, Sort, TcGen,
    TextureSlot, WaveAnim, WaveType, NUM_MATERIAL_COLORS, NUM_MATERIAL_TEXTURES,
};
pub use particle::{ParticleCooker, ParticleParser, ParticleStyle};
pub use texture::{
    TextureCooker, TextureFrame, TextureImage, TextureMip, TextureParser, TextureTag, TEXTURE_FORMAT_RGBA8,
};

/// The directory cooked payloads are found in at runtime, once the pak files
/// are mounted.
pub const COOKED_DIR: &str = "Cooked";

/// Binds every sink and cooker of this module. The returned bindings keep
/// them bound.
pub fn bind_all(man: &PackageMan) -> Result<Vec<Binding>, BindError> {
    Ok(vec![
        man.bind::<TextureParser>()?,
        man.bind_cooker::<TextureCooker>()?,
        man.bind::<MaterialParser>()?,
        man.bind::<MaterialLoader>()?,
        man.bind_cooker::<MaterialCooker>()?,
        man.bind::<ParticleParser>()?,
        man.bind_cooker::<ParticleCooker>()?,
    ])
}

/// The built-in key schema of an asset type, used when the package directory
/// doesn't have a `<Type>.keys` file.
pub fn default_keys(asset_type: AssetType) -> Option<String> {
    let schema = match asset_type {
        AssetType::Texture => texture_keys(),
        AssetType::Material => material_keys(),
        AssetType::Particle => particle_keys(),
        _ => return None,
    };
    Some(schema.to_string())
}

fn texture_keys() -> Value {
    json!({
        "Source": { "File": { "style": "File", "value": "" } },
        "Wrap": {
            "S": { "value": true },
            "T": { "value": true },
            "R": { "value": true }
        },
        "Mipmap": { "value": true },
        "Filter": { "style": "List", "value": "Trilinear", "options": "None;Bilinear;Trilinear" },
        "Localized": { "value": false }
    })
}

fn wave_keys() -> Value {
    json!({
        "Type": { "style": "List", "value": "Identity", "options": "Identity;Constant;Square;Sawtooth;Triangle;Noise" },
        "Amplitude": "0",
        "Frequency": "0",
        "Phase": "0",
        "Base": "0"
    })
}

fn material_keys() -> Value {
    let mut schema = Map::new();
    schema.insert("Source".into(), json!({ "Shader": { "value": "Default" } }));
    schema.insert(
        "Sort".into(),
        json!({
            "style": "List",
            "value": "Solid",
            "options": "Solid;Translucent;Translucent2;Translucent3;Translucent4;Translucent5"
        }),
    );
    schema.insert(
        "BlendMode".into(),
        json!({
            "style": "List",
            "value": "None",
            "options": "None;Alpha;InvAlpha;Additive;AddBlend;Colorize;InvColorizeD;InvColorizeS"
        }),
    );
    schema.insert(
        "DepthFunc".into(),
        json!({ "style": "List", "value": "Less", "options": "None;Less;LEqual;Greater;GEqual;Equal" }),
    );
    for (key, value) in [
        ("DoubleSided", false),
        ("DepthWrite", true),
        ("ProceduralTextures", false),
        ("Lit", false),
        ("CastShadows", false),
        ("ReceiveShadows", false),
        ("SelfShadow", false),
    ] {
        schema.insert(key.into(), json!({ "value": value }));
    }
    schema.insert("SpecularExponent".into(), json!({ "value": "1" }));

    for i in 1..=NUM_MATERIAL_TEXTURES {
        schema.insert(
            format!("Texture{i}"),
            json!({
                "Source": {
                    "Texture": { "style": "Import", "value": "" },
                    "FramesPerSecond": "0",
                    "ClampTextureFrames": false,
                    "UVChannel": "1"
                },
                "TcGen": { "style": "List", "value": "Vertex", "options": "Vertex;EnvMap" }
            }),
        );
    }
    for i in 0..NUM_MATERIAL_COLORS {
        schema.insert(
            format!("Color{i}"),
            json!({
                "A": { "style": "Color", "value": "255 255 255 255" },
                "B": { "style": "Color", "value": "255 255 255 255" },
                "Wave": wave_keys()
            }),
        );
    }
    Value::Object(schema)
}

fn particle_keys() -> Value {
    let axis = || json!({ "value": "0 0", "Time": "1 1", "Phase": "0 0" });
    let size = || json!({ "value": "1 1", "Scale": { "value": "1 1", "Time": "1 1" } });
    json!({
        "Source": { "Material": { "style": "Import", "value": "" } },
        "Physics": {
            "Mass": "1 1",
            "InitialVelocity": "0 0",
            "MaxVelocity": "0 0",
            "Gravity": "0 0",
            "Drag": "0 0",
            "Rotation": {
                "value": "0 0",
                "Rate": "0 0",
                "Drift": { "value": "0 0", "Time": "1 1" }
            },
            "Force": { "X": "0 0", "Y": "0 0", "Z": "0 0" },
            "Drift": { "X": axis(), "Y": axis(), "Z": axis() }
        },
        "Style": {
            "FadeIn": "1 1",
            "FadeOut": "1 1",
            "Lifetime": "1 1",
            "Size": { "X": size(), "Y": size() }
        }
    })
}

/// `Cooked/<asset path>[_<lang>].bin`, where the runtime reads an asset's
/// cooked payload from.
pub(crate) fn cooked_path(asset: &Asset, language: Language) -> String {
    format!("{COOKED_DIR}/{}", payload_name(&asset.path(), language))
}

/// `<asset path>[_<lang>].bin`, relative to a cooker output directory.
pub(crate) fn payload_name(asset_path: &str, language: Language) -> String {
    match language {
        Language::English => format!("{asset_path}.bin"),
        _ => format!("{asset_path}_{}.bin", language.code()),
    }
}

/// The flags key lookups of a sink use: the requested targets, or the host's.
pub(crate) fn key_flags(man: &PackageMan, flags: PFlags) -> PFlags {
    flags.target_flags(man.config().host)
}

/// Parses up to `N` whitespace separated numbers, keeping the defaults for
/// the ones that are missing. Parsing stops at the first token that isn't a
/// number.
pub(crate) fn parse_numbers<T: core::str::FromStr + Copy, const N: usize>(value: &str, defaults: [T; N]) -> [T; N] {
    let mut result = defaults;
    for (slot, token) in result.iter_mut().zip(value.split_whitespace()) {
        match token.parse() {
            Ok(number) => *slot = number,
            Err(_) => break,
        }
    }
    result
}
