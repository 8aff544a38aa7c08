// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use enum_map::Enum;

/// The type of an asset, as named in the `type` field of package scripts.
/// Each type has its own key schema and its own sinks and cooker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Enum)]
pub enum AssetType {
    Texture,
    Material,
    Particle,
    Mesh,
    SkModel,
    SkAnimSet,
    SkAnimStates,
    Map,
    Music,
    Sound,
    Font,
    Typeface,
    StringTable,
}

impl AssetType {
    pub const ALL: [AssetType; 13] = [
        AssetType::Texture,
        AssetType::Material,
        AssetType::Particle,
        AssetType::Mesh,
        AssetType::SkModel,
        AssetType::SkAnimSet,
        AssetType::SkAnimStates,
        AssetType::Map,
        AssetType::Music,
        AssetType::Sound,
        AssetType::Font,
        AssetType::Typeface,
        AssetType::StringTable,
    ];

    pub fn name(self) -> &'static str {
        match self {
            AssetType::Texture => "Texture",
            AssetType::Material => "Material",
            AssetType::Particle => "Particle",
            AssetType::Mesh => "Mesh",
            AssetType::SkModel => "SkModel",
            AssetType::SkAnimSet => "SkAnimSet",
            AssetType::SkAnimStates => "SkAnimStates",
            AssetType::Map => "Map",
            AssetType::Music => "Music",
            AssetType::Sound => "Sound",
            AssetType::Font => "Font",
            AssetType::Typeface => "Typeface",
            AssetType::StringTable => "StringTable",
        }
    }

    pub fn from_name(name: &str) -> Option<AssetType> {
        AssetType::ALL.into_iter().find(|ty| ty.name() == name)
    }

    /// The stable numeric id stored in cooked package data.
    pub fn id(self) -> u16 {
        self as u16
    }

    pub fn from_id(id: u16) -> Option<AssetType> {
        AssetType::ALL.get(id as usize).copied()
    }
}
