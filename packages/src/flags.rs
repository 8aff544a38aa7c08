// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use core::{
    fmt::{self, Debug},
    ops::{BitAnd, BitAndAssign, BitOr, BitOrAssign, Not},
};

use enum_map::Enum;

/// Process flags: what a [`crate::Asset::process`] call should do, which
/// platform targets it concerns, and modifiers for key lookups and cooking.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PFlags(u32);

impl PFlags {
    pub const NONE: PFlags = PFlags(0);
    /// Only allocate the asset's sinks, don't process them.
    pub const S_ALLOC: PFlags = PFlags(1 << 0);
    pub const INFO: PFlags = PFlags(1 << 1);
    pub const PARSE: PFlags = PFlags(1 << 2);
    pub const LOAD: PFlags = PFlags(1 << 3);
    pub const UNFORMATTED: PFlags = PFlags(1 << 4);
    pub const UNLOAD: PFlags = PFlags(1 << 5);
    pub const TRIM: PFlags = PFlags(1 << 6);
    pub const VID_RESET: PFlags = PFlags(1 << 7);
    pub const VID_BIND: PFlags = PFlags(1 << 8);
    pub const CANCEL: PFlags = PFlags(1 << 9);
    pub const FAST_PATH: PFlags = PFlags(1 << 10);

    pub const TARGET_PC: PFlags = PFlags(1 << 11);
    pub const TARGET_IPHONE: PFlags = PFlags(1 << 12);
    pub const TARGET_IPAD: PFlags = PFlags(1 << 13);
    pub const TARGET_XBOX360: PFlags = PFlags(1 << 14);
    pub const TARGET_PS3: PFlags = PFlags(1 << 15);

    /// Use the host platform's target when no target bit is given, instead of
    /// the generic keys.
    pub const TARGET_DEFAULT: PFlags = PFlags(1 << 16);
    /// Delete previous cook output before cooking.
    pub const CLEAN: PFlags = PFlags(1 << 17);
    /// Skip cooking, only rebuild the pak files.
    pub const SCRIPTS_ONLY: PFlags = PFlags(1 << 18);
    pub const NO_DEFAULT_MEDIA: PFlags = PFlags(1 << 19);
    /// Key lookups don't fall back to the schema's default value.
    pub const NO_DEFAULT_KEY: PFlags = PFlags(1 << 20);
    /// Key removal only removes the exact path.
    pub const EXACT: PFlags = PFlags(1 << 21);
    /// Key removal removes every key starting with the path.
    pub const PREFIX: PFlags = PFlags(1 << 22);

    pub const TARGET_IOS: PFlags = PFlags(Self::TARGET_IPHONE.0 | Self::TARGET_IPAD.0);
    pub const TARGET_CONSOLE: PFlags = PFlags(Self::TARGET_XBOX360.0 | Self::TARGET_PS3.0);
    pub const ALL_TARGETS: PFlags =
        PFlags(Self::TARGET_PC.0 | Self::TARGET_IOS.0 | Self::TARGET_CONSOLE.0);

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn from_bits(bits: u32) -> PFlags {
        PFlags(bits)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True if every bit of `other` is set in `self`.
    pub const fn contains(self, other: PFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// True if any bit of `other` is set in `self`.
    pub const fn intersects(self, other: PFlags) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn targets(self) -> PFlags {
        PFlags(self.0 & Self::ALL_TARGETS.0)
    }

    /// The first target set in these flags, in [`Target`] order.
    pub fn first_target(self) -> Option<Target> {
        Target::ALL.into_iter().find(|target| self.contains(target.flag()))
    }

    /// Iterates the targets set in these flags.
    pub fn iter_targets(self) -> impl Iterator<Item = Target> {
        Target::ALL
            .into_iter()
            .filter(move |target| self.contains(target.flag()))
    }

    /// The targets a processing request addresses: the explicit target bits
    /// if there are any (or if [`PFlags::TARGET_DEFAULT`] is set), otherwise
    /// the host's target.
    pub fn target_flags(self, host: Target) -> PFlags {
        if self.intersects(Self::ALL_TARGETS | Self::TARGET_DEFAULT) {
            self.targets()
        } else {
            host.flag()
        }
    }
}

impl BitOr for PFlags {
    type Output = PFlags;
    fn bitor(self, rhs: Self) -> Self::Output {
        PFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for PFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for PFlags {
    type Output = PFlags;
    fn bitand(self, rhs: Self) -> Self::Output {
        PFlags(self.0 & rhs.0)
    }
}

impl BitAndAssign for PFlags {
    fn bitand_assign(&mut self, rhs: Self) {
        self.0 &= rhs.0;
    }
}

impl Not for PFlags {
    type Output = PFlags;
    fn not(self) -> Self::Output {
        PFlags(!self.0)
    }
}

impl Debug for PFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PFlags({:#x}", self.0)?;
        for target in self.iter_targets() {
            write!(f, " {}", target.name())?;
        }
        write!(f, ")")
    }
}

/// A platform the cooker can build data for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Enum)]
pub enum Target {
    PC,
    IPhone,
    IPad,
    XBox360,
    PS3,
}

pub const NUM_TARGETS: usize = 5;

impl Target {
    pub const ALL: [Target; NUM_TARGETS] = [
        Target::PC,
        Target::IPhone,
        Target::IPad,
        Target::XBox360,
        Target::PS3,
    ];

    pub fn flag(self) -> PFlags {
        match self {
            Target::PC => PFlags::TARGET_PC,
            Target::IPhone => PFlags::TARGET_IPHONE,
            Target::IPad => PFlags::TARGET_IPAD,
            Target::XBox360 => PFlags::TARGET_XBOX360,
            Target::PS3 => PFlags::TARGET_PS3,
        }
    }

    /// The target's index, 0-based in [`Target::ALL`] order.
    pub fn index(self) -> usize {
        self as usize
    }

    /// The name used as a key path suffix (`Source.File.PC`).
    pub fn name(self) -> &'static str {
        match self {
            Target::PC => "PC",
            Target::IPhone => "IPhone",
            Target::IPad => "IPad",
            Target::XBox360 => "XBox360",
            Target::PS3 => "PS3",
        }
    }

    pub fn from_name(name: &str) -> Option<Target> {
        Target::ALL.into_iter().find(|target| target.name() == name)
    }

    /// True for the targets using the mobile (GLES) shader backend.
    pub fn is_gles(self) -> bool {
        PFlags::TARGET_IOS.contains(self.flag())
    }
}

/// The index of the first target in `flags`, see [`Target::index`].
pub fn platform_index(flags: PFlags) -> Option<usize> {
    flags.first_target().map(Target::index)
}

pub fn platform_name_for_flags(flags: PFlags) -> Option<&'static str> {
    flags.first_target().map(Target::name)
}

/// The target flag for a platform name, or empty flags if the name isn't a
/// platform's.
pub fn platform_flags_for_name(name: &str) -> PFlags {
    Target::from_name(name)
        .map(Target::flag)
        .unwrap_or(PFlags::NONE)
}

/// A partition of the live assets. The same entry has a separate asset in
/// each zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Enum)]
pub enum Zone {
    Engine,
    ContentBrowser,
    Cooker,
    /// Assets in this zone are never shared: every lookup creates a new one.
    Unique,
}

/// The position of a sink in an asset's processing pipeline. Lower stages
/// run first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Stage(pub i32);

impl Stage {
    pub const PARSER: Stage = Stage(100);
    pub const LOAD: Stage = Stage(101);
    pub const PROCESS: Stage = Stage(256);
}

/// A cooker's verdict on whether an asset needs to be rebuilt for a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CookStatus {
    UpToDate,
    /// This pass doesn't build the asset, another pass covers it.
    Ignore,
    NeedRebuild,
}
