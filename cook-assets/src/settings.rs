// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{fs, path::Path};

use anyhow::{bail, Context};
use packages::{Language, Languages, PFlags, Target};
use serde::{Deserialize, Serialize};

use crate::cli::Options;

pub const DEFAULT_SETTINGS_FILE: &str = "cook-settings.json";

const DEFAULT_COMPRESSION: u32 = 6;

/// The cook settings file, holding the defaults for the options that aren't
/// given on the command line.
///
/// Has enum variants for breaking changes in the format of the settings file,
/// but [`read`] always returns the newest variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "settings_file_version", rename_all = "snake_case")]
pub enum CookSettings {
    V1 {
        #[serde(default)]
        roots: Vec<String>,
        #[serde(default)]
        targets: Vec<String>,
        #[serde(default)]
        languages: Vec<String>,
        #[serde(default)]
        compression: Option<u32>,
    },
}

impl Default for CookSettings {
    fn default() -> Self {
        CookSettings::V1 {
            roots: Vec::new(),
            targets: Vec::new(),
            languages: Vec::new(),
            compression: None,
        }
    }
}

pub fn read(settings: &Path) -> anyhow::Result<CookSettings> {
    if !settings.exists() {
        return Ok(CookSettings::default());
    }
    let settings = fs::read_to_string(settings).context("Failed to open the cook settings file")?;
    serde_json::from_str(&settings).context("Failed to parse the cook settings file")
}

/// What to cook, after merging the command line with the settings file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookPlan {
    /// Empty for every asset.
    pub roots: Vec<String>,
    pub flags: PFlags,
    pub languages: Languages,
    pub compression: u32,
}

/// Command line options replace the settings file's, which replace the
/// defaults: the host target, English, and compression level 6.
pub fn plan(options: &Options, settings: &CookSettings, host: Target) -> anyhow::Result<CookPlan> {
    let CookSettings::V1 {
        roots,
        targets,
        languages,
        compression,
    } = settings;
    let pick = |cli: &[String], file: &[String]| {
        if cli.is_empty() {
            file.to_vec()
        } else {
            cli.to_vec()
        }
    };

    let mut flags = PFlags::NONE;
    for name in pick(&options.targets, targets) {
        let Some(target) = Target::ALL.into_iter().find(|t| t.name().eq_ignore_ascii_case(&name)) else {
            bail!("Unknown target {name:?}");
        };
        flags |= target.flag();
    }
    if flags.is_empty() {
        flags = host.flag();
    }
    if options.clean {
        flags |= PFlags::CLEAN;
    }
    if options.scripts_only {
        flags |= PFlags::SCRIPTS_ONLY;
    }

    let mut cooked_languages = Languages::NONE;
    for code in pick(&options.languages, languages) {
        let Some(language) = Language::from_code(&code) else {
            bail!("Unknown language {code:?}");
        };
        cooked_languages.insert(language);
    }
    if cooked_languages.is_empty() {
        cooked_languages = Languages::ENGLISH;
    }

    let compression = options.compression.or(*compression).unwrap_or(DEFAULT_COMPRESSION);
    if compression > 9 {
        bail!("The compression level must be between 0 and 9, not {compression}");
    }

    Ok(CookPlan {
        roots: pick(&options.assets, roots),
        flags,
        languages: cooked_languages,
        compression,
    })
}
