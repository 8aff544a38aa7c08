// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use enum_map::Enum;

/// A language localized assets can be cooked for. English is the base
/// language: its variant of a localized file has no language suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Enum)]
pub enum Language {
    English,
    French,
    Italian,
    German,
    Spanish,
    Russian,
    Japanese,
    Chinese,
}

impl Language {
    pub const ALL: [Language; 8] = [
        Language::English,
        Language::French,
        Language::Italian,
        Language::German,
        Language::Spanish,
        Language::Russian,
        Language::Japanese,
        Language::Chinese,
    ];

    /// The code used in file name suffixes (`_fr`) and on the command line.
    pub fn code(self) -> &'static str {
        match self {
            Language::English => "en",
            Language::French => "fr",
            Language::Italian => "it",
            Language::German => "gr",
            Language::Spanish => "sp",
            Language::Russian => "ru",
            Language::Japanese => "jp",
            Language::Chinese => "ch",
        }
    }

    pub fn from_code(code: &str) -> Option<Language> {
        Language::ALL
            .into_iter()
            .find(|lang| lang.code().eq_ignore_ascii_case(code))
    }

    /// Inserts the language suffix before the extension of `path`:
    /// `Textures/sign.png` becomes `Textures/sign_fr.png`. English paths are
    /// returned as-is.
    pub fn localize_path(self, path: &str) -> String {
        if self == Language::English {
            return path.to_string();
        }
        match file_system::split_extension(path) {
            (base, Some(ext)) => format!("{base}_{}.{ext}", self.code()),
            (base, None) => format!("{base}_{}", self.code()),
        }
    }
}

/// A set of [`Language`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Languages(u16);

impl Languages {
    pub const NONE: Languages = Languages(0);
    pub const ENGLISH: Languages = Languages(1);

    pub fn insert(&mut self, language: Language) {
        self.0 |= 1 << language as u16;
    }

    pub fn contains(self, language: Language) -> bool {
        self.0 & (1 << language as u16) != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = Language> {
        Language::ALL
            .into_iter()
            .filter(move |lang| self.contains(*lang))
    }

    /// The upper case language codes joined with `;`, used to detect changes
    /// in the set of cooked languages.
    pub fn cache_string(self) -> String {
        self.iter()
            .map(|lang| lang.code().to_uppercase())
            .collect::<Vec<_>>()
            .join(";")
    }
}

impl FromIterator<Language> for Languages {
    fn from_iter<T: IntoIterator<Item = Language>>(iter: T) -> Self {
        let mut languages = Languages::NONE;
        for language in iter {
            languages.insert(language);
        }
        languages
    }
}
