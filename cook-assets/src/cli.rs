// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::path::PathBuf;

use bpaf::{batteries::verbose_by_slice, construct, long, positional, OptionParser, Parser, ShellComp};
use tracing::level_filters::LevelFilter;

#[derive(Debug, Clone)]
pub struct Options {
    pub verbosity_level: LevelFilter,
    pub root: PathBuf,
    pub settings: Option<PathBuf>,
    pub targets: Vec<String>,
    pub languages: Vec<String>,
    pub compression: Option<u32>,
    pub threads: Option<usize>,
    pub clean: bool,
    pub scripts_only: bool,
    pub assets: Vec<String>,
}

pub fn options() -> OptionParser<Options> {
    let verbosity_level = verbose_by_slice(
        3,
        [
            LevelFilter::OFF,
            LevelFilter::ERROR,
            LevelFilter::WARN,
            LevelFilter::INFO,
            LevelFilter::DEBUG,
            LevelFilter::TRACE,
        ],
    );

    let root = long("root")
        .help("The game directory, with the Packages directory in it")
        .argument::<PathBuf>("DIR")
        .complete_shell(ShellComp::Dir { mask: None })
        .fallback(PathBuf::from("."));

    let settings = long("settings")
        .help("The cook settings file, cook-settings.json in the game directory by default")
        .argument::<PathBuf>("FILE")
        .complete_shell(ShellComp::File { mask: Some("*.json") })
        .optional();

    let targets = long("target")
        .short('t')
        .help("A platform to cook for: PC, IPhone, IPad, XBox360 or PS3. Can be repeated")
        .argument::<String>("TARGET")
        .many();

    let languages = long("language")
        .short('l')
        .help("A language to cook, by code (en, fr, it, gr, sp, ru, jp, ch). Can be repeated")
        .argument::<String>("CODE")
        .many();

    let compression = long("compression")
        .short('z')
        .help("The deflate level of the pak files, 0 to store them uncompressed")
        .argument::<u32>("LEVEL")
        .guard(|level| *level <= 9, "the compression level must be between 0 and 9")
        .optional();

    let threads = long("threads")
        .short('j')
        .help("The number of cook threads, one per core by default")
        .argument::<usize>("N")
        .guard(|threads| *threads > 0, "at least one thread is needed")
        .optional();

    let clean = long("clean")
        .help("Deletes the previous cook output and rebuilds everything")
        .switch();

    let scripts_only = long("scripts-only")
        .help("Only rebuilds the pak files")
        .switch();

    let assets = positional::<String>("ASSET")
        .help("The root assets to cook, as Package/Name paths. Every asset by default")
        .many();

    construct!(Options {
        verbosity_level,
        root,
        settings,
        targets,
        languages,
        compression,
        threads,
        clean,
        scripts_only,
        assets,
    })
    .to_options()
    .descr("Cooks asset packages into pak files")
}

#[cfg(test)]
mod tests {
    use super::options;

    #[test]
    fn check_bpaf_invariants() {
        options().check_invariants(true);
    }

    #[test]
    fn parses_repeated_targets() {
        let options = options()
            .run_inner(&["-t", "PC", "--target", "IPhone", "-z", "6", "World/Rock"])
            .unwrap();
        assert_eq!(vec!["PC", "IPhone"], options.targets);
        assert_eq!(Some(6), options.compression);
        assert_eq!(vec!["World/Rock"], options.assets);
        assert!(!options.clean);
        assert!(super::options().run_inner(&["-z", "10"]).is_err());
    }
}
