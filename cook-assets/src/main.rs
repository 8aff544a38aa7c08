// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

mod cli;
mod settings;

use std::sync::Arc;

use anyhow::Context;
use file_system::NativeFileSystem;
use packages::{assets, PackageMan, PackageManConfig};
use tracing::{info, warn};

fn main() -> anyhow::Result<()> {
    let options = cli::options().run();

    tracing_subscriber::fmt()
        .with_max_level(options.verbosity_level)
        .init();

    let settings_path = options
        .settings
        .clone()
        .unwrap_or_else(|| options.root.join(settings::DEFAULT_SETTINGS_FILE));
    let settings = settings::read(&settings_path)?;

    let mut config = PackageManConfig::default();
    if let Some(threads) = options.threads {
        config.cook_threads = threads;
    }
    let plan = settings::plan(&options, &settings, config.host)?;

    let fs = NativeFileSystem::new(&options.root).context("Failed to open the game directory")?;
    let man = PackageMan::new(Arc::new(fs), config);
    man.initialize().context("Failed to load the key schemas")?;
    let _bindings = assets::bind_all(&man).context("Failed to bind the asset types")?;
    man.load_all().context("Failed to load the packages")?;

    let roots = if plan.roots.is_empty() {
        let mut roots = Vec::new();
        for package in man.packages() {
            for entry in package.entries() {
                if man.has_cooker(entry.asset_type()) {
                    roots.push(entry.path());
                }
            }
        }
        roots
    } else {
        plan.roots.clone()
    };
    if roots.is_empty() && !plan.flags.contains(packages::PFlags::SCRIPTS_ONLY) {
        warn!("There are no assets to cook.");
    }

    let report = man
        .cook(&roots, plan.flags, plan.languages, plan.compression)
        .context("Cooking failed")?;
    for pak in &report.paks {
        info!(pak = %pak, "built");
    }
    info!(
        "Cooked {} assets, {} were up to date. Finished in {:.1} seconds.",
        report.compiled,
        report.up_to_date,
        report.elapsed.as_secs_f32(),
    );

    Ok(())
}
