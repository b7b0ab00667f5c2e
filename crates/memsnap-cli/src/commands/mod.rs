//! CLI command implementations.

pub mod check;
pub mod export;
pub mod identity;
pub mod snapshot;
pub mod versions;
pub mod watch;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use memsnap_core::{Catalog, EngineConfig, ReaderFactory, TracingLog};
use tracing::{info, warn};

/// Load every layout file in `dir`; malformed files are skipped.
pub fn load_catalog(dir: &Path) -> Result<Catalog> {
    let (catalog, report) = Catalog::load_directory(dir, &TracingLog)
        .with_context(|| format!("Failed to read layout directory {}", dir.display()))?;
    for (file, reason) in &report.skipped {
        warn!("Skipped {}: {}", file.display(), reason);
    }
    if catalog.is_empty() {
        bail!("No layout versions found in {}", dir.display());
    }
    info!(
        "Loaded {} versions from {} files",
        report.versions_loaded, report.files_loaded
    );
    Ok(catalog)
}

pub fn factory(dir: &Path, config: EngineConfig) -> Result<ReaderFactory> {
    Ok(ReaderFactory::new(Arc::new(load_catalog(dir)?), config))
}
