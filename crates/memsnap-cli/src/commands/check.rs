//! Check command: the sample model against layout versions.

use std::fmt::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Result, bail};
use memsnap_core::{Catalog, CompatReport};

use super::load_catalog;
use crate::model;

pub fn run(layouts: &Path, version: Option<&str>) -> Result<()> {
    let catalog = Arc::new(load_catalog(layouts)?);
    let reports = check(&catalog, version)?;
    print!("{}", render(&reports));

    let failed = reports.iter().filter(|r| !r.is_ok()).count();
    if failed > 0 {
        bail!(
            "{} of {} versions are incompatible with the model",
            failed,
            reports.len()
        );
    }
    Ok(())
}

/// Compatibility of the model with every version, or the one labelled
/// `label`.
pub fn check(catalog: &Arc<Catalog>, label: Option<&str>) -> Result<Vec<CompatReport>> {
    let mut reports = catalog.validate_against(&model::hosts(), &model::polys());
    if let Some(label) = label {
        reports.retain(|r| r.version == label);
        if reports.is_empty() {
            bail!("No version labelled '{}'", label);
        }
    }
    Ok(reports)
}

pub fn render(reports: &[CompatReport]) -> String {
    let mut out = String::new();
    for report in reports {
        if report.is_ok() {
            let _ = writeln!(
                out,
                "{} ({}): OK, {} types bound",
                report.version,
                report.identity,
                report.bound.len()
            );
        } else {
            let _ = writeln!(
                out,
                "{} ({}): {} failures",
                report.version,
                report.identity,
                report.failures.len()
            );
            for failure in &report.failures {
                let _ = writeln!(out, "  {}", failure);
            }
        }
    }
    out
}
