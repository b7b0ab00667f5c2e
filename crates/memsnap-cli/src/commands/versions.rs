//! Versions command implementation.

use std::fmt::Write;
use std::path::Path;

use anyhow::Result;
use memsnap_core::Catalog;

use super::load_catalog;

pub fn run(layouts: &Path) -> Result<()> {
    let catalog = load_catalog(layouts)?;
    print!("{}", render(&catalog));
    Ok(())
}

/// One line per version, in identity order.
pub fn render(catalog: &Catalog) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{:<20} {:<16} SOURCE", "IDENTITY", "LABEL");
    for version in catalog.all_versions() {
        let _ = writeln!(
            out,
            "{:<20} {:<16} {}",
            version.identity.to_string(),
            version.label,
            version.source.display()
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::tests::layouts_dir;

    #[test]
    fn test_lists_demo_versions() {
        let catalog = load_catalog(&layouts_dir()).unwrap();
        let text = render(&catalog);
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("d3e01000"));
        assert!(lines[1].contains("demo-1.0"));
        assert!(lines[2].contains("demo-1.1"));
        assert!(lines[2].ends_with("demo.json"));
    }

    #[test]
    fn test_empty_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_catalog(dir.path()).is_err());
    }
}
