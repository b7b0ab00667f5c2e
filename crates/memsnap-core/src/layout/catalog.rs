//! Layout catalog: every known version, indexed by process identity.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use super::file::LayoutFile;
use super::path::SymbolPath;
use super::types::{Global, Identity, RecordDesc, TypeDesc, Version};
use crate::collab::LogSink;
use crate::error::{Error, Result};

/// A global symbol resolved to a typed address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSymbol {
    pub path: String,
    pub ty: TypeDesc,
    /// Address relative to the process base offset (version base applied).
    pub address: u64,
}

/// Summary of a directory load.
#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    pub files_loaded: usize,
    pub versions_loaded: usize,
    pub skipped: Vec<(PathBuf, String)>,
    pub duplicates: Vec<(PathBuf, String)>,
}

#[derive(Debug, Default)]
pub struct Catalog {
    versions: BTreeMap<Identity, Arc<Version>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every `.json` and `.toml` file in `path`.
    ///
    /// Malformed files are reported through `log` and skipped. A version
    /// identity already present keeps its first definition.
    pub fn load_directory<P: AsRef<Path>>(path: P, log: &dyn LogSink) -> Result<(Self, LoadReport)> {
        let path = path.as_ref();
        let mut entries: Vec<PathBuf> = fs::read_dir(path)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.is_file()
                    && matches!(
                        p.extension().and_then(|e| e.to_str()),
                        Some("json") | Some("toml")
                    )
            })
            .collect();
        entries.sort();

        let mut catalog = Self::new();
        let mut report = LoadReport::default();
        for file in entries {
            match LayoutFile::load(&file).and_then(|layout| layout.compile(&file)) {
                Ok(versions) => {
                    report.files_loaded += 1;
                    for version in versions {
                        let label = version.label.clone();
                        if catalog.insert(version) {
                            report.versions_loaded += 1;
                        } else {
                            log.warn(&format!(
                                "Duplicate layout identity for '{}' in {}; keeping the first definition",
                                label,
                                file.display()
                            ));
                            report.duplicates.push((file.clone(), label));
                        }
                    }
                }
                Err(e) => {
                    log.error(&format!("Skipping layout file {}: {}", file.display(), e));
                    report.skipped.push((file.clone(), e.to_string()));
                }
            }
        }

        info!(
            "Loaded {} layout versions from {} files ({} skipped)",
            report.versions_loaded,
            report.files_loaded,
            report.skipped.len()
        );
        Ok((catalog, report))
    }

    /// Catalog of the versions of a single layout file.
    pub fn from_layout(file: &LayoutFile, source: &Path) -> Result<Self> {
        let mut catalog = Self::new();
        for version in file.compile(source)? {
            catalog.insert(version);
        }
        Ok(catalog)
    }

    /// Add a version; returns `false` if its identity is already known.
    pub fn insert(&mut self, version: Version) -> bool {
        if self.versions.contains_key(&version.identity) {
            return false;
        }
        debug!(
            "Registered layout version '{}' ({})",
            version.label, version.identity
        );
        self.versions
            .insert(version.identity.clone(), Arc::new(version));
        true
    }

    /// Versions in identity order.
    pub fn all_versions(&self) -> impl Iterator<Item = &Arc<Version>> {
        self.versions.values()
    }

    pub fn version(&self, identity: &Identity) -> Option<&Arc<Version>> {
        self.versions.get(identity)
    }

    pub fn version_by_label(&self, label: &str) -> Option<&Arc<Version>> {
        self.versions.values().find(|v| v.label == label)
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    /// Resolve a dotted path with optional indices to a typed address.
    ///
    /// The longest declared global that prefixes the path is taken; the
    /// remaining segments descend into record fields and fixed arrays.
    pub fn lookup_global(&self, version: &Version, path: &str) -> Result<ResolvedSymbol> {
        let unknown = |message: String| Error::UnknownSymbol {
            version: version.label.clone(),
            path: path.to_string(),
            message,
        };
        let parsed = SymbolPath::parse(path).map_err(&unknown)?;

        let (consumed, global) = (1..=parsed.segments.len())
            .rev()
            .filter(|&count| parsed.prefix_is_plain(count))
            .find_map(|count| {
                version
                    .global(&parsed.prefix_name(count))
                    .map(|g: &Global| (count, g))
            })
            .ok_or_else(|| unknown("no declared global prefixes this path".to_string()))?;

        let mut ty = global.ty.clone();
        let mut address = version.base.wrapping_add(global.address);
        address = apply_indices(
            version,
            &mut ty,
            address,
            &parsed.segments[consumed - 1].indices,
        )
        .map_err(&unknown)?;

        for segment in &parsed.segments[consumed..] {
            let record = match &ty {
                TypeDesc::Record(name) => name.clone(),
                other => {
                    return Err(unknown(format!(
                        "cannot select field '{}' of {} '{}'",
                        segment.name,
                        other.kind_name(),
                        other
                    )));
                }
            };
            let field = version.find_field(&record, &segment.name).ok_or_else(|| {
                unknown(format!("record '{}' has no field '{}'", record, segment.name))
            })?;
            address = address.wrapping_add(field.offset as u64);
            ty = field.ty.clone();
            address = apply_indices(version, &mut ty, address, &segment.indices).map_err(&unknown)?;
        }

        Ok(ResolvedSymbol {
            path: parsed.to_string(),
            ty,
            address,
        })
    }

    /// Record descriptor by name, used for polymorphic dispatch.
    pub fn lookup_record(&self, version: &Version, name: &str) -> Result<Arc<RecordDesc>> {
        version
            .record(name)
            .cloned()
            .ok_or_else(|| Error::UnknownType {
                version: version.label.clone(),
                name: name.to_string(),
            })
    }
}

fn apply_indices(
    version: &Version,
    ty: &mut TypeDesc,
    mut address: u64,
    indices: &[usize],
) -> std::result::Result<u64, String> {
    for &index in indices {
        let (elem, len) = match ty {
            TypeDesc::Array { elem, len } => (elem.as_ref().clone(), *len),
            other => {
                return Err(format!(
                    "cannot index {} '{}' statically",
                    other.kind_name(),
                    other
                ));
            }
        };
        if index >= len {
            return Err(format!("index {} out of bounds for extent {}", index, len));
        }
        let stride = version.size_of(&elem)?;
        address = address.wrapping_add((index * stride) as u64);
        *ty = elem;
    }
    Ok(address)
}
