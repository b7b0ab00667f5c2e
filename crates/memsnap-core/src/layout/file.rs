//! On-disk layout description format (JSON or TOML) and its compilation
//! into per-version tables.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};

use super::abi::Abi;
use super::expr::{classify, parse_type};
use super::types::{
    BitFlag, BitfieldDesc, Discriminator, DiscriminatorKind, EnumDesc, FieldDesc, Global,
    Identity, RecordDesc, TypeDesc, Version, align_up,
};
use crate::error::{Error, Result};

/// Unsigned number written either as an integer or as a `0x` hex string.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Num(pub u64);

impl<'de> Deserialize<'de> for Num {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct NumVisitor;

        impl Visitor<'_> for NumVisitor {
            type Value = Num;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an unsigned integer or a hex string")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<Num, E> {
                Ok(Num(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<Num, E> {
                u64::try_from(v)
                    .map(Num)
                    .map_err(|_| E::custom(format!("negative value {}", v)))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Num, E> {
                let v = v.trim();
                let parsed = match v.strip_prefix("0x").or_else(|| v.strip_prefix("0X")) {
                    Some(hex) => u64::from_str_radix(hex, 16),
                    None => v.parse(),
                };
                parsed
                    .map(Num)
                    .map_err(|e| E::custom(format!("invalid number '{}': {}", v, e)))
            }
        }

        deserializer.deserialize_any(NumVisitor)
    }
}

impl Serialize for Num {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{:#x}", self.0))
    }
}

impl Num {
    fn as_usize(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LayoutFile {
    #[serde(default)]
    pub versions: Vec<VersionEntry>,
    #[serde(default)]
    pub enums: Vec<EnumEntry>,
    #[serde(default)]
    pub bitfields: Vec<BitfieldEntry>,
    #[serde(default)]
    pub records: Vec<RecordEntry>,
    #[serde(default)]
    pub globals: Vec<GlobalEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VersionEntry {
    pub identity: String,
    pub label: String,
    #[serde(default)]
    pub base: Num,
    #[serde(default)]
    pub abi: Abi,
    /// Global path -> address.
    #[serde(default)]
    pub globals: BTreeMap<String, Num>,
    /// Concrete record -> vtable address.
    #[serde(default)]
    pub vtables: BTreeMap<String, Num>,
    /// `record.field` -> offset override.
    #[serde(default)]
    pub offsets: BTreeMap<String, Num>,
    /// Record -> size override.
    #[serde(default)]
    pub sizes: BTreeMap<String, Num>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnumEntry {
    pub name: String,
    pub size: usize,
    pub values: Vec<EnumValue>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnumValue {
    pub label: String,
    pub value: i64,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BitfieldEntry {
    pub name: String,
    pub size: usize,
    pub flags: Vec<FlagEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FlagEntry {
    pub label: String,
    pub offset: u32,
    #[serde(default = "one")]
    pub width: u32,
}

fn one() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecordEntry {
    pub name: String,
    #[serde(default)]
    pub base: Option<String>,
    #[serde(default)]
    pub size: Option<Num>,
    #[serde(default)]
    pub align: Option<usize>,
    #[serde(default)]
    pub fields: Vec<FieldEntry>,
    #[serde(default)]
    pub discriminator: Option<DiscriminatorEntry>,
    #[serde(default)]
    pub discriminant: Option<Num>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldEntry {
    pub name: String,
    pub offset: Num,
    #[serde(rename = "type")]
    pub ty: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscriminatorKindEntry {
    #[default]
    Value,
    Vtable,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DiscriminatorEntry {
    #[serde(default)]
    pub offset: Num,
    #[serde(default)]
    pub size: Option<usize>,
    #[serde(default)]
    pub kind: DiscriminatorKindEntry,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GlobalEntry {
    pub path: String,
    #[serde(rename = "type")]
    pub ty: String,
}

impl LayoutFile {
    /// Read a layout file; the format is chosen by extension.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let parse_error = |message: String| Error::LayoutParse {
            file: path.to_path_buf(),
            message,
        };
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&content).map_err(|e| parse_error(e.to_string())),
            Some("toml") => toml::from_str(&content).map_err(|e| parse_error(e.to_string())),
            other => Err(parse_error(format!("unsupported extension {:?}", other))),
        }
    }

    /// Compile every version this file declares.
    pub fn compile(&self, source: &Path) -> Result<Vec<Version>> {
        Compiler::new(self, source)
            .and_then(|c| c.versions())
            .map_err(|message| Error::LayoutParse {
                file: source.to_path_buf(),
                message,
            })
    }
}

/// Version-independent part of a file, with every type expression parsed.
struct Compiler<'a> {
    file: &'a LayoutFile,
    source: PathBuf,
    enums: HashMap<String, EnumDesc>,
    bitfields: HashMap<String, BitfieldDesc>,
    records: HashMap<String, RecordDesc>,
    declared_sizes: HashMap<String, usize>,
    globals: BTreeMap<String, TypeDesc>,
}

impl<'a> Compiler<'a> {
    fn new(file: &'a LayoutFile, source: &Path) -> std::result::Result<Self, String> {
        let mut seen = HashSet::new();
        let names = file
            .enums
            .iter()
            .map(|e| &e.name)
            .chain(file.bitfields.iter().map(|b| &b.name))
            .chain(file.records.iter().map(|r| &r.name));
        for name in names {
            if !seen.insert(name.as_str()) {
                return Err(format!("type '{}' declared more than once", name));
            }
        }

        let enum_names: HashSet<String> = file.enums.iter().map(|e| e.name.clone()).collect();
        let bitfield_names: HashSet<String> =
            file.bitfields.iter().map(|b| b.name.clone()).collect();
        let record_names: HashSet<String> = file.records.iter().map(|r| r.name.clone()).collect();
        let parse = |text: &str, context: &str| {
            parse_type(text)
                .and_then(|t| classify(t, &enum_names, &bitfield_names, &record_names))
                .map_err(|e| format!("{}: {}", context, e))
        };

        let mut enums = HashMap::new();
        for entry in &file.enums {
            if !matches!(entry.size, 1 | 2 | 4 | 8) {
                return Err(format!(
                    "enumeration '{}' has invalid size {}",
                    entry.name, entry.size
                ));
            }
            enums.insert(
                entry.name.clone(),
                EnumDesc {
                    name: entry.name.clone(),
                    size: entry.size,
                    values: entry
                        .values
                        .iter()
                        .map(|v| (v.label.clone(), v.value))
                        .collect(),
                },
            );
        }

        let mut bitfields = HashMap::new();
        for entry in &file.bitfields {
            if !matches!(entry.size, 1 | 2 | 4 | 8) {
                return Err(format!(
                    "bitfield '{}' has invalid size {}",
                    entry.name, entry.size
                ));
            }
            let bits = entry.size as u32 * 8;
            for flag in &entry.flags {
                if flag.width == 0 || flag.offset + flag.width > bits {
                    return Err(format!(
                        "bitfield '{}': flag '{}' does not fit in {} bits",
                        entry.name, flag.label, bits
                    ));
                }
            }
            bitfields.insert(
                entry.name.clone(),
                BitfieldDesc {
                    name: entry.name.clone(),
                    size: entry.size,
                    flags: entry
                        .flags
                        .iter()
                        .map(|f| BitFlag {
                            label: f.label.clone(),
                            offset: f.offset,
                            width: f.width,
                        })
                        .collect(),
                },
            );
        }

        let mut records = HashMap::new();
        let mut declared_sizes = HashMap::new();
        for entry in &file.records {
            if let Some(base) = &entry.base {
                if !record_names.contains(base) {
                    return Err(format!(
                        "record '{}' derives from unknown record '{}'",
                        entry.name, base
                    ));
                }
            }

            let mut fields = Vec::with_capacity(entry.fields.len());
            for field in &entry.fields {
                let context = format!("{}.{}", entry.name, field.name);
                if fields.iter().any(|f: &FieldDesc| f.name == field.name) {
                    return Err(format!("{}: field declared more than once", context));
                }
                fields.push(FieldDesc {
                    name: field.name.clone(),
                    offset: field.offset.as_usize(),
                    ty: parse(&field.ty, &context)?,
                });
            }

            let discriminator = entry.discriminator.as_ref().map(|d| Discriminator {
                offset: d.offset.as_usize(),
                size: d.size.unwrap_or(0),
                kind: match d.kind {
                    DiscriminatorKindEntry::Value => DiscriminatorKind::Value,
                    DiscriminatorKindEntry::Vtable => DiscriminatorKind::Vtable,
                },
            });

            if let Some(size) = entry.size {
                declared_sizes.insert(entry.name.clone(), size.as_usize());
            }
            records.insert(
                entry.name.clone(),
                RecordDesc {
                    name: entry.name.clone(),
                    base: entry.base.clone(),
                    size: 0,
                    align: entry.align.unwrap_or(0),
                    fields,
                    discriminator,
                    discriminant: entry.discriminant.map(|n| n.0),
                },
            );
        }

        let mut globals = BTreeMap::new();
        for entry in &file.globals {
            let ty = parse(&entry.ty, &entry.path)?;
            if globals.insert(entry.path.clone(), ty).is_some() {
                return Err(format!("global '{}' declared more than once", entry.path));
            }
        }

        Ok(Self {
            file,
            source: source.to_path_buf(),
            enums,
            bitfields,
            records,
            declared_sizes,
            globals,
        })
    }

    fn versions(&self) -> std::result::Result<Vec<Version>, String> {
        self.file.versions.iter().map(|v| self.version(v)).collect()
    }

    fn version(&self, entry: &VersionEntry) -> std::result::Result<Version, String> {
        let context = |message: String| format!("version '{}': {}", entry.label, message);
        let identity = Identity::from_hex(&entry.identity)
            .map_err(|e| context(format!("invalid identity: {}", e)))?;
        entry.abi.validate().map_err(context)?;

        let mut records = self.records.clone();
        let mut declared_sizes = self.declared_sizes.clone();

        for (key, offset) in &entry.offsets {
            let (record, field) = key
                .split_once('.')
                .ok_or_else(|| context(format!("offset override '{}' is not record.field", key)))?;
            let target = records
                .get_mut(record)
                .and_then(|r| r.fields.iter_mut().find(|f| f.name == field))
                .ok_or_else(|| context(format!("offset override for unknown field '{}'", key)))?;
            target.offset = offset.as_usize();
        }
        for (record, size) in &entry.sizes {
            if !records.contains_key(record) {
                return Err(context(format!("size override for unknown record '{}'", record)));
            }
            declared_sizes.insert(record.clone(), size.as_usize());
        }

        check_base_cycles(&records).map_err(context)?;

        let mut sizer = Sizer {
            abi: &entry.abi,
            records: &records,
            enums: &self.enums,
            bitfields: &self.bitfields,
            declared: &declared_sizes,
            sizes: HashMap::new(),
            aligns: HashMap::new(),
            visiting: HashSet::new(),
        };
        let mut names: Vec<&String> = records.keys().collect();
        names.sort();
        let mut geometry = HashMap::new();
        for name in names {
            let size = sizer.record_size(name).map_err(context)?;
            let align = sizer.record_align(name).map_err(context)?;
            geometry.insert(name.clone(), (size, align));
        }
        for (name, (size, align)) in geometry {
            if let Some(record) = records.get_mut(&name) {
                record.size = size;
                record.align = align;
            }
        }

        let mut version = Version {
            identity,
            label: entry.label.clone(),
            base: entry.base.0,
            abi: entry.abi,
            source: self.source.clone(),
            records: HashMap::new(),
            enums: self.enums.clone(),
            bitfields: self.bitfields.clone(),
            globals: BTreeMap::new(),
            vtables: HashMap::new(),
        };

        for (name, record) in records {
            version.records.insert(name, Arc::new(record));
        }
        for record in version.records.values() {
            check_field_extents(&version, record).map_err(context)?;
        }

        for (path, address) in &entry.globals {
            let ty = self
                .globals
                .get(path)
                .ok_or_else(|| context(format!("address given for undeclared global '{}'", path)))?;
            version.globals.insert(
                path.clone(),
                Global {
                    path: path.clone(),
                    ty: ty.clone(),
                    address: address.0,
                },
            );
        }
        for (record, address) in &entry.vtables {
            if !version.records.contains_key(record) {
                return Err(context(format!("vtable for unknown record '{}'", record)));
            }
            version.vtables.insert(record.clone(), address.0);
        }

        finish_discriminators(&mut version).map_err(context)?;
        Ok(version)
    }
}

fn check_base_cycles(records: &HashMap<String, RecordDesc>) -> std::result::Result<(), String> {
    for start in records.keys() {
        let mut seen = HashSet::new();
        let mut current = Some(start.as_str());
        while let Some(name) = current {
            if !seen.insert(name) {
                return Err(format!("record '{}' has a cyclic base chain", start));
            }
            current = records.get(name).and_then(|r| r.base.as_deref());
        }
    }
    Ok(())
}

/// Every field must fit inside its record.
fn check_field_extents(version: &Version, record: &RecordDesc) -> std::result::Result<(), String> {
    for field in &record.fields {
        let end = field.offset + version.size_of(&field.ty)?;
        if end > record.size {
            return Err(format!(
                "field {}.{} ends at {:#x}, past record size {:#x}",
                record.name, field.name, end, record.size
            ));
        }
    }
    if let Some(base) = &record.base {
        let base_size = version.record(base).map(|b| b.size).unwrap_or(0);
        if base_size > record.size {
            return Err(format!(
                "record '{}' ({:#x} bytes) is smaller than its base '{}' ({:#x} bytes)",
                record.name, record.size, base, base_size
            ));
        }
    }
    Ok(())
}

/// Fill in default discriminator widths and check that each polymorphic
/// base maps every discriminant to at most one concrete record.
fn finish_discriminators(version: &mut Version) -> std::result::Result<(), String> {
    let pointer_size = version.abi.pointer_size;
    let names: Vec<String> = version.records.keys().cloned().collect();
    for name in &names {
        let Some(record) = version.records.get_mut(name) else {
            continue;
        };
        if let Some(d) = record.discriminator {
            let size = match (d.kind, d.size) {
                (DiscriminatorKind::Vtable, _) => pointer_size,
                (DiscriminatorKind::Value, 0) => 4,
                (DiscriminatorKind::Value, size) if matches!(size, 1 | 2 | 4 | 8) => size,
                (DiscriminatorKind::Value, size) => {
                    return Err(format!("record '{}': invalid discriminator size {}", name, size));
                }
            };
            if d.offset + size > record.size {
                return Err(format!(
                    "record '{}': discriminator lies outside the record",
                    name
                ));
            }
            Arc::make_mut(record).discriminator = Some(Discriminator { size, ..d });
        }
    }

    let mut claimed: HashMap<(String, u64), String> = HashMap::new();
    let mut sorted = names;
    sorted.sort();
    for name in &sorted {
        let chain = version.base_chain(name);
        let Some(root) = chain.iter().rev().find(|r| r.discriminator.is_some()) else {
            if version.records[name].discriminant.is_some() {
                return Err(format!(
                    "record '{}' has a discriminant but no polymorphic base",
                    name
                ));
            }
            continue;
        };
        let kind = root.discriminator.map(|d| d.kind);
        let value = match kind {
            Some(DiscriminatorKind::Vtable) => version.vtable(name),
            _ => version.records[name].discriminant,
        };
        if let Some(value) = value {
            let key = (root.name.clone(), value);
            if let Some(previous) = claimed.insert(key, name.clone()) {
                return Err(format!(
                    "discriminator {:#x} of '{}' claimed by both '{}' and '{}'",
                    value, root.name, previous, name
                ));
            }
        }
    }
    Ok(())
}

/// Computes record sizes and alignments, following by-value record fields.
struct Sizer<'a> {
    abi: &'a Abi,
    records: &'a HashMap<String, RecordDesc>,
    enums: &'a HashMap<String, EnumDesc>,
    bitfields: &'a HashMap<String, BitfieldDesc>,
    declared: &'a HashMap<String, usize>,
    sizes: HashMap<String, usize>,
    aligns: HashMap<String, usize>,
    visiting: HashSet<String>,
}

impl Sizer<'_> {
    fn record_size(&mut self, name: &str) -> std::result::Result<usize, String> {
        if let Some(size) = self.sizes.get(name) {
            return Ok(*size);
        }
        if let Some(size) = self.declared.get(name) {
            self.sizes.insert(name.to_string(), *size);
            return Ok(*size);
        }
        if !self.visiting.insert(name.to_string()) {
            return Err(format!("record '{}' contains itself by value", name));
        }
        let record = self
            .records
            .get(name)
            .ok_or_else(|| format!("unknown record '{}'", name))?;

        let mut end = match &record.base {
            Some(base) => self.record_size(base)?,
            None => 0,
        };
        for field in &record.fields {
            end = end.max(field.offset + self.type_size(&field.ty)?);
        }
        let size = align_up(end, self.record_align(name)?);

        self.visiting.remove(name);
        self.sizes.insert(name.to_string(), size);
        Ok(size)
    }

    fn record_align(&mut self, name: &str) -> std::result::Result<usize, String> {
        if let Some(align) = self.aligns.get(name) {
            return Ok(*align);
        }
        let record = self
            .records
            .get(name)
            .ok_or_else(|| format!("unknown record '{}'", name))?;
        if record.align > 0 {
            return Ok(record.align);
        }
        if !self.visiting.insert(format!("align:{}", name)) {
            return Err(format!("record '{}' contains itself by value", name));
        }

        let mut align = 1;
        if let Some(base) = &record.base {
            align = align.max(self.record_align(base)?);
        }
        if record.discriminator.is_some() {
            align = align.max(self.abi.pointer_size);
        }
        for field in &record.fields {
            align = align.max(self.type_align(&field.ty)?);
        }

        self.visiting.remove(&format!("align:{}", name));
        self.aligns.insert(name.to_string(), align);
        Ok(align)
    }

    fn type_size(&mut self, ty: &TypeDesc) -> std::result::Result<usize, String> {
        let abi = self.abi;
        Ok(match ty {
            TypeDesc::Primitive(p) => p.size(abi),
            TypeDesc::Enum(name) => self.enums.get(name).map(|e| e.size).unwrap_or(0),
            TypeDesc::Bitfield(name) => self.bitfields.get(name).map(|b| b.size).unwrap_or(0),
            TypeDesc::Record(name) => self.record_size(name)?,
            TypeDesc::Array { elem, len } => self.type_size(elem)? * len,
            TypeDesc::Vector(_) => abi.vector.size,
            TypeDesc::Map { .. } => abi.map.size,
            TypeDesc::Pointer(_) | TypeDesc::Weak(_) => abi.pointer_size,
            TypeDesc::Shared(_) => abi.shared.size,
            TypeDesc::Flags => abi.flags.size,
        })
    }

    fn type_align(&mut self, ty: &TypeDesc) -> std::result::Result<usize, String> {
        Ok(match ty {
            TypeDesc::Primitive(p) => p.align(self.abi),
            TypeDesc::Enum(_) | TypeDesc::Bitfield(_) => self.type_size(ty)?.max(1),
            TypeDesc::Record(name) => self.record_align(name)?,
            TypeDesc::Array { elem, .. } => self.type_align(elem)?,
            _ => self.abi.pointer_size,
        })
    }
}
