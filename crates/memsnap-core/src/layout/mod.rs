//! Layout catalog.
//!
//! This module loads declarative layout descriptions and answers type and
//! symbol queries for a specific foreign build:
//!
//! - **File format**: JSON or TOML files of enums, bitfields, records and globals
//! - **Versions**: identity-keyed tables with per-version overrides and container ABI
//! - **Lookups**: dotted global paths with indices, records by name

pub mod abi;
mod catalog;
mod expr;
mod file;
mod path;
mod types;

pub use abi::{Abi, BufferHeader, LengthMode, SequenceHeader, SharedHeader};
pub use catalog::{Catalog, LoadReport, ResolvedSymbol};
pub use expr::parse_type;
pub use file::{LayoutFile, Num};
pub use path::{Segment, SymbolPath};
pub use types::{
    BitFlag, BitfieldDesc, Discriminator, DiscriminatorKind, EnumDesc, FieldDesc, Global,
    Identity, Primitive, RecordDesc, ScalarClass, TypeDesc, Version,
};
