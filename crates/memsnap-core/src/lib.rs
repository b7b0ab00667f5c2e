//! # memsnap-core
//!
//! Live memory snapshot engine.
//!
//! This crate reads typed, possibly cyclic object graphs out of another
//! process's memory and materializes them as host values:
//! - Versioned layout catalog (records, enums, bitfields, globals, container ABI)
//! - Process abstraction over in-memory images and live Linux processes
//! - Ceiling-bounded read vectorization
//! - Host types bound to foreign records through declarative field maps
//! - Two-phase snapshot sessions with shared-object dedup and cancellation
//!
//! ## Feature Flags
//!
//! - `live`: Enables the `/proc`-based Linux transport (`process::live`).

pub mod collab;
pub mod config;
pub mod error;
pub mod layout;
pub mod process;
pub mod reader;
pub mod session;
pub mod vectorize;

pub use collab::{
    CollectingLog, FingerprintProvider, FnSink, LogLevel, LogSink, MemorySource, NoGate,
    PauseGate, SettingsOracle, SnapshotSink, StaticFingerprint, TomlSettings, TracingLog,
};
pub use config::{BindPolicy, EngineConfig, EngineConfigBuilder, Transport};
pub use error::{Error, ErrorKind, Result};
pub use layout::{Catalog, Identity, LoadReport, Version};
pub use process::{
    Chunked, GatedProcess, Instrumented, MemoryImage, MemoryImageBuilder, PauseGuard, Process,
    Region,
};
pub use reader::{
    BackRef, Bitfield, BindFailure, BindReport, Codec, CompatReport, FieldMap, FlagArray,
    FlagIndex, ForeignEnum, HostKey, Mirror, PolyKey, Polymorphic, ReaderFactory, Registry,
    Scalar, Shared, codec,
};
pub use session::{
    CancelToken, Root, Session, SessionOptions, SessionStats, SharedCache, spawn_snapshot,
};
pub use vectorize::{Vectorizer, VectorizerStats};
