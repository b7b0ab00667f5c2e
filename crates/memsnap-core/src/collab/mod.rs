//! Collaborator surfaces.
//!
//! Thin contracts the engine consumes (log sink, pause gate, fingerprint
//! provider, memory source, settings oracle) or exposes (snapshot sink).

mod gate;
mod log;
mod settings;
mod sink;

pub use gate::{FingerprintProvider, MemorySource, NoGate, PauseGate, StaticFingerprint};
pub use log::{CollectingLog, LogLevel, LogSink, TracingLog};
pub use settings::{SettingsOracle, TomlSettings};
pub use sink::{FnSink, SnapshotSink};
