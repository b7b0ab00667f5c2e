//! Snapshot command: one capture of the sample model.

use std::path::Path;

use anyhow::Result;
use memsnap_core::{
    CancelToken, EngineConfig, Process, ReaderFactory, Session, SessionOptions, SessionStats,
};
use serde::Serialize;
use tracing::info;

use super::export::{render, write_output};
use super::factory;
use crate::cli::{OutputFormat, TargetArgs};
use crate::model::{self, UnitKind, World};
use crate::target;

/// The model root read in one session, with the session's counters.
#[derive(Debug, Serialize)]
pub struct Capture {
    pub version: String,
    pub identity: String,
    pub world: World,
    pub stats: SessionStats,
}

/// Open a session on `process`, read the model root and close it again.
pub fn capture<P: Process + ?Sized>(
    factory: &ReaderFactory,
    process: &P,
    cancel: CancelToken,
) -> memsnap_core::Result<Capture> {
    let options = SessionOptions::new()
        .cancel_token(cancel)
        .require::<World>()
        .require_poly::<UnitKind>();
    let mut session = Session::open_with(factory, process, options)?;
    let world: World = session.read(model::ROOT)?;
    let capture = Capture {
        version: session.version().label.clone(),
        identity: session.identity().to_string(),
        world,
        stats: session.stats().clone(),
    };
    session.close()?;
    Ok(capture)
}

pub fn run(
    layouts: &Path,
    target: &TargetArgs,
    format: OutputFormat,
    output: Option<&Path>,
    config: EngineConfig,
) -> Result<()> {
    let process = target::open(target, config.transport)?;
    let factory = factory(layouts, config)?;
    let capture = capture(&factory, &*process, CancelToken::new())?;
    info!(
        "Snapshot of {} took {:?} in {} batches",
        capture.version, capture.stats.elapsed, capture.stats.batches
    );
    write_output(&render(format, &capture)?, output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::tests::{demo_factory, demo_image};

    #[test]
    fn test_capture_closes_session() {
        let factory = demo_factory();
        let image = demo_image();
        let capture = capture(&factory, &image, CancelToken::new()).unwrap();
        assert_eq!(capture.version, "demo-1.0");
        assert_eq!(capture.identity, "d3e01000");
        assert_eq!(capture.stats.snapshots, 1);
        assert!(capture.stats.batches >= 1);
        assert_eq!(image.pause_depth(), 0);
    }

    #[test]
    fn test_cancelled_capture_fails() {
        let factory = demo_factory();
        let image = demo_image();
        let token = CancelToken::new();
        token.cancel();
        let err = capture(&factory, &image, token).unwrap_err();
        assert!(matches!(err, memsnap_core::Error::Cancelled));
        assert_eq!(image.pause_depth(), 0);
    }
}
