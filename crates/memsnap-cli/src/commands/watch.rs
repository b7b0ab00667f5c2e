//! Watch mode: periodic snapshots until Ctrl-C.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use memsnap_core::{EngineConfig, Process, ReaderFactory};
use tracing::info;

use super::export::render;
use super::factory;
use crate::cli::{OutputFormat, TargetArgs};
use crate::retry::capture_with_retry;
use crate::shutdown::ShutdownSignal;
use crate::target;

pub fn run(
    layouts: &Path,
    target: &TargetArgs,
    format: OutputFormat,
    interval: Duration,
    count: Option<usize>,
    config: EngineConfig,
) -> Result<()> {
    // Ctrl-C also cancels the snapshot in flight
    let shutdown = Arc::new(ShutdownSignal::new());
    let shutdown_ctrlc = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        info!("Received shutdown signal, stopping...");
        shutdown_ctrlc.trigger();
    })?;

    let process = target::open(target, config.transport)?;
    let factory = factory(layouts, config)?;
    let taken = watch(&factory, &*process, &shutdown, interval, count, |capture| {
        println!("{}", render(format, capture)?);
        Ok(())
    })?;
    info!("Watch stopped after {} snapshots", taken);
    Ok(())
}

/// Capture every `interval` and hand each capture to `emit`. Returns the
/// number of captures taken.
pub fn watch<P, F>(
    factory: &ReaderFactory,
    process: &P,
    shutdown: &ShutdownSignal,
    interval: Duration,
    count: Option<usize>,
    mut emit: F,
) -> Result<usize>
where
    P: Process + ?Sized,
    F: FnMut(&super::snapshot::Capture) -> Result<()>,
{
    let mut taken = 0;
    while count.is_none_or(|n| taken < n) {
        let Some(capture) = capture_with_retry(factory, process, shutdown)? else {
            break;
        };
        emit(&capture)?;
        taken += 1;

        if count == Some(taken) || shutdown.wait(interval) {
            break;
        }
    }
    Ok(taken)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::tests::{demo_factory, demo_image};

    #[test]
    fn test_watch_stops_after_count() {
        let factory = demo_factory();
        let image = demo_image();
        let shutdown = ShutdownSignal::new();
        let mut ticks = Vec::new();
        let taken = watch(
            &factory,
            &image,
            &shutdown,
            Duration::from_millis(1),
            Some(3),
            |capture| {
                ticks.push(capture.world.tick);
                Ok(())
            },
        )
        .unwrap();
        assert_eq!(taken, 3);
        assert_eq!(ticks, vec![1234; 3]);
        assert_eq!(image.pause_depth(), 0);
    }

    #[test]
    fn test_watch_stops_on_shutdown() {
        let factory = demo_factory();
        let image = demo_image();
        let shutdown = ShutdownSignal::new();
        let taken = watch(
            &factory,
            &image,
            &shutdown,
            Duration::from_secs(10),
            None,
            |_| {
                shutdown.trigger();
                Ok(())
            },
        )
        .unwrap();
        assert_eq!(taken, 1);
    }
}
