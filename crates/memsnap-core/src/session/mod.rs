//! Snapshot sessions.
//!
//! A [`Session`] binds one process to a [`ReaderFactory`], holds one pause
//! count on the process for its whole lifetime and materializes host object
//! graphs from global symbol paths. Every read is a two-phase snapshot:
//!
//! - **Fetch**: follow pointers and container headers wave by wave, each
//!   wave one vectorized flush bounded by the batch ceiling
//! - **Assemble**: decode host values from the fetched blocks, without I/O
//!
//! Destinations are written only when both phases succeed. Any failure
//! closes the session, which resumes the process.

mod assemble;
mod cache;
mod cancel;
mod fetch;
mod root;

#[cfg(test)]
mod tests;

use std::any::TypeId;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use serde::Serialize;
use tracing::{debug, info};

pub(crate) use assemble::{Assembler, At};
pub use cache::SharedCache;
use cache::{Caches, SharedMaps};
pub use cancel::CancelToken;
use cancel::Checkpoint;
use fetch::Fetcher;
pub use root::Root;

use crate::collab::SnapshotSink;
use crate::config::BindPolicy;
use crate::error::{Error, Result};
use crate::layout::{Identity, Version};
use crate::process::{PauseGuard, Process};
use crate::reader::codec::{self, Codec};
use crate::reader::{
    BindFailure, BindReport, HostKey, Mirror, PolyKey, Polymorphic, ReaderFactory, Shared, Step,
    resolve,
};
use crate::vectorize::Vectorizer;

/// Options for [`Session::open_with`].
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    cancel: CancelToken,
    hosts: Vec<HostKey>,
    polys: Vec<PolyKey>,
}

impl SessionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Observe `token` at every suspension point.
    pub fn cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// Check `T` and everything reachable from it before pausing.
    pub fn require<T: Mirror>(mut self) -> Self {
        self.hosts.push(HostKey::of::<T>());
        self
    }

    pub fn require_poly<P: Polymorphic>(mut self) -> Self {
        self.polys.push(PolyKey::of::<P>());
        self
    }
}

/// Counters of one session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub opened_at: DateTime<Local>,
    /// Successful snapshots (`read*` calls).
    pub snapshots: usize,
    pub roots: usize,
    pub batches: usize,
    pub requests: usize,
    pub bytes: usize,
    /// Fetch waves: rounds of follow-up reads.
    pub waves: usize,
    /// Shared objects materialized (not taken from a cache).
    pub shared_objects: usize,
    /// Time spent inside snapshots.
    pub elapsed: Duration,
}

impl SessionStats {
    fn new() -> Self {
        Self {
            opened_at: Local::now(),
            snapshots: 0,
            roots: 0,
            batches: 0,
            requests: 0,
            bytes: 0,
            waves: 0,
            shared_objects: 0,
            elapsed: Duration::ZERO,
        }
    }
}

/// One paused view of a foreign process.
pub struct Session<'a, P: Process + ?Sized> {
    factory: &'a ReaderFactory,
    process: &'a P,
    version: Arc<Version>,
    identity: Identity,
    base_offset: u64,
    guard: Option<PauseGuard<'a, P>>,
    cancel: CancelToken,
    vectorizer: Vectorizer,
    caches: Caches,
    shared: SharedMaps,
    stats: SessionStats,
}

impl<'a, P: Process + ?Sized> Session<'a, P> {
    pub fn open(factory: &'a ReaderFactory, process: &'a P) -> Result<Self> {
        Self::open_with(factory, process, SessionOptions::default())
    }

    /// Select the layout version for `process`, check the required host
    /// types and pause the process.
    ///
    /// Nothing is read and the process is not paused unless every check
    /// passes.
    pub fn open_with(
        factory: &'a ReaderFactory,
        process: &'a P,
        options: SessionOptions,
    ) -> Result<Self> {
        let identity = process.identity()?;
        let version = match factory.select_version(&identity) {
            Ok(version) => version,
            Err(e) => {
                factory.log().error(&e.to_string());
                return Err(e);
            }
        };

        if !options.hosts.is_empty() || !options.polys.is_empty() {
            let report = factory.test_all(&version, &options.hosts, &options.polys);
            let lenient = factory.config().policy == BindPolicy::Lenient;
            let failures: Vec<BindFailure> = report
                .failures
                .into_iter()
                .filter(|failure| !lenient || failure.field.is_none())
                .collect();
            if !failures.is_empty() {
                for failure in &failures {
                    factory.log().error(&format!("[{}] {}", version.label, failure));
                }
                return Err(Error::LayoutMismatch {
                    version: version.label.clone(),
                    report: BindReport { failures },
                });
            }
        }

        let base_offset = process.base_offset()?;
        let vectorizer = Vectorizer::new(factory.config().batch_ceiling)?;
        let guard = PauseGuard::new(process)?;
        info!(
            "Session opened on {} (identity {}, base offset {:#x})",
            version.label, identity, base_offset
        );
        Ok(Self {
            factory,
            process,
            version,
            identity,
            base_offset,
            guard: Some(guard),
            cancel: options.cancel,
            vectorizer,
            caches: Caches::new(),
            shared: SharedMaps::new(),
            stats: SessionStats::new(),
        })
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn base_offset(&self) -> u64 {
        self.base_offset
    }

    pub fn is_open(&self) -> bool {
        self.guard.is_some()
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Install a caller-owned cache for `T`. Handles it already holds are
    /// reused without reading; handles materialized by successful
    /// snapshots are added to it.
    pub fn register_shared_cache<T: Mirror>(&mut self, cache: SharedCache<T>) {
        self.caches.insert(TypeId::of::<T>(), Box::new(cache));
    }

    /// As [`Session::register_shared_cache`], for targets read through
    /// [`codec::shared_poly`].
    pub fn register_shared_poly_cache<T: Polymorphic>(&mut self, cache: SharedCache<T>) {
        self.caches.insert(TypeId::of::<T>(), Box::new(cache));
    }

    /// Read the record at global `path`.
    pub fn read<T: Mirror>(&mut self, path: &str) -> Result<T> {
        let mut value = T::default();
        self.read_into(path, &mut value)?;
        Ok(value)
    }

    pub fn read_into<T: Mirror>(&mut self, path: &str, dest: &mut T) -> Result<()> {
        self.read_many(vec![Root::record(path, dest)])
    }

    /// Read global `path` through an explicit codec.
    pub fn read_with<V: 'static>(&mut self, path: &str, codec: Codec<V>, dest: &mut V) -> Result<()> {
        self.read_many(vec![Root::new(path, codec, dest)])
    }

    /// Read the record at global `path` as a shared handle, so that
    /// pointers back to it close on the same handle.
    pub fn read_shared<T: Mirror>(&mut self, path: &str) -> Result<Shared<T>> {
        let mut handle = Shared::pending(0);
        self.read_with(path, codec::shared_here::<T>(), &mut handle)?;
        Ok(handle)
    }

    /// Read every root as one snapshot, batching across all of them.
    ///
    /// On error no destination is written and the session is closed.
    pub fn read_many(&mut self, mut roots: Vec<Root<'_>>) -> Result<()> {
        if self.guard.is_none() {
            return Err(Error::SessionClosed);
        }
        let started = Instant::now();
        match self.snapshot(&mut roots) {
            Ok(fresh) => {
                for root in &mut roots {
                    root.slot.commit();
                }
                let elapsed = started.elapsed();
                let vectorized = self.vectorizer.stats();
                let stats = &mut self.stats;
                stats.snapshots += 1;
                stats.roots += roots.len();
                stats.batches = vectorized.batches;
                stats.requests = vectorized.requests;
                stats.bytes = vectorized.bytes;
                stats.shared_objects += fresh;
                stats.elapsed += elapsed;
                debug!(
                    "Snapshot of {} roots took {:?} ({} batches so far)",
                    roots.len(),
                    elapsed,
                    stats.batches
                );
                Ok(())
            }
            Err(e) => {
                self.abort(&e);
                Err(e)
            }
        }
    }

    /// Resume the process and end the session.
    pub fn close(mut self) -> Result<()> {
        match self.guard.take() {
            Some(guard) => {
                info!(
                    "Session on {} closed after {} snapshots",
                    self.version.label, self.stats.snapshots
                );
                guard.release()
            }
            None => Ok(()),
        }
    }

    fn abort(&mut self, error: &Error) {
        let log = self.factory.log();
        match error {
            Error::Cancelled | Error::DeadlineExceeded { .. } => {
                log.warn(&format!("Snapshot on {} stopped: {}", self.version.label, error))
            }
            _ => log.error(&format!("Snapshot on {} failed: {}", self.version.label, error)),
        }
        self.vectorizer.clear();
        self.shared.clear();
        // Dropping the guard resumes the process.
        self.guard = None;
    }

    /// Run both phases; returns the number of fresh shared objects.
    fn snapshot(&mut self, roots: &mut [Root<'_>]) -> Result<usize> {
        let checkpoint = Checkpoint::start(&self.cancel, self.factory.config().deadline_ms);
        checkpoint.check()?;

        let mut targets = Vec::with_capacity(roots.len());
        for root in roots.iter() {
            targets.push(self.locate(root)?);
        }

        let mut fetcher = Fetcher::new(
            self.factory,
            &self.version,
            self.process,
            self.base_offset,
            &self.caches,
            &self.shared,
            &mut self.vectorizer,
            &checkpoint,
        );
        for (address, len, step) in &targets {
            fetcher.root(*address, *len, Arc::clone(step));
        }
        let (blocks, waves) = fetcher.run()?;
        self.stats.waves += waves;
        checkpoint.check()?;

        let mut asm = Assembler::new(
            self.factory,
            &self.version,
            self.base_offset,
            &blocks,
            &self.caches,
            &mut self.shared,
        );
        for (root, (address, len, step)) in roots.iter_mut().zip(&targets) {
            let block = asm.block(*address, *len)?;
            let at = At {
                bytes: &block,
                address: *address,
                depth: 0,
            };
            root.slot.decode(&mut asm, step, at)?;
        }
        asm.finish()?;
        Ok(asm.commit())
    }

    /// Address, size and plan step of a root.
    fn locate(&self, root: &Root<'_>) -> Result<(u64, usize, Arc<Step>)> {
        let symbol = self
            .factory
            .catalog()
            .lookup_global(&self.version, root.path())?;
        let mismatch = |reason: String| Error::LayoutMismatch {
            version: self.version.label.clone(),
            report: BindReport {
                failures: vec![BindFailure {
                    host: root.slot.host().to_string(),
                    record: symbol.ty.to_string(),
                    field: Some(symbol.path.clone()),
                    reason,
                }],
            },
        };
        let step = resolve(root.slot.shape(), &symbol.ty, &self.version).map_err(&mismatch)?;
        let len = self.version.size_of(&symbol.ty).map_err(&mismatch)?;
        Ok((
            symbol.address.wrapping_add(self.base_offset),
            len,
            Arc::new(step),
        ))
    }
}

/// Run a session on a worker thread and hand its outcome to `sink`.
///
/// `build` runs against the open session; the session is closed after it
/// returns. The returned token cancels the snapshot in flight.
pub fn spawn_snapshot<P, S, K, F>(
    factory: Arc<ReaderFactory>,
    process: Arc<P>,
    sink: K,
    build: F,
) -> (JoinHandle<()>, CancelToken)
where
    P: Process + ?Sized + 'static,
    S: Send + 'static,
    K: SnapshotSink<S> + 'static,
    F: FnOnce(&mut Session<'_, P>) -> Result<S> + Send + 'static,
{
    let cancel = CancelToken::new();
    let options = SessionOptions::new().cancel_token(cancel.clone());
    let handle = thread::spawn(move || {
        let outcome = Session::open_with(&factory, &*process, options).and_then(|mut session| {
            let value = build(&mut session)?;
            session.close()?;
            Ok(value)
        });
        sink.deliver(outcome);
    });
    (handle, cancel)
}
