//! Fetch phase: discovers every block a snapshot needs, wave by wave.
//!
//! Each wave decodes only what the plans need to find follow-ups (pointer
//! values, container headers, discriminators) and queues those reads on the
//! vectorizer. Blocks are keyed by `(address, len)`; assembly looks them up
//! with the same keys.

use std::any::TypeId;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use tracing::debug;

use super::assemble::descend;
use super::cache::{Caches, SharedMaps};
use super::cancel::Checkpoint;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::layout::Version;
use crate::process::{Process, Region};
use crate::reader::raw::{buffer_extent, flag_bytes, pointer_at, sequence_extent, slice};
use crate::reader::{HostKey, PlanLayout, PolyKey, PolyLayout, ReaderFactory, Selection, Step};
use crate::vectorize::Vectorizer;

pub(crate) type BlockStore = HashMap<(u64, usize), Arc<[u8]>>;

type Key = (u64, usize);

/// What to do with a block once it arrives.
enum Then {
    /// A root value.
    Walk { step: Arc<Step>, depth: usize },
    /// A whole record behind a pointer.
    Record { host: HostKey, depth: usize },
    Elements {
        elem: Arc<Step>,
        count: usize,
        stride: usize,
        depth: usize,
    },
    Entries {
        key: Arc<Step>,
        value: Arc<Step>,
        value_offset: usize,
        count: usize,
        stride: usize,
        depth: usize,
    },
    Discriminator {
        poly: PolyKey,
        target: u64,
        depth: usize,
    },
    /// Payload bytes with nothing to follow (strings, flag arrays).
    Raw,
}

pub(crate) struct Fetcher<'s, P: Process + ?Sized> {
    factory: &'s ReaderFactory,
    version: &'s Version,
    config: &'s EngineConfig,
    process: &'s P,
    base_offset: u64,
    caches: &'s Caches,
    shared: &'s SharedMaps,
    vectorizer: &'s mut Vectorizer,
    checkpoint: &'s Checkpoint,
    layouts: HashMap<TypeId, Arc<PlanLayout>>,
    polys: HashMap<TypeId, Arc<PolyLayout>>,
    blocks: BlockStore,
    waiting: HashMap<Key, Vec<Then>>,
    in_flight: Vec<Key>,
    ready: VecDeque<(Key, Then)>,
    scheduled: HashSet<(TypeId, u64)>,
    waves: usize,
}

impl<'s, P: Process + ?Sized> Fetcher<'s, P> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        factory: &'s ReaderFactory,
        version: &'s Version,
        process: &'s P,
        base_offset: u64,
        caches: &'s Caches,
        shared: &'s SharedMaps,
        vectorizer: &'s mut Vectorizer,
        checkpoint: &'s Checkpoint,
    ) -> Self {
        Self {
            factory,
            version,
            config: factory.config(),
            process,
            base_offset,
            caches,
            shared,
            vectorizer,
            checkpoint,
            layouts: HashMap::new(),
            polys: HashMap::new(),
            blocks: HashMap::new(),
            waiting: HashMap::new(),
            in_flight: Vec::new(),
            ready: VecDeque::new(),
            scheduled: HashSet::new(),
            waves: 0,
        }
    }

    /// Queue a root value of `len` bytes at `address`.
    pub(crate) fn root(&mut self, address: u64, len: usize, step: Arc<Step>) {
        self.require(address, len, Then::Walk { step, depth: 0 });
    }

    /// Run waves until nothing is left to fetch. Returns the blocks and the
    /// number of waves.
    pub(crate) fn run(mut self) -> Result<(BlockStore, usize)> {
        loop {
            while let Some((key, then)) = self.ready.pop_front() {
                let block = self
                    .blocks
                    .get(&key)
                    .cloned()
                    .ok_or(Error::Incomplete {
                        address: key.0,
                        len: key.1,
                    })?;
                self.resume(then, key.0, &block)?;
            }
            if self.in_flight.is_empty() {
                break;
            }

            let checkpoint = self.checkpoint;
            let buffers = self.vectorizer.flush(self.process, || checkpoint.check())?;
            self.waves += 1;
            let keys = std::mem::take(&mut self.in_flight);
            for (key, buffer) in keys.into_iter().zip(buffers) {
                self.blocks.insert(key, Arc::from(buffer));
                for then in self.waiting.remove(&key).unwrap_or_default() {
                    self.ready.push_back((key, then));
                }
            }
        }
        debug!(
            "Fetched {} blocks in {} waves",
            self.blocks.len(),
            self.waves
        );
        Ok((self.blocks, self.waves))
    }

    fn require(&mut self, address: u64, len: usize, then: Then) {
        let key = (address, len);
        if self.blocks.contains_key(&key) {
            self.ready.push_back((key, then));
            return;
        }
        if let Some(waiting) = self.waiting.get_mut(&key) {
            waiting.push(then);
            return;
        }
        if len == 0 {
            self.blocks.insert(key, Arc::from(Vec::new()));
            self.ready.push_back((key, then));
            return;
        }
        self.waiting.insert(key, vec![then]);
        self.vectorizer.submit(Region::new(address, len));
        self.in_flight.push(key);
    }

    fn layout(&mut self, host: HostKey) -> Result<Arc<PlanLayout>> {
        if let Some(layout) = self.layouts.get(&host.id) {
            return Ok(Arc::clone(layout));
        }
        let layout = (host.layout)(self.factory, self.version)?;
        self.layouts.insert(host.id, Arc::clone(&layout));
        Ok(layout)
    }

    fn poly_layout(&mut self, poly: PolyKey) -> Result<Arc<PolyLayout>> {
        if let Some(layout) = self.polys.get(&poly.id) {
            return Ok(Arc::clone(layout));
        }
        let layout = (poly.layout)(self.factory, self.version)?;
        self.polys.insert(poly.id, Arc::clone(&layout));
        Ok(layout)
    }

    fn resume(&mut self, then: Then, address: u64, bytes: &[u8]) -> Result<()> {
        match then {
            Then::Walk { step, depth } => self.visit(&step, bytes, address, depth),
            Then::Record { host, depth } => self.record(host, bytes, address, depth),
            Then::Elements {
                elem,
                count,
                stride,
                depth,
            } => {
                for i in 0..count {
                    let offset = i * stride;
                    let item = slice(bytes, offset, stride, address)?;
                    self.visit(&elem, item, address + offset as u64, depth)?;
                }
                Ok(())
            }
            Then::Entries {
                key,
                value,
                value_offset,
                count,
                stride,
                depth,
            } => {
                for i in 0..count {
                    let offset = i * stride;
                    let entry = slice(bytes, offset, stride, address)?;
                    let entry_address = address + offset as u64;
                    self.visit(&key, slice(entry, 0, value_offset, entry_address)?, entry_address, depth)?;
                    self.visit(
                        &value,
                        slice(entry, value_offset, stride - value_offset, entry_address)?,
                        entry_address + value_offset as u64,
                        depth,
                    )?;
                }
                Ok(())
            }
            Then::Discriminator {
                poly,
                target,
                depth,
            } => self.route(poly, target, bytes, depth),
            Then::Raw => Ok(()),
        }
    }

    /// Find the follow-ups of one value whose bytes are in hand.
    fn visit(&mut self, step: &Step, bytes: &[u8], address: u64, depth: usize) -> Result<()> {
        let pointer_size = self.version.abi.pointer_size;
        let max_len = self.config.max_container_len;
        match step {
            Step::Scalar { .. }
            | Step::Enum { .. }
            | Step::Bits { .. }
            | Step::Bytes { .. }
            | Step::Text { .. }
            | Step::Back { .. } => {}

            Step::String { header } => {
                let (data, len) = buffer_extent(header, bytes, address, pointer_size, max_len)?;
                if len > 0 {
                    self.require(data, len, Then::Raw);
                }
            }
            Step::Flags { header, .. } => {
                let (data, len) = buffer_extent(header, bytes, address, pointer_size, max_len)?;
                if len > 0 {
                    self.require(data, flag_bytes(len), Then::Raw);
                }
            }

            Step::Array { elem, len, stride } => {
                for i in 0..*len {
                    let offset = i * stride;
                    let item = slice(bytes, offset, *stride, address)?;
                    self.visit(elem, item, address + offset as u64, depth)?;
                }
            }
            Step::Record { host } => self.record(*host, bytes, address, depth)?,

            Step::Owned { host, link } => {
                let target = pointer_at(bytes, *link, pointer_size, address)?;
                if target != 0 {
                    let depth = descend(self.config.max_depth, depth, host.record, target)?;
                    let size = self.layout(*host)?.size;
                    self.require(target, size, Then::Record { host: *host, depth });
                }
            }
            Step::Shared { host, link } => {
                let target = pointer_at(bytes, *link, pointer_size, address)?;
                if target != 0 {
                    self.share(*host, target)?;
                }
            }
            Step::SharedHere { host } => self.share(*host, address)?,

            Step::Seq {
                elem,
                header,
                stride,
            } => {
                let (data, count) =
                    sequence_extent(header, bytes, address, *stride, pointer_size, max_len)?;
                if count > 0 {
                    let depth = descend(self.config.max_depth, depth, "sequence", data)?;
                    self.require(
                        data,
                        count * stride,
                        Then::Elements {
                            elem: Arc::clone(elem),
                            count,
                            stride: *stride,
                            depth,
                        },
                    );
                }
            }
            Step::Map {
                key,
                value,
                header,
                value_offset,
                stride,
            } => {
                let (data, count) =
                    sequence_extent(header, bytes, address, *stride, pointer_size, max_len)?;
                if count > 0 {
                    let depth = descend(self.config.max_depth, depth, "map", data)?;
                    self.require(
                        data,
                        count * stride,
                        Then::Entries {
                            key: Arc::clone(key),
                            value: Arc::clone(value),
                            value_offset: *value_offset,
                            count,
                            stride: *stride,
                            depth,
                        },
                    );
                }
            }

            Step::Poly { poly, link } => {
                let target = pointer_at(bytes, *link, pointer_size, address)?;
                if target != 0 {
                    let depth = descend(self.config.max_depth, depth, poly.base, target)?;
                    let disc = self.poly_layout(*poly)?.discriminator;
                    self.require(
                        target.wrapping_add(disc.offset as u64),
                        disc.size,
                        Then::Discriminator {
                            poly: *poly,
                            target,
                            depth,
                        },
                    );
                }
            }
            Step::SharedPoly { poly, link } => {
                let target = pointer_at(bytes, *link, pointer_size, address)?;
                if target != 0 {
                    self.share_poly(*poly, target)?;
                }
            }
        }
        Ok(())
    }

    fn record(&mut self, host: HostKey, bytes: &[u8], address: u64, depth: usize) -> Result<()> {
        let layout = self.layout(host)?;
        for field in &layout.fields {
            let value = slice(bytes, field.offset, field.size, address)?;
            self.visit(&field.step, value, address + field.offset as u64, depth)?;
        }
        Ok(())
    }

    /// Schedule a shared target once per `(type, address)`. Targets already
    /// held by the session or an external cache are not read again. Depth
    /// restarts at zero: dedup, not the depth bound, ends shared cycles.
    fn share(&mut self, host: HostKey, target: u64) -> Result<()> {
        if !self.is_new_shared(host.id, target) {
            return Ok(());
        }
        let size = self.layout(host)?.size;
        self.require(target, size, Then::Record { host, depth: 0 });
        Ok(())
    }

    /// First sighting of a shared target that neither the session nor an
    /// external cache already holds.
    fn is_new_shared(&mut self, id: TypeId, target: u64) -> bool {
        if !self.scheduled.insert((id, target)) {
            return false;
        }
        let known = self
            .shared
            .get(&id)
            .is_some_and(|map| map.contains(target))
            || self
                .caches
                .get(&id)
                .is_some_and(|cache| cache.contains(target));
        !known
    }

    /// Schedule a shared polymorphic target once per `(poly, address)`,
    /// starting from its discriminator.
    fn share_poly(&mut self, poly: PolyKey, target: u64) -> Result<()> {
        if !self.is_new_shared(poly.id, target) {
            return Ok(());
        }
        let disc = self.poly_layout(poly)?.discriminator;
        self.require(
            target.wrapping_add(disc.offset as u64),
            disc.size,
            Then::Discriminator {
                poly,
                target,
                depth: 0,
            },
        );
        Ok(())
    }

    /// Pick the concrete record behind a polymorphic pointer and read it.
    fn route(&mut self, poly: PolyKey, target: u64, bytes: &[u8], depth: usize) -> Result<()> {
        let layout = self.poly_layout(poly)?;
        let raw = layout.discriminant(bytes);
        let selection = layout.select(raw, self.base_offset);
        let Some(host) = layout.host_of(selection) else {
            return Err(Error::PolymorphicUnresolved {
                base: layout.base().to_string(),
                address: target,
                discriminator: raw,
            });
        };
        if selection == Selection::Fallback {
            self.factory.log().warn(&format!(
                "PolymorphicUnresolved: discriminator {:#x} of {} at {:#x} matches no registered concrete type; reading it as {}",
                raw,
                layout.base(),
                target,
                host.record()
            ));
        }
        let size = self.layout(host)?.size;
        self.require(target, size, Then::Record { host, depth });
        Ok(())
    }
}
