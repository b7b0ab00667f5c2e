//! Assembly phase: builds host values from fetched blocks. Never reads
//! the foreign process; a missing block is an `Incomplete` error.

use std::any::TypeId;
use std::collections::VecDeque;
use std::sync::Arc;

use super::cache::{Caches, ErasedMap, SharedMap, SharedMaps, cache_of};
use super::fetch::BlockStore;
use crate::collab::LogSink;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::layout::{BufferHeader, SequenceHeader, Version};
use crate::reader::raw::{buffer_extent, pointer_at, sequence_extent, slice};
use crate::reader::{Mirror, Polymorphic, ReaderFactory, Selection, Shared};

/// Bytes of one value plus where they came from.
#[derive(Debug, Clone, Copy)]
pub(crate) struct At<'b> {
    pub(crate) bytes: &'b [u8],
    pub(crate) address: u64,
    /// Pointer hops from the snapshot root (or the enclosing shared object).
    pub(crate) depth: usize,
}

impl<'b> At<'b> {
    pub(crate) fn sub(&self, offset: usize, len: usize) -> Result<At<'b>> {
        Ok(At {
            bytes: slice(self.bytes, offset, len, self.address)?,
            address: self.address.wrapping_add(offset as u64),
            depth: self.depth,
        })
    }
}

type Job = Box<dyn FnOnce(&mut Assembler<'_>) -> Result<()>>;

pub(crate) struct Assembler<'s> {
    factory: &'s ReaderFactory,
    version: &'s Version,
    config: &'s EngineConfig,
    log: &'s dyn LogSink,
    base_offset: u64,
    blocks: &'s BlockStore,
    caches: &'s Caches,
    shared: &'s mut SharedMaps,
    jobs: VecDeque<Job>,
}

impl<'s> Assembler<'s> {
    pub(crate) fn new(
        factory: &'s ReaderFactory,
        version: &'s Version,
        base_offset: u64,
        blocks: &'s BlockStore,
        caches: &'s Caches,
        shared: &'s mut SharedMaps,
    ) -> Self {
        Self {
            factory,
            version,
            config: factory.config(),
            log: factory.log(),
            base_offset,
            blocks,
            caches,
            shared,
            jobs: VecDeque::new(),
        }
    }

    pub(crate) fn warn(&self, message: &str) {
        self.log.warn(message);
    }

    pub(crate) fn block(&self, address: u64, len: usize) -> Result<Arc<[u8]>> {
        self.blocks
            .get(&(address, len))
            .cloned()
            .ok_or(Error::Incomplete { address, len })
    }

    pub(crate) fn pointer(&self, at: &At<'_>, link: usize) -> Result<u64> {
        pointer_at(at.bytes, link, self.version.abi.pointer_size, at.address)
    }

    pub(crate) fn buffer(&self, header: &BufferHeader, at: &At<'_>) -> Result<(u64, usize)> {
        buffer_extent(
            header,
            at.bytes,
            at.address,
            self.version.abi.pointer_size,
            self.config.max_container_len,
        )
    }

    pub(crate) fn sequence(
        &self,
        header: &SequenceHeader,
        at: &At<'_>,
        stride: usize,
    ) -> Result<(u64, usize)> {
        sequence_extent(
            header,
            at.bytes,
            at.address,
            stride,
            self.version.abi.pointer_size,
            self.config.max_container_len,
        )
    }

    /// One pointer hop deeper, bounded by the configured depth.
    pub(crate) fn descend(&self, depth: usize, what: &str, address: u64) -> Result<usize> {
        descend(self.config.max_depth, depth, what, address)
    }

    /// Decode a `T` from bytes already in hand.
    pub(crate) fn assemble<T: Mirror>(&mut self, at: At<'_>) -> Result<T> {
        let plan = self.factory.bind::<T>(self.version)?;
        let mut host = T::default();
        for field in &plan.layout.fields {
            let entry = &plan.map.entries[field.entry];
            let value = at.sub(field.offset, field.size)?;
            (entry.apply)(self, &field.step, value, &mut host)?;
        }
        Ok(host)
    }

    /// Decode the `T` stored at `address`.
    pub(crate) fn build<T: Mirror>(&mut self, address: u64, depth: usize) -> Result<T> {
        check_depth(self.config.max_depth, depth, T::RECORD, address)?;
        let size = self.factory.bind::<T>(self.version)?.layout.size;
        let block = self.block(address, size)?;
        self.assemble::<T>(At {
            bytes: &block,
            address,
            depth,
        })
    }

    /// The session-wide handle for `(T, address)`.
    ///
    /// A new handle starts empty and is filled once the current value is
    /// done, so cycles through shared pointers close on the same handle.
    pub(crate) fn shared<T: Mirror>(&mut self, address: u64) -> Result<Shared<T>> {
        self.handle(address, T::RECORD, |asm, address| asm.build::<T>(address, 0))
    }

    /// Like [`Assembler::shared`], routing the target through `P`'s registry.
    pub(crate) fn shared_poly<P: Polymorphic>(&mut self, address: u64) -> Result<Shared<P>> {
        self.handle(address, P::BASE, |asm, address| asm.poly::<P>(address, 0))
    }

    fn handle<T: Send + Sync + 'static>(
        &mut self,
        address: u64,
        what: &str,
        build: fn(&mut Assembler<'_>, u64) -> Result<T>,
    ) -> Result<Shared<T>> {
        let map = self
            .shared
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(SharedMap::<T>::default()) as Box<dyn ErasedMap>)
            .as_any_mut()
            .downcast_mut::<SharedMap<T>>()
            .ok_or_else(|| Error::Unsupported(format!("shared map type for {}", what)))?;
        if let Some(handle) = map.handles.get(&address) {
            return Ok(handle.clone());
        }
        if let Some(handle) = cache_of::<T>(self.caches).and_then(|cache| cache.get(address)) {
            map.handles.insert(address, handle.clone());
            return Ok(handle);
        }

        let handle = Shared::pending(address);
        map.handles.insert(address, handle.clone());
        map.fresh.push(address);
        let fill = handle.clone();
        self.jobs.push_back(Box::new(move |asm: &mut Assembler<'_>| {
            let value = build(asm, address)?;
            fill.fill(value);
            Ok(())
        }));
        Ok(handle)
    }

    /// Route the object at `address` through `P`'s registry.
    pub(crate) fn poly<P: Polymorphic>(&mut self, address: u64, depth: usize) -> Result<P> {
        check_depth(self.config.max_depth, depth, P::BASE, address)?;
        let plan = self.factory.bind_poly::<P>(self.version)?;
        let layout = &plan.layout;
        let disc = layout.discriminator;
        let raw = layout.discriminant(&self.block(address.wrapping_add(disc.offset as u64), disc.size)?);
        let arm = match layout.select(raw, self.base_offset) {
            Selection::Arm(i) => plan.registry.arms.get(layout.arms[i].index),
            Selection::Fallback => plan.registry.fallback.as_ref(),
            Selection::Unmatched => None,
        };
        let Some(arm) = arm else {
            return Err(Error::PolymorphicUnresolved {
                base: P::BASE.to_string(),
                address,
                discriminator: raw,
            });
        };
        (arm.build)(self, address, depth)
    }

    /// Fill every pending shared handle, including those created while
    /// filling others.
    pub(crate) fn finish(&mut self) -> Result<()> {
        while let Some(job) = self.jobs.pop_front() {
            job(self)?;
        }
        Ok(())
    }

    /// Publish the handles materialized by this snapshot to the registered
    /// caches; returns their number.
    pub(crate) fn commit(&mut self) -> usize {
        self.shared
            .values_mut()
            .map(|map| map.commit(self.caches))
            .sum()
    }
}

fn check_depth(max_depth: usize, depth: usize, what: &str, address: u64) -> Result<()> {
    if depth > max_depth {
        return Err(Error::CycleDetected {
            type_name: what.to_string(),
            address,
            depth,
        });
    }
    Ok(())
}

pub(crate) fn descend(max_depth: usize, depth: usize, what: &str, address: u64) -> Result<usize> {
    let next = depth + 1;
    check_depth(max_depth, next, what, address)?;
    Ok(next)
}
