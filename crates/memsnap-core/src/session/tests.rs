use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, mpsc};

use encoding_rs::UTF_8;

use super::*;
use crate::collab::CollectingLog;
use crate::config::EngineConfig;
use crate::error::ErrorKind;
use crate::layout::{Catalog, LayoutFile};
use crate::process::{MemoryImage, MemoryImageBuilder, Region};
use crate::reader::{FieldMap, FlagArray, FlagIndex, Registry};

const LAYOUT: &str = r#"{
    "versions": [{
        "identity": "5e55",
        "label": "fixture",
        "abi": {"vector": {"data": 0, "len": 8, "len_width": 4, "mode": "count", "size": 16}},
        "globals": {
            "g": "0x1000",
            "v": "0x2000",
            "x": "0x4000",
            "pair": "0x4800",
            "zoo": "0x6000",
            "cells": "0x8000",
            "ring": "0x9000",
            "holder": "0xa000",
            "named": "0xb000",
            "kennel": "0xc000"
        }
    }],
    "records": [
        {"name": "r", "fields": [
            {"name": "a", "offset": 0, "type": "int32"},
            {"name": "b", "offset": 4, "type": "int32"}
        ]},
        {"name": "n", "size": 24, "fields": [
            {"name": "id", "offset": 0, "type": "int32"},
            {"name": "next", "offset": 8, "type": "shared<n>"}
        ]},
        {"name": "pair", "fields": [
            {"name": "left", "offset": 0, "type": "shared<n>"},
            {"name": "right", "offset": 16, "type": "shared<n>"}
        ]},
        {"name": "b", "size": 16, "discriminator": {"offset": 0, "size": 1}},
        {"name": "b1", "base": "b", "size": 16, "discriminant": 1, "fields": [
            {"name": "extra", "offset": 8, "type": "int32"}
        ]},
        {"name": "b2", "base": "b", "size": 16, "discriminant": 2, "fields": [
            {"name": "extra", "offset": 8, "type": "int32"}
        ]},
        {"name": "cell", "size": 64, "fields": [
            {"name": "value", "offset": 0, "type": "int32"}
        ]},
        {"name": "link", "fields": [
            {"name": "next", "offset": 0, "type": "pointer<link>"}
        ]},
        {"name": "holder", "fields": [
            {"name": "owner", "offset": 0, "type": "pointer<r>"},
            {"name": "items", "offset": 8, "type": "vector<int32>"}
        ]},
        {"name": "kennel", "fields": [
            {"name": "first", "offset": 0, "type": "shared<b>"},
            {"name": "second", "offset": 16, "type": "shared<b>"},
            {"name": "third", "offset": 32, "type": "shared<b>"}
        ]},
        {"name": "named", "fields": [
            {"name": "name", "offset": 0, "type": "string"},
            {"name": "tag", "offset": 32, "type": "array<char, 8>"},
            {"name": "perks", "offset": 40, "type": "flags"},
            {"name": "stock", "offset": 56, "type": "map<uint32, int32>"}
        ]}
    ],
    "globals": [
        {"path": "g", "type": "r"},
        {"path": "v", "type": "vector<int32>"},
        {"path": "x", "type": "n"},
        {"path": "pair", "type": "pair"},
        {"path": "zoo", "type": "array<pointer<b>, 3>"},
        {"path": "cells", "type": "array<pointer<cell>, 100>"},
        {"path": "ring", "type": "link"},
        {"path": "holder", "type": "holder"},
        {"path": "named", "type": "named"},
        {"path": "kennel", "type": "kennel"}
    ]
}"#;

fn catalog() -> Arc<Catalog> {
    let file: LayoutFile = serde_json::from_str(LAYOUT).unwrap();
    Arc::new(Catalog::from_layout(&file, Path::new("fixture.json")).unwrap())
}

fn factory_with(config: EngineConfig) -> (ReaderFactory, Arc<CollectingLog>) {
    let log = Arc::new(CollectingLog::new());
    let factory = ReaderFactory::new(catalog(), config).with_log(log.clone());
    (factory, log)
}

fn factory() -> (ReaderFactory, Arc<CollectingLog>) {
    factory_with(EngineConfig::default())
}

fn image() -> MemoryImageBuilder {
    MemoryImage::builder().identity(&[0x5e, 0x55])
}

fn scalar_image() -> MemoryImage {
    image().write_i32(0x1000, 7).write_i32(0x1004, 42).build()
}

/// X at 0x4000 and Y at 0x5000 point at each other.
fn cycle_image() -> MemoryImageBuilder {
    image()
        .zeroed(0x4000, 24)
        .write_i32(0x4000, 1)
        .write_u64(0x4008, 0x5000)
        .zeroed(0x5000, 24)
        .write_i32(0x5000, 2)
        .write_u64(0x5008, 0x4000)
}

#[derive(Debug, Default, PartialEq)]
struct R {
    a: i32,
    b: i32,
}

impl Mirror for R {
    const RECORD: &'static str = "r";

    fn bind(fields: &mut FieldMap<Self>) {
        fields
            .field("a", codec::scalar(), |r| &mut r.a)
            .field("b", codec::scalar(), |r| &mut r.b);
    }
}

#[derive(Debug, Default)]
struct Node {
    id: i32,
    next: Option<Shared<Node>>,
}

impl Mirror for Node {
    const RECORD: &'static str = "n";

    fn bind(fields: &mut FieldMap<Self>) {
        fields
            .field("id", codec::scalar(), |n| &mut n.id)
            .field("next", codec::shared(), |n| &mut n.next);
    }
}

#[derive(Debug, Default)]
struct Pair {
    left: Option<Shared<Node>>,
    right: Option<Shared<Node>>,
}

impl Mirror for Pair {
    const RECORD: &'static str = "pair";

    fn bind(fields: &mut FieldMap<Self>) {
        fields
            .field("left", codec::shared(), |p| &mut p.left)
            .field("right", codec::shared(), |p| &mut p.right);
    }
}

#[derive(Debug, Default, PartialEq)]
struct Base;

impl Mirror for Base {
    const RECORD: &'static str = "b";

    fn bind(_: &mut FieldMap<Self>) {}
}

#[derive(Debug, Default, PartialEq)]
struct B1 {
    extra: i32,
}

impl Mirror for B1 {
    const RECORD: &'static str = "b1";

    fn bind(fields: &mut FieldMap<Self>) {
        fields.field("extra", codec::scalar(), |b| &mut b.extra);
    }
}

#[derive(Debug, Default, PartialEq)]
struct B2 {
    extra: i32,
}

impl Mirror for B2 {
    const RECORD: &'static str = "b2";

    fn bind(fields: &mut FieldMap<Self>) {
        fields.field("extra", codec::scalar(), |b| &mut b.extra);
    }
}

#[derive(Debug, PartialEq)]
enum Thing {
    One(B1),
    Two(B2),
    Other(Base),
}

impl Polymorphic for Thing {
    const BASE: &'static str = "b";

    fn register(registry: &mut Registry<Self>) {
        registry
            .concrete(Thing::One)
            .concrete(Thing::Two)
            .fallback(Thing::Other);
    }
}

/// Same arms as [`Thing`], without a fallback.
#[derive(Debug)]
enum Closed {
    One(B1),
    Two(B2),
}

impl Polymorphic for Closed {
    const BASE: &'static str = "b";

    fn register(registry: &mut Registry<Self>) {
        registry.concrete(Closed::One).concrete(Closed::Two);
    }
}

#[derive(Debug, Default)]
struct Kennel {
    first: Option<Shared<Thing>>,
    second: Option<Shared<Thing>>,
    third: Option<Shared<Thing>>,
}

impl Mirror for Kennel {
    const RECORD: &'static str = "kennel";

    fn bind(fields: &mut FieldMap<Self>) {
        fields
            .field("first", codec::shared_poly(), |k| &mut k.first)
            .field("second", codec::shared_poly(), |k| &mut k.second)
            .field("third", codec::shared_poly(), |k| &mut k.third);
    }
}

/// Reads a shared polymorphic field as an owned value.
#[derive(Debug, Default)]
struct LooseKennel {
    first: Option<Thing>,
}

impl Mirror for LooseKennel {
    const RECORD: &'static str = "kennel";

    fn bind(fields: &mut FieldMap<Self>) {
        fields.field("first", codec::poly(), |k| &mut k.first);
    }
}

#[derive(Debug, Default, PartialEq)]
struct Cell {
    value: i32,
}

impl Mirror for Cell {
    const RECORD: &'static str = "cell";

    fn bind(fields: &mut FieldMap<Self>) {
        fields.field("value", codec::scalar(), |c| &mut c.value);
    }
}

#[derive(Debug, Default)]
struct Link {
    next: Option<Box<Link>>,
}

impl Mirror for Link {
    const RECORD: &'static str = "link";

    fn bind(fields: &mut FieldMap<Self>) {
        fields.field("next", codec::owned(), |l| &mut l.next);
    }
}

#[derive(Debug, Default)]
struct Holder {
    owner: Option<Box<R>>,
    items: Vec<i32>,
}

impl Mirror for Holder {
    const RECORD: &'static str = "holder";

    fn bind(fields: &mut FieldMap<Self>) {
        fields
            .field("owner", codec::owned(), |h| &mut h.owner)
            .field("items", codec::seq(codec::scalar()), |h| &mut h.items);
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Perk {
    Swift,
    Strong,
    Wise,
}

impl FlagIndex for Perk {
    const COUNT: usize = 3;

    fn index(self) -> usize {
        self as usize
    }

    fn from_index(index: usize) -> Option<Self> {
        [Perk::Swift, Perk::Strong, Perk::Wise].get(index).copied()
    }
}

#[derive(Debug, Default)]
struct Named {
    name: String,
    tag: String,
    perks: FlagArray<Perk>,
    stock: BTreeMap<u32, i32>,
}

impl Mirror for Named {
    const RECORD: &'static str = "named";

    fn bind(fields: &mut FieldMap<Self>) {
        fields
            .field("name", codec::text(UTF_8), |n| &mut n.name)
            .field("tag", codec::text(UTF_8), |n| &mut n.tag)
            .field("perks", codec::flags(), |n| &mut n.perks)
            .field("stock", codec::map(codec::scalar(), codec::scalar()), |n| &mut n.stock);
    }
}

/// Binds a field the layout does not declare.
#[derive(Debug, Default)]
struct Stale {
    missing: i32,
}

impl Mirror for Stale {
    const RECORD: &'static str = "r";

    fn bind(fields: &mut FieldMap<Self>) {
        fields.field("missing", codec::scalar(), |s| &mut s.missing);
    }
}

/// Cancels `token` while serving the `after`-th vectorized read.
struct CancelAfter {
    image: MemoryImage,
    token: CancelToken,
    after: usize,
    batches: AtomicUsize,
}

impl Process for CancelAfter {
    fn identity(&self) -> Result<Identity> {
        self.image.identity()
    }

    fn base_offset(&self) -> Result<u64> {
        self.image.base_offset()
    }

    fn pause(&self) -> Result<()> {
        self.image.pause()
    }

    fn resume(&self) -> Result<()> {
        self.image.resume()
    }

    fn read(&self, address: u64, buf: &mut [u8]) -> Result<()> {
        self.image.read(address, buf)
    }

    fn read_many(&self, regions: &[Region]) -> Result<Vec<Vec<u8>>> {
        if self.batches.fetch_add(1, Ordering::SeqCst) + 1 == self.after {
            self.token.cancel();
        }
        self.image.read_many(regions)
    }
}

#[test]
fn test_reads_scalar_record() {
    let (factory, _) = factory();
    let image = scalar_image();
    let mut session = Session::open(&factory, &image).unwrap();
    assert_eq!(image.pause_depth(), 1);

    let r: R = session.read("g").unwrap();
    assert_eq!(r, R { a: 7, b: 42 });
    assert_eq!(session.stats().snapshots, 1);
    assert_eq!(session.stats().batches, 1);

    session.close().unwrap();
    assert_eq!(image.pause_depth(), 0);
}

#[test]
fn test_reads_counted_vector() {
    let (factory, _) = factory();
    let image = image()
        .zeroed(0x2000, 16)
        .write_u64(0x2000, 0x3000)
        .write_u32(0x2008, 3)
        .write_i32(0x3000, 1)
        .write_i32(0x3004, 2)
        .write_i32(0x3008, 3)
        .build();
    let mut session = Session::open(&factory, &image).unwrap();

    let mut values = Vec::new();
    session
        .read_with("v", codec::seq(codec::scalar::<i32>()), &mut values)
        .unwrap();
    assert_eq!(values, vec![1, 2, 3]);
    assert!(session.stats().batches <= 2);
    assert_eq!(session.stats().waves, 2);
}

#[test]
fn test_shared_cycle_closes_on_root_handle() {
    let (factory, _) = factory();
    let image = cycle_image().build();
    let mut session = Session::open(&factory, &image).unwrap();

    let x = session.read_shared::<Node>("x").unwrap();
    let xv = x.get().unwrap();
    assert_eq!(xv.id, 1);
    let y = xv.next.as_ref().unwrap();
    let yv = y.get().unwrap();
    assert_eq!(yv.id, 2);
    assert!(yv.next.as_ref().unwrap().ptr_eq(&x));
    assert_eq!(session.stats().shared_objects, 2);
}

#[test]
fn test_shared_paths_deduplicate() {
    let (factory, _) = factory();
    let image = cycle_image()
        .zeroed(0x4800, 32)
        .write_u64(0x4800, 0x4000)
        .write_u64(0x4810, 0x4000)
        .build();
    let mut session = Session::open(&factory, &image).unwrap();

    let pair: Pair = session.read("pair").unwrap();
    let left = pair.left.unwrap();
    let right = pair.right.unwrap();
    assert!(left.ptr_eq(&right));
    assert_eq!(left.address(), 0x4000);
    assert_eq!(session.stats().shared_objects, 2);
}

#[test]
fn test_external_cache_is_reused_across_sessions() {
    let (factory, _) = factory();
    let image = cycle_image().build();
    let cache = SharedCache::<Node>::new();

    let mut first = Session::open(&factory, &image).unwrap();
    first.register_shared_cache(cache.clone());
    let x1 = first.read_shared::<Node>("x").unwrap();
    first.close().unwrap();
    assert_eq!(cache.len(), 2);

    let mut second = Session::open(&factory, &image).unwrap();
    second.register_shared_cache(cache.clone());
    let x2 = second.read_shared::<Node>("x").unwrap();
    assert!(x1.ptr_eq(&x2));
    assert_eq!(second.stats().batches, 1);
    assert_eq!(second.stats().shared_objects, 0);
}

fn zoo_image() -> MemoryImage {
    image()
        .write_u64(0x6000, 0x7000)
        .write_u64(0x6008, 0x7100)
        .write_u64(0x6010, 0x7200)
        .zeroed(0x7000, 0x300)
        .write_u8(0x7000, 1)
        .write_i32(0x7008, 5)
        .write_u8(0x7100, 2)
        .write_i32(0x7108, 9)
        .write_u8(0x7200, 7)
        .build()
}

/// Two kennel slots share the b1 at 0x7000; the third holds the b2.
fn kennel_image() -> MemoryImage {
    image()
        .zeroed(0xc000, 48)
        .write_u64(0xc000, 0x7000)
        .write_u64(0xc010, 0x7000)
        .write_u64(0xc020, 0x7100)
        .zeroed(0x7000, 0x200)
        .write_u8(0x7000, 1)
        .write_i32(0x7008, 5)
        .write_u8(0x7100, 2)
        .write_i32(0x7108, 9)
        .build()
}

#[test]
fn test_shared_polymorphic_targets_deduplicate() {
    let (factory, _) = factory();
    let image = kennel_image();
    let mut session = Session::open(&factory, &image).unwrap();

    let kennel: Kennel = session.read("kennel").unwrap();
    let first = kennel.first.unwrap();
    let second = kennel.second.unwrap();
    let third = kennel.third.unwrap();
    assert!(first.ptr_eq(&second));
    assert!(!first.ptr_eq(&third));
    assert_eq!(first.get(), Some(&Thing::One(B1 { extra: 5 })));
    assert_eq!(third.get(), Some(&Thing::Two(B2 { extra: 9 })));
    assert_eq!(session.stats().shared_objects, 2);

    let again: Kennel = session.read("kennel").unwrap();
    assert!(again.first.unwrap().ptr_eq(&first));
    assert_eq!(session.stats().shared_objects, 2);
}

#[test]
fn test_shared_polymorphic_cache_is_reused() {
    let (factory, _) = factory();
    let image = kennel_image();
    let cache = SharedCache::<Thing>::new();

    let mut first = Session::open(&factory, &image).unwrap();
    first.register_shared_poly_cache(cache.clone());
    let kennel: Kennel = first.read("kennel").unwrap();
    first.close().unwrap();
    assert_eq!(cache.len(), 2);

    let mut second = Session::open(&factory, &image).unwrap();
    second.register_shared_poly_cache(cache.clone());
    let again: Kennel = second.read("kennel").unwrap();
    assert!(again.third.unwrap().ptr_eq(&kennel.third.unwrap()));
    assert_eq!(second.stats().batches, 1);
    assert_eq!(second.stats().shared_objects, 0);
}

#[test]
fn test_owned_polymorphic_rejects_shared_pointer() {
    let (factory, _) = factory();
    let image = kennel_image();
    let mut session = Session::open(&factory, &image).unwrap();

    let err = session.read::<LooseKennel>("kennel").unwrap_err();
    assert!(matches!(err, Error::LayoutMismatch { .. }));
    assert_eq!(image.pause_depth(), 0);
}

#[test]
fn test_polymorphic_routing_with_fallback() {
    let (factory, log) = factory();
    let image = zoo_image();
    let mut session = Session::open(&factory, &image).unwrap();

    let mut zoo = Vec::new();
    session
        .read_with("zoo", codec::seq(codec::poly::<Thing>()), &mut zoo)
        .unwrap();
    assert_eq!(
        zoo,
        vec![
            Some(Thing::One(B1 { extra: 5 })),
            Some(Thing::Two(B2 { extra: 9 })),
            Some(Thing::Other(Base)),
        ]
    );
    assert!(
        log.warnings()
            .iter()
            .any(|w| w.contains("PolymorphicUnresolved"))
    );
}

#[test]
fn test_unmatched_discriminator_closes_session() {
    let (factory, log) = factory();
    let image = zoo_image();
    let mut session = Session::open(&factory, &image).unwrap();

    let mut zoo = Vec::new();
    let err = session
        .read_with("zoo", codec::seq(codec::poly::<Closed>()), &mut zoo)
        .unwrap_err();
    assert!(matches!(err, Error::PolymorphicUnresolved { .. }));
    assert!(zoo.is_empty());
    assert!(!session.is_open());
    assert_eq!(image.pause_depth(), 0);
    let errors = log.errors();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("matches no registered concrete type"));

    let err = session.read::<R>("g").unwrap_err();
    assert!(matches!(err, Error::SessionClosed));
}

#[test]
fn test_transport_failure_reaches_log_sink() {
    let (factory, log) = factory();
    let image = image().build();
    let mut session = Session::open(&factory, &image).unwrap();

    let err = session.read::<R>("g").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TransportFailure);
    assert!(!session.is_open());
    let errors = log.errors();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].starts_with("Snapshot on fixture failed"));
    assert!(log.warnings().is_empty());
}

#[test]
fn test_unknown_identity_touches_nothing() {
    let (factory, log) = factory();
    let image = MemoryImage::builder().identity(&[1, 2]).build();
    let err = Session::open(&factory, &image).err().unwrap();
    assert!(matches!(err, Error::LayoutUnavailable { .. }));
    assert_eq!(image.pause_depth(), 0);
    assert_eq!(image.gate_pauses(), 0);
    assert_eq!(image.read_calls(), 0);
    assert_eq!(log.errors().len(), 1);
}

#[test]
fn test_cancellation_between_batches() {
    let config = EngineConfig::builder().batch_ceiling(64).build().unwrap();
    let (factory, log) = factory_with(config);

    let mut builder = image().zeroed(0x10000, 100 * 64);
    for i in 0..100u64 {
        builder = builder.write_u64(0x8000 + i * 8, 0x10000 + i * 64);
    }
    let token = CancelToken::new();
    let process = CancelAfter {
        image: builder.build(),
        token: token.clone(),
        after: 2,
        batches: AtomicUsize::new(0),
    };

    let options = SessionOptions::new().cancel_token(token);
    let mut session = Session::open_with(&factory, &process, options).unwrap();
    let mut cells: Vec<Option<Box<Cell>>> = vec![None];
    let err = session
        .read_with("cells", codec::seq(codec::owned()), &mut cells)
        .unwrap_err();

    assert!(matches!(err, Error::Cancelled));
    assert_eq!(log.warnings().len(), 1);
    assert!(log.errors().is_empty());
    assert_eq!(process.batches.load(Ordering::SeqCst), 2);
    assert_eq!(cells.len(), 1);
    assert_eq!(process.image.pause_depth(), 0);
}

#[test]
fn test_zero_deadline_expires_before_reading() {
    let config = EngineConfig::builder().deadline_ms(0).build().unwrap();
    let (factory, _) = factory_with(config);
    let image = scalar_image();
    let mut session = Session::open(&factory, &image).unwrap();

    let err = session.read::<R>("g").unwrap_err();
    assert!(matches!(err, Error::DeadlineExceeded { millis: 0 }));
    assert_eq!(image.read_calls(), 0);
    assert_eq!(image.pause_depth(), 0);
}

#[test]
fn test_owned_self_cycle_is_detected() {
    let config = EngineConfig::builder().max_depth(8).build().unwrap();
    let (factory, _) = factory_with(config);
    let image = image().write_u64(0x9000, 0x9000).build();
    let mut session = Session::open(&factory, &image).unwrap();

    let err = session.read::<Link>("ring").unwrap_err();
    assert!(matches!(err, Error::CycleDetected { .. }));
}

#[test]
fn test_unknown_path_is_reported() {
    let (factory, _) = factory();
    let image = scalar_image();
    let mut session = Session::open(&factory, &image).unwrap();
    let err = session.read::<R>("nope").unwrap_err();
    assert!(matches!(err, Error::UnknownSymbol { .. }));
}

#[test]
fn test_required_types_checked_before_pausing() {
    let (factory, log) = factory();
    let image = scalar_image();
    let options = SessionOptions::new().require::<R>().require::<Stale>();
    let err = Session::open_with(&factory, &image, options).err().unwrap();
    assert!(matches!(err, Error::LayoutMismatch { .. }));
    assert_eq!(image.gate_pauses(), 0);
    assert_eq!(image.read_calls(), 0);
    assert!(!log.errors().is_empty());
}

#[test]
fn test_lenient_session_tolerates_stale_fields() {
    let config = EngineConfig::builder()
        .policy(BindPolicy::Lenient)
        .build()
        .unwrap();
    let (factory, _) = factory_with(config);
    let image = scalar_image();
    let options = SessionOptions::new().require::<Stale>();
    let mut session = Session::open_with(&factory, &image, options).unwrap();
    let stale: Stale = session.read("g").unwrap();
    assert_eq!(stale.missing, 0);
}

#[test]
fn test_session_nests_inside_caller_pause() {
    let (factory, _) = factory();
    let image = scalar_image();
    image.pause().unwrap();

    let session = Session::open(&factory, &image).unwrap();
    assert_eq!(image.pause_depth(), 2);
    session.close().unwrap();
    assert_eq!(image.pause_depth(), 1);
    assert_eq!(image.gate_pauses(), 1);

    image.resume().unwrap();
    assert_eq!(image.pause_depth(), 0);
}

#[test]
fn test_null_pointer_and_empty_vector_need_no_follow_up() {
    let (factory, _) = factory();
    let image = image().zeroed(0xa000, 24).build();
    let mut session = Session::open(&factory, &image).unwrap();

    let holder: Holder = session.read("holder").unwrap();
    assert!(holder.owner.is_none());
    assert!(holder.items.is_empty());
    assert_eq!(session.stats().batches, 1);
}

#[test]
fn test_reads_strings_flags_and_maps() {
    let (factory, _) = factory();
    let image = image()
        .zeroed(0xb000, 80)
        .write_u64(0xb000, 0xb100)
        .write_u64(0xb008, 5)
        .write(0xb020, b"ab\0\0\0\0\0\0")
        .write_u64(0xb028, 0xb200)
        .write_u32(0xb030, 3)
        .write_u64(0xb038, 0xb300)
        .write_u64(0xb040, 0xb310)
        .write(0xb100, b"hello")
        .write_u8(0xb200, 0b101)
        .write_u32(0xb300, 1)
        .write_i32(0xb304, 10)
        .write_u32(0xb308, 2)
        .write_i32(0xb30c, -4)
        .build();
    let mut session = Session::open(&factory, &image).unwrap();

    let named: Named = session.read("named").unwrap();
    assert_eq!(named.name, "hello");
    assert_eq!(named.tag, "ab");
    assert!(named.perks.get(Perk::Swift));
    assert!(!named.perks.get(Perk::Strong));
    assert!(named.perks.get(Perk::Wise));
    assert_eq!(named.stock, BTreeMap::from([(1, 10), (2, -4)]));
}

#[test]
fn test_read_many_batches_roots_together() {
    let (factory, _) = factory();
    let image = image()
        .write_i32(0x1000, 7)
        .write_i32(0x1004, 42)
        .zeroed(0xa000, 24)
        .build();
    let mut session = Session::open(&factory, &image).unwrap();

    let mut r = R::default();
    let mut holder = Holder::default();
    session
        .read_many(vec![
            Root::record("g", &mut r),
            Root::record("holder", &mut holder),
        ])
        .unwrap();
    assert_eq!(r, R { a: 7, b: 42 });
    assert_eq!(session.stats().roots, 2);
    assert_eq!(session.stats().batches, 1);
}

#[test]
fn test_spawned_snapshot_delivers_to_channel() {
    let (factory, _) = factory();
    let image = Arc::new(scalar_image());
    let (tx, rx) = mpsc::channel();

    let (handle, _cancel) = spawn_snapshot(
        Arc::new(factory),
        Arc::clone(&image),
        tx,
        |session: &mut Session<'_, MemoryImage>| session.read::<R>("g"),
    );
    handle.join().unwrap();

    let r = rx.recv().unwrap().unwrap();
    assert_eq!(r, R { a: 7, b: 42 });
    assert_eq!(image.pause_depth(), 0);
}
