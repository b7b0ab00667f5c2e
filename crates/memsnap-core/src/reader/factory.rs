//! Reader plans: host bindings resolved against one version, built once and
//! cached per `(version, host type)`.

use std::any::{Any, TypeId};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use super::mirror::{FieldMap, Mirror, Polymorphic, Registry};
use super::report::{BindFailure, BindReport, CompatReport};
use super::resolve::resolve;
use super::scalar::read_uint;
use super::shape::{HostKey, PolyKey, Step};
use crate::collab::{LogSink, TracingLog};
use crate::config::{BindPolicy, EngineConfig};
use crate::error::{Error, Result};
use crate::layout::{Catalog, Discriminator, DiscriminatorKind, Identity, Version};

/// One bound field: where it lives in the record and how to read it.
#[derive(Debug, Clone)]
pub(crate) struct BoundField {
    /// Index into the host's field map.
    pub(crate) entry: usize,
    pub(crate) name: &'static str,
    pub(crate) offset: usize,
    pub(crate) size: usize,
    pub(crate) step: Step,
}

/// Type-erased part of a reader plan, enough to drive the fetch phase.
#[derive(Debug)]
pub struct PlanLayout {
    pub(crate) host: &'static str,
    pub(crate) record: String,
    pub(crate) size: usize,
    pub(crate) fields: Vec<BoundField>,
    pub(crate) skipped: Vec<&'static str>,
}

impl PlanLayout {
    pub fn record(&self) -> &str {
        &self.record
    }

    /// Foreign record size; the block read for one instance.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn bound_fields(&self) -> impl Iterator<Item = (&'static str, usize)> + '_ {
        self.fields.iter().map(|f| (f.name, f.offset))
    }

    /// Fields left at their default under the lenient policy.
    pub fn skipped(&self) -> &[&'static str] {
        &self.skipped
    }
}

/// A host type bound to one version.
pub struct ReaderPlan<T> {
    pub(crate) layout: Arc<PlanLayout>,
    pub(crate) map: FieldMap<T>,
}

impl<T> ReaderPlan<T> {
    pub fn layout(&self) -> &PlanLayout {
        &self.layout
    }
}

impl<T> fmt::Debug for ReaderPlan<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReaderPlan")
            .field("layout", &self.layout)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub(crate) struct PolyArm {
    pub(crate) record: &'static str,
    /// Discriminant, or the version-relocated vtable address.
    pub(crate) matcher: u64,
    pub(crate) host: HostKey,
    /// Index into the registry's arms.
    pub(crate) index: usize,
}

/// Discriminator routing of a polymorphic base in one version.
#[derive(Debug)]
pub struct PolyLayout {
    pub(crate) base: String,
    pub(crate) discriminator: Discriminator,
    pub(crate) arms: Vec<PolyArm>,
    pub(crate) fallback: Option<HostKey>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Selection {
    Arm(usize),
    Fallback,
    Unmatched,
}

impl PolyLayout {
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Decode the discriminator from its bytes.
    pub(crate) fn discriminant(&self, bytes: &[u8]) -> u64 {
        read_uint(bytes, self.discriminator.size)
    }

    /// First registered arm matching `raw`, in declaration order.
    pub(crate) fn select(&self, raw: u64, base_offset: u64) -> Selection {
        let hit = self.arms.iter().position(|arm| match self.discriminator.kind {
            DiscriminatorKind::Value => arm.matcher == raw,
            DiscriminatorKind::Vtable => arm.matcher.wrapping_add(base_offset) == raw,
        });
        match (hit, self.fallback) {
            (Some(i), _) => Selection::Arm(i),
            (None, Some(_)) => Selection::Fallback,
            (None, None) => Selection::Unmatched,
        }
    }

    /// Host type to read for a selection.
    pub(crate) fn host_of(&self, selection: Selection) -> Option<HostKey> {
        match selection {
            Selection::Arm(i) => self.arms.get(i).map(|arm| arm.host),
            Selection::Fallback => self.fallback,
            Selection::Unmatched => None,
        }
    }
}

pub struct PolyPlan<P> {
    pub(crate) layout: Arc<PolyLayout>,
    pub(crate) registry: Registry<P>,
}

impl<P> PolyPlan<P> {
    pub fn layout(&self) -> &PolyLayout {
        &self.layout
    }
}

/// Result of a dry-run bind: failures plus the types it reaches.
pub(crate) struct Probe {
    pub(crate) failures: Vec<BindFailure>,
    pub(crate) hosts: Vec<HostKey>,
    pub(crate) polys: Vec<PolyKey>,
}

type PlanCache = Mutex<HashMap<(Identity, TypeId), Arc<dyn Any + Send + Sync>>>;

/// Binds host types to layout versions and caches the resulting plans.
pub struct ReaderFactory {
    catalog: Arc<Catalog>,
    config: EngineConfig,
    log: Arc<dyn LogSink>,
    plans: PlanCache,
}

impl ReaderFactory {
    pub fn new(catalog: Arc<Catalog>, config: EngineConfig) -> Self {
        Self {
            catalog,
            config,
            log: Arc::new(TracingLog),
            plans: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_log(mut self, log: Arc<dyn LogSink>) -> Self {
        self.log = log;
        self
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn log(&self) -> &dyn LogSink {
        self.log.as_ref()
    }

    /// Version matching a process identity.
    pub fn select_version(&self, identity: &Identity) -> Result<Arc<Version>> {
        self.catalog
            .version(identity)
            .cloned()
            .ok_or_else(|| Error::LayoutUnavailable {
                identity: identity.to_string(),
            })
    }

    /// Number of cached plans.
    pub fn plan_count(&self) -> usize {
        self.plans.lock().map(|plans| plans.len()).unwrap_or(0)
    }

    fn cached<X: Any + Send + Sync>(&self, key: &(Identity, TypeId)) -> Option<Arc<X>> {
        let plans = self.plans.lock().unwrap_or_else(|e| e.into_inner());
        plans
            .get(key)
            .cloned()
            .and_then(|plan| plan.downcast::<X>().ok())
    }

    fn store<X: Any + Send + Sync>(&self, key: (Identity, TypeId), plan: Arc<X>) -> Arc<X> {
        let mut plans = self.plans.lock().unwrap_or_else(|e| e.into_inner());
        // A concurrent bind may have won; keep the first plan.
        let entry = plans.entry(key).or_insert_with(|| plan.clone());
        Arc::clone(entry).downcast::<X>().unwrap_or(plan)
    }

    /// Bind `T` to `version`.
    ///
    /// Under [`BindPolicy::Strict`] any unbound field fails with
    /// `LayoutMismatch`; under `Lenient` such fields are logged and left at
    /// their default. An unknown record always fails.
    pub fn bind<T: Mirror>(&self, version: &Version) -> Result<Arc<ReaderPlan<T>>> {
        let key = (version.identity.clone(), TypeId::of::<T>());
        if let Some(plan) = self.cached::<ReaderPlan<T>>(&key) {
            return Ok(plan);
        }

        let (plan, failures) = compile::<T>(version);
        let fatal = plan.is_none() || self.config.policy == BindPolicy::Strict;
        if !failures.is_empty() {
            for failure in &failures {
                if fatal {
                    self.log.error(&format!("[{}] {}", version.label, failure));
                } else {
                    self.log.warn(&format!("[{}] {}", version.label, failure));
                }
            }
            if fatal {
                return Err(Error::LayoutMismatch {
                    version: version.label.clone(),
                    report: BindReport { failures },
                });
            }
        }
        let Some(plan) = plan else {
            return Err(Error::LayoutMismatch {
                version: version.label.clone(),
                report: BindReport { failures },
            });
        };
        debug!(
            "Bound {} to {} in {} ({} fields)",
            plan.layout.host,
            plan.layout.record,
            version.label,
            plan.layout.fields.len()
        );
        Ok(self.store(key, Arc::new(plan)))
    }

    /// Bind a polymorphic host to `version`.
    pub fn bind_poly<P: Polymorphic>(&self, version: &Version) -> Result<Arc<PolyPlan<P>>> {
        let key = (version.identity.clone(), TypeId::of::<P>());
        if let Some(plan) = self.cached::<PolyPlan<P>>(&key) {
            return Ok(plan);
        }

        let (plan, failures) = compile_poly::<P>(version);
        let fatal = plan.is_none() || self.config.policy == BindPolicy::Strict;
        for failure in &failures {
            if fatal {
                self.log.error(&format!("[{}] {}", version.label, failure));
            } else {
                self.log.warn(&format!("[{}] {}", version.label, failure));
            }
        }
        match plan {
            Some(plan) if !fatal || failures.is_empty() => Ok(self.store(key, Arc::new(plan))),
            _ => Err(Error::LayoutMismatch {
                version: version.label.clone(),
                report: BindReport { failures },
            }),
        }
    }

    pub(crate) fn probe<T: Mirror>(&self, version: &Version) -> Probe {
        let mut map = FieldMap::<T>::new();
        T::bind(&mut map);
        let mut hosts = Vec::new();
        let mut polys = Vec::new();
        for entry in &map.entries {
            entry.shape.collect_keys(&mut hosts, &mut polys);
        }
        let (_, failures) = compile::<T>(version);
        Probe {
            failures,
            hosts,
            polys,
        }
    }

    pub(crate) fn probe_poly<P: Polymorphic>(&self, version: &Version) -> Probe {
        let mut registry = Registry::<P>::new();
        P::register(&mut registry);
        let hosts = registry
            .arms
            .iter()
            .chain(registry.fallback.iter())
            .map(|arm| arm.host)
            .collect();
        let (_, failures) = compile_poly::<P>(version);
        Probe {
            failures,
            hosts,
            polys: Vec::new(),
        }
    }

    /// Dry-run bind of every listed type and everything reachable from it.
    /// Never reads the foreign process.
    pub fn test_all(&self, version: &Version, hosts: &[HostKey], polys: &[PolyKey]) -> CompatReport {
        let mut seen = HashSet::new();
        let mut host_queue: Vec<HostKey> = hosts.to_vec();
        let mut poly_queue: Vec<PolyKey> = polys.to_vec();
        let mut bound = Vec::new();
        let mut failures = Vec::new();

        loop {
            let (id, name, probe) = if let Some(host) = host_queue.pop() {
                (host.id, host.name, host.probe)
            } else if let Some(poly) = poly_queue.pop() {
                (poly.id, poly.name, poly.probe)
            } else {
                break;
            };
            if !seen.insert(id) {
                continue;
            }
            let result = probe(self, version);
            if result.failures.is_empty() {
                bound.push(name.to_string());
            }
            failures.extend(result.failures);
            host_queue.extend(result.hosts);
            poly_queue.extend(result.polys);
        }

        info!(
            "Compatibility of {}: {} types bound, {} failures",
            version.label,
            bound.len(),
            failures.len()
        );
        CompatReport {
            version: version.label.clone(),
            identity: version.identity.to_string(),
            source: version.source.clone(),
            bound,
            failures,
        }
    }
}

impl Catalog {
    /// Compatibility of `hosts` and `polys` against every loaded version,
    /// strictly, without reading any process.
    pub fn validate_against(self: &Arc<Self>, hosts: &[HostKey], polys: &[PolyKey]) -> Vec<CompatReport> {
        let factory = ReaderFactory::new(Arc::clone(self), EngineConfig::default());
        self.all_versions()
            .map(|version| factory.test_all(version, hosts, polys))
            .collect()
    }
}

fn failure(host: &str, record: &str, field: Option<&str>, reason: impl Into<String>) -> BindFailure {
    BindFailure {
        host: host.to_string(),
        record: record.to_string(),
        field: field.map(str::to_string),
        reason: reason.into(),
    }
}

/// Resolve every association of `T`; failed fields are reported and left
/// out of the layout.
fn compile<T: Mirror>(version: &Version) -> (Option<ReaderPlan<T>>, Vec<BindFailure>) {
    let host = std::any::type_name::<T>();
    let mut map = FieldMap::<T>::new();
    T::bind(&mut map);

    let mut failures = Vec::new();
    let Some(record) = version.record(T::RECORD) else {
        failures.push(failure(host, T::RECORD, None, "record not present in layout"));
        return (None, failures);
    };
    for base in &map.bases {
        if !version.is_derived_from(T::RECORD, base) {
            failures.push(failure(
                host,
                T::RECORD,
                None,
                format!("record does not derive from {}", base),
            ));
        }
    }

    let mut fields = Vec::with_capacity(map.entries.len());
    let mut skipped = Vec::new();
    for (index, entry) in map.entries.iter().enumerate() {
        let bound = version
            .find_field(T::RECORD, entry.foreign)
            .ok_or_else(|| format!("record {} has no field named {}", T::RECORD, entry.foreign))
            .and_then(|field| {
                let size = version.size_of(&field.ty)?;
                let step = resolve(&entry.shape, &field.ty, version)?;
                Ok(BoundField {
                    entry: index,
                    name: entry.foreign,
                    offset: field.offset,
                    size,
                    step,
                })
            });
        match bound {
            Ok(field) => fields.push(field),
            Err(reason) => {
                failures.push(failure(host, T::RECORD, Some(entry.foreign), reason));
                skipped.push(entry.foreign);
            }
        }
    }

    let layout = PlanLayout {
        host,
        record: record.name.clone(),
        size: record.size,
        fields,
        skipped,
    };
    (
        Some(ReaderPlan {
            layout: Arc::new(layout),
            map,
        }),
        failures,
    )
}

fn compile_poly<P: Polymorphic>(version: &Version) -> (Option<PolyPlan<P>>, Vec<BindFailure>) {
    let host = std::any::type_name::<P>();
    let mut registry = Registry::<P>::new();
    P::register(&mut registry);

    let mut failures = Vec::new();
    if version.record(P::BASE).is_none() {
        failures.push(failure(host, P::BASE, None, "base record not present in layout"));
        return (None, failures);
    }
    let Some(discriminator) = version.discriminator_of(P::BASE) else {
        failures.push(failure(host, P::BASE, None, "base record has no discriminator"));
        return (None, failures);
    };

    let mut arms = Vec::with_capacity(registry.arms.len());
    for (index, arm) in registry.arms.iter().enumerate() {
        let record = arm.host.record;
        let matcher = match version.record(record) {
            None => Err("concrete record not present in layout".to_string()),
            Some(_) if !version.is_derived_from(record, P::BASE) => {
                Err(format!("concrete record does not derive from {}", P::BASE))
            }
            Some(desc) => match discriminator.kind {
                DiscriminatorKind::Value => desc
                    .discriminant
                    .ok_or_else(|| "concrete record declares no discriminant".to_string()),
                DiscriminatorKind::Vtable => version
                    .vtable(record)
                    .map(|vt| version.base.wrapping_add(vt))
                    .ok_or_else(|| "no vtable address for concrete record".to_string()),
            },
        };
        match matcher {
            Ok(matcher) => arms.push(PolyArm {
                record,
                matcher,
                host: arm.host,
                index,
            }),
            Err(reason) => failures.push(failure(host, record, None, reason)),
        }
    }

    let fallback = match &registry.fallback {
        Some(arm) if version.is_derived_from(P::BASE, arm.host.record) => Some(arm.host),
        Some(arm) => {
            failures.push(failure(
                host,
                arm.host.record,
                None,
                format!("fallback is not {} or one of its bases", P::BASE),
            ));
            None
        }
        None => None,
    };

    let layout = PolyLayout {
        base: P::BASE.to_string(),
        discriminator,
        arms,
        fallback,
    };
    (
        Some(PolyPlan {
            layout: Arc::new(layout),
            registry,
        }),
        failures,
    )
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::collab::CollectingLog;
    use crate::layout::LayoutFile;
    use crate::reader::codec;

    const LAYOUT: &str = r#"{
        "versions": [
            {"identity": "01", "label": "v1", "base": "0x1000",
             "vtables": {"wolf": "0x400", "bear": "0x480"}},
            {"identity": "02", "label": "v2", "offsets": {"unit.hp": 8}, "sizes": {"unit": 16}}
        ],
        "records": [
            {"name": "unit", "fields": [
                {"name": "id", "offset": 0, "type": "int32"},
                {"name": "hp", "offset": 4, "type": "int32"},
                {"name": "owner", "offset": 8, "type": "pointer<player>"}
            ]},
            {"name": "hero", "base": "unit", "fields": [
                {"name": "level", "offset": 16, "type": "uint16"}
            ]},
            {"name": "player", "fields": [
                {"name": "gold", "offset": 0, "type": "float"}
            ]},
            {"name": "animal", "size": 16, "discriminator": {"kind": "vtable"}},
            {"name": "wolf", "base": "animal", "size": 16},
            {"name": "bear", "base": "animal", "size": 24}
        ]
    }"#;

    fn catalog() -> Arc<Catalog> {
        let file: LayoutFile = serde_json::from_str(LAYOUT).unwrap();
        Arc::new(Catalog::from_layout(&file, Path::new("test.json")).unwrap())
    }

    fn factory(policy: BindPolicy) -> (ReaderFactory, Arc<CollectingLog>) {
        let log = Arc::new(CollectingLog::new());
        let config = EngineConfig::builder().policy(policy).build().unwrap();
        let factory = ReaderFactory::new(catalog(), config).with_log(log.clone());
        (factory, log)
    }

    fn v1(factory: &ReaderFactory) -> Arc<Version> {
        factory.select_version(&Identity::new(vec![1])).unwrap()
    }

    #[derive(Default)]
    struct Unit {
        id: i32,
        hp: i32,
    }

    impl Mirror for Unit {
        const RECORD: &'static str = "unit";

        fn bind(fields: &mut FieldMap<Self>) {
            fields
                .field("id", codec::scalar(), |u| &mut u.id)
                .field("hp", codec::scalar(), |u| &mut u.hp);
        }
    }

    #[derive(Default)]
    struct Hero {
        unit: Unit,
        level: u16,
    }

    impl Mirror for Hero {
        const RECORD: &'static str = "hero";

        fn bind(fields: &mut FieldMap<Self>) {
            fields
                .inherit::<Unit>(|h| &mut h.unit)
                .field("level", codec::scalar(), |h| &mut h.level);
        }
    }

    /// Disagrees with the layout twice: a missing field and a width.
    #[derive(Default)]
    struct Sloppy {
        hp: i64,
        mana: i32,
        id: i32,
    }

    impl Mirror for Sloppy {
        const RECORD: &'static str = "unit";

        fn bind(fields: &mut FieldMap<Self>) {
            fields
                .field("hp", codec::scalar(), |s| &mut s.hp)
                .field("mana", codec::scalar(), |s| &mut s.mana)
                .field("id", codec::scalar(), |s| &mut s.id);
        }
    }

    #[derive(Default)]
    struct Ghost;

    impl Mirror for Ghost {
        const RECORD: &'static str = "ghost";

        fn bind(_: &mut FieldMap<Self>) {}
    }

    #[derive(Default)]
    struct Player {
        gold: i32,
    }

    impl Mirror for Player {
        const RECORD: &'static str = "player";

        fn bind(fields: &mut FieldMap<Self>) {
            fields.field("gold", codec::scalar(), |p| &mut p.gold);
        }
    }

    #[derive(Default)]
    struct Owned {
        owner: Option<Box<Player>>,
    }

    impl Mirror for Owned {
        const RECORD: &'static str = "unit";

        fn bind(fields: &mut FieldMap<Self>) {
            fields.field("owner", codec::owned(), |o| &mut o.owner);
        }
    }

    #[derive(Default)]
    struct Wolf;
    #[derive(Default)]
    struct Bear;
    #[derive(Default)]
    struct Animal;

    impl Mirror for Wolf {
        const RECORD: &'static str = "wolf";
        fn bind(_: &mut FieldMap<Self>) {}
    }

    impl Mirror for Bear {
        const RECORD: &'static str = "bear";
        fn bind(_: &mut FieldMap<Self>) {}
    }

    impl Mirror for Animal {
        const RECORD: &'static str = "animal";
        fn bind(_: &mut FieldMap<Self>) {}
    }

    enum Beast {
        Wolf(Wolf),
        Bear(Bear),
        Other(Animal),
    }

    impl Polymorphic for Beast {
        const BASE: &'static str = "animal";

        fn register(registry: &mut Registry<Self>) {
            registry
                .concrete(Beast::Wolf)
                .concrete(Beast::Bear)
                .fallback(Beast::Other);
        }
    }

    #[test]
    fn test_select_version_unknown_identity() {
        let (factory, _) = factory(BindPolicy::Strict);
        let err = factory
            .select_version(&Identity::new(vec![9]))
            .unwrap_err();
        assert!(matches!(err, Error::LayoutUnavailable { .. }));
    }

    #[test]
    fn test_bind_is_cached_per_version() {
        let (factory, _) = factory(BindPolicy::Strict);
        let version = v1(&factory);
        let first = factory.bind::<Unit>(&version).unwrap();
        let second = factory.bind::<Unit>(&version).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(factory.plan_count(), 1);

        let v2 = factory.select_version(&Identity::new(vec![2])).unwrap();
        let other = factory.bind::<Unit>(&v2).unwrap();
        assert_eq!(other.layout().size(), 16);
        let offsets: Vec<_> = other.layout().bound_fields().collect();
        assert_eq!(offsets, vec![("id", 0), ("hp", 8)]);
        assert_eq!(factory.plan_count(), 2);
    }

    #[test]
    fn test_plan_debug_shows_layout() {
        let (factory, _) = factory(BindPolicy::Strict);
        let plan = factory.bind::<Unit>(&v1(&factory)).unwrap();
        let shown = format!("{:?}", plan);
        assert!(shown.starts_with("ReaderPlan"));
        assert!(shown.contains("record: \"unit\""));
    }

    #[test]
    fn test_strict_bind_reports_every_failure() {
        let (factory, log) = factory(BindPolicy::Strict);
        let err = factory.bind::<Sloppy>(&v1(&factory)).unwrap_err();
        match err {
            Error::LayoutMismatch { version, report } => {
                assert_eq!(version, "v1");
                let fields: Vec<_> = report
                    .failures
                    .iter()
                    .map(|f| f.field.clone().unwrap())
                    .collect();
                assert_eq!(fields, vec!["hp", "mana"]);
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(log.errors().len(), 2);
        assert_eq!(factory.plan_count(), 0);
    }

    #[test]
    fn test_lenient_bind_skips_unbound_fields() {
        let (factory, log) = factory(BindPolicy::Lenient);
        let plan = factory.bind::<Sloppy>(&v1(&factory)).unwrap();
        assert_eq!(plan.layout().skipped(), &["hp", "mana"]);
        let bound: Vec<_> = plan.layout().bound_fields().collect();
        assert_eq!(bound, vec![("id", 0)]);
        assert_eq!(log.warnings().len(), 2);
    }

    #[test]
    fn test_unknown_record_fails_under_any_policy() {
        for policy in [BindPolicy::Strict, BindPolicy::Lenient] {
            let (factory, _) = factory(policy);
            let err = factory.bind::<Ghost>(&v1(&factory)).err().unwrap();
            assert!(matches!(err, Error::LayoutMismatch { .. }));
        }
    }

    #[test]
    fn test_inherited_fields_bind_first() {
        let (factory, _) = factory(BindPolicy::Strict);
        let plan = factory.bind::<Hero>(&v1(&factory)).unwrap();
        let names: Vec<_> = plan.layout().bound_fields().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["id", "hp", "level"]);
        assert_eq!(plan.layout().record(), "hero");
    }

    #[test]
    fn test_poly_bind_and_select() {
        let (factory, _) = factory(BindPolicy::Strict);
        let plan = factory.bind_poly::<Beast>(&v1(&factory)).unwrap();
        let layout = plan.layout();
        assert_eq!(layout.base(), "animal");
        assert_eq!(layout.discriminator.size, 8);

        // Matchers are relocated by the version base, then the process base.
        assert_eq!(layout.select(0x1400 + 0x10, 0x10), Selection::Arm(0));
        assert_eq!(layout.select(0x1480, 0), Selection::Arm(1));
        assert_eq!(layout.select(0x9999, 0), Selection::Fallback);
        assert_eq!(
            layout.host_of(Selection::Fallback).map(|h| h.record()),
            Some("animal")
        );
        assert_eq!(plan.registry.arms[0].host.record(), "wolf");
    }

    #[test]
    fn test_test_all_follows_reachable_types() {
        let (factory, _) = factory(BindPolicy::Strict);
        let version = v1(&factory);
        let report = factory.test_all(
            &version,
            &[HostKey::of::<Owned>(), HostKey::of::<Unit>()],
            &[PolyKey::of::<Beast>()],
        );
        // `player.gold` is a float; the host reads an integer.
        assert!(!report.is_ok());
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].record, "player");
        assert!(report.bound.iter().any(|name| name.ends_with("Unit")));
        assert!(report.bound.iter().any(|name| name.ends_with("Beast")));
        assert!(report.bound.iter().any(|name| name.ends_with("Wolf")));
        assert!(!report.bound.iter().any(|name| name.ends_with("Player")));
    }

    #[test]
    fn test_validate_against_every_version() {
        let catalog = catalog();
        let reports =
            catalog.validate_against(&[HostKey::of::<Hero>()], &[PolyKey::of::<Beast>()]);
        assert_eq!(reports.len(), 2);
        assert!(reports[0].is_ok());

        // v2 declares no vtables, so neither concrete arm can be matched.
        assert_eq!(reports[1].version, "v2");
        let records: Vec<_> = reports[1].failures.iter().map(|f| f.record.as_str()).collect();
        assert_eq!(records, vec!["wolf", "bear"]);
    }
}
