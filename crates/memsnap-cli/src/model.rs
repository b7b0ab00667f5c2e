//! Sample host model, bound against `layouts/demo.json`.
//!
//! `check` validates it against every catalog version and `snapshot`
//! materializes it from the `world` global.

use std::collections::BTreeMap;

use encoding_rs::UTF_8;
use memsnap_core::{
    Bitfield, FieldMap, FlagArray, FlagIndex, ForeignEnum, HostKey, Mirror, Polymorphic, PolyKey,
    Registry, Shared, codec,
};
use serde::Serialize;
use strum::{Display, EnumCount, FromRepr, IntoStaticStr};

/// Global path of the model root.
pub const ROOT: &str = "world";

/// Types checked before a session pauses the target.
pub fn hosts() -> Vec<HostKey> {
    vec![HostKey::of::<World>()]
}

pub fn polys() -> Vec<PolyKey> {
    vec![PolyKey::of::<UnitKind>()]
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Display, FromRepr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
#[repr(i32)]
pub enum Phase {
    #[default]
    Lobby = 0,
    Running = 1,
    Paused = 2,
    Finished = 3,
}

impl ForeignEnum for Phase {
    const NAME: &'static str = "phase";
    const SIZE: usize = 4;

    fn from_raw(raw: i64) -> Option<Self> {
        i32::try_from(raw).ok().and_then(Self::from_repr)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Status {
    pub online: bool,
    pub ranked: bool,
    pub modded: bool,
}

impl Bitfield for Status {
    const NAME: &'static str = "world_status";
    const WIDTH: usize = 1;

    fn from_bits(bits: u64) -> Self {
        Self {
            online: bits & 0b001 != 0,
            ranked: bits & 0b010 != 0,
            modded: bits & 0b100 != 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumCount, FromRepr, Display)]
#[strum(serialize_all = "lowercase")]
#[repr(u8)]
pub enum Perk {
    Scout,
    Trader,
    Veteran,
}

impl FlagIndex for Perk {
    const COUNT: usize = <Self as EnumCount>::COUNT;

    fn index(self) -> usize {
        self as usize
    }

    fn from_index(index: usize) -> Option<Self> {
        u8::try_from(index).ok().and_then(Self::from_repr)
    }
}

#[derive(Debug, Default, Serialize)]
pub struct Player {
    pub name: String,
    pub gold: i32,
    pub perks: FlagArray<Perk>,
}

impl Mirror for Player {
    const RECORD: &'static str = "player";

    fn bind(fields: &mut FieldMap<Self>) {
        fields
            .field("name", codec::text(UTF_8), |p| &mut p.name)
            .field("gold", codec::scalar(), |p| &mut p.gold)
            .field("perks", codec::flags(), |p| &mut p.perks);
    }
}

#[derive(Debug, Default, Serialize)]
pub struct Unit {
    pub id: u32,
    pub hp: i32,
    pub owner: Option<Shared<Player>>,
}

impl Mirror for Unit {
    const RECORD: &'static str = "unit";

    fn bind(fields: &mut FieldMap<Self>) {
        fields
            .field("id", codec::scalar(), |u| &mut u.id)
            .field("hp", codec::scalar(), |u| &mut u.hp)
            .field("owner", codec::shared(), |u| &mut u.owner);
    }
}

#[derive(Debug, Default, Serialize)]
pub struct Soldier {
    #[serde(flatten)]
    pub unit: Unit,
    pub rank: u16,
}

impl Mirror for Soldier {
    const RECORD: &'static str = "soldier";

    fn bind(fields: &mut FieldMap<Self>) {
        fields
            .inherit::<Unit>(|s| &mut s.unit)
            .field("rank", codec::scalar(), |s| &mut s.rank);
    }
}

#[derive(Debug, Default, Serialize)]
pub struct Worker {
    #[serde(flatten)]
    pub unit: Unit,
    pub carrying: i32,
}

impl Mirror for Worker {
    const RECORD: &'static str = "worker";

    fn bind(fields: &mut FieldMap<Self>) {
        fields
            .inherit::<Unit>(|w| &mut w.unit)
            .field("carrying", codec::scalar(), |w| &mut w.carrying);
    }
}

#[derive(Debug, Serialize, IntoStaticStr)]
#[serde(tag = "kind", rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum UnitKind {
    Soldier(Soldier),
    Worker(Worker),
    Other(Unit),
}

impl UnitKind {
    pub fn unit(&self) -> &Unit {
        match self {
            UnitKind::Soldier(s) => &s.unit,
            UnitKind::Worker(w) => &w.unit,
            UnitKind::Other(u) => u,
        }
    }

    pub fn kind(&self) -> &'static str {
        self.into()
    }

    /// Kind-specific value: rank or load carried.
    pub fn detail(&self) -> Option<i64> {
        match self {
            UnitKind::Soldier(s) => Some(i64::from(s.rank)),
            UnitKind::Worker(w) => Some(i64::from(w.carrying)),
            UnitKind::Other(_) => None,
        }
    }
}

impl Polymorphic for UnitKind {
    const BASE: &'static str = "unit";

    fn register(registry: &mut Registry<Self>) {
        registry
            .concrete(UnitKind::Soldier)
            .concrete(UnitKind::Worker)
            .fallback(UnitKind::Other);
    }
}

#[derive(Debug, Default, Serialize)]
pub struct World {
    pub tick: u32,
    pub phase: Phase,
    pub status: Status,
    pub name: String,
    pub units: Vec<Option<UnitKind>>,
    pub leader: Option<Shared<Player>>,
    pub stock: BTreeMap<u32, i32>,
}

impl Mirror for World {
    const RECORD: &'static str = "world";

    fn bind(fields: &mut FieldMap<Self>) {
        fields
            .field("tick", codec::scalar(), |w| &mut w.tick)
            .field("phase", codec::enumeration(), |w| &mut w.phase)
            .field("status", codec::bits(), |w| &mut w.status)
            .field("name", codec::text(UTF_8), |w| &mut w.name)
            .field("units", codec::seq(codec::poly()), |w| &mut w.units)
            .field("leader", codec::shared(), |w| &mut w.leader)
            .field(
                "stock",
                codec::map(codec::scalar(), codec::scalar()),
                |w| &mut w.stock,
            );
    }
}
