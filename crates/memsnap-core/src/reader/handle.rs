//! Handles for non-tree edges of a snapshot.

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::{Arc, OnceLock};

use serde::{Serialize, Serializer};

use super::scalar::FlagIndex;

/// Shared-ownership handle to a host object materialized from one foreign
/// address.
///
/// Two handles obtained for the same `(type, address)` within a session (or
/// through the same external cache) point at the same allocation. Equality
/// and hashing go by foreign address so that cyclic graphs compare without
/// recursing.
pub struct Shared<T> {
    address: u64,
    cell: Arc<OnceLock<T>>,
}

impl<T> Shared<T> {
    /// A handle that is already populated.
    pub fn new(address: u64, value: T) -> Self {
        let cell = OnceLock::new();
        let _ = cell.set(value);
        Self {
            address,
            cell: Arc::new(cell),
        }
    }

    pub(crate) fn pending(address: u64) -> Self {
        Self {
            address,
            cell: Arc::new(OnceLock::new()),
        }
    }

    /// Populate a pending handle. Returns false if it was already set.
    pub(crate) fn fill(&self, value: T) -> bool {
        self.cell.set(value).is_ok()
    }

    pub fn address(&self) -> u64 {
        self.address
    }

    /// The materialized value. Always `Some` on handles returned from a
    /// completed snapshot.
    pub fn get(&self) -> Option<&T> {
        self.cell.get()
    }

    /// Whether both handles share one allocation.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }

    /// Number of handles sharing this allocation.
    pub fn handle_count(&self) -> usize {
        Arc::strong_count(&self.cell)
    }
}

impl<T> Clone for Shared<T> {
    fn clone(&self) -> Self {
        Self {
            address: self.address,
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<T> PartialEq for Shared<T> {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl<T> Eq for Shared<T> {}

impl<T> Hash for Shared<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address.hash(state);
    }
}

impl<T> fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shared")
            .field("address", &format_args!("{:#x}", self.address))
            .field("filled", &self.cell.get().is_some())
            .finish()
    }
}

impl<T> Serialize for Shared<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.address)
    }
}

/// A non-owning reference, kept as the bare foreign address and resolved
/// through a lookup table after the snapshot completes.
pub struct BackRef<T> {
    address: u64,
    _marker: PhantomData<fn() -> T>,
}

impl<T> BackRef<T> {
    pub fn new(address: u64) -> Self {
        Self {
            address,
            _marker: PhantomData,
        }
    }

    pub fn address(&self) -> u64 {
        self.address
    }

    pub fn is_null(&self) -> bool {
        self.address == 0
    }

    pub fn resolve<'a>(&self, table: &'a HashMap<u64, Shared<T>>) -> Option<&'a Shared<T>> {
        table.get(&self.address)
    }
}

impl<T> Default for BackRef<T> {
    fn default() -> Self {
        Self::new(0)
    }
}

impl<T> Clone for BackRef<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for BackRef<T> {}

impl<T> PartialEq for BackRef<T> {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl<T> Eq for BackRef<T> {}

impl<T> Hash for BackRef<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address.hash(state);
    }
}

impl<T> fmt::Debug for BackRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BackRef({:#x})", self.address)
    }
}

impl<T> Serialize for BackRef<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.address)
    }
}

/// Flags indexed by a host enumeration.
pub struct FlagArray<E> {
    bits: Vec<bool>,
    _marker: PhantomData<fn() -> E>,
}

impl<E: FlagIndex> FlagArray<E> {
    pub fn new() -> Self {
        Self {
            bits: vec![false; E::COUNT],
            _marker: PhantomData,
        }
    }

    /// Build from an LSB-first bit buffer holding `len` flags.
    pub(crate) fn from_packed(bytes: &[u8], len: usize) -> Self {
        let mut flags = Self::new();
        for i in 0..len.min(E::COUNT) {
            flags.bits[i] = bytes.get(i / 8).is_some_and(|b| b & (1 << (i % 8)) != 0);
        }
        flags
    }

    pub fn get(&self, flag: E) -> bool {
        self.bits.get(flag.index()).copied().unwrap_or(false)
    }

    pub fn set(&mut self, flag: E, value: bool) {
        if let Some(bit) = self.bits.get_mut(flag.index()) {
            *bit = value;
        }
    }

    /// Every flag that is set, in index order.
    pub fn iter_set(&self) -> impl Iterator<Item = E> + '_ {
        self.bits
            .iter()
            .enumerate()
            .filter(|(_, set)| **set)
            .filter_map(|(i, _)| E::from_index(i))
    }

    pub fn count_set(&self) -> usize {
        self.bits.iter().filter(|b| **b).count()
    }
}

impl<E> Clone for FlagArray<E> {
    fn clone(&self) -> Self {
        Self {
            bits: self.bits.clone(),
            _marker: PhantomData,
        }
    }
}

impl<E> PartialEq for FlagArray<E> {
    fn eq(&self, other: &Self) -> bool {
        self.bits == other.bits
    }
}

impl<E> Eq for FlagArray<E> {}

impl<E: FlagIndex> Default for FlagArray<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: FlagIndex + fmt::Debug> fmt::Debug for FlagArray<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter_set()).finish()
    }
}

impl<E: FlagIndex> Serialize for FlagArray<E> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let set: Vec<usize> = self
            .bits
            .iter()
            .enumerate()
            .filter(|(_, b)| **b)
            .map(|(i, _)| i)
            .collect();
        set.serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Status {
        Poisoned,
        Burning,
        Frozen,
    }

    impl FlagIndex for Status {
        const COUNT: usize = 3;

        fn index(self) -> usize {
            self as usize
        }

        fn from_index(index: usize) -> Option<Self> {
            [Status::Poisoned, Status::Burning, Status::Frozen]
                .get(index)
                .copied()
        }
    }

    #[test]
    fn test_shared_identity_and_equality() {
        let a = Shared::new(0x1000, 5u32);
        let b = a.clone();
        let c = Shared::new(0x1000, 5u32);
        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&c));
        assert_eq!(a, c);
        assert_eq!(a.handle_count(), 2);
        assert_eq!(a.get(), Some(&5));
    }

    #[test]
    fn test_pending_shared_fills_once() {
        let handle: Shared<u32> = Shared::pending(0x20);
        let alias = handle.clone();
        assert!(handle.get().is_none());
        assert!(handle.fill(1));
        assert!(!alias.fill(2));
        assert_eq!(alias.get(), Some(&1));
    }

    #[test]
    fn test_back_ref_resolution() {
        let mut table = HashMap::new();
        table.insert(0x40, Shared::new(0x40, "unit"));
        let back: BackRef<&str> = BackRef::new(0x40);
        assert_eq!(back.resolve(&table).and_then(|s| s.get()), Some(&"unit"));
        assert!(BackRef::<&str>::default().is_null());
        assert!(BackRef::<&str>::new(0x44).resolve(&table).is_none());
    }

    #[test]
    fn test_flag_array_from_packed() {
        let flags: FlagArray<Status> = FlagArray::from_packed(&[0b101], 3);
        assert!(flags.get(Status::Poisoned));
        assert!(!flags.get(Status::Burning));
        assert!(flags.get(Status::Frozen));
        assert_eq!(
            flags.iter_set().collect::<Vec<_>>(),
            vec![Status::Poisoned, Status::Frozen]
        );

        // Flags beyond the foreign length stay clear.
        let short: FlagArray<Status> = FlagArray::from_packed(&[0xff], 2);
        assert_eq!(short.count_set(), 2);
        assert_eq!(serde_json::to_string(&short).unwrap(), "[0,1]");
    }
}
