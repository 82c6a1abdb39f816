//! Crate-wide collection aliases.
//!
//! Hashing is not a bottleneck we care to be resilient about; these maps are
//! keyed by window and space ids we receive from the OS, so the faster
//! non-DoS-resistant hasher is fine.

pub type HashMap<K, V> = rustc_hash::FxHashMap<K, V>;
pub type HashSet<T> = rustc_hash::FxHashSet<T>;

pub use std::collections::BTreeMap;
pub use std::collections::btree_map;

pub mod hash_map {
    pub use std::collections::hash_map::Entry;
}
