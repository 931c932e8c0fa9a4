//! Memoization of call results.
//!
//! A bounded LRU map from call fingerprints to results, where each entry
//! also expires after a fixed time-to-live. The VM checks it before pushing
//! a frame and fills it when an eligible frame returns.

use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::rc::Rc;
use std::time::{Duration, Instant};

use lru::LruCache;
use tracing::trace;

use crate::bytecode::chunk::CompiledFunction;
use crate::bytecode::value::{Closure, HashKey, Value};

/// What was called.
#[derive(Debug, Clone)]
pub enum Callee {
    /// A closure, identified by its function template. Holding the `Rc`
    /// keeps the template's address from being reused while keyed.
    Function(Rc<CompiledFunction>),
    Builtin(u8),
}

impl PartialEq for Callee {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Callee::Function(a), Callee::Function(b)) => Rc::ptr_eq(a, b),
            (Callee::Builtin(a), Callee::Builtin(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Callee {}

impl Hash for Callee {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Callee::Function(function) => {
                0u8.hash(state);
                std::ptr::hash(Rc::as_ptr(function), state);
            }
            Callee::Builtin(index) => {
                1u8.hash(state);
                index.hash(state);
            }
        }
    }
}

/// Fingerprint of one call: the callee, the values a closure captured and
/// the arguments, in order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallKey {
    callee: Callee,
    captured: Box<[HashKey]>,
    args: Box<[HashKey]>,
}

impl CallKey {
    /// Key for a closure call, or `None` when a captured value or an
    /// argument is not hashable.
    pub fn for_closure(closure: &Closure, args: &[Value]) -> Option<Self> {
        Some(Self {
            callee: Callee::Function(closure.function.clone()),
            captured: hash_keys(&closure.free)?,
            args: hash_keys(args)?,
        })
    }

    pub fn for_builtin(index: u8, args: &[Value]) -> Option<Self> {
        Some(Self {
            callee: Callee::Builtin(index),
            captured: Box::default(),
            args: hash_keys(args)?,
        })
    }
}

fn hash_keys(values: &[Value]) -> Option<Box<[HashKey]>> {
    values.iter().map(Value::hash_key).collect()
}

#[derive(Debug)]
struct Entry {
    value: Value,
    stored_at: Instant,
}

/// Hit and miss counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub expired: u64,
}

pub struct CallCache {
    entries: LruCache<CallKey, Entry>,
    ttl: Duration,
    stats: CacheStats,
}

impl CallCache {
    /// A cache holding at most `capacity` results. A zero capacity means no
    /// cache at all.
    pub fn new(capacity: usize, ttl: Duration) -> Option<Self> {
        let capacity = NonZeroUsize::new(capacity)?;
        Some(Self {
            entries: LruCache::new(capacity),
            ttl,
            stats: CacheStats::default(),
        })
    }

    pub fn get(&mut self, key: &CallKey) -> Option<Value> {
        self.get_at(key, Instant::now())
    }

    fn get_at(&mut self, key: &CallKey, now: Instant) -> Option<Value> {
        let expired = match self.entries.get(key) {
            Some(entry) if now.duration_since(entry.stored_at) < self.ttl => {
                self.stats.hits += 1;
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            self.entries.pop(key);
            self.stats.expired += 1;
            trace!(target: "shark::cache", "entry expired");
        }
        self.stats.misses += 1;
        None
    }

    pub fn insert(&mut self, key: CallKey, value: Value) {
        self.insert_at(key, value, Instant::now());
    }

    fn insert_at(&mut self, key: CallKey, value: Value, now: Instant) {
        let entry = Entry {
            value,
            stored_at: now,
        };
        if let Some((_, evicted)) = self.entries.push(key, entry) {
            trace!(target: "shark::cache", value = %evicted.value, "evicted");
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }
}
