//! Reference-counted interning pools for styles and fonts.
//!
//! Styles are hashed and deduplicated: identical records share an id.
//! Ids are u16 because every element carries its pair as a 4-byte arena
//! record. Id 0 is the default record and is never released.

use std::collections::HashMap;
use std::hash::Hash;

use crate::error::Result;
use crate::serial::{SerialReader, SerialWriter};
use crate::style::types::{ComputedStyle, FontSpec};

/// Values a pool can persist into the `StyleData` block.
pub trait PoolValue: Clone + Eq + Hash + Default {
    fn encode(&self, w: &mut SerialWriter);
    fn decode(r: &mut SerialReader) -> Result<Self>;
}

impl PoolValue for ComputedStyle {
    fn encode(&self, w: &mut SerialWriter) {
        ComputedStyle::encode(self, w)
    }
    fn decode(r: &mut SerialReader) -> Result<Self> {
        ComputedStyle::decode(r)
    }
}

impl PoolValue for FontSpec {
    fn encode(&self, w: &mut SerialWriter) {
        FontSpec::encode(self, w)
    }
    fn decode(r: &mut SerialReader) -> Result<Self> {
        FontSpec::decode(r)
    }
}

/// Interned id valid within one document's pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolId(pub u16);

impl PoolId {
    pub const DEFAULT: PoolId = PoolId(0);
}

struct PoolEntry<T> {
    value: T,
    refs: u32,
}

/// Generic hashed, reference-counted pool with dense u16 ids and a free
/// list for released slots.
pub struct RefPool<T: Clone + Eq + Hash> {
    entries: Vec<Option<PoolEntry<T>>>,
    intern: HashMap<T, u16>,
    free: Vec<u16>,
}

impl<T: Clone + Eq + Hash + Default> RefPool<T> {
    pub fn new() -> Self {
        let default = T::default();
        let mut intern = HashMap::new();
        intern.insert(default.clone(), 0);
        Self {
            entries: vec![Some(PoolEntry {
                value: default,
                refs: 1,
            })],
            intern,
            free: Vec::new(),
        }
    }

    /// Interns `value`, bumping its reference count.
    pub fn acquire(&mut self, value: T) -> PoolId {
        if let Some(&id) = self.intern.get(&value) {
            let entry = self.entries[id as usize].as_mut().expect("interned entry");
            entry.refs += 1;
            return PoolId(id);
        }
        let id = match self.free.pop() {
            Some(id) => {
                self.entries[id as usize] = Some(PoolEntry {
                    value: value.clone(),
                    refs: 1,
                });
                id
            }
            None => {
                let id = self.entries.len() as u16;
                self.entries.push(Some(PoolEntry {
                    value: value.clone(),
                    refs: 1,
                }));
                id
            }
        };
        self.intern.insert(value, id);
        PoolId(id)
    }

    /// Bumps the reference count of an existing id (used when reloading
    /// persisted nodes that already carry ids).
    pub fn retain(&mut self, id: PoolId) {
        if id == PoolId::DEFAULT {
            return;
        }
        if let Some(Some(entry)) = self.entries.get_mut(id.0 as usize) {
            entry.refs += 1;
        }
    }

    /// Drops one reference; the slot is recycled when the count hits 0.
    pub fn release(&mut self, id: PoolId) {
        if id == PoolId::DEFAULT {
            return;
        }
        let Some(Some(entry)) = self.entries.get_mut(id.0 as usize) else {
            return;
        };
        entry.refs -= 1;
        if entry.refs == 0 {
            let entry = self.entries[id.0 as usize].take().expect("live entry");
            self.intern.remove(&entry.value);
            self.free.push(id.0);
        }
    }

    pub fn get(&self, id: PoolId) -> Option<&T> {
        self.entries.get(id.0 as usize)?.as_ref().map(|e| &e.value)
    }

    /// Number of live entries (default included).
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| e.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        false // the default entry is always present
    }

    /// Order-independent content hash, used for the render-context check
    /// that decides whether a cached rendering is still valid.
    pub fn content_hash(&self) -> u64
    where
        T: std::fmt::Debug,
    {
        use std::hash::Hasher;
        let mut acc: u64 = 0;
        for (i, entry) in self.entries.iter().enumerate() {
            if let Some(e) = entry {
                let mut h = std::collections::hash_map::DefaultHasher::new();
                (i as u16).hash(&mut h);
                e.value.hash(&mut h);
                acc ^= h.finish();
            }
        }
        acc
    }
}

impl<T: Clone + Eq + Hash + Default> Default for RefPool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: PoolValue> RefPool<T> {
    /// Serializes every slot (live or vacant) so ids survive a reload.
    pub fn encode_pool(&self, w: &mut SerialWriter) {
        w.put_u32(self.entries.len() as u32);
        for entry in &self.entries {
            match entry {
                Some(e) => {
                    w.put_u8(1);
                    w.put_u32(e.refs);
                    e.value.encode(w);
                }
                None => w.put_u8(0),
            }
        }
    }

    pub fn decode_pool(r: &mut SerialReader) -> Result<Self> {
        let count = r.get_u32()? as usize;
        let mut pool = Self {
            entries: Vec::with_capacity(count),
            intern: HashMap::new(),
            free: Vec::new(),
        };
        for id in 0..count {
            if r.get_u8()? == 0 {
                pool.entries.push(None);
                pool.free.push(id as u16);
                continue;
            }
            let refs = r.get_u32()?;
            let value = T::decode(r)?;
            pool.intern.insert(value.clone(), id as u16);
            pool.entries.push(Some(PoolEntry { value, refs }));
        }
        Ok(pool)
    }
}

pub type StylePool = RefPool<ComputedStyle>;
pub type FontPool = RefPool<FontSpec>;
