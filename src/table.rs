//! Global symbol table: open addressing with linear probing, tombstone
//! deletion and FNV-1a hashing. The table also hands out byte addresses.

use serde::Serialize;
use tracing::trace;

use crate::value::Value;

const MAX_LOAD_NUM: usize = 3;
const MAX_LOAD_DEN: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Entry {
    pub key: String,
    /// Current value. For arrays this is the first element and fixes the
    /// element type.
    pub value: Value,
    pub address: u32,
    /// Number of elements; 1 for scalars.
    pub length: u16,
    pub array: bool,
}

impl Entry {
    pub fn is_array(&self) -> bool {
        self.array
    }

    /// Bytes spanned by the entry.
    pub fn span(&self) -> u32 {
        self.value.size() * self.length as u32
    }
}

#[derive(Debug, Clone, Default)]
enum Bucket {
    #[default]
    Empty,
    Tombstone,
    Occupied(Entry),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TableError {
    #[error("global '{0}' is already declared")]
    Duplicate(String),
    #[error("global '{0}' is not declared")]
    NotFound(String),
}

#[derive(Debug, Clone, Default)]
pub struct Table {
    buckets: Vec<Bucket>,
    count: usize,
    tombstones: usize,
    next_address: u32,
}

pub fn fnv1a(key: &str) -> u32 {
    let mut hash: u32 = 2_166_136_261;
    for byte in key.bytes() {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(16_777_619);
    }
    hash
}

enum Probe {
    Found(usize),
    /// Key absent; the slot an insert should use.
    Vacant(usize),
}

impl Table {
    pub fn new() -> Self {
        Table::default()
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn capacity(&self) -> usize {
        self.buckets.len()
    }

    pub fn tombstones(&self) -> usize {
        self.tombstones
    }

    /// Total bytes handed out so far.
    pub fn address_space(&self) -> u32 {
        self.next_address
    }

    fn probe(&self, key: &str) -> Option<Probe> {
        let capacity = self.buckets.len();
        if capacity == 0 {
            return None;
        }
        let mut index = fnv1a(key) as usize % capacity;
        let mut reusable = None;
        for _ in 0..capacity {
            match &self.buckets[index] {
                Bucket::Empty => return Some(Probe::Vacant(reusable.unwrap_or(index))),
                Bucket::Tombstone => {
                    reusable.get_or_insert(index);
                }
                Bucket::Occupied(entry) if entry.key == key => return Some(Probe::Found(index)),
                Bucket::Occupied(_) => {}
            }
            index = (index + 1) % capacity;
        }
        reusable.map(Probe::Vacant)
    }

    fn grow(&mut self) {
        let capacity = if self.buckets.len() < 8 { 8 } else { self.buckets.len() * 2 };
        let old = std::mem::replace(&mut self.buckets, vec![Bucket::Empty; capacity]);
        self.tombstones = 0;
        for bucket in old {
            if let Bucket::Occupied(entry) = bucket {
                let mut index = fnv1a(&entry.key) as usize % capacity;
                while matches!(self.buckets[index], Bucket::Occupied(_)) {
                    index = (index + 1) % capacity;
                }
                self.buckets[index] = Bucket::Occupied(entry);
            }
        }
        trace!(capacity, live = self.count, "symbol table grown");
    }

    /// Declare a scalar global and return its address.
    pub fn declare(&mut self, key: &str, value: Value) -> Result<u32, TableError> {
        self.insert(key, value, 1, false)
    }

    /// Declare `length` contiguous elements typed like `value` under one
    /// entry and return the base address.
    pub fn declare_array(&mut self, key: &str, value: Value, length: u16) -> Result<u32, TableError> {
        self.insert(key, value, length, true)
    }

    fn insert(&mut self, key: &str, value: Value, length: u16, array: bool) -> Result<u32, TableError> {
        if self.get(key).is_some() {
            return Err(TableError::Duplicate(key.to_string()));
        }
        if (self.count + 1) * MAX_LOAD_DEN > self.buckets.len() * MAX_LOAD_NUM {
            self.grow();
        }
        let Some(Probe::Vacant(slot)) = self.probe(key) else {
            return Err(TableError::Duplicate(key.to_string()));
        };
        if matches!(self.buckets[slot], Bucket::Tombstone) {
            self.tombstones -= 1;
        }
        let address = self.next_address;
        let entry = Entry { key: key.to_string(), value, address, length, array };
        self.next_address += entry.span();
        self.buckets[slot] = Bucket::Occupied(entry);
        self.count += 1;
        trace!(key, address, length, "declared global");
        Ok(address)
    }

    pub fn get(&self, key: &str) -> Option<&Entry> {
        match self.probe(key)? {
            Probe::Found(i) => match &self.buckets[i] {
                Bucket::Occupied(entry) => Some(entry),
                _ => None,
            },
            Probe::Vacant(_) => None,
        }
    }

    pub fn lookup(&self, key: &str) -> Result<(Value, u32), TableError> {
        self.get(key)
            .map(|e| (e.value, e.address))
            .ok_or_else(|| TableError::NotFound(key.to_string()))
    }

    pub fn update(&mut self, key: &str, value: Value) -> Result<(), TableError> {
        match self.probe(key) {
            Some(Probe::Found(i)) => {
                if let Bucket::Occupied(entry) = &mut self.buckets[i] {
                    entry.value = value;
                }
                Ok(())
            }
            _ => Err(TableError::NotFound(key.to_string())),
        }
    }

    /// Remove `key`, leaving a tombstone. Its address range is not reclaimed.
    pub fn delete(&mut self, key: &str) -> Result<Entry, TableError> {
        match self.probe(key) {
            Some(Probe::Found(i)) => {
                let Bucket::Occupied(entry) = std::mem::replace(&mut self.buckets[i], Bucket::Tombstone)
                else {
                    return Err(TableError::NotFound(key.to_string()));
                };
                self.count -= 1;
                self.tombstones += 1;
                Ok(entry)
            }
            _ => Err(TableError::NotFound(key.to_string())),
        }
    }

    /// Live entries ordered by address.
    pub fn entries(&self) -> Vec<&Entry> {
        let mut out: Vec<&Entry> = self
            .buckets
            .iter()
            .filter_map(|b| match b {
                Bucket::Occupied(e) => Some(e),
                _ => None,
            })
            .collect();
        out.sort_by_key(|e| e.address);
        out
    }
}
