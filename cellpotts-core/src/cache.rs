use cellpotts_concepts::*;
use itertools::Itertools;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use std::collections::HashMap;

/// Where the value of a slot comes from.
#[derive(Clone, Debug, PartialEq)]
pub enum SlotSource {
    /// Owned and written by the solver
    Local,
    /// Read from a [Scope] on every [EvaluatorCache::fetch]
    External(SymbolInfo),
}

/// Flat slot-indexed variable store shared by all expressions of one
/// [SystemSolver](crate::SystemSolver).
///
/// Cloning a cache copies all values. Expressions compiled against one cache can be
/// evaluated with every clone of it since they only refer to slot indices.
#[derive(Clone, Debug)]
pub struct EvaluatorCache {
    names: Vec<String>,
    index: HashMap<String, usize>,
    sources: Vec<SlotSource>,
    values: Vec<f64>,
    rng: ChaCha8Rng,
}

impl EvaluatorCache {
    /// Empty cache whose random functions are seeded with `seed`.
    pub fn new(seed: u64) -> Self {
        Self {
            names: Vec::new(),
            index: HashMap::new(),
            sources: Vec::new(),
            values: Vec::new(),
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Register a local variable and return its slot.
    ///
    /// An existing slot of the same name is turned into a local.
    pub fn add_local(&mut self, name: &str, value: f64) -> usize {
        match self.index.get(name) {
            Some(&slot) => {
                self.sources[slot] = SlotSource::Local;
                self.values[slot] = value;
                slot
            }
            None => self.push(name, SlotSource::Local, value),
        }
    }

    /// Register a symbol of a [Scope] and return its slot.
    pub fn add_external(&mut self, info: SymbolInfo) -> usize {
        match self.index.get(&info.name) {
            Some(&slot) => slot,
            None => {
                let name = info.name.clone();
                self.push(&name, SlotSource::External(info), 0.0)
            }
        }
    }

    fn push(&mut self, name: &str, source: SlotSource, value: f64) -> usize {
        let slot = self.names.len();
        self.names.push(name.to_owned());
        self.index.insert(name.to_owned(), slot);
        self.sources.push(source);
        self.values.push(value);
        slot
    }

    /// Slot of a name.
    pub fn slot(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Name of a slot.
    pub fn name(&self, slot: usize) -> &str {
        &self.names[slot]
    }

    /// Source of a slot.
    pub fn source(&self, slot: usize) -> &SlotSource {
        &self.sources[slot]
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Does the cache contain no slot?
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Current value of a slot.
    #[inline]
    pub fn get(&self, slot: usize) -> f64 {
        self.values[slot]
    }

    /// Overwrite the value of a slot.
    #[inline]
    pub fn set(&mut self, slot: usize, value: f64) {
        self.values[slot] = value;
    }

    /// All symbols read from the outer scope.
    pub fn externals(&self) -> impl Iterator<Item = &SymbolInfo> {
        self.sources.iter().filter_map(|source| match source {
            SlotSource::External(info) => Some(info),
            SlotSource::Local => None,
        })
    }

    /// Read the values of all external slots at `focus`.
    pub fn fetch(&mut self, scope: &dyn Scope, focus: &SymbolFocus) -> Result<(), IndexError> {
        for (value, source) in self.values.iter_mut().zip(self.sources.iter()) {
            if let SlotSource::External(info) = source {
                *value = scope.get(info.id, focus)?;
            }
        }
        Ok(())
    }

    /// Generator used by random functions.
    pub fn rng_mut(&mut self) -> &mut ChaCha8Rng {
        &mut self.rng
    }

    /// Restart the random number generator from a new seed.
    pub fn reseed(&mut self, seed: u64) {
        self.rng = ChaCha8Rng::seed_from_u64(seed);
    }

    /// Human readable `name=value` list of the given slots.
    pub fn bindings(&self, slots: &[usize]) -> String {
        slots
            .iter()
            .map(|slot| format!("{}={}", self.names[*slot], self.values[*slot]))
            .join("; ")
    }
}
