use crate::{EvaluatorCache, Expression, FunctionTable, SymbolStore};
use cellpotts_concepts::*;
use serde::{Deserialize, Serialize};

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, PoisonError};

/// Initial capacity of a [DelayHistory].
pub const DEFAULT_HISTORY_CAPACITY: usize = 10;

/// Number of intervals the initial history is sampled with.
const INIT_INTERVALS: usize = 30;

/// Samples closer in time than this are considered simultaneous.
const TIME_TOLERANCE: f64 = 1e-25;

/// One recorded value.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DelaySample {
    /// Time at which the value was recorded
    pub time: f64,
    /// Recorded value
    pub value: f64,
}

/// Time ordered history of a scalar used to look up $y(t-\tau)$.
///
/// Samples older than needed for the current delay are pruned on every write. When the
/// buffer is full, its capacity grows by a factor of $4/3$.
/// Values in between two samples are interpolated linearly.
/// ```
/// # use cellpotts_core::DelayHistory;
/// let mut history = DelayHistory::new(4);
/// history.push(0.0, 1.0, 2.0);
/// history.push(1.0, 3.0, 2.0);
/// assert_eq!(history.peek(2.5, 2.0), Some(2.0));
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DelayHistory {
    samples: VecDeque<DelaySample>,
    capacity: usize,
}

impl Default for DelayHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl DelayHistory {
    /// Empty history with room for `capacity` samples.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Number of stored samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Is the history empty?
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Current capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Stored samples, oldest first.
    pub fn samples(&self) -> impl Iterator<Item = &DelaySample> {
        self.samples.iter()
    }

    /// Drop samples which are no longer needed to interpolate at `time - delay`.
    ///
    /// The last sample before `time - delay` is kept.
    pub fn prune(&mut self, time: f64, delay: f64) {
        let horizon = time - delay;
        while self.samples.len() > 1 && self.samples[1].time - TIME_TOLERANCE <= horizon {
            self.samples.pop_front();
        }
    }

    /// Record `value` at `time`.
    ///
    /// Samples at or after `time` are replaced.
    pub fn push(&mut self, time: f64, value: f64, delay: f64) {
        self.prune(time, delay);
        while self.samples.back().is_some_and(|s| s.time >= time) {
            self.samples.pop_back();
        }
        if self.samples.len() >= self.capacity {
            self.capacity = (self.capacity * 4 / 3).max(self.capacity + 1);
            self.samples
                .reserve(self.capacity.saturating_sub(self.samples.len()));
        }
        self.samples.push_back(DelaySample { time, value });
    }

    /// Interpolated value at `time - delay` without modifying the history.
    ///
    /// Times before the first sample report the first value, times after the last sample
    /// report the last value. Returns [None] if the history is empty.
    pub fn peek(&self, time: f64, delay: f64) -> Option<f64> {
        let target = time - delay;
        let front = self.samples.front()?;
        let idx = self
            .samples
            .partition_point(|s| s.time - TIME_TOLERANCE <= target);
        if idx == 0 {
            return Some(front.value);
        }
        let h0 = &self.samples[idx - 1];
        match self.samples.get(idx) {
            None => Some(h0.value),
            Some(h1) => {
                let fraction = (target - h0.time) / (h1.time - h0.time + TIME_TOLERANCE);
                Some(h0.value * (1.0 - fraction) + h1.value * fraction)
            }
        }
    }

    /// Interpolated value at `time - delay`, pruning outdated samples.
    ///
    /// If no sample precedes `time - delay`, a sample is synthesized at this time. Its
    /// value is given by `initial` if the time lies before `start_time`, and by the
    /// oldest sample otherwise.
    pub fn get(
        &mut self,
        time: f64,
        delay: f64,
        start_time: f64,
        mut initial: impl FnMut(f64) -> f64,
    ) -> f64 {
        let target = time - delay;
        self.prune(time, delay);
        match self.samples.front() {
            None => return initial(target),
            Some(front) if front.time > target => {
                let value = match target < start_time {
                    true => initial(target),
                    false => front.value,
                };
                self.samples.push_front(DelaySample {
                    time: target,
                    value,
                });
            }
            Some(_) => (),
        }
        self.peek(time, delay).unwrap_or_else(|| initial(target))
    }

    /// Replace the history by samples of `initial` spread evenly over `[time - delay, time]`.
    pub fn init(&mut self, time: f64, delay: f64, mut initial: impl FnMut(f64) -> f64) {
        self.samples.clear();
        if self.capacity < INIT_INTERVALS + 1 {
            self.capacity = INIT_INTERVALS + 1;
            self.samples.reserve(self.capacity);
        }
        for i in 0..=INIT_INTERVALS {
            let t = time - (1.0 - i as f64 / INIT_INTERVALS as f64) * delay;
            self.samples.push_back(DelaySample {
                time: t,
                value: initial(t),
            });
        }
        if delay == 0.0 {
            self.samples.drain(..INIT_INTERVALS);
        }
    }
}

/// A symbol reporting its own value from `delay` time units ago.
///
/// Every focus owns a [DelayHistory]. Before the start of the simulation, the history
/// is given by an initial-value expression which may depend on `time`.
#[derive(Debug)]
pub struct DelayProperty {
    granularity: Granularity,
    delay: f64,
    capacity: usize,
    initial: Expression,
    initial_cache: Mutex<EvaluatorCache>,
    time_slot: usize,
    histories: BTreeMap<SymbolFocus, DelayHistory>,
}

impl DelayProperty {
    /// Delayed symbol with constant delay.
    ///
    /// The initial-value expression may only use `time` and constants.
    pub fn new(
        granularity: Granularity,
        initial: &str,
        delay: f64,
    ) -> Result<Self, ConfigError> {
        if granularity == Granularity::MembraneNode {
            return Err(ConfigError(
                "delayed symbols are global or cell properties".to_owned(),
            ));
        }
        if !(delay >= 0.0) {
            return Err(ConfigError(format!("invalid delay {delay}")));
        }
        let mut cache = EvaluatorCache::new(0);
        let time_slot = cache.add_local(TIME_SYMBOL, 0.0);
        let initial =
            Expression::compile(initial, &mut cache, &SymbolStore::new(), &FunctionTable::new())?;
        Ok(Self {
            granularity,
            delay,
            capacity: DEFAULT_HISTORY_CAPACITY,
            initial,
            initial_cache: Mutex::new(cache),
            time_slot,
            histories: BTreeMap::new(),
        })
    }

    /// Delayed symbol whose delay is given by an expression evaluated once in `scope`.
    pub fn from_expressions(
        granularity: Granularity,
        initial: &str,
        delay: &str,
        scope: &dyn Scope,
    ) -> Result<Self, ConfigError> {
        let mut cache = EvaluatorCache::new(0);
        let delay = Expression::compile(delay, &mut cache, scope, &FunctionTable::new())?;
        if let Some(info) = cache.externals().find(|info| info.granularity != Granularity::Global)
        {
            return Err(ConfigError(format!(
                "delay \"{}\" depends on the non-global symbol \"{}\"",
                delay.text(),
                info.name
            )));
        }
        cache.fetch(scope, &SymbolFocus::Global)?;
        let value = delay.eval(&mut cache);
        Self::new(granularity, initial, value)
    }

    /// Initial capacity of histories created from now on.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Granularity of the symbol.
    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    /// Current delay.
    pub fn delay(&self) -> f64 {
        self.delay
    }

    /// Change the delay. Histories keep all their samples.
    pub fn set_delay(&mut self, delay: f64) {
        self.delay = delay;
    }

    /// Value of the initial-value expression at `time`.
    pub fn initial_value(&self, time: f64) -> f64 {
        let mut cache = self
            .initial_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        cache.set(self.time_slot, time);
        self.initial.eval(&mut cache)
    }

    /// Seed the history of `focus` with the initial-value expression up to `time`.
    pub fn init(&mut self, focus: SymbolFocus, time: f64) {
        let mut history = DelayHistory::new(self.capacity);
        history.init(time, self.delay, |t| self.initial_value(t));
        self.histories.insert(focus, history);
    }

    /// Forget the history of `focus`.
    pub fn remove(&mut self, focus: &SymbolFocus) {
        self.histories.remove(focus);
    }

    /// History of a focus.
    pub fn history(&self, focus: &SymbolFocus) -> Option<&DelayHistory> {
        self.histories.get(focus)
    }

    /// Delayed value at `time`.
    ///
    /// Reads before `start_time` are answered by the initial-value expression.
    /// Reading does not modify the history: writes already prune it, and a sample
    /// synthesized by [DelayHistory::get] repeats the oldest value which [DelayHistory::peek]
    /// reports for these times anyway. This keeps reads possible through a shared [Scope].
    pub fn get(&self, focus: &SymbolFocus, time: f64, start_time: f64) -> f64 {
        let target = time - self.delay;
        if target < start_time {
            return self.initial_value(target);
        }
        self.histories
            .get(focus)
            .and_then(|history| history.peek(time, self.delay))
            .unwrap_or_else(|| self.initial_value(target))
    }

    /// Record `value` at `time`.
    pub fn set(&mut self, focus: SymbolFocus, time: f64, value: f64) {
        let delay = self.delay;
        if !self.histories.contains_key(&focus) {
            self.init(focus, time);
        }
        if let Some(history) = self.histories.get_mut(&focus) {
            history.push(time, value, delay);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn history_grows_and_prunes() {
        let mut history = DelayHistory::new(3);
        for i in 0..10 {
            history.push(i as f64, i as f64, 100.0);
        }
        assert_eq!(history.len(), 10);
        assert!(history.capacity() >= 10);
        // Only the sample right before t - delay survives pruning
        history.push(10.0, 10.0, 2.5);
        let times: Vec<_> = history.samples().map(|s| s.time).collect();
        assert_eq!(times, vec![7.0, 8.0, 9.0, 10.0]);
    }

    #[test]
    fn samples_stay_ordered() {
        let mut history = DelayHistory::new(4);
        history.push(0.0, 0.0, 1.0);
        history.push(2.0, 2.0, 1.0);
        history.push(1.0, 5.0, 1.0);
        let times: Vec<_> = history.samples().map(|s| s.time).collect();
        assert_eq!(times, vec![0.0, 1.0]);
        assert!(history.samples().zip(history.samples().skip(1)).all(|(a, b)| a.time < b.time));
    }

    #[test]
    fn interpolation() {
        let mut history = DelayHistory::default();
        assert_eq!(history.peek(1.0, 0.5), None);
        history.push(1.0, 10.0, 1.0);
        history.push(2.0, 20.0, 1.0);
        assert_eq!(history.peek(2.0, 1.0), Some(10.0));
        approx::assert_abs_diff_eq!(history.peek(2.25, 1.0).unwrap(), 12.5, epsilon = 1e-12);
        assert_eq!(history.peek(1.5, 1.0), Some(10.0));
        assert_eq!(history.peek(5.0, 1.0), Some(20.0));
    }

    #[test]
    fn get_synthesizes_boundary_sample() {
        let mut history = DelayHistory::default();
        history.push(2.0, 4.0, 1.0);
        history.push(3.0, 6.0, 1.0);
        // Before the start time the initializer is used
        assert_eq!(history.get(1.5, 1.0, 1.0, |t| t * 100.0), 50.0);
        assert_eq!(history.samples().next().unwrap().time, 0.5);
        let mut history = DelayHistory::default();
        history.push(2.0, 4.0, 1.0);
        history.push(3.0, 6.0, 1.0);
        // After the start time the oldest value is duplicated
        assert_eq!(history.get(2.5, 1.0, 0.0, |_| -1.0), 4.0);
        approx::assert_abs_diff_eq!(history.get(3.5, 1.0, 0.0, |_| -1.0), 5.0, epsilon = 1e-12);
    }

    #[test]
    fn shared_reads_agree_with_pruning_reads() {
        let mut property = DelayProperty::new(Granularity::Global, "3 * time", 1.5).unwrap();
        let focus = SymbolFocus::Global;
        for step in 0..12 {
            let time = 0.5 * step as f64;
            property.set(focus, time, (time * 2.0).sin());
        }
        for t in [0.2, 1.0, 1.7, 2.9, 4.3, 5.5, 6.0, 7.5] {
            let shared = property.get(&focus, t, 0.0);
            let mut history = property.history(&focus).unwrap().clone();
            let mut calls = 0;
            let pruned = history.get(t, 1.5, 0.0, |s| {
                calls += 1;
                property.initial_value(s)
            });
            approx::assert_abs_diff_eq!(shared, pruned, epsilon = 1e-12);
            assert!(calls <= 1);
        }
    }

    #[test]
    fn init_samples_initial_history() {
        let mut history = DelayHistory::default();
        history.init(3.0, 3.0, |t| 2.0 * t);
        assert_eq!(history.len(), 31);
        let first = history.samples().next().unwrap();
        assert_eq!((first.time, first.value), (0.0, 0.0));
        approx::assert_abs_diff_eq!(history.peek(4.0, 3.0).unwrap(), 2.0, epsilon = 1e-10);
    }

    #[test]
    fn delay_property_round_trip() {
        let mut property = DelayProperty::new(Granularity::Global, "-time", 2.0).unwrap();
        let focus = SymbolFocus::Global;
        property.init(focus, 0.0);
        property.set(focus, 1.0, 7.0);
        property.set(focus, 2.0, 8.0);
        assert_eq!(property.get(&focus, 3.0, 0.0), 7.0);
        assert_eq!(property.get(&focus, 4.0, 0.0), 8.0);
        // Before the start of the simulation the initializer is evaluated
        assert_eq!(property.get(&focus, 1.5, 0.0), 0.5);
        assert!(DelayProperty::new(Granularity::MembraneNode, "0", 1.0).is_err());
        assert!(DelayProperty::new(Granularity::Cell, "x", 1.0).is_err());
        assert!(DelayProperty::new(Granularity::Cell, "0", -1.0).is_err());
    }

    #[test]
    fn delay_from_expression() {
        let mut store = SymbolStore::new();
        store.add_constant("tau", 3.0);
        let property =
            DelayProperty::from_expressions(Granularity::Cell, "1", "2 * tau", &store).unwrap();
        assert_eq!(property.delay(), 6.0);
        assert_eq!(property.granularity(), Granularity::Cell);
    }
}
