use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Default, Clone)]
pub struct MetricRegistry {
    counters: BTreeMap<String, Arc<Counter>>,
    histograms: BTreeMap<String, Arc<Histogram>>,
}

impl MetricRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_counter(&mut self, name: &str, counter: Arc<Counter>) -> &mut Self {
        self.counters.insert(name.to_string(), counter);
        self
    }

    pub fn register_histogram(&mut self, name: &str, histogram: Arc<Histogram>) -> &mut Self {
        self.histograms.insert(name.to_string(), histogram);
        self
    }

    pub fn get_counter(&self, name: &str) -> Option<Arc<Counter>> {
        self.counters.get(name).cloned()
    }

    pub fn get_histogram(&self, name: &str) -> Option<Arc<Histogram>> {
        self.histograms.get(name).cloned()
    }
}

#[derive(Default)]
pub struct Counter {
    atomic: AtomicU64,
}

impl Counter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Returns the current value of the counter.
    pub fn get(&self) -> u64 {
        self.atomic.load(Ordering::Relaxed)
    }

    /// Increments the counter by one.
    pub fn inc(&self) {
        self.inc_by(1);
    }

    /// Increments the counter by the given amount.
    pub fn inc_by(&self, amount: u64) {
        self.atomic.fetch_add(amount, Ordering::Relaxed);
    }
}

/// A thread-safe histogram with fixed bucket boundaries.
///
/// Tracks the count per bucket plus the total count, sum, min and max of the samples.
pub struct Histogram {
    buckets: Vec<(u64, AtomicU64)>, // (upper_bound, count)
    count: AtomicU64,
    sum: AtomicU64,
    min: AtomicU64,
    max: AtomicU64,
}

impl Histogram {
    pub fn new_time_histogram() -> Arc<Self> {
        Self::new(&time_buckets())
    }

    /// Creates a new histogram with the specified upper bounds for each bucket.
    pub fn new(bucket_bounds: &[u64]) -> Arc<Self> {
        let buckets = bucket_bounds
            .iter()
            .map(|&b| (b, AtomicU64::new(0)))
            .collect();

        Arc::new(Self {
            buckets,
            count: AtomicU64::new(0),
            sum: AtomicU64::new(0),
            min: AtomicU64::new(u64::MAX),
            max: AtomicU64::new(0),
        })
    }

    /// Records a new value (e.g. a duration in microseconds) into the first bucket whose
    /// upper bound is ≥ `value`. Values above the last bound land in the last bucket.
    pub fn record(&self, value: u64) {
        if self.buckets.is_empty() {
            return;
        }

        let mut i = match self.buckets.binary_search_by_key(&value, |(b, _)| *b) {
            Ok(i) | Err(i) => i,
        };

        if i >= self.buckets.len() {
            i = self.buckets.len() - 1;
        }

        self.buckets[i].1.fetch_add(1, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum.fetch_add(value, Ordering::Relaxed);
        self.min.fetch_min(value, Ordering::Relaxed);
        self.max.fetch_max(value, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> HistogramSnapshot {
        let count = self.count.load(Ordering::Relaxed);
        let sum = self.sum.load(Ordering::Relaxed);

        let mean = if count > 0 {
            sum as f64 / count as f64
        } else {
            0.0
        };

        HistogramSnapshot {
            count,
            sum,
            min: self.min.load(Ordering::Relaxed),
            max: self.max.load(Ordering::Relaxed),
            mean,
            buckets: self
                .buckets
                .iter()
                .map(|(bound, c)| (*bound, c.load(Ordering::Relaxed)))
                .collect(),
        }
    }
}

/// Represents an immutable snapshot of a histogram's state for reporting or display.
pub struct HistogramSnapshot {
    /// Number of recorded values.
    pub count: u64,
    /// Sum of all recorded values.
    pub sum: u64,
    /// Minimum value recorded.
    pub min: u64,
    /// Maximum value recorded.
    pub max: u64,
    /// Average value.
    pub mean: f64,
    /// Buckets: each is (upper_bound, count).
    pub buckets: Vec<(u64, u64)>,
}

/// Exponential bucket upper-bounds in microseconds, from 1µs to roughly 4s (4_194_304 µs).
///
/// Used for `find_and_modify.native.duration`.
pub fn time_buckets() -> Vec<u64> {
    let mut buckets = vec![];
    let mut v = 1;
    while v <= 8_000_000 {
        buckets.push(v);
        v *= 2;
    }
    buckets
}

#[cfg(test)]
pub fn assert_counter_eq(registry: &MetricRegistry, name: &str, expected: u64) {
    if let Some(counter) = registry.get_counter(name) {
        assert_eq!(counter.get(), expected, "Counter '{}' mismatch", name);
    } else {
        panic!("Counter '{}' not found in registry", name);
    }
}
