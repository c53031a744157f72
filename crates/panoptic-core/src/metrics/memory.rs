use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use super::MetricsSink;
use crate::error::Result;

/// Thread-safe counter
#[derive(Debug, Default, Clone)]
pub struct Counter {
    value: Arc<AtomicI64>,
}

impl Counter {
    /// Create a counter at zero
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `n`
    pub fn add(&self, n: i64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    /// Current value
    #[must_use]
    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone)]
struct Bucket {
    bound: f64,
    count: Arc<AtomicU64>,
}

/// Cumulative bucket histogram
#[derive(Debug, Clone)]
pub struct Histogram {
    buckets: Vec<Bucket>,
    // milli-units so the sum fits an atomic integer
    sum: Arc<AtomicU64>,
    count: Arc<AtomicU64>,
}

impl Histogram {
    /// Buckets suited to task durations in milliseconds
    #[must_use]
    pub fn new() -> Self {
        Self::with_buckets(vec![
            100.0, 500.0, 1_000.0, 5_000.0, 10_000.0, 30_000.0, 60_000.0, 300_000.0,
        ])
    }

    /// Custom bucket bounds
    #[must_use]
    pub fn with_buckets(bounds: Vec<f64>) -> Self {
        Self {
            buckets: bounds
                .into_iter()
                .map(|bound| Bucket {
                    bound,
                    count: Arc::new(AtomicU64::new(0)),
                })
                .collect(),
            sum: Arc::new(AtomicU64::new(0)),
            count: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Record a sample. Negative samples count as zero.
    pub fn observe(&self, value: f64) {
        let value = value.max(0.0);
        self.sum
            .fetch_add((value * 1000.0) as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        for bucket in &self.buckets {
            if value <= bucket.bound {
                bucket.count.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Number of samples
    #[must_use]
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Sum of samples
    #[must_use]
    pub fn sum(&self) -> f64 {
        self.sum.load(Ordering::Relaxed) as f64 / 1000.0
    }

    /// `(upper bound, cumulative count)` per bucket
    #[must_use]
    pub fn buckets(&self) -> Vec<(f64, u64)> {
        self.buckets
            .iter()
            .map(|b| (b.bound, b.count.load(Ordering::Relaxed)))
            .collect()
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

/// Series key: metric name plus its sorted tags
fn series_key(name: &str, tags: &[String]) -> String {
    if tags.is_empty() {
        return name.to_string();
    }
    let mut sorted: Vec<&str> = tags.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    format!("{}|{}", name, sorted.join(","))
}

/// [`MetricsSink`] keeping every series in memory.
///
/// Used by tests and by deployments without a metrics agent; the binary logs
/// a [`summary`](Self::summary) on shutdown.
#[derive(Debug, Default, Clone)]
pub struct InMemoryMetrics {
    counters: Arc<RwLock<BTreeMap<String, Counter>>>,
    histograms: Arc<RwLock<BTreeMap<String, Histogram>>>,
}

impl InMemoryMetrics {
    /// Empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the counter for a series
    pub fn counter(&self, name: &str, tags: &[String]) -> Counter {
        let key = series_key(name, tags);
        let counters = self.counters.read().unwrap_or_else(|e| e.into_inner());
        if let Some(counter) = counters.get(&key) {
            return counter.clone();
        }
        drop(counters);

        let mut counters = self.counters.write().unwrap_or_else(|e| e.into_inner());
        counters.entry(key).or_default().clone()
    }

    /// Get or create the histogram for a series
    pub fn histogram(&self, name: &str, tags: &[String]) -> Histogram {
        let key = series_key(name, tags);
        let histograms = self.histograms.read().unwrap_or_else(|e| e.into_inner());
        if let Some(histogram) = histograms.get(&key) {
            return histogram.clone();
        }
        drop(histograms);

        let mut histograms = self.histograms.write().unwrap_or_else(|e| e.into_inner());
        histograms.entry(key).or_default().clone()
    }

    /// Sum of a counter over every tag combination
    #[must_use]
    pub fn counter_total(&self, name: &str) -> i64 {
        let counters = self.counters.read().unwrap_or_else(|e| e.into_inner());
        counters
            .iter()
            .filter(|(key, _)| key.as_str() == name || key.starts_with(&format!("{}|", name)))
            .map(|(_, counter)| counter.get())
            .sum()
    }

    /// One line per series, `key value` for counters and
    /// `key count=N sum=S leB=C ...` for histograms, with one cumulative
    /// count per bucket bound
    #[must_use]
    pub fn summary(&self) -> Vec<String> {
        let mut lines = Vec::new();
        let counters = self.counters.read().unwrap_or_else(|e| e.into_inner());
        for (key, counter) in counters.iter() {
            lines.push(format!("{} {}", key, counter.get()));
        }
        let histograms = self.histograms.read().unwrap_or_else(|e| e.into_inner());
        for (key, histogram) in histograms.iter() {
            let mut line = format!("{} count={} sum={}", key, histogram.count(), histogram.sum());
            for (bound, count) in histogram.buckets() {
                line.push_str(&format!(" le{}={}", bound, count));
            }
            lines.push(line);
        }
        lines
    }
}

impl MetricsSink for InMemoryMetrics {
    fn incr_counter(&self, name: &str, tags: &[String]) -> Result<()> {
        self.counter(name, tags).add(1);
        Ok(())
    }

    fn count(&self, name: &str, value: i64, tags: &[String]) -> Result<()> {
        self.counter(name, tags).add(value);
        Ok(())
    }

    fn distribution(&self, name: &str, value: f64, tags: &[String]) -> Result<()> {
        self.histogram(name, tags).observe(value);
        Ok(())
    }
}
