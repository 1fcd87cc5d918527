//! Streaming targeted-quantile sketch
//!
//! Biased-quantile summary (Cormode, Korn, Muthukrishnan, Srivastava)
//! tuned for a fixed set of target quantiles. The queue manager keeps
//! two of these per queue: one over add-task latency and one over task
//! processing latency, both in integer milliseconds. Inserts are
//! buffered and merged in sorted batches; memory stays proportional to
//! the compressed sample list, not the observation count.

const BUFFER_CAP: usize = 500;

/// Default targets every queue sketch is built with.
pub const DEFAULT_TARGETS: [f64; 3] = [0.50, 0.90, 0.99];

const TARGET_EPSILON: f64 = 0.01;

#[derive(Debug, Clone, Copy)]
struct Sample {
    value: f64,
    /// Number of observations this sample stands for.
    width: f64,
    /// Rank uncertainty inherited at insertion time.
    delta: f64,
}

/// A quantile stream answering `query(phi)` for the configured targets
/// within epsilon of the true rank.
#[derive(Debug)]
pub struct QuantileStream {
    targets: Vec<(f64, f64)>,
    samples: Vec<Sample>,
    buffer: Vec<f64>,
    n: f64,
}

impl QuantileStream {
    /// Build a stream targeting the given quantiles at the default
    /// per-target error.
    pub fn targeted(quantiles: &[f64]) -> Self {
        Self {
            targets: quantiles.iter().map(|&q| (q, TARGET_EPSILON)).collect(),
            samples: Vec::new(),
            buffer: Vec::with_capacity(BUFFER_CAP),
            n: 0.0,
        }
    }

    /// Record one observation.
    pub fn insert(&mut self, value: f64) {
        self.buffer.push(value);
        if self.buffer.len() >= BUFFER_CAP {
            self.flush();
        }
    }

    /// Number of observations recorded so far.
    pub fn count(&self) -> u64 {
        self.n as u64 + self.buffer.len() as u64
    }

    /// Estimate the value at quantile `phi`. Returns 0 for an empty
    /// stream. Accuracy holds only for the configured targets.
    pub fn query(&mut self, phi: f64) -> f64 {
        self.flush();
        if self.samples.is_empty() {
            return 0.0;
        }

        let mut t = (phi * self.n).ceil();
        t += (self.invariant(t) / 2.0).ceil();

        let mut prev = self.samples[0];
        let mut rank = 0.0;
        for sample in &self.samples[1..] {
            rank += prev.width;
            if rank + sample.width + sample.delta > t {
                return prev.value;
            }
            prev = *sample;
        }
        prev.value
    }

    /// Drop all state.
    pub fn reset(&mut self) {
        self.samples.clear();
        self.buffer.clear();
        self.n = 0.0;
    }

    /// Allowed rank error at rank `r` for the current stream size: the
    /// tightest bound any target imposes.
    fn invariant(&self, r: f64) -> f64 {
        let mut min = f64::MAX;
        for &(quantile, epsilon) in &self.targets {
            let f = if quantile * self.n <= r {
                (2.0 * epsilon * r) / quantile
            } else {
                (2.0 * epsilon * (self.n - r)) / (1.0 - quantile)
            };
            if f < min {
                min = f;
            }
        }
        min.max(1.0)
    }

    fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let mut batch = std::mem::take(&mut self.buffer);
        batch.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        self.merge(&batch);
        self.compress();
    }

    fn merge(&mut self, sorted: &[f64]) {
        let mut r = 0.0;
        let mut i = 0;
        for &value in sorted {
            let mut inserted = false;
            while i < self.samples.len() {
                let current = self.samples[i];
                if current.value > value {
                    self.samples.insert(
                        i,
                        Sample {
                            value,
                            width: 1.0,
                            delta: (self.invariant(r).floor() - 1.0).max(0.0),
                        },
                    );
                    i += 1;
                    inserted = true;
                    break;
                }
                r += current.width;
                i += 1;
            }
            if !inserted {
                self.samples.push(Sample {
                    value,
                    width: 1.0,
                    delta: 0.0,
                });
                i += 1;
            }
            self.n += 1.0;
            r += 1.0;
        }
    }

    fn compress(&mut self) {
        if self.samples.len() < 2 {
            return;
        }
        let mut xi = self.samples.len() - 1;
        let mut x = self.samples[xi];
        let mut r = self.n - 1.0 - x.width;

        let mut i = xi;
        while i > 0 {
            i -= 1;
            let current = self.samples[i];
            if current.width + x.width + x.delta <= self.invariant(r) {
                x.width += current.width;
                self.samples[xi] = x;
                self.samples.remove(i);
                xi -= 1;
            } else {
                x = current;
                xi = i;
            }
            r -= current.width;
        }
    }
}
