//! Rolling latency history for a probed server

use std::collections::VecDeque;
use std::time::Duration;

pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// Coarse rating of a measured round trip, for the server list display
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkQuality {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl LinkQuality {
    pub fn from_latency(latency: Duration) -> Self {
        let ms = latency.as_secs_f64() * 1000.0;
        if ms < 30.0 {
            LinkQuality::Excellent
        } else if ms < 60.0 {
            LinkQuality::Good
        } else if ms < 100.0 {
            LinkQuality::Fair
        } else {
            LinkQuality::Poor
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            LinkQuality::Excellent => "Excellent",
            LinkQuality::Good => "Good",
            LinkQuality::Fair => "Fair",
            LinkQuality::Poor => "Poor",
        }
    }
}

/// Summary of a server's recent round trips
#[derive(Debug, Clone, PartialEq)]
pub struct LatencyStats {
    pub samples: usize,
    pub latest: Option<Duration>,
    pub average: Option<Duration>,
    pub jitter: Option<Duration>,
    pub quality: Option<LinkQuality>,
}

/// Bounded ring of resolved round-trip times. Once full, every push evicts
/// the oldest sample.
#[derive(Debug, Clone)]
pub struct LatencyHistory {
    samples: VecDeque<Duration>,
    capacity: usize,
}

impl LatencyHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, sample: Duration) {
        self.samples.push_back(sample);

        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Copy of the samples, oldest first.
    pub fn snapshot(&self) -> Vec<Duration> {
        self.samples.iter().copied().collect()
    }

    pub fn latest(&self) -> Option<Duration> {
        self.samples.back().copied()
    }

    pub fn average(&self) -> Option<Duration> {
        if self.samples.is_empty() {
            return None;
        }

        let total: Duration = self.samples.iter().sum();
        Some(total / self.samples.len() as u32)
    }

    /// Mean absolute difference between consecutive samples.
    pub fn jitter(&self) -> Option<Duration> {
        if self.samples.len() < 2 {
            return None;
        }

        let total: Duration = self
            .samples
            .iter()
            .zip(self.samples.iter().skip(1))
            .map(|(prev, curr)| {
                if curr > prev {
                    *curr - *prev
                } else {
                    *prev - *curr
                }
            })
            .sum();

        Some(total / (self.samples.len() - 1) as u32)
    }

    pub fn stats(&self) -> LatencyStats {
        LatencyStats {
            samples: self.samples.len(),
            latest: self.latest(),
            average: self.average(),
            jitter: self.jitter(),
            quality: self.average().map(LinkQuality::from_latency),
        }
    }
}

impl Default for LatencyHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}
