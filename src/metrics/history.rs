//! Bounded sample history for the widget charts.

use std::collections::VecDeque;

pub fn push_capped<T>(dq: &mut VecDeque<T>, v: T, cap: usize) {
    if dq.len() == cap {
        dq.pop_front();
    }
    dq.push_back(v);
}

/// Last `cap` temperature and memory-used samples.
#[derive(Debug, Clone)]
pub struct MetricsHistory {
    temperature: VecDeque<f64>,
    ram_percent: VecDeque<f64>,
    cap: usize,
}

impl MetricsHistory {
    pub fn new(cap: usize) -> Self {
        Self {
            temperature: VecDeque::with_capacity(cap),
            ram_percent: VecDeque::with_capacity(cap),
            cap,
        }
    }

    pub fn push_temperature(&mut self, celsius: f64) {
        push_capped(&mut self.temperature, celsius, self.cap);
    }

    pub fn push_ram_percent(&mut self, percent: f64) {
        push_capped(&mut self.ram_percent, percent.clamp(0.0, 100.0), self.cap);
    }

    pub fn clear(&mut self) {
        self.temperature.clear();
        self.ram_percent.clear();
    }

    /// Temperature series, oldest first, left-padded with zeros to `cap` entries.
    pub fn temperature_series(&self) -> Vec<f64> {
        padded(&self.temperature, self.cap)
    }

    /// Memory-used series, oldest first, left-padded with zeros to `cap` entries.
    pub fn ram_series(&self) -> Vec<f64> {
        padded(&self.ram_percent, self.cap)
    }
}

fn padded(dq: &VecDeque<f64>, cap: usize) -> Vec<f64> {
    let mut out = vec![0.0; cap.saturating_sub(dq.len())];
    out.extend(dq.iter().copied());
    out
}
