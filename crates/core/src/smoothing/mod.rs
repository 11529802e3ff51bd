use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::{DiscoLightsError, Result};

/// Bounded moving average over the most recent loudness samples.
///
/// When full, a push evicts the oldest sample first. A capacity of one keeps
/// only the latest sample, so the average is the raw value.
#[derive(Debug, Clone)]
pub struct SmoothingWindow {
    capacity: usize,
    samples: VecDeque<f32>,
}

impl SmoothingWindow {
    /// Creates an empty window. Capacity is clamped to at least one sample.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            samples: VecDeque::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.samples.len() == self.capacity
    }

    /// Inserts a sample, evicting the oldest one when at capacity.
    pub fn push(&mut self, sample: f32) {
        if self.is_full() {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    /// Arithmetic mean of the held samples, or 0 when empty.
    pub fn current_average(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum: f32 = self.samples.iter().sum();
        sum / self.samples.len() as f32
    }
}

/// Thread-safe handle shared between the capture callback (writer) and the
/// periodic tick (reader).
#[derive(Clone)]
pub struct SharedWindow {
    shared: Arc<Mutex<SmoothingWindow>>,
}

impl SharedWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            shared: Arc::new(Mutex::new(SmoothingWindow::new(capacity))),
        }
    }

    pub fn push(&self, sample: f32) -> Result<()> {
        self.lock()?.push(sample);
        Ok(())
    }

    pub fn current_average(&self) -> Result<f32> {
        Ok(self.lock()?.current_average())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.len())
    }

    fn lock(&self) -> Result<MutexGuard<'_, SmoothingWindow>> {
        self.shared
            .lock()
            .map_err(|_| DiscoLightsError::Poisoned("smoothing window"))
    }
}

impl std::fmt::Debug for SharedWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedWindow").finish()
    }
}
