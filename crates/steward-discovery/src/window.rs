// Copyright 2025 Steward Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Fixed-bucket rolling window of call outcomes.
//!
//! The window is a ring of time slots. A slot remembers the epoch (bucket
//! index since the clock origin) it was last written in; a write into a slot
//! holding an older epoch resets it first, and reads skip slots whose epoch
//! has fallen out of the window. Outcomes older than the window therefore
//! stop counting without any background task.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
struct Slot {
    /// Bucket epoch plus one; zero marks a never-written slot.
    epoch: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
}

/// Outcome totals over the live part of a window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowTotals {
    pub successes: u64,
    pub failures: u64,
}

impl WindowTotals {
    pub fn total(&self) -> u64 {
        self.successes + self.failures
    }

    /// Failure share in whole percent, rounded down.
    pub fn error_percentage(&self) -> u64 {
        let total = self.total();
        if total == 0 {
            return 0;
        }
        self.failures * 100 / total
    }
}

#[derive(Debug)]
pub struct RollingWindow {
    slots: Box<[Slot]>,
    bucket_ms: u64,
}

impl RollingWindow {
    /// Creates a window spanning `window_ms` split into `buckets` slots.
    pub fn new(window_ms: u64, buckets: u32) -> Self {
        let buckets = buckets.max(1);
        let slots = (0..buckets).map(|_| Slot::default()).collect();
        Self {
            slots,
            bucket_ms: (window_ms / u64::from(buckets)).max(1),
        }
    }

    fn epoch(&self, now_ms: u64) -> u64 {
        now_ms / self.bucket_ms + 1
    }

    fn slot(&self, epoch: u64) -> &Slot {
        &self.slots[(epoch % self.slots.len() as u64) as usize]
    }

    pub fn record(&self, now_ms: u64, success: bool) {
        let epoch = self.epoch(now_ms);
        let slot = self.slot(epoch);
        let mut seen = slot.epoch.load(Ordering::Acquire);
        while seen < epoch {
            match slot
                .epoch
                .compare_exchange(seen, epoch, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => {
                    // an increment racing with this reset may be lost
                    slot.successes.store(0, Ordering::Release);
                    slot.failures.store(0, Ordering::Release);
                    break;
                }
                Err(actual) => seen = actual,
            }
        }
        let counter = if success {
            &slot.successes
        } else {
            &slot.failures
        };
        counter.fetch_add(1, Ordering::AcqRel);
    }

    pub fn totals(&self, now_ms: u64) -> WindowTotals {
        let current = self.epoch(now_ms);
        let span = self.slots.len() as u64;
        let mut totals = WindowTotals::default();
        for slot in self.slots.iter() {
            let epoch = slot.epoch.load(Ordering::Acquire);
            if epoch == 0 || epoch > current || epoch + span <= current {
                continue;
            }
            totals.successes += slot.successes.load(Ordering::Acquire);
            totals.failures += slot.failures.load(Ordering::Acquire);
        }
        totals
    }

    pub fn reset(&self) {
        for slot in self.slots.iter() {
            slot.epoch.store(0, Ordering::Release);
            slot.successes.store(0, Ordering::Release);
            slot.failures.store(0, Ordering::Release);
        }
    }
}
