// Copyright 2025 SECRET Authors
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

//! Blocking synchronization primitives.
//!
//! Every primitive here opens once and stays open, so waiters that arrive
//! late never block.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Countdown latch.
#[derive(Debug)]
pub struct Latch {
    remaining: Mutex<usize>,
    cond: Condvar,
}

impl Latch {
    pub fn new(count: usize) -> Self {
        Self {
            remaining: Mutex::new(count),
            cond: Condvar::new(),
        }
    }

    /// Decrements the count. Returns `true` only for the call that opened
    /// the latch.
    pub fn count_down(&self) -> bool {
        let mut remaining = self.remaining.lock();
        if *remaining == 0 {
            return false;
        }
        *remaining -= 1;
        if *remaining == 0 {
            self.cond.notify_all();
            true
        } else {
            false
        }
    }

    /// Opens the latch regardless of the remaining count.
    pub fn open(&self) -> bool {
        let mut remaining = self.remaining.lock();
        let was_closed = *remaining > 0;
        *remaining = 0;
        self.cond.notify_all();
        was_closed
    }

    pub fn is_open(&self) -> bool {
        *self.remaining.lock() == 0
    }

    pub fn wait(&self) {
        let mut remaining = self.remaining.lock();
        while *remaining > 0 {
            self.cond.wait(&mut remaining);
        }
    }
}

/// Write-once value that readers can block on.
#[derive(Debug)]
pub struct Slot<T> {
    value: Mutex<Option<T>>,
    cond: Condvar,
}

impl<T: Clone> Slot<T> {
    pub fn new() -> Self {
        Self {
            value: Mutex::new(None),
            cond: Condvar::new(),
        }
    }

    /// Stores the value. Returns `false` and keeps the first value if the
    /// slot was already filled.
    pub fn set(&self, value: T) -> bool {
        let mut current = self.value.lock();
        if current.is_some() {
            return false;
        }
        *current = Some(value);
        self.cond.notify_all();
        true
    }

    pub fn get(&self) -> Option<T> {
        self.value.lock().clone()
    }

    pub fn wait(&self) -> T {
        let mut current = self.value.lock();
        loop {
            if let Some(value) = current.as_ref() {
                return value.clone();
            }
            self.cond.wait(&mut current);
        }
    }
}

impl<T: Clone> Default for Slot<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Counter that threads can wait on until it reaches a target.
#[derive(Debug, Default)]
pub struct Tally {
    count: Mutex<usize>,
    cond: Condvar,
}

impl Tally {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one arrival and returns the new count.
    pub fn arrive(&self) -> usize {
        let mut count = self.count.lock();
        *count += 1;
        self.cond.notify_all();
        *count
    }

    pub fn count(&self) -> usize {
        *self.count.lock()
    }

    pub fn wait_until(&self, target: usize) {
        let mut count = self.count.lock();
        while *count < target {
            self.cond.wait(&mut count);
        }
    }
}

#[derive(Debug, Default)]
struct ShutdownInner {
    triggered: Mutex<bool>,
    cond: Condvar,
}

/// Cloneable stop flag shared by a server and everything it spawned.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    inner: Arc<ShutdownInner>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        let mut triggered = self.inner.triggered.lock();
        *triggered = true;
        self.inner.cond.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        *self.inner.triggered.lock()
    }

    /// Sleeps for up to `timeout`. Returns `true` if shutdown was triggered.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut triggered = self.inner.triggered.lock();
        while !*triggered {
            if self.inner.cond.wait_until(&mut triggered, deadline).timed_out() {
                break;
            }
        }
        *triggered
    }

    pub fn wait(&self) {
        let mut triggered = self.inner.triggered.lock();
        while !*triggered {
            self.inner.cond.wait(&mut triggered);
        }
    }
}
