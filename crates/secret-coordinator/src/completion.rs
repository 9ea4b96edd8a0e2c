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

//! Result fragment collection and completion detection.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;

use secret_common::{GlobalId, Result, SecretError};

/// One block of output lines from a Compute Node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultFragment {
    pub origin: GlobalId,
    /// Arrival order across all origins.
    pub ordinal: usize,
    pub text: String,
}

/// What an end-of-output sentinel did to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SentinelOutcome {
    /// The origin had already finished.
    Duplicate,
    /// Counted; other origins are still outstanding.
    Pending { first: bool },
    /// Counted and it was the last one. Returned to exactly one caller.
    Complete { first: bool },
}

pub struct Completion {
    expected: usize,
    fragments: Mutex<Vec<ResultFragment>>,
    finished: Vec<AtomicBool>,
    finished_count: AtomicUsize,
    merged: AtomicBool,
}

impl Completion {
    pub fn new(expected: usize) -> Self {
        Self {
            expected,
            fragments: Mutex::new(Vec::new()),
            finished: (0..expected).map(|_| AtomicBool::new(false)).collect(),
            finished_count: AtomicUsize::new(0),
            merged: AtomicBool::new(false),
        }
    }

    fn check_origin(&self, origin: GlobalId) -> Result<()> {
        if origin.index() >= self.expected {
            return Err(SecretError::Protocol(format!(
                "output from unknown compute node {} (expected ids below {})",
                origin, self.expected
            )));
        }
        Ok(())
    }

    pub fn push_fragment(&self, origin: GlobalId, text: String) -> Result<()> {
        self.check_origin(origin)?;
        if text.is_empty() {
            return Ok(());
        }
        let mut fragments = self.fragments.lock();
        let ordinal = fragments.len();
        fragments.push(ResultFragment {
            origin,
            ordinal,
            text,
        });
        Ok(())
    }

    pub fn mark_finished(&self, origin: GlobalId) -> Result<SentinelOutcome> {
        self.check_origin(origin)?;
        if self.finished[origin.index()].swap(true, Ordering::AcqRel) {
            return Ok(SentinelOutcome::Duplicate);
        }

        let count = self.finished_count.fetch_add(1, Ordering::AcqRel) + 1;
        let first = count == 1;
        if count == self.expected
            && self
                .merged
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            Ok(SentinelOutcome::Complete { first })
        } else {
            Ok(SentinelOutcome::Pending { first })
        }
    }

    pub fn is_finished(&self, origin: GlobalId) -> Result<bool> {
        self.check_origin(origin)?;
        Ok(self.finished[origin.index()].load(Ordering::Acquire))
    }

    pub fn finished_count(&self) -> usize {
        self.finished_count.load(Ordering::Acquire)
    }

    pub fn unfinished(&self) -> Vec<GlobalId> {
        self.finished
            .iter()
            .enumerate()
            .filter(|(_, done)| !done.load(Ordering::Acquire))
            .map(|(index, _)| GlobalId(index))
            .collect()
    }

    /// Removes every collected fragment, in arrival order.
    pub fn take_fragments(&self) -> Vec<ResultFragment> {
        std::mem::take(&mut *self.fragments.lock())
    }
}
