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

//! K-way merge of result fragments into the output file.
//!
//! Output lines start with a locus `chrom:pos`. Lines are emitted in
//! descending locus order: chromosome numerically (`X` counts as 24), then
//! position by length and finally lexicographically. Lines whose locus
//! cannot be parsed come last.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use secret_common::Result;

const X_CHROMOSOME: u32 = 24;

#[derive(Debug, PartialEq, Eq)]
struct LocusKey<'a> {
    chromosome: u32,
    position: &'a str,
}

impl Ord for LocusKey<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.chromosome
            .cmp(&other.chromosome)
            .then_with(|| self.position.len().cmp(&other.position.len()))
            .then_with(|| self.position.cmp(other.position))
    }
}

impl PartialOrd for LocusKey<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn locus_key(line: &str) -> Option<LocusKey<'_>> {
    let (chromosome, rest) = line.split_once(':')?;
    let chromosome = match chromosome {
        "X" => X_CHROMOSOME,
        other => other.parse().ok()?,
    };
    let position = rest.split('\t').next().unwrap_or(rest);
    Some(LocusKey {
        chromosome,
        position,
    })
}

/// Orders two output lines; `Greater` means `a` is written first.
pub fn compare_lines(a: &str, b: &str) -> Ordering {
    match (locus_key(a), locus_key(b)) {
        (Some(ka), Some(kb)) => ka.cmp(&kb),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => b.cmp(a),
    }
}

#[derive(Debug, PartialEq, Eq)]
struct HeapLine(String);

impl Ord for HeapLine {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_lines(&self.0, &other.0)
    }
}

impl PartialOrd for HeapLine {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Priority queue over output lines, filled once and drained once.
#[derive(Debug, Default)]
pub struct MergeFrontier {
    heap: BinaryHeap<HeapLine>,
}

impl MergeFrontier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Splits a fragment into lines, dropping empty ones.
    pub fn push_fragment(&mut self, text: &str) {
        self.heap.extend(
            text.lines()
                .filter(|line| !line.trim().is_empty())
                .map(|line| HeapLine(line.to_string())),
        );
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Lines in output order.
    pub fn drain(mut self) -> impl Iterator<Item = String> {
        std::iter::from_fn(move || self.heap.pop().map(|line| line.0))
    }
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".partial");
    PathBuf::from(name)
}

/// Writes `lines` to `path` through a `.partial` sibling that is synced and
/// renamed into place, so a reader never sees an incomplete file.
pub fn write_output<I>(path: &Path, lines: I) -> Result<usize>
where
    I: IntoIterator<Item = String>,
{
    let partial = partial_path(path);
    let mut writer = BufWriter::new(File::create(&partial)?);
    let mut written = 0;
    for line in lines {
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        written += 1;
    }
    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    drop(file);
    fs::rename(&partial, path)?;
    Ok(written)
}
