//! Hash partitioning and encryption of the allele file.
//!
//! `K = max(workers, shards)` threads scan the file. Worker `i` takes data
//! lines `i, i + K, i + 2K, ...` and stages each one in the heap of the shard
//! its locus hashes to. Once every worker has finished scanning, worker
//! `i < shards` drains shard `i` in line order and encrypts it.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use parking_lot::Mutex;
use tracing::{debug, info};

use secret_common::crypto::{digest, SymmetricKey};
use secret_common::record::{locus_of, EncryptedRecord};
use secret_common::sync::Latch;
use secret_common::{Result, SecretError};

/// Compute Node index owning `locus`, out of `shards`.
pub fn shard_of(locus: &str, shards: usize) -> usize {
    let hash = digest(locus.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&hash[..8]);
    (u64::from_be_bytes(prefix) % shards.max(1) as u64) as usize
}

/// What the start-up check learned about an allele file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlleleFileSummary {
    /// Subjects per record, from the header.
    pub subjects: usize,
}

/// Checks that the file has a well-formed header and at least one record.
pub fn inspect_allele_file(path: &Path) -> Result<AlleleFileSummary> {
    let file = File::open(path).map_err(|e| {
        SecretError::Config(format!("cannot open allele file {}: {}", path.display(), e))
    })?;
    let mut lines = BufReader::new(file).lines();

    let header = match lines.next() {
        Some(line) => line?,
        None => return Err(SecretError::EmptyInput(path.display().to_string())),
    };
    let fields = header.trim_end_matches('\r').split('\t').count();
    if fields < 3 {
        return Err(SecretError::MalformedRecord {
            line: 1,
            reason: format!("header has {} fields, expected at least 3", fields),
        });
    }

    for line in lines {
        if !line?.trim().is_empty() {
            return Ok(AlleleFileSummary {
                subjects: fields - 2,
            });
        }
    }
    Err(SecretError::EmptyInput(path.display().to_string()))
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct StagedRecord {
    /// Zero-based index among data lines.
    line_number: usize,
    line: String,
}

/// Encrypted records per shard, in input line order.
#[derive(Debug, Default)]
pub struct PartitionOutput {
    pub shards: Vec<Vec<String>>,
    pub records: usize,
    /// Subjects per record as seen on the first scanned record.
    pub subjects: usize,
}

struct Pipeline<'a> {
    path: &'a Path,
    keys: &'a [Vec<SymmetricKey>],
    expected_subjects: usize,
    workers: usize,
    staging: Vec<Mutex<BinaryHeap<Reverse<StagedRecord>>>>,
    encrypted: Vec<Mutex<Vec<String>>>,
    subjects: AtomicUsize,
    parsed: AtomicUsize,
    scanned: Latch,
    failure: Mutex<Option<SecretError>>,
}

impl Pipeline<'_> {
    fn fail(&self, err: SecretError) {
        let mut failure = self.failure.lock();
        if failure.is_none() {
            *failure = Some(err);
        }
    }

    fn scan(&self, worker: usize) -> Result<()> {
        let reader = BufReader::new(File::open(self.path)?);
        let shards = self.keys.len();

        for (step, line) in reader
            .lines()
            .skip(1 + worker)
            .step_by(self.workers)
            .enumerate()
        {
            let mut line = line?;
            if line.ends_with('\r') {
                line.pop();
            }
            if line.trim().is_empty() {
                continue;
            }

            let fields = line.split('\t').count();
            if fields >= 3 {
                let _ = self.subjects.compare_exchange(
                    0,
                    fields - 2,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                );
            }

            let shard = shard_of(locus_of(&line), shards);
            let line_number = worker + step * self.workers;
            self.staging[shard]
                .lock()
                .push(Reverse(StagedRecord { line_number, line }));
            self.parsed.fetch_add(1, Ordering::AcqRel);
        }
        Ok(())
    }

    fn encrypt(&self, shard: usize) -> Result<()> {
        let mut staged = std::mem::take(&mut *self.staging[shard].lock());
        let slots = &self.keys[shard];
        let mut out = Vec::with_capacity(staged.len());

        while let Some(Reverse(record)) = staged.pop() {
            let file_line = record.line_number + 2;
            let fields: Vec<&str> = record.line.split('\t').collect();
            if fields.len() < 3 {
                return Err(SecretError::MalformedRecord {
                    line: file_line,
                    reason: format!("{} fields, expected at least 3", fields.len()),
                });
            }
            let values = &fields[2..];
            if values.len() != self.expected_subjects {
                return Err(SecretError::MalformedRecord {
                    line: file_line,
                    reason: format!(
                        "{} values, header declares {}",
                        values.len(),
                        self.expected_subjects
                    ),
                });
            }

            let slot = record.line_number % slots.len();
            let sealed = EncryptedRecord::seal(fields[0], fields[1], values, slot, &slots[slot])?;
            out.push(sealed.encode());
        }

        debug!("Shard {} encrypted {} records", shard, out.len());
        *self.encrypted[shard].lock() = out;
        Ok(())
    }

    fn work(&self, worker: usize) {
        if let Err(e) = self.scan(worker) {
            self.fail(e);
        }
        // Count down even after a failure so no worker waits forever.
        self.scanned.count_down();
        self.scanned.wait();

        if worker < self.keys.len() && self.failure.lock().is_none() {
            if let Err(e) = self.encrypt(worker) {
                self.fail(e);
            }
        }
    }
}

/// Splits the allele file into one encrypted queue per Compute Node.
///
/// `keys[n]` holds the slot keys of node `n`; a record on data line `l`
/// uses slot `l % keys[n].len()`.
pub fn partition_file(
    path: &Path,
    expected_subjects: usize,
    keys: &[Vec<SymmetricKey>],
    workers: usize,
) -> Result<PartitionOutput> {
    let shards = keys.len();
    if shards == 0 || keys.iter().any(Vec::is_empty) {
        return Err(SecretError::Protocol(
            "partitioning needs at least one compute node with one key slot".to_string(),
        ));
    }
    let workers = workers.max(shards);

    let pipeline = Pipeline {
        path,
        keys,
        expected_subjects,
        workers,
        staging: (0..shards).map(|_| Mutex::new(BinaryHeap::new())).collect(),
        encrypted: (0..shards).map(|_| Mutex::new(Vec::new())).collect(),
        subjects: AtomicUsize::new(0),
        parsed: AtomicUsize::new(0),
        scanned: Latch::new(workers),
        failure: Mutex::new(None),
    };

    thread::scope(|scope| {
        for worker in 0..workers {
            let pipeline = &pipeline;
            scope.spawn(move || pipeline.work(worker));
        }
    });

    if let Some(err) = pipeline.failure.into_inner() {
        return Err(err);
    }
    let records = pipeline.parsed.into_inner();
    if records == 0 {
        return Err(SecretError::EmptyInput(path.display().to_string()));
    }

    let shards: Vec<Vec<String>> = pipeline
        .encrypted
        .into_iter()
        .map(|queue| queue.into_inner())
        .collect();
    info!(
        "Partitioned {} records across {} shards with {} workers",
        records,
        shards.len(),
        workers
    );

    Ok(PartitionOutput {
        shards,
        records,
        subjects: pipeline.subjects.into_inner(),
    })
}
