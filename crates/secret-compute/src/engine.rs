//! Result computation inside a Compute Node.

use std::collections::BTreeMap;

use tracing::debug;

use secret_common::record::{EncryptedRecord, MISSING};
use secret_common::{Result, SecretError};

/// Consumes decrypted inputs and produces the node's result lines.
///
/// Every record of a given locus is routed to the same Compute Node, so an
/// engine sees all providers' data for the loci it owns. Result lines must
/// start with the locus so the Coordination Server can order them.
pub trait ComputeEngine: Send {
    /// One phenotype column of one provider, in subject order.
    fn ingest_phenotype(&mut self, provider: &str, name: &str, values: Vec<String>)
        -> Result<()>;

    /// One decrypted record; `values` holds one genotype code per subject.
    fn ingest_record(
        &mut self,
        provider: &str,
        record: &EncryptedRecord,
        values: &[u8],
    ) -> Result<()>;

    fn finish(&mut self) -> Vec<String>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct LocusTally {
    alleles: String,
    called: usize,
    alt_sum: usize,
}

/// Counts called genotypes and alternate alleles per locus across providers.
///
/// Emits `locus\talleles\tcalled\talt_allele_sum` for each locus. Every
/// phenotype column and record of one provider must cover the same subjects.
#[derive(Debug, Default)]
pub struct AlleleTallyEngine {
    loci: BTreeMap<String, LocusTally>,
    /// Subject count per provider, from its first phenotype or record.
    subjects: BTreeMap<String, usize>,
}

impl AlleleTallyEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_subjects(&mut self, provider: &str, what: &str, count: usize) -> Result<()> {
        let expected = *self.subjects.entry(provider.to_string()).or_insert(count);
        if expected != count {
            return Err(SecretError::Protocol(format!(
                "{} from {} covers {} subjects, expected {}",
                what, provider, count, expected
            )));
        }
        Ok(())
    }
}

impl ComputeEngine for AlleleTallyEngine {
    fn ingest_phenotype(
        &mut self,
        provider: &str,
        name: &str,
        values: Vec<String>,
    ) -> Result<()> {
        debug!("Phenotype {} from {}: {} values", name, provider, values.len());
        self.check_subjects(provider, &format!("phenotype {}", name), values.len())
    }

    fn ingest_record(
        &mut self,
        provider: &str,
        record: &EncryptedRecord,
        values: &[u8],
    ) -> Result<()> {
        if values.iter().any(|&v| v > MISSING) {
            return Err(SecretError::Protocol(format!(
                "record {} from {} holds an invalid genotype code",
                record.locus, provider
            )));
        }
        self.check_subjects(provider, &format!("record {}", record.locus), values.len())?;

        let tally = self.loci.entry(record.locus.clone()).or_insert_with(|| LocusTally {
            alleles: record.alleles.clone(),
            ..LocusTally::default()
        });
        for &value in values.iter().filter(|&&v| v != MISSING) {
            tally.called += 1;
            tally.alt_sum += value as usize;
        }
        Ok(())
    }

    fn finish(&mut self) -> Vec<String> {
        std::mem::take(&mut self.loci)
            .into_iter()
            .map(|(locus, tally)| {
                format!("{}\t{}\t{}\t{}", locus, tally.alleles, tally.called, tally.alt_sum)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(locus: &str) -> EncryptedRecord {
        EncryptedRecord {
            locus: locus.to_string(),
            alleles: "A/G".to_string(),
            slot: 0,
            subjects: 4,
            ciphertext: Vec::new(),
        }
    }

    #[test]
    fn test_tally_skips_missing_values() {
        let mut engine = AlleleTallyEngine::new();
        engine.ingest_record("dpi1", &record("1:100"), &[0, 1, 2, MISSING]).unwrap();
        engine.ingest_record("dpi2", &record("1:100"), &[2, 2, MISSING, MISSING]).unwrap();
        engine.ingest_record("dpi1", &record("2:7"), &[1, 1, 1, 1]).unwrap();

        let lines = engine.finish();
        assert_eq!(lines, vec!["1:100\tA/G\t5\t7", "2:7\tA/G\t4\t4"]);
        assert!(engine.finish().is_empty());
    }

    #[test]
    fn test_tally_rejects_bad_codes() {
        let mut engine = AlleleTallyEngine::new();
        assert!(engine.ingest_record("dpi1", &record("1:1"), &[4]).is_err());
    }

    #[test]
    fn test_subject_counts_must_agree_per_provider() {
        let mut engine = AlleleTallyEngine::new();
        engine
            .ingest_phenotype("dpi1", "age", vec!["40".into(), "51".into(), "38".into()])
            .unwrap();
        assert!(engine
            .ingest_phenotype("dpi1", "case", vec!["1".into(), "0".into()])
            .is_err());

        let mut short = record("1:1");
        short.subjects = 3;
        engine.ingest_record("dpi1", &short, &[0, 1, 2]).unwrap();
        assert!(engine.ingest_record("dpi1", &record("1:2"), &[0, 1, 2, 2]).is_err());

        // Another provider may hold a different number of subjects.
        engine.ingest_record("dpi2", &record("1:1"), &[0, 0, 0, 0]).unwrap();
        assert_eq!(engine.finish(), vec!["1:1\tA/G\t7\t3"]);
    }
}
