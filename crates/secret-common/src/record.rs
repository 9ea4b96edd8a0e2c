//! Genotype records as they travel between Data Providers and Compute Nodes.
//!
//! An input record is `chrom:pos\talleles\tv1\t...\tvN`. On the wire the
//! values are packed two bits each and encrypted, giving
//! `locus\talleles\tslot\tsubjects\t<base64 ciphertext>`.

use crate::crypto::{from_base64, to_base64, SymmetricKey};
use crate::error::{Result, SecretError};

/// Packed code for a value other than `0`, `1` or `2`.
pub const MISSING: u8 = 3;

fn genotype_code(value: &str) -> u8 {
    match value.trim() {
        "0" => 0,
        "1" => 1,
        "2" => 2,
        _ => MISSING,
    }
}

/// Packs values four per byte, the first value in the low bits.
pub fn pack_genotypes<'a, I>(values: I) -> Vec<u8>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut packed = Vec::new();
    for (i, value) in values.into_iter().enumerate() {
        if i % 4 == 0 {
            packed.push(0);
        }
        if let Some(last) = packed.last_mut() {
            *last |= genotype_code(value) << ((i % 4) * 2);
        }
    }
    packed
}

pub fn unpack_genotypes(packed: &[u8], subjects: usize) -> Result<Vec<u8>> {
    if packed.len() != subjects.div_ceil(4) {
        return Err(SecretError::Protocol(format!(
            "{} packed bytes cannot hold exactly {} subjects",
            packed.len(),
            subjects
        )));
    }
    Ok((0..subjects)
        .map(|i| (packed[i / 4] >> ((i % 4) * 2)) & 0b11)
        .collect())
}

/// Locus field of an input or encrypted record.
pub fn locus_of(line: &str) -> &str {
    line.split('\t').next().unwrap_or(line)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedRecord {
    pub locus: String,
    pub alleles: String,
    /// Index of the symmetric key used, out of the node's shard capacity.
    pub slot: usize,
    pub subjects: usize,
    pub ciphertext: Vec<u8>,
}

impl EncryptedRecord {
    pub fn seal(
        locus: &str,
        alleles: &str,
        values: &[&str],
        slot: usize,
        key: &SymmetricKey,
    ) -> Result<Self> {
        let packed = pack_genotypes(values.iter().copied());
        Ok(Self {
            locus: locus.to_string(),
            alleles: alleles.to_string(),
            slot,
            subjects: values.len(),
            ciphertext: key.encrypt(&packed)?,
        })
    }

    /// Decrypts and unpacks the subject values.
    pub fn open(&self, key: &SymmetricKey) -> Result<Vec<u8>> {
        let packed = key.decrypt(&self.ciphertext)?;
        unpack_genotypes(&packed, self.subjects)
    }

    pub fn encode(&self) -> String {
        format!(
            "{}\t{}\t{}\t{}\t{}",
            self.locus,
            self.alleles,
            self.slot,
            self.subjects,
            to_base64(&self.ciphertext)
        )
    }

    pub fn decode(line: &str) -> Result<Self> {
        let fields: Vec<&str> = line.splitn(5, '\t').collect();
        if fields.len() != 5 {
            return Err(SecretError::Protocol(format!(
                "encrypted record has {} fields, expected 5",
                fields.len()
            )));
        }
        Ok(Self {
            locus: fields[0].to_string(),
            alleles: fields[1].to_string(),
            slot: fields[2].parse()?,
            subjects: fields[3].parse()?,
            ciphertext: from_base64(fields[4])?,
        })
    }
}
