//! Phenotype files requested by Compute Nodes.
//!
//! Each phenotype lives in `<phenotype_dir>/<name>.tsv`: a header line, then
//! one line per subject whose last column is the value. Boolean values are
//! sent as `1` and `0`.

use std::fs;
use std::path::Path;

use secret_common::crypto::{to_base64, SymmetricKey};
use secret_common::{ComputeMessage, Frame, Result, SecretError, SenderId};

/// Name of the constant intercept term, which is never read from disk.
pub const INTERCEPT: &str = "1";

fn normalize(value: &str) -> String {
    match value.trim() {
        "true" => "1".to_string(),
        "false" => "0".to_string(),
        other => other.to_string(),
    }
}

/// Reads the values of one phenotype, header excluded.
pub fn load_phenotype(dir: &Path, name: &str) -> Result<Vec<String>> {
    if name.is_empty() || name.contains(['/', '\\']) || name.contains("..") {
        return Err(SecretError::Protocol(format!("invalid phenotype name {:?}", name)));
    }

    let path = dir.join(format!("{}.tsv", name));
    let text = fs::read_to_string(&path).map_err(|e| {
        SecretError::Config(format!("cannot read phenotype file {}: {}", path.display(), e))
    })?;

    Ok(text
        .lines()
        .skip(1)
        .filter(|line| !line.trim().is_empty())
        .map(|line| normalize(line.rsplit('\t').next().unwrap_or(line)))
        .collect())
}

fn seal_text(key: &SymmetricKey, text: &str) -> Result<String> {
    Ok(to_base64(&key.encrypt(text.as_bytes())?))
}

/// Builds the phenotype messages for one Compute Node.
///
/// The last name is the outcome: it yields `PatientCount` and `YValue`.
/// Every other name except the intercept yields a `Covariant`.
pub fn phenotype_frames(
    sender: &SenderId,
    dir: &Path,
    names: &[String],
    key: &SymmetricKey,
) -> Result<Vec<Frame>> {
    let (outcome, covariants) = names
        .split_last()
        .ok_or_else(|| SecretError::Protocol("empty phenotype request".to_string()))?;

    let outcome_values = load_phenotype(dir, outcome)?;
    let mut frames = vec![
        Frame::new(
            sender.clone(),
            ComputeMessage::PatientCount,
            seal_text(key, &outcome_values.len().to_string())?,
        ),
        Frame::new(
            sender.clone(),
            ComputeMessage::YValue,
            seal_text(key, &outcome_values.join("\t"))?,
        ),
    ];

    for name in covariants.iter().filter(|name| name.as_str() != INTERCEPT) {
        let values = load_phenotype(dir, name)?;
        frames.push(Frame::new(
            sender.clone(),
            ComputeMessage::Covariant,
            format!("{} {}", name, seal_text(key, &values.join("\t"))?),
        ));
    }
    Ok(frames)
}
