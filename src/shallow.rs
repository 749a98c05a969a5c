//! Bounded derivatives of large inputs for shallow validation.
//!
//! Shallow mode validates a truncated copy of each variant file, capped at
//! a fixed record count, together with a reference file reduced to the
//! sequences those records actually use. The derivatives keep the original
//! file names so every downstream report is named consistently.

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::info;

use crate::results::parsers::TrimDownMetrics;

pub const MAX_RECORDS: u64 = 10_000;

const FASTA_LINE_WIDTH: usize = 80;

/// Open a text file, decompressing transparently when it is gzipped.
pub fn open_maybe_gzip(path: &Path) -> Result<Box<dyn BufRead>> {
    let file =
        File::open(path).with_context(|| format!("opening {}", path.display()))?;
    if path.extension().is_some_and(|extension| extension == "gz") {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

fn create_maybe_gzip(path: &Path) -> Result<Box<dyn Write>> {
    let file =
        File::create(path).with_context(|| format!("creating {}", path.display()))?;
    if path.extension().is_some_and(|extension| extension == "gz") {
        Ok(Box::new(BufWriter::new(GzEncoder::new(
            file,
            Compression::default(),
        ))))
    } else {
        Ok(Box::new(BufWriter::new(file)))
    }
}

/// What the truncation of one variant file produced.
#[derive(Debug)]
pub struct TrimOutcome {
    pub record_count: u64,
    pub reference_names: BTreeSet<String>,
    pub truncated: bool,
}

/// Copy the header and at most `max_records` data records of a variant
/// file, collecting the reference sequence names those records use.
pub fn trim_down_vcf(input: &Path, output: &Path, max_records: u64) -> Result<TrimOutcome> {
    let reader = open_maybe_gzip(input)?;
    let mut writer = create_maybe_gzip(output)?;
    let mut outcome = TrimOutcome {
        record_count: 0,
        reference_names: BTreeSet::new(),
        truncated: false,
    };
    for line in reader.lines() {
        let line = line.with_context(|| format!("reading {}", input.display()))?;
        if line.starts_with('#') {
            writeln!(writer, "{line}")?;
            continue;
        }
        if outcome.record_count >= max_records {
            outcome.truncated = true;
            break;
        }
        if let Some(sequence) = line.split('\t').next() {
            if !sequence.is_empty() {
                outcome.reference_names.insert(sequence.to_string());
            }
        }
        writeln!(writer, "{line}")?;
        outcome.record_count += 1;
    }
    writer.flush()?;
    Ok(outcome)
}

/// Reduce a reference file to the named sequences. Returns the number of
/// sequences found, or `None` when some were missing and the full file was
/// kept instead.
pub fn trim_down_fasta(
    input: &Path,
    output: &Path,
    reference_names: &BTreeSet<String>,
) -> Result<Option<u64>> {
    let reader = open_maybe_gzip(input)?;
    let mut writer = create_maybe_gzip(output)?;
    let mut keeping = false;
    let mut found: BTreeSet<String> = BTreeSet::new();
    for line in reader.lines() {
        let line = line.with_context(|| format!("reading {}", input.display()))?;
        if let Some(header) = line.strip_prefix('>') {
            let name = header
                .split_whitespace()
                .next()
                .unwrap_or(header)
                .to_string();
            keeping = reference_names.contains(&name);
            if keeping {
                found.insert(name);
                writeln!(writer, "{line}")?;
            }
        } else if keeping {
            for chunk in line.as_bytes().chunks(FASTA_LINE_WIDTH) {
                writer.write_all(chunk)?;
                writer.write_all(b"\n")?;
            }
        }
    }
    writer.flush()?;
    drop(writer);

    if found.len() < reference_names.len() {
        // some records point at sequences this file does not declare, the
        // reduced file would mask that; fall back to the full reference
        info!(
            "Only {} of {} sequences found in {}, keeping the full reference",
            found.len(),
            reference_names.len(),
            input.display()
        );
        fs::copy(input, output)
            .with_context(|| format!("copying {} to {}", input.display(), output.display()))?;
        return Ok(None);
    }
    Ok(Some(found.len() as u64))
}

/// The truncated derivatives of one variant file and its reference.
#[derive(Debug)]
pub struct ShallowInputs {
    pub vcf: PathBuf,
    pub fasta: PathBuf,
    pub metrics: TrimDownMetrics,
}

/// Produce the shallow derivatives of one mapping entry under `dest_dir`,
/// keeping the original file names.
pub fn shallow_inputs(vcf: &Path, fasta: &Path, dest_dir: &Path) -> Result<ShallowInputs> {
    let Some(vcf_name) = vcf.file_name() else {
        bail!("variant file path {} has no file name", vcf.display());
    };
    let Some(fasta_name) = fasta.file_name() else {
        bail!("reference file path {} has no file name", fasta.display());
    };
    let trimmed_vcf = dest_dir.join(vcf_name);
    let trimmed_fasta = dest_dir.join(fasta_name);

    let outcome = trim_down_vcf(vcf, &trimmed_vcf, MAX_RECORDS)?;
    let number_sequence_found = if outcome.truncated {
        trim_down_fasta(fasta, &trimmed_fasta, &outcome.reference_names)?
    } else {
        // nothing was cut, validate against the full reference
        fs::copy(fasta, &trimmed_fasta)
            .with_context(|| format!("copying {}", fasta.display()))?;
        None
    };
    Ok(ShallowInputs {
        vcf: trimmed_vcf,
        fasta: trimmed_fasta,
        metrics: TrimDownMetrics {
            trim_down_vcf_record: outcome.record_count,
            number_sequence_found,
            trim_down_required: outcome.truncated,
        },
    })
}

/// Record the truncation metrics next to the other validation reports.
pub fn write_metrics(path: &Path, metrics: &TrimDownMetrics) -> Result<()> {
    let text = serde_yaml::to_string(metrics)
        .with_context(|| format!("serialising truncation metrics for {}", path.display()))?;
    fs::write(path, text).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}
