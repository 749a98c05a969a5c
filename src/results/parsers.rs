//! One parser per external tool's textual contract.
//!
//! The checking tools write line-oriented logs or small YAML documents;
//! each parser here is versioned against one of those formats. A tool that
//! grows a structured output only needs a new parser, the aggregator does
//! not change.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::results::severity;
use crate::results::MAX_REPORTED_FINDINGS;

/// Parsed syntax-check text report.
#[derive(Debug, Default, PartialEq)]
pub struct SyntaxReport {
    pub valid: bool,
    pub warning_count: u64,
    pub error_count: u64,
    pub critical_count: u64,
    pub error_list: Vec<String>,
    pub critical_list: Vec<String>,
}

pub fn parse_vcf_check_report(path: &Path) -> Result<SyntaxReport> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading syntax check report {}", path.display()))?;
    let mut report = SyntaxReport {
        valid: true,
        ..SyntaxReport::default()
    };
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.contains("warning") {
            report.warning_count += 1;
        } else if line.starts_with("According to the VCF specification") {
            if line.contains("not") {
                report.valid = false;
            }
        } else if severity::is_critical(line) {
            report.critical_count += 1;
            if report.critical_list.len() < MAX_REPORTED_FINDINGS {
                report.critical_list.push(line.to_string());
            }
        } else {
            report.error_count += 1;
            if report.error_list.len() < MAX_REPORTED_FINDINGS {
                report.error_list.push(line.to_string());
            }
        }
    }
    Ok(report)
}

/// Parsed assembly-check log: `[error]` lines plus the final
/// `[info] Number of matches: m/t` summary.
#[derive(Debug, Default, PartialEq)]
pub struct AssemblyLog {
    pub error_list: Vec<String>,
    pub error_count: u64,
    pub match_count: Option<u64>,
    pub total_count: Option<u64>,
}

pub fn parse_assembly_check_log(path: &Path) -> Result<AssemblyLog> {
    const ERROR_PREFIX: &str = "[error] ";
    const MATCHES_PREFIX: &str = "[info] Number of matches: ";

    let text = fs::read_to_string(path)
        .with_context(|| format!("reading assembly check log {}", path.display()))?;
    let mut log = AssemblyLog::default();
    for line in text.lines() {
        let line = line.trim();
        if let Some(message) = line.strip_prefix(ERROR_PREFIX) {
            log.error_count += 1;
            if log.error_list.len() < MAX_REPORTED_FINDINGS {
                log.error_list.push(message.to_string());
            }
        } else if let Some(counts) = line.strip_prefix(MATCHES_PREFIX) {
            let (matched, total) = counts
                .split_once('/')
                .with_context(|| format!("malformed match summary line: {line}"))?;
            log.match_count = Some(matched.trim().parse()?);
            log.total_count = Some(total.trim().parse()?);
        }
    }
    Ok(log)
}

/// Parsed assembly-check text report: per-variant mismatches and contig
/// resolution errors.
#[derive(Debug, Default, PartialEq)]
pub struct AssemblyReport {
    pub mismatch_list: Vec<String>,
    pub mismatch_count: u64,
    pub error_list: Vec<String>,
    pub error_count: u64,
}

pub fn parse_assembly_check_report(path: &Path) -> Result<AssemblyReport> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading assembly check report {}", path.display()))?;
    let mut report = AssemblyReport::default();
    for line in text.lines() {
        let line = line.trim();
        if line.contains("does not match the reference sequence") {
            report.mismatch_count += 1;
            if report.mismatch_list.len() < MAX_REPORTED_FINDINGS {
                report.mismatch_list.push(line.to_string());
            }
        } else if line.contains("Multiple synonyms") {
            report.error_count += 1;
            if report.error_list.len() < MAX_REPORTED_FINDINGS {
                report.error_list.push(line.to_string());
            }
        } else if line.contains("is not present in FASTA file") {
            // reported once per line by the tool; deduplicate per contig
            let message = match line.split_once(": ") {
                Some((_, message)) => message.trim(),
                None => line,
            };
            if !report.error_list.iter().any(|seen| seen == message) {
                report.error_count += 1;
                if report.error_list.len() < MAX_REPORTED_FINDINGS {
                    report.error_list.push(message.to_string());
                }
            }
        }
    }
    Ok(report)
}

/// Sample-name concordance between the variant files and the metadata, per
/// analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleConcordance {
    pub overall_differences: bool,
    #[serde(default)]
    pub results_per_analysis: BTreeMap<String, AnalysisConcordance>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConcordance {
    pub difference: bool,
    #[serde(default)]
    pub more_metadata_submitted_files: Vec<String>,
    #[serde(default)]
    pub more_submitted_files_metadata: Vec<String>,
    #[serde(default)]
    pub more_per_submitted_files_metadata: BTreeMap<String, Vec<String>>,
}

pub fn parse_sample_concordance(path: &Path) -> Result<SampleConcordance> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading sample concordance report {}", path.display()))?;
    serde_yaml::from_str(&text)
        .with_context(|| format!("parsing sample concordance report {}", path.display()))
}

/// INSDC identity of every reference sequence in one FASTA file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FastaCheck {
    pub all_insdc: bool,
    #[serde(default)]
    pub sequences: Vec<SequenceCheck>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub possible_assemblies: Option<BTreeSet<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_assembly_compatible: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assembly_in_metadata: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub associated_analyses: Option<Vec<String>>,
    /// the checker reports but does not fail on upstream service errors
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceCheck {
    pub sequence_name: String,
    pub sequence_md5: String,
    pub insdc: bool,
}

pub fn parse_fasta_check(path: &Path) -> Result<FastaCheck> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading sequence identity report {}", path.display()))?;
    serde_yaml::from_str(&text)
        .with_context(|| format!("parsing sequence identity report {}", path.display()))
}

/// One metadata finding, as a JSON-pointer-ish property plus a description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataFinding {
    pub property: String,
    pub description: String,
}

fn ansi_escape() -> &'static Regex {
    static ANSI: OnceLock<Regex> = OnceLock::new();
    ANSI.get_or_init(|| Regex::new(r"\x1B(?:[@-Z\\-_]|\[[0-?]*[ -/]*[@-~])").unwrap())
}

/// Read the metadata schema validator's terminal-style report and extract
/// property/description pairs. Lines are stripped of ANSI colour codes
/// first; when several redundant messages follow one property, only the
/// first is kept.
pub fn parse_metadata_schema_report(path: &Path) -> Result<Vec<MetadataFinding>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading metadata schema report {}", path.display()))?;
    let lines: Vec<String> = text
        .lines()
        .map(|line| ansi_escape().replace_all(line, "").trim().to_string())
        .collect();

    let mut findings = Vec::new();
    let mut collecting = false;
    let mut index = 0;
    while index < lines.len() {
        let line = &lines[index];
        if line.is_empty() {
            index += 1;
            continue;
        }
        if !collecting {
            if line.starts_with("Validation failed with following error(s):") {
                collecting = true;
            }
            index += 1;
            continue;
        }
        if !line.starts_with('/') && !line.starts_with('.') {
            index += 1;
            continue;
        }
        let property = line.clone();
        let mut next = index + 1;
        while next < lines.len() && lines[next].is_empty() {
            next += 1;
        }
        if next >= lines.len() {
            break;
        }
        findings.push(MetadataFinding {
            property,
            description: lines[next].clone(),
        });
        index = next + 1;
    }
    Ok(findings)
}

pub fn parse_semantic_check(path: &Path) -> Result<Vec<MetadataFinding>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading semantic metadata report {}", path.display()))?;
    serde_yaml::from_str(&text)
        .with_context(|| format!("parsing semantic metadata report {}", path.display()))
}

/// Metrics recorded while producing the bounded shallow-mode derivative of
/// one variant file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrimDownMetrics {
    pub trim_down_vcf_record: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number_sequence_found: Option<u64>,
    /// true when the input was actually truncated, so the full file still
    /// needs a full validation before submission
    pub trim_down_required: bool,
}

pub fn parse_trim_metrics(path: &Path) -> Result<TrimDownMetrics> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading truncation metrics {}", path.display()))?;
    serde_yaml::from_str(&text)
        .with_context(|| format!("parsing truncation metrics {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn write(dir: &tempfile::TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn vcf_check_report_splits_critical_and_tolerated_findings() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            "report.txt",
            "According to the VCF specification, the input file is not valid\n\
             Duplicated variant chr1:100:A>G found.\n\
             Sample #10, field PL does not match the meta specification Number=G (expected 2 value(s)). PL=..\n\
             line 3 warning: AF is deprecated\n",
        );
        let report = parse_vcf_check_report(&path).unwrap();
        assert!(!report.valid);
        assert_eq!(report.critical_count, 1);
        assert_eq!(report.error_count, 1);
        assert_eq!(report.warning_count, 1);
        assert_eq!(
            report.critical_list,
            vec!["Duplicated variant chr1:100:A>G found.".to_string()]
        );
    }

    #[test]
    fn assembly_log_extracts_errors_and_match_summary() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            "assembly.log",
            "[info] Starting check\n\
             [error] Contig chrZ not found\n\
             [info] Number of matches: 95/100\n",
        );
        let log = parse_assembly_check_log(&path).unwrap();
        assert_eq!(log.error_count, 1);
        assert_eq!(log.error_list, vec!["Contig chrZ not found".to_string()]);
        assert_eq!(log.match_count, Some(95));
        assert_eq!(log.total_count, Some(100));
    }

    #[test]
    fn assembly_report_deduplicates_missing_contigs() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            "assembly.txt",
            "Line 10: Chromosome chrUn is not present in FASTA file\n\
             Line 11: Chromosome chrUn is not present in FASTA file\n\
             chr1 100 A does not match the reference sequence\n\
             Multiple synonyms found for contig 1\n",
        );
        let report = parse_assembly_check_report(&path).unwrap();
        assert_eq!(report.mismatch_count, 1);
        assert_eq!(report.error_count, 2);
        assert!(report
            .error_list
            .contains(&"Chromosome chrUn is not present in FASTA file".to_string()));
    }

    #[test]
    fn error_lists_cap_at_ten_but_counting_continues() {
        let dir = tempfile::tempdir().unwrap();
        let lines: String = (0..15)
            .map(|i| format!("[error] problem number {i}\n"))
            .collect();
        let path = write(&dir, "assembly.log", &lines);
        let log = parse_assembly_check_log(&path).unwrap();
        assert_eq!(log.error_count, 15);
        assert_eq!(log.error_list.len(), MAX_REPORTED_FINDINGS);
    }

    #[test]
    fn sample_concordance_yaml_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            "sample_checker.yml",
            "overall_differences: true\n\
             results_per_analysis:\n\
             \x20 A1:\n\
             \x20   difference: true\n\
             \x20   more_metadata_submitted_files: [S5]\n\
             \x20   more_submitted_files_metadata: []\n\
             \x20   more_per_submitted_files_metadata: {}\n",
        );
        let concordance = parse_sample_concordance(&path).unwrap();
        assert!(concordance.overall_differences);
        let analysis = &concordance.results_per_analysis["A1"];
        assert!(analysis.difference);
        assert_eq!(analysis.more_metadata_submitted_files, vec!["S5"]);
    }

    #[test]
    fn fasta_check_yaml_reads_optional_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            "ref_check.yml",
            "all_insdc: true\n\
             sequences:\n\
             - {sequence_name: chr1, sequence_md5: abc123, insdc: true}\n\
             possible_assemblies: [GCA_000001405.15]\n\
             metadata_assembly_compatible: true\n\
             assembly_in_metadata: GCA_000001405.15\n",
        );
        let check = parse_fasta_check(&path).unwrap();
        assert!(check.all_insdc);
        assert_eq!(check.metadata_assembly_compatible, Some(true));
        assert_eq!(check.sequences.len(), 1);
        assert!(check.connection_error.is_none());
    }

    #[test]
    fn schema_report_extracts_property_description_pairs() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            "metadata_validation.txt",
            "Using metadata schema v1\n\
             \u{1b}[31mValidation failed with following error(s):\u{1b}[0m\n\
             \n\
             /analysis/0/referenceFasta\n\
             must have required property 'referenceFasta'\n\
             /sample/2.bioSampleAccession\n\
             \u{1b}[33mmust match format \"biosample accession\"\u{1b}[0m\n",
        );
        let findings = parse_metadata_schema_report(&path).unwrap();
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].property, "/analysis/0/referenceFasta");
        assert_eq!(
            findings[0].description,
            "must have required property 'referenceFasta'"
        );
        assert_eq!(
            findings[1].description,
            "must match format \"biosample accession\""
        );
    }

    #[test]
    fn schema_report_without_failure_marker_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "metadata_validation.txt", "Validation passed\n");
        assert!(parse_metadata_schema_report(&path).unwrap().is_empty());
    }

    #[test]
    fn trim_metrics_yaml_parses() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            "trim.yml",
            "trim_down_vcf_record: 10000\ntrim_down_required: true\n",
        );
        let metrics = parse_trim_metrics(&path).unwrap();
        assert_eq!(metrics.trim_down_vcf_record, 10000);
        assert!(metrics.trim_down_required);
        assert!(metrics.number_sequence_found.is_none());
    }
}
