//! Aggregated validation report: data model, per-tool parsers, severity
//! classification and the readiness policy.
//!
//! Each checking tool has its own textual contract; the parsers in
//! [`parsers`] are versioned against those contracts and everything else
//! only sees the normalized [`CheckResult`] shape.

/// Walk a validation output directory and build the aggregated report
pub mod collect;
/// One parser per external tool report format
pub mod parsers;
/// Critical / non-critical classification of syntax-check findings
pub mod severity;
/// Map metadata findings back to spreadsheet coordinates
pub mod spreadsheet;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Example findings kept per category; full detail stays in the raw report
/// the result points at.
pub const MAX_REPORTED_FINDINGS: usize = 10;

/// The enumerated list of blocking conditions is a versioned policy: a new
/// check category only gates submission once it is added here.
pub const READINESS_POLICY_VERSION: &str = "1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CheckCategory {
    /// Syntax check of each variant file
    VcfCheck,
    /// Variant positions compared against the reference sequence
    AssemblyCheck,
    /// Sample names concordance between variant files and metadata
    SampleCheck,
    /// Reference sequences resolved against INSDC accessions
    FastaCheck,
    /// Metadata document checked against the schema
    MetadataCheck,
    /// Semantic checks on the metadata content
    SemanticCheck,
    /// Metrics of the shallow-mode truncation
    TrimDown,
}

impl CheckCategory {
    pub const ALL: [CheckCategory; 7] = [
        CheckCategory::VcfCheck,
        CheckCategory::AssemblyCheck,
        CheckCategory::SampleCheck,
        CheckCategory::FastaCheck,
        CheckCategory::MetadataCheck,
        CheckCategory::SemanticCheck,
        CheckCategory::TrimDown,
    ];

    pub fn key(self) -> &'static str {
        match self {
            CheckCategory::VcfCheck => "vcf_check",
            CheckCategory::AssemblyCheck => "assembly_check",
            CheckCategory::SampleCheck => "sample_check",
            CheckCategory::FastaCheck => "fasta_check",
            CheckCategory::MetadataCheck => "metadata_check",
            CheckCategory::SemanticCheck => "semantic_check",
            CheckCategory::TrimDown => "trim_down",
        }
    }

    /// Categories whose critical findings block submission. Deliberately
    /// not derived from `ALL`: truncation metrics inform the shallow-mode
    /// rule instead of counting findings.
    pub fn blocking() -> [CheckCategory; 6] {
        [
            CheckCategory::VcfCheck,
            CheckCategory::AssemblyCheck,
            CheckCategory::SampleCheck,
            CheckCategory::FastaCheck,
            CheckCategory::MetadataCheck,
            CheckCategory::SemanticCheck,
        ]
    }
}

/// Normalized result of one check for one input (or for the whole run where
/// the check is global). Counts are complete; the lists are capped at
/// [`MAX_REPORTED_FINDINGS`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_path: Option<String>,
    pub critical_count: u64,
    pub error_count: u64,
    pub warning_count: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub critical_list: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub error_list: Vec<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub details: Value,
}

impl CheckResult {
    /// Stand-in for a check whose output files are missing or unreadable.
    /// The category still appears in the report, with one critical finding.
    pub fn process_failed() -> CheckResult {
        CheckResult {
            critical_count: 1,
            critical_list: vec!["Process failed".to_string()],
            ..CheckResult::default()
        }
    }

    pub fn push_critical(&mut self, finding: String) {
        self.critical_count += 1;
        if self.critical_list.len() < MAX_REPORTED_FINDINGS {
            self.critical_list.push(finding);
        }
    }

    pub fn push_error(&mut self, finding: String) {
        self.error_count += 1;
        if self.error_list.len() < MAX_REPORTED_FINDINGS {
            self.error_list.push(finding);
        }
    }
}

/// The whole aggregated report. `BTreeMap`s keep the serialized form
/// deterministic, so re-running the aggregator on the same output directory
/// reproduces it byte for byte.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub policy_version: String,
    /// category key -> input name (or "metadata"/"all" for global checks)
    pub results: BTreeMap<String, BTreeMap<String, CheckResult>>,
    pub ready: bool,
}

impl ValidationReport {
    pub fn category(&self, category: CheckCategory) -> Option<&BTreeMap<String, CheckResult>> {
        self.results.get(category.key())
    }
}

/// Readiness verdict: no critical finding in any blocking category, and the
/// shallow run (if one was requested) did not truncate any input, meaning a
/// full validation is still owed.
pub fn compute_ready(
    results: &BTreeMap<String, BTreeMap<String, CheckResult>>,
    shallow_requested: bool,
) -> bool {
    for category in CheckCategory::blocking() {
        if let Some(per_input) = results.get(category.key()) {
            if per_input.values().any(|result| result.critical_count > 0) {
                return false;
            }
        } else {
            // a blocking category the aggregator never saw cannot pass
            return false;
        }
    }
    if shallow_requested {
        if let Some(per_input) = results.get(CheckCategory::TrimDown.key()) {
            let truncated = per_input.values().any(|result| {
                result.critical_count > 0
                    || result
                        .details
                        .get("trim_down_required")
                        .and_then(Value::as_bool)
                        .unwrap_or(true)
            });
            if truncated {
                return false;
            }
        } else {
            return false;
        }
    }
    true
}
