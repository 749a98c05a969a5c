//! Build the aggregated validation report from one run's output directory.
//!
//! Every pipeline stage declares the exact file names it produces; a
//! declared file that is missing or unreadable turns into a synthetic
//! "Process failed" critical finding for that category and input. The
//! aggregator itself never fails and never omits a category.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::warn;
use serde_json::json;

use crate::results::parsers;
use crate::results::spreadsheet::{self, SpreadsheetConf};
use crate::results::{compute_ready, CheckCategory, CheckResult, ValidationReport,
                     READINESS_POLICY_VERSION};

pub const SPREADSHEET_REPORT_NAME: &str = "metadata_spreadsheet_validation.txt";

pub struct Aggregator {
    output_dir: PathBuf,
    vcf_names: Vec<String>,
    fasta_names: Vec<String>,
    metadata_from_spreadsheet: bool,
    shallow_requested: bool,
}

impl Aggregator {
    pub fn new(output_dir: &Path, vcf_names: Vec<String>, fasta_names: Vec<String>) -> Aggregator {
        Aggregator {
            output_dir: output_dir.to_path_buf(),
            vcf_names,
            fasta_names,
            metadata_from_spreadsheet: false,
            shallow_requested: false,
        }
    }

    /// Enable the spreadsheet-coordinate view of metadata findings.
    pub fn with_spreadsheet_view(mut self, enabled: bool) -> Aggregator {
        self.metadata_from_spreadsheet = enabled;
        self
    }

    pub fn with_shallow(mut self, requested: bool) -> Aggregator {
        self.shallow_requested = requested;
        self
    }

    pub fn collect(&self) -> ValidationReport {
        let mut results = BTreeMap::new();
        results.insert(
            CheckCategory::VcfCheck.key().to_string(),
            self.collect_vcf_check(),
        );
        results.insert(
            CheckCategory::AssemblyCheck.key().to_string(),
            self.collect_assembly_check(),
        );
        results.insert(
            CheckCategory::SampleCheck.key().to_string(),
            self.collect_sample_check(),
        );
        results.insert(
            CheckCategory::FastaCheck.key().to_string(),
            self.collect_fasta_check(),
        );
        results.insert(
            CheckCategory::MetadataCheck.key().to_string(),
            self.collect_metadata_check(),
        );
        results.insert(
            CheckCategory::SemanticCheck.key().to_string(),
            self.collect_semantic_check(),
        );
        results.insert(
            CheckCategory::TrimDown.key().to_string(),
            self.collect_trim_down(),
        );
        let ready = compute_ready(&results, self.shallow_requested);
        ValidationReport {
            policy_version: READINESS_POLICY_VERSION.to_string(),
            results,
            ready,
        }
    }

    fn declared(&self, relative: &str) -> Option<PathBuf> {
        let path = self.output_dir.join(relative);
        path.is_file().then_some(path)
    }

    fn collect_vcf_check(&self) -> BTreeMap<String, CheckResult> {
        let mut per_input = BTreeMap::new();
        for name in &self.vcf_names {
            let log_file = self.declared(&format!("vcf_format/{name}.vcf_format.log"));
            let text_report = self.declared(&format!("vcf_format/{name}.errors.txt"));
            let result = match (log_file, text_report) {
                (Some(_), Some(text_report)) => {
                    match parsers::parse_vcf_check_report(&text_report) {
                        Ok(parsed) => CheckResult {
                            report_path: Some(text_report.display().to_string()),
                            critical_count: parsed.critical_count,
                            error_count: parsed.error_count,
                            warning_count: parsed.warning_count,
                            critical_list: parsed.critical_list,
                            error_list: parsed.error_list,
                            details: json!({ "valid": parsed.valid }),
                        },
                        Err(err) => {
                            warn!("Could not parse syntax report for {name}: {err:#}");
                            CheckResult::process_failed()
                        }
                    }
                }
                _ => CheckResult::process_failed(),
            };
            per_input.insert(name.clone(), result);
        }
        per_input
    }

    fn collect_assembly_check(&self) -> BTreeMap<String, CheckResult> {
        let mut per_input = BTreeMap::new();
        for name in &self.vcf_names {
            let log_file = self.declared(&format!("assembly_check/{name}.assembly_check.log"));
            let text_report =
                self.declared(&format!("assembly_check/{name}.text_assembly_report.txt"));
            let result = match (log_file, text_report) {
                (Some(log_file), Some(text_report)) => {
                    let parsed = parsers::parse_assembly_check_log(&log_file).and_then(|log| {
                        parsers::parse_assembly_check_report(&text_report)
                            .map(|report| (log, report))
                    });
                    match parsed {
                        Ok((log, report)) => {
                            let mut result = CheckResult {
                                report_path: Some(text_report.display().to_string()),
                                details: json!({
                                    "match": log.match_count,
                                    "total": log.total_count,
                                    "nb_mismatch": report.mismatch_count,
                                }),
                                ..CheckResult::default()
                            };
                            // every assembly finding invalidates positions
                            // against the reference, so all are critical
                            for finding in log.error_list {
                                result.push_critical(finding);
                            }
                            result.critical_count =
                                log.error_count + report.mismatch_count + report.error_count;
                            for finding in report.mismatch_list {
                                if result.critical_list.len()
                                    < crate::results::MAX_REPORTED_FINDINGS
                                {
                                    result.critical_list.push(finding);
                                }
                            }
                            for finding in report.error_list {
                                if result.critical_list.len()
                                    < crate::results::MAX_REPORTED_FINDINGS
                                {
                                    result.critical_list.push(finding);
                                }
                            }
                            result
                        }
                        Err(err) => {
                            warn!("Could not parse assembly report for {name}: {err:#}");
                            CheckResult::process_failed()
                        }
                    }
                }
                _ => CheckResult::process_failed(),
            };
            per_input.insert(name.clone(), result);
        }
        per_input
    }

    fn collect_sample_check(&self) -> BTreeMap<String, CheckResult> {
        let mut per_input = BTreeMap::new();
        let result = match self.declared("sample_checker.yml") {
            Some(path) => match parsers::parse_sample_concordance(&path) {
                Ok(concordance) => {
                    let mut result = CheckResult {
                        report_path: Some(path.display().to_string()),
                        details: serde_json::to_value(&concordance).unwrap_or_default(),
                        ..CheckResult::default()
                    };
                    for (analysis, per_analysis) in &concordance.results_per_analysis {
                        if per_analysis.difference {
                            result.push_critical(format!(
                                "Analysis {analysis}: sample names in the variant files and \
                                 the metadata differ"
                            ));
                        }
                    }
                    result
                }
                Err(err) => {
                    warn!("Could not parse sample concordance report: {err:#}");
                    CheckResult::process_failed()
                }
            },
            None => CheckResult::process_failed(),
        };
        per_input.insert("all".to_string(), result);
        per_input
    }

    fn collect_fasta_check(&self) -> BTreeMap<String, CheckResult> {
        let mut per_input = BTreeMap::new();
        for name in &self.fasta_names {
            let result = match self.declared(&format!("{name}_check.yml")) {
                Some(path) => match parsers::parse_fasta_check(&path) {
                    Ok(check) => {
                        let mut result = CheckResult {
                            report_path: Some(path.display().to_string()),
                            details: serde_json::to_value(&check).unwrap_or_default(),
                            ..CheckResult::default()
                        };
                        if let Some(error) = &check.connection_error {
                            result.push_critical(format!(
                                "Sequence identity check was interrupted: {error}"
                            ));
                        }
                        for sequence in &check.sequences {
                            if !sequence.insdc {
                                result.push_critical(format!(
                                    "Sequence {} ({}) does not resolve to an INSDC accession",
                                    sequence.sequence_name, sequence.sequence_md5
                                ));
                            }
                        }
                        if check.metadata_assembly_compatible == Some(false) {
                            let accession = check
                                .assembly_in_metadata
                                .as_deref()
                                .unwrap_or("unknown");
                            result.push_critical(format!(
                                "Assembly accession {accession} in the metadata is not \
                                 compatible with this reference file"
                            ));
                        }
                        result
                    }
                    Err(err) => {
                        warn!("Could not parse sequence identity report for {name}: {err:#}");
                        CheckResult::process_failed()
                    }
                },
                None => CheckResult::process_failed(),
            };
            per_input.insert(name.clone(), result);
        }
        per_input
    }

    fn collect_metadata_check(&self) -> BTreeMap<String, CheckResult> {
        let mut per_input = BTreeMap::new();
        let result = match self.declared("metadata_validation.txt") {
            Some(path) => match parsers::parse_metadata_schema_report(&path) {
                Ok(findings) => {
                    let mut result = CheckResult {
                        report_path: Some(path.display().to_string()),
                        ..CheckResult::default()
                    };
                    for finding in &findings {
                        result.push_critical(format!(
                            "{}: {}",
                            finding.property, finding.description
                        ));
                    }
                    if self.metadata_from_spreadsheet {
                        let converted =
                            spreadsheet::convert_findings(&findings, SpreadsheetConf::embedded());
                        self.write_spreadsheet_report(&converted);
                        result.details = json!({ "spreadsheet_errors": converted });
                    }
                    result
                }
                Err(err) => {
                    warn!("Could not parse metadata schema report: {err:#}");
                    CheckResult::process_failed()
                }
            },
            None => CheckResult::process_failed(),
        };
        per_input.insert("metadata".to_string(), result);
        per_input
    }

    fn write_spreadsheet_report(&self, findings: &[spreadsheet::SpreadsheetFinding]) {
        let path = self.output_dir.join(SPREADSHEET_REPORT_NAME);
        let content: String = findings
            .iter()
            .map(|finding| format!("{}\n", finding.description))
            .collect();
        if let Err(err) = fs::write(&path, content) {
            warn!("Could not write {}: {err}", path.display());
        }
    }

    fn collect_semantic_check(&self) -> BTreeMap<String, CheckResult> {
        let mut per_input = BTreeMap::new();
        let result = match self.declared("metadata_semantic_check.yml") {
            Some(path) => match parsers::parse_semantic_check(&path) {
                Ok(findings) => {
                    let mut result = CheckResult {
                        report_path: Some(path.display().to_string()),
                        ..CheckResult::default()
                    };
                    for finding in &findings {
                        result.push_critical(format!(
                            "{}: {}",
                            finding.property, finding.description
                        ));
                    }
                    result
                }
                Err(err) => {
                    warn!("Could not parse semantic metadata report: {err:#}");
                    CheckResult::process_failed()
                }
            },
            None => CheckResult::process_failed(),
        };
        per_input.insert("metadata".to_string(), result);
        per_input
    }

    fn collect_trim_down(&self) -> BTreeMap<String, CheckResult> {
        let mut per_input = BTreeMap::new();
        if !self.shallow_requested {
            per_input.insert(
                "all".to_string(),
                CheckResult {
                    details: json!({ "requested": false }),
                    ..CheckResult::default()
                },
            );
            return per_input;
        }
        for name in &self.vcf_names {
            let result = match self.declared(&format!("{name}_trim_down.yml")) {
                Some(path) => match parsers::parse_trim_metrics(&path) {
                    Ok(metrics) => CheckResult {
                        report_path: Some(path.display().to_string()),
                        details: serde_json::to_value(&metrics).unwrap_or_default(),
                        ..CheckResult::default()
                    },
                    Err(err) => {
                        warn!("Could not parse truncation metrics for {name}: {err:#}");
                        CheckResult::process_failed()
                    }
                },
                None => CheckResult::process_failed(),
            };
            per_input.insert(name.clone(), result);
        }
        per_input
    }
}
