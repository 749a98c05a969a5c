//! Resolve which variant files are validated against which reference.
//!
//! The metadata document links every variant file to an analysis and every
//! analysis to a reference file. The pipeline consumes that as a small CSV
//! mapping file, one row per variant file.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const MAPPING_FILE_NAME: &str = "vcf_mapping_file.csv";

/// One variant file with its reference and optional assembly report.
#[derive(Debug, Clone, PartialEq)]
pub struct VcfMapping {
    pub vcf: PathBuf,
    pub fasta: PathBuf,
    pub report: Option<PathBuf>,
}

impl VcfMapping {
    pub fn vcf_name(&self) -> String {
        file_name(&self.vcf)
    }

    pub fn fasta_name(&self) -> String {
        file_name(&self.fasta)
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Distinct variant file names, in mapping order.
pub fn vcf_names(mappings: &[VcfMapping]) -> Vec<String> {
    let mut names = Vec::new();
    for mapping in mappings {
        let name = mapping.vcf_name();
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

/// Distinct reference file names, in mapping order.
pub fn fasta_names(mappings: &[VcfMapping]) -> Vec<String> {
    let mut names = Vec::new();
    for mapping in mappings {
        let name = mapping.fasta_name();
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

/// Project title from the metadata, for log context.
pub fn project_title(metadata: &Value) -> Option<String> {
    metadata
        .get("project")?
        .get("title")?
        .as_str()
        .map(str::to_string)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalysisEntry {
    analysis_alias: String,
    reference_fasta: String,
    #[serde(default)]
    assembly_report: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileEntry {
    analysis_alias: String,
    file_name: String,
}

fn resolve(base_dir: &Path, path: &str) -> PathBuf {
    let path = Path::new(path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

/// Build the variant-to-reference mappings from the metadata document.
/// Relative paths are resolved against `base_dir`, the directory holding
/// the metadata file.
pub fn mappings_from_metadata(metadata: &Value, base_dir: &Path) -> Result<Vec<VcfMapping>> {
    let section = |name: &str| {
        metadata
            .get(name)
            .cloned()
            .unwrap_or_else(|| Value::Array(Vec::new()))
    };
    let analyses: Vec<AnalysisEntry> = serde_json::from_value(section("analysis"))
        .context("reading the analysis section of the metadata")?;
    let files: Vec<FileEntry> = serde_json::from_value(section("files"))
        .context("reading the files section of the metadata")?;

    let mut mappings = Vec::new();
    for file in &files {
        let analysis = analyses
            .iter()
            .find(|analysis| analysis.analysis_alias == file.analysis_alias)
            .ok_or_else(|| {
                anyhow!(
                    "file {} references analysis {} which the metadata does not define",
                    file.file_name,
                    file.analysis_alias
                )
            })?;
        mappings.push(VcfMapping {
            vcf: resolve(base_dir, &file.file_name),
            fasta: resolve(base_dir, &analysis.reference_fasta),
            report: analysis
                .assembly_report
                .as_deref()
                .map(|report| resolve(base_dir, report)),
        });
    }
    Ok(mappings)
}

#[derive(Debug, Serialize, Deserialize)]
struct MappingRow {
    vcf: String,
    fasta: String,
    report: String,
}

/// Write the mapping CSV the pipeline reads, header `vcf,fasta,report`.
pub fn write_mapping_file(path: &Path, mappings: &[VcfMapping]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("creating mapping file {}", path.display()))?;
    for mapping in mappings {
        writer.serialize(MappingRow {
            vcf: mapping.vcf.display().to_string(),
            fasta: mapping.fasta.display().to_string(),
            report: mapping
                .report
                .as_ref()
                .map(|report| report.display().to_string())
                .unwrap_or_default(),
        })?;
    }
    writer
        .flush()
        .with_context(|| format!("writing mapping file {}", path.display()))?;
    Ok(())
}

pub fn read_mapping_file(path: &Path) -> Result<Vec<VcfMapping>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("opening mapping file {}", path.display()))?;
    let mut mappings = Vec::new();
    for row in reader.deserialize() {
        let row: MappingRow =
            row.with_context(|| format!("reading mapping file {}", path.display()))?;
        mappings.push(VcfMapping {
            vcf: PathBuf::from(row.vcf),
            fasta: PathBuf::from(row.fasta),
            report: (!row.report.is_empty()).then(|| PathBuf::from(row.report)),
        });
    }
    Ok(mappings)
}
