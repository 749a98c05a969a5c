//! Drive one validation run end to end.
//!
//! The driver resolves the variant-to-reference mappings from the metadata,
//! refuses to start while any input file is missing, runs the checking
//! workflow through an execution backend, aggregates whatever reports came
//! back and persists the verdict. A failed workflow run is not fatal; the
//! aggregator turns every missing report into a recorded process failure.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use log::{info, warn};
use serde_json::Value;

use crate::backend::{ExecutionBackend, WorkflowParams};
use crate::config::{
    SubmissionConfig, KEY_METADATA_JSON, KEY_READY_FOR_SUBMISSION, KEY_VALIDATION_DATE,
    KEY_VALIDATION_RESULTS, KEY_VCF_FILES,
};
use crate::inputs::{self, VcfMapping, MAPPING_FILE_NAME};
use crate::results::collect::Aggregator;
use crate::results::parsers::TrimDownMetrics;
use crate::results::ValidationReport;
use crate::shallow;
use crate::workdir;

pub const OUTPUT_DIR_NAME: &str = "validation_output";

/// Rotated copies of previous validation runs to keep around.
const OUTPUT_BACKUP_RETENTION: usize = 1;

const SHALLOW_INPUT_DIR: &str = "shallow_inputs";

#[derive(Default)]
pub struct ValidationOptions {
    pub shallow: bool,
    /// metadata came from the spreadsheet template, report findings in
    /// spreadsheet coordinates as well
    pub from_spreadsheet: bool,
    pub metadata_xlsx: Option<PathBuf>,
    /// direct input list; when given it overrides the mappings derived
    /// from the metadata document
    pub vcf_files: Vec<PathBuf>,
    pub reference_fasta: Option<PathBuf>,
}

pub struct ValidationDriver<'a> {
    backend: &'a dyn ExecutionBackend,
    submission_dir: PathBuf,
    options: ValidationOptions,
}

impl<'a> ValidationDriver<'a> {
    pub fn new(
        backend: &'a dyn ExecutionBackend,
        submission_dir: &Path,
        options: ValidationOptions,
    ) -> ValidationDriver<'a> {
        ValidationDriver {
            backend,
            submission_dir: submission_dir.to_path_buf(),
            options,
        }
    }

    pub fn run(
        &self,
        config: &mut SubmissionConfig,
        metadata_json: &Path,
    ) -> Result<ValidationReport> {
        let metadata = read_metadata(metadata_json)?;
        if let Some(title) = inputs::project_title(&metadata) {
            info!("Validating dataset for project '{title}'");
        }
        let mappings = match (&self.options.reference_fasta, self.options.vcf_files.is_empty()) {
            (Some(fasta), false) => self
                .options
                .vcf_files
                .iter()
                .map(|vcf| VcfMapping {
                    vcf: vcf.clone(),
                    fasta: fasta.clone(),
                    report: None,
                })
                .collect(),
            _ => {
                let base_dir = metadata_json.parent().unwrap_or_else(|| Path::new("."));
                inputs::mappings_from_metadata(&metadata, base_dir)?
            }
        };
        check_input_files(metadata_json, &mappings, self.options.metadata_xlsx.as_deref())?;

        // the container backend mirrors host paths one to one, so every
        // path the workflow sees must be absolute
        let submission_dir = canonical(&self.submission_dir)?;
        let metadata_json = canonical(metadata_json)?;
        let metadata_xlsx = self
            .options
            .metadata_xlsx
            .as_deref()
            .map(canonical)
            .transpose()?;
        let mappings = canonical_mappings(mappings)?;

        let output_dir = submission_dir.join(OUTPUT_DIR_NAME);
        workdir::backup_rotate(&output_dir, Some(OUTPUT_BACKUP_RETENTION))?;
        fs::create_dir_all(&output_dir)
            .with_context(|| format!("creating {}", output_dir.display()))?;

        let (workflow_mappings, trim_metrics) = if self.options.shallow {
            self.prepare_shallow(&mappings, &output_dir)?
        } else {
            (mappings.clone(), BTreeMap::new())
        };

        let mapping_file = submission_dir.join(MAPPING_FILE_NAME);
        inputs::write_mapping_file(&mapping_file, &workflow_mappings)?;

        let params = WorkflowParams {
            mapping_file: mapping_file.clone(),
            metadata_json: Some(metadata_json.clone()),
            metadata_xlsx: metadata_xlsx.clone(),
            output_dir: output_dir.clone(),
            shallow: self.options.shallow,
        };

        self.backend.ensure_ready()?;
        self.stage_inputs(
            &mapping_file,
            &metadata_json,
            metadata_xlsx.as_deref(),
            &workflow_mappings,
        )?;
        if let Err(error) = self.backend.run_workflow(&params) {
            warn!("Validation workflow did not finish cleanly: {error}");
        }
        if let Err(error) = self.backend.retrieve_output(&params) {
            warn!("Could not retrieve validation output: {error}");
        }
        for (vcf_name, metrics) in &trim_metrics {
            let path = output_dir.join(format!("{vcf_name}_trim_down.yml"));
            shallow::write_metrics(&path, metrics)?;
        }

        let report = Aggregator::new(
            &output_dir,
            inputs::vcf_names(&mappings),
            inputs::fasta_names(&mappings),
        )
        .with_spreadsheet_view(self.options.from_spreadsheet)
        .with_shallow(self.options.shallow)
        .collect();

        info!(
            "Validation finished, ready for submission: {}",
            report.ready
        );
        config.set(KEY_METADATA_JSON, metadata_json.display().to_string());
        config.set(
            KEY_VCF_FILES,
            mappings
                .iter()
                .map(|mapping| mapping.vcf.display().to_string())
                .collect::<Vec<_>>(),
        );
        config.set(KEY_VALIDATION_RESULTS, &report);
        config.set(KEY_VALIDATION_DATE, Utc::now().to_rfc3339());
        config.set(KEY_READY_FOR_SUBMISSION, report.ready);
        config.backup()?;
        config.write()?;
        Ok(report)
    }

    /// Build the truncated derivatives and the mapping rows pointing at
    /// them. The originals stay untouched; only the workflow sees the
    /// derivatives.
    fn prepare_shallow(
        &self,
        mappings: &[VcfMapping],
        output_dir: &Path,
    ) -> Result<(Vec<VcfMapping>, BTreeMap<String, TrimDownMetrics>)> {
        let shallow_dir = output_dir.join(SHALLOW_INPUT_DIR);
        fs::create_dir_all(&shallow_dir)
            .with_context(|| format!("creating {}", shallow_dir.display()))?;
        let mut workflow_mappings = Vec::new();
        let mut trim_metrics = BTreeMap::new();
        for mapping in mappings {
            let derived = shallow::shallow_inputs(&mapping.vcf, &mapping.fasta, &shallow_dir)?;
            trim_metrics.insert(mapping.vcf_name(), derived.metrics);
            workflow_mappings.push(VcfMapping {
                vcf: derived.vcf,
                fasta: derived.fasta,
                report: mapping.report.clone(),
            });
        }
        Ok((workflow_mappings, trim_metrics))
    }

    fn stage_inputs(
        &self,
        mapping_file: &Path,
        metadata_json: &Path,
        metadata_xlsx: Option<&Path>,
        mappings: &[VcfMapping],
    ) -> Result<()> {
        self.backend.stage_input(mapping_file)?;
        self.backend.stage_input(metadata_json)?;
        if let Some(xlsx) = metadata_xlsx {
            self.backend.stage_input(xlsx)?;
        }
        for mapping in mappings {
            self.backend.stage_input(&mapping.vcf)?;
            self.backend.stage_input(&mapping.fasta)?;
            if let Some(report) = &mapping.report {
                self.backend.stage_input(report)?;
            }
        }
        Ok(())
    }
}

/// The report persisted by the last validation run, if any. Exposed
/// unmodified for rendering.
pub fn persisted_report(config: &SubmissionConfig) -> Option<ValidationReport> {
    config.get(KEY_VALIDATION_RESULTS)
}

fn canonical(path: &Path) -> Result<PathBuf> {
    fs::canonicalize(path).with_context(|| format!("resolving {}", path.display()))
}

fn canonical_mappings(mappings: Vec<VcfMapping>) -> Result<Vec<VcfMapping>> {
    mappings
        .into_iter()
        .map(|mapping| {
            Ok(VcfMapping {
                vcf: canonical(&mapping.vcf)?,
                fasta: canonical(&mapping.fasta)?,
                report: mapping.report.as_deref().map(canonical).transpose()?,
            })
        })
        .collect()
}

fn read_metadata(path: &Path) -> Result<Value> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading metadata {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing metadata {}", path.display()))
}

/// Refuse to start while any referenced input file is missing, listing all
/// of them at once.
fn check_input_files(
    metadata_json: &Path,
    mappings: &[VcfMapping],
    metadata_xlsx: Option<&Path>,
) -> Result<()> {
    let mut missing: Vec<String> = Vec::new();
    let mut check = |path: &Path| {
        if !path.is_file() {
            let name = path.display().to_string();
            if !missing.contains(&name) {
                missing.push(name);
            }
        }
    };
    check(metadata_json);
    if let Some(xlsx) = metadata_xlsx {
        check(xlsx);
    }
    for mapping in mappings {
        check(&mapping.vcf);
        check(&mapping.fasta);
        if let Some(report) = &mapping.report {
            check(report);
        }
    }
    if !missing.is_empty() {
        bail!("input files are missing: {}", missing.join(", "));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendError;
    use crate::config::CONFIG_FILE_NAME;
    use serde_json::json;
    use std::cell::RefCell;

    /// Backend that fabricates a passing output directory instead of
    /// running anything.
    struct FakeBackend {
        staged: RefCell<Vec<PathBuf>>,
        fail_workflow: bool,
    }

    impl FakeBackend {
        fn new() -> FakeBackend {
            FakeBackend {
                staged: RefCell::new(Vec::new()),
                fail_workflow: false,
            }
        }

        fn write(dir: &Path, relative: &str, content: &str) {
            let path = dir.join(relative);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }
    }

    impl ExecutionBackend for FakeBackend {
        fn ensure_ready(&self) -> Result<(), BackendError> {
            Ok(())
        }

        fn stage_input(&self, path: &Path) -> Result<(), BackendError> {
            self.staged.borrow_mut().push(path.to_path_buf());
            Ok(())
        }

        fn run_workflow(&self, params: &WorkflowParams) -> Result<(), BackendError> {
            if self.fail_workflow {
                return Err(BackendError::Command(
                    crate::backend::command::CommandError::Failed {
                        description: "run workflow".to_string(),
                        code: Some(1),
                        output: String::new(),
                    },
                ));
            }
            let dir = &params.output_dir;
            Self::write(dir, "vcf_format/input.vcf.vcf_format.log", "[info] done\n");
            Self::write(
                dir,
                "vcf_format/input.vcf.errors.txt",
                "According to the VCF specification, the input file is valid\n",
            );
            Self::write(
                dir,
                "assembly_check/input.vcf.assembly_check.log",
                "[info] Number of matches: 3/3\n",
            );
            Self::write(dir, "assembly_check/input.vcf.text_assembly_report.txt", "");
            Self::write(
                dir,
                "sample_checker.yml",
                "overall_differences: false\nresults_per_analysis: {}\n",
            );
            Self::write(
                dir,
                "ref.fa_check.yml",
                "all_insdc: true\nsequences: []\n",
            );
            Self::write(dir, "metadata_validation.txt", "Validation passed\n");
            Self::write(dir, "metadata_semantic_check.yml", "[]\n");
            Ok(())
        }

        fn retrieve_output(&self, _params: &WorkflowParams) -> Result<(), BackendError> {
            Ok(())
        }
    }

    fn submission_dir() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = fs::canonicalize(dir.path()).unwrap();
        fs::write(
            path.join("input.vcf"),
            "##fileformat=VCFv4.3\n#CHROM\tPOS\tID\tREF\tALT\nchr1\t1\t.\tA\tG\n",
        )
        .unwrap();
        fs::write(path.join("ref.fa"), ">chr1\nACGT\n").unwrap();
        let metadata = json!({
            "project": {"title": "Example"},
            "analysis": [{"analysisAlias": "A1", "referenceFasta": "ref.fa"}],
            "files": [{"analysisAlias": "A1", "fileName": "input.vcf"}]
        });
        fs::write(
            path.join("metadata.json"),
            serde_json::to_string_pretty(&metadata).unwrap(),
        )
        .unwrap();
        (dir, path)
    }

    #[test]
    fn a_clean_run_persists_a_ready_verdict() {
        let (_guard, dir) = submission_dir();
        let backend = FakeBackend::new();
        let mut config =
            SubmissionConfig::load(&dir.join(CONFIG_FILE_NAME), "0.1.0").unwrap();
        let driver = ValidationDriver::new(&backend, &dir, ValidationOptions::default());

        let report = driver.run(&mut config, &dir.join("metadata.json")).unwrap();
        assert!(report.ready);

        let reloaded = SubmissionConfig::load(&dir.join(CONFIG_FILE_NAME), "0.1.0").unwrap();
        assert!(reloaded.get_or(KEY_READY_FOR_SUBMISSION, false));
        assert!(reloaded.contains(KEY_VALIDATION_DATE));
        let stored: ValidationReport = reloaded.get(KEY_VALIDATION_RESULTS).unwrap();
        assert_eq!(stored, report);
        let vcf_files: Vec<String> = reloaded.get(KEY_VCF_FILES).unwrap();
        assert_eq!(vcf_files, vec![dir.join("input.vcf").display().to_string()]);
    }

    #[test]
    fn missing_inputs_are_reported_together() {
        let (_guard, dir) = submission_dir();
        fs::remove_file(dir.join("input.vcf")).unwrap();
        fs::remove_file(dir.join("ref.fa")).unwrap();
        let backend = FakeBackend::new();
        let mut config =
            SubmissionConfig::load(&dir.join(CONFIG_FILE_NAME), "0.1.0").unwrap();
        let driver = ValidationDriver::new(&backend, &dir, ValidationOptions::default());

        let error = driver
            .run(&mut config, &dir.join("metadata.json"))
            .unwrap_err();
        let message = error.to_string();
        assert!(message.contains("input.vcf"));
        assert!(message.contains("ref.fa"));
        // nothing was staged or run
        assert!(backend.staged.borrow().is_empty());
    }

    #[test]
    fn a_failed_workflow_still_produces_a_persisted_verdict() {
        let (_guard, dir) = submission_dir();
        let mut backend = FakeBackend::new();
        backend.fail_workflow = true;
        let mut config =
            SubmissionConfig::load(&dir.join(CONFIG_FILE_NAME), "0.1.0").unwrap();
        let driver = ValidationDriver::new(&backend, &dir, ValidationOptions::default());

        let report = driver.run(&mut config, &dir.join("metadata.json")).unwrap();
        assert!(!report.ready);
        let reloaded = SubmissionConfig::load(&dir.join(CONFIG_FILE_NAME), "0.1.0").unwrap();
        assert!(!reloaded.get_or(KEY_READY_FOR_SUBMISSION, true));
    }

    #[test]
    fn previous_output_is_rotated_not_overwritten() {
        let (_guard, dir) = submission_dir();
        let output_dir = dir.join(OUTPUT_DIR_NAME);
        fs::create_dir_all(&output_dir).unwrap();
        fs::write(output_dir.join("marker.txt"), "previous run").unwrap();

        let backend = FakeBackend::new();
        let mut config =
            SubmissionConfig::load(&dir.join(CONFIG_FILE_NAME), "0.1.0").unwrap();
        ValidationDriver::new(&backend, &dir, ValidationOptions::default())
            .run(&mut config, &dir.join("metadata.json"))
            .unwrap();

        let rotated = dir.join(format!("{OUTPUT_DIR_NAME}.1"));
        assert_eq!(
            fs::read_to_string(rotated.join("marker.txt")).unwrap(),
            "previous run"
        );
        assert!(!output_dir.join("marker.txt").exists());
    }

    #[test]
    fn staged_and_mapped_paths_are_canonical() {
        let (_guard, dir) = submission_dir();
        // "." components stand in for a relative invocation
        let dotted = dir.join(".");
        let backend = FakeBackend::new();
        let mut config =
            SubmissionConfig::load(&dir.join(CONFIG_FILE_NAME), "0.1.0").unwrap();
        ValidationDriver::new(&backend, &dotted, ValidationOptions::default())
            .run(&mut config, &dotted.join("metadata.json"))
            .unwrap();

        for staged in backend.staged.borrow().iter() {
            assert!(staged.is_absolute(), "{} is not absolute", staged.display());
            assert!(
                !staged.display().to_string().contains("/./"),
                "{} is not canonical",
                staged.display()
            );
        }
        let mapping = inputs::read_mapping_file(&dir.join(MAPPING_FILE_NAME)).unwrap();
        assert_eq!(mapping[0].vcf, dir.join("input.vcf"));
        assert_eq!(mapping[0].fasta, dir.join("ref.fa"));

        let vcf_files: Vec<String> = config.get(KEY_VCF_FILES).unwrap();
        assert_eq!(vcf_files, vec![dir.join("input.vcf").display().to_string()]);
    }

    #[test]
    fn a_direct_input_list_overrides_the_metadata_mappings() {
        let (_guard, dir) = submission_dir();
        let backend = FakeBackend::new();
        let mut config =
            SubmissionConfig::load(&dir.join(CONFIG_FILE_NAME), "0.1.0").unwrap();
        let options = ValidationOptions {
            vcf_files: vec![dir.join("input.vcf")],
            reference_fasta: Some(dir.join("ref.fa")),
            ..ValidationOptions::default()
        };
        let report = ValidationDriver::new(&backend, &dir, options)
            .run(&mut config, &dir.join("metadata.json"))
            .unwrap();
        assert!(report.ready);
        assert_eq!(persisted_report(&config), Some(report));

        let mapping = inputs::read_mapping_file(&dir.join(MAPPING_FILE_NAME)).unwrap();
        assert_eq!(mapping.len(), 1);
        assert_eq!(mapping[0].fasta, dir.join("ref.fa"));
        assert_eq!(mapping[0].report, None);
    }

    #[test]
    fn shallow_mode_validates_derivatives_but_records_originals() {
        let (_guard, dir) = submission_dir();
        let backend = FakeBackend::new();
        let mut config =
            SubmissionConfig::load(&dir.join(CONFIG_FILE_NAME), "0.1.0").unwrap();
        let options = ValidationOptions {
            shallow: true,
            ..ValidationOptions::default()
        };
        ValidationDriver::new(&backend, &dir, options)
            .run(&mut config, &dir.join("metadata.json"))
            .unwrap();

        let mapping = inputs::read_mapping_file(&dir.join(MAPPING_FILE_NAME)).unwrap();
        let shallow_dir = dir.join(OUTPUT_DIR_NAME).join(SHALLOW_INPUT_DIR);
        assert_eq!(mapping[0].vcf, shallow_dir.join("input.vcf"));

        let vcf_files: Vec<String> = config.get(KEY_VCF_FILES).unwrap();
        assert_eq!(vcf_files, vec![dir.join("input.vcf").display().to_string()]);
        assert!(dir
            .join(OUTPUT_DIR_NAME)
            .join("input.vcf_trim_down.yml")
            .is_file());
    }
}
