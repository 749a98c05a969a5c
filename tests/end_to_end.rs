//! End-to-end run against a stubbed workflow backend and submission
//! service: validate a three-file dataset, submit it, then break the
//! sample concordance and check the verdict flips and submission refuses
//! before any network call.

use std::cell::Cell;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{json, Value};

use varsub::backend::{BackendError, ExecutionBackend, WorkflowParams};
use varsub::config::{SubmissionConfig, CONFIG_FILE_NAME, KEY_SUBMISSION_COMPLETE};
use varsub::remote::{InitiateResponse, RemoteError, SubmissionApi, SubmissionStatus};
use varsub::submit::{SubmissionDriver, SubmitError};
use varsub::validate::{ValidationDriver, ValidationOptions};

const VCFS: [&str; 3] = ["one.vcf", "two.vcf", "three.vcf"];

/// Writes the reports a fully passing workflow run would leave behind.
/// `concordant` controls the sample check outcome.
struct StubBackend {
    concordant: bool,
}

impl StubBackend {
    fn write(dir: &Path, relative: &str, content: &str) {
        let path = dir.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }
}

impl ExecutionBackend for StubBackend {
    fn ensure_ready(&self) -> Result<(), BackendError> {
        Ok(())
    }

    fn stage_input(&self, _path: &Path) -> Result<(), BackendError> {
        Ok(())
    }

    fn run_workflow(&self, params: &WorkflowParams) -> Result<(), BackendError> {
        let dir = &params.output_dir;
        for vcf in VCFS {
            Self::write(dir, &format!("vcf_format/{vcf}.vcf_format.log"), "[info] ok\n");
            Self::write(
                dir,
                &format!("vcf_format/{vcf}.errors.txt"),
                "According to the VCF specification, the input file is valid\n",
            );
            Self::write(
                dir,
                &format!("assembly_check/{vcf}.assembly_check.log"),
                "[info] Number of matches: 10/10\n",
            );
            Self::write(
                dir,
                &format!("assembly_check/{vcf}.text_assembly_report.txt"),
                "",
            );
        }
        let sample_report = if self.concordant {
            "overall_differences: false\n\
             results_per_analysis:\n\
             \x20 A1:\n\
             \x20   difference: false\n"
        } else {
            "overall_differences: true\n\
             results_per_analysis:\n\
             \x20 A1:\n\
             \x20   difference: true\n\
             \x20   more_metadata_submitted_files: [renamed_sample]\n"
        };
        Self::write(dir, "sample_checker.yml", sample_report);
        Self::write(
            dir,
            "ref.fa_check.yml",
            "all_insdc: true\n\
             sequences:\n\
             - {sequence_name: chr1, sequence_md5: d2b3f22c, insdc: true}\n\
             metadata_assembly_compatible: true\n\
             assembly_in_metadata: GCA_000001405.15\n",
        );
        Self::write(dir, "metadata_validation.txt", "Validation passed\n");
        Self::write(dir, "metadata_semantic_check.yml", "[]\n");
        Ok(())
    }

    fn retrieve_output(&self, _params: &WorkflowParams) -> Result<(), BackendError> {
        Ok(())
    }
}

struct CountingApi {
    initiate_calls: Cell<u32>,
    upload_calls: Cell<u32>,
    mark_calls: Cell<u32>,
}

impl CountingApi {
    fn new() -> CountingApi {
        CountingApi {
            initiate_calls: Cell::new(0),
            upload_calls: Cell::new(0),
            mark_calls: Cell::new(0),
        }
    }
}

impl SubmissionApi for CountingApi {
    fn initiate(&self) -> Result<InitiateResponse, RemoteError> {
        self.initiate_calls.set(self.initiate_calls.get() + 1);
        Ok(InitiateResponse {
            submission_id: "sub-e2e".to_string(),
            upload_url: "https://upload.example/sub-e2e".to_string(),
        })
    }

    fn upload_file(&self, _upload_url: &str, _path: &Path) -> Result<(), RemoteError> {
        self.upload_calls.set(self.upload_calls.get() + 1);
        Ok(())
    }

    fn mark_uploaded(&self, _id: &str, _metadata: &Value) -> Result<(), RemoteError> {
        self.mark_calls.set(self.mark_calls.get() + 1);
        Ok(())
    }

    fn status(&self, _id: &str) -> Result<SubmissionStatus, RemoteError> {
        Ok(SubmissionStatus::Open)
    }
}

fn dataset(dir: &Path) -> PathBuf {
    for vcf in VCFS {
        fs::write(
            dir.join(vcf),
            "##fileformat=VCFv4.3\n#CHROM\tPOS\tID\tREF\tALT\nchr1\t10\t.\tA\tG\n",
        )
        .unwrap();
    }
    fs::write(dir.join("ref.fa"), ">chr1\nACGTACGT\n").unwrap();
    fs::write(dir.join("report.txt"), "chr1\tassembled-molecule\n").unwrap();
    let files: Vec<Value> = VCFS
        .iter()
        .map(|vcf| json!({"analysisAlias": "A1", "fileName": vcf}))
        .collect();
    let metadata = json!({
        "project": {"title": "Three files, one reference"},
        "analysis": [{
            "analysisAlias": "A1",
            "referenceFasta": "ref.fa",
            "assemblyReport": "report.txt"
        }],
        "files": files
    });
    let path = dir.join("metadata.json");
    fs::write(&path, serde_json::to_string_pretty(&metadata).unwrap()).unwrap();
    path
}

#[test]
fn passing_dataset_validates_and_submits() {
    let dir = tempfile::tempdir().unwrap();
    let metadata = dataset(dir.path());
    let mut config =
        SubmissionConfig::load(&dir.path().join(CONFIG_FILE_NAME), "0.1.0").unwrap();

    let backend = StubBackend { concordant: true };
    let report = ValidationDriver::new(&backend, dir.path(), ValidationOptions::default())
        .run(&mut config, &metadata)
        .unwrap();
    assert!(report.ready);

    let api = CountingApi::new();
    SubmissionDriver::new(&api).run(&mut config).unwrap();
    assert_eq!(api.initiate_calls.get(), 1);
    // one upload per variant file; the metadata travels with the
    // uploaded notification instead
    assert_eq!(api.upload_calls.get(), 3);
    assert_eq!(api.mark_calls.get(), 1);
    assert!(config.get_or(KEY_SUBMISSION_COMPLETE, false));
}

#[test]
fn sample_mismatch_blocks_submission_before_any_network_call() {
    let dir = tempfile::tempdir().unwrap();
    let metadata = dataset(dir.path());
    let mut config =
        SubmissionConfig::load(&dir.path().join(CONFIG_FILE_NAME), "0.1.0").unwrap();

    let backend = StubBackend { concordant: false };
    let report = ValidationDriver::new(&backend, dir.path(), ValidationOptions::default())
        .run(&mut config, &metadata)
        .unwrap();
    assert!(!report.ready);
    let sample = &report.results["sample_check"]["all"];
    assert_eq!(sample.critical_count, 1);
    assert_eq!(
        sample.details["results_per_analysis"]["A1"]["difference"],
        Value::Bool(true)
    );

    let api = CountingApi::new();
    let error = SubmissionDriver::new(&api).run(&mut config).unwrap_err();
    assert!(matches!(error, SubmitError::NotReady));
    assert_eq!(api.initiate_calls.get(), 0);
    assert_eq!(api.upload_calls.get(), 0);
    assert_eq!(api.mark_calls.get(), 0);
}
