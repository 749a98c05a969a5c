use std::path::Path;

use crate::backend::command::{args, CommandRunner, SystemRunner};
use crate::backend::{BackendError, ExecutionBackend, WorkflowParams};

/// Runs the workflow with executables installed on the host. There is no
/// lifecycle to manage; readiness means every required tool answers a
/// version check.
pub struct LocalBackend<R: CommandRunner = SystemRunner> {
    workflow_path: String,
    executables: Vec<(&'static str, String)>,
    runner: R,
}

impl LocalBackend<SystemRunner> {
    pub fn new(
        workflow_path: String,
        vcf_validator: Option<String>,
        assembly_checker: Option<String>,
        biovalidator: Option<String>,
    ) -> Self {
        LocalBackend::with_runner(
            workflow_path,
            vcf_validator,
            assembly_checker,
            biovalidator,
            SystemRunner,
        )
    }
}

impl<R: CommandRunner> LocalBackend<R> {
    pub fn with_runner(
        workflow_path: String,
        vcf_validator: Option<String>,
        assembly_checker: Option<String>,
        biovalidator: Option<String>,
        runner: R,
    ) -> Self {
        let executables = vec![
            ("nextflow", "nextflow".to_string()),
            (
                "vcf-validator",
                vcf_validator.unwrap_or_else(|| "vcf_validator".to_string()),
            ),
            (
                "vcf-assembly-checker",
                assembly_checker.unwrap_or_else(|| "vcf_assembly_checker".to_string()),
            ),
            (
                "biovalidator",
                biovalidator.unwrap_or_else(|| "biovalidator".to_string()),
            ),
        ];
        LocalBackend {
            workflow_path,
            executables,
            runner,
        }
    }

    fn executable<'a>(&'a self, name: &'a str) -> &'a str {
        self.executables
            .iter()
            .find(|(tool, _)| *tool == name)
            .map(|(_, path)| path.as_str())
            .unwrap_or(name)
    }
}

impl<R: CommandRunner> ExecutionBackend for LocalBackend<R> {
    fn ensure_ready(&self) -> Result<(), BackendError> {
        for (tool, path) in &self.executables {
            self.runner
                .run(
                    &format!("check {tool} is installed and available on the path"),
                    path,
                    &args(["--version"]),
                )
                .map_err(|source| BackendError::NotInstalled {
                    tool: format!("{tool} ({path})"),
                    source,
                })?;
        }
        Ok(())
    }

    fn stage_input(&self, _path: &Path) -> Result<(), BackendError> {
        // tools share the host filesystem
        Ok(())
    }

    fn run_workflow(&self, params: &WorkflowParams) -> Result<(), BackendError> {
        let mut command = args([
            "run",
            &self.workflow_path,
            "--vcf_files_mapping",
            &params.mapping_file.display().to_string(),
        ]);
        if let Some(metadata_json) = &params.metadata_json {
            command.extend(args(["--metadata_json", &metadata_json.display().to_string()]));
        } else if let Some(metadata_xlsx) = &params.metadata_xlsx {
            command.extend(args(["--metadata_xlsx", &metadata_xlsx.display().to_string()]));
        }
        command.extend(args(["--output_dir", &params.output_dir.display().to_string()]));
        command.extend(args([
            "--executable.vcf_validator",
            self.executable("vcf-validator"),
            "--executable.vcf_assembly_checker",
            self.executable("vcf-assembly-checker"),
            "--executable.biovalidator",
            self.executable("biovalidator"),
        ]));
        if params.shallow {
            command.extend(args(["--shallow_validation", "true"]));
        }
        self.runner
            .run("run validation workflow", self.executable("nextflow"), &command)?;
        Ok(())
    }

    fn retrieve_output(&self, _params: &WorkflowParams) -> Result<(), BackendError> {
        // the workflow already wrote straight into the host output directory
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::command::CommandError;
    use std::cell::RefCell;

    struct RecordingRunner {
        fail_on: Option<&'static str>,
        calls: RefCell<Vec<(String, Vec<String>)>>,
    }

    impl CommandRunner for RecordingRunner {
        fn run(
            &self,
            description: &str,
            program: &str,
            arguments: &[String],
        ) -> Result<String, CommandError> {
            self.calls
                .borrow_mut()
                .push((program.to_string(), arguments.to_vec()));
            if self.fail_on == Some(program) {
                return Err(CommandError::Failed {
                    description: description.to_string(),
                    code: Some(127),
                    output: "not found".to_string(),
                });
            }
            Ok(String::new())
        }
    }

    #[test]
    fn readiness_checks_every_executable() {
        let backend = LocalBackend::with_runner(
            "validation.nf".to_string(),
            None,
            None,
            None,
            RecordingRunner {
                fail_on: None,
                calls: RefCell::new(Vec::new()),
            },
        );
        backend.ensure_ready().unwrap();
        let programs: Vec<String> = backend
            .runner
            .calls
            .borrow()
            .iter()
            .map(|(program, _)| program.clone())
            .collect();
        assert_eq!(
            programs,
            vec!["nextflow", "vcf_validator", "vcf_assembly_checker", "biovalidator"]
        );
    }

    #[test]
    fn one_missing_executable_fails_readiness() {
        let backend = LocalBackend::with_runner(
            "validation.nf".to_string(),
            None,
            None,
            None,
            RecordingRunner {
                fail_on: Some("vcf_assembly_checker"),
                calls: RefCell::new(Vec::new()),
            },
        );
        let err = backend.ensure_ready().unwrap_err();
        match err {
            BackendError::NotInstalled { tool, .. } => {
                assert!(tool.contains("vcf-assembly-checker"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn workflow_invocation_passes_executable_paths() {
        let backend = LocalBackend::with_runner(
            "/opt/varsub/validation.nf".to_string(),
            Some("/usr/local/bin/vcf_validator".to_string()),
            None,
            None,
            RecordingRunner {
                fail_on: None,
                calls: RefCell::new(Vec::new()),
            },
        );
        let params = WorkflowParams {
            mapping_file: "/sub/vcf_mapping_file.csv".into(),
            metadata_json: Some("/sub/metadata.json".into()),
            metadata_xlsx: None,
            output_dir: "/sub/validation_output".into(),
            shallow: false,
        };
        backend.run_workflow(&params).unwrap();
        let calls = backend.runner.calls.borrow();
        let (program, arguments) = calls.last().unwrap();
        assert_eq!(program, "nextflow");
        assert!(arguments.contains(&"/usr/local/bin/vcf_validator".to_string()));
        assert!(arguments.contains(&"--metadata_json".to_string()));
        assert!(!arguments.contains(&"--shallow_validation".to_string()));
    }
}
