use std::path::Path;
use std::time::Duration;

use log::info;
use regex::Regex;

use crate::backend::command::{args, CommandError, CommandRunner, SystemRunner};
use crate::backend::{BackendError, ExecutionBackend, WorkflowParams};

pub const CONTAINER_IMAGE: &str = "ebivariation/varsub";
pub const CONTAINER_TAG: &str = "v0.1.0";
const CONTAINER_VALIDATION_DIR: &str = "/opt/vcf_validation";
const CONTAINER_OUTPUT_DIR: &str = "/opt/vcf_validation/validation_output";
const WORKFLOW_IN_CONTAINER: &str = "/opt/varsub/nextflow/validation.nf";

/// Live state of the container engine and the named container, derived by
/// querying the engine each run. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Running,
    Stopped,
    ImageAvailable,
    ImageAbsent,
}

/// Runs the checks inside a managed container.
///
/// `ensure_ready` walks the lifecycle state machine:
/// engine missing is fatal; a running container is used as-is; a stopped one
/// is restarted; otherwise a container is created from the local image,
/// pulling it first if absent. Every transition is a blocking engine call
/// and any non-zero exit aborts the lifecycle with the underlying output
/// preserved.
pub struct ContainerBackend<R: CommandRunner = SystemRunner> {
    engine_path: String,
    container_name: String,
    runner: R,
    startup_poll_attempts: u32,
    startup_poll_delay: Duration,
}

impl ContainerBackend<SystemRunner> {
    pub fn new(engine_path: Option<String>, container_name: Option<String>) -> Self {
        ContainerBackend::with_runner(engine_path, container_name, SystemRunner)
    }
}

impl<R: CommandRunner> ContainerBackend<R> {
    pub fn with_runner(
        engine_path: Option<String>,
        container_name: Option<String>,
        runner: R,
    ) -> Self {
        ContainerBackend {
            engine_path: engine_path.unwrap_or_else(|| "docker".to_string()),
            container_name: container_name
                .unwrap_or_else(|| format!("varsub.{CONTAINER_TAG}")),
            runner,
            startup_poll_attempts: 5,
            startup_poll_delay: Duration::from_secs(2),
        }
    }

    fn engine(&self, description: &str, arguments: Vec<String>) -> Result<String, CommandError> {
        self.runner.run(description, &self.engine_path, &arguments)
    }

    fn lifecycle(&self, action: &str, arguments: Vec<String>) -> Result<String, BackendError> {
        self.engine(action, arguments)
            .map_err(|source| BackendError::Lifecycle {
                action: action.to_string(),
                source,
            })
    }

    fn probe_state(&self) -> Result<EngineState, BackendError> {
        let running = self.lifecycle("list running containers", args(["ps"]))?;
        if running.contains(&self.container_name) {
            info!("Container {} is running", self.container_name);
            return Ok(EngineState::Running);
        }
        let all = self.lifecycle("list all containers", args(["ps", "-a"]))?;
        if all.contains(&self.container_name) {
            info!("Container {} exists but is stopped", self.container_name);
            return Ok(EngineState::Stopped);
        }
        let images = self.lifecycle("list local images", args(["images"]))?;
        let present = Regex::new(&format!("{}\\s+{}", regex::escape(CONTAINER_IMAGE), CONTAINER_TAG))
            .map(|re| re.is_match(&images))
            .unwrap_or(false);
        if present {
            info!("Image {CONTAINER_IMAGE}:{CONTAINER_TAG} is available locally");
            Ok(EngineState::ImageAvailable)
        } else {
            info!("Image {CONTAINER_IMAGE}:{CONTAINER_TAG} is not available locally");
            Ok(EngineState::ImageAbsent)
        }
    }

    fn is_running(&self) -> Result<bool, BackendError> {
        let running = self.lifecycle("list running containers", args(["ps"]))?;
        Ok(running.contains(&self.container_name))
    }

    fn restart(&self) -> Result<(), BackendError> {
        info!("Restarting container {}", self.container_name);
        self.lifecycle(
            "restart stopped container",
            args(["start", &self.container_name]),
        )?;
        if self.is_running()? {
            Ok(())
        } else {
            Err(BackendError::NotRunning {
                name: self.container_name.clone(),
            })
        }
    }

    fn create_and_start(&self) -> Result<(), BackendError> {
        info!("Starting container {}", self.container_name);
        self.lifecycle(
            "create and start container",
            args([
                "run",
                "--rm",
                "-d",
                "--name",
                &self.container_name,
                &format!("{CONTAINER_IMAGE}:{CONTAINER_TAG}"),
            ]),
        )?;
        // bounded warm-up wait for the fresh instance
        for _ in 0..self.startup_poll_attempts {
            if self.is_running()? {
                return Ok(());
            }
            std::thread::sleep(self.startup_poll_delay);
        }
        Err(BackendError::NotRunning {
            name: self.container_name.clone(),
        })
    }

    fn pull_image(&self) -> Result<(), BackendError> {
        info!("Pulling image {CONTAINER_IMAGE}:{CONTAINER_TAG}");
        self.lifecycle(
            "pull validation image",
            args(["pull", &format!("{CONTAINER_IMAGE}:{CONTAINER_TAG}")]),
        )?;
        Ok(())
    }

    fn exec(&self, description: &str, command: &[String]) -> Result<String, BackendError> {
        let mut arguments = args(["exec", self.container_name.as_str()]);
        arguments.extend_from_slice(command);
        Ok(self.engine(description, arguments)?)
    }

    fn container_path(&self, host_path: &Path) -> String {
        let host = host_path.display().to_string();
        format!("{CONTAINER_VALIDATION_DIR}/{}", host.trim_start_matches('/'))
    }
}

impl<R: CommandRunner> ExecutionBackend for ContainerBackend<R> {
    fn ensure_ready(&self) -> Result<(), BackendError> {
        self.engine("check container engine is installed", args(["--version"]))
            .map_err(|source| BackendError::NotInstalled {
                tool: self.engine_path.clone(),
                source,
            })?;

        match self.probe_state()? {
            EngineState::Running => Ok(()),
            EngineState::Stopped => self.restart(),
            EngineState::ImageAvailable => self.create_and_start(),
            EngineState::ImageAbsent => {
                self.pull_image()?;
                self.create_and_start()
            }
        }
    }

    fn stage_input(&self, path: &Path) -> Result<(), BackendError> {
        let target = self.container_path(path);
        let parent = match path.parent() {
            Some(parent) => self.container_path(parent),
            None => CONTAINER_VALIDATION_DIR.to_string(),
        };
        self.exec(
            &format!("create container directory for {}", path.display()),
            &args(["mkdir", "-p", &parent]),
        )?;
        self.engine(
            &format!("copy {} into container", path.display()),
            args([
                "cp".to_string(),
                path.display().to_string(),
                format!("{}:{}", self.container_name, target),
            ]),
        )?;
        Ok(())
    }

    fn run_workflow(&self, params: &WorkflowParams) -> Result<(), BackendError> {
        let mut command = args([
            "nextflow",
            "run",
            WORKFLOW_IN_CONTAINER,
            "--vcf_files_mapping",
            &self.container_path(&params.mapping_file),
        ]);
        if let Some(metadata_json) = &params.metadata_json {
            command.extend(args(["--metadata_json", &self.container_path(metadata_json)]));
        } else if let Some(metadata_xlsx) = &params.metadata_xlsx {
            command.extend(args(["--metadata_xlsx", &self.container_path(metadata_xlsx)]));
        }
        command.extend(args(["--output_dir", CONTAINER_OUTPUT_DIR]));
        if params.shallow {
            command.extend(args(["--shallow_validation", "true"]));
        }
        self.exec("run validation workflow", &command)?;
        Ok(())
    }

    fn retrieve_output(&self, params: &WorkflowParams) -> Result<(), BackendError> {
        self.engine(
            "copy validation output from container to host",
            args([
                "cp".to_string(),
                format!("{}:{}/.", self.container_name, CONTAINER_OUTPUT_DIR),
                params.output_dir.display().to_string(),
            ]),
        )?;
        Ok(())
    }
}
