use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use log::error;

use varsub::backend::container::ContainerBackend;
use varsub::backend::local::LocalBackend;
use varsub::backend::ExecutionBackend;
use varsub::orchestrator::{self, RunOptions};
use varsub::remote::auth::WebinAuth;
use varsub::remote::SubmissionWsClient;
use varsub::task::{Executor, Task};

/// Validate a variant dataset and submit it to the archive.
#[derive(Parser)]
#[command(name = "varsub", version, about)]
struct Cli {
    /// What to do; submitting validates first when needed
    #[arg(value_enum)]
    task: Task,

    /// Directory holding the dataset and this submission's state
    #[arg(long, default_value = ".")]
    submission_dir: PathBuf,

    /// Metadata JSON document; defaults to the one recorded by the last
    /// validation, or metadata.json in the submission directory
    #[arg(long)]
    metadata_json: Option<PathBuf>,

    /// Metadata spreadsheet the JSON was filled from; findings are also
    /// reported in spreadsheet coordinates
    #[arg(long)]
    metadata_xlsx: Option<PathBuf>,

    /// Variant files to validate, overriding the mappings derived from
    /// the metadata; requires --reference-fasta
    #[arg(long, num_args = 1.., requires = "reference_fasta")]
    vcf_files: Vec<PathBuf>,

    /// Reference FASTA the --vcf-files were called against
    #[arg(long, requires = "vcf_files")]
    reference_fasta: Option<PathBuf>,

    /// Validate truncated copies of large inputs for a quick first pass
    #[arg(long)]
    shallow: bool,

    /// How to run the checking tools
    #[arg(long, value_enum, default_value_t = Executor::Docker)]
    executor: Executor,

    /// Webin account name; defaults to ENA_WEBIN_ACCOUNT
    #[arg(long)]
    username: Option<String>,

    /// Webin password; defaults to ENA_WEBIN_PASSWORD
    #[arg(long)]
    password: Option<String>,

    /// Container engine executable
    #[arg(long, default_value = "docker")]
    engine_path: String,

    /// Name of the managed validation container
    #[arg(long)]
    container_name: Option<String>,

    /// Workflow file to run with the native executor
    #[arg(long)]
    workflow: Option<String>,

    /// Path to the vcf-validator executable (native executor)
    #[arg(long)]
    vcf_validator: Option<String>,

    /// Path to the vcf-assembly-checker executable (native executor)
    #[arg(long)]
    assembly_checker: Option<String>,

    /// Path to the biovalidator executable (native executor)
    #[arg(long)]
    biovalidator: Option<String>,
}

fn main() -> ExitCode {
    env_logger::init();
    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    // validation alone never talks to the submission service, so missing
    // credentials only matter once a submission is requested
    let auth = match cli.task {
        Task::Submit => WebinAuth::from_credentials(cli.username, cli.password)?,
        Task::Validate => WebinAuth::from_credentials(cli.username, cli.password)
            .unwrap_or_else(|_| WebinAuth::new(String::new(), String::new())),
    };
    let api = SubmissionWsClient::new(auth)?;

    let backend: Box<dyn ExecutionBackend> = match cli.executor {
        Executor::Docker => Box::new(ContainerBackend::new(
            Some(cli.engine_path),
            cli.container_name,
        )),
        Executor::Native => {
            let workflow = cli
                .workflow
                .context("--workflow is required with the native executor")?;
            Box::new(LocalBackend::new(
                workflow,
                cli.vcf_validator,
                cli.assembly_checker,
                cli.biovalidator,
            ))
        }
    };

    orchestrator::run(
        &RunOptions {
            submission_dir: cli.submission_dir,
            task: cli.task,
            metadata_json: cli.metadata_json,
            metadata_xlsx: cli.metadata_xlsx,
            vcf_files: cli.vcf_files,
            reference_fasta: cli.reference_fasta,
            shallow: cli.shallow,
        },
        backend.as_ref(),
        &api,
    )
}
