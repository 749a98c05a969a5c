use std::process::Command;

use log::{debug, info};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("could not start process for '{description}': {source}")]
    Spawn {
        description: String,
        #[source]
        source: std::io::Error,
    },
    #[error("'{description}' exited with status {code:?}: {output}")]
    Failed {
        description: String,
        code: Option<i32>,
        output: String,
    },
}

/// Seam for external process execution. The container backend's state
/// machine is driven entirely through this trait so its transitions can be
/// exercised without a container engine.
pub trait CommandRunner {
    /// Run a blocking external command described by a human-readable
    /// `description`, returning its combined stdout and stderr. A non-zero
    /// exit status is an error carrying that output.
    fn run(&self, description: &str, program: &str, args: &[String])
        -> Result<String, CommandError>;
}

/// Runs commands through `std::process::Command`.
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(
        &self,
        description: &str,
        program: &str,
        args: &[String],
    ) -> Result<String, CommandError> {
        info!("{description}");
        debug!("Running {program} {}", args.join(" "));
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|source| CommandError::Spawn {
                description: description.to_string(),
                source,
            })?;
        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        if output.status.success() {
            Ok(combined)
        } else {
            Err(CommandError::Failed {
                description: description.to_string(),
                code: output.status.code(),
                output: combined,
            })
        }
    }
}

/// Convenience for building argument vectors from mixed literals and paths.
pub fn args<I, S>(parts: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    parts.into_iter().map(Into::into).collect()
}
