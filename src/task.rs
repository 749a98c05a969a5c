use std::fmt;

use clap::ValueEnum;

/// What the user asked for. Submitting implies validating first whenever
/// there is no usable validation on record.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum Task {
    Validate,
    Submit,
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Task::Validate => write!(f, "validate"),
            Task::Submit => write!(f, "submit"),
        }
    }
}

/// How the checking tools are executed.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum Executor {
    /// Managed container with all tools baked in
    Docker,
    /// Tools installed on the host
    Native,
}

impl fmt::Display for Executor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Executor::Docker => write!(f, "docker"),
            Executor::Native => write!(f, "native"),
        }
    }
}
