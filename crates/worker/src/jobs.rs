//! Building the job list of a run.

use std::path::{Path, PathBuf};

use encbatch_core::job::JobDescriptor;

use crate::config::JobSource;

#[derive(Debug, thiserror::Error)]
pub enum JobsFileError {
    #[error("Failed to read jobs file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Jobs file {path} is not a JSON array of jobs: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Resolve the configured job source into an ordered descriptor list.
pub fn resolve(source: &JobSource) -> Result<Vec<JobDescriptor>, JobsFileError> {
    match source {
        JobSource::File(path) => load_jobs_file(path),
        JobSource::Generated {
            input_path,
            output_base_path,
            count,
        } => Ok(generate_jobs(input_path, output_base_path, *count)),
    }
}

/// Read a JSON array of `{name, input_path, output_path}` objects.
pub fn load_jobs_file(path: &Path) -> Result<Vec<JobDescriptor>, JobsFileError> {
    let raw = std::fs::read_to_string(path).map_err(|source| JobsFileError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| JobsFileError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// `count` jobs named `encoding1..=count`, all encoding `input_path`,
/// each writing to its own directory below `output_base_path`.
pub fn generate_jobs(input_path: &str, output_base_path: &str, count: usize) -> Vec<JobDescriptor> {
    let base = output_base_path.trim_end_matches('/');
    (1..=count)
        .map(|i| {
            let name = format!("encoding{i}");
            let output_path = if base.is_empty() {
                name.clone()
            } else {
                format!("{base}/{name}")
            };
            JobDescriptor::new(name, input_path, output_path)
        })
        .collect()
}
