//! Submission working directory helpers: writability checks, backup
//! rotation and the optional exclusive lock marker

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use log::{info, warn};
use thiserror::Error;

/// The directory one submission lives in. Holds the config store, the
/// validation output and the lock marker.
pub struct WorkingDirectory {
    pub path: PathBuf,
}

#[derive(Debug, Error)]
pub enum WorkdirError {
    #[error("submission directory {path} is not writable")]
    NotWritable { path: PathBuf },
    #[error("could not prepare submission directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("another process holds the lock on {path} (marker {marker})")]
    Locked { path: PathBuf, marker: PathBuf },
}

impl WorkingDirectory {
    /// Create the directory if absent and confirm it is writable before any
    /// stage runs.
    pub fn ensure_writable(path: &Path) -> Result<WorkingDirectory, WorkdirError> {
        if !path.exists() {
            info!("Creating submission directory {}", path.display());
            fs::create_dir_all(path).map_err(|source| WorkdirError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        }
        // Probing with a real write catches read-only mounts as well as mode bits
        let probe = path.join(".write_probe");
        match fs::write(&probe, b"") {
            Ok(_) => {
                let _ = fs::remove_file(&probe);
                Ok(WorkingDirectory {
                    path: path.to_path_buf(),
                })
            }
            Err(_) => Err(WorkdirError::NotWritable {
                path: path.to_path_buf(),
            }),
        }
    }
}

/// Rename `path` to `path.1`, shifting any existing backups up by one.
/// Backups stay contiguous from `.1`; anything past `retention` is pruned.
/// `retention = None` keeps every backup.
pub fn backup_rotate(path: &Path, retention: Option<usize>) -> Result<(), WorkdirError> {
    if !path.exists() {
        return Ok(());
    }
    let io_err = |source| WorkdirError::Io {
        path: path.to_path_buf(),
        source,
    };

    let mut highest = 0;
    while numbered(path, highest + 1).exists() {
        highest += 1;
    }

    for i in (1..=highest).rev() {
        let from = numbered(path, i);
        if retention.map_or(false, |keep| i + 1 > keep) {
            if from.is_dir() {
                fs::remove_dir_all(&from).map_err(io_err)?;
            } else {
                fs::remove_file(&from).map_err(io_err)?;
            }
        } else {
            fs::rename(&from, numbered(path, i + 1)).map_err(io_err)?;
        }
    }
    if retention == Some(0) {
        if path.is_dir() {
            fs::remove_dir_all(path).map_err(io_err)?;
        } else {
            fs::remove_file(path).map_err(io_err)?;
        }
    } else {
        fs::rename(path, numbered(path, 1)).map_err(io_err)?;
    }
    Ok(())
}

fn numbered(path: &Path, suffix: usize) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(format!(".{suffix}"));
    PathBuf::from(name)
}

/// Exclusive lock over a working directory, taken by creating a marker file.
/// The config store has no multi-process story of its own, so two tool
/// instances must never share a directory.
pub struct DirLock {
    marker: PathBuf,
}

impl DirLock {
    pub fn acquire(dir: &Path, timeout: Duration) -> Result<DirLock, WorkdirError> {
        let marker = dir.join(".varsub_lock");
        let deadline = Instant::now() + timeout;
        loop {
            match OpenOptions::new().write(true).create_new(true).open(&marker) {
                Ok(mut file) => {
                    let _ = write!(file, "{}", std::process::id());
                    return Ok(DirLock {
                        marker: marker.clone(),
                    });
                }
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                    if Instant::now() >= deadline {
                        return Err(WorkdirError::Locked {
                            path: dir.to_path_buf(),
                            marker,
                        });
                    }
                    std::thread::sleep(Duration::from_millis(200));
                }
                Err(source) => {
                    return Err(WorkdirError::Io {
                        path: marker.clone(),
                        source,
                    })
                }
            }
        }
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.marker) {
            warn!(
                "Could not remove lock marker {}: {}",
                self.marker.display(),
                err
            );
        }
    }
}
