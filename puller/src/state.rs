//! Per-file transfer state shared by every worker touching one file.
//!
//! # Overview
//!
//! A [`SharedPullerState`] is created for each file that is being synced, seeded with the number
//! of blocks that will be copied from the existing local file and the number that will be pulled
//! from peers. Copy and pull workers then, concurrently:
//!
//! 1. get the shared temp file through [`SharedPullerState::temp_file`] (created on first use),
//! 2. write their block at its own offset,
//! 3. call [`SharedPullerState::copy_done`] or [`SharedPullerState::pull_done`],
//! 4. call [`SharedPullerState::final_close`] - exactly one caller gets
//!    [`FinalClose::Responsible`] and hands the file to the finisher.
//!
//! # Failures
//!
//! The first error reported through [`SharedPullerState::fail`] (directly or by one of the
//! acquisition helpers) wins. It is logged once, the temp file is closed and removed, and every
//! later acquisition returns the same error without touching the filesystem. Workers still send
//! their done signals after a failure so the counters drain and the failure is reported by the
//! one responsible `final_close`.
//!
//! All mutable state lives behind one lock. Temp file creation happens while holding it, so at
//! most one create is ever attempted per state.

use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::file::FileInfo;
use crate::log::{FailureLog, TracingFailureLog};

/// Filesystem modes used when materializing the temp file.
#[derive(Debug, Clone, Copy)]
pub struct Settings {
    pub dir_mode: u32,
    pub file_mode: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self::from(&common::PullerConfig::default())
    }
}

impl From<&common::PullerConfig> for Settings {
    fn from(config: &common::PullerConfig) -> Self {
        Self {
            dir_mode: config.dir_mode,
            file_mode: config.file_mode,
        }
    }
}

/// Snapshot of outstanding work, for status reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PullProgress {
    pub copy_total: usize,
    pub copy_needed: usize,
    pub pull_total: usize,
    pub pull_needed: usize,
}

impl PullProgress {
    pub fn is_complete(&self) -> bool {
        self.copy_needed == 0 && self.pull_needed == 0
    }

    pub fn blocks_done(&self) -> usize {
        (self.copy_total - self.copy_needed) + (self.pull_total - self.pull_needed)
    }
}

/// Result of [`SharedPullerState::final_close`].
#[derive(Debug)]
#[must_use]
pub enum FinalClose {
    /// Work is still outstanding, or another caller already finalized the file.
    NotResponsible,
    /// This caller owns completion of the file. Carries the close result, or the recorded failure
    /// if the transfer failed earlier.
    Responsible(Result<()>),
}

impl FinalClose {
    pub fn is_responsible(&self) -> bool {
        matches!(self, FinalClose::Responsible(_))
    }
}

#[derive(Debug)]
enum Outcome {
    Pending,
    Failed(Error),
}

#[derive(Debug)]
struct Inner {
    outcome: Outcome,
    // same fd is used by all writers
    fd: Option<Arc<std::fs::File>>,
    copy_total: usize,
    copy_needed: usize,
    pull_total: usize,
    pull_needed: usize,
    closed: bool,
    // the temp path holds a file this state created, anything else there is left alone
    created: bool,
}

#[derive(Debug)]
pub struct SharedPullerState {
    file: FileInfo,
    repo: String,
    temp_name: PathBuf,
    real_name: PathBuf,
    settings: Settings,
    log: Arc<dyn FailureLog>,
    inner: parking_lot::Mutex<Inner>,
}

impl SharedPullerState {
    pub fn new(
        file: FileInfo,
        repo: impl Into<String>,
        temp_name: impl Into<PathBuf>,
        real_name: impl Into<PathBuf>,
        copy_needed: usize,
        pull_needed: usize,
    ) -> Self {
        Self {
            file,
            repo: repo.into(),
            temp_name: temp_name.into(),
            real_name: real_name.into(),
            settings: Settings::default(),
            log: Arc::new(TracingFailureLog),
            inner: parking_lot::Mutex::new(Inner {
                outcome: Outcome::Pending,
                fd: None,
                copy_total: copy_needed,
                copy_needed,
                pull_total: pull_needed,
                pull_needed,
                closed: false,
                created: false,
            }),
        }
    }

    pub fn with_log(mut self, log: Arc<dyn FailureLog>) -> Self {
        self.log = log;
        self
    }

    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    pub fn file(&self) -> &FileInfo {
        &self.file
    }

    pub fn repo(&self) -> &str {
        &self.repo
    }

    pub fn temp_name(&self) -> &Path {
        &self.temp_name
    }

    pub fn real_name(&self) -> &Path {
        &self.real_name
    }

    /// Returns the fd of the temp file, creating the file (and its directory) on first use.
    pub fn temp_file(&self) -> Result<Arc<std::fs::File>> {
        let mut inner = self.inner.lock();
        if let Outcome::Failed(error) = &inner.outcome {
            return Err(error.clone());
        }
        if let Some(fd) = &inner.fd {
            return Ok(Arc::clone(fd));
        }
        let dir = self
            .temp_name
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        // restores the directory mode once the create below has been attempted
        let _dir_guard = match std::fs::metadata(dir) {
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("creating directory {:?}", dir);
                if let Err(error) = std::fs::DirBuilder::new()
                    .recursive(true)
                    .mode(self.settings.dir_mode)
                    .create(dir)
                {
                    let error = Error::dir_access(dir, error);
                    self.fail_locked(&mut inner, "dst mkdir", error.clone());
                    return Err(error);
                }
                None
            }
            Err(error) => {
                let error = Error::dir_access(dir, error);
                self.fail_locked(&mut inner, "dst stat dir", error.clone());
                return Err(error);
            }
            Ok(metadata) if !metadata.is_dir() => {
                let error = Error::NotADirectory {
                    path: dir.to_owned(),
                };
                self.fail_locked(&mut inner, "dst mkdir", error.clone());
                return Err(error);
            }
            Ok(metadata) => Some(common::permissions::DirWriteGuard::relax(
                dir,
                &metadata,
                self.settings.dir_mode,
            )),
        };
        let fd = match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(self.settings.file_mode)
            .open(&self.temp_name)
        {
            Ok(fd) => Arc::new(fd),
            Err(error) => {
                let error = Error::temp_create(&self.temp_name, error);
                self.fail_locked(&mut inner, "dst create", error.clone());
                return Err(error);
            }
        };
        tracing::debug!("created temp file {:?}", &self.temp_name);
        inner.created = true;
        inner.fd = Some(Arc::clone(&fd));
        Ok(fd)
    }

    /// Opens the existing local version of the file for reading.
    pub fn source_file(&self) -> Result<std::fs::File> {
        let mut inner = self.inner.lock();
        if let Outcome::Failed(error) = &inner.outcome {
            return Err(error.clone());
        }
        match std::fs::File::open(&self.real_name) {
            Ok(fd) => Ok(fd),
            Err(error) => {
                let error = Error::source_open(&self.real_name, error);
                self.fail_locked(&mut inner, "src open", error.clone());
                Err(error)
            }
        }
    }

    /// Records `error` as the outcome of this transfer unless one is recorded already.
    ///
    /// The winning call logs the failure, closes the temp file and removes it from disk.
    pub fn fail(&self, context: &str, error: Error) {
        let mut inner = self.inner.lock();
        self.fail_locked(&mut inner, context, error);
    }

    fn fail_locked(&self, inner: &mut Inner, context: &str, error: Error) {
        if let Outcome::Failed(_) = inner.outcome {
            return;
        }
        self.log
            .failure(&self.repo, &self.file.name, context, &error);
        inner.outcome = Outcome::Failed(error);
        if let Some(fd) = inner.fd.take() {
            drop(fd);
            if let Err(error) = std::fs::remove_file(&self.temp_name) {
                tracing::debug!(
                    "failed removing temp file {:?}: {}",
                    &self.temp_name,
                    error
                );
            }
        }
    }

    /// Whether the file at the temp path was created by this transfer.
    pub fn created_temp(&self) -> bool {
        self.inner.lock().created
    }

    /// Emits a failure line for this file through the injected log without touching the outcome.
    ///
    /// Used for failures found after finalization, when the outcome can no longer change.
    pub fn report(&self, context: &str, error: &Error) {
        self.log
            .failure(&self.repo, &self.file.name, context, error);
    }

    /// The recorded failure, if any.
    pub fn failed(&self) -> Option<Error> {
        match &self.inner.lock().outcome {
            Outcome::Pending => None,
            Outcome::Failed(error) => Some(error.clone()),
        }
    }

    pub fn progress(&self) -> PullProgress {
        let inner = self.inner.lock();
        PullProgress {
            copy_total: inner.copy_total,
            copy_needed: inner.copy_needed,
            pull_total: inner.pull_total,
            pull_needed: inner.pull_needed,
        }
    }

    pub fn copy_done(&self) {
        let mut inner = self.inner.lock();
        if inner.copy_needed == 0 {
            tracing::warn!(
                "puller (repo {:?}, file {:?}): extra copy completion",
                &self.repo,
                &self.file.name
            );
            return;
        }
        inner.copy_needed -= 1;
        tracing::debug!(
            "puller (repo {:?}, file {:?}): copy_needed -> {}",
            &self.repo,
            &self.file.name,
            inner.copy_needed
        );
    }

    pub fn pull_done(&self) {
        let mut inner = self.inner.lock();
        if inner.pull_needed == 0 {
            tracing::warn!(
                "puller (repo {:?}, file {:?}): extra pull completion",
                &self.repo,
                &self.file.name
            );
            return;
        }
        inner.pull_needed -= 1;
        tracing::debug!(
            "puller (repo {:?}, file {:?}): pull_needed -> {}",
            &self.repo,
            &self.file.name,
            inner.pull_needed
        );
    }

    /// Closes the temp file once all copies and pulls are done.
    ///
    /// Only the first call made after the counters reach zero is responsible for the file, every
    /// other call returns [`FinalClose::NotResponsible`].
    pub fn final_close(&self) -> FinalClose {
        let mut inner = self.inner.lock();
        if inner.copy_needed + inner.pull_needed != 0 {
            // not done yet
            return FinalClose::NotResponsible;
        }
        if inner.closed {
            // already handled
            return FinalClose::NotResponsible;
        }
        inner.closed = true;
        if let Outcome::Failed(error) = &inner.outcome {
            return FinalClose::Responsible(Err(error.clone()));
        }
        match inner.fd.take() {
            Some(fd) => {
                let res = fd
                    .sync_all()
                    .map_err(|error| Error::close(&self.temp_name, error));
                drop(fd);
                FinalClose::Responsible(res)
            }
            None => FinalClose::Responsible(Ok(())),
        }
    }
}
