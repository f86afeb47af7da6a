use std::path::PathBuf;
use std::sync::Arc;

use tracing::instrument;

use crate::error::Error;
use crate::file::{BlockInfo, FileInfo};
use crate::finisher;
use crate::log::{FailureLog, TracingFailureLog};
use crate::state::{FinalClose, Settings, SharedPullerState};
use crate::worker::{self, BlockSource};

/// One file to bring up to date, with the blocks already split into local copies and pulls.
#[derive(Debug, Clone)]
pub struct FileJob {
    pub repo: String,
    pub file: FileInfo,
    pub real_name: PathBuf,
    pub copy: Vec<BlockInfo>,
    pub pull: Vec<BlockInfo>,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Summary {
    pub files_finished: usize,
    pub blocks_copied: usize,
    pub blocks_pulled: usize,
    pub bytes_written: u64,
}

impl std::ops::Add for Summary {
    type Output = Self;
    fn add(self, other: Self) -> Self {
        Self {
            files_finished: self.files_finished + other.files_finished,
            blocks_copied: self.blocks_copied + other.blocks_copied,
            blocks_pulled: self.blocks_pulled + other.blocks_pulled,
            bytes_written: self.bytes_written + other.bytes_written,
        }
    }
}

impl std::fmt::Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "files finished: {}\n\
            blocks copied: {}\n\
            blocks pulled: {}\n\
            bytes written: {}",
            self.files_finished, self.blocks_copied, self.blocks_pulled, self.bytes_written,
        )
    }
}

fn bytes_in(blocks: &[BlockInfo]) -> u64 {
    blocks.iter().map(|block| u64::from(block.size)).sum()
}

/// Drives copy and pull workers for files, bounded by the configured pool widths.
#[derive(Debug)]
pub struct Puller {
    config: common::PullerConfig,
    progress: Arc<common::progress::Progress>,
    log: Arc<dyn FailureLog>,
    copiers: Arc<tokio::sync::Semaphore>,
    pullers: Arc<tokio::sync::Semaphore>,
}

impl Puller {
    pub fn new(
        config: common::PullerConfig,
        progress: Arc<common::progress::Progress>,
    ) -> anyhow::Result<Self> {
        config.validate().map_err(anyhow::Error::msg)?;
        Ok(Self {
            config,
            progress,
            log: Arc::new(TracingFailureLog),
            copiers: Arc::new(tokio::sync::Semaphore::new(config.copiers)),
            pullers: Arc::new(tokio::sync::Semaphore::new(config.pullers)),
        })
    }

    pub fn with_log(mut self, log: Arc<dyn FailureLog>) -> Self {
        self.log = log;
        self
    }

    pub fn progress(&self) -> &Arc<common::progress::Progress> {
        &self.progress
    }

    /// Builds the transfer state for `job`, with the temp file next to the real one.
    pub fn new_state(&self, job: &FileJob) -> Arc<SharedPullerState> {
        Arc::new(
            SharedPullerState::new(
                job.file.clone(),
                job.repo.clone(),
                crate::file::temp_name(&job.real_name),
                job.real_name.clone(),
                job.copy.len(),
                job.pull.len(),
            )
            .with_settings(Settings::from(&self.config))
            .with_log(self.log.clone()),
        )
    }

    /// Fails an in-flight transfer from the outside; its workers wind down on their own.
    pub fn abort(state: &SharedPullerState, reason: &str) {
        state.fail("abort", Error::aborted(reason));
    }

    #[instrument(skip_all, fields(repo = %job.repo, file = %job.file.name))]
    pub async fn pull_file(
        &self,
        job: FileJob,
        source: Arc<dyn BlockSource>,
    ) -> Result<Summary, Error> {
        let state = self.new_state(&job);
        self.run(state, job.copy, job.pull, source).await
    }

    /// Runs every copy and pull of `state` to completion and finishes the file.
    pub async fn run(
        &self,
        state: Arc<SharedPullerState>,
        copy: Vec<BlockInfo>,
        pull: Vec<BlockInfo>,
        source: Arc<dyn BlockSource>,
    ) -> Result<Summary, Error> {
        let summary = Summary {
            files_finished: 1,
            blocks_copied: copy.len(),
            blocks_pulled: pull.len(),
            bytes_written: bytes_in(&copy) + bytes_in(&pull),
        };
        let close = self.reconstruct(&state, copy, pull, source).await;
        let finished = {
            let state = state.clone();
            tokio::task::spawn_blocking(move || finisher::finish(&state, close)).await
        };
        let res = match finished {
            Ok(res) => res,
            Err(error) => Err(Error::aborted(format!("finisher did not complete: {error}"))),
        };
        match res {
            Ok(()) => {
                self.progress.files_finished.inc();
                Ok(summary)
            }
            Err(error) => {
                self.progress.files_failed.inc();
                Err(error)
            }
        }
    }

    async fn reconstruct(
        &self,
        state: &Arc<SharedPullerState>,
        copy: Vec<BlockInfo>,
        pull: Vec<BlockInfo>,
        source: Arc<dyn BlockSource>,
    ) -> Result<(), Error> {
        {
            // the temp file must exist and have the right size even if no block touches its end
            let prepare_state = state.clone();
            let prepared = tokio::task::spawn_blocking(move || {
                if let Ok(fd) = prepare_state.temp_file() {
                    let size = prepare_state.file().size;
                    if let Err(error) = fd.set_len(size) {
                        let error =
                            Error::io("dst truncate", prepare_state.temp_name(), size, error);
                        prepare_state.fail("dst truncate", error);
                    }
                }
            })
            .await;
            if let Err(error) = prepared {
                let error = Error::aborted(format!("prepare did not complete: {error}"));
                state.fail("prepare", error);
            }
        }
        if copy.is_empty() && pull.is_empty() {
            return match state.final_close() {
                FinalClose::Responsible(res) => res,
                FinalClose::NotResponsible => Err(Error::aborted("file was finalized elsewhere")),
            };
        }
        let mut join_set = tokio::task::JoinSet::new();
        for block in copy {
            let state = state.clone();
            let copiers = self.copiers.clone();
            let progress = self.progress.clone();
            join_set.spawn(async move {
                let _permit = copiers.acquire_owned().await.ok();
                tokio::task::spawn_blocking(move || worker::copy_block(&state, &block, &progress))
                    .await
            });
        }
        for block in pull {
            let state = state.clone();
            let pullers = self.pullers.clone();
            let progress = self.progress.clone();
            let source = source.clone();
            join_set.spawn(async move {
                let _permit = pullers.acquire_owned().await.ok();
                tokio::task::spawn_blocking(move || {
                    worker::pull_block(&state, source.as_ref(), &block, &progress)
                })
                .await
            });
        }
        let mut outcome = None;
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(Ok(FinalClose::Responsible(res))) => outcome = Some(res),
                Ok(Ok(FinalClose::NotResponsible)) => {}
                Ok(Err(error)) | Err(error) => {
                    // the worker never signalled, the counters cannot drain anymore
                    state.fail(
                        "worker",
                        Error::aborted(format!("worker did not complete: {error}")),
                    );
                }
            }
        }
        outcome.unwrap_or_else(|| {
            Err(state
                .failed()
                .unwrap_or_else(|| Error::aborted("transfer did not complete")))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Peer(Vec<u8>);

    impl BlockSource for Peer {
        fn fetch(&self, _file: &FileInfo, block: &BlockInfo) -> anyhow::Result<Vec<u8>> {
            let start = block.offset as usize;
            Ok(self.0[start..start + block.size as usize].to_vec())
        }
    }

    fn puller() -> Puller {
        let config = common::PullerConfig {
            copiers: 2,
            pullers: 3,
            ..Default::default()
        };
        Puller::new(config, Arc::new(common::progress::Progress::new())).unwrap()
    }

    #[tokio::test]
    async fn empty_file_is_created() {
        let tmp = tempfile::tempdir().unwrap();
        let real = tmp.path().join("sub").join("empty");
        let job = FileJob {
            repo: "default".to_string(),
            file: FileInfo::with_uniform_blocks(
                "empty",
                0,
                0o644,
                std::time::SystemTime::now(),
                16,
            ),
            real_name: real.clone(),
            copy: vec![],
            pull: vec![],
        };
        let puller = puller();
        let summary = puller.pull_file(job, Arc::new(Peer(vec![]))).await.unwrap();
        assert_eq!(summary.files_finished, 1);
        assert_eq!(std::fs::metadata(&real).unwrap().len(), 0);
        assert_eq!(puller.progress().files_finished.get(), 1);
    }

    #[tokio::test]
    async fn aborted_state_is_reported_once() {
        let tmp = tempfile::tempdir().unwrap();
        let real = tmp.path().join("big");
        let data = vec![7u8; 64];
        let file =
            FileInfo::with_uniform_blocks("big", 64, 0o644, std::time::SystemTime::now(), 16);
        let job = FileJob {
            repo: "default".to_string(),
            pull: file.blocks.clone(),
            file,
            real_name: real.clone(),
            copy: vec![],
        };
        let puller = puller();
        let state = puller.new_state(&job);
        Puller::abort(&state, "user requested");
        let res = puller
            .run(state.clone(), job.copy, job.pull, Arc::new(Peer(data)))
            .await;
        assert!(matches!(res, Err(Error::Aborted { .. })), "{res:?}");
        assert!(!real.exists());
        assert!(!state.temp_name().exists());
        assert!(state.progress().is_complete());
        assert_eq!(puller.progress().files_failed.get(), 1);
        assert_eq!(puller.progress().blocks_pulled.get(), 0);
    }

    #[test]
    fn summary_adds_up() {
        let a = Summary {
            files_finished: 1,
            blocks_copied: 2,
            blocks_pulled: 3,
            bytes_written: 40,
        };
        let total = a + a;
        assert_eq!(total.blocks_pulled, 6);
        assert_eq!(total.bytes_written, 80);
        assert!(total.to_string().contains("files finished: 2"));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = common::PullerConfig {
            pullers: 0,
            ..Default::default()
        };
        assert!(Puller::new(config, Arc::new(common::progress::Progress::new())).is_err());
    }
}
