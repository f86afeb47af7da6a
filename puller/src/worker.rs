use std::os::unix::fs::FileExt;

use crate::error::Error;
use crate::file::{BlockInfo, FileInfo};
use crate::state::{FinalClose, SharedPullerState};

/// Where pulled blocks come from, typically a connection to a peer.
pub trait BlockSource: Send + Sync {
    fn fetch(&self, file: &FileInfo, block: &BlockInfo) -> anyhow::Result<Vec<u8>>;
}

fn copy_into_temp(state: &SharedPullerState, block: &BlockInfo) -> Result<(), Error> {
    let dst = state.temp_file()?;
    let src = state.source_file()?;
    let mut buf = vec![0u8; block.size as usize];
    if let Err(error) = src.read_exact_at(&mut buf, block.offset) {
        let error = Error::io("src read", state.real_name(), block.offset, error);
        state.fail("src read", error.clone());
        return Err(error);
    }
    write_block(state, &dst, block, &buf)
}

fn write_block(
    state: &SharedPullerState,
    dst: &std::fs::File,
    block: &BlockInfo,
    data: &[u8],
) -> Result<(), Error> {
    if data.len() != block.size as usize {
        let error = Error::io(
            "dst write",
            state.temp_name(),
            block.offset,
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("block has {} bytes, expected {}", data.len(), block.size),
            ),
        );
        state.fail("dst write", error.clone());
        return Err(error);
    }
    if let Err(error) = dst.write_all_at(data, block.offset) {
        let error = Error::io("dst write", state.temp_name(), block.offset, error);
        state.fail("dst write", error.clone());
        return Err(error);
    }
    Ok(())
}

/// Copies one block from the existing local file into the temp file.
///
/// Always signals completion, even when the transfer has already failed, and returns the
/// outcome of the final close attempt.
pub fn copy_block(
    state: &SharedPullerState,
    block: &BlockInfo,
    progress: &common::progress::Progress,
) -> FinalClose {
    match copy_into_temp(state, block) {
        Ok(()) => {
            progress.blocks_copied.inc();
            progress.bytes_written.add(u64::from(block.size));
        }
        Err(error) => tracing::debug!("copy of block at {} skipped: {}", block.offset, error),
    }
    state.copy_done();
    state.final_close()
}

fn pull_into_temp(
    state: &SharedPullerState,
    source: &dyn BlockSource,
    block: &BlockInfo,
) -> Result<(), Error> {
    let dst = state.temp_file()?;
    let data = match source.fetch(state.file(), block) {
        Ok(data) => data,
        Err(error) => {
            let error = Error::fetch(block.offset, error);
            state.fail("pull", error.clone());
            return Err(error);
        }
    };
    write_block(state, &dst, block, &data)
}

/// Fetches one block from `source` and writes it into the temp file.
///
/// Same completion contract as [`copy_block`].
pub fn pull_block(
    state: &SharedPullerState,
    source: &dyn BlockSource,
    block: &BlockInfo,
    progress: &common::progress::Progress,
) -> FinalClose {
    match pull_into_temp(state, source, block) {
        Ok(()) => {
            progress.blocks_pulled.inc();
            progress.bytes_written.add(u64::from(block.size));
        }
        Err(error) => tracing::debug!("pull of block at {} skipped: {}", block.offset, error),
    }
    state.pull_done();
    state.final_close()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::testing::RecordingLog;
    use std::sync::Arc;

    struct Bytes(Vec<u8>);

    impl BlockSource for Bytes {
        fn fetch(&self, _file: &FileInfo, block: &BlockInfo) -> anyhow::Result<Vec<u8>> {
            let start = block.offset as usize;
            Ok(self.0[start..start + block.size as usize].to_vec())
        }
    }

    struct Broken;

    impl BlockSource for Broken {
        fn fetch(&self, _file: &FileInfo, _block: &BlockInfo) -> anyhow::Result<Vec<u8>> {
            Err(anyhow::anyhow!("connection reset"))
        }
    }

    struct Short;

    impl BlockSource for Short {
        fn fetch(&self, _file: &FileInfo, _block: &BlockInfo) -> anyhow::Result<Vec<u8>> {
            Ok(vec![1, 2])
        }
    }

    fn setup(
        dir: &std::path::Path,
        old: &[u8],
        size: u64,
        copies: usize,
        pulls: usize,
    ) -> (SharedPullerState, Arc<RecordingLog>) {
        let real = dir.join("data.bin");
        std::fs::write(&real, old).unwrap();
        let log = Arc::new(RecordingLog::default());
        let info = FileInfo::with_uniform_blocks(
            "data.bin",
            size,
            0o644,
            std::time::SystemTime::UNIX_EPOCH,
            4,
        );
        let state = SharedPullerState::new(
            info,
            "default",
            crate::file::temp_name(&real),
            real,
            copies,
            pulls,
        )
        .with_log(log.clone());
        (state, log)
    }

    #[test]
    fn copy_and_pull_reconstruct_file() {
        let tmp = tempfile::tempdir().unwrap();
        let (state, log) = setup(tmp.path(), b"AAAAbbbb", 8, 1, 1);
        let peer = Bytes(b"AAAABBBB".to_vec());
        let progress = common::progress::Progress::new();
        let blocks = state.file().blocks.clone();
        assert!(!copy_block(&state, &blocks[0], &progress).is_responsible());
        let close = pull_block(&state, &peer, &blocks[1], &progress);
        assert!(matches!(close, FinalClose::Responsible(Ok(()))));
        assert_eq!(std::fs::read(state.temp_name()).unwrap(), b"AAAABBBB");
        assert_eq!(progress.blocks_copied.get(), 1);
        assert_eq!(progress.blocks_pulled.get(), 1);
        assert_eq!(progress.bytes_written.get(), 8);
        assert_eq!(log.count(), 0);
    }

    #[test]
    fn fetch_error_fails_transfer_but_drains() {
        let tmp = tempfile::tempdir().unwrap();
        let (state, log) = setup(tmp.path(), b"AAAAbbbb", 8, 1, 1);
        let progress = common::progress::Progress::new();
        let blocks = state.file().blocks.clone();
        assert!(!pull_block(&state, &Broken, &blocks[1], &progress).is_responsible());
        assert!(!state.temp_name().exists());
        match copy_block(&state, &blocks[0], &progress) {
            FinalClose::Responsible(Err(Error::Fetch { offset, .. })) => assert_eq!(offset, 4),
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(progress.blocks_copied.get(), 0);
        assert_eq!(log.contexts(), vec!["pull".to_string()]);
        // the old version is untouched
        assert_eq!(std::fs::read(state.real_name()).unwrap(), b"AAAAbbbb");
    }

    #[test]
    fn short_source_fails_copy() {
        let tmp = tempfile::tempdir().unwrap();
        let (state, log) = setup(tmp.path(), b"AA", 4, 1, 0);
        let progress = common::progress::Progress::new();
        let blocks = state.file().blocks.clone();
        match copy_block(&state, &blocks[0], &progress) {
            FinalClose::Responsible(Err(Error::Io { context, .. })) => {
                assert_eq!(context, "src read")
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(log.count(), 1);
    }

    #[test]
    fn wrong_sized_block_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let (state, _log) = setup(tmp.path(), b"", 4, 0, 1);
        let progress = common::progress::Progress::new();
        let block = state.file().blocks[0];
        match pull_block(&state, &Short, &block, &progress) {
            FinalClose::Responsible(Err(Error::Io { context, source, .. })) => {
                assert_eq!(context, "dst write");
                assert_eq!(source.kind(), std::io::ErrorKind::InvalidData);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
