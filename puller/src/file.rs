use std::path::{Path, PathBuf};

const TEMP_PREFIX: &str = ".rpull.";
const TEMP_SUFFIX: &str = ".tmp";

/// One block of a file, as announced by the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    pub offset: u64,
    pub size: u32,
}

impl BlockInfo {
    pub fn end(&self) -> u64 {
        self.offset + u64::from(self.size)
    }
}

/// Metadata snapshot of the file version being pulled.
#[derive(Debug, Clone)]
pub struct FileInfo {
    /// Name relative to the repository root, used in logs
    pub name: String,
    pub size: u64,
    /// Permission bits to apply once the file is complete
    pub mode: u32,
    pub modified: std::time::SystemTime,
    pub blocks: Vec<BlockInfo>,
}

impl FileInfo {
    /// Splits `size` bytes into blocks of `block_size`, the last one possibly shorter.
    pub fn with_uniform_blocks(
        name: impl Into<String>,
        size: u64,
        mode: u32,
        modified: std::time::SystemTime,
        block_size: u32,
    ) -> Self {
        let block_size = block_size.max(1);
        let mut blocks = Vec::new();
        let mut offset = 0;
        while offset < size {
            let len = std::cmp::min(u64::from(block_size), size - offset);
            blocks.push(BlockInfo {
                offset,
                // len <= block_size which is a u32
                size: len as u32,
            });
            offset += len;
        }
        Self {
            name: name.into(),
            size,
            mode,
            modified,
            blocks,
        }
    }
}

/// Hidden temp file next to `real`: `<dir>/.rpull.<name>.tmp`.
pub fn temp_name(real: &Path) -> PathBuf {
    let name = real
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = format!("{TEMP_PREFIX}{name}{TEMP_SUFFIX}");
    match real.parent() {
        Some(parent) => parent.join(temp),
        None => PathBuf::from(temp),
    }
}

pub fn is_temp_name(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| {
            name.len() > TEMP_PREFIX.len() + TEMP_SUFFIX.len()
                && name.starts_with(TEMP_PREFIX)
                && name.ends_with(TEMP_SUFFIX)
        })
}
