//! Block-level reconstruction of files pulled from peers.
//!
//! Every file being synced gets a [`SharedPullerState`] that copy and pull workers share while
//! they write blocks into a temp file. The state hands out the temp file, records the first
//! failure and tells exactly one worker when the file is complete. [`pipeline::Puller`] drives
//! the workers for a file and [`finisher::finish`] moves the result into place.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! struct Peer;
//!
//! impl puller::BlockSource for Peer {
//!     fn fetch(
//!         &self,
//!         _file: &puller::FileInfo,
//!         block: &puller::BlockInfo,
//!     ) -> anyhow::Result<Vec<u8>> {
//!         Ok(vec![0; block.size as usize])
//!     }
//! }
//!
//! # async fn example() -> anyhow::Result<()> {
//! let file = puller::FileInfo::with_uniform_blocks(
//!     "notes.txt",
//!     1024,
//!     0o644,
//!     std::time::SystemTime::now(),
//!     512,
//! );
//! let job = puller::FileJob {
//!     repo: "default".to_string(),
//!     real_name: "/srv/sync/notes.txt".into(),
//!     copy: vec![file.blocks[0]],
//!     pull: vec![file.blocks[1]],
//!     file,
//! };
//! let progress = Arc::new(common::progress::Progress::new());
//! let puller = puller::Puller::new(common::PullerConfig::default(), progress)?;
//! let summary = puller.pull_file(job, Arc::new(Peer)).await?;
//! println!("{summary}");
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod file;
pub mod finisher;
pub mod log;
pub mod pipeline;
pub mod state;
pub mod worker;

pub use error::{Error, Result};
pub use file::{BlockInfo, FileInfo};
pub use log::{FailureLog, TracingFailureLog};
pub use pipeline::{FileJob, Puller, Summary};
pub use state::{FinalClose, PullProgress, Settings, SharedPullerState};
pub use worker::BlockSource;
