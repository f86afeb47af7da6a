use crate::error::Error;

/// Receives the single failure record of each transfer.
///
/// Handed to every [`crate::SharedPullerState`] at construction so the state never reaches for a
/// global logger.
pub trait FailureLog: Send + Sync + std::fmt::Debug {
    fn failure(&self, repo: &str, file: &str, context: &str, error: &Error);
}

/// Default sink, emits one `info` event per failed transfer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingFailureLog;

impl FailureLog for TracingFailureLog {
    fn failure(&self, repo: &str, file: &str, context: &str, error: &Error) {
        tracing::info!("puller (repo {:?}, file {:?}): {}: {}", repo, file, context, error);
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Keeps every record in memory.
    #[derive(Debug, Default)]
    pub struct RecordingLog {
        pub records: parking_lot::Mutex<Vec<(String, String, String, String)>>,
    }

    impl RecordingLog {
        pub fn count(&self) -> usize {
            self.records.lock().len()
        }

        pub fn contexts(&self) -> Vec<String> {
            self.records
                .lock()
                .iter()
                .map(|(_, _, context, _)| context.clone())
                .collect()
        }
    }

    impl FailureLog for RecordingLog {
        fn failure(&self, repo: &str, file: &str, context: &str, error: &Error) {
            self.records.lock().push((
                repo.to_string(),
                file.to_string(),
                context.to_string(),
                error.to_string(),
            ));
        }
    }
}
