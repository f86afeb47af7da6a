use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug)]
pub struct TlsCounter {
    // each slot is written only by its owning thread, readers just sum them up
    count: thread_local::ThreadLocal<AtomicU64>,
}

impl TlsCounter {
    pub fn new() -> Self {
        Self {
            count: thread_local::ThreadLocal::new(),
        }
    }

    pub fn add(&self, value: u64) {
        let slot = self.count.get_or(|| AtomicU64::new(0));
        slot.fetch_add(value, Ordering::Relaxed);
    }

    pub fn inc(&self) {
        self.add(1);
    }

    pub fn get(&self) -> u64 {
        self.count
            .iter()
            .fold(0, |x, y| x + y.load(Ordering::Relaxed))
    }
}

impl Default for TlsCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Counters updated by block workers and the finisher while files are being pulled.
#[derive(Debug)]
pub struct Progress {
    pub blocks_copied: TlsCounter,
    pub blocks_pulled: TlsCounter,
    pub bytes_written: TlsCounter,
    pub files_finished: TlsCounter,
    pub files_failed: TlsCounter,
    start_time: std::time::Instant,
}

impl Progress {
    pub fn new() -> Self {
        Self {
            blocks_copied: Default::default(),
            blocks_pulled: Default::default(),
            bytes_written: Default::default(),
            files_finished: Default::default(),
            files_failed: Default::default(),
            start_time: std::time::Instant::now(),
        }
    }

    pub fn get_duration(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for Progress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let bytes = self.bytes_written.get();
        let secs = self.get_duration().as_secs_f64();
        let rate = if secs > 0.0 { bytes as f64 / secs } else { 0.0 };
        write!(
            f,
            "blocks copied:  {:>10}\n\
            blocks pulled:  {:>10}\n\
            bytes written:  {:>10}\n\
            write rate:     {:>10.0} B/s\n\
            files finished: {:>10}\n\
            files failed:   {:>10}",
            self.blocks_copied.get(),
            self.blocks_pulled.get(),
            bytes,
            rate,
            self.files_finished.get(),
            self.files_failed.get(),
        )
    }
}
