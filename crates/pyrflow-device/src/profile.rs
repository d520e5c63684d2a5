use std::io::Write;
use std::time::{Duration, Instant};

use crate::error::DeviceError;
use crate::event::CompletionHandle;

/// Header row of the profile table.
pub const PROFILE_TABLE_HEADER: &str = ";Not Existing;Queued;Submitted;Running";

/// Latency breakdown of one tracked operation, in nanoseconds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProfileRecord {
    /// Name of the operation.
    pub name: String,
    /// Time between the run's base timestamp and the operation being queued.
    pub queued_offset: u64,
    /// Time spent waiting for the wait-list (queued -> submitted).
    pub queue_latency: u64,
    /// Time spent waiting for a worker (submitted -> started).
    pub submit_latency: u64,
    /// Execution time (started -> ended).
    pub run_duration: u64,
}

impl ProfileRecord {
    /// Offset of the end of the operation from the base timestamp.
    pub fn end_offset(&self) -> u64 {
        self.queued_offset + self.queue_latency + self.submit_latency + self.run_duration
    }
}

impl std::fmt::Display for ProfileRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{};{};{};{};{}",
            self.name, self.queued_offset, self.queue_latency, self.submit_latency, self.run_duration
        )
    }
}

/// Collects the timestamps of named operations.
///
/// Tracking only keeps a clone of the handle; the recorder is never part of
/// a wait-list, and the timestamps are read after the operations retired.
#[derive(Default)]
pub struct ProfileRecorder {
    tracked: Vec<(String, CompletionHandle)>,
}

impl ProfileRecorder {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Track the operation behind `handle` under `name`.
    pub fn track(&mut self, name: impl Into<String>, handle: &CompletionHandle) {
        self.tracked.push((name.into(), handle.clone()));
    }

    /// Number of tracked operations.
    pub fn len(&self) -> usize {
        self.tracked.len()
    }

    /// Whether no operation is tracked.
    pub fn is_empty(&self) -> bool {
        self.tracked.is_empty()
    }

    /// Compute one record per tracked operation, in tracking order.
    ///
    /// Offsets are relative to the earliest queued timestamp among the
    /// tracked operations.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::ProfilingUnavailable`] if an operation has not retired.
    pub fn records(&self) -> Result<Vec<ProfileRecord>, DeviceError> {
        let infos = self
            .tracked
            .iter()
            .map(|(_, handle)| handle.profiling_info())
            .collect::<Result<Vec<_>, _>>()?;

        let base = infos.iter().map(|info| info.queued).min().unwrap_or(0);

        Ok(self
            .tracked
            .iter()
            .zip(infos)
            .map(|((name, _), info)| ProfileRecord {
                name: name.clone(),
                queued_offset: info.queued - base,
                queue_latency: info.submitted - info.queued,
                submit_latency: info.started - info.submitted,
                run_duration: info.ended - info.started,
            })
            .collect())
    }

    /// Latest end offset among the tracked operations, in nanoseconds.
    pub fn span(&self) -> Result<u64, DeviceError> {
        Ok(self
            .records()?
            .iter()
            .map(ProfileRecord::end_offset)
            .max()
            .unwrap_or(0))
    }
}

/// Write the profile table: the header row followed by one row per record.
pub fn write_profile_table<W: Write>(records: &[ProfileRecord], mut out: W) -> std::io::Result<()> {
    writeln!(out, "{PROFILE_TABLE_HEADER}")?;
    for record in records {
        writeln!(out, "{record}")?;
    }
    Ok(())
}

/// Logs the host wall-clock time of a named stage when dropped.
pub struct ScopedTimer {
    event: String,
    start: Instant,
}

impl ScopedTimer {
    /// Start timing `event`.
    pub fn new(event: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            start: Instant::now(),
        }
    }

    /// Time elapsed since the timer started.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for ScopedTimer {
    fn drop(&mut self) {
        log::info!(
            "[Timer]: Event '{}' took {} ms",
            self.event,
            self.start.elapsed().as_millis()
        );
    }
}
