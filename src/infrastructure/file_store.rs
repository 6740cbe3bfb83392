use super::parse_log;
use crate::domain::event::{DomainEvent, EventRecord, MonotonicClock};
use crate::domain::machine::MachineState;
use crate::domain::ports::EventStore;
use crate::error::{Result, VendError};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Event log file name inside the data directory (one JSON record per line).
pub const LOG_FILE: &str = "events.jsonl";
/// Snapshot file name inside the data directory.
pub const SNAPSHOT_FILE: &str = "snapshot.json";

struct LogWriter {
    file: File,
    clock: MonotonicClock,
    /// Set when a write failed midway; the next record starts on a new line.
    torn: bool,
}

/// A persistent event store backed by two files in a data directory.
///
/// Appends go to `events.jsonl` and are fsynced before returning. Snapshots
/// are written to a temp file and renamed over `snapshot.json`, after which
/// the log is truncated. All writes share one mutex, so appends and snapshots
/// never interleave.
pub struct FileEventStore {
    log_path: PathBuf,
    snapshot_path: PathBuf,
    threshold: usize,
    writer: Mutex<LogWriter>,
    events_since_snapshot: AtomicUsize,
}

impl FileEventStore {
    /// Opens or creates the store under `dir`.
    ///
    /// Resumes the timestamp clock and the since-snapshot counter from what
    /// is already on disk. A log whose last record was cut short by a crash
    /// is left as is; the next append starts on a fresh line.
    pub async fn open<P: AsRef<Path>>(dir: P, threshold: usize) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).await?;
        let log_path = dir.join(LOG_FILE);
        let snapshot_path = dir.join(SNAPSHOT_FILE);

        let text = read_log_text(&log_path).await?;
        let torn = !text.is_empty() && !text.ends_with('\n');
        if torn {
            tracing::warn!(path = %log_path.display(), "Event log ends in a partial record");
        }
        let existing = parse_log(text.lines());
        let mut clock = MonotonicClock::new();
        if let Some(snapshot) = read_snapshot(&snapshot_path).await?
            && let Some(ts) = snapshot.timestamp
        {
            clock.observe(ts);
        }
        for record in &existing {
            clock.observe(record.timestamp);
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .await?;

        tracing::debug!(
            path = %log_path.display(),
            pending = existing.len(),
            "Opened event log"
        );

        Ok(Self {
            log_path,
            snapshot_path,
            threshold,
            writer: Mutex::new(LogWriter {
                file,
                clock,
                torn,
            }),
            events_since_snapshot: AtomicUsize::new(existing.len()),
        })
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }
}

async fn read_log_text(path: &Path) -> Result<String> {
    match fs::read_to_string(path).await {
        Ok(text) => Ok(text),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(e.into()),
    }
}

async fn read_log(path: &Path) -> Result<Vec<EventRecord>> {
    Ok(parse_log(read_log_text(path).await?.lines()))
}

async fn read_snapshot(path: &Path) -> Result<Option<MachineState>> {
    let text = match fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if text.trim().is_empty() {
        return Ok(None);
    }
    serde_json::from_str(&text)
        .map(Some)
        .map_err(VendError::persistence)
}

#[async_trait]
impl EventStore for FileEventStore {
    async fn append(&self, event: DomainEvent) -> Result<EventRecord> {
        let mut writer = self.writer.lock().await;
        let record = writer.clock.stamp(event);
        let mut line = record.to_line().map_err(VendError::persistence)?;
        if writer.torn {
            line.insert(0, '\n');
        }

        let written = async {
            writer.file.write_all(line.as_bytes()).await?;
            writer.file.flush().await?;
            writer.file.sync_data().await
        }
        .await;
        if let Err(e) = written {
            writer.torn = true;
            tracing::error!(error = %e, "Failed to append event");
            return Err(e.into());
        }
        writer.torn = false;

        self.events_since_snapshot.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(kind = ?record.event.kind(), timestamp = %record.timestamp, "Appended event");
        Ok(record)
    }

    async fn replay_all(&self) -> Result<Vec<EventRecord>> {
        let _writer = self.writer.lock().await;
        read_log(&self.log_path).await
    }

    async fn load_latest_snapshot(&self) -> Result<Option<MachineState>> {
        read_snapshot(&self.snapshot_path).await
    }

    async fn write_snapshot(&self, state: &MachineState) -> Result<()> {
        let json = serde_json::to_vec_pretty(state).map_err(VendError::persistence)?;
        let mut writer = self.writer.lock().await;

        let tmp_path = self.snapshot_path.with_extension("json.tmp");
        {
            let mut tmp = File::create(&tmp_path).await?;
            tmp.write_all(&json).await?;
            tmp.flush().await?;
            tmp.sync_all().await?;
        }
        if let Err(e) = fs::rename(&tmp_path, &self.snapshot_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }

        // Everything in the log is now covered by the snapshot.
        writer.file.set_len(0).await?;
        writer.file.sync_data().await?;
        writer.torn = false;
        self.events_since_snapshot.store(0, Ordering::SeqCst);

        tracing::info!(
            path = %self.snapshot_path.display(),
            state = %state.state,
            escrow = state.escrow.balance(),
            "Wrote snapshot"
        );
        Ok(())
    }

    fn events_since_snapshot(&self) -> usize {
        self.events_since_snapshot.load(Ordering::SeqCst)
    }

    fn snapshot_threshold(&self) -> usize {
        self.threshold
    }
}
