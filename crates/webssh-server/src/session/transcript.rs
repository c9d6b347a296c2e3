//! Session transcripts.
//!
//! Buffers timestamped input/output lines in memory and appends them to a
//! per-session log file when the buffer passes a threshold, and on teardown.
//! Writing is best-effort: failures are logged and never reach the session.

use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, warn};
use webssh_core::{WebSshError, WebSshResult};

/// Failed flushes keep at most this many thresholds' worth of entries.
const REQUEUE_FACTOR: usize = 10;

/// Which way the text travelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

/// One transcript line.
#[derive(Debug, Clone)]
pub struct TranscriptEntry {
    pub timestamp: DateTime<Local>,
    pub direction: Direction,
    pub text: String,
}

impl TranscriptEntry {
    pub fn new(direction: Direction, text: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now(),
            direction,
            text: text.into(),
        }
    }

    /// Render as `[YYYY-mm-dd HH:MM:SS] OUTPUT: text` lines (input gets a
    /// `>> ` marker). Trailing line endings are dropped and every embedded
    /// line carries the entry's own prefix, so one entry may span several
    /// lines.
    pub fn render(&self) -> String {
        let ts = self.timestamp.format("%Y-%m-%d %H:%M:%S");
        let prefix = match self.direction {
            Direction::Input => format!("[{ts}] INPUT: >> "),
            Direction::Output => format!("[{ts}] OUTPUT: "),
        };
        self.text
            .trim_end_matches(['\r', '\n'])
            .split('\n')
            .map(|line| format!("{prefix}{}", line.trim_end_matches('\r')))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

struct SinkInner {
    path: PathBuf,
    threshold: usize,
    buffer: Mutex<Vec<TranscriptEntry>>,
    /// Serializes file writes so flushed batches land in arrival order.
    write_lock: tokio::sync::Mutex<()>,
    flush_scheduled: AtomicBool,
    /// Set once the owning session has torn down.
    closed: AtomicBool,
}

/// Append buffer for one session's transcript. Cheap to clone.
#[derive(Clone)]
pub struct TranscriptSink {
    inner: Arc<SinkInner>,
}

impl std::fmt::Debug for TranscriptSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranscriptSink")
            .field("path", &self.inner.path)
            .field("pending", &self.pending())
            .finish()
    }
}

impl TranscriptSink {
    /// Create a sink writing to `path`. Nothing touches the disk until the
    /// first flush.
    pub fn new(path: PathBuf, threshold: usize) -> Self {
        Self {
            inner: Arc::new(SinkInner {
                path,
                threshold,
                buffer: Mutex::new(Vec::new()),
                write_lock: tokio::sync::Mutex::new(()),
                flush_scheduled: AtomicBool::new(false),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Transcript file path.
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Entries buffered and not yet written.
    pub fn pending(&self) -> usize {
        self.buffer().len()
    }

    /// Append an entry. Schedules a background flush once the buffer holds
    /// more than the threshold, or for any entry arriving after
    /// [`close`](Self::close).
    pub fn record(&self, direction: Direction, text: impl Into<String>) {
        let len = {
            let mut buffer = self.buffer();
            buffer.push(TranscriptEntry::new(direction, text));
            buffer.len()
        };

        let due = len > self.inner.threshold || self.inner.closed.load(Ordering::SeqCst);
        if due && !self.inner.flush_scheduled.swap(true, Ordering::AcqRel) {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    let sink = self.clone();
                    handle.spawn(async move {
                        sink.flush().await;
                    });
                }
                Err(_) => {
                    self.inner.flush_scheduled.store(false, Ordering::Release);
                    debug!("no runtime for background transcript flush, deferring");
                }
            }
        }
    }

    /// Write all buffered entries to the file. Returns how many were written;
    /// failures are logged and the entries kept for the next attempt.
    pub async fn flush(&self) -> usize {
        let _guard = self.inner.write_lock.lock().await;
        self.inner.flush_scheduled.store(false, Ordering::Release);

        let entries = std::mem::take(&mut *self.buffer());
        if entries.is_empty() {
            return 0;
        }

        match self.write_entries(&entries).await {
            Ok(()) => {
                debug!(path = %self.inner.path.display(), count = entries.len(), "transcript flushed");
                entries.len()
            }
            Err(e) => {
                error!(path = %self.inner.path.display(), error = %e, "failed to save transcript");
                self.requeue(entries);
                0
            }
        }
    }

    /// Final flush at session teardown. Entries recorded afterwards are
    /// flushed in the background as they arrive.
    pub async fn close(&self) -> usize {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.flush().await
    }

    async fn write_entries(&self, entries: &[TranscriptEntry]) -> WebSshResult<()> {
        let mut text = String::new();
        for entry in entries {
            text.push_str(&entry.render());
            text.push('\n');
        }

        let write = async {
            if let Some(parent) = self.inner.path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.inner.path)
                .await?;
            file.write_all(text.as_bytes()).await?;
            file.flush().await?;
            Ok::<(), std::io::Error>(())
        };
        write
            .await
            .map_err(|e| WebSshError::TranscriptWriteFailed(e.to_string()))
    }

    /// Put unwritten entries back in front of anything recorded meanwhile.
    fn requeue(&self, mut entries: Vec<TranscriptEntry>) {
        let mut buffer = self.buffer();
        entries.append(&mut buffer);
        let cap = self.inner.threshold.max(1) * REQUEUE_FACTOR;
        if entries.len() > cap {
            let dropped = entries.len() - cap;
            entries.drain(..dropped);
            warn!(dropped, "transcript buffer over capacity, dropped oldest entries");
        }
        *buffer = entries;
    }

    fn buffer(&self) -> std::sync::MutexGuard<'_, Vec<TranscriptEntry>> {
        self.inner.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Derive the transcript path for a session:
/// `{log_dir}/{name}/{name}_{YYYYmmdd_HHMMSS}.log`.
pub fn transcript_path(log_dir: &Path, display_name: &str, created_at: DateTime<Local>) -> PathBuf {
    let name = sanitize_name(display_name);
    let stamp = created_at.format("%Y%m%d_%H%M%S");
    log_dir.join(&name).join(format!("{name}_{stamp}.log"))
}

/// Make a display name safe to use as a single path component.
fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | '@') {
                c
            } else {
                '_'
            }
        })
        .collect();
    match cleaned.trim_matches('.') {
        "" => "session".to_string(),
        s => s.to_string(),
    }
}
