use chrono::{DateTime, Local};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::broadcast;
use tracing::debug;

const CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogSource {
    Supervisor,
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogLine {
    pub timestamp: DateTime<Local>,
    pub source: LogSource,
    pub text: String,
}

impl LogLine {
    /// The on-disk form: `[2026-10-18T13:35:01.123] message`.
    pub fn render(&self) -> String {
        format!(
            "[{}] {}",
            self.timestamp.format("%Y-%m-%dT%H:%M:%S%.3f"),
            self.text
        )
    }
}

/// Append-only record of lifecycle events and child output.
///
/// The file is opened on first write and closed by [`LogSink::close`]; a
/// write after a close reopens it in append mode. Every line is also
/// broadcast to subscribers. Write failures are swallowed.
#[derive(Clone)]
pub struct LogSink {
    inner: Arc<SinkInner>,
}

struct SinkInner {
    path: Option<PathBuf>,
    writer: Mutex<Option<BufWriter<File>>>,
    tx: broadcast::Sender<LogLine>,
}

impl LogSink {
    pub fn to_file(path: impl Into<PathBuf>) -> Self {
        Self::build(Some(path.into()))
    }

    /// A sink that only broadcasts, for embedding and tests.
    pub fn detached() -> Self {
        Self::build(None)
    }

    fn build(path: Option<PathBuf>) -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(SinkInner {
                path,
                writer: Mutex::new(None),
                tx,
            }),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.inner.path.as_deref()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogLine> {
        self.inner.tx.subscribe()
    }

    pub fn write(&self, text: impl Into<String>) {
        self.append(LogSource::Supervisor, text.into());
    }

    pub fn child_output(&self, text: impl Into<String>, is_stderr: bool) {
        let source = if is_stderr {
            LogSource::Stderr
        } else {
            LogSource::Stdout
        };
        self.append(source, text.into());
    }

    fn writer(&self) -> MutexGuard<'_, Option<BufWriter<File>>> {
        self.inner
            .writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn append(&self, source: LogSource, text: String) {
        let line = LogLine {
            timestamp: Local::now(),
            source,
            text,
        };

        if let Some(path) = &self.inner.path {
            let mut guard = self.writer();
            if guard.is_none() {
                match open_append(path) {
                    Ok(file) => *guard = Some(BufWriter::new(file)),
                    Err(e) => debug!(path = %path.display(), error = %e, "log sink open failed"),
                }
            }
            if let Some(w) = guard.as_mut() {
                let result = writeln!(w, "{}", line.render()).and_then(|_| w.flush());
                if let Err(e) = result {
                    debug!(error = %e, "log sink write failed");
                }
            }
        }

        let _ = self.inner.tx.send(line);
    }

    pub fn close(&self) {
        if let Some(mut w) = self.writer().take() {
            let _ = w.flush();
        }
    }

    pub fn is_open(&self) -> bool {
        self.writer().is_some()
    }
}

fn open_append(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// Read the next line of process output into `buf`, decoding invalid UTF-8
/// lossily. The line terminator is stripped. `Ok(None)` at end of stream.
pub async fn read_line_lossy<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    buf: &mut Vec<u8>,
) -> std::io::Result<Option<String>> {
    buf.clear();
    if reader.read_until(b'\n', buf).await? == 0 {
        return Ok(None);
    }
    let line = String::from_utf8_lossy(&buf[..]);
    Ok(Some(line.trim_end_matches(['\n', '\r']).to_string()))
}

/// Last `n` lines of a log file.
pub fn tail(path: &Path, n: usize) -> std::io::Result<Vec<String>> {
    let bytes = std::fs::read(path)?;
    let content = String::from_utf8_lossy(&bytes);
    let lines: Vec<&str> = content.lines().collect();
    let start = lines.len().saturating_sub(n);
    Ok(lines[start..].iter().map(|l| l.to_string()).collect())
}
