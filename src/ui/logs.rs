use is_terminal::IsTerminal;
use owo_colors::OwoColorize;
use regex::Regex;
use std::sync::LazyLock;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::supervisor::log_sink::{LogLine, LogSource};

// ---------------------------------------------------------------------------
// LogLevel detected from log line text
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

static LOG_LEVEL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(debug|info|warn(?:ing)?|error|err!)"#).expect("static regex")
});

/// Detect log level from a line of proxy output.
pub fn detect_log_level(text: &str) -> Option<LogLevel> {
    LOG_LEVEL_RE.find(text).and_then(|m| {
        let s = m.as_str().to_lowercase();
        match s.as_str() {
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" | "warning" => Some(LogLevel::Warn),
            "error" | "err!" => Some(LogLevel::Error),
            _ => None,
        }
    })
}

// ---------------------------------------------------------------------------
// LogEcho mirrors the log sink to the terminal
// ---------------------------------------------------------------------------

pub struct LogEcho {
    rx: broadcast::Receiver<LogLine>,
    use_color: bool,
}

impl LogEcho {
    pub fn new(rx: broadcast::Receiver<LogLine>) -> Self {
        Self {
            rx,
            use_color: std::io::stdout().is_terminal(),
        }
    }

    pub async fn run(mut self) {
        loop {
            match self.rx.recv().await {
                Ok(line) => println!("{}", format_line(&line, self.use_color)),
                Err(RecvError::Lagged(n)) => {
                    println!("  ... {} log lines skipped", n);
                }
                Err(RecvError::Closed) => break,
            }
        }
    }
}

pub fn format_line(line: &LogLine, use_color: bool) -> String {
    let time = line.timestamp.format("%H:%M:%S").to_string();
    if !use_color {
        let tag = match line.source {
            LogSource::Supervisor => "proxyme",
            LogSource::Stdout | LogSource::Stderr => "proxy",
        };
        return format!("{} {:>7} | {}", time, tag, line.text);
    }

    let (tag, text) = match line.source {
        LogSource::Supervisor => (
            format!("{}", "proxyme".cyan()),
            format!("{}", line.text.bold()),
        ),
        LogSource::Stdout | LogSource::Stderr => {
            let level = detect_log_level(&line.text).or(if line.source == LogSource::Stderr {
                Some(LogLevel::Error)
            } else {
                None
            });
            let text = match level {
                Some(LogLevel::Error) => format!("{}", line.text.red()),
                Some(LogLevel::Warn) => format!("{}", line.text.yellow()),
                Some(LogLevel::Debug) => format!("{}", line.text.dimmed()),
                _ => line.text.clone(),
            };
            (format!("{:>7}", "proxy".magenta()), text)
        }
    };
    format!("{} {} {} {}", time.dimmed(), tag, "|".dimmed(), text)
}
