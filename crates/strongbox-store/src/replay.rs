//! Reading restore artifacts back into statements.
//!
//! Splitting rules: lines are trimmed; blank lines, `--` comment lines and
//! psql meta-command lines (`\...`) are skipped; the remaining lines are
//! accumulated, joined by newlines, until the accumulated text ends with
//! `;`, at which point one statement is emitted. A trailing fragment
//! without a terminator is logged and dropped, never executed.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use flate2::read::MultiGzDecoder;
use strongbox_core::{ArtifactFormat, ArtifactName, RestoreError};
use tokio::sync::mpsc;

/// Statements buffered between the reader thread and the executor
pub const FEED_CAPACITY: usize = 256;

/// Open an artifact for line reading, decoding gzip when the name says so
pub fn open_artifact(path: &Path) -> io::Result<Box<dyn BufRead + Send>> {
    let file = File::open(path)?;
    let compressed = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(|name| match ArtifactName::parse(name) {
            Some(parsed) => parsed.format == ArtifactFormat::SqlGz,
            None => name.ends_with(".gz"),
        })
        .unwrap_or(false);

    if compressed {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Iterator over the statements of an artifact
pub struct StatementReader<R> {
    lines: io::Lines<R>,
    buffer: String,
    done: bool,
}

impl<R: BufRead> StatementReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            buffer: String::new(),
            done: false,
        }
    }
}

impl<R: BufRead> Iterator for StatementReader<R> {
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            let line = match self.lines.next() {
                Some(Ok(line)) => line,
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e));
                }
                None => {
                    self.done = true;
                    if !self.buffer.is_empty() {
                        tracing::warn!(
                            fragment_chars = self.buffer.chars().count(),
                            "Artifact ends with an unterminated statement; not executed"
                        );
                    }
                    return None;
                }
            };

            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with("--") {
                continue;
            }
            if self.buffer.is_empty() && trimmed.starts_with('\\') {
                continue;
            }

            if !self.buffer.is_empty() {
                self.buffer.push('\n');
            }
            self.buffer.push_str(trimmed);

            if self.buffer.ends_with(';') {
                return Some(Ok(std::mem::take(&mut self.buffer)));
            }
        }
    }
}

/// Statements flowing from a blocking reader thread
pub struct StatementFeed {
    path: PathBuf,
    rx: mpsc::Receiver<io::Result<String>>,
}

impl StatementFeed {
    /// Start reading `path` on a blocking thread
    pub fn spawn(path: &Path) -> Result<Self, RestoreError> {
        let reader = open_artifact(path).map_err(|source| RestoreError::Artifact {
            path: path.to_path_buf(),
            source,
        })?;
        let (tx, rx) = mpsc::channel(FEED_CAPACITY);

        tokio::task::spawn_blocking(move || {
            for statement in StatementReader::new(reader) {
                let failed = statement.is_err();
                // Receiver gone: the replay was abandoned
                if tx.blocking_send(statement).is_err() || failed {
                    break;
                }
            }
        });

        Ok(Self {
            path: path.to_path_buf(),
            rx,
        })
    }

    /// A feed over statements already in memory
    pub fn from_statements<I>(statements: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let statements: Vec<String> = statements.into_iter().collect();
        let (tx, rx) = mpsc::channel(statements.len().max(1));
        for statement in statements {
            // Capacity covers every statement
            let _ = tx.try_send(Ok(statement));
        }
        Self {
            path: PathBuf::from("<memory>"),
            rx,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Next statement, or `None` once the artifact is exhausted
    pub async fn next(&mut self) -> Option<Result<String, RestoreError>> {
        let item = self.rx.recv().await?;
        Some(item.map_err(|source| self.read_error(source)))
    }

    /// Blocking variant for executors running on a blocking thread
    pub fn blocking_next(&mut self) -> Option<Result<String, RestoreError>> {
        let item = self.rx.blocking_recv()?;
        Some(item.map_err(|source| self.read_error(source)))
    }

    fn read_error(&self, source: io::Error) -> RestoreError {
        RestoreError::Artifact {
            path: self.path.clone(),
            source,
        }
    }
}
