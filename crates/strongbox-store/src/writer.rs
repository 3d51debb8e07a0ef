//! Artifact file writer.
//!
//! Content goes to `<name>.partial` next to the final path and is renamed
//! into place only by [`ArtifactWriter::finish`]. Dropping an unfinished
//! writer (error, deadline, cancellation) removes the partial file, so a
//! listing never observes a half-written artifact.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::write::GzEncoder;
use strongbox_core::ArtifactFormat;
use strongbox_core::artifact::PARTIAL_SUFFIX;

enum Sink {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
}

impl Write for Sink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Sink::Plain(w) => w.write(buf),
            Sink::Gzip(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Sink::Plain(w) => w.flush(),
            Sink::Gzip(w) => w.flush(),
        }
    }
}

impl Sink {
    fn close(self) -> io::Result<File> {
        let buffered = match self {
            Sink::Plain(w) => w,
            Sink::Gzip(w) => w.finish()?,
        };
        buffered.into_inner().map_err(|e| e.into_error())
    }
}

pub struct ArtifactWriter {
    final_path: PathBuf,
    partial_path: PathBuf,
    sink: Option<Sink>,
    statements: u64,
}

impl ArtifactWriter {
    /// Start writing the artifact that will live at `final_path`
    pub fn create(final_path: &Path, format: ArtifactFormat) -> io::Result<Self> {
        let mut partial = final_path.as_os_str().to_owned();
        partial.push(PARTIAL_SUFFIX);
        let partial_path = PathBuf::from(partial);

        let file = BufWriter::new(File::create(&partial_path)?);
        let sink = match format {
            ArtifactFormat::Sql => Sink::Plain(file),
            ArtifactFormat::SqlGz => Sink::Gzip(GzEncoder::new(file, Compression::default())),
        };

        Ok(Self {
            final_path: final_path.to_path_buf(),
            partial_path,
            sink: Some(sink),
            statements: 0,
        })
    }

    fn sink(&mut self) -> io::Result<&mut Sink> {
        self.sink
            .as_mut()
            .ok_or_else(|| io::Error::other("artifact writer already closed"))
    }

    pub fn comment(&mut self, text: &str) -> io::Result<()> {
        let sink = self.sink()?;
        writeln!(sink, "-- {text}")
    }

    pub fn blank(&mut self) -> io::Result<()> {
        self.sink()?.write_all(b"\n")
    }

    /// Write one single-line statement
    pub fn statement(&mut self, sql: &str) -> io::Result<()> {
        let sink = self.sink()?;
        sink.write_all(sql.as_bytes())?;
        sink.write_all(b"\n")?;
        self.statements += 1;
        Ok(())
    }

    /// Copy bytes produced elsewhere (a native export tool)
    pub fn raw(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.sink()?.write_all(bytes)
    }

    pub fn statements(&self) -> u64 {
        self.statements
    }

    pub fn partial_path(&self) -> &Path {
        &self.partial_path
    }

    /// Flush, sync and rename into place. Returns the final size in bytes.
    pub fn finish(mut self) -> io::Result<u64> {
        let sink = self
            .sink
            .take()
            .ok_or_else(|| io::Error::other("artifact writer already closed"))?;
        let file = sink.close()?;
        file.sync_all()?;
        drop(file);

        fs::rename(&self.partial_path, &self.final_path)?;
        Ok(fs::metadata(&self.final_path)?.len())
    }

    /// [`finish`](Self::finish) on the blocking pool, for async dumps
    pub async fn finish_blocking(self) -> io::Result<u64> {
        tokio::task::spawn_blocking(move || self.finish())
            .await
            .map_err(|e| io::Error::other(format!("artifact finish task failed: {e}")))?
    }
}

impl Drop for ArtifactWriter {
    fn drop(&mut self) {
        // `finish` takes the sink; anything still holding one never completed
        if self.sink.take().is_some() {
            if let Err(e) = fs::remove_file(&self.partial_path) {
                tracing::warn!(
                    path = %self.partial_path.display(),
                    error = %e,
                    "Failed to remove partial artifact"
                );
            } else {
                tracing::debug!(path = %self.partial_path.display(), "Removed partial artifact");
            }
        }
    }
}
