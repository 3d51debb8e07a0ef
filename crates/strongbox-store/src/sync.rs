//! Remote storage through an rclone-compatible sync tool.
//!
//! The tool is only ever invoked with an argument vector. Each call runs
//! under the sync deadline and the caller's cancellation signal.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use strongbox_core::config::DEFAULT_SYNC_BINARY;
use strongbox_core::process::DEFAULT_TOOL_DEADLINE;
use strongbox_core::{CancelSignal, StrongboxConfig, ToolCommand, ToolError};

/// A named remote plus the folder artifacts live in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    pub name: String,
    pub folder: String,
}

impl RemoteTarget {
    pub fn new(name: impl Into<String>, folder: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            folder: folder.into(),
        }
    }

    /// Address of one file inside the folder
    pub fn file(&self, path: &str) -> String {
        let folder = self.folder.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        if folder.is_empty() {
            format!("{}:{path}", self.name)
        } else {
            format!("{}:{folder}/{path}", self.name)
        }
    }
}

impl fmt::Display for RemoteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.folder)
    }
}

/// One entry of `rclone lsjson`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RemoteEntry {
    pub path: String,
    pub name: String,
    /// `-1` when the backend cannot tell
    pub size: i64,
    pub mod_time: DateTime<Utc>,
    #[serde(default)]
    pub is_dir: bool,
}

impl RemoteEntry {
    pub fn size_bytes(&self) -> u64 {
        u64::try_from(self.size).unwrap_or_default()
    }
}

/// Copy, list and delete against a remote target
#[async_trait]
pub trait SyncTool: Send + Sync + fmt::Debug {
    /// Copy one local file into the remote folder
    async fn copy_to(
        &self,
        file: &Path,
        remote: &RemoteTarget,
        cancel: &CancelSignal,
    ) -> Result<(), ToolError>;

    /// Copy every remote file matching `include` into `local_dir`
    async fn copy_from(
        &self,
        remote: &RemoteTarget,
        local_dir: &Path,
        include: &[&str],
        cancel: &CancelSignal,
    ) -> Result<(), ToolError>;

    /// Files at the top level of the remote folder
    async fn list(
        &self,
        remote: &RemoteTarget,
        cancel: &CancelSignal,
    ) -> Result<Vec<RemoteEntry>, ToolError>;

    /// Delete one file, `path` being relative to the remote folder
    async fn delete_file(
        &self,
        remote: &RemoteTarget,
        path: &str,
        cancel: &CancelSignal,
    ) -> Result<(), ToolError>;
}

/// The `rclone` command line
#[derive(Debug, Clone)]
pub struct Rclone {
    binary: String,
    config_path: Option<PathBuf>,
    deadline: Duration,
}

impl Default for Rclone {
    fn default() -> Self {
        Self::new(DEFAULT_SYNC_BINARY)
    }
}

impl Rclone {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            config_path: None,
            deadline: DEFAULT_TOOL_DEADLINE,
        }
    }

    pub fn from_config(config: &StrongboxConfig) -> Self {
        let mut rclone = Self::new(&config.sync_binary).with_deadline(config.deadlines.sync);
        if let Some(path) = &config.retention.sync_tool_config_path {
            rclone = rclone.with_config(path);
        }
        rclone
    }

    #[must_use]
    pub fn with_config(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    fn command(&self) -> ToolCommand {
        let command = ToolCommand::new(&self.binary).deadline(self.deadline);
        match &self.config_path {
            Some(path) => command.arg("--config").arg(path.to_string_lossy()),
            None => command,
        }
    }

    fn copy_to_command(&self, file: &Path, remote: &RemoteTarget) -> ToolCommand {
        self.command()
            .arg("copy")
            .arg(file.to_string_lossy())
            .arg(remote.to_string())
    }

    fn copy_from_command(
        &self,
        remote: &RemoteTarget,
        local_dir: &Path,
        include: &[&str],
    ) -> ToolCommand {
        let mut command = self
            .command()
            .arg("copy")
            .arg(remote.to_string())
            .arg(local_dir.to_string_lossy());
        for pattern in include {
            command = command.args(["--include", *pattern]);
        }
        command
    }

    fn list_command(&self, remote: &RemoteTarget) -> ToolCommand {
        self.command()
            .args(["lsjson", "--files-only"])
            .arg(remote.to_string())
    }

    fn delete_command(&self, remote: &RemoteTarget, path: &str) -> ToolCommand {
        self.command().arg("deletefile").arg(remote.file(path))
    }
}

/// Parse `lsjson` output, dropping directories
pub fn parse_listing(program: &str, stdout: &[u8]) -> Result<Vec<RemoteEntry>, ToolError> {
    let entries: Vec<RemoteEntry> =
        serde_json::from_slice(stdout).map_err(|e| ToolError::Output {
            program: program.to_string(),
            message: format!("unparseable listing: {e}"),
        })?;
    Ok(entries.into_iter().filter(|entry| !entry.is_dir).collect())
}

#[async_trait]
impl SyncTool for Rclone {
    async fn copy_to(
        &self,
        file: &Path,
        remote: &RemoteTarget,
        cancel: &CancelSignal,
    ) -> Result<(), ToolError> {
        self.copy_to_command(file, remote).output(cancel).await?;
        Ok(())
    }

    async fn copy_from(
        &self,
        remote: &RemoteTarget,
        local_dir: &Path,
        include: &[&str],
        cancel: &CancelSignal,
    ) -> Result<(), ToolError> {
        self.copy_from_command(remote, local_dir, include)
            .output(cancel)
            .await?;
        Ok(())
    }

    async fn list(
        &self,
        remote: &RemoteTarget,
        cancel: &CancelSignal,
    ) -> Result<Vec<RemoteEntry>, ToolError> {
        let output = self.list_command(remote).output(cancel).await?;
        parse_listing(&self.binary, &output.stdout)
    }

    async fn delete_file(
        &self,
        remote: &RemoteTarget,
        path: &str,
        cancel: &CancelSignal,
    ) -> Result<(), ToolError> {
        self.delete_command(remote, path).output(cancel).await?;
        Ok(())
    }
}
