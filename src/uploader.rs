//! Remote upload collaborator
//!
//! Uploading is opaque to the exporter: a local file and a remote folder label
//! go in, and the only failure signal is error text coming back. Two
//! implementations are provided:
//!
//! - [`CommandUploader`] runs an external program as
//!   `<program> <args...> <local_path> <remote_label>`. Anything written to
//!   stderr is treated as the error text.
//! - [`HttpUploader`] POSTs `{"local_path", "remote_path"}` to an upload service
//!   and reads back `{"error": "..."}`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;

use crate::config::UploadConfig;
use crate::error::{Error, Result};

/// Upload a staged file to remote storage
#[async_trait]
pub trait Uploader: Send + Sync {
    /// Upload `local_path` into the remote folder `remote_label`.
    ///
    /// Returns [`Error::Upload`] carrying the collaborator's error text on failure.
    async fn upload(&self, local_path: &Path, remote_label: &str) -> Result<()>;

    /// Short name for logs
    fn name(&self) -> &'static str;
}

/// Build the uploader described by `config`.
///
/// `service_url` takes precedence over `command`.
pub fn from_config(config: &UploadConfig) -> Result<Arc<dyn Uploader>> {
    if let Some(url) = &config.service_url {
        return Ok(Arc::new(HttpUploader::new(url.clone(), config.timeout)));
    }
    if let Some(command) = &config.command {
        return Ok(Arc::new(
            CommandUploader::new(command.clone(), config.args.clone())
                .with_timeout(config.timeout),
        ));
    }
    Err(Error::NotSupported(
        "no upload command or upload service configured".to_string(),
    ))
}

/// Uploader backed by an external program
///
/// # Examples
///
/// ```no_run
/// use tg_cloud_export::uploader::{CommandUploader, Uploader};
/// use std::path::Path;
///
/// # async fn example() -> tg_cloud_export::Result<()> {
/// let uploader = CommandUploader::from_path("ts-node", vec!["src/index.ts".into()])
///     .expect("ts-node not found in PATH");
/// uploader.upload(Path::new("Downloads/report.pdf"), "Books--1001").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct CommandUploader {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandUploader {
    /// Create an uploader with an explicit program path and leading arguments
    pub fn new(program: PathBuf, args: Vec<String>) -> Self {
        Self {
            program,
            args,
            timeout: Duration::from_secs(30 * 60),
        }
    }

    /// Attempt to find `program` in PATH
    pub fn from_path(program: &str, args: Vec<String>) -> Option<Self> {
        which::which(program).ok().map(|path| Self::new(path, args))
    }

    /// Override the per-upload timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Uploader for CommandUploader {
    async fn upload(&self, local_path: &Path, remote_label: &str) -> Result<()> {
        let result = tokio::time::timeout(
            self.timeout,
            Command::new(&self.program)
                .args(&self.args)
                .arg(local_path)
                .arg(remote_label)
                .kill_on_drop(true)
                .output(),
        )
        .await;

        let output = match result {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(Error::Upload(format!(
                    "failed to run {}: {}",
                    self.program.display(),
                    e
                )));
            }
            Err(_) => {
                return Err(Error::Upload(format!(
                    "upload timed out after {}s",
                    self.timeout.as_secs()
                )));
            }
        };

        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr = stderr.trim();
        if !stderr.is_empty() {
            return Err(Error::Upload(stderr.to_string()));
        }

        if !output.status.success() {
            // stderr is the contract; a silent non-zero exit is only worth a log line
            tracing::warn!(
                program = ?self.program,
                code = ?output.status.code(),
                "upload command exited non-zero without error text"
            );
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "command"
    }
}

#[derive(Serialize)]
struct UploadRequest<'a> {
    local_path: &'a Path,
    remote_path: &'a str,
}

#[derive(Deserialize, Default)]
struct UploadResponse {
    #[serde(default)]
    error: Option<String>,
}

/// Uploader backed by an HTTP upload service
#[derive(Debug, Clone)]
pub struct HttpUploader {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpUploader {
    /// Create an uploader that POSTs to `url`
    pub fn new(url: String, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
            timeout,
        }
    }
}

#[async_trait]
impl Uploader for HttpUploader {
    async fn upload(&self, local_path: &Path, remote_label: &str) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(&UploadRequest {
                local_path,
                remote_path: remote_label,
            })
            .timeout(self.timeout)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(Error::Upload(format!(
                "upload service returned status {}: {}",
                status,
                body.trim()
            )));
        }

        // An empty or non-JSON 2xx body counts as "no error text"
        let parsed: UploadResponse = serde_json::from_str(&body).unwrap_or_default();
        match parsed.error.as_deref().map(str::trim) {
            Some(text) if !text.is_empty() => Err(Error::Upload(text.to_string())),
            _ => Ok(()),
        }
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
