//! Dockerfile-driven initrd.
//!
//! An external build backend materializes the Dockerfile's final stage into
//! a directory, which is then serialized like any other rootfs. The build
//! and the progress drain run together; the first failure cancels both.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use ukpack_core::error::{PackError, Result};

use super::directory::serialize_dir;
use super::{resolve_output, Initrd, InitrdOptions};

/// Lines of backend output kept for error reports.
const ERROR_TAIL_LINES: usize = 10;

/// What to build and where to put the result.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub context_dir: PathBuf,
    pub dockerfile: PathBuf,
    pub output_dir: PathBuf,
    pub cache_dir: Option<PathBuf>,
}

/// One progress event from the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildProgress {
    pub message: String,
}

/// Something that can turn a Dockerfile into a directory tree.
#[async_trait]
pub trait BuildBackend: Send + Sync {
    /// Run the build, sending progress on `progress`. The sender is dropped
    /// when the build ends.
    async fn solve(&self, request: &BuildRequest, progress: mpsc::Sender<BuildProgress>) -> Result<()>;
}

/// [`BuildBackend`] that drives a BuildKit daemon through `buildctl`.
#[derive(Debug, Clone)]
pub struct BuildctlBackend {
    addr: String,
    binary: PathBuf,
}

impl BuildctlBackend {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            binary: PathBuf::from("buildctl"),
        }
    }

    /// Use a specific `buildctl` executable.
    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }
}

#[async_trait]
impl BuildBackend for BuildctlBackend {
    async fn solve(&self, request: &BuildRequest, progress: mpsc::Sender<BuildProgress>) -> Result<()> {
        let dockerfile_dir = request.dockerfile.parent().unwrap_or(Path::new("."));
        let file_name = request
            .dockerfile
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "Dockerfile".to_string());

        let mut cmd = tokio::process::Command::new(&self.binary);
        cmd.arg("--addr")
            .arg(&self.addr)
            .arg("build")
            .arg("--frontend")
            .arg("dockerfile.v0")
            .arg("--local")
            .arg(format!("context={}", request.context_dir.display()))
            .arg("--local")
            .arg(format!("dockerfile={}", dockerfile_dir.display()))
            .arg("--opt")
            .arg(format!("filename={}", file_name))
            .arg("--output")
            .arg(format!("type=local,dest={}", request.output_dir.display()))
            .arg("--progress=plain");
        if let Some(cache) = &request.cache_dir {
            cmd.arg("--export-cache")
                .arg(format!("type=local,dest={}", cache.display()));
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::info!(
            addr = %self.addr,
            dockerfile = %request.dockerfile.display(),
            "Starting BuildKit build"
        );
        let mut child = cmd.spawn().map_err(|e| {
            PackError::Build(format!(
                "failed to spawn {}: {} (is buildctl installed?)",
                self.binary.display(),
                e
            ))
        })?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| PackError::Build("buildctl stderr not captured".to_string()))?;
        let mut lines = BufReader::new(stderr).lines();
        let mut tail = VecDeque::with_capacity(ERROR_TAIL_LINES);
        while let Some(line) = lines.next_line().await? {
            if tail.len() == ERROR_TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line.clone());
            // A closed receiver only means nobody is watching
            let _ = progress.send(BuildProgress { message: line }).await;
        }

        let status = child.wait().await?;
        if !status.success() {
            return Err(PackError::Build(format!(
                "buildctl exited with {}: {}",
                status,
                Vec::from(tail).join("\n")
            )));
        }
        Ok(())
    }
}

/// Progress observer for Dockerfile builds.
pub type ProgressObserver = Arc<dyn Fn(&BuildProgress) + Send + Sync>;

/// Builds an initrd from a Dockerfile.
pub struct DockerfileInitrd {
    dockerfile: PathBuf,
    context_dir: PathBuf,
    opts: InitrdOptions,
    backend: Arc<dyn BuildBackend>,
    on_progress: Option<ProgressObserver>,
    files: Vec<String>,
}

impl DockerfileInitrd {
    /// The file name must contain "dockerfile" (any case). The build
    /// context is the Dockerfile's directory.
    pub fn new(path: impl Into<PathBuf>, opts: InitrdOptions, backend: Arc<dyn BuildBackend>) -> Result<Self> {
        let dockerfile = path.into();
        let is_dockerfile = dockerfile
            .file_name()
            .map(|n| n.to_string_lossy().to_ascii_lowercase().contains("dockerfile"))
            .unwrap_or(false);
        if !is_dockerfile {
            return Err(PackError::Other(format!(
                "file is not a Dockerfile: {}",
                dockerfile.display()
            )));
        }
        if !dockerfile.is_file() {
            return Err(PackError::not_found("Dockerfile", dockerfile.display().to_string()));
        }

        let context_dir = dockerfile
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Ok(Self {
            dockerfile,
            context_dir,
            opts,
            backend,
            on_progress: None,
            files: Vec::new(),
        })
    }

    /// Observe build progress instead of logging it.
    pub fn with_progress(mut self, observer: ProgressObserver) -> Self {
        self.on_progress = Some(observer);
        self
    }
}

impl std::fmt::Debug for DockerfileInitrd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DockerfileInitrd")
            .field("dockerfile", &self.dockerfile)
            .field("context_dir", &self.context_dir)
            .field("opts", &self.opts)
            .field("files", &self.files.len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Initrd for DockerfileInitrd {
    async fn build(&mut self) -> Result<PathBuf> {
        let staging = tempfile::TempDir::new()?;
        let request = BuildRequest {
            context_dir: self.context_dir.clone(),
            dockerfile: self.dockerfile.clone(),
            output_dir: staging.path().to_path_buf(),
            cache_dir: self.opts.cache_dir.clone(),
        };

        let (tx, mut rx) = mpsc::channel::<BuildProgress>(64);
        let observer = self.on_progress.clone();
        let drain = async move {
            while let Some(event) = rx.recv().await {
                match &observer {
                    Some(observe) => observe(&event),
                    None => tracing::debug!(message = %event.message, "Build progress"),
                }
            }
            Ok::<(), PackError>(())
        };

        tokio::try_join!(self.backend.solve(&request, tx), drain)?;

        let output = resolve_output(&mut self.opts)?;
        let target = output.clone();
        self.files = tokio::task::spawn_blocking(move || {
            let files = serialize_dir(staging.path(), &target);
            drop(staging);
            files
        })
        .await
        .map_err(|e| PackError::Other(format!("Initrd task failed: {}", e)))??;

        tracing::info!(
            dockerfile = %self.dockerfile.display(),
            output = %output.display(),
            files = self.files.len(),
            "Built initrd from Dockerfile"
        );
        Ok(output)
    }

    fn files(&self) -> &[String] {
        &self.files
    }
}
