//! FFmpeg command wrapper utilities

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FfmpegError {
    #[error("{0} not found in system PATH")]
    NotInstalled(String),

    #[error("FFmpeg execution failed: {0}")]
    ExecutionFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Locations of the external tools plus the log level handed to ffmpeg.
///
/// `Default` honours `FRAMEPIPE_FFMPEG`, `FRAMEPIPE_FFPROBE` and
/// `FRAMEPIPE_LOGLEVEL`, falling back to the binaries on `PATH`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Toolchain {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
    pub loglevel: String,
}

impl Toolchain {
    pub fn from_env() -> Self {
        let var = |key: &str| std::env::var(key).ok().filter(|v| !v.is_empty());
        Self {
            ffmpeg: var("FRAMEPIPE_FFMPEG").unwrap_or_else(|| "ffmpeg".to_string()).into(),
            ffprobe: var("FRAMEPIPE_FFPROBE").unwrap_or_else(|| "ffprobe".to_string()).into(),
            loglevel: var("FRAMEPIPE_LOGLEVEL").unwrap_or_else(|| "warning".to_string()),
        }
    }

    /// Same toolchain with a different ffmpeg binary.
    pub fn with_ffmpeg(mut self, path: impl Into<PathBuf>) -> Self {
        self.ffmpeg = path.into();
        self
    }

    pub fn with_ffprobe(mut self, path: impl Into<PathBuf>) -> Self {
        self.ffprobe = path.into();
        self
    }

    pub fn ffmpeg_command(&self) -> FfmpegCommand {
        FfmpegCommand::new(&self.ffmpeg)
    }

    pub fn ffprobe_command(&self) -> FfmpegCommand {
        FfmpegCommand::new(&self.ffprobe)
    }

    pub fn ffmpeg_available(&self) -> bool {
        is_installed(&self.ffmpeg)
    }

    pub fn ffprobe_available(&self) -> bool {
        is_installed(&self.ffprobe)
    }
}

impl Default for Toolchain {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Argument list for one invocation of an external tool.
///
/// Built once, then either run to completion (`execute`, `capture`) or handed
/// to a [`crate::ProcessPipe`] that spawns it lazily.
#[derive(Debug, Clone, PartialEq)]
pub struct FfmpegCommand {
    program: PathBuf,
    args: Vec<String>,
}

impl FfmpegCommand {
    pub fn new(program: impl AsRef<Path>) -> Self {
        Self {
            program: program.as_ref().to_path_buf(),
            args: Vec::new(),
        }
    }

    pub fn input(mut self, source: &str) -> Self {
        self.args.push("-i".to_string());
        self.args.push(source.to_string());
        self
    }

    pub fn output(mut self, target: &str) -> Self {
        self.args.push(target.to_string());
        self
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Adds `flag value` only when `value` is non-empty.
    pub fn opt(self, flag: &str, value: &str) -> Self {
        if value.is_empty() {
            self
        } else {
            self.arg(flag).arg(value)
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    /// True if `window` appears as a contiguous run of arguments.
    pub fn contains(&self, window: &[&str]) -> bool {
        if window.is_empty() {
            return true;
        }
        self.args
            .windows(window.len())
            .any(|w| w.iter().zip(window).all(|(a, b)| a == b))
    }

    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd
    }

    /// Run to completion, failing on a non-zero exit status.
    pub fn execute(&self) -> Result<Output, FfmpegError> {
        let output = self
            .to_command()
            .stdin(Stdio::null())
            .output()
            .map_err(|e| self.spawn_error(e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FfmpegError::ExecutionFailed(stderr.trim().to_string()));
        }

        Ok(output)
    }

    /// Run to completion and return stdout followed by stderr, whatever the exit status.
    pub fn capture(&self) -> Result<String, FfmpegError> {
        let output = self
            .to_command()
            .stdin(Stdio::null())
            .output()
            .map_err(|e| self.spawn_error(e))?;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(text)
    }

    fn spawn_error(&self, e: std::io::Error) -> FfmpegError {
        if e.kind() == std::io::ErrorKind::NotFound {
            FfmpegError::NotInstalled(self.program.display().to_string())
        } else {
            FfmpegError::Io(e)
        }
    }
}

impl fmt::Display for FfmpegCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " \"{}\"", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

fn is_installed(program: &Path) -> bool {
    Command::new(program)
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok()
}
