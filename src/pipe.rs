//! Lazily spawned external process bound to an anonymous pipe

use std::io::{ErrorKind, Read, Write};
use std::process::{Child, ChildStdin, ChildStdout, Stdio};
use tracing::{debug, warn};

use crate::error::{MediaError, Result};
use crate::ffmpeg::FfmpegCommand;

/// Which end of the child's stdio we hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// We read the child's stdout (decode).
    Read,
    /// We write the child's stdin (encode).
    Write,
}

enum Endpoint {
    Reader(ChildStdout),
    Writer(ChildStdin),
}

enum PipeState {
    Unopened,
    Open { child: Child, endpoint: Endpoint },
    Closed,
}

/// One external process, started on first use and torn down exactly once.
pub struct ProcessPipe {
    command: FfmpegCommand,
    direction: Direction,
    state: PipeState,
}

impl ProcessPipe {
    pub fn new(command: FfmpegCommand, direction: Direction) -> Self {
        Self {
            command,
            direction,
            state: PipeState::Unopened,
        }
    }

    pub fn command(&self) -> &FfmpegCommand {
        &self.command
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn is_started(&self) -> bool {
        matches!(self.state, PipeState::Open { .. })
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, PipeState::Closed)
    }

    /// Spawn the process if it has not been spawned yet.
    ///
    /// A pipe that was terminated (or failed to spawn) stays closed and
    /// returns [`MediaError::PipeClosed`].
    pub fn ensure_started(&mut self) -> Result<()> {
        match self.state {
            PipeState::Open { .. } => return Ok(()),
            PipeState::Closed => return Err(MediaError::PipeClosed),
            PipeState::Unopened => {}
        }

        let mut cmd = self.command.to_command();
        match self.direction {
            Direction::Read => cmd.stdin(Stdio::null()).stdout(Stdio::piped()),
            Direction::Write => cmd.stdin(Stdio::piped()).stdout(Stdio::null()),
        };

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(source) => {
                self.state = PipeState::Closed;
                return Err(MediaError::ProcessSpawn {
                    program: self.command.program().display().to_string(),
                    source,
                });
            }
        };

        let endpoint = match self.direction {
            Direction::Read => child.stdout.take().map(Endpoint::Reader),
            Direction::Write => child.stdin.take().map(Endpoint::Writer),
        };
        let Some(endpoint) = endpoint else {
            let _ = child.kill();
            let _ = child.wait();
            self.state = PipeState::Closed;
            return Err(MediaError::PipeClosed);
        };

        debug!("spawned pid {} for {:?} pipe", child.id(), self.direction);
        self.state = PipeState::Open { child, endpoint };
        Ok(())
    }

    /// Block until `buf` is full or the peer closes. Returns the bytes read.
    pub fn read_exact(&mut self, buf: &mut [u8]) -> usize {
        let PipeState::Open { endpoint: Endpoint::Reader(stdout), .. } = &mut self.state else {
            return 0;
        };

        let mut filled = 0;
        while filled < buf.len() {
            match stdout.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!("pipe read stopped: {}", e);
                    break;
                }
            }
        }
        filled
    }

    /// Block until all of `buf` has been handed to the peer.
    pub fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        match &mut self.state {
            PipeState::Open { endpoint: Endpoint::Writer(stdin), .. } => {
                stdin.write_all(buf)?;
                Ok(())
            }
            _ => Err(MediaError::PipeClosed),
        }
    }

    /// Close the pipe and reap the process. No-op once closed.
    ///
    /// A reader is killed first since it may still be producing output; a
    /// writer gets EOF on stdin and is waited for so it can finish the file.
    pub fn terminate(&mut self) {
        let PipeState::Open { mut child, endpoint } =
            std::mem::replace(&mut self.state, PipeState::Closed)
        else {
            return;
        };

        match endpoint {
            Endpoint::Reader(stdout) => {
                drop(stdout);
                let _ = child.kill();
            }
            Endpoint::Writer(stdin) => drop(stdin),
        }

        match child.wait() {
            Ok(status) => debug!("pid {} exited with {}", child.id(), status),
            Err(e) => warn!("failed to reap pid {}: {}", child.id(), e),
        }
    }
}

impl Drop for ProcessPipe {
    fn drop(&mut self) {
        self.terminate();
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> FfmpegCommand {
        FfmpegCommand::new("/bin/sh").args(["-c", script])
    }

    #[test]
    fn test_lazy_start() {
        let mut pipe = ProcessPipe::new(sh("printf abcdef"), Direction::Read);
        assert!(!pipe.is_started());
        assert!(!pipe.is_closed());

        pipe.ensure_started().unwrap();
        assert!(pipe.is_started());
        // idempotent
        pipe.ensure_started().unwrap();

        let mut buf = [0u8; 4];
        assert_eq!(pipe.read_exact(&mut buf), 4);
        assert_eq!(&buf, b"abcd");
        assert_eq!(pipe.read_exact(&mut buf), 2);
        assert_eq!(&buf[..2], b"ef");
        assert_eq!(pipe.read_exact(&mut buf), 0);
    }

    #[test]
    fn test_read_before_start_reads_nothing() {
        let mut pipe = ProcessPipe::new(sh("printf abc"), Direction::Read);
        let mut buf = [0u8; 3];
        assert_eq!(pipe.read_exact(&mut buf), 0);
        assert!(!pipe.is_started());
    }

    #[test]
    fn test_terminate_is_idempotent() {
        let mut pipe = ProcessPipe::new(sh("yes"), Direction::Read);
        pipe.ensure_started().unwrap();
        pipe.terminate();
        assert!(pipe.is_closed());
        pipe.terminate();
        assert!(matches!(pipe.ensure_started(), Err(MediaError::PipeClosed)));
    }

    #[test]
    fn test_terminate_unopened() {
        let mut pipe = ProcessPipe::new(sh("true"), Direction::Read);
        pipe.terminate();
        assert!(pipe.is_closed());
        assert!(matches!(pipe.ensure_started(), Err(MediaError::PipeClosed)));
    }

    #[test]
    fn test_write_pipe() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.bin");
        let mut pipe = ProcessPipe::new(
            sh(&format!("cat > '{}'", out.display())),
            Direction::Write,
        );
        assert!(matches!(pipe.write_all(b"early"), Err(MediaError::PipeClosed)));

        pipe.ensure_started().unwrap();
        pipe.write_all(b"hello ").unwrap();
        pipe.write_all(b"world").unwrap();
        pipe.terminate();

        assert_eq!(std::fs::read(&out).unwrap(), b"hello world");
    }

    #[test]
    fn test_spawn_failure_closes() {
        let mut pipe = ProcessPipe::new(FfmpegCommand::new("/nonexistent/ffmpeg-12345"), Direction::Read);
        assert!(matches!(pipe.ensure_started(), Err(MediaError::ProcessSpawn { .. })));
        assert!(pipe.is_closed());
        assert!(matches!(pipe.ensure_started(), Err(MediaError::PipeClosed)));
    }
}
