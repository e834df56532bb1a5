//! External PIFF decrypter.
//!
//! Sample decryption is delegated to Bento4's `mp4decrypt`. This module only
//! builds its command line and runs it:
//!
//! ```text
//! mp4decrypt --show-progress --key 1:<KEY> [--key 2:<KEY> ...] <input> <output>
//! ```
//!
//! One `--key` is passed per encrypted media file in the asset, all carrying
//! the same content key, so every track id of a single-key asset resolves.
use std::ffi::OsString;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::key::ContentKey;
use crate::utils::get_binary_path;

/// Executable names searched on `PATH` when no tool path is configured.
pub const DEFAULT_EXECUTABLES: &[&str] = &["mp4decrypt"];

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Invocation settings for the decrypt tool.
#[derive(Debug, Clone)]
pub struct Decrypter {
    program: PathBuf,
    leading_args: Vec<OsString>,
    timeout: Option<Duration>,
}

impl Decrypter {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
            timeout: None,
        }
    }

    /// Find `mp4decrypt` on `PATH`.
    pub fn locate() -> Result<Self> {
        get_binary_path(DEFAULT_EXECUTABLES)
            .map(Self::new)
            .ok_or_else(|| Error::Config("mp4decrypt executable not found in PATH".to_string()))
    }

    /// Arguments inserted before `--show-progress`, e.g. a wrapper script path.
    #[must_use]
    pub fn with_leading_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.leading_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Bound how long a single invocation may run. `None` waits forever.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Contract arguments for decrypting `input` into `output`.
    ///
    /// `track_count` is the number of encrypted media files in the asset;
    /// track ids `1..=track_count` all map to `key`.
    pub fn arguments(
        key: &ContentKey,
        track_count: usize,
        input: &Path,
        output: &Path,
    ) -> Vec<OsString> {
        let key_hex = key.to_hex();
        let mut args = Vec::with_capacity(3 + track_count * 2);
        args.push(OsString::from("--show-progress"));
        for track in 1..=track_count {
            args.push(OsString::from("--key"));
            args.push(OsString::from(format!("{}:{}", track, key_hex)));
        }
        args.push(input.as_os_str().to_os_string());
        args.push(output.as_os_str().to_os_string());
        args
    }

    /// Full command for one file, not yet spawned.
    pub fn command(
        &self,
        key: &ContentKey,
        track_count: usize,
        input: &Path,
        output: &Path,
    ) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.leading_args)
            .args(Self::arguments(key, track_count, input, output));
        command
    }

    /// Run the tool and block until it exits.
    ///
    /// Returns the captured standard output. A non-zero exit is reported as
    /// [`Error::ExternalToolExit`]; when a timeout is configured and expires
    /// the child is killed and [`Error::ExternalToolTimeout`] is returned.
    pub fn decrypt(
        &self,
        key: &ContentKey,
        track_count: usize,
        input: &Path,
        output: &Path,
    ) -> Result<String> {
        debug!(
            "Running {} with {} key(s) on {}",
            self.program.display(),
            track_count,
            input.display()
        );

        let mut child = self
            .command(key, track_count, input, output)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|source| self.launch_error(source))?;

        // drained concurrently so a chatty tool can't block on a full pipe
        let stdout = child.stdout.take();
        let reader = thread::spawn(move || {
            let mut buf = Vec::new();
            if let Some(mut stdout) = stdout {
                let _ = stdout.read_to_end(&mut buf);
            }
            buf
        });

        let status = match self.wait(&mut child) {
            // a grandchild may still hold the pipe open, so the reader is
            // left detached instead of joined
            Err(e @ Error::ExternalToolTimeout { .. }) => return Err(e),
            other => other,
        };
        let captured = reader.join().unwrap_or_default();
        let stdout = String::from_utf8_lossy(&captured).into_owned();

        let status = status?;
        if !status.success() {
            return Err(Error::ExternalToolExit {
                program: self.program.clone(),
                code: status.code(),
                stdout,
            });
        }
        Ok(stdout)
    }

    fn wait(&self, child: &mut Child) -> Result<ExitStatus> {
        let Some(timeout) = self.timeout else {
            return child.wait().map_err(|source| self.launch_error(source));
        };

        let deadline = Instant::now() + timeout;
        loop {
            if let Some(status) = child.try_wait().map_err(|source| self.launch_error(source))? {
                return Ok(status);
            }
            if Instant::now() >= deadline {
                warn!(
                    "{} still running after {:?}, killing it",
                    self.program.display(),
                    timeout
                );
                let _ = child.kill();
                let _ = child.wait();
                return Err(Error::ExternalToolTimeout {
                    program: self.program.clone(),
                    timeout,
                });
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    fn launch_error(&self, source: std::io::Error) -> Error {
        Error::ExternalToolLaunch {
            program: self.program.clone(),
            source,
        }
    }
}
