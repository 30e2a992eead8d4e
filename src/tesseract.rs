use std::{
    io::{Cursor, Read, Write},
    path::PathBuf,
    process::{Child, Command, Stdio},
    thread,
    time::{Duration, Instant},
};

use image::{GrayImage, ImageFormat};
use tracing::instrument;

use crate::{RecognitionHints, Recognizer, RegionError};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Recognizer backed by the `tesseract` command line tool. The image is piped in as PNG and the
/// text read back from stdout.
#[derive(Debug, Clone)]
pub struct Tesseract {
    binary: PathBuf,
    language: Option<String>,
}

impl Default for Tesseract {
    fn default() -> Self {
        Self::new("tesseract")
    }
}

impl Tesseract {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            language: None,
        }
    }

    /// Language used when the hints don't name one.
    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    fn command(&self, hints: &RecognitionHints) -> Command {
        let mut command = Command::new(&self.binary);
        command
            .arg("stdin")
            .arg("stdout")
            .arg("--oem")
            .arg(hints.engine_mode.to_string())
            .arg("--psm")
            .arg(hints.page_seg_mode.as_psm().to_string());
        if let Some(language) = hints.language.as_ref().or(self.language.as_ref()) {
            command.arg("-l").arg(language);
        }
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        command
    }
}

impl Recognizer for Tesseract {
    #[instrument(level = "trace", skip(self, image))]
    fn recognize(&self, image: &GrayImage, hints: &RecognitionHints) -> Result<String, RegionError> {
        let mut png = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .map_err(|err| RegionError::Recognition(format!("failed to encode crop: {err}")))?;

        let mut child = self.command(hints).spawn().map_err(|err| {
            RegionError::Recognition(format!("failed to run {:?}: {err}", self.binary))
        })?;
        let started = Instant::now();

        // Every pipe gets its own thread, a child that stops reading or writing must not keep
        // us from reaching the deadline.
        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);
        let stdin = child.stdin.take().map(|mut stdin| {
            thread::spawn(move || {
                // Dropping the handle closes the pipe so the child sees EOF.
                stdin.write_all(&png)
            })
        });

        let status = wait(&mut child, hints.timeout, started)?;
        let sent = stdin
            .map(|handle| handle.join().unwrap_or(Ok(())))
            .unwrap_or(Ok(()));
        let stdout = stdout.map(join).unwrap_or_default();
        let stderr = stderr.map(join).unwrap_or_default();

        if !status.success() {
            return Err(RegionError::Recognition(format!(
                "tesseract exited with {status}: {}",
                stderr.trim()
            )));
        }
        sent.map_err(|err| {
            RegionError::Recognition(format!("failed to send crop to tesseract: {err}"))
        })?;
        Ok(stdout)
    }
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buffer = Vec::new();
        let _ = pipe.read_to_end(&mut buffer);
        String::from_utf8_lossy(&buffer).into_owned()
    })
}

fn join(handle: thread::JoinHandle<String>) -> String {
    handle.join().unwrap_or_default()
}

/// Waits for the child, killing it once `timeout` has passed since `started`. A kill is always
/// reported as [`RegionError::Timeout`], whatever happened to the pipes.
fn wait(
    child: &mut Child,
    timeout: Option<Duration>,
    started: Instant,
) -> Result<std::process::ExitStatus, RegionError> {
    let io_error = |err: std::io::Error| RegionError::Recognition(err.to_string());
    let Some(timeout) = timeout else {
        return child.wait().map_err(io_error);
    };

    let deadline = started + timeout;
    loop {
        if let Some(status) = child.try_wait().map_err(io_error)? {
            return Ok(status);
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            log::warn!("Killed tesseract after {timeout:?}");
            return Err(RegionError::Timeout(timeout));
        }
        thread::sleep(POLL_INTERVAL);
    }
}
