//! External document converter (office deck → PDF)
//!
//! Conversion is delegated to an office suite running headless. The
//! converter is a black box: it either leaves `<out_dir>/<stem>.pdf` behind
//! or it failed.

use std::ffi::OsString;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::error::{Error, Result};

/// Default converter program
pub const DEFAULT_CONVERTER: &str = "libreoffice";

/// Default time the converter may run before it is killed
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long to keep collecting stderr once the converter has exited
const STDERR_GRACE: Duration = Duration::from_secs(2);

/// Runs an external office converter as a subprocess
#[derive(Debug, Clone)]
pub struct Converter {
    /// Program to run (looked up on `PATH` when not absolute)
    pub program: OsString,
    /// Kill the converter after this long; `None` waits forever
    pub timeout: Option<Duration>,
}

impl Default for Converter {
    fn default() -> Self {
        Self {
            program: DEFAULT_CONVERTER.into(),
            timeout: Some(DEFAULT_TIMEOUT),
        }
    }
}

impl Converter {
    pub fn new(program: impl Into<OsString>, timeout: Option<Duration>) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    /// Convert `source` to PDF inside `out_dir`, returning the produced file
    pub fn convert(&self, source: &Path, out_dir: &Path) -> Result<PathBuf> {
        if !source.is_file() {
            return Err(Error::Input(format!("source file not found: {}", source.display())));
        }
        let stem = source
            .file_stem()
            .ok_or_else(|| Error::Input(format!("source has no file name: {}", source.display())))?;
        let mut file_name = stem.to_os_string();
        file_name.push(".pdf");
        let expected = out_dir.join(file_name);

        info!(
            "Converting {} with {}",
            source.display(),
            Path::new(&self.program).display()
        );

        let mut command = Command::new(&self.program);
        command
            .arg("--headless")
            .arg("--convert-to")
            .arg("pdf")
            .arg("--outdir")
            .arg(out_dir)
            .arg(source)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        // Own process group, so a timeout also reaches helpers the converter spawns
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let mut child = command
            .spawn()
            .map_err(|e| {
                Error::Conversion(format!(
                    "cannot start {}: {}",
                    Path::new(&self.program).display(),
                    e
                ))
            })?;

        // Drain stderr on its own thread so a chatty converter cannot block on a full pipe.
        // Helpers that inherited the pipe may hold it open, so the result is
        // collected with a deadline instead of joining the thread.
        let (stderr_tx, stderr_rx) = mpsc::channel();
        if let Some(mut stderr) = child.stderr.take() {
            thread::spawn(move || {
                let mut buf = String::new();
                let _ = stderr.read_to_string(&mut buf);
                let _ = stderr_tx.send(buf);
            });
        }

        let status = self.wait(&mut child)?;
        let stderr = stderr_rx.recv_timeout(STDERR_GRACE).unwrap_or_default();

        if !status.success() {
            return Err(Error::Conversion(format!(
                "converter exited with {}: {}",
                status,
                stderr.trim()
            )));
        }

        if !expected.is_file() {
            return Err(Error::Conversion(format!(
                "converter produced no output at {}{}",
                expected.display(),
                if stderr.trim().is_empty() {
                    String::new()
                } else {
                    format!(": {}", stderr.trim())
                }
            )));
        }

        debug!("Converter wrote {}", expected.display());
        Ok(expected)
    }

    fn wait(&self, child: &mut Child) -> Result<ExitStatus> {
        let Some(timeout) = self.timeout else {
            return child
                .wait()
                .map_err(|e| Error::Conversion(format!("waiting for converter failed: {}", e)));
        };

        let started = Instant::now();
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(status),
                Ok(None) => {}
                Err(e) => {
                    return Err(Error::Conversion(format!("waiting for converter failed: {}", e)))
                }
            }

            if started.elapsed() >= timeout {
                warn!("Converter exceeded {}s, killing it", timeout.as_secs());
                kill_process_group(child);
                let _ = child.kill();
                let _ = child.wait();
                return Err(Error::Conversion(format!(
                    "converter timed out after {}s",
                    timeout.as_secs()
                )));
            }

            thread::sleep(POLL_INTERVAL);
        }
    }
}

/// Kill every process in the child's group (the child leads it)
#[cfg(unix)]
fn kill_process_group(child: &Child) {
    let Ok(pgid) = libc::pid_t::try_from(child.id()) else {
        return;
    };
    // SAFETY: kill(2) with a negative pid only signals that process group
    unsafe {
        libc::kill(-pgid, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_process_group(_child: &Child) {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let converter = Converter::default();
        assert_eq!(converter.program, OsString::from("libreoffice"));
        assert_eq!(converter.timeout, Some(Duration::from_secs(300)));
    }

    #[test]
    fn test_missing_source_is_input_error() {
        let dir = TempDir::new().unwrap();
        let result = Converter::default().convert(&dir.path().join("deck.pptx"), dir.path());
        assert!(matches!(result, Err(Error::Input(_))));
    }

    #[test]
    fn test_missing_program_is_conversion_error() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("deck.pptx");
        fs::write(&source, b"not really a deck").unwrap();

        let converter = Converter::new("slide-watermark-no-such-converter", Some(Duration::from_secs(5)));
        let result = converter.convert(&source, dir.path());
        assert!(matches!(result, Err(Error::Conversion(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_success_without_output_is_conversion_error() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("deck.pptx");
        fs::write(&source, b"deck").unwrap();

        // `true` ignores its arguments and exits 0 without writing anything
        let converter = Converter::new("true", Some(Duration::from_secs(5)));
        match converter.convert(&source, dir.path()) {
            Err(Error::Conversion(msg)) => assert!(msg.contains("no output"), "{}", msg),
            other => panic!("expected Conversion error, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_timeout_kills_spawned_helpers() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let source = dir.path().join("deck.pptx");
        fs::write(&source, b"deck").unwrap();

        // A wrapper that leaves a helper holding stderr, like soffice does
        let script = dir.path().join("slow-converter.sh");
        fs::write(&script, "#!/bin/sh\nsleep 30 &\nsleep 60\n").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

        let converter = Converter::new(script.as_os_str(), Some(Duration::from_secs(1)));
        let started = Instant::now();
        let result = converter.convert(&source, dir.path());

        match result {
            Err(Error::Conversion(msg)) => assert!(msg.contains("timed out"), "{}", msg),
            other => panic!("expected Conversion error, got {:?}", other),
        }
        assert!(
            started.elapsed() < Duration::from_secs(15),
            "convert returned after {:?}",
            started.elapsed()
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_non_zero_exit_is_conversion_error() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("deck.pptx");
        fs::write(&source, b"deck").unwrap();

        let converter = Converter::new("false", None);
        match converter.convert(&source, dir.path()) {
            Err(Error::Conversion(msg)) => assert!(msg.contains("exited"), "{}", msg),
            other => panic!("expected Conversion error, got {:?}", other),
        }
    }
}
