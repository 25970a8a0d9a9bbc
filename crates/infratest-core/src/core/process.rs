#![deny(clippy::all, warnings)]

use std::{
    io::Read,
    path::Path,
    process::{Command, Stdio},
    thread,
};

use anyhow::{Context, Result};

pub(crate) const DEFAULT_MAX_CAPTURE_BYTES: usize = 1024 * 1024;

const TRUNCATION_MARKER: &str = "\n[...truncated...]\n";

#[derive(Debug, Clone)]
pub struct RunOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl RunOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Execute a program in `cwd` and capture stdout/stderr, keeping at most
/// `limit` trailing bytes of each stream.
///
/// # Errors
///
/// Returns an error when the program cannot be spawned or the I/O streams cannot
/// be read entirely.
pub(crate) fn run_command(
    program: &str,
    args: &[String],
    envs: &[(String, String)],
    cwd: &Path,
    limit: usize,
) -> Result<RunOutput> {
    let mut command = Command::new(program);
    command.args(args);
    for (key, value) in envs {
        if value.is_empty() {
            command.env_remove(key);
            continue;
        }
        command.env(key, value);
    }
    command.current_dir(cwd);
    command.stdin(Stdio::null());
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());

    let mut child = command
        .spawn()
        .with_context(|| format!("failed to start {program}"))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow::anyhow!("stdout missing for {program}"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow::anyhow!("stderr missing for {program}"))?;
    let stdout_handle = thread::spawn(move || read_to_string_limited(stdout, limit));
    let stderr_handle = thread::spawn(move || read_to_string_limited(stderr, limit));

    let status = child
        .wait()
        .with_context(|| format!("failed to wait for {program}"))?;
    let code = status.code().unwrap_or(-1);
    let (mut stdout, stdout_truncated) = stdout_handle
        .join()
        .map_err(|_| anyhow::anyhow!("stdout thread panicked"))??;
    let (mut stderr, stderr_truncated) = stderr_handle
        .join()
        .map_err(|_| anyhow::anyhow!("stderr thread panicked"))??;
    if stdout_truncated {
        stdout.push_str(TRUNCATION_MARKER);
    }
    if stderr_truncated {
        stderr.push_str(TRUNCATION_MARKER);
    }
    Ok(RunOutput {
        code,
        stdout,
        stderr,
    })
}

fn read_to_string_limited(mut reader: impl Read, limit: usize) -> Result<(String, bool)> {
    let mut buffer = Vec::new();
    let mut truncated = false;
    let mut chunk = [0u8; 8192];
    loop {
        let read = reader.read(&mut chunk)?;
        if read == 0 {
            break;
        }
        append_limited(&mut buffer, &chunk[..read], limit, &mut truncated);
    }
    Ok((String::from_utf8_lossy(&buffer).to_string(), truncated))
}

// Keeps the tail: tool errors are printed last.
fn append_limited(buffer: &mut Vec<u8>, chunk: &[u8], limit: usize, truncated: &mut bool) {
    if limit == 0 {
        return;
    }
    if buffer.len().saturating_add(chunk.len()) <= limit {
        buffer.extend_from_slice(chunk);
        return;
    }
    *truncated = true;
    let old_len = buffer.len();
    let excess = old_len.saturating_add(chunk.len()).saturating_sub(limit);
    if excess >= old_len {
        buffer.clear();
        let drop_from_chunk = excess.saturating_sub(old_len).min(chunk.len());
        buffer.extend_from_slice(&chunk[drop_from_chunk..]);
    } else {
        buffer.drain(0..excess);
        buffer.extend_from_slice(chunk);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[cfg(unix)]
    #[test]
    fn run_command_captures_output_and_status_unix() -> Result<()> {
        let output = run_command(
            "/bin/sh",
            &[
                "-c".to_string(),
                "printf out && printf err >&2; exit 7".to_string(),
            ],
            &[],
            Path::new("."),
            DEFAULT_MAX_CAPTURE_BYTES,
        )?;
        assert_eq!(output.code, 7);
        assert!(!output.success());
        assert_eq!(output.stdout, "out");
        assert_eq!(output.stderr, "err");
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn run_command_truncates_large_output_unix() -> Result<()> {
        let limit = 4096;
        let output = run_command(
            "/bin/sh",
            &[
                "-c".to_string(),
                format!("head -c {} /dev/zero | tr '\\\\0' a", limit * 4),
            ],
            &[],
            Path::new("."),
            limit,
        )?;
        assert!(
            output.stdout.contains("[...truncated...]"),
            "stdout should include truncation marker"
        );
        assert!(
            output.stdout.len() <= limit + TRUNCATION_MARKER.len(),
            "stdout should be bounded"
        );
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn run_command_removes_vars_set_to_empty() -> Result<()> {
        let script = r#"if [ -z "${TF_CLI_ARGS+x}" ]; then echo missing; else echo present; fi"#;
        let output = run_command(
            "/bin/sh",
            &["-c".to_string(), script.to_string()],
            &[("TF_CLI_ARGS".into(), String::new())],
            Path::new("."),
            DEFAULT_MAX_CAPTURE_BYTES,
        )?;
        assert_eq!(output.stdout.trim(), "missing");
        Ok(())
    }

    #[test]
    fn missing_program_is_an_error() {
        let err = run_command(
            "infratest-definitely-not-a-real-binary",
            &[],
            &[],
            Path::new("."),
            DEFAULT_MAX_CAPTURE_BYTES,
        )
        .unwrap_err();
        assert!(err.to_string().contains("failed to start"));
    }

    #[test]
    fn append_limited_keeps_tail() {
        let mut buffer = Vec::new();
        let mut truncated = false;
        append_limited(&mut buffer, b"abcdef", 4, &mut truncated);
        assert!(truncated);
        assert_eq!(buffer, b"cdef");
        append_limited(&mut buffer, b"gh", 4, &mut truncated);
        assert_eq!(buffer, b"efgh");
    }
}
