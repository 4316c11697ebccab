use std::process::{Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::RwLock;
use std::time::Duration;

use anyhow::{bail, format_err, Error};
use lazy_static::lazy_static;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

use convoy_api_types::volume_bail;

/// Bound for external helpers when nothing else is configured.
pub const DEFAULT_CMD_TIMEOUT: Duration = Duration::from_secs(5 * 60);

const NSENTER_BINARY: &str = "nsenter";

lazy_static! {
    static ref CMD_TIMEOUT: RwLock<Duration> = RwLock::new(DEFAULT_CMD_TIMEOUT);
    static ref MOUNT_NAMESPACE_FD: RwLock<Option<String>> = RwLock::new(None);
}

/// Parse a timeout like `90`, `30s`, `5m` or `1h`.
pub fn parse_timeout(value: &str) -> Result<Duration, Error> {
    let value = value.trim();
    let (number, unit) = match value.chars().last() {
        Some('s') => (&value[..value.len() - 1], 1),
        Some('m') => (&value[..value.len() - 1], 60),
        Some('h') => (&value[..value.len() - 1], 3600),
        _ => (value, 1),
    };
    let number: u64 = number
        .parse()
        .map_err(|err| format_err!("invalid timeout {:?} - {}", value, err))?;
    if number == 0 {
        bail!("invalid timeout {:?} - must be positive", value);
    }
    match number.checked_mul(unit) {
        Some(secs) => Ok(Duration::from_secs(secs)),
        None => bail!("invalid timeout {:?} - value too large", value),
    }
}

/// Set the process wide timeout for [execute]. An empty value keeps the default.
pub fn init_command_timeout(value: &str) -> Result<Duration, Error> {
    let timeout = if value.is_empty() {
        DEFAULT_CMD_TIMEOUT
    } else {
        parse_timeout(value)?
    };
    *CMD_TIMEOUT.write().unwrap() = timeout;
    log::debug!("external command timeout set to {:?}", timeout);
    Ok(timeout)
}

/// Run helpers inside the mount namespace referred to by `fd` (a path like
/// `/proc/1/ns/mnt`). An empty value disables namespace switching.
pub fn init_mount_namespace(fd: &str) -> Result<(), Error> {
    let value = if fd.is_empty() {
        None
    } else {
        std::fs::metadata(fd)
            .map_err(|err| format_err!("cannot find mount namespace fd {:?} - {}", fd, err))?;
        Some(fd.to_string())
    };
    *MOUNT_NAMESPACE_FD.write().unwrap() = value;
    Ok(())
}

/// Turn the output of a finished helper into its stdout.
///
/// A non zero exit status becomes an error carrying the trimmed stderr.
fn checked_output(output: std::process::Output) -> Result<String, Error> {
    if !output.status.success() {
        let code = match output.status.code() {
            Some(code) => code,
            None => bail!("terminated by signal"),
        };
        let msg = match String::from_utf8(output.stderr) {
            Ok(msg) if msg.trim_end().is_empty() => String::from("no error message"),
            Ok(msg) => msg.trim_end().to_string(),
            Err(_) => String::from("non utf8 error message (suppressed)"),
        };
        bail!("status code: {} - {}", code, msg);
    }

    String::from_utf8(output.stdout).map_err(|err| format_err!("got non utf8 output - {}", err))
}

/// Run `command` and kill it once `timeout` expires.
///
/// The child is waited for by a supervisor thread, which reports back over a
/// channel. If the deadline passes first the child gets SIGKILL and a
/// `Timeout` error is returned.
pub fn run_command_timeout(mut command: Command, timeout: Duration) -> Result<String, Error> {
    let description = format!("{:?}", command);

    let child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| format_err!("failed to execute {} - {}", description, err))?;
    let pid = Pid::from_raw(child.id() as i32);

    let (sender, receiver) = mpsc::channel();
    std::thread::spawn(move || {
        let _ = sender.send(child.wait_with_output());
    });

    let output = match receiver.recv_timeout(timeout) {
        Ok(output) => output.map_err(|err| format_err!("{} failed - {}", description, err))?,
        Err(RecvTimeoutError::Timeout) => {
            log::warn!("{} exceeded timeout of {:?}, killing it", description, timeout);
            if let Err(err) = kill(pid, Signal::SIGKILL) {
                log::warn!("unable to kill {} - {}", description, err);
            }
            let _ = receiver.recv_timeout(Duration::from_secs(5));
            volume_bail!(Timeout, "{} timed out after {:?}", description, timeout);
        }
        Err(RecvTimeoutError::Disconnected) => {
            bail!("lost supervisor of {}", description);
        }
    };

    checked_output(output)
        .map_err(|err| format_err!("command {} failed - {}", description, err))
}

/// Execute a helper binary with the configured timeout, inside the configured
/// mount namespace if there is one.
pub fn execute(binary: &str, args: &[&str]) -> Result<String, Error> {
    let timeout = *CMD_TIMEOUT.read().unwrap();
    let namespace = MOUNT_NAMESPACE_FD.read().unwrap().clone();

    let command = match namespace {
        Some(fd) => {
            let mut command = Command::new(NSENTER_BINARY);
            command.arg(format!("--mount={}", fd)).arg(binary).args(args);
            command
        }
        None => {
            let mut command = Command::new(binary);
            command.args(args);
            command
        }
    };

    log::debug!("execute {:?}", command);
    run_command_timeout(command, timeout)
}

#[cfg(test)]
mod test {
    use super::*;
    use convoy_api_types::{error_kind, ErrorKind};

    #[test]
    fn test_parse_timeout() {
        assert_eq!(parse_timeout("90").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_timeout("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_timeout("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_timeout("1h").unwrap(), Duration::from_secs(3600));
        assert!(parse_timeout("0").is_err());
        assert!(parse_timeout("soon").is_err());
        let err = parse_timeout(&format!("{}h", u64::MAX / 60)).unwrap_err();
        assert!(err.to_string().contains("too large"));
    }

    #[test]
    fn test_run_command_timeout() {
        let mut command = Command::new("sh");
        command.args(["-c", "echo hello"]);
        let output = run_command_timeout(command, Duration::from_secs(10)).unwrap();
        assert_eq!(output, "hello\n");

        let mut command = Command::new("sh");
        command.args(["-c", "echo oops >&2; exit 3"]);
        let err = run_command_timeout(command, Duration::from_secs(10)).unwrap_err();
        assert!(err.to_string().contains("status code: 3 - oops"));

        let mut command = Command::new("sh");
        command.args(["-c", "exit 1"]);
        let err = run_command_timeout(command, Duration::from_secs(10)).unwrap_err();
        assert!(err.to_string().contains("status code: 1 - no error message"));

        let mut command = Command::new("sleep");
        command.arg("30");
        let start = std::time::Instant::now();
        let err = run_command_timeout(command, Duration::from_millis(200)).unwrap_err();
        assert_eq!(error_kind(&err), Some(ErrorKind::Timeout));
        assert!(start.elapsed() < Duration::from_secs(10));
    }
}
