use std::net::{Ipv4Addr, TcpListener};
use std::path::Path;
use std::process::{Command, Output, Stdio};
use std::str;
use std::thread;
use std::time::{Duration, Instant};

/// CLI interface tests
#[cfg(test)]
mod cli_tests {
    use super::*;

    /// Runs the binary with an empty config directory so no user file leaks in.
    fn serbridge(args: &[&str]) -> Output {
        let config_home = tempfile::tempdir().expect("Failed to create temp dir");
        Command::new(env!("CARGO_BIN_EXE_serbridge"))
            .args(args)
            .env("XDG_CONFIG_HOME", config_home.path())
            .env_remove("RUST_LOG")
            .output()
            .expect("Failed to execute serbridge")
    }

    fn stderr(output: &Output) -> &str {
        str::from_utf8(&output.stderr).expect("Invalid UTF-8")
    }

    #[test]
    fn test_cli_help() {
        let output = serbridge(&["--help"]);
        assert!(output.status.success());

        let stdout = str::from_utf8(&output.stdout).expect("Invalid UTF-8");
        assert!(stdout.contains("Usage:"));
        assert!(stdout.contains("DEVICE"));
        for flag in ["--remote", "--port", "--max-connections", "--write-only", "--stty", "--link", "--daemon"] {
            assert!(stdout.contains(flag), "help lacks {}", flag);
        }
    }

    #[test]
    fn test_cli_version() {
        let output = serbridge(&["--version"]);
        assert!(output.status.success());
        let stdout = str::from_utf8(&output.stdout).expect("Invalid UTF-8");
        assert!(stdout.contains(env!("CARGO_PKG_VERSION")));
    }

    #[test]
    fn test_missing_device_is_config_error() {
        let output = serbridge(&[]);
        assert_eq!(output.status.code(), Some(1));
        assert!(stderr(&output).contains("No device given"));
    }

    #[test]
    fn test_invalid_flag_value_is_usage_error() {
        let output = serbridge(&["-m", "0", "/dev/null"]);
        assert_eq!(output.status.code(), Some(2));
        assert!(stderr(&output).contains("--max-connections"));
    }

    #[test]
    fn test_unopenable_device_exit_code() {
        let output = serbridge(&["/nonexistent/ttyS99"]);
        assert_eq!(output.status.code(), Some(2));
        assert!(stderr(&output).contains("/nonexistent/ttyS99"));
    }

    #[test]
    fn test_unresolvable_host_exit_code() {
        let output = serbridge(&["-r", "host.invalid", "/dev/null"]);
        assert_eq!(output.status.code(), Some(3));
    }

    #[test]
    fn test_port_in_use_exit_code() {
        let occupied = TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0)).expect("Failed to bind");
        let port = occupied.local_addr().unwrap().port().to_string();

        let output = serbridge(&["-p", &port, "/dev/null"]);
        assert_eq!(output.status.code(), Some(5));
        assert!(stderr(&output).contains(&port));
    }

    #[test]
    fn test_config_file_supplies_device() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("bridge.toml");
        std::fs::write(&path, "device = \"/nonexistent/ttyFromFile\"\n").unwrap();

        let output = serbridge(&["--config", path.to_str().unwrap()]);
        assert_eq!(output.status.code(), Some(2));
        assert!(stderr(&output).contains("ttyFromFile"));
    }

    #[test]
    fn test_unknown_link_owner_is_logged() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let link = dir.path().join("link");

        let output = serbridge(&[
            "-u", "no-such-user-serbridge", "-l", link.to_str().unwrap(), "/nonexistent/ttyS97",
        ]);
        assert_eq!(output.status.code(), Some(2));
        assert!(stderr(&output).contains("Error finding user 'no-such-user-serbridge'"));
    }

    #[test]
    fn test_daemon_reports_startup_failure_before_detaching() {
        let output = serbridge(&["-d", "/nonexistent/ttyS98"]);
        assert_eq!(output.status.code(), Some(2));
        assert!(stderr(&output).contains("/nonexistent/ttyS98"));
    }

    fn wait_until(deadline: Duration, mut done: impl FnMut() -> bool) -> bool {
        let started = Instant::now();
        while started.elapsed() < deadline {
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(20));
        }
        done()
    }

    #[test]
    fn test_sigterm_removes_link_and_exits_cleanly() {
        if !Path::new("/dev/ptmx").exists() {
            return;
        }
        let config_home = tempfile::tempdir().expect("Failed to create temp dir");
        let link = config_home.path().join("ttyBRIDGE0");

        let mut child = Command::new(env!("CARGO_BIN_EXE_serbridge"))
            .args(["-p", "0", "-l", link.to_str().unwrap(), "/dev/ptmx"])
            .env("XDG_CONFIG_HOME", config_home.path())
            .env_remove("RUST_LOG")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("Failed to spawn serbridge");

        let published = wait_until(Duration::from_secs(5), || link.symlink_metadata().is_ok());
        if !published {
            let _ = child.kill();
            let _ = child.wait();
            panic!("pty link never appeared");
        }
        // Signal handlers are installed right after the link is published.
        thread::sleep(Duration::from_millis(200));

        let rc = unsafe { libc::kill(child.id() as libc::pid_t, libc::SIGTERM) };
        assert_eq!(rc, 0);

        let mut status = None;
        wait_until(Duration::from_secs(5), || {
            status = child.try_wait().expect("Failed to poll serbridge");
            status.is_some()
        });
        let Some(status) = status else {
            let _ = child.kill();
            let _ = child.wait();
            panic!("serbridge ignored SIGTERM");
        };

        assert_eq!(status.code(), Some(0));
        assert!(link.symlink_metadata().is_err());
    }
}
