use crate::domain::config::ConfigFile;
use clap::Parser;
use std::path::PathBuf;

/// Command line arguments for serbridge
///
/// Every flag overrides the matching key of the configuration file.
#[derive(Parser, Debug, Default)]
#[command(
    name = "serbridge",
    version = env!("CARGO_PKG_VERSION"),
    about = "Bridge a serial port or pseudo-terminal to TCP",
    long_about = "Shares one character device (serial port or pty master) with TCP peers. \
                  In server mode peers connect to us; with --remote we keep one outbound \
                  connection alive instead."
)]
pub struct Args {
    /// Connect to this machine instead of listening
    #[arg(short, long, value_name = "HOST")]
    pub remote: Option<String>,

    /// TCP port to listen on or connect to [default: 23000]
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Maximum simultaneous peers in server mode [default: 1]
    #[arg(short, long, value_parser = clap::value_parser!(u32).range(1..))]
    pub max_connections: Option<u32>,

    /// Only write to the device, never read from it
    #[arg(short, long)]
    pub write_only: bool,

    /// Log detail: 0 normal, 1 debug, 2 trace
    #[arg(short = 'x', long, value_name = "LEVEL", value_parser = clap::value_parser!(u8).range(0..=2))]
    pub debug: Option<u8>,

    /// Serial settings, stty style (e.g. "9600 cs8 raw")
    #[arg(short, long, value_name = "SETTINGS")]
    pub stty: Option<String>,

    /// Publish the pty slave under this path
    #[arg(short, long, value_name = "PATH")]
    pub link: Option<PathBuf>,

    /// Owner given to the pty slave [default: pi]
    #[arg(short, long)]
    pub user: Option<String>,

    /// Group given to the pty slave [default: dialout]
    #[arg(short, long)]
    pub group: Option<String>,

    /// Permission bits given to the pty slave, in octal [default: 0660]
    #[arg(long, value_name = "OCTAL", value_parser = parse_octal_mode)]
    pub link_mode: Option<u32>,

    /// Detach from the controlling terminal
    #[arg(short, long)]
    pub daemon: bool,

    /// Append logs to this file instead of stderr
    #[arg(long, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Configuration file path
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Seconds between outbound connection attempts [default: 10]
    #[arg(long, value_name = "SECS")]
    pub reconnect_delay_secs: Option<u64>,

    /// Seconds between device re-open attempts [default: 1]
    #[arg(long, value_name = "SECS")]
    pub reopen_delay_secs: Option<u64>,

    /// Serial port or pty master to bridge
    #[arg(value_name = "DEVICE")]
    pub device: Option<PathBuf>,
}

impl Args {
    /// Overlays the flags that were given onto `file`.
    pub fn apply_to(&self, file: &mut ConfigFile) {
        if let Some(device) = &self.device {
            file.device = Some(device.clone());
        }
        if let Some(remote) = &self.remote {
            file.remote = Some(remote.clone());
        }
        if let Some(port) = self.port {
            file.port = port;
        }
        if let Some(max) = self.max_connections {
            file.max_connections = max as usize;
        }
        if self.write_only {
            file.write_only = true;
        }
        if let Some(debug) = self.debug {
            file.debug = debug;
        }
        if let Some(stty) = &self.stty {
            file.stty = Some(stty.clone());
        }
        if let Some(link) = &self.link {
            file.link = Some(link.clone());
        }
        if let Some(user) = &self.user {
            file.user = user.clone();
        }
        if let Some(group) = &self.group {
            file.group = group.clone();
        }
        if let Some(mode) = self.link_mode {
            file.link_mode = mode;
        }
        if self.daemon {
            file.daemon = true;
        }
        if let Some(log_file) = &self.log_file {
            file.log_file = Some(log_file.clone());
        }
        if let Some(secs) = self.reconnect_delay_secs {
            file.reconnect_delay_secs = secs;
        }
        if let Some(secs) = self.reopen_delay_secs {
            file.reopen_delay_secs = secs;
        }
    }
}

fn parse_octal_mode(value: &str) -> Result<u32, String> {
    let digits = value.strip_prefix("0o").unwrap_or(value);
    let mode = u32::from_str_radix(digits, 8).map_err(|e| format!("not an octal mode: {}", e))?;
    if mode > 0o7777 {
        return Err(format!("{:o} is not a permission mode", mode));
    }
    Ok(mode)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> Result<Args, clap::Error> {
        Args::try_parse_from(std::iter::once("serbridge").chain(argv.iter().copied()))
    }

    #[test]
    fn test_classic_server_invocation() {
        let args = parse(&["-p", "23000", "-s", "9600 raw", "/dev/ttyS0"]).unwrap();
        assert_eq!(args.port, Some(23000));
        assert_eq!(args.stty.as_deref(), Some("9600 raw"));
        assert_eq!(args.device, Some(PathBuf::from("/dev/ttyS0")));
        assert!(args.remote.is_none());
    }

    #[test]
    fn test_client_invocation_with_link() {
        let args = parse(&[
            "-d", "-r", "gateway", "-p", "4001", "-l", "/dev/ttyBRIDGE0", "-u", "1000",
            "--link-mode", "0620", "/dev/ptmx",
        ])
        .unwrap();
        assert!(args.daemon);
        assert_eq!(args.remote.as_deref(), Some("gateway"));
        assert_eq!(args.link, Some(PathBuf::from("/dev/ttyBRIDGE0")));
        assert_eq!(args.user.as_deref(), Some("1000"));
        assert_eq!(args.link_mode, Some(0o620));
    }

    #[test]
    fn test_out_of_range_values_rejected() {
        assert!(parse(&["-m", "0", "/dev/ttyS0"]).is_err());
        assert!(parse(&["-x", "3", "/dev/ttyS0"]).is_err());
        assert!(parse(&["--link-mode", "0999", "/dev/ttyS0"]).is_err());
        assert!(parse(&["--link-mode", "17777", "/dev/ttyS0"]).is_err());
        assert!(parse(&["-p", "70000", "/dev/ttyS0"]).is_err());
    }

    #[test]
    fn test_flags_override_file_values() {
        let mut file = ConfigFile {
            device: Some(PathBuf::from("/dev/ttyUSB0")),
            port: 4001,
            max_connections: 4,
            ..ConfigFile::default()
        };
        let args = parse(&["-m", "2", "-w", "/dev/ttyS1"]).unwrap();
        args.apply_to(&mut file);

        assert_eq!(file.device, Some(PathBuf::from("/dev/ttyS1")));
        assert_eq!(file.port, 4001);
        assert_eq!(file.max_connections, 2);
        assert!(file.write_only);
        assert_eq!(file.user, "pi");
    }

    #[test]
    fn test_octal_mode_forms() {
        assert_eq!(parse_octal_mode("660"), Ok(0o660));
        assert_eq!(parse_octal_mode("0o660"), Ok(0o660));
        assert_eq!(parse_octal_mode("07777"), Ok(0o7777));
        assert!(parse_octal_mode("rw").is_err());
    }
}
