//! Command-line interface.

use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "wagate",
    version,
    about = "Self-hosted WhatsApp gateway: send and schedule messages"
)]
pub struct Cli {
    /// Listen port (overrides config; also read from PORT)
    #[arg(short, long, env = "PORT")]
    pub port: Option<u16>,

    /// Config file path (default: ./wagate.toml, then ~/.config/wagate/config.toml)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Verbose logging plus a rolling log file under the data directory
    #[arg(long)]
    pub debug: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::parse_from(["wagate"]);
        assert!(cli.port.is_none());
        assert!(cli.config.is_none());
        assert!(!cli.debug);
    }

    #[test]
    fn test_flags() {
        let cli = Cli::parse_from(["wagate", "--port", "3000", "--debug"]);
        assert_eq!(cli.port, Some(3000));
        assert!(cli.debug);
    }

    #[test]
    fn test_config_path() {
        let cli = Cli::parse_from(["wagate", "--config", "/etc/wagate.toml"]);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/wagate.toml")));
    }
}
