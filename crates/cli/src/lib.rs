use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "tickd")]
#[command(about = "TickCache - market data tick and position PnL cache")]
#[command(version = "0.1.0")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Connect to the feed and run the caches
    Start {
        /// Path to the configuration file
        #[arg(short, long, default_value = "config/tickd.yaml")]
        config: PathBuf,

        /// Override the configured log format
        #[arg(long, value_enum)]
        log_format: Option<LogFormatArg>,

        /// Override the metrics exporter port (enables the exporter)
        #[arg(long)]
        metrics_port: Option<u16>,
    },

    /// Validate configuration without connecting
    Validate {
        /// Path to the configuration file
        #[arg(short, long, default_value = "config/tickd.yaml")]
        config: PathBuf,
    },

    /// Write a configuration file with all defaults
    Init {
        /// Output path for the new configuration file
        #[arg(short, long, default_value = "tickd.yaml")]
        output: PathBuf,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormatArg {
    Pretty,
    Json,
    Compact,
}

impl LogFormatArg {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogFormatArg::Pretty => "pretty",
            LogFormatArg::Json => "json",
            LogFormatArg::Compact => "compact",
        }
    }
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_defaults() {
        let cli = Cli::try_parse_from(["tickd", "start"]).unwrap();
        match cli.command {
            Commands::Start {
                config,
                log_format,
                metrics_port,
            } => {
                assert_eq!(config, PathBuf::from("config/tickd.yaml"));
                assert_eq!(log_format, None);
                assert_eq!(metrics_port, None);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_start_overrides() {
        let cli = Cli::try_parse_from([
            "tickd",
            "start",
            "--config",
            "/etc/tickd.yaml",
            "--log-format",
            "json",
            "--metrics-port",
            "9100",
        ])
        .unwrap();
        match cli.command {
            Commands::Start {
                config,
                log_format,
                metrics_port,
            } => {
                assert_eq!(config, PathBuf::from("/etc/tickd.yaml"));
                assert_eq!(log_format.map(|f| f.as_str()), Some("json"));
                assert_eq!(metrics_port, Some(9100));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_log_format_rejected() {
        assert!(Cli::try_parse_from(["tickd", "start", "--log-format", "xml"]).is_err());
    }
}
