use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand, builder::BoolishValueParser};
use deliver_core::deliver::{ConfigError, DeliverConfig, LogLevel};
use deliver_mcp::server::McpServerConfig;

const DEFAULT_WORKDIR: &str = ".";
const DEFAULT_TAG: &str = "latest";
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

#[derive(Parser, Debug)]
#[command(
    name = "docker-deliver",
    version,
    about = "Package compose projects into offline installation bundles."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build, export, and pin a compose project into an offline bundle.
    Save(SaveArgs),
    /// Serve the delivery tools over the Model Context Protocol.
    Mcp(McpArgs),
}

#[derive(clap::Args, Debug)]
pub struct SaveArgs {
    /// Compose file; repeat to merge multiple files in order.
    #[arg(
        short = 'f',
        long = "file",
        required = true,
        env = "DELIVER_COMPOSE_FILE"
    )]
    pub files: Vec<PathBuf>,

    /// Directory receiving images.tar and the generated manifest.
    #[arg(short = 'o', long = "output", env = "DELIVER_OUTPUT_DIR")]
    pub output: PathBuf,

    /// Base directory for relative paths.
    #[arg(short = 'w', long = "workdir", default_value = DEFAULT_WORKDIR)]
    pub workdir: PathBuf,

    /// Tag for image references synthesized for build-only services.
    #[arg(short = 't', long = "tag", default_value = DEFAULT_TAG, env = "DELIVER_IMAGE_TAG")]
    pub tag: String,

    /// Log level: debug, info, warn, or error.
    #[arg(
        short = 'l',
        long = "loglevel",
        default_value = DEFAULT_LOG_LEVEL,
        env = "DELIVER_LOG_LEVEL"
    )]
    pub loglevel: String,
}

#[derive(clap::Args, Debug)]
pub struct McpArgs {
    /// Serve streamable HTTP on this address instead of stdio,
    /// e.g. 127.0.0.1:8080.
    #[arg(short = 'H', long = "http", env = "DELIVER_MCP_HTTP_ADDR")]
    pub http: Option<SocketAddr>,

    /// Log level: debug, info, warn, or error.
    #[arg(
        short = 'l',
        long = "loglevel",
        default_value = DEFAULT_LOG_LEVEL,
        env = "DELIVER_LOG_LEVEL"
    )]
    pub loglevel: String,

    /// Mirror protocol frames to the log at trace level (stdio only).
    #[arg(
        long = "log-protocol",
        env = "DELIVER_LOG_PROTOCOL",
        default_value_t = false,
        value_parser = BoolishValueParser::new()
    )]
    pub log_protocol: bool,

    /// Upper bound in seconds for graceful shutdown.
    #[arg(
        long = "shutdown-timeout-secs",
        env = "DELIVER_SHUTDOWN_TIMEOUT_SECS",
        default_value_t = DEFAULT_SHUTDOWN_TIMEOUT_SECS
    )]
    pub shutdown_timeout_secs: u64,
}

impl TryFrom<&SaveArgs> for DeliverConfig {
    type Error = ConfigError;

    fn try_from(args: &SaveArgs) -> Result<Self, Self::Error> {
        let log_level: LogLevel = args.loglevel.parse()?;
        Ok(Self::new(args.files.clone(), args.output.clone())
            .with_workdir(args.workdir.clone())
            .with_tag(args.tag.clone())
            .with_log_level(log_level))
    }
}

impl From<&McpArgs> for McpServerConfig {
    fn from(args: &McpArgs) -> Self {
        let mut config = Self::new()
            .with_shutdown_timeout(Duration::from_secs(args.shutdown_timeout_secs))
            .with_log_protocol(args.log_protocol);
        if let Some(addr) = args.http {
            config = config.with_http_addr(addr);
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_parses_repeated_files_and_defaults() {
        let cli = Cli::try_parse_from([
            "docker-deliver",
            "save",
            "-f",
            "a.yaml",
            "-f",
            "b.yaml",
            "-o",
            "dist",
        ])
        .unwrap();

        let Command::Save(args) = cli.command else {
            panic!("expected save");
        };
        assert_eq!(
            args.files,
            vec![PathBuf::from("a.yaml"), PathBuf::from("b.yaml")]
        );
        assert_eq!(args.output, PathBuf::from("dist"));
        assert_eq!(args.workdir, PathBuf::from(DEFAULT_WORKDIR));
        assert_eq!(args.tag, DEFAULT_TAG);
        assert_eq!(args.loglevel, DEFAULT_LOG_LEVEL);
    }

    #[test]
    fn save_requires_a_compose_file() {
        assert!(Cli::try_parse_from(["docker-deliver", "save", "-o", "dist"]).is_err());
    }

    #[test]
    fn save_requires_an_output_dir() {
        assert!(Cli::try_parse_from(["docker-deliver", "save", "-f", "a.yaml"]).is_err());
    }

    #[test]
    fn save_args_convert_to_a_deliver_config() {
        let cli = Cli::try_parse_from([
            "docker-deliver",
            "save",
            "-f",
            "compose.yaml",
            "-o",
            "dist",
            "-w",
            "/srv/app",
            "-t",
            "v2",
            "-l",
            "debug",
        ])
        .unwrap();
        let Command::Save(args) = cli.command else {
            panic!("expected save");
        };

        let config = DeliverConfig::try_from(&args).unwrap();

        assert_eq!(config.files, vec![PathBuf::from("compose.yaml")]);
        assert_eq!(config.workdir, PathBuf::from("/srv/app"));
        assert_eq!(config.output_dir, PathBuf::from("dist"));
        assert_eq!(config.tag, "v2");
        assert_eq!(config.log_level, LogLevel::Debug);
    }

    #[test]
    fn invalid_log_levels_are_rejected() {
        let cli = Cli::try_parse_from([
            "docker-deliver",
            "save",
            "-f",
            "compose.yaml",
            "-o",
            "dist",
            "-l",
            "verbose",
        ])
        .unwrap();
        let Command::Save(args) = cli.command else {
            panic!("expected save");
        };

        let err = DeliverConfig::try_from(&args).unwrap_err();

        assert_eq!(
            err,
            ConfigError::InvalidLogLevel {
                value: "verbose".to_string()
            }
        );
    }

    #[test]
    fn mcp_defaults_serve_stdio() {
        let cli = Cli::try_parse_from(["docker-deliver", "mcp"]).unwrap();
        let Command::Mcp(args) = cli.command else {
            panic!("expected mcp");
        };

        let config = McpServerConfig::from(&args);

        assert!(config.http_addr.is_none());
        assert_eq!(
            config.shutdown_timeout,
            Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECS)
        );
        assert!(!config.log_protocol);
    }

    #[test]
    fn mcp_parses_transport_flags() {
        let cli = Cli::try_parse_from([
            "docker-deliver",
            "mcp",
            "-H",
            "127.0.0.1:8080",
            "--log-protocol",
            "yes",
            "--shutdown-timeout-secs",
            "5",
        ])
        .unwrap();
        let Command::Mcp(args) = cli.command else {
            panic!("expected mcp");
        };

        let config = McpServerConfig::from(&args);

        assert_eq!(config.http_addr, Some("127.0.0.1:8080".parse().unwrap()));
        assert!(config.log_protocol);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(5));
    }
}
