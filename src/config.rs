use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Command-line flags. Only flags that were actually given override the
/// lower layers, so every field besides the file path is optional.
#[derive(Parser, Serialize, Clone, Debug, Default)]
#[command(
    name = "geopresence-server",
    version,
    about = "Live location presence server"
)]
pub struct Cli {
    /// Port to listen on
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Bind address
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<String>,

    /// Path to TOML config file
    #[arg(long, default_value = "./geopresence.toml")]
    #[serde(skip)]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long)]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    #[serde(skip)]
    pub generate_config: bool,

    /// Frames buffered per connection before it counts as stalled
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outbound_queue_capacity: Option<usize>,

    /// Maximum time for a single WebSocket write, in milliseconds
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub write_timeout_ms: Option<u64>,

    /// Seconds between server pings (0 disables keepalive)
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ping_interval_secs: Option<u64>,

    /// Seconds to wait for a pong before closing the connection
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pong_timeout_secs: Option<u64>,
}

/// Resolved server configuration.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Config {
    /// Port to listen on (default: 3001)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Bind address (default: 0.0.0.0)
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Structured JSON logs instead of pretty output
    #[serde(default)]
    pub json_logs: bool,

    /// Outbound queue length per connection (default: 64)
    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,

    /// Per-write timeout in milliseconds (default: 5000)
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,

    /// Keepalive ping period in seconds, 0 disables (default: 30)
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,

    /// Pong deadline in seconds (default: 10)
    #[serde(default = "default_pong_timeout_secs")]
    pub pong_timeout_secs: u64,
}

fn default_port() -> u16 {
    3001
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_outbound_queue_capacity() -> usize {
    64
}

fn default_write_timeout_ms() -> u64 {
    5000
}

fn default_ping_interval_secs() -> u64 {
    30
}

fn default_pong_timeout_secs() -> u64 {
    10
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind_address: default_bind_address(),
            json_logs: false,
            outbound_queue_capacity: default_outbound_queue_capacity(),
            write_timeout_ms: default_write_timeout_ms(),
            ping_interval_secs: default_ping_interval_secs(),
            pong_timeout_secs: default_pong_timeout_secs(),
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (PORT, GEOPRESENCE_*) < CLI args
    pub fn from_cli(cli: &Cli) -> Result<Self, figment::Error> {
        Self::figment(cli).extract()
    }

    pub fn figment(cli: &Cli) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&cli.config))
            .merge(Env::raw().only(&["PORT"]))
            .merge(Env::prefixed("GEOPRESENCE_"))
            .merge(Serialized::defaults(cli))
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Geopresence Server Configuration
# Place this file at ./geopresence.toml or specify with --config <path>
# All settings can be overridden via environment variables (GEOPRESENCE_PORT, etc.)
# or CLI flags (--port, etc.). A bare PORT variable is also honoured.

# Server port (default: 3001)
# port = 3001

# Bind address (default: 0.0.0.0, all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# ---- Connection limits ----

# Frames queued per connection before it is treated as stalled and dropped
# outbound_queue_capacity = 64

# Maximum time for a single WebSocket write, in milliseconds
# write_timeout_ms = 5000

# Server ping period in seconds (0 disables keepalive)
# ping_interval_secs = 30

# Seconds to wait for a pong before closing the connection
# pong_timeout_secs = 10
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    fn cli(args: &[&str]) -> Cli {
        let mut argv = vec!["geopresence-server"];
        argv.extend_from_slice(args);
        Cli::parse_from(argv)
    }

    #[test]
    fn test_defaults_without_file_or_env() {
        Jail::expect_with(|_jail| {
            let config = Config::from_cli(&cli(&[]))?;
            assert_eq!(config, Config::default());
            assert_eq!(config.port, 3001);
            Ok(())
        });
    }

    #[test]
    fn test_layer_precedence() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "geopresence.toml",
                r#"
                port = 4000
                bind_address = "127.0.0.1"
                write_timeout_ms = 250
                "#,
            )?;

            let config = Config::from_cli(&cli(&[]))?;
            assert_eq!(config.port, 4000);
            assert_eq!(config.bind_address, "127.0.0.1");
            assert_eq!(config.write_timeout_ms, 250);

            jail.set_env("PORT", "5000");
            assert_eq!(Config::from_cli(&cli(&[]))?.port, 5000);

            jail.set_env("GEOPRESENCE_PORT", "6000");
            assert_eq!(Config::from_cli(&cli(&[]))?.port, 6000);

            let config = Config::from_cli(&cli(&["--port", "7000"]))?;
            assert_eq!(config.port, 7000);
            // Untouched keys keep the file value.
            assert_eq!(config.bind_address, "127.0.0.1");
            Ok(())
        });
    }

    #[test]
    fn test_custom_config_path_and_flags() {
        Jail::expect_with(|jail| {
            jail.create_file("custom.toml", "ping_interval_secs = 0\n")?;

            let config = Config::from_cli(&cli(&[
                "--config",
                "custom.toml",
                "--json-logs",
                "--outbound-queue-capacity",
                "8",
            ]))?;
            assert_eq!(config.ping_interval_secs, 0);
            assert!(config.json_logs);
            assert_eq!(config.outbound_queue_capacity, 8);
            Ok(())
        });
    }

    #[test]
    fn test_template_parses_as_toml() {
        Jail::expect_with(|jail| {
            jail.create_file("geopresence.toml", &generate_config_template())?;
            assert_eq!(Config::from_cli(&cli(&[]))?, Config::default());
            Ok(())
        });
    }
}
