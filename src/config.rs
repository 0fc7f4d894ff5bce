use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, env = "CONFIG_FILE")]
    pub config: Option<String>,

    /// Address to bind
    #[arg(long, env = "BIND_HOST")]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// Seconds between keepalive frames on each SSE connection
    #[arg(long, env = "KEEPALIVE_SECS")]
    pub keepalive_secs: Option<u64>,

    /// Upper bound on message delivery, in seconds (0 disables)
    #[arg(long, env = "DELIVERY_TIMEOUT_SECS")]
    pub delivery_timeout_secs: Option<u64>,

    /// API key for the web search tool
    #[arg(long, env = "TAVILY_API_KEY", hide_env_values = true)]
    pub search_api_key: Option<String>,

    /// Emit logs as JSON
    #[arg(long, env = "LOG_JSON")]
    pub log_json: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub relay: RelayConfig,
    pub search: SearchConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub cors_enabled: bool,
    pub body_limit_bytes: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RelayConfig {
    pub keepalive_secs: u64,
    pub delivery_timeout_secs: u64,
    pub channel_capacity: usize,
    pub sse_path: String,
    pub messages_path: String,
}

impl RelayConfig {
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs.max(1))
    }

    pub fn delivery_timeout(&self) -> Option<Duration> {
        (self.delivery_timeout_secs > 0).then(|| Duration::from_secs(self.delivery_timeout_secs))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    pub endpoint: String,
    #[serde(default)]
    pub api_key: Option<String>,
    pub max_results: u32,
    pub timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                port: 3000,
                host: "0.0.0.0".to_string(),
                cors_enabled: true,
                body_limit_bytes: 4 * 1024 * 1024,
            },
            relay: RelayConfig {
                keepalive_secs: 30,
                delivery_timeout_secs: 60,
                channel_capacity: 64,
                sse_path: "/sse".to_string(),
                messages_path: "/messages".to_string(),
            },
            search: SearchConfig {
                endpoint: "https://api.tavily.com/search".to_string(),
                api_key: None,
                max_results: 5,
                timeout_secs: 15,
            },
        }
    }
}

impl AppConfig {
    pub fn load_from_args<I, T>(args: I) -> Result<Self, config::ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli =
            Cli::try_parse_from(args).map_err(|e| config::ConfigError::Message(e.to_string()))?;
        Self::from_cli(&cli)
    }

    /// Layer defaults, config file, `RELAY_*` env vars and CLI flags, in
    /// increasing priority.
    pub fn from_cli(cli: &Cli) -> Result<Self, config::ConfigError> {
        let defaults = Self::default();
        let mut builder = Config::builder()
            .set_default("server.port", u64::from(defaults.server.port))?
            .set_default("server.host", defaults.server.host)?
            .set_default("server.cors_enabled", defaults.server.cors_enabled)?
            .set_default("server.body_limit_bytes", defaults.server.body_limit_bytes as u64)?
            .set_default("relay.keepalive_secs", defaults.relay.keepalive_secs)?
            .set_default(
                "relay.delivery_timeout_secs",
                defaults.relay.delivery_timeout_secs,
            )?
            .set_default("relay.channel_capacity", defaults.relay.channel_capacity as u64)?
            .set_default("relay.sse_path", defaults.relay.sse_path)?
            .set_default("relay.messages_path", defaults.relay.messages_path)?
            .set_default("search.endpoint", defaults.search.endpoint)?
            .set_default("search.max_results", u64::from(defaults.search.max_results))?
            .set_default("search.timeout_secs", defaults.search.timeout_secs)?;

        // An explicit file must exist; ./config.{yaml,toml,json} is optional.
        builder = match &cli.config {
            Some(path) => builder.add_source(File::with_name(path)),
            None => builder.add_source(File::with_name("config").required(false)),
        };

        // E.g. RELAY_SERVER__PORT=8000
        builder = builder.add_source(
            Environment::with_prefix("RELAY")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        if let Some(host) = &cli.host {
            builder = builder.set_override("server.host", host.as_str())?;
        }
        if let Some(port) = cli.port {
            builder = builder.set_override("server.port", u64::from(port))?;
        }
        if let Some(secs) = cli.keepalive_secs {
            builder = builder.set_override("relay.keepalive_secs", secs)?;
        }
        if let Some(secs) = cli.delivery_timeout_secs {
            builder = builder.set_override("relay.delivery_timeout_secs", secs)?;
        }
        if let Some(key) = &cli.search_api_key {
            builder = builder.set_override("search.api_key", key.as_str())?;
        }

        builder.build()?.try_deserialize()
    }
}
