use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use scribe_core::EngineConfig;

/// Command-line and environment configuration for the server.
#[derive(Debug, Clone, Parser)]
#[command(name = "scribe-server", version, about = "Resumable text streaming server")]
pub struct ServerArgs {
    /// Address to listen on.
    #[arg(long, env = "SCRIBE_BIND", default_value = "127.0.0.1:8080")]
    pub bind: SocketAddr,

    /// SQLite database file. Streams are kept in memory when unset.
    #[arg(long, env = "SCRIBE_DB_PATH")]
    pub db_path: Option<PathBuf>,

    /// Seconds between expiry sweeps.
    #[arg(long, env = "SCRIBE_SWEEP_INTERVAL_SECS", default_value_t = 60)]
    pub sweep_interval_secs: u64,

    /// Idle seconds after which an unfinished stream is timed out.
    #[arg(long, env = "SCRIBE_EXPIRY_SECS", default_value_t = 900)]
    pub expiry_secs: u64,

    /// Model used when a request does not name one.
    #[arg(long, env = "SCRIBE_MODEL", default_value = "gpt-5-nano")]
    pub model: String,

    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,

    #[arg(long, env = "OPENAI_BASE_URL")]
    pub openai_base_url: Option<String>,
}

impl ServerArgs {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig::default()
            .sweep_interval(Duration::from_secs(self.sweep_interval_secs))
            .expiry_window(Duration::from_secs(self.expiry_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_without_flags() {
        let args = ServerArgs::try_parse_from(["scribe-server"]).expect("parse");
        assert_eq!(args.bind, "127.0.0.1:8080".parse::<SocketAddr>().expect("addr"));
        assert_eq!(args.expiry_secs, 900);
        assert_eq!(args.engine_config().sweep_interval, Duration::from_secs(60));
    }

    #[test]
    fn flags_override_defaults() {
        let args = ServerArgs::try_parse_from([
            "scribe-server",
            "--bind",
            "0.0.0.0:9000",
            "--expiry-secs",
            "30",
            "--db-path",
            "/tmp/streams.sqlite3",
        ])
        .expect("parse");
        assert_eq!(args.bind.port(), 9000);
        assert_eq!(args.engine_config().expiry_window, Duration::from_secs(30));
        assert_eq!(args.db_path, Some(PathBuf::from("/tmp/streams.sqlite3")));
    }
}
