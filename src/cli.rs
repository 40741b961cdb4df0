use std::time::Duration;

use clap::Parser;
use wsbridge::config::Timeouts;
use wsbridge::extensions::ExtensionRegistry;
use wsbridge::{Config, ProxyConfig};

#[derive(Parser, Debug)]
#[command(name = "wsbridge", version, about = "Transparent WebSocket reverse-proxy relay")]
pub struct Cli {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1")]
    pub listen_host: String,

    /// Port to listen on
    #[arg(long, default_value_t = 8888)]
    pub listen_port: u16,

    /// Backend host
    #[arg(long, default_value = "127.0.0.1")]
    pub backend_host: String,

    /// Backend port
    #[arg(long, default_value_t = 8855)]
    pub backend_port: u16,

    /// Seconds to wait for the backend connection (0 waits forever)
    #[arg(long, default_value_t = 10)]
    pub connect_timeout: u64,

    /// Seconds allowed for each opening handshake (0 waits forever)
    #[arg(long, default_value_t = 30)]
    pub handshake_timeout: u64,

    /// Do not negotiate permessage-deflate on either leg
    #[arg(long)]
    pub no_compression: bool,

    /// More logging; repeat for trace output
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

fn seconds(value: u64) -> Option<Duration> {
    (value > 0).then(|| Duration::from_secs(value))
}

impl Cli {
    /// Log level used when `RUST_LOG` is unset.
    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }

    pub fn proxy_config(&self) -> ProxyConfig {
        let engine = Config::default();
        let registry = if self.no_compression {
            ExtensionRegistry::new()
        } else {
            ExtensionRegistry::standard(&engine.limits)
        };
        let timeouts = Timeouts::default()
            .with_connect(seconds(self.connect_timeout))
            .with_handshake(seconds(self.handshake_timeout));

        ProxyConfig::new()
            .with_listen(&self.listen_host, self.listen_port)
            .with_backend(&self.backend_host, self.backend_port)
            .with_engine(engine)
            .with_timeouts(timeouts)
            .with_registry(registry)
    }
}
