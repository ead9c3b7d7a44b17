//! Command line and environment configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use multiroom_auth::TokenType;

/// Secret used when none is configured. Only suitable for local development.
pub const DEV_JWT_SECRET: &str = "dev-secret";

#[derive(Debug, Parser)]
#[command(name = "multiroom", version, about = "Real-time notification bridge for multiroom")]
#[command(args_conflicts_with_subcommands = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub serve: ServeArgs,
}

impl Cli {
    /// The selected command; `serve` when none is given.
    pub fn into_command(self) -> Command {
        self.command.unwrap_or(Command::Serve(self.serve))
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the HTTP/WebSocket server (default).
    Serve(ServeArgs),
    /// Print a signed token for local testing.
    MintToken(MintTokenArgs),
}

#[derive(Debug, Clone, Args)]
pub struct ServeArgs {
    /// Address to listen on.
    #[arg(long, env = "MULTIROOM_BIND", default_value = "0.0.0.0:8080")]
    pub bind: SocketAddr,

    /// HS256 secret shared with the token issuer.
    #[arg(long, env = "MULTIROOM_JWT_SECRET", hide_env_values = true)]
    pub jwt_secret: Option<String>,

    /// Entity literal of the per-user notification queues.
    #[arg(long, env = "MULTIROOM_BRIDGE_ENTITY", default_value = "dispositivo")]
    pub bridge_entity: String,

    /// Entity literal of the room usage destinations.
    #[arg(long, env = "MULTIROOM_SCHEDULER_ENTITY", default_value = "sala")]
    pub scheduler_entity: String,

    /// Milliseconds between two room usage expiry passes.
    #[arg(
        long,
        env = "MULTIROOM_SCHEDULER_INTERVAL_MS",
        default_value_t = 2000,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub scheduler_interval_ms: u64,

    /// Do not run the periodic room usage scheduler.
    #[arg(long, env = "MULTIROOM_SCHEDULER_DISABLED")]
    pub no_scheduler: bool,

    /// `local` to authorize against this service's principals, or the base
    /// URL of a remote authority.
    #[arg(long, env = "MULTIROOM_AUTHORITY", default_value = "local")]
    pub authority: String,

    /// Cache successful authority lookups for this many milliseconds (0 disables).
    #[arg(long, env = "MULTIROOM_AUTHORITY_CACHE_TTL_MS", default_value_t = 0)]
    pub authority_cache_ttl_ms: u64,

    /// JSON array of principal records served in local authority mode.
    #[arg(long, env = "MULTIROOM_PRINCIPALS_FILE")]
    pub principals_file: Option<PathBuf>,

    /// JSON array of rooms (`{id, nombre, fin_uso?}`) seeded into the room store.
    #[arg(long, env = "MULTIROOM_ROOMS_FILE")]
    pub rooms_file: Option<PathBuf>,

    /// Redis broker URL; the in-memory broker is used when unset.
    #[arg(long, env = "MULTIROOM_REDIS_URL")]
    pub redis_url: Option<String>,

    /// Ready messages kept per queue by the in-memory broker; the oldest is
    /// dropped beyond this.
    #[arg(long, env = "MULTIROOM_QUEUE_CAPACITY", default_value_t = 10_000)]
    pub queue_capacity: usize,

    /// Dead-letter a notification after this many failed hand-outs.
    #[arg(long, env = "MULTIROOM_MAX_DELIVERIES")]
    pub max_deliveries: Option<u32>,

    /// Milliseconds one WebSocket write may take before the connection is dropped.
    #[arg(long, env = "MULTIROOM_WRITE_TIMEOUT_MS", default_value_t = 5000)]
    pub write_timeout_ms: u64,

    /// Emit logs as JSON.
    #[arg(long, env = "MULTIROOM_LOG_JSON")]
    pub log_json: bool,
}

/// Where permission checks are answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorityMode {
    Local,
    Remote { base_url: String },
}

impl ServeArgs {
    pub fn authority_mode(&self) -> AuthorityMode {
        if self.authority.eq_ignore_ascii_case("local") {
            AuthorityMode::Local
        } else {
            AuthorityMode::Remote {
                base_url: self.authority.clone(),
            }
        }
    }

    pub fn scheduler_interval(&self) -> Duration {
        Duration::from_millis(self.scheduler_interval_ms)
    }

    pub fn authority_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.authority_cache_ttl_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

#[derive(Debug, Clone, Args)]
pub struct MintTokenArgs {
    /// HS256 secret shared with the verifier.
    #[arg(long, env = "MULTIROOM_JWT_SECRET", hide_env_values = true)]
    pub jwt_secret: Option<String>,

    /// Subject id placed in the `id` claim.
    #[arg(long)]
    pub subject: i64,

    /// Token type: access-token-app, access-token-admin or refresh-token.
    #[arg(long = "type", default_value = "access-token-app")]
    pub token_type: TokenType,

    /// Lifetime in seconds.
    #[arg(long, default_value_t = 3600)]
    pub ttl_secs: i64,
}
