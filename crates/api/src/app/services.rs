//! Service wiring: broker, authorization, bridge and scheduler.

use std::sync::Arc;
use std::time::Duration;

use std::path::Path;

use anyhow::Context;
use serde::de::DeserializeOwned;
use tracing::{info, warn};

use multiroom_auth::{
    AuthorizationClient, CachedAuthorization, Hs256TokenVerifier, LocalAuthorization, PrincipalDirectory,
    PrincipalRecord, TokenVerifier,
};
use multiroom_core::RoomUsageService;
use multiroom_events::{Destinations, InMemoryBroker, MessageBroker};
use multiroom_infra::{
    InMemoryPrincipalDirectory, InMemoryRoomUsage, RemoteAuthorization, RoomSeed, UsageScheduler,
};
use multiroom_realtime::{BridgeConfig, ConnectionRegistry, NotificationBridge};

use crate::config::{AuthorityMode, ServeArgs, DEV_JWT_SECRET};

/// Everything handlers need, shared behind an `Arc`.
#[derive(Clone)]
pub struct AppServices {
    pub verifier: Arc<dyn TokenVerifier>,
    pub authorization: Arc<dyn AuthorizationClient>,
    /// Principals owned by this service; `Some` only in local authority mode,
    /// where the service also answers `/auth/{app|admin}/verify`.
    pub directory: Option<Arc<dyn PrincipalDirectory>>,
    pub broker: Arc<dyn MessageBroker>,
    pub bridge: NotificationBridge,
    pub scheduler: Arc<UsageScheduler>,
}

/// Settings that shape the wired services, independent of the backends.
#[derive(Debug, Clone)]
pub struct ServiceOptions {
    pub jwt_secret: String,
    pub bridge_entity: String,
    pub scheduler_entity: String,
    pub scheduler_interval: Duration,
    pub authority: AuthorityMode,
    pub authority_cache_ttl: Duration,
    pub bridge: BridgeConfig,
}

impl ServiceOptions {
    /// Defaults for tests and local development.
    pub fn new(jwt_secret: impl Into<String>) -> Self {
        Self {
            jwt_secret: jwt_secret.into(),
            bridge_entity: "dispositivo".to_string(),
            scheduler_entity: "sala".to_string(),
            scheduler_interval: multiroom_infra::workers::usage_scheduler::DEFAULT_INTERVAL,
            authority: AuthorityMode::Local,
            authority_cache_ttl: Duration::ZERO,
            bridge: BridgeConfig::default(),
        }
    }

    pub fn from_args(args: &ServeArgs) -> Self {
        let jwt_secret = args.jwt_secret.clone().unwrap_or_else(|| {
            warn!("MULTIROOM_JWT_SECRET not set; using insecure dev default");
            DEV_JWT_SECRET.to_string()
        });

        Self {
            jwt_secret,
            bridge_entity: args.bridge_entity.clone(),
            scheduler_entity: args.scheduler_entity.clone(),
            scheduler_interval: args.scheduler_interval(),
            authority: args.authority_mode(),
            authority_cache_ttl: args.authority_cache_ttl(),
            bridge: BridgeConfig {
                max_deliveries: args.max_deliveries,
                write_timeout: args.write_timeout(),
                ..BridgeConfig::default()
            },
        }
    }
}

impl AppServices {
    /// Wire services over the given backends.
    pub fn new(
        options: &ServiceOptions,
        broker: Arc<dyn MessageBroker>,
        principals: Arc<dyn PrincipalDirectory>,
        rooms: Arc<dyn RoomUsageService>,
    ) -> anyhow::Result<Self> {
        let verifier: Arc<dyn TokenVerifier> = Arc::new(Hs256TokenVerifier::new(&options.jwt_secret));

        let (authorization, directory): (Arc<dyn AuthorizationClient>, _) = match &options.authority {
            AuthorityMode::Local => (
                cached(LocalAuthorization::new(principals.clone()), options.authority_cache_ttl),
                Some(principals),
            ),
            AuthorityMode::Remote { base_url } => {
                let remote = RemoteAuthorization::new(base_url.as_str())
                    .context("failed to build authority client")?;
                (cached(remote, options.authority_cache_ttl), None)
            }
        };

        let bridge = NotificationBridge::new(
            Arc::new(ConnectionRegistry::new()),
            broker.clone(),
            Destinations::new(options.bridge_entity.as_str()),
            options.bridge.clone(),
        );

        let scheduler = Arc::new(
            UsageScheduler::new(rooms, broker.clone(), Destinations::new(options.scheduler_entity.as_str()))
                .with_interval(options.scheduler_interval),
        );

        Ok(Self {
            verifier,
            authorization,
            directory,
            broker,
            bridge,
            scheduler,
        })
    }
}

fn cached<A>(client: A, ttl: Duration) -> Arc<dyn AuthorizationClient>
where
    A: AuthorizationClient + 'static,
{
    if ttl.is_zero() {
        Arc::new(client)
    } else {
        Arc::new(CachedAuthorization::new(client, ttl))
    }
}

/// Build services for the server from its configuration.
pub async fn build_services(args: &ServeArgs) -> anyhow::Result<AppServices> {
    let options = ServiceOptions::from_args(args);

    let broker = build_broker(args).await?;

    let principals = match &args.principals_file {
        Some(path) => {
            let records: Vec<PrincipalRecord> = load_json(path, "principals").await?;
            info!(count = records.len(), "principals loaded");
            InMemoryPrincipalDirectory::with_principals(records)
        }
        None => InMemoryPrincipalDirectory::new(),
    };

    let rooms = match &args.rooms_file {
        Some(path) => {
            let seeds: Vec<RoomSeed> = load_json(path, "rooms").await?;
            info!(count = seeds.len(), "rooms loaded");
            InMemoryRoomUsage::with_rooms(seeds)
        }
        None => {
            if !args.no_scheduler {
                warn!("no rooms file; the usage scheduler has nothing to expire");
            }
            InMemoryRoomUsage::new()
        }
    };

    if options.authority == AuthorityMode::Local && args.principals_file.is_none() {
        warn!("local authority mode without a principals file; every permission check will fail");
    }

    AppServices::new(
        &options,
        broker,
        Arc::new(principals),
        Arc::new(rooms),
    )
}

/// Read a JSON array of `what` from `path`.
async fn load_json<T: DeserializeOwned>(path: &Path, what: &str) -> anyhow::Result<Vec<T>> {
    let raw = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {what} file {}", path.display()))?;
    serde_json::from_slice(&raw).with_context(|| format!("{what} file is not a JSON array of {what}"))
}

#[cfg(feature = "redis")]
async fn build_broker(args: &ServeArgs) -> anyhow::Result<Arc<dyn MessageBroker>> {
    match &args.redis_url {
        Some(url) => {
            let broker = multiroom_infra::event_bus::RedisBroker::connect(url)
                .await
                .context("failed to connect to redis")?;
            info!("using redis broker");
            Ok(Arc::new(broker))
        }
        None => Ok(Arc::new(InMemoryBroker::with_queue_capacity(args.queue_capacity))),
    }
}

#[cfg(not(feature = "redis"))]
async fn build_broker(args: &ServeArgs) -> anyhow::Result<Arc<dyn MessageBroker>> {
    if args.redis_url.is_some() {
        anyhow::bail!("MULTIROOM_REDIS_URL is set but the binary was built without the `redis` feature");
    }
    Ok(Arc::new(InMemoryBroker::with_queue_capacity(args.queue_capacity)))
}
