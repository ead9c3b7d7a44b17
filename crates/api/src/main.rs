use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use multiroom_api::app::{build_app, services};
use multiroom_api::config::{Cli, Command, MintTokenArgs, ServeArgs, DEV_JWT_SECRET};
use multiroom_auth::TokenSigner;
use multiroom_core::SubjectId;
use multiroom_observability::LogFormat;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    match Cli::parse().into_command() {
        Command::Serve(args) => serve(args).await,
        Command::MintToken(args) => mint_token(args),
    }
}

async fn serve(args: ServeArgs) -> anyhow::Result<()> {
    multiroom_observability::init(if args.log_json {
        LogFormat::Json
    } else {
        LogFormat::Pretty
    });

    let services = Arc::new(services::build_services(&args).await?);
    let shutdown = CancellationToken::new();

    let scheduler = if args.no_scheduler {
        tracing::info!("usage scheduler disabled");
        None
    } else {
        Some(services.scheduler.clone().spawn(shutdown.child_token()))
    };

    let app = build_app(services);

    let listener = tokio::net::TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("failed to bind {}", args.bind))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "failed to listen for ctrl-c");
            }
            tracing::info!("shutdown requested");
            signal.cancel();
        })
        .await
        .context("server error")?;

    shutdown.cancel();
    if let Some(task) = scheduler {
        let _ = task.await;
    }

    tracing::info!("stopped");
    Ok(())
}

fn mint_token(args: MintTokenArgs) -> anyhow::Result<()> {
    let secret = args.jwt_secret.unwrap_or_else(|| DEV_JWT_SECRET.to_string());
    let token = TokenSigner::new(secret)
        .issue(
            SubjectId::new(args.subject),
            args.token_type,
            chrono::Utc::now(),
            chrono::Duration::seconds(args.ttl_secs),
        )
        .context("failed to sign token")?;

    println!("{token}");
    Ok(())
}
