//! RivalsDB auth walkthrough
//!
//! `serve` runs an API with one required and one optional route behind the
//! verification gate. `session` boots a client session, optionally signs in
//! through the loopback redirect, and prints every identity delivery until
//! interrupted. `redirect` prints an authorization URL; with a `localstorage`
//! cache, a later `session --location '<redirect_uri>?code=..&state=..'`
//! completes it.
//!
//! Both read their provider settings from `RIVALSDB_AUTH_*` environment
//! variables.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::{Parser, Subcommand};
use rivalsdb_auth::gate::{MaybePrincipal, Principal};
use rivalsdb_auth::jwt::JwtValidator;
use rivalsdb_auth::provider::{LoopbackAuthorizer, OidcProvider};
use rivalsdb_auth::session::MemoryLocation;
use rivalsdb_auth::{
    CacheLocation, ClientConfig, LoggingConfig, ServerConfig, SessionManager, SignInOutcome, Tier,
    TokenVerifier,
};
use serde_json::{Value, json};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "rivalsdb-auth-demo", version, about = "RivalsDB auth walkthrough")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Default log filter when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Emit JSON log lines
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve a gated API
    Serve {
        /// Listen address
        #[arg(long, default_value = "127.0.0.1:3000")]
        bind: SocketAddr,
    },
    /// Run a client session
    Session {
        /// Visible location at boot; include `code` and `state` to finish a redirect sign-in
        #[arg(long, default_value = "http://127.0.0.1:8765/")]
        location: String,

        /// Start an interactive sign-in when no session was restored
        #[arg(long)]
        sign_in: bool,
    },
    /// Start a redirect sign-in and print the URL to open
    Redirect,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    LoggingConfig {
        level: cli.log_level,
        structured: cli.json_logs,
    }
    .init()
    .context("failed to initialize logging")?;

    match cli.command {
        Command::Serve { bind } => serve(bind).await,
        Command::Session { location, sign_in } => session(&location, sign_in).await,
        Command::Redirect => redirect().await,
    }
}

async fn create_user(
    Principal(principal): Principal,
    Json(body): Json<Value>,
) -> Json<Value> {
    info!(subject = %principal.subject, email = ?body.get("email"), "Registering user");
    Json(json!({ "id": principal.subject, "email": body.get("email") }))
}

async fn whoami(MaybePrincipal(principal): MaybePrincipal) -> Json<Value> {
    match principal {
        Some(principal) => Json(json!({
            "subject": principal.subject,
            "scopes": principal.scopes,
        })),
        None => Json(json!({ "subject": null })),
    }
}

async fn serve(bind: SocketAddr) -> anyhow::Result<()> {
    let config = ServerConfig::from_env()?;
    let verifier: Arc<dyn TokenVerifier> = Arc::new(JwtValidator::from_config(&config)?);

    let app = Tier::Required
        .apply(
            Router::new().route("/api/v2/users", post(create_user)),
            verifier.clone(),
        )
        .merge(Tier::Optional.apply(Router::new().route("/api/whoami", get(whoami)), verifier));

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    info!(%bind, issuer = %config.issuer_url(), "Serving gated API");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}

async fn session(location: &str, sign_in: bool) -> anyhow::Result<()> {
    let config = ClientConfig::from_env()?;
    let mut location = MemoryLocation::parse(location)?;

    let boot = SessionManager::create(config, &mut location).await?;
    let manager = boot.manager;
    manager.set_identity_callback(|claims| {
        info!(user_id = %claims.user_id, email = %claims.email, "Identity delivered");
    });

    match boot.identity {
        Some(identity) => info!(user_id = %identity.user_id, "Session restored"),
        None if sign_in => match manager.sign_in().await? {
            SignInOutcome::SignedIn(claims) => info!(email = %claims.email, "Signed in"),
            SignInOutcome::Cancelled => info!("Sign-in cancelled"),
            SignInOutcome::NoIdentity => info!("Signed in without a usable identity"),
        },
        None => info!("Not signed in; pass --sign-in to start one"),
    }

    info!("Waiting for refresh deliveries, Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    manager.shutdown().await;
    Ok(())
}

async fn redirect() -> anyhow::Result<()> {
    let config = ClientConfig::from_env()?;
    if config.cache_location == CacheLocation::Memory {
        warn!("Memory cache cannot carry the sign-in to another run; set RIVALSDB_AUTH_CACHE_LOCATION=localstorage");
    }

    let provider = OidcProvider::connect(config, Arc::new(LoopbackAuthorizer::new())).await?;
    let url = provider.begin_redirect().await?;
    info!("Open the URL below, then pass the redirect back to `session --location`");
    println!("{url}");
    Ok(())
}
