use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::DefaultBodyLimit;
use clap::Parser;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use deskline::cache::RedisCache;
use deskline::cli;
use deskline::config;
use deskline::jobs;
use deskline::models::Role;
use deskline::store::{PgStore, RevocationLedger, SupportStore};
use deskline::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let fmt_layer = if std::env::var("DESKLINE_LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "deskline=debug,tower_http=debug".into()),
        ))
        .with(fmt_layer)
        .init();

    let cfg = config::load()?;
    let args = cli::Cli::parse();

    let result = match args.command {
        Some(cli::Commands::Serve { port }) => {
            let port = port.unwrap_or(cfg.port);
            run_server(cfg, port).await
        }
        Some(cli::Commands::Migrate) => {
            let db = PgStore::connect(&cfg.database_url).await?;
            db.migrate().await?;
            println!("Migrations applied.");
            db.close().await;
            Ok(())
        }
        Some(cli::Commands::User { command }) => {
            let db = PgStore::connect(&cfg.database_url).await?;
            let result = handle_user_command(&db, command).await;
            db.close().await;
            result
        }
        Some(cli::Commands::Revocations { command }) => {
            let db = PgStore::connect(&cfg.database_url).await?;
            let result = handle_revocation_command(&db, command).await;
            db.close().await;
            result
        }
        None => {
            let port = cfg.port;
            run_server(cfg, port).await
        }
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

async fn run_server(cfg: config::Config, port: u16) -> anyhow::Result<()> {
    tracing::info!("Connecting to database...");
    let db = Arc::new(
        PgStore::connect(&cfg.database_url)
            .await
            .context("failed to connect to Postgres")?,
    );

    tracing::info!("Running migrations...");
    db.migrate().await?;

    tracing::info!("Connecting to Redis...");
    let redis = RedisCache::connect(&cfg.redis_url)
        .await
        .context("failed to connect to Redis")?;
    if let Err(e) = redis.ping().await {
        // Cache outages degrade reads to recomputation; keep serving.
        tracing::warn!(error = %e, "Redis did not answer PING, continuing without cache");
    }

    let dashboard_origin = cfg.dashboard_origin.clone();
    let state = Arc::new(AppState::build(cfg, db.clone(), Arc::new(redis))?);

    let app = deskline::api::router(state.clone())
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer({
            use axum::http::{HeaderName, Method};
            use tower_http::cors::AllowOrigin;
            CorsLayer::new()
                .allow_origin(AllowOrigin::predicate(move |origin, _| {
                    let origin_str = origin.to_str().unwrap_or("");
                    origin_str == dashboard_origin
                        || origin_str.starts_with("http://localhost:")
                        || origin_str.starts_with("http://127.0.0.1:")
                }))
                .allow_methods([
                    Method::GET,
                    Method::POST,
                    Method::PATCH,
                    Method::OPTIONS,
                ])
                .allow_headers([
                    HeaderName::from_static("content-type"),
                    HeaderName::from_static("authorization"),
                    HeaderName::from_static("x-request-id"),
                ])
                .allow_credentials(true)
        })
        .layer(axum::middleware::from_fn(request_id_middleware))
        .layer(axum::middleware::from_fn(security_headers_middleware));

    let purge = jobs::cleanup::spawn(state.tokens.clone());
    tracing::info!("Background cleanup job started (revocation purge every 1h)");

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Deskline listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    purge.abort();
    tracing::info!("Closing database pool...");
    db.close().await;
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl-C");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}

/// Middleware: injects a unique X-Request-Id into every response.
/// This allows clients to correlate errors with server logs.
async fn request_id_middleware(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let req_id = uuid::Uuid::new_v4().to_string();
    let mut resp = next.run(req).await;
    if let Ok(val) = axum::http::HeaderValue::from_str(&req_id) {
        resp.headers_mut().insert("x-request-id", val);
    }
    resp
}

/// Middleware: injects security headers into every response.
async fn security_headers_middleware(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    use axum::http::HeaderValue;

    let mut resp = next.run(req).await;
    let headers = resp.headers_mut();

    headers.insert("X-Content-Type-Options", HeaderValue::from_static("nosniff"));
    headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));
    // Conversation payloads are per-viewer; never let an intermediary cache them
    headers.insert("Cache-Control", HeaderValue::from_static("no-store"));
    headers.insert("Referrer-Policy", HeaderValue::from_static("no-referrer"));
    headers.remove("Server");

    resp
}

async fn handle_user_command(db: &PgStore, cmd: cli::UserCommands) -> anyhow::Result<()> {
    match cmd {
        cli::UserCommands::Create {
            email,
            password,
            full_name,
            role,
        } => {
            let role = Role::parse(&role)
                .with_context(|| format!("Invalid role '{}'. Must be admin, agent, or user", role))?;
            let user = deskline::accounts::create_account(
                db,
                deskline::accounts::NewAccount {
                    email,
                    password,
                    full_name,
                    role,
                },
            )
            .await
            .map_err(|e| anyhow::anyhow!("{}", e))?;
            println!(
                "User created:\n  ID:       {}\n  Email:    {}\n  Role:     {}",
                user.id, user.email, user.role
            );
        }
        cli::UserCommands::List => {
            let users = db.list_users().await?;
            if users.is_empty() {
                println!("No users found.");
            } else {
                println!("{:<8} {:<32} {:<8} {:<8}", "ID", "EMAIL", "ROLE", "ACTIVE");
                for u in users {
                    println!("{:<8} {:<32} {:<8} {:<8}", u.id, u.email, u.role, u.is_active);
                }
            }
        }
    }
    Ok(())
}

async fn handle_revocation_command(
    db: &PgStore,
    cmd: cli::RevocationCommands,
) -> anyhow::Result<()> {
    match cmd {
        cli::RevocationCommands::Purge => {
            let purged = db.purge_expired().await?;
            println!("Purged {} expired revocation entries.", purged);
        }
    }
    Ok(())
}
