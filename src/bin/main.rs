use std::net::SocketAddr;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use coursegate::config::{
    DEFAULT_ACCESS_TOKEN_MINUTES, DEFAULT_ADMIN_DEPARTMENT_ID, DEFAULT_MAX_SESSIONS_PER_USER,
    DEFAULT_REFRESH_TOKEN_DAYS,
};
use coursegate::{AuthConfig, AuthService, DatabaseConfig, create_app_state, create_connection, ensure_schema, serve};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "coursegate")]
#[command(about = "Session and token authentication for the course platform")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API
    Server {
        #[arg(long, default_value = "127.0.0.1:8080", env = "COURSEGATE_BIND")]
        bind: SocketAddr,
        #[arg(long, default_value = "memory", env = "COURSEGATE_DB_URL")]
        db_url: String,
        #[command(flatten)]
        auth: AuthArgs,
    },
    /// Initialize the database schema and seed roles
    Init {
        #[arg(long, default_value = "memory", env = "COURSEGATE_DB_URL")]
        db_url: String,
    },
    /// Delete every expired refresh session
    PurgeSessions {
        #[arg(long, default_value = "memory", env = "COURSEGATE_DB_URL")]
        db_url: String,
    },
    /// Revoke all refresh sessions of a user
    RevokeSessions {
        user_id: i64,
        #[arg(long, default_value = "memory", env = "COURSEGATE_DB_URL")]
        db_url: String,
    },
}

#[derive(Args)]
struct AuthArgs {
    /// HMAC secret for access tokens
    #[arg(long, env = "COURSEGATE_JWT_SECRET", hide_env_values = true)]
    jwt_secret: String,
    #[arg(long, env = "COURSEGATE_ACCESS_TOKEN_MINUTES", default_value_t = DEFAULT_ACCESS_TOKEN_MINUTES)]
    access_token_minutes: i64,
    #[arg(long, env = "COURSEGATE_REFRESH_TOKEN_DAYS", default_value_t = DEFAULT_REFRESH_TOKEN_DAYS)]
    refresh_token_days: i64,
    #[arg(long, env = "COURSEGATE_MAX_SESSIONS", default_value_t = DEFAULT_MAX_SESSIONS_PER_USER)]
    max_sessions_per_user: usize,
    /// Mark the refresh cookie `Secure` (serve over TLS)
    #[arg(long, env = "COURSEGATE_SECURE_COOKIES", default_value_t = false)]
    secure_cookies: bool,
    #[arg(long, env = "COURSEGATE_ADMIN_DEPARTMENT", default_value_t = DEFAULT_ADMIN_DEPARTMENT_ID)]
    admin_department_id: i64,
}

impl From<AuthArgs> for AuthConfig {
    fn from(args: AuthArgs) -> Self {
        Self {
            jwt_secret: args.jwt_secret,
            access_token_minutes: args.access_token_minutes,
            refresh_token_days: args.refresh_token_days,
            max_sessions_per_user: args.max_sessions_per_user,
            secure_cookies: args.secure_cookies,
            admin_department_id: args.admin_department_id,
        }
    }
}

/// Session maintenance never signs tokens, so the default policy is enough.
async fn maintenance_service(db_url: String) -> Result<AuthService> {
    let db = create_connection(DatabaseConfig {
        url: db_url,
        ..Default::default()
    })
    .await?;
    ensure_schema(&db).await?;
    Ok(AuthService::new(db, AuthConfig::default()))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("coursegate=info".parse()?)
                .add_directive("surrealdb=warn".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Server { bind, db_url, auth } => {
            let db_config = DatabaseConfig {
                url: db_url,
                ..Default::default()
            };
            let auth_config = AuthConfig::from(auth);
            info!("Using database url: {}", db_config.url);
            info!("Auth policy: {:?}", auth_config);

            let state = create_app_state(db_config, auth_config).await?;
            serve(bind, state).await?;
        }
        Commands::Init { db_url } => {
            let db = create_connection(DatabaseConfig {
                url: db_url,
                ..Default::default()
            })
            .await?;
            ensure_schema(&db).await?;
            info!("Database initialized");
        }
        Commands::PurgeSessions { db_url } => {
            let service = maintenance_service(db_url).await?;
            let purged = service.sessions().purge_expired().await?;
            println!("Purged {} expired sessions", purged);
        }
        Commands::RevokeSessions { user_id, db_url } => {
            let service = maintenance_service(db_url).await?;
            let revoked = service.sessions().revoke_all(user_id).await?;
            println!("Revoked {} sessions of user {}", revoked, user_id);
        }
    }

    Ok(())
}
