use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tokio::net::TcpListener;

use artistore::auth::{Secret, Token};
use artistore::client::{self, ClientError};
use artistore::config::{generate_config_template, ServeConfig};
use artistore::key::{verify_key, verify_token_key};
use artistore::routes::build_router;
use artistore::state::AppState;
use artistore::store::{spawn_sweeper, LocalStore};

/// Period sweeps run on this cadence regardless of the retention period.
const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[derive(Parser)]
#[command(name = "artistore", version, about = "Artistore - A simple artifact store server.")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start Artistore server
    Serve(ServeConfig),

    /// Generate a server secret
    ///
    /// The secret is used to generate and verify tokens. Set it in the
    /// ARTISTORE_SECRET environment variable of the server.
    Secret,

    /// Generate a publish token
    Token(TokenArgs),

    /// Get an artifact from Artistore
    Get(GetArgs),

    /// Publish an artifact to Artistore
    Publish(PublishArgs),
}

#[derive(Args)]
struct TokenArgs {
    /// Key the token authorizes; end it with '/' to make a prefix token
    key: String,

    /// Server secret. See also 'artistore secret'
    #[arg(long, env = "ARTISTORE_SECRET")]
    secret: Option<String>,
}

#[derive(Args)]
struct GetArgs {
    key: String,

    /// URL for Artistore server
    #[arg(long, env = "ARTISTORE_SERVER", default_value = "http://localhost:3000")]
    server: String,

    /// Revision of the artifact (default latest)
    #[arg(short, long)]
    revision: Option<u64>,

    /// Output file name (default stdout)
    #[arg(short, long)]
    output: Option<String>,
}

#[derive(Args)]
struct PublishArgs {
    key: String,

    /// URL for Artistore server
    #[arg(long, env = "ARTISTORE_SERVER", default_value = "http://localhost:3000")]
    server: String,

    /// Client token. See also 'artistore token'
    #[arg(long, env = "ARTISTORE_TOKEN")]
    token: Option<String>,

    /// Server secret. See also 'artistore secret'
    #[arg(long, env = "ARTISTORE_SECRET")]
    secret: Option<String>,

    /// The file to publish (default: same as key)
    #[arg(short, long)]
    file: Option<String>,
}

/// Exit code 2 for mistakes the user can fix, 1 for everything else.
enum CliError {
    Usage(String),
    Runtime(String),
}

fn usage(err: impl std::fmt::Display) -> CliError {
    CliError::Usage(err.to_string())
}

fn runtime(err: impl std::fmt::Display) -> CliError {
    CliError::Runtime(err.to_string())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Serve(args) => serve(args).await,
        Command::Secret => secret(),
        Command::Token(args) => token(args),
        Command::Get(args) => get(args).await,
        Command::Publish(args) => publish(args).await,
    };

    match result {
        Ok(()) => {}
        Err(CliError::Usage(message)) => {
            eprintln!("{message}");
            std::process::exit(2);
        }
        Err(CliError::Runtime(message)) => {
            eprintln!("{message}");
            std::process::exit(1);
        }
    }
}

async fn serve(args: ServeConfig) -> Result<(), CliError> {
    let config = ServeConfig::load(args).map_err(usage)?;

    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "artistore=info".parse().expect("valid default filter"));
    if config.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().pretty().with_env_filter(filter).init();
    }

    let secret = config.parsed_secret().map_err(usage)?;
    let retain = config.retain_policy().map_err(usage)?;

    let store = Arc::new(LocalStore::new(&config.store, retain));
    spawn_sweeper(store.clone(), SWEEP_INTERVAL);

    let app = build_router(AppState { store, secret });

    let listener = TcpListener::bind(&config.listen).await.map_err(runtime)?;
    tracing::info!("Starting Artistore on {}", config.listen);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .map_err(runtime)?;

    Ok(())
}

fn secret() -> Result<(), CliError> {
    println!("{}", Secret::generate());
    Ok(())
}

fn token(args: TokenArgs) -> Result<(), CliError> {
    verify_token_key(&args.key).map_err(usage)?;

    let secret = parse_secret_arg(args.secret.as_deref())?;
    println!("{}", Token::for_key(&secret, &args.key));
    Ok(())
}

async fn get(args: GetArgs) -> Result<(), CliError> {
    verify_key(&args.key).map_err(usage)?;

    client::fetch(
        &args.server,
        &args.key,
        args.revision,
        args.output.as_deref(),
    )
    .await
    .map_err(client_error)
}

async fn publish(args: PublishArgs) -> Result<(), CliError> {
    verify_key(&args.key).map_err(usage)?;

    let token = match args.token.as_deref().map(str::trim) {
        Some(raw) if !raw.is_empty() => Token::parse(raw).map_err(usage)?,
        _ => match args.secret.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => {
                Token::for_key(&Secret::parse(raw).map_err(usage)?, &args.key)
            }
            _ => {
                return Err(usage(
                    "Either secret or token is required.\n\
                     Please set at least one of --token flag, ARTISTORE_TOKEN environment \
                     variable (recommended), --secret flag, or ARTISTORE_SECRET environment \
                     variable.",
                ))
            }
        },
    };

    let file = args.file.as_deref().unwrap_or(&args.key);
    let message = client::publish(&args.server, &token, &args.key, file)
        .await
        .map_err(client_error)?;
    print!("{message}");
    Ok(())
}

fn parse_secret_arg(raw: Option<&str>) -> Result<Secret, CliError> {
    match raw.map(str::trim) {
        Some(raw) if !raw.is_empty() => Secret::parse(raw).map_err(usage),
        _ => Err(usage(artistore::auth::AuthError::SecretNotSet)),
    }
}

fn client_error(err: ClientError) -> CliError {
    runtime(err)
}
