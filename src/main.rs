//! tiklive CLI
//!
//! Obtains API tokens (local storage scan or browser login), then drives the
//! LIVE session endpoints. Results go to stdout as JSON, logs to stderr.

use anyhow::Context;
use clap::Parser;
use serde_json::{json, Value};
use std::sync::Arc;
use tiklive::accounts::{Account, AccountKind, AccountRegistry, KeyringStore};
use tiklive::auth::driver_setup::{DriverInstall, InstallOutcome};
use tiklive::auth::exchange::ExchangeErrorEvent;
use tiklive::auth::webdriver::ChromeDriverLauncher;
use tiklive::auth::{
    BearerToken, CodeExchanger, LocalTokenScanner, ProgressEvent, TokenAcquirer, TokenEnvelope,
};
use tiklive::cli::{
    AccountsCommands, ApiArgs, Cli, Commands, DriverCommands, EndArgs, StartArgs, TokenSource,
};
use tiklive::config::Settings;
use tiklive::error::AppError;
use tiklive::streaming::{StreamClient, StreamError};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Settings key for the stream id of a token given on the command line
const DIRECT_TOKEN_KEY: &str = "direct";

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging based on verbosity flags; RUST_LOG wins when set
    let log_level = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr) // Log to stderr to keep stdout clean
        .init();

    match run(cli.command).await {
        Ok(output) => print_json(&output),
        Err(failure) => {
            print_json(&failure.output);
            std::process::exit(failure.exit_code);
        }
    }
}

/// What a failed command prints, and its exit status
struct Failure {
    output: Value,
    exit_code: i32,
}

impl Failure {
    /// Token commands fail with the `{token, error}` envelope plus the error code
    fn token(envelope: TokenEnvelope, err: AppError) -> Self {
        let mut output = json!(envelope);
        output["code"] = json!(err.error_code());
        Self {
            output,
            exit_code: err.exit_code(),
        }
    }
}

impl From<AppError> for Failure {
    fn from(err: AppError) -> Self {
        Self {
            output: json!(err.body()),
            exit_code: err.exit_code(),
        }
    }
}

fn print_json(value: &Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(_) => println!("{}", value),
    }
}

struct App {
    settings: Settings,
    http: reqwest::Client,
    registry: AccountRegistry,
}

impl App {
    fn load() -> Result<Self, AppError> {
        let settings = Settings::load().map_err(|e| AppError::Config(format!("{:#}", e)))?;
        let http = tiklive::http::api_client(&settings.api)?;
        let dir = AccountRegistry::default_dir()
            .context("Cannot determine data directory")?;
        let registry = AccountRegistry::open(dir, Arc::new(KeyringStore::new()))?;

        Ok(Self {
            settings,
            http,
            registry,
        })
    }

    fn acquirer(&self, keep_open: bool) -> Result<TokenAcquirer, AppError> {
        let mut scanner = LocalTokenScanner::for_current_platform();
        if let Some(dirs) = &self.settings.scanner.candidate_dirs {
            scanner = scanner.with_candidate_dirs(dirs.clone());
        }

        let launcher = ChromeDriverLauncher::new(DriverInstall::default_location()?)?;
        let exchanger = CodeExchanger::new(self.http.clone(), &self.settings.api.base_url);

        let exchange_options = self.settings.exchange.to_options().with_observer(|event: &ExchangeErrorEvent| {
            warn!(attempt = event.attempt, status = ?event.status, detail = ?event.detail, "token exchange error");
        });
        let mut capture_options = self.settings.capture.to_options(&self.settings.api.user_agent);
        capture_options.keep_open_on_error |= keep_open;

        Ok(TokenAcquirer::new(scanner, Arc::new(launcher), exchanger)
            .with_exchange_options(exchange_options)
            .with_capture_options(capture_options)
            .with_login_base(self.settings.api.base_url.clone()))
    }

    /// Session client for the selected token and its stream-id key
    fn stream_client(&mut self, api: &ApiArgs) -> Result<(StreamClient, String), AppError> {
        let (token, key) = match (&api.token, &api.account) {
            (Some(token), _) => (BearerToken::new(token.clone()), DIRECT_TOKEN_KEY.to_string()),
            (None, Some(id)) => {
                let token = self.registry.token(id)?;
                self.registry.touch(id)?;
                (token, id.clone())
            }
            (None, None) => {
                let account = self
                    .registry
                    .default_account()
                    .ok_or(AppError::Stream(StreamError::Unauthenticated))?;
                let token = self.registry.token(&account.id)?;
                self.registry.touch(&account.id)?;
                (token, account.id)
            }
        };

        let mut client = StreamClient::new(self.http.clone(), &self.settings.api);
        client.set_token(token);
        client.set_stream_id(self.settings.stream.last_stream_id.get(&key).cloned());
        Ok((client, key))
    }

    fn remember_stream(&mut self, key: &str, stream_id: Option<&str>) -> Result<(), AppError> {
        let streams = &mut self.settings.stream.last_stream_id;
        match stream_id {
            Some(id) => streams.insert(key.to_string(), id.to_string()),
            None => streams.remove(key),
        };
        self.settings
            .save()
            .map_err(|e| AppError::Config(format!("{:#}", e)))
    }
}

async fn run(command: Commands) -> Result<Value, Failure> {
    let mut app = App::load()?;

    match command {
        Commands::Token(args) => match args.source {
            TokenSource::Local { save_as } => token_local(&mut app, save_as).await,
            TokenSource::Web {
                account,
                save_as,
                keep_open,
            } => token_web(&mut app, account, save_as, keep_open).await,
        },
        Commands::Info(api) => Ok(info(&mut app, &api).await?),
        Commands::Search(args) => {
            let (client, _) = app.stream_client(&args.api)?;
            let categories = client.search(&args.query).await.map_err(AppError::from)?;
            Ok(json!(categories))
        }
        Commands::Start(args) => Ok(start(&mut app, args).await?),
        Commands::End(args) => Ok(end(&mut app, args).await?),
        Commands::Accounts(args) => Ok(accounts(&mut app, args.command)?),
        Commands::Driver(args) => Ok(driver(&app, args.command).await?),
    }
}

async fn info(app: &mut App, api: &ApiArgs) -> Result<Value, AppError> {
    let (client, _) = app.stream_client(api)?;
    let info = client.get_info().await?;
    Ok(json!({
        "username": info.username(),
        "application_status": info.application_status(),
        "can_go_live": info.can_go_live(),
        "info": info.raw(),
    }))
}

async fn token_local(app: &mut App, save_as: Option<String>) -> Result<Value, Failure> {
    let result = app.acquirer(false)?.local_token().await;
    let envelope = TokenEnvelope::from_scan(&result);
    let token = result.map_err(|e| Failure::token(envelope.clone(), e.into()))?;

    let account_id = match save_as {
        Some(name) => Some(save_account(app, Account::new(name, AccountKind::Local), &token).await?),
        None => None,
    };
    Ok(with_account(envelope, account_id))
}

async fn token_web(
    app: &mut App,
    account: Option<String>,
    save_as: Option<String>,
    keep_open: bool,
) -> Result<Value, Failure> {
    let target = match (account, save_as) {
        (Some(id), _) => Some(
            app.registry
                .get(&id)
                .cloned()
                .ok_or_else(|| AppError::from(tiklive::accounts::AccountError::NotFound(id)))?,
        ),
        (None, Some(name)) => Some(Account::new(name, AccountKind::Web)),
        (None, None) => None,
    };
    let profile_dir = match &target {
        Some(account) => Some(app.registry.profile_dir_for(&account.id).map_err(AppError::from)?),
        None => None,
    };

    let observer = |event: &ProgressEvent| info!(phase = ?event.phase, "{}", event.detail);
    let result = app
        .acquirer(keep_open)?
        .load_web_token(profile_dir.as_deref(), &observer)
        .await;
    let envelope = TokenEnvelope::from_web_login(&result);
    let token = result.map_err(|e| Failure::token(envelope.clone(), e.into()))?;

    let account_id = match target {
        Some(mut account) => {
            account.browser_profile_path = profile_dir;
            Some(save_account(app, account, &token).await?)
        }
        None => None,
    };
    Ok(with_account(envelope, account_id))
}

/// Store the account, filling in the username when the platform tells us
async fn save_account(app: &mut App, mut account: Account, token: &BearerToken) -> Result<String, AppError> {
    let mut client = StreamClient::new(app.http.clone(), &app.settings.api);
    client.set_token(token.clone());
    match client.get_info().await {
        Ok(info) => account.username = info.username().map(str::to_string),
        Err(e) => warn!(error = %e, "could not load account info"),
    }

    let id = account.id.clone();
    app.registry.upsert(account, token)?;
    app.registry.touch(&id)?;
    Ok(id)
}

fn with_account(envelope: TokenEnvelope, account_id: Option<String>) -> Value {
    let mut output = json!(envelope);
    if let Some(id) = account_id {
        output["account"] = json!(id);
    }
    output
}

async fn start(app: &mut App, args: StartArgs) -> Result<Value, AppError> {
    let (mut client, key) = app.stream_client(&args.api)?;
    let started = client
        .start(&args.title, &args.category, Some(args.audience.as_str()))
        .await?;

    if let Some(stream_id) = client.stream_id() {
        app.remember_stream(&key, Some(stream_id))?;
    }
    Ok(json!(started))
}

async fn end(app: &mut App, args: EndArgs) -> Result<Value, AppError> {
    let (mut client, key) = app.stream_client(&args.api)?;
    let ended = if args.force {
        client.force_end().await
    } else {
        client.end().await?
    };

    if !client.is_live() {
        app.remember_stream(&key, None)?;
    }
    Ok(json!({ "ended": ended, "live": client.is_live() }))
}

fn accounts(app: &mut App, command: AccountsCommands) -> Result<Value, AppError> {
    match command {
        AccountsCommands::List => {
            let default = app.registry.default_account().map(|a| a.id);
            Ok(json!({ "default": default, "accounts": app.registry.list() }))
        }
        AccountsCommands::Remove { id } => {
            let removed = app.registry.remove(&id)?;
            if app.settings.stream.last_stream_id.contains_key(&id) {
                app.remember_stream(&id, None)?;
            }
            Ok(json!({ "removed": removed }))
        }
        AccountsCommands::Default { id } => {
            app.registry.set_default(&id)?;
            Ok(json!({ "default": id }))
        }
    }
}

async fn driver(app: &App, command: DriverCommands) -> Result<Value, AppError> {
    let install = DriverInstall::default_location()?;
    match command {
        DriverCommands::Status => {
            let explicit = app.settings.capture.driver_path.as_deref();
            match install.locate(explicit) {
                Ok(path) => Ok(json!({ "installed": true, "path": path })),
                Err(e) => Ok(json!({ "installed": false, "error": e.to_string() })),
            }
        }
        DriverCommands::Install => {
            let outcome = install
                .install(&app.http, |step| info!("{}", step))
                .await?;
            Ok(match outcome {
                InstallOutcome::AlreadyInstalled(path) => json!({ "installed": true, "already_present": true, "path": path }),
                InstallOutcome::Installed { path, version } => {
                    json!({ "installed": true, "version": version, "path": path })
                }
            })
        }
    }
}
