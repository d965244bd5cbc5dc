use log::{error, info};
use monzo_auth::{CallbackInput, Error, Scheduler};
use serde::Serialize;
use service::config::{Command, Config, ConfigCommand, TokenCommand};
use service::{logging::Logger, AppState};
use tokio::sync::watch;

#[tokio::main]
async fn main() {
    let config = Config::new();
    Logger::init_logger(&config as &Config);

    info!("Starting up in {} mode", config.runtime_env());

    let app_state = match AppState::new(config) {
        Ok(app_state) => app_state,
        Err(e) => {
            error!("Failed to initialise backend: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = run(&app_state).await {
        error!("{e}");
        std::process::exit(1);
    }
}

async fn run(app_state: &AppState) -> Result<(), Error> {
    let backend = app_state.backend_ref();

    match app_state.config.command.clone() {
        Command::Config { action } => match action {
            ConfigCommand::Read => print_json(&backend.read_config().await?),
            ConfigCommand::Write(args) => backend.write_config(args.into()).await?,
            ConfigCommand::Delete => backend.delete_config().await?,
        },
        Command::AuthUrl => print_json(&backend.build_auth_url().await?),
        Command::Callback { code, state } => {
            print_json(&backend.handle_callback(CallbackInput { code, state }).await?)
        }
        Command::Token { action } => match action {
            TokenCommand::Read => print_json(&backend.read_token().await?),
            TokenCommand::Refresh => print_json(&backend.refresh_token().await?),
            TokenCommand::Delete => backend.delete_token().await?,
        },
        Command::Renew => renew_until_interrupted(app_state).await,
        Command::HelpText => println!("{}", monzo_auth::backend::HELP),
    }

    Ok(())
}

async fn renew_until_interrupted(app_state: &AppState) {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = Scheduler::new(
        app_state.backend.clone(),
        app_state.config.refresh_interval(),
    );
    let handle = tokio::spawn(scheduler.run(shutdown_rx));

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {e}");
    }

    info!("Shutting down token renewal");
    let _ = shutdown_tx.send(true);
    if let Err(e) = handle.await {
        error!("Token renewal task ended abnormally: {e}");
    }
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{json}"),
        Err(e) => error!("Failed to render response: {e}"),
    }
}
