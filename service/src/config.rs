use clap::builder::TypedValueParser as _;
use clap::{ArgAction, Args, Parser, Subcommand};
use dotenvy::dotenv;
use log::LevelFilter;
use monzo_auth::config::ConfigInput;
use monzo_auth::oauth::token::ManagerSettings;
use secrecy::SecretString;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Upper bound for the state TTL and the refresh margin.
const MAX_WINDOW_SECS: i64 = 86_400;

#[derive(Clone, Debug, PartialEq)]
pub enum RustEnv {
    Development,
    Production,
    Staging,
}

#[derive(Debug, PartialEq, Eq)]
pub struct RustEnvParseError;

impl FromStr for RustEnv {
    type Err = RustEnvParseError;
    fn from_str(level: &str) -> Result<RustEnv, Self::Err> {
        match level.to_lowercase().as_str() {
            "development" => Ok(RustEnv::Development),
            "production" => Ok(RustEnv::Production),
            "staging" => Ok(RustEnv::Staging),
            _ => Err(RustEnvParseError),
        }
    }
}

impl fmt::Display for RustEnv {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RustEnv::Development => write!(f, "development"),
            RustEnv::Production => write!(f, "production"),
            RustEnv::Staging => write!(f, "staging"),
        }
    }
}

#[derive(Clone, Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Directory holding the config, token and pending authorization records
    #[arg(short, long, env, default_value = "./data")]
    pub data_dir: PathBuf,

    /// Timeout in seconds for each call to the Monzo token endpoint
    #[arg(long, env, default_value_t = 30)]
    pub http_timeout_secs: u64,

    /// Seconds an authorization URL stays redeemable (1 to 86400)
    #[arg(
        long,
        env,
        default_value_t = 600,
        value_parser = clap::value_parser!(i64).range(1..=MAX_WINDOW_SECS),
    )]
    pub state_ttl_secs: i64,

    /// Seconds before expiry at which a token is refreshed (0 to 86400)
    #[arg(
        long,
        env,
        default_value_t = 300,
        value_parser = clap::value_parser!(i64).range(0..=MAX_WINDOW_SECS),
    )]
    pub refresh_margin_secs: i64,

    /// Seconds between renewal passes of the `renew` command
    #[arg(long, env, default_value_t = 60)]
    pub refresh_interval_secs: u64,

    /// Refresh a stale token inline when it is read
    #[arg(long, env, default_value_t = true, action = ArgAction::Set)]
    pub refresh_on_read: bool,

    /// Set the log level verbosity threshold (level) to control what gets displayed on console output
    #[arg(
        short,
        long,
        env,
        default_value_t = LevelFilter::Info,
        value_parser = clap::builder::PossibleValuesParser::new(["OFF", "ERROR", "WARN", "INFO", "DEBUG", "TRACE"])
            .map(|s| s.parse::<LevelFilter>().unwrap()),
        )]
    pub log_level_filter: LevelFilter,

    /// Set the Rust runtime environment to use.
    #[arg(
    short,
    long,
    env,
    default_value_t = RustEnv::Development,
    value_parser = clap::builder::PossibleValuesParser::new([
        "DEVELOPMENT", "PRODUCTION", "STAGING",
        "development", "production", "staging"
    ])
        .map(|s| s.parse::<RustEnv>().unwrap()),
    )]
    pub runtime_env: RustEnv,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Clone, Debug, Subcommand)]
pub enum Command {
    /// Manage the OAuth client configuration
    Config {
        #[command(subcommand)]
        action: ConfigCommand,
    },
    /// Issue a one-time Monzo authorization URL
    AuthUrl,
    /// Complete an authorization with the parameters Monzo redirected back with
    Callback {
        #[arg(long)]
        code: String,
        #[arg(long)]
        state: String,
    },
    /// Read, refresh or delete the stored token
    Token {
        #[command(subcommand)]
        action: TokenCommand,
    },
    /// Keep the token renewed until interrupted
    Renew,
    /// Print a short description of this backend
    HelpText,
}

#[derive(Clone, Debug, Subcommand)]
pub enum ConfigCommand {
    Read,
    /// Create the configuration, or update the fields given
    Write(ConfigWriteArgs),
    Delete,
}

#[derive(Clone, Debug, Subcommand)]
pub enum TokenCommand {
    Read,
    Refresh,
    Delete,
}

#[derive(Clone, Debug, Args)]
pub struct ConfigWriteArgs {
    /// The OAuth client ID issued by Monzo
    #[arg(long, env = "MONZO_CLIENT_ID")]
    pub client_id: Option<String>,

    /// The OAuth client secret issued by Monzo
    #[arg(
        long,
        env = "MONZO_CLIENT_SECRET",
        hide_env_values = true,
        value_parser = |s: &str| Ok::<_, std::convert::Infallible>(SecretString::from(s.to_string())),
    )]
    pub client_secret: Option<SecretString>,

    /// Authorization endpoint, defaults to Monzo's
    #[arg(long)]
    pub auth_url: Option<String>,

    /// Token endpoint, defaults to Monzo's
    #[arg(long)]
    pub token_url: Option<String>,

    /// Base URL this service is reachable at; `/callback` is appended for the redirect URI
    #[arg(long)]
    pub redirect_base_url: Option<String>,
}

impl From<ConfigWriteArgs> for ConfigInput {
    fn from(args: ConfigWriteArgs) -> Self {
        ConfigInput {
            client_id: args.client_id,
            client_secret: args.client_secret,
            auth_url: args.auth_url,
            token_url: args.token_url,
            redirect_base_url: args.redirect_base_url,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        // Load .env file first
        dotenv().ok();
        // Then parse the command line parameters and flags
        Config::parse()
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs.max(1))
    }

    pub fn manager_settings(&self) -> ManagerSettings {
        ManagerSettings {
            state_ttl: chrono::Duration::seconds(self.state_ttl_secs),
            refresh_margin: chrono::Duration::seconds(self.refresh_margin_secs),
            refresh_on_read: self.refresh_on_read,
        }
    }

    pub fn runtime_env(&self) -> RustEnv {
        self.runtime_env.clone()
    }
}
