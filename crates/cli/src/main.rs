//! PipeCRM CLI - Command line front-end for the PipeCRM client.
//!
//! # Usage
//!
//! ```bash
//! # Sign in (the password may also come from PIPECRM_PASSWORD)
//! pipecrm login -e ana@example.com --password secret1
//!
//! # Complete a sign-in that requires an emailed code
//! pipecrm mfa 123456
//!
//! # Show the dashboard metrics
//! pipecrm dashboard
//!
//! # Show the pipeline board and move a deal
//! pipecrm pipeline
//! pipecrm move <deal-id> <stage-id>
//! ```
//!
//! Every command navigates the router first, so the same guard that
//! protects the app's screens decides whether the command may run.
//!
//! # Environment Variables
//!
//! - `PIPECRM_SUPABASE_URL`, `PIPECRM_SUPABASE_KEY` - Backend (required)
//! - `PIPECRM_SITE_URL` - Public origin used in auth redirects
//! - `PIPECRM_SESSION_FILE` - Where the session persists between runs
//! - `PIPECRM_LOG_FORMAT` - `json` for JSON logs
//! - `SENTRY_DSN` - Error tracking

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use pipecrm_client::supabase::{AuthApi, DataApi};
use pipecrm_client::{AppContext, ClientConfig, tracking};
use pipecrm_core::{AppError, DealId, StageId};
use sentry::integrations::tracing as sentry_tracing;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod output;

use commands::CliError;

#[derive(Parser)]
#[command(name = "pipecrm")]
#[command(author, version, about = "PipeCRM command line client")]
struct Cli {
    /// Where the session persists between runs
    #[arg(
        long,
        global = true,
        env = "PIPECRM_SESSION_FILE",
        default_value = ".pipecrm-session.json"
    )]
    session_file: PathBuf,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in with email and password
    Login {
        #[arg(short, long)]
        email: String,

        #[arg(long, env = "PIPECRM_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Complete sign-in with the emailed one-time code
    Mfa { code: String },
    /// Register a new account
    Signup {
        #[arg(short, long)]
        email: String,

        #[arg(long, env = "PIPECRM_PASSWORD", hide_env_values = true)]
        password: String,

        #[arg(long)]
        confirm_password: String,
    },
    /// Print the URL that starts a Google sign-in
    Google,
    /// Finish a redirect-based sign-in from the URL the browser landed on
    Callback { url: url::Url },
    /// Email a password recovery link
    Forgot {
        #[arg(short, long)]
        email: String,
    },
    /// Set a new password
    Reset {
        #[arg(long, env = "PIPECRM_NEW_PASSWORD", hide_env_values = true)]
        password: String,

        #[arg(long)]
        confirm_password: String,
    },
    /// Sign out
    Logout,
    /// Show the signed-in user
    Whoami,
    /// Navigate to an app path and print where the guard lands
    Open { path: String },
    /// Show dashboard metrics
    Dashboard,
    /// Show the default pipeline board
    Pipeline,
    /// Move a deal to another stage of the default pipeline
    Move { deal_id: DealId, stage_id: StageId },
    /// List deals, or show one
    Deals { id: Option<DealId> },
    /// List contacts
    Contacts,
    /// List companies
    Companies,
    /// List activities
    Activities {
        /// Only the activities of this deal
        #[arg(long)]
        deal: Option<DealId>,

        /// Only the latest N activities
        #[arg(long)]
        recent: Option<usize>,
    },
}

/// Log target for command outcomes meant only for the terminal. Errors
/// logged here were already reported by the client.
const OUTCOME_TARGET: &str = "pipecrm_cli::outcome";

/// Filter tracing events to Sentry event types.
fn sentry_event_filter(metadata: &tracing::Metadata<'_>) -> sentry_tracing::EventFilter {
    event_kind(metadata.target(), *metadata.level())
}

fn event_kind(target: &str, level: tracing::Level) -> sentry_tracing::EventFilter {
    if target == OUTCOME_TARGET {
        return sentry_tracing::EventFilter::Breadcrumb;
    }
    match level {
        tracing::Level::ERROR | tracing::Level::WARN => sentry_tracing::EventFilter::Event,
        tracing::Level::INFO | tracing::Level::DEBUG => sentry_tracing::EventFilter::Breadcrumb,
        _ => sentry_tracing::EventFilter::Ignore,
    }
}

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "pipecrm_client=info,pipecrm_cli=info".into());
    let json = std::env::var("PIPECRM_LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(sentry_tracing::layer().event_filter(sentry_event_filter));

    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match ClientConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            init_tracing();
            let error = AppError::from(e);
            tracing::error!(code = %error.code(), error = %error, "Invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    // Sentry must be initialized before the tracing subscriber
    let _sentry_guard = tracking::init_sentry(&config.sentry);
    init_tracing();

    let config = ClientConfig {
        session_file: Some(cli.session_file.clone()),
        ..config
    };

    let ctx = match AppContext::from_config(&config) {
        Ok(ctx) => ctx,
        Err(e) => {
            tracing::error!(code = %e.code(), error = %e, "Failed to start");
            return ExitCode::FAILURE;
        }
    };

    match run(&ctx, cli.command, cli.json).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(CliError::Redirected(location)) => {
            tracing::warn!(target: OUTCOME_TARGET, %location, "Not allowed here; sign in first");
            ExitCode::FAILURE
        }
        Err(CliError::App(e)) => {
            tracing::error!(target: OUTCOME_TARGET, code = %e.code(), "Command failed: {e}");
            ExitCode::FAILURE
        }
        Err(e) => {
            tracing::error!("Command failed: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run<B>(ctx: &AppContext<B>, command: Commands, json: bool) -> Result<(), CliError>
where
    B: AuthApi + DataApi + Clone,
{
    let out = output::Output::new(json);
    match command {
        Commands::Login { email, password } => commands::auth::login(ctx, &out, &email, &password).await,
        Commands::Mfa { code } => commands::auth::mfa(ctx, &out, &code).await,
        Commands::Signup {
            email,
            password,
            confirm_password,
        } => commands::auth::signup(ctx, &out, &email, &password, &confirm_password).await,
        Commands::Google => commands::auth::google(ctx, &out).await,
        Commands::Callback { url } => commands::auth::callback(ctx, &out, &url).await,
        Commands::Forgot { email } => commands::auth::forgot(ctx, &out, &email).await,
        Commands::Reset {
            password,
            confirm_password,
        } => commands::auth::reset(ctx, &out, &password, &confirm_password).await,
        Commands::Logout => commands::auth::logout(ctx, &out).await,
        Commands::Whoami => commands::auth::whoami(ctx, &out).await,
        Commands::Open { path } => commands::auth::open(ctx, &out, &path).await,
        Commands::Dashboard => commands::data::dashboard(ctx, &out).await,
        Commands::Pipeline => commands::data::pipeline(ctx, &out).await,
        Commands::Move { deal_id, stage_id } => {
            commands::data::move_deal(ctx, &out, deal_id, stage_id).await
        }
        Commands::Deals { id } => commands::data::deals(ctx, &out, id).await,
        Commands::Contacts => commands::data::contacts(ctx, &out).await,
        Commands::Companies => commands::data::companies(ctx, &out).await,
        Commands::Activities { deal, recent } => {
            commands::data::activities(ctx, &out, deal, recent).await
        }
    }
}
