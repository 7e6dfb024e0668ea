use anyhow::Result;
use authz::Role;
use clap::{Parser, Subcommand};
use colored::*;

mod commands;
mod logging;
mod utils;

use commands::{audit, health, serve, session, token, users};
use utils::env_paths::EnvPaths;

const DEFAULT_SERVER: &str = "http://localhost:3030";

/// Marain CLI - Command line interface for Marain authentication
#[derive(Parser)]
#[command(name = "marc")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the API server
    Serve {
        /// Address to bind
        #[arg(long, env = "MARAIN_HOST", default_value = "127.0.0.1")]
        host: String,

        /// Port to listen on
        #[arg(short, long, env = "MARAIN_PORT", default_value_t = 3030)]
        port: u16,
    },

    /// User account management
    User {
        #[command(subcommand)]
        action: UserAction,
    },

    /// Session token utilities
    Token {
        #[command(subcommand)]
        action: TokenAction,
    },

    /// Log in to a running server and inspect the cached session
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },

    /// Audit log commands
    Audit {
        #[command(subcommand)]
        action: AuditAction,
    },

    /// Check system health and status
    Health {
        /// Output format (json, text)
        #[arg(short, long, default_value = "text")]
        format: String,

        /// Server base URL
        #[arg(long, env = "MARAIN_SERVER", default_value = DEFAULT_SERVER)]
        server: String,
    },
}

#[derive(Subcommand)]
enum UserAction {
    /// Create a user with an explicit role
    Add {
        email: String,

        /// Display name
        #[arg(short, long)]
        name: String,

        /// Password (at least 8 characters)
        #[arg(long, env = "MARC_PASSWORD", hide_env_values = true)]
        password: String,

        /// reader, author or admin
        #[arg(short, long, default_value = "reader")]
        role: Role,
    },

    /// List all users
    List {
        /// Output format (json, text)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Change a user's role (email or id)
    SetRole { user: String, role: Role },

    /// Block future logins for a user (email or id)
    Deactivate { user: String },

    /// Allow a deactivated user to log in again (email or id)
    Activate { user: String },
}

#[derive(Subcommand)]
enum TokenAction {
    /// Verify a token and show its claims
    Inspect {
        token: String,

        /// Output format (json, text)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Issue a token for a stored user
    Issue { email: String },
}

#[derive(Subcommand)]
enum SessionAction {
    /// Log in and cache the session locally
    Login {
        email: String,

        #[arg(long, env = "MARC_PASSWORD", hide_env_values = true)]
        password: String,

        /// Server base URL
        #[arg(long, env = "MARAIN_SERVER", default_value = DEFAULT_SERVER)]
        server: String,
    },

    /// Ask the server who the cached token belongs to
    Whoami {
        /// Server base URL
        #[arg(long, env = "MARAIN_SERVER", default_value = DEFAULT_SERVER)]
        server: String,
    },

    /// Forget the cached session
    Logout {
        /// Server base URL
        #[arg(long, env = "MARAIN_SERVER", default_value = DEFAULT_SERVER)]
        server: String,
    },

    /// Show the cached identity without contacting the server
    Status,

    /// Whether the cached role covers a role (advisory only)
    Can { role: Role },
}

#[derive(Subcommand)]
enum AuditAction {
    /// Verify the audit log hash chain
    Verify {
        /// Output format (json, text)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Print the latest audit entries as JSON lines
    Tail {
        #[arg(short = 'n', long, default_value_t = 20)]
        count: usize,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let env_paths = EnvPaths::load()?;

    let log_level = match (&cli.command, cli.verbose) {
        (_, true) => "debug",
        (Commands::Serve { .. }, false) => "info",
        _ => "warn",
    };
    let _log_guard = logging::init_logging(&env_paths, log_level)?;

    match cli.command {
        Commands::Serve { host, port } => {
            serve::execute(&env_paths, host, port).await?;
        }
        Commands::User { action } => match action {
            UserAction::Add {
                email,
                name,
                password,
                role,
            } => users::add(&env_paths, email, name, password, role).await?,
            UserAction::List { format } => users::list(&env_paths, format).await?,
            UserAction::SetRole { user, role } => users::set_role(&env_paths, user, role).await?,
            UserAction::Deactivate { user } => users::set_active(&env_paths, user, false).await?,
            UserAction::Activate { user } => users::set_active(&env_paths, user, true).await?,
        },
        Commands::Token { action } => match action {
            TokenAction::Inspect { token: raw, format } => token::inspect(raw, format).await?,
            TokenAction::Issue { email } => token::issue(&env_paths, email).await?,
        },
        Commands::Session { action } => match action {
            SessionAction::Login {
                email,
                password,
                server,
            } => session::login(&env_paths, server, email, password).await?,
            SessionAction::Whoami { server } => session::whoami(&env_paths, server).await?,
            SessionAction::Logout { server } => session::logout(&env_paths, server).await?,
            SessionAction::Status => session::status(&env_paths)?,
            SessionAction::Can { role } => session::can(&env_paths, role)?,
        },
        Commands::Audit { action } => match action {
            AuditAction::Verify { format } => audit::verify(&env_paths, format).await?,
            AuditAction::Tail { count } => audit::tail(&env_paths, count).await?,
        },
        Commands::Health { format, server } => {
            health::execute(&env_paths, format, server).await?;
        }
    }

    Ok(())
}
