//! Command-line interface definition

use clap::{Args, Parser, Subcommand};

/// tiklive CLI
#[derive(Parser, Debug)]
#[command(name = "tiklive")]
#[command(about = "TikTok LIVE credentials and RTMP session control", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress non-error output (no short flag to avoid conflicts)
    #[arg(long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Obtain an API token
    Token(TokenArgs),
    /// Show account and application status
    Info(ApiArgs),
    /// Search broadcast categories
    Search(SearchArgs),
    /// Start a broadcast and print its RTMP credentials
    Start(StartArgs),
    /// End the active broadcast
    End(EndArgs),
    /// Manage saved accounts
    Accounts(AccountsArgs),
    /// Check or install the browser driver
    Driver(DriverArgs),
}

#[derive(Args, Debug)]
pub struct TokenArgs {
    #[command(subcommand)]
    pub source: TokenSource,
}

#[derive(Subcommand, Debug)]
pub enum TokenSource {
    /// Read a token the desktop app or a browser already stored
    Local {
        /// Save the token as an account with this name
        #[arg(long)]
        save_as: Option<String>,
    },
    /// Log in through an automated browser window
    Web {
        /// Reuse the browser profile of this saved account
        #[arg(short = 'a', long)]
        account: Option<String>,

        /// Save the token as a new account with this name
        #[arg(long, conflicts_with = "account")]
        save_as: Option<String>,

        /// Keep the browser open for a while if the login fails
        #[arg(long)]
        keep_open: bool,
    },
}

/// Token selection shared by every API command
#[derive(Args, Debug, Clone, Default)]
pub struct ApiArgs {
    /// Bearer token to use instead of a saved account
    #[arg(long, env = "TIKLIVE_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Saved account to use (defaults to the default account)
    #[arg(short = 'a', long)]
    pub account: Option<String>,
}

#[derive(Args, Debug)]
pub struct SearchArgs {
    #[command(flatten)]
    pub api: ApiArgs,

    /// Category name to look up
    pub query: String,
}

#[derive(Args, Debug)]
pub struct StartArgs {
    #[command(flatten)]
    pub api: ApiArgs,

    /// Broadcast title
    #[arg(short = 't', long)]
    pub title: String,

    /// Category id (`game_mask_id` from `search`; empty for Other)
    #[arg(short = 'c', long, allow_hyphen_values = true)]
    pub category: String,

    /// Audience type
    #[arg(long, default_value = "0")]
    pub audience: String,
}

#[derive(Args, Debug)]
pub struct EndArgs {
    #[command(flatten)]
    pub api: ApiArgs,

    /// Forget the stored stream id even if the platform does not confirm the end
    #[arg(long)]
    pub force: bool,
}

#[derive(Args, Debug)]
pub struct AccountsArgs {
    #[command(subcommand)]
    pub command: AccountsCommands,
}

#[derive(Subcommand, Debug)]
pub enum AccountsCommands {
    /// List saved accounts, most recently used first
    List,
    /// Remove a saved account and its token
    Remove {
        /// Account id
        id: String,
    },
    /// Set default account
    Default {
        /// Account id
        id: String,
    },
}

#[derive(Args, Debug)]
pub struct DriverArgs {
    #[command(subcommand)]
    pub command: DriverCommands,
}

#[derive(Subcommand, Debug)]
pub enum DriverCommands {
    /// Show where the driver would be loaded from
    Status,
    /// Download the pinned ChromeDriver build
    Install,
}
