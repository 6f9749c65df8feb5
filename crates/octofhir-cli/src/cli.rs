use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "octofhir-live")]
#[command(about = "Watch live clinical resource updates from an OctoFHIR realtime endpoint")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Realtime WebSocket endpoint (overrides profile and config file)
    #[arg(short, long, global = true, env = "OCTOFHIR_REALTIME_URL")]
    pub endpoint: Option<String>,

    /// Config profile name
    #[arg(short, long, global = true, env = "OCTOFHIR_PROFILE", default_value = "default")]
    pub profile: String,

    /// Realtime settings file (defaults to ./octofhir-realtime.toml when present)
    #[arg(short, long, global = true, env = "OCTOFHIR_REALTIME_CONFIG")]
    pub config: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Store credentials for the realtime endpoint
    Login(LoginArgs),
    /// Remove stored credentials
    Logout,
    /// Show stored credentials
    Whoami,
    /// Stream live updates until interrupted
    Watch(WatchArgs),
    /// Manage CLI configuration
    Config(ConfigArgs),
}

#[derive(clap::Args)]
pub struct LoginArgs {
    /// Bearer token to store as-is
    #[arg(long, conflicts_with_all = ["token_url", "client_id", "client_secret"])]
    pub token: Option<String>,
    /// OAuth token endpoint for the client_credentials grant
    #[arg(long, requires_all = ["client_id", "client_secret"])]
    pub token_url: Option<String>,
    /// OAuth client ID
    #[arg(long)]
    pub client_id: Option<String>,
    /// OAuth client secret
    #[arg(long)]
    pub client_secret: Option<String>,
}

#[derive(clap::Args)]
pub struct WatchArgs {
    #[command(subcommand)]
    pub target: WatchTarget,

    /// Print each update as a JSON line instead of a summary
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Subcommand)]
pub enum WatchTarget {
    /// Updates for one patient
    Patient {
        /// Patient ID
        patient_id: String,
        /// Resource types to include (all when omitted)
        #[arg(long, value_delimiter = ',')]
        types: Vec<String>,
    },
    /// Updates published to a room
    Room {
        /// Room name
        name: String,
    },
    /// Every update the server delivers
    All,
}

#[derive(clap::Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show current config
    Show,
    /// Set config value
    Set(ConfigSetArgs),
}

#[derive(clap::Args)]
pub struct ConfigSetArgs {
    /// Key to set (endpoint, log_level)
    pub key: String,
    /// Value
    pub value: String,
}
