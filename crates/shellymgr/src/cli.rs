// Command-line interface definition.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(
    name = "shellymgr",
    version,
    about = "Manage Shelly smart-home devices: discover, provision, configure, export"
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Config file path (default: platform config dir, then ./shellymgr.toml).
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Output format for listing commands.
    #[arg(long, short = 'o', value_enum, default_value_t = OutputFormat::Table, global = true)]
    pub output: OutputFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
    Yaml,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List devices in the inventory.
    List(ListArgs),

    /// Sweep a network for Shelly devices and adopt them.
    Discover(DiscoverArgs),

    /// Probe one address and add it to the inventory.
    Add(AddArgs),

    /// Scan for factory APs awaiting provisioning.
    ScanAp,

    /// Onboard a factory-fresh device onto a Wi-Fi network.
    Provision(ProvisionArgs),

    /// Run the HTTP API server.
    Server,

    /// Show or initialise the configuration file.
    Config(ConfigArgs),

    /// Generate shell completions.
    Completions(CompletionsArgs),
}

#[derive(Debug, Args)]
pub struct ListArgs {
    /// Filter by status (online, offline, unknown).
    #[arg(long)]
    pub status: Option<String>,

    /// Filter by model string.
    #[arg(long = "type")]
    pub device_type: Option<String>,

    /// Page number (1-based).
    #[arg(long, default_value_t = 1)]
    pub page: u32,

    #[arg(long, default_value_t = 50)]
    pub page_size: u32,
}

#[derive(Debug, Args)]
pub struct DiscoverArgs {
    /// CIDR to sweep, or `auto` for the configured networks.
    #[arg(default_value = "auto")]
    pub cidr: String,

    /// Overall sweep deadline in seconds.
    #[arg(long, default_value_t = 120)]
    pub timeout: u64,
}

#[derive(Debug, Args)]
pub struct AddArgs {
    /// Device IP address.
    pub ip: String,

    /// Display name to set in the inventory.
    pub name: Option<String>,
}

#[derive(Debug, Args)]
pub struct ProvisionArgs {
    /// Target Wi-Fi SSID.
    pub ssid: String,

    /// Target Wi-Fi password.
    pub password: Option<String>,

    /// Factory AP to provision; defaults to the strongest scanned one.
    #[arg(long)]
    pub device: Option<String>,

    /// Display name (default: Shelly-<last-6-MAC>).
    #[arg(long)]
    pub name: Option<String>,

    /// Enable device auth with this user.
    #[arg(long)]
    pub auth_user: Option<String>,

    #[arg(long)]
    pub auth_pass: Option<String>,

    /// MQTT broker as host:port.
    #[arg(long)]
    pub mqtt: Option<String>,

    /// Enable vendor cloud connectivity.
    #[arg(long)]
    pub cloud: bool,

    /// End-to-end deadline in seconds.
    #[arg(long, default_value_t = 600)]
    pub timeout: u64,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the effective configuration.
    Show,
    /// Write a default config file.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    #[arg(value_enum)]
    pub shell: clap_complete::Shell,
}
