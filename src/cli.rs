use clap::{Parser, Subcommand};

/// tokenrelay — OAuth2 token-refreshing forward proxy
#[derive(Parser)]
#[command(name = "tokenrelay", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the proxy server
    Serve {
        /// Port to bind (overrides TOKENRELAY_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Manage stored connections
    Connections {
        #[command(subcommand)]
        command: ConnectionCommands,
    },

    /// List providers available in the registry
    Providers,
}

#[derive(Subcommand)]
pub enum ConnectionCommands {
    /// List stored connections
    List,

    /// Delete a stored connection
    Revoke {
        #[arg(long)]
        provider: String,
        #[arg(long, default_value = "default")]
        account: String,
    },
}
