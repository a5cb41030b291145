pub mod init;
pub mod listing;
pub mod run;
pub mod status;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "vendorsync", about = "Load partner payouts from the vendor portal into the payments store.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write settings and create the payments store.
    Init {
        /// Path of the SQLite payments store
        #[arg(long)]
        store: Option<String>,
        /// Portal base URL
        #[arg(long = "base-url")]
        base_url: Option<String>,
        /// Portal login of the service account
        #[arg(long)]
        login: Option<String>,
    },
    /// Load premium and standard payouts for one month.
    Run {
        /// Any day of the target month, DD.MM.YYYY (default: today)
        #[arg(long)]
        date: Option<String>,
        /// Print the outcome as {"statusCode", "body"} JSON
        #[arg(long)]
        json: bool,
    },
    /// List the vendor's apps.
    Apps,
    /// List the clients of one app.
    Clients {
        /// App id, as shown by `vendorsync apps`
        app_id: String,
    },
    /// Show settings and store row counts.
    Status,
}
