use clap::{Parser, Subcommand};
use nutsack_wallet::SelectionStrategy;
use std::path::PathBuf;

mod commands;

/// nutsack ecash wallet command-line interface.
#[derive(Parser)]
#[command(name = "nutsack")]
#[command(about = "Inspect a nutsack wallet cache and query Cashu mints")]
#[command(version)]
struct Cli {
    /// Wallet state database (SQLite).
    #[arg(long)]
    state: Option<String>,

    /// Wallet identity (owner public key). Optional when the database holds
    /// exactly one wallet.
    #[arg(long)]
    identity: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List wallet identities in the state database.
    Identities,

    /// Show spendable balance per mint.
    Balance,

    /// Show transaction history, newest first.
    History {
        /// Maximum number of entries to show.
        #[arg(long, default_value = "25")]
        limit: usize,
    },

    /// List held proofs.
    Proofs {
        /// Only proofs of this mint.
        #[arg(long)]
        mint: Option<String>,
    },

    /// List the wallet's mints and their keysets.
    Mints,

    /// Fetch and print a mint's info document.
    MintInfo {
        /// Mint URL.
        url: String,
    },

    /// Fetch keysets and keys for a wallet mint and store them.
    RefreshKeysets {
        /// Mint URL.
        url: String,
    },

    /// Check the state of a mint or melt quote.
    QuoteStatus {
        /// Mint URL.
        url: String,
        /// Quote id.
        quote: String,
        /// Treat the id as a melt quote.
        #[arg(long)]
        melt: bool,
    },

    /// Decode the amount of a BOLT11 invoice.
    DecodeInvoice {
        invoice: String,
    },

    /// Show which proofs would pay an amount (nothing is spent).
    Select {
        /// Mint URL.
        url: String,
        /// Amount in sats.
        amount: u64,
        /// Fee reserve in sats.
        #[arg(long, default_value = "0")]
        fee_reserve: u64,
        /// Selection strategy.
        #[arg(long, default_value = "default")]
        strategy: SelectionStrategy,
    },
}

/// Application context shared across commands.
pub struct AppContext {
    state_path: PathBuf,
    identity: Option<String>,
}

impl AppContext {
    fn from_cli(cli: &Cli) -> Self {
        let state_path = match cli.state {
            Some(ref path) => PathBuf::from(path),
            None => default_state_dir().join("wallet.db"),
        };
        Self {
            state_path,
            identity: cli.identity.clone(),
        }
    }
}

fn default_state_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("nutsack")
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let ctx = AppContext::from_cli(&cli);

    let result = match cli.command {
        Commands::Identities => commands::list_identities(&ctx),
        Commands::Balance => commands::show_balance(&ctx),
        Commands::History { limit } => commands::show_history(&ctx, limit),
        Commands::Proofs { mint } => commands::show_proofs(&ctx, mint.as_deref()),
        Commands::Mints => commands::show_mints(&ctx),
        Commands::MintInfo { url } => commands::mint_info(&url).await,
        Commands::RefreshKeysets { url } => commands::refresh_keysets(&ctx, &url).await,
        Commands::QuoteStatus { url, quote, melt } => {
            commands::quote_status(&url, &quote, melt).await
        }
        Commands::DecodeInvoice { invoice } => commands::decode_invoice(&invoice),
        Commands::Select {
            url,
            amount,
            fee_reserve,
            strategy,
        } => commands::select_proofs(&ctx, &url, amount, fee_reserve, strategy),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
