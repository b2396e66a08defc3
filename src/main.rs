//! walletd - custodial wallet backend and offline signing tool
//!
//! `start` runs the deposit/withdrawal pipeline; the remaining subcommands
//! are the air-gapped tool sharing the same keystore and derivation rules.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::error;

use wallet_core::cli::commands;
use wallet_core::config::Config;

/// Custodial wallet backend
#[derive(Parser)]
#[command(name = "walletd")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the wallet backend (observer, relay, sweeper, broadcaster)
    Start {
        /// Force simulated mode (no RPC; fabricated blocks)
        #[arg(long)]
        simulate: bool,
    },

    /// Initialize a new wallet: generate a mnemonic and encrypt it
    Init {
        /// Output keystore file
        #[arg(short, long, default_value = "wallet.json")]
        output: String,
    },

    /// Generate a 24-word mnemonic and print its first BTC/ETH addresses
    New,

    /// Construct an unsigned transaction for offline signing
    BuildTx {
        /// Sender address
        #[arg(long)]
        from: String,

        /// Recipient address
        #[arg(long)]
        to: String,

        /// Amount in wei
        #[arg(long, default_value = "0")]
        amount: String,

        /// Account nonce
        #[arg(long, default_value = "0")]
        nonce: u64,

        /// Derivation path of the signing key
        #[arg(long, default_value = "m/44'/60'/0'/0/0")]
        path: String,

        /// Chain id (1 = mainnet, 11155111 = Sepolia)
        #[arg(long, default_value = "1")]
        chain_id: u64,

        /// Output file
        #[arg(short, long, default_value = "unsigned.json")]
        output: String,
    },

    /// Sign an unsigned transaction with a keystore (offline)
    Sign {
        /// Unsigned transaction file
        #[arg(short, long, default_value = "unsigned.json")]
        input: String,

        /// Keystore file
        #[arg(short, long, default_value = "wallet.json")]
        keystore: String,

        /// Output file
        #[arg(short, long, default_value = "signed.json")]
        output: String,
    },

    /// Broadcast a signed transaction
    Broadcast {
        /// Signed transaction file
        #[arg(short, long, default_value = "signed.json")]
        input: String,

        /// Ethereum JSON-RPC endpoint
        #[arg(long)]
        rpc: String,
    },

    /// Shamir secret sharing utilities
    Mpc {
        #[command(subcommand)]
        action: MpcAction,
    },
}

#[derive(Subcommand)]
enum MpcAction {
    /// Split a hex secret into N shares requiring T to recover
    Split {
        /// Secret as a hex string
        #[arg(long)]
        secret: String,

        /// Total number of shares
        #[arg(short = 'n', long, default_value = "3")]
        parts: u8,

        /// Recovery threshold
        #[arg(short = 't', long, default_value = "2")]
        threshold: u8,
    },

    /// Recover a secret from comma-separated hex shares
    Recover {
        /// Shares, comma separated
        #[arg(long)]
        shares: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("wallet_core=info".parse().unwrap()),
        )
        .with_target(true)
        .init();

    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Start { simulate } => commands::start(&config, simulate).await,
        Commands::Init { output } => commands::init(&output),
        Commands::New => commands::new_wallet(),
        Commands::BuildTx {
            from,
            to,
            amount,
            nonce,
            path,
            chain_id,
            output,
        } => commands::build_tx(&from, &to, &amount, nonce, &path, chain_id, &output),
        Commands::Sign {
            input,
            keystore,
            output,
        } => commands::sign(&input, &keystore, &output),
        Commands::Broadcast { input, rpc } => commands::broadcast(&input, &rpc).await,
        Commands::Mpc { action } => match action {
            MpcAction::Split {
                secret,
                parts,
                threshold,
            } => commands::mpc_split(&secret, parts, threshold),
            MpcAction::Recover { shares } => commands::mpc_recover(&shares),
        },
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        std::process::exit(1);
    }

    Ok(())
}
