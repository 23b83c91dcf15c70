use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::Level;

use score_fee::{
    address::Address,
    config::FeeConfig,
    contracts::ScoreRegistry,
    fee::{CallContext, DepositId, EventLog, FeeEngine, FeeHandler},
    ledger::{AccountLedger, Amount, CoinLedger},
    state::MemoryDb,
};

#[derive(Parser)]
#[command(name = "score-fee", version, about = "SCORE fee deposits and fee sharing")]
struct Cli {
    /// State file (hex key/value JSON map).
    #[arg(long, default_value = "score-fee-state.json")]
    state: PathBuf,
    /// SCORE ownership registry file.
    #[arg(long, default_value = "score-fee-registry.json")]
    registry: PathBuf,
    /// Deposit bounds override (JSON).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Log at DEBUG instead of INFO.
    #[arg(short, long)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Record who owns a SCORE.
    Register {
        #[arg(long)]
        score: Address,
        #[arg(long)]
        owner: Address,
    },
    /// Credit coin to an account.
    Mint {
        #[arg(long)]
        address: Address,
        #[arg(long, value_parser = parse_amount)]
        amount: Amount,
    },
    Balance {
        #[arg(long)]
        address: Address,
    },
    /// Dispatch one fee request, e.g. `--method createDeposit --params '{...}'`.
    Call {
        #[arg(long)]
        sender: Address,
        #[arg(long)]
        height: u64,
        /// 32-byte transaction hash; derived from the call when omitted.
        #[arg(long)]
        tx_hash: Option<DepositId>,
        #[arg(long)]
        method: String,
        #[arg(long, default_value = "{}")]
        params: String,
    },
    /// Charge the step cost of one call.
    Charge {
        #[arg(long)]
        sender: Address,
        #[arg(long)]
        to: Address,
        #[arg(long, value_parser = parse_amount)]
        step_price: Amount,
        #[arg(long, value_parser = parse_amount)]
        used_step: Amount,
        #[arg(long)]
        height: u64,
    },
    /// Print the state root digest.
    Root,
}

fn parse_amount(s: &str) -> Result<Amount, String> {
    match s.strip_prefix("0x") {
        Some(hex) => Amount::from_str_radix(hex, 16),
        None => s.parse(),
    }
    .map_err(|e| format!("invalid amount {s}: {e}"))
}

fn derive_tx_hash(sender: &Address, height: u64, method: &str, params: &str) -> DepositId {
    let mut hasher = Sha256::new();
    hasher.update(b"score-fee-tx");
    hasher.update(sender.to_bytes());
    hasher.update(height.to_le_bytes());
    hasher.update(method.as_bytes());
    hasher.update(params.as_bytes());
    DepositId::new(hasher.finalize().into())
}

fn load_config(path: Option<&Path>) -> Result<FeeConfig> {
    match path {
        Some(path) => FeeConfig::load(path)
            .with_context(|| format!("loading config {}", path.display())),
        None => Ok(FeeConfig::default()),
    }
}

fn print_events(events: &[EventLog]) -> Result<()> {
    for event in events {
        println!("{}", serde_json::to_string(event)?);
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .init();

    let mut db = MemoryDb::load(&cli.state)
        .with_context(|| format!("loading state {}", cli.state.display()))?;
    let mut registry = ScoreRegistry::load(&cli.registry)
        .with_context(|| format!("loading registry {}", cli.registry.display()))?;
    let config = load_config(cli.config.as_deref())?;
    let ledger = CoinLedger::new();

    match cli.command {
        Command::Register { score, owner } => {
            registry.register(score, owner)?;
            registry.save(&cli.registry)?;
            println!("registered {score} owned by {owner}");
            return Ok(());
        }
        Command::Mint { address, amount } => {
            ledger.credit(&mut db, &address, amount)?;
            println!("{:#x}", ledger.balance(&db, &address)?);
        }
        Command::Balance { address } => {
            println!("{:#x}", ledger.balance(&db, &address)?);
            return Ok(());
        }
        Command::Call {
            sender,
            height,
            tx_hash,
            method,
            params,
        } => {
            let tx_hash =
                tx_hash.unwrap_or_else(|| derive_tx_hash(&sender, height, &method, &params));
            let params: Value =
                serde_json::from_str(&params).context("--params is not valid JSON")?;
            let ctx = CallContext {
                tx_hash,
                sender,
                block_height: height,
            };
            let handler =
                FeeHandler::new(FeeEngine::new(&registry, &ledger).with_config(config));
            let mut events = Vec::new();
            let response = handler.handle(&mut db, &ctx, &method, params, &mut events)?;
            print_events(&events)?;
            if !response.is_null() {
                println!("{}", serde_json::to_string_pretty(&response)?);
            }
        }
        Command::Charge {
            sender,
            to,
            step_price,
            used_step,
            height,
        } => {
            let handler =
                FeeHandler::new(FeeEngine::new(&registry, &ledger).with_config(config));
            let paid = handler.charge(&mut db, &sender, &to, step_price, used_step, height)?;
            for (payer, steps) in paid {
                println!("{payer} {steps:#x}");
            }
        }
        Command::Root => {
            println!("0x{}", hex::encode(db.state_root()));
            return Ok(());
        }
    }

    db.save(&cli.state)
        .with_context(|| format!("saving state {}", cli.state.display()))?;
    Ok(())
}
