use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

use chain_core::{ChainConfig, ChainEngine};
use chain_shared::KeyPair;

#[derive(Parser)]
#[command(name = "tc-node")]
#[command(about = "Proof-of-work UTXO chain engine")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Directory under which block/UTXO-set/mempool state is kept.
    #[arg(long, default_value = "./data")]
    data_dir: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Print height, tip hash and active difficulty, then exit.
    Status,
    /// Mine and submit a single genesis-style coinbase block, then print status.
    Demo,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = ChainConfig {
        block_data_dir: format!("{}/blocks", cli.data_dir),
        utxo_set_path: format!("{}/utxos.dat", cli.data_dir),
        mempool_path: format!("{}/mempool.json", cli.data_dir),
        ..ChainConfig::default()
    };

    match cli.command.unwrap_or(Commands::Status) {
        Commands::Status => print_status(config),
        Commands::Demo => run_demo(config),
    }
}

fn print_status(config: ChainConfig) -> Result<()> {
    let engine = ChainEngine::open(config)?;
    println!("height:     {}", engine.height());
    println!("tophash:    {}", engine.tophash());
    println!("difficulty: 0x{:08x}", engine.top_difficulty());
    Ok(())
}

fn run_demo(config: ChainConfig) -> Result<()> {
    let mut engine = ChainEngine::open(config)?;
    let keypair = KeyPair::generate();

    let mut reward_tx = chain_core::Transaction::new(
        vec![],
        vec![chain_core::Utxo::new_output(keypair.public_key.clone(), 10.0, 0)],
    );
    reward_tx.make();

    let genesis = chain_core::Block::genesis(engine.top_difficulty(), 1);
    let genesis = chain_core::Block::new(
        *genesis.previous_hash(),
        genesis.timestamp(),
        genesis.difficulty_bits(),
        vec![],
        vec![reward_tx],
    );

    let status = engine.submit_block(genesis)?;
    info!(?status, "submitted demo block");
    println!("status:     {status:?}");
    println!("height:     {}", engine.height());
    println!("tophash:    {}", engine.tophash());

    engine.save()?;
    Ok(())
}
