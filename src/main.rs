//! CLI for generating and executing transfer blocks.

use alloy_primitives::U256;
use clap::{Args, Parser, Subcommand};
use occ_node::{
    ExecutionResult, Executor, NodeError, OccExecutor, SequentialExecutor, TransferConfig,
    Workload, WorkloadConfig,
};
use std::process::ExitCode;
use std::time::Instant;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "occ-node", about = "Optimistic parallel block execution")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Execute one generated block.
    Run(RunArgs),
    /// Execute blocks across a range of conflict factors.
    Sweep(SweepArgs),
}

#[derive(Args, Debug, Clone)]
struct BlockArgs {
    /// Number of worker threads.
    #[arg(long, default_value_t = 4)]
    threads: usize,
    /// Number of accounts in the workload.
    #[arg(long, default_value_t = 1000)]
    accounts: usize,
    /// Number of transactions in the block.
    #[arg(long, default_value_t = 1000)]
    txs: usize,
    /// Flat fee charged per transfer.
    #[arg(long, default_value_t = 0)]
    fee: u64,
    /// Workload seed.
    #[arg(long, default_value_t = 42)]
    seed: u64,
    /// Skip signature verification during execution.
    #[arg(long)]
    no_verify: bool,
}

#[derive(Args, Debug)]
struct RunArgs {
    #[command(flatten)]
    block: BlockArgs,
    /// Fraction of transactions drawn from the hot account set.
    #[arg(long, default_value_t = 0.0)]
    conflict: f64,
    /// Also execute sequentially and fail if the results differ.
    #[arg(long)]
    compare: bool,
}

#[derive(Args, Debug)]
struct SweepArgs {
    #[command(flatten)]
    block: BlockArgs,
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let outcome = match cli.command {
        Command::Run(args) => run(&args.block, args.conflict, args.compare),
        Command::Sweep(args) => sweep(&args.block),
    };
    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn transfer_config(args: &BlockArgs) -> TransferConfig {
    TransferConfig {
        fee: U256::from(args.fee),
        verify_signatures: !args.no_verify,
        ..Default::default()
    }
}

fn workload(args: &BlockArgs, conflict_factor: f64) -> Result<Workload, NodeError> {
    if !(0.0..=1.0).contains(&conflict_factor) {
        return Err(NodeError::InvalidConfig(format!(
            "conflict factor {conflict_factor} is outside [0, 1]"
        )));
    }
    Workload::generate(WorkloadConfig {
        num_accounts: args.accounts,
        num_transactions: args.txs,
        conflict_factor,
        seed: args.seed,
        ..Default::default()
    })
}

fn timed(
    executor: &dyn Executor,
    workload: &Workload,
) -> Result<(occ_node::AccountStore, ExecutionResult, f64), NodeError> {
    let store = workload.create_store();
    let start = Instant::now();
    let (store, result) = executor.execute(store, &workload.transactions)?;
    Ok((store, result, start.elapsed().as_secs_f64()))
}

fn run(args: &BlockArgs, conflict_factor: f64, compare: bool) -> Result<(), NodeError> {
    let workload = workload(args, conflict_factor)?;
    let occ = OccExecutor::new(args.threads, transfer_config(args))?;

    let (store, result, secs) = timed(&occ, &workload)?;
    let stats = &result.output.stats;
    info!(
        executor = occ.name(),
        successful = result.successful,
        failed = result.failed,
        executions = stats.executions,
        aborts = stats.aborts,
        dependency_waits = stats.dependency_waits,
        ms = secs * 1000.0,
        tps = (result.total() as f64 / secs) as u64,
        "Block executed"
    );

    if compare {
        let sequential = SequentialExecutor::new(transfer_config(args));
        let (expected_store, expected, seq_secs) = timed(&sequential, &workload)?;
        info!(
            executor = sequential.name(),
            ms = seq_secs * 1000.0,
            speedup = seq_secs / secs,
            "Reference executed"
        );
        if let Some(idx) = expected
            .output
            .responses
            .iter()
            .zip(&result.output.responses)
            .position(|(a, b)| a != b)
        {
            return Err(NodeError::Divergence(format!("response of transaction {idx}")));
        }
        if expected_store.snapshot() != store.snapshot() {
            return Err(NodeError::Divergence("committed state".to_string()));
        }
        info!("Parallel result matches sequential execution");
    }
    Ok(())
}

fn sweep(args: &BlockArgs) -> Result<(), NodeError> {
    let configs = [
        ("No conflicts", 0.0),
        ("25% conflicts", 0.25),
        ("50% conflicts", 0.5),
        ("75% conflicts", 0.75),
        ("Full conflicts", 1.0),
    ];
    let sequential = SequentialExecutor::new(transfer_config(args));
    let occ = OccExecutor::new(args.threads, transfer_config(args))?;

    println!(
        "Configuration: {} accounts, {} transactions, {} threads\n",
        args.accounts, args.txs, args.threads
    );
    for (name, conflict_factor) in configs {
        let workload = workload(args, conflict_factor)?;
        let (_, _, seq_secs) = timed(&sequential, &workload)?;
        let (_, result, secs) = timed(&occ, &workload)?;

        println!(
            "{:15} | {:5} ok | {:6} aborts | seq {:8.2} ms | occ {:8.2} ms | {:5.2}x",
            name,
            result.successful,
            result.output.stats.aborts,
            seq_secs * 1000.0,
            secs * 1000.0,
            seq_secs / secs
        );
    }
    Ok(())
}
