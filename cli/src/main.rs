use std::path::PathBuf;

use anyhow::Context;
use chainwatch_core::approval::ApprovalStore;
use chainwatch_core::audit::AuditChain;
use chainwatch_core::evaluator::PolicyEngine;
use chainwatch_core::simulate;
use chainwatch_exec::Cli as ExecCli;
use clap::Parser;
use tracing_subscriber::EnvFilter;

/// chainwatch CLI
#[derive(Debug, Parser)]
#[clap(author, version)]
struct MultitoolCli {
    #[clap(subcommand)]
    subcommand: Subcommand,
}

#[derive(Debug, clap::Subcommand)]
enum Subcommand {
    /// Run a command through the policy wrapper.
    #[clap(visible_alias = "e")]
    Exec(ExecCli),

    /// Inspect and resolve pending approvals.
    Approvals(ApprovalsArgs),

    /// Audit log tooling.
    Audit(AuditArgs),

    /// Replay an audit log against a candidate policy and report what
    /// would change.
    Simulate(SimulateArgs),
}

#[derive(Debug, Parser)]
struct ApprovalsArgs {
    #[command(subcommand)]
    cmd: ApprovalsCommand,
}

#[derive(Debug, clap::Subcommand)]
enum ApprovalsCommand {
    /// List every approval record.
    List,

    /// Approve a pending key.
    Approve {
        key: String,

        /// Seconds until the approval expires; 0 means one-shot.
        #[arg(long, default_value_t = 0)]
        ttl: u64,
    },

    /// Deny a pending key.
    Deny { key: String },

    /// Remove denied, expired, and consumed records.
    Cleanup,
}

#[derive(Debug, Parser)]
struct AuditArgs {
    #[command(subcommand)]
    cmd: AuditCommand,
}

#[derive(Debug, clap::Subcommand)]
enum AuditCommand {
    /// Rebuild the hash chain and report the first broken entry, if any.
    Verify { path: PathBuf },
}

#[derive(Debug, Parser)]
struct SimulateArgs {
    /// Audit log to replay.
    #[arg(long = "audit-log", value_name = "PATH")]
    audit_log: PathBuf,

    /// Candidate policy file to replay under.
    #[arg(long = "policy", value_name = "FILE")]
    policy: PathBuf,

    /// Emit the diff report as JSON instead of text.
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = MultitoolCli::parse();
    let code = match cli.subcommand {
        Subcommand::Exec(exec_cli) => chainwatch_exec::run_main(exec_cli).await,
        Subcommand::Approvals(args) => report(run_approvals(args)),
        Subcommand::Audit(args) => run_audit(args),
        Subcommand::Simulate(args) => report(run_simulate(args)),
    };
    std::process::exit(code);
}

fn report(result: anyhow::Result<()>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("chainwatch: {err:#}");
            1
        }
    }
}

fn run_approvals(args: ApprovalsArgs) -> anyhow::Result<()> {
    let store = ApprovalStore::open_default()?;
    match args.cmd {
        ApprovalsCommand::List => {
            for record in store.list()? {
                println!(
                    "{:<10} {:<30} {} ({})",
                    record.status, record.key, record.resource, record.policy_id
                );
            }
        }
        ApprovalsCommand::Approve { key, ttl } => {
            let record = store.approve(&key, ttl)?;
            match record.expires_at {
                Some(expires_at) => println!("approved '{key}' until {expires_at}"),
                None => println!("approved '{key}' (one-shot)"),
            }
        }
        ApprovalsCommand::Deny { key } => {
            store.deny(&key)?;
            println!("denied '{key}'");
        }
        ApprovalsCommand::Cleanup => {
            let removed = store.cleanup()?;
            println!("removed {removed} resolved approval(s)");
        }
    }
    Ok(())
}

fn run_audit(args: AuditArgs) -> i32 {
    match args.cmd {
        AuditCommand::Verify { path } => match AuditChain::open(&path).and_then(|c| c.verify()) {
            Ok(report) if report.is_clean() => {
                println!("chain OK ({} entries)", report.entries);
                0
            }
            Ok(report) => {
                let index = report.broken_at.unwrap_or_default();
                println!("chain BROKEN at entry {index} ({} entries read)", report.entries);
                1
            }
            Err(err) => {
                eprintln!("chainwatch: {err:#}");
                1
            }
        },
    }
}

fn run_simulate(args: SimulateArgs) -> anyhow::Result<()> {
    let engine = PolicyEngine::from_file(&args.policy)
        .with_context(|| format!("failed to load policy {}", args.policy.display()))?;
    let report = simulate::simulate_file(&args.audit_log, &engine)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    if report.is_unchanged() {
        println!("no changes across {} entries", report.total);
        return Ok(());
    }
    println!(
        "{} of {} entries would change:",
        report.changed.len(),
        report.total
    );
    for diff in &report.changed {
        println!(
            "  #{} [{}] {}: {} ({}) -> {} ({})",
            diff.index,
            diff.trace_id,
            diff.resource,
            diff.recorded.decision,
            diff.recorded.policy_id,
            diff.replayed.decision,
            diff.replayed.policy_id,
        );
    }
    Ok(())
}
