//! The command wrapper: evaluate an intended subprocess, then run it,
//! gate it on an approval, or refuse it.
//!
//! Exit codes are part of the contract: the child's own code on allow,
//! 77 when chainwatch blocks the command, 1 on internal error.

mod cli;

use std::io::IsTerminal;

use anyhow::Context;
use chainwatch_core::approval::ApprovalStatus;
use chainwatch_core::approval::ApprovalStore;
use chainwatch_core::audit::AuditChain;
use chainwatch_core::evaluator::PolicyEngine;
use chainwatch_core::flags::default_audit_log;
use chainwatch_core::tracer::Tracer;
use chainwatch_protocol::Action;
use chainwatch_protocol::Decision;
use chainwatch_protocol::PolicyResult;
use owo_colors::OwoColorize;
use owo_colors::Style;
use tracing::debug;

pub use cli::Cli;
pub use cli::Color;

/// Reserved exit code for a blocked execution.
pub const BLOCKED_EXIT_CODE: i32 = 77;

const INTERNAL_ERROR_EXIT_CODE: i32 = 1;

/// Prefix `argv` with the wrapper invocation, for host applications that
/// shell out through chainwatch. The binary path comes from
/// `$CHAINWATCH_BIN`, defaulting to `chainwatch` on `$PATH`.
pub fn wrapper_argv(argv: &[String]) -> Vec<String> {
    let mut wrapped = vec![
        chainwatch_core::flags::CHAINWATCH_BIN.to_string(),
        "exec".to_string(),
        "--".to_string(),
    ];
    wrapped.extend(argv.iter().cloned());
    wrapped
}

pub async fn run_main(cli: Cli) -> i32 {
    let with_ansi = match cli.color {
        Color::Always => true,
        Color::Never => false,
        Color::Auto => std::io::stderr().is_terminal(),
    };
    match run_wrapper(cli, with_ansi).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("chainwatch: {err:#}");
            INTERNAL_ERROR_EXIT_CODE
        }
    }
}

async fn run_wrapper(cli: Cli, with_ansi: bool) -> anyhow::Result<i32> {
    if cli.command.is_empty() {
        anyhow::bail!("no command given; usage: chainwatch exec [OPTIONS] -- <cmd> [args...]");
    }

    let engine = load_engine(&cli)?;
    let tracer = match &cli.agent {
        Some(agent) => Tracer::for_agent(agent.clone()),
        None => Tracer::new(),
    };

    let mut action = Action::command(&cli.command);
    if let Some(purpose) = &cli.purpose {
        action = action.with_purpose(purpose.clone());
    }

    let result = tracer.evaluate(&engine, &action);
    debug!(
        decision = %result.decision,
        policy_id = %result.policy_id,
        "command evaluated"
    );

    let audit_path = cli.audit_log.clone().unwrap_or_else(default_audit_log);
    let audit = AuditChain::open(audit_path)?;
    {
        let trace_id = tracer.trace_id();
        let action = action.clone();
        let result = result.clone();
        let policy_hash = engine.policy_hash().to_string();
        tokio::task::spawn_blocking(move || {
            audit.append(&trace_id, &action, &result, &policy_hash)
        })
        .await?
        .context("failed to write audit entry")?;
    }

    match result.decision {
        Decision::Allow | Decision::AllowWithRedaction | Decision::RewriteOutput => {
            run_child(&cli.command).await
        }
        Decision::RequireApproval => gate_on_approval(&cli, &result, with_ansi).await,
        Decision::Deny => {
            print_blocked(&result, with_ansi);
            Ok(BLOCKED_EXIT_CODE)
        }
    }
}

fn load_engine(cli: &Cli) -> anyhow::Result<PolicyEngine> {
    if let Some(policy) = &cli.policy {
        return PolicyEngine::from_file(policy)
            .with_context(|| format!("failed to load policy {}", policy.display()));
    }
    if let Some(profile) = &cli.profile {
        let path = chainwatch_core::config::PolicyConfig::resolve_profile(profile);
        return PolicyEngine::from_file(&path)
            .with_context(|| format!("failed to load profile '{profile}' ({})", path.display()));
    }
    Ok(PolicyEngine::load_default()?)
}

/// An approved key runs the command (consuming one-shot approvals); any
/// other state records the request and blocks.
async fn gate_on_approval(cli: &Cli, result: &PolicyResult, with_ansi: bool) -> anyhow::Result<i32> {
    let store = ApprovalStore::open_default()?;
    let key = result
        .approval_key
        .clone()
        .unwrap_or_else(|| format!("tier_{}_action", result.tier));

    let status = match store.check(&key) {
        Ok(status) => status,
        Err(chainwatch_core::ChainwatchErr::NotFound(_)) => ApprovalStatus::Pending,
        Err(err) => return Err(err.into()),
    };

    if status == ApprovalStatus::Approved {
        store.consume(&key)?;
        return run_child(&cli.command).await;
    }

    let resource = cli.command.join(" ");
    store.request(&key, &result.reason, &result.policy_id, &resource)?;
    print_blocked(result, with_ansi);
    eprintln!("  approval pending under key '{key}'; run `chainwatch approvals approve {key}` to permit it");
    Ok(BLOCKED_EXIT_CODE)
}

async fn run_child(argv: &[String]) -> anyhow::Result<i32> {
    let rendered = shlex::try_join(argv.iter().map(String::as_str)).unwrap_or_default();
    debug!(command = %rendered, "spawning child");
    let status = tokio::process::Command::new(&argv[0])
        .args(&argv[1..])
        .status()
        .await
        .with_context(|| format!("failed to spawn '{}'", argv[0]))?;
    Ok(status.code().unwrap_or(INTERNAL_ERROR_EXIT_CODE))
}

fn print_blocked(result: &PolicyResult, with_ansi: bool) {
    let red = if with_ansi {
        Style::new().red()
    } else {
        Style::new()
    };
    eprintln!(
        "{}",
        format!(
            "BLOCKED by chainwatch: {} (policy: {})",
            result.reason, result.policy_id
        )
        .style(red)
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrapper_argv_prefixes_the_command() {
        let argv: Vec<String> = ["git", "push"].iter().map(|s| s.to_string()).collect();
        let wrapped = wrapper_argv(&argv);
        assert_eq!(wrapped[1], "exec");
        assert_eq!(wrapped[2], "--");
        assert_eq!(&wrapped[3..], &argv[..]);
    }
}
