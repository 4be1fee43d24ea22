use clap::Parser;
use clap::ValueEnum;
use std::path::PathBuf;

#[derive(Parser, Debug, Default)]
#[command(version)]
pub struct Cli {
    /// Named profile under `~/.chainwatch/profiles/`, or a path to one.
    #[arg(long, short = 'p')]
    pub profile: Option<String>,

    /// Explicit policy file; wins over --profile.
    #[arg(long = "policy", value_name = "FILE")]
    pub policy: Option<PathBuf>,

    /// Where to append audit entries. Falls back to $AUDIT_LOG, then
    /// `~/.chainwatch/audit.jsonl`.
    #[arg(long = "audit-log", value_name = "PATH")]
    pub audit_log: Option<PathBuf>,

    /// Agent identity to evaluate under; enables the agent registry.
    #[arg(long)]
    pub agent: Option<String>,

    /// Declared purpose, for purpose-bound rules.
    #[arg(long)]
    pub purpose: Option<String>,

    /// Specifies color settings for use in the output.
    #[arg(long = "color", value_enum, default_value_t = Color::Auto)]
    pub color: Color,

    /// Full command to run, after `--`.
    #[arg(trailing_var_arg = true)]
    pub command: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "kebab-case")]
pub enum Color {
    Always,
    Never,
    #[default]
    Auto,
}
