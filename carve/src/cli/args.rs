//! CLI argument definitions

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "carve",
    about = "Carve executions of interest out of tracer event streams",
    after_help = "\
EXAMPLES:
    carve detect --trace run.json --pattern span.json         Match a pattern spec
    carve detect --trace run.json --tid 1042                  Whole-thread spans
    carve suggest --trace run.json --valid 100:900 \\
                  --valid 2000:2800 --invalid 3100:4000       Infer filters
    carve mine --trace run.json --tid 1042 --top 5            Mine episodes"
)]
pub struct Args {
    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Detect executions matching a pattern specification
    Detect {
        /// Trace file (Chrome Trace Event JSON)
        #[arg(short, long, value_name = "FILE")]
        trace: PathBuf,

        /// Pattern specification (JSON); omit to carve whole-thread spans of --tid
        #[arg(short, long, value_name = "FILE")]
        pattern: Option<PathBuf>,

        /// Focus thread, used when the pattern names no threads (required without --pattern)
        #[arg(long)]
        tid: Option<u32>,

        /// Restrict matching to timestamps at or after this (nanoseconds)
        #[arg(long)]
        begin: Option<u64>,

        /// Restrict matching to timestamps at or before this (nanoseconds)
        #[arg(long)]
        end: Option<u64>,

        /// Export the execution tree to a Chrome trace file
        #[arg(long, value_name = "FILE")]
        export: Option<PathBuf>,
    },

    /// Suggest filters separating valid example executions from an invalid one
    Suggest {
        /// Trace file (Chrome Trace Event JSON)
        #[arg(short, long, value_name = "FILE")]
        trace: PathBuf,

        /// Valid example span, START:END in nanoseconds (repeatable)
        #[arg(long = "valid", value_name = "START:END", required = true)]
        valid: Vec<String>,

        /// Invalid example span, START:END in nanoseconds
        #[arg(long = "invalid", value_name = "START:END")]
        invalid: String,
    },

    /// Mine frequent event episodes from one thread's history
    Mine {
        /// Trace file (Chrome Trace Event JSON)
        #[arg(short, long, value_name = "FILE")]
        trace: PathBuf,

        /// Thread whose history to mine
        #[arg(long)]
        tid: u32,

        /// Restrict mining to timestamps at or after this (nanoseconds)
        #[arg(long)]
        begin: Option<u64>,

        /// Restrict mining to timestamps at or before this (nanoseconds)
        #[arg(long)]
        end: Option<u64>,

        /// Cap on mined events
        #[arg(long, default_value = "10000")]
        max_events: usize,

        /// Minimum support; episodes must occur strictly more often
        #[arg(long, default_value = "2")]
        support: usize,

        /// Keep only symbols among roughly the K most frequent
        #[arg(long)]
        top: Option<usize>,

        /// Restrict episode roots to this event name (repeatable)
        #[arg(long = "start-symbol", value_name = "NAME")]
        start_symbol: Vec<String>,

        /// Wall-clock search budget in milliseconds
        #[arg(long, default_value = "5000")]
        budget_ms: u64,

        /// Drop episodes cut short by the budget
        #[arg(long)]
        require_maximal: bool,
    },
}
