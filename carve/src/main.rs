//! # carve - Main Entry Point
//!
//! Three subcommands over one recorded trace:
//! - **detect**: run a pattern specification, print the execution tree
//! - **suggest**: infer filters from valid/invalid example spans
//! - **mine**: discover frequent event episodes of one thread
//!
//! Scans run on a worker thread. The async main loop only watches for
//! Ctrl+C and cancels the scan on the first interrupt; the scan notices
//! at its next per-event token check.

#![allow(clippy::too_many_lines)]

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use carve::cli::{bounded_range, parse_time_range, Args, Command};
use carve::domain::Outcome;
use carve::export::ExecutionTraceExporter;
use carve::inference::infer_filters;
use carve::matching::{Execution, ExecutionTree, MatchingEngine};
use carve::mining::{EpisodeMiner, MinerConfig};
use carve::pattern::PatternSpecification;
use carve::source::load_chrome_trace;
use carve::worker::{spawn_job, CancellationToken, ResultSlot};
use carve_common::{Tid, TimeRange};

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_USAGE: i32 = 2;

fn main() {
    env_logger::init();
    std::process::exit(match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            let code = exit_code_for(&e);
            eprintln!("error: {e:#}");
            code
        }
    });
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    if err.to_string().to_lowercase().contains("missing required argument") {
        EXIT_USAGE
    } else {
        EXIT_ERROR
    }
}

#[tokio::main]
async fn run() -> Result<()> {
    let args = Args::parse();
    let quiet = args.quiet;

    match args.command {
        Command::Detect { trace, pattern, tid, begin, end, export } => {
            run_detect(
                quiet,
                &trace,
                pattern.as_deref(),
                tid.map(Tid),
                bounded_range(begin, end),
                export,
            )
            .await
        }
        Command::Suggest { trace, valid, invalid } => {
            run_suggest(quiet, &trace, &valid, &invalid).await
        }
        Command::Mine {
            trace,
            tid,
            begin,
            end,
            max_events,
            support,
            top,
            start_symbol,
            budget_ms,
            require_maximal,
        } => {
            let config = MinerConfig {
                max_events,
                support_floor: support,
                top_k: top,
                start_symbols: start_symbol,
                budget: Duration::from_millis(budget_ms),
                require_maximal,
            };
            run_mine(quiet, &trace, Tid(tid), bounded_range(begin, end), config).await
        }
    }
}

async fn run_detect(
    quiet: bool,
    trace: &Path,
    pattern: Option<&Path>,
    focus: Option<Tid>,
    range: TimeRange,
    export: Option<PathBuf>,
) -> Result<()> {
    let spec = match (pattern, focus) {
        (Some(path), _) => PatternSpecification::from_file(path)
            .with_context(|| format!("failed to load pattern {}", path.display()))?,
        (None, Some(tid)) => PatternSpecification::whole_thread(tid),
        (None, None) => bail!(
            "Missing required argument: --pattern or --tid\n\n\
             Usage:\n  \
             carve detect --trace run.json --pattern span.json\n  \
             carve detect --trace run.json --tid 1042\n\n\
             Run 'carve detect --help' for more options"
        ),
    };
    let engine = MatchingEngine::new(spec, focus)?;
    let source = load_chrome_trace(trace)?;
    if !quiet {
        println!("carve v{}", env!("CARGO_PKG_VERSION"));
        println!("trace: {} ({} events)", trace.display(), source.len());
    }

    let started = Instant::now();
    let outcome = run_job("detect", move |token| engine.detect(&source, range, token)).await?;
    let Outcome::Complete(result) = outcome else {
        eprintln!("\ninterrupted: partial results discarded");
        return Ok(());
    };

    if !quiet {
        print_tree(&result.tree);
    }
    let s = &result.stats;
    eprintln!(
        "\ndone: {:.1}s, {} events ({} switches, {} malformed), {} sealed, {} rejected, {} discarded open, {} broadcasts",
        started.elapsed().as_secs_f64(),
        s.events,
        s.switch_events,
        s.malformed_switches,
        s.sealed,
        s.rejected,
        s.discarded_open,
        s.broadcasts,
    );

    if let Some(path) = export {
        let mut exporter = ExecutionTraceExporter::new();
        exporter.add_tree(&result.tree);
        let file = File::create(&path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        exporter.export(BufWriter::new(file)).context("failed to export trace")?;
        if !quiet {
            println!("saved: {} ({} rows)", path.display(), exporter.event_count());
        }
    }
    Ok(())
}

fn print_tree(tree: &ExecutionTree) {
    println!("{} execution(s)", tree.sealed_count());
    for execution in tree.top_level() {
        print_execution(execution, 0);
    }
}

fn print_execution(execution: &Execution, depth: usize) {
    let indent = "  ".repeat(depth + 1);
    let end = execution.end_time.map_or_else(|| "?".to_string(), |t| t.0.to_string());
    println!(
        "{indent}{} [{}..{}] {} .. {} (running {}, preempted {})",
        execution.start_tid,
        execution.start_time.0,
        end,
        execution.start_label,
        execution.end_label,
        execution.running_time,
        execution.preempted_time,
    );
    for child in &execution.children {
        print_execution(child, depth + 1);
    }
}

async fn run_suggest(quiet: bool, trace: &Path, valid: &[String], invalid: &str) -> Result<()> {
    let valid = valid
        .iter()
        .map(|span| parse_time_range(span))
        .collect::<Result<Vec<TimeRange>>>()?;
    let invalid = parse_time_range(invalid)?;
    let source = load_chrome_trace(trace)?;
    if !quiet {
        println!("carve v{}", env!("CARGO_PKG_VERSION"));
        println!("trace: {} ({} events)", trace.display(), source.len());
        println!("examples: {} valid, 1 invalid", valid.len());
    }

    let outcome =
        run_job("suggest", move |token| infer_filters(&source, &valid, invalid, token)).await?;
    let Outcome::Complete(filters) = outcome else {
        eprintln!("\ninterrupted: no result");
        return Ok(());
    };

    if filters.is_empty() {
        println!("no filter separates the examples");
    } else {
        println!("suggested filters, most selective first:");
        for (index, filter) in filters.iter().enumerate() {
            println!("  {}. {filter}", index + 1);
        }
    }
    Ok(())
}

async fn run_mine(
    quiet: bool,
    trace: &Path,
    tid: Tid,
    range: TimeRange,
    config: MinerConfig,
) -> Result<()> {
    let source = load_chrome_trace(trace)?;
    if !quiet {
        println!("carve v{}", env!("CARGO_PKG_VERSION"));
        println!("trace: {} ({} events)", trace.display(), source.len());
    }

    let miner = EpisodeMiner::new(config);
    let outcome =
        run_job("mine", move |token| miner.mine_thread(&source, range, tid, token)).await?;
    let Outcome::Complete(result) = outcome else {
        eprintln!("\ninterrupted: no result");
        return Ok(());
    };

    if result.budget_exhausted {
        eprintln!("warning: search budget exhausted, episodes may be non-maximal");
    }
    println!("{} episode(s) from {} events of {tid}", result.episodes.len(), result.event_count);
    for episode in &result.episodes {
        println!("{:>6}x  {}", episode.support, episode.decode(&result.dictionary).join(" -> "));
    }
    Ok(())
}

/// Drive a scan on a worker thread while this task watches for Ctrl+C.
async fn run_job<T, F>(name: &'static str, job: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&CancellationToken) -> T + Send + 'static,
{
    let slot = ResultSlot::new();
    let mut handle = spawn_job(name, &slot, job);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;

    loop {
        let finished = handle.is_finished();
        if let Some(result) = handle.try_take() {
            return Ok(result);
        }
        if finished {
            bail!("{name} worker panicked");
        }

        tokio::select! {
            () = tokio::time::sleep(Duration::from_millis(50)) => {}
            _ = &mut ctrl_c, if !interrupted => {
                eprintln!("\ninterrupting {name}...");
                interrupted = true;
                handle.cancel();
            }
        }
    }
}
