//! CLI driver / demonstration harness.
//!
//! Parsing a source text is out of scope for this core, so this binary
//! builds one of a small library of fixture trees (`fixtures`), runs the
//! static scope checker, then the tree-walk evaluator, over it — the same
//! pipeline an eventual front end would drive after its own parse pass.

mod fixtures;

use std::path::{Path, PathBuf};
use std::sync::Once;

use anyhow::Result;
use clap::Parser;
use core_diagnostics::Sink;
use core_eval::{EvalConfig, Evaluator, Step};
use core_model::NodeTree;
use core_scope::ScopeChecker;
use fixtures::Fixture;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;

/// CLI arguments.
#[derive(Parser, Debug)]
#[command(name = "a68", version, about = "Algol 68 execution core demo harness")]
struct Args {
    /// Which fixture tree to run.
    #[arg(long, value_enum, default_value = "sum-loop")]
    fixture: Fixture,
    /// Optional configuration file path (overrides discovery of `a68.toml`).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Print the per-line lexical/procedure level table after running.
    #[arg(long)]
    listing: bool,
}

fn configure_logging() -> Option<WorkerGuard> {
    let log_path = Path::new("a68.log");
    if log_path.exists() {
        let _ = std::fs::remove_file(log_path);
    }
    let file_appender = tracing_appender::rolling::never(".", "a68.log");
    let (nb_writer, guard) = tracing_appender::non_blocking(file_appender);
    match tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(nb_writer)
        .try_init()
    {
        Ok(()) => Some(guard),
        Err(_) => None,
    }
}

fn install_panic_hook() {
    static HOOK: Once = Once::new();
    HOOK.call_once(|| {
        let default_panic = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            tracing::error!(target: "runtime.panic", ?info, "panic");
            default_panic(info);
        }));
    });
}

fn main() -> Result<()> {
    let _log_guard = configure_logging();
    install_panic_hook();

    let args = Args::parse();
    let config = core_config::load_from(args.config.clone())?;
    info!(target: "runtime", fixture = ?args.fixture, "startup");

    let mut tree = NodeTree::new();
    let built = fixtures::build(args.fixture, &mut tree);

    let mut sink = Sink::new(config.file.diagnostics.error_threshold);
    let mut checker = ScopeChecker::new(&tree.nodes, &tree.modes, &tree.symbols, &mut sink);
    checker.run(built.root, built.root_level)?;

    let eval_config = EvalConfig {
        eval_stack_budget: Some(config.file.stack.eval_slots),
        frame_stack_budget: Some(config.file.stack.frame_slots),
        heap_budget_cells: None,
    };
    let mut evaluator = Evaluator::new(&tree.nodes, &tree.modes, &tree.symbols, built.natives, &mut sink, eval_config);

    match evaluator.execute(built.root) {
        Step::Normal => {
            info!(result = ?evaluator.last_value(), "execution finished");
            println!("result: {:?}", evaluator.last_value());
        }
        Step::Jump(frame, label) => {
            error!(?frame, ?label, "dangling jump escaped the root frame");
            anyhow::bail!("dangling jump to an unresolved label");
        }
        Step::Fatal(err) => {
            error!(error = %err, "evaluation aborted");
            return Err(err.into());
        }
    }

    if args.listing {
        let listing = core_listing::Listing::compute(&tree.nodes, &tree.symbols, built.root, built.root_level);
        for (line, levels) in listing.lines() {
            println!(
                "line {line:>4}: level {}..{} procedure {}..{}",
                levels.min_level, levels.max_level, levels.min_procedure, levels.max_procedure
            );
        }
    }

    Ok(())
}
