// src/lib.rs

pub mod cli;
pub mod config;
pub mod context;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod progress;
pub mod registry;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};

use crate::cli::CliArgs;
use crate::config::{ParameterConfig, loader};
use crate::context::{DependentContext, RunnerContext};
use crate::dag::Selector;
use crate::engine::{RunOptions, Scheduler, SchedulerOptions, TaskDeclaration};
use crate::errors::Result;

/// JSON object type used for task inputs and outputs throughout the crate.
pub type JsonMap = serde_json::Map<String, serde_json::Value>;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - task file loading and validation
/// - the parameter document and its dependent context
/// - the scheduler with one declaration per task file entry
/// - checkpoint restore, listing and parameter dumps
pub async fn run(args: CliArgs) -> Result<i32> {
    let config_path = loader::resolve_config_path(&args.start_dir, args.config.as_deref());
    let mut file = loader::load_and_validate(&config_path)?;
    if let Some(tasks) = &args.tasks {
        file = file.restrict(tasks)?;
        debug!(kept = file.tasks.len(), "task set restricted by --tasks");
    }

    let feed: BTreeMap<String, Value> = match &args.feed_values {
        Some(text) => serde_json::from_str(text)?,
        None => BTreeMap::new(),
    };

    let params = ParameterConfig::from_value(file.params_value())?;
    let context = Arc::new(DependentContext::new(params));
    context.set_params(&feed)?;

    let mut scheduler = Scheduler::new(
        context,
        SchedulerOptions {
            parallel_degree: args.parallel,
            log_path: args.log_path.clone().map(Into::into),
            checkpoint_keep: 5,
        },
    );
    for (name, entry) in &file.tasks {
        let decl = TaskDeclaration::from_file_entry(name, entry)?
            .depends_on(file.dependencies_of(name)?);
        scheduler.add_task(decl)?;
    }

    if let Some(restore) = &args.restore {
        scheduler.restore(Path::new(restore))?;
    }

    if args.print_params {
        print_params("Initial Parameters", scheduler.context().as_ref());
    }

    if args.list {
        print_task_list(&mut scheduler)?;
        return Ok(0);
    }

    let Some(run_items) = &args.run else {
        print_task_list(&mut scheduler)?;
        info!("nothing executed; pass --run to execute tasks");
        return Ok(0);
    };

    let selector = {
        let selector = Selector::from_items(run_items);
        (!selector.is_empty()).then_some(selector)
    };

    let code = scheduler
        .run(RunOptions {
            selector,
            verbose: args.verbose,
            try_best: args.try_best,
        })
        .await?;

    if args.print_params {
        print_params("Final Parameters", scheduler.context().as_ref());
    }
    Ok(code)
}

fn print_params(title: &str, context: &dyn RunnerContext) {
    println!("--------------- {title} ---------------");
    match serde_json::to_string_pretty(&context.get_params()) {
        Ok(dump) => println!("{dump}"),
        Err(err) => debug!(error = %err, "cannot serialize parameters"),
    }
    println!("----------------------------------------------");
}

fn print_task_list(scheduler: &mut Scheduler) -> Result<()> {
    for (id, name) in scheduler.list()?.iter().enumerate() {
        println!("[{id}] {name}");
    }
    Ok(())
}
