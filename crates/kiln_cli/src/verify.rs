//! `kiln verify`: dry-run the start of a build.
//!
//! Runs the stamp gate, the file scan and the invalidation pass exactly as a
//! build would, then reports which cached modules would be rebuilt. Nothing
//! is written back.

use kiln_cache::{BuildCache, Capabilities, GateOutcome, RunReport};

use crate::project::load_project;
use crate::status::describe;
use crate::{GlobalArgs, ReportFormat, VerifyArgs};

/// Exit code for `--strict` when the cache would not be fully reused.
const STALE_EXIT_CODE: i32 = 2;

/// Runs the `kiln verify` command.
pub fn run(args: &VerifyArgs, global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let project = load_project(global)?;
    let root = project.resolve()?.cache_root;
    if !root.is_dir() {
        if !global.quiet {
            eprintln!("no cache at {}", root.display());
        }
        return Ok(0);
    }

    let mut cache = BuildCache::open(
        &project.config,
        &project.root,
        &serde_json::Value::Null,
        Capabilities::default(),
    )?;
    let run = cache.begin_run()?;
    let stale = cache.stale_modules();

    match args.format {
        ReportFormat::Text => {
            if !global.quiet {
                print_text(&run, &stale);
            }
        }
        ReportFormat::Json => println!("{}", to_json(&run, &stale)),
    }

    let clean = run.gate == Some(GateOutcome::Valid) && !run.scan_failed && stale.is_empty();
    Ok(if args.strict && !clean { STALE_EXIT_CODE } else { 0 })
}

fn print_text(run: &RunReport, stale: &[String]) {
    if let Some(gate) = run.gate {
        println!("stamp     {}", describe(gate));
    }
    if run.scan_failed {
        println!("scan      failed, the cache would be reset");
    }
    println!("tracked   {}", run.tracked_files);
    println!("modules   {}", run.cached_modules);
    println!("missing   {} (dependency target gone)", run.invalidated.len());
    println!("stale     {}", stale.len());
    for key in stale {
        println!("  {key}");
    }
}

fn to_json(run: &RunReport, stale: &[String]) -> serde_json::Value {
    serde_json::json!({
        "stamp": run.stamp.as_str(),
        "valid": run.gate.is_some_and(GateOutcome::is_valid),
        "scanFailed": run.scan_failed,
        "trackedFiles": run.tracked_files,
        "cachedModules": run.cached_modules,
        "invalidated": run.invalidated,
        "stale": stale,
    })
}
