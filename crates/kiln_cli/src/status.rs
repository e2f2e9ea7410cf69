//! `kiln status`: show the cache stamp and tier sizes.

use std::path::PathBuf;

use kiln_cache::stamp::{classify, compute_stamp, read_stamp};
use kiln_cache::tiers::TierStores;
use kiln_cache::GateOutcome;

use crate::project::load_project;
use crate::{GlobalArgs, ReportFormat, StatusArgs};

/// Snapshot of a cache directory.
struct StatusReport {
    root: PathBuf,
    exists: bool,
    persisted_stamp: String,
    current_stamp: String,
    gate: GateOutcome,
    modules: usize,
    invalid_modules: usize,
    resolutions: usize,
    assets: usize,
    digests: usize,
    tracked_files: usize,
}

/// Describes a gate outcome for humans.
pub(crate) fn describe(gate: GateOutcome) -> &'static str {
    match gate {
        GateOutcome::Valid => "valid",
        GateOutcome::FirstRun => "empty (first run)",
        GateOutcome::EnvironmentChanged => "stale (environment or configuration changed)",
        GateOutcome::Unstamped => "untrusted (fingerprinting produced an empty stamp)",
    }
}

/// Runs the `kiln status` command.
pub fn run(args: &StatusArgs, global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let project = load_project(global)?;
    let resolved = project.resolve()?;
    let root = resolved.cache_root.clone();

    let persisted = read_stamp(&root)?;
    let current = compute_stamp(&resolved)?;
    let mut report = StatusReport {
        exists: root.is_dir(),
        root,
        persisted_stamp: persisted.to_string(),
        current_stamp: current.to_string(),
        gate: classify(&current, &persisted),
        modules: 0,
        invalid_modules: 0,
        resolutions: 0,
        assets: 0,
        digests: 0,
        tracked_files: 0,
    };

    if report.exists {
        let state = TierStores::load_existing(&report.root)?;
        report.modules = state.modules.len();
        report.invalid_modules = state.modules.values().filter(|m| m.invalid).count();
        report.resolutions = state.resolutions.len();
        report.assets = state.assets.len();
        report.digests = state.md5.len();
        report.tracked_files = state.file_dependencies().len();
    }

    match args.format {
        ReportFormat::Text => {
            if !global.quiet {
                print_text(&report);
            }
        }
        ReportFormat::Json => println!("{}", to_json(&report)),
    }
    Ok(0)
}

fn print_text(report: &StatusReport) {
    println!("cache     {}", report.root.display());
    if !report.exists {
        println!("          (not created yet)");
        return;
    }
    println!("stamp     {:?} ({})", report.persisted_stamp, describe(report.gate));
    if report.gate != GateOutcome::Valid {
        println!("current   {:?}", report.current_stamp);
    }
    println!(
        "modules   {} ({} invalid)",
        report.modules, report.invalid_modules
    );
    println!("resolved  {}", report.resolutions);
    println!("assets    {}", report.assets);
    println!("digests   {}", report.digests);
    println!("tracked   {}", report.tracked_files);
}

fn to_json(report: &StatusReport) -> serde_json::Value {
    serde_json::json!({
        "root": report.root,
        "exists": report.exists,
        "stamp": report.persisted_stamp,
        "currentStamp": report.current_stamp,
        "valid": report.gate.is_valid(),
        "gate": describe(report.gate),
        "modules": report.modules,
        "invalidModules": report.invalid_modules,
        "resolutions": report.resolutions,
        "assets": report.assets,
        "digests": report.digests,
        "trackedFiles": report.tracked_files,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn args(format: ReportFormat) -> StatusArgs {
        StatusArgs { format }
    }

    fn global(dir: &TempDir) -> GlobalArgs {
        GlobalArgs {
            quiet: true,
            verbose: false,
            config: Some(dir.path().to_str().unwrap().to_string()),
        }
    }

    #[test]
    fn status_of_missing_cache_succeeds() {
        let tmp = TempDir::new().unwrap();
        fs::write(
            tmp.path().join("kiln.toml"),
            "[cache]\ndirectory = \".kiln\"\nconfig_hash = \"v1\"\nenvironment_paths = false\n",
        )
        .unwrap();
        assert_eq!(run(&args(ReportFormat::Text), &global(&tmp)).unwrap(), 0);
        assert!(!tmp.path().join(".kiln").exists());
    }

    #[test]
    fn status_reads_existing_cache() {
        let tmp = TempDir::new().unwrap();
        fs::write(
            tmp.path().join("kiln.toml"),
            "[cache]\ndirectory = \".kiln\"\nconfig_hash = \"v1\"\nenvironment_paths = false\n",
        )
        .unwrap();
        kiln_cache::stamp::write_stamp(
            &tmp.path().join(".kiln"),
            &kiln_cache::Stamp::new("_v1"),
        )
        .unwrap();
        assert_eq!(run(&args(ReportFormat::Json), &global(&tmp)).unwrap(), 0);

        let root = tmp.path().join(".kiln");
        for tier in ["resolve.json", "assets", "modules", "data", "md5"] {
            assert!(!root.join(tier).exists(), "status created {tier}");
        }
    }

    #[test]
    fn json_report_shape() {
        let report = StatusReport {
            root: PathBuf::from("/p/.kiln"),
            exists: true,
            persisted_stamp: "_v1".into(),
            current_stamp: "_v1".into(),
            gate: GateOutcome::Valid,
            modules: 3,
            invalid_modules: 1,
            resolutions: 2,
            assets: 0,
            digests: 3,
            tracked_files: 4,
        };
        let json = to_json(&report);
        assert_eq!(json["valid"], true);
        assert_eq!(json["modules"], 3);
        assert_eq!(json["root"], "/p/.kiln");
    }

    #[test]
    fn describe_covers_every_outcome() {
        assert_eq!(describe(GateOutcome::Valid), "valid");
        assert!(describe(GateOutcome::EnvironmentChanged).contains("changed"));
    }
}
