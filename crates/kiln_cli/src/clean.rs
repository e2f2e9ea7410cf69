//! `kiln clean`: delete the cache directory.

use std::fs;
use std::io;

use crate::project::load_project;
use crate::GlobalArgs;

/// Runs the `kiln clean` command.
pub fn run(global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let project = load_project(global)?;
    let root = project.resolve()?.cache_root;

    match fs::remove_dir_all(&root) {
        Ok(()) => {
            log::debug!("removed {}", root.display());
            if !global.quiet {
                eprintln!("    Removed {}", root.display());
            }
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            if !global.quiet {
                eprintln!("    Nothing to clean at {}", root.display());
            }
        }
        Err(e) => return Err(format!("failed to remove {}: {e}", root.display()).into()),
    }
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, GlobalArgs) {
        let tmp = TempDir::new().unwrap();
        fs::write(
            tmp.path().join("kiln.toml"),
            "[cache]\ndirectory = \".kiln/[confighash]\"\nconfig_hash = \"abc\"\n",
        )
        .unwrap();
        let global = GlobalArgs {
            quiet: true,
            verbose: false,
            config: Some(tmp.path().to_str().unwrap().to_string()),
        };
        (tmp, global)
    }

    #[test]
    fn removes_resolved_directory() {
        let (tmp, global) = setup();
        let root = tmp.path().join(".kiln").join("abc");
        fs::create_dir_all(root.join("modules")).unwrap();
        fs::write(root.join("stamp"), "x").unwrap();

        assert_eq!(run(&global).unwrap(), 0);
        assert!(!root.exists());
        assert!(tmp.path().join(".kiln").exists());
    }

    #[test]
    fn missing_directory_is_fine() {
        let (_tmp, global) = setup();
        assert_eq!(run(&global).unwrap(), 0);
    }
}
