use log::{error, info, warn};
use std::fs;
use std::path::Path;
use std::process;

/// Directories created on first start if missing.
const REQUIRED_DIRS: &[&str] = &["data", "static", "static/css", "templates"];

/// Pages the server cannot render without.
const CRITICAL_TEMPLATES: &[&str] = &[
    "templates/base.html.tera",
    "templates/index.html.tera",
    "templates/login.html.tera",
    "templates/register.html.tera",
    "templates/notes/list.html.tera",
    "templates/notes/form.html.tera",
    "templates/labels/list.html.tera",
];

/// Run all boot checks before Rocket launches. Exits the process when a
/// critical file is missing or the database directory is read-only.
pub fn run(db_path: &str) {
    info!("Boot check starting...");

    let mut warnings = 0u32;
    let mut errors = 0u32;

    for dir in REQUIRED_DIRS {
        let path = Path::new(dir);
        if !path.exists() {
            match fs::create_dir_all(path) {
                Ok(_) => info!("  Created directory: {}", dir),
                Err(e) => {
                    error!("  FAILED to create directory {}: {}", dir, e);
                    errors += 1;
                }
            }
        }
    }

    for file in CRITICAL_TEMPLATES {
        if !Path::new(file).exists() {
            error!("  MISSING critical template: {}", file);
            errors += 1;
        }
    }

    if !Path::new("static/css/app.css").exists() {
        warn!("  Missing static/css/app.css (pages will be unstyled)");
        warnings += 1;
    }

    let db_dir = Path::new(db_path)
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    if let Err(e) = fs::create_dir_all(db_dir) {
        error!("  Cannot create database directory {}: {}", db_dir.display(), e);
        errors += 1;
    } else {
        let test_file = db_dir.join(".write_test");
        match fs::write(&test_file, "test") {
            Ok(_) => {
                let _ = fs::remove_file(&test_file);
            }
            Err(e) => {
                error!("  Database directory not writable: {}", e);
                errors += 1;
            }
        }
    }

    if !Path::new("Rocket.toml").exists() {
        warn!("  Rocket.toml not found, using Rocket defaults");
        warnings += 1;
    }

    if errors > 0 {
        error!(
            "Boot check FAILED: {} error(s), {} warning(s). Aborting.",
            errors, warnings
        );
        process::exit(1);
    }

    if warnings > 0 {
        warn!("Boot check passed with {} warning(s).", warnings);
    } else {
        info!("Boot check passed.");
    }
}
