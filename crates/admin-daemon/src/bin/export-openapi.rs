//! Writes the daemon's OpenAPI document as YAML, to the given path or stdout.

use std::{env, fs, path::PathBuf};

use admin_daemon::server::docs::ApiDoc;
use anyhow::{Context, Result};
use utoipa::OpenApi;

fn main() -> Result<()> {
    let yaml = ApiDoc::openapi()
        .to_yaml()
        .context("failed to serialise OpenAPI document")?;

    let Some(target) = env::args().nth(1).map(PathBuf::from) else {
        println!("{yaml}");
        return Ok(());
    };

    if let Some(dir) = target.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }
    fs::write(&target, yaml).with_context(|| format!("failed to write {}", target.display()))?;
    Ok(())
}
