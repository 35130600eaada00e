use anyhow::Context;
use std::env;
use std::path::{Path, PathBuf};

fn home_dir() -> anyhow::Result<PathBuf> {
    // Minimal cross-platform-ish fallback without extra deps.
    // On Unix, HOME is standard.
    let home = env::var_os("HOME").context("HOME is not set")?;
    Ok(PathBuf::from(home))
}

fn ensure_dir(path: &Path) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(path)
        .with_context(|| format!("failed to create directory: {}", path.display()))?;
    Ok(path.to_path_buf())
}

pub fn config_dir() -> anyhow::Result<PathBuf> {
    if let Some(base) = env::var_os("AGENTCHAT_HOME").map(PathBuf::from) {
        return ensure_dir(&base.join("config"));
    }

    if let Some(xdg) = env::var_os("XDG_CONFIG_HOME").map(PathBuf::from) {
        return ensure_dir(&xdg.join("agentchat"));
    }

    ensure_dir(&home_dir()?.join(".config").join("agentchat"))
}
