use nts_shared::{start_options_builder_from, Options};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Loads `Options` from `<state_root>/config.json`, creating it with defaults on first run. A
/// config file that fails to parse is treated the same as a missing one: defaults win and the
/// file is rewritten, rather than aborting startup over a stray edit.
pub fn load_options(state_root: impl Into<PathBuf>) -> Arc<Options> {
    let state_root = state_root.into();
    let config_path = config_file_path(&state_root);

    let loaded = if config_path.exists() {
        load_from_existing_file(&config_path)
    } else {
        None
    };

    let base = loaded.unwrap_or_else(|| {
        let defaults = start_options_builder_from(&Options::default()).state_root(state_root.clone()).build();
        write_config(&config_path, &defaults);
        defaults
    });

    Arc::new(start_options_builder_from(&base).state_root(state_root).build())
}

fn load_from_existing_file(config_path: &Path) -> Option<Options> {
    let bytes = fs::read(config_path).ok()?;
    serde_json::from_slice(&bytes).ok()
}

fn write_config(config_path: &Path, options: &Options) {
    if let Some(parent) = config_path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    if let Ok(serialized) = serde_json::to_string_pretty(options) {
        let _ = fs::write(config_path, serialized);
    }
}

fn config_file_path(state_root: &Path) -> PathBuf {
    state_root.join("config.json")
}
