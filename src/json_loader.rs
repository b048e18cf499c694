use crate::error::ConfigError;
use once_cell::sync::Lazy;
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Cache for loaded configuration files to avoid repeated disk reads
static CONFIG_CACHE: Lazy<Mutex<HashMap<PathBuf, Value>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Load a JSON configuration from a file path, using the cache if available.
pub fn load_config_file<P: AsRef<Path>>(path: P) -> Result<Value, ConfigError> {
    let path_buf = path.as_ref().to_path_buf();

    {
        let cache = CONFIG_CACHE.lock().unwrap();
        if let Some(json) = cache.get(&path_buf) {
            return Ok(json.clone());
        }
    }

    let text = fs::read_to_string(&path_buf).map_err(|source| ConfigError::Io {
        path: path_buf.display().to_string(),
        source,
    })?;
    let json: Value = serde_json::from_str(&text)?;

    {
        let mut cache = CONFIG_CACHE.lock().unwrap();
        cache.insert(path_buf, json.clone());
    }

    Ok(json)
}

/// Clear the configuration file cache.
pub fn clear_cache() {
    CONFIG_CACHE.lock().unwrap().clear();
}
