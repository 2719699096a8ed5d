//! Dotenv-style env file loading

use crate::error::{Result, StackupError};
use std::collections::HashMap;
use std::path::Path;

/// Load an env file
///
/// A missing or unreadable file is an error; the service referencing it
/// fails to start.
pub fn load(path: &Path) -> Result<HashMap<String, String>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| StackupError::EnvFile(format!("{}: {}", path.display(), e)))?;

    Ok(parse(&content))
}

/// Parse env file content
///
/// `KEY=value` per line; `#` comments and blank lines are skipped; an
/// optional `export ` prefix and surrounding quotes are stripped.
pub fn parse(content: &str) -> HashMap<String, String> {
    let mut vars = HashMap::new();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let line = line.strip_prefix("export ").unwrap_or(line);

        if let Some((key, value)) = line.split_once('=') {
            let key = key.trim();
            let mut value = value.trim();

            if value.len() >= 2
                && ((value.starts_with('"') && value.ends_with('"'))
                    || (value.starts_with('\'') && value.ends_with('\'')))
            {
                value = &value[1..value.len() - 1];
            }

            if !key.is_empty() {
                vars.insert(key.to_string(), value.to_string());
            }
        }
    }

    vars
}
