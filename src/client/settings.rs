//! Settings-file materialization for providers that read MCP servers from a
//! config file (Gemini's `settings.json`, OpenCode's `opencode.jsonc`, Amp's
//! `settings.json`).
//!
//! The merge is read → parse → merge → write-temp → rename, never
//! truncate-then-write, so a crash mid-write cannot leave a torn file.
//! Malformed input or a malformed existing file surfaces an error and leaves
//! the file untouched.

use std::fs;
use std::io::Write;
use std::path::Path;

use serde_json::{Map, Value};
use thiserror::Error;

/// Failures while materializing MCP settings.
#[derive(Error, Debug)]
pub enum SettingsError {
    /// The MCP blob handed to us is not a JSON object.
    #[error("invalid MCP config JSON: {0}")]
    InvalidMcp(String),

    /// The settings file already on disk does not parse.
    #[error("existing settings file is malformed: {0}")]
    InvalidExisting(String),

    /// Filesystem failure while writing.
    #[error("failed to write settings file: {0}")]
    Write(#[from] std::io::Error),
}

/// Merge an MCP config blob into a settings file under `server_key`
/// (`mcpServers` for Gemini, `mcp` for OpenCode).
///
/// Unrelated keys in the existing file are preserved; the server map is
/// merged entry-by-entry, not replaced. The blob may be either the full
/// `{"<server_key>": {…}}` wrapper or the bare server map. `jsonc` enables
/// block-comment stripping on read (the comments are not preserved on
/// write).
pub fn merge_mcp_into_settings(
    path: &Path,
    server_key: &str,
    mcp_json: &str,
    jsonc: bool,
) -> Result<(), SettingsError> {
    let incoming: Value = serde_json::from_str(mcp_json)
        .map_err(|err| SettingsError::InvalidMcp(err.to_string()))?;
    let Value::Object(incoming) = incoming else {
        return Err(SettingsError::InvalidMcp(
            "MCP config must be a JSON object".to_string(),
        ));
    };

    // Accept the wrapped and bare forms.
    let servers: Map<String, Value> = match incoming.get(server_key) {
        Some(Value::Object(map)) => map.clone(),
        Some(_) => {
            return Err(SettingsError::InvalidMcp(format!(
                "'{server_key}' must be a JSON object"
            )))
        }
        None => incoming,
    };

    let mut settings = read_settings(path, jsonc)?;
    let root = settings
        .as_object_mut()
        .expect("read_settings always yields an object");

    match root.get_mut(server_key) {
        Some(Value::Object(existing)) => {
            for (name, server) in servers {
                existing.insert(name, server);
            }
        }
        _ => {
            root.insert(server_key.to_string(), Value::Object(servers));
        }
    }

    write_atomic(path, &settings)
}

/// Read and parse the settings file; a missing file is an empty object.
fn read_settings(path: &Path, jsonc: bool) -> Result<Value, SettingsError> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok(Value::Object(Map::new()))
        }
        Err(err) => return Err(SettingsError::Write(err)),
    };

    let cleaned = if jsonc {
        strip_block_comments(&text)
    } else {
        text
    };

    match serde_json::from_str::<Value>(&cleaned) {
        Ok(Value::Object(map)) => Ok(Value::Object(map)),
        Ok(_) => Err(SettingsError::InvalidExisting(
            "settings root must be a JSON object".to_string(),
        )),
        Err(err) => Err(SettingsError::InvalidExisting(err.to_string())),
    }
}

/// Write `value` as 2-space-indented JSON via a temp file + rename in the
/// same directory. Directory mode 0750, file mode 0600 on Unix.
fn write_atomic(path: &Path, value: &Value) -> Result<(), SettingsError> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    create_settings_dir(parent)?;

    let mut body = serde_json::to_string_pretty(value)
        .map_err(|err| SettingsError::InvalidMcp(err.to_string()))?;
    body.push('\n');

    let tmp_path = path.with_extension("json.tmp");
    {
        let mut file = fs::File::create(&tmp_path)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(fs::Permissions::from_mode(0o600))?;
        }
        file.write_all(body.as_bytes())?;
        file.sync_all()?;
    }
    fs::rename(&tmp_path, path)?;
    Ok(())
}

fn create_settings_dir(dir: &Path) -> Result<(), std::io::Error> {
    if dir.as_os_str().is_empty() || dir.exists() {
        return Ok(());
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        fs::DirBuilder::new().recursive(true).mode(0o750).create(dir)
    }
    #[cfg(not(unix))]
    {
        fs::create_dir_all(dir)
    }
}

/// Strip `/* … */` block comments from JSONC input, string-aware.
///
/// Line comments are deliberately left alone: OpenCode settings routinely
/// contain URLs, and `https://…` would be mangled by a naive `//` stripper.
pub fn strip_block_comments(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    let mut in_string = false;
    let mut escaped = false;

    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                // Skip to the closing delimiter; an unterminated comment
                // swallows the rest of the input, matching lenient readers.
                let mut prev = '\0';
                for inner in chars.by_ref() {
                    if prev == '*' && inner == '/' {
                        break;
                    }
                    prev = inner;
                }
            }
            _ => out.push(c),
        }
    }
    out
}
