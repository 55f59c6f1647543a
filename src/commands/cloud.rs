use std::fs;
use std::path::Path;

use crate::config::{ENV_AUTH_TOKEN, SharkConfig};
use crate::db;
use crate::error::{Result, SharkError};
use crate::output::Format;

const DEFAULT_TOKEN_FILE: &str = ".shark/auth-token";

/// Point the project at a remote-replicated backend. The token itself never
/// enters the config file.
pub fn init(
    project_root: &Path,
    config: &mut SharkConfig,
    url: &str,
    token_file: Option<&str>,
    format: Format,
) -> Result<()> {
    if !url.starts_with("libsql://") && !url.starts_with("https://") {
        return Err(SharkError::Backend(format!(
            "'{url}' is not a libsql:// or https:// URL"
        )));
    }
    config.database.backend = Some("turso".into());
    config.database.url = Some(url.to_string());
    config.database.embedded_replica = true;
    config.database.auth_token_file =
        Some(token_file.unwrap_or(DEFAULT_TOKEN_FILE).to_string());
    config.save(project_root)?;

    match format {
        Format::Json => println!(
            "{}",
            serde_json::json!({"backend": "turso", "url": url, "auth_token_file": config.database.auth_token_file})
        ),
        _ => println!("cloud backend configured: {url} (run `shark cloud login` next)"),
    }
    Ok(())
}

/// Write the auth token file with owner-only permissions. The token comes
/// from the flag or the environment, never from interactive echo.
pub fn login(
    project_root: &Path,
    config: &SharkConfig,
    token: Option<&str>,
    format: Format,
) -> Result<()> {
    let token = match token {
        Some(t) if !t.is_empty() => t.to_string(),
        _ => std::env::var(ENV_AUTH_TOKEN).map_err(|_| {
            SharkError::Backend(format!(
                "no token: pass --token or set {ENV_AUTH_TOKEN}"
            ))
        })?,
    };
    let rel = config
        .database
        .auth_token_file
        .as_deref()
        .unwrap_or(DEFAULT_TOKEN_FILE);
    let path = project_root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, token)?;
    db::restrict_token_file(&path)?;

    match format {
        Format::Json => println!("{}", serde_json::json!({"auth_token_file": rel})),
        _ => println!("token written to {rel}"),
    }
    Ok(())
}
