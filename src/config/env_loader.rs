//! Environment file loading utilities

use std::path::Path;

use tracing::{debug, warn};

/// Load environment variables from .env files in the application directory.
/// This loads .env first, then .env.{APP_ENV} if APP_ENV is set.
pub fn load_env_files(folder: &Path) {
    load_env_file(folder, ".env", false);

    if let Ok(app_env) = std::env::var("APP_ENV") {
        load_env_file(folder, &format!(".env.{}", app_env), true);
    }
}

/// Load a single .env file
///
/// # Arguments
/// * `folder` - The directory containing the .env file
/// * `filename` - The name of the .env file
/// * `override_existing` - Whether to override existing environment variables
pub fn load_env_file(folder: &Path, filename: &str, override_existing: bool) {
    let env_file = folder.join(filename);
    if !env_file.exists() {
        return;
    }

    let content = match std::fs::read_to_string(&env_file) {
        Ok(content) => content,
        Err(e) => {
            warn!(file = %env_file.display(), error = %e, "skipping unreadable env file");
            return;
        }
    };

    for (key, value) in parse_env(&content) {
        if override_existing || std::env::var(key).is_err() {
            // Called from main before the runtime starts any threads.
            std::env::set_var(key, value);
        }
    }
    debug!(file = %env_file.display(), "loaded env file");
}

/// Parse `KEY=value` lines, skipping blanks and `#` comments.
fn parse_env(content: &str) -> Vec<(&str, &str)> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| {
            (
                key.trim(),
                value.trim().trim_matches('"').trim_matches('\''),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_env() {
        let content = "# comment\n\nPORT=4000\nNAME = \"demo app\"\nQUOTED='x'\nbroken line\n";
        assert_eq!(
            parse_env(content),
            vec![("PORT", "4000"), ("NAME", "demo app"), ("QUOTED", "x")]
        );
    }
}
