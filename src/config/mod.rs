//! Application settings.
//!
//! Settings come from `<app>/settings.yml` (every key optional), after the
//! app's `.env` files are loaded. A few environment variables override the
//! file: `HOST`, `PORT`, `APP_ENV` and `CONDUCTOR_REQUEST_LOG`.

pub mod env_loader;

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};

pub const SETTINGS_FILE: &str = "settings.yml";

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Application root; views and public paths are relative to it.
    #[serde(skip)]
    pub app_dir: PathBuf,
    pub host: String,
    pub port: u16,
    /// Detailed error pages and template watching.
    pub dev_mode: bool,
    /// Prefix marking routing hints in action signatures.
    pub hint_sign: String,
    /// Controller whose `index` action is mounted at `/`.
    pub root_controller: String,
    /// Layout used when the first `render()` names none.
    pub default_layout: String,
    /// Controller whose `index` action supplies layout data.
    pub layout_controller: String,
    pub views_dir: PathBuf,
    pub public_dir: PathBuf,
    pub request_log: bool,
    pub templates: TemplateSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            app_dir: PathBuf::from("."),
            host: "0.0.0.0".to_string(),
            port: 3000,
            dev_mode: false,
            hint_sign: "$".to_string(),
            root_controller: "index".to_string(),
            default_layout: "layout/index".to_string(),
            layout_controller: "layout".to_string(),
            views_dir: PathBuf::from("views"),
            public_dir: PathBuf::from("public"),
            request_log: true,
            templates: TemplateSettings::default(),
        }
    }
}

/// Template engine options.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TemplateSettings {
    pub suffix: String,
    /// Escape `<%= %>` output. On unless `autoescape: false` is set.
    pub autoescape: bool,
    pub no_cache: bool,
    pub watch: bool,
    pub throw_on_undefined: bool,
}

impl Default for TemplateSettings {
    fn default() -> Self {
        Self {
            suffix: "html".to_string(),
            autoescape: true,
            no_cache: false,
            watch: false,
            throw_on_undefined: false,
        }
    }
}

impl Settings {
    /// Load settings for the application in `folder`.
    pub fn load(folder: &Path) -> Result<Self> {
        env_loader::load_env_files(folder);

        let file = folder.join(SETTINGS_FILE);
        let mut settings = if file.is_file() {
            let source = std::fs::read_to_string(&file).map_err(|e| Error::io(&file, e))?;
            Self::from_yaml(&source, &file)?
        } else {
            Self::default()
        };

        settings.app_dir = folder.to_path_buf();
        settings.apply_env(|key| std::env::var(key).ok())?;
        Ok(settings)
    }

    pub fn from_yaml(source: &str, path: &Path) -> Result<Self> {
        if source.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(source).map_err(|e| Error::Settings {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Apply environment overrides, reading variables through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(host) = lookup("HOST") {
            self.host = host;
        }
        if let Some(port) = lookup("PORT") {
            self.port = port.parse().map_err(|_| Error::Settings {
                path: PathBuf::from("$PORT"),
                message: format!("'{}' is not a valid port", port),
            })?;
        }
        if let Some(app_env) = lookup("APP_ENV") {
            if app_env == "development" {
                self.dev_mode = true;
                self.templates.watch = true;
            } else if app_env == "production" {
                self.dev_mode = false;
            }
        }
        if let Some(flag) = lookup("CONDUCTOR_REQUEST_LOG") {
            self.request_log = flag != "false" && flag != "0";
        }
        Ok(())
    }

    pub fn views_path(&self) -> PathBuf {
        self.app_dir.join(&self.views_dir)
    }

    pub fn public_path(&self) -> PathBuf {
        self.app_dir.join(&self.public_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.port, 3000);
        assert_eq!(settings.hint_sign, "$");
        assert_eq!(settings.default_layout, "layout/index");
        assert_eq!(settings.templates.suffix, "html");
        assert!(settings.templates.autoescape);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = "port: 8080\nhint_sign: \"@\"\ntemplates:\n  suffix: njk\n  autoescape: false\n";
        let settings = Settings::from_yaml(yaml, Path::new("settings.yml")).unwrap();
        assert_eq!(settings.port, 8080);
        assert_eq!(settings.hint_sign, "@");
        assert_eq!(settings.templates.suffix, "njk");
        assert!(!settings.templates.autoescape);
        assert!(!settings.templates.no_cache);
        assert_eq!(settings.default_layout, "layout/index");
    }

    #[test]
    fn test_invalid_yaml() {
        let err = Settings::from_yaml("port: [1, 2]", Path::new("settings.yml")).unwrap_err();
        assert!(matches!(err, Error::Settings { .. }));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("PORT", "4100"),
            ("APP_ENV", "development"),
            ("CONDUCTOR_REQUEST_LOG", "0"),
        ]
        .into_iter()
        .collect();

        let mut settings = Settings::default();
        settings
            .apply_env(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(settings.port, 4100);
        assert!(settings.dev_mode);
        assert!(settings.templates.watch);
        assert!(!settings.request_log);
    }

    #[test]
    fn test_bad_port() {
        let mut settings = Settings::default();
        let err = settings
            .apply_env(|key| (key == "PORT").then(|| "abc".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("'abc' is not a valid port"));
    }

    #[test]
    fn test_load_from_folder() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(SETTINGS_FILE), "views_dir: templates\n").unwrap();
        let settings = Settings::load(dir.path()).unwrap();
        assert_eq!(settings.views_path(), dir.path().join("templates"));
        assert_eq!(settings.public_path(), dir.path().join("public"));
    }
}
