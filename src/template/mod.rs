//! ERB-style template engine for views and layouts.
//!
//! Supports:
//! - `<%= expr %>` - Output, HTML-escaped when autoescape is on
//! - `<%- expr %>` - Raw/unescaped output (no HTML escaping)
//! - `<% if/elsif/else/for/end %>` - Control flow
//! - `<%= yield %>` - Layout content insertion point
//! - `<%= render 'controller:action', data %>` - Partial action rendering

pub mod parser;
pub mod renderer;

use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;

use lru::LruCache;
use tracing::debug;

use crate::config::Settings;
use crate::error::{Error, Result};
use parser::{parse_template, TemplateNode};
use renderer::{render_nodes, EngineOptions, PartialRenderer, Scope};

/// A cached template with its parsed AST and modification time.
#[derive(Debug, Clone)]
struct CachedTemplate {
    nodes: Arc<Vec<TemplateNode>>,
    modified: SystemTime,
}

/// Maximum number of parsed templates kept in memory.
const TEMPLATE_CACHE_MAX_SIZE: NonZeroUsize = match NonZeroUsize::new(500) {
    Some(n) => n,
    None => panic!("template cache size must be non-zero"),
};

/// Loads, parses and renders templates from a views directory.
pub struct TemplateCache {
    /// Base directory for views (e.g., app/views)
    views_dir: PathBuf,
    /// Extension appended to template names, without the dot
    suffix: String,
    options: EngineOptions,
    /// Re-read templates on every render
    no_cache: bool,
    /// Re-parse cached templates whose file changed on disk
    watch: bool,
    cache: Mutex<LruCache<PathBuf, CachedTemplate>>,
}

impl TemplateCache {
    /// Create a new template cache for the given views directory.
    pub fn new(views_dir: impl Into<PathBuf>, suffix: impl Into<String>) -> Self {
        Self {
            views_dir: views_dir.into(),
            suffix: suffix.into(),
            options: EngineOptions::default(),
            no_cache: false,
            watch: false,
            cache: Mutex::new(LruCache::new(TEMPLATE_CACHE_MAX_SIZE)),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        let templates = &settings.templates;
        Self::new(settings.views_path(), templates.suffix.clone())
            .with_options(EngineOptions {
                autoescape: templates.autoescape,
                throw_on_undefined: templates.throw_on_undefined,
            })
            .no_cache(templates.no_cache)
            .watch(templates.watch)
    }

    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn no_cache(mut self, no_cache: bool) -> Self {
        self.no_cache = no_cache;
        self
    }

    pub fn watch(mut self, watch: bool) -> Self {
        self.watch = watch;
        self
    }

    /// Get the views directory path.
    pub fn views_dir(&self) -> &Path {
        &self.views_dir
    }

    /// Render the template `name` (e.g. "users/index") with the given scope.
    pub async fn render(
        &self,
        name: &str,
        scope: &Scope,
        partials: &mut (dyn PartialRenderer + '_),
    ) -> Result<String> {
        let (path, nodes) = self.load(name)?;
        let path_str = path.to_string_lossy();
        let mut output = String::new();
        render_nodes(&nodes, scope, self.options, partials, &path_str, &mut output).await?;
        Ok(output)
    }

    /// Resolve a template name to a file path.
    ///
    /// `{name}.{suffix}` is tried first, then the name as given.
    pub fn resolve(&self, name: &str) -> Result<PathBuf> {
        let path = self.views_dir.join(format!("{}.{}", name, self.suffix));
        if path.is_file() {
            return Ok(path);
        }

        let path = self.views_dir.join(name);
        if path.is_file() {
            return Ok(path);
        }

        Err(Error::TemplateNotFound {
            name: name.to_string(),
            dir: self.views_dir.clone(),
        })
    }

    /// Get a template from cache or load and parse it.
    fn load(&self, name: &str) -> Result<(PathBuf, Arc<Vec<TemplateNode>>)> {
        let path = self.resolve(name)?;

        if !self.no_cache {
            let modified = self.watch.then(|| modified_time(&path));
            let mut cache = self.lock();
            if let Some(cached) = cache.get(&path) {
                if modified.map_or(true, |m| m == cached.modified) {
                    return Ok((path, cached.nodes.clone()));
                }
                debug!(template = %path.display(), "template changed on disk, reloading");
            }
        }

        let source = fs::read_to_string(&path).map_err(|e| Error::io(&path, e))?;
        let modified = modified_time(&path);
        let nodes = Arc::new(
            parse_template(&source)
                .map_err(|e| Error::template(e).at(&path.to_string_lossy(), None))?,
        );

        if !self.no_cache {
            self.lock().put(
                path.clone(),
                CachedTemplate {
                    nodes: nodes.clone(),
                    modified,
                },
            );
        }

        Ok((path, nodes))
    }

    /// Clear the template cache (useful for hot reload).
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Number of parsed templates currently cached.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check if any cached templates have changed on disk.
    pub fn has_changes(&self) -> bool {
        self.lock()
            .iter()
            .any(|(path, cached)| modified_time(path) != cached.modified)
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<PathBuf, CachedTemplate>> {
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn modified_time(path: &Path) -> SystemTime {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .unwrap_or(SystemTime::UNIX_EPOCH)
}
