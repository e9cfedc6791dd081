//! The path table: every glob and directory the pipeline reads from or writes
//! to, loaded once at startup.
//!
//! The table has built-in defaults and can be overridden by an optional TOML
//! file:
//!
//! ```toml
//! templates = ["pages/*.html"]
//! style = "styles/site.scss"
//! port = 8080
//!
//! [deploy]
//! branch = "pages"
//! ```

use std::fs;
use std::io::ErrorKind;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;

use crate::error::ConfigError;

/// Logical asset categories mapped to glob patterns.
///
/// All paths are relative to the project root.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathTable {
    /// Template entry points.
    pub templates: Vec<String>,
    /// Templates watched for changes, partials included.
    pub templates_watch: Vec<String>,
    /// Base directory template names are resolved against.
    pub template_root: Utf8PathBuf,
    /// The style entry point.
    pub style: String,
    /// Stylesheets watched for changes.
    pub styles_watch: Vec<String>,
    /// Plain CSS files appended to the minified stylesheet.
    pub style_extra: Vec<String>,
    /// CSS files copied verbatim into the build.
    pub copy_css: Vec<String>,
    /// Scripts copied verbatim.
    pub copy_js: Vec<String>,
    /// Fonts, icons and other static assets.
    pub copy_static: Vec<String>,
    /// Sprite images.
    pub sprite: Vec<String>,
    /// Rendered pages the stylesheet is pruned against.
    pub prune_against: Vec<Utf8PathBuf>,
    /// Development build directory.
    pub build: Utf8PathBuf,
    /// Distribution directory.
    pub dist: Utf8PathBuf,
    /// Port of the development HTTP server.
    pub port: u16,
    pub deploy: DeployConfig,
}

impl Default for PathTable {
    fn default() -> Self {
        Self {
            templates: vec!["pages/index.html".into()],
            templates_watch: vec![
                "blocks/**/*.html".into(),
                "pages/**/*.html".into(),
                "includes/**/*.html".into(),
                "layouts/**/*.html".into(),
            ],
            template_root: ".".into(),
            style: "stylesheets/main.scss".into(),
            styles_watch: vec!["stylesheets/**/*.scss".into(), "blocks/**/*.scss".into()],
            style_extra: vec!["blocks/code/railscasts.css".into()],
            copy_css: vec!["vendor/normalize.css".into()],
            copy_js: vec!["blocks/code/js/*.js".into()],
            copy_static: vec!["blocks/header/**/*.{eot,woff,ttf,svg}".into()],
            sprite: vec!["static/**/icon-sprite.png".into()],
            prune_against: vec!["build/index.html".into()],
            build: "build".into(),
            dist: "dist".into(),
            port: 1889,
            deploy: DeployConfig::default(),
        }
    }
}

/// Where the distribution tree is published.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeployConfig {
    /// Git remote name or URL.
    pub remote: String,
    /// Branch the tree is pushed to.
    pub branch: String,
    /// Commit message of the published commit.
    pub message: String,
    /// Committer name, falls back to the git configuration when unset.
    pub name: Option<String>,
    /// Committer email, falls back to the git configuration when unset.
    pub email: Option<String>,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            remote: "origin".into(),
            branch: "gh-pages".into(),
            message: "Update site".into(),
            name: None,
            email: None,
        }
    }
}

impl PathTable {
    /// Loads the table from a TOML file, falling back to the defaults when the
    /// file does not exist.
    pub fn load(path: impl AsRef<Utf8Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!("no config file at {path}, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Read(path.to_owned(), e)),
        };

        Self::parse(&text).map_err(|e| ConfigError::Parse(path.to_owned(), e))
    }

    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Name of the compiled stylesheet, e.g. `main.css` for `main.scss`.
    pub fn style_output_name(&self) -> String {
        let stem = Utf8Path::new(&self.style).file_stem().unwrap_or("main");
        format!("{stem}.css")
    }
}
