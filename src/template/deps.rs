use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use regex::Regex;

/// Tags that pull another template in by name.
static TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{%-?\s*(include|extends|import|from)\s+(.*?)\s*-?%\}").unwrap()
});

static LITERAL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"["']([^"']+)["']"#).unwrap());

/// Names of the templates referenced by a template source.
///
/// Only string literals are recognized; a template chosen at render time from
/// a variable cannot be known ahead of rendering.
pub fn references(source: &str) -> Vec<String> {
    let mut names = Vec::new();

    for caps in TAG.captures_iter(source) {
        let args = &caps[2];

        // `{% from "x" import a, b %}` only names a template before `import`
        let args = match &caps[1] {
            "from" => args.split(" import ").next().unwrap_or(args),
            _ => args,
        };

        for literal in LITERAL.captures_iter(args) {
            names.push(literal[1].to_string());
        }
    }

    names
}

/// Normalize a path, removing things like `.` and `..`, without touching the
/// filesystem.
pub(crate) fn normalize_path(path: &Utf8Path) -> Utf8PathBuf {
    let mut ret = Utf8PathBuf::new();

    for component in path.components() {
        match component {
            Utf8Component::Prefix(..) | Utf8Component::RootDir => ret.push(component),
            Utf8Component::CurDir => {}
            Utf8Component::ParentDir => {
                if !ret.pop() {
                    ret.push(Utf8Component::ParentDir);
                }
            }
            Utf8Component::Normal(c) => ret.push(c),
        }
    }

    ret
}

/// Direct template references, keyed by the referencing file.
///
/// All paths are full paths: names found in sources are resolved against the
/// template root.
#[derive(Debug, Default)]
pub struct DependencyMap {
    edges: HashMap<Utf8PathBuf, Vec<Utf8PathBuf>>,
}

impl DependencyMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the references found in `source` and returns them resolved.
    pub fn add(&mut self, root: &Utf8Path, path: &Utf8Path, source: &str) -> &[Utf8PathBuf] {
        let resolved = references(source)
            .into_iter()
            .map(|name| normalize_path(&root.join(name)))
            .collect();

        self.edges.insert(path.to_owned(), resolved);
        &self.edges[path]
    }

    /// Every template `entry` depends on, directly or through other templates.
    /// Reference cycles are tolerated.
    pub fn closure(&self, entry: &Utf8Path) -> HashSet<Utf8PathBuf> {
        let mut seen = HashSet::new();
        let mut stack = vec![entry.to_owned()];

        while let Some(path) = stack.pop() {
            if let Some(deps) = self.edges.get(&path) {
                for dep in deps {
                    if seen.insert(dep.clone()) {
                        stack.push(dep.clone());
                    }
                }
            }
        }

        seen.remove(entry);
        seen
    }

    /// Whether `entry` or anything it depends on is in `changed`.
    pub fn is_affected(&self, entry: &Utf8Path, changed: &HashSet<Utf8PathBuf>) -> bool {
        changed.contains(entry) || self.closure(entry).iter().any(|dep| changed.contains(dep))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_all_reference_kinds() {
        let source = r#"
            {% extends "layouts/base.html" %}
            {% import 'macros/forms.html' as forms %}
            {% from "macros/nav.html" import link, "menu" %}
            {%- include "blocks/header/_header.html" -%}
            {% include ["blocks/_a.html", "blocks/_b.html"] ignore missing %}
            {% if include %}{{ "not/a/template.html" }}{% endif %}
        "#;

        assert_eq!(
            references(source),
            vec![
                "layouts/base.html",
                "macros/forms.html",
                "macros/nav.html",
                "blocks/header/_header.html",
                "blocks/_a.html",
                "blocks/_b.html",
            ]
        );
    }

    #[test]
    fn normalizes_relative_components() {
        assert_eq!(
            normalize_path(Utf8Path::new("/site/./pages/../blocks/_a.html")),
            "/site/blocks/_a.html"
        );
    }

    #[test]
    fn closure_is_transitive() {
        let root = Utf8Path::new("/site");
        let mut map = DependencyMap::new();
        map.add(root, Utf8Path::new("/site/pages/index.html"), r#"{% include "_header.html" %}"#);
        map.add(root, Utf8Path::new("/site/_header.html"), r#"{% include "_logo.html" %}"#);
        map.add(root, Utf8Path::new("/site/pages/about.html"), "no includes");

        let deps = map.closure(Utf8Path::new("/site/pages/index.html"));
        assert!(deps.contains(Utf8Path::new("/site/_header.html")));
        assert!(deps.contains(Utf8Path::new("/site/_logo.html")));

        let changed = HashSet::from([Utf8PathBuf::from("/site/_logo.html")]);
        assert!(map.is_affected(Utf8Path::new("/site/pages/index.html"), &changed));
        assert!(!map.is_affected(Utf8Path::new("/site/pages/about.html"), &changed));
    }

    #[test]
    fn closure_survives_cycles() {
        let root = Utf8Path::new("/t");
        let mut map = DependencyMap::new();
        map.add(root, Utf8Path::new("/t/a.html"), r#"{% include "_b.html" %}"#);
        map.add(root, Utf8Path::new("/t/_b.html"), r#"{% include "a.html" %}"#);

        let deps = map.closure(Utf8Path::new("/t/a.html"));
        assert_eq!(deps, HashSet::from([Utf8PathBuf::from("/t/_b.html")]));
    }
}
