//! Glob matching and file helpers shared by the tasks.
//!
//! Patterns follow the usual build-tool semantics: every matched file keeps
//! its path relative to the static base of the pattern, so `blocks/header/**/*.svg`
//! copied into `build/` produces `build/icons/logo.svg` for
//! `blocks/header/icons/logo.svg`.

use std::fs;
use std::io::ErrorKind;

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use glob::Pattern;

use crate::error::TaskError;

/// A file matched by a glob pattern.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Matched {
    /// Full path to the file.
    pub path: Utf8PathBuf,
    /// Path relative to the static base of the pattern that matched it.
    pub rel: Utf8PathBuf,
}

fn is_wildcard(component: &str) -> bool {
    component.contains(['*', '?', '['])
}

/// Expands shell-style brace alternation, which the `glob` crate doesn't
/// support. `*.{eot,woff}` becomes `*.eot` and `*.woff`.
pub fn expand_braces(pattern: &str) -> Vec<String> {
    let Some(open) = pattern.find('{') else {
        return vec![pattern.to_string()];
    };

    // find the matching close brace, honoring nesting
    let mut depth = 0;
    let mut close = None;
    for (i, c) in pattern[open..].char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    close = Some(open + i);
                    break;
                }
            }
            _ => {}
        }
    }

    let Some(close) = close else {
        return vec![pattern.to_string()];
    };

    let head = &pattern[..open];
    let body = &pattern[open + 1..close];
    let tail = &pattern[close + 1..];

    let mut alternatives = Vec::new();
    let mut depth = 0;
    let mut start = 0;
    for (i, c) in body.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => depth -= 1,
            ',' if depth == 0 => {
                alternatives.push(&body[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    alternatives.push(&body[start..]);

    alternatives
        .into_iter()
        .flat_map(|alt| expand_braces(&format!("{head}{alt}{tail}")))
        .collect()
}

/// The static part of a pattern, i.e. the directory matched files are made
/// relative to. For a concrete file this is its parent directory.
pub fn glob_base(pattern: &str) -> Utf8PathBuf {
    let path = Utf8Path::new(pattern);
    let components: Vec<_> = path.components().collect();

    match components.iter().position(|c| is_wildcard(c.as_str())) {
        Some(split) => components.iter().take(split).collect(),
        None => path.parent().map(Utf8Path::to_path_buf).unwrap_or_default(),
    }
}

/// Whether any component of a relative path starts with the partial marker.
pub fn is_partial(rel: &Utf8Path) -> bool {
    rel.components().any(|c| match c {
        Utf8Component::Normal(name) => name.starts_with('_'),
        _ => false,
    })
}

/// Finds every file matched by `patterns` under `root`.
///
/// A pattern without wildcards names a single file which must exist. The
/// result is sorted and free of duplicates.
pub fn find(root: &Utf8Path, patterns: &[String]) -> Result<Vec<Matched>, TaskError> {
    let mut found = Vec::new();
    let escaped_root = Pattern::escape(root.as_str());

    for pattern in patterns.iter().flat_map(|p| expand_braces(p)) {
        let base = root.join(glob_base(&pattern));

        if !pattern.contains(['*', '?', '[']) {
            let path = root.join(&pattern);
            if !path.is_file() {
                return Err(TaskError::MissingSource(path));
            }
            let rel = path
                .file_name()
                .map(Utf8PathBuf::from)
                .unwrap_or_else(|| path.clone());
            found.push(Matched { path, rel });
            continue;
        }

        let full = format!("{escaped_root}/{pattern}");
        for entry in glob::glob(&full)? {
            let path = Utf8PathBuf::try_from(entry?)?;
            if !path.is_file() {
                continue;
            }
            let rel = path
                .strip_prefix(&base)
                .map(Utf8Path::to_path_buf)
                .unwrap_or_else(|_| path.clone());
            found.push(Matched { path, rel });
        }
    }

    found.sort();
    found.dedup_by(|a, b| a.path == b.path);
    Ok(found)
}

pub fn read(path: &Utf8Path) -> Result<Vec<u8>, TaskError> {
    fs::read(path).map_err(|source| match source.kind() {
        ErrorKind::NotFound => TaskError::MissingSource(path.to_owned()),
        _ => TaskError::Read {
            path: path.to_owned(),
            source,
        },
    })
}

pub fn read_to_string(path: &Utf8Path) -> Result<String, TaskError> {
    fs::read_to_string(path).map_err(|source| match source.kind() {
        ErrorKind::NotFound => TaskError::MissingSource(path.to_owned()),
        _ => TaskError::Read {
            path: path.to_owned(),
            source,
        },
    })
}

/// Reads the output of an earlier task, reporting a missing file as a missing
/// prerequisite rather than a missing source.
pub fn read_prerequisite(path: &Utf8Path, task: &'static str) -> Result<String, TaskError> {
    read_to_string(path).map_err(|err| match err {
        TaskError::MissingSource(path) => TaskError::MissingPrerequisite { path, task },
        other => other,
    })
}

/// Writes a file, creating its parent directories as needed.
pub fn write(path: &Utf8Path, data: impl AsRef<[u8]>) -> Result<(), TaskError> {
    let wrap = |source| TaskError::Write {
        path: path.to_owned(),
        source,
    };

    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(wrap)?;
    }
    fs::write(path, data).map_err(wrap)
}

/// Copies every matched file verbatim into `dest`, returning how many files
/// were copied.
pub fn copy(root: &Utf8Path, patterns: &[String], dest: &Utf8Path) -> Result<usize, TaskError> {
    let files = find(root, patterns)?;

    for file in &files {
        let target = dest.join(&file.rel);
        if let Some(dir) = target.parent() {
            fs::create_dir_all(dir).map_err(|source| TaskError::Write {
                path: dir.to_owned(),
                source,
            })?;
        }
        fs::copy(&file.path, &target).map_err(|source| TaskError::Write {
            path: target.clone(),
            source,
        })?;
    }

    Ok(files.len())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Creates a project root in a temporary directory and fills it with the
    /// given files.
    pub(crate) fn project(files: &[(&str, &str)]) -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        for (path, content) in files {
            write(&root.join(path), content).unwrap();
        }
        (dir, root)
    }

    #[test]
    fn braces_expand_to_alternatives() {
        assert_eq!(
            expand_braces("fonts/**/*.{eot,woff,ttf}"),
            vec!["fonts/**/*.eot", "fonts/**/*.woff", "fonts/**/*.ttf"]
        );
        assert_eq!(expand_braces("a/{b,c{d,e}}"), vec!["a/b", "a/cd", "a/ce"]);
        assert_eq!(expand_braces("plain/*.js"), vec!["plain/*.js"]);
    }

    #[test]
    fn base_is_the_static_prefix() {
        assert_eq!(glob_base("blocks/header/**/*.svg"), "blocks/header");
        assert_eq!(glob_base("pages/index.html"), "pages");
        assert_eq!(glob_base("*.js"), "");
    }

    #[test]
    fn partials_are_detected_by_any_component() {
        assert!(is_partial(Utf8Path::new("_header.html")));
        assert!(is_partial(Utf8Path::new("_layouts/base.html")));
        assert!(!is_partial(Utf8Path::new("pages/index.html")));
        assert!(!is_partial(Utf8Path::new("pages/my_page.html")));
    }

    #[test]
    fn find_keeps_paths_relative_to_base() {
        let (_dir, root) = project(&[
            ("blocks/header/icons/logo.svg", "<svg/>"),
            ("blocks/header/font.woff", "woff"),
            ("blocks/header/readme.txt", "skip"),
        ]);

        let files = find(&root, &["blocks/header/**/*.{svg,woff}".into()]).unwrap();
        let rels: Vec<_> = files.iter().map(|f| f.rel.as_str()).collect();

        assert_eq!(rels, vec!["font.woff", "icons/logo.svg"]);
    }

    #[test]
    fn missing_literal_is_an_error() {
        let (_dir, root) = project(&[]);
        let err = find(&root, &["pages/index.html".into()]).unwrap_err();
        assert!(matches!(err, TaskError::MissingSource(_)));
    }

    #[test]
    fn empty_glob_is_not_an_error() {
        let (_dir, root) = project(&[]);
        assert!(find(&root, &["js/*.js".into()]).unwrap().is_empty());
    }

    #[test]
    fn copy_mirrors_structure() {
        let (_dir, root) = project(&[("src/js/a.js", "a"), ("src/js/lib/b.js", "b")]);
        let dest = root.join("build/js");

        let count = copy(&root, &["src/js/**/*.js".into()], &dest).unwrap();

        assert_eq!(count, 2);
        assert_eq!(fs::read_to_string(dest.join("a.js")).unwrap(), "a");
        assert_eq!(fs::read_to_string(dest.join("lib/b.js")).unwrap(), "b");
    }

    #[test]
    fn missing_prerequisite_is_named() {
        let (_dir, root) = project(&[]);
        let err = read_prerequisite(&root.join("dist/css/main.css"), "uncss").unwrap_err();
        assert!(matches!(
            err,
            TaskError::MissingPrerequisite { task: "uncss", .. }
        ));
    }
}
