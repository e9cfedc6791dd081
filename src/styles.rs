//! Stylesheet compilation, pruning and minification.
//!
//! SCSS is compiled with `grass`; CSS is parsed and printed with
//! `lightningcss`. Pruning removes every selector that references a tag,
//! class or id not used by a set of reference pages, which are read with
//! `tl`.

use std::collections::HashSet;

use camino::Utf8Path;
use lightningcss::printer::PrinterOptions;
use lightningcss::rules::CssRule;
use lightningcss::selector::{Component, Selector};
use lightningcss::stylesheet::{MinifyOptions, ParserOptions, StyleSheet};

use crate::error::StyleError;

/// Compiles an SCSS entry point. Imports are resolved against the entry's
/// directory and the project root.
pub fn compile(path: &Utf8Path, root: &Utf8Path) -> Result<String, StyleError> {
    let options = grass::Options::default().load_path(root.as_std_path());
    grass::from_path(path.as_std_path(), &options).map_err(|e| StyleError::Sass(path.to_owned(), e))
}

/// Tags, classes and ids used by a set of HTML pages.
#[derive(Debug, Default)]
pub struct Usage {
    pub tags: HashSet<String>,
    pub classes: HashSet<String>,
    pub ids: HashSet<String>,
}

impl Usage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records everything used by an HTML document.
    pub fn add_html(&mut self, html: &str) -> Result<(), String> {
        let dom = tl::parse(html, tl::ParserOptions::default())
            .map_err(|_| String::from("couldn't parse HTML"))?;

        for node in dom.nodes() {
            let Some(tag) = node.as_tag() else {
                continue;
            };

            self.tags
                .insert(tag.name().as_utf8_str().to_ascii_lowercase());

            for (key, value) in tag.attributes().iter() {
                let Some(value) = value else {
                    continue;
                };

                let key: &str = key.as_ref();
                match key {
                    "class" => self
                        .classes
                        .extend(value.split_ascii_whitespace().map(str::to_string)),
                    "id" => {
                        self.ids.insert(value.trim().to_string());
                    }
                    _ => {}
                }
            }
        }

        Ok(())
    }
}

/// Whether every tag, class and id named by a single selector is used.
///
/// Attribute selectors, pseudo-classes and pseudo-elements are ignored, so
/// `.menu:hover` is kept whenever `.menu` is used.
fn selector_is_used(selector: &Selector<'_>, usage: &Usage) -> bool {
    selector.iter_raw_match_order().all(|component| match component {
        Component::LocalName(local) => usage.tags.contains(&*local.lower_name.0),
        Component::Class(class) => usage.classes.contains(&*class.0),
        Component::ID(id) => usage.ids.contains(&*id.0),
        _ => true,
    })
}

fn prune_rules(rules: &mut Vec<CssRule<'_>>, usage: &Usage) {
    let mut kept = Vec::with_capacity(rules.len());

    for mut rule in std::mem::take(rules) {
        let keep = match &mut rule {
            CssRule::Style(style) => {
                style
                    .selectors
                    .0
                    .retain(|selector| selector_is_used(selector, usage));
                !style.selectors.0.is_empty()
            }
            CssRule::Media(media) => {
                prune_rules(&mut media.rules.0, usage);
                !media.rules.0.is_empty()
            }
            CssRule::Supports(supports) => {
                prune_rules(&mut supports.rules.0, usage);
                !supports.rules.0.is_empty()
            }
            _ => true,
        };

        if keep {
            kept.push(rule);
        }
    }

    *rules = kept;
}

/// Removes the style rules not used by any of the recorded pages.
pub fn prune(css: &str, usage: &Usage, path: &Utf8Path) -> Result<String, StyleError> {
    let wrap = |message: String| StyleError::Css(path.to_owned(), message);

    let options = ParserOptions {
        filename: path.to_string(),
        ..ParserOptions::default()
    };
    let mut sheet = StyleSheet::parse(css, options).map_err(|e| wrap(e.to_string()))?;

    prune_rules(&mut sheet.rules.0, usage);

    let printed = sheet
        .to_css(PrinterOptions::default())
        .map_err(|e| wrap(e.to_string()))?;

    Ok(printed.code)
}

/// Minifies a stylesheet.
pub fn minify(css: &str, path: &Utf8Path) -> Result<String, StyleError> {
    let wrap = |message: String| StyleError::Css(path.to_owned(), message);

    let options = ParserOptions {
        filename: path.to_string(),
        ..ParserOptions::default()
    };
    let mut sheet = StyleSheet::parse(css, options).map_err(|e| wrap(e.to_string()))?;

    sheet
        .minify(MinifyOptions::default())
        .map_err(|e| wrap(e.to_string()))?;

    let printed = sheet
        .to_css(PrinterOptions {
            minify: true,
            ..PrinterOptions::default()
        })
        .map_err(|e| wrap(e.to_string()))?;

    Ok(printed.code)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(html: &str) -> Usage {
        let mut usage = Usage::new();
        usage.add_html(html).unwrap();
        usage
    }

    #[test]
    fn collects_tags_classes_and_ids() {
        let usage = usage(r#"<body><div id="main" class="card  wide"><h1>x</h1></div></body>"#);

        assert!(usage.tags.contains("h1"));
        assert!(usage.tags.contains("div"));
        assert!(usage.classes.contains("card"));
        assert!(usage.classes.contains("wide"));
        assert!(usage.ids.contains("main"));
    }

    fn used(selector: &str, usage: &Usage) -> bool {
        let css = format!("{selector} {{ color: red }}");
        let sheet = StyleSheet::parse(&css, ParserOptions::default()).unwrap();
        match &sheet.rules.0[0] {
            CssRule::Style(style) => style.selectors.0.iter().all(|s| selector_is_used(s, usage)),
            _ => panic!("not a style rule: {selector}"),
        }
    }

    #[test]
    fn selector_usage() {
        let usage = usage(r#"<ul class="menu"><li><a href="/" id="home">home</a></li></ul>"#);

        assert!(used(".menu", &usage));
        assert!(used("ul.menu > li a#home", &usage));
        assert!(used("UL.menu", &usage));
        assert!(used(".menu:hover", &usage));
        assert!(used("a[href^=\"/\"]", &usage));
        assert!(used("li:not(.active)", &usage));
        assert!(used("*", &usage));
        assert!(used(":root", &usage));

        assert!(!used(".footer", &usage));
        assert!(!used(".menu .active", &usage));
        assert!(!used("table", &usage));
        assert!(!used("#away::before", &usage));
    }

    #[test]
    fn attribute_values_do_not_leak_into_names() {
        let usage = usage(r#"<a title="x]y" class="menu" data-k="a.b">m</a>"#);
        let css = r##"
            a[title="x]y"] { color: red }
            .menu[data-k="a.b"], [data-k="#x,.y"] p { margin: 0 }
        "##;

        let out = prune(css, &usage, Utf8Path::new("main.css")).unwrap();

        assert!(out.contains("x]y"));
        assert!(out.contains(".menu[data-k=\"a.b\"]"));
        assert!(!out.contains("#x,.y"));
    }

    #[test]
    fn prune_drops_unused_rules() {
        let usage = usage(
            r#"<html><body><h1 class="used">t</h1><div id="main"><p class="used"></p></div></body></html>"#,
        );
        let css = r#"
            .used { color: red }
            .unused { color: blue }
            h1, .gone { margin: 0 }
            #main .used { padding: 0 }
            @media (max-width: 600px) { .unused { color: green } }
            @media print { h1 { color: black } }
        "#;

        let out = prune(css, &usage, Utf8Path::new("main.css")).unwrap();

        assert!(out.contains(".used"));
        assert!(out.contains("h1"));
        assert!(out.contains("#main .used"));
        assert!(out.contains("@media print"));
        assert!(!out.contains(".unused"));
        assert!(!out.contains(".gone"));
        assert!(!out.contains("max-width"));
    }

    #[test]
    fn minify_removes_whitespace() {
        let out = minify(".a {\n  color: #ff0000;\n}\n", Utf8Path::new("a.css")).unwrap();
        assert_eq!(out.trim(), ".a{color:red}");
    }

    #[test]
    fn compiles_scss_with_imports() {
        let (_dir, root) = crate::io::tests::project(&[
            ("stylesheets/main.scss", "@import 'vars';\n.a { color: $c; }"),
            ("stylesheets/_vars.scss", "$c: red;"),
        ]);

        let css = compile(&root.join("stylesheets/main.scss"), &root).unwrap();
        assert!(css.contains("color: red"));
    }
}
