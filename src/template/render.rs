use camino::{Utf8Path, Utf8PathBuf};
use minijinja::{Environment, context, path_loader};

use crate::error::TemplateError;

/// Renders templates from a base directory.
///
/// A renderer is created per task run, so templates changed on disk since
/// the previous run are always loaded fresh.
pub struct Renderer {
    env: Environment<'static>,
    root: Utf8PathBuf,
}

impl Renderer {
    /// `mode` is exposed to templates as the global `mode`.
    pub fn new(root: impl Into<Utf8PathBuf>, mode: &'static str) -> Self {
        let root = root.into();

        let mut env = Environment::new();
        env.set_loader(path_loader(root.as_std_path().to_path_buf()));
        env.add_global("mode", mode);

        Self { env, root }
    }

    /// Renders the template stored at `path`, which must live below the root.
    pub fn render(&self, path: &Utf8Path) -> Result<String, TemplateError> {
        let name = path
            .strip_prefix(&self.root)
            .map_err(|_| TemplateError {
                path: path.to_owned(),
                line: None,
                message: format!("template is outside of the template root '{}'", self.root),
            })?
            .as_str()
            .replace('\\', "/");

        self.env
            .get_template(&name)
            .and_then(|template| template.render(context! {}))
            .map_err(|err| self.error(path, err))
    }

    fn error(&self, path: &Utf8Path, err: minijinja::Error) -> TemplateError {
        // errors inside an included template point at that template
        let path = match err.name() {
            Some(name) => self.root.join(name),
            None => path.to_owned(),
        };

        let message = match err.detail() {
            Some(detail) => format!("{}: {detail}", err.kind()),
            None => err.kind().to_string(),
        };

        TemplateError {
            path,
            line: err.line(),
            message,
        }
    }
}

/// Inserts a script right before the closing body tag, or at the end of the
/// document when there is none.
pub fn inject_script(html: &str, script: &str) -> String {
    let tag = format!("<script>{script}</script>");

    match html.rfind("</body>") {
        Some(at) => {
            let mut out = String::with_capacity(html.len() + tag.len());
            out.push_str(&html[..at]);
            out.push_str(&tag);
            out.push_str(&html[at..]);
            out
        }
        None => format!("{html}{tag}"),
    }
}
