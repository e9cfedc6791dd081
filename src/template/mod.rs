//! Template compilation and dependency tracking.
//!
//! Templates are rendered with `minijinja`. Files whose name, or any parent
//! directory's name, starts with `_` are partials: they are only ever pulled
//! in by `include`, `extends` or `import` and never rendered on their own.

mod deps;
mod render;

pub use deps::{DependencyMap, references};
pub use render::{Renderer, inject_script};
