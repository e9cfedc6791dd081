#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod cache;
pub mod config;
mod core;
pub mod engine;
mod error;
mod io;
pub mod styles;
pub mod tasks;
pub mod template;

pub use crate::cache::ChangeCache;
pub use crate::config::{DeployConfig, PathTable};
pub use crate::core::{Environment, Hash32, Mode};
pub use crate::engine::{Blueprint, Task, TaskContext, TaskGraph};
pub use crate::error::*;
