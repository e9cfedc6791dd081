//! Watch mode is implemented as a three-part system:
//!
//! 1. **File watcher**: Uses the `notify` crate to monitor filesystem
//!    events recursively. It includes debouncing to prevent duplicate builds
//!    from rapid file saves.
//! 2. **WebSocket server**: Spawns a dedicated thread using `tungstenite`
//!    to maintain persistent connections with open browser tabs.
//! 3. **Client script**: The [`Environment`] injects a lightweight
//!    JavaScript snippet into generated pages. This script connects to the
//!    WebSocket server and listens for a `"reload"` message.
//!
//! ## The Loop
//!
//! When a file change is detected:
//! 1. Every batch already queued is drained, and the tasks watching any of
//!    the changed paths are re-run once, together.
//! 2. Upon successful completion, the loop signals the WebSocket thread.
//! 3. The server broadcasts the reload command to all connected clients,
//!    triggering an immediate browser refresh.
//!
//! The next batch is only looked at once the previous run has finished, so a
//! task never runs twice at the same time.

use std::collections::{HashMap, HashSet};
use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use glob::Pattern;
use notify::RecursiveMode;
use notify_debouncer_full::{DebounceEventResult, new_debouncer};
use petgraph::graph::NodeIndex;
use tungstenite::WebSocket;

use crate::cache::ChangeCache;
use crate::core::Environment;
use crate::engine::{TaskGraph, run_nodes};
use crate::error::{PipelineError, WatchError};
use crate::io::expand_braces;

type Clients = Arc<Mutex<Vec<WebSocket<TcpStream>>>>;
type Filters = HashMap<NodeIndex, Vec<Pattern>>;

/// The live-reload WebSocket server.
pub struct LiveReload {
    /// Port the server listens on.
    pub port: u16,
    tx: Sender<()>,
    _threads: (JoinHandle<()>, JoinHandle<()>),
}

impl LiveReload {
    /// Binds port 1337, or an ephemeral port when it's taken, and starts
    /// accepting browser connections.
    pub fn start() -> Result<Self, WatchError> {
        let (tcp, port) = reserve_port()?;
        let clients = Clients::default();

        let thread_i = new_thread_ws_incoming(tcp, clients.clone());
        let (tx, thread_o) = new_thread_ws_reload(clients);

        tracing::debug!(port, "live reload server started");

        Ok(Self {
            port,
            tx,
            _threads: (thread_i, thread_o),
        })
    }

    /// Tells every connected page to reload.
    pub fn reload(&self) {
        let _ = self.tx.send(());
    }
}

/// Runs tasks in response to file changes until the watcher shuts down.
///
/// Each task is watched through the globs returned by
/// [`Task::watched`](crate::engine::Task::watched). Failures are logged and
/// the loop keeps going.
pub fn watch(
    graph: &TaskGraph,
    env: &Environment,
    cache: &ChangeCache,
    live: Option<&LiveReload>,
) -> Result<(), PipelineError> {
    let (tx, rx) = std::sync::mpsc::channel();
    let mut debouncer = new_debouncer(Duration::from_millis(250), None, tx).map_err(WatchError::from)?;

    let (watched, filters) = watch_filters(graph, &env.root);

    // Collapse watched paths to reduce the number of watches
    let watched = collapse_watch_paths(watched);

    for path in watched {
        tracing::info!("watching {}", path);
        debouncer
            .watch(path.as_std_path(), RecursiveMode::Recursive)
            .map_err(WatchError::from)?;
    }

    loop {
        let batch = rx.recv().map_err(WatchError::from)?;
        let paths = coalesce(batch, &rx);

        let dirty = dirty_tasks(&filters, &paths);
        if dirty.is_empty() {
            continue;
        }

        let names: Vec<_> = dirty.iter().map(|i| graph.node(*i).name.as_ref()).collect();
        tracing::info!("change detected, re-running {}", names.join(", "));

        match run_nodes(graph, env, cache, &dirty) {
            Ok(_) => {
                if let Some(live) = live {
                    live.reload();
                }
                tracing::info!("rebuild complete, watching for changes...");
            }
            Err(e) => tracing::error!("{e}"),
        }
    }
}

/// Directories to watch, and the patterns each task is watching. Globs whose
/// static prefix doesn't exist are skipped.
fn watch_filters(graph: &TaskGraph, root: &Utf8Path) -> (HashSet<Utf8PathBuf>, Filters) {
    let mut watched = HashSet::new();
    let mut filters = Filters::new();

    for index in graph.graph.node_indices() {
        let Some(task) = &graph.node(index).work else {
            continue;
        };

        for glob in task.watched().iter().flat_map(|glob| expand_braces(glob)) {
            match resolve_watch_path(root, &glob) {
                Ok((path, pattern)) => {
                    watched.insert(path);
                    filters.entry(index).or_default().push(pattern);
                }
                Err(e) => tracing::warn!("not watching {glob}: {e}"),
            }
        }
    }

    (watched, filters)
}

/// Tasks watching at least one of the changed paths.
fn dirty_tasks(filters: &Filters, paths: &HashSet<PathBuf>) -> HashSet<NodeIndex> {
    filters
        .iter()
        .filter(|(_, patterns)| {
            paths
                .iter()
                .any(|path| patterns.iter().any(|pattern| pattern.matches_path(path)))
        })
        .map(|(index, _)| *index)
        .collect()
}

/// Collects the paths of a batch and of every batch already waiting behind
/// it.
fn coalesce(first: DebounceEventResult, rx: &Receiver<DebounceEventResult>) -> HashSet<PathBuf> {
    let mut paths = HashSet::new();

    let mut add = |batch: DebounceEventResult| match batch {
        Ok(events) => {
            for event in events {
                paths.extend(event.event.paths.iter().cloned());
            }
        }
        Err(errors) => {
            for e in errors {
                tracing::error!("watch error: {e}");
            }
        }
    };

    add(first);
    while let Ok(batch) = rx.try_recv() {
        add(batch);
    }

    paths
}

fn reserve_port() -> std::io::Result<(TcpListener, u16)> {
    let listener = match TcpListener::bind("127.0.0.1:1337") {
        Ok(sock) => sock,
        Err(_) => TcpListener::bind("127.0.0.1:0")?,
    };

    let addr = listener.local_addr()?;
    let port = addr.port();
    Ok((listener, port))
}

fn new_thread_ws_incoming(server: TcpListener, clients: Clients) -> JoinHandle<()> {
    std::thread::spawn(move || {
        for stream in server.incoming() {
            let Ok(stream) = stream else {
                continue;
            };

            let socket = match tungstenite::accept(stream) {
                Ok(socket) => socket,
                Err(e) => {
                    tracing::debug!("rejected live reload connection: {e}");
                    continue;
                }
            };

            if let Ok(mut clients) = clients.lock() {
                clients.push(socket);
            }
        }
    })
}

fn new_thread_ws_reload(clients: Clients) -> (Sender<()>, JoinHandle<()>) {
    let (tx, rx) = std::sync::mpsc::channel();

    let thread = std::thread::spawn(move || {
        while rx.recv().is_ok() {
            let Ok(mut clients) = clients.lock() else {
                break;
            };
            let mut broken = vec![];

            for (i, socket) in clients.iter_mut().enumerate() {
                match socket.send("reload".into()) {
                    Ok(_) => {}
                    Err(tungstenite::error::Error::Io(e)) => {
                        if e.kind() == std::io::ErrorKind::BrokenPipe {
                            broken.push(i);
                        }
                    }
                    Err(tungstenite::error::Error::ConnectionClosed)
                    | Err(tungstenite::error::Error::AlreadyClosed) => broken.push(i),
                    Err(e) => {
                        tracing::error!("Error: {e:?}");
                    }
                }
            }

            for i in broken.into_iter().rev() {
                clients.remove(i);
            }

            // Close all but the last 10 connections
            let len = clients.len();
            if len > 10 {
                for mut socket in clients.drain(0..len - 10) {
                    socket.close(None).ok();
                }
            }
        }
    });

    (tx, thread)
}

/// Splits a glob below `root` into a canonicalized static directory (for
/// watching) and a compiled absolute Pattern (for matching).
pub fn resolve_watch_path(
    root: &Utf8Path,
    glob: &str,
) -> Result<(Utf8PathBuf, Pattern), WatchError> {
    let path = root.join(glob);

    // Split path into static root and dynamic suffix (containing wildcards)
    let components: Vec<_> = path.components().collect();
    let split_idx = components
        .iter()
        .position(|c| c.as_str().contains(['*', '?', '[']))
        .unwrap_or(components.len());

    let root_part: Utf8PathBuf = components.iter().take(split_idx).collect();
    let suffix_part: Utf8PathBuf = components.iter().skip(split_idx).collect();

    // Canonicalize the static root (must exist on disk)
    let absolute_root = root_part.canonicalize_utf8()?;

    // A concrete file is matched exactly, but its parent is watched so that
    // atomic writes are caught.
    let (watch_root, match_pattern) =
        if suffix_part.as_str().is_empty() && absolute_root.is_file() {
            let parent = absolute_root
                .parent()
                .unwrap_or(&absolute_root)
                .to_path_buf();
            (parent, Pattern::escape(absolute_root.as_str()))
        } else {
            let pattern = format!(
                "{}/{}",
                Pattern::escape(absolute_root.as_str()),
                suffix_part
            );
            (absolute_root, pattern)
        };

    let pattern = Pattern::new(match_pattern.trim_end_matches('/'))?;

    Ok((watch_root, pattern))
}

/// Reduces a set of paths to the minimal set of watch roots.
///
/// If we watch `/a` and `/a/b`, we only need to watch `/a` because
/// the watcher is recursive. This function sorts the paths and filters
/// out any path that is a subdirectory of a previously accepted path.
fn collapse_watch_paths(paths: HashSet<Utf8PathBuf>) -> Vec<Utf8PathBuf> {
    let mut paths: Vec<_> = paths.into_iter().collect();
    paths.sort();

    let mut filtered = Vec::new();
    for path in paths {
        if let Some(last) = filtered.last()
            && path.starts_with(last)
        {
            continue;
        }
        filtered.push(path);
    }

    filtered
}
