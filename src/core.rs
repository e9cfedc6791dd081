use camino::{Utf8Path, Utf8PathBuf};

/// A 32-byte BLAKE3 hash used for change detection.
///
/// In watch mode the pipeline fingerprints every template it sees, and a
/// template is considered changed when its fingerprint differs from the one
/// recorded during the previous run.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Hash32([u8; 32]);

impl<T> From<T> for Hash32
where
    T: Into<[u8; 32]>,
{
    fn from(value: T) -> Self {
        Hash32(value.into())
    }
}

impl Hash32 {
    pub fn hash(buffer: impl AsRef<[u8]>) -> Self {
        blake3::Hasher::new()
            .update(buffer.as_ref())
            .finalize()
            .into()
    }

    pub fn to_hex(self) -> String {
        const HEX: &[u8; 16] = b"0123456789abcdef";
        let mut acc = String::with_capacity(64);

        for &byte in &self.0 {
            acc.push(HEX[(byte >> 4) as usize] as char);
            acc.push(HEX[(byte & 0xF) as usize] as char);
        }

        acc
    }
}

impl std::fmt::Debug for Hash32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Hash32({})", self.to_hex())
    }
}

/// The mode in which the pipeline is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// A one-time run of the requested task.
    Build,
    /// A continuous watch mode for development. Template compilation consults
    /// the change cache and only recompiles affected entry points.
    Watch,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Build => "build",
            Mode::Watch => "watch",
        }
    }
}

/// Run-wide settings handed to every task through its context.
///
/// This replaces any process-wide mutable state: the mode is decided once at
/// startup and read by tasks, never written.
#[derive(Debug, Clone)]
pub struct Environment {
    /// Project root; every path in the path table is relative to it.
    pub root: Utf8PathBuf,
    /// The current run mode.
    pub mode: Mode,
    /// Port of the live-reload WebSocket server, if one is running.
    pub port: Option<u16>,
}

impl Environment {
    pub fn new(root: impl Into<Utf8PathBuf>, mode: Mode) -> Self {
        Self {
            root: root.into(),
            mode,
            port: None,
        }
    }

    pub fn is_watching(&self) -> bool {
        self.mode == Mode::Watch
    }

    /// Resolves a project-relative path against the root.
    pub fn path(&self, path: impl AsRef<Utf8Path>) -> Utf8PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    /// Returns a JavaScript snippet to enable live-reloading.
    ///
    /// If a live-reload server is running, this returns a script that
    /// connects to it and reloads the page on any message.
    pub fn get_refresh_script(&self) -> Option<String> {
        self.port.map(|port| {
            format!(
                r#"
const socket = new WebSocket("ws://localhost:{port}");
socket.addEventListener("message", event => {{
    window.location.reload();
}});
"#
            )
        })
    }
}
