//! Native messaging transport.
//!
//! Launches the native host as a child process and exchanges
//! length-prefixed JSON messages over its stdin/stdout, the same wire
//! protocol browsers use for native messaging.
//!
//! # Locating the Host
//!
//! - [`NativeHostConfig`] names the program and arguments directly.
//! - [`NativeHostManifest`] describes a registered host. With
//!   [`NativeHostTransport::from_manifest`] the manifest is re-read on every
//!   `open()`, so registering the host later lets a reconnect succeed.
//!
//! # Channel Lifecycle
//!
//! Each `open()` spawns one reader task (stdout → inbound) and one writer
//! task (outbound → stdin). The writer owns the child process and kills it
//! once the link is dropped. The reader ending (host exit, broken pipe,
//! oversized frame) closes the inbound side, which the bridge observes as a
//! disconnect.

// ============================================================================
// Imports
// ============================================================================

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result};

use super::codec::{DEFAULT_MAX_MESSAGE_BYTES, NativeMessageCodec};
use super::{Link, Transport};

// ============================================================================
// Constants
// ============================================================================

/// The only manifest `type` browsers support.
const STDIO_HOST_TYPE: &str = "stdio";

// ============================================================================
// NativeHostConfig
// ============================================================================

/// How to launch the native host process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeHostConfig {
    /// Host executable.
    pub program: PathBuf,

    /// Command-line arguments.
    pub args: Vec<String>,

    /// Largest accepted inbound message.
    pub max_message_bytes: usize,
}

impl NativeHostConfig {
    /// Creates a config for `program` with no arguments.
    #[inline]
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
        }
    }

    /// Adds an argument.
    #[inline]
    #[must_use]
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Adds multiple arguments.
    #[inline]
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets the largest accepted inbound message.
    #[inline]
    #[must_use]
    pub fn with_max_message_bytes(mut self, max_message_bytes: usize) -> Self {
        self.max_message_bytes = max_message_bytes;
        self
    }
}

// ============================================================================
// NativeHostManifest
// ============================================================================

/// A native messaging host manifest.
///
/// # Format
///
/// ```json
/// {
///   "name": "com.proxxy.native_host",
///   "description": "Proxxy native host",
///   "path": "/usr/local/bin/proxxy-native-host",
///   "type": "stdio",
///   "allowed_origins": ["chrome-extension://abcdefghijklmnop/"]
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeHostManifest {
    /// Host name, e.g. `com.proxxy.native_host`.
    pub name: String,

    /// Human-readable description.
    #[serde(default)]
    pub description: String,

    /// Host executable. Relative paths resolve against the manifest directory.
    pub path: PathBuf,

    /// Transport type, always `stdio`.
    #[serde(rename = "type")]
    pub host_type: String,

    /// Origins allowed to launch the host.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

impl NativeHostManifest {
    /// Loads a manifest from disk.
    ///
    /// Relative `path` entries are resolved against the manifest directory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connect`] if the manifest is missing, unreadable or
    /// malformed (the host counts as not registered).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            Error::connect(format!(
                "native host manifest {} not readable: {e}",
                path.display()
            ))
        })?;

        let mut manifest: Self = serde_json::from_str(&text).map_err(|e| {
            Error::connect(format!(
                "native host manifest {} is invalid: {e}",
                path.display()
            ))
        })?;

        if manifest.path.is_relative()
            && let Some(dir) = path.parent()
        {
            manifest.path = dir.join(&manifest.path);
        }

        Ok(manifest)
    }

    /// Builds the launch config for a caller with `origin`.
    ///
    /// The origin is passed as the first argument, as browsers do.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connect`] if the manifest type is not `stdio` or
    /// `origin` is not allowed.
    pub fn launch_config(&self, origin: &str) -> Result<NativeHostConfig> {
        if self.host_type != STDIO_HOST_TYPE {
            return Err(Error::connect(format!(
                "native host {} has unsupported type {:?}",
                self.name, self.host_type
            )));
        }

        if !self.allowed_origins.iter().any(|allowed| allowed == origin) {
            return Err(Error::connect(format!(
                "origin {origin} is not allowed to launch native host {}",
                self.name
            )));
        }

        Ok(NativeHostConfig::new(&self.path).with_arg(origin))
    }
}

// ============================================================================
// NativeHostTransport
// ============================================================================

/// Where the transport finds its host.
#[derive(Debug, Clone)]
enum HostSource {
    Program(NativeHostConfig),
    Manifest {
        path: PathBuf,
        origin: String,
        max_message_bytes: usize,
    },
}

/// [`Transport`] that launches the native host over stdio.
///
/// # Example
///
/// ```ignore
/// use proxxy_bridge::transport::{NativeHostConfig, NativeHostTransport};
///
/// let transport = NativeHostTransport::new(
///     NativeHostConfig::new("/usr/local/bin/proxxy-native-host"),
/// );
/// let bridge = CommandBridge::new(transport);
/// ```
#[derive(Debug, Clone)]
pub struct NativeHostTransport {
    source: HostSource,
}

impl NativeHostTransport {
    /// Creates a transport launching the configured program.
    #[inline]
    #[must_use]
    pub fn new(config: NativeHostConfig) -> Self {
        Self {
            source: HostSource::Program(config),
        }
    }

    /// Creates a transport resolving the host through a manifest file.
    #[inline]
    #[must_use]
    pub fn from_manifest(manifest_path: impl Into<PathBuf>, origin: impl Into<String>) -> Self {
        Self {
            source: HostSource::Manifest {
                path: manifest_path.into(),
                origin: origin.into(),
                max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            },
        }
    }

    /// Sets the largest accepted inbound message.
    #[must_use]
    pub fn with_max_message_bytes(mut self, max: usize) -> Self {
        match &mut self.source {
            HostSource::Program(config) => config.max_message_bytes = max,
            HostSource::Manifest {
                max_message_bytes, ..
            } => *max_message_bytes = max,
        }
        self
    }

    /// Resolves the launch config for the next `open()`.
    fn resolve(&self) -> Result<NativeHostConfig> {
        match &self.source {
            HostSource::Program(config) => Ok(config.clone()),
            HostSource::Manifest {
                path,
                origin,
                max_message_bytes,
            } => Ok(NativeHostManifest::load(path)?
                .launch_config(origin)?
                .with_max_message_bytes(*max_message_bytes)),
        }
    }

    /// Reads frames from the host's stdout until it closes.
    async fn read_loop(
        mut frames: FramedRead<ChildStdout, NativeMessageCodec>,
        inbound: mpsc::UnboundedSender<Value>,
    ) {
        while let Some(frame) = frames.next().await {
            match frame {
                Ok(message) => {
                    if inbound.send(message).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Native host stream error");
                    break;
                }
            }
        }

        debug!("Native host stdout closed");
    }

    /// Writes queued messages to the host's stdin, then stops the host.
    async fn write_loop(
        mut frames: FramedWrite<ChildStdin, NativeMessageCodec>,
        mut outbound: mpsc::UnboundedReceiver<Value>,
        mut child: Child,
    ) {
        while let Some(message) = outbound.recv().await {
            if let Err(e) = frames.send(message).await {
                warn!(error = %e, "Failed to write to native host");
                break;
            }
            trace!("Message written to native host");
        }

        drop(frames);

        match child.try_wait() {
            Ok(Some(status)) => debug!(%status, "Native host exited"),
            _ => {
                if let Err(e) = child.kill().await {
                    debug!(error = %e, "Failed to kill native host");
                } else {
                    debug!("Native host killed");
                }
            }
        }
    }
}

#[async_trait]
impl Transport for NativeHostTransport {
    async fn open(&self) -> Result<Link> {
        let config = self.resolve()?;

        let mut child = Command::new(&config.program)
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::connect(format!(
                    "failed to launch native host {}: {e}",
                    config.program.display()
                ))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::connect("native host stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::connect("native host stdout unavailable"))?;

        info!(
            program = %config.program.display(),
            pid = child.id(),
            "Native host launched"
        );

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        tokio::spawn(Self::read_loop(
            FramedRead::new(stdout, NativeMessageCodec::new(config.max_message_bytes)),
            inbound_tx,
        ));
        tokio::spawn(Self::write_loop(
            FramedWrite::new(stdin, NativeMessageCodec::new(config.max_message_bytes)),
            outbound_rx,
            child,
        ));

        Ok(Link::new(outbound_tx, inbound_rx))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const ORIGIN: &str = "chrome-extension://abcdefghijklmnop/";

    fn write_manifest(dir: &Path, manifest: &Value) -> PathBuf {
        let path = dir.join("com.proxxy.native_host.json");
        fs::write(&path, manifest.to_string()).expect("write manifest");
        path
    }

    #[test]
    fn test_config_builder() {
        let config = NativeHostConfig::new("/bin/host")
            .with_arg("--verbose")
            .with_args(["--a", "--b"])
            .with_max_message_bytes(64);

        assert_eq!(config.program, PathBuf::from("/bin/host"));
        assert_eq!(config.args, vec!["--verbose", "--a", "--b"]);
        assert_eq!(config.max_message_bytes, 64);
    }

    #[test]
    fn test_manifest_load_resolves_relative_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_manifest(
            dir.path(),
            &json!({
                "name": "com.proxxy.native_host",
                "description": "Proxxy native host",
                "path": "bin/host",
                "type": "stdio",
                "allowed_origins": [ORIGIN]
            }),
        );

        let manifest = NativeHostManifest::load(&path).expect("load");
        assert_eq!(manifest.path, dir.path().join("bin/host"));

        let config = manifest.launch_config(ORIGIN).expect("allowed");
        assert_eq!(config.args, vec![ORIGIN.to_string()]);
    }

    #[test]
    fn test_manifest_rejects_unknown_origin() {
        let manifest = NativeHostManifest {
            name: "com.proxxy.native_host".into(),
            description: String::new(),
            path: PathBuf::from("/bin/host"),
            host_type: "stdio".into(),
            allowed_origins: vec![ORIGIN.into()],
        };

        let err = manifest
            .launch_config("chrome-extension://other/")
            .unwrap_err();
        assert!(matches!(err, Error::Connect { .. }));
    }

    #[test]
    fn test_manifest_rejects_non_stdio_type() {
        let manifest = NativeHostManifest {
            name: "com.proxxy.native_host".into(),
            description: String::new(),
            path: PathBuf::from("/bin/host"),
            host_type: "socket".into(),
            allowed_origins: vec![ORIGIN.into()],
        };

        assert!(manifest.launch_config(ORIGIN).is_err());
    }

    #[test]
    fn test_missing_manifest_is_connect_error() {
        let err = NativeHostManifest::load("/nonexistent/manifest.json").unwrap_err();
        assert!(err.is_connection_error());
    }

    #[tokio::test]
    async fn test_open_missing_program_is_connect_error() {
        let transport = NativeHostTransport::new(NativeHostConfig::new(
            "/nonexistent/proxxy-native-host",
        ));

        let err = transport.open().await.unwrap_err();
        assert!(matches!(err, Error::Connect { .. }));
    }

    #[tokio::test]
    async fn test_open_via_missing_manifest_is_connect_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let transport =
            NativeHostTransport::from_manifest(dir.path().join("absent.json"), ORIGIN);

        let err = transport.open().await.unwrap_err();
        assert!(matches!(err, Error::Connect { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_echo_host_round_trip() {
        // `cat` echoes every frame back unchanged.
        let transport = NativeHostTransport::new(NativeHostConfig::new("cat"));
        let mut link = transport.open().await.expect("open");

        let message = json!({ "module": "har", "status": "echo", "data": { "n": 1 } });
        link.send(message.clone()).expect("send");

        assert_eq!(link.recv().await, Some(message));
        link.close();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_host_exit_closes_link() {
        let transport = NativeHostTransport::new(NativeHostConfig::new("true"));
        let mut link = transport.open().await.expect("open");

        assert_eq!(link.recv().await, None);
    }
}
