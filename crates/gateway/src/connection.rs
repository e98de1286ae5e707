use std::{
    collections::BTreeMap,
    fmt,
    sync::{
        OnceLock,
        atomic::{AtomicBool, Ordering},
    },
    time::Instant,
};

use {async_trait::async_trait, serde::Serialize, uuid::Uuid};

use hermes_protocol::{
    Address, DEFAULT_CONNECTED_MSG, DEFAULT_DISCONNECTED_MSG, Registration, ServerFrame,
};

// ── Identity ─────────────────────────────────────────────────────────────────

/// Opaque identity of one client link, stable for its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Outbound transport seam ──────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("connection closed")]
    Closed,

    #[error("send timed out")]
    Timeout,
}

/// Outbound half of a client transport. Implementations must deliver frames
/// to one link in the order `send_frame` calls complete.
#[async_trait]
pub trait FrameSink: Send + Sync {
    async fn send_frame(&self, frame: ServerFrame) -> Result<(), SinkError>;
}

// ── Connection ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Unregistered,
    Registered,
    Terminated,
}

/// Where a client connected from, for status reporting.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PeerInfo {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub headers: BTreeMap<String, String>,
}

/// A client link and its registration.
///
/// The registration is written at most once; once present the address never
/// changes for the remaining lifetime of the connection.
pub struct Connection {
    id: ConnectionId,
    sink: Box<dyn FrameSink>,
    peer: PeerInfo,
    registration: OnceLock<Registration>,
    terminated: AtomicBool,
    connected_at: Instant,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}

impl Connection {
    pub fn new(sink: impl FrameSink + 'static, peer: PeerInfo) -> Self {
        Self {
            id: ConnectionId::generate(),
            sink: Box::new(sink),
            peer,
            registration: OnceLock::new(),
            terminated: AtomicBool::new(false),
            connected_at: Instant::now(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> &PeerInfo {
        &self.peer
    }

    pub fn connected_at(&self) -> Instant {
        self.connected_at
    }

    pub fn state(&self) -> ConnectionState {
        if self.terminated.load(Ordering::Acquire) {
            ConnectionState::Terminated
        } else if self.registration.get().is_some() {
            ConnectionState::Registered
        } else {
            ConnectionState::Unregistered
        }
    }

    pub fn registration(&self) -> Option<&Registration> {
        self.registration.get()
    }

    pub fn address(&self) -> Option<Address> {
        self.registration.get().map(|r| r.address)
    }

    pub fn connected_msg(&self) -> &str {
        self.registration
            .get()
            .map_or(DEFAULT_CONNECTED_MSG, |r| r.connected_msg.as_str())
    }

    pub fn disconnected_msg(&self) -> &str {
        self.registration
            .get()
            .map_or(DEFAULT_DISCONNECTED_MSG, |r| r.disconnected_msg.as_str())
    }

    /// Bind the registration. Fails with the rejected value if already bound.
    pub(crate) fn bind(&self, registration: Registration) -> Result<(), Registration> {
        self.registration.set(registration)
    }

    /// Move to `Terminated`. Returns true only for the call that did it.
    pub(crate) fn terminate(&self) -> bool {
        !self.terminated.swap(true, Ordering::AcqRel)
    }

    pub async fn send(&self, frame: ServerFrame) -> Result<(), SinkError> {
        self.sink.send_frame(frame).await
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod testing {
    use std::sync::{Arc, Mutex};

    use super::*;

    /// Sink that records frames, optionally failing or hanging on every send.
    #[derive(Clone, Default)]
    pub(crate) struct RecordingSink {
        pub frames: Arc<Mutex<Vec<ServerFrame>>>,
        pub fail: bool,
        pub stall: bool,
    }

    impl RecordingSink {
        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        pub fn stalled() -> Self {
            Self {
                stall: true,
                ..Self::default()
            }
        }

        pub fn frames(&self) -> Vec<ServerFrame> {
            self.frames.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl FrameSink for RecordingSink {
        async fn send_frame(&self, frame: ServerFrame) -> Result<(), SinkError> {
            if self.fail {
                return Err(SinkError::Closed);
            }
            if self.stall {
                std::future::pending::<()>().await;
            }
            self.frames.lock().unwrap().push(frame);
            Ok(())
        }
    }

    pub(crate) fn connection() -> (Arc<Connection>, RecordingSink) {
        let sink = RecordingSink::default();
        (
            Arc::new(Connection::new(sink.clone(), PeerInfo::default())),
            sink,
        )
    }
}
