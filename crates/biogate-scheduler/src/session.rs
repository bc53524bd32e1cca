//! Driver liveness and lazily created sessions.
//!
//! [`DriverLink`] is the provider's view of the driver connection: none,
//! connecting, or live with a generation number that increments on every
//! successful connect. [`SessionHandle`] caches one session per sensor and
//! recreates it when the generation or user changes, so operations never need
//! a session to exist when they are built.

use biogate_core::{SensorId, UserId};
use biogate_hal::{EventSink, HalConnection, HalError, HalSession, SessionCallback};
use std::sync::Arc;
use tracing::{debug, info};

/// Whether a connect was the first or followed an earlier connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectKind {
    First,
    Reconnect,
}

enum LinkState {
    Disconnected,
    Connecting,
    Live {
        generation: u64,
        connection: Arc<dyn HalConnection>,
    },
}

/// The provider's connection to the driver.
pub struct DriverLink {
    state: LinkState,
    generation: u64,
    ever_connected: bool,
    connect_wanted: bool,
    death_count: u32,
}

impl DriverLink {
    pub fn new() -> Self {
        Self {
            state: LinkState::Disconnected,
            generation: 0,
            ever_connected: false,
            connect_wanted: false,
            death_count: 0,
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self.state, LinkState::Live { .. })
    }

    pub fn is_connecting(&self) -> bool {
        matches!(self.state, LinkState::Connecting)
    }

    /// Generation of the live connection.
    pub fn generation(&self) -> Option<u64> {
        match self.state {
            LinkState::Live { generation, .. } => Some(generation),
            _ => None,
        }
    }

    /// Generation the next successful connect will get.
    pub fn next_generation(&self) -> u64 {
        self.generation + 1
    }

    /// Number of death notifications accepted so far.
    pub fn death_count(&self) -> u32 {
        self.death_count
    }

    /// Ask for a connection attempt. Returns `false` if one is already live
    /// or in progress.
    pub fn request_connect(&mut self) -> bool {
        if !matches!(self.state, LinkState::Disconnected) {
            return false;
        }
        self.state = LinkState::Connecting;
        self.connect_wanted = true;
        true
    }

    /// Consume a pending connect request.
    pub fn take_connect_request(&mut self) -> bool {
        std::mem::take(&mut self.connect_wanted)
    }

    /// Record a successful connect under `generation`.
    pub fn connected(&mut self, generation: u64, connection: Arc<dyn HalConnection>) -> ConnectKind {
        self.generation = generation;
        self.state = LinkState::Live {
            generation,
            connection,
        };
        if std::mem::replace(&mut self.ever_connected, true) {
            ConnectKind::Reconnect
        } else {
            ConnectKind::First
        }
    }

    pub fn connect_failed(&mut self) {
        self.state = LinkState::Disconnected;
    }

    /// Handle a death notice. Returns `false` for notices about a connection
    /// that is no longer current.
    pub fn died(&mut self, generation: u64) -> bool {
        match self.state {
            LinkState::Live { generation: live, .. } if live == generation => {
                self.state = LinkState::Disconnected;
                self.death_count += 1;
                true
            }
            _ => false,
        }
    }
}

impl Default for DriverLink {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DriverLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverLink")
            .field("generation", &self.generation())
            .field("connecting", &self.is_connecting())
            .field("death_count", &self.death_count)
            .finish()
    }
}

/// Result of resolving a session.
pub enum Resolution {
    Ready(Arc<dyn HalSession>),
    /// A connection is being established; try again when it finishes.
    Pending,
    Unavailable(HalError),
}

struct CachedSession {
    generation: u64,
    user_id: UserId,
    session: Arc<dyn HalSession>,
}

/// Lazily created session for one sensor.
pub struct SessionHandle {
    sensor_id: SensorId,
    sink: EventSink,
    cached: Option<CachedSession>,
}

impl SessionHandle {
    /// Create an empty handle. Replies from sessions it opens go to `sink`.
    pub fn new(sensor_id: SensorId, sink: EventSink) -> Self {
        Self {
            sensor_id,
            sink,
            cached: None,
        }
    }

    pub fn is_materialized(&self) -> bool {
        self.cached.is_some()
    }

    /// Get a session for `user_id`, opening one if needed.
    ///
    /// Requests a connection on `link` when there is none.
    pub fn resolve(&mut self, user_id: UserId, link: &mut DriverLink) -> Resolution {
        let (generation, connection) = match &link.state {
            LinkState::Live {
                generation,
                connection,
            } => (*generation, Arc::clone(connection)),
            LinkState::Connecting => return Resolution::Pending,
            LinkState::Disconnected => {
                link.request_connect();
                return Resolution::Pending;
            }
        };

        if let Some(cached) = &self.cached {
            if cached.generation == generation && cached.user_id == user_id {
                return Resolution::Ready(Arc::clone(&cached.session));
            }
            if cached.generation == generation {
                debug!(
                    sensor_id = %self.sensor_id,
                    from_user = %cached.user_id,
                    to_user = %user_id,
                    "Switching session user"
                );
                cached.session.close();
            }
        }
        self.cached = None;

        let callback = SessionCallback::new(self.sensor_id, user_id, Arc::clone(&self.sink));
        match connection.create_session(self.sensor_id, user_id, callback) {
            Ok(session) => {
                info!(
                    sensor_id = %self.sensor_id,
                    user_id = %user_id,
                    generation,
                    "Session created"
                );
                self.cached = Some(CachedSession {
                    generation,
                    user_id,
                    session: Arc::clone(&session),
                });
                Resolution::Ready(session)
            }
            Err(error) => Resolution::Unavailable(error),
        }
    }

    /// The cached session, if it belongs to `user_id` and the live connection.
    pub fn current(&self, user_id: UserId, link: &DriverLink) -> Option<Arc<dyn HalSession>> {
        let generation = link.generation()?;
        self.cached
            .as_ref()
            .filter(|c| c.generation == generation && c.user_id == user_id)
            .map(|c| Arc::clone(&c.session))
    }

    /// Drop the cached session after the driver died.
    pub fn invalidate(&mut self) {
        if self.cached.take().is_some() {
            debug!(sensor_id = %self.sensor_id, "Session invalidated");
        }
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("sensor_id", &self.sensor_id)
            .field("materialized", &self.is_materialized())
            .finish_non_exhaustive()
    }
}
