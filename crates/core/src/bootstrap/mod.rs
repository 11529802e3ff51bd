use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::lights::HueClient;
use crate::{DiscoLightsError, Result};

/// Authenticated relationship with the bridge.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub bridge_address: String,
    /// Application key handed out by the bridge when pairing.
    pub username: String,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("bridge_address", &self.bridge_address)
            .field("username", &"***REDACTED***")
            .finish()
    }
}

/// One-time setup exchange with the bridge.
pub trait ConnectionBootstrap {
    /// Returns a previously persisted session or
    /// [`DiscoLightsError::Uninitialized`].
    fn load_existing(&self) -> Result<Session>;

    /// Pairs with the bridge. Fails with
    /// [`DiscoLightsError::ButtonNotPressed`] if the operator did not confirm
    /// on the device.
    fn create_new_user(&self, bridge_address: &str) -> Result<Session>;
}

/// Reuses a stored session when there is one and pairs otherwise.
pub fn establish_session<B>(
    bootstrap: &B,
    bridge_address: &str,
    pairing_wait: Duration,
    interrupt: &Receiver<()>,
) -> Result<Session>
where
    B: ConnectionBootstrap + ?Sized,
{
    match bootstrap.load_existing() {
        Ok(session) => return Ok(session),
        Err(DiscoLightsError::Uninitialized) => {
            info!("not initialized, attempting to create a new connection");
        }
        Err(err) => return Err(err),
    }

    pair_new_user(bootstrap, bridge_address, pairing_wait, interrupt)
}

/// Gives the operator `pairing_wait` to press the link button, then pairs.
/// An interrupt during the wait aborts with
/// [`DiscoLightsError::PairingInterrupted`].
pub fn pair_new_user<B>(
    bootstrap: &B,
    bridge_address: &str,
    pairing_wait: Duration,
    interrupt: &Receiver<()>,
) -> Result<Session>
where
    B: ConnectionBootstrap + ?Sized,
{
    info!(bridge = bridge_address, "please press the button on the bridge...");

    let started = Instant::now();
    match interrupt.recv_timeout(pairing_wait) {
        Ok(()) => return Err(DiscoLightsError::PairingInterrupted),
        Err(RecvTimeoutError::Timeout) => {}
        // nobody can interrupt us; still honour the wait
        Err(RecvTimeoutError::Disconnected) => {
            std::thread::sleep(pairing_wait.saturating_sub(started.elapsed()));
        }
    }

    bootstrap.create_new_user(bridge_address)
}

/// JSON file holding the persisted [`Session`].
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the stored session. A missing or unreadable file means pairing
    /// has to happen again.
    pub fn load(&self) -> Result<Session> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(DiscoLightsError::Uninitialized)
            }
            Err(err) => return Err(err.into()),
        };

        serde_json::from_str(&raw).map_err(|err| {
            warn!(path = %self.path.display(), %err, "ignoring corrupt session file");
            DiscoLightsError::Uninitialized
        })
    }

    pub fn save(&self, session: &Session) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_vec_pretty(session)?)?;
        Ok(())
    }
}

/// Bootstrap that pairs through the bridge's REST API and keeps the result in
/// a [`FileSessionStore`].
#[derive(Debug, Clone)]
pub struct HueBootstrap {
    client: HueClient,
    store: FileSessionStore,
    device_type: String,
}

impl HueBootstrap {
    pub fn new(client: HueClient, store: FileSessionStore, device_type: impl Into<String>) -> Self {
        Self {
            client,
            store,
            device_type: device_type.into(),
        }
    }
}

impl ConnectionBootstrap for HueBootstrap {
    fn load_existing(&self) -> Result<Session> {
        self.store.load()
    }

    fn create_new_user(&self, bridge_address: &str) -> Result<Session> {
        let username = self.client.register(bridge_address, &self.device_type)?;
        let session = Session {
            bridge_address: bridge_address.to_string(),
            username,
        };
        self.store.save(&session)?;
        info!(path = %self.store.path().display(), "stored new bridge session");
        Ok(session)
    }
}
