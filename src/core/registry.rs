//! Single-slot session registry
//!
//! At most one trading session per account. Callers hold an opaque
//! `SessionHandle`; every operation checks it against the occupant.

use std::fmt;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use super::session::{spawn_session, SessionCommand, SessionDeps, SessionEvent, SessionSnapshot};
use super::session_config::{SessionConfig, SessionConfigPatch};
use crate::error::TradingError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SessionHandle(Uuid);

impl SessionHandle {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SessionReport {
    Running(SessionSnapshot),
    NotRunning,
}

impl SessionReport {
    pub fn is_running(&self) -> bool {
        matches!(self, SessionReport::Running(_))
    }

    pub fn snapshot(&self) -> Option<&SessionSnapshot> {
        match self {
            SessionReport::Running(s) => Some(s),
            SessionReport::NotRunning => None,
        }
    }
}

struct ActiveSession {
    handle: SessionHandle,
    tx: mpsc::Sender<SessionEvent>,
    join: JoinHandle<()>,
}

impl ActiveSession {
    fn is_alive(&self) -> bool {
        !self.join.is_finished() && !self.tx.is_closed()
    }
}

pub struct SessionRegistry {
    deps: SessionDeps,
    slot: Mutex<Option<ActiveSession>>,
}

impl SessionRegistry {
    pub fn new(deps: SessionDeps) -> Self {
        Self {
            deps,
            slot: Mutex::new(None),
        }
    }

    /// Validate, claim the slot, and wait until the session is running.
    pub async fn start(&self, config: SessionConfig) -> Result<SessionHandle, String> {
        config.validate().map_err(|e| e.to_string())?;

        let handle = SessionHandle::new();
        let start_rx = {
            let mut slot = self.slot.lock().await;
            if slot.as_ref().map(ActiveSession::is_alive).unwrap_or(false) {
                return Err(TradingError::SessionActive.to_string());
            }

            let (tx, join, start_rx) = spawn_session(handle.to_string(), config, self.deps.clone());
            *slot = Some(ActiveSession {
                handle: handle.clone(),
                tx,
                join,
            });
            start_rx
        };

        let outcome = match start_rx.await {
            Ok(result) => result,
            Err(_) => Err(TradingError::Internal("session task ended during start".to_string()).to_string()),
        };

        match outcome {
            Ok(()) => {
                info!("✅ Session {} running", handle);
                Ok(handle)
            }
            Err(msg) => {
                self.clear_if(&handle).await;
                Err(msg)
            }
        }
    }

    pub async fn update(&self, handle: &SessionHandle, patch: SessionConfigPatch) -> Result<(), String> {
        let tx = self.sender_for(handle).await?;
        let (reply, rx) = oneshot::channel();
        send(&tx, SessionCommand::Update { patch, reply }).await?;
        match rx.await {
            Ok(result) => result,
            Err(_) => Err(TradingError::SessionNotRunning.to_string()),
        }
    }

    /// Stop and free the slot. On timeout the actor is aborted and the slot
    /// cleared anyway.
    pub async fn stop(&self, handle: &SessionHandle) -> Result<(), String> {
        let timeout = self.deps.timings.stop_timeout();
        let tx = self.sender_for(handle).await?;
        let (reply, rx) = oneshot::channel();
        let sent = send(&tx, SessionCommand::Stop { reply }).await;

        let mut timed_out = false;
        let result = match sent {
            Err(e) => Err(e),
            Ok(()) => match tokio::time::timeout(timeout, rx).await {
                Ok(Ok(result)) => result,
                Ok(Err(_)) => Err(TradingError::SessionNotRunning.to_string()),
                Err(_) => {
                    timed_out = true;
                    Err(format!("stop timed out after {:?}", timeout))
                }
            },
        };

        if let Some(mut active) = self.take_if(handle).await {
            if timed_out {
                warn!("⚠️ Session {} did not stop in time; aborting", handle);
                active.join.abort();
            } else if tokio::time::timeout(timeout, &mut active.join).await.is_err() {
                warn!("⚠️ Session {} did not finish in time; aborting", handle);
                active.join.abort();
            }
        }
        result
    }

    pub async fn get_state(&self, handle: &SessionHandle) -> SessionReport {
        let Ok(tx) = self.sender_for(handle).await else {
            return SessionReport::NotRunning;
        };

        let (reply, rx) = oneshot::channel();
        if tx.send(SessionEvent::Command(SessionCommand::Snapshot { reply })).await.is_err() {
            return SessionReport::NotRunning;
        }
        match tokio::time::timeout(self.deps.timings.stop_timeout(), rx).await {
            Ok(Ok(snapshot)) => SessionReport::Running(snapshot),
            _ => SessionReport::NotRunning,
        }
    }

    /// Handle of the live session, if any
    pub async fn current(&self) -> Option<SessionHandle> {
        let slot = self.slot.lock().await;
        slot.as_ref()
            .filter(|active| active.is_alive())
            .map(|active| active.handle.clone())
    }

    async fn sender_for(&self, handle: &SessionHandle) -> Result<mpsc::Sender<SessionEvent>, String> {
        let mut slot = self.slot.lock().await;
        let alive = match slot.as_ref() {
            None => return Err(TradingError::SessionNotRunning.to_string()),
            Some(active) if active.handle != *handle => {
                return Err(TradingError::UnknownSession(handle.to_string()).to_string())
            }
            Some(active) => active.is_alive(),
        };

        if !alive {
            *slot = None;
            return Err(TradingError::SessionNotRunning.to_string());
        }
        slot.as_ref()
            .map(|active| active.tx.clone())
            .ok_or_else(|| TradingError::SessionNotRunning.to_string())
    }

    async fn take_if(&self, handle: &SessionHandle) -> Option<ActiveSession> {
        let mut slot = self.slot.lock().await;
        if slot.as_ref().map(|a| a.handle == *handle).unwrap_or(false) {
            slot.take()
        } else {
            None
        }
    }

    async fn clear_if(&self, handle: &SessionHandle) {
        if let Some(active) = self.take_if(handle).await {
            let _ = active.join.await;
        }
    }
}

async fn send(tx: &mpsc::Sender<SessionEvent>, cmd: SessionCommand) -> Result<(), String> {
    tx.send(SessionEvent::Command(cmd))
        .await
        .map_err(|_| TradingError::SessionNotRunning.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_accessors() {
        assert!(!SessionReport::NotRunning.is_running());
        assert!(SessionReport::NotRunning.snapshot().is_none());
    }
}
