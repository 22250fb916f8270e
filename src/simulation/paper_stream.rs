// In-memory order stream for the paper exchange
//
// Connect outcomes can be scripted so reconnect behaviour is reproducible.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use crate::clients::{OrderHint, StreamConnection, StreamConnector};
use crate::error::{TradingError, TradingResult};

#[derive(Debug)]
enum HubMessage {
    Hint(OrderHint),
    Drop(String),
}

/// Fan-in point shared by the paper exchange and its connector
#[derive(Debug, Default)]
pub struct StreamHub {
    current: Mutex<Option<mpsc::UnboundedSender<HubMessage>>>,
    /// `false` entries make the matching connect attempt fail
    script: Mutex<VecDeque<bool>>,
    connects: AtomicUsize,
    failed_connects: AtomicUsize,
    closes: AtomicUsize,
}

impl StreamHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue connect outcomes; once the script runs out every connect succeeds
    pub fn script_connects(&self, outcomes: impl IntoIterator<Item = bool>) {
        if let Ok(mut script) = self.script.lock() {
            script.extend(outcomes);
        }
    }

    /// Deliver a hint to the live connection. Returns false when nobody is connected.
    pub fn publish(&self, hint: OrderHint) -> bool {
        self.send(HubMessage::Hint(hint))
    }

    /// Break the live connection as a transport failure would
    pub fn drop_connection(&self, reason: &str) -> bool {
        let sent = self.send(HubMessage::Drop(reason.to_string()));
        if let Ok(mut current) = self.current.lock() {
            *current = None;
        }
        sent
    }

    pub fn is_connected(&self) -> bool {
        self.current
            .lock()
            .map(|c| c.as_ref().map(|tx| !tx.is_closed()).unwrap_or(false))
            .unwrap_or(false)
    }

    /// Successful connects so far
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn failed_connect_count(&self) -> usize {
        self.failed_connects.load(Ordering::SeqCst)
    }

    /// Connections closed by their owner
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    fn send(&self, msg: HubMessage) -> bool {
        match self.current.lock() {
            Ok(current) => current.as_ref().map(|tx| tx.send(msg).is_ok()).unwrap_or(false),
            Err(_) => false,
        }
    }

    fn next_outcome(&self) -> bool {
        self.script
            .lock()
            .ok()
            .and_then(|mut script| script.pop_front())
            .unwrap_or(true)
    }
}

#[derive(Debug, Clone)]
pub struct PaperStreamConnector {
    hub: Arc<StreamHub>,
}

impl PaperStreamConnector {
    pub fn new(hub: Arc<StreamHub>) -> Self {
        Self { hub }
    }

    pub fn hub(&self) -> Arc<StreamHub> {
        Arc::clone(&self.hub)
    }
}

#[async_trait]
impl StreamConnector for PaperStreamConnector {
    async fn connect(&self) -> TradingResult<Box<dyn StreamConnection>> {
        if !self.hub.next_outcome() {
            self.hub.failed_connects.fetch_add(1, Ordering::SeqCst);
            return Err(TradingError::StreamConnection("scripted connect failure".to_string()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let mut current = self
            .hub
            .current
            .lock()
            .map_err(|_| TradingError::Internal("stream hub poisoned".to_string()))?;
        *current = Some(tx);
        drop(current);

        self.hub.connects.fetch_add(1, Ordering::SeqCst);
        debug!("Paper stream connected");
        Ok(Box::new(PaperStream {
            rx,
            hub: Arc::clone(&self.hub),
        }))
    }
}

struct PaperStream {
    rx: mpsc::UnboundedReceiver<HubMessage>,
    hub: Arc<StreamHub>,
}

#[async_trait]
impl StreamConnection for PaperStream {
    async fn next_hint(&mut self) -> Option<TradingResult<OrderHint>> {
        match self.rx.recv().await? {
            HubMessage::Hint(hint) => Some(Ok(hint)),
            HubMessage::Drop(reason) => Some(Err(TradingError::StreamConnection(reason))),
        }
    }

    async fn close(&mut self) {
        self.rx.close();
        self.hub.closes.fetch_add(1, Ordering::SeqCst);
    }
}
