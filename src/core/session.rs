//! Trading session actor
//!
//! All session state lives in one task. Commands, stream hints, and timer
//! ticks arrive as `SessionEvent`s on a single mailbox and are handled one
//! at a time; REST calls are awaited inline, so no two handlers ever
//! interleave.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::ladder::{LadderController, LadderReaction};
use super::ledger::TradeLedger;
use super::notifier::Notifier;
use super::session_config::{SessionConfig, SessionConfigPatch};
use super::stream_session::{ReconnectPolicy, StreamEvent, StreamSession, StreamState};
use super::volatility::{GuardDecision, PriceSample, VolatilityGuard};
use crate::clients::{ExchangeApi, OrderHint, StreamConnector};
use crate::config::SessionTimings;
use crate::db::{RunStatus, SessionRun, SessionRunStore, TradeStore};
use crate::error::{TradingError, TradingResult};

const MAILBOX_CAPACITY: usize = 256;
const MAX_ERRORS: usize = 50;

/// Everything a session needs from the outside world
#[derive(Clone)]
pub struct SessionDeps {
    pub exchange: Arc<dyn ExchangeApi>,
    pub connector: Arc<dyn StreamConnector>,
    pub trades: Arc<dyn TradeStore>,
    pub runs: Arc<dyn SessionRunStore>,
    pub notifier: Arc<dyn Notifier>,
    pub timings: SessionTimings,
}

pub type Reply<T> = oneshot::Sender<Result<T, String>>;

#[derive(Debug)]
pub enum SessionCommand {
    Update {
        patch: SessionConfigPatch,
        reply: Reply<()>,
    },
    Stop {
        reply: Reply<()>,
    },
    Snapshot {
        reply: oneshot::Sender<SessionSnapshot>,
    },
}

#[derive(Debug)]
pub enum SessionEvent {
    Command(SessionCommand),
    Stream(StreamEvent),
    VolatilityTick { generation: u64 },
    KeepAliveTick,
}

impl From<StreamEvent> for SessionEvent {
    fn from(event: StreamEvent) -> Self {
        SessionEvent::Stream(event)
    }
}

/// Externally visible state of a running session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub run_id: String,
    pub pair: String,
    pub order_size: Decimal,
    pub step_up_pct: Decimal,
    pub step_down_pct: Decimal,
    /// ISO-8601, seconds precision, `Z` suffix
    pub start_time: String,
    pub trade_count: u32,
    pub reset_pct: Decimal,
    pub cancel_pct: Decimal,
    pub origin_price: Option<Decimal>,
    pub last_traded_price: Option<Decimal>,
    pub open_buys: usize,
    pub open_sells: usize,
    pub stream_state: StreamState,
    pub errors: Vec<String>,
}

/// How a session ended
enum Exit {
    Stopped,
    Halted(String),
    Failed(String),
}

pub struct SessionActor {
    run_id: String,
    deps: SessionDeps,
    config: SessionConfig,
    started_at: DateTime<Utc>,
    running: bool,
    ladder: Option<LadderController>,
    guard: VolatilityGuard,
    ledger: TradeLedger,
    stream: Option<StreamSession>,
    tx: mpsc::Sender<SessionEvent>,
    volatility_timer: Option<JoinHandle<()>>,
    keepalive_timer: Option<JoinHandle<()>>,
    errors: Vec<String>,
    run_recorded: bool,
}

/// Spawn a session actor. The returned reply resolves once the session is
/// running (stream connected, ladder placed) or has failed and torn down.
pub fn spawn_session(
    run_id: String,
    config: SessionConfig,
    deps: SessionDeps,
) -> (mpsc::Sender<SessionEvent>, JoinHandle<()>, oneshot::Receiver<Result<(), String>>) {
    let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
    let (start_tx, start_rx) = oneshot::channel();

    let actor = SessionActor {
        run_id,
        ledger: TradeLedger::new(Arc::clone(&deps.trades)),
        deps,
        config,
        started_at: Utc::now(),
        running: false,
        ladder: None,
        guard: VolatilityGuard::new(),
        stream: None,
        tx: tx.clone(),
        volatility_timer: None,
        keepalive_timer: None,
        errors: Vec::new(),
        run_recorded: false,
    };

    let join = tokio::spawn(actor.run(rx, start_tx));
    (tx, join, start_rx)
}

impl SessionActor {
    async fn run(mut self, mut rx: mpsc::Receiver<SessionEvent>, start_reply: Reply<()>) {
        match self.start().await {
            Ok(()) => {
                let _ = start_reply.send(Ok(()));
            }
            Err(e) => {
                let msg = self.joined_error(&e);
                self.fail(Exit::Failed(msg.clone())).await;
                let _ = start_reply.send(Err(msg));
                return;
            }
        }

        while let Some(event) = rx.recv().await {
            let exit = match event {
                SessionEvent::Command(cmd) => self.handle_command(cmd).await,
                SessionEvent::Stream(ev) => self.handle_stream_event(ev).await,
                SessionEvent::VolatilityTick { generation } => self.handle_volatility_tick(generation).await,
                SessionEvent::KeepAliveTick => {
                    self.handle_keepalive().await;
                    None
                }
            };

            if let Some(exit) = exit {
                if !matches!(exit, Exit::Stopped) {
                    self.fail(exit).await;
                }
                break;
            }
        }

        // Anyone still waiting gets a closed channel
        rx.close();
        while let Ok(event) = rx.try_recv() {
            if let SessionEvent::Command(cmd) = event {
                reject_command(cmd);
            }
        }
        debug!("Session actor {} finished", self.run_id);
    }

    async fn start(&mut self) -> TradingResult<()> {
        info!("🚀 Starting grid session {} on {}", self.run_id, self.config.pair);
        self.record_run_start();

        let policy = ReconnectPolicy {
            delay: self.deps.timings.reconnect_delay(),
            max_attempts: self.deps.timings.max_reconnect_attempts,
        };
        let (stream, connected) = StreamSession::spawn(Arc::clone(&self.deps.connector), policy, self.tx.clone());
        self.stream = Some(stream);

        let timeout = self.deps.timings.connect_timeout();
        match tokio::time::timeout(timeout, connected).await {
            Ok(Ok(())) => info!("✅ Order stream connected"),
            Ok(Err(_)) => {
                return Err(TradingError::StreamConnection(
                    "order stream gave up before connecting".to_string(),
                ))
            }
            Err(_) => return Err(TradingError::StartTimeout(timeout)),
        }

        let meta = self.deps.exchange.get_pair_metadata(&self.config.pair).await?;
        info!(
            "📐 {} precision: price {} dp, quantity {} dp",
            meta.pair, meta.price_precision, meta.quantity_precision
        );
        let mut ladder = LadderController::new(meta);
        let report = ladder
            .place_initial_ladder(self.deps.exchange.as_ref(), &self.config)
            .await;
        self.ladder = Some(ladder);
        let report = report?;
        self.errors = report.errors;

        self.running = true;
        self.started_at = Utc::now();
        self.restart_volatility_timer();
        self.start_keepalive_timer();
        Ok(())
    }

    async fn handle_command(&mut self, cmd: SessionCommand) -> Option<Exit> {
        match cmd {
            SessionCommand::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
                None
            }
            SessionCommand::Update { patch, reply } => match self.update(&patch).await {
                Ok(()) => {
                    let _ = reply.send(Ok(()));
                    None
                }
                Err(e) if e.is_fatal() => {
                    let msg = self.joined_error(&e);
                    let _ = reply.send(Err(msg.clone()));
                    Some(Exit::Failed(msg))
                }
                Err(e) => {
                    warn!(category = e.category(), "⚠️ Update rejected: {}", e);
                    let _ = reply.send(Err(e.to_string()));
                    None
                }
            },
            SessionCommand::Stop { reply } => {
                let result = self.stop().await;
                let _ = reply.send(result);
                Some(Exit::Stopped)
            }
        }
    }

    async fn update(&mut self, patch: &SessionConfigPatch) -> TradingResult<()> {
        let merged = self.config.merged(patch)?;
        // Precision checks need the pair metadata, so they run here
        self.ladder_mut()?.order_quantity(&merged)?;
        info!("🔧 Updating session {}: {:?}", self.run_id, patch);

        let exchange = Arc::clone(&self.deps.exchange);
        self.ladder_mut()?
            .cancel_all_open_orders(exchange.as_ref(), &merged.pair)
            .await?;

        self.config = merged;
        self.started_at = Utc::now();
        match serde_json::to_string(&self.config) {
            Ok(json) => {
                if self.run_recorded {
                    if let Err(e) = self.deps.runs.record_config(&self.run_id, &json) {
                        warn!("⚠️ Could not record updated config: {}", e);
                    }
                }
            }
            Err(e) => warn!("⚠️ Could not serialize config: {}", e),
        }

        self.guard.reset();
        self.restart_volatility_timer();

        // The old ladder is gone; anything short of a new one ends the session
        let config = self.config.clone();
        let report = self
            .ladder_mut()?
            .place_initial_ladder(exchange.as_ref(), &config)
            .await
            .map_err(|e| TradingError::SessionFailed(format!("re-ladder after update failed: {}", e)))?;
        self.errors = report.errors;
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), String> {
        info!("🛑 Stopping session {}", self.run_id);
        self.running = false;
        self.abort_timers();
        self.close_stream().await;

        let mut result = Ok(());
        if let Err(e) = self.cancel_all().await {
            self.record_error("cancel all failed", &e);
            result = Err(format!("cancel all failed: {}", e));
        }

        self.record_run_end(RunStatus::Stopped, result.as_ref().err().map(String::as_str));
        info!("🔴 Session {} stopped", self.run_id);
        result
    }

    async fn handle_stream_event(&mut self, event: StreamEvent) -> Option<Exit> {
        match event {
            StreamEvent::Hint(hint) => {
                self.handle_hint(hint).await;
                None
            }
            StreamEvent::Reconnected => {
                info!("🔄 Session {} resumed on a new stream connection", self.run_id);
                None
            }
            StreamEvent::Disconnected { reason } => {
                self.push_error(format!("stream disconnected: {}", reason));
                None
            }
            StreamEvent::ReconnectExhausted { attempts, last_error } => {
                let err = TradingError::ReconnectExhausted(attempts);
                Some(Exit::Halted(format!("{} (last error: {})", err, last_error)))
            }
        }
    }

    async fn handle_hint(&mut self, hint: OrderHint) {
        if !self.running || hint.pair != self.config.pair {
            return;
        }

        let exchange = Arc::clone(&self.deps.exchange);
        let order = match exchange.get_order(&hint.pair, &hint.order_id).await {
            Ok(order) => order,
            Err(e) => {
                self.record_error(&format!("order {} lookup failed", hint.order_id), &e);
                return;
            }
        };

        let run_id = self.run_recorded.then(|| self.run_id.clone());
        if let Err(e) = self.ledger.record_fill(&order, run_id.as_deref()) {
            self.record_error(&format!("ledger write for {} failed", order.id), &e);
        }

        let config = self.config.clone();
        let reaction = match self.ladder.as_mut() {
            Some(ladder) => ladder.handle_order_update(exchange.as_ref(), &config, &order).await,
            None => return,
        };

        match reaction {
            LadderReaction::Dropped(msg) => self.push_error(msg),
            LadderReaction::Replaced { errors, .. } => {
                for e in errors {
                    self.push_error(e);
                }
            }
            LadderReaction::Untracked | LadderReaction::StillOpen => {}
        }
    }

    async fn handle_volatility_tick(&mut self, generation: u64) -> Option<Exit> {
        if !self.running || generation != self.guard.generation() {
            debug!("Ignoring stale volatility tick (generation {})", generation);
            return None;
        }

        let price = match self.deps.exchange.get_price(&self.config.pair).await {
            Ok(p) => p,
            Err(e) => {
                self.record_error("volatility check skipped", &e);
                return None;
            }
        };

        let sample = PriceSample { at: Utc::now(), price };
        let decision = self
            .guard
            .evaluate(sample, self.config.reset_threshold, self.config.cancel_threshold);

        match decision {
            GuardDecision::Baseline => {
                debug!("Volatility baseline for {}: {}", self.config.pair, price);
                None
            }
            GuardDecision::Hold { change } => {
                debug!("Volatility {} below reset threshold", change);
                None
            }
            GuardDecision::SelfHeal { change } => {
                warn!(
                    "⚠️ Price moved {}% on {}; re-centring the ladder",
                    pct(change),
                    self.config.pair
                );
                self.self_heal().await
            }
            GuardDecision::HardStop { change } => Some(Exit::Halted(format!(
                "price moved {}% on {} (cancel threshold {}%)",
                pct(change),
                self.config.pair,
                pct(self.config.cancel_threshold)
            ))),
        }
    }

    async fn self_heal(&mut self) -> Option<Exit> {
        if let Err(e) = self.cancel_all().await {
            self.record_error("self-heal cancel failed, ladder kept", &e);
            return None;
        }

        let exchange = Arc::clone(&self.deps.exchange);
        let config = self.config.clone();
        let ladder = self.ladder.as_mut()?;
        match ladder.place_initial_ladder(exchange.as_ref(), &config).await {
            Ok(report) => {
                for e in report.errors {
                    self.push_error(e);
                }
                None
            }
            Err(e) => Some(Exit::Halted(format!("self-heal re-ladder failed: {}", e))),
        }
    }

    async fn handle_keepalive(&mut self) {
        if !self.running {
            return;
        }
        match self.deps.exchange.refresh_subscription().await {
            Ok(()) => debug!("Stream subscription refreshed"),
            Err(e) => self.record_error("keep-alive failed", &e),
        }
    }

    /// Fatal teardown: stop timers, close the stream, cancel everything,
    /// notify, persist the outcome.
    async fn fail(&mut self, exit: Exit) {
        let (status, reason) = match exit {
            Exit::Stopped => return,
            Exit::Halted(reason) => (RunStatus::Halted, reason),
            Exit::Failed(reason) => (RunStatus::Failed, reason),
        };

        error!("❌ Session {} terminating: {}", self.run_id, reason);
        self.running = false;
        self.abort_timers();
        self.close_stream().await;

        if let Err(e) = self.cancel_all().await {
            error!(category = e.category(), "❌ Cancel all during teardown failed: {}", e);
        }

        self.deps
            .notifier
            .notify(&format!("Grid session on {} stopped: {}", self.config.pair, reason))
            .await;
        self.record_run_end(status, Some(&reason));
    }

    async fn cancel_all(&mut self) -> TradingResult<()> {
        let exchange = Arc::clone(&self.deps.exchange);
        match self.ladder.as_mut() {
            Some(ladder) => {
                ladder
                    .cancel_all_open_orders(exchange.as_ref(), &self.config.pair)
                    .await?;
            }
            None => {
                exchange.cancel_all(&self.config.pair).await?;
            }
        }
        Ok(())
    }

    async fn close_stream(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.close(self.deps.timings.stop_timeout()).await;
        }
    }

    fn restart_volatility_timer(&mut self) {
        if let Some(timer) = self.volatility_timer.take() {
            timer.abort();
        }
        let generation = self.guard.generation();
        let period = self.deps.timings.volatility_interval();
        let tx = self.tx.clone();
        self.volatility_timer = Some(spawn_ticker(period, tx, move || SessionEvent::VolatilityTick { generation }));
    }

    fn start_keepalive_timer(&mut self) {
        let period = self
            .deps
            .timings
            .keepalive_override()
            .or_else(|| self.deps.exchange.keepalive_period());
        if let Some(period) = period {
            info!("⏱️ Stream keep-alive every {:?}", period);
            self.keepalive_timer = Some(spawn_ticker(period, self.tx.clone(), || SessionEvent::KeepAliveTick));
        }
    }

    fn abort_timers(&mut self) {
        for timer in [self.volatility_timer.take(), self.keepalive_timer.take()].into_iter().flatten() {
            timer.abort();
        }
        // Ticks already queued carry the old generation
        self.guard.reset();
    }

    fn ladder_mut(&mut self) -> TradingResult<&mut LadderController> {
        self.ladder
            .as_mut()
            .ok_or_else(|| TradingError::Internal("ladder not initialised".to_string()))
    }

    fn push_error(&mut self, msg: String) {
        warn!("⚠️ {}", msg);
        self.keep_error(msg);
    }

    fn record_error(&mut self, context: &str, err: &TradingError) {
        warn!(
            category = err.category(),
            retryable = err.is_retryable(),
            "⚠️ {}: {}",
            context,
            err
        );
        self.keep_error(format!("{}: {}", context, err));
    }

    fn keep_error(&mut self, msg: String) {
        self.errors.push(msg);
        if self.errors.len() > MAX_ERRORS {
            let excess = self.errors.len() - MAX_ERRORS;
            self.errors.drain(..excess);
        }
    }

    /// Fatal error text with the non-fatal errors gathered along the way
    fn joined_error(&self, fatal: &TradingError) -> String {
        let mut parts = vec![fatal.to_string()];
        parts.extend(self.errors.iter().cloned());
        parts.join("; ")
    }

    fn snapshot(&self) -> SessionSnapshot {
        let ladder = self.ladder.as_ref();
        SessionSnapshot {
            run_id: self.run_id.clone(),
            pair: self.config.pair.clone(),
            order_size: self.config.order_size,
            step_up_pct: pct(self.config.step_up),
            step_down_pct: pct(self.config.step_down),
            start_time: self.started_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            trade_count: self.config.trade_count,
            reset_pct: pct(self.config.reset_threshold),
            cancel_pct: pct(self.config.cancel_threshold),
            origin_price: ladder.and_then(|l| l.origin_price()),
            last_traded_price: ladder.and_then(|l| l.last_traded_price()),
            open_buys: ladder.map(|l| l.buy_ids().len()).unwrap_or(0),
            open_sells: ladder.map(|l| l.sell_ids().len()).unwrap_or(0),
            stream_state: self
                .stream
                .as_ref()
                .map(|s| s.state())
                .unwrap_or(StreamState::Closed),
            errors: self.errors.clone(),
        }
    }

    fn record_run_start(&mut self) {
        let config = match serde_json::to_string(&self.config) {
            Ok(json) => json,
            Err(e) => {
                warn!("⚠️ Could not serialize config: {}", e);
                return;
            }
        };
        let run = SessionRun::new(&self.run_id, &self.config.pair, config, self.started_at);
        match self.deps.runs.record_start(&run) {
            Ok(()) => self.run_recorded = true,
            Err(e) => warn!("⚠️ Could not record session run: {}", e),
        }
    }

    fn record_run_end(&self, status: RunStatus, error: Option<&str>) {
        if !self.run_recorded {
            return;
        }
        if let Err(e) = self.deps.runs.record_end(&self.run_id, status, Utc::now(), error) {
            warn!("⚠️ Could not record session end: {}", e);
        }
    }
}

fn reject_command(cmd: SessionCommand) {
    let msg = TradingError::SessionNotRunning.to_string();
    match cmd {
        SessionCommand::Update { reply, .. } | SessionCommand::Stop { reply } => {
            let _ = reply.send(Err(msg));
        }
        // Dropping the reply tells the caller there is nothing to report
        SessionCommand::Snapshot { .. } => {}
    }
}

/// Fraction to percent, e.g. 0.015 -> 1.5
fn pct(fraction: Decimal) -> Decimal {
    (fraction * Decimal::ONE_HUNDRED).normalize()
}

/// Send `make()` into the mailbox every `period`, first tick one period from now
fn spawn_ticker<F>(period: Duration, tx: mpsc::Sender<SessionEvent>, make: F) -> JoinHandle<()>
where
    F: Fn() -> SessionEvent + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            if tx.send(make()).await.is_err() {
                break;
            }
        }
    })
}
