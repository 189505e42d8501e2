//! Connection lifecycle supervision
//!
//! One supervisor task owns the session: listen key, market and user
//! subscriptions, the router and keepalive tasks. Stream death triggers
//! teardown and a linearly backed-off reconnect; authorization failures
//! stop the loop instead of retrying bad credentials forever.

use crate::reconciler::AccountReconciler;
use crate::streams::StreamRouter;
use crate::transport::VenueTransport;
use connector_common::{
    Candle, ConnectionStatus, ConnectorConfig, ConnectorError, ConnectorResult, StateChannel,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// The instrument the market subscription follows
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instrument {
    pub symbol: String,
    pub interval: String,
}

impl Instrument {
    pub fn new(symbol: impl Into<String>, interval: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            interval: interval.into(),
        }
    }

    /// Venue stream name for this instrument's kline feed.
    fn kline_stream(&self) -> String {
        format!("{}@kline_{}", self.symbol.to_lowercase(), self.interval)
    }
}

struct ActiveSession {
    listen_key: String,
    router: JoinHandle<()>,
    keepalive: JoinHandle<()>,
}

/// Owns the venue session and keeps it alive across stream failures
pub struct ConnectionSupervisor {
    transport: Arc<dyn VenueTransport>,
    config: ConnectorConfig,
    status: Arc<StateChannel<ConnectionStatus>>,
    candle: Arc<StateChannel<Candle>>,
    reconciler: Arc<AccountReconciler>,
    instrument: parking_lot::Mutex<Instrument>,
    session: tokio::sync::Mutex<Option<ActiveSession>>,
    /// Gate making `connect` idempotent while a supervisor task runs
    running: AtomicBool,
    /// Set by `connect` when a prior supervisor is still winding down; the
    /// exiting task adopts the request instead of letting it drop
    restart_requested: AtomicBool,
    shutdown: watch::Sender<bool>,
    /// Router tasks report their generation here when their streams die
    ended_tx: mpsc::UnboundedSender<u64>,
    ended_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<u64>>,
    /// Generation of the currently live router; stale death reports from
    /// replaced routers are ignored
    live_generation: AtomicU64,
    generation_counter: AtomicU64,
}

impl ConnectionSupervisor {
    pub fn new(
        transport: Arc<dyn VenueTransport>,
        config: ConnectorConfig,
        status: Arc<StateChannel<ConnectionStatus>>,
        candle: Arc<StateChannel<Candle>>,
        reconciler: Arc<AccountReconciler>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        let (ended_tx, ended_rx) = mpsc::unbounded_channel();
        Self {
            transport,
            config,
            status,
            candle,
            reconciler,
            instrument: parking_lot::Mutex::new(Instrument::new("", "")),
            session: tokio::sync::Mutex::new(None),
            running: AtomicBool::new(false),
            restart_requested: AtomicBool::new(false),
            shutdown,
            ended_tx,
            ended_rx: tokio::sync::Mutex::new(ended_rx),
            live_generation: AtomicU64::new(0),
            generation_counter: AtomicU64::new(0),
        }
    }

    /// Start supervising a session for the given instrument.
    ///
    /// A second call while a supervisor is running is a no-op; callers that
    /// want a different instrument use [`Self::switch_instrument`].
    pub fn connect(self: &Arc<Self>, symbol: &str, interval: &str) {
        let was_stopping = *self.shutdown.borrow();
        if was_stopping {
            // The previous supervisor may still be winding down. Stage a
            // restart request before touching the running gate so the
            // exiting task either adopts it or we observe its exit here.
            *self.instrument.lock() = Instrument::new(symbol, interval);
            self.shutdown.send_replace(false);
            self.restart_requested.store(true, Ordering::SeqCst);
            if self.running.swap(true, Ordering::AcqRel) {
                return;
            }
            self.restart_requested.store(false, Ordering::SeqCst);
        } else {
            if self.running.swap(true, Ordering::AcqRel) {
                info!(symbol, "already connected, ignoring connect");
                return;
            }
            *self.instrument.lock() = Instrument::new(symbol, interval);
            // send_replace works with zero receivers; the run task has not
            // subscribed yet at this point.
            self.shutdown.send_replace(false);
        }
        self.status.publish(ConnectionStatus::Connecting);

        let supervisor = Arc::clone(self);
        tokio::spawn(async move {
            supervisor.run().await;
        });
    }

    /// Tear the session down and stop the supervisor.
    pub fn disconnect(&self) {
        self.shutdown.send_replace(true);
    }

    /// Currently supervised instrument.
    pub fn instrument(&self) -> Instrument {
        self.instrument.lock().clone()
    }

    async fn run(self: Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();

        'supervise: loop {
            let mut attempt: u32 = 0;
            loop {
                if *shutdown.borrow() {
                    break;
                }
                attempt += 1;
                match self.establish_session().await {
                    Ok(()) => {
                        attempt = 0;
                        self.status.publish(ConnectionStatus::Connected);
                        let session_died = self.wait_for_session_end(&mut shutdown).await;
                        self.teardown().await;
                        if !session_died {
                            break;
                        }
                        warn!("session ended, reconnecting");
                        self.status.publish(ConnectionStatus::Connecting);
                    }
                    Err(err) if err.is_fatal_to_session() => {
                        error!(error = %err, "authorization failed, not retrying");
                        break;
                    }
                    Err(err) => {
                        let delay = self.config.backoff_delay(attempt);
                        warn!(error = %err, attempt, delay_ms = delay.as_millis() as u64, "session setup failed, backing off");
                        tokio::select! {
                            () = tokio::time::sleep(delay) => {}
                            _ = shutdown.changed() => {}
                        }
                    }
                }
            }

            self.teardown().await;
            self.status.publish(ConnectionStatus::Disconnected);
            self.running.store(false, Ordering::Release);

            // A connect that raced the wind-down staged a restart request;
            // adopt it unless a later disconnect superseded it or a fresh
            // supervisor already took the running gate.
            if self.restart_requested.swap(false, Ordering::SeqCst)
                && !*self.shutdown.borrow()
                && !self.running.swap(true, Ordering::AcqRel)
            {
                info!("restart requested during wind-down, reconnecting");
                self.status.publish(ConnectionStatus::Connecting);
                continue 'supervise;
            }
            break;
        }
    }

    /// Block until the live router dies (true) or shutdown is requested
    /// (false). Death reports from replaced routers are ignored.
    async fn wait_for_session_end(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        let mut ended_rx = self.ended_rx.lock().await;
        loop {
            tokio::select! {
                generation = ended_rx.recv() => match generation {
                    Some(generation)
                        if generation == self.live_generation.load(Ordering::Acquire) =>
                    {
                        return true;
                    }
                    Some(stale) => {
                        info!(generation = stale, "ignoring stale session death");
                    }
                    None => return true,
                },
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return false;
                    }
                }
            }
        }
    }

    /// Open listen key, market and user subscriptions, start router and
    /// keepalive tasks and run the initial reconciliation.
    async fn establish_session(self: &Arc<Self>) -> ConnectorResult<()> {
        let instrument = self.instrument.lock().clone();
        info!(symbol = %instrument.symbol, interval = %instrument.interval, "establishing session");

        let listen_key = match self.transport.open_user_session().await {
            Ok(key) => key,
            Err(err @ ConnectorError::Authorization { .. }) => return Err(err),
            Err(err) => {
                return Err(ConnectorError::SetupFailure {
                    stage: "user session",
                    reason: err.to_string(),
                });
            }
        };

        let market = self
            .transport
            .open_market_stream(&[instrument.kline_stream()])
            .await
            .map_err(|err| ConnectorError::SetupFailure {
                stage: "market stream",
                reason: err.to_string(),
            })?;
        let user = self
            .transport
            .open_user_stream(&listen_key)
            .await
            .map_err(|err| ConnectorError::SetupFailure {
                stage: "user stream",
                reason: err.to_string(),
            })?;

        let generation = self.next_generation();
        let router = StreamRouter::new(Arc::clone(&self.candle), Arc::clone(&self.reconciler));
        let ended_tx = self.ended_tx.clone();
        let router_task = tokio::spawn(async move {
            router.run_split(market, user).await;
            let _ = ended_tx.send(generation);
        });
        let keepalive_task = self.spawn_keepalive(listen_key.clone());

        if let Err(err) = self.reconciler.refresh().await {
            router_task.abort();
            keepalive_task.abort();
            return Err(err);
        }

        *self.session.lock().await = Some(ActiveSession {
            listen_key,
            router: router_task,
            keepalive: keepalive_task,
        });
        Ok(())
    }

    /// Replace the market subscription with a new instrument without
    /// restarting the user-data session.
    ///
    /// When no session is live this just records the instrument and starts
    /// one. On resubscription failure the whole session is torn down and
    /// the supervisor reconnects against the new instrument.
    pub async fn switch_instrument(
        self: &Arc<Self>,
        symbol: &str,
        interval: &str,
    ) -> ConnectorResult<()> {
        let next = Instrument::new(symbol, interval);
        let mut session = self.session.lock().await;
        *self.instrument.lock() = next.clone();

        let Some(active) = session.as_mut() else {
            drop(session);
            info!(symbol, interval, "no live session, connecting fresh");
            self.connect(symbol, interval);
            return Ok(());
        };

        info!(symbol, interval, "switching market subscription");
        active.router.abort();

        let streams = [next.kline_stream(), active.listen_key.clone()];
        match self.transport.open_market_stream(&streams).await {
            Ok(combined) => {
                let generation = self.next_generation();
                let router =
                    StreamRouter::new(Arc::clone(&self.candle), Arc::clone(&self.reconciler));
                let ended_tx = self.ended_tx.clone();
                active.router = tokio::spawn(async move {
                    router.run_combined(combined).await;
                    let _ = ended_tx.send(generation);
                });
                Ok(())
            }
            Err(err) => {
                // Force a full reconnect; the supervisor picks up the new
                // instrument on its next attempt.
                warn!(error = %err, "resubscription failed, forcing reconnect");
                if let Some(dead) = session.take() {
                    dead.keepalive.abort();
                }
                let _ = self
                    .ended_tx
                    .send(self.live_generation.load(Ordering::Acquire));
                Err(ConnectorError::SetupFailure {
                    stage: "market resubscription",
                    reason: err.to_string(),
                })
            }
        }
    }

    fn spawn_keepalive(&self, listen_key: String) -> JoinHandle<()> {
        let transport = Arc::clone(&self.transport);
        let period = self.config.keepalive_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                if let Err(err) = transport.keepalive_session(&listen_key).await {
                    warn!(error = %err, "session keepalive failed");
                }
            }
        })
    }

    fn next_generation(&self) -> u64 {
        let generation = self.generation_counter.fetch_add(1, Ordering::AcqRel) + 1;
        self.live_generation.store(generation, Ordering::Release);
        generation
    }

    async fn teardown(&self) {
        if let Some(session) = self.session.lock().await.take() {
            session.router.abort();
            session.keepalive.abort();
        }
    }
}
