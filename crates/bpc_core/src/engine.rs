//! Engine de polling: uma thread dedicada, um ciclo por intervalo.
//!
//! A thread é a única que chama a fonte de canais e a única que escreve no
//! [`EstimationState`]. Cada ciclo publica um [`Snapshot`] imutável
//! (`Arc`) para todos os assinantes e para a célula `latest`; consumidores
//! nunca veem um snapshot pela metade.
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌──────────┐   ┌──────────┐
//! │ controles│ → │ aquisição│ → │ estimativa│ → │ publicação│ → espera
//! └──────────┘   └──────────┘   └──────────┘   └──────────┘
//! ```
//!
//! O pedido de parada é observado no início de cada ciclo e logo após a
//! aquisição (uma leitura em andamento é descartada, nunca aplicada).

use crate::alerts::AlertLatch;
use crate::client::ChannelSource;
use crate::config::{ConfigError, EngineConfig};
use crate::estimation::{EstimationState, Estimator, InventorySettings};
use crate::types::{FaultKind, Reading, Snapshot};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded, unbounded};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

// ──────────────────────────────────────────────
// Primitivas compartilhadas
// ──────────────────────────────────────────────

/// Token de cancelamento observado nas fronteiras de ciclo.
#[derive(Debug, Clone, Default)]
pub struct StopToken(Arc<AtomicBool>);

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Último snapshot publicado (copy-on-publish).
#[derive(Debug, Clone, Default)]
pub struct SnapshotCell(Arc<Mutex<Option<Arc<Snapshot>>>>);

impl SnapshotCell {
    pub fn get(&self) -> Option<Arc<Snapshot>> {
        self.0.lock().ok().and_then(|slot| slot.clone())
    }

    fn set(&self, snapshot: Arc<Snapshot>) {
        if let Ok(mut slot) = self.0.lock() {
            *slot = Some(snapshot);
        }
    }
}

/// Mensagens de controle aplicadas pela thread no início do próximo ciclo.
#[derive(Debug, Clone, PartialEq)]
enum Control {
    StartingInventory(String),
    Threshold(String),
    Correction(f64),
    PollInterval(Duration),
    /// Acorda a espera entre ciclos (usado na parada)
    Wake,
}

/// Interface de controle da aplicação hospedeira.
#[derive(Debug, Clone)]
pub struct EngineControls {
    tx: Sender<Control>,
}

impl EngineControls {
    fn send(&self, msg: Control) -> bool {
        self.tx.send(msg).is_ok()
    }

    /// Novo lHe inicial (texto do operador). Zera o acumulado no próximo ciclo.
    pub fn set_starting_inventory(&self, text: impl Into<String>) -> bool {
        self.send(Control::StartingInventory(text.into()))
    }

    /// Novo limite de lHe (texto do operador; vazio desliga).
    pub fn set_threshold(&self, text: impl Into<String>) -> bool {
        self.send(Control::Threshold(text.into()))
    }

    pub fn set_correction(&self, correction: f64) -> Result<bool, ConfigError> {
        if !correction.is_finite() || correction <= 0.0 {
            return Err(ConfigError::InvalidCorrection(correction));
        }
        Ok(self.send(Control::Correction(correction)))
    }

    pub fn set_poll_interval(&self, interval: Duration) -> Result<bool, ConfigError> {
        if interval.is_zero() {
            return Err(ConfigError::InvalidInterval(interval));
        }
        Ok(self.send(Control::PollInterval(interval)))
    }
}

/// Parâmetros de execução da engine.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub poll_interval: Duration,
    pub subscriber_capacity: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        EngineOptions::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for EngineOptions {
    fn from(cfg: &EngineConfig) -> Self {
        Self {
            poll_interval: cfg.poll_interval(),
            subscriber_capacity: cfg.subscriber_capacity.max(1),
        }
    }
}

// ──────────────────────────────────────────────
// Engine
// ──────────────────────────────────────────────

/// Engine de polling e estimativa.
pub struct PollingEngine {
    source: Box<dyn ChannelSource>,
    estimator: Estimator,
    options: EngineOptions,
    subscribers: Vec<Sender<Arc<Snapshot>>>,
    latest: SnapshotCell,
    control_tx: Sender<Control>,
    control_rx: Receiver<Control>,
    pending: Vec<Control>,
    stop: StopToken,
    sequence: u64,
    started: Instant,
    last_fault: Option<FaultKind>,
}

impl PollingEngine {
    pub fn new(
        source: Box<dyn ChannelSource>,
        settings: InventorySettings,
        alert: AlertLatch,
        options: EngineOptions,
    ) -> Self {
        let (control_tx, control_rx) = unbounded();
        Self {
            source,
            estimator: Estimator::new(settings, alert),
            options,
            subscribers: Vec::new(),
            latest: SnapshotCell::default(),
            control_tx,
            control_rx,
            pending: Vec::new(),
            stop: StopToken::new(),
            sequence: 0,
            started: Instant::now(),
            last_fault: None,
        }
    }

    /// Registra um assinante com o buffer padrão.
    pub fn subscribe(&mut self) -> Receiver<Arc<Snapshot>> {
        self.subscribe_with_capacity(self.options.subscriber_capacity)
    }

    /// Registra um assinante. Um consumidor lento perde snapshots, mas
    /// nunca bloqueia a thread de polling.
    pub fn subscribe_with_capacity(&mut self, capacity: usize) -> Receiver<Arc<Snapshot>> {
        let (tx, rx) = bounded(capacity.max(1));
        self.subscribers.push(tx);
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn latest(&self) -> SnapshotCell {
        self.latest.clone()
    }

    pub fn controls(&self) -> EngineControls {
        EngineControls {
            tx: self.control_tx.clone(),
        }
    }

    pub fn stop_token(&self) -> StopToken {
        self.stop.clone()
    }

    pub fn state(&self) -> &EstimationState {
        self.estimator.state()
    }

    pub fn poll_interval(&self) -> Duration {
        self.options.poll_interval
    }

    fn apply_controls(&mut self) {
        let queued: Vec<Control> = self
            .pending
            .drain(..)
            .chain(self.control_rx.try_iter())
            .collect();

        for msg in queued {
            match msg {
                Control::StartingInventory(text) => self.estimator.set_starting_inventory(&text),
                Control::Threshold(text) => self.estimator.set_threshold(&text),
                Control::Correction(cf) => {
                    if let Err(e) = self.estimator.set_correction(cf) {
                        warn!("{e}");
                    }
                }
                Control::PollInterval(interval) => {
                    info!("Intervalo de polling alterado para {interval:?}");
                    self.options.poll_interval = interval;
                }
                Control::Wake => {}
            }
        }
    }

    fn acquire(&mut self) -> Reading {
        let reading = self.source.read();
        match (reading.fault(), self.last_fault) {
            (Some(kind), None) => warn!("Leitura do controlador falhou ({kind}); publicando NaN"),
            (Some(kind), Some(_)) => debug!("Leitura ainda em falha ({kind})"),
            (None, Some(_)) => info!("Leitura do controlador restabelecida"),
            (None, None) => {}
        }
        self.last_fault = reading.fault();
        reading
    }

    fn complete(&mut self, reading: Reading, loop_time: Duration, now: Instant) -> Arc<Snapshot> {
        let channels = reading.channels();
        let loop_secs = loop_time.as_secs_f64();
        let estimate = self.estimator.step(&channels, loop_secs, now);

        self.sequence += 1;
        let alert = self.estimator.alert_for(&estimate, self.sequence);
        if let Some(a) = &alert {
            debug!("Alerta publicado no ciclo {}", a.sequence);
        }

        let snapshot = Snapshot {
            sequence: self.sequence,
            uptime_secs: now.saturating_duration_since(self.started).as_secs_f64(),
            loop_time_secs: loop_secs,
            channels,
            fault: reading.fault(),
            recovered: estimate.recovered,
            corrected_flow: estimate.corrected_flow,
            cumulative_used: estimate.cumulative_used,
            remaining: estimate.remaining,
            time_to_threshold: estimate.time_to_threshold,
            alert,
        };
        self.publish(snapshot)
    }

    fn publish(&mut self, snapshot: Snapshot) -> Arc<Snapshot> {
        let snapshot = Arc::new(snapshot);
        self.latest.set(snapshot.clone());
        self.subscribers
            .retain(|tx| match tx.try_send(snapshot.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    debug!("Channel cheio, descartando snapshot {}", snapshot.sequence);
                    true
                }
                Err(TrySendError::Disconnected(_)) => {
                    debug!("Assinante desconectado, removendo");
                    false
                }
            });
        snapshot
    }

    /// Executa um ciclo completo de forma síncrona.
    ///
    /// `loop_time` é o tempo decorrido desde o ciclo anterior.
    pub fn run_cycle(&mut self, loop_time: Duration, now: Instant) -> Arc<Snapshot> {
        self.apply_controls();
        let reading = self.acquire();
        self.complete(reading, loop_time, now)
    }

    /// Espera até `deadline`, acumulando mensagens de controle recebidas.
    fn pace(&mut self, deadline: Instant) {
        loop {
            if self.stop.is_cancelled() {
                return;
            }
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            match self.control_rx.recv_timeout(deadline - now) {
                Ok(msg) => self.pending.push(msg),
                Err(RecvTimeoutError::Timeout) => return,
                Err(RecvTimeoutError::Disconnected) => {
                    std::thread::sleep(deadline.saturating_duration_since(Instant::now()));
                    return;
                }
            }
        }
    }

    /// Loop principal. Retorna o estado final quando a parada é pedida.
    pub fn run(mut self) -> EstimationState {
        info!(
            "Engine de polling iniciada (intervalo {:?})",
            self.options.poll_interval
        );
        let mut previous_start: Option<Instant> = None;

        while !self.stop.is_cancelled() {
            let cycle_start = Instant::now();
            let loop_time = previous_start
                .map(|t| cycle_start.saturating_duration_since(t))
                .unwrap_or_default();
            previous_start = Some(cycle_start);

            self.apply_controls();
            let reading = self.acquire();
            if self.stop.is_cancelled() {
                debug!("Parada pedida durante a aquisição; leitura descartada");
                break;
            }
            self.complete(reading, loop_time, Instant::now());

            self.pace(cycle_start + self.options.poll_interval);
        }

        self.source.close();
        info!("Engine de polling encerrada após {} ciclos", self.sequence);
        self.estimator.into_state()
    }

    /// Inicia a thread de polling.
    pub fn spawn(self) -> std::io::Result<EngineHandle> {
        let stop = self.stop.clone();
        let controls = self.controls();
        let latest = self.latest.clone();

        let join = std::thread::Builder::new()
            .name("bpc-poll".into())
            .spawn(move || self.run())?;

        Ok(EngineHandle {
            stop,
            controls,
            latest,
            join: Some(join),
        })
    }
}

/// Handle da thread de polling em execução.
pub struct EngineHandle {
    stop: StopToken,
    controls: EngineControls,
    latest: SnapshotCell,
    join: Option<JoinHandle<EstimationState>>,
}

impl EngineHandle {
    pub fn controls(&self) -> &EngineControls {
        &self.controls
    }

    pub fn latest(&self) -> Option<Arc<Snapshot>> {
        self.latest.get()
    }

    pub fn stop_token(&self) -> StopToken {
        self.stop.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.join.as_ref().is_none_or(|j| j.is_finished())
    }

    fn shutdown(&mut self) -> Option<EstimationState> {
        self.stop.cancel();
        self.controls.send(Control::Wake);
        let join = self.join.take()?;
        match join.join() {
            Ok(state) => Some(state),
            Err(_) => {
                warn!("Thread de polling terminou com pânico");
                None
            }
        }
    }

    /// Pede a parada, aguarda a thread e devolve o estado final.
    pub fn stop(mut self) -> Option<EstimationState> {
        self.shutdown()
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
