//! Estimativa de consumo de lHe a partir do fluxo de He gasoso.
//!
//! Por ciclo:
//! 1. `recovered = correção × fluxo × 1440 × (1/754.2)` (l/min gás → l/dia líquido)
//! 2. janela deslizante das últimas 60 taxas
//! 3. integração `recovered / 86400 × loop_time` no consumo acumulado
//! 4. `remaining = round(inicial − acumulado, 4)`, nunca negativo
//! 5. projeção em dias até o limite usando a média da janela
//! 6. avaliação do alerta de nível baixo

use crate::alerts::{AlertLatch, InventoryAlert};
use crate::config::ConfigError;
use crate::types::Channels;
use std::collections::VecDeque;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Razão de expansão líquido→gás do He a 1 atm e 70 °F.
pub const HE_EXPANSION_RATIO: f64 = 1.0 / 754.2;

pub const MINUTES_PER_DAY: f64 = 1440.0;
pub const SECONDS_PER_DAY: f64 = 86400.0;

/// Tamanho da janela de taxas (≈1 minuto a 1 Hz).
pub const RATE_WINDOW: usize = 60;

/// Fator de correção padrão do fluxo.
pub const DEFAULT_CORRECTION: f64 = 1.0;

/// Converte um fluxo de gás (l/min) em lHe recuperado (l/dia).
pub fn recovery_rate(flow_lpm: f64, correction: f64) -> f64 {
    correction * flow_lpm * MINUTES_PER_DAY * HE_EXPANSION_RATIO
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Interpreta um nível digitado pelo operador.
///
/// Vazio → `Ok(None)` (desabilitado); não numérico → erro.
pub fn parse_level(text: &str) -> Result<Option<f64>, ConfigError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed
        .parse::<f64>()
        .map(Some)
        .map_err(|_| ConfigError::NotNumeric(trimmed.to_string()))
}

// ──────────────────────────────────────────────
// Configuração do operador
// ──────────────────────────────────────────────

/// Entradas do operador, alteradas somente pelos setters do [`Estimator`].
#[derive(Debug, Clone, PartialEq)]
pub struct InventorySettings {
    starting: Result<Option<f64>, ConfigError>,
    threshold: Result<Option<f64>, ConfigError>,
    correction: f64,
}

impl InventorySettings {
    pub fn new(starting: &str, threshold: &str, correction: f64) -> Self {
        let correction = if correction.is_finite() && correction > 0.0 {
            correction
        } else {
            warn!(
                "{}; usando {DEFAULT_CORRECTION}",
                ConfigError::InvalidCorrection(correction)
            );
            DEFAULT_CORRECTION
        };
        Self {
            starting: parse_level(starting),
            threshold: parse_level(threshold),
            correction,
        }
    }

    /// lHe inicial válido (> 0), ou `None` se o rastreamento está desligado.
    pub fn starting_inventory(&self) -> Option<f64> {
        match self.starting {
            Ok(Some(v)) if v > 0.0 => Some(v),
            _ => None,
        }
    }

    /// Limite válido, ou `None` se desabilitado/malformado.
    pub fn threshold(&self) -> Option<f64> {
        match self.threshold {
            Ok(Some(v)) if v.is_finite() => Some(v),
            _ => None,
        }
    }

    pub fn correction(&self) -> f64 {
        self.correction
    }
}

impl Default for InventorySettings {
    fn default() -> Self {
        Self::new("", "", DEFAULT_CORRECTION)
    }
}

// ──────────────────────────────────────────────
// Estado
// ──────────────────────────────────────────────

/// Estado persistente entre ciclos. Único estado mutável do núcleo.
#[derive(Debug, Clone)]
pub struct EstimationState {
    /// lHe consumido desde o último início (l)
    pub cumulative_used: f64,
    /// lHe restante (l), NaN se indefinido
    pub remaining: f64,
    /// Últimas taxas de recuperação (l/dia)
    pub recent_rates: VecDeque<f64>,
    /// Dias até o limite, `+inf` se sem projeção
    pub time_to_threshold: f64,
    pub alert: AlertLatch,
}

impl EstimationState {
    pub fn new(alert: AlertLatch) -> Self {
        Self {
            cumulative_used: 0.0,
            remaining: f64::NAN,
            recent_rates: VecDeque::with_capacity(RATE_WINDOW + 1),
            time_to_threshold: f64::INFINITY,
            alert,
        }
    }

    pub fn alert_active(&self) -> bool {
        self.alert.is_active()
    }

    /// Média da janela; `None` se vazia.
    pub fn mean_rate(&self) -> Option<f64> {
        if self.recent_rates.is_empty() {
            return None;
        }
        Some(self.recent_rates.iter().sum::<f64>() / self.recent_rates.len() as f64)
    }

    fn push_rate(&mut self, rate: f64) {
        self.recent_rates.push_back(rate);
        while self.recent_rates.len() > RATE_WINDOW {
            self.recent_rates.pop_front();
        }
    }

    fn disable_tracking(&mut self) {
        self.cumulative_used = 0.0;
        self.remaining = f64::NAN;
        self.time_to_threshold = f64::INFINITY;
    }
}

impl Default for EstimationState {
    fn default() -> Self {
        Self::new(AlertLatch::default())
    }
}

/// Valores derivados de um ciclo.
#[derive(Debug, Clone, PartialEq)]
pub struct Estimate {
    pub recovered: f64,
    pub corrected_flow: f64,
    pub cumulative_used: f64,
    pub remaining: f64,
    pub time_to_threshold: f64,
    /// `true` se o alerta deve ser emitido neste ciclo
    pub alert_raised: bool,
}

// ──────────────────────────────────────────────
// Estimador
// ──────────────────────────────────────────────

/// Estimador de consumo. Dono das configurações e do estado.
#[derive(Debug, Clone)]
pub struct Estimator {
    settings: InventorySettings,
    state: EstimationState,
    pending_reset: bool,
}

impl Estimator {
    pub fn new(settings: InventorySettings, alert: AlertLatch) -> Self {
        Self {
            settings,
            state: EstimationState::new(alert),
            pending_reset: false,
        }
    }

    pub fn settings(&self) -> &InventorySettings {
        &self.settings
    }

    pub fn state(&self) -> &EstimationState {
        &self.state
    }

    pub fn into_state(self) -> EstimationState {
        self.state
    }

    /// Novo lHe inicial. Zera o acumulado no próximo ciclo e rearma o alerta.
    pub fn set_starting_inventory(&mut self, text: &str) {
        self.settings.starting = parse_level(text);
        if let Err(e) = &self.settings.starting {
            warn!("lHe inicial ignorado: {e}");
        } else {
            info!("lHe inicial alterado para {:?}", text.trim());
        }
        self.pending_reset = true;
        self.state.alert.reset();
    }

    pub fn set_threshold(&mut self, text: &str) {
        self.settings.threshold = parse_level(text);
        if let Err(e) = &self.settings.threshold {
            warn!("Limite de lHe ignorado: {e}");
        } else {
            info!("Limite de lHe alterado para {:?}", text.trim());
        }
    }

    pub fn set_correction(&mut self, correction: f64) -> Result<(), ConfigError> {
        if !correction.is_finite() || correction <= 0.0 {
            return Err(ConfigError::InvalidCorrection(correction));
        }
        self.settings.correction = correction;
        info!("Fator de correção alterado para {correction}");
        Ok(())
    }

    /// Processa um ciclo. `loop_time` é o tempo real (s) desde o ciclo anterior.
    pub fn step(&mut self, channels: &Channels, loop_time: f64, now: Instant) -> Estimate {
        let flow = f64::from(channels.flow());
        let correction = self.settings.correction;

        // Taxa de recuperação
        let recovered = if flow.is_nan() {
            f64::NAN
        } else {
            let rate = recovery_rate(flow, correction);
            self.state.push_rate(rate);
            rate
        };

        if self.pending_reset {
            self.state.cumulative_used = 0.0;
            self.pending_reset = false;
        }

        let mut alert_raised = false;
        match self.settings.starting_inventory() {
            Some(start) => {
                // Integração
                let used_now = recovered / SECONDS_PER_DAY * loop_time;
                if used_now.is_finite() {
                    self.state.cumulative_used += used_now;
                }
                self.state.remaining = round_to(start - self.state.cumulative_used, 4).max(0.0);

                // Projeção
                let threshold = self.settings.threshold();
                self.state.time_to_threshold = match (threshold, self.state.mean_rate()) {
                    (Some(limit), Some(mean))
                        if limit < start && mean != 0.0 && mean.is_finite() =>
                    {
                        round_to((start - limit - self.state.cumulative_used) / mean, 2)
                    }
                    _ => f64::INFINITY,
                };

                // Alerta
                if let Some(limit) = threshold {
                    let breached = self.state.remaining <= limit;
                    alert_raised = self.state.alert.evaluate(breached, now);
                    if alert_raised {
                        debug!(
                            "Alerta: restante {:.3} l <= limite {:.3} l",
                            self.state.remaining, limit
                        );
                    }
                }
            }
            None => self.state.disable_tracking(),
        }

        Estimate {
            recovered,
            corrected_flow: flow * correction,
            cumulative_used: self.state.cumulative_used,
            remaining: self.state.remaining,
            time_to_threshold: self.state.time_to_threshold,
            alert_raised,
        }
    }

    /// Monta o alerta a publicar a partir de uma estimativa que o disparou.
    pub fn alert_for(&self, estimate: &Estimate, sequence: u64) -> Option<InventoryAlert> {
        if !estimate.alert_raised {
            return None;
        }
        Some(InventoryAlert {
            remaining: estimate.remaining,
            threshold: self.settings.threshold()?,
            sequence,
        })
    }
}

impl Default for Estimator {
    fn default() -> Self {
        Self::new(InventorySettings::default(), AlertLatch::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::AlertPolicy;
    use crate::types::{CHANNEL_COUNT, FLOW_CHANNEL};
    use std::time::Duration;

    fn with_flow(flow: f32) -> Channels {
        let mut raw = [0.0f32; CHANNEL_COUNT];
        raw[FLOW_CHANNEL] = flow;
        Channels::new(raw)
    }

    fn estimator(start: &str, threshold: &str) -> Estimator {
        Estimator::new(
            InventorySettings::new(start, threshold, 1.0),
            AlertLatch::default(),
        )
    }

    #[test]
    fn recovery_rate_matches_expansion_ratio() {
        let r = recovery_rate(0.5, 1.0);
        assert!((r - 0.5 * 1440.0 / 754.2).abs() < 1e-12);
        assert!((recovery_rate(0.5, 2.0) - 2.0 * r).abs() < 1e-12);
    }

    #[test]
    fn parse_level_handles_empty_and_garbage() {
        assert_eq!(parse_level(""), Ok(None));
        assert_eq!(parse_level("  "), Ok(None));
        assert_eq!(parse_level("42.5"), Ok(Some(42.5)));
        assert!(matches!(parse_level("abc"), Err(ConfigError::NotNumeric(_))));
    }

    #[test]
    fn end_to_end_one_day_at_constant_flow() {
        let mut est = estimator("100.0", "10.0");
        let now = Instant::now();
        let mut last = None;
        // 1 ciclo inicial (loop_time 0) + 86400 ciclos de 1 s
        est.step(&with_flow(0.5), 0.0, now);
        for _ in 0..86_400 {
            last = Some(est.step(&with_flow(0.5), 1.0, now));
        }
        let e = last.unwrap();
        let expected_rate = 0.5 * 1440.0 / 754.2;
        assert!((e.recovered - expected_rate).abs() < 1e-9);
        assert!((e.cumulative_used - expected_rate).abs() < 1e-6);
        assert!((e.remaining - (100.0 - expected_rate)).abs() < 1e-3);
        // (100 - 10 - 0.9547) / 0.9547 ≈ 93.27 dias
        let expected_days = (90.0 - expected_rate) / expected_rate;
        assert!((e.time_to_threshold - expected_days).abs() < 0.01);
        assert!(!e.alert_raised);
    }

    #[test]
    fn zero_flow_keeps_remaining_constant() {
        let mut est = estimator("50", "");
        let now = Instant::now();
        for _ in 0..500 {
            let e = est.step(&with_flow(0.0), 1.0, now);
            assert_eq!(e.remaining, 50.0);
            assert_eq!(e.recovered, 0.0);
            assert_eq!(e.time_to_threshold, f64::INFINITY);
        }
    }

    #[test]
    fn nan_flow_skips_window_and_integration() {
        let mut est = estimator("100", "10");
        let now = Instant::now();
        est.step(&with_flow(1.0), 0.0, now);
        let before = est.state().cumulative_used;
        let e = est.step(&Channels::nan(), 10.0, now);
        assert!(e.recovered.is_nan());
        assert_eq!(est.state().recent_rates.len(), 1);
        assert_eq!(est.state().cumulative_used, before);
        assert!(e.remaining.is_finite());
    }

    #[test]
    fn window_is_bounded() {
        let mut est = estimator("", "");
        let now = Instant::now();
        for i in 0..200 {
            est.step(&with_flow(i as f32), 1.0, now);
            assert!(est.state().recent_rates.len() <= RATE_WINDOW);
        }
        // A mais antiga remanescente é a do ciclo 140
        let oldest = est.state().recent_rates.front().copied().unwrap();
        assert!((oldest - recovery_rate(140.0, 1.0)).abs() < 1e-9);
    }

    #[test]
    fn remaining_is_clamped_at_zero() {
        let mut est = estimator("0.001", "");
        let now = Instant::now();
        let e = est.step(&with_flow(5.0), 3600.0, now);
        assert_eq!(e.remaining, 0.0);
    }

    #[test]
    fn disabled_tracking_forces_sentinels() {
        for start in ["", "0", "-5", "abc"] {
            let mut est = estimator(start, "10");
            let now = Instant::now();
            for _ in 0..3 {
                let e = est.step(&with_flow(2.0), 1.0, now);
                assert!(e.remaining.is_nan());
                assert_eq!(e.time_to_threshold, f64::INFINITY);
                assert_eq!(e.cumulative_used, 0.0);
                assert!(!e.alert_raised);
            }
        }
    }

    #[test]
    fn new_starting_inventory_resets_accumulation() {
        let mut est = estimator("100", "");
        let now = Instant::now();
        for _ in 0..10 {
            est.step(&with_flow(3.0), 100.0, now);
        }
        assert!(est.state().cumulative_used > 0.0);

        est.set_starting_inventory("80");
        let e = est.step(&with_flow(0.0), 1.0, now);
        assert_eq!(e.cumulative_used, 0.0);
        assert_eq!(e.remaining, 80.0);
    }

    #[test]
    fn reset_applies_even_when_flow_is_nan() {
        let mut est = estimator("100", "");
        let now = Instant::now();
        est.step(&with_flow(3.0), 1000.0, now);
        est.set_starting_inventory("60");
        let e = est.step(&Channels::nan(), 1.0, now);
        assert_eq!(e.cumulative_used, 0.0);
        assert_eq!(e.remaining, 60.0);
    }

    #[test]
    fn threshold_not_below_start_disables_projection() {
        let mut est = estimator("10", "20");
        let e = est.step(&with_flow(1.0), 1.0, Instant::now());
        assert_eq!(e.time_to_threshold, f64::INFINITY);
    }

    #[test]
    fn one_shot_alert_and_reset() {
        let mut est = estimator("10", "10");
        let now = Instant::now();
        let first = est.step(&with_flow(1.0), 1.0, now);
        assert!(first.alert_raised);
        assert!(est.state().alert_active());
        let alert = est.alert_for(&first, 1).unwrap();
        assert_eq!(alert.threshold, 10.0);

        let second = est.step(&with_flow(1.0), 1.0, now + Duration::from_secs(1));
        assert!(!second.alert_raised);
        assert!(est.alert_for(&second, 2).is_none());

        est.set_starting_inventory("9");
        let third = est.step(&with_flow(1.0), 1.0, now + Duration::from_secs(2));
        assert!(third.alert_raised);
    }

    #[test]
    fn repeat_policy_realerts_after_cooldown() {
        let mut est = Estimator::new(
            InventorySettings::new("5", "10", 1.0),
            AlertLatch::new(AlertPolicy::Repeat, Duration::from_secs(10)),
        );
        let t0 = Instant::now();
        assert!(est.step(&with_flow(0.0), 1.0, t0).alert_raised);
        assert!(!est.step(&with_flow(0.0), 1.0, t0 + Duration::from_secs(5)).alert_raised);
        assert!(est.step(&with_flow(0.0), 1.0, t0 + Duration::from_secs(10)).alert_raised);
    }

    #[test]
    fn invalid_correction_is_rejected() {
        let mut est = Estimator::default();
        assert!(est.set_correction(0.0).is_err());
        assert!(est.set_correction(f64::NAN).is_err());
        assert!(est.set_correction(1.5).is_ok());
        assert_eq!(est.settings().correction(), 1.5);
        let e = est.step(&with_flow(2.0), 0.0, Instant::now());
        assert!((e.corrected_flow - 3.0).abs() < 1e-9);
    }

    #[test]
    fn invalid_initial_correction_falls_back_to_default() {
        for bad in [0.0, -1.2, f64::NAN, f64::INFINITY] {
            let settings = InventorySettings::new("100", "", bad);
            assert_eq!(settings.correction(), DEFAULT_CORRECTION);
        }
        assert_eq!(InventorySettings::new("100", "", 1.3).correction(), 1.3);
    }
}
