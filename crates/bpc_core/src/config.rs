//! Configuração unificada via TOML.
//!
//! Um único `config.toml` ao lado do executável. Toda seção usa
//! `#[serde(default)]`, então arquivos parciais são válidos.

use crate::alerts::{AlertPolicy, DEFAULT_COOLDOWN};
use crate::transport::DEFAULT_TIMEOUT;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Faixa recomendada para o fator de correção.
pub const CORRECTION_RANGE: (f64, f64) = (1.0, 2.0);

/// Timeout máximo aceito (s).
pub const MAX_TIMEOUT_SECS: f64 = 10.0;

/// Cooldown máximo de alerta (s): 7 dias.
pub const MAX_COOLDOWN_SECS: f64 = 7.0 * 86_400.0;

/// Converte segundos em `Duration`; valores fora da faixa viram `fallback`.
fn secs_or(secs: f64, min: f64, fallback: Duration, field: &str) -> Duration {
    if secs.is_nan() {
        warn!("{field} não numérico; usando {fallback:?}");
        return fallback;
    }
    match Duration::try_from_secs_f64(secs.max(min)) {
        Ok(d) => d,
        Err(e) => {
            warn!("{field} inválido ({secs}): {e}; usando {fallback:?}");
            fallback
        }
    }
}

/// Erros de entrada do operador. Nunca fatais: o campo é tratado como
/// desabilitado.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("Valor não numérico: {0:?}")]
    NotNumeric(String),

    #[error("Fator de correção inválido: {0} (deve ser > 0)")]
    InvalidCorrection(f64),

    #[error("Intervalo de polling inválido: {0:?}")]
    InvalidInterval(Duration),
}

/// Conexão com o controlador.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// IP ou hostname do controlador
    pub host: String,
    /// Porta TCP
    pub port: u16,
    /// Timeout de conexão (s)
    pub connect_timeout_secs: f64,
    /// Timeout de leitura/escrita por transação (s)
    pub read_timeout_secs: f64,
    /// Usa o controlador simulado em vez do hardware
    pub simulate: bool,
    /// Semente do simulador (0 = aleatória)
    pub simulate_seed: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            host: "172.30.33.212".into(),
            port: 20256,
            connect_timeout_secs: 1.0,
            read_timeout_secs: 1.0,
            simulate: false,
            simulate_seed: 0,
        }
    }
}

impl ControllerConfig {
    pub fn connect_timeout(&self) -> Duration {
        secs_or(self.connect_timeout_secs, 0.001, DEFAULT_TIMEOUT, "connect_timeout_secs")
    }

    pub fn read_timeout(&self) -> Duration {
        secs_or(self.read_timeout_secs, 0.001, DEFAULT_TIMEOUT, "read_timeout_secs")
    }
}

/// Ciclo de polling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Intervalo entre ciclos (ms)
    pub poll_interval_ms: u64,
    /// Buffer do channel de cada assinante
    pub subscriber_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            subscriber_capacity: 64,
        }
    }
}

impl EngineConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Entradas de estimativa de lHe.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimationConfig {
    /// lHe inicial no dewar (l). Vazio desliga o rastreamento.
    pub starting_inventory: String,
    /// Limite de lHe (l). Vazio desliga projeção e alerta.
    pub threshold: String,
    /// Fator multiplicativo aplicado ao fluxo
    pub correction_factor: f64,
}

impl Default for EstimationConfig {
    fn default() -> Self {
        Self {
            starting_inventory: String::new(),
            threshold: String::new(),
            correction_factor: 1.0,
        }
    }
}

/// Política de alerta de nível baixo.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    pub policy: AlertPolicy,
    /// Intervalo mínimo entre alertas na política `repeat` (s)
    pub cooldown_secs: f64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            policy: AlertPolicy::OneShot,
            cooldown_secs: 14_400.0,
        }
    }
}

impl AlertConfig {
    pub fn cooldown(&self) -> Duration {
        secs_or(self.cooldown_secs, 0.0, DEFAULT_COOLDOWN, "cooldown_secs")
    }
}

/// Salvamento do lHe restante entre execuções.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// Restaura o último restante como lHe inicial
    pub restore_remaining: bool,
    /// Arquivo de estado (relativo ao executável se não absoluto)
    pub path: String,
    /// Salva a cada N snapshots
    pub save_every_cycles: u64,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            restore_remaining: true,
            path: "bpc_state.toml".into(),
            save_every_cycles: 60,
        }
    }
}

/// Configuração raiz do aplicativo.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub controller: ControllerConfig,
    pub engine: EngineConfig,
    pub estimation: EstimationConfig,
    pub alerts: AlertConfig,
    pub state: StateConfig,
}

impl AppConfig {
    /// Carrega configuração de um arquivo TOML.
    pub fn load(path: &Path) -> Self {
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(content) => match toml::from_str::<AppConfig>(&content) {
                    Ok(config) => {
                        info!("Configuração carregada de {}", path.display());
                        return config;
                    }
                    Err(e) => {
                        warn!("Erro ao parsear {}: {}", path.display(), e);
                    }
                },
                Err(e) => {
                    warn!("Erro ao ler {}: {}", path.display(), e);
                }
            }
        }

        info!("Usando configuração padrão");
        AppConfig::default()
    }

    /// Salva configuração em arquivo TOML.
    pub fn save(&self, path: &Path) -> Result<(), String> {
        let content = toml::to_string_pretty(self).map_err(|e| e.to_string())?;
        std::fs::write(path, content).map_err(|e| e.to_string())?;
        info!("Configuração salva em {}", path.display());
        Ok(())
    }

    /// Diretório do executável (fallback: diretório atual).
    pub fn exe_dir() -> PathBuf {
        std::env::current_exe()
            .map(|p| p.parent().unwrap_or(Path::new(".")).to_path_buf())
            .unwrap_or_else(|_| PathBuf::from("."))
    }

    /// Retorna o caminho padrão do config.toml.
    pub fn default_path() -> PathBuf {
        Self::exe_dir().join("config.toml")
    }

    /// Caminho do arquivo de estado.
    pub fn state_path(&self) -> PathBuf {
        let p = PathBuf::from(&self.state.path);
        if p.is_absolute() {
            p
        } else {
            Self::exe_dir().join(p)
        }
    }

    /// Sobrescreve host/porta com `BPC_HOST` / `BPC_PORT`, se definidos.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(
            std::env::var("BPC_HOST").ok(),
            std::env::var("BPC_PORT").ok(),
        );
    }

    fn apply_overrides(&mut self, host: Option<String>, port: Option<String>) {
        if let Some(host) = host.filter(|h| !h.trim().is_empty()) {
            info!("Host do controlador via ambiente: {host}");
            self.controller.host = host.trim().to_string();
        }
        if let Some(port) = port {
            match port.trim().parse::<u16>() {
                Ok(p) if p != 0 => {
                    info!("Porta do controlador via ambiente: {p}");
                    self.controller.port = p;
                }
                _ => warn!("BPC_PORT inválida ignorada: {port:?}"),
            }
        }
    }

    /// Valida a configuração e retorna lista de erros.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.controller.host.trim().is_empty() {
            errors.push("Host do controlador não pode ser vazio".into());
        }
        if self.controller.port == 0 {
            errors.push("Porta do controlador não pode ser 0".into());
        }
        for (name, secs) in [
            ("conexão", self.controller.connect_timeout_secs),
            ("leitura", self.controller.read_timeout_secs),
        ] {
            if !(secs > 0.0 && secs <= MAX_TIMEOUT_SECS) {
                errors.push(format!(
                    "Timeout de {name} inválido: {secs} (0–{MAX_TIMEOUT_SECS} s)"
                ));
            }
        }
        if self.engine.poll_interval_ms < 100 || self.engine.poll_interval_ms > 60_000 {
            errors.push(format!(
                "Intervalo de polling inválido: {} ms (100–60000)",
                self.engine.poll_interval_ms
            ));
        }
        if self.engine.subscriber_capacity == 0 {
            errors.push("Capacidade de assinante não pode ser 0".into());
        }

        let (lo, hi) = CORRECTION_RANGE;
        let cf = self.estimation.correction_factor;
        if !(lo..=hi).contains(&cf) {
            errors.push(format!("Fator de correção fora da faixa: {cf} ({lo}–{hi})"));
        }
        for (name, value) in [
            ("lHe inicial", &self.estimation.starting_inventory),
            ("Limite de lHe", &self.estimation.threshold),
        ] {
            if !value.trim().is_empty() && value.trim().parse::<f64>().is_err() {
                errors.push(format!("{name} não numérico: {value:?}"));
            }
        }
        let cooldown = self.alerts.cooldown_secs;
        if !(0.0..=MAX_COOLDOWN_SECS).contains(&cooldown) {
            errors.push(format!(
                "Cooldown de alerta inválido: {cooldown} (0–{MAX_COOLDOWN_SECS} s)"
            ));
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        let errors = config.validate();
        assert!(errors.is_empty(), "Erros: {:?}", errors);
    }

    #[test]
    fn roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(config.controller.port, parsed.controller.port);
        assert_eq!(config.alerts.policy, parsed.alerts.policy);
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let partial = r#"
[controller]
port = 9999

[alerts]
policy = "repeat"
"#;
        let config: AppConfig = toml::from_str(partial).unwrap();
        assert_eq!(config.controller.port, 9999);
        // Outros campos devem ter valor padrão
        assert_eq!(config.controller.host, "172.30.33.212");
        assert_eq!(config.engine.poll_interval_ms, 1000);
        assert_eq!(config.alerts.policy, AlertPolicy::Repeat);
        assert_eq!(config.alerts.cooldown_secs, 14_400.0);
    }

    #[test]
    fn validate_flags_bad_inputs() {
        let mut config = AppConfig::default();
        config.estimation.correction_factor = 2.5;
        config.estimation.threshold = "dez".into();
        config.engine.poll_interval_ms = 10;
        let errors = config.validate();
        assert_eq!(errors.len(), 3, "Erros: {:?}", errors);
    }

    #[test]
    fn env_overrides_apply_and_ignore_garbage() {
        let mut config = AppConfig::default();
        config.apply_overrides(Some("10.1.2.3".into()), Some("1234".into()));
        assert_eq!(config.controller.host, "10.1.2.3");
        assert_eq!(config.controller.port, 1234);

        config.apply_overrides(Some("  ".into()), Some("porta".into()));
        assert_eq!(config.controller.host, "10.1.2.3");
        assert_eq!(config.controller.port, 1234);
    }

    #[test]
    fn out_of_range_durations_never_panic() {
        let mut config = AppConfig::default();
        config.controller.connect_timeout_secs = 1e20;
        config.controller.read_timeout_secs = f64::INFINITY;
        config.alerts.cooldown_secs = f64::NAN;
        assert_eq!(config.controller.connect_timeout(), DEFAULT_TIMEOUT);
        assert_eq!(config.controller.read_timeout(), DEFAULT_TIMEOUT);
        assert_eq!(config.alerts.cooldown(), DEFAULT_COOLDOWN);

        config.alerts.cooldown_secs = 1e300;
        assert_eq!(config.alerts.cooldown(), DEFAULT_COOLDOWN);
    }

    #[test]
    fn validate_flags_out_of_range_durations() {
        let parsed: AppConfig = toml::from_str(
            "[controller]\nconnect_timeout_secs = 1e20\n[alerts]\ncooldown_secs = 1e12\n",
        )
        .unwrap();
        let errors = parsed.validate();
        assert_eq!(errors.len(), 2, "Erros: {:?}", errors);
        assert_eq!(parsed.controller.connect_timeout(), DEFAULT_TIMEOUT);
    }

    #[test]
    fn small_timeouts_are_clamped() {
        let mut config = AppConfig::default();
        config.controller.read_timeout_secs = 0.0;
        let t = config.controller.read_timeout();
        assert!(!t.is_zero() && t <= Duration::from_millis(2));
    }

    #[test]
    fn load_missing_file_falls_back_to_default() {
        let config = AppConfig::load(Path::new("/nonexistent/config.toml"));
        assert_eq!(config.controller.port, 20256);
    }

    #[test]
    fn save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = AppConfig::default();
        config.estimation.starting_inventory = "120".into();
        config.save(&path).unwrap();
        let loaded = AppConfig::load(&path);
        assert_eq!(loaded.estimation.starting_inventory, "120");
    }
}
