//! # BPC Monitor
//!
//! Faz polling do controlador de contrapressão, estima o lHe restante no
//! dewar e registra cada ciclo no log. Alertas de nível baixo saem como
//! `warn!`.
//!
//! ## Uso
//! ```bash
//! bpc_monitor                          # config.toml ao lado do executável
//! bpc_monitor --config /etc/bpc.toml   # config explícito
//! bpc_monitor --simulate               # controlador simulado (sem hardware)
//! ```

mod report;

use bpc_core::alerts::AlertLatch;
use bpc_core::estimation::InventorySettings;
use bpc_core::simulator::SimulatedController;
use bpc_core::state;
use bpc_core::{AppConfig, ChannelSource, ControllerClient, EngineOptions, PollingEngine, TcpConnector};
use crossbeam_channel::RecvTimeoutError;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};

/// Argumentos de linha de comando.
#[derive(Debug, Default, PartialEq)]
struct Args {
    config: Option<PathBuf>,
    simulate: bool,
}

impl Args {
    fn parse(args: impl IntoIterator<Item = String>) -> Self {
        let mut parsed = Args::default();
        let mut it = args.into_iter();
        while let Some(arg) = it.next() {
            match arg.as_str() {
                "--simulate" => parsed.simulate = true,
                "--config" => match it.next() {
                    Some(path) => parsed.config = Some(PathBuf::from(path)),
                    None => warn!("--config sem caminho, usando padrão"),
                },
                other => warn!("Argumento desconhecido ignorado: {other}"),
            }
        }
        parsed
    }
}

fn main() {
    // ── Logging ──
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse(std::env::args().skip(1));

    // ── Carregar config ──
    let config_path = args.config.clone().unwrap_or_else(AppConfig::default_path);
    let mut config = AppConfig::load(&config_path);

    // Salva config padrão se não existir
    if !config_path.exists() {
        if let Err(e) = config.save(&config_path) {
            warn!("Não foi possível salvar config padrão: {e}");
        }
    }

    config.apply_env_overrides();
    if args.simulate {
        config.controller.simulate = true;
    }
    for e in config.validate() {
        warn!("Config: {e}");
    }

    // ── Estimativa ──
    let state_path = config.state_path();
    let mut starting = config.estimation.starting_inventory.clone();
    if starting.trim().is_empty() && config.state.restore_remaining {
        if let Some(remaining) = state::load_remaining(&state_path) {
            starting = remaining.to_string();
        }
    }
    let settings = InventorySettings::new(
        &starting,
        &config.estimation.threshold,
        config.estimation.correction_factor,
    );
    let latch = AlertLatch::new(config.alerts.policy, config.alerts.cooldown());
    let alert_policy = latch.policy();

    // ── Fonte de canais ──
    let ctrl = &config.controller;
    let source: Box<dyn ChannelSource> = if ctrl.simulate {
        info!("Modo simulado: nenhum controlador será contatado");
        Box::new(SimulatedController::new(ctrl.simulate_seed))
    } else {
        let connector = TcpConnector::new(ctrl.host.clone(), ctrl.port)
            .with_timeouts(ctrl.connect_timeout(), ctrl.read_timeout());
        let mut client = ControllerClient::connect(connector);
        match client.identify() {
            Ok(id) => info!("Controlador identificado: {:?}", id.trim()),
            Err(e) => warn!("Identificação do controlador falhou: {e}"),
        }
        Box::new(client)
    };

    let mut engine = PollingEngine::new(source, settings, latch, EngineOptions::from(&config.engine));
    let snapshots = engine.subscribe();

    // ── Banner ──
    let target = if ctrl.simulate {
        "simulado".to_string()
    } else {
        format!("{}:{}", ctrl.host, ctrl.port)
    };
    println!();
    println!("══════════════════════════════════════════════");
    println!("   ⚡ BPC MONITOR – ATIVO (Rust)");
    println!("══════════════════════════════════════════════");
    println!("  Controlador: {target}");
    println!("  Intervalo:   {} ms", config.engine.poll_interval_ms);
    println!("  lHe inicial: {}", display_level(&starting));
    println!("  Limite:      {}", display_level(&config.estimation.threshold));
    println!("  Alerta:      {alert_policy:?}");
    println!("══════════════════════════════════════════════");
    println!();

    let handle = match engine.spawn() {
        Ok(h) => h,
        Err(e) => {
            error!("Falha ao iniciar thread de polling: {e}");
            return;
        }
    };

    let stop = handle.stop_token();
    if let Err(e) = ctrlc::set_handler(move || stop.cancel()) {
        warn!("Não foi possível instalar handler de Ctrl-C: {e}");
    }

    // ── Loop principal ──
    let save_every = config.state.save_every_cycles;
    let mut last_sequence = 0;
    loop {
        match snapshots.recv_timeout(Duration::from_secs(1)) {
            Ok(snap) => {
                info!("{}", report::summary(&snap));
                if let Some(alert) = &snap.alert {
                    warn!("⚠ {}", alert.message());
                }
                last_sequence = snap.sequence;
                if save_every > 0 && snap.sequence % save_every == 0 {
                    if let Err(e) = state::save_remaining(&state_path, snap.remaining, snap.sequence) {
                        warn!("Erro ao salvar estado: {e}");
                    }
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                if handle.is_finished() {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    // ── Encerramento ──
    info!("Encerrando...");
    match handle.stop() {
        Some(final_state) => {
            if let Err(e) = state::save_remaining(&state_path, final_state.remaining, last_sequence) {
                warn!("Erro ao salvar estado: {e}");
            }
        }
        None => warn!("Estado final indisponível"),
    }
}

fn display_level(text: &str) -> String {
    let text = text.trim();
    if text.is_empty() {
        "desligado".into()
    } else {
        format!("{text} l")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Args {
        Args::parse(list.iter().map(|s| s.to_string()))
    }

    #[test]
    fn parses_flags() {
        assert_eq!(args(&[]), Args::default());
        let a = args(&["--simulate", "--config", "/tmp/bpc.toml"]);
        assert!(a.simulate);
        assert_eq!(a.config, Some(PathBuf::from("/tmp/bpc.toml")));
    }

    #[test]
    fn dangling_and_unknown_flags_are_ignored() {
        let a = args(&["--verbose", "--config"]);
        assert_eq!(a, Args::default());
    }
}
