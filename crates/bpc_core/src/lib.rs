//! # BPC Core
//!
//! Driver do protocolo ASCII do controlador de contrapressão (BPC) e engine
//! de polling que estima o lHe restante no dewar a partir do fluxo de
//! recuperação de hélio.
//!
//! ## Módulos
//! - [`types`] – Vetor de 24 canais, leitura tipada e snapshot publicado
//! - [`protocol`] – Frames de comando, checksum e decodificação dos floats
//! - [`transport`] – Socket TCP com timeout e traits de conexão
//! - [`client`] – Cliente do controlador com reconexão
//! - [`simulator`] – Controlador simulado (modo debug)
//! - [`estimation`] – Taxa recuperada, integração, projeção
//! - [`alerts`] – Alerta de nível baixo (one-shot ou com cooldown)
//! - [`engine`] – Thread de polling, controles e publicação
//! - [`config`] – Configuração unificada via TOML
//! - [`state`] – Persistência do lHe restante

pub mod types;
pub mod protocol;
pub mod transport;
pub mod client;
pub mod simulator;
pub mod estimation;
pub mod alerts;
pub mod engine;
pub mod config;
pub mod state;

// Re-exports convenientes
pub use types::{Channels, FaultKind, Reading, Snapshot};
pub use client::{ChannelSource, ControllerClient};
pub use transport::TcpConnector;
pub use engine::{EngineControls, EngineHandle, EngineOptions, PollingEngine};
pub use config::AppConfig;
