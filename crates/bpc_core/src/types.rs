//! Tipos compartilhados entre driver, engine e consumidores.
//!
//! O controlador devolve 24 registradores float por leitura. Os índices
//! físicos relevantes são fixos: fluxo em 10, pressão em 20, válvula em 23.

use crate::alerts::InventoryAlert;
use serde::{Deserialize, Serialize};

/// Quantidade de registradores float lidos por `/00RNF000018` (0x18).
pub const CHANNEL_COUNT: usize = 24;

/// Fluxo de He gasoso (l/min).
pub const FLOW_CHANNEL: usize = 10;
/// Pressão de retorno (mbar).
pub const PRESSURE_CHANNEL: usize = 20;
/// Abertura da válvula (%). Último registrador.
pub const VALVE_CHANNEL: usize = 23;

// ──────────────────────────────────────────────
// Canais
// ──────────────────────────────────────────────

/// Os 24 valores decodificados de uma leitura, em ordem de registrador.
///
/// O tamanho é sempre 24, inclusive em falha (todos NaN).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Channels([f32; CHANNEL_COUNT]);

impl Channels {
    pub fn new(values: [f32; CHANNEL_COUNT]) -> Self {
        Self(values)
    }

    /// Vetor de falha: todos os canais NaN.
    pub fn nan() -> Self {
        Self([f32::NAN; CHANNEL_COUNT])
    }

    /// Constrói a partir de um slice; `None` se o tamanho não for 24.
    pub fn from_slice(values: &[f32]) -> Option<Self> {
        <[f32; CHANNEL_COUNT]>::try_from(values).ok().map(Self)
    }

    pub fn values(&self) -> &[f32; CHANNEL_COUNT] {
        &self.0
    }

    pub fn flow(&self) -> f32 {
        self.0[FLOW_CHANNEL]
    }

    pub fn pressure(&self) -> f32 {
        self.0[PRESSURE_CHANNEL]
    }

    pub fn valve(&self) -> f32 {
        self.0[VALVE_CHANNEL]
    }

    /// `true` se nenhum canal é numérico.
    pub fn is_all_nan(&self) -> bool {
        self.0.iter().all(|v| v.is_nan())
    }
}

impl Default for Channels {
    fn default() -> Self {
        Self::nan()
    }
}

// ──────────────────────────────────────────────
// Resultado de aquisição
// ──────────────────────────────────────────────

/// Motivo pelo qual uma leitura não produziu amostra.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaultKind {
    /// Não foi possível abrir o socket (host/porta, recusa, DNS).
    Connection,
    /// Falha de escrita/leitura ou timeout durante a transação.
    Transport,
    /// Resposta sem marcador ou com menos de 24 floats.
    Decode,
    /// Nenhuma conexão ativa no momento da leitura.
    Disconnected,
}

impl std::fmt::Display for FaultKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FaultKind::Connection => "conexão",
            FaultKind::Transport => "transporte",
            FaultKind::Decode => "decodificação",
            FaultKind::Disconnected => "desconectado",
        };
        f.write_str(name)
    }
}

/// Resultado tipado de uma aquisição: amostra ou falha.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reading {
    Sample(Channels),
    Fault(FaultKind),
}

impl Reading {
    /// Canais desta leitura; falha vira o vetor NaN.
    pub fn channels(&self) -> Channels {
        match self {
            Reading::Sample(channels) => *channels,
            Reading::Fault(_) => Channels::nan(),
        }
    }

    pub fn fault(&self) -> Option<FaultKind> {
        match self {
            Reading::Sample(_) => None,
            Reading::Fault(kind) => Some(*kind),
        }
    }
}

// ──────────────────────────────────────────────
// Snapshot publicado
// ──────────────────────────────────────────────

/// Snapshot imutável publicado uma vez por ciclo.
///
/// Sentinelas: `recovered`/`remaining` NaN quando indefinidos,
/// `time_to_threshold` `+inf` quando não há projeção.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Versão monotônica, começa em 1.
    pub sequence: u64,
    /// Segundos desde o início da engine.
    pub uptime_secs: f64,
    /// Tempo decorrido desde o ciclo anterior (s), usado na integração.
    pub loop_time_secs: f64,
    pub channels: Channels,
    pub fault: Option<FaultKind>,
    /// lHe recuperado (l/dia)
    pub recovered: f64,
    /// Fluxo corrigido pelo fator de correção (l/min)
    pub corrected_flow: f64,
    /// lHe consumido desde o último início (l)
    pub cumulative_used: f64,
    /// lHe restante no dewar (l)
    pub remaining: f64,
    /// Dias estimados até o limite
    pub time_to_threshold: f64,
    /// Alerta disparado neste ciclo (apenas no ciclo que o gerou)
    pub alert: Option<InventoryAlert>,
}
