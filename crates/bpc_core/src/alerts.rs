//! Alerta de nível baixo de lHe com histerese.
//!
//! A política padrão é *one-shot*: um alerta por violação, que só rearma
//! quando o lHe inicial é redefinido. A política *repeat* reproduz o envio
//! periódico de e-mail: enquanto a condição persistir, um novo alerta sai a
//! cada `cooldown`.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Cooldown padrão entre alertas repetidos (4 horas).
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(4 * 60 * 60);

/// Política de repetição de alerta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertPolicy {
    /// Um alerta por violação; rearma apenas com reset explícito.
    #[default]
    OneShot,
    /// Realerta a cada cooldown enquanto a condição persistir.
    Repeat,
}

/// Alerta disparado: lHe restante abaixo do limite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryAlert {
    /// lHe restante no momento do disparo (l)
    pub remaining: f64,
    /// Limite configurado (l)
    pub threshold: f64,
    /// Ciclo que disparou o alerta
    pub sequence: u64,
}

impl InventoryAlert {
    /// Texto de notificação para transportes externos (e-mail, log).
    pub fn message(&self) -> String {
        format!(
            "lHe abaixo do limite: restam {:.3} l (limite {:.3} l). Reabasteça ou troque o dewar.",
            self.remaining, self.threshold
        )
    }
}

/// Trava de histerese do alerta.
#[derive(Debug, Clone)]
pub struct AlertLatch {
    policy: AlertPolicy,
    cooldown: Duration,
    active: bool,
    last_raised: Option<Instant>,
}

impl AlertLatch {
    pub fn new(policy: AlertPolicy, cooldown: Duration) -> Self {
        Self {
            policy,
            cooldown,
            active: false,
            last_raised: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn policy(&self) -> AlertPolicy {
        self.policy
    }

    /// Avalia a condição de violação. Retorna `true` se um alerta deve sair.
    pub fn evaluate(&mut self, breached: bool, now: Instant) -> bool {
        if !breached {
            return false;
        }

        let raise = match self.policy {
            AlertPolicy::OneShot => !self.active,
            AlertPolicy::Repeat => self
                .last_raised
                .is_none_or(|t| now.saturating_duration_since(t) >= self.cooldown),
        };

        if raise {
            self.active = true;
            self.last_raised = Some(now);
        }
        raise
    }

    /// Reset explícito (novo lHe inicial): rearma o alerta.
    pub fn reset(&mut self) {
        self.active = false;
        self.last_raised = None;
    }
}

impl Default for AlertLatch {
    fn default() -> Self {
        Self::new(AlertPolicy::OneShot, DEFAULT_COOLDOWN)
    }
}
