//! Salva e restaura o lHe restante entre execuções.
//!
//! Na inicialização, se nenhum lHe inicial foi configurado, o último valor
//! restante salvo passa a ser o lHe inicial. Só valores finitos e
//! positivos são aceitos.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info, warn};

/// Conteúdo do arquivo de estado.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedState {
    /// Último lHe restante publicado (l)
    pub remaining: f64,
    /// Ciclo em que foi salvo
    pub sequence: u64,
}

impl SavedState {
    fn is_usable(&self) -> bool {
        self.remaining.is_finite() && self.remaining > 0.0
    }
}

/// Lê o valor salvo. Arquivo ausente ou inválido → `None`.
pub fn load_remaining(path: &Path) -> Option<f64> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            debug!("Sem estado salvo em {}: {e}", path.display());
            return None;
        }
    };
    match toml::from_str::<SavedState>(&content) {
        Ok(state) if state.is_usable() => {
            info!("lHe restante restaurado: {:.3} l", state.remaining);
            Some(state.remaining)
        }
        Ok(state) => {
            warn!("Estado salvo ignorado (restante inválido: {})", state.remaining);
            None
        }
        Err(e) => {
            warn!("Erro ao parsear {}: {e}", path.display());
            None
        }
    }
}

/// Grava o restante se for utilizável; NaN e zero não sobrescrevem o arquivo.
pub fn save_remaining(path: &Path, remaining: f64, sequence: u64) -> Result<bool, String> {
    let state = SavedState { remaining, sequence };
    if !state.is_usable() {
        return Ok(false);
    }
    let content = toml::to_string(&state).map_err(|e| e.to_string())?;
    std::fs::write(path, content).map_err(|e| e.to_string())?;
    debug!("lHe restante salvo em {}", path.display());
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_then_restore() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.toml");
        assert_eq!(save_remaining(&path, 42.125, 10), Ok(true));
        assert_eq!(load_remaining(&path), Some(42.125));
    }

    #[test]
    fn nan_and_zero_are_not_saved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.toml");
        assert_eq!(save_remaining(&path, f64::NAN, 1), Ok(false));
        assert_eq!(save_remaining(&path, 0.0, 1), Ok(false));
        assert!(!path.exists());
    }

    #[test]
    fn garbage_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.toml");
        std::fs::write(&path, "remaining = \"muito\"").unwrap();
        assert_eq!(load_remaining(&path), None);
        std::fs::write(&path, "remaining = -3.0\nsequence = 1").unwrap();
        assert_eq!(load_remaining(&path), None);
    }

    #[test]
    fn missing_file_is_none() {
        assert_eq!(load_remaining(Path::new("/nonexistent/bpc_state.toml")), None);
    }
}
