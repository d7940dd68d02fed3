//! Formatação de snapshots para o log do console.

use bpc_core::Snapshot;

/// Valor numérico ou `—` para NaN.
fn num(v: f64, decimals: usize) -> String {
    if v.is_nan() {
        "—".into()
    } else {
        format!("{v:.decimals$}")
    }
}

/// Dias até o limite; `∞` quando não há projeção.
fn days(v: f64) -> String {
    if v.is_infinite() || v.is_nan() {
        "∞".into()
    } else {
        format!("{v:.2} d")
    }
}

/// Linha resumida de um ciclo.
pub fn summary(s: &Snapshot) -> String {
    let c = &s.channels;
    let status = match s.fault {
        Some(kind) => format!("FALHA ({kind})"),
        None => "OK".into(),
    };
    format!(
        "#{} {} | P {} mbar | Fluxo {} l/min | Válvula {} % | Recup. {} l/d | Usado {} l | Restante {} l | Limite em {}",
        s.sequence,
        status,
        num(f64::from(c.pressure()), 2),
        num(s.corrected_flow, 3),
        num(f64::from(c.valve()), 1),
        num(s.recovered, 3),
        num(s.cumulative_used, 4),
        num(s.remaining, 4),
        days(s.time_to_threshold),
    )
}
