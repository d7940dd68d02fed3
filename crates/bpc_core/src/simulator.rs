//! Controlador simulado para modo debug (sem hardware).
//!
//! Gera valores plausíveis a cada leitura: pressão em torno de 25 mbar,
//! fluxo entre 0 e 5 l/min, válvula entre 0 e 100 %; os demais canais em
//! [0, 1).

use crate::client::ChannelSource;
use crate::types::{CHANNEL_COUNT, Channels, FLOW_CHANNEL, PRESSURE_CHANNEL, Reading, VALVE_CHANNEL};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

/// Fonte de canais aleatórios com semente opcional.
pub struct SimulatedController {
    rng: StdRng,
    reads: u64,
}

impl SimulatedController {
    /// `seed == 0` usa entropia do sistema; caso contrário é determinístico.
    pub fn new(seed: u64) -> Self {
        let rng = if seed == 0 {
            StdRng::from_entropy()
        } else {
            StdRng::seed_from_u64(seed)
        };
        Self { rng, reads: 0 }
    }

    pub fn reads(&self) -> u64 {
        self.reads
    }

    fn sample(&mut self) -> Channels {
        let mut raw = [0.0f32; CHANNEL_COUNT];
        for v in raw.iter_mut() {
            *v = self.rng.gen_range(0.0..1.0);
        }
        raw[PRESSURE_CHANNEL] = self.rng.gen_range(24.5..=25.5);
        raw[VALVE_CHANNEL] = self.rng.gen_range(0.0..=100.0);
        raw[FLOW_CHANNEL] = self.rng.gen_range(0.0..=5.0);
        Channels::new(raw)
    }
}

impl ChannelSource for SimulatedController {
    fn read(&mut self) -> Reading {
        self.reads += 1;
        Reading::Sample(self.sample())
    }

    fn close(&mut self) {
        debug!("Simulador encerrado após {} leituras", self.reads);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_stay_in_physical_ranges() {
        let mut sim = SimulatedController::new(7);
        for _ in 0..500 {
            let c = sim.read().channels();
            assert!((24.5..=25.5).contains(&c.pressure()));
            assert!((0.0..=5.0).contains(&c.flow()));
            assert!((0.0..=100.0).contains(&c.valve()));
            assert!((0.0..1.0).contains(&c.values()[0]));
        }
        assert_eq!(sim.reads(), 500);
    }

    #[test]
    fn seeded_simulator_is_deterministic() {
        let mut a = SimulatedController::new(42);
        let mut b = SimulatedController::new(42);
        for _ in 0..20 {
            assert_eq!(a.read(), b.read());
        }
    }
}
