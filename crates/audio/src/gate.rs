//! PTT-Gate – geteilter Sende-Schalter
//!
//! Einziger veraenderlicher Zustand, der Akteur-Grenzen ueberschreitet:
//! der PTT-Abfrage-Thread schreibt, die Audio-Quelle liest bei jedem
//! Frame. Pegelgesteuert – Leser sehen immer den aktuellen Wert, keine
//! Historie von Umschaltungen.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Wait-free Sende-Schalter. Clone teilt denselben Schalter.
#[derive(Debug, Clone, Default)]
pub struct PttGate {
    transmitting: Arc<AtomicBool>,
}

impl PttGate {
    /// Neues Gate, geschlossen (sendet nicht)
    pub fn new() -> Self {
        Self::default()
    }

    /// Ueberschreibt den Zustand
    pub fn set_transmitting(&self, active: bool) {
        self.transmitting.store(active, Ordering::SeqCst);
    }

    /// Gibt zurueck ob aktuell gesendet wird
    pub fn is_transmitting(&self) -> bool {
        self.transmitting.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_startet_geschlossen() {
        assert!(!PttGate::new().is_transmitting());
    }

    #[test]
    fn gate_liest_letzten_wert() {
        let gate = PttGate::new();
        gate.set_transmitting(true);
        gate.set_transmitting(true);
        assert!(gate.is_transmitting());
        gate.set_transmitting(false);
        assert!(!gate.is_transmitting());
    }

    #[test]
    fn klone_teilen_zustand() {
        let gate = PttGate::new();
        let leser = gate.clone();
        gate.set_transmitting(true);
        assert!(leser.is_transmitting());
    }

    #[test]
    fn gate_ueber_threads() {
        let gate = PttGate::new();
        let schreiber = gate.clone();
        std::thread::spawn(move || schreiber.set_transmitting(true))
            .join()
            .unwrap();
        assert!(gate.is_transmitting());
    }
}
