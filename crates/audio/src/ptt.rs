//! Push-to-Talk Steuerung
//!
//! `PttAbfrage` ist der Eingabe-Akteur: ein eigener Thread fragt in festem
//! Intervall (Standard 10 ms) den Tastenzustand ab und schreibt
//! ausschliesslich das `PttGate`. Unterstuetzt Hold (Taste halten) und
//! Toggle (Taste umschalten).

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{AudioError, AudioResult};
use crate::gate::PttGate;

/// Betriebsmodus fuer Push-to-Talk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PttModus {
    /// Taste halten um zu senden – loslassen stoppt Uebertragung
    #[default]
    Hold,
    /// Einmal druecken zum Aktivieren, nochmals zum Deaktivieren
    Toggle,
}

/// Abfragbarer Tastenzustand (Tastatur, GPIO, Terminal ...)
pub trait TastenAbfrage: Send + 'static {
    /// true solange die PTT-Taste gedrueckt ist
    fn ist_gedrueckt(&self) -> bool;
}

impl TastenAbfrage for Box<dyn TastenAbfrage> {
    fn ist_gedrueckt(&self) -> bool {
        (**self).ist_gedrueckt()
    }
}

/// Setzt abgetastete Tastenzustaende in den Sendezustand um
#[derive(Debug)]
pub struct PttController {
    modus: PttModus,
    /// Tastenzustand der vorigen Abtastung (Flankenerkennung fuer Toggle)
    vorher_gedrueckt: bool,
    toggle_aktiv: bool,
}

impl PttController {
    pub fn new(modus: PttModus) -> Self {
        Self {
            modus,
            vorher_gedrueckt: false,
            toggle_aktiv: false,
        }
    }

    /// Verarbeitet eine Abtastung und gibt den neuen Sendezustand zurueck
    pub fn abtasten(&mut self, gedrueckt: bool) -> bool {
        let flanke = gedrueckt && !self.vorher_gedrueckt;
        self.vorher_gedrueckt = gedrueckt;
        match self.modus {
            PttModus::Hold => gedrueckt,
            PttModus::Toggle => {
                if flanke {
                    self.toggle_aktiv = !self.toggle_aktiv;
                }
                self.toggle_aktiv
            }
        }
    }

    pub fn modus(&self) -> PttModus {
        self.modus
    }
}

/// Eingabe-Akteur: pollt die Taste in eigenem Thread und schreibt das Gate
pub struct PttAbfrage {
    laeuft: Arc<AtomicBool>,
    gate: PttGate,
    thread: Option<JoinHandle<()>>,
}

impl PttAbfrage {
    /// Startet den Abfrage-Thread
    pub fn starten<T: TastenAbfrage>(
        taste: T,
        gate: PttGate,
        modus: PttModus,
        intervall: Duration,
    ) -> AudioResult<Self> {
        if intervall.is_zero() {
            return Err(AudioError::Konfiguration(
                "PTT-Abfrageintervall darf nicht 0 sein".into(),
            ));
        }

        let laeuft = Arc::new(AtomicBool::new(true));
        let laeuft_thread = Arc::clone(&laeuft);
        let gate_thread = gate.clone();

        let thread = std::thread::Builder::new()
            .name("sprechfunk-ptt".to_string())
            .spawn(move || {
                let mut controller = PttController::new(modus);
                let mut zuletzt = false;
                while laeuft_thread.load(Ordering::Relaxed) {
                    let sendet = controller.abtasten(taste.ist_gedrueckt());
                    gate_thread.set_transmitting(sendet);
                    if sendet != zuletzt {
                        debug!(sendet, "PTT-Zustand gewechselt");
                        zuletzt = sendet;
                    }
                    std::thread::sleep(intervall);
                }
                gate_thread.set_transmitting(false);
                debug!("PTT-Abfrage-Thread beendet");
            })?;

        info!(?modus, intervall_ms = intervall.as_millis() as u64, "PTT-Abfrage gestartet");

        Ok(Self {
            laeuft,
            gate,
            thread: Some(thread),
        })
    }

    /// Stoppt den Thread und schliesst das Gate. Mehrfacher Aufruf ist harmlos.
    pub fn stoppen(&mut self) {
        self.laeuft.store(false, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
            info!("PTT-Abfrage gestoppt");
        }
        self.gate.set_transmitting(false);
    }

    pub fn laeuft(&self) -> bool {
        self.thread.is_some()
    }
}

impl Drop for PttAbfrage {
    fn drop(&mut self) {
        self.stoppen();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[derive(Clone, Default)]
    struct TestTaste(Arc<AtomicBool>);

    impl TastenAbfrage for TestTaste {
        fn ist_gedrueckt(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    fn warte_auf(gate: &PttGate, erwartet: bool) -> bool {
        let ende = Instant::now() + Duration::from_secs(2);
        while Instant::now() < ende {
            if gate.is_transmitting() == erwartet {
                return true;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        false
    }

    #[test]
    fn hold_sendet_nur_waehrend_taste_gedrueckt() {
        let mut ptt = PttController::new(PttModus::Hold);
        assert!(!ptt.abtasten(false));
        assert!(ptt.abtasten(true));
        assert!(ptt.abtasten(true));
        assert!(!ptt.abtasten(false));
    }

    #[test]
    fn toggle_wechselt_nur_bei_flanke() {
        let mut ptt = PttController::new(PttModus::Toggle);
        assert!(ptt.abtasten(true));
        // Gehaltene Taste schaltet nicht erneut um
        assert!(ptt.abtasten(true));
        assert!(ptt.abtasten(false));
        assert!(!ptt.abtasten(true));
        assert!(!ptt.abtasten(false));
    }

    #[test]
    fn default_modus_hold() {
        assert_eq!(PttController::new(PttModus::default()).modus(), PttModus::Hold);
    }

    #[test]
    fn abfrage_thread_folgt_taste() {
        let taste = TestTaste::default();
        let gate = PttGate::new();
        let mut abfrage = PttAbfrage::starten(
            taste.clone(),
            gate.clone(),
            PttModus::Hold,
            Duration::from_millis(1),
        )
        .unwrap();

        taste.0.store(true, Ordering::SeqCst);
        assert!(warte_auf(&gate, true), "Gate sollte sich oeffnen");
        taste.0.store(false, Ordering::SeqCst);
        assert!(warte_auf(&gate, false), "Gate sollte sich schliessen");

        abfrage.stoppen();
        abfrage.stoppen();
        assert!(!abfrage.laeuft());
    }

    #[test]
    fn stoppen_schliesst_gate() {
        let taste = TestTaste::default();
        taste.0.store(true, Ordering::SeqCst);
        let gate = PttGate::new();
        let mut abfrage =
            PttAbfrage::starten(taste, gate.clone(), PttModus::Hold, Duration::from_millis(1))
                .unwrap();
        assert!(warte_auf(&gate, true));
        abfrage.stoppen();
        assert!(!gate.is_transmitting());
    }

    #[test]
    fn intervall_null_abgelehnt() {
        let result = PttAbfrage::starten(
            TestTaste::default(),
            PttGate::new(),
            PttModus::Hold,
            Duration::ZERO,
        );
        assert!(matches!(result, Err(AudioError::Konfiguration(_))));
    }
}
