//! Terminal als PTT-Taste
//!
//! Ein Terminal liefert keine Loslass-Ereignisse. Jede Eingabezeile (Enter)
//! kippt daher den Zustand "gehalten". Bei EOF gilt die Taste als
//! losgelassen.

use sprechfunk_audio::TastenAbfrage;
use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Liest Enter-Druecke von stdin
pub struct StdinTaste {
    gehalten: Arc<AtomicBool>,
}

impl StdinTaste {
    /// Startet den Lese-Thread. Der Thread endet mit stdin.
    pub fn starten() -> std::io::Result<Self> {
        let gehalten = Arc::new(AtomicBool::new(false));
        let gehalten_thread = Arc::clone(&gehalten);

        std::thread::Builder::new()
            .name("sprechfunk-stdin".to_string())
            .spawn(move || {
                let stdin = std::io::stdin();
                for zeile in stdin.lock().lines() {
                    if zeile.is_err() {
                        break;
                    }
                    let jetzt = !gehalten_thread.load(Ordering::SeqCst);
                    gehalten_thread.store(jetzt, Ordering::SeqCst);
                    info!(sendet = jetzt, "Sprechtaste");
                }
                gehalten_thread.store(false, Ordering::SeqCst);
                debug!("stdin geschlossen, Sprechtaste losgelassen");
            })?;

        Ok(Self { gehalten })
    }
}

impl TastenAbfrage for StdinTaste {
    fn ist_gedrueckt(&self) -> bool {
        self.gehalten.load(Ordering::SeqCst)
    }
}
