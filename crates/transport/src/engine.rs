//! Schnittstelle der Transport-Engine
//!
//! Die Session spricht ausschliesslich ueber `TransportEngine` mit dem
//! Medienpfad. Zustandswechsel und eingehende Tracks meldet die Engine
//! asynchron ueber eine Ereignis-Queue, die die Session einmalig abholt.

use async_trait::async_trait;
use parking_lot::Mutex;
use sprechfunk_core::{EingehenderTrack, FrameQuelle, SessionBeschreibung, Verbindungszustand};
use std::fmt;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::TransportResult;

/// Asynchrone Meldung der Engine an die Session
pub enum TransportEreignis {
    /// Neuer Verbindungszustand (nur bei tatsaechlicher Aenderung)
    Verbindungszustand(Verbindungszustand),
    /// Die Gegenstelle sendet Audio auf diesem Track
    EingehenderTrack(Box<dyn EingehenderTrack>),
}

impl fmt::Debug for TransportEreignis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportEreignis::Verbindungszustand(z) => {
                f.debug_tuple("Verbindungszustand").field(z).finish()
            }
            TransportEreignis::EingehenderTrack(t) => {
                f.debug_tuple("EingehenderTrack").field(&t.id()).finish()
            }
        }
    }
}

pub type EreignisEmpfaenger = mpsc::UnboundedReceiver<TransportEreignis>;

/// Echtzeit-Transport einer Session
#[async_trait]
pub trait TransportEngine: Send + 'static {
    /// Erstellt ein lokales Offer
    async fn angebot_erstellen(&mut self) -> TransportResult<SessionBeschreibung>;

    /// Erstellt eine lokale Answer (entfernte Beschreibung muss gesetzt sein)
    async fn antwort_erstellen(&mut self) -> TransportResult<SessionBeschreibung>;

    async fn lokale_beschreibung_setzen(
        &mut self,
        beschreibung: SessionBeschreibung,
    ) -> TransportResult<()>;

    async fn entfernte_beschreibung_setzen(
        &mut self,
        beschreibung: SessionBeschreibung,
    ) -> TransportResult<()>;

    /// Uebergibt einen Trickle-Kandidaten der Gegenstelle
    async fn kandidat_hinzufuegen(&mut self, kandidat: &str) -> TransportResult<()>;

    /// Registriert die Quelle des ausgehenden Audio-Tracks (vor dem Offer)
    fn ausgehenden_track_hinzufuegen(&mut self, quelle: Box<dyn FrameQuelle>)
        -> TransportResult<()>;

    /// Gibt die Ereignis-Queue heraus (nur beim ersten Aufruf `Some`)
    fn ereignisse(&mut self) -> Option<EreignisEmpfaenger>;

    /// Beendet den Medienpfad. Mehrfacher Aufruf ist ein No-op.
    async fn schliessen(&mut self) -> TransportResult<()>;
}

// ---------------------------------------------------------------------------
// ZustandsMelder
// ---------------------------------------------------------------------------

/// Haelt den aktuellen Verbindungszustand und meldet nur Aenderungen.
///
/// Nach `Geschlossen` werden keine weiteren Zustaende gemeldet.
pub(crate) struct ZustandsMelder {
    aktuell: Mutex<Verbindungszustand>,
    tx: mpsc::UnboundedSender<TransportEreignis>,
    name: &'static str,
}

impl ZustandsMelder {
    pub(crate) fn neu(name: &'static str) -> (Self, EreignisEmpfaenger) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                aktuell: Mutex::new(Verbindungszustand::Neu),
                tx,
                name,
            },
            rx,
        )
    }

    /// Meldet `neu`, falls er sich vom aktuellen Zustand unterscheidet
    pub(crate) fn melden(&self, neu: Verbindungszustand) -> bool {
        let mut aktuell = self.aktuell.lock();
        if *aktuell == neu || *aktuell == Verbindungszustand::Geschlossen {
            return false;
        }
        info!(engine = self.name, von = %*aktuell, nach = %neu, "Verbindungszustand");
        *aktuell = neu;
        if self
            .tx
            .send(TransportEreignis::Verbindungszustand(neu))
            .is_err()
        {
            debug!(engine = self.name, "Ereignis-Queue geschlossen");
        }
        true
    }

    pub(crate) fn aktuell(&self) -> Verbindungszustand {
        *self.aktuell.lock()
    }

    pub(crate) fn track_melden(&self, track: Box<dyn EingehenderTrack>) {
        info!(engine = self.name, track = %track.id(), "Eingehender Track");
        if self
            .tx
            .send(TransportEreignis::EingehenderTrack(track))
            .is_err()
        {
            debug!(engine = self.name, "Ereignis-Queue geschlossen");
        }
    }
}
