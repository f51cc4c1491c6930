//! Fehlertypen fuer Signaling und Session

use sprechfunk_core::SprechfunkError;
use sprechfunk_transport::TransportError;
use thiserror::Error;

/// Fehlertyp fuer Bus, Session und Executor
#[derive(Debug, Error)]
pub enum SignalingError {
    /// Ereignis passt nicht zum Session-Zustand oder zur Rolle
    #[error("Falscher Zustand: {0}")]
    FalscherZustand(String),

    /// Beschreibung leer oder nicht auswertbar
    #[error("Ungueltige Beschreibung: {0}")]
    UngueltigeBeschreibung(String),

    /// Fehler der Transport-Engine
    #[error("Transportfehler: {0}")]
    Transport(TransportError),

    /// Bus nicht verbunden, Nachricht verworfen
    #[error("Bus nicht verbunden")]
    BusGetrennt,

    /// Executor laeuft nicht mehr
    #[error("Session-Executor beendet")]
    ExecutorBeendet,

    #[error(transparent)]
    Kern(SprechfunkError),
}

impl SignalingError {
    pub fn falscher_zustand(msg: impl Into<String>) -> Self {
        Self::FalscherZustand(msg.into())
    }

    /// true fuer Verhandlungsfehler (Ereignis verworfen, Zustand unveraendert)
    pub fn ist_verhandlungsfehler(&self) -> bool {
        matches!(
            self,
            Self::FalscherZustand(_) | Self::UngueltigeBeschreibung(_)
        )
    }
}

impl From<TransportError> for SignalingError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::UngueltigeBeschreibung(msg) => Self::UngueltigeBeschreibung(msg),
            TransportError::FalscheReihenfolge(msg) => Self::FalscherZustand(msg),
            TransportError::Kern(kern) => kern.into(),
            andere => Self::Transport(andere),
        }
    }
}

impl From<SprechfunkError> for SignalingError {
    fn from(e: SprechfunkError) -> Self {
        match e {
            SprechfunkError::UngueltigeBeschreibung(msg) => Self::UngueltigeBeschreibung(msg),
            andere => Self::Kern(andere),
        }
    }
}

/// Result-Typ fuer Signaling
pub type SignalingResult<T> = Result<T, SignalingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn beschreibungsfehler_werden_zusammengefuehrt() {
        let aus_transport: SignalingError =
            TransportError::UngueltigeBeschreibung("keine c=-Zeile".into()).into();
        assert!(matches!(
            aus_transport,
            SignalingError::UngueltigeBeschreibung(_)
        ));

        let aus_kern: SignalingError =
            SprechfunkError::UngueltigeBeschreibung("leer".into()).into();
        assert!(aus_kern.ist_verhandlungsfehler());

        let reihenfolge: SignalingError =
            TransportError::FalscheReihenfolge("doppelt".into()).into();
        assert!(reihenfolge.ist_verhandlungsfehler());
        assert!(!SignalingError::BusGetrennt.ist_verhandlungsfehler());
    }
}
