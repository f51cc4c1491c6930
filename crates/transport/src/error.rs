//! Fehlertypen fuer die Transport-Engines

use sprechfunk_audio::AudioError;
use sprechfunk_core::SprechfunkError;
use thiserror::Error;

/// Fehler einer Transport-Engine
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Falsche Reihenfolge: {0}")]
    FalscheReihenfolge(String),

    #[error("Ungueltige Beschreibung: {0}")]
    UngueltigeBeschreibung(String),

    #[error("Ungueltiges Medienpaket: {0}")]
    UngueltigesPaket(String),

    #[error("Engine ist geschlossen")]
    Geschlossen,

    #[error("Codec-Fehler: {0}")]
    Codec(#[from] AudioError),

    #[error(transparent)]
    Kern(#[from] SprechfunkError),

    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),
}

pub type TransportResult<T> = std::result::Result<T, TransportError>;
