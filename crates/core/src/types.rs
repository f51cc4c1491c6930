//! Signaling-Typen fuer Sprechfunk
//!
//! Rollen der beiden Endpunkte, die drei Signaling-Themen, die
//! unveraenderliche `SignalingNachricht` und die Session-Beschreibung
//! (Offer/Answer-Text), die zwischen den Endpunkten ausgetauscht wird.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, SprechfunkError};

// ---------------------------------------------------------------------------
// Rolle
// ---------------------------------------------------------------------------

/// Rolle eines Endpunkts – wird bei der Konstruktion festgelegt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rolle {
    /// Erstellt das Offer und sendet Mikrofon-Audio (PTT)
    Caller,
    /// Beantwortet das Offer und spielt das empfangene Audio ab
    Responder,
}

impl Rolle {
    /// Themen, die diese Rolle beim Verbinden abonniert
    ///
    /// Der Caller abonniert nie das Offer-Thema, er sendet nur Offers.
    pub fn abonnierte_themen(&self) -> &'static [Thema] {
        match self {
            Rolle::Caller => &[Thema::Answer, Thema::IceCandidate],
            Rolle::Responder => &[Thema::Offer, Thema::IceCandidate],
        }
    }
}

impl fmt::Display for Rolle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rolle::Caller => f.write_str("caller"),
            Rolle::Responder => f.write_str("responder"),
        }
    }
}

impl FromStr for Rolle {
    type Err = SprechfunkError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "caller" => Ok(Rolle::Caller),
            "responder" => Ok(Rolle::Responder),
            anderes => Err(SprechfunkError::UnbekannteRolle(anderes.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Thema
// ---------------------------------------------------------------------------

/// Die drei Signaling-Nachrichtenarten
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Thema {
    /// Caller -> Responder, Session-Beschreibung vom Typ "offer"
    Offer,
    /// Responder -> Caller, Session-Beschreibung vom Typ "answer"
    Answer,
    /// Beide Richtungen, Kandidaten-Text (optional)
    IceCandidate,
}

impl fmt::Display for Thema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Thema::Offer => f.write_str("offer"),
            Thema::Answer => f.write_str("answer"),
            Thema::IceCandidate => f.write_str("ice-candidate"),
        }
    }
}

/// Fest vereinbarte Bus-Themennamen (beide Parteien muessen uebereinstimmen)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThemenNamen {
    pub offer: String,
    pub answer: String,
    pub ice_candidate: String,
}

impl Default for ThemenNamen {
    fn default() -> Self {
        Self {
            offer: "walkie-talkie/offer".into(),
            answer: "walkie-talkie/answer".into(),
            ice_candidate: "walkie-talkie/ice".into(),
        }
    }
}

impl ThemenNamen {
    /// Bus-Themenname fuer eine Nachrichtenart
    pub fn name(&self, thema: Thema) -> &str {
        match thema {
            Thema::Offer => &self.offer,
            Thema::Answer => &self.answer,
            Thema::IceCandidate => &self.ice_candidate,
        }
    }

    /// Ordnet einen empfangenen Bus-Themennamen einer Nachrichtenart zu
    pub fn thema(&self, name: &str) -> Option<Thema> {
        if name == self.offer {
            Some(Thema::Offer)
        } else if name == self.answer {
            Some(Thema::Answer)
        } else if name == self.ice_candidate {
            Some(Thema::IceCandidate)
        } else {
            None
        }
    }
}

// ---------------------------------------------------------------------------
// SignalingNachricht
// ---------------------------------------------------------------------------

/// Eine Signaling-Nachricht im Transit. Nach der Konstruktion unveraenderlich.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalingNachricht {
    thema: Thema,
    payload: String,
}

impl SignalingNachricht {
    pub fn neu(thema: Thema, payload: impl Into<String>) -> Self {
        Self {
            thema,
            payload: payload.into(),
        }
    }

    pub fn thema(&self) -> Thema {
        self.thema
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// Zerlegt die Nachricht in ihre Bestandteile
    pub fn into_teile(self) -> (Thema, String) {
        (self.thema, self.payload)
    }
}

/// Ausgehende Seite des Signaling-Kanals (fire-and-forget, hoechstens einmal)
pub trait SignalingAusgang: Send + Sync + 'static {
    /// Veroeffentlicht eine Nachricht auf dem fest vereinbarten Thema
    fn senden(&self, nachricht: SignalingNachricht) -> Result<()>;
}

// ---------------------------------------------------------------------------
// SessionBeschreibung
// ---------------------------------------------------------------------------

/// Typ einer Session-Beschreibung
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeschreibungsTyp {
    Offer,
    Answer,
}

impl fmt::Display for BeschreibungsTyp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BeschreibungsTyp::Offer => f.write_str("offer"),
            BeschreibungsTyp::Answer => f.write_str("answer"),
        }
    }
}

/// Opaker Beschreibungstext einer Partei samt Typ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionBeschreibung {
    typ: BeschreibungsTyp,
    sdp: String,
}

impl SessionBeschreibung {
    /// Erstellt eine Beschreibung. Leerer Text wird abgelehnt.
    pub fn neu(typ: BeschreibungsTyp, sdp: impl Into<String>) -> Result<Self> {
        let sdp = sdp.into();
        if sdp.trim().is_empty() {
            return Err(SprechfunkError::UngueltigeBeschreibung(format!(
                "leere {typ}-Beschreibung"
            )));
        }
        Ok(Self { typ, sdp })
    }

    pub fn offer(sdp: impl Into<String>) -> Result<Self> {
        Self::neu(BeschreibungsTyp::Offer, sdp)
    }

    pub fn answer(sdp: impl Into<String>) -> Result<Self> {
        Self::neu(BeschreibungsTyp::Answer, sdp)
    }

    pub fn typ(&self) -> BeschreibungsTyp {
        self.typ
    }

    pub fn sdp(&self) -> &str {
        &self.sdp
    }
}

// ---------------------------------------------------------------------------
// Verbindungszustand
// ---------------------------------------------------------------------------

/// Vom Transport gemeldeter Lebenszyklus der Verbindung
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbindungszustand {
    #[default]
    Neu,
    Verbindend,
    Verbunden,
    Getrennt,
    Fehlgeschlagen,
    Geschlossen,
}

impl fmt::Display for Verbindungszustand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Verbindungszustand::Neu => "new",
            Verbindungszustand::Verbindend => "connecting",
            Verbindungszustand::Verbunden => "connected",
            Verbindungszustand::Getrennt => "disconnected",
            Verbindungszustand::Fehlgeschlagen => "failed",
            Verbindungszustand::Geschlossen => "closed",
        };
        f.write_str(s)
    }
}
