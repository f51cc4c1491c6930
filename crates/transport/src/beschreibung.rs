//! Minimale SDP-Beschreibungen
//!
//! Die Engines tauschen SDP-foermigen Text aus. Ausgewertet werden nur:
//!
//! ```text
//! o=<name> <sitzung> ...     Sitzungskennung
//! c=IN IP4|IP6 <adresse>     Medienadresse
//! m=audio <port> ...         Medienport
//! a=ssrc:<ssrc>              Senderkennung
//! a=sendrecv|sendonly|recvonly|inactive
//! ```
//!
//! Alle anderen Zeilen werden beim Parsen ignoriert.

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use crate::error::{TransportError, TransportResult};

/// Opus-Payload-Typ im m=-Block
const OPUS_PAYLOAD_TYP: u8 = 111;

/// Medienrichtung aus Sicht des Beschreibenden
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Richtung {
    #[default]
    SendRecv,
    SendOnly,
    RecvOnly,
    Inactive,
}

impl Richtung {
    pub fn sendet(&self) -> bool {
        matches!(self, Richtung::SendRecv | Richtung::SendOnly)
    }

    pub fn empfaengt(&self) -> bool {
        matches!(self, Richtung::SendRecv | Richtung::RecvOnly)
    }

    fn aus_faehigkeiten(sendet: bool, empfaengt: bool) -> Self {
        match (sendet, empfaengt) {
            (true, true) => Richtung::SendRecv,
            (true, false) => Richtung::SendOnly,
            (false, true) => Richtung::RecvOnly,
            (false, false) => Richtung::Inactive,
        }
    }

    /// Richtung des Offers: mit ausgehendem Track wird gesendet, empfangen
    /// wird immer
    pub fn fuer_angebot(hat_track: bool) -> Self {
        Self::aus_faehigkeiten(hat_track, true)
    }

    /// Richtung der Answer: gespiegelt am Offer und begrenzt durch die
    /// eigenen Faehigkeiten
    pub fn fuer_antwort(angebot: Richtung, hat_track: bool) -> Self {
        Self::aus_faehigkeiten(hat_track && angebot.empfaengt(), angebot.sendet())
    }

    fn attribut(&self) -> &'static str {
        match self {
            Richtung::SendRecv => "sendrecv",
            Richtung::SendOnly => "sendonly",
            Richtung::RecvOnly => "recvonly",
            Richtung::Inactive => "inactive",
        }
    }
}

impl fmt::Display for Richtung {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.attribut())
    }
}

/// Ausgewerteter Inhalt einer Beschreibung
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MedienBeschreibung {
    pub sitzung: String,
    pub adresse: SocketAddr,
    pub ssrc: Option<u32>,
    pub richtung: Richtung,
}

impl MedienBeschreibung {
    /// Erzeugt den SDP-Text
    pub fn sdp(&self) -> String {
        let ip = self.adresse.ip();
        let familie = match ip {
            IpAddr::V4(_) => "IP4",
            IpAddr::V6(_) => "IP6",
        };
        let mut sdp = String::new();
        sdp.push_str("v=0\r\n");
        sdp.push_str(&format!(
            "o=sprechfunk {} 1 IN {familie} {ip}\r\n",
            self.sitzung
        ));
        sdp.push_str("s=sprechfunk\r\n");
        sdp.push_str(&format!("c=IN {familie} {ip}\r\n"));
        sdp.push_str("t=0 0\r\n");
        sdp.push_str(&format!(
            "m=audio {} RTP/AVP {OPUS_PAYLOAD_TYP}\r\n",
            self.adresse.port()
        ));
        sdp.push_str(&format!("a=rtpmap:{OPUS_PAYLOAD_TYP} opus/48000/1\r\n"));
        sdp.push_str("a=ptime:20\r\n");
        if let Some(ssrc) = self.ssrc {
            sdp.push_str(&format!("a=ssrc:{ssrc}\r\n"));
        }
        sdp.push_str(&format!("a={}\r\n", self.richtung));
        sdp
    }

    /// Parst SDP-Text. Fehlende c=- oder m=audio-Zeile ist ein Fehler.
    pub fn parsen(sdp: &str) -> TransportResult<Self> {
        let mut sitzung = None;
        let mut ip: Option<IpAddr> = None;
        let mut port: Option<u16> = None;
        let mut ssrc = None;
        let mut richtung = Richtung::default();

        for zeile in sdp.lines().map(str::trim) {
            if let Some(rest) = zeile.strip_prefix("o=") {
                sitzung = rest.split_whitespace().nth(1).map(str::to_string);
            } else if let Some(rest) = zeile.strip_prefix("c=") {
                let adresse = rest.split_whitespace().nth(2).ok_or_else(|| {
                    TransportError::UngueltigeBeschreibung(format!("c=-Zeile ohne Adresse: {zeile}"))
                })?;
                ip = Some(adresse.parse().map_err(|_| {
                    TransportError::UngueltigeBeschreibung(format!(
                        "ungueltige Adresse: {adresse}"
                    ))
                })?);
            } else if let Some(rest) = zeile.strip_prefix("m=audio ") {
                let wert = rest.split_whitespace().next().unwrap_or_default();
                port = Some(wert.parse().map_err(|_| {
                    TransportError::UngueltigeBeschreibung(format!("ungueltiger Port: {wert}"))
                })?);
            } else if let Some(rest) = zeile.strip_prefix("a=ssrc:") {
                ssrc = rest
                    .split_whitespace()
                    .next()
                    .and_then(|s| s.parse::<u32>().ok());
            } else {
                richtung = match zeile {
                    "a=sendrecv" => Richtung::SendRecv,
                    "a=sendonly" => Richtung::SendOnly,
                    "a=recvonly" => Richtung::RecvOnly,
                    "a=inactive" => Richtung::Inactive,
                    _ => richtung,
                };
            }
        }

        let ip = ip.ok_or_else(|| {
            TransportError::UngueltigeBeschreibung("keine c=-Zeile".into())
        })?;
        let port = port.ok_or_else(|| {
            TransportError::UngueltigeBeschreibung("kein m=audio-Block".into())
        })?;

        Ok(Self {
            sitzung: sitzung.unwrap_or_default(),
            adresse: SocketAddr::new(ip, port),
            ssrc,
            richtung,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn beispiel() -> MedienBeschreibung {
        MedienBeschreibung {
            sitzung: "abc123".into(),
            adresse: "192.168.1.20:40000".parse().unwrap(),
            ssrc: Some(4711),
            richtung: Richtung::SendOnly,
        }
    }

    #[test]
    fn erzeugter_text_wird_wieder_erkannt() {
        let b = beispiel();
        let sdp = b.sdp();
        assert!(sdp.starts_with("v=0\r\n"));
        assert!(sdp.contains("c=IN IP4 192.168.1.20\r\n"));
        assert!(sdp.contains("m=audio 40000 RTP/AVP 111\r\n"));
        assert_eq!(MedienBeschreibung::parsen(&sdp).unwrap(), b);
    }

    #[test]
    fn ipv6_adresse() {
        let mut b = beispiel();
        b.adresse = "[::1]:5000".parse().unwrap();
        let sdp = b.sdp();
        assert!(sdp.contains("c=IN IP6 ::1"));
        assert_eq!(MedienBeschreibung::parsen(&sdp).unwrap().adresse, b.adresse);
    }

    #[test]
    fn fremde_zeilen_werden_ignoriert() {
        let sdp = "v=0\nc=IN IP4 10.0.0.1\nb=AS:64\nm=audio 9 UDP/TLS/RTP/SAVPF 111\na=mid:0\n";
        let b = MedienBeschreibung::parsen(sdp).unwrap();
        assert_eq!(b.adresse, "10.0.0.1:9".parse().unwrap());
        assert_eq!(b.richtung, Richtung::SendRecv);
        assert_eq!(b.ssrc, None);
    }

    #[test]
    fn fehlende_pflichtzeilen() {
        assert!(MedienBeschreibung::parsen("v=0\r\nm=audio 9 RTP/AVP 111\r\n").is_err());
        assert!(MedienBeschreibung::parsen("v=0\r\nc=IN IP4 10.0.0.1\r\n").is_err());
        assert!(MedienBeschreibung::parsen("c=IN IP4 kein-ip\r\nm=audio 9 x\r\n").is_err());
        assert!(MedienBeschreibung::parsen("kein sdp").is_err());
    }

    #[test]
    fn antwort_richtung_spiegelt_angebot() {
        // Caller mit Mikrofon, Responder ohne
        let angebot = Richtung::fuer_angebot(true);
        assert_eq!(angebot, Richtung::SendRecv);
        assert_eq!(Richtung::fuer_antwort(angebot, false), Richtung::RecvOnly);

        assert_eq!(
            Richtung::fuer_antwort(Richtung::SendOnly, true),
            Richtung::RecvOnly
        );
        assert_eq!(
            Richtung::fuer_antwort(Richtung::RecvOnly, true),
            Richtung::SendOnly
        );
        assert_eq!(
            Richtung::fuer_antwort(Richtung::RecvOnly, false),
            Richtung::Inactive
        );
    }
}
