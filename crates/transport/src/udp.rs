//! UDP-Transport-Engine
//!
//! Referenz-Engine ohne externen WebRTC-Stack: die Beschreibungen tragen
//! die UDP-Adresse beider Seiten, Audio laeuft als Opus in Medienpaketen.
//!
//! ## Ablauf
//!
//! ```text
//! beide Beschreibungen gesetzt  -> Verbindend, Tasks starten
//!     |
//!     +--> Sende-Task: alle 20 ms ein Frame (oder Keepalive) an die Gegenstelle
//!     +--> Empfangs-Task: Pakete dekodieren -> eingehender Track
//!
//! erstes Paket der Gegenstelle           -> Verbunden
//! kein Paket fuer verbindungs_timeout    -> Getrennt (erholt sich beim naechsten Paket)
//! nie verbunden innerhalb aufbau_timeout -> Fehlgeschlagen
//! schliessen()                           -> Geschlossen
//! ```

use async_trait::async_trait;
use sprechfunk_audio::codec::{OpusDecoder, OpusEncoder, STANDARD_BITRATE_BPS};
use sprechfunk_core::{
    AudioFrame, BeschreibungsTyp, FrameQuelle, SessionBeschreibung, Verbindungszustand, CHUNK,
    FRAME_DAUER,
};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc::error::TrySendError, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::beschreibung::{MedienBeschreibung, Richtung};
use crate::engine::{EreignisEmpfaenger, TransportEngine, ZustandsMelder};
use crate::error::{TransportError, TransportResult};
use crate::packet::{MedienPaket, PaketFlags, PaketKopf, PaketTyp};
use crate::track::{track_kanal, TrackSender};

/// Header 16 + Max-Payload 1280 + Puffer
const UDP_PUFFER_GROESSE: usize = 1400;

/// Takt der Timeout-Pruefung
const PRUEF_INTERVALL: Duration = Duration::from_millis(100);

/// Groesste Luecke, die per Packet Loss Concealment ueberbrueckt wird
const MAX_PLC_FRAMES: u32 = 3;

// ---------------------------------------------------------------------------
// Konfiguration
// ---------------------------------------------------------------------------

/// Konfiguration der UDP-Engine
#[derive(Debug, Clone)]
pub struct UdpKonfig {
    /// Lokale Bind-Adresse (Port 0 = beliebig)
    pub bind_adresse: SocketAddr,
    /// In der Beschreibung angekuendigte IP (None = automatisch)
    pub angekuendigte_ip: Option<IpAddr>,
    pub verbindungs_timeout: Duration,
    pub aufbau_timeout: Duration,
    /// Keepalive-Takt, wenn kein Audio gesendet wird
    pub keepalive_intervall: Duration,
    pub bitrate_bps: i32,
}

impl Default for UdpKonfig {
    fn default() -> Self {
        Self {
            bind_adresse: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            angekuendigte_ip: None,
            verbindungs_timeout: Duration::from_secs(5),
            aufbau_timeout: Duration::from_secs(15),
            keepalive_intervall: Duration::from_millis(500),
            bitrate_bps: STANDARD_BITRATE_BPS,
        }
    }
}

/// Ermittelt die IP der Standardroute. Es wird kein Paket gesendet.
fn lokale_ip_ermitteln() -> IpAddr {
    let ermittelt = std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        .and_then(|s| s.connect((Ipv4Addr::new(192, 0, 2, 1), 9)).map(|_| s))
        .and_then(|s| s.local_addr());
    match ermittelt {
        Ok(adresse) if !adresse.ip().is_unspecified() => adresse.ip(),
        _ => {
            warn!("Keine Standardroute gefunden, kuendige 127.0.0.1 an");
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }
    }
}

// ---------------------------------------------------------------------------
// UdpEngine
// ---------------------------------------------------------------------------

/// Transport-Engine ueber einen einzelnen UDP-Socket
pub struct UdpEngine {
    konfig: UdpKonfig,
    socket: Arc<UdpSocket>,
    angekuendigt: SocketAddr,
    sitzung: String,
    ssrc: u32,
    quelle: Option<Box<dyn FrameQuelle>>,
    lokal: Option<MedienBeschreibung>,
    entfernt: Option<MedienBeschreibung>,
    melder: Arc<ZustandsMelder>,
    ereignisse: Option<EreignisEmpfaenger>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    geschlossen: bool,
}

impl UdpEngine {
    /// Bindet den Socket. Die Medien-Tasks starten erst, wenn beide
    /// Beschreibungen gesetzt sind.
    pub async fn binden(konfig: UdpKonfig) -> TransportResult<Self> {
        let socket = UdpSocket::bind(konfig.bind_adresse).await?;
        let gebunden = socket.local_addr()?;
        let ip = match konfig.angekuendigte_ip {
            Some(ip) => ip,
            None if gebunden.ip().is_unspecified() => lokale_ip_ermitteln(),
            None => gebunden.ip(),
        };
        let angekuendigt = SocketAddr::new(ip, gebunden.port());

        let id = uuid::Uuid::new_v4();
        let ssrc = id.as_u128() as u32;
        let sitzung = id.simple().to_string();

        let (melder, ereignisse) = ZustandsMelder::neu("udp");
        let (shutdown_tx, _) = watch::channel(false);

        info!(gebunden = %gebunden, angekuendigt = %angekuendigt, ssrc, "UDP-Engine gebunden");

        Ok(Self {
            konfig,
            socket: Arc::new(socket),
            angekuendigt,
            sitzung,
            ssrc,
            quelle: None,
            lokal: None,
            entfernt: None,
            melder: Arc::new(melder),
            ereignisse: Some(ereignisse),
            shutdown_tx,
            tasks: Vec::new(),
            geschlossen: false,
        })
    }

    /// In den Beschreibungen angekuendigte Medienadresse
    pub fn lokale_adresse(&self) -> SocketAddr {
        self.angekuendigt
    }

    pub fn zustand(&self) -> Verbindungszustand {
        self.melder.aktuell()
    }

    fn offen_pruefen(&self) -> TransportResult<()> {
        if self.geschlossen {
            return Err(TransportError::Geschlossen);
        }
        Ok(())
    }

    fn beschreibung(&self, richtung: Richtung) -> MedienBeschreibung {
        MedienBeschreibung {
            sitzung: self.sitzung.clone(),
            adresse: self.angekuendigt,
            ssrc: Some(self.ssrc),
            richtung,
        }
    }

    fn verbindung_pruefen(&mut self) -> TransportResult<()> {
        if !self.tasks.is_empty() {
            return Ok(());
        }
        let (Some(lokal), Some(entfernt)) = (self.lokal.clone(), self.entfernt.clone()) else {
            return Ok(());
        };
        self.medien_starten(lokal, entfernt)
    }

    fn medien_starten(
        &mut self,
        lokal: MedienBeschreibung,
        entfernt: MedienBeschreibung,
    ) -> TransportResult<()> {
        let empfangen = entfernt.richtung.sendet() && lokal.richtung.empfaengt();
        let senden = lokal.richtung.sendet() && entfernt.richtung.empfaengt();

        // Codecs zuerst, damit ein Fehler keinen halb gemeldeten Track hinterlaesst
        let decoder = if empfangen {
            Some(OpusDecoder::new()?)
        } else {
            None
        };
        let encoder = if senden && self.quelle.is_some() {
            Some(OpusEncoder::new(self.konfig.bitrate_bps)?)
        } else {
            None
        };
        let quelle = if encoder.is_some() {
            self.quelle.take()
        } else {
            None
        };

        self.melder.melden(Verbindungszustand::Verbindend);

        let track_tx = match decoder {
            Some(_) => {
                let id = format!("audio-{}", entfernt.ssrc.unwrap_or_default());
                let (tx, track) = track_kanal(id);
                self.melder.track_melden(Box::new(track));
                Some(tx)
            }
            None => None,
        };

        info!(
            ziel = %entfernt.adresse,
            lokal = %lokal.richtung,
            entfernt = %entfernt.richtung,
            "Medienpfad startet"
        );

        let empfaenger = Empfaenger {
            socket: Arc::clone(&self.socket),
            melder: Arc::clone(&self.melder),
            erwartete_ssrc: entfernt.ssrc,
            track_tx,
            decoder,
            letzte_sequenz: None,
            frames: 0,
            verbindungs_timeout: self.konfig.verbindungs_timeout,
            aufbau_timeout: self.konfig.aufbau_timeout,
        };
        self.tasks
            .push(tokio::spawn(empfaenger.laufen(self.shutdown_tx.subscribe())));

        let sender = Sender {
            socket: Arc::clone(&self.socket),
            ziel: entfernt.adresse,
            ssrc: self.ssrc,
            sequenz: 0,
            quelle,
            encoder,
            keepalive_intervall: self.konfig.keepalive_intervall,
        };
        self.tasks
            .push(tokio::spawn(sender.laufen(self.shutdown_tx.subscribe())));

        Ok(())
    }
}

#[async_trait]
impl TransportEngine for UdpEngine {
    async fn angebot_erstellen(&mut self) -> TransportResult<SessionBeschreibung> {
        self.offen_pruefen()?;
        if self.lokal.is_some() || self.entfernt.is_some() {
            return Err(TransportError::FalscheReihenfolge(
                "Offer nach begonnener Verhandlung".into(),
            ));
        }
        let beschreibung = self.beschreibung(Richtung::fuer_angebot(self.quelle.is_some()));
        Ok(SessionBeschreibung::offer(beschreibung.sdp())?)
    }

    async fn antwort_erstellen(&mut self) -> TransportResult<SessionBeschreibung> {
        self.offen_pruefen()?;
        let angebot = self.entfernt.as_ref().ok_or_else(|| {
            TransportError::FalscheReihenfolge("Answer ohne entferntes Offer".into())
        })?;
        let richtung = Richtung::fuer_antwort(angebot.richtung, self.quelle.is_some());
        let beschreibung = self.beschreibung(richtung);
        Ok(SessionBeschreibung::answer(beschreibung.sdp())?)
    }

    async fn lokale_beschreibung_setzen(
        &mut self,
        beschreibung: SessionBeschreibung,
    ) -> TransportResult<()> {
        self.offen_pruefen()?;
        if self.lokal.is_some() {
            return Err(TransportError::FalscheReihenfolge(
                "lokale Beschreibung bereits gesetzt".into(),
            ));
        }
        if beschreibung.typ() == BeschreibungsTyp::Answer && self.entfernt.is_none() {
            return Err(TransportError::FalscheReihenfolge(
                "lokale Answer ohne entferntes Offer".into(),
            ));
        }
        let medien = MedienBeschreibung::parsen(beschreibung.sdp())?;
        self.lokal = Some(medien);
        if let Err(e) = self.verbindung_pruefen() {
            self.lokal = None;
            return Err(e);
        }
        debug!(typ = %beschreibung.typ(), "Lokale Beschreibung gesetzt");
        Ok(())
    }

    async fn entfernte_beschreibung_setzen(
        &mut self,
        beschreibung: SessionBeschreibung,
    ) -> TransportResult<()> {
        self.offen_pruefen()?;
        if self.entfernt.is_some() {
            return Err(TransportError::FalscheReihenfolge(
                "entfernte Beschreibung bereits gesetzt".into(),
            ));
        }
        match (beschreibung.typ(), self.lokal.is_some()) {
            (BeschreibungsTyp::Answer, false) => {
                return Err(TransportError::FalscheReihenfolge(
                    "entfernte Answer ohne lokales Offer".into(),
                ))
            }
            (BeschreibungsTyp::Offer, true) => {
                return Err(TransportError::FalscheReihenfolge(
                    "entferntes Offer nach eigenem Offer".into(),
                ))
            }
            _ => {}
        }
        let medien = MedienBeschreibung::parsen(beschreibung.sdp())?;
        let adresse = medien.adresse;
        self.entfernt = Some(medien);
        if let Err(e) = self.verbindung_pruefen() {
            self.entfernt = None;
            return Err(e);
        }
        debug!(typ = %beschreibung.typ(), adresse = %adresse, "Entfernte Beschreibung gesetzt");
        Ok(())
    }

    async fn kandidat_hinzufuegen(&mut self, kandidat: &str) -> TransportResult<()> {
        self.offen_pruefen()?;
        // Die Adresse steht bereits in der Beschreibung
        debug!(kandidat, "Kandidat ignoriert");
        Ok(())
    }

    fn ausgehenden_track_hinzufuegen(
        &mut self,
        quelle: Box<dyn FrameQuelle>,
    ) -> TransportResult<()> {
        self.offen_pruefen()?;
        if self.lokal.is_some() || self.quelle.is_some() {
            return Err(TransportError::FalscheReihenfolge(
                "ausgehender Track nur einmal und vor dem Offer".into(),
            ));
        }
        self.quelle = Some(quelle);
        Ok(())
    }

    fn ereignisse(&mut self) -> Option<EreignisEmpfaenger> {
        self.ereignisse.take()
    }

    async fn schliessen(&mut self) -> TransportResult<()> {
        if self.geschlossen {
            debug!("UDP-Engine bereits geschlossen");
            return Ok(());
        }
        self.geschlossen = true;
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!(fehler = %e, "Medien-Task abgebrochen");
            }
        }
        self.quelle = None;
        self.melder.melden(Verbindungszustand::Geschlossen);
        info!("UDP-Engine geschlossen");
        Ok(())
    }
}

impl Drop for UdpEngine {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

// ---------------------------------------------------------------------------
// Sende-Task
// ---------------------------------------------------------------------------

struct Sender {
    socket: Arc<UdpSocket>,
    ziel: SocketAddr,
    ssrc: u32,
    sequenz: u32,
    quelle: Option<Box<dyn FrameQuelle>>,
    encoder: Option<OpusEncoder>,
    keepalive_intervall: Duration,
}

impl Sender {
    async fn laufen(mut self, mut shutdown: watch::Receiver<bool>) {
        let takt = if self.quelle.is_some() {
            FRAME_DAUER
        } else {
            self.keepalive_intervall
        };
        let mut intervall = tokio::time::interval(takt);
        intervall.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = intervall.tick() => {
                    let bytes = match self.naechstes_paket().and_then(|p| p.encode()) {
                        Ok(bytes) => bytes,
                        Err(e) => {
                            warn!(fehler = %e, "Paket verworfen");
                            continue;
                        }
                    };
                    match self.socket.send_to(&bytes, self.ziel).await {
                        Ok(_) => trace!(bytes = bytes.len(), ziel = %self.ziel, "Paket gesendet"),
                        Err(e) => warn!(fehler = %e, ziel = %self.ziel, "UDP-Sendefehler"),
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        debug!(ziel = %self.ziel, pakete = self.sequenz, "Sende-Task beendet");
    }

    fn naechstes_paket(&mut self) -> TransportResult<MedienPaket> {
        self.sequenz = self.sequenz.wrapping_add(1);
        let (Some(quelle), Some(encoder)) = (self.quelle.as_mut(), self.encoder.as_mut()) else {
            return Ok(MedienPaket {
                kopf: PaketKopf::neu(PaketTyp::Keepalive, 0, self.sequenz, 0, self.ssrc),
                nutzdaten: Vec::new(),
            });
        };

        let frame = quelle.naechster_frame();
        let zeitstempel = frame.pts() as u32;
        if frame.ist_stille() {
            return Ok(MedienPaket {
                kopf: PaketKopf::neu(
                    PaketTyp::Audio,
                    PaketFlags::STILLE,
                    self.sequenz,
                    zeitstempel,
                    self.ssrc,
                ),
                nutzdaten: Vec::new(),
            });
        }
        let nutzdaten = encoder.encode(&frame)?;
        Ok(MedienPaket {
            kopf: PaketKopf::neu(PaketTyp::Audio, 0, self.sequenz, zeitstempel, self.ssrc),
            nutzdaten,
        })
    }
}

// ---------------------------------------------------------------------------
// Empfangs-Task
// ---------------------------------------------------------------------------

struct Empfaenger {
    socket: Arc<UdpSocket>,
    melder: Arc<ZustandsMelder>,
    erwartete_ssrc: Option<u32>,
    track_tx: Option<TrackSender>,
    decoder: Option<OpusDecoder>,
    letzte_sequenz: Option<u32>,
    frames: u64,
    verbindungs_timeout: Duration,
    aufbau_timeout: Duration,
}

impl Empfaenger {
    async fn laufen(mut self, mut shutdown: watch::Receiver<bool>) {
        // Wiederverwendeter Empfangspuffer
        let mut buf = [0u8; UDP_PUFFER_GROESSE];
        let gestartet = Instant::now();
        let mut letztes_paket: Option<Instant> = None;
        let mut pruefung = tokio::time::interval(PRUEF_INTERVALL);
        pruefung.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                ergebnis = self.socket.recv_from(&mut buf) => match ergebnis {
                    Ok((len, absender)) => {
                        if self.paket_verarbeiten(&buf[..len], absender) {
                            letztes_paket = Some(Instant::now());
                            self.melder.melden(Verbindungszustand::Verbunden);
                        }
                    }
                    Err(e) => {
                        warn!(fehler = %e, "UDP-Empfangsfehler");
                        tokio::time::sleep(Duration::from_millis(1)).await;
                    }
                },
                _ = pruefung.tick() => match letztes_paket {
                    Some(zeit) if zeit.elapsed() > self.verbindungs_timeout => {
                        self.melder.melden(Verbindungszustand::Getrennt);
                    }
                    None if gestartet.elapsed() > self.aufbau_timeout => {
                        self.melder.melden(Verbindungszustand::Fehlgeschlagen);
                        break;
                    }
                    _ => {}
                },
                _ = shutdown.changed() => break,
            }
        }
        debug!(frames = self.frames, "Empfangs-Task beendet");
    }

    /// Verarbeitet ein Paket. true = gueltiges Paket der Gegenstelle.
    fn paket_verarbeiten(&mut self, daten: &[u8], absender: SocketAddr) -> bool {
        let paket = match MedienPaket::decode(daten) {
            Ok(p) => p,
            Err(e) => {
                debug!(fehler = %e, absender = %absender, "Ungueltiges Medienpaket");
                return false;
            }
        };
        if let Some(erwartet) = self.erwartete_ssrc {
            if paket.kopf.ssrc != erwartet {
                debug!(ssrc = paket.kopf.ssrc, erwartet, absender = %absender, "Fremde SSRC");
                return false;
            }
        }
        if paket.kopf.typ == PaketTyp::Audio {
            self.audio_verarbeiten(paket);
        }
        true
    }

    fn audio_verarbeiten(&mut self, paket: MedienPaket) {
        let (Some(tx), Some(decoder)) = (self.track_tx.as_ref(), self.decoder.as_mut()) else {
            return;
        };

        let sequenz = paket.kopf.sequenz;
        let mut fehlend = 0;
        if let Some(letzte) = self.letzte_sequenz {
            let abstand = sequenz.wrapping_sub(letzte);
            if abstand == 0 || abstand > u32::MAX / 2 {
                trace!(sequenz, letzte, "Doppeltes oder verspaetetes Paket");
                return;
            }
            fehlend = abstand - 1;
        }
        self.letzte_sequenz = Some(sequenz);

        let mut frames = Vec::new();
        if (1..=MAX_PLC_FRAMES).contains(&fehlend) {
            for _ in 0..fehlend {
                match decoder.decode_plc(self.frames * CHUNK as u64) {
                    Ok(frame) => frames.push(frame),
                    Err(e) => debug!(fehler = %e, "PLC fehlgeschlagen"),
                }
                self.frames += 1;
            }
        }

        let pts = self.frames * CHUNK as u64;
        let frame = if paket.kopf.hat_flag(PaketFlags::STILLE) {
            AudioFrame::stille(pts)
        } else {
            match decoder.decode(&paket.nutzdaten, pts) {
                Ok(frame) => frame,
                Err(e) => {
                    debug!(fehler = %e, sequenz, "Dekodierung fehlgeschlagen");
                    return;
                }
            }
        };
        self.frames += 1;
        frames.push(frame);

        for frame in frames {
            match tx.try_send(Ok(frame)) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => trace!("Track-Puffer voll, Frame verworfen"),
                Err(TrySendError::Closed(_)) => {
                    debug!("Track-Konsument beendet");
                    self.track_tx = None;
                    return;
                }
            }
        }
    }
}
