//! In-Process Transport-Engine-Paar
//!
//! Zwei Engines, die ueber Queues statt Sockets verbunden sind. Es gelten
//! dieselben Regeln fuer Beschreibungen, Richtungen und Zustaende wie bei
//! der UDP-Engine. Frames werden unkodiert weitergereicht.
//! `Verbunden` melden beide Seiten, sobald beide ihre Beschreibungen
//! gesetzt haben.

use async_trait::async_trait;
use parking_lot::Mutex;
use sprechfunk_core::{
    AudioFrame, BeschreibungsTyp, FrameQuelle, SessionBeschreibung, TrackEnde,
    Verbindungszustand, FRAME_DAUER,
};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace};

use crate::beschreibung::{MedienBeschreibung, Richtung};
use crate::engine::{EreignisEmpfaenger, TransportEngine, ZustandsMelder};
use crate::error::{TransportError, TransportResult};
use crate::track::{KanalTrack, TrackSender, TRACK_PUFFER};

/// Virtuelle Ports der beiden Seiten in den Beschreibungen
const LOOPBACK_PORT_BASIS: u16 = 49_170;

type TrackEmpfaenger = mpsc::Receiver<Result<AudioFrame, TrackEnde>>;

struct Gemeinsam {
    bereit: Mutex<[bool; 2]>,
    melder: [Arc<ZustandsMelder>; 2],
}

/// Eine Seite eines Loopback-Paares
pub struct LoopbackEngine {
    seite: usize,
    gemeinsam: Arc<Gemeinsam>,
    sitzung: String,
    ssrc: u32,
    quelle: Option<Box<dyn FrameQuelle>>,
    lokal: Option<MedienBeschreibung>,
    entfernt: Option<MedienBeschreibung>,
    /// Frames zur Gegenseite
    ausgang: Option<TrackSender>,
    /// Frames von der Gegenseite
    eingang: Option<TrackEmpfaenger>,
    ereignisse: Option<EreignisEmpfaenger>,
    shutdown_tx: watch::Sender<bool>,
    pumpe: Option<JoinHandle<()>>,
    gestartet: bool,
    geschlossen: bool,
}

impl LoopbackEngine {
    /// Erstellt zwei miteinander verbundene Engines
    pub fn paar() -> (LoopbackEngine, LoopbackEngine) {
        let (melder_a, ereignisse_a) = ZustandsMelder::neu("loopback");
        let (melder_b, ereignisse_b) = ZustandsMelder::neu("loopback");
        let gemeinsam = Arc::new(Gemeinsam {
            bereit: Mutex::new([false; 2]),
            melder: [Arc::new(melder_a), Arc::new(melder_b)],
        });

        let (a_nach_b, b_von_a) = mpsc::channel(TRACK_PUFFER);
        let (b_nach_a, a_von_b) = mpsc::channel(TRACK_PUFFER);

        let a = Self::seite(0, &gemeinsam, a_nach_b, a_von_b, ereignisse_a);
        let b = Self::seite(1, &gemeinsam, b_nach_a, b_von_a, ereignisse_b);
        (a, b)
    }

    fn seite(
        seite: usize,
        gemeinsam: &Arc<Gemeinsam>,
        ausgang: TrackSender,
        eingang: TrackEmpfaenger,
        ereignisse: EreignisEmpfaenger,
    ) -> Self {
        let id = uuid::Uuid::new_v4();
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            seite,
            gemeinsam: Arc::clone(gemeinsam),
            sitzung: id.simple().to_string(),
            ssrc: id.as_u128() as u32,
            quelle: None,
            lokal: None,
            entfernt: None,
            ausgang: Some(ausgang),
            eingang: Some(eingang),
            ereignisse: Some(ereignisse),
            shutdown_tx,
            pumpe: None,
            gestartet: false,
            geschlossen: false,
        }
    }

    fn melder(&self) -> &ZustandsMelder {
        &self.gemeinsam.melder[self.seite]
    }

    fn partner_melder(&self) -> &ZustandsMelder {
        &self.gemeinsam.melder[1 - self.seite]
    }

    pub fn zustand(&self) -> Verbindungszustand {
        self.melder().aktuell()
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
            adresse: SocketAddr::new(
                IpAddr::V4(Ipv4Addr::LOCALHOST),
                LOOPBACK_PORT_BASIS + self.seite as u16,
            ),
            ssrc: Some(self.ssrc),
            richtung,
        }
    }

    fn verbindung_pruefen(&mut self) {
        if self.gestartet {
            return;
        }
        let (Some(lokal), Some(entfernt)) = (self.lokal.as_ref(), self.entfernt.as_ref()) else {
            return;
        };
        let empfangen = entfernt.richtung.sendet() && lokal.richtung.empfaengt();
        let senden = lokal.richtung.sendet() && entfernt.richtung.empfaengt();
        let track_id = format!("loopback-{}", entfernt.ssrc.unwrap_or_default());
        self.gestartet = true;

        self.melder().melden(Verbindungszustand::Verbindend);

        if empfangen {
            if let Some(eingang) = self.eingang.take() {
                self.melder()
                    .track_melden(Box::new(KanalTrack::neu(track_id, eingang)));
            }
        }

        if senden {
            if let (Some(quelle), Some(ausgang)) = (self.quelle.take(), self.ausgang.take()) {
                let shutdown = self.shutdown_tx.subscribe();
                self.pumpe = Some(tokio::spawn(pumpen(quelle, ausgang, shutdown)));
            }
        }

        let mut bereit = self.gemeinsam.bereit.lock();
        bereit[self.seite] = true;
        if bereit[0] && bereit[1] {
            for melder in &self.gemeinsam.melder {
                melder.melden(Verbindungszustand::Verbunden);
            }
        }
    }
}

/// Zieht im Frame-Takt Frames aus der Quelle und reicht sie weiter
async fn pumpen(
    mut quelle: Box<dyn FrameQuelle>,
    ausgang: TrackSender,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut intervall = tokio::time::interval(FRAME_DAUER);
    intervall.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut frames = 0u64;

    loop {
        tokio::select! {
            _ = intervall.tick() => {
                let frame = quelle.naechster_frame();
                match ausgang.try_send(Ok(frame)) {
                    Ok(()) => frames += 1,
                    Err(TrySendError::Full(_)) => trace!("Loopback-Puffer voll, Frame verworfen"),
                    Err(TrySendError::Closed(_)) => break,
                }
            }
            _ = shutdown.changed() => break,
        }
    }
    debug!(frames, "Loopback-Pumpe beendet");
}

#[async_trait]
impl TransportEngine for LoopbackEngine {
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
        Ok(SessionBeschreibung::answer(
            self.beschreibung(richtung).sdp(),
        )?)
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
        self.lokal = Some(MedienBeschreibung::parsen(beschreibung.sdp())?);
        self.verbindung_pruefen();
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
        self.entfernt = Some(MedienBeschreibung::parsen(beschreibung.sdp())?);
        self.verbindung_pruefen();
        Ok(())
    }

    async fn kandidat_hinzufuegen(&mut self, kandidat: &str) -> TransportResult<()> {
        self.offen_pruefen()?;
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
            debug!(seite = self.seite, "Loopback-Engine bereits geschlossen");
            return Ok(());
        }
        self.geschlossen = true;
        let _ = self.shutdown_tx.send(true);
        if let Some(pumpe) = self.pumpe.take() {
            let _ = pumpe.await;
        }
        self.quelle = None;
        self.ausgang = None;
        self.eingang = None;

        self.gemeinsam.bereit.lock()[self.seite] = false;
        self.melder().melden(Verbindungszustand::Geschlossen);
        if self.partner_melder().aktuell() == Verbindungszustand::Verbunden {
            self.partner_melder().melden(Verbindungszustand::Getrennt);
        }
        info!(seite = self.seite, "Loopback-Engine geschlossen");
        Ok(())
    }
}

impl Drop for LoopbackEngine {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::TransportEreignis;
    use sprechfunk_core::{EingehenderTrack, CHUNK};

    struct ZaehlQuelle(u64);

    impl FrameQuelle for ZaehlQuelle {
        fn naechster_frame(&mut self) -> AudioFrame {
            self.0 += 1;
            AudioFrame::neu(vec![self.0 as i16; CHUNK], (self.0 - 1) * CHUNK as u64)
        }
    }

    async fn verhandeln(caller: &mut LoopbackEngine, responder: &mut LoopbackEngine) {
        let offer = caller.angebot_erstellen().await.unwrap();
        caller.lokale_beschreibung_setzen(offer.clone()).await.unwrap();
        responder.entfernte_beschreibung_setzen(offer).await.unwrap();
        let answer = responder.antwort_erstellen().await.unwrap();
        responder
            .lokale_beschreibung_setzen(answer.clone())
            .await
            .unwrap();
        caller.entfernte_beschreibung_setzen(answer).await.unwrap();
    }

    fn ereignisse_sammeln(rx: &mut EreignisEmpfaenger) -> (Vec<Verbindungszustand>, Vec<Box<dyn EingehenderTrack>>) {
        let mut zustaende = Vec::new();
        let mut tracks = Vec::new();
        while let Ok(ereignis) = rx.try_recv() {
            match ereignis {
                TransportEreignis::Verbindungszustand(z) => zustaende.push(z),
                TransportEreignis::EingehenderTrack(t) => tracks.push(t),
            }
        }
        (zustaende, tracks)
    }

    #[tokio::test(start_paused = true)]
    async fn frames_kommen_in_reihenfolge_an() {
        let (mut caller, mut responder) = LoopbackEngine::paar();
        let mut caller_rx = caller.ereignisse().unwrap();
        let mut responder_rx = responder.ereignisse().unwrap();
        caller
            .ausgehenden_track_hinzufuegen(Box::new(ZaehlQuelle(0)))
            .unwrap();

        verhandeln(&mut caller, &mut responder).await;

        let (zustaende, mut tracks) = ereignisse_sammeln(&mut responder_rx);
        assert_eq!(
            zustaende,
            vec![Verbindungszustand::Verbindend, Verbindungszustand::Verbunden]
        );
        assert_eq!(tracks.len(), 1);

        // Der Caller empfaengt nichts (Answer ist recvonly)
        let (zustaende, caller_tracks) = ereignisse_sammeln(&mut caller_rx);
        assert_eq!(
            zustaende,
            vec![Verbindungszustand::Verbindend, Verbindungszustand::Verbunden]
        );
        assert!(caller_tracks.is_empty());

        let mut track = tracks.remove(0);
        for erwartet in 1..=3i16 {
            let frame = track.empfangen().await.unwrap();
            assert_eq!(frame.samples()[0], erwartet);
        }

        caller.schliessen().await.unwrap();
        while track.empfangen().await.is_ok() {}
        assert_eq!(responder.zustand(), Verbindungszustand::Getrennt);
        assert_eq!(caller.zustand(), Verbindungszustand::Geschlossen);
    }

    #[tokio::test]
    async fn doppeltes_offer_wird_abgelehnt() {
        let (mut caller, mut responder) = LoopbackEngine::paar();
        let offer = caller.angebot_erstellen().await.unwrap();
        responder
            .entfernte_beschreibung_setzen(offer.clone())
            .await
            .unwrap();
        assert!(matches!(
            responder.entfernte_beschreibung_setzen(offer).await,
            Err(TransportError::FalscheReihenfolge(_))
        ));
    }

    #[tokio::test]
    async fn track_nach_offer_wird_abgelehnt() {
        let (mut caller, _responder) = LoopbackEngine::paar();
        let offer = caller.angebot_erstellen().await.unwrap();
        caller.lokale_beschreibung_setzen(offer).await.unwrap();
        assert!(caller
            .ausgehenden_track_hinzufuegen(Box::new(ZaehlQuelle(0)))
            .is_err());
    }

    #[tokio::test]
    async fn schliessen_ist_idempotent() {
        let (mut a, _b) = LoopbackEngine::paar();
        let mut rx = a.ereignisse().unwrap();
        a.schliessen().await.unwrap();
        a.schliessen().await.unwrap();
        let (zustaende, _) = ereignisse_sammeln(&mut rx);
        assert_eq!(zustaende, vec![Verbindungszustand::Geschlossen]);
        assert!(a.kandidat_hinzufuegen("candidate:1").await.is_err());
    }
}
