//! Session – Zustandsmaschine einer Verhandlung
//!
//! ## Zustaende
//! ```text
//! Neu -> Verhandlung -> Verbunden -> {Getrennt, Fehlgeschlagen}
//!                 \____________________________/
//!                               |
//!                          schliessen() -> Geschlossen (terminal, aus jedem Zustand)
//! ```
//!
//! - Caller: `starten` erstellt das Offer, setzt es lokal, sendet es.
//!   Eine Answer wird nur in `Verhandlung` angenommen.
//! - Responder: ein Offer wird nur in `Neu` angenommen; es wird entfernt
//!   gesetzt, die Answer erstellt, lokal gesetzt und gesendet.
//! - Verbindungsabbrueche werden nur uebernommen, nie automatisch
//!   wiederholt.
//!
//! Ein abgelehntes Ereignis laesst den Zustand unveraendert. Die Flags
//! `lokal_gesetzt`/`entfernt_gesetzt` werden erst nach dem erfolgreichen
//! Schritt gesetzt. Scheitert die Answer, nachdem das Offer schon in der
//! Engine steckt, endet die Session in `Fehlgeschlagen`.
//!
//! Die Session wird ausschliesslich vom `SessionExecutor` bedient.

use sprechfunk_audio::{AudioBackend, GeraeteKonfig, SenkenBericht, WiedergabeSenke};
use sprechfunk_core::{
    EingehenderTrack, Rolle, SessionBeschreibung, SignalingAusgang, SignalingNachricht, Thema,
    Verbindungszustand,
};
use sprechfunk_transport::TransportEngine;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{SignalingError, SignalingResult};

/// Maximale Wartezeit auf das Ende der Wiedergaben beim Schliessen
const SENKEN_TIMEOUT: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// SessionZustand
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionZustand {
    #[default]
    Neu,
    Verhandlung,
    Verbunden,
    Getrennt,
    Fehlgeschlagen,
    Geschlossen,
}

impl fmt::Display for SessionZustand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionZustand::Neu => "neu",
            SessionZustand::Verhandlung => "verhandlung",
            SessionZustand::Verbunden => "verbunden",
            SessionZustand::Getrennt => "getrennt",
            SessionZustand::Fehlgeschlagen => "fehlgeschlagen",
            SessionZustand::Geschlossen => "geschlossen",
        };
        f.write_str(s)
    }
}

/// Zaehler einer Session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStatistik {
    /// Erfolgreich an den Bus uebergebene Nachrichten
    pub gesendete_nachrichten: u64,
    /// Nicht zustellbare Nachrichten (Bus getrennt)
    pub sendefehler: u64,
    /// Gestartete Wiedergaben
    pub wiedergaben: u64,
}

// ---------------------------------------------------------------------------
// Wiedergabe
// ---------------------------------------------------------------------------

/// Ausgabegeraet fuer eingehende Tracks
#[derive(Clone)]
pub struct WiedergabeZiel {
    pub backend: Arc<dyn AudioBackend>,
    pub konfig: GeraeteKonfig,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

pub struct Session {
    rolle: Rolle,
    zustand: SessionZustand,
    verbindungszustand: Verbindungszustand,
    lokal_gesetzt: bool,
    entfernt_gesetzt: bool,
    engine: Box<dyn TransportEngine>,
    ausgang: Arc<dyn SignalingAusgang>,
    wiedergabe: Option<WiedergabeZiel>,
    /// Track-ID -> Wiedergabe-Task (bleibt nach Ende eingetragen)
    senken: HashMap<String, Option<JoinHandle<SenkenBericht>>>,
    statistik: SessionStatistik,
}

impl Session {
    pub fn neu(
        rolle: Rolle,
        engine: Box<dyn TransportEngine>,
        ausgang: Arc<dyn SignalingAusgang>,
        wiedergabe: Option<WiedergabeZiel>,
    ) -> Self {
        Self {
            rolle,
            zustand: SessionZustand::Neu,
            verbindungszustand: Verbindungszustand::Neu,
            lokal_gesetzt: false,
            entfernt_gesetzt: false,
            engine,
            ausgang,
            wiedergabe,
            senken: HashMap::new(),
            statistik: SessionStatistik::default(),
        }
    }

    pub fn rolle(&self) -> Rolle {
        self.rolle
    }

    pub fn zustand(&self) -> SessionZustand {
        self.zustand
    }

    pub fn verbindungszustand(&self) -> Verbindungszustand {
        self.verbindungszustand
    }

    pub fn lokal_gesetzt(&self) -> bool {
        self.lokal_gesetzt
    }

    pub fn entfernt_gesetzt(&self) -> bool {
        self.entfernt_gesetzt
    }

    pub fn statistik(&self) -> &SessionStatistik {
        &self.statistik
    }

    pub(crate) fn engine_mut(&mut self) -> &mut dyn TransportEngine {
        self.engine.as_mut()
    }

    fn zustand_setzen(&mut self, neu: SessionZustand) {
        if self.zustand != neu {
            info!(rolle = %self.rolle, von = %self.zustand, nach = %neu, "Session-Zustand");
            self.zustand = neu;
        }
    }

    fn senden(&mut self, thema: Thema, beschreibung: &SessionBeschreibung) {
        match self
            .ausgang
            .senden(SignalingNachricht::neu(thema, beschreibung.sdp()))
        {
            Ok(()) => {
                self.statistik.gesendete_nachrichten += 1;
                debug!(thema = %thema, bytes = beschreibung.sdp().len(), "Signaling gesendet");
            }
            Err(e) => {
                // Hoechstens einmal: kein Wiederholen, Verlust ist ein Liveness-Problem
                self.statistik.sendefehler += 1;
                warn!(thema = %thema, fehler = %e, "Signaling-Nachricht verworfen");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Verhandlung
    // -----------------------------------------------------------------------

    /// Caller: Offer erstellen, lokal setzen, senden. Responder: wartet.
    pub async fn starten(&mut self) -> SignalingResult<()> {
        if self.rolle == Rolle::Responder {
            debug!("Responder wartet auf ein Offer");
            return Ok(());
        }
        if self.zustand != SessionZustand::Neu {
            return Err(SignalingError::falscher_zustand(format!(
                "starten in Zustand {}",
                self.zustand
            )));
        }

        let offer = self.engine.angebot_erstellen().await?;
        self.engine.lokale_beschreibung_setzen(offer.clone()).await?;
        self.lokal_gesetzt = true;
        self.zustand_setzen(SessionZustand::Verhandlung);
        self.senden(Thema::Offer, &offer);
        Ok(())
    }

    /// Responder: entferntes Offer beantworten
    pub async fn offer_verarbeiten(&mut self, sdp: String) -> SignalingResult<()> {
        if self.rolle != Rolle::Responder {
            return Err(SignalingError::falscher_zustand("Caller nimmt keine Offers an"));
        }
        if self.zustand != SessionZustand::Neu {
            return Err(SignalingError::falscher_zustand(format!(
                "Offer in Zustand {} verworfen",
                self.zustand
            )));
        }

        let offer = SessionBeschreibung::offer(sdp)?;
        self.engine.entfernte_beschreibung_setzen(offer).await?;
        self.entfernt_gesetzt = true;

        // Das Offer steckt bereits in der Engine: ein weiteres kann sie
        // nicht mehr annehmen
        let answer = match self.antwort_setzen().await {
            Ok(answer) => answer,
            Err(e) => {
                warn!(fehler = %e, "Answer fehlgeschlagen, Verhandlung abgebrochen");
                self.zustand_setzen(SessionZustand::Fehlgeschlagen);
                return Err(e);
            }
        };
        self.zustand_setzen(SessionZustand::Verhandlung);
        self.senden(Thema::Answer, &answer);
        Ok(())
    }

    async fn antwort_setzen(&mut self) -> SignalingResult<SessionBeschreibung> {
        let answer = self.engine.antwort_erstellen().await?;
        self.engine.lokale_beschreibung_setzen(answer.clone()).await?;
        self.lokal_gesetzt = true;
        Ok(answer)
    }

    /// Caller: Answer als entfernte Beschreibung setzen
    pub async fn answer_verarbeiten(&mut self, sdp: String) -> SignalingResult<()> {
        if self.rolle != Rolle::Caller {
            return Err(SignalingError::falscher_zustand(
                "Responder nimmt keine Answers an",
            ));
        }
        if self.zustand != SessionZustand::Verhandlung || self.entfernt_gesetzt {
            return Err(SignalingError::falscher_zustand(format!(
                "Answer in Zustand {} verworfen",
                self.zustand
            )));
        }

        let answer = SessionBeschreibung::answer(sdp)?;
        self.engine.entfernte_beschreibung_setzen(answer).await?;
        self.entfernt_gesetzt = true;
        info!("Answer uebernommen");
        Ok(())
    }

    /// Trickle-Kandidat an die Engine weiterreichen. Leere Kandidaten
    /// werden ignoriert.
    pub async fn kandidat_verarbeiten(&mut self, kandidat: String) -> SignalingResult<()> {
        if self.zustand == SessionZustand::Geschlossen {
            return Err(SignalingError::falscher_zustand("Kandidat nach Schliessen"));
        }
        let kandidat = kandidat.trim();
        if kandidat.is_empty() {
            debug!("Leerer Kandidat ignoriert");
            return Ok(());
        }
        self.engine.kandidat_hinzufuegen(kandidat).await?;
        Ok(())
    }

    /// Verteilt eine eingehende Signaling-Nachricht
    pub async fn signaling_verarbeiten(
        &mut self,
        nachricht: SignalingNachricht,
    ) -> SignalingResult<()> {
        if self.zustand == SessionZustand::Geschlossen {
            return Err(SignalingError::falscher_zustand(format!(
                "{} nach Schliessen",
                nachricht.thema()
            )));
        }
        let (thema, payload) = nachricht.into_teile();
        match thema {
            Thema::Offer => self.offer_verarbeiten(payload).await,
            Thema::Answer => self.answer_verarbeiten(payload).await,
            Thema::IceCandidate => self.kandidat_verarbeiten(payload).await,
        }
    }

    // -----------------------------------------------------------------------
    // Transport-Ereignisse
    // -----------------------------------------------------------------------

    /// Uebernimmt den von der Engine gemeldeten Verbindungszustand
    pub fn verbindungszustand_verarbeiten(&mut self, neu: Verbindungszustand) {
        if self.zustand == SessionZustand::Geschlossen {
            return;
        }
        self.verbindungszustand = neu;
        let ziel = match neu {
            Verbindungszustand::Verbunden => SessionZustand::Verbunden,
            Verbindungszustand::Getrennt => SessionZustand::Getrennt,
            Verbindungszustand::Fehlgeschlagen => SessionZustand::Fehlgeschlagen,
            Verbindungszustand::Geschlossen => SessionZustand::Geschlossen,
            Verbindungszustand::Neu | Verbindungszustand::Verbindend => return,
        };
        if self.zustand == SessionZustand::Neu {
            debug!(zustand = %neu, "Verbindungszustand vor der Verhandlung ignoriert");
            return;
        }
        if matches!(
            ziel,
            SessionZustand::Getrennt | SessionZustand::Fehlgeschlagen
        ) {
            warn!(zustand = %neu, "Verbindung unterbrochen, keine automatische Wiederholung");
        }
        self.zustand_setzen(ziel);
    }

    /// Startet hoechstens eine Wiedergabe pro Track
    pub fn track_verarbeiten(&mut self, track: Box<dyn EingehenderTrack>) {
        let id = track.id().to_string();
        if self.zustand == SessionZustand::Geschlossen {
            debug!(track = %id, "Track nach Schliessen verworfen");
            return;
        }
        if self.senken.contains_key(&id) {
            debug!(track = %id, "Track bereits gebunden");
            return;
        }
        let Some(ziel) = self.wiedergabe.as_ref() else {
            debug!(track = %id, "Keine Wiedergabe konfiguriert, Track verworfen");
            self.senken.insert(id, None);
            return;
        };
        let geraet = match ziel.backend.wiedergabe_oeffnen(&ziel.konfig) {
            Ok(geraet) => geraet,
            Err(e) => {
                warn!(track = %id, fehler = %e, "Ausgabegeraet nicht verfuegbar");
                return;
            }
        };
        let senke = WiedergabeSenke::neu(track, geraet);
        self.senken
            .insert(id.clone(), Some(tokio::spawn(senke.laufen())));
        self.statistik.wiedergaben += 1;
        info!(track = %id, "Wiedergabe gebunden");
    }

    // -----------------------------------------------------------------------
    // Schliessen
    // -----------------------------------------------------------------------

    /// Schliesst Transport und Wiedergaben. true, wenn dieser Aufruf die
    /// Session geschlossen hat.
    pub async fn schliessen(&mut self) -> bool {
        if self.zustand == SessionZustand::Geschlossen {
            debug!("Session bereits geschlossen");
            return false;
        }
        if let Err(e) = self.engine.schliessen().await {
            warn!(fehler = %e, "Transport liess sich nicht sauber schliessen");
        }

        // Mit dem Transport enden die Tracks und damit die Wiedergaben
        for (id, task) in self.senken.iter_mut() {
            let Some(mut task) = task.take() else {
                continue;
            };
            match tokio::time::timeout(SENKEN_TIMEOUT, &mut task).await {
                Ok(Ok(bericht)) => {
                    debug!(track = %id, frames = bericht.frames, "Wiedergabe beendet")
                }
                Ok(Err(e)) => warn!(track = %id, fehler = %e, "Wiedergabe-Task abgebrochen"),
                Err(_) => {
                    warn!(track = %id, "Wiedergabe endet nicht, wird abgebrochen");
                    task.abort();
                }
            }
        }

        self.verbindungszustand = Verbindungszustand::Geschlossen;
        self.zustand_setzen(SessionZustand::Geschlossen);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use sprechfunk_audio::{AudioError, SimulationsBackend};
    use sprechfunk_core::{AudioFrame, FrameQuelle, Result as KernResult, SprechfunkError};
    use sprechfunk_transport::{
        EreignisEmpfaenger, LoopbackEngine, TransportError, TransportEreignis, TransportResult,
    };
    use std::sync::atomic::Ordering;

    #[derive(Default)]
    struct AufzeichnenderAusgang {
        nachrichten: Mutex<Vec<SignalingNachricht>>,
        defekt: bool,
    }

    impl SignalingAusgang for AufzeichnenderAusgang {
        fn senden(&self, nachricht: SignalingNachricht) -> KernResult<()> {
            if self.defekt {
                return Err(SprechfunkError::Senden("Bus getrennt".into()));
            }
            self.nachrichten.lock().push(nachricht);
            Ok(())
        }
    }

    impl AufzeichnenderAusgang {
        fn themen(&self) -> Vec<Thema> {
            self.nachrichten.lock().iter().map(|n| n.thema()).collect()
        }

        fn letzte(&self) -> SignalingNachricht {
            self.nachrichten.lock().last().cloned().unwrap()
        }
    }

    struct Ton;

    impl FrameQuelle for Ton {
        fn naechster_frame(&mut self) -> AudioFrame {
            AudioFrame::neu(vec![100; 960], 0)
        }
    }

    fn caller() -> (Session, Arc<AufzeichnenderAusgang>, LoopbackEngine) {
        let (mut engine, gegenseite) = LoopbackEngine::paar();
        engine.ausgehenden_track_hinzufuegen(Box::new(Ton)).unwrap();
        let ausgang = Arc::new(AufzeichnenderAusgang::default());
        let session = Session::neu(Rolle::Caller, Box::new(engine), ausgang.clone(), None);
        (session, ausgang, gegenseite)
    }

    fn responder(
        wiedergabe: Option<WiedergabeZiel>,
    ) -> (Session, Arc<AufzeichnenderAusgang>, LoopbackEngine) {
        let (engine, gegenseite) = LoopbackEngine::paar();
        let ausgang = Arc::new(AufzeichnenderAusgang::default());
        let session = Session::neu(
            Rolle::Responder,
            Box::new(engine),
            ausgang.clone(),
            wiedergabe,
        );
        (session, ausgang, gegenseite)
    }

    async fn fremdes_offer(gegenseite: &mut LoopbackEngine) -> String {
        gegenseite
            .ausgehenden_track_hinzufuegen(Box::new(Ton))
            .unwrap();
        let offer = gegenseite.angebot_erstellen().await.unwrap();
        gegenseite
            .lokale_beschreibung_setzen(offer.clone())
            .await
            .unwrap();
        offer.sdp().to_string()
    }

    #[tokio::test]
    async fn caller_start_sendet_genau_ein_offer() {
        let (mut session, ausgang, _gegenseite) = caller();
        session.starten().await.unwrap();

        assert_eq!(session.zustand(), SessionZustand::Verhandlung);
        assert!(session.lokal_gesetzt());
        assert!(!session.entfernt_gesetzt());
        assert_eq!(ausgang.themen(), vec![Thema::Offer]);
        assert!(!ausgang.letzte().payload().is_empty());

        // Zweiter Start wird abgelehnt, kein weiteres Offer
        assert!(session.starten().await.is_err());
        assert_eq!(ausgang.themen().len(), 1);
    }

    #[tokio::test]
    async fn responder_beantwortet_ein_offer() {
        let (mut session, ausgang, mut gegenseite) = responder(None);
        session.starten().await.unwrap();
        assert_eq!(session.zustand(), SessionZustand::Neu);

        let offer = fremdes_offer(&mut gegenseite).await;
        session
            .signaling_verarbeiten(SignalingNachricht::neu(Thema::Offer, offer.clone()))
            .await
            .unwrap();

        assert_eq!(session.zustand(), SessionZustand::Verhandlung);
        assert!(session.lokal_gesetzt() && session.entfernt_gesetzt());
        assert_eq!(ausgang.themen(), vec![Thema::Answer]);

        // Doppeltes Offer: abgelehnt, keine zweite Answer
        let fehler = session
            .signaling_verarbeiten(SignalingNachricht::neu(Thema::Offer, offer))
            .await
            .unwrap_err();
        assert!(fehler.ist_verhandlungsfehler());
        assert_eq!(session.zustand(), SessionZustand::Verhandlung);
        assert_eq!(ausgang.themen(), vec![Thema::Answer]);
        assert_eq!(session.statistik().gesendete_nachrichten, 1);
    }

    #[tokio::test]
    async fn caller_uebernimmt_answer_ohne_neues_offer() {
        let (mut session, ausgang, mut gegenseite) = caller();
        session.starten().await.unwrap();

        let offer = SessionBeschreibung::offer(ausgang.letzte().payload()).unwrap();
        gegenseite.entfernte_beschreibung_setzen(offer).await.unwrap();
        let answer = gegenseite.antwort_erstellen().await.unwrap();
        gegenseite
            .lokale_beschreibung_setzen(answer.clone())
            .await
            .unwrap();

        session
            .answer_verarbeiten(answer.sdp().to_string())
            .await
            .unwrap();
        assert!(session.entfernt_gesetzt());
        assert_eq!(ausgang.themen(), vec![Thema::Offer]);

        // Zweite Answer wird verworfen
        assert!(session
            .answer_verarbeiten(answer.sdp().to_string())
            .await
            .is_err());
        session.schliessen().await;
    }

    #[tokio::test]
    async fn answer_vor_offer_wird_verworfen() {
        let (mut session, ausgang, _gegenseite) = caller();
        let fehler = session.answer_verarbeiten("v=0".into()).await.unwrap_err();
        assert!(matches!(fehler, SignalingError::FalscherZustand(_)));
        assert_eq!(session.zustand(), SessionZustand::Neu);
        assert!(!session.entfernt_gesetzt());
        assert!(ausgang.themen().is_empty());
    }

    #[tokio::test]
    async fn ungueltiges_offer_laesst_zustand_unveraendert() {
        let (mut session, ausgang, _gegenseite) = responder(None);

        let leer = session.offer_verarbeiten("  ".into()).await.unwrap_err();
        assert!(matches!(leer, SignalingError::UngueltigeBeschreibung(_)));

        let kaputt = session
            .offer_verarbeiten("kein sdp".into())
            .await
            .unwrap_err();
        assert!(kaputt.ist_verhandlungsfehler());

        assert_eq!(session.zustand(), SessionZustand::Neu);
        assert!(!session.entfernt_gesetzt());
        assert!(ausgang.themen().is_empty());
    }

    /// Loopback-Engine, deren erste Answer scheitert
    struct AnswerScheitert {
        innen: LoopbackEngine,
        scheitern: bool,
    }

    #[async_trait::async_trait]
    impl TransportEngine for AnswerScheitert {
        async fn angebot_erstellen(&mut self) -> TransportResult<SessionBeschreibung> {
            self.innen.angebot_erstellen().await
        }

        async fn antwort_erstellen(&mut self) -> TransportResult<SessionBeschreibung> {
            if std::mem::take(&mut self.scheitern) {
                return Err(TransportError::Codec(AudioError::CodecFehler(
                    "Encoder nicht verfuegbar".into(),
                )));
            }
            self.innen.antwort_erstellen().await
        }

        async fn lokale_beschreibung_setzen(
            &mut self,
            beschreibung: SessionBeschreibung,
        ) -> TransportResult<()> {
            self.innen.lokale_beschreibung_setzen(beschreibung).await
        }

        async fn entfernte_beschreibung_setzen(
            &mut self,
            beschreibung: SessionBeschreibung,
        ) -> TransportResult<()> {
            self.innen.entfernte_beschreibung_setzen(beschreibung).await
        }

        async fn kandidat_hinzufuegen(&mut self, kandidat: &str) -> TransportResult<()> {
            self.innen.kandidat_hinzufuegen(kandidat).await
        }

        fn ausgehenden_track_hinzufuegen(
            &mut self,
            quelle: Box<dyn FrameQuelle>,
        ) -> TransportResult<()> {
            self.innen.ausgehenden_track_hinzufuegen(quelle)
        }

        fn ereignisse(&mut self) -> Option<EreignisEmpfaenger> {
            self.innen.ereignisse()
        }

        async fn schliessen(&mut self) -> TransportResult<()> {
            self.innen.schliessen().await
        }
    }

    #[tokio::test]
    async fn gescheiterte_answer_endet_in_fehlgeschlagen() {
        let (engine, mut gegenseite) = LoopbackEngine::paar();
        let ausgang = Arc::new(AufzeichnenderAusgang::default());
        let mut session = Session::neu(
            Rolle::Responder,
            Box::new(AnswerScheitert {
                innen: engine,
                scheitern: true,
            }),
            ausgang.clone(),
            None,
        );

        let offer = fremdes_offer(&mut gegenseite).await;
        let fehler = session.offer_verarbeiten(offer.clone()).await.unwrap_err();
        assert!(matches!(fehler, SignalingError::Transport(_)));
        assert_eq!(session.zustand(), SessionZustand::Fehlgeschlagen);
        assert!(session.entfernt_gesetzt());
        assert!(!session.lokal_gesetzt());

        // Kein Festhaengen in Neu: ein erneutes Offer wird klar abgelehnt
        let erneut = session.offer_verarbeiten(offer).await.unwrap_err();
        assert!(matches!(erneut, SignalingError::FalscherZustand(_)));
        assert_eq!(session.zustand(), SessionZustand::Fehlgeschlagen);
        assert!(ausgang.themen().is_empty());

        assert!(session.schliessen().await);
        assert_eq!(session.zustand(), SessionZustand::Geschlossen);
    }

    #[tokio::test]
    async fn leere_und_fremde_kandidaten_stuerzen_nicht_ab() {
        let (mut session, _ausgang, _gegenseite) = responder(None);
        session.kandidat_verarbeiten(String::new()).await.unwrap();
        session
            .kandidat_verarbeiten("candidate:1 1 UDP 2122252543 10.0.0.2 50000 typ host".into())
            .await
            .unwrap();
        assert_eq!(session.zustand(), SessionZustand::Neu);
    }

    #[tokio::test]
    async fn sendefehler_wird_gezaehlt_nicht_wiederholt() {
        let (mut engine, _gegenseite) = LoopbackEngine::paar();
        engine.ausgehenden_track_hinzufuegen(Box::new(Ton)).unwrap();
        let ausgang = Arc::new(AufzeichnenderAusgang {
            defekt: true,
            ..Default::default()
        });
        let mut session = Session::neu(Rolle::Caller, Box::new(engine), ausgang, None);

        session.starten().await.unwrap();
        assert_eq!(session.zustand(), SessionZustand::Verhandlung);
        assert_eq!(session.statistik().sendefehler, 1);
        assert_eq!(session.statistik().gesendete_nachrichten, 0);
    }

    #[tokio::test]
    async fn verbindungszustaende_werden_uebernommen() {
        let (mut session, _ausgang, _gegenseite) = caller();
        session.verbindungszustand_verarbeiten(Verbindungszustand::Verbunden);
        assert_eq!(session.zustand(), SessionZustand::Neu);

        session.starten().await.unwrap();
        session.verbindungszustand_verarbeiten(Verbindungszustand::Verbindend);
        assert_eq!(session.zustand(), SessionZustand::Verhandlung);
        session.verbindungszustand_verarbeiten(Verbindungszustand::Verbunden);
        assert_eq!(session.zustand(), SessionZustand::Verbunden);
        session.verbindungszustand_verarbeiten(Verbindungszustand::Getrennt);
        assert_eq!(session.zustand(), SessionZustand::Getrennt);
        session.verbindungszustand_verarbeiten(Verbindungszustand::Fehlgeschlagen);
        assert_eq!(session.zustand(), SessionZustand::Fehlgeschlagen);
        assert_eq!(
            session.verbindungszustand(),
            Verbindungszustand::Fehlgeschlagen
        );
    }

    #[tokio::test]
    async fn schliessen_ist_idempotent_und_gibt_geraete_einmal_frei() {
        let backend = SimulationsBackend::new();
        let ziel = WiedergabeZiel {
            backend: Arc::new(backend.clone()),
            konfig: GeraeteKonfig::default(),
        };
        let (mut session, _ausgang, mut gegenseite) = responder(Some(ziel));
        let mut ereignisse = session.engine_mut().ereignisse().unwrap();

        let offer = fremdes_offer(&mut gegenseite).await;
        session.offer_verarbeiten(offer).await.unwrap();

        // Track zweimal melden: nur eine Wiedergabe
        let mut track_gemeldet = false;
        while let Ok(ereignis) = ereignisse.try_recv() {
            if let TransportEreignis::EingehenderTrack(track) = ereignis {
                session.track_verarbeiten(track);
                track_gemeldet = true;
            }
        }
        assert!(track_gemeldet);
        let (zweiter_tx, zweiter_rx) = tokio::sync::mpsc::channel(1);
        drop(zweiter_tx);
        let id = session.senken.keys().next().cloned().unwrap();
        session.track_verarbeiten(Box::new(TestTrack { id, _rx: zweiter_rx }));
        assert_eq!(session.statistik().wiedergaben, 1);
        assert_eq!(
            backend.zaehler().wiedergabe_geoeffnet.load(Ordering::SeqCst),
            1
        );

        // Gegenseite zu: der Track endet, die Wiedergabe gibt das Geraet frei
        gegenseite.schliessen().await.unwrap();
        assert!(session.schliessen().await);
        assert!(!session.schliessen().await);
        assert_eq!(session.zustand(), SessionZustand::Geschlossen);
        assert_eq!(
            backend.zaehler().wiedergabe_geschlossen.load(Ordering::SeqCst),
            1
        );

        // Nach dem Schliessen wird alles verworfen
        assert!(session
            .signaling_verarbeiten(SignalingNachricht::neu(Thema::Offer, "v=0"))
            .await
            .is_err());
        session.verbindungszustand_verarbeiten(Verbindungszustand::Verbunden);
        assert_eq!(session.zustand(), SessionZustand::Geschlossen);
    }

    struct TestTrack {
        id: String,
        _rx: tokio::sync::mpsc::Receiver<()>,
    }

    #[async_trait::async_trait]
    impl EingehenderTrack for TestTrack {
        fn id(&self) -> &str {
            &self.id
        }

        async fn empfangen(&mut self) -> Result<AudioFrame, sprechfunk_core::TrackEnde> {
            Err(sprechfunk_core::TrackEnde::Beendet)
        }
    }
}
