//! sprechfunk-endpoint – Bibliotheks-Root
//!
//! Setzt einen Endpunkt aus Bus, Transport-Engine und Audio-Backend
//! zusammen und faehrt ihn in fester Reihenfolge wieder herunter.

pub mod config;
pub mod taste;

use anyhow::Result;
use config::EndpunktConfig;
use sprechfunk_audio::{AudioBackend, AudioQuelle, PttAbfrage, PttGate, TastenAbfrage};
use sprechfunk_core::Rolle;
use sprechfunk_observability::MetrikSchnappschuss;
use sprechfunk_signaling::{
    NachrichtenBus, Session, SessionExecutor, SessionHandle, SessionStatus, SignalingKanal,
    WiedergabeZiel,
};
use sprechfunk_transport::TransportEngine;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Maximale Wartezeit auf das Ende des Executors
const EXECUTOR_TIMEOUT: Duration = Duration::from_secs(2);

/// Austauschbare Bausteine eines Endpunkts
pub struct EndpunktTeile {
    pub bus: Arc<dyn NachrichtenBus>,
    pub engine: Box<dyn TransportEngine>,
    pub backend: Arc<dyn AudioBackend>,
}

/// Laufender Endpunkt (Caller oder Responder)
pub struct Endpunkt {
    id: String,
    rolle: Rolle,
    kanal: Arc<SignalingKanal>,
    handle: SessionHandle,
    executor: Option<JoinHandle<Session>>,
    start: Option<JoinHandle<()>>,
    quelle: Option<AudioQuelle>,
    ptt: Option<PttAbfrage>,
    heruntergefahren: bool,
}

impl Endpunkt {
    /// Startet den Endpunkt.
    ///
    /// Muss innerhalb einer `tokio::task::LocalSet` laufen: der
    /// Session-Executor ist ein lokaler Task.
    ///
    /// Der Caller oeffnet das Eingabegeraet, haengt es als ausgehenden Track
    /// an und startet die PTT-Abfrage mit `taste`. Beide Rollen abonnieren
    /// zuerst ihre Themen. Das Offer des Callers folgt, sobald der Bus
    /// sendebereit ist, auch wenn der Broker erst spaeter erreichbar wird.
    pub async fn starten(
        config: &EndpunktConfig,
        teile: EndpunktTeile,
        taste: Option<Box<dyn TastenAbfrage>>,
    ) -> Result<Self> {
        let EndpunktTeile {
            bus,
            mut engine,
            backend,
        } = teile;
        let rolle = config.endpunkt.rolle;
        let id = config.client_id();
        let geraete = config.geraete_konfig();

        let mut quelle = None;
        let mut ptt = None;
        if rolle == Rolle::Caller {
            let gate = PttGate::new();
            let audio = AudioQuelle::oeffnen(backend.as_ref(), &geraete, gate.clone())?;
            if let Err(e) = engine.ausgehenden_track_hinzufuegen(Box::new(audio.clone())) {
                audio.stoppen();
                return Err(e.into());
            }
            match taste {
                Some(taste) => {
                    ptt = Some(PttAbfrage::starten(
                        taste,
                        gate,
                        config.ptt.modus,
                        config.ptt_intervall(),
                    )?);
                }
                None => warn!(client = %id, "Keine Sprechtaste, es wird nur Stille gesendet"),
            }
            quelle = Some(audio);
        }

        let wiedergabe = WiedergabeZiel {
            backend,
            konfig: geraete,
        };
        let kanal = Arc::new(SignalingKanal::neu(bus, rolle, config.themen.clone()));
        let session = Session::neu(rolle, engine, kanal.clone(), Some(wiedergabe));
        let (executor, handle) = SessionExecutor::neu(session);
        let executor = tokio::task::spawn_local(executor.laufen());

        let mut endpunkt = Self {
            id,
            rolle,
            kanal,
            handle,
            executor: Some(executor),
            start: None,
            quelle,
            ptt,
            heruntergefahren: false,
        };

        if let Err(e) = endpunkt.kanal.verbinden(endpunkt.handle.clone()).await {
            endpunkt.herunterfahren().await;
            return Err(e.into());
        }
        endpunkt.start = Some(tokio::task::spawn_local(starten_wenn_bereit(
            Arc::clone(&endpunkt.kanal),
            endpunkt.handle.clone(),
            endpunkt.id.clone(),
        )));
        info!(client = %endpunkt.id, rolle = %rolle, "Endpunkt gestartet");
        Ok(endpunkt)
    }

    pub fn rolle(&self) -> Rolle {
        self.rolle
    }

    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    pub fn status(&self) -> SessionStatus {
        self.handle.status()
    }

    /// Beobachter fuer Metriken, unabhaengig von der Lebensdauer des Endpunkts
    pub fn beobachter(&self) -> EndpunktBeobachter {
        EndpunktBeobachter {
            handle: self.handle.clone(),
            quelle: self.quelle.clone(),
        }
    }

    /// Faehrt den Endpunkt herunter. Mehrfacher Aufruf ist ein No-op.
    ///
    /// Reihenfolge:
    /// 1. Ausstehenden Session-Start verwerfen, PTT-Abfrage stoppen (Gate zu)
    /// 2. Signaling-Kanal trennen
    /// 3. Session ueber die Executor-Queue schliessen
    /// 4. Audio-Quelle stoppen
    /// 5. Auf das Ende des Executors warten
    pub async fn herunterfahren(&mut self) {
        if self.heruntergefahren {
            debug!(client = %self.id, "Endpunkt bereits heruntergefahren");
            return;
        }
        self.heruntergefahren = true;
        info!(client = %self.id, "Endpunkt wird heruntergefahren");

        if let Some(start) = self.start.take() {
            start.abort();
        }
        if let Some(mut ptt) = self.ptt.take() {
            ptt.stoppen();
        }
        self.kanal.trennen().await;
        self.handle.schliessen().await;
        if let Some(quelle) = self.quelle.as_ref() {
            quelle.stoppen();
        }
        if let Some(executor) = self.executor.take() {
            match tokio::time::timeout(EXECUTOR_TIMEOUT, executor).await {
                Ok(Ok(session)) => {
                    debug!(client = %self.id, zustand = %session.zustand(), "Executor beendet")
                }
                Ok(Err(e)) => warn!(client = %self.id, fehler = %e, "Executor abgebrochen"),
                Err(_) => warn!(client = %self.id, "Executor endet nicht"),
            }
        }
        info!(client = %self.id, "Endpunkt heruntergefahren");
    }
}

/// Reicht `Starten` ein, sobald der Bus sendebereit ist
async fn starten_wenn_bereit(kanal: Arc<SignalingKanal>, handle: SessionHandle, id: String) {
    if !kanal.bereit().await {
        debug!(client = %id, "Bus getrennt, Session wird nicht gestartet");
        return;
    }
    match handle.starten() {
        Ok(()) => debug!(client = %id, "Session-Start eingereicht"),
        Err(e) => warn!(client = %id, fehler = %e, "Session-Start nicht moeglich"),
    }
}

/// Liest Status und Zaehler eines Endpunkts
#[derive(Clone)]
pub struct EndpunktBeobachter {
    handle: SessionHandle,
    quelle: Option<AudioQuelle>,
}

impl EndpunktBeobachter {
    pub fn schnappschuss(&self) -> MetrikSchnappschuss {
        let status = self.handle.status();
        let audio = self
            .quelle
            .as_ref()
            .map(|q| q.statistik())
            .unwrap_or_default();
        MetrikSchnappschuss {
            audio_frames: audio.frames,
            stille_frames: audio.stille_frames,
            lesefehler: audio.lesefehler,
            signaling_gesendet: status.gesendete_nachrichten,
            signaling_abgelehnt: status.abgelehnte_ereignisse,
            wiedergaben: status.wiedergaben,
            ptt_aktiv: self
                .quelle
                .as_ref()
                .map(|q| q.gate().is_transmitting())
                .unwrap_or(false),
            session_zustand: status.zustand.to_string(),
        }
    }
}
