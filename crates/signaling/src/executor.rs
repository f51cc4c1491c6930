//! Session-Executor – einziger Schreiber der Session
//!
//! Bus-Rueckrufe, Transport-Ereignisse und Steuerbefehle werden ueber
//! Queues an genau einen Task uebergeben und dort strikt nacheinander
//! verarbeitet. Kein anderer Task beruehrt die Session.

use sprechfunk_core::{SignalingNachricht, Verbindungszustand};
use sprechfunk_transport::{EreignisEmpfaenger, TransportEreignis};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::error::{SignalingError, SignalingResult};
use crate::session::{Session, SessionZustand};

/// Eingabe fuer den Executor
#[derive(Debug)]
pub enum SessionEreignis {
    /// Verhandlung beginnen (Caller: Offer senden)
    Starten,
    /// Eingehende Signaling-Nachricht
    Signaling(SignalingNachricht),
    /// Session schliessen; Bestaetigung nach dem Schliessen
    Schliessen(oneshot::Sender<()>),
}

/// Beobachtbarer Zustand einer Session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStatus {
    pub zustand: SessionZustand,
    pub verbindungszustand: Verbindungszustand,
    pub lokal_gesetzt: bool,
    pub entfernt_gesetzt: bool,
    pub gesendete_nachrichten: u64,
    pub abgelehnte_ereignisse: u64,
    pub wiedergaben: u64,
}

// ---------------------------------------------------------------------------
// SessionHandle
// ---------------------------------------------------------------------------

/// Einreich-Seite des Executors. Guenstig zu klonen.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<SessionEreignis>,
    status_rx: watch::Receiver<SessionStatus>,
}

impl SessionHandle {
    /// Reicht ein Ereignis ein, ohne zu blockieren
    pub fn einreichen(&self, ereignis: SessionEreignis) -> SignalingResult<()> {
        self.tx
            .send(ereignis)
            .map_err(|_| SignalingError::ExecutorBeendet)
    }

    pub fn starten(&self) -> SignalingResult<()> {
        self.einreichen(SessionEreignis::Starten)
    }

    /// Schliesst die Session und wartet darauf. Ist der Executor bereits
    /// beendet, ist das ein No-op.
    pub async fn schliessen(&self) {
        let (tx, rx) = oneshot::channel();
        if self.einreichen(SessionEreignis::Schliessen(tx)).is_err() {
            debug!("Executor bereits beendet");
            return;
        }
        let _ = rx.await;
    }

    pub fn status(&self) -> SessionStatus {
        self.status_rx.borrow().clone()
    }

    /// Empfaenger fuer Statusaenderungen
    pub fn status_abonnieren(&self) -> watch::Receiver<SessionStatus> {
        self.status_rx.clone()
    }

    /// Wartet, bis `bedingung` fuer den Status gilt. false, wenn der
    /// Executor vorher endet.
    pub async fn warten_bis(&self, bedingung: impl FnMut(&SessionStatus) -> bool) -> bool {
        let mut rx = self.status_rx.clone();
        let erreicht = rx.wait_for(bedingung).await.is_ok();
        erreicht
    }
}

// ---------------------------------------------------------------------------
// SessionExecutor
// ---------------------------------------------------------------------------

pub struct SessionExecutor {
    session: Session,
    rx: mpsc::UnboundedReceiver<SessionEreignis>,
    transport_rx: Option<EreignisEmpfaenger>,
    status_tx: watch::Sender<SessionStatus>,
    abgelehnt: u64,
}

impl SessionExecutor {
    pub fn neu(mut session: Session) -> (Self, SessionHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport_rx = session.engine_mut().ereignisse();
        if transport_rx.is_none() {
            warn!("Transport-Ereignisse bereits vergeben");
        }
        let (status_tx, status_rx) = watch::channel(SessionStatus::default());
        let executor = Self {
            session,
            rx,
            transport_rx,
            status_tx,
            abgelehnt: 0,
        };
        executor.status_melden();
        (executor, SessionHandle { tx, status_rx })
    }

    fn status_melden(&self) {
        let statistik = self.session.statistik();
        let status = SessionStatus {
            zustand: self.session.zustand(),
            verbindungszustand: self.session.verbindungszustand(),
            lokal_gesetzt: self.session.lokal_gesetzt(),
            entfernt_gesetzt: self.session.entfernt_gesetzt(),
            gesendete_nachrichten: statistik.gesendete_nachrichten,
            abgelehnte_ereignisse: self.abgelehnt,
            wiedergaben: statistik.wiedergaben,
        };
        self.status_tx.send_if_modified(|alt| {
            if *alt == status {
                false
            } else {
                *alt = status;
                true
            }
        });
    }

    fn ablehnen(&mut self, was: &str, e: SignalingError) {
        self.abgelehnt += 1;
        if e.ist_verhandlungsfehler() {
            warn!(ereignis = was, zustand = %self.session.zustand(), fehler = %e, "Ereignis verworfen");
        } else {
            warn!(ereignis = was, fehler = %e, "Ereignis fehlgeschlagen");
        }
    }

    /// Verarbeitet Ereignisse, bis die Session geschlossen ist oder alle
    /// Handles fallen gelassen wurden.
    pub async fn laufen(mut self) -> Session {
        info!(rolle = %self.session.rolle(), "Session-Executor gestartet");

        loop {
            let weiter = tokio::select! {
                ereignis = self.rx.recv() => match ereignis {
                    Some(ereignis) => self.ereignis_verarbeiten(ereignis).await,
                    None => {
                        debug!("Alle Handles fallen gelassen");
                        self.session.schliessen().await;
                        false
                    }
                },
                Some(ereignis) = transport_empfangen(&mut self.transport_rx) => {
                    self.transport_verarbeiten(ereignis);
                    true
                }
            };
            self.status_melden();
            if !weiter {
                break;
            }
        }

        info!(zustand = %self.session.zustand(), "Session-Executor beendet");
        self.session
    }

    async fn ereignis_verarbeiten(&mut self, ereignis: SessionEreignis) -> bool {
        match ereignis {
            SessionEreignis::Starten => {
                if let Err(e) = self.session.starten().await {
                    self.ablehnen("starten", e);
                }
                true
            }
            SessionEreignis::Signaling(nachricht) => {
                let thema = nachricht.thema();
                if let Err(e) = self.session.signaling_verarbeiten(nachricht).await {
                    self.ablehnen(&thema.to_string(), e);
                }
                true
            }
            SessionEreignis::Schliessen(bestaetigung) => {
                self.session.schliessen().await;
                let _ = bestaetigung.send(());
                false
            }
        }
    }

    fn transport_verarbeiten(&mut self, ereignis: TransportEreignis) {
        match ereignis {
            TransportEreignis::Verbindungszustand(zustand) => {
                debug!(zustand = %zustand, "Transport-Zustand");
                self.session.verbindungszustand_verarbeiten(zustand);
            }
            TransportEreignis::EingehenderTrack(track) => {
                self.session.track_verarbeiten(track);
            }
        }
    }
}

/// Naechstes Transport-Ereignis; nach dem Ende der Queue nie mehr bereit
async fn transport_empfangen(rx: &mut Option<EreignisEmpfaenger>) -> Option<TransportEreignis> {
    let Some(empfaenger) = rx.as_mut() else {
        return std::future::pending().await;
    };
    match empfaenger.recv().await {
        Some(ereignis) => Some(ereignis),
        None => {
            *rx = None;
            std::future::pending().await
        }
    }
}
