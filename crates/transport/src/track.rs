//! Eingehender Track auf Basis einer mpsc-Queue

use async_trait::async_trait;
use sprechfunk_core::{AudioFrame, EingehenderTrack, TrackEnde};
use tokio::sync::mpsc;

/// Frames, die ein langsamer Konsument hoechstens zurueckliegen darf (1 s)
pub(crate) const TRACK_PUFFER: usize = 50;

pub(crate) type TrackSender = mpsc::Sender<Result<AudioFrame, TrackEnde>>;

/// Erstellt Sende-Ende und Track. Wird der Sender gedroppt, endet der
/// Track mit `TrackEnde::Beendet`.
pub(crate) fn track_kanal(id: impl Into<String>) -> (TrackSender, KanalTrack) {
    let (tx, rx) = mpsc::channel(TRACK_PUFFER);
    (tx, KanalTrack { id: id.into(), rx })
}

/// Track, der Frames aus einer Queue liefert
pub struct KanalTrack {
    id: String,
    rx: mpsc::Receiver<Result<AudioFrame, TrackEnde>>,
}

impl KanalTrack {
    pub(crate) fn neu(
        id: impl Into<String>,
        rx: mpsc::Receiver<Result<AudioFrame, TrackEnde>>,
    ) -> Self {
        Self { id: id.into(), rx }
    }
}

#[async_trait]
impl EingehenderTrack for KanalTrack {
    fn id(&self) -> &str {
        &self.id
    }

    async fn empfangen(&mut self) -> Result<AudioFrame, TrackEnde> {
        match self.rx.recv().await {
            Some(ergebnis) => ergebnis,
            None => Err(TrackEnde::Beendet),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn gedroppter_sender_beendet_track() {
        let (tx, mut track) = track_kanal("t1");
        tx.send(Ok(AudioFrame::stille(0))).await.unwrap();
        drop(tx);

        assert_eq!(track.id(), "t1");
        assert!(track.empfangen().await.is_ok());
        assert_eq!(track.empfangen().await, Err(TrackEnde::Beendet));
    }

    #[tokio::test]
    async fn fehler_wird_durchgereicht() {
        let (tx, mut track) = track_kanal("t2");
        tx.send(Err(TrackEnde::Fehler("weg".into()))).await.unwrap();
        assert_eq!(
            track.empfangen().await,
            Err(TrackEnde::Fehler("weg".into()))
        );
    }
}
