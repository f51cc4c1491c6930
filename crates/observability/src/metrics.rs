//! Prometheus-kompatible Metriken fuer Sprechfunk
//!
//! Registrierte Metriken:
//! - `sprechfunk_audio_frames_total` – Counter: Erzeugte Capture-Frames
//! - `sprechfunk_audio_stille_frames_total` – Counter: Stille-Frames (Gate zu)
//! - `sprechfunk_audio_lesefehler_total` – Counter: Capture-Lesefehler
//! - `sprechfunk_signaling_gesendet_total` – Counter: Gesendete Signaling-Nachrichten
//! - `sprechfunk_signaling_abgelehnt_total` – Counter: Verworfene Ereignisse
//! - `sprechfunk_wiedergaben_total` – Counter: Gestartete Wiedergaben
//! - `sprechfunk_ptt_aktiv` – Gauge: 1 solange gesendet wird
//! - `sprechfunk_session_zustand` – Gauge je Zustand: 1 fuer den aktuellen

use anyhow::Result;
use axum::{response::IntoResponse, routing::get, Router};
use prometheus::{Encoder, IntCounter, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Alle Session-Zustaende als Label-Werte
pub const SESSION_ZUSTAENDE: [&str; 6] = [
    "neu",
    "verhandlung",
    "verbunden",
    "getrennt",
    "fehlgeschlagen",
    "geschlossen",
];

/// Momentaufnahme der Zaehler eines Endpunkts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetrikSchnappschuss {
    pub audio_frames: u64,
    pub stille_frames: u64,
    pub lesefehler: u64,
    pub signaling_gesendet: u64,
    pub signaling_abgelehnt: u64,
    pub wiedergaben: u64,
    pub ptt_aktiv: bool,
    pub session_zustand: String,
}

/// Alle Sprechfunk-Prometheus-Metriken
#[derive(Clone)]
pub struct SprechfunkMetrics {
    pub registry: Arc<Registry>,

    // Audio
    pub audio_frames_total: IntCounter,
    pub audio_stille_frames_total: IntCounter,
    pub audio_lesefehler_total: IntCounter,

    // Signaling
    pub signaling_gesendet_total: IntCounter,
    pub signaling_abgelehnt_total: IntCounter,
    pub wiedergaben_total: IntCounter,

    // Zustand
    pub ptt_aktiv: IntGauge,
    pub session_zustand: IntGaugeVec,
}

fn zaehler(registry: &Registry, name: &str, hilfe: &str) -> Result<IntCounter> {
    let zaehler = IntCounter::with_opts(Opts::new(name, hilfe))?;
    registry.register(Box::new(zaehler.clone()))?;
    Ok(zaehler)
}

/// Zieht einen Counter auf einen kumulativen Wert nach
fn nachziehen(zaehler: &IntCounter, wert: u64) {
    let aktuell = zaehler.get();
    if wert > aktuell {
        zaehler.inc_by(wert - aktuell);
    }
}

impl SprechfunkMetrics {
    /// Erstellt und registriert alle Metriken in einer neuen Registry
    pub fn neu() -> Result<Self> {
        let registry = Registry::new();

        // --- Audio ---
        let audio_frames_total = zaehler(
            &registry,
            "sprechfunk_audio_frames_total",
            "Erzeugte Capture-Frames",
        )?;
        let audio_stille_frames_total = zaehler(
            &registry,
            "sprechfunk_audio_stille_frames_total",
            "Stille-Frames bei geschlossenem Gate",
        )?;
        let audio_lesefehler_total = zaehler(
            &registry,
            "sprechfunk_audio_lesefehler_total",
            "Capture-Lesefehler",
        )?;

        // --- Signaling ---
        let signaling_gesendet_total = zaehler(
            &registry,
            "sprechfunk_signaling_gesendet_total",
            "An den Bus uebergebene Signaling-Nachrichten",
        )?;
        let signaling_abgelehnt_total = zaehler(
            &registry,
            "sprechfunk_signaling_abgelehnt_total",
            "Verworfene Session-Ereignisse",
        )?;
        let wiedergaben_total = zaehler(
            &registry,
            "sprechfunk_wiedergaben_total",
            "Gestartete Wiedergaben",
        )?;

        // --- Zustand ---
        let ptt_aktiv = IntGauge::with_opts(Opts::new(
            "sprechfunk_ptt_aktiv",
            "1 solange die Sprechtaste aktiv ist",
        ))?;
        registry.register(Box::new(ptt_aktiv.clone()))?;

        let session_zustand = IntGaugeVec::new(
            Opts::new("sprechfunk_session_zustand", "Aktueller Session-Zustand"),
            &["zustand"],
        )?;
        registry.register(Box::new(session_zustand.clone()))?;
        for zustand in SESSION_ZUSTAENDE {
            session_zustand.with_label_values(&[zustand]).set(0);
        }

        Ok(Self {
            registry: Arc::new(registry),
            audio_frames_total,
            audio_stille_frames_total,
            audio_lesefehler_total,
            signaling_gesendet_total,
            signaling_abgelehnt_total,
            wiedergaben_total,
            ptt_aktiv,
            session_zustand,
        })
    }

    /// Uebernimmt eine Momentaufnahme. Counter laufen nie rueckwaerts.
    pub fn aktualisieren(&self, schnappschuss: &MetrikSchnappschuss) {
        nachziehen(&self.audio_frames_total, schnappschuss.audio_frames);
        nachziehen(&self.audio_stille_frames_total, schnappschuss.stille_frames);
        nachziehen(&self.audio_lesefehler_total, schnappschuss.lesefehler);
        nachziehen(
            &self.signaling_gesendet_total,
            schnappschuss.signaling_gesendet,
        );
        nachziehen(
            &self.signaling_abgelehnt_total,
            schnappschuss.signaling_abgelehnt,
        );
        nachziehen(&self.wiedergaben_total, schnappschuss.wiedergaben);
        self.ptt_aktiv.set(i64::from(schnappschuss.ptt_aktiv));
        for zustand in SESSION_ZUSTAENDE {
            let wert = i64::from(zustand == schnappschuss.session_zustand);
            self.session_zustand.with_label_values(&[zustand]).set(wert);
        }
    }

    /// Exportiert alle Metriken im Prometheus-Textformat
    pub fn exportieren(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Axum-Router fuer den `/metrics`-Endpunkt
pub fn metrics_router(metriken: SprechfunkMetrics) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metriken)
}

async fn metrics_handler(
    axum::extract::State(metriken): axum::extract::State<SprechfunkMetrics>,
) -> impl IntoResponse {
    match metriken.exportieren() {
        Ok(text) => (
            axum::http::StatusCode::OK,
            [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(err) => {
            tracing::error!("Metriken-Export fehlgeschlagen: {err}");
            axum::http::StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schnappschuss(zustand: &str) -> MetrikSchnappschuss {
        MetrikSchnappschuss {
            audio_frames: 50,
            stille_frames: 40,
            lesefehler: 1,
            signaling_gesendet: 1,
            signaling_abgelehnt: 2,
            wiedergaben: 0,
            ptt_aktiv: true,
            session_zustand: zustand.to_string(),
        }
    }

    #[test]
    fn metriken_erstellen_erfolgreich() {
        let metriken = SprechfunkMetrics::neu().unwrap();
        assert!(!metriken.registry.gather().is_empty());
    }

    #[test]
    fn schnappschuss_wird_uebernommen() {
        let metriken = SprechfunkMetrics::neu().unwrap();
        metriken.aktualisieren(&schnappschuss("verbunden"));

        assert_eq!(metriken.audio_frames_total.get(), 50);
        assert_eq!(metriken.audio_stille_frames_total.get(), 40);
        assert_eq!(metriken.signaling_abgelehnt_total.get(), 2);
        assert_eq!(metriken.ptt_aktiv.get(), 1);
        assert_eq!(
            metriken
                .session_zustand
                .with_label_values(&["verbunden"])
                .get(),
            1
        );
        assert_eq!(
            metriken.session_zustand.with_label_values(&["neu"]).get(),
            0
        );
    }

    #[test]
    fn counter_laufen_nicht_rueckwaerts() {
        let metriken = SprechfunkMetrics::neu().unwrap();
        metriken.aktualisieren(&schnappschuss("verbunden"));
        let mut kleiner = schnappschuss("geschlossen");
        kleiner.audio_frames = 10;
        kleiner.ptt_aktiv = false;
        metriken.aktualisieren(&kleiner);

        assert_eq!(metriken.audio_frames_total.get(), 50);
        assert_eq!(metriken.ptt_aktiv.get(), 0);
        assert_eq!(
            metriken
                .session_zustand
                .with_label_values(&["geschlossen"])
                .get(),
            1
        );
    }

    #[test]
    fn metriken_export_prometheus_format() {
        let metriken = SprechfunkMetrics::neu().unwrap();
        metriken.aktualisieren(&schnappschuss("verhandlung"));

        let output = metriken.exportieren().unwrap();
        assert!(output.contains("sprechfunk_audio_frames_total 50"));
        assert!(output.contains("sprechfunk_session_zustand{zustand=\"verhandlung\"} 1"));
        assert!(output.contains("# HELP"));
        assert!(output.contains("# TYPE"));
    }
}
