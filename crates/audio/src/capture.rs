//! Mikrofon-Capture via cpal
//!
//! cpal::Stream ist !Send. Der Stream lebt deshalb in einem eigenen
//! Geraete-Thread; der cpal-Callback schreibt s16-Samples in einen
//! lock-free Ring-Buffer, dessen Consumer-Seite `CpalCapture` haelt.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig};
use crossbeam_channel::{bounded, Sender};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::thread::JoinHandle;
use tracing::{debug, error, trace, warn};

use crate::device::{cpal_eingabegeraet_laden, CaptureGeraet, GeraeteKonfig};
use crate::error::{AudioError, AudioResult};

/// Ab so vielen aufgestauten Chunks werden die aeltesten Samples verworfen
const MAX_RUECKSTAU_CHUNKS: usize = 3;

/// Aufnahmegeraet auf cpal-Basis
pub struct CpalCapture {
    consumer: HeapCons<i16>,
    stop_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
    /// Summe der per Stille aufgefuellten Samples (Underflow)
    fehlende_samples: u64,
}

impl CpalCapture {
    /// Oeffnet das Geraet und startet den Stream im Geraete-Thread
    pub fn oeffnen(geraet: Option<String>, konfig: GeraeteKonfig) -> AudioResult<Self> {
        let (bereit_tx, bereit_rx) = bounded::<AudioResult<HeapCons<i16>>>(1);
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let thread = std::thread::Builder::new()
            .name("sprechfunk-capture".to_string())
            .spawn(move || {
                let stream = cpal_eingabegeraet_laden(geraet.as_deref())
                    .and_then(|device| capture_stream_oeffnen(&device, &konfig));
                match stream {
                    Ok((stream, consumer)) => {
                        let _ = bereit_tx.send(Ok(consumer));
                        // Blockiert bis schliessen() oder Drop des Senders
                        let _ = stop_rx.recv();
                        drop(stream);
                        debug!("Capture-Stream geschlossen");
                    }
                    Err(e) => {
                        let _ = bereit_tx.send(Err(e));
                    }
                }
            })?;

        let consumer = bereit_rx
            .recv()
            .map_err(|e| AudioError::StreamFehler(e.to_string()))??;

        Ok(Self {
            consumer,
            stop_tx: Some(stop_tx),
            thread: Some(thread),
            fehlende_samples: 0,
        })
    }

    pub fn fehlende_samples(&self) -> u64 {
        self.fehlende_samples
    }
}

impl CaptureGeraet for CpalCapture {
    fn lesen(&mut self, samples: usize) -> AudioResult<Vec<i16>> {
        if self.stop_tx.is_none() {
            return Err(AudioError::GeraetGeschlossen);
        }

        // Rueckstau begrenzen, sonst waechst die Latenz nach langem Schweigen
        let aufgestaut = self.consumer.occupied_len();
        if aufgestaut > samples * MAX_RUECKSTAU_CHUNKS {
            let verworfen = self.consumer.skip(aufgestaut - samples);
            trace!(verworfen, "Capture-Overflow, alte Samples verworfen");
        }

        let mut puffer = vec![0i16; samples];
        let gelesen = self.consumer.pop_slice(&mut puffer);
        if gelesen < samples {
            self.fehlende_samples += (samples - gelesen) as u64;
            trace!(fehlend = samples - gelesen, "Capture-Underflow, mit Stille aufgefuellt");
        }
        Ok(puffer)
    }

    fn schliessen(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
            if let Some(thread) = self.thread.take() {
                let _ = thread.join();
            }
            debug!("CpalCapture geschlossen");
        }
    }
}

impl Drop for CpalCapture {
    fn drop(&mut self) {
        self.schliessen();
    }
}

/// Oeffnet einen Capture-Stream auf dem gegebenen Geraet.
///
/// Gibt den Stream und den Ring-Buffer Consumer zurueck.
/// Der Producer laeuft im cpal-Callback-Thread.
fn capture_stream_oeffnen(
    device: &Device,
    konfig: &GeraeteKonfig,
) -> AudioResult<(Stream, HeapCons<i16>)> {
    let stream_config = StreamConfig {
        channels: konfig.kanaele,
        sample_rate: cpal::SampleRate(konfig.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let rb = HeapRb::<i16>::new(konfig.puffer_samples());
    let (mut producer, consumer) = rb.split();

    let err_fn = |err| error!("Capture-Fehler: {}", err);

    let sample_format = device
        .supported_input_configs()
        .map_err(|e| AudioError::StreamFehler(e.to_string()))?
        .find(|c| {
            c.min_sample_rate().0 <= konfig.sample_rate
                && c.max_sample_rate().0 >= konfig.sample_rate
                && c.channels() >= konfig.kanaele
        })
        .map(|c| c.sample_format())
        .unwrap_or(SampleFormat::I16);

    let stream = match sample_format {
        SampleFormat::I16 => device
            .build_input_stream(
                &stream_config,
                move |data: &[i16], _| ring_fuellen(&mut producer, data),
                err_fn,
                None,
            )
            .map_err(|e| AudioError::StreamFehler(e.to_string()))?,
        SampleFormat::F32 => device
            .build_input_stream(
                &stream_config,
                move |data: &[f32], _| {
                    let samples: Vec<i16> = data
                        .iter()
                        .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
                        .collect();
                    ring_fuellen(&mut producer, &samples);
                },
                err_fn,
                None,
            )
            .map_err(|e| AudioError::StreamFehler(e.to_string()))?,
        SampleFormat::U8 => device
            .build_input_stream(
                &stream_config,
                move |data: &[u8], _| {
                    let samples: Vec<i16> =
                        data.iter().map(|&s| ((s as i16) - 128) << 8).collect();
                    ring_fuellen(&mut producer, &samples);
                },
                err_fn,
                None,
            )
            .map_err(|e| AudioError::StreamFehler(e.to_string()))?,
        _ => {
            return Err(AudioError::StreamFehler(format!(
                "Nicht unterstuetztes Sample-Format: {:?}",
                sample_format
            )))
        }
    };

    stream
        .play()
        .map_err(|e| AudioError::StreamFehler(e.to_string()))?;

    debug!(
        "Capture-Stream geoeffnet: {}Hz {}ch",
        konfig.sample_rate, konfig.kanaele
    );

    Ok((stream, consumer))
}

fn ring_fuellen(producer: &mut HeapProd<i16>, data: &[i16]) {
    let written = producer.push_slice(data);
    if written < data.len() {
        warn!(
            "Capture Ring-Buffer voll, {} Samples verworfen",
            data.len() - written
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sprechfunk_core::CHUNK;

    #[test]
    #[ignore = "Benoetigt Audio-Hardware"]
    fn capture_liefert_chunk_und_schliesst_idempotent() {
        let mut capture = CpalCapture::oeffnen(None, GeraeteKonfig::default())
            .expect("Capture-Stream sollte oeffenbar sein");
        std::thread::sleep(std::time::Duration::from_millis(50));
        assert_eq!(capture.lesen(CHUNK).unwrap().len(), CHUNK);
        capture.schliessen();
        capture.schliessen();
        assert!(matches!(
            capture.lesen(CHUNK),
            Err(AudioError::GeraetGeschlossen)
        ));
    }
}
