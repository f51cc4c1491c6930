//! Audio-Playback via cpal
//!
//! Gegenstueck zu `capture`: der Output-Stream lebt im Geraete-Thread und
//! liest aus einem lock-free Ring-Buffer, dessen Producer-Seite
//! `CpalWiedergabe` haelt.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig};
use crossbeam_channel::{bounded, Sender};
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::thread::JoinHandle;
use tracing::{debug, error, trace, warn};

use crate::device::{cpal_ausgabegeraet_laden, GeraeteKonfig, WiedergabeGeraet};
use crate::error::{AudioError, AudioResult};

/// Wiedergabegeraet auf cpal-Basis
pub struct CpalWiedergabe {
    producer: HeapProd<i16>,
    stop_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl CpalWiedergabe {
    /// Oeffnet das Geraet und startet den Stream im Geraete-Thread
    pub fn oeffnen(geraet: Option<String>, konfig: GeraeteKonfig) -> AudioResult<Self> {
        let (bereit_tx, bereit_rx) = bounded::<AudioResult<HeapProd<i16>>>(1);
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let thread = std::thread::Builder::new()
            .name("sprechfunk-playback".to_string())
            .spawn(move || {
                let stream = cpal_ausgabegeraet_laden(geraet.as_deref())
                    .and_then(|device| playback_stream_oeffnen(&device, &konfig));
                match stream {
                    Ok((stream, producer)) => {
                        let _ = bereit_tx.send(Ok(producer));
                        let _ = stop_rx.recv();
                        drop(stream);
                        debug!("Playback-Stream geschlossen");
                    }
                    Err(e) => {
                        let _ = bereit_tx.send(Err(e));
                    }
                }
            })?;

        let producer = bereit_rx
            .recv()
            .map_err(|e| AudioError::StreamFehler(e.to_string()))??;

        Ok(Self {
            producer,
            stop_tx: Some(stop_tx),
            thread: Some(thread),
        })
    }
}

impl WiedergabeGeraet for CpalWiedergabe {
    fn schreiben(&mut self, samples: &[i16]) -> AudioResult<()> {
        if self.stop_tx.is_none() {
            return Err(AudioError::GeraetGeschlossen);
        }
        let written = self.producer.push_slice(samples);
        if written < samples.len() {
            warn!(
                "Playback Ring-Buffer voll, {} Samples verworfen",
                samples.len() - written
            );
        }
        Ok(())
    }

    fn schliessen(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
            if let Some(thread) = self.thread.take() {
                let _ = thread.join();
            }
            debug!("CpalWiedergabe geschlossen");
        }
    }
}

impl Drop for CpalWiedergabe {
    fn drop(&mut self) {
        self.schliessen();
    }
}

/// Oeffnet einen Playback-Stream auf dem gegebenen Geraet.
fn playback_stream_oeffnen(
    device: &Device,
    konfig: &GeraeteKonfig,
) -> AudioResult<(Stream, HeapProd<i16>)> {
    let stream_config = StreamConfig {
        channels: konfig.kanaele,
        sample_rate: cpal::SampleRate(konfig.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let rb = HeapRb::<i16>::new(konfig.puffer_samples());
    let (producer, mut consumer): (HeapProd<i16>, HeapCons<i16>) = rb.split();

    let err_fn = |err| error!("Playback-Fehler: {}", err);

    let sample_format = device
        .supported_output_configs()
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
            .build_output_stream(
                &stream_config,
                move |data: &mut [i16], _| {
                    let read = consumer.pop_slice(data);
                    // Stille fuer fehlende Samples
                    if read < data.len() {
                        trace!("Playback Underrun: {} Samples fehlen", data.len() - read);
                        data[read..].fill(0);
                    }
                },
                err_fn,
                None,
            )
            .map_err(|e| AudioError::StreamFehler(e.to_string()))?,
        SampleFormat::F32 => device
            .build_output_stream(
                &stream_config,
                move |data: &mut [f32], _| {
                    let mut puffer = vec![0i16; data.len()];
                    let read = consumer.pop_slice(&mut puffer);
                    if read < data.len() {
                        trace!("Playback Underrun: {} Samples fehlen", data.len() - read);
                    }
                    for (out, s) in data.iter_mut().zip(puffer.iter()) {
                        *out = *s as f32 / i16::MAX as f32;
                    }
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
        "Playback-Stream geoeffnet: {}Hz {}ch",
        konfig.sample_rate, konfig.kanaele
    );

    Ok((stream, producer))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ignore = "Benoetigt Audio-Hardware"]
    fn wiedergabe_schreibt_und_schliesst_idempotent() {
        let mut wiedergabe = CpalWiedergabe::oeffnen(None, GeraeteKonfig::default())
            .expect("Playback-Stream sollte oeffenbar sein");
        assert!(wiedergabe.schreiben(&[0; 960]).is_ok());
        wiedergabe.schliessen();
        wiedergabe.schliessen();
        assert!(wiedergabe.schreiben(&[0; 960]).is_err());
    }
}
