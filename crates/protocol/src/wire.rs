//! Wire-Format der Relay-Verbindung
//!
//! Jeder `RelayFrame` wird als `Laenge (u32 BE) + JSON` uebertragen:
//!
//! ```text
//! +--------+--------+--------+--------+----...----+
//! | Laenge (u32 BE), 4 Bytes          | JSON      |
//! +--------+--------+--------+--------+----...----+
//! ```
//!
//! Die Laenge zaehlt nur die JSON-Bytes. Zu grosse Frames werden beim
//! Lesen wie beim Schreiben abgelehnt, bevor Speicher reserviert wird.
//!
//! [`FrameCodec`] behandelt unlesbares JSON als Stream-Fehler. Das Relay
//! nutzt [`TolerantFrameCodec`]: dort ist ein unlesbarer Frame nur ein
//! fehlerhaftes Element, der Stream laeuft weiter.

use bytes::{Buf, BufMut, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

use crate::relay::RelayFrame;

/// Standard-maximale Frame-Groesse (1 MB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Groesse des Laengen-Felds in Bytes
pub const LENGTH_FIELD_SIZE: usize = 4;

fn ungueltig(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

// ---------------------------------------------------------------------------
// FrameCodec
// ---------------------------------------------------------------------------

/// tokio-util Codec fuer `RelayFrame`s
///
/// ```rust,no_run
/// use tokio_util::codec::Framed;
/// use hushlink_protocol::wire::FrameCodec;
///
/// // let stream = TcpStream::connect(...).await?;
/// // let framed = Framed::new(stream, FrameCodec::with_max_size(64 * 1024));
/// ```
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::with_max_size(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Erstellt einen Codec mit eigener Obergrenze fuer die Frame-Groesse
    pub fn with_max_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Trennt den naechsten vollstaendigen Frame ab und liefert dessen JSON-Bytes
    ///
    /// Die Bytes sind danach aus `src` entfernt, auch wenn das JSON spaeter
    /// nicht lesbar ist.
    fn frame_abtrennen(&self, src: &mut BytesMut) -> io::Result<Option<BytesMut>> {
        if src.len() < LENGTH_FIELD_SIZE {
            return Ok(None);
        }

        // Laenge lesen ohne den Buffer zu veraendern
        let mut laenge_bytes = [0u8; LENGTH_FIELD_SIZE];
        laenge_bytes.copy_from_slice(&src[..LENGTH_FIELD_SIZE]);
        let laenge = u32::from_be_bytes(laenge_bytes) as usize;

        if laenge > self.max_frame_size {
            return Err(ungueltig(format!(
                "Frame zu gross: {laenge} Bytes (Maximum: {} Bytes)",
                self.max_frame_size
            )));
        }

        let gesamt = LENGTH_FIELD_SIZE + laenge;
        if src.len() < gesamt {
            src.reserve(gesamt - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_FIELD_SIZE);
        Ok(Some(src.split_to(laenge)))
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = RelayFrame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(json) = self.frame_abtrennen(src)? else {
            return Ok(None);
        };
        serde_json::from_slice(&json)
            .map(Some)
            .map_err(|e| ungueltig(format!("Ungueltiger Relay-Frame: {e}")))
    }
}

impl Encoder<RelayFrame> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, item: RelayFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let json = serde_json::to_vec(&item)
            .map_err(|e| ungueltig(format!("JSON-Serialisierung fehlgeschlagen: {e}")))?;

        if json.len() > self.max_frame_size {
            return Err(ungueltig(format!(
                "Frame '{}' zu gross: {} Bytes (Maximum: {} Bytes)",
                item.typ_name(),
                json.len(),
                self.max_frame_size
            )));
        }

        dst.reserve(LENGTH_FIELD_SIZE + json.len());
        dst.put_u32(json.len() as u32);
        dst.put_slice(&json);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// TolerantFrameCodec
// ---------------------------------------------------------------------------

/// Frame mit gueltigem Laengenfeld, dessen JSON kein `RelayFrame` ist
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UngueltigerFrame {
    pub grund: String,
}

impl std::fmt::Display for UngueltigerFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Ungueltiger Relay-Frame: {}", self.grund)
    }
}

/// Codec fuer die Relay-Seite einer Verbindung
///
/// Unlesbares JSON wird als `Ok(Some(Err(..)))` geliefert, die Bytes sind
/// bereits verbraucht. Nur zu grosse Frames und IO-Fehler beenden den Stream.
#[derive(Debug, Clone, Default)]
pub struct TolerantFrameCodec {
    inner: FrameCodec,
}

impl TolerantFrameCodec {
    pub fn with_max_size(max_frame_size: usize) -> Self {
        Self {
            inner: FrameCodec::with_max_size(max_frame_size),
        }
    }
}

impl Decoder for TolerantFrameCodec {
    type Item = Result<RelayFrame, UngueltigerFrame>;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(json) = self.inner.frame_abtrennen(src)? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_slice(&json).map_err(|e| {
            UngueltigerFrame {
                grund: e.to_string(),
            }
        })))
    }
}

impl Encoder<RelayFrame> for TolerantFrameCodec {
    type Error = io::Error;

    fn encode(&mut self, item: RelayFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        self.inner.encode(item, dst)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
