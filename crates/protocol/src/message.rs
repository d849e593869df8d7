//! Chat-Inhalte
//!
//! Klartext-Format der Nachrichten die zwei Peers ueber den direkten
//! Transport austauschen. Der Inhalt wird vor dem Versand als JSON
//! kodiert und anschliessend hybrid verschluesselt; das Relay sieht ihn nie.

use serde::{Deserialize, Serialize};

use crate::envelope::base64_bytes;

/// Art des Inhalts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Text,
    Image,
}

/// Eine Chat-Nachricht
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatContent {
    #[serde(rename = "type")]
    pub content_type: ContentType,
    #[serde(with = "base64_bytes")]
    pub content: Vec<u8>,
}

impl ChatContent {
    /// Erstellt eine Text-Nachricht (UTF-8)
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content_type: ContentType::Text,
            content: text.into().into_bytes(),
        }
    }

    /// Erstellt eine Bild-Nachricht aus bereits kodierten Bilddaten
    pub fn image(data: Vec<u8>) -> Self {
        Self {
            content_type: ContentType::Image,
            content: data,
        }
    }

    /// Gibt den Text zurueck, falls es sich um gueltigen UTF-8-Text handelt
    pub fn als_text(&self) -> Option<&str> {
        match self.content_type {
            ContentType::Text => std::str::from_utf8(&self.content).ok(),
            ContentType::Image => None,
        }
    }

    /// Kodiert den Inhalt als JSON-Bytes
    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Dekodiert einen Inhalt aus JSON-Bytes
    pub fn from_bytes(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_nachricht() {
        let msg = ChatContent::text("hallo");
        assert_eq!(msg.als_text(), Some("hallo"));

        let json: serde_json::Value = serde_json::from_slice(&msg.to_bytes().unwrap()).unwrap();
        assert_eq!(json["type"], "text");
    }

    #[test]
    fn bild_hat_keinen_text() {
        let msg = ChatContent::image(vec![0x89, b'P', b'N', b'G']);
        assert_eq!(msg.als_text(), None);
        let zurueck = ChatContent::from_bytes(&msg.to_bytes().unwrap()).unwrap();
        assert_eq!(zurueck, msg);
    }

    #[test]
    fn unbekannter_typ_abgelehnt() {
        let json = br#"{"type":"video","content":""}"#;
        assert!(ChatContent::from_bytes(json).is_err());
    }
}
