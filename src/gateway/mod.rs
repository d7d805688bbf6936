//! WhatsApp Gateway
//!
//! Owns the single protocol-client session: pairing, reconnect supervision,
//! message dispatch, and the process-wide connection status record.

pub mod manager;
pub mod qr;
pub mod store;

pub use manager::Gateway;
pub use store::SessionStore;

use serde::{Deserialize, Serialize};

/// The WhatsApp account this gateway is paired as.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectedUser {
    /// Raw JID, device suffix stripped (e.g. "15551234567@s.whatsapp.net").
    pub id: String,
    /// Push name, when known.
    pub name: String,
    /// Bare phone number (the user part of the JID).
    pub number: String,
}

impl ConnectedUser {
    /// Build from a raw JID string, stripping the `:device` suffix WhatsApp
    /// appends for linked devices ("1555123:12@s.whatsapp.net").
    pub fn from_raw_jid(raw: &str, name: &str) -> Self {
        let (user, server) = raw.split_once('@').unwrap_or((raw, "s.whatsapp.net"));
        let number = user.split(':').next().unwrap_or(user).to_string();
        Self {
            id: format!("{}@{}", number, server),
            name: name.to_string(),
            number,
        }
    }
}

/// Process-wide connection status. Replaced wholesale (never patched) on
/// every lifecycle transition; readers always see a complete snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub connected: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<ConnectedUser>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qr: Option<String>,
}

impl ConnectionStatus {
    pub fn initializing() -> Self {
        Self::disconnected("Initializing")
    }

    pub fn disconnected(message: &str) -> Self {
        Self {
            connected: false,
            message: message.to_string(),
            user: None,
            qr: None,
        }
    }

    pub fn awaiting_scan(qr_data_url: String) -> Self {
        Self {
            connected: false,
            message: "Scan the QR code with your phone".to_string(),
            user: None,
            qr: Some(qr_data_url),
        }
    }

    pub fn connected(user: Option<ConnectedUser>) -> Self {
        Self {
            connected: true,
            message: "Connected".to_string(),
            user,
            qr: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_from_raw_jid_strips_device_suffix() {
        let user = ConnectedUser::from_raw_jid("15551234567:12@s.whatsapp.net", "Ada");
        assert_eq!(user.number, "15551234567");
        assert_eq!(user.id, "15551234567@s.whatsapp.net");
        assert_eq!(user.name, "Ada");
    }

    #[test]
    fn test_user_from_plain_jid() {
        let user = ConnectedUser::from_raw_jid("443300000000@s.whatsapp.net", "");
        assert_eq!(user.number, "443300000000");
        assert_eq!(user.id, "443300000000@s.whatsapp.net");
    }

    #[test]
    fn test_status_serializes_camel_case_and_skips_none() {
        let status = ConnectionStatus::disconnected("Reconnecting");
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["connected"], false);
        assert_eq!(json["message"], "Reconnecting");
        assert!(json.get("user").is_none());
        assert!(json.get("qr").is_none());
    }

    #[test]
    fn test_awaiting_scan_carries_qr() {
        let status = ConnectionStatus::awaiting_scan("data:image/svg+xml;base64,AAAA".into());
        assert!(!status.connected);
        assert!(status.qr.as_deref().unwrap().starts_with("data:image/svg+xml"));
    }

    #[test]
    fn test_connected_status() {
        let user = ConnectedUser::from_raw_jid("1555:2@s.whatsapp.net", "Bob");
        let status = ConnectionStatus::connected(Some(user.clone()));
        assert!(status.connected);
        assert_eq!(status.user, Some(user));
        assert!(status.qr.is_none());
    }
}
