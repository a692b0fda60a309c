//! Messages delivered to subscribers.

use serde::{Deserialize, Serialize};

use crate::download::{DownloadProgress, DownloadState};
use crate::format::{format_bytes, format_duration, format_speed};
use crate::store::DownloadRecord;

/// Progress of one download as seen by subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressPayload {
    pub download_id: u64,
    pub state: DownloadState,
    pub progress: f64,
    pub downloaded_bytes: u64,
    pub total_bytes: u64,
    pub speed: f64,
    pub eta: u64,
    pub error_message: Option<String>,
    pub downloaded_formatted: String,
    pub total_formatted: String,
    pub speed_formatted: String,
    pub eta_formatted: String,
}

impl ProgressPayload {
    pub fn new(
        download_id: u64,
        state: DownloadState,
        progress: &DownloadProgress,
        error_message: Option<String>,
    ) -> Self {
        Self {
            download_id,
            state,
            progress: progress.percentage(),
            downloaded_bytes: progress.downloaded_bytes,
            total_bytes: progress.total_bytes,
            speed: progress.speed,
            eta: progress.eta_secs,
            error_message,
            downloaded_formatted: format_bytes(progress.downloaded_bytes),
            total_formatted: format_bytes(progress.total_bytes),
            speed_formatted: format_speed(progress.speed),
            eta_formatted: format_duration(progress.eta_secs),
        }
    }

    /// Payload mirroring a stored record.
    pub fn from_record(record: &DownloadRecord) -> Self {
        let progress = DownloadProgress {
            downloaded_bytes: record.downloaded_bytes,
            total_bytes: record.total_bytes,
            speed: record.speed,
            eta_secs: record.eta,
        };
        let mut payload = Self::new(record.id, record.state, &progress, record.error_message.clone());
        // Completed records report 100 even when the total was never known.
        payload.progress = record.progress;
        payload
    }
}

/// Server-to-subscriber message, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Connected {
        client_id: String,
        message: String,
    },
    DownloadProgress {
        download_id: u64,
        data: ProgressPayload,
    },
    Subscribed {
        download_id: u64,
    },
    Unsubscribed {
        download_id: u64,
    },
    SubscribedAll,
    Pong,
    Error {
        message: String,
    },
}

impl ServerMessage {
    pub fn progress(payload: ProgressPayload) -> Self {
        Self::DownloadProgress {
            download_id: payload.download_id,
            data: payload,
        }
    }
}

/// Subscriber-to-server message, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Subscribe { download_id: u64 },
    Unsubscribe { download_id: u64 },
    SubscribeAll,
    Ping,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_message_shape() {
        let payload = ProgressPayload::new(
            4,
            DownloadState::Downloading,
            &DownloadProgress {
                downloaded_bytes: 512,
                total_bytes: 1024,
                speed: 1024.0,
                eta_secs: 1,
            },
            None,
        );
        let json = serde_json::to_value(ServerMessage::progress(payload)).unwrap();

        assert_eq!(json["type"], "download_progress");
        assert_eq!(json["download_id"], 4);
        assert_eq!(json["data"]["state"], "downloading");
        assert_eq!(json["data"]["progress"], 50.0);
        assert_eq!(json["data"]["speed_formatted"], "1.0 KB/s");
    }

    #[test]
    fn test_client_messages() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"subscribe","download_id":7}"#).unwrap();
        assert_eq!(msg, ClientMessage::Subscribe { download_id: 7 });

        let msg: ClientMessage = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Ping);

        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"reboot"}"#).is_err());
    }
}
