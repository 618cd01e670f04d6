//! 수신 완료 알림 (웹훅)
//!
//! 수신자는 알림을 전용 워커 채널로 넘기기만 한다. 실제 전달(HTTP POST 등)은
//! 채널을 소비하는 쪽의 몫이며, 실패가 전송 결과에 영향을 주지 않는다.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// 웹훅 페이로드
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    pub file_name: String,
    pub file_path: String,
    pub file_size: u64,
    pub checksum: String,
    pub mime_type: String,
    pub received_from: String,
    /// epoch 밀리초
    pub timestamp: u64,
    pub security_status: String,
}

/// 알림 인터페이스 (논블로킹, 실패 무시)
pub trait Notifier: Send + Sync + 'static {
    fn notify(&self, payload: WebhookPayload);
}

/// 채널 기반 알림기
///
/// 제한된 큐에 넣고 즉시 반환한다. 큐가 가득 차거나 소비자가 사라지면 경고만 남긴다.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::Sender<WebhookPayload>,
}

impl ChannelNotifier {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<WebhookPayload>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, payload: WebhookPayload) {
        let file_name = payload.file_name.clone();
        match self.tx.try_send(payload) {
            Ok(()) => debug!("웹훅 알림 대기열 추가: {}", file_name),
            Err(e) => warn!("웹훅 알림 폐기 ({}): {}", file_name, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(name: &str) -> WebhookPayload {
        WebhookPayload {
            file_name: name.into(),
            file_path: format!("/tmp/{}", name),
            file_size: 3,
            checksum: "00".into(),
            mime_type: "unknown".into(),
            received_from: "peer-a".into(),
            timestamp: 1,
            security_status: "SAFE".into(),
        }
    }

    #[tokio::test]
    async fn test_channel_delivery_and_overflow() {
        let (notifier, mut rx) = ChannelNotifier::new(1);
        notifier.notify(payload("a.txt"));
        // 큐 포화 시 조용히 폐기
        notifier.notify(payload("b.txt"));

        assert_eq!(rx.recv().await.unwrap().file_name, "a.txt");
        assert!(rx.try_recv().is_err());

        drop(rx);
        notifier.notify(payload("c.txt"));
    }

    #[test]
    fn test_payload_json_keys() {
        let json = serde_json::to_value(payload("a.txt")).unwrap();
        assert_eq!(json["fileName"], "a.txt");
        assert_eq!(json["receivedFrom"], "peer-a");
        assert_eq!(json["securityStatus"], "SAFE");
    }
}
