//! 프로토콜 메시지 정의
//!
//! METADATA, DISCOVERY 패킷의 페이로드는 JSON 텍스트로 인코딩된다.
//! 필드 누락은 일반 조회 실패가 아니라 `InvalidMetadata` 프로토콜 에러로 처리.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::packet::SessionId;
use crate::{Error, Result, MAX_PAYLOAD_SIZE};

/// 현재 시각 (epoch 밀리초)
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// 전송 메타데이터 (송신자 → 수신자)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferMetadata {
    pub session_id: SessionId,
    pub file_name: String,
    pub file_size: u64,
    pub total_chunks: u32,
    /// SHA-256 (소문자 hex)
    pub checksum: String,
    pub sender_peer_id: String,
    /// epoch 밀리초
    pub timestamp: u64,
}

impl TransferMetadata {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// 파싱 + 검증
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let metadata: Self = serde_json::from_slice(bytes)
            .map_err(|e| Error::InvalidMetadata(e.to_string()))?;
        metadata.validate()?;
        Ok(metadata)
    }

    pub fn validate(&self) -> Result<()> {
        if self.checksum.len() != 64 || !self.checksum.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::InvalidMetadata(format!(
                "checksum 형식 오류: {}",
                self.checksum
            )));
        }
        if self.sender_peer_id.is_empty() {
            return Err(Error::InvalidMetadata("senderPeerId가 비어 있음".into()));
        }
        // 청크는 최소 1바이트, 최대 MAX_PAYLOAD_SIZE
        if u64::from(self.total_chunks) > self.file_size
            || self.file_size > u64::from(self.total_chunks) * MAX_PAYLOAD_SIZE as u64
        {
            return Err(Error::InvalidMetadata(format!(
                "fileSize={}에 맞지 않는 totalChunks={}",
                self.file_size, self.total_chunks
            )));
        }
        self.safe_file_name().map(|_| ())
    }

    /// 경로 요소를 제거한 파일 이름
    pub fn safe_file_name(&self) -> Result<String> {
        Path::new(&self.file_name)
            .file_name()
            .and_then(|n| n.to_str())
            .filter(|n| !n.is_empty())
            .map(str::to_owned)
            .ok_or_else(|| {
                Error::InvalidMetadata(format!("유효하지 않은 파일 이름: {:?}", self.file_name))
            })
    }
}

/// Heartbeat 페이로드
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerAnnouncement {
    pub peer_id: String,
    /// 수신 서버 포트
    pub port: u16,
}

impl PeerAnnouncement {
    pub fn new(peer_id: impl Into<String>, port: u16) -> Self {
        Self {
            peer_id: peer_id.into(),
            port,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let announcement: Self = serde_json::from_slice(bytes)
            .map_err(|e| Error::InvalidMetadata(e.to_string()))?;
        if announcement.peer_id.is_empty() {
            return Err(Error::InvalidMetadata("peerId가 비어 있음".into()));
        }
        Ok(announcement)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TransferMetadata {
        TransferMetadata {
            session_id: SessionId::new_v4(),
            file_name: "report.pdf".into(),
            file_size: 10,
            total_chunks: 3,
            checksum: "ab".repeat(32),
            sender_peer_id: "peer-a".into(),
            timestamp: now_millis(),
        }
    }

    #[test]
    fn test_metadata_camel_case() {
        let metadata = sample();
        let json: serde_json::Value = serde_json::from_slice(&metadata.to_bytes().unwrap()).unwrap();
        for key in [
            "sessionId",
            "fileName",
            "fileSize",
            "totalChunks",
            "checksum",
            "senderPeerId",
            "timestamp",
        ] {
            assert!(json.get(key).is_some(), "missing {}", key);
        }
        assert_eq!(
            TransferMetadata::from_bytes(&metadata.to_bytes().unwrap()).unwrap(),
            metadata
        );
    }

    #[test]
    fn test_missing_field_is_protocol_error() {
        let json = br#"{"sessionId":"6f1c1f3e-8f7a-4a51-9a57-1d2c1b2f3e4d","fileName":"a"}"#;
        let err = TransferMetadata::from_bytes(json).unwrap_err();
        assert!(matches!(err, Error::InvalidMetadata(_)));
        assert!(err.is_protocol());
    }

    #[test]
    fn test_file_name_sanitised() {
        let mut metadata = sample();
        metadata.file_name = "../../etc/passwd".into();
        assert_eq!(metadata.safe_file_name().unwrap(), "passwd");

        metadata.file_name = "..".into();
        assert!(metadata.validate().is_err());
    }

    #[test]
    fn test_inconsistent_sizes_rejected() {
        let mut metadata = sample();
        metadata.total_chunks = 0;
        assert!(metadata.validate().is_err());

        metadata.file_size = 0;
        assert!(metadata.validate().is_ok());

        // 1바이트 파일에 청크 2^31-1개
        metadata.file_size = 1;
        metadata.total_chunks = i32::MAX as u32;
        assert!(matches!(metadata.validate(), Err(Error::InvalidMetadata(_))));

        // 청크 하나에 담을 수 없는 크기
        metadata.total_chunks = 1;
        metadata.file_size = MAX_PAYLOAD_SIZE as u64 + 1;
        assert!(metadata.validate().is_err());
        metadata.total_chunks = 2;
        assert!(metadata.validate().is_ok());
    }

    #[test]
    fn test_announcement() {
        let bytes = PeerAnnouncement::new("peer-b", 9876).to_bytes().unwrap();
        let parsed = PeerAnnouncement::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.peer_id, "peer-b");
        assert_eq!(parsed.port, 9876);

        // 다른 구현이 붙이는 추가 필드는 무시
        let legacy = br#"{"type":"P2P_PEER_DISCOVERY","peerId":"x","port":1}"#;
        assert!(PeerAnnouncement::from_bytes(legacy).is_ok());
        assert!(PeerAnnouncement::from_bytes(br#"{"port":1}"#).is_err());
    }
}
