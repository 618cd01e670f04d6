//! 에러 타입 정의

use thiserror::Error;

use crate::packet::AckKind;

/// PSP 프로토콜 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON 에러: {0}")]
    Json(#[from] serde_json::Error),

    #[error("패킷이 너무 짧음: {len} bytes (헤더 {header} bytes)")]
    PacketTooShort { len: usize, header: usize },

    #[error("페이로드 길이 불일치: declared={declared}, available={available}")]
    PayloadLengthMismatch { declared: usize, available: usize },

    #[error("알 수 없는 패킷 타입 코드: {0}")]
    UnknownPacketKind(u8),

    #[error("알 수 없는 ACK 타입 코드: {0}")]
    UnknownAckKind(u8),

    #[error("페이로드 크기 초과: {len} bytes (최대 {max})")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("유효하지 않은 메타데이터: {0}")]
    InvalidMetadata(String),

    #[error("ACK 대기 타임아웃")]
    Timeout,

    #[error("알 수 없는 세션: {0}")]
    UnknownSession(uuid::Uuid),

    #[error("유효하지 않은 청크 인덱스: {index} (총 {total_chunks})")]
    InvalidChunkIndex { index: i32, total_chunks: u32 },

    #[error("체크섬 불일치: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("수신자가 전송 거부: {0}")]
    Rejected(String),

    #[error("재시도 초과: {phase} ({attempts}회 시도)")]
    RetryExhausted { phase: String, attempts: u32 },

    #[error("예상하지 못한 ACK: expected {expected:?}, got {got:?} ({reason})")]
    UnexpectedAck {
        expected: AckKind,
        got: AckKind,
        reason: String,
    },

    #[error("전송 취소됨")]
    Cancelled,

    #[error("이미 정지된 인스턴스")]
    AlreadyStopped,

    #[error("설정 에러: {0}")]
    Config(String),

    #[error("저장소 에러: {0}")]
    Storage(String),

    #[error("보안 검사 에러: {0}")]
    Security(String),
}

impl Error {
    /// 디코딩 단계에서 발생하는 프로토콜 에러 여부
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            Error::PacketTooShort { .. }
                | Error::PayloadLengthMismatch { .. }
                | Error::UnknownPacketKind(_)
                | Error::UnknownAckKind(_)
                | Error::PayloadTooLarge { .. }
                | Error::InvalidMetadata(_)
        )
    }
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
