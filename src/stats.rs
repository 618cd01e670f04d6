//! 전송 통계

use std::sync::atomic::{AtomicU64, Ordering};

/// 수신측 카운터
///
/// 여러 워커에서 동시에 갱신되므로 원자 카운터로 관리한다.
#[derive(Debug, Default)]
pub struct ReceiverStats {
    sessions_started: AtomicU64,
    sessions_stored: AtomicU64,
    sessions_quarantined: AtomicU64,
    sessions_rejected: AtomicU64,
    sessions_failed: AtomicU64,
    chunks_received: AtomicU64,
    duplicate_chunks: AtomicU64,
    bytes_received: AtomicU64,
    retry_acks: AtomicU64,
}

/// 특정 시점의 수신 통계
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiverStatsSnapshot {
    /// 생성된 세션 수
    pub sessions_started: u64,

    /// 수신 영역에 저장 완료 (COMPLETE)
    pub sessions_stored: u64,

    /// 격리 영역에 저장 (REJECTED)
    pub sessions_quarantined: u64,

    /// 보안 판정 실패 후 수신 영역 저장 (REJECTED, 격리 비활성)
    pub sessions_rejected: u64,

    /// 체크섬 불일치 또는 조립/저장 실패
    pub sessions_failed: u64,

    /// 신규 청크 수
    pub chunks_received: u64,

    /// 중복 청크 수
    pub duplicate_chunks: u64,

    /// 신규 청크 바이트 합
    pub bytes_received: u64,

    /// 송신한 RETRY ACK 수
    pub retry_acks: u64,
}

impl ReceiverStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_session_started(&self) {
        self.sessions_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stored(&self) {
        self.sessions_stored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_quarantined(&self) {
        self.sessions_quarantined.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.sessions_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.sessions_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_chunk(&self, size: usize) {
        self.chunks_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(size as u64, Ordering::Relaxed);
    }

    pub fn record_duplicate(&self) {
        self.duplicate_chunks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry_ack(&self) {
        self.retry_acks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ReceiverStatsSnapshot {
        ReceiverStatsSnapshot {
            sessions_started: self.sessions_started.load(Ordering::Relaxed),
            sessions_stored: self.sessions_stored.load(Ordering::Relaxed),
            sessions_quarantined: self.sessions_quarantined.load(Ordering::Relaxed),
            sessions_rejected: self.sessions_rejected.load(Ordering::Relaxed),
            sessions_failed: self.sessions_failed.load(Ordering::Relaxed),
            chunks_received: self.chunks_received.load(Ordering::Relaxed),
            duplicate_chunks: self.duplicate_chunks.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            retry_acks: self.retry_acks.load(Ordering::Relaxed),
        }
    }
}

impl ReceiverStatsSnapshot {
    /// 종료된 세션 수
    pub fn sessions_finished(&self) -> u64 {
        self.sessions_stored
            + self.sessions_quarantined
            + self.sessions_rejected
            + self.sessions_failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot() {
        let stats = ReceiverStats::new();
        stats.record_session_started();
        stats.record_chunk(4);
        stats.record_chunk(2);
        stats.record_duplicate();
        stats.record_stored();
        stats.record_failed();

        let snap = stats.snapshot();
        assert_eq!(snap.chunks_received, 2);
        assert_eq!(snap.bytes_received, 6);
        assert_eq!(snap.duplicate_chunks, 1);
        assert_eq!(snap.sessions_finished(), 2);
    }
}
