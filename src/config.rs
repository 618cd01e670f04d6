//! 프로토콜 설정

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use crate::{
    Error, Result, DEFAULT_CHUNK_SIZE, DEFAULT_DISCOVERY_PORT, DEFAULT_SERVER_PORT,
    MAX_PAYLOAD_SIZE,
};

/// PSP 프로토콜 설정
#[derive(Debug, Clone)]
pub struct Config {
    /// 로컬 피어 ID (디스커버리 자기 자신 판별용)
    pub peer_id: String,

    /// 청크 크기 (바이트)
    pub chunk_size: usize,

    /// ACK 대기 타임아웃 (밀리초)
    pub ack_timeout_ms: u64,

    /// 패킷당 추가 재시도 횟수
    pub max_retries: u32,

    /// 수신 서버 포트
    pub server_port: u16,

    /// 디스커버리 포트
    pub discovery_port: u16,

    /// Heartbeat 전송 대상 (기본: 브로드캐스트)
    pub broadcast_addr: SocketAddr,

    /// Heartbeat 주기 (밀리초)
    pub heartbeat_interval_ms: u64,

    /// 디스커버리 수신 폴링 타임아웃 (밀리초)
    pub discovery_poll_ms: u64,

    /// 핸들러 워커 수 (0이면 CPU 코어 수 사용)
    pub worker_count: usize,

    /// 수신 루프 → 워커 큐 깊이
    pub dispatch_queue_depth: usize,

    /// 수신 버퍼 크기
    pub recv_buffer_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            peer_id: uuid::Uuid::new_v4().to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            ack_timeout_ms: 5000,             // 5초
            max_retries: 5,
            server_port: DEFAULT_SERVER_PORT,
            discovery_port: DEFAULT_DISCOVERY_PORT,
            broadcast_addr: SocketAddr::V4(SocketAddrV4::new(
                Ipv4Addr::BROADCAST,
                DEFAULT_DISCOVERY_PORT,
            )),
            heartbeat_interval_ms: 3000,      // 3초
            discovery_poll_ms: 200,
            worker_count: 0,                  // CPU 코어 수 사용
            dispatch_queue_depth: 1024,
            recv_buffer_size: 65535,
        }
    }
}

impl Config {
    /// 지정한 피어 ID로 설정 생성
    pub fn with_peer_id(peer_id: impl Into<String>) -> Self {
        Self {
            peer_id: peer_id.into(),
            ..Self::default()
        }
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn discovery_poll(&self) -> Duration {
        Duration::from_millis(self.discovery_poll_ms)
    }

    /// 실제 사용할 워커 수
    pub fn effective_workers(&self) -> usize {
        if self.worker_count > 0 {
            self.worker_count
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        }
    }

    /// 설정 검증
    pub fn validate(&self) -> Result<()> {
        if self.peer_id.is_empty() {
            return Err(Error::Config("peer_id가 비어 있음".into()));
        }
        if self.chunk_size == 0 || self.chunk_size > MAX_PAYLOAD_SIZE {
            return Err(Error::Config(format!(
                "chunk_size는 1..={} 범위여야 함: {}",
                MAX_PAYLOAD_SIZE, self.chunk_size
            )));
        }
        if self.ack_timeout_ms == 0 {
            return Err(Error::Config("ack_timeout_ms는 0보다 커야 함".into()));
        }
        if self.heartbeat_interval_ms == 0 || self.discovery_poll_ms == 0 {
            return Err(Error::Config("디스커버리 주기는 0보다 커야 함".into()));
        }
        if self.dispatch_queue_depth == 0 {
            return Err(Error::Config("dispatch_queue_depth는 0보다 커야 함".into()));
        }
        if self.recv_buffer_size < crate::packet::HEADER_SIZE {
            return Err(Error::Config(format!(
                "recv_buffer_size가 헤더보다 작음: {}",
                self.recv_buffer_size
            )));
        }
        Ok(())
    }

    /// 안정적인 LAN용 설정
    pub fn lan() -> Self {
        Self {
            chunk_size: 32 * 1024,            // 32KB
            ack_timeout_ms: 1000,
            max_retries: 3,
            heartbeat_interval_ms: 2000,
            ..Self::default()
        }
    }

    /// 불안정한 네트워크용 설정
    pub fn unstable_network() -> Self {
        Self {
            chunk_size: 1200,                 // MTU 이하
            ack_timeout_ms: 8000,
            max_retries: 10,
            heartbeat_interval_ms: 5000,
            discovery_poll_ms: 500,
            ..Self::default()
        }
    }
}
