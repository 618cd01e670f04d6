//! # PSP (Peer Share Protocol)
//!
//! UDP 기반 세션형 파일 전송 + LAN 피어 디스커버리
//!
//! ## 핵심 특징
//! - **고정 헤더 패킷**: 32바이트 빅엔디안 헤더 + 페이로드
//! - **Stop-and-wait**: 세션당 미확인 패킷 1개, ACK 타임아웃 기반 재시도
//! - **세션 테이블**: 전송별 상태 머신, 세션 간 병렬 / 세션 내 직렬 처리
//! - **무결성 검증**: 조립 후 SHA-256 비교
//! - **Heartbeat 디스커버리**: 브로드캐스트 + 유니캐스트 응답

pub mod checksum;
pub mod chunk;
pub mod config;
pub mod discovery;
pub mod error;
pub mod message;
pub mod notify;
pub mod packet;
pub mod receiver;
pub mod security;
pub mod sender;
pub mod stats;
pub mod storage;
pub mod transport;

pub use chunk::{Chunk, FileChunker};
pub use config::Config;
pub use discovery::{PeerDiscovery, PeerInfo, PeerTable};
pub use error::{Error, Result};
pub use message::{PeerAnnouncement, TransferMetadata};
pub use notify::{ChannelNotifier, Notifier, WebhookPayload};
pub use packet::{AckKind, Packet, PacketKind, SessionId};
pub use receiver::{FileReceiver, SessionProgress, SessionState};
pub use security::{PermissivePolicy, SecurityPolicy, SecurityVerdict};
pub use sender::{FileSender, TransferReport};
pub use stats::{ReceiverStats, ReceiverStatsSnapshot};
pub use storage::{FsStorage, Storage};
pub use transport::{PacketHandler, ReplyHandle, UdpClient, UdpServer};

/// 최대 UDP 데이터그램 페이로드 (IPv4)
pub const MAX_DATAGRAM_SIZE: usize = 65507;

/// 최대 패킷 페이로드 크기
pub const MAX_PAYLOAD_SIZE: usize = MAX_DATAGRAM_SIZE - packet::HEADER_SIZE;

/// 기본 청크 크기 (바이트)
pub const DEFAULT_CHUNK_SIZE: usize = 8192;

/// 기본 수신 서버 포트
pub const DEFAULT_SERVER_PORT: u16 = 9876;

/// 기본 디스커버리 포트
pub const DEFAULT_DISCOVERY_PORT: u16 = 9875;
