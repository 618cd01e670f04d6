//! 송신자
//!
//! 단일 파일 전송 세션:
//! `SendMetadata → AwaitMetadataAck → {SendChunk → AwaitChunkAck}* → AwaitCompletionAck → Done | Failed`
//!
//! - Stop-and-wait: 세션당 미확인 패킷은 항상 1개
//! - ACK 타임아웃마다 재전송, `max_retries` 초과 시 전송 실패
//! - REJECTED ACK은 남은 재시도와 관계없이 즉시 중단

use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::checksum::sha256_file_async;
use crate::chunk::FileChunker;
use crate::message::{now_millis, TransferMetadata};
use crate::packet::{AckKind, Packet, PacketKind, SessionId};
use crate::transport::UdpClient;
use crate::{Config, Error, Result};

/// 송신 단계 (재시도 초과 에러 표기용)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SendPhase {
    Metadata,
    Chunk(u32),
    Completion,
}

impl SendPhase {
    /// 이 단계가 기다리는 ACK인지
    fn accepts(self, ack: AckKind, chunk_index: i32) -> bool {
        match self {
            SendPhase::Metadata => ack == AckKind::Metadata,
            SendPhase::Chunk(index) => ack == AckKind::Chunk && chunk_index == index as i32,
            SendPhase::Completion => ack == AckKind::Complete,
        }
    }
}

impl fmt::Display for SendPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendPhase::Metadata => write!(f, "metadata"),
            SendPhase::Chunk(index) => write!(f, "chunk {}", index),
            SendPhase::Completion => write!(f, "completion"),
        }
    }
}

/// ACK 대기 결과
#[derive(Debug, PartialEq, Eq)]
enum AckOutcome {
    Accepted,
    /// 빈 파일: METADATA ACK 유실 후 COMPLETE가 먼저 도착
    Completed,
    Retry(String),
}

/// 전송 결과 요약
#[derive(Debug, Clone)]
pub struct TransferReport {
    pub session_id: SessionId,
    pub file_name: String,
    pub file_size: u64,
    pub total_chunks: u32,
    pub checksum: String,
    /// 첫 전송 이후 추가 전송 횟수
    pub retransmissions: u64,
    pub elapsed: Duration,
}

impl TransferReport {
    /// 처리량 (MB/s)
    pub fn throughput_mbps(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        self.file_size as f64 / secs / 1_000_000.0
    }
}

/// 진행 중인 송신 세션 (소켓 1개 점유)
struct SenderSession {
    client: UdpClient,
    target: SocketAddr,
    session_id: SessionId,
    ack_timeout: Duration,
    max_retries: u32,
    cancel: CancellationToken,
    retransmissions: u64,
    total_chunks: u32,
}

impl SenderSession {
    /// 패킷 전송 후 대응 ACK까지 대기, 타임아웃 시 재전송
    async fn deliver(&mut self, packet: &Packet, phase: SendPhase) -> Result<AckOutcome> {
        let attempts = self.max_retries + 1;

        for attempt in 1..=attempts {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            if attempt > 1 {
                self.retransmissions += 1;
            }

            self.client.send(packet, self.target).await?;

            match self.await_ack(phase).await {
                Ok(outcome @ (AckOutcome::Accepted | AckOutcome::Completed)) => return Ok(outcome),
                Ok(AckOutcome::Retry(reason)) => {
                    warn!(
                        "세션 {} {} 재시도 요청: {} (attempt {}/{})",
                        self.session_id, phase, reason, attempt, attempts
                    );
                }
                Err(Error::Timeout) => {
                    warn!(
                        "세션 {} {} ACK 타임아웃 (attempt {}/{})",
                        self.session_id, phase, attempt, attempts
                    );
                }
                Err(e) => return Err(e),
            }
        }

        Err(Error::RetryExhausted {
            phase: phase.to_string(),
            attempts,
        })
    }

    /// 같은 세션의 ACK을 `ack_timeout` 동안 대기
    ///
    /// 다른 세션의 ACK과 이전 단계의 중복 ACK은 무시하고 남은 시간 동안 계속 기다린다.
    async fn await_ack(&mut self, phase: SendPhase) -> Result<AckOutcome> {
        let deadline = Instant::now() + self.ack_timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::Timeout);
            }

            let (packet, _from) = tokio::select! {
                _ = self.cancel.cancelled() => return Err(Error::Cancelled),
                received = self.client.recv_timeout(remaining) => received?,
            };

            if packet.kind() != PacketKind::Ack {
                debug!("ACK 아닌 패킷 무시: {}", packet);
                continue;
            }
            if packet.session_id() != self.session_id {
                debug!("다른 세션 ACK 무시: {}", packet.session_id());
                continue;
            }

            let Some(ack) = packet.ack_kind() else {
                continue;
            };

            match ack {
                AckKind::Rejected => return Err(Error::Rejected(packet.reason())),
                _ if phase.accepts(ack, packet.chunk_index()) => return Ok(AckOutcome::Accepted),
                AckKind::Complete if phase == SendPhase::Metadata && self.total_chunks == 0 => {
                    return Ok(AckOutcome::Completed);
                }
                AckKind::Retry if phase == SendPhase::Completion => {
                    return Err(Error::UnexpectedAck {
                        expected: AckKind::Complete,
                        got: AckKind::Retry,
                        reason: packet.reason(),
                    });
                }
                AckKind::Retry => return Ok(AckOutcome::Retry(packet.reason())),
                _ => {
                    debug!("이전 단계 ACK 무시 ({}): {}", phase, packet);
                }
            }
        }
    }
}

/// 파일 송신자
///
/// 전송마다 독립 소켓을 열기 때문에 여러 전송을 병렬로 실행해도 공유 상태가 없다.
#[derive(Debug, Clone)]
pub struct FileSender {
    config: Config,
}

impl FileSender {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// 파일 전송
    pub async fn send_file(
        &self,
        path: impl AsRef<Path>,
        target: SocketAddr,
    ) -> Result<TransferReport> {
        self.send_file_cancellable(path, target, CancellationToken::new())
            .await
    }

    /// 취소 가능한 파일 전송
    ///
    /// 취소되면 현재 ACK 대기를 즉시 중단하고 소켓을 해제한다.
    pub async fn send_file_cancellable(
        &self,
        path: impl AsRef<Path>,
        target: SocketAddr,
        cancel: CancellationToken,
    ) -> Result<TransferReport> {
        let path = path.as_ref();
        let start = Instant::now();
        let session_id = SessionId::new_v4();

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_owned)
            .ok_or_else(|| {
                Error::InvalidMetadata(format!("파일 이름 없음: {}", path.display()))
            })?;

        let checksum = sha256_file_async(path).await?;
        let chunker = FileChunker::open(path, self.config.chunk_size)?;
        let file_size = chunker.file_size();
        let total_chunks = chunker.total_chunks();
        let total_chunks_wire = i32::try_from(total_chunks)
            .map_err(|_| Error::Config(format!("청크 수 초과: {}", total_chunks)))?;

        let client = UdpClient::for_target(target, self.config.recv_buffer_size).await?;
        let mut session = SenderSession {
            client,
            target,
            session_id,
            ack_timeout: self.config.ack_timeout(),
            max_retries: self.config.max_retries,
            cancel,
            retransmissions: 0,
            total_chunks,
        };

        let metadata = TransferMetadata {
            session_id,
            file_name: file_name.clone(),
            file_size,
            total_chunks,
            checksum: checksum.clone(),
            sender_peer_id: self.config.peer_id.clone(),
            timestamp: now_millis(),
        };
        let packet = Packet::metadata(session_id, total_chunks_wire, metadata.to_bytes()?);

        info!(
            "Session {} -> {}: {} ({} bytes, {} chunks)",
            session_id, target, file_name, file_size, total_chunks
        );

        let metadata_outcome = session.deliver(&packet, SendPhase::Metadata).await?;

        if metadata_outcome == AckOutcome::Completed {
            info!(
                "Session {} completed before metadata ACK (empty file)",
                session_id
            );
        } else {
            info!("Metadata acknowledged for session {}", session_id);

            for chunk in chunker {
                let chunk = chunk?;
                let packet = Packet::data(
                    session_id,
                    chunk.index as i32,
                    total_chunks_wire,
                    chunk.data,
                );
                session
                    .deliver(&packet, SendPhase::Chunk(chunk.index))
                    .await?;
                debug!("Chunk {}/{} acknowledged", chunk.index + 1, total_chunks);
            }

            info!(
                "All chunks sent for session {}, awaiting completion ACK",
                session_id
            );
            // RETRY/REJECTED는 await_ack에서 에러로 변환
            session.await_ack(SendPhase::Completion).await?;
        }

        let report = TransferReport {
            session_id,
            file_name,
            file_size,
            total_chunks,
            checksum,
            retransmissions: session.retransmissions,
            elapsed: start.elapsed(),
        };
        info!(
            "Session {} completed: {:.2}s, {} retransmissions",
            session_id,
            report.elapsed.as_secs_f64(),
            report.retransmissions
        );
        Ok(report)
    }
}
