//! 수신자 (세션 테이블)
//!
//! 세션 ID마다 상태 머신 하나:
//! `New → Receiving → Assembling → Validated → Stored | Rejected | Failed`
//!
//! - 세션 테이블은 DashMap, 세션 내부는 개별 Mutex로 직렬화
//! - 서로 다른 세션은 워커 풀에서 병렬 처리
//! - 한 세션의 실패가 다른 세션이나 서버 루프에 영향을 주지 않음

use std::fs::File;
use std::io::{BufWriter, Write};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::checksum::{checksum_matches, sha256_file};
use crate::message::{now_millis, TransferMetadata};
use crate::notify::{Notifier, WebhookPayload};
use crate::packet::{AckKind, Packet, PacketKind, SessionId, NOT_APPLICABLE};
use crate::security::{SecurityPolicy, SecurityVerdict};
use crate::stats::{ReceiverStats, ReceiverStatsSnapshot};
use crate::storage::Storage;
use crate::transport::{PacketHandler, ReplyHandle};
use crate::{Error, Result};

/// 세션 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Receiving,
    Assembling,
    Validated,
    Stored,
    Rejected,
    Failed,
}

/// 세션 진행 상황 (외부 조회용)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionProgress {
    pub state: SessionState,
    pub total_chunks: u32,
    pub received_chunks: u32,
    pub received_bytes: u64,
}

/// 수신 중인 전송 하나의 상태
///
/// 세션 테이블만 소유하며 세션 Mutex를 잡은 워커만 변경한다.
#[derive(Debug)]
struct TransferSession {
    session_id: SessionId,
    file_name: String,
    expected_checksum: String,
    total_chunks: u32,
    file_size: u64,
    sender_peer_id: String,
    scratch_dir: PathBuf,
    received: Vec<bool>,
    received_chunks: u32,
    received_bytes: u64,
    state: SessionState,
}

impl TransferSession {
    fn new(metadata: &TransferMetadata, file_name: String, scratch_dir: PathBuf) -> Self {
        Self {
            session_id: metadata.session_id,
            file_name,
            expected_checksum: metadata.checksum.clone(),
            total_chunks: metadata.total_chunks,
            file_size: metadata.file_size,
            sender_peer_id: metadata.sender_peer_id.clone(),
            scratch_dir,
            received: vec![false; metadata.total_chunks as usize],
            received_chunks: 0,
            received_bytes: 0,
            state: SessionState::Receiving,
        }
    }

    fn chunk_path(&self, index: u32) -> PathBuf {
        chunk_path(&self.scratch_dir, index)
    }

    /// 청크 인덱스 검증
    fn check_index(&self, index: i32) -> Result<usize> {
        if index < 0 || index as u32 >= self.total_chunks {
            return Err(Error::InvalidChunkIndex {
                index,
                total_chunks: self.total_chunks,
            });
        }
        Ok(index as usize)
    }

    fn mark_received(&mut self, index: usize, len: usize) {
        self.received[index] = true;
        self.received_chunks += 1;
        self.received_bytes += len as u64;
    }

    fn is_complete(&self) -> bool {
        self.received_chunks == self.total_chunks && self.received.iter().all(|r| *r)
    }

    fn progress(&self) -> SessionProgress {
        SessionProgress {
            state: self.state,
            total_chunks: self.total_chunks,
            received_chunks: self.received_chunks,
            received_bytes: self.received_bytes,
        }
    }
}

fn chunk_path(scratch_dir: &Path, index: u32) -> PathBuf {
    scratch_dir.join(format!("chunk-{:08}.part", index))
}

/// 검증까지 끝난 최종 저장 결과
enum Disposition {
    /// 안전, 수신 영역 저장
    Stored(PathBuf),
    /// 위험, 격리 영역 저장
    Quarantined(PathBuf),
    /// 위험, 격리 비활성이라 수신 영역 저장
    StoredUnsafe(PathBuf),
}

impl Disposition {
    fn path(&self) -> &Path {
        match self {
            Disposition::Stored(p) | Disposition::Quarantined(p) | Disposition::StoredUnsafe(p) => p,
        }
    }

    /// 절대 경로로 변환 (실패 시 원래 경로 유지)
    fn canonicalized(self) -> Self {
        let canonical = |p: PathBuf| std::fs::canonicalize(&p).unwrap_or(p);
        match self {
            Disposition::Stored(p) => Disposition::Stored(canonical(p)),
            Disposition::Quarantined(p) => Disposition::Quarantined(canonical(p)),
            Disposition::StoredUnsafe(p) => Disposition::StoredUnsafe(canonical(p)),
        }
    }
}

/// 청크를 인덱스 순서대로 이어 붙여 조립 파일 생성
fn assemble(scratch_dir: &Path, file_name: &str, total_chunks: u32) -> Result<PathBuf> {
    let assembled = scratch_dir.join(format!("{}.assembled", file_name));
    let mut out = BufWriter::new(File::create(&assembled)?);

    for index in 0..total_chunks {
        let mut part = File::open(chunk_path(scratch_dir, index))?;
        std::io::copy(&mut part, &mut out)?;
    }
    out.flush()?;
    Ok(assembled)
}

async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Io(std::io::Error::other(e)))?
}

/// 파일 수신자
pub struct FileReceiver {
    storage: Arc<dyn Storage>,
    security: Arc<dyn SecurityPolicy>,
    notifier: Option<Arc<dyn Notifier>>,
    sessions: DashMap<SessionId, Arc<Mutex<TransferSession>>>,
    stats: ReceiverStats,
}

impl FileReceiver {
    pub fn new(storage: Arc<dyn Storage>, security: Arc<dyn SecurityPolicy>) -> Self {
        Self {
            storage,
            security,
            notifier: None,
            sessions: DashMap::new(),
            stats: ReceiverStats::new(),
        }
    }

    /// 저장 완료 알림기 설정
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// 진행 중인 세션 수
    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    pub fn has_session(&self, session_id: SessionId) -> bool {
        self.sessions.contains_key(&session_id)
    }

    /// 세션 진행 상황
    pub async fn session_progress(&self, session_id: SessionId) -> Option<SessionProgress> {
        let session = self.session(session_id)?;
        let guard = session.lock().await;
        Some(guard.progress())
    }

    pub fn stats(&self) -> ReceiverStatsSnapshot {
        self.stats.snapshot()
    }

    fn session(&self, session_id: SessionId) -> Option<Arc<Mutex<TransferSession>>> {
        self.sessions.get(&session_id).map(|e| e.value().clone())
    }

    async fn send_ack(
        &self,
        reply: &ReplyHandle,
        to: SocketAddr,
        session_id: SessionId,
        kind: AckKind,
        chunk_index: i32,
        reason: &str,
    ) {
        if kind == AckKind::Retry {
            self.stats.record_retry_ack();
        }
        let ack = Packet::ack(session_id, kind, chunk_index, reason);
        if let Err(e) = reply.send(&ack, to).await {
            error!("ACK {:?} 전송 실패 (session {}): {}", kind, session_id, e);
        }
    }

    /// New → Receiving
    async fn handle_metadata(&self, packet: &Packet, from: SocketAddr, reply: &ReplyHandle) {
        let session_id = packet.session_id();

        if self.sessions.contains_key(&session_id) {
            debug!("세션 {} 메타데이터 재수신, 재확인", session_id);
            self.send_ack(reply, from, session_id, AckKind::Metadata, NOT_APPLICABLE, "Metadata accepted")
                .await;
            return;
        }

        let metadata = match self.parse_metadata(packet) {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!("세션 {} 메타데이터 거부 ({}): {}", session_id, from, e);
                self.send_ack(reply, from, session_id, AckKind::Retry, NOT_APPLICABLE, &e.to_string())
                    .await;
                return;
            }
        };

        let file_name = match metadata.safe_file_name() {
            Ok(name) => name,
            Err(e) => {
                self.send_ack(reply, from, session_id, AckKind::Retry, NOT_APPLICABLE, &e.to_string())
                    .await;
                return;
            }
        };

        let scratch_dir = match self.storage.create_session_scratch_dir(session_id) {
            Ok(dir) => dir,
            Err(e) => {
                error!("세션 {} 임시 디렉터리 생성 실패: {}", session_id, e);
                self.send_ack(reply, from, session_id, AckKind::Retry, NOT_APPLICABLE, &e.to_string())
                    .await;
                return;
            }
        };

        let session = Arc::new(Mutex::new(TransferSession::new(
            &metadata,
            file_name,
            scratch_dir,
        )));

        let created = match self.sessions.entry(session_id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(session.clone());
                true
            }
        };

        if created {
            self.stats.record_session_started();
            info!(
                "Metadata received for session {} from {} -> {} ({} bytes, {} chunks)",
                session_id, from, metadata.file_name, metadata.file_size, metadata.total_chunks
            );
        }
        self.send_ack(reply, from, session_id, AckKind::Metadata, NOT_APPLICABLE, "Metadata accepted")
            .await;

        // 빈 파일은 DATA 없이 바로 조립 단계로
        if created && metadata.total_chunks == 0 {
            let mut guard = session.lock().await;
            if guard.state == SessionState::Receiving {
                self.finalize(&mut guard, from, reply).await;
            }
        }
    }

    fn parse_metadata(&self, packet: &Packet) -> Result<TransferMetadata> {
        let metadata = TransferMetadata::from_bytes(packet.payload())?;
        if metadata.session_id != packet.session_id() {
            return Err(Error::InvalidMetadata(format!(
                "세션 ID 불일치: header={}, payload={}",
                packet.session_id(),
                metadata.session_id
            )));
        }
        if i64::from(packet.total_chunks()) != i64::from(metadata.total_chunks) {
            return Err(Error::InvalidMetadata(format!(
                "totalChunks 불일치: header={}, payload={}",
                packet.total_chunks(),
                metadata.total_chunks
            )));
        }
        Ok(metadata)
    }

    /// Receiving 상태의 DATA 처리
    async fn handle_data(&self, packet: &Packet, from: SocketAddr, reply: &ReplyHandle) {
        let session_id = packet.session_id();
        let index = packet.chunk_index();

        let Some(session) = self.session(session_id) else {
            warn!("Received chunk from {}: {}", from, Error::UnknownSession(session_id));
            self.send_ack(reply, from, session_id, AckKind::Retry, index, "Unknown session")
                .await;
            return;
        };

        let mut guard = session.lock().await;

        // 다른 워커가 먼저 종료 처리한 세션
        if guard.state != SessionState::Receiving {
            self.send_ack(reply, from, session_id, AckKind::Retry, index, "Unknown session")
                .await;
            return;
        }

        let slot = match guard.check_index(index) {
            Ok(slot) => slot,
            Err(e) => {
                warn!("세션 {}: {}", session_id, e);
                self.send_ack(reply, from, session_id, AckKind::Retry, index, "Invalid chunk id")
                    .await;
                return;
            }
        };

        if guard.received[slot] {
            debug!("Chunk {} already received for session {}", index, session_id);
            self.stats.record_duplicate();
            self.send_ack(reply, from, session_id, AckKind::Chunk, index, "Duplicate chunk")
                .await;
            return;
        }

        let len = packet.payload().len();
        if guard.received_bytes + len as u64 > guard.file_size {
            warn!(
                "세션 {} 청크 {} 크기 초과: {} + {} > {}",
                session_id, index, guard.received_bytes, len, guard.file_size
            );
            self.send_ack(reply, from, session_id, AckKind::Retry, index, "Chunk exceeds file size")
                .await;
            return;
        }

        let path = guard.chunk_path(slot as u32);
        if let Err(e) = tokio::fs::write(&path, packet.payload()).await {
            error!("세션 {} 청크 {} 저장 실패: {}", session_id, index, e);
            self.send_ack(reply, from, session_id, AckKind::Retry, index, &e.to_string())
                .await;
            return;
        }

        guard.mark_received(slot, len);
        self.stats.record_chunk(len);
        self.send_ack(reply, from, session_id, AckKind::Chunk, index, "Chunk received")
            .await;

        if guard.is_complete() {
            info!(
                "All chunks received for session {}, assembling",
                session_id
            );
            self.finalize(&mut guard, from, reply).await;
        }
    }

    /// Receiving → Assembling → Validated → Stored | Rejected | Failed
    ///
    /// 결과와 관계없이 임시 디렉터리와 세션 항목을 제거한다.
    async fn finalize(&self, session: &mut TransferSession, from: SocketAddr, reply: &ReplyHandle) {
        let session_id = session.session_id;
        session.state = SessionState::Assembling;

        let (ack, reason) = match self.assemble_and_store(session).await {
            Ok((disposition, verdict)) => self.conclude(session, disposition, verdict),
            Err(e) => {
                session.state = SessionState::Failed;
                self.stats.record_failed();
                match &e {
                    Error::ChecksumMismatch { expected, actual } => warn!(
                        "Checksum mismatch for session {}: expected {}, got {}",
                        session_id, expected, actual
                    ),
                    other => error!("세션 {} 조립/저장 실패: {}", session_id, other),
                }
                let reason = match e {
                    Error::ChecksumMismatch { .. } => "Checksum mismatch".to_owned(),
                    other => other.to_string(),
                };
                (AckKind::Retry, reason)
            }
        };

        let storage = self.storage.clone();
        if let Err(e) = run_blocking(move || {
            storage.cleanup_session(session_id);
            Ok(())
        })
        .await
        {
            warn!("세션 {} 정리 실패: {}", session_id, e);
        }
        self.sessions.remove(&session_id);

        self.send_ack(reply, from, session_id, ack, NOT_APPLICABLE, &reason)
            .await;
    }

    async fn assemble_and_store(
        &self,
        session: &mut TransferSession,
    ) -> Result<(Disposition, SecurityVerdict)> {
        // Assembling
        let scratch_dir = session.scratch_dir.clone();
        let file_name = session.file_name.clone();
        let total_chunks = session.total_chunks;
        let expected = session.expected_checksum.clone();

        let assembled = run_blocking(move || {
            let assembled = assemble(&scratch_dir, &file_name, total_chunks)?;
            let actual = sha256_file(&assembled)?;
            if !checksum_matches(&expected, &actual) {
                return Err(Error::ChecksumMismatch { expected, actual });
            }
            Ok(assembled)
        })
        .await?;
        session.state = SessionState::Validated;
        debug!("Session {} validated", session.session_id);

        // Validated
        let storage = self.storage.clone();
        let security = self.security.clone();
        let file_name = session.file_name.clone();

        run_blocking(move || {
            let verdict = security
                .evaluate(&assembled)
                .map_err(|e| Error::Security(e.to_string()))?;

            let disposition = if verdict.safe {
                Disposition::Stored(storage.resolve_incoming_path(&file_name)?)
            } else if security.quarantine_enabled() {
                Disposition::Quarantined(storage.resolve_quarantine_path(&file_name)?)
            } else {
                Disposition::StoredUnsafe(storage.resolve_incoming_path(&file_name)?)
            };

            storage.move_file(&assembled, disposition.path())?;
            Ok((disposition.canonicalized(), verdict))
        })
        .await
    }

    fn conclude(
        &self,
        session: &mut TransferSession,
        disposition: Disposition,
        verdict: SecurityVerdict,
    ) -> (AckKind, String) {
        info!(
            "Session {} stored at {} ({})",
            session.session_id,
            disposition.path().display(),
            verdict.message
        );

        match disposition {
            Disposition::Stored(path) => {
                session.state = SessionState::Stored;
                self.stats.record_stored();
                self.notify_stored(session, &path, &verdict);
                (AckKind::Complete, verdict.message)
            }
            Disposition::Quarantined(_) => {
                session.state = SessionState::Rejected;
                self.stats.record_quarantined();
                (AckKind::Rejected, verdict.message)
            }
            Disposition::StoredUnsafe(_) => {
                session.state = SessionState::Rejected;
                self.stats.record_rejected();
                (AckKind::Rejected, verdict.message)
            }
        }
    }

    fn notify_stored(&self, session: &TransferSession, path: &Path, verdict: &SecurityVerdict) {
        let Some(notifier) = &self.notifier else {
            return;
        };

        notifier.notify(WebhookPayload {
            file_name: session.file_name.clone(),
            file_path: path.display().to_string(),
            file_size: session.file_size,
            checksum: session.expected_checksum.clone(),
            mime_type: verdict
                .actual_mime
                .clone()
                .unwrap_or_else(|| "unknown".into()),
            received_from: session.sender_peer_id.clone(),
            timestamp: now_millis(),
            security_status: "SAFE".into(),
        });
    }
}

impl PacketHandler for FileReceiver {
    async fn handle(&self, packet: Packet, from: SocketAddr, reply: ReplyHandle) {
        match packet.kind() {
            PacketKind::Metadata => self.handle_metadata(&packet, from, &reply).await,
            PacketKind::Data => self.handle_data(&packet, from, &reply).await,
            _ => debug!("수신 서버에서 무시: {}", packet),
        }
    }
}
