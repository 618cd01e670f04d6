//! 피어 탐색 (Heartbeat)
//!
//! - 주기적으로 DISCOVERY 브로드캐스트 (`{peerId, port}`)
//! - DISCOVERY 수신: 피어 테이블 갱신 + 송신자에게 DISCOVERY_RESPONSE 유니캐스트
//! - DISCOVERY_RESPONSE 수신: 피어 테이블 갱신만 (응답 없음)
//! - 자기 자신 판별은 주소가 아닌 peerId 비교 (같은 호스트의 여러 피어 허용)

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::message::{now_millis, PeerAnnouncement};
use crate::packet::{Packet, PacketKind, SessionId};
use crate::{Error, Result};

/// 탐색된 원격 피어
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub peer_id: String,
    pub address: IpAddr,
    /// 수신 서버 포트
    pub port: u16,
    /// 마지막 확인 시각 (epoch 밀리초)
    pub last_seen: u64,
}

impl PeerInfo {
    /// 파일 전송 대상 주소
    pub fn transfer_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }
}

/// 피어 테이블
///
/// 탐색 수신 루프만 변경하고, 조회는 어디서나 가능.
#[derive(Debug, Default)]
pub struct PeerTable {
    peers: DashMap<String, PeerInfo>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 피어 등록 또는 갱신, 신규면 true
    ///
    /// 기존 항목은 다시 만들지 않고 주소/포트/last_seen만 갱신한다.
    pub fn observe(&self, peer_id: &str, address: IpAddr, port: u16) -> bool {
        let now = now_millis();
        let mut created = false;
        self.peers
            .entry(peer_id.to_owned())
            .and_modify(|info| {
                info.address = address;
                info.port = port;
                info.last_seen = now;
            })
            .or_insert_with(|| {
                created = true;
                PeerInfo {
                    peer_id: peer_id.to_owned(),
                    address,
                    port,
                    last_seen: now,
                }
            });
        created
    }

    pub fn get(&self, peer_id: &str) -> Option<PeerInfo> {
        self.peers.get(peer_id).map(|e| e.value().clone())
    }

    /// 현재 테이블 스냅샷 (peerId 순)
    pub fn peers(&self) -> Vec<PeerInfo> {
        let mut peers: Vec<PeerInfo> = self.peers.iter().map(|e| e.value().clone()).collect();
        peers.sort_by(|a, b| a.peer_id.cmp(&b.peer_id));
        peers
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

/// 탐색 패킷 처리 규칙
struct Responder {
    peer_id: String,
    announce_port: u16,
    peers: Arc<PeerTable>,
}

impl Responder {
    fn announcement(&self) -> Result<Vec<u8>> {
        PeerAnnouncement::new(self.peer_id.clone(), self.announce_port).to_bytes()
    }

    fn heartbeat(&self) -> Result<Packet> {
        Ok(Packet::discovery(SessionId::new_v4(), self.announcement()?))
    }

    /// 수신 패킷 반영, 보내야 할 응답 반환
    fn handle(&self, packet: &Packet, from: SocketAddr) -> Result<Option<Packet>> {
        let kind = packet.kind();
        if !matches!(kind, PacketKind::Discovery | PacketKind::DiscoveryResponse) {
            debug!("탐색 소켓에서 무시: {}", packet);
            return Ok(None);
        }

        let remote = PeerAnnouncement::from_bytes(packet.payload())?;
        if remote.peer_id == self.peer_id {
            return Ok(None);
        }

        if self.peers.observe(&remote.peer_id, from.ip(), remote.port) {
            info!(
                "Discovered peer {} at {}:{}",
                remote.peer_id,
                from.ip(),
                remote.port
            );
        } else {
            debug!("Peer {} refreshed", remote.peer_id);
        }

        if kind == PacketKind::Discovery {
            let response =
                Packet::discovery_response(SessionId::new_v4(), self.announcement()?);
            return Ok(Some(response));
        }
        Ok(None)
    }
}

/// 피어 탐색 서비스
pub struct PeerDiscovery {
    config: Config,
    responder: Arc<Responder>,
    socket: Mutex<Option<Arc<UdpSocket>>>,
    local_addr: SocketAddr,
    running: AtomicBool,
    stopped: AtomicBool,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl PeerDiscovery {
    /// `0.0.0.0:discovery_port`에 바인딩
    pub async fn bind(config: Config) -> Result<Self> {
        let addr = SocketAddr::from(([0, 0, 0, 0], config.discovery_port));
        Self::bind_to(addr, config).await
    }

    /// 지정 주소에 바인딩 (SO_REUSEADDR + SO_BROADCAST)
    pub async fn bind_to(addr: SocketAddr, config: Config) -> Result<Self> {
        config.validate()?;

        let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        if addr.is_ipv4() {
            socket.set_broadcast(true)?;
        }
        socket.bind(&addr.into())?;
        socket.set_nonblocking(true)?;

        let std_socket: std::net::UdpSocket = socket.into();
        let socket = UdpSocket::from_std(std_socket)?;
        let local_addr = socket.local_addr()?;

        let responder = Responder {
            peer_id: config.peer_id.clone(),
            announce_port: config.server_port,
            peers: Arc::new(PeerTable::new()),
        };

        Ok(Self {
            config,
            responder: Arc::new(responder),
            socket: Mutex::new(Some(Arc::new(socket))),
            local_addr,
            running: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn peer_id(&self) -> &str {
        &self.responder.peer_id
    }

    /// 공유 피어 테이블
    pub fn peers(&self) -> Arc<PeerTable> {
        self.responder.peers.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Heartbeat 타이머와 수신 루프 시작 (중복 호출 무시)
    pub fn start(&self) -> Result<()> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(Error::AlreadyStopped);
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let socket = match self.socket.lock().clone() {
            Some(socket) => socket,
            None => return Err(Error::AlreadyStopped),
        };

        let mut tasks = self.tasks.lock();

        // Heartbeat
        {
            let socket = socket.clone();
            let responder = self.responder.clone();
            let shutdown = self.shutdown.clone();
            let target = self.config.broadcast_addr;
            let mut ticker = tokio::time::interval(self.config.heartbeat_interval());

            tasks.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = ticker.tick() => {}
                    }

                    let sent = match responder.heartbeat() {
                        Ok(packet) => match packet.encode() {
                            Ok(bytes) => socket.send_to(&bytes, target).await.map_err(Error::from),
                            Err(e) => Err(e),
                        },
                        Err(e) => Err(e),
                    };
                    match sent {
                        Ok(_) => debug!("Sent discovery heartbeat as {}", responder.peer_id),
                        Err(e) => error!("Heartbeat 전송 실패 ({}): {}", target, e),
                    }
                }
            }));
        }

        // 수신
        {
            let responder = self.responder.clone();
            let shutdown = self.shutdown.clone();
            let poll = self.config.discovery_poll();
            let mut buf = vec![0u8; self.config.recv_buffer_size];

            tasks.push(tokio::spawn(async move {
                loop {
                    let received = tokio::select! {
                        _ = shutdown.cancelled() => break,
                        r = tokio::time::timeout(poll, socket.recv_from(&mut buf)) => r,
                    };

                    let (len, from) = match received {
                        Err(_) => continue,
                        Ok(Ok(received)) => received,
                        Ok(Err(e)) => {
                            warn!("탐색 수신 에러: {}", e);
                            continue;
                        }
                    };

                    let packet = match Packet::decode(&buf[..len]) {
                        Ok(packet) => packet,
                        Err(e) => {
                            warn!("잘못된 탐색 데이터그램 무시 ({}): {}", from, e);
                            continue;
                        }
                    };

                    match responder.handle(&packet, from) {
                        Ok(Some(response)) => {
                            let sent = match response.encode() {
                                Ok(bytes) => socket.send_to(&bytes, from).await.map_err(Error::from),
                                Err(e) => Err(e),
                            };
                            if let Err(e) = sent {
                                warn!("탐색 응답 전송 실패 ({}): {}", from, e);
                            }
                        }
                        Ok(None) => {}
                        Err(e) => warn!("탐색 페이로드 무시 ({}): {}", from, e),
                    }
                }
            }));
        }

        info!(
            "Peer discovery started on {} as {}",
            self.local_addr, self.responder.peer_id
        );
        Ok(())
    }

    /// 타이머와 수신 루프 정지, 소켓 해제 (중복 호출 무시)
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shutdown.cancel();

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in &tasks {
            task.abort();
        }
        for task in tasks {
            let _ = task.await;
        }

        self.socket.lock().take();
        self.running.store(false, Ordering::SeqCst);
        info!("Peer discovery on {} stopped", self.local_addr);
    }
}

impl Drop for PeerDiscovery {
    fn drop(&mut self) {
        self.shutdown.cancel();
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}
