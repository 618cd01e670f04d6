//! 데이터그램 전송 계층
//!
//! - UdpClient: 송신측, 요청/응답 방식 (송신 + 타임아웃 수신)
//! - UdpServer: 수신측, 단일 수신 루프 + 제한된 워커 풀로 핸들러 실행

use std::future::Future;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::packet::Packet;
use crate::{Config, Error, Result};

/// 수신 패킷 처리기
///
/// 서버가 디코딩에 성공한 패킷마다 워커 풀에서 호출한다.
pub trait PacketHandler: Send + Sync + 'static {
    fn handle(
        &self,
        packet: Packet,
        from: SocketAddr,
        reply: ReplyHandle,
    ) -> impl Future<Output = ()> + Send;
}

/// 같은 소켓으로 응답하기 위한 핸들
#[derive(Clone)]
pub struct ReplyHandle {
    socket: Arc<UdpSocket>,
}

impl ReplyHandle {
    pub(crate) fn new(socket: Arc<UdpSocket>) -> Self {
        Self { socket }
    }

    pub async fn send(&self, packet: &Packet, to: SocketAddr) -> Result<()> {
        send_packet(&self.socket, packet, to).await
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}

async fn send_packet(socket: &UdpSocket, packet: &Packet, to: SocketAddr) -> Result<()> {
    let bytes = packet.encode()?;
    socket.send_to(&bytes, to).await?;
    debug!("송신 {} -> {}", packet, to);
    Ok(())
}

/// 송신측 클라이언트
///
/// 세션마다 독립 소켓을 사용하며 drop 시 소켓이 해제된다.
pub struct UdpClient {
    socket: UdpSocket,
    buf: Vec<u8>,
}

impl UdpClient {
    /// 지정 주소에 바인딩
    pub async fn bind(addr: SocketAddr, recv_buffer_size: usize) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self {
            socket,
            buf: vec![0u8; recv_buffer_size],
        })
    }

    /// 대상 주소 체계에 맞는 임시 포트로 바인딩
    pub async fn for_target(target: SocketAddr, recv_buffer_size: usize) -> Result<Self> {
        let local: SocketAddr = match target {
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        Self::bind(local, recv_buffer_size).await
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// 패킷 송신 (응답 대기 없음)
    pub async fn send(&self, packet: &Packet, target: SocketAddr) -> Result<()> {
        send_packet(&self.socket, packet, target).await
    }

    /// 최대 `timeout` 동안 첫 번째 유효 패킷 대기
    ///
    /// 디코딩 실패한 데이터그램은 로그만 남기고 건너뛴다.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Result<(Packet, SocketAddr)> {
        let deadline = Instant::now() + timeout;

        loop {
            let (len, from) =
                match tokio::time::timeout_at(deadline, self.socket.recv_from(&mut self.buf)).await
                {
                    Err(_) => return Err(Error::Timeout),
                    Ok(Ok(received)) => received,
                    Ok(Err(e)) if e.kind() == std::io::ErrorKind::ConnectionReset => {
                        // ICMP port unreachable (Windows)
                        debug!("수신 에러 무시: {}", e);
                        continue;
                    }
                    Ok(Err(e)) => return Err(Error::Io(e)),
                };

            match Packet::decode(&self.buf[..len]) {
                Ok(packet) => {
                    debug!("수신 {} <- {}", packet, from);
                    return Ok((packet, from));
                }
                Err(e) => {
                    warn!("잘못된 데이터그램 무시 ({} bytes from {}): {}", len, from, e);
                }
            }
        }
    }
}

/// 수신 루프 → 워커 작업 단위
struct Job {
    packet: Packet,
    from: SocketAddr,
}

/// 수신측 서버
pub struct UdpServer<H: PacketHandler> {
    config: Config,
    handler: Arc<H>,
    socket: Mutex<Option<Arc<UdpSocket>>>,
    local_addr: SocketAddr,
    running: AtomicBool,
    stopped: AtomicBool,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<H: PacketHandler> UdpServer<H> {
    /// 포트 바인딩 (수신은 `start` 호출 후 시작)
    pub async fn bind(addr: SocketAddr, handler: Arc<H>, config: Config) -> Result<Self> {
        config.validate()?;
        let socket = UdpSocket::bind(addr).await?;
        let local_addr = socket.local_addr()?;

        Ok(Self {
            config,
            handler,
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

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn handler(&self) -> &Arc<H> {
        &self.handler
    }

    /// 수신 루프와 워커 시작 (중복 호출 무시)
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

        let (job_tx, job_rx) = mpsc::channel::<Job>(self.config.dispatch_queue_depth);
        let job_rx = Arc::new(tokio::sync::Mutex::new(job_rx));
        let workers = self.config.effective_workers();

        let mut tasks = self.tasks.lock();

        // 워커 풀
        for _ in 0..workers {
            let job_rx = job_rx.clone();
            let handler = self.handler.clone();
            let reply = ReplyHandle::new(socket.clone());
            let shutdown = self.shutdown.clone();

            tasks.push(tokio::spawn(async move {
                loop {
                    let job = {
                        let mut rx = job_rx.lock().await;
                        tokio::select! {
                            _ = shutdown.cancelled() => None,
                            job = rx.recv() => job,
                        }
                    };
                    let Some(job) = job else { break };
                    handler.handle(job.packet, job.from, reply.clone()).await;
                }
            }));
        }

        // 수신 루프
        let shutdown = self.shutdown.clone();
        let buffer_size = self.config.recv_buffer_size;
        tasks.push(tokio::spawn(async move {
            let mut buf = vec![0u8; buffer_size];

            loop {
                let (len, from) = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    result = socket.recv_from(&mut buf) => match result {
                        Ok(received) => received,
                        Err(e) => {
                            warn!("수신 에러: {}", e);
                            continue;
                        }
                    },
                };

                let packet = match Packet::decode(&buf[..len]) {
                    Ok(packet) => packet,
                    Err(e) => {
                        warn!("잘못된 데이터그램 무시 ({} bytes from {}): {}", len, from, e);
                        continue;
                    }
                };

                match job_tx.try_send(Job { packet, from }) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(job)) => {
                        warn!("워커 큐 포화, 패킷 폐기: {}", job.packet);
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => break,
                }
            }
        }));

        info!(
            "UDP server started on {} ({} workers)",
            self.local_addr, workers
        );
        Ok(())
    }

    /// 수신 루프 정지, 진행 중 작업 취소, 소켓 해제 (중복 호출 무시)
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
        info!("UDP server on {} stopped", self.local_addr);
    }
}

impl<H: PacketHandler> Drop for UdpServer<H> {
    fn drop(&mut self) {
        self.shutdown.cancel();
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{AckKind, SessionId};
    use std::sync::atomic::AtomicUsize;

    /// 받은 DATA 패킷마다 CHUNK ACK으로 응답
    struct EchoAck {
        handled: AtomicUsize,
    }

    impl PacketHandler for EchoAck {
        async fn handle(&self, packet: Packet, from: SocketAddr, reply: ReplyHandle) {
            self.handled.fetch_add(1, Ordering::SeqCst);
            let ack = Packet::ack(
                packet.session_id(),
                AckKind::Chunk,
                packet.chunk_index(),
                "ok",
            );
            let _ = reply.send(&ack, from).await;
        }
    }

    fn test_config() -> Config {
        Config {
            worker_count: 2,
            ..Config::default()
        }
    }

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[tokio::test]
    async fn test_request_response() {
        let handler = Arc::new(EchoAck {
            handled: AtomicUsize::new(0),
        });
        let server = UdpServer::bind(loopback(), handler.clone(), test_config())
            .await
            .unwrap();
        server.start().unwrap();
        server.start().unwrap();

        let mut client = UdpClient::bind(loopback(), 65535).await.unwrap();
        let id = SessionId::new_v4();
        client
            .send(&Packet::data(id, 4, 5, vec![1u8, 2]), server.local_addr())
            .await
            .unwrap();

        let (ack, from) = client.recv_timeout(Duration::from_secs(2)).await.unwrap();
        assert_eq!(from, server.local_addr());
        assert_eq!(ack.session_id(), id);
        assert_eq!(ack.ack_kind(), Some(AckKind::Chunk));
        assert_eq!(ack.chunk_index(), 4);
        assert_eq!(handler.handled.load(Ordering::SeqCst), 1);

        server.stop().await;
        server.stop().await;
        assert!(!server.is_running());
        assert!(matches!(server.start(), Err(Error::AlreadyStopped)));
    }

    #[tokio::test]
    async fn test_malformed_datagram_skipped() {
        let handler = Arc::new(EchoAck {
            handled: AtomicUsize::new(0),
        });
        let server = UdpServer::bind(loopback(), handler.clone(), test_config())
            .await
            .unwrap();
        server.start().unwrap();

        let mut client = UdpClient::bind(loopback(), 65535).await.unwrap();
        let raw = UdpSocket::bind(loopback()).await.unwrap();
        raw.send_to(&[0xFFu8; 5], server.local_addr()).await.unwrap();

        let id = SessionId::new_v4();
        client
            .send(&Packet::data(id, 0, 1, vec![7u8]), server.local_addr())
            .await
            .unwrap();
        let (ack, _) = client.recv_timeout(Duration::from_secs(2)).await.unwrap();
        assert_eq!(ack.session_id(), id);
        assert_eq!(handler.handled.load(Ordering::SeqCst), 1);

        server.stop().await;
    }

    #[tokio::test]
    async fn test_client_skips_garbage_then_times_out() {
        let mut client = UdpClient::bind(loopback(), 65535).await.unwrap();
        let raw = UdpSocket::bind(loopback()).await.unwrap();
        raw.send_to(b"garbage", client.local_addr().unwrap())
            .await
            .unwrap();

        let result = client.recv_timeout(Duration::from_millis(100)).await;
        assert!(matches!(result, Err(Error::Timeout)));
    }

    #[tokio::test]
    async fn test_stop_releases_port() {
        let handler = Arc::new(EchoAck {
            handled: AtomicUsize::new(0),
        });
        let server = UdpServer::bind(loopback(), handler.clone(), test_config())
            .await
            .unwrap();
        let addr = server.local_addr();
        server.start().unwrap();
        server.stop().await;

        let rebound = UdpServer::bind(addr, handler, test_config()).await;
        assert!(rebound.is_ok());
    }
}
