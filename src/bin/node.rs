//! PSP 노드 - Peer Share Protocol
//!
//! 수신 서버 + 피어 탐색을 함께 실행
//! - 수신 파일은 `<storage>/incoming`, 위험 판정 파일은 `<storage>/quarantine`
//! - 탐색된 피어 테이블을 주기적으로 출력
//!
//! 사용법:
//!   cargo run --release --bin psp-node -- [OPTIONS]
//!
//! 예시:
//!   cargo run --release --bin psp-node -- --peer-id alice --storage ./p2p-storage
//!   RUST_LOG=psp=debug cargo run --bin psp-node -- --port 9876 --quarantine

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use psp::{
    ChannelNotifier, Config, FileReceiver, FsStorage, PeerDiscovery, PermissivePolicy, Storage,
    UdpServer,
};

/// 노드 설정
struct NodeConfig {
    storage_dir: PathBuf,
    quarantine: bool,
    discovery: bool,
    peer_log_interval: Duration,
    config: Config,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from("p2p-storage"),
            quarantine: false,
            discovery: true,
            peer_log_interval: Duration::from_secs(10),
            config: Config::default(),
        }
    }
}

fn parse_value<T: std::str::FromStr>(args: &[String], i: usize, what: &str) -> T {
    match args.get(i + 1).map(|v| v.parse()) {
        Some(Ok(value)) => value,
        _ => {
            eprintln!("{} 값이 올바르지 않음: {}", what, args[i]);
            std::process::exit(2);
        }
    }
}

fn parse_args() -> NodeConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut node = NodeConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--peer-id" | "-i" => {
                node.config.peer_id = parse_value(&args, i, "peer id");
                i += 1;
            }
            "--port" | "-p" => {
                node.config.server_port = parse_value(&args, i, "포트");
                i += 1;
            }
            "--discovery-port" => {
                node.config.discovery_port = parse_value(&args, i, "포트");
                let ip = node.config.broadcast_addr.ip();
                node.config.broadcast_addr = SocketAddr::new(ip, node.config.discovery_port);
                i += 1;
            }
            "--broadcast" => {
                node.config.broadcast_addr = parse_value(&args, i, "주소");
                i += 1;
            }
            "--storage" | "-s" => {
                node.storage_dir = parse_value(&args, i, "경로");
                i += 1;
            }
            "--workers" | "-w" => {
                node.config.worker_count = parse_value(&args, i, "숫자");
                i += 1;
            }
            "--quarantine" | "-q" => node.quarantine = true,
            "--no-discovery" => node.discovery = false,
            "--lan" => {
                let peer_id = node.config.peer_id.clone();
                node.config = Config {
                    peer_id,
                    ..Config::lan()
                };
            }
            "--help" | "-h" => {
                println!(
                    r#"PSP Node - Peer Share Protocol 수신 노드

사용법:
  cargo run --release --bin psp-node -- [OPTIONS]

옵션:
  -i, --peer-id <ID>         피어 식별자 (기본: 임의 UUID)
  -p, --port <PORT>          수신 서버 포트 (기본: 9876)
  --discovery-port <PORT>    탐색 포트 (기본: 9875)
  --broadcast <ADDR>         heartbeat 대상 (기본: 255.255.255.255:9875)
  -s, --storage <PATH>       저장소 루트 (기본: ./p2p-storage)
  -w, --workers <N>          핸들러 워커 수 (기본: CPU 코어 수)
  -q, --quarantine           위험 판정 파일 격리
  --no-discovery             피어 탐색 비활성화
  --lan                      LAN 프리셋 (짧은 ACK 타임아웃)
  -h, --help                 이 도움말 출력

로그 레벨은 RUST_LOG 환경변수로 조정 (기본: info)
"#
                );
                std::process::exit(0);
            }
            other => {
                warn!("알 수 없는 옵션 무시: {}", other);
            }
        }
        i += 1;
    }

    node
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let node = parse_args();
    node.config.validate()?;

    info!("=== PSP Node ===");
    info!("Peer ID: {}", node.config.peer_id);

    let storage = FsStorage::new(&node.storage_dir);
    storage.initialize()?;
    info!("Storage: {}", storage.base_dir().display());

    // 웹훅 알림은 로그로만 남김
    let (notifier, mut notifications) = ChannelNotifier::new(64);
    let notify_task = tokio::spawn(async move {
        while let Some(payload) = notifications.recv().await {
            match serde_json::to_string(&payload) {
                Ok(json) => info!("File received: {}", json),
                Err(e) => warn!("알림 직렬화 실패: {}", e),
            }
        }
    });

    let receiver = FileReceiver::new(
        Arc::new(storage),
        Arc::new(PermissivePolicy::new(node.quarantine)),
    )
    .with_notifier(Arc::new(notifier));

    let bind_addr = SocketAddr::from(([0, 0, 0, 0], node.config.server_port));
    let server = UdpServer::bind(bind_addr, Arc::new(receiver), node.config.clone()).await?;
    server.start()?;

    let discovery = if node.discovery {
        let discovery = PeerDiscovery::bind(node.config.clone()).await?;
        discovery.start()?;
        info!(
            "Announcing {} on {} (transfer port {})",
            discovery.peer_id(),
            discovery.local_addr(),
            node.config.server_port
        );
        Some(discovery)
    } else {
        None
    };

    let mut ticker = tokio::time::interval(node.peer_log_interval);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                if let Some(discovery) = &discovery {
                    let peers = discovery.peers().peers();
                    info!("Known peers: {}", peers.len());
                    for peer in peers {
                        info!("  {} -> {}", peer.peer_id, peer.transfer_addr());
                    }
                }
                let stats = server.handler().stats();
                info!(
                    "Sessions: {} active, {} stored, {} failed, {} bytes received",
                    server.handler().active_sessions(),
                    stats.sessions_stored,
                    stats.sessions_failed,
                    stats.bytes_received
                );
            }
        }
    }

    info!("Shutting down");
    if let Some(discovery) = &discovery {
        discovery.stop().await;
    }
    server.stop().await;
    notify_task.abort();

    Ok(())
}
