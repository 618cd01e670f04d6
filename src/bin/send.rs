//! PSP 송신 도구 - Peer Share Protocol
//!
//! 파일 하나를 stop-and-wait 방식으로 전송
//! - 대상은 주소(`--target`) 또는 탐색으로 찾은 피어 ID(`--peer`)
//! - Ctrl+C로 전송 취소
//!
//! 사용법:
//!   cargo run --release --bin psp-send -- --file <PATH> (--target <ADDR> | --peer <ID>)
//!
//! 예시:
//!   cargo run --release --bin psp-send -- -f report.pdf -t 192.168.0.10:9876
//!   cargo run --release --bin psp-send -- -f report.pdf --peer alice --wait 10

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use psp::{Config, FileSender, PeerDiscovery};

/// 송신 설정
struct SendConfig {
    file_path: Option<PathBuf>,
    target: Option<SocketAddr>,
    peer: Option<String>,
    discovery_wait: Duration,
    config: Config,
}

impl Default for SendConfig {
    fn default() -> Self {
        Self {
            file_path: None,
            target: None,
            peer: None,
            discovery_wait: Duration::from_secs(10),
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

fn parse_args() -> SendConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut send = SendConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--file" | "-f" => {
                send.file_path = Some(parse_value(&args, i, "경로"));
                i += 1;
            }
            "--target" | "-t" => {
                send.target = Some(parse_value(&args, i, "주소"));
                i += 1;
            }
            "--peer" => {
                send.peer = Some(parse_value(&args, i, "peer id"));
                i += 1;
            }
            "--wait" => {
                send.discovery_wait = Duration::from_secs(parse_value(&args, i, "초"));
                i += 1;
            }
            "--peer-id" | "-i" => {
                send.config.peer_id = parse_value(&args, i, "peer id");
                i += 1;
            }
            "--chunk-size" => {
                send.config.chunk_size = parse_value(&args, i, "숫자");
                i += 1;
            }
            "--ack-timeout" => {
                send.config.ack_timeout_ms = parse_value(&args, i, "밀리초");
                i += 1;
            }
            "--retries" => {
                send.config.max_retries = parse_value(&args, i, "숫자");
                i += 1;
            }
            "--discovery-port" => {
                send.config.discovery_port = parse_value(&args, i, "포트");
                let ip = send.config.broadcast_addr.ip();
                send.config.broadcast_addr = SocketAddr::new(ip, send.config.discovery_port);
                i += 1;
            }
            "--unstable" => {
                let peer_id = send.config.peer_id.clone();
                send.config = Config {
                    peer_id,
                    ..Config::unstable_network()
                };
            }
            "--help" | "-h" => {
                println!(
                    r#"PSP Send - Peer Share Protocol 송신 도구

사용법:
  cargo run --release --bin psp-send -- [OPTIONS]

옵션:
  -f, --file <PATH>          전송할 파일 (필수)
  -t, --target <ADDR>        수신 서버 주소
  --peer <ID>                탐색으로 찾을 피어 ID (--target 대신)
  --wait <SECS>              피어 탐색 대기 시간 (기본: 10)
  -i, --peer-id <ID>         내 피어 식별자 (기본: 임의 UUID)
  --chunk-size <BYTES>       청크 크기 (기본: 8192)
  --ack-timeout <MS>         ACK 대기 시간 (기본: 5000)
  --retries <N>              재전송 횟수 (기본: 5)
  --discovery-port <PORT>    탐색 포트 (기본: 9875)
  --unstable                 불안정 네트워크 프리셋
  -h, --help                 이 도움말 출력
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

    send
}

/// 탐색으로 피어 주소 조회
async fn resolve_peer(
    config: &Config,
    peer_id: &str,
    wait: Duration,
) -> Result<Option<SocketAddr>, Box<dyn std::error::Error>> {
    let discovery = PeerDiscovery::bind(config.clone()).await?;
    discovery.start()?;
    info!("Looking for peer {} ({}s)", peer_id, wait.as_secs());

    let peers = discovery.peers();
    let deadline = tokio::time::Instant::now() + wait;
    let mut found = None;
    while tokio::time::Instant::now() < deadline {
        if let Some(peer) = peers.get(peer_id) {
            found = Some(peer.transfer_addr());
            break;
        }
        tokio::time::sleep(config.discovery_poll()).await;
    }

    discovery.stop().await;
    Ok(found)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let send = parse_args();
    send.config.validate()?;

    let Some(file_path) = send.file_path.clone() else {
        error!("--file 필요 (--help 참고)");
        std::process::exit(2);
    };

    let target = match (send.target, &send.peer) {
        (Some(target), _) => target,
        (None, Some(peer)) => match resolve_peer(&send.config, peer, send.discovery_wait).await? {
            Some(addr) => addr,
            None => {
                error!("피어를 찾지 못함: {}", peer);
                std::process::exit(1);
            }
        },
        (None, None) => {
            error!("--target 또는 --peer 필요 (--help 참고)");
            std::process::exit(2);
        }
    };

    info!("=== PSP Send ===");
    info!("File: {}", file_path.display());
    info!("Target: {}", target);
    info!(
        "Chunk size: {} bytes, ACK timeout: {} ms, retries: {}",
        send.config.chunk_size, send.config.ack_timeout_ms, send.config.max_retries
    );

    let sender = FileSender::new(send.config)?;
    let cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    let result = sender
        .send_file_cancellable(&file_path, target, cancel)
        .await;
    ctrl_c.abort();

    match result {
        Ok(report) => {
            info!("=== 전송 완료 ===");
            info!("Session: {}", report.session_id);
            info!("Size: {} bytes ({} chunks)", report.file_size, report.total_chunks);
            info!("Checksum: {}", report.checksum);
            info!("Retransmissions: {}", report.retransmissions);
            info!(
                "Elapsed: {:.2?} ({:.2} MB/s)",
                report.elapsed,
                report.throughput_mbps()
            );
            Ok(())
        }
        Err(e) => {
            error!("전송 실패: {}", e);
            std::process::exit(1);
        }
    }
}
