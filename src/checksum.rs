//! 파일 체크섬 (SHA-256)

use std::fs::File;
use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::Result;

/// 읽기 블록 크기
const BLOCK_SIZE: usize = 8192;

/// 파일 전체의 SHA-256 (소문자 hex)
///
/// 파일 전체를 메모리에 올리지 않고 블록 단위로 읽는다.
pub fn sha256_file(path: impl AsRef<Path>) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; BLOCK_SIZE];

    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// 블로킹 풀에서 체크섬 계산
pub async fn sha256_file_async(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref().to_path_buf();
    tokio::task::spawn_blocking(move || sha256_file(path))
        .await
        .map_err(|e| crate::Error::Io(std::io::Error::other(e)))?
}

/// 대소문자 무시 비교
pub fn checksum_matches(expected: &str, actual: &str) -> bool {
    expected.eq_ignore_ascii_case(actual)
}
