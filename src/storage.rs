//! 저장소
//!
//! 수신 파일의 임시/수신/격리 디렉터리 관리.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::packet::SessionId;
use crate::{Error, Result};

/// 수신측이 사용하는 저장소 인터페이스
pub trait Storage: Send + Sync + 'static {
    /// 디렉터리 준비
    fn initialize(&self) -> Result<()>;

    /// 세션 전용 임시 디렉터리 생성
    fn create_session_scratch_dir(&self, session_id: SessionId) -> Result<PathBuf>;

    /// 수신 영역의 충돌 없는 경로 (동시 호출 간에도 중복 없음)
    fn resolve_incoming_path(&self, file_name: &str) -> Result<PathBuf>;

    /// 격리 영역의 충돌 없는 경로
    fn resolve_quarantine_path(&self, file_name: &str) -> Result<PathBuf>;

    /// 파일 이동 (대상 디렉터리 자동 생성)
    fn move_file(&self, src: &Path, dst: &Path) -> Result<()>;

    /// 세션 임시 디렉터리 삭제 (실패는 로그만)
    fn cleanup_session(&self, session_id: SessionId);
}

/// 파일시스템 저장소
///
/// ```text
/// <base>/incoming/
/// <base>/quarantine/
/// <base>/temp/<session-id>/
/// ```
#[derive(Debug, Clone)]
pub struct FsStorage {
    base_dir: PathBuf,
    incoming_dir: PathBuf,
    quarantine_dir: PathBuf,
    temp_dir: PathBuf,
}

impl FsStorage {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        Self {
            incoming_dir: base_dir.join("incoming"),
            quarantine_dir: base_dir.join("quarantine"),
            temp_dir: base_dir.join("temp"),
            base_dir,
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn incoming_dir(&self) -> &Path {
        &self.incoming_dir
    }

    pub fn quarantine_dir(&self) -> &Path {
        &self.quarantine_dir
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    fn session_dir(&self, session_id: SessionId) -> PathBuf {
        self.temp_dir.join(session_id.to_string())
    }
}

/// 빈 파일을 `create_new`로 만들어 이름 선점, 이미 있으면 false
fn reserve(path: &Path) -> Result<bool> {
    match fs::OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// `name.ext`, `name(1).ext`, `name(2).ext`, ... 순으로 처음 선점에 성공한 경로
///
/// 반환된 경로에는 빈 파일이 남아 있고 `move_file`이 덮어쓴다.
fn resolve_unique_path(dir: &Path, file_name: &str) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;

    let candidate = dir.join(file_name);
    if reserve(&candidate)? {
        return Ok(candidate);
    }

    let (stem, ext) = match file_name.rfind('.') {
        Some(idx) if idx > 0 => file_name.split_at(idx),
        _ => (file_name, ""),
    };

    for n in 1u32.. {
        let candidate = dir.join(format!("{}({}){}", stem, n, ext));
        if reserve(&candidate)? {
            return Ok(candidate);
        }
    }
    Err(Error::Storage(format!("사용 가능한 이름 없음: {}", file_name)))
}

impl Storage for FsStorage {
    fn initialize(&self) -> Result<()> {
        for dir in [
            &self.base_dir,
            &self.incoming_dir,
            &self.quarantine_dir,
            &self.temp_dir,
        ] {
            fs::create_dir_all(dir)?;
        }
        info!("Storage initialised under {}", self.base_dir.display());
        Ok(())
    }

    fn create_session_scratch_dir(&self, session_id: SessionId) -> Result<PathBuf> {
        let dir = self.session_dir(session_id);
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    fn resolve_incoming_path(&self, file_name: &str) -> Result<PathBuf> {
        resolve_unique_path(&self.incoming_dir, file_name)
    }

    fn resolve_quarantine_path(&self, file_name: &str) -> Result<PathBuf> {
        resolve_unique_path(&self.quarantine_dir, file_name)
    }

    fn move_file(&self, src: &Path, dst: &Path) -> Result<()> {
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }
        if fs::rename(src, dst).is_err() {
            // 다른 파일시스템 간 이동
            fs::copy(src, dst)?;
            fs::remove_file(src)?;
        }
        info!("Moved {} to {}", src.display(), dst.display());
        Ok(())
    }

    fn cleanup_session(&self, session_id: SessionId) {
        let dir = self.session_dir(session_id);
        if !dir.exists() {
            return;
        }
        if let Err(e) = fs::remove_dir_all(&dir) {
            warn!("세션 디렉터리 삭제 실패 {}: {}", dir.display(), e);
        }
    }
}
