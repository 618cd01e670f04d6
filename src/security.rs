//! 수신 파일 보안 판정
//!
//! 실제 MIME 분류 정책은 외부에서 주입한다. 수신자는 판정 결과(safe 여부)와
//! 격리 활성화 여부만 사용한다.

use std::path::Path;

use crate::Result;

/// 보안 판정 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityVerdict {
    pub safe: bool,
    pub expected_mime: Option<String>,
    pub actual_mime: Option<String>,
    pub message: String,
}

impl SecurityVerdict {
    pub fn safe(message: impl Into<String>) -> Self {
        Self {
            safe: true,
            expected_mime: None,
            actual_mime: None,
            message: message.into(),
        }
    }

    pub fn unsafe_mismatch(
        expected_mime: impl Into<String>,
        actual_mime: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            safe: false,
            expected_mime: Some(expected_mime.into()),
            actual_mime: Some(actual_mime.into()),
            message: message.into(),
        }
    }
}

/// 보안 정책 인터페이스
pub trait SecurityPolicy: Send + Sync + 'static {
    /// 조립이 끝난 파일 평가
    fn evaluate(&self, file: &Path) -> Result<SecurityVerdict>;

    /// 위험 판정 파일을 격리 영역에 둘지 여부
    fn quarantine_enabled(&self) -> bool;
}

/// 모든 파일을 안전으로 판정하는 정책
#[derive(Debug, Clone, Default)]
pub struct PermissivePolicy {
    quarantine: bool,
}

impl PermissivePolicy {
    pub fn new(quarantine: bool) -> Self {
        Self { quarantine }
    }
}

impl SecurityPolicy for PermissivePolicy {
    fn evaluate(&self, _file: &Path) -> Result<SecurityVerdict> {
        Ok(SecurityVerdict::safe("No MIME policy configured"))
    }

    fn quarantine_enabled(&self) -> bool {
        self.quarantine
    }
}
