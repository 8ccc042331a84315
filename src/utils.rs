use std::path::Path;

use crate::error::Result;

/// 미리보기 최대 길이 (문자 단위)
pub const PREVIEW_MAX_CHARS: usize = 80;

/// 목록 표시용 미리보기
/// - 첫 줄만 사용
/// - 최대 길이를 넘으면 잘라서 "..." 추가 (문자 경계 기준, 바이트 아님)
pub fn format_preview(text: &str, max_chars: usize) -> String {
    let first_line = text.lines().next().unwrap_or_default().trim();

    if first_line.chars().count() <= max_chars {
        return first_line.to_string();
    }
    let keep = max_chars.saturating_sub(3);
    let mut out: String = first_line.chars().take(keep).collect();
    out.push_str("...");
    out
}

/// 파일 경로의 상위 디렉토리 생성
pub fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}
