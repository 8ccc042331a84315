//! 입력 검증 / 정리
//!
//! 모델 호출 전에 로컬에서 수행하는 정책 검사 (모델에 위임하지 않음)

use once_cell::sync::Lazy;
use regex::Regex;

use crate::advice::prompts::EntryKind;
use crate::error::{InnerBoardError, Result};

/// 한 항목의 최대 길이 (문자 단위)
pub const MAX_ENTRY_CHARS: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PatternClass {
    Sql,
    Script,
    PathTraversal,
}

static INJECTION_PATTERNS: Lazy<Vec<(PatternClass, &'static str, Regex)>> = Lazy::new(|| {
    [
        (PatternClass::Sql, "SQL tautology", r#"(?i)['"]\s*(or|and)\s+['"]?\w+['"]?\s*=\s*['"]?\w+"#),
        (
            PatternClass::Sql,
            "stacked SQL statement",
            r"(?i);\s*(drop\s+table|delete\s+from|insert\s+into|update\s+\w+\s+set\b|(alter|create|truncate)\s+table)\b",
        ),
        (PatternClass::Sql, "UNION SELECT", r"(?i)\bunion\s+(all\s+)?select\b"),
        (PatternClass::Sql, "DROP TABLE", r"(?i)\b(drop|truncate)\s+table\b"),
        (PatternClass::Script, "script tag", r"(?i)<\s*/?\s*script\b"),
        (PatternClass::Script, "javascript: URL", r"(?i)javascript\s*:"),
        (PatternClass::Script, "inline event handler", r"(?i)<[^>]+\bon[a-z]+\s*="),
        (PatternClass::Script, "server-side template tag", r"(?i)<\?php|<%"),
        (PatternClass::PathTraversal, "path traversal", r"\.\.[/\\]"),
        (PatternClass::PathTraversal, "encoded path traversal", r"(?i)%2e%2e(%2f|%5c|/|\\)"),
    ]
    .into_iter()
    .map(|(class, label, pattern)| {
        (class, label, Regex::new(pattern).expect("injection pattern must compile"))
    })
    .collect()
});

static LINE_NUMBER_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*\d+\s*\|").expect("line number pattern must compile"));

static ANSI_ESCAPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]").expect("ANSI pattern must compile"));

/// 입력 검증. 통과하면 앞뒤 공백을 제거한 텍스트 반환
///
/// 터미널 로그는 상대 경로(`cd ../x`)가 흔하므로 경로 탐색 패턴은 회고에만 적용
pub fn validate_entry(text: &str, kind: EntryKind) -> Result<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(InnerBoardError::InputValidation("Entry text cannot be empty".to_string()));
    }

    let chars = trimmed.chars().count();
    if chars > MAX_ENTRY_CHARS {
        return Err(InnerBoardError::InputValidation(format!(
            "Entry is too long ({} > {} characters)",
            chars, MAX_ENTRY_CHARS
        )));
    }

    if trimmed.contains('\0') {
        return Err(InnerBoardError::InputValidation("Entry contains NUL bytes".to_string()));
    }

    for (class, label, pattern) in INJECTION_PATTERNS.iter() {
        if kind == EntryKind::Transcript && *class == PatternClass::PathTraversal {
            continue;
        }
        if pattern.is_match(trimmed) {
            tracing::warn!(pattern = *label, kind = kind.as_str(), "entry rejected by input policy");
            return Err(InnerBoardError::InputValidation(format!(
                "Potentially dangerous content detected: {}",
                label
            )));
        }
    }

    Ok(trimmed.to_string())
}

/// 터미널 로그 정리
/// - `  12|` 같은 줄 번호 prefix 제거
/// - ANSI escape, 제어 문자 제거 (탭은 공백으로)
/// - 빈 줄 제거
pub fn clean_terminal_log(raw: &str) -> String {
    raw.lines()
        .map(|line| {
            let line = LINE_NUMBER_PREFIX.replace(line, "");
            let line = ANSI_ESCAPE.replace_all(&line, "");
            line.chars()
                .map(|c| if c == '\t' { ' ' } else { c })
                .filter(|c| !c.is_control())
                .collect::<String>()
        })
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
