// ABOUTME: Pre-run lexical screening of submitted source for forbidden constructs
// ABOUTME: Defense in depth only; the container sandbox is the actual security boundary

use lazy_static::lazy_static;
use regex::Regex;

/// Maximum accepted source length in bytes
pub const MAX_SOURCE_BYTES: usize = 50_000;

/// Maximum accepted stdin length in bytes
pub const MAX_STDIN_BYTES: usize = 10_000;

struct ForbiddenPattern {
    pattern: Regex,
    label: &'static str,
}

impl ForbiddenPattern {
    fn new(pattern: &str, label: &'static str) -> Self {
        Self {
            pattern: Regex::new(pattern).expect("invalid screener pattern"),
            label,
        }
    }
}

lazy_static! {
    static ref GENERIC_PATTERNS: Vec<ForbiddenPattern> = vec![
        ForbiddenPattern::new(r"\.\./", "directory traversal"),
        ForbiddenPattern::new(r"/etc/passwd", "system file access"),
        ForbiddenPattern::new(r"/proc/", "proc filesystem access"),
        ForbiddenPattern::new(r"\bsystem\s*\(", "shell invocation"),
        ForbiddenPattern::new(r"\bexec[a-z]*\s*\(", "process execution"),
        ForbiddenPattern::new(r"\beval\s*\(", "dynamic evaluation"),
    ];

    static ref PYTHON_PATTERNS: Vec<ForbiddenPattern> = vec![
        ForbiddenPattern::new(
            r"(?m)^\s*(?:import|from)\s+(?:os|sys|subprocess|socket|urllib|requests|shutil|glob|tempfile|pickle|marshal)\b",
            "forbidden import",
        ),
        ForbiddenPattern::new(r"__import__", "dynamic import"),
        ForbiddenPattern::new(r"\bcompile\s*\(", "dynamic compilation"),
        ForbiddenPattern::new(r"\bopen\s*\(", "file access"),
        ForbiddenPattern::new(r"\bfile\s*\(", "file access"),
    ];

    static ref JAVASCRIPT_PATTERNS: Vec<ForbiddenPattern> = vec![
        ForbiddenPattern::new(
            r#"require\s*\(\s*['"](?:node:)?(?:fs|child_process|net|http|https|crypto|os|path|stream|util|vm)['"]"#,
            "forbidden module",
        ),
        ForbiddenPattern::new(r"\bprocess\b", "process global"),
        ForbiddenPattern::new(r"\bglobal\b", "global object"),
        ForbiddenPattern::new(r"__dirname", "filesystem global"),
        ForbiddenPattern::new(r"__filename", "filesystem global"),
    ];

    static ref CPP_PATTERNS: Vec<ForbiddenPattern> = vec![
        ForbiddenPattern::new(
            r#"#\s*include\s*[<"](?:cstdlib|stdlib\.h|unistd\.h|sys/[^>"]*|windows\.h|process\.h|signal\.h|fcntl\.h)[>"]"#,
            "forbidden header",
        ),
        ForbiddenPattern::new(r"\bfork\s*\(", "process creation"),
        ForbiddenPattern::new(r"\bkill\s*\(", "signal delivery"),
        ForbiddenPattern::new(r"\bexit\s*\(", "process control"),
    ];

    static ref JAVA_PATTERNS: Vec<ForbiddenPattern> = vec![
        ForbiddenPattern::new(r"import\s+java\.io\.File", "forbidden import"),
        ForbiddenPattern::new(r"import\s+java\.net", "forbidden import"),
        ForbiddenPattern::new(r"import\s+java\.nio\.file", "forbidden import"),
        ForbiddenPattern::new(r"import\s+java\.security", "forbidden import"),
        ForbiddenPattern::new(r"import\s+javax\.script", "forbidden import"),
        ForbiddenPattern::new(r"java\.lang\.Runtime", "runtime access"),
        ForbiddenPattern::new(r"java\.lang\.ProcessBuilder", "process creation"),
        ForbiddenPattern::new(r"Runtime\s*\.\s*getRuntime\s*\(", "runtime access"),
        ForbiddenPattern::new(r"\bProcessBuilder\b", "process creation"),
        ForbiddenPattern::new(r"System\s*\.\s*exit", "process control"),
        ForbiddenPattern::new(r"\bFile\s*\.", "file access"),
        ForbiddenPattern::new(r"\bFiles\s*\.", "file access"),
    ];
}

fn language_patterns(language: &str) -> &'static [ForbiddenPattern] {
    match language {
        "python" => &PYTHON_PATTERNS,
        "javascript" => &JAVASCRIPT_PATTERNS,
        "cpp" => &CPP_PATTERNS,
        "java" => &JAVA_PATTERNS,
        _ => &[],
    }
}

/// Normalize line endings and strip NUL bytes.
///
/// The sanitized text is what gets written to the workspace and matched by
/// the pattern sets.
pub fn sanitize_source(source: &str) -> String {
    source.replace("\r\n", "\n").replace('\r', "\n").replace('\0', "")
}

/// Screen source text against the generic and language-specific forbidden
/// sets. Returns the full list of violations; an empty list means accepted.
///
/// Matching is lexical over the raw text, so identifiers inside string
/// literals or comments can trip it. Those false positives are accepted.
pub fn validate(source: &str, language: &str) -> Vec<String> {
    let mut violations = Vec::new();

    if source.is_empty() {
        violations.push("source is empty".to_string());
        return violations;
    }
    if source.len() > MAX_SOURCE_BYTES {
        violations.push(format!(
            "source exceeds {} byte limit ({} bytes)",
            MAX_SOURCE_BYTES,
            source.len()
        ));
    }
    if source.contains('\0') {
        violations.push("source contains NUL bytes".to_string());
    }

    let sanitized = sanitize_source(source);

    for set in [&GENERIC_PATTERNS[..], language_patterns(language)] {
        for entry in set {
            if let Some(found) = entry.pattern.find(&sanitized) {
                violations.push(format!(
                    "{}: `{}`",
                    entry.label,
                    found.as_str().trim()
                ));
            }
        }
    }

    violations
}
