//! Static screening of script and command text.
//!
//! A verdict depends only on the text and the configured pattern set. The
//! text is checked as written and again with comments removed, so splitting
//! a construct with an inline comment does not hide it.

use std::{
    fmt,
    path::{Component, Path, PathBuf},
    sync::LazyLock,
};

use agent_gate_core::ScriptSandboxConfig;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::SecurityError;

/// Replacement for neutralised fragments.
pub const BLOCKED_PLACEHOLDER: &str = "/* blocked */";

static BLOCK_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)/\*.*?\*/").expect("block comment pattern is valid"));

// `//` only starts a comment at line start or after whitespace, so URLs survive.
static LINE_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)(^|[ \t])//[^\n]*").expect("line comment pattern is valid"));

/// What a blocked construct would let a script do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternCategory {
    Destructive,
    ProcessSpawn,
    CodeEval,
    Network,
    Filesystem,
    Browser,
    Custom,
}

impl fmt::Display for PatternCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Destructive => "destructive command",
            Self::ProcessSpawn => "process spawning",
            Self::CodeEval => "dynamic code evaluation",
            Self::Network => "network access",
            Self::Filesystem => "filesystem access",
            Self::Browser => "browser API",
            Self::Custom => "custom rule",
        };
        f.write_str(name)
    }
}

const DEFAULT_PATTERNS: &[(&str, PatternCategory, &str)] = &[
    // Destructive shell commands
    ("recursive-delete", PatternCategory::Destructive, r"(?i)\brm\s+(?:-[a-z]*[rf]|--(?:recursive|force))[^;&|\n]*"),
    ("format-filesystem", PatternCategory::Destructive, r"(?i)\bmkfs(?:\.\w+)?\b[^;&|\n]*"),
    ("raw-device-write", PatternCategory::Destructive, r"(?i)\bdd\s+[^;&|\n]*\bof=/dev/\S*|>\s*/dev/(?:sd|hd|nvme|disk)\w*"),
    ("fork-bomb", PatternCategory::Destructive, r":\(\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:"),
    ("world-writable", PatternCategory::Destructive, r"(?i)\bchmod\s+(?:-[a-z]+\s+)*0?777\b[^;&|\n]*"),
    ("privilege-escalation", PatternCategory::Destructive, r"\b(?:sudo|doas)\s+[^;&|\n]*|\bsu\s+-"),
    ("power-control", PatternCategory::Destructive, r"(?i)\b(?:shutdown|reboot|poweroff|halt)\b"),
    // Process spawning
    ("child-process", PatternCategory::ProcessSpawn, r"\bchild_process\b|\b(?:exec|execSync|execFile|execFileSync|spawn|spawnSync)\s*\("),
    ("os-command", PatternCategory::ProcessSpawn, r"\bsubprocess\.\w+\s*\(|\bos\.(?:system|popen|exec\w*|spawn\w*)\s*\(|\bRuntime\.getRuntime\(\)\.exec"),
    ("pipe-to-shell", PatternCategory::ProcessSpawn, r"\|\s*(?:ba|z|k|da)?sh\b"),
    // Dynamic code evaluation
    ("eval", PatternCategory::CodeEval, r"(?i)\beval\s*\("),
    ("function-constructor", PatternCategory::CodeEval, r"\bnew\s+Function\s*\(|\bFunction\s*\("),
    ("string-timer", PatternCategory::CodeEval, r#"(?i)\bset(?:Timeout|Interval)\s*\(\s*["'`]"#),
    // Network primitives
    ("network-client", PatternCategory::Network, r"\b(?:curl|wget|nc|ncat|netcat|socat|telnet)\s+[^;&|\n]*"),
    ("browser-network", PatternCategory::Network, r"\bfetch\s*\(|\bXMLHttpRequest\b|\bWebSocket\b|\bEventSource\b|\bnavigator\.sendBeacon\b"),
    ("raw-socket", PatternCategory::Network, r"/dev/(?:tcp|udp)/|\bsocket\.socket\s*\(|\bnet\.(?:connect|createConnection|createServer)\s*\("),
    // Filesystem traversal
    ("path-traversal", PatternCategory::Filesystem, r"\.\.[/\\]"),
    ("sensitive-path", PatternCategory::Filesystem, r"/etc/(?:passwd|shadow|sudoers)\b|~/\.ssh\b|\.ssh/(?:id_\w+|authorized_keys)|/proc/self/"),
    ("file-picker", PatternCategory::Filesystem, r"\bshow(?:Open|Save)FilePicker\b|\bshowDirectoryPicker\b"),
    // Browser APIs that escape the page
    ("document-write", PatternCategory::Browser, r"(?i)\bdocument\.(?:write|writeln|open|execCommand)\b"),
    ("html-injection", PatternCategory::Browser, r"(?i)<script|\b(?:inner|outer)HTML\s*=|\binsertAdjacentHTML\b"),
    ("storage-access", PatternCategory::Browser, r"(?i)\b(?:localStorage|sessionStorage|indexedDB|webkitIndexedDB|mozIndexedDB)\b"),
    ("navigation", PatternCategory::Browser, r"(?i)\bwindow\.open\s*\(|\blocation\.href\s*=|\blocation\.(?:replace|assign)\s*\("),
    ("cross-origin-message", PatternCategory::Browser, r"\bpostMessage\s*\("),
    ("workers", PatternCategory::Browser, r"\bnew\s+(?:Shared)?Worker\b|\bnavigator\.serviceWorker\b"),
    ("device-access", PatternCategory::Browser, r"\bnavigator\.(?:clipboard|mediaDevices|getUserMedia|webkitGetUserMedia|mozGetUserMedia)\b"),
    ("crypto-mining", PatternCategory::Browser, r"(?i)\b(?:CryptoNight|coinhive|webminer)\b"),
];

/// One named dangerous construct.
#[derive(Debug, Clone)]
pub struct BlockedPattern {
    name: String,
    category: PatternCategory,
    regex: Regex,
}

impl BlockedPattern {
    /// Compile a pattern.
    ///
    /// # Errors
    /// Returns error if `pattern` is not a valid regular expression.
    pub fn new(
        name: impl Into<String>,
        category: PatternCategory,
        pattern: &str,
    ) -> Result<Self, SecurityError> {
        let regex = Regex::new(pattern).map_err(|e| SecurityError::invalid_pattern(pattern, e))?;
        Ok(Self {
            name: name.into(),
            category,
            regex,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn category(&self) -> PatternCategory {
        self.category
    }

    /// Source of the regular expression.
    #[must_use]
    pub fn pattern(&self) -> &str {
        self.regex.as_str()
    }
}

/// Built-in pattern set.
#[must_use]
pub fn default_patterns() -> Vec<BlockedPattern> {
    DEFAULT_PATTERNS
        .iter()
        .filter_map(|(name, category, pattern)| BlockedPattern::new(*name, *category, pattern).ok())
        .collect()
}

/// Stateless screener for script and command text.
#[derive(Debug, Clone)]
pub struct ScriptSandbox {
    patterns: Vec<BlockedPattern>,
    allowed_root: Option<PathBuf>,
}

impl Default for ScriptSandbox {
    fn default() -> Self {
        Self {
            patterns: default_patterns(),
            allowed_root: None,
        }
    }
}

impl ScriptSandbox {
    /// Build a screener from configuration.
    ///
    /// Custom patterns replace the built-in set and match case-insensitively.
    ///
    /// # Errors
    /// Returns error if a custom pattern does not compile.
    pub fn new(config: &ScriptSandboxConfig) -> Result<Self, SecurityError> {
        let patterns = if config.blocked_patterns.is_empty() {
            default_patterns()
        } else {
            config
                .blocked_patterns
                .iter()
                .map(|p| BlockedPattern::new(p.clone(), PatternCategory::Custom, &format!("(?i){p}")))
                .collect::<Result<Vec<_>, _>>()?
        };

        Ok(Self {
            patterns,
            allowed_root: config.allowed_root.as_deref().map(normalize),
        })
    }

    /// Whether the script contains no blocked construct.
    #[must_use]
    pub fn is_script_allowed(&self, script: &str) -> bool {
        self.script_block_reason(script).is_none()
    }

    /// Why the script is blocked, or `None` if it is allowed.
    #[must_use]
    pub fn script_block_reason(&self, script: &str) -> Option<String> {
        let stripped = strip_comments(script);
        for text in [script, stripped.as_str()] {
            for pattern in &self.patterns {
                if let Some(found) = pattern.regex.find(text) {
                    return Some(format!(
                        "Blocked pattern '{}' ({}) matched: {}",
                        pattern.name,
                        pattern.category,
                        excerpt(found.as_str()),
                    ));
                }
            }
        }

        let root = self.allowed_root.as_deref()?;
        path_arguments(script)
            .into_iter()
            .find(|arg| escapes_root(arg, root))
            .map(|arg| format!("Path '{arg}' escapes allowed root '{}'", root.display()))
    }

    /// Strip comments and replace every blocked fragment with a placeholder.
    ///
    /// Best effort, for contexts that accept degraded output.
    #[must_use]
    pub fn sanitize_script(&self, script: &str) -> String {
        let mut sanitized = strip_comments(script);
        for pattern in &self.patterns {
            sanitized = pattern
                .regex
                .replace_all(&sanitized, BLOCKED_PLACEHOLDER)
                .into_owned();
        }
        sanitized.trim().to_string()
    }

    /// Active pattern set, in evaluation order.
    #[must_use]
    pub fn blocked_patterns(&self) -> &[BlockedPattern] {
        &self.patterns
    }

    #[must_use]
    pub fn allowed_root(&self) -> Option<&Path> {
        self.allowed_root.as_deref()
    }
}

fn strip_comments(script: &str) -> String {
    let without_blocks = BLOCK_COMMENT.replace_all(script, "");
    LINE_COMMENT.replace_all(&without_blocks, "${1}").into_owned()
}

fn excerpt(fragment: &str) -> String {
    const MAX: usize = 60;
    let trimmed = fragment.trim();
    match trimmed.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

/// Tokens that name filesystem paths, including `key=/path` forms.
fn path_arguments(script: &str) -> Vec<String> {
    let tokens = shlex::split(script)
        .unwrap_or_else(|| script.split_whitespace().map(str::to_string).collect());
    tokens
        .iter()
        .enumerate()
        .filter_map(|(idx, token)| {
            let value = token.rsplit('=').next().unwrap_or(token);
            let looks_like_path = value.starts_with('/')
                || value.starts_with('~')
                || value.split(['/', '\\']).any(|part| part == "..");
            if !looks_like_path || (value == "/" && is_division(&tokens, idx)) {
                return None;
            }
            Some(value.to_string())
        })
        .collect()
}

/// Whether the bare `/` at `idx` sits between operands, as in `total / 2`.
fn is_division(tokens: &[String], idx: usize) -> bool {
    let before = idx
        .checked_sub(1)
        .and_then(|i| tokens.get(i))
        .and_then(|t| t.chars().next_back());
    let after = tokens.get(idx + 1).and_then(|t| t.chars().next());
    matches!(before, Some(c) if c.is_ascii_digit() || c == ')' || c == ']')
        || matches!(after, Some(c) if c.is_ascii_digit() || c == '(')
}

fn escapes_root(arg: &str, root: &Path) -> bool {
    if arg.starts_with('~') {
        return true;
    }
    let path = Path::new(arg);
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    };
    !normalize(&joined).starts_with(root)
}

/// Lexical normalisation; never touches the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
