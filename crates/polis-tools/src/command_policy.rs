//! Command denylist for the shell tool.

/// Patterns that are always blocked, matched case-insensitively against
/// the whitespace-normalized command string.
const BLOCKED_PATTERNS: &[&str] = &[
    "rm -rf /",
    "sudo ",
    "mkfs",
    "dd if=",
    ":(){ :|:& };:",
    "chmod 777 /",
    "> /dev/sd",
    "shutdown",
    "reboot",
    "poweroff",
    "format c:",
];

/// Denylist-based command validation.
#[derive(Debug, Clone)]
pub struct CommandPolicy {
    patterns: Vec<String>,
}

impl Default for CommandPolicy {
    fn default() -> Self {
        Self {
            patterns: BLOCKED_PATTERNS.iter().map(|s| (*s).to_string()).collect(),
        }
    }
}

impl CommandPolicy {
    /// A policy with extra patterns on top of the defaults.
    pub fn with_extra_patterns(extra: Vec<String>) -> Self {
        let mut policy = Self::default();
        policy.patterns.extend(extra);
        policy
    }

    /// Return the matching blocked pattern, if any.
    ///
    /// Whitespace is normalized to single spaces first so `sudo\tcmd`
    /// still matches the `sudo ` pattern.
    pub fn blocked_by(&self, command: &str) -> Option<&str> {
        let normalized: String = command
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        // The normalized form drops trailing whitespace, so also check
        // with a trailing space appended for patterns like "sudo ".
        let padded = format!("{normalized} ");
        self.patterns
            .iter()
            .find(|p| padded.contains(p.as_str()))
            .map(String::as_str)
    }
}
