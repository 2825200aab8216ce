//! Script safety gate: static pattern analysis before anything runs
//!
//! Pattern matching instead of AST analysis is a deliberate tradeoff:
//! over-blocking is acceptable, under-blocking is not. The pattern set is
//! pluggable so it
//! can be swapped for an AST-based analyzer without changing the gate's
//! interface. Validation executes nothing and never blocks.

use regex::Regex;
use serde::Serialize;

/// Hard ceiling on script size
const MAX_SCRIPT_BYTES: usize = 100 * 1024;

/// Command words the agent's scripts are expected to use
const RECOGNIZED_COMMANDS: &[&str] = &["ph-file", "ph-web", "ph-cloud", "ph-memo", "ph-ask"];

/// Common shell builtins and utilities that do not warrant a warning
const BENIGN_COMMANDS: &[&str] = &[
    "echo", "cat", "ls", "pwd", "cd", "head", "tail", "grep", "sort", "uniq", "wc", "date", "true",
    "printf", "test",
];

/// Coarse classification assigned to a script
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SafetyLevel {
    Safe,
    Caution,
    Dangerous,
}

/// Verdict for one script. Invariant: `Dangerous` implies `!valid`, and an
/// invalid script must never reach the executor.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationOutcome {
    pub valid: bool,
    /// Non-empty only when invalid
    pub errors: Vec<String>,
    /// Advisory; never blocks execution
    pub warnings: Vec<String>,
    pub safety_level: SafetyLevel,
    /// Recognized command names found, for audit/telemetry only
    pub detected_commands: Vec<String>,
}

impl ValidationOutcome {
    fn ok(warnings: Vec<String>, detected_commands: Vec<String>) -> Self {
        let safety_level = if warnings.is_empty() {
            SafetyLevel::Safe
        } else {
            SafetyLevel::Caution
        };
        Self {
            valid: true,
            errors: vec![],
            warnings,
            safety_level,
            detected_commands,
        }
    }

    fn rejected(errors: Vec<String>, level: SafetyLevel, detected_commands: Vec<String>) -> Self {
        Self {
            valid: false,
            errors,
            warnings: vec![],
            safety_level: level,
            detected_commands,
        }
    }
}

/// One dangerous construct to look for
pub struct DangerPattern {
    regex: Regex,
    description: &'static str,
}

impl DangerPattern {
    fn new(pattern: &str, description: &'static str) -> Self {
        Self {
            regex: Regex::new(pattern).expect("danger pattern must compile"),
            description,
        }
    }
}

/// The set of dangerous constructs the gate rejects.
///
/// Maintained conservatively; re-review whenever a new dangerous idiom
/// turns up.
pub struct PatternSet {
    patterns: Vec<DangerPattern>,
}

impl Default for PatternSet {
    fn default() -> Self {
        Self {
            patterns: vec![
                DangerPattern::new(
                    r"\brm\s+(?:-[a-zA-Z]+\s+)*-[a-zA-Z]*[rR][a-zA-Z]*\s+(?:-[a-zA-Z]+\s+)*(?:/|~|\$HOME|\*)",
                    "recursive file removal of a root-like path",
                ),
                DangerPattern::new(r"\bsudo\b", "privilege escalation via sudo"),
                DangerPattern::new(r"\beval\b", "dynamic code evaluation"),
                DangerPattern::new(
                    r"(?m)(?:\bexport\s+PATH\s*=|^\s*PATH\s*=)",
                    "PATH mutation that can hijack command resolution",
                ),
                DangerPattern::new(
                    r"\b(?:nc|ncat|netcat)\s+(?:-[a-zA-Z]+\s+)*-[a-zA-Z]*l",
                    "raw listening socket",
                ),
                DangerPattern::new(
                    r"\b(?:curl|wget|fetch)\b[^\n]*\|[^\n]*\b(?:sh|bash|zsh|dash)\b",
                    "remote download piped into a shell",
                ),
            ],
        }
    }
}

impl PatternSet {
    /// Build a custom pattern set (swap-in point for a stricter analyzer)
    pub fn new(patterns: Vec<(String, &'static str)>) -> Self {
        Self {
            patterns: patterns
                .into_iter()
                .map(|(p, d)| DangerPattern::new(&p, d))
                .collect(),
        }
    }

    /// Descriptions of every pattern matched by the text
    fn matches(&self, text: &str) -> Vec<&'static str> {
        self.patterns
            .iter()
            .filter(|p| p.regex.is_match(text))
            .map(|p| p.description)
            .collect()
    }
}

/// Decides, before any execution, whether script text is safe to run
pub struct ScriptSafetyGate {
    patterns: PatternSet,
}

impl ScriptSafetyGate {
    pub fn new(patterns: PatternSet) -> Self {
        Self { patterns }
    }

    /// Statically validate a script
    pub fn validate(&self, script: &str) -> ValidationOutcome {
        if script.trim().is_empty() {
            return ValidationOutcome::rejected(
                vec!["script is empty".to_string()],
                SafetyLevel::Caution,
                vec![],
            );
        }

        if script.len() > MAX_SCRIPT_BYTES {
            return ValidationOutcome::rejected(
                vec![format!(
                    "script exceeds the {} KB size ceiling ({} bytes)",
                    MAX_SCRIPT_BYTES / 1024,
                    script.len()
                )],
                SafetyLevel::Caution,
                vec![],
            );
        }

        let detected = detect_commands(script);

        // Pipelines are validated whole. Logical lines rejoin shell
        // continuations first, so a pipeline split across physical lines
        // is rejected when any of its stages matches, regardless of how
        // benign the first stage looks.
        let lines = logical_lines(script);
        let mut errors: Vec<String> = Vec::new();
        for line in &lines {
            for description in self.patterns.matches(line) {
                errors.push(format!("dangerous construct: {}", description));
            }
        }
        if !errors.is_empty() {
            errors.dedup();
            return ValidationOutcome::rejected(errors, SafetyLevel::Dangerous, detected);
        }

        let warnings = collect_warnings(&lines);
        ValidationOutcome::ok(warnings, detected)
    }
}

impl Default for ScriptSafetyGate {
    fn default() -> Self {
        Self::new(PatternSet::default())
    }
}

/// Rejoin physical lines into the logical lines the shell would parse.
///
/// A line ending in `\`, `|`, `&&`, or `||` continues onto the next one;
/// the shell treats the pair as a single pipeline, so the gate must too.
fn logical_lines(script: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for line in script.lines() {
        let mut chunk = line.trim_end();
        let continues = if let Some(stripped) = chunk.strip_suffix('\\') {
            chunk = stripped.trim_end();
            true
        } else {
            chunk.ends_with('|') || chunk.ends_with("&&")
        };

        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(chunk.trim_start());

        if !continues {
            lines.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

/// Extract recognized command names, in first-appearance order, deduplicated
fn detect_commands(script: &str) -> Vec<String> {
    let mut found = Vec::new();
    for word in script.split_whitespace() {
        let word = word.trim_matches(|c: char| !c.is_ascii_alphanumeric() && c != '-');
        if RECOGNIZED_COMMANDS.contains(&word) && !found.iter().any(|f| f == word) {
            found.push(word.to_string());
        }
    }
    found
}

/// Warn about leading commands outside the recognized vocabulary
fn collect_warnings(lines: &[String]) -> Vec<String> {
    let mut warnings = Vec::new();
    for line in lines {
        for stage in line.split('|') {
            let Some(head) = stage.split_whitespace().next() else {
                continue;
            };
            if RECOGNIZED_COMMANDS.contains(&head)
                || BENIGN_COMMANDS.contains(&head)
                || head.starts_with('#')
            {
                continue;
            }
            let warning = format!("unrecognized command '{}'", head);
            if !warnings.contains(&warning) {
                warnings.push(warning);
            }
        }
    }
    warnings
}
