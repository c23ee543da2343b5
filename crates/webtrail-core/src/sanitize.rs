//! Redaction of sensitive substrings from extracted text.
//!
//! Rules run in a fixed order and are cumulative: each one rewrites only
//! its own matches, so text outside a matched span is left untouched.
//! A rule only counts as fired when it changed the text, and placeholders
//! replace to themselves, which makes sanitizing already-sanitized text a
//! no-op.

use std::sync::LazyLock;

use regex::Regex;

/// A single detection rule.
pub struct SanitizeRule {
    pub name: &'static str,
    pub placeholder: &'static str,
    regex: &'static LazyLock<Option<Regex>>,
    /// Replacement template; `$placeholder` is substituted before use.
    template: &'static str,
}

macro_rules! rule_regex {
    ($name:ident, $regex_str:expr) => {
        static $name: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new($regex_str).ok());
    };
}

// ── Credentials: keep key and separator, replace the value up to whitespace ─
rule_regex!(
    RE_CREDENTIAL,
    r"(?i)\b(password|passwd|pwd|passphrase|secret|client[_-]?secret|api[_-]?key|access[_-]?key|access[_-]?token|auth[_-]?token|token)(\s*[:=]\s*)(\[REDACTED\]|\S+)"
);

// ── Payment cards: 13–19 digits with optional single space/dash groups ─────
rule_regex!(RE_CARD, r"\b\d(?:[ -]?\d){12,18}\b");

// ── Government IDs (SSN-style) ─────────────────────────────────────────────
rule_regex!(RE_GOV_ID, r"\b\d{3}-\d{2}-\d{4}\b");

// ── One-time codes after a verification cue ────────────────────────────────
rule_regex!(
    RE_OTP,
    r"(?i)\b(verification code|security code|login code|one-time code|passcode|otp|code|pin)(\s*(?:is|:|=)?\s*)(\d{4,8})\b"
);

static RULES: [SanitizeRule; 4] = [
    SanitizeRule {
        name: "credential",
        placeholder: "[REDACTED]",
        regex: &RE_CREDENTIAL,
        template: "${1}${2}$placeholder",
    },
    SanitizeRule {
        name: "payment_card",
        placeholder: "[CARD]",
        regex: &RE_CARD,
        template: "$placeholder",
    },
    SanitizeRule {
        name: "government_id",
        placeholder: "[SSN]",
        regex: &RE_GOV_ID,
        template: "$placeholder",
    },
    SanitizeRule {
        name: "one_time_code",
        placeholder: "[OTP]",
        regex: &RE_OTP,
        template: "${1}${2}$placeholder",
    },
];

/// Outcome of sanitizing one text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sanitized {
    pub text: String,
    pub redacted: bool,
    /// Names of the rules that fired, in rule order.
    pub rules: Vec<&'static str>,
}

/// Applies the ordered redaction rules.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sanitizer;

impl Sanitizer {
    pub fn new() -> Self {
        Sanitizer
    }

    pub fn rules(&self) -> &'static [SanitizeRule] {
        &RULES
    }

    pub fn sanitize(&self, text: &str) -> Sanitized {
        let mut current = text.to_string();
        let mut fired = Vec::new();

        for rule in RULES.iter() {
            let Some(re) = rule.regex.as_ref() else {
                tracing::error!(rule = rule.name, "sanitizer rule failed to compile");
                continue;
            };
            if !re.is_match(&current) {
                continue;
            }
            let replacement = rule.template.replace("$placeholder", rule.placeholder);
            let next = re.replace_all(&current, replacement.as_str()).into_owned();
            if next != current {
                current = next;
                fired.push(rule.name);
            }
        }

        Sanitized {
            redacted: !fired.is_empty(),
            text: current,
            rules: fired,
        }
    }
}
