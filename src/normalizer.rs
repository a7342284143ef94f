// 🧹 Text Normalizer - bank statement noise in, merchant tokens out
//
// "WITHDRAWAL-ACH-A-0000 WEBVENMO PAYMENT 1234567890" -> "venmo payment"
// "STARBUCKS #1234 SEATTLE WA"                          -> "starbucks seattle wa"
//
// Pure and deterministic. An empty result means "no signal".

use regex::Regex;
use std::sync::OnceLock;

// ============================================================================
// PATTERNS
// ============================================================================

/// Transaction-type prefixes, anchored at the start of the lower-cased text.
/// Specific ACH/transfer forms come before the generic ones.
const PREFIX_PATTERNS: &[&str] = &[
    r"^withdrawal-ach-a-\S*\s*",
    r"^deposit-ach-a-\S*\s*",
    r"^withdrawal-transfer-\S*\s*",
    r"^withdrawal[-\s]*@?\s*",
    r"^deposit[-\s]*@?\s*",
    r"^web",
];

/// Noise fragments replaced by a single space
const NOISE_PATTERNS: &[&str] = &[
    r"\d{6,}",                                           // account / trace numbers
    r"#\d+",                                             // store numbers
    r"\(\d+\)",                                          // numbers in parentheses
    r"\([^)]*\)",                                        // anything else in parentheses
    r"trace\s*#?\s*\d+",
    r"ref(erence)?\s*(no|num)?\.?\s*#?\s*\d+",
    r"eff\.?\s*date.*",
    r"\d{1,2}/\d{1,2}/\d{2,4}",                          // dates
    r"\d{3}[-\s]?\d{3}[-\s]?\d{4}",                      // phone numbers
    r"\b[a-z]{2}\s+us\b",                                // "ca us"
    r"\bus\b$",
    r"\bca\b$",
    r"online\s*access",
    r"transfer\s*(std|dts)",
    r"from\s+share\s+\d+",
    r"to\s+share\s+\d+",
    r"item\s*#?\d+",
    r"ro\s*\d+",
    r"\d+\s*[a-z]\s+[a-z]+\s+(ave?|st|rd|blvd|dr|way)", // street addresses
];

fn prefix_regexes() -> &'static [Regex] {
    static RE: OnceLock<Vec<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        PREFIX_PATTERNS
            .iter()
            .map(|p| Regex::new(p).expect("invalid prefix regex"))
            .collect()
    })
}

fn noise_regexes() -> &'static [Regex] {
    static RE: OnceLock<Vec<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        NOISE_PATTERNS
            .iter()
            .map(|p| Regex::new(p).expect("invalid noise regex"))
            .collect()
    })
}

fn non_alphanumeric_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^a-z0-9\s]").expect("invalid character class regex"))
}

// ============================================================================
// NORMALIZATION
// ============================================================================

/// Normalize a raw merchant or description string.
///
/// Steps: lower-case, strip transaction-type prefixes, blank out noise
/// fragments, replace punctuation with spaces, collapse whitespace.
/// The pipeline is repeated until the text stops changing, so
/// `normalize(normalize(x)) == normalize(x)`.
pub fn normalize(raw: &str) -> String {
    let mut current = normalize_once(raw);
    loop {
        let next = normalize_once(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}

/// Normalize an optional field; `None` and pure noise both come back as `None`.
pub fn normalize_opt(raw: Option<&str>) -> Option<String> {
    raw.map(normalize).filter(|s| !s.is_empty())
}

fn normalize_once(raw: &str) -> String {
    let mut text = raw.to_lowercase();

    for re in prefix_regexes() {
        text = re.replace(&text, "").into_owned();
    }

    for re in noise_regexes() {
        text = re.replace_all(&text, " ").into_owned();
    }

    let text = non_alphanumeric_regex().replace_all(&text, " ");

    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ============================================================================
// TESTS
// ============================================================================
