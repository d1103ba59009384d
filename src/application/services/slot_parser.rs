//! Slot parser - Tolerant extraction of `[SLOT_ID]: content` associations
//!
//! Specialist output is requested in a strict marker format, but the text
//! generator is not contractually bound to honor it. Extraction is therefore
//! a cascade of independent strategies tried in fixed priority order; the
//! cascade stops at the first strategy that recovers at least one slot.
//! `extract` is total: it never fails, worst case it returns an empty map.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::domain::value_objects::SlotContentMap;

static SLOT_TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[([A-Z][A-Z0-9_]*)\]").expect("slot token regex"));

static SINGLE_LINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*\[([A-Z][A-Z0-9_]*)\]\s*:\s*(.+)$").expect("single line regex")
});

static BLOCK_HEAD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*\[([A-Z][A-Z0-9_]*)\]\s*:?\s*$").expect("block head regex")
});

static HEADING_RES: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?m)^##\s*\[([A-Z][A-Z0-9_]*)\]\s*$").expect("heading regex"),
        Regex::new(r"(?m)^\*\*\[([A-Z][A-Z0-9_]*)\]\*\*\s*$").expect("bold heading regex"),
        Regex::new(r"(?m)^###\s*([A-Z][A-Z0-9_]*)\s*$").expect("bare heading regex"),
    ]
});

static NUMBERED_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*\d+[.)]\s*\[([A-Z][A-Z0-9_]*)\]\s*:?\s*").expect("numbered regex")
});

/// Maximum accepted length for block-style slot content.
const MAX_BLOCK_LEN: usize = 2000;

/// One tolerant-parsing heuristic. Strategies are independent so each can
/// be tested on its own.
pub trait SlotExtraction: Send + Sync {
    fn name(&self) -> &'static str;

    /// Try to recover slots from the text. `None` (or an empty map) means
    /// the strategy does not apply and the cascade moves on.
    fn attempt(&self, text: &str) -> Option<SlotContentMap>;
}

/// Strip wrapping quotes and leading list/quote artifacts from recovered content.
fn clean_content(raw: &str) -> String {
    let mut content = raw.trim();
    if (content.starts_with('"') && content.ends_with('"') && content.len() >= 2)
        || (content.starts_with('\'') && content.ends_with('\'') && content.len() >= 2)
    {
        content = &content[1..content.len() - 1];
    }
    content
        .trim_start_matches(|c: char| c.is_whitespace() || matches!(c, '-' | '*' | '>'))
        .trim()
        .to_string()
}

/// Strategy 1: `[SLOT_ID]: content` on a single line, quoted or bare.
struct SingleLineStrategy;

impl SlotExtraction for SingleLineStrategy {
    fn name(&self) -> &'static str {
        "single-line"
    }

    fn attempt(&self, text: &str) -> Option<SlotContentMap> {
        let mut slots = SlotContentMap::new();
        for caps in SINGLE_LINE_RE.captures_iter(text) {
            let content = clean_content(&caps[2]);
            if !content.is_empty() {
                slots.entry(caps[1].to_string()).or_insert(content);
            }
        }
        (!slots.is_empty()).then_some(slots)
    }
}

/// Strategy 2: `[SLOT_ID]` or `[SLOT_ID]:` on its own line, content on the
/// following lines until the next marker line or a blank line.
struct BlockStrategy;

impl SlotExtraction for BlockStrategy {
    fn name(&self) -> &'static str {
        "multi-line-block"
    }

    fn attempt(&self, text: &str) -> Option<SlotContentMap> {
        let mut slots = SlotContentMap::new();
        let lines: Vec<&str> = text.lines().collect();
        let mut i = 0;

        while i < lines.len() {
            let Some(caps) = BLOCK_HEAD_RE.captures(lines[i]) else {
                i += 1;
                continue;
            };
            let id = caps[1].to_string();
            let mut block: Vec<&str> = Vec::new();
            let mut j = i + 1;
            while j < lines.len() {
                let line = lines[j];
                if line.trim().is_empty() || BLOCK_HEAD_RE.is_match(line) {
                    break;
                }
                block.push(line);
                j += 1;
            }
            let content = clean_content(&block.join("\n"));
            if !content.is_empty() && content.len() < MAX_BLOCK_LEN {
                slots.entry(id).or_insert(content);
            }
            i = j.max(i + 1);
        }

        (!slots.is_empty()).then_some(slots)
    }
}

/// Strategy 3: an embedded JSON object mapping slot ids to strings.
struct EmbeddedJsonStrategy;

impl EmbeddedJsonStrategy {
    /// Extract the first balanced `{ ... }` span from the text.
    fn balanced_object(text: &str) -> Option<&str> {
        let start = text.find('{')?;
        let mut depth = 0usize;
        let mut in_string = false;
        let mut escaped = false;
        for (offset, c) in text[start..].char_indices() {
            if in_string {
                match c {
                    '\\' if !escaped => escaped = true,
                    '"' if !escaped => in_string = false,
                    _ => escaped = false,
                }
                continue;
            }
            match c {
                '"' => in_string = true,
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(&text[start..start + offset + c.len_utf8()]);
                    }
                }
                _ => {}
            }
        }
        None
    }
}

impl SlotExtraction for EmbeddedJsonStrategy {
    fn name(&self) -> &'static str {
        "embedded-json"
    }

    fn attempt(&self, text: &str) -> Option<SlotContentMap> {
        let object = Self::balanced_object(text)?;
        let parsed: serde_json::Value = serde_json::from_str(object).ok()?;
        let map = parsed.as_object()?;

        let mut slots = SlotContentMap::new();
        for (key, value) in map {
            let id = key.trim_matches(|c| c == '[' || c == ']');
            let looks_like_slot = SLOT_TOKEN_RE.is_match(&format!("[{}]", id));
            if let Some(content) = value.as_str() {
                if looks_like_slot && !content.is_empty() {
                    slots.insert(id.to_string(), content.to_string());
                }
            }
        }
        (!slots.is_empty()).then_some(slots)
    }
}

/// Strategy 4: markdown-heading-delimited blocks (`## [ID]`, `**[ID]**`, `### ID`).
struct MarkdownHeadingStrategy;

impl SlotExtraction for MarkdownHeadingStrategy {
    fn name(&self) -> &'static str {
        "markdown-heading"
    }

    fn attempt(&self, text: &str) -> Option<SlotContentMap> {
        for re in HEADING_RES.iter() {
            let headings: Vec<(String, usize, usize)> = re
                .captures_iter(text)
                .map(|caps| {
                    let whole = caps.get(0).expect("capture 0");
                    (caps[1].to_string(), whole.start(), whole.end())
                })
                .collect();
            if headings.is_empty() {
                continue;
            }

            let mut slots = SlotContentMap::new();
            for (idx, (id, _, end)) in headings.iter().enumerate() {
                let until = headings
                    .get(idx + 1)
                    .map(|(_, next_start, _)| *next_start)
                    .unwrap_or(text.len());
                let content = clean_content(&text[*end..until]);
                if !content.is_empty() && content.len() < MAX_BLOCK_LEN {
                    slots.entry(id.clone()).or_insert(content);
                }
            }
            if !slots.is_empty() {
                return Some(slots);
            }
        }
        None
    }
}

/// Strategy 5: numbered-list entries like `1. [SLOT_ID]: content`.
struct NumberedListStrategy;

impl SlotExtraction for NumberedListStrategy {
    fn name(&self) -> &'static str {
        "numbered-list"
    }

    fn attempt(&self, text: &str) -> Option<SlotContentMap> {
        let entries: Vec<(String, usize)> = NUMBERED_RE
            .captures_iter(text)
            .map(|caps| {
                let whole = caps.get(0).expect("capture 0");
                (caps[1].to_string(), whole.end())
            })
            .collect();
        if entries.is_empty() {
            return None;
        }

        let starts: Vec<usize> = NUMBERED_RE.find_iter(text).map(|m| m.start()).collect();
        let mut slots = SlotContentMap::new();
        for (idx, (id, content_start)) in entries.iter().enumerate() {
            let until = starts.get(idx + 1).copied().unwrap_or(text.len());
            let content = clean_content(&text[*content_start..until]);
            if !content.is_empty() {
                slots.entry(id.clone()).or_insert(content);
            }
        }
        (!slots.is_empty()).then_some(slots)
    }
}

/// Strategy 6: last resort. For every bracket token in the text, scan a
/// bounded window of surrounding prose and accept it only if the recovered
/// span is 10-1000 characters and free of further bracket tokens.
struct WindowScanStrategy;

impl WindowScanStrategy {
    const WINDOW: usize = 500;
    const MIN_LEN: usize = 10;
    const MAX_LEN: usize = 1000;
}

impl SlotExtraction for WindowScanStrategy {
    fn name(&self) -> &'static str {
        "window-scan"
    }

    fn attempt(&self, text: &str) -> Option<SlotContentMap> {
        let tokens: Vec<(String, usize, usize)> = SLOT_TOKEN_RE
            .captures_iter(text)
            .map(|caps| {
                let whole = caps.get(0).expect("capture 0");
                (caps[1].to_string(), whole.start(), whole.end())
            })
            .collect();
        if tokens.is_empty() {
            return None;
        }

        let mut slots = SlotContentMap::new();
        for (idx, (id, start, end)) in tokens.iter().enumerate() {
            if slots.contains_key(id) {
                continue;
            }

            // Window after the token, up to the next token or WINDOW chars.
            let after_limit = tokens
                .get(idx + 1)
                .map(|(_, next_start, _)| *next_start)
                .unwrap_or(text.len())
                .min(floor_char_boundary(text, end + Self::WINDOW));
            let mut content = text[*end..after_limit]
                .trim_start_matches(|c: char| c.is_whitespace() || matches!(c, ':' | ';' | '-'))
                .trim()
                .to_string();

            // Too little after the token: try the window before it instead.
            if content.chars().count() < 20 {
                let before_start = tokens[..idx]
                    .last()
                    .map(|(_, _, prev_end)| *prev_end)
                    .unwrap_or(0)
                    .max(ceil_char_boundary(text, start.saturating_sub(Self::WINDOW)));
                content = text[before_start..*start]
                    .trim_start_matches(|c: char| c.is_whitespace() || matches!(c, ':' | ';' | '-'))
                    .trim()
                    .to_string();
            }

            let len = content.chars().count();
            if (Self::MIN_LEN..=Self::MAX_LEN).contains(&len) && !content.contains('[') {
                slots.insert(id.clone(), content);
            }
        }
        (!slots.is_empty()).then_some(slots)
    }
}

/// Clamp a byte index down to the nearest char boundary.
fn floor_char_boundary(text: &str, index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    let mut i = index;
    while !text.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Clamp a byte index up to the nearest char boundary.
fn ceil_char_boundary(text: &str, index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    let mut i = index;
    while !text.is_char_boundary(i) {
        i += 1;
    }
    i
}

/// The full cascade, in fixed priority order.
pub struct SlotParser {
    strategies: Vec<Box<dyn SlotExtraction>>,
}

impl Default for SlotParser {
    fn default() -> Self {
        Self {
            strategies: vec![
                Box::new(SingleLineStrategy),
                Box::new(BlockStrategy),
                Box::new(EmbeddedJsonStrategy),
                Box::new(MarkdownHeadingStrategy),
                Box::new(NumberedListStrategy),
                Box::new(WindowScanStrategy),
            ],
        }
    }
}

impl SlotParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extract slot content from free-form generated text.
    ///
    /// Total: returns an empty map when nothing can be recovered.
    pub fn extract(&self, text: &str) -> SlotContentMap {
        for strategy in &self.strategies {
            if let Some(slots) = strategy.attempt(text) {
                if !slots.is_empty() {
                    tracing::debug!(
                        strategy = strategy.name(),
                        slots = slots.len(),
                        "slot extraction succeeded"
                    );
                    return slots;
                }
            }
        }

        tracing::warn!(
            preview = %text.chars().take(120).collect::<String>(),
            length = text.len(),
            "no slots recovered from specialist output"
        );
        SlotContentMap::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> SlotParser {
        SlotParser::new()
    }

    #[test]
    fn test_extract_is_total_on_junk() {
        assert!(parser().extract("").is_empty());
        assert!(parser().extract("no markers at all, just prose").is_empty());
        assert!(parser().extract("[] [123] [not-a-slot]").is_empty());
        assert!(parser().extract("{\"broken\": ").is_empty());
    }

    #[test]
    fn test_single_line_standard_format() {
        let slots = parser().extract(
            "[DIALOGUE_GREETING]: \"You're early,\" the barkeep said without looking up.\n\n\
             [INTERNAL_SUSPICION]: Something was off. Maybe it was the way he would not meet her eyes.",
        );
        assert_eq!(slots.len(), 2);
        assert_eq!(
            slots["DIALOGUE_GREETING"],
            "\"You're early,\" the barkeep said without looking up."
        );
        assert!(slots["INTERNAL_SUSPICION"].starts_with("Something was off"));
    }

    #[test]
    fn test_single_line_keeps_quoted_content() {
        let slots = parser().extract("[DIALOGUE_B]: \"你来了。\"");
        assert_eq!(slots["DIALOGUE_B"], "你来了。");
    }

    #[test]
    fn test_multiline_block_format() {
        let slots = parser().extract(
            "[DESCRIPTION_TAVERN]\nSmoke hung between the beams.\nThe lamplight struggled.\n\n\
             [ACTION_ENTRANCE]:\nThe chair legs screeched across stone.",
        );
        assert_eq!(slots.len(), 2);
        assert!(slots["DESCRIPTION_TAVERN"].contains("lamplight"));
        assert!(slots["ACTION_ENTRANCE"].starts_with("The chair legs"));
    }

    #[test]
    fn test_embedded_json_format() {
        let slots = parser().extract(
            "Here is the content you asked for:\n\
             {\"DIALOGUE_A\": \"\\\"Leave,\\\" she said.\", \"INTERNAL_B\": \"He wanted to stay.\"}",
        );
        assert_eq!(slots.len(), 2);
        assert_eq!(slots["INTERNAL_B"], "He wanted to stay.");
    }

    #[test]
    fn test_markdown_heading_format() {
        let slots = parser().extract(
            "## [DESCRIPTION_STORM]\nRain hammered the flagstones outside.\n\n\
             ## [ACTION_FLIGHT]\nShe ran before the second bell.",
        );
        assert_eq!(slots.len(), 2);
        assert!(slots["DESCRIPTION_STORM"].starts_with("Rain hammered"));
    }

    #[test]
    fn test_numbered_list_format() {
        let slots = parser().extract(
            "1. [DIALOGUE_ONE]: \"We need to talk.\"\n2. [DIALOGUE_TWO]: \"Not here.\"",
        );
        assert_eq!(slots.len(), 2);
        assert_eq!(slots["DIALOGUE_TWO"], "Not here.");
    }

    #[test]
    fn test_window_scan_fallback() {
        // Markers embedded mid-prose: none of the structured formats apply.
        let slots = parser().extract(
            "The agent wrote [INTERNAL_DOUBT] she could not shake the feeling that the \
             ledger had been altered before she ever opened it.",
        );
        assert_eq!(slots.len(), 1);
        assert!(slots["INTERNAL_DOUBT"].starts_with("she could not shake"));
    }

    #[test]
    fn test_window_scan_rejects_spans_with_markers() {
        // The span between the tokens is shorter than 10 chars and the
        // before-window for the second token contains a bracket, so only
        // well-formed recoveries survive.
        let slots =
            parser().extract("[INTERNAL_A] short [INTERNAL_B] and then a long enough tail here.");
        assert!(!slots.contains_key("INTERNAL_A"));
        assert!(slots.contains_key("INTERNAL_B"));
    }

    #[test]
    fn test_cascade_stops_at_first_hit() {
        // Single-line matches, so the JSON object below must be ignored.
        let slots = parser().extract(
            "[DIALOGUE_A]: real content here\n\n{\"DIALOGUE_FAKE\": \"should not appear\"}",
        );
        assert!(slots.contains_key("DIALOGUE_A"));
        assert!(!slots.contains_key("DIALOGUE_FAKE"));
    }

    #[test]
    fn test_artifact_cleanup() {
        let slots = parser().extract("[DESCRIPTION_A]: - > *  The hall smelled of cold mutton.");
        assert_eq!(slots["DESCRIPTION_A"], "The hall smelled of cold mutton.");
    }
}
