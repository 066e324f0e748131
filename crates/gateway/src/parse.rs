//! Text helpers that pull structured fields out of bot message payloads.

use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::frame::Component;
use crate::types::{MjInfo, MjOption};

static PROMPT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*\*(.*?)\*\*").unwrap());
static PROGRESS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\(([^)]+)\)").unwrap());
static KEYCAP_PROMPT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d\x{FE0F}\x{20E3} .+").unwrap());
static INFO_LINE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*\*(.+?)\*\*:\s*(.*)").unwrap());

/// Canonical prompt key: the bold section of the content, or the whole
/// content when there is none.
pub fn content_to_prompt(content: &str) -> String {
    match PROMPT_RE.captures(content).and_then(|c| c.get(1)) {
        Some(m) => m.as_str().trim().to_string(),
        None => content.trim().to_string(),
    }
}

/// Stage text such as `31%` or `fast`: the first parenthesised group after
/// the user mention. Empty when the content carries no mention.
pub fn content_to_progress(content: &str) -> String {
    let Some((_, after_mention)) = content.split_once("<@") else {
        return String::new();
    };
    PROGRESS_RE
        .captures(after_mention)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_default()
}

/// Job hash embedded in a CDN file name: `name_<hash>.png` -> `<hash>`.
pub fn uri_to_hash(uri: &str) -> String {
    let tail = uri.rsplit('_').next().unwrap_or_default();
    tail.split('.').next().unwrap_or_default().to_string()
}

/// Flatten component rows into selectable options. Entries without a
/// custom id (link buttons, rows) are skipped.
pub fn format_options(components: &[Component]) -> Vec<MjOption> {
    let mut options = Vec::new();
    for component in components {
        if !component.components.is_empty() {
            options.extend(format_options(&component.components));
        }
        let Some(custom) = &component.custom_id else {
            continue;
        };
        let label = component
            .label
            .clone()
            .or_else(|| component.emoji.as_ref().and_then(|e| e.name.clone()))
            .unwrap_or_default();
        options.push(MjOption {
            kind: component.kind,
            style: component.style.unwrap_or_default(),
            label,
            custom: custom.clone(),
        });
    }
    options
}

/// Candidate prompts of a shorten reply (`1️⃣ ...` lines).
pub fn format_prompts(description: &str) -> Vec<String> {
    KEYCAP_PROMPT_RE
        .find_iter(description)
        .map(|m| m.as_str().trim().to_string())
        .collect()
}

pub fn format_info(description: &str) -> MjInfo {
    let fields = description
        .lines()
        .filter_map(|line| INFO_LINE_RE.captures(line))
        .filter_map(|c| Some((c.get(1)?.as_str().trim().to_string(), c.get(2)?.as_str().trim().to_string())))
        .collect();
    MjInfo { fields }
}

const DISCORD_EPOCH_MS: i64 = 1_420_070_400_000;
static LAST_NONCE: AtomicU64 = AtomicU64::new(0);

/// Fresh correlation token in snowflake form, strictly increasing within
/// the process.
pub fn next_nonce() -> String {
    let elapsed = (chrono::Utc::now().timestamp_millis() - DISCORD_EPOCH_MS).max(0) as u64;
    let candidate = elapsed << 22;
    let mut last = LAST_NONCE.load(Ordering::Relaxed);
    loop {
        let next = candidate.max(last + 1);
        match LAST_NONCE.compare_exchange_weak(last, next, Ordering::SeqCst, Ordering::Relaxed) {
            Ok(_) => return next.to_string(),
            Err(actual) => last = actual,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_to_prompt() {
        assert_eq!(
            content_to_prompt("**a cute cat --v 5** - <@123> (fast)"),
            "a cute cat --v 5"
        );
        assert_eq!(content_to_prompt("  a cute cat "), "a cute cat");
        assert_eq!(content_to_prompt(""), "");
    }

    #[test]
    fn test_content_to_progress() {
        assert_eq!(content_to_progress("**a cat** - <@123> (31%) (relaxed)"), "31%");
        assert_eq!(content_to_progress("**a cat** - <@123> (Waiting to start)"), "Waiting to start");
        assert_eq!(content_to_progress("**a cat** (no mention)"), "");
    }

    #[test]
    fn test_uri_to_hash() {
        let uri = "https://cdn.example.com/attachments/1/2/user_a_cute_cat_5f7e-11aa.png";
        assert_eq!(uri_to_hash(uri), "5f7e-11aa");
    }

    #[test]
    fn test_format_options_flattens_rows() {
        let rows: Vec<Component> = serde_json::from_str(
            r#"[{"type":1,"components":[
                {"type":2,"style":2,"label":"U1","custom_id":"MJ::JOB::upsample::1::h"},
                {"type":2,"style":2,"emoji":{"name":"🔄"},"custom_id":"MJ::JOB::reroll::0::h::SOLO"},
                {"type":2,"style":5,"label":"Web","url":"https://x"}
            ]}]"#,
        )
        .unwrap();
        let options = format_options(&rows);
        assert_eq!(options.len(), 2);
        assert_eq!(options[0].label, "U1");
        assert_eq!(options[0].style, 2);
        assert_eq!(options[1].label, "🔄");
    }

    #[test]
    fn test_format_prompts() {
        let description = "1️⃣ a cat on a mat\n\n2️⃣ a kitten\n\nsomething else";
        assert_eq!(format_prompts(description), vec!["1️⃣ a cat on a mat", "2️⃣ a kitten"]);
    }

    #[test]
    fn test_format_info() {
        let info = format_info("**Subscription**: Basic\n**Job Mode**: Fast\nnoise");
        assert_eq!(info.get("Subscription"), Some("Basic"));
        assert_eq!(info.get("Job Mode"), Some("Fast"));
        assert_eq!(info.fields.len(), 2);
    }

    #[test]
    fn test_next_nonce_strictly_increases() {
        let a: u64 = next_nonce().parse().unwrap();
        let b: u64 = next_nonce().parse().unwrap();
        assert!(b > a);
    }
}
