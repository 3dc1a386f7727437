//! Policy evaluation: the ordered gate-and-transform pass over one
//! inbound message under one compiled policy.

use crate::models::event::InboundMessage;
use crate::models::mapping::KeywordMode;
use crate::models::rule::RuleKind;

use super::compiler::{CompiledPolicy, CompiledRule};
use super::transforms;

/// Rendered text longer than this is blocked rather than dispatched;
/// the platform rejects oversized payloads anyway.
const MAX_RENDERED_LEN: usize = 65_536;

/// Why a filter gate dropped a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterReason {
    /// Message kind not in the allowed list.
    Type,
    /// Message is a forward and forwards are blocked.
    Forward,
    /// Text length outside the configured bounds.
    Length,
    /// An exclude keyword matched.
    ExcludeKeyword,
    /// The include keyword requirement missed.
    IncludeKeyword,
    /// Text contains a URL and URLs are blocked.
    Url,
}

impl FilterReason {
    /// Wire representation used in forwarding logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Type => "type",
            Self::Forward => "forward",
            Self::Length => "length",
            Self::ExcludeKeyword => "exclude_kw",
            Self::IncludeKeyword => "include_kw",
            Self::Url => "url",
        }
    }
}

/// Outcome of evaluating one message under one policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Dispatch the transformed text.
    Forward {
        /// Fully rendered outbound text.
        text: String,
    },
    /// Drop the message at a filter gate.
    Filter {
        /// Which gate dropped it.
        reason: FilterReason,
    },
    /// Hold the rendered text for operator approval.
    Approve {
        /// Fully rendered outbound text, pre-computed so approval
        /// dispatches without re-evaluation.
        text: String,
    },
    /// A transform sub-step failed; never dispatched.
    Block {
        /// Failure description for the error log.
        reason: String,
    },
}

/// Evaluate `message` under `policy`.
///
/// Pure and deterministic: identical inputs always produce the
/// identical decision. Gates run in fixed order before any transform
/// touches the text.
#[must_use]
pub fn evaluate(message: &InboundMessage, policy: &CompiledPolicy) -> Decision {
    let filters = &policy.filters;

    // ── 1. Type gate ─────────────────────────────────────
    if !filters.allowed_types.is_empty() && !filters.allowed_types.contains(&message.kind) {
        return Decision::Filter {
            reason: FilterReason::Type,
        };
    }

    // ── 2. Forward gate ──────────────────────────────────
    if message.is_forward && filters.block_forwards {
        return Decision::Filter {
            reason: FilterReason::Forward,
        };
    }

    // ── 3. Length gate ───────────────────────────────────
    let len = u32::try_from(message.text.chars().count()).unwrap_or(u32::MAX);
    if filters.min_len.is_some_and(|min| len < min)
        || filters.max_len.is_some_and(|max| len > max)
    {
        return Decision::Filter {
            reason: FilterReason::Length,
        };
    }

    // ── 4. Exclude keywords ──────────────────────────────
    if keyword_hits(&message.text, &filters.exclude_kw, filters.case_sensitive) > 0 {
        return Decision::Filter {
            reason: FilterReason::ExcludeKeyword,
        };
    }

    // ── 5. Include keywords ──────────────────────────────
    if !filters.include_kw.is_empty() {
        let hits = keyword_hits(&message.text, &filters.include_kw, filters.case_sensitive);
        let required = match filters.kw_mode {
            KeywordMode::Any => 1,
            KeywordMode::All => filters.include_kw.len(),
        };
        if hits < required {
            return Decision::Filter {
                reason: FilterReason::IncludeKeyword,
            };
        }
    }

    // ── 6. URL gate ──────────────────────────────────────
    if filters.block_urls && transforms::contains_url(&message.text) {
        return Decision::Filter {
            reason: FilterReason::Url,
        };
    }

    // ── 7. Transforms ────────────────────────────────────
    let rendered = match apply_transforms(&message.text, policy) {
        Ok(rendered) => rendered,
        Err(reason) => return Decision::Block { reason },
    };

    // ── 8. Approval branch ───────────────────────────────
    if policy.delay.require_approval {
        Decision::Approve { text: rendered }
    } else {
        Decision::Forward { text: rendered }
    }
}

/// Count how many of `keywords` occur in `text`.
fn keyword_hits(text: &str, keywords: &[String], case_sensitive: bool) -> usize {
    if case_sensitive {
        keywords.iter().filter(|kw| text.contains(kw.as_str())).count()
    } else {
        let lowered = text.to_lowercase();
        keywords
            .iter()
            .filter(|kw| lowered.contains(&kw.to_lowercase()))
            .count()
    }
}

/// Run the fixed transform chain: user rules, editing toggles, then
/// header and footer. Each stage feeds the next.
///
/// # Errors
///
/// Returns a block reason string when the rendered output exceeds the
/// platform size ceiling.
pub fn apply_transforms(text: &str, policy: &CompiledPolicy) -> Result<String, String> {
    let mut current = text.to_owned();

    // 7a. User regex rules, already in scope order.
    for rule in &policy.rules {
        current = apply_rule(&current, rule);
    }

    // 7b. Editing toggles, each a fixed pattern.
    let editing = &policy.editing;
    if editing.remove_mentions {
        current = transforms::strip_mentions(&current);
    }
    if editing.remove_urls {
        current = transforms::strip_urls(&current);
    }
    if editing.remove_hashtags {
        current = transforms::strip_hashtags(&current);
    }
    if editing.remove_sender {
        current = transforms::strip_sender_info(&current);
    }

    // 7c. Header and footer.
    if let Some(ref header) = editing.header {
        current = format!("{header}\n{current}");
    }
    if let Some(ref footer) = editing.footer {
        current = format!("{current}\n{footer}");
    }

    if current.chars().count() > MAX_RENDERED_LEN {
        return Err(format!(
            "rendered text exceeds platform limit ({MAX_RENDERED_LEN} chars)"
        ));
    }
    Ok(current)
}

/// Apply one compiled rule to the text.
fn apply_rule(text: &str, rule: &CompiledRule) -> String {
    match rule.kind {
        RuleKind::FindReplace | RuleKind::ConditionalReplace => rule
            .regex
            .replace_all(text, rule.replacement.as_str())
            .into_owned(),
        RuleKind::Remove => rule.regex.replace_all(text, "").into_owned(),
        RuleKind::Extract => {
            let mut extracted = String::new();
            for captures in rule.regex.captures_iter(text) {
                if captures.len() > 1 {
                    for group in captures.iter().skip(1).flatten() {
                        extracted.push_str(group.as_str());
                    }
                } else if let Some(whole) = captures.get(0) {
                    extracted.push_str(whole.as_str());
                }
            }
            extracted
        }
    }
}
