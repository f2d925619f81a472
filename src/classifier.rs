//! Feed message classification.
//!
//! A feed line carries a game number (`#N123`), usually a total (`#T11`), and a
//! status glyph. Glyphs fall in two classes:
//! - in progress: ⏰ or ▶️
//! - final: ✅ or 🔰
//!
//! Precedence: an in-progress glyph always wins. Older feed formats sometimes kept
//! a final glyph from a previous round on a message that was still being updated,
//! so a message is only `Finalized` when it carries no in-progress glyph at all.

use regex::Regex;
use std::sync::OnceLock;

const IN_PROGRESS_GLYPHS: &[&str] = &["⏰", "▶"];
const FINAL_GLYPHS: &[&str] = &["✅", "🔰"];

/// Why a line was not treated as a game message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    NoGameNumber,
    NoStatusMarker,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Finalized { game_number: u64, total: u32 },
    Pending { game_number: u64 },
    /// Final glyph present but no extractable total: usually an upstream format change.
    FinalizedWithoutTotal { game_number: u64 },
    Ignore(IgnoreReason),
}

impl Classification {
    pub fn game_number(&self) -> Option<u64> {
        match *self {
            Classification::Finalized { game_number, .. }
            | Classification::Pending { game_number }
            | Classification::FinalizedWithoutTotal { game_number } => Some(game_number),
            Classification::Ignore(_) => None,
        }
    }
}

fn game_number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)#N\s*(\d+)").expect("static regex"))
}

fn total_marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)#T\s*(\d+)").expect("static regex"))
}

fn total_word_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[Tt]otal[\s:]*(\d+)").expect("static regex"))
}

pub fn extract_game_number(text: &str) -> Option<u64> {
    game_number_re()
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// `#T` marker first, then a spelled-out `Total: n`.
pub fn extract_total(text: &str) -> Option<u32> {
    [total_marker_re(), total_word_re()].iter().find_map(|re| {
        re.captures(text)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok())
    })
}

pub fn is_in_progress(text: &str) -> bool {
    IN_PROGRESS_GLYPHS.iter().any(|g| text.contains(g))
}

pub fn is_final(text: &str) -> bool {
    FINAL_GLYPHS.iter().any(|g| text.contains(g))
}

/// Classify a raw feed line. Pure: same input, same output.
pub fn classify(text: &str) -> Classification {
    let Some(game_number) = extract_game_number(text) else {
        return Classification::Ignore(IgnoreReason::NoGameNumber);
    };

    if is_in_progress(text) {
        return Classification::Pending { game_number };
    }

    if is_final(text) {
        return match extract_total(text) {
            Some(total) => Classification::Finalized { game_number, total },
            None => Classification::FinalizedWithoutTotal { game_number },
        };
    }

    Classification::Ignore(IgnoreReason::NoStatusMarker)
}
