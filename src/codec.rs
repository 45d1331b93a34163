//! Message codec: the fixed text grammar of a queue message.
//!
//! ```text
//! `<resource-name>: <category>` in <duration> by <players>
//! <<url>>
//! **Claimed by <claimant> <t:<unix-seconds>:R>**     (only while claimed)
//! ```
//!
//! The first two lines identify the item and never change with claim state,
//! so decoding identity does not depend on the claim line. Anything that does
//! not match the grammar decodes to `None`, which is how ordinary channel
//! chatter is told apart from queue state.

use chrono::{DateTime, Utc};

use crate::model::{ClaimState, ItemId, WorkItem};

const CLAIM_PREFIX: &str = "**Claimed by ";
const CLAIM_SUFFIX: &str = ":R>**";
const TIMESTAMP_OPEN: &str = " <t:";
const HEADER_CLOSE: &str = "` in ";
const PLAYERS_SEP: &str = " by ";
const SPOILER: &str = "||";

/// Characters escaped in user-supplied names so they render literally.
const MARKDOWN_SPECIALS: &[char] = &['\\', '*', '_', '~', '`', '|', '>'];

/// What a queue message says about its item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    /// Text between the backticks: `<resource-name>: <category>`.
    pub header: String,
    pub item_id: ItemId,
    pub state: ClaimState,
}

impl Decoded {
    /// Whether this message was posted for the resource called `name`.
    pub fn belongs_to(&self, name: &str) -> bool {
        self.header
            .strip_prefix(&sanitize_code_span(name))
            .is_some_and(|rest| rest.starts_with(": "))
    }

    /// Like [`belongs_to`](Self::belongs_to) when `neighbours` name the other
    /// resources sharing the channel.
    ///
    /// A name can be a prefix of another ("Hollow Knight" and "Hollow Knight:
    /// Silksong"), so a longer matching neighbour takes the message.
    pub fn belongs_among<S: AsRef<str>>(&self, name: &str, neighbours: &[S]) -> bool {
        self.belongs_to(name)
            && !neighbours.iter().map(AsRef::as_ref).any(|other| {
                other.len() > name.len() && self.belongs_to(other)
            })
    }
}

/// Render an item in the given claim state.
///
/// `spoiler` wraps the player segment in spoiler tags.
pub fn encode(resource_name: &str, item: &WorkItem, spoiler: bool, state: &ClaimState) -> String {
    let players = item
        .players
        .iter()
        .map(|p| escape_markdown(p))
        .collect::<Vec<_>>()
        .join(", ");
    let players = if spoiler {
        format!("{SPOILER}{players}{SPOILER}")
    } else {
        players
    };

    let mut text = format!(
        "`{}: {}` in {} by {}\n<{}>",
        sanitize_code_span(resource_name),
        sanitize_code_span(&item.category),
        format_duration(item.duration_secs),
        players,
        item.url,
    );
    if let ClaimState::Claimed { by, at } = state {
        text.push('\n');
        text.push_str(&claim_line(by, *at));
    }
    text
}

/// Parse a message body. Accepts `\n` and `\r\n` line endings.
pub fn decode(text: &str) -> Option<Decoded> {
    let mut lines = text.lines();
    let header = parse_header(lines.next()?)?;
    let item_id = parse_link(lines.next()?)?;
    let state = match lines.next() {
        None => ClaimState::Unclaimed,
        Some(line) => parse_claim_line(line)?,
    };
    if lines.next().is_some() {
        return None;
    }
    Some(Decoded {
        header,
        item_id,
        state,
    })
}

/// Append a claim line to an unclaimed message. `None` if the text is not a
/// decodable unclaimed message.
pub fn with_claim(text: &str, by: &str, at: DateTime<Utc>) -> Option<String> {
    let decoded = decode(text)?;
    if decoded.state.is_claimed() {
        return None;
    }
    let identity = identity_lines(text);
    Some(format!("{identity}\n{}", claim_line(by, at)))
}

/// Strip the claim line from a claimed message. `None` if the text is not a
/// decodable claimed message.
pub fn without_claim(text: &str) -> Option<String> {
    let decoded = decode(text)?;
    if !decoded.state.is_claimed() {
        return None;
    }
    Some(identity_lines(text))
}

fn identity_lines(text: &str) -> String {
    text.lines().take(2).collect::<Vec<_>>().join("\n")
}

fn claim_line(by: &str, at: DateTime<Utc>) -> String {
    format!(
        "{CLAIM_PREFIX}{} {}**",
        escape_markdown(by),
        relative_timestamp(at)
    )
}

/// Chat markup rendering `at` as a relative time ("3 minutes ago").
pub fn relative_timestamp(at: DateTime<Utc>) -> String {
    format!("<t:{}:R>", at.timestamp())
}

fn parse_header(line: &str) -> Option<String> {
    let rest = line.strip_prefix('`')?;
    let close = rest.find(HEADER_CLOSE)?;
    let header = &rest[..close];
    if header.is_empty() || header.contains('`') || !header.contains(": ") {
        return None;
    }
    let tail = &rest[close + HEADER_CLOSE.len()..];
    let (duration, players) = tail.split_once(PLAYERS_SEP)?;
    let duration_ok = !duration.is_empty()
        && duration
            .chars()
            .all(|c| c.is_ascii_digit() || c == ':' || c == '.');
    if !duration_ok || players.trim().is_empty() {
        return None;
    }
    Some(header.to_string())
}

fn parse_link(line: &str) -> Option<ItemId> {
    let url = line.strip_prefix('<')?.strip_suffix('>')?;
    if url.is_empty() || url.chars().any(char::is_whitespace) {
        return None;
    }
    let id = url.trim_end_matches('/').rsplit('/').next()?;
    if id.is_empty() || id.contains(':') {
        return None;
    }
    Some(ItemId::new(id))
}

fn parse_claim_line(line: &str) -> Option<ClaimState> {
    let body = line.strip_prefix(CLAIM_PREFIX)?.strip_suffix(CLAIM_SUFFIX)?;
    let (name, secs) = body.rsplit_once(TIMESTAMP_OPEN)?;
    let secs: i64 = secs.parse().ok()?;
    let at = DateTime::<Utc>::from_timestamp(secs, 0)?;
    let by = unescape_markdown(name);
    if by.is_empty() {
        return None;
    }
    Some(ClaimState::Claimed { by, at })
}

/// Backslash-escape markdown control characters.
pub fn escape_markdown(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if MARKDOWN_SPECIALS.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Inverse of [`escape_markdown`].
pub fn unescape_markdown(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\'
            && let Some(&next) = chars.peek()
            && MARKDOWN_SPECIALS.contains(&next)
        {
            out.push(next);
            chars.next();
            continue;
        }
        out.push(c);
    }
    out
}

// Backticks would end the code span early.
fn sanitize_code_span(text: &str) -> String {
    text.replace('`', "'")
}

/// Format a run time in seconds as `H:MM:SS.mmm` with leading zeros and
/// colons stripped.
///
/// Milliseconds are truncated from microsecond precision and only shown when
/// the time has a fractional part: `61.2` is `1:01.200`, `60` is `1:00`.
pub fn format_duration(secs: f64) -> String {
    let micros = if secs.is_finite() && secs > 0.0 {
        (secs * 1_000_000.0).round() as u64
    } else {
        0
    };
    let whole = micros / 1_000_000;
    let frac_micros = micros % 1_000_000;
    let (h, m, s) = (whole / 3600, (whole / 60) % 60, whole % 60);

    let full = if frac_micros == 0 {
        format!("{h}:{m:02}:{s:02}")
    } else {
        format!("{h}:{m:02}:{s:02}.{:03}", frac_micros / 1000)
    };
    match full.trim_start_matches(['0', ':']) {
        "" => "0".to_string(),
        trimmed => trimmed.to_string(),
    }
}
