//! Message grammar: encoding, decoding and claim rewrites.

use chrono::{DateTime, Utc};
use rstest::rstest;
use verifyq::codec::{self, decode, encode, format_duration, with_claim, without_claim};
use verifyq::model::{ClaimState, ItemId, WorkItem};

fn item(id: &str, category: &str, secs: f64, players: &[&str]) -> WorkItem {
    WorkItem {
        id: ItemId::new(id),
        category: category.to_string(),
        duration_secs: secs,
        players: players.iter().map(|p| p.to_string()).collect(),
        url: format!("https://www.speedrun.com/game/run/{id}"),
    }
}

fn at() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap()
}

#[test]
fn encodes_pending_run_exactly() {
    let text = encode(
        "Game",
        &item("r1", "Any% - X", 61.2, &["Foo"]),
        false,
        &ClaimState::Unclaimed,
    );
    assert_eq!(
        text,
        "`Game: Any% - X` in 1:01.200 by Foo\n<https://www.speedrun.com/game/run/r1>"
    );
}

#[test]
fn claimed_run_has_third_line() {
    let text = encode(
        "Game",
        &item("r1", "Any%", 60.0, &["Foo"]),
        false,
        &ClaimState::claimed_by("alice", at()),
    );
    assert_eq!(
        text.lines().last(),
        Some("**Claimed by alice <t:1700000000:R>**")
    );
}

#[rstest]
#[case::plain("Any%", &["Foo"], false, ClaimState::Unclaimed)]
#[case::several_players("100%", &["Foo", "Bar_Baz"], false, ClaimState::Unclaimed)]
#[case::spoilered("Any%", &["Foo"], true, ClaimState::Unclaimed)]
#[case::claimed("Low%", &["Foo"], false, ClaimState::claimed_by("alice", at()))]
#[case::claimed_markdown_name("Low%", &["*Foo*"], true, ClaimState::claimed_by("__a|b*c~>", at()))]
#[case::backtick_category("Glitch`less", &["Foo"], false, ClaimState::Unclaimed)]
fn decode_recovers_identity_and_state(
    #[case] category: &str,
    #[case] players: &[&str],
    #[case] spoiler: bool,
    #[case] state: ClaimState,
) {
    let w = item("y8d9x8em", category, 3725.5, players);
    let decoded = decode(&encode("Hollow Knight", &w, spoiler, &state)).expect("should decode");
    assert_eq!(decoded.item_id, w.id);
    assert_eq!(decoded.state, state);
    assert!(decoded.belongs_to("Hollow Knight"));
}

#[rstest]
#[case::chatter("hello there")]
#[case::empty("")]
#[case::no_link("`Game: Any%` in 1:00 by Foo")]
#[case::no_backticks("Game: Any% in 1:00 by Foo\n<https://x/run/r1>")]
#[case::bare_link("`Game: Any%` in 1:00 by Foo\nhttps://x/run/r1")]
#[case::bad_duration("`Game: Any%` in soon by Foo\n<https://x/run/r1>")]
#[case::no_players("`Game: Any%` in 1:00 by \n<https://x/run/r1>")]
#[case::trailing_text("`Game: Any%` in 1:00 by Foo\n<https://x/run/r1>\nnice run")]
#[case::bad_claim_time("`Game: Any%` in 1:00 by Foo\n<https://x/run/r1>\n**Claimed by a <t:soon:R>**")]
#[case::extra_after_claim(
    "`Game: Any%` in 1:00 by Foo\n<https://x/run/r1>\n**Claimed by a <t:1:R>**\nmore"
)]
fn rejects_text_outside_the_grammar(#[case] text: &str) {
    assert!(decode(text).is_none(), "decoded {text:?}");
}

#[test]
fn accepts_crlf_line_endings() {
    let decoded = decode(
        "`Game: Any%` in 1:00 by Foo\r\n<https://x/run/r1>\r\n**Claimed by bob <t:5:R>**",
    )
    .unwrap();
    assert_eq!(decoded.item_id.as_str(), "r1");
    assert_eq!(decoded.state.claimant(), Some("bob"));
}

#[test]
fn resource_prefix_separates_colocated_games() {
    let text = encode("Game 2", &item("r1", "Any%", 1.0, &["Foo"]), false, &ClaimState::Unclaimed);
    let decoded = decode(&text).unwrap();
    assert!(decoded.belongs_to("Game 2"));
    assert!(!decoded.belongs_to("Game"));
}

#[test]
fn claim_then_unclaim_restores_original_text() {
    let original = encode("Game", &item("r1", "Any%", 61.2, &["Foo"]), true, &ClaimState::Unclaimed);
    let claimed = with_claim(&original, "a_b", at()).unwrap();
    assert_eq!(decode(&claimed).unwrap().state.claimant(), Some("a_b"));
    assert!(with_claim(&claimed, "other", at()).is_none());

    let released = without_claim(&claimed).unwrap();
    assert_eq!(released, original);
    assert!(without_claim(&released).is_none());
}

#[test]
fn markdown_escape_roundtrips() {
    let name = r"\_*~`|>";
    let escaped = codec::escape_markdown(name);
    assert_eq!(codec::unescape_markdown(&escaped), name);
}

#[rstest]
#[case(61.2, "1:01.200")]
#[case(60.0, "1:00")]
#[case(3600.0, "1:00:00")]
#[case(5.5, "5.500")]
#[case(600.0, "10:00")]
#[case(3725.999_9, "1:02:05.999")]
#[case(0.0, "0")]
fn formats_durations(#[case] secs: f64, #[case] expected: &str) {
    assert_eq!(format_duration(secs), expected);
}
