//! Channel resolution precedence: explicit, deepest group prefix, default.

use std::collections::{BTreeMap, BTreeSet};

use cpthook::routing::ChannelMapping;

fn set(channels: &[&str]) -> BTreeSet<String> {
    channels.iter().map(|c| (*c).to_owned()).collect()
}

#[test]
fn explicit_wins_over_matching_group() {
    let mapping = ChannelMapping::with_default("#general")
        .explicit("teams/infra/tool", ["#tool", "#ops"])
        .group("teams/infra", ["#infra"]);

    assert_eq!(mapping.resolve("teams/infra/tool"), set(&["#ops", "#tool"]));
}

#[test]
fn deepest_segment_count_wins() {
    let mapping = ChannelMapping::with_default("#general")
        .group("foo", ["#a"])
        .group("foo/bar", ["#b"]);

    assert_eq!(mapping.resolve("foo/bar/baz"), set(&["#b"]));
    assert_eq!(mapping.resolve("foo/qux"), set(&["#a"]));
}

#[test]
fn unmatched_key_falls_back_to_default() {
    let mapping = ChannelMapping::with_default("#general")
        .explicit("other/project", ["#other"])
        .group("teams", ["#teams"]);

    assert_eq!(mapping.resolve("solo/project"), set(&["#general"]));
    assert_eq!(mapping.resolve(""), set(&["#general"]));
}

#[test]
fn empty_entries_fall_through() {
    let empty: [&str; 0] = [];
    let mapping = ChannelMapping::with_default("#general")
        .explicit("teams/infra/tool", empty)
        .group("teams/infra", ["#infra"])
        .group("teams/infra/tool", empty);

    assert_eq!(mapping.resolve("teams/infra/tool"), set(&["#infra"]));

    let bare = ChannelMapping::with_default("#general").group("teams", empty);
    assert_eq!(bare.resolve("teams/x"), set(&["#general"]));
}

#[test]
fn end_to_end_group_routing_example() {
    let mut groups = BTreeMap::new();
    groups.insert("teams/infra".to_owned(), vec!["#infra".to_owned()]);
    let mapping = ChannelMapping::new("#general", BTreeMap::new(), groups);

    assert_eq!(mapping.resolve("teams/infra/tool"), set(&["#infra"]));
}

#[test]
fn resolution_is_deterministic_across_calls() {
    let mapping = ChannelMapping::with_default("#general")
        .group("ab", ["#ab"])
        .group("a", ["#a"])
        .group("abc", ["#abc"]);

    let first = mapping.resolve("abcd");
    for _ in 0..20 {
        assert_eq!(mapping.resolve("abcd"), first);
    }
    // All candidates have one segment; the smallest key is kept.
    assert_eq!(first, set(&["#a"]));
}

#[test]
fn host_groups_are_unioned() {
    let mapping = ChannelMapping::with_default("#monitoring")
        .explicit("db1", ["#dba"])
        .group("web", ["#web"])
        .group("linux", ["#linux", "#web"]);

    assert_eq!(
        mapping.resolve_with_groups("www1", &["web", "linux", "unmapped"]),
        set(&["#linux", "#web"])
    );
    assert_eq!(mapping.resolve_with_groups("db1", &["web"]), set(&["#dba"]));
    let none: [&str; 0] = [];
    assert_eq!(mapping.resolve_with_groups("x", &none), set(&["#monitoring"]));
}

#[test]
fn channel_list_covers_every_destination() {
    let mapping = ChannelMapping::with_default("#general")
        .explicit("p", ["#p"])
        .group("g", ["#g", "#p"]);

    assert_eq!(mapping.channel_list(), set(&["#g", "#general", "#p"]));
}
