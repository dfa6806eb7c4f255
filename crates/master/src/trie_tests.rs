// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn named(name: &str) -> Token {
    Token::new(name)
}

#[test]
fn put_get_delete() {
    let mut trie = TokenTrie::new();
    assert!(trie.is_empty());
    trie.put(named("/a/b"));
    assert!(trie.contains("/a/b"));
    assert_eq!(trie.get("/a/b").map(|t| t.name.as_str()), Some("/a/b"));
    assert_eq!(trie.delete("/a/b").map(|t| t.name), Some("/a/b".to_string()));
    assert!(trie.get("/a/b").is_none());
}

#[test]
fn put_replaces_existing_name() {
    let mut trie = TokenTrie::new();
    trie.put(named("/a"));
    let mut newer = named("/a");
    newer.version = 5;
    trie.put(newer);
    assert_eq!(trie.len(), 1);
    assert_eq!(trie.get("/a").map(|t| t.version), Some(5));
}

#[test]
fn prefix_scan_returns_only_matches_in_order() {
    let mut trie = TokenTrie::new();
    for name in [
        "/workflow/wf/1/job/runnable/a",
        "/workflow/wf/1/job/waiting/b",
        "/workflow/wf/2/job/waiting/c",
        "/workflow/other/1/job/waiting/d",
        "/schedule/workflow/wf",
    ] {
        trie.put(named(name));
    }

    let names = trie.names_under("/workflow/wf/1/");
    assert_eq!(
        names,
        vec![
            "/workflow/wf/1/job/runnable/a".to_string(),
            "/workflow/wf/1/job/waiting/b".to_string(),
        ]
    );
    assert_eq!(trie.values_under("/workflow/wf/").len(), 3);
    assert_eq!(trie.values_under("/workflow/").len(), 4);
    assert!(trie.values_under("/missing/").is_empty());
}

#[test]
fn prefix_is_a_string_match_not_a_path_match() {
    let mut trie = TokenTrie::new();
    trie.put(named("/workflow/wf_long/1/job/waiting/a"));
    trie.put(named("/workflow/wf/1/job/waiting/a"));
    // "/workflow/wf" without the trailing slash matches both.
    assert_eq!(trie.names_under("/workflow/wf").len(), 2);
    assert_eq!(trie.names_under("/workflow/wf/").len(), 1);
}
