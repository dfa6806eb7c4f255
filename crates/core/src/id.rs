// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Unique name generation for processes and event tokens.

/// Alphabet restricted to characters valid in token name components.
const ALPHABET: [char; 36] = [
    '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', 'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i',
    'j', 'k', 'l', 'm', 'n', 'o', 'p', 'q', 'r', 's', 't', 'u', 'v', 'w', 'x', 'y', 'z',
];

/// Generate a unique name with the given prefix, e.g. `worker_h1k9x2m4p7q3`.
///
/// The result is a valid token name component (alphanumerics and
/// underscores only).
pub fn unique_name(prefix: &str) -> String {
    format!("{}_{}", prefix, nanoid::nanoid!(12, &ALPHABET))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::name::is_valid_component;

    #[test]
    fn unique_names_are_valid_components() {
        let name = unique_name("worker");
        assert!(name.starts_with("worker_"));
        assert!(is_valid_component(&name));
    }

    #[test]
    fn unique_names_do_not_collide() {
        let a = unique_name("event");
        let b = unique_name("event");
        assert_ne!(a, b);
    }
}
