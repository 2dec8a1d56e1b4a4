//! Attendee identifiers.
//!
//! Identifiers are a fixed prefix followed by the 1-based position, padded to
//! at least two digits: `USER_01`, `USER_02`, ... `USER_100`.

/// Build the identifier for a 1-based position
pub fn identifier(prefix: &str, position: usize) -> String {
    format!("{}{:02}", prefix, position)
}

/// All identifiers for a run of `count` users, in ascending order
pub fn identifiers(prefix: &str, count: usize) -> impl Iterator<Item = String> + '_ {
    (1..=count).map(move |position| identifier(prefix, position))
}

/// Recover the 1-based position from an identifier, if it has the right shape.
///
/// Only the canonical spelling is accepted: `USER_1` and `USER_001` do not
/// name any generated user.
pub fn position_of(prefix: &str, id: &str) -> Option<usize> {
    let digits = id.strip_prefix(prefix)?;
    let position: usize = digits.parse().ok()?;
    if identifier(prefix, position) == id {
        Some(position)
    } else {
        None
    }
}

/// Whether `id` is one of the identifiers generated for `count` users
pub fn contains(prefix: &str, count: usize, id: &str) -> bool {
    position_of(prefix, id).is_some_and(|p| (1..=count).contains(&p))
}
