//! Player identifiers.
//!
//! Ids are random UUID-v4 strings in the canonical lowercase `8-4-4-4-12`
//! form, which makes them exactly 36 characters. The wire protocol relies on
//! that length to tell player-scoped targets apart from keywords.

use rand::Rng;

/// Length of every player id.
pub const PLAYER_ID_LEN: usize = 36;

const HYPHEN_POSITIONS: [usize; 4] = [8, 13, 18, 23];

/// Generates a random 36-character player id.
pub fn generate_player_id() -> String {
    let mut bits: u128 = rand::thread_rng().gen();
    // Version 4 in the high nibble of the third group, RFC 4122 variant in the fourth
    bits = (bits & !(0xF_u128 << 76)) | (0x4_u128 << 76);
    bits = (bits & !(0x3_u128 << 62)) | (0x2_u128 << 62);

    let hex = format!("{:032x}", bits);
    format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}

/// Generates a player id for which `taken` returns false.
pub fn generate_unique_player_id(taken: impl Fn(&str) -> bool) -> String {
    let mut id = generate_player_id();
    while taken(&id) {
        id = generate_player_id();
    }
    id
}

/// Returns true if `value` has the shape of a player id.
pub fn is_player_id(value: &str) -> bool {
    if value.len() != PLAYER_ID_LEN {
        return false;
    }
    value.char_indices().all(|(i, c)| {
        if HYPHEN_POSITIONS.contains(&i) {
            c == '-'
        } else {
            c.is_ascii_digit() || ('a'..='f').contains(&c)
        }
    })
}

/// Returns true if the first 36 characters of `value` form a player id.
pub fn starts_with_player_id(value: &str) -> bool {
    value.get(..PLAYER_ID_LEN).is_some_and(is_player_id)
}
