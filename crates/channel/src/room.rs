//! Random room ids, used when no friendlier name is supplied.

use rand::Rng;

/// Characters that survive being read aloud or typed from a phone screen.
const ALPHABET: &[u8] = b"abcdefghjkmnpqrstuvwxyz23456789";

/// Characters per group; an id is two groups joined by `-`.
const GROUP_LEN: usize = 4;

/// Generates a random lowercase id such as `k7pm-x2qa`.
pub fn generate_room_id() -> String {
    let mut rng = rand::thread_rng();
    let mut id = String::with_capacity(GROUP_LEN * 2 + 1);
    for i in 0..GROUP_LEN * 2 {
        if i == GROUP_LEN {
            id.push('-');
        }
        let idx = rng.gen_range(0..ALPHABET.len());
        id.push(ALPHABET[idx] as char);
    }
    id
}
