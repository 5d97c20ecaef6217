//! Deterministic anonymous display names.
//!
//! The same visitor id always maps to the same "Adjective Animal" pair,
//! and nothing maps back. FNV-1a keeps the hash dependency-free and
//! stable across releases.

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

const ADJECTIVES: &[&str] = &[
    "Amber", "Bold", "Brisk", "Calm", "Clever", "Copper", "Crimson", "Curious", "Gentle",
    "Golden", "Hidden", "Ivory", "Jade", "Keen", "Lively", "Lunar", "Mellow", "Nimble",
    "Quiet", "Rapid", "Scarlet", "Silent", "Silver", "Swift", "Velvet", "Violet", "Wandering",
    "Witty",
];

const ANIMALS: &[&str] = &[
    "Badger", "Bison", "Crane", "Dolphin", "Falcon", "Fox", "Gazelle", "Heron", "Ibex",
    "Jaguar", "Kestrel", "Lynx", "Marten", "Meerkat", "Otter", "Owl", "Panther", "Puffin",
    "Raven", "Salmon", "Sparrow", "Stork", "Swallow", "Tiger", "Vole", "Walrus", "Wolf",
    "Wren",
];

fn fnv1a(input: &str) -> u64 {
    let mut hash = FNV_OFFSET;
    for byte in input.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Map an opaque seed (the visitor id) to a readable pseudonym.
pub fn anonymous_name(seed: &str) -> String {
    let hash = fnv1a(seed);
    let adjective = ADJECTIVES[(hash >> 32) as usize % ADJECTIVES.len()];
    let animal = ANIMALS[(hash & 0xffff_ffff) as usize % ANIMALS.len()];
    format!("{adjective} {animal}")
}
