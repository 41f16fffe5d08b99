use rand::Rng;

pub fn random_id() -> String {
    hex::encode(rand::rng().random::<[u8; 8]>())
}

/// Id with a readable prefix, e.g. `track-1f3a...`
pub fn prefixed_id(prefix: &str) -> String {
    format!("{}-{}", prefix, random_id())
}
