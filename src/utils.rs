use crate::config::ServerConfig;
use rand::distr::Alphanumeric;
use rand::Rng;

/// 128 random bits, hex encoded.
pub fn random_token() -> String {
    hex::encode(rand::rng().random::<[u8; 16]>())
}

/// Document id in the style of the signaling store's auto ids.
pub fn random_doc_id() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(20)
        .map(char::from)
        .collect()
}

// Adds the protocol scheme to an ICE server url when the user left it out.
pub fn add_ice_url_scheme(config: &ServerConfig) -> String {
    if config.url.starts_with("turn:")
        || config.url.starts_with("turns:")
        || config.url.starts_with("stun:")
        || config.url.starts_with("stuns:")
    {
        config.url.clone()
    } else {
        let scheme = if config.r#type == "turn" {
            "turn:"
        } else {
            "stun:"
        };
        format!("{}{}", scheme, config.url)
    }
}
