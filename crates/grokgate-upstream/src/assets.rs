//! Opaque token codec for proxied asset paths.
//!
//! Generated image and video URLs are never handed to the caller raw; they
//! are rewritten to `/v1/assets/<token>` and resolved back by the asset
//! route. Absolute URLs encode as `u_`, bare paths normalize to a leading
//! slash and encode as `p_`.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use http::Uri;

pub const PROXY_PREFIX: &str = "/v1/assets";

pub fn encode(input: &str) -> String {
    if is_absolute_url(input) {
        return format!("u_{}", URL_SAFE_NO_PAD.encode(input));
    }
    let path = normalize_path(input);
    format!("p_{}", URL_SAFE_NO_PAD.encode(path))
}

/// Invert [`encode`]; `None` for tokens this codec did not produce.
pub fn decode(token: &str) -> Option<String> {
    let encoded = token
        .strip_prefix("u_")
        .or_else(|| token.strip_prefix("p_"))?;
    let bytes = URL_SAFE_NO_PAD.decode(encoded).ok()?;
    String::from_utf8(bytes).ok()
}

/// Caller-facing proxy path for an upstream asset reference.
pub fn proxy_path(input: &str) -> String {
    format!("{PROXY_PREFIX}/{}", encode(input))
}

fn is_absolute_url(input: &str) -> bool {
    input
        .parse::<Uri>()
        .map(|uri| uri.scheme().is_some() && uri.authority().is_some())
        .unwrap_or(false)
}

fn normalize_path(input: &str) -> String {
    if input.starts_with('/') {
        input.to_string()
    } else {
        format!("/{input}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_url_roundtrip() {
        let url = "https://assets.example.com/users/u1/generated/abc/image.jpg?sig=x";
        let token = encode(url);
        assert!(token.starts_with("u_"));
        assert_eq!(decode(&token).as_deref(), Some(url));
    }

    #[test]
    fn bare_path_is_normalized_then_roundtrips() {
        let token = encode("users/u1/generated/abc/image.jpg");
        assert!(token.starts_with("p_"));
        assert_eq!(
            decode(&token).as_deref(),
            Some("/users/u1/generated/abc/image.jpg")
        );

        let already_rooted = encode("/users/u1/image.jpg");
        assert_eq!(decode(&already_rooted).as_deref(), Some("/users/u1/image.jpg"));
    }

    #[test]
    fn tokens_carry_no_padding() {
        // Lengths chosen so naive base64 would pad.
        for input in ["https://a.example/x", "/ab", "/abc", "/abcd"] {
            assert!(!encode(input).contains('='));
        }
    }

    #[test]
    fn foreign_tokens_decode_to_none() {
        assert_eq!(decode("x_abc"), None);
        assert_eq!(decode("u_%%%"), None);
    }

    #[test]
    fn proxy_path_embeds_token() {
        let path = proxy_path("https://assets.example.com/a.png");
        assert!(path.starts_with("/v1/assets/u_"));
    }
}
