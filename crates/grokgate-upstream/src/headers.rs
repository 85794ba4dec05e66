//! Browser-shaped header construction for the upstream web API.
//!
//! The upstream only answers requests that look like its own web client, so
//! every call carries the full Chrome header block plus a synthesized
//! statsig id and a fresh request id.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use rand::Rng;
use uuid::Uuid;

pub const CHAT_ENDPOINT: &str = "/rest/app-chat/conversations/new";
pub const RATE_LIMITS_ENDPOINT: &str = "/rest/rate-limits";

const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/136.0.0.0 Safari/537.36";
const SEC_CH_UA: &str = "\"Google Chrome\";v=\"136\", \"Chromium\";v=\"136\", \"Not(A:Brand\";v=\"24\"";

pub(crate) fn browser_headers(
    origin: &str,
    token: &str,
    cf_clearance: Option<&str>,
) -> Vec<(&'static str, String)> {
    vec![
        ("accept", "*/*".to_string()),
        ("accept-language", "en-US,en;q=0.9".to_string()),
        ("cache-control", "no-cache".to_string()),
        ("content-type", "application/json".to_string()),
        ("origin", origin.to_string()),
        ("pragma", "no-cache".to_string()),
        ("priority", "u=1, i".to_string()),
        ("referer", format!("{origin}/")),
        ("sec-ch-ua", SEC_CH_UA.to_string()),
        ("sec-ch-ua-arch", "arm".to_string()),
        ("sec-ch-ua-bitness", "64".to_string()),
        ("sec-ch-ua-mobile", "?0".to_string()),
        ("sec-ch-ua-platform", "\"macOS\"".to_string()),
        ("sec-fetch-dest", "empty".to_string()),
        ("sec-fetch-mode", "cors".to_string()),
        ("sec-fetch-site", "same-origin".to_string()),
        ("user-agent", USER_AGENT.to_string()),
        ("x-statsig-id", statsig_id()),
        ("x-xai-request-id", Uuid::new_v4().to_string()),
        ("cookie", cookie(token, cf_clearance)),
    ]
}

/// The web client sends a base64 id derived from an internal JS error
/// string; a randomized faux error passes the same shape check.
pub(crate) fn statsig_id() -> String {
    let mut rng = rand::rng();
    let message = if rng.random_bool(0.5) {
        let key = rand_string(&mut rng, 5, true);
        format!("e:TypeError: Cannot read properties of null (reading 'children['{key}']')")
    } else {
        let key = rand_string(&mut rng, 10, false);
        format!("e:TypeError: Cannot read properties of undefined (reading '{key}')")
    };
    STANDARD.encode(message)
}

fn rand_string(rng: &mut impl Rng, len: usize, alphanumeric: bool) -> String {
    const LOWER: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
    const LOWER_DIGITS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let chars = if alphanumeric { LOWER_DIGITS } else { LOWER };
    (0..len)
        .map(|_| chars[rng.random_range(0..chars.len())] as char)
        .collect()
}

fn cookie(token: &str, cf_clearance: Option<&str>) -> String {
    let token = token.strip_prefix("sso=").unwrap_or(token);
    match cf_clearance.filter(|cf| !cf.is_empty()) {
        Some(cf) => format!("sso={token};cf_clearance={cf}"),
        None => format!("sso={token}"),
    }
}
