use axum::http::{
    HeaderMap,
    header,
};

/// Optional scoping header set by the UI for multi-user deployments.
pub const USER_ID_HEADER: &str = "X-HEADLAMP-USER-ID";

pub fn user_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(USER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(|value| value.to_string())
}

/// Bearer token for `cluster`, read from the `auth-token-<cluster>` cookie.
///
/// An absent cookie means no override: the kubeconfig credentials are used
/// as-is.
pub fn token_from_cookie(headers: &HeaderMap, cluster: &str) -> Option<String> {
    let cookie_name = format!("auth-token-{cluster}");

    for header in headers.get_all(header::COOKIE) {
        let Ok(raw) = header.to_str() else { continue };
        for pair in raw.split(';') {
            let Some((name, value)) = pair.trim().split_once('=') else {
                continue;
            };
            if name == cookie_name && !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}
