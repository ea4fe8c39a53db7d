use crate::context::RequestReader;
use may_minihttp::Request;
use std::collections::HashMap;
use std::io::Read;

/// Cookies from the (already lowercased) header map.
pub fn parse_cookies(headers: &HashMap<String, String>) -> HashMap<String, String> {
    headers
        .get("cookie")
        .map(|raw| {
            raw.split(';')
                .filter_map(|pair| {
                    let mut parts = pair.trim().splitn(2, '=');
                    let name = parts.next()?.trim().to_string();
                    let value = parts.next().unwrap_or("").trim().to_string();
                    Some((name, value))
                })
                .collect()
        })
        .unwrap_or_default()
}

pub fn parse_query_params(raw_path: &str) -> HashMap<String, String> {
    match raw_path.find('?') {
        Some(pos) => url::form_urlencoded::parse(raw_path[pos + 1..].as_bytes())
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        None => HashMap::new(),
    }
}

/// Extract everything the dispatch path needs from a `may_minihttp` request.
///
/// The body is read up to `body_limit` bytes and additionally decoded as
/// JSON when it parses as such; form decoding stays with the context, which
/// does it eagerly and strictly once the route is known.
pub fn parse_request(req: Request, body_limit: usize) -> RequestReader {
    let method = req.method().to_string();
    let raw_path = req.path().to_string();
    let path = raw_path.split('?').next().unwrap_or("/").to_string();

    let headers: HashMap<String, String> = req
        .headers()
        .iter()
        .map(|h| {
            (
                h.name.to_ascii_lowercase(),
                String::from_utf8_lossy(h.value).to_string(),
            )
        })
        .collect();

    let cookies = parse_cookies(&headers);
    let query = parse_query_params(&raw_path);
    let host = headers.get("host").cloned().unwrap_or_default();

    let mut raw_body = Vec::new();
    let _ = req
        .body()
        .take(body_limit as u64)
        .read_to_end(&mut raw_body);
    let body = if raw_body.is_empty() {
        None
    } else {
        serde_json::from_slice(&raw_body).ok()
    };

    RequestReader {
        method,
        uri: raw_path,
        path,
        host,
        headers,
        cookies,
        query,
        form: HashMap::new(),
        path_params: HashMap::new(),
        raw_body,
        body,
        web_values: HashMap::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cookies() {
        let mut headers = HashMap::new();
        headers.insert("cookie".to_string(), "session=abc; theme=dark".to_string());
        let cookies = parse_cookies(&headers);
        assert_eq!(cookies.get("session"), Some(&"abc".to_string()));
        assert_eq!(cookies.get("theme"), Some(&"dark".to_string()));
    }

    #[test]
    fn test_parse_query_params() {
        let query = parse_query_params("/api/items?limit=10&q=a%20b");
        assert_eq!(query.get("limit"), Some(&"10".to_string()));
        assert_eq!(query.get("q"), Some(&"a b".to_string()));
        assert!(parse_query_params("/api/items").is_empty());
    }
}
