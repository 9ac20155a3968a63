// src/services/update.rs

//! List-update protocol requests.
//!
//! Drives the `list` and `downloads` endpoints and the redirect chunk
//! streams they point at. The directive response is parsed into a plain
//! structure first; the caller decides how to apply it to its lists.

use std::collections::BTreeSet;

use crate::codec::{parse_chunk_range, ChunkReader};
use crate::error::{AppError, Result};
use crate::models::{Chunk, ChunkNum, Config};
use crate::utils::http::Transport;

/// Directives addressed to one list by a downloads response.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ListDirectives {
    pub name: String,
    pub redirects: Vec<String>,
    pub delete_add: BTreeSet<ChunkNum>,
    pub delete_sub: BTreeSet<ChunkNum>,
}

/// A parsed downloads response.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RedirectResponse {
    /// New reload cadence from an `n:` line.
    pub update_delay_secs: Option<u64>,

    /// Per-list sections in response order.
    pub lists: Vec<ListDirectives>,

    /// The server asked for a full reset; the rest of the response is void.
    pub reset: bool,
}

/// Fetch the provider's list of lists, keeping only supported names.
pub async fn request_list_names(transport: &dyn Transport, config: &Config) -> Result<Vec<String>> {
    let response = transport
        .request(&config.endpoint("list"), b"", false)
        .await?;
    if response.status != 200 {
        return Err(AppError::Upstream(response.status));
    }
    let body = String::from_utf8_lossy(&response.body);
    let names = body
        .split('\n')
        .map(str::trim)
        .filter(|name| config.supported_lists.iter().any(|s| s == name))
        .map(str::to_string)
        .collect();
    Ok(names)
}

/// Post the per-list chunk state and parse the directive response.
/// `body_fragments` are the `name;a:RANGES:s:RANGES` lines.
pub async fn request_downloads(
    transport: &dyn Transport,
    config: &Config,
    body_fragments: &[String],
) -> Result<RedirectResponse> {
    let mut body = String::new();
    for fragment in body_fragments {
        body.push_str(fragment);
        body.push('\n');
    }
    let response = transport
        .request(&config.endpoint("downloads"), body.as_bytes(), true)
        .await?;
    if response.status != 200 {
        return Err(AppError::Upstream(response.status));
    }
    let text = std::str::from_utf8(&response.body)
        .map_err(|_| AppError::malformed_redirect("response is not ASCII"))?;
    parse_redirect_response(text)
}

/// Parse the line-oriented `key:value` directive body.
pub fn parse_redirect_response(body: &str) -> Result<RedirectResponse> {
    let mut response = RedirectResponse::default();
    for line in body.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (key, value) = line
            .split_once(':')
            .ok_or_else(|| AppError::malformed_redirect(format!("bad directive: {line}")))?;
        match key {
            "n" => {
                let delay = value.parse().map_err(|_| {
                    AppError::malformed_redirect(format!("unable to parse timeout: {value}"))
                })?;
                response.update_delay_secs = Some(delay);
            }
            "i" => {
                response.lists.push(ListDirectives {
                    name: value.to_string(),
                    ..ListDirectives::default()
                });
            }
            "u" => {
                let list = current_list(&mut response, line)?;
                list.redirects.push(format!("https://{value}"));
            }
            "ad" => {
                let list = current_list(&mut response, line)?;
                list.delete_add = parse_chunk_range(value)?;
            }
            "sd" => {
                let list = current_list(&mut response, line)?;
                list.delete_sub = parse_chunk_range(value)?;
            }
            "r" => {
                // wipe everything and ask again; nothing that follows counts
                response.reset = true;
                return Ok(response);
            }
            "e" => {
                return Err(AppError::Server(value.to_string()));
            }
            _ => {
                log::debug!("ignoring unknown directive: {line}");
            }
        }
    }
    Ok(response)
}

fn current_list<'a>(
    response: &'a mut RedirectResponse,
    line: &str,
) -> Result<&'a mut ListDirectives> {
    response
        .lists
        .last_mut()
        .ok_or_else(|| AppError::malformed_redirect(format!("directive before any list: {line}")))
}

/// Fetch one redirect URL and decode its chunk stream.
pub async fn fetch_redirect_chunks(transport: &dyn Transport, url: &str) -> Result<Vec<Chunk>> {
    log::debug!("fetching chunk stream from {url}");
    let response = transport.request(url, b"", false).await?;
    if response.status != 200 {
        return Err(AppError::Upstream(response.status));
    }
    ChunkReader::new(&response.body).read_all()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nums(values: &[ChunkNum]) -> BTreeSet<ChunkNum> {
        values.iter().copied().collect()
    }

    #[test]
    fn test_parse_redirect_response() {
        let body = "n:1200\n\
                    i:phish\n\
                    u:cache.example/first\n\
                    u:cache.example/first_1\n\
                    sd:1,2\n\
                    i:malware\n\
                    u:cache.example/second\n\
                    ad:1-2,4-5,7\n\
                    sd:2-6\n";
        let response = parse_redirect_response(body).unwrap();

        assert_eq!(response.update_delay_secs, Some(1200));
        assert!(!response.reset);
        assert_eq!(response.lists.len(), 2);

        let phish = &response.lists[0];
        assert_eq!(phish.name, "phish");
        assert_eq!(
            phish.redirects,
            vec![
                "https://cache.example/first".to_string(),
                "https://cache.example/first_1".to_string()
            ]
        );
        assert!(phish.delete_add.is_empty());
        assert_eq!(phish.delete_sub, nums(&[1, 2]));

        let malware = &response.lists[1];
        assert_eq!(malware.name, "malware");
        assert_eq!(malware.redirects, vec!["https://cache.example/second"]);
        assert_eq!(malware.delete_add, nums(&[1, 2, 4, 5, 7]));
        assert_eq!(malware.delete_sub, nums(&[2, 3, 4, 5, 6]));
    }

    #[test]
    fn test_parse_reset_directive() {
        let body = "i:phish\nu:cache.example/first\nr:pleasereset\nu:cache.example/ignored\n";
        let response = parse_redirect_response(body).unwrap();
        assert!(response.reset);
        // parsing stops at the reset directive
        assert_eq!(response.lists[0].redirects.len(), 1);
    }

    #[test]
    fn test_parse_server_error_directive() {
        let err = parse_redirect_response("e:your key is invalid\n").unwrap_err();
        assert!(matches!(err, AppError::Server(message) if message == "your key is invalid"));
    }

    #[test]
    fn test_parse_rejects_orphan_directives() {
        assert!(parse_redirect_response("u:cache.example/first\n").is_err());
        assert!(parse_redirect_response("ad:1-2\n").is_err());
        assert!(parse_redirect_response("garbage\n").is_err());
    }

    #[test]
    fn test_parse_ignores_unknown_keys() {
        let response = parse_redirect_response("x:whatever\nn:300\n").unwrap();
        assert_eq!(response.update_delay_secs, Some(300));
    }
}
