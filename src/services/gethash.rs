// src/services/gethash.rs

//! Full-hash request engine.
//!
//! Upgrades prefix hits to confirmed full hashes via the `gethash`
//! endpoint. Requested prefixes are flagged as pending before the response
//! is awaited, which bounds the protocol to one request per prefix per list
//! per session. A 503 hands the request to a background retry task on the
//! shared backoff schedule.

use std::sync::Arc;

use crate::codec::parse_full_hash_response;
use crate::error::{AppError, Result};
use crate::list::SafeBrowsingList;
use crate::models::{Config, HostHash};
use crate::pipeline::backoff::Backoff;
use crate::utils::http::Transport;

/// One prefix awaiting confirmation, tied to the host bucket its candidate
/// hashed into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixRequest {
    pub host: HostHash,
    pub prefix: Vec<u8>,
}

/// Build the gethash POST body: `prefixLen:totalBytes\n` followed by the
/// concatenated prefixes. Every prefix in one request must share a length.
pub fn build_gethash_body(requests: &[PrefixRequest]) -> Result<Vec<u8>> {
    let first_len = requests
        .first()
        .map(|r| r.prefix.len())
        .ok_or_else(|| AppError::InvalidArgument("no prefixes to look up".to_string()))?;
    if requests.iter().any(|r| r.prefix.len() != first_len) {
        return Err(AppError::InvalidArgument(
            "attempted to use variable length hashes in lookup".to_string(),
        ));
    }
    let mut body = format!("{}:{}\n", first_len, first_len * requests.len()).into_bytes();
    for request in requests {
        body.extend_from_slice(&request.prefix);
    }
    Ok(body)
}

/// Request full hashes for the given prefixes and fold the confirmed
/// hashes into the list.
pub async fn request_full_hashes(
    transport: &Arc<dyn Transport>,
    config: &Config,
    list: &Arc<SafeBrowsingList>,
    requests: Vec<PrefixRequest>,
) -> Result<()> {
    if requests.is_empty() {
        return Ok(());
    }
    let body = build_gethash_body(&requests)?;
    let url = config.endpoint("gethash");

    // flag before awaiting, so concurrent lookups do not re-request
    let keys: Vec<(HostHash, Vec<u8>)> = requests
        .iter()
        .map(|r| (r.host, r.prefix.clone()))
        .collect();
    list.mark_pending(&keys).await;

    let response = transport.request(&url, &body, true).await?;
    if response.status == 503 {
        log::warn!(
            "gethash for {} returned 503, retrying in the background",
            list.name
        );
        spawn_backoff_retry(
            Arc::clone(transport),
            Arc::clone(list),
            url,
            body,
            requests,
        );
        return Err(AppError::TemporarilyUnavailable);
    }
    if !response.is_success() {
        return Err(AppError::Upstream(response.status));
    }
    apply_response(list, &requests, &response.body).await
}

/// Parse a gethash response and store the hashes addressed to this list.
async fn apply_response(
    list: &Arc<SafeBrowsingList>,
    requests: &[PrefixRequest],
    body: &[u8],
) -> Result<()> {
    let response = parse_full_hash_response(body)?;
    let mut entries: Vec<(HostHash, Vec<u8>)> = Vec::new();
    for record in response.records {
        if record.list_name != list.name {
            log::warn!(
                "gethash returned hashes for unexpected list {}",
                record.list_name
            );
            continue;
        }
        for hash in record.hashes {
            // a returned hash extends one of the requested prefixes; file it
            // under that prefix's host bucket
            match requests.iter().find(|r| hash.starts_with(&r.prefix)) {
                Some(request) => entries.push((request.host, hash)),
                None => log::warn!(
                    "gethash returned a hash matching no requested prefix: {}",
                    hex::encode(&hash)
                ),
            }
        }
    }
    list.cache_full_hashes(&entries, response.ttl_secs).await;
    Ok(())
}

/// Keep retrying a 503'd gethash request in the background. Gives up with
/// a warning once the backoff schedule is exhausted; a success benefits
/// future lookups through the full-hash cache.
fn spawn_backoff_retry(
    transport: Arc<dyn Transport>,
    list: Arc<SafeBrowsingList>,
    url: String,
    body: Vec<u8>,
    requests: Vec<PrefixRequest>,
) {
    tokio::spawn(async move {
        let mut backoff = Backoff::new();
        loop {
            if backoff.exhausted() {
                log::warn!(
                    "back-off for full hash request on {} exceeded 8 hours, giving up",
                    list.name
                );
                return;
            }
            tokio::time::sleep(backoff.next_delay()).await;

            // transport errors first, then the status code
            let response = match transport.request(&url, &body, true).await {
                Ok(response) => response,
                Err(e) => {
                    log::error!("unable to request full hashes in back-off mode: {e}");
                    continue;
                }
            };
            if response.status == 503 {
                log::warn!("full hash request still unavailable for {}", list.name);
                continue;
            }
            if !response.is_success() {
                log::warn!(
                    "full hash back-off for {} got status {}, giving up",
                    list.name,
                    response.status
                );
                return;
            }
            if let Err(e) = apply_response(&list, &requests, &response.body).await {
                log::error!("unable to process full hashes in back-off mode: {e}");
            }
            return;
        }
    });
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use tempfile::TempDir;

    use super::*;
    use crate::utils::http::TransportResponse;

    struct CannedTransport {
        status: u16,
        body: Vec<u8>,
    }

    #[async_trait]
    impl Transport for CannedTransport {
        async fn request(&self, _url: &str, _body: &[u8], _is_post: bool) -> Result<TransportResponse> {
            Ok(TransportResponse {
                status: self.status,
                body: self.body.clone(),
            })
        }
    }

    fn requests() -> Vec<PrefixRequest> {
        vec![
            PrefixRequest {
                host: *b"host",
                prefix: b"pref".to_vec(),
            },
            PrefixRequest {
                host: *b"tsoh",
                prefix: b"ferp".to_vec(),
            },
        ]
    }

    #[test]
    fn test_build_gethash_body() {
        let body = build_gethash_body(&requests()).unwrap();
        assert_eq!(body, b"4:8\nprefferp".to_vec());
    }

    #[test]
    fn test_build_rejects_mixed_lengths() {
        let mut mixed = requests();
        mixed[1].prefix = vec![0xaa; 32];
        assert!(matches!(
            build_gethash_body(&mixed),
            Err(AppError::InvalidArgument(_))
        ));
        assert!(build_gethash_body(&[]).is_err());
    }

    #[tokio::test]
    async fn test_success_caches_hashes_under_prefix_host() {
        let dir = TempDir::new().unwrap();
        let list = Arc::new(SafeBrowsingList::new("test", dir.path().join("test.dat")));

        let mut hash = b"pref".to_vec();
        hash.extend_from_slice(&[0x01; 28]);
        let mut body = b"900\ntest:9:32\n".to_vec();
        body.extend_from_slice(&hash);

        let transport: Arc<dyn Transport> = Arc::new(CannedTransport { status: 200, body });
        let config = Config::new("key", dir.path());

        request_full_hashes(&transport, &config, &list, requests())
            .await
            .unwrap();

        let state = list.state.read().await;
        let mut key = b"host".to_vec();
        key.extend_from_slice(&hash);
        assert!(state.full_hashes.contains(&key));
        assert!(state.cache.contains_key(&hash));
        // every requested prefix is now flagged
        assert!(state.pending_full_hash.contains(b"hostpref"));
        assert!(state.pending_full_hash.contains(b"tsohferp"));
    }

    #[tokio::test]
    async fn test_unavailable_marks_pending_and_errors() {
        let dir = TempDir::new().unwrap();
        let list = Arc::new(SafeBrowsingList::new("test", dir.path().join("test.dat")));
        let transport: Arc<dyn Transport> = Arc::new(CannedTransport {
            status: 503,
            body: Vec::new(),
        });
        let config = Config::new("key", dir.path());

        let err = request_full_hashes(&transport, &config, &list, requests())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::TemporarilyUnavailable));

        let state = list.state.read().await;
        assert!(state.pending_full_hash.contains(b"hostpref"));
        assert_eq!(state.full_hashes.len(), 0);
    }

    #[tokio::test]
    async fn test_other_status_is_upstream_error() {
        let dir = TempDir::new().unwrap();
        let list = Arc::new(SafeBrowsingList::new("test", dir.path().join("test.dat")));
        let transport: Arc<dyn Transport> = Arc::new(CannedTransport {
            status: 400,
            body: Vec::new(),
        });
        let config = Config::new("key", dir.path());

        let err = request_full_hashes(&transport, &config, &list, requests())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Upstream(400)));
    }

    #[tokio::test]
    async fn test_response_for_other_list_is_skipped() {
        let dir = TempDir::new().unwrap();
        let list = Arc::new(SafeBrowsingList::new("test", dir.path().join("test.dat")));

        let mut body = b"900\nother:9:32\n".to_vec();
        body.extend_from_slice(&[0x02; 32]);
        let transport: Arc<dyn Transport> = Arc::new(CannedTransport { status: 200, body });
        let config = Config::new("key", dir.path());

        request_full_hashes(&transport, &config, &list, requests())
            .await
            .unwrap();
        let state = list.state.read().await;
        assert_eq!(state.full_hashes.len(), 0);
    }
}
