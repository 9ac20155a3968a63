// src/pipeline/lookup.rs

//! URL query pipeline.
//!
//! Canonicalizes a URL, expands its lookup candidates, probes each
//! configured list's full-hash and prefix surfaces and, when asked for a
//! confirmed answer, upgrades prefix hits through the gethash engine. The
//! list's read lock is held only while scanning; it is released across the
//! gethash round trip and the index is re-read afterwards.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};

use crate::error::{AppError, Result};
use crate::list::{lookup_key, SafeBrowsingList};
use crate::models::{Config, HostHash};
use crate::services::gethash::{self, PrefixRequest};
use crate::utils::http::Transport;
use crate::utils::url::{canonicalize, generate_candidates, host_key};

/// A confirmed answer is refused when the lists are older than this.
const STALE_AFTER_MINS: i64 = 45;

/// Prefix length probed on lookups.
const LOOKUP_PREFIX_LEN: usize = 4;

/// True when the last successful update is recent enough to trust
/// full-hash confirmations.
pub fn is_up_to_date(last_updated: Option<DateTime<Utc>>) -> bool {
    match last_updated {
        Some(at) => Utc::now() - at < Duration::minutes(STALE_AFTER_MINS),
        None => false,
    }
}

/// SHA-256 of a candidate string.
pub(crate) fn sha256_bytes(input: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hasher.finalize().to_vec()
}

struct CandidateHashes {
    host_hash: HostHash,
    url_hash: Vec<u8>,
}

fn hash_candidates(canonical: &str) -> Vec<CandidateHashes> {
    generate_candidates(canonical)
        .iter()
        .map(|candidate| {
            let host_digest = sha256_bytes(&host_key(candidate));
            let host_hash: HostHash = host_digest[..4]
                .try_into()
                .expect("digest is longer than a host hash");
            CandidateHashes {
                host_hash,
                url_hash: sha256_bytes(candidate),
            }
        })
        .collect()
}

/// Look a URL up against every list, in configured order.
///
/// Returns the matched list name, if any, and whether the match was
/// confirmed against a full hash. With `match_full_hash` unset (or in
/// offline mode) a prefix hit is reported without confirmation.
pub async fn query_url(
    transport: &Arc<dyn Transport>,
    config: &Config,
    lists: &[Arc<SafeBrowsingList>],
    last_updated: Option<DateTime<Utc>>,
    url: &str,
    match_full_hash: bool,
) -> Result<(Option<String>, bool)> {
    if match_full_hash && !config.offline && !is_up_to_date(last_updated) {
        return Err(AppError::StaleLists);
    }

    let canonical = canonicalize(url);
    let candidates = hash_candidates(&canonical);
    if candidates.is_empty() {
        return Ok((None, false));
    }
    log::debug!("checking {} candidates of {canonical}", candidates.len());

    for list in lists {
        let mut to_resolve: Vec<PrefixRequest> = Vec::new();
        let mut expired: Vec<(HostHash, Vec<u8>)> = Vec::new();
        let mut verdict: Option<bool> = None;
        {
            let state = list.state.read().await;
            let now = Utc::now();
            for candidate in &candidates {
                // an expired cache entry invalidates the confirmed hash and
                // frees its prefix for a fresh gethash
                let is_expired = state
                    .cache
                    .get(candidate.url_hash.as_slice())
                    .is_some_and(|entry| !entry.is_valid(now));
                if is_expired {
                    expired.push((candidate.host_hash, candidate.url_hash.clone()));
                }

                let full_key = lookup_key(&candidate.host_hash, &candidate.url_hash);
                if !is_expired && state.full_hashes.contains(&full_key) {
                    log::debug!("full length hash hit on {}", list.name);
                    verdict = Some(true);
                    break;
                }

                let prefix = &candidate.url_hash[..LOOKUP_PREFIX_LEN];
                let prefix_key = lookup_key(&candidate.host_hash, prefix);
                if state.prefixes.contains(&prefix_key) {
                    if !match_full_hash || config.offline {
                        log::debug!("partial hash hit on {}", list.name);
                        verdict = Some(false);
                        break;
                    }
                    if !is_expired && state.pending_full_hash.contains(&prefix_key) {
                        // already asked this session and got no hit
                        continue;
                    }
                    let request = PrefixRequest {
                        host: candidate.host_hash,
                        prefix: prefix.to_vec(),
                    };
                    if !to_resolve.contains(&request) {
                        to_resolve.push(request);
                    }
                }
            }
        }
        list.evict(&expired).await;
        if let Some(full_match) = verdict {
            return Ok((Some(list.name.clone()), full_match));
        }

        if !to_resolve.is_empty() {
            gethash::request_full_hashes(transport, config, list, to_resolve).await?;

            // the write happened outside our lock; re-read for hits
            let state = list.state.read().await;
            for candidate in &candidates {
                let full_key = lookup_key(&candidate.host_hash, &candidate.url_hash);
                if state.full_hashes.contains(&full_key) {
                    return Ok((Some(list.name.clone()), true));
                }
            }
        }
    }
    Ok((None, false))
}
