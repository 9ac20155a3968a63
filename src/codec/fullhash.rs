// src/codec/fullhash.rs

//! gethash response envelope codec.
//!
//! The response opens with a cache lifetime line, `ttlSeconds\n`, followed
//! by zero or more full-hash records. Each record is a header line
//! `listName:chunkNum:hashLen[:m]\n` (hashLen counts payload bytes) and then
//! `hashLen` bytes of concatenated 32-byte hashes. With the `m` marker, one
//! length-prefixed metadata blob per hash follows the payload; the blobs are
//! parsed and discarded.

use crate::error::{AppError, Result};
use crate::models::ChunkNum;

/// Byte length of a full hash.
pub const FULL_HASH_LEN: usize = 32;

/// One record of a gethash response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FullHashRecord {
    /// List the hashes belong to.
    pub list_name: String,

    /// ADD chunk number the hashes originate from.
    pub chunk_num: ChunkNum,

    /// Confirmed 32-byte hashes.
    pub hashes: Vec<Vec<u8>>,
}

/// A parsed gethash response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FullHashResponse {
    /// Seconds the returned hashes may be cached and trusted.
    pub ttl_secs: u64,

    pub records: Vec<FullHashRecord>,
}

/// Parse a complete gethash response body.
///
/// An empty body (provider knows none of the prefixes) yields a response
/// with no records and a zero TTL.
pub fn parse_full_hash_response(body: &[u8]) -> Result<FullHashResponse> {
    if body.is_empty() {
        return Ok(FullHashResponse {
            ttl_secs: 0,
            records: Vec::new(),
        });
    }

    let mut pos = 0;
    let ttl_line = read_line(body, &mut pos)?;
    let ttl_secs: u64 = ttl_line
        .trim()
        .parse()
        .map_err(|_| AppError::malformed_full_hash(format!("bad cache lifetime: {ttl_line}")))?;

    let mut records = Vec::new();
    while pos < body.len() {
        records.push(read_record(body, &mut pos)?);
    }
    Ok(FullHashResponse { ttl_secs, records })
}

fn read_record(body: &[u8], pos: &mut usize) -> Result<FullHashRecord> {
    let header = read_line(body, pos)?;
    let parts: Vec<&str> = header.split(':').collect();
    if parts.len() != 3 && parts.len() != 4 {
        return Err(AppError::malformed_full_hash(format!(
            "unexpected record header: {header}"
        )));
    }
    if parts.len() == 4 && parts[3] != "m" {
        return Err(AppError::malformed_full_hash(format!(
            "unexpected record header: {header}"
        )));
    }
    let list_name = parts[0].to_string();
    if list_name.is_empty() {
        return Err(AppError::malformed_full_hash("empty list name"));
    }
    let chunk_num: ChunkNum = parts[1]
        .parse()
        .map_err(|_| AppError::malformed_full_hash(format!("bad chunk num: {header}")))?;
    let payload_len: usize = parts[2]
        .parse()
        .map_err(|_| AppError::malformed_full_hash(format!("bad payload length: {header}")))?;
    if payload_len == 0 || payload_len % FULL_HASH_LEN != 0 {
        return Err(AppError::malformed_full_hash(format!(
            "payload is not a whole number of hashes: {header}"
        )));
    }

    let payload = take(body, pos, payload_len)?;
    let hashes: Vec<Vec<u8>> = payload.chunks(FULL_HASH_LEN).map(|h| h.to_vec()).collect();

    if parts.len() == 4 {
        for _ in 0..hashes.len() {
            skip_metadata(body, pos)?;
        }
    }

    Ok(FullHashRecord {
        list_name,
        chunk_num,
        hashes,
    })
}

fn skip_metadata(body: &[u8], pos: &mut usize) -> Result<()> {
    let len_line = read_line(body, pos)?;
    let len: usize = len_line
        .trim()
        .parse()
        .map_err(|_| AppError::malformed_full_hash("unable to parse metadata length"))?;
    take(body, pos, len)?;
    Ok(())
}

fn read_line(body: &[u8], pos: &mut usize) -> Result<String> {
    let rest = &body[*pos..];
    let end = rest
        .iter()
        .position(|&b| b == b'\n')
        .ok_or_else(|| AppError::malformed_full_hash("unable to find end of header"))?;
    let line = std::str::from_utf8(&rest[..end])
        .map_err(|_| AppError::malformed_full_hash("header is not ASCII"))?
        .to_string();
    *pos += end + 1;
    Ok(line)
}

fn take<'a>(body: &'a [u8], pos: &mut usize, len: usize) -> Result<&'a [u8]> {
    if body.len() - *pos < len {
        return Err(AppError::malformed_full_hash("truncated payload"));
    }
    let out = &body[*pos..*pos + len];
    *pos += len;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_record() {
        let mut body = b"900\ngoogpub-phish-shavar:9:32\n".to_vec();
        body.extend_from_slice(&[0x02; 32]);

        let response = parse_full_hash_response(&body).unwrap();
        assert_eq!(response.ttl_secs, 900);
        assert_eq!(response.records.len(), 1);
        assert_eq!(response.records[0].list_name, "googpub-phish-shavar");
        assert_eq!(response.records[0].chunk_num, 9);
        assert_eq!(response.records[0].hashes, vec![vec![0x02; 32]]);
    }

    #[test]
    fn test_parse_multiple_records() {
        let mut body = b"1200\ngoogpub-phish-shavar:9:64\n".to_vec();
        body.extend_from_slice(&[0x02; 32]);
        body.extend_from_slice(&[0x03; 32]);
        body.extend_from_slice(b"goog-malware-shavar:4:32\n");
        body.extend_from_slice(&[0x04; 32]);

        let response = parse_full_hash_response(&body).unwrap();
        assert_eq!(response.records.len(), 2);
        assert_eq!(response.records[0].hashes.len(), 2);
        assert_eq!(response.records[1].list_name, "goog-malware-shavar");
    }

    #[test]
    fn test_parse_metadata_records() {
        let mut body = b"600\ngoogpub-phish-shavar:9:64:m\n".to_vec();
        body.extend_from_slice(&[0x02; 32]);
        body.extend_from_slice(&[0x03; 32]);
        body.extend_from_slice(b"5\nhello");
        body.extend_from_slice(b"0\n");

        let response = parse_full_hash_response(&body).unwrap();
        assert_eq!(response.records[0].hashes.len(), 2);
    }

    #[test]
    fn test_parse_empty_body() {
        let response = parse_full_hash_response(b"").unwrap();
        assert!(response.records.is_empty());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_full_hash_response(b"abc\n").is_err());

        // payload length not a multiple of 32
        let body = b"600\nphish:9:31\n".to_vec();
        assert!(parse_full_hash_response(&body).is_err());

        // truncated payload
        let mut body = b"600\nphish:9:32\n".to_vec();
        body.extend_from_slice(&[0x02; 16]);
        assert!(parse_full_hash_response(&body).is_err());

        // bad metadata marker
        let mut body = b"600\nphish:9:32:x\n".to_vec();
        body.extend_from_slice(&[0x02; 32]);
        assert!(parse_full_hash_response(&body).is_err());
    }
}
