// src/utils/url.rs

//! URL canonicalization and lookup-candidate generation.
//!
//! Implements the Safe Browsing canonicalization rules: strip whitespace
//! and fragments, percent-decode to a fixed point, normalize host and path,
//! then re-encode. Candidates are the host-suffix x path-prefix
//! combinations a listed URL may have been keyed under.

/// Maximum number of lookup candidates for one URL.
const MAX_CANDIDATES: usize = 30;

/// Maximum host suffixes tested (the full host plus four more).
const MAX_HOST_SUFFIXES: usize = 5;

/// Maximum path prefixes produced from leading slashes.
const MAX_PATH_PREFIXES: usize = 4;

/// Canonicalize a URL for hashing.
pub fn canonicalize(input: &str) -> String {
    // strip surrounding whitespace and embedded tab/CR/LF
    let mut url: String = input
        .trim()
        .chars()
        .filter(|c| !matches!(c, '\t' | '\r' | '\n'))
        .collect();

    // the fragment never participates in matching
    if let Some(pos) = url.find('#') {
        url.truncate(pos);
    }

    // percent-decode until no valid escapes remain
    let mut bytes = url.into_bytes();
    loop {
        let decoded = percent_decode_once(&bytes);
        if decoded == bytes {
            break;
        }
        bytes = decoded;
    }

    let (scheme, rest) = split_scheme(&bytes);
    let (host_port, path, query) = split_authority(rest);
    let (host, port) = split_port(host_port);

    let host = canonicalize_host(host);
    let path = canonicalize_path(path);

    let mut out = String::new();
    out.push_str(&scheme);
    out.push_str("://");
    out.push_str(&escape(&host));
    if let Some(port) = port {
        out.push(':');
        out.push_str(port);
    }
    out.push_str(&escape(&path));
    // the query is preserved verbatim, trailing '?' included
    out.push_str(&escape_query(query));
    out
}

/// Generate the candidate strings to test for a canonical URL: up to five
/// host suffixes crossed with up to six path variants, deduplicated and
/// capped at thirty.
pub fn generate_candidates(canonical: &str) -> Vec<String> {
    let rest = match canonical.find("://") {
        Some(pos) => &canonical[pos + 3..],
        None => canonical,
    };
    let (host_port, path_query) = match rest.find('/') {
        Some(pos) => (&rest[..pos], &rest[pos..]),
        None => (rest, "/"),
    };
    // host keys never carry the port
    let host = match host_port.rfind(':') {
        Some(pos) if host_port[pos + 1..].chars().all(|c| c.is_ascii_digit()) => {
            &host_port[..pos]
        }
        _ => host_port,
    };
    if host.is_empty() {
        return Vec::new();
    }

    let (path, query) = match path_query.find('?') {
        Some(pos) => (&path_query[..pos], &path_query[pos..]),
        None => (path_query, ""),
    };

    let mut hosts: Vec<String> = vec![host.to_string()];
    if parse_ip(host.as_bytes()).is_none() {
        let labels: Vec<&str> = host.split('.').collect();
        let max_len = MAX_HOST_SUFFIXES.min(labels.len().saturating_sub(1));
        for len in (2..=max_len).rev() {
            hosts.push(labels[labels.len() - len..].join("."));
        }
    }

    let mut paths: Vec<String> = Vec::new();
    if !query.is_empty() {
        paths.push(format!("{path}{query}"));
    }
    paths.push(path.to_string());
    let slashes = path
        .bytes()
        .enumerate()
        .filter(|&(_, b)| b == b'/')
        .map(|(i, _)| i)
        .take(MAX_PATH_PREFIXES);
    for pos in slashes {
        paths.push(path[..=pos].to_string());
    }

    let mut out: Vec<String> = Vec::new();
    for host in &hosts {
        for path in &paths {
            let candidate = format!("{host}{path}");
            if !out.contains(&candidate) {
                out.push(candidate);
            }
            if out.len() == MAX_CANDIDATES {
                return out;
            }
        }
    }
    out
}

/// The host key hashed into a candidate's wire bucket: its host plus a
/// trailing slash.
pub fn host_key(candidate: &str) -> String {
    match candidate.find('/') {
        Some(pos) => format!("{}/", &candidate[..pos]),
        None => format!("{candidate}/"),
    }
}

fn percent_decode_once(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hi = hex_val(bytes[i + 1]);
            let lo = hex_val(bytes[i + 2]);
            if let (Some(hi), Some(lo)) = (hi, lo) {
                out.push(hi << 4 | lo);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    out
}

fn hex_val(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

fn split_scheme(bytes: &[u8]) -> (String, &[u8]) {
    if let Some(pos) = find(bytes, b"://") {
        if let Ok(scheme) = std::str::from_utf8(&bytes[..pos]) {
            let valid = !scheme.is_empty()
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
            if valid {
                return (scheme.to_ascii_lowercase(), &bytes[pos + 3..]);
            }
        }
    }
    ("http".to_string(), bytes)
}

/// Split `host[:port][/path][?query]` into its three pieces. The query
/// keeps its leading `?`; an absent path becomes `/`.
fn split_authority(rest: &[u8]) -> (&[u8], &[u8], &[u8]) {
    let slash = rest.iter().position(|&b| b == b'/');
    let question = rest.iter().position(|&b| b == b'?');
    match (slash, question) {
        (Some(s), Some(q)) if q < s => (&rest[..q], b"/", &rest[q..]),
        (Some(s), _) => {
            let path_query = &rest[s..];
            match path_query.iter().position(|&b| b == b'?') {
                Some(q) => (&rest[..s], &path_query[..q], &path_query[q..]),
                None => (&rest[..s], path_query, b""),
            }
        }
        (None, Some(q)) => (&rest[..q], b"/", &rest[q..]),
        (None, None) => (rest, b"/", b""),
    }
}

fn split_port(host_port: &[u8]) -> (&[u8], Option<&str>) {
    if let Some(pos) = host_port.iter().rposition(|&b| b == b':') {
        let port = &host_port[pos + 1..];
        if !port.is_empty() && port.iter().all(|b| b.is_ascii_digit()) {
            let port = std::str::from_utf8(port).expect("digits are ASCII");
            return (&host_port[..pos], Some(port));
        }
    }
    (host_port, None)
}

fn canonicalize_host(host: &[u8]) -> Vec<u8> {
    let mut out: Vec<u8> = Vec::with_capacity(host.len());
    for &b in host {
        out.push(b.to_ascii_lowercase());
    }
    // strip surrounding dots, collapse runs of dots
    let mut collapsed: Vec<u8> = Vec::with_capacity(out.len());
    for &b in out.iter() {
        if b == b'.' && collapsed.last() == Some(&b'.') {
            continue;
        }
        collapsed.push(b);
    }
    while collapsed.first() == Some(&b'.') {
        collapsed.remove(0);
    }
    while collapsed.last() == Some(&b'.') {
        collapsed.pop();
    }

    if let Some(ip) = parse_ip(&collapsed) {
        return ip.into_bytes();
    }
    collapsed
}

/// Recognize decimal/hex/octal IPv4 forms and return the dotted-quad
/// rendering, e.g. `3279880203` -> `195.127.0.11`.
fn parse_ip(host: &[u8]) -> Option<String> {
    let host = std::str::from_utf8(host).ok()?;
    if host.is_empty() {
        return None;
    }
    let parts: Vec<&str> = host.split('.').collect();
    if parts.len() > 4 {
        return None;
    }
    let values: Option<Vec<u32>> = parts.iter().map(|p| parse_ip_part(p)).collect();
    let values = values?;

    let mut bytes = [0u8; 4];
    let last = values.len() - 1;
    for (i, &value) in values[..last].iter().enumerate() {
        if value > 255 {
            return None;
        }
        bytes[i] = value as u8;
    }
    // the final component spans the remaining bytes
    let span = 4 - last;
    let value = values[last];
    if span < 4 && u64::from(value) >= 1u64 << (8 * span) {
        return None;
    }
    for offset in 0..span {
        bytes[last + offset] = (value >> (8 * (span - 1 - offset))) as u8;
    }
    Some(format!("{}.{}.{}.{}", bytes[0], bytes[1], bytes[2], bytes[3]))
}

fn parse_ip_part(part: &str) -> Option<u32> {
    if part.is_empty() {
        return None;
    }
    if let Some(hex) = part.strip_prefix("0x").or_else(|| part.strip_prefix("0X")) {
        return u32::from_str_radix(hex, 16).ok();
    }
    if !part.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if part.len() > 1 && part.starts_with('0') {
        return u32::from_str_radix(part, 8).ok();
    }
    part.parse().ok()
}

fn canonicalize_path(path: &[u8]) -> Vec<u8> {
    let trailing_slash = match path.split(|&b| b == b'/').last() {
        Some(last) => last.is_empty() || last == b"." || last == b"..",
        None => true,
    };

    let mut segments: Vec<&[u8]> = Vec::new();
    for segment in path.split(|&b| b == b'/') {
        match segment {
            b"" | b"." => {}
            b".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }

    let mut out = Vec::with_capacity(path.len());
    for segment in &segments {
        out.push(b'/');
        out.extend_from_slice(segment);
    }
    if out.is_empty() || trailing_slash {
        out.push(b'/');
    }
    out
}

/// Re-encode bytes outside printable ASCII, plus `%` and `#`.
fn escape(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for &b in bytes {
        if !(0x21..=0x7e).contains(&b) || b == b'%' || b == b'#' {
            out.push_str(&format!("%{b:02X}"));
        } else {
            out.push(b as char);
        }
    }
    out
}

/// The query survives verbatim apart from bytes that cannot appear in a
/// hashable ASCII string.
fn escape_query(query: &[u8]) -> String {
    let mut out = String::with_capacity(query.len());
    for &b in query {
        if b < 0x20 || b >= 0x7f {
            out.push_str(&format!("%{b:02X}"));
        } else {
            out.push(b as char);
        }
    }
    out
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
