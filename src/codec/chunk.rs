// src/codec/chunk.rs

//! Binary add/sub chunk codec.
//!
//! A chunk stream is a sequence of frames, each an ASCII header line
//! `kind:chunkNum:hashLen:chunkLen\n` followed by exactly `chunkLen` body
//! bytes. The body is a run of host-records: a 4-byte host hash, a 1-byte
//! entry count, then the entries. A count of zero means the host hash is
//! its own single entry. SUB entries are preceded by the 4-byte big-endian
//! origin ADD chunk number.
//!
//! The same encoding is used for the on-disk journal, so `encode_chunk` is
//! the exact inverse of decoding.

use std::collections::BTreeMap;

use crate::error::{AppError, Result};
use crate::models::{Chunk, ChunkKind, ChunkNum, HostHash};

/// Entries per host-record are counted in one byte.
const MAX_ENTRIES_PER_RECORD: usize = 255;

/// Sequential decoder over an in-memory chunk stream.
pub struct ChunkReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ChunkReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Decode the next chunk, or `None` at a clean end of stream.
    pub fn next_chunk(&mut self) -> Result<Option<Chunk>> {
        if self.pos == self.buf.len() {
            return Ok(None);
        }
        let header = self.read_line()?;
        let (kind, number, hash_len, chunk_len) = parse_chunk_header(&header)?;
        let body = self.read_exact(chunk_len)?;
        let chunk = decode_chunk_body(kind, number, hash_len, body)?;
        Ok(Some(chunk))
    }

    /// Decode every remaining chunk in the stream.
    pub fn read_all(&mut self) -> Result<Vec<Chunk>> {
        let mut chunks = Vec::new();
        while let Some(chunk) = self.next_chunk()? {
            chunks.push(chunk);
        }
        Ok(chunks)
    }

    fn read_line(&mut self) -> Result<String> {
        let rest = &self.buf[self.pos..];
        let end = rest
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| AppError::malformed_chunk("missing header terminator"))?;
        let line = std::str::from_utf8(&rest[..end])
            .map_err(|_| AppError::malformed_chunk("header is not ASCII"))?
            .to_string();
        self.pos += end + 1;
        Ok(line)
    }

    fn read_exact(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.buf.len() - self.pos < len {
            return Err(AppError::malformed_chunk("unexpected end of chunk"));
        }
        let out = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }
}

/// Parse a regular chunk header, `a:9:4:17` style.
pub fn parse_chunk_header(header: &str) -> Result<(ChunkKind, ChunkNum, usize, usize)> {
    let header = header.trim();
    let parts: Vec<&str> = header.split(':').collect();
    if parts.len() != 4 {
        return Err(AppError::malformed_chunk(format!(
            "unexpected header: {header}"
        )));
    }
    let kind = ChunkKind::from_str(parts[0])
        .ok_or_else(|| AppError::malformed_chunk(format!("bad chunk type: {}", parts[0])))?;
    let number: ChunkNum = parts[1]
        .parse()
        .map_err(|_| AppError::malformed_chunk("bad chunk num"))?;
    let hash_len: usize = parts[2]
        .parse()
        .map_err(|_| AppError::malformed_chunk("bad hash len"))?;
    if hash_len != 4 && hash_len != 32 {
        return Err(AppError::malformed_chunk(format!(
            "unsupported hash len: {hash_len}"
        )));
    }
    let chunk_len: usize = parts[3]
        .parse()
        .map_err(|_| AppError::malformed_chunk(format!("bad chunk len: {header}")))?;
    Ok((kind, number, hash_len, chunk_len))
}

fn decode_chunk_body(
    kind: ChunkKind,
    number: ChunkNum,
    hash_len: usize,
    body: &[u8],
) -> Result<Chunk> {
    let mut hashes: BTreeMap<HostHash, Vec<Vec<u8>>> = BTreeMap::new();
    let mut add_chunk_nums: BTreeMap<HostHash, Vec<ChunkNum>> = BTreeMap::new();

    let mut x = 0;
    while x < body.len() {
        let host: HostHash = take(body, &mut x, 4)?
            .try_into()
            .expect("slice length checked");
        let count = take(body, &mut x, 1)?[0] as usize;

        let host_hashes = hashes.entry(host).or_default();
        let host_nums = add_chunk_nums.entry(host).or_default();

        if count == 0 {
            // the host hash is its own single entry
            if kind == ChunkKind::Sub {
                host_nums.push(read_u32(body, &mut x)?);
            }
            host_hashes.push(host.to_vec());
            continue;
        }
        for _ in 0..count {
            if kind == ChunkKind::Sub {
                host_nums.push(read_u32(body, &mut x)?);
            }
            host_hashes.push(take(body, &mut x, hash_len)?.to_vec());
        }
    }

    if kind != ChunkKind::Sub {
        add_chunk_nums.clear();
    }
    Ok(Chunk {
        number,
        kind,
        hash_len,
        hashes,
        add_chunk_nums,
    })
}

fn take<'a>(body: &'a [u8], x: &mut usize, len: usize) -> Result<&'a [u8]> {
    if body.len() - *x < len {
        return Err(AppError::malformed_chunk("unexpected end of chunk"));
    }
    let out = &body[*x..*x + len];
    *x += len;
    Ok(out)
}

fn read_u32(body: &[u8], x: &mut usize) -> Result<u32> {
    let bytes: [u8; 4] = take(body, x, 4)?.try_into().expect("slice length checked");
    Ok(u32::from_be_bytes(bytes))
}

/// Serialize a chunk in wire format, appending to `out`.
pub fn encode_chunk(chunk: &Chunk, out: &mut Vec<u8>) {
    let mut body = Vec::new();
    for (host, entries) in &chunk.hashes {
        let nums = chunk.add_chunk_nums.get(host);
        for (group_index, group) in entries.chunks(MAX_ENTRIES_PER_RECORD).enumerate() {
            body.extend_from_slice(host);
            body.push(group.len() as u8);
            for (i, entry) in group.iter().enumerate() {
                if chunk.kind == ChunkKind::Sub {
                    let entry_index = group_index * MAX_ENTRIES_PER_RECORD + i;
                    let num = nums
                        .and_then(|n| n.get(entry_index))
                        .copied()
                        .unwrap_or(0);
                    body.extend_from_slice(&num.to_be_bytes());
                }
                body.extend_from_slice(entry);
            }
        }
    }
    out.extend_from_slice(
        format!(
            "{}:{}:{}:{}\n",
            chunk.kind,
            chunk.number,
            chunk.hash_len,
            body.len()
        )
        .as_bytes(),
    );
    out.extend_from_slice(&body);
}
