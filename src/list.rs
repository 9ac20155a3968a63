// src/list.rs

//! Per-list state engine.
//!
//! Each threat list owns a durable chunk journal on disk plus in-memory
//! prefix and full-hash sets. [`SafeBrowsingList::apply`] is the only
//! mutation path: it replays the journal, drops chunks marked for deletion,
//! appends new chunks, rewrites the journal atomically and only then updates
//! the in-memory sets, all under the list's write lock. Lookups share the
//! state through the read lock and observe either the pre- or post-apply
//! snapshot, never a mix.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use crate::codec::{build_chunk_ranges, encode_chunk, ChunkReader};
use crate::error::{AppError, Result};
use crate::index::Trie;
use crate::models::{Chunk, ChunkKind, ChunkNum, HostHash};

/// Cache stamp for one confirmed full hash.
#[derive(Debug, Clone)]
pub struct FullHashCacheEntry {
    created_at: DateTime<Utc>,
    ttl_secs: u64,
}

impl FullHashCacheEntry {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            created_at: Utc::now(),
            ttl_secs,
        }
    }

    /// A cached hash may only be trusted inside its lifetime.
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        now - self.created_at < Duration::seconds(self.ttl_secs as i64)
    }

    #[cfg(test)]
    pub fn expired_for_test() -> Self {
        Self {
            created_at: Utc::now() - Duration::seconds(3600),
            ttl_secs: 1,
        }
    }
}

/// Mutable state of one list, guarded by the list's RwLock.
#[derive(Default)]
pub struct ListState {
    /// Established prefix length, zero until the first prefix chunk loads.
    pub prefix_len: usize,

    /// `host ∥ prefix` keys, the partial match surface.
    pub prefixes: Trie,

    /// `host ∥ full hash` keys, the confirmed match surface.
    pub full_hashes: Trie,

    /// `host ∥ prefix` keys whose gethash request was already issued this
    /// session. Never persisted.
    pub pending_full_hash: Trie,

    /// Cache lifetime per confirmed 32-byte hash.
    pub cache: HashMap<Vec<u8>, FullHashCacheEntry>,

    /// Chunk numbers currently present in the journal.
    pub add_chunks: BTreeSet<ChunkNum>,
    pub sub_chunks: BTreeSet<ChunkNum>,

    /// Chunk numbers to drop on the next journal rewrite.
    pub delete_add_chunks: BTreeSet<ChunkNum>,
    pub delete_sub_chunks: BTreeSet<ChunkNum>,

    /// Redirect URLs pending a chunk fetch.
    pub redirects: Vec<String>,

    /// Normalized range expressions sent with the next downloads request.
    pub add_ranges: String,
    pub sub_ranges: String,
}

/// Build a lookup key from a host bucket and a hash or prefix.
pub(crate) fn lookup_key(host: &HostHash, hash: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(host.len() + hash.len());
    key.extend_from_slice(host);
    key.extend_from_slice(hash);
    key
}

impl ListState {
    fn is_marked_for_delete(&self, chunk: &Chunk) -> bool {
        match chunk.kind {
            ChunkKind::Add => self.delete_add_chunks.contains(&chunk.number),
            ChunkKind::Sub => self.delete_sub_chunks.contains(&chunk.number),
        }
    }

    /// Replay one chunk onto the in-memory sets.
    fn apply_chunk(&mut self, chunk: &Chunk) {
        for (host, entries) in &chunk.hashes {
            for entry in entries {
                let key = lookup_key(host, entry);
                if entry.len() == 32 {
                    match chunk.kind {
                        ChunkKind::Add => {
                            log::debug!("adding full length hash: {}", hex::encode(&key));
                            self.full_hashes.insert(&key);
                        }
                        ChunkKind::Sub => {
                            self.full_hashes.remove(&key);
                        }
                    }
                } else {
                    match chunk.kind {
                        ChunkKind::Add => {
                            self.prefixes.insert(&key);
                        }
                        ChunkKind::Sub => {
                            self.prefixes.remove(&key);
                            // a subtracted prefix takes its confirmed full
                            // hashes with it
                            for full_key in self.full_hashes.scan_prefix(&key) {
                                self.full_hashes.remove(&full_key);
                            }
                        }
                    }
                }
            }
        }
    }
}

/// One threat list: journal file plus locked in-memory state.
pub struct SafeBrowsingList {
    pub name: String,
    journal_path: PathBuf,
    pub(crate) state: RwLock<ListState>,
}

impl SafeBrowsingList {
    pub fn new(name: impl Into<String>, journal_path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            journal_path: journal_path.into(),
            state: RwLock::new(ListState::default()),
        }
    }

    /// Apply new chunks and any pending chunk deletions in one transaction.
    ///
    /// Passing no chunks replays the journal as-is, which is how a list is
    /// loaded at startup. On any decode failure the journal and the
    /// in-memory state are left untouched.
    pub async fn apply(&self, new_chunks: &[Chunk]) -> Result<()> {
        let mut state = self.state.write().await;
        log::info!("reloading {}", self.name);

        // decode the whole journal up front so a corrupt tail cannot leave
        // a half-applied transaction behind
        let journal_bytes = match tokio::fs::read(&self.journal_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(AppError::Io(e)),
        };
        let persisted = ChunkReader::new(&journal_bytes).read_all().map_err(|e| {
            AppError::journal_corrupt(format!("{}: {e}", self.journal_path.display()))
        })?;

        let mut surviving: Vec<&Chunk> = Vec::new();
        let mut deleted_count = 0usize;
        for chunk in &persisted {
            if state.is_marked_for_delete(chunk) {
                deleted_count += 1;
                continue;
            }
            surviving.push(chunk);
        }
        let persisted_survivors = surviving.len();

        let mut fresh_count = 0usize;
        for chunk in new_chunks {
            if state.is_marked_for_delete(chunk) {
                continue;
            }
            surviving.push(chunk);
            fresh_count += 1;
        }

        let prefix_len = validate_prefix_len(&state, &surviving, persisted_survivors)?;

        // rewrite the journal through a sibling file, then swap
        let mut encoded = Vec::with_capacity(journal_bytes.len());
        for chunk in &surviving {
            encode_chunk(chunk, &mut encoded);
        }
        let tmp_path = self.journal_path.with_extension("tmp");
        let mut tmp = tokio::fs::File::create(&tmp_path).await?;
        tmp.write_all(&encoded).await?;
        tmp.flush().await?;
        drop(tmp);
        tokio::fs::rename(&tmp_path, &self.journal_path).await?;

        // the swap succeeded; everything from here on is infallible
        let mut add_chunks = BTreeSet::new();
        let mut sub_chunks = BTreeSet::new();
        let mut added_entries = 0usize;
        let mut removed_entries = 0usize;
        for chunk in &surviving {
            match chunk.kind {
                ChunkKind::Add => {
                    add_chunks.insert(chunk.number);
                    added_entries += chunk.entry_count();
                }
                ChunkKind::Sub => {
                    sub_chunks.insert(chunk.number);
                    removed_entries += chunk.entry_count();
                }
            }
            state.apply_chunk(chunk);
        }

        state.prefix_len = prefix_len;
        state.add_ranges = build_chunk_ranges(&add_chunks);
        state.sub_ranges = build_chunk_ranges(&sub_chunks);
        state.add_chunks = add_chunks;
        state.sub_chunks = sub_chunks;
        state.delete_add_chunks.clear();
        state.delete_sub_chunks.clear();
        state.redirects.clear();

        log::info!(
            "loaded {} add chunks and {} sub chunks for {} \
             (~{} hashes added, ~{} hashes removed), deleted {} chunks, {} new chunks",
            state.add_chunks.len(),
            state.sub_chunks.len(),
            self.name,
            added_entries,
            removed_entries,
            deleted_count,
            fresh_count,
        );
        Ok(())
    }

    /// Record confirmed full hashes from a gethash response. These live in
    /// memory only; the journal is untouched and the entries expire with
    /// their cache lifetime.
    pub async fn cache_full_hashes(&self, entries: &[(HostHash, Vec<u8>)], ttl_secs: u64) {
        let mut state = self.state.write().await;
        for (host, hash) in entries {
            let key = lookup_key(host, hash);
            log::debug!("caching full length hash: {}", hex::encode(&key));
            state.full_hashes.insert(&key);
            state.cache.insert(hash.clone(), FullHashCacheEntry::new(ttl_secs));
        }
    }

    /// Flag prefixes as having an outstanding (or completed) gethash
    /// request. Set before the request is awaited.
    pub async fn mark_pending(&self, keys: &[(HostHash, Vec<u8>)]) {
        let mut state = self.state.write().await;
        for (host, prefix) in keys {
            state.pending_full_hash.insert(&lookup_key(host, prefix));
        }
    }

    /// Drop expired full hashes together with their cache stamps and
    /// pending flags.
    pub async fn evict(&self, expired: &[(HostHash, Vec<u8>)]) {
        if expired.is_empty() {
            return;
        }
        let mut state = self.state.write().await;
        for (host, hash) in expired {
            state.cache.remove(hash);
            state.full_hashes.remove(&lookup_key(host, hash));
            state
                .pending_full_hash
                .remove(&lookup_key(host, &hash[..4]));
        }
    }

    /// Set the redirect URLs and chunk deletions received for this list.
    pub async fn set_directives(
        &self,
        redirects: Vec<String>,
        delete_add: BTreeSet<ChunkNum>,
        delete_sub: BTreeSet<ChunkNum>,
    ) {
        let mut state = self.state.write().await;
        state.redirects = redirects;
        state.delete_add_chunks = delete_add;
        state.delete_sub_chunks = delete_sub;
    }

    /// Redirect URLs pending a fetch, consuming them.
    pub async fn take_redirects(&self) -> Vec<String> {
        let mut state = self.state.write().await;
        std::mem::take(&mut state.redirects)
    }

    /// Whether any chunk deletions are waiting for the next rewrite.
    pub async fn has_pending_deletes(&self) -> bool {
        let state = self.state.read().await;
        !state.delete_add_chunks.is_empty() || !state.delete_sub_chunks.is_empty()
    }

    /// The `name;a:RANGES:s:RANGES` fragment of the downloads body.
    pub async fn downloads_fragment(&self) -> String {
        let state = self.state.read().await;
        let mut out = format!("{};", self.name);
        if !state.add_ranges.is_empty() {
            out.push_str("a:");
            out.push_str(&state.add_ranges);
            out.push(':');
        }
        if !state.sub_ranges.is_empty() {
            out.push_str("s:");
            out.push_str(&state.sub_ranges);
        }
        let trimmed = out.strip_suffix(':').map(str::to_string);
        trimmed.unwrap_or(out)
    }

    /// Wipe all persisted and in-memory state for this list.
    pub async fn reset(&self) -> Result<()> {
        let mut state = self.state.write().await;
        *state = ListState::default();
        match tokio::fs::remove_file(&self.journal_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::Io(e)),
        }
    }
}

/// Enforce one prefix length per list across every surviving chunk.
/// Full-length (32-byte) chunks are exempt.
fn validate_prefix_len(
    state: &ListState,
    surviving: &[&Chunk],
    persisted_survivors: usize,
) -> Result<usize> {
    let mut prefix_len = state.prefix_len;
    for (index, chunk) in surviving.iter().enumerate() {
        if chunk.hash_len == 32 {
            continue;
        }
        if prefix_len == 0 {
            prefix_len = chunk.hash_len;
        } else if chunk.hash_len != prefix_len {
            let message = format!(
                "found more than one hash length in a single list ({} and {})",
                prefix_len, chunk.hash_len
            );
            return if index < persisted_survivors {
                Err(AppError::journal_corrupt(message))
            } else {
                Err(AppError::malformed_chunk(message))
            };
        }
    }
    Ok(prefix_len)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use tempfile::TempDir;

    use super::*;

    fn add_chunk(number: ChunkNum, hash_len: usize, entries: &[&[u8]]) -> Chunk {
        chunk(ChunkKind::Add, number, hash_len, entries)
    }

    fn sub_chunk(number: ChunkNum, hash_len: usize, entries: &[&[u8]]) -> Chunk {
        chunk(ChunkKind::Sub, number, hash_len, entries)
    }

    fn chunk(kind: ChunkKind, number: ChunkNum, hash_len: usize, entries: &[&[u8]]) -> Chunk {
        let mut hashes: BTreeMap<HostHash, Vec<Vec<u8>>> = BTreeMap::new();
        hashes.insert(*b"test", entries.iter().map(|e| e.to_vec()).collect());
        Chunk {
            number,
            kind,
            hash_len,
            hashes,
            add_chunk_nums: BTreeMap::new(),
        }
    }

    fn list_in(dir: &TempDir) -> SafeBrowsingList {
        SafeBrowsingList::new("test", dir.path().join("test.dat"))
    }

    #[tokio::test]
    async fn test_load_and_subtract() {
        let dir = TempDir::new().unwrap();
        let list = list_in(&dir);

        list.apply(&[add_chunk(1, 4, &[b"test", b"1234"])])
            .await
            .unwrap();
        {
            let state = list.state.read().await;
            assert_eq!(state.prefixes.len(), 2);
            assert!(state.prefixes.contains(b"testtest"));
            assert!(state.prefixes.contains(b"test1234"));
        }

        list.apply(&[sub_chunk(1, 4, &[b"test"])]).await.unwrap();
        let state = list.state.read().await;
        assert_eq!(state.prefixes.len(), 1);
        assert!(state.prefixes.contains(b"test1234"));
    }

    #[tokio::test]
    async fn test_full_hash_subtraction_via_prefix() {
        let dir = TempDir::new().unwrap();
        let list = list_in(&dir);

        list.apply(&[add_chunk(1, 4, &[b"test", b"1234"])])
            .await
            .unwrap();
        list.apply(&[sub_chunk(1, 4, &[b"test"])]).await.unwrap();
        list.apply(&[
            add_chunk(
                2,
                32,
                &[
                    b"test1234123412341234123412341234",
                    b"12341234123412341234123412341234",
                ],
            ),
            sub_chunk(2, 4, &[b"test", b"1234"]),
        ])
        .await
        .unwrap();

        let state = list.state.read().await;
        assert_eq!(state.full_hashes.len(), 0);
        assert_eq!(state.prefixes.len(), 0);
    }

    #[tokio::test]
    async fn test_delete_by_chunk_number_replay() {
        let dir = TempDir::new().unwrap();
        let list = list_in(&dir);

        list.apply(&[add_chunk(1, 4, &[b"test", b"1234"])])
            .await
            .unwrap();
        list.apply(&[sub_chunk(1, 4, &[b"test"])]).await.unwrap();
        list.apply(&[
            add_chunk(
                2,
                32,
                &[
                    b"test1234123412341234123412341234",
                    b"12341234123412341234123412341234",
                ],
            ),
            sub_chunk(2, 4, &[b"test", b"1234"]),
        ])
        .await
        .unwrap();

        list.set_directives(
            Vec::new(),
            [1].into_iter().collect(),
            [1, 2].into_iter().collect(),
        )
        .await;
        list.apply(&[]).await.unwrap();

        let state = list.state.read().await;
        // only ADD #2 survives, so its two full hashes are restored
        assert_eq!(state.full_hashes.len(), 2);
        assert!(state
            .full_hashes
            .contains(b"testtest1234123412341234123412341234"));
        assert_eq!(state.add_ranges, "2");
        assert_eq!(state.sub_ranges, "");
        assert!(state.delete_add_chunks.is_empty());
        assert!(state.delete_sub_chunks.is_empty());
    }

    #[tokio::test]
    async fn test_reload_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let list = list_in(&dir);

        list.apply(&[
            add_chunk(1, 4, &[b"test", b"1234"]),
            add_chunk(3, 4, &[b"abcd"]),
            sub_chunk(2, 4, &[b"1234"]),
        ])
        .await
        .unwrap();

        let (prefixes_before, add_ranges, sub_ranges) = {
            let state = list.state.read().await;
            (
                state.prefixes.keys(),
                state.add_ranges.clone(),
                state.sub_ranges.clone(),
            )
        };

        list.apply(&[]).await.unwrap();

        let state = list.state.read().await;
        assert_eq!(state.prefixes.keys(), prefixes_before);
        assert_eq!(state.add_ranges, add_ranges);
        assert_eq!(state.sub_ranges, sub_ranges);
        assert_eq!(state.add_ranges, "1,3");
        assert_eq!(state.sub_ranges, "2");
    }

    #[tokio::test]
    async fn test_survives_restart_from_journal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.dat");

        let list = SafeBrowsingList::new("test", &path);
        list.apply(&[add_chunk(7, 4, &[b"test", b"1234"])])
            .await
            .unwrap();
        drop(list);

        let reloaded = SafeBrowsingList::new("test", &path);
        reloaded.apply(&[]).await.unwrap();
        let state = reloaded.state.read().await;
        assert_eq!(state.prefixes.len(), 2);
        assert_eq!(state.add_ranges, "7");
        assert_eq!(state.prefix_len, 4);
    }

    #[tokio::test]
    async fn test_rejects_mixed_prefix_lengths() {
        let dir = TempDir::new().unwrap();
        let list = list_in(&dir);

        list.apply(&[add_chunk(1, 4, &[b"test"])]).await.unwrap();
        let err = list
            .apply(&[chunk(ChunkKind::Add, 2, 8, &[b"12345678"])])
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::MalformedChunk(_)));

        // the failed transaction left nothing behind
        let state = list.state.read().await;
        assert_eq!(state.prefixes.len(), 1);
        assert_eq!(state.add_ranges, "1");
    }

    #[tokio::test]
    async fn test_corrupt_journal_aborts() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.dat");
        let list = SafeBrowsingList::new("test", &path);
        list.apply(&[add_chunk(1, 4, &[b"test"])]).await.unwrap();

        // truncate the journal mid-chunk
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 2]).unwrap();
        let on_disk = std::fs::read(&path).unwrap();

        let fresh = SafeBrowsingList::new("test", &path);
        let err = fresh.apply(&[add_chunk(2, 4, &[b"abcd"])]).await.unwrap_err();
        assert!(matches!(err, AppError::JournalCorrupt(_)));

        // no in-memory mutation and no rewrite happened
        let state = fresh.state.read().await;
        assert_eq!(state.prefixes.len(), 0);
        assert_eq!(std::fs::read(&path).unwrap(), on_disk);
    }

    #[tokio::test]
    async fn test_cached_full_hashes_are_memory_only() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.dat");
        let list = SafeBrowsingList::new("test", &path);
        list.apply(&[add_chunk(1, 4, &[b"test"])]).await.unwrap();

        list.cache_full_hashes(&[(*b"test", vec![0xab; 32])], 900)
            .await;
        {
            let state = list.state.read().await;
            assert_eq!(state.full_hashes.len(), 1);
            assert!(state.cache.contains_key(&vec![0xab; 32]));
        }

        // a restart rebuilds from the journal, which never saw the hash
        let reloaded = SafeBrowsingList::new("test", &path);
        reloaded.apply(&[]).await.unwrap();
        let state = reloaded.state.read().await;
        assert_eq!(state.full_hashes.len(), 0);
        assert!(state.cache.is_empty());
    }

    #[tokio::test]
    async fn test_evict_drops_hash_cache_and_pending() {
        let dir = TempDir::new().unwrap();
        let list = list_in(&dir);
        let hash = vec![0xab; 32];

        list.cache_full_hashes(&[(*b"test", hash.clone())], 900)
            .await;
        list.mark_pending(&[(*b"test", hash[..4].to_vec())]).await;
        list.evict(&[(*b"test", hash.clone())]).await;

        let state = list.state.read().await;
        assert_eq!(state.full_hashes.len(), 0);
        assert!(state.cache.is_empty());
        assert_eq!(state.pending_full_hash.len(), 0);
    }

    #[tokio::test]
    async fn test_reset_wipes_state_and_journal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.dat");
        let list = SafeBrowsingList::new("test", &path);
        list.apply(&[add_chunk(1, 4, &[b"test"])]).await.unwrap();
        assert!(path.exists());

        list.reset().await.unwrap();
        assert!(!path.exists());
        let state = list.state.read().await;
        assert_eq!(state.prefixes.len(), 0);
        assert_eq!(state.add_ranges, "");
    }

    #[tokio::test]
    async fn test_downloads_fragment() {
        let dir = TempDir::new().unwrap();
        let list = list_in(&dir);
        assert_eq!(list.downloads_fragment().await, "test;");

        list.apply(&[
            add_chunk(1, 4, &[b"test"]),
            add_chunk(2, 4, &[b"abcd"]),
            sub_chunk(5, 4, &[b"abcd"]),
        ])
        .await
        .unwrap();
        assert_eq!(list.downloads_fragment().await, "test;a:1-2:s:5");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_readers_see_whole_snapshots() {
        let dir = TempDir::new().unwrap();
        let list = std::sync::Arc::new(list_in(&dir));
        list.apply(&[add_chunk(1, 4, &[b"test", b"1234"])])
            .await
            .unwrap();

        // one writer subtracting both prefixes, many readers; every reader
        // must observe both entries or neither
        let writer = {
            let list = std::sync::Arc::clone(&list);
            tokio::spawn(async move {
                list.apply(&[sub_chunk(1, 4, &[b"test", b"1234"])])
                    .await
                    .unwrap();
            })
        };
        for _ in 0..100 {
            let state = list.state.read().await;
            let first = state.prefixes.contains(b"testtest");
            let second = state.prefixes.contains(b"test1234");
            assert_eq!(first, second);
            drop(state);
            tokio::task::yield_now().await;
        }
        writer.await.unwrap();

        let state = list.state.read().await;
        assert_eq!(state.prefixes.len(), 0);
    }

    #[test]
    fn test_cache_entry_validity() {
        let entry = FullHashCacheEntry::new(900);
        assert!(entry.is_valid(Utc::now()));
        assert!(!entry.is_valid(Utc::now() + Duration::seconds(901)));

        let expired = FullHashCacheEntry::expired_for_test();
        assert!(!expired.is_valid(Utc::now()));
    }
}
