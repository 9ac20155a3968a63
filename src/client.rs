// src/client.rs

//! The client handle.
//!
//! [`SafeBrowsing`] owns the per-list state and the background reload task.
//! Online construction performs one synchronous update cycle and then keeps
//! the lists fresh on the server-dictated cadence, backing off on failure.
//! Offline construction only loads what the journals already hold.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::error::{AppError, Result};
use crate::list::SafeBrowsingList;
use crate::models::Config;
use crate::pipeline::backoff::Backoff;
use crate::pipeline::lookup;
use crate::services::update;
use crate::utils::http::{HttpTransport, Transport};

/// Reload cadence used until the server dictates one.
const DEFAULT_UPDATE_DELAY_SECS: u64 = 1800;

/// How many `r:pleasereset` rounds one update cycle will honor.
const MAX_RESET_ROUNDS: usize = 3;

/// Handle to the safe browsing client.
pub struct SafeBrowsing {
    inner: Arc<ClientInner>,
    reload_task: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for SafeBrowsing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SafeBrowsing").finish_non_exhaustive()
    }
}

struct ClientInner {
    config: Config,
    transport: Arc<dyn Transport>,
    lists: RwLock<Vec<Arc<SafeBrowsingList>>>,
    /// Unix seconds of the last successful update; zero means never.
    last_updated: AtomicI64,
    update_delay_secs: AtomicU64,
}

impl SafeBrowsing {
    /// Construct a client with default configuration over HTTPS.
    pub async fn new(api_key: &str, data_dir: &str) -> Result<Self> {
        Self::with_config(Config::new(api_key, data_dir)).await
    }

    /// Construct a client from a full configuration.
    pub async fn with_config(config: Config) -> Result<Self> {
        let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(&config)?);
        Self::with_transport(config, transport).await
    }

    /// Construct a client over a caller-supplied transport.
    pub async fn with_transport(config: Config, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate()?;
        if !config.data_dir.is_dir() {
            return Err(AppError::config(format!(
                "data directory {} does not exist",
                config.data_dir.display()
            )));
        }

        let inner = Arc::new(ClientInner {
            config,
            transport,
            lists: RwLock::new(Vec::new()),
            last_updated: AtomicI64::new(0),
            update_delay_secs: AtomicU64::new(DEFAULT_UPDATE_DELAY_SECS),
        });

        if inner.config.offline {
            inner.load_offline().await;
            return Ok(Self {
                inner,
                reload_task: None,
            });
        }

        // online mode: the first update must succeed before the handle exists
        inner
            .update()
            .await
            .map_err(|e| AppError::Init(e.to_string()))?;
        let reload_task = tokio::spawn(reload_loop(Arc::clone(&inner)));
        Ok(Self {
            inner,
            reload_task: Some(reload_task),
        })
    }

    /// Check whether a URL is listed, confirming against full hashes.
    ///
    /// May perform a blocking HTTP round trip. This is the call to gate a
    /// user-facing warning on.
    pub async fn is_listed(&self, url: &str) -> Result<Option<String>> {
        let (list, _) = self.query_url(url, true).await?;
        Ok(list)
    }

    /// Check whether a URL may be listed, without requesting full hashes.
    ///
    /// Fast and purely local, but a reported listing may be a prefix
    /// collision; never show a warning from this alone.
    pub async fn might_be_listed(&self, url: &str) -> Result<(Option<String>, bool)> {
        self.query_url(url, false).await
    }

    /// Whether a successful update happened within the staleness window.
    pub fn is_up_to_date(&self) -> bool {
        !self.inner.config.offline && lookup::is_up_to_date(self.inner.last_updated())
    }

    async fn query_url(&self, url: &str, match_full_hash: bool) -> Result<(Option<String>, bool)> {
        let lists = self.inner.lists.read().await.clone();
        lookup::query_url(
            &self.inner.transport,
            &self.inner.config,
            &lists,
            self.inner.last_updated(),
            url,
            match_full_hash,
        )
        .await
    }
}

impl Drop for SafeBrowsing {
    fn drop(&mut self) {
        if let Some(task) = &self.reload_task {
            task.abort();
        }
    }
}

impl ClientInner {
    fn last_updated(&self) -> Option<DateTime<Utc>> {
        match self.last_updated.load(Ordering::Relaxed) {
            0 => None,
            secs => DateTime::from_timestamp(secs, 0),
        }
    }

    /// Offline startup: load whatever journals exist, skipping failures.
    async fn load_offline(&self) {
        let mut lists = Vec::new();
        for name in &self.config.supported_lists {
            let list = Arc::new(SafeBrowsingList::new(name, self.config.journal_path(name)));
            match list.apply(&[]).await {
                Ok(()) => lists.push(list),
                Err(e) => log::warn!("error loading list {name}: {e}"),
            }
        }
        *self.lists.write().await = lists;
    }

    /// One full update cycle: refresh the list of lists, fetch directives,
    /// stream chunks, apply.
    async fn update(&self) -> Result<()> {
        log::info!("requesting list of lists from server");
        let names = update::request_list_names(self.transport.as_ref(), &self.config).await?;
        self.ensure_lists(&names).await?;
        let lists = self.lists.read().await.clone();

        log::info!("requesting updates");
        let mut reset_rounds = 0;
        loop {
            let mut fragments = Vec::with_capacity(lists.len());
            for list in &lists {
                fragments.push(list.downloads_fragment().await);
            }
            let response =
                update::request_downloads(self.transport.as_ref(), &self.config, &fragments)
                    .await?;
            if let Some(delay) = response.update_delay_secs {
                self.update_delay_secs.store(delay, Ordering::Relaxed);
            }

            if response.reset {
                reset_rounds += 1;
                if reset_rounds > MAX_RESET_ROUNDS {
                    return Err(AppError::malformed_redirect(
                        "server kept requesting resets",
                    ));
                }
                log::warn!("server requested a full reset, wiping all lists");
                for list in &lists {
                    list.reset().await?;
                }
                continue;
            }

            for directives in response.lists {
                match lists.iter().find(|l| l.name == directives.name) {
                    Some(list) => {
                        list.set_directives(
                            directives.redirects,
                            directives.delete_add,
                            directives.delete_sub,
                        )
                        .await
                    }
                    None => log::warn!(
                        "ignoring directives for unsupported list {}",
                        directives.name
                    ),
                }
            }
            break;
        }

        for list in &lists {
            let redirects = list.take_redirects().await;
            if redirects.is_empty() && !list.has_pending_deletes().await {
                log::info!("no pending updates for {}", list.name);
                continue;
            }
            let mut new_chunks = Vec::new();
            for url in &redirects {
                new_chunks
                    .extend(update::fetch_redirect_chunks(self.transport.as_ref(), url).await?);
            }
            list.apply(&new_chunks).await?;
        }

        self.last_updated
            .store(Utc::now().timestamp(), Ordering::Relaxed);
        Ok(())
    }

    /// Create and load list state for newly advertised supported names,
    /// keeping the configured order.
    async fn ensure_lists(&self, names: &[String]) -> Result<()> {
        let mut lists = self.lists.write().await;
        for name in &self.config.supported_lists {
            if !names.contains(name) {
                continue;
            }
            if lists.iter().any(|l| l.name == *name) {
                continue;
            }
            let list = Arc::new(SafeBrowsingList::new(name, self.config.journal_path(name)));
            log::info!("loading existing data for {name}");
            list.apply(&[]).await?;
            lists.push(list);
        }
        lists.sort_by_key(|list| {
            self.config
                .supported_lists
                .iter()
                .position(|n| *n == list.name)
        });
        Ok(())
    }
}

/// Background reload loop. Sleeps the server-dictated delay between
/// cycles and backs off on failure; every failure is retried.
async fn reload_loop(inner: Arc<ClientInner>) {
    let mut backoff = Backoff::new();
    loop {
        let delay = inner.update_delay_secs.load(Ordering::Relaxed);
        log::info!("next update in {delay} seconds");
        tokio::time::sleep(std::time::Duration::from_secs(delay)).await;

        loop {
            match inner.update().await {
                Ok(()) => {
                    backoff.reset();
                    break;
                }
                Err(e) => {
                    if matches!(e, AppError::JournalCorrupt(_)) {
                        log::error!("journal corrupt, operator intervention recommended: {e}");
                    }
                    let wait = backoff.next_delay();
                    log::warn!(
                        "update failed, in back-off mode (waiting {} mins): {e}",
                        wait.as_secs() / 60
                    );
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }
}
