// ABOUTME: Per-host cache of ssh ControlMaster connections
// ABOUTME: Single-flight master startup, LRU bound, stale master replacement and teardown

//! Connection multiplexing.
//!
//! The `Muxer` keeps one [`MasterConnection`] per host and hands out
//! [`CommandSpec`]s whose ControlPath points at that master, so every `exec` or
//! `copy` after the first skips the ssh handshake.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                           Muxer                              │
//! │  ┌────────────────────────────────────────────────────────┐  │
//! │  │ cache: Mutex<HashMap<host, Entry>>                     │  │
//! │  │   - db1 -> Shared<master future> (established)         │  │
//! │  │   - db2 -> Shared<master future> (handshake running)   │  │
//! │  └────────────────────────────────────────────────────────┘  │
//! │                                                              │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────────┐  │
//! │  │ base         │   │ MuxMetrics   │   │ MuxerConfig      │  │
//! │  │ CommandSpec  │   │ (counters)   │   │ (bound, timeout) │  │
//! │  └──────────────┘   └──────────────┘   └──────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each cache entry holds a shared future for its master. The first caller for a
//! host inserts it and the handshake runs in its own task; every other caller
//! for that host awaits the same future, so one host never gets two masters and
//! abandoning `connect` does not abort a handshake other callers are waiting on.
//! The lock is only held for map bookkeeping, never across an await.
//!
//! # Usage
//!
//! ```ignore
//! use ssh_muxer::Muxer;
//!
//! let muxer = Muxer::with_sockets_in("/tmp/mux");
//! let ssh = muxer.connect("db1").await?;
//! let outcome = ssh.exec(["uptime"]).await?.error_unless_exit_in(&[0])?;
//! muxer.close().await;
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures_util::future::{join_all, BoxFuture, FutureExt, Shared};
use tracing::{debug, info, warn};

use super::config::{control_path_option, MuxerConfig, DEFAULT_CONTROL_PATH_TEMPLATE};
use super::master::{HandshakeOptions, MasterConnection};
use super::metrics::MuxMetrics;
use crate::command::CommandSpec;
use crate::error::{Result, SshError};

type MasterFuture = Shared<BoxFuture<'static, Result<Arc<MasterConnection>>>>;

/// One cached master, possibly still starting
struct Entry {
    /// Distinguishes this entry from a later one for the same host
    generation: u64,
    /// Logical clock value of the last `connect` that used it
    last_used: u64,
    master: MasterFuture,
}

#[derive(Default)]
struct Cache {
    entries: HashMap<String, Entry>,
    clock: u64,
    next_generation: u64,
}

impl Cache {
    /// Remove the entry for `host` if it is still `generation`
    fn remove_generation(&mut self, host: &str, generation: u64) -> Option<MasterFuture> {
        match self.entries.get(host) {
            Some(entry) if entry.generation == generation => {
                self.entries.remove(host).map(|entry| entry.master)
            }
            _ => None,
        }
    }

    /// Remove least recently used entries until at most `capacity` remain,
    /// never removing `keep`
    fn evict_over(&mut self, capacity: usize, keep: &str) -> Vec<(String, MasterFuture)> {
        let mut evicted = Vec::new();

        while self.entries.len() > capacity.max(1) {
            let victim = self
                .entries
                .iter()
                .filter(|(host, _)| host.as_str() != keep)
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(host, _)| host.clone());

            let Some(host) = victim else { break };
            if let Some(entry) = self.entries.remove(&host) {
                evicted.push((host, entry.master));
            }
        }

        evicted
    }
}

/// Hands out ssh sessions that reuse one master connection per host
pub struct Muxer {
    /// Template for masters and sessions; carries the ControlPath option
    base: CommandSpec,

    config: MuxerConfig,

    cache: Arc<Mutex<Cache>>,

    metrics: Arc<MuxMetrics>,
}

impl std::fmt::Debug for Muxer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Muxer")
            .field("base", &self.base)
            .field("config", &self.config)
            .field("master_count", &self.master_count())
            .finish()
    }
}

impl Muxer {
    /// Create a muxer from a template spec
    ///
    /// `base` should carry a `-oControlPath=...` option; sessions only share the
    /// master's transport if they agree on that path.
    pub fn new(base: CommandSpec, config: MuxerConfig) -> Self {
        Self {
            base,
            config,
            cache: Arc::new(Mutex::new(Cache::default())),
            metrics: Arc::new(MuxMetrics::new()),
        }
    }

    /// Unbounded muxer keeping its control sockets in `dir`
    pub fn with_sockets_in(dir: impl AsRef<Path>) -> Self {
        let base = CommandSpec::to_host("localhost").with_args([control_path_option(
            dir.as_ref(),
            DEFAULT_CONTROL_PATH_TEMPLATE,
        )]);
        Self::new(base, MuxerConfig::default())
    }

    /// Build a muxer from configuration, creating the socket directory
    pub fn from_config(config: MuxerConfig) -> Result<Self> {
        let mut base = CommandSpec::to_host("localhost")
            .with_binary(config.ssh_binary.as_str())
            .with_args([config.control_path_option()?])
            .with_args(config.extra_args.iter().cloned());

        if let Some(user) = &config.user {
            base = base.with_user(user.as_str());
        }

        Ok(Self::new(base, config))
    }

    /// A new muxer with `args` appended to the template and an empty cache
    #[must_use]
    pub fn with_args<I, S>(&self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(self.base.with_args(args), self.config.clone())
    }

    /// A new muxer connecting as `user` with an empty cache
    #[must_use]
    pub fn with_user(&self, user: impl Into<String>) -> Self {
        Self::new(self.base.with_user(user), self.config.clone())
    }

    pub fn base(&self) -> &CommandSpec {
        &self.base
    }

    pub fn config(&self) -> &MuxerConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<MuxMetrics> {
        &self.metrics
    }

    /// Get a session spec for `host`, starting its master if needed
    ///
    /// Waits for the master's handshake on a miss. A cached master whose process
    /// has exited is dropped and replaced without the caller seeing an error.
    ///
    /// # Errors
    /// `InvalidHost` for an empty host, otherwise whatever the master's startup
    /// failed with. A failed startup is not cached.
    pub async fn connect(&self, host: &str) -> Result<CommandSpec> {
        if host.trim().is_empty() {
            return Err(SshError::InvalidHost(host.to_string()));
        }

        loop {
            let (generation, master, evicted) = self.checkout(host);
            for (evicted_host, evicted_master) in evicted {
                self.dispose(evicted_host, evicted_master);
            }

            match master.await {
                Ok(conn) if conn.is_alive() => {
                    debug!(host = %host, pid = ?conn.pid(), "Reusing master connection");
                    return Ok(self.base.with_host(host));
                }
                Ok(conn) => {
                    info!(host = %host, pid = ?conn.pid(), "Master connection exited, replacing");
                    if let Some(stale) = self.invalidate(host, generation) {
                        self.metrics.stale_master_replaced();
                        self.dispose(host.to_string(), stale);
                    }
                }
                Err(e) => {
                    self.invalidate(host, generation);
                    return Err(e);
                }
            }
        }
    }

    /// Terminate every master and empty the cache
    ///
    /// Masters still starting are waited for and then terminated. Termination
    /// errors are logged, never returned, and calling this again is a no-op.
    pub async fn close(&self) {
        let drained: Vec<(String, MasterFuture)> = {
            let mut cache = self.lock();
            cache
                .entries
                .drain()
                .map(|(host, entry)| (host, entry.master))
                .collect()
        };
        self.update_metrics();

        if drained.is_empty() {
            return;
        }

        info!(master_count = drained.len(), "Closing muxer");

        join_all(drained.into_iter().map(|(host, master)| async move {
            match master.await {
                Ok(conn) => terminate_quietly(&host, &conn),
                Err(e) => debug!(host = %host, error = %e, "Master never started"),
            }
        }))
        .await;

        info!("Muxer closed");
    }

    /// Number of cached masters, including ones still starting
    pub fn master_count(&self) -> usize {
        self.lock().entries.len()
    }

    /// Hosts with a cached master
    pub fn hosts(&self) -> Vec<String> {
        self.lock().entries.keys().cloned().collect()
    }

    /// Look up or insert the entry for `host`, returning anything the insert evicted
    fn checkout(&self, host: &str) -> (u64, MasterFuture, Vec<(String, MasterFuture)>) {
        let mut cache = self.lock();
        cache.clock += 1;
        let now = cache.clock;

        if let Some(entry) = cache.entries.get_mut(host) {
            // A resolved failure is a miss; the entry is replaced below
            if !matches!(entry.master.peek(), Some(Err(_))) {
                entry.last_used = now;
                return (entry.generation, entry.master.clone(), Vec::new());
            }
        }

        let generation = cache.next_generation;
        cache.next_generation += 1;

        let master = self.start_master(host, generation);
        cache.entries.insert(
            host.to_string(),
            Entry {
                generation,
                last_used: now,
                master: master.clone(),
            },
        );
        let evicted = cache.evict_over(self.config.capacity(), host);
        drop(cache);

        self.update_metrics();
        (generation, master, evicted)
    }

    /// Remove the entry for `host` if it is still `generation`
    fn invalidate(&self, host: &str, generation: u64) -> Option<MasterFuture> {
        let removed = self.lock().remove_generation(host, generation);
        self.update_metrics();
        removed
    }

    /// Start the handshake for `host` in its own task
    ///
    /// On failure the task removes its own entry, so the next `connect` retries
    /// even when every caller waiting on this handshake has gone away.
    fn start_master(&self, host: &str, generation: u64) -> MasterFuture {
        let spec = self.master_spec(host);
        let options = HandshakeOptions {
            ready_marker: self.config.ready_marker.clone(),
            timeout: self.config.handshake_timeout,
        };
        let metrics = Arc::clone(&self.metrics);
        let cache = Arc::downgrade(&self.cache);
        let host = host.to_string();

        let task = tokio::spawn(async move {
            metrics.master_started();
            match MasterConnection::establish(&spec, &options).await {
                Ok(conn) => Ok(Arc::new(conn)),
                Err(e) => {
                    metrics.handshake_failed();
                    warn!(host = %host, error = %e, "Master connection failed");
                    forget_failed(&cache, &metrics, &host, generation);
                    Err(e)
                }
            }
        });

        async move {
            match task.await {
                Ok(result) => result,
                Err(e) => Err(SshError::TaskFailed(e.to_string())),
            }
        }
        .boxed()
        .shared()
    }

    /// Template for the master process of `host`
    fn master_spec(&self, host: &str) -> CommandSpec {
        self.base
            .with_args(["-M", "-v"])
            .with_args([
                "-o".to_string(),
                format!(
                    "ServerAliveInterval={}",
                    self.config.server_alive_interval.as_secs()
                ),
            ])
            .with_host(host)
    }

    /// Terminate an entry that has left the cache
    fn dispose(&self, host: String, master: MasterFuture) {
        self.metrics.master_evicted();

        match master.peek() {
            Some(Ok(conn)) => terminate_quietly(&host, conn),
            Some(Err(_)) => {}
            None => {
                // Still starting: stop it once the handshake resolves
                tokio::spawn(async move {
                    if let Ok(conn) = master.await {
                        terminate_quietly(&host, &conn);
                    }
                });
            }
        }
    }

    fn update_metrics(&self) {
        set_active_masters(&self.metrics, self.master_count());
    }

    fn lock(&self) -> MutexGuard<'_, Cache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Muxer {
    /// Best-effort teardown for a muxer that was never closed; masters still
    /// starting are stopped by their own drop once the handshake task ends
    fn drop(&mut self) {
        let drained: Vec<(String, Entry)> = self.lock().entries.drain().collect();
        for (host, entry) in drained {
            if let Some(Ok(conn)) = entry.master.peek() {
                terminate_quietly(&host, conn);
            }
        }
    }
}

/// Drop the failed entry `generation` for `host` if the muxer still exists
fn forget_failed(cache: &Weak<Mutex<Cache>>, metrics: &MuxMetrics, host: &str, generation: u64) {
    let Some(cache) = cache.upgrade() else { return };

    let (removed, remaining) = {
        let mut cache = cache.lock().unwrap_or_else(PoisonError::into_inner);
        let removed = cache.remove_generation(host, generation);
        (removed, cache.entries.len())
    };

    if removed.is_some() {
        debug!(host = %host, generation, "Removed failed master entry");
        set_active_masters(metrics, remaining);
    }
}

fn set_active_masters(metrics: &MuxMetrics, count: usize) {
    metrics.set_active_masters(u32::try_from(count).unwrap_or(u32::MAX));
}

fn terminate_quietly(host: &str, conn: &MasterConnection) {
    if let Err(e) = conn.terminate() {
        warn!(host = %host, error = %e, "Failed to terminate master connection");
    }
}
