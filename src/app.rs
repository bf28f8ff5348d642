//! Composition root: wires the store, cache, outbox, monitor and coordinator
//! together and owns their lifecycle.

use color_eyre::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::cache::{CacheManager, SnapshotStore};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::facade::ResilientClient;
use crate::http::{HttpTransport, ReqwestTransport};
use crate::network::{HttpProbe, NetworkSignalSource, NetworkStatusMonitor};
use crate::outbox::OutboxQueue;
use crate::rental::RentalClient;
use crate::store::{DisabledStore, PersistentStore, SqliteStore};
use crate::sync::SyncCoordinator;

pub struct App {
  store: Arc<dyn PersistentStore>,
  outbox: Arc<OutboxQueue>,
  monitor: Arc<NetworkStatusMonitor>,
  coordinator: Arc<SyncCoordinator>,
  client: RentalClient,
  /// Background tasks started by [`App::start`]
  tasks: Vec<JoinHandle<()>>,
}

impl App {
  /// Build every service from configuration. Probes the API once so the
  /// first request already knows whether it is online. Background tasks are
  /// not started; see [`App::start`].
  pub async fn init(config: &Config) -> Result<(Self, HttpProbe)> {
    let store = open_store(config);
    let transport: Arc<dyn HttpTransport> =
      Arc::new(ReqwestTransport::new(Config::get_api_token())?);

    let probe = HttpProbe::new(
      config.probe_url(),
      Duration::from_secs(config.network.probe_interval_secs),
    );
    let initial = probe.probe_once().await;
    let monitor = Arc::new(NetworkStatusMonitor::new(initial.online));
    monitor.apply(&initial);
    info!(online = initial.online, quality = %monitor.quality(), "connectivity probed");

    let app = Self::assemble(config, store, transport, monitor, Arc::new(SystemClock))?;
    Ok((app, probe))
  }

  /// Wire the services around explicit dependencies.
  pub fn assemble(
    config: &Config,
    store: Arc<dyn PersistentStore>,
    transport: Arc<dyn HttpTransport>,
    monitor: Arc<NetworkStatusMonitor>,
    clock: Arc<dyn Clock>,
  ) -> Result<Self> {
    let cache = Arc::new(
      CacheManager::new(Arc::clone(&store), Arc::clone(&clock)).with_default_ttl(config.cache_ttl()),
    );
    let snapshots = Arc::new(SnapshotStore::new(Arc::clone(&store)));
    let outbox = Arc::new(OutboxQueue::new(Arc::clone(&store), Arc::clone(&clock)));

    let coordinator = Arc::new(SyncCoordinator::new(
      Arc::clone(&outbox),
      Arc::clone(&cache),
      Arc::clone(&transport),
      Arc::clone(&monitor),
      Arc::clone(&clock),
      config.sync_settings(),
    ));

    let api = ResilientClient::new(
      cache,
      snapshots,
      Arc::clone(&outbox),
      transport,
      Arc::clone(&monitor),
    )
    .with_retry_policy(config.retry_policy())
    .with_outbox_max_retries(config.outbox.max_retries);
    let client = RentalClient::new(api, &config.api.base_url, clock)?;

    Ok(Self {
      store,
      outbox,
      monitor,
      coordinator,
      client,
      tasks: Vec::new(),
    })
  }

  /// Start following connectivity and replaying the outbox in the
  /// background.
  pub fn start<S>(&mut self, source: S)
  where
    S: NetworkSignalSource + 'static,
  {
    self.tasks.push(self.monitor.spawn(source));
    self.tasks.push(self.coordinator.spawn());
  }

  pub fn client(&self) -> &RentalClient {
    &self.client
  }

  pub fn outbox(&self) -> &Arc<OutboxQueue> {
    &self.outbox
  }

  pub fn coordinator(&self) -> &Arc<SyncCoordinator> {
    &self.coordinator
  }

  pub fn monitor(&self) -> &Arc<NetworkStatusMonitor> {
    &self.monitor
  }

  /// Wipe everything stored for the current user.
  ///
  /// Any running drain is aborted first so nothing is replayed on behalf of a
  /// session that no longer exists. Callers still waiting on queued writes
  /// resolve with `Abandoned`.
  pub async fn logout(&self) -> Result<()> {
    self.coordinator.halt().await;
    self.client.api().discard_in_flight();
    let abandoned = self.outbox.abandon_waiters();
    let cleared = self.store.clear_all().await;
    self.coordinator.resume();

    cleared?;
    info!(abandoned, "logged out, local data cleared");
    Ok(())
  }

  /// Stop background work. Queued actions stay persisted for the next run.
  pub async fn shutdown(mut self) {
    self.coordinator.halt().await;
    for task in self.tasks.drain(..) {
      task.abort();
    }
    info!("shut down");
  }
}

/// Open the persistent store, degrading to a disabled store so reads and
/// writes still work network-only.
fn open_store(config: &Config) -> Arc<dyn PersistentStore> {
  let opened = match &config.cache.db_path {
    Some(path) => SqliteStore::open_at(path),
    None => SqliteStore::open(),
  };

  match opened {
    Ok(store) => Arc::new(store),
    Err(err) => {
      warn!(error = %err, "persistent store unavailable, running network-only");
      Arc::new(DisabledStore::new(err.to_string()))
    }
  }
}
