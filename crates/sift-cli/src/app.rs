//! The Sift application: service wiring and command dispatch.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use sift_acl::StaticAccessResolver;
use sift_core::{
    ConfigProvider, Error, Result, SearchRequest, SearchResponse, SpaceId, StorageProvider, UserId,
};
use sift_index::{IndexFactory, MemoryIndexFactory, SpaceIndexManager, TantivyIndexFactory};
use sift_ingest::{ChangeFeed, ChangeIngestor, FsStorage, MemoryStorage};
use sift_service::{
    IndexProvider, LocalIndexProvider, ProviderRouter, RemoteIndexProvider, SearchProvider,
    ServiceState,
};
use tokio::net::TcpListener;
use tracing::Instrument;
use tracing_subscriber::EnvFilter;

use crate::cli::{CliArgs, Command};
use crate::config::SiftConfig;
use crate::config_handlers;

// ============================================================================
// Services
// ============================================================================

/// Every service of one Sift process, wired from configuration.
pub struct Services {
    /// Local indices.
    pub manager: Arc<SpaceIndexManager>,
    /// Applies changes and rebuilds spaces.
    pub ingestor: Arc<ChangeIngestor>,
    /// Provider for spaces without a route.
    pub local: Arc<LocalIndexProvider>,
    /// Aggregate search.
    pub search: Arc<SearchProvider>,
    /// Token guarding the internal routes.
    pub internal_token: Option<String>,
}

impl Services {
    /// Build the services described by `config`.
    pub fn build(config: &SiftConfig) -> Result<Self> {
        let settings = config.search_settings().clone();

        let manager = Arc::new(
            SpaceIndexManager::new(index_factory(config)?)
                .with_snippet_length(settings.snippet_length),
        );
        let ingestor = Arc::new(ChangeIngestor::new(Arc::clone(&manager), storage(config)));
        let local = Arc::new(LocalIndexProvider::new(Arc::clone(&ingestor), settings.clone()));

        let mut router = ProviderRouter::new(Arc::clone(&local) as Arc<dyn IndexProvider>);
        for (space, endpoint) in &config.routes {
            let mut remote =
                RemoteIndexProvider::with_timeout(endpoint.as_str(), settings.space_timeout())?;
            match &config.server.internal_token {
                Some(token) => remote = remote.with_token(token.as_str()),
                None => warn!(
                    "No server.internal_token set; the remote serving '{space}' will refuse requests"
                ),
            }
            info!("Routing space '{space}' to {}", remote.endpoint());
            router = router.with_route(space.as_str(), Arc::new(remote));
        }

        let access = Arc::new(StaticAccessResolver::new(config.access.clone()));
        let search = Arc::new(SearchProvider::new(access, router, settings));

        Ok(Self {
            manager,
            ingestor,
            local,
            search,
            internal_token: config.server.internal_token.clone(),
        })
    }

    /// HTTP state; `feed` enables `POST /v0/events`.
    pub fn state(&self, feed: Option<ChangeFeed>) -> ServiceState {
        ServiceState {
            search: Arc::clone(&self.search),
            provider: Arc::clone(&self.local) as Arc<dyn IndexProvider>,
            manager: Some(Arc::clone(&self.manager)),
            feed,
            internal_token: self.internal_token.clone(),
        }
    }
}

fn index_factory(config: &SiftConfig) -> Result<Arc<dyn IndexFactory>> {
    match config.search.backend.as_str() {
        "tantivy" => {
            let root = config.data_path()?;
            info!("Persisting space indices under {}", root.display());
            Ok(Arc::new(TantivyIndexFactory::new(root)))
        }
        "memory" => Ok(Arc::new(MemoryIndexFactory::new())),
        other => Err(Error::config(format!(
            "unknown search backend '{other}' (expected 'tantivy' or 'memory')"
        ))),
    }
}

fn storage(config: &SiftConfig) -> Arc<dyn StorageProvider> {
    match config.storage_root() {
        Some(root) => Arc::new(FsStorage::new(root).with_max_text_bytes(config.storage.max_text_bytes)),
        None => {
            warn!("No storage.root configured; reindexing will find empty spaces");
            Arc::new(MemoryStorage::new())
        }
    }
}

// ============================================================================
// SiftApp
// ============================================================================

/// The `sift` command-line application.
pub struct SiftApp {
    name: String,
    config: Arc<SiftConfig>,
    version: String,
}

impl SiftApp {
    /// Create from CLI args, loading config from file and environment.
    pub fn from_args(args: &CliArgs) -> Result<Self> {
        let config = SiftConfig::load(args.config.as_deref())?;
        Ok(Self::new(config))
    }

    /// Create an application around a loaded config.
    pub fn new(config: SiftConfig) -> Self {
        Self {
            name: config.service_name.clone(),
            config: Arc::new(config),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Loaded configuration.
    pub fn config(&self) -> &SiftConfig {
        &self.config
    }

    /// Initialise tracing-based logging.
    ///
    /// `RUST_LOG` wins over the verbosity flags.
    pub fn init_logging(&self, verbose: bool, quiet: bool) {
        let filter = if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else if quiet {
            EnvFilter::new("warn")
        } else if verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        };

        // A subscriber may already be installed (tests).
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
    }

    /// Run one command.
    pub async fn run(&self, args: CliArgs) -> Result<()> {
        self.init_logging(args.verbose, args.quiet);

        match args.command {
            Some(Command::Version) => {
                println!("{} {}", self.name, self.version);
                Ok(())
            }
            Some(Command::Health) => self.health(),
            Some(Command::Serve { port, host }) => self.serve(host, port).await,
            Some(Command::Index { space, user }) => {
                let count = self.index(SpaceId::from(space.as_str()), UserId::from(user)).await?;
                println!("Indexed {count} resources into '{space}'");
                Ok(())
            }
            Some(Command::Search {
                query,
                user,
                page_size,
                page_token,
                json,
            }) => {
                let response = self
                    .search(&UserId::from(user), query, page_size, page_token)
                    .await?;
                print_response(&response, json)
            }
            Some(Command::Status { space }) => self.status(space).await,
            Some(Command::Config(config_cmd)) => {
                config_handlers::handle_config_command(args.config.as_deref(), config_cmd.command)
            }
            None => {
                println!("{} {}: use --help for usage", self.name, self.version);
                Ok(())
            }
        }
    }

    fn health(&self) -> Result<()> {
        Services::build(&self.config)?;
        println!(
            "{}: healthy ({} backend, {} routed spaces)",
            self.name,
            self.config.search.backend,
            self.config.routes.len()
        );
        Ok(())
    }

    /// Serve HTTP until Ctrl-C, applying pushed events in the background.
    pub async fn serve(&self, host: Option<String>, port: Option<u16>) -> Result<()> {
        let mut config = (*self.config).clone();
        if let Some(host) = host {
            config.server.host = host;
        }
        if let Some(port) = port {
            config.server.port = port;
        }

        let services = Services::build(&config)?;
        let (feed, events) = ChangeFeed::channel(config.events.capacity);
        let ingestor = Arc::clone(&services.ingestor);
        let intake = tokio::spawn(async move { ingestor.run(events).await });

        let address = config.bind_address();
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|e| Error::unavailable(format!("cannot bind {address}: {e}")))?;
        info!("Starting {} {} on {address}", self.name, self.version);

        sift_service::serve(listener, services.state(Some(feed)), shutdown_signal())
            .instrument(tracing::info_span!("http", service = %self.name))
            .await?;

        // The router owned the last feed sender, so intake drains and ends.
        match tokio::time::timeout(Duration::from_secs(10), intake).await {
            Ok(Ok(stats)) => info!("Change intake stopped: {stats:?}"),
            Ok(Err(e)) => warn!("Change intake task failed: {e}"),
            Err(_) => warn!("Change intake did not drain in time"),
        }
        Ok(())
    }

    /// Rebuild `space` from storage; returns the number of indexed resources.
    pub async fn index(&self, space: SpaceId, user: UserId) -> Result<usize> {
        let services = Services::build(&self.config)?;
        services
            .ingestor
            .reindex_space_with_retry(&space, &user)
            .await
    }

    /// Run one aggregate search page.
    pub async fn search(
        &self,
        user: &UserId,
        query: String,
        page_size: Option<i32>,
        page_token: Option<String>,
    ) -> Result<SearchResponse> {
        let services = Services::build(&self.config)?;
        let page_size = page_size.unwrap_or(self.config.search_settings().default_page_size);
        let mut request = SearchRequest::new(query, page_size);
        if let Some(token) = page_token {
            request = request.with_page_token(token);
        }
        services.search.search(user, request).await
    }

    async fn status(&self, space: Option<String>) -> Result<()> {
        let services = Services::build(&self.config)?;
        let spaces = match space {
            Some(space) => vec![SpaceId::from(space)],
            None => self.storage_spaces()?,
        };
        if spaces.is_empty() {
            println!("No spaces found");
            return Ok(());
        }
        for space_id in spaces {
            match services.manager.stats(&space_id).await? {
                Some(stats) => println!(
                    "{}\t{}\tgeneration {}\t{} documents",
                    stats.space_id,
                    stats.state,
                    stats
                        .generation
                        .map_or_else(|| "-".to_string(), |g| g.to_string()),
                    stats.document_count
                ),
                None => println!("{space_id}\tnot indexed"),
            }
        }
        Ok(())
    }

    /// Spaces present under the storage root.
    fn storage_spaces(&self) -> Result<Vec<SpaceId>> {
        let Some(root) = self.config.storage_root() else {
            return Ok(Vec::new());
        };
        let mut spaces: Vec<SpaceId> = std::fs::read_dir(&root)
            .map_err(|e| Error::io_with_path(e, &root))?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().to_str().map(SpaceId::from))
            .collect();
        spaces.sort();
        Ok(spaces)
    }

    /// Directory persisted space indices are written to.
    pub fn index_root(&self) -> Result<PathBuf> {
        Ok(self.config.data_path()?.join("spaces"))
    }
}

fn print_response(response: &SearchResponse, json: bool) -> Result<()> {
    if json {
        let out = serde_json::to_string_pretty(response)
            .map_err(|e| Error::internal(format!("cannot encode response: {e}")))?;
        println!("{out}");
        return Ok(());
    }

    for m in &response.matches {
        println!(
            "{:>8.3}  {}/{}  {}",
            m.score, m.resource.space_id, m.resource.resource_id, m.resource.path
        );
        if let Some(snippet) = &m.snippet {
            println!("          {snippet}");
        }
    }
    println!(
        "{} of {} matches{}",
        response.matches.len(),
        response.total_matches,
        if response.degraded { " (some spaces unavailable)" } else { "" }
    );
    if !response.next_page_token.is_empty() {
        println!("next page: --page-token {}", response.next_page_token);
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Cannot listen for Ctrl-C ({e}); stopping now");
        return;
    }
    info!("Shutdown requested");
}

// ============================================================================
// Tests
// ============================================================================
