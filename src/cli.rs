//! CLI module - Command-line interface definitions and handlers

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{self, WorkerConfig, CACHE_GENERATION, DEFAULT_ORIGIN};
use crate::core::model::{ItemError, Meta, ResultItem, ResultSet};
use crate::core::render::{OutputFormat, RenderConfig, Renderer};
use crate::core::util::{body_excerpt, hash_bytes, HashAlgorithm};
use crate::host::disk::DiskCacheStorage;
use crate::host::http::{Method, Request, Response};
use crate::host::memory::MemoryCacheStorage;
use crate::host::site::SiteNetwork;
use crate::host::DynStorage;
use crate::policy::classify::{classify, should_persist, ResourceClass};
use crate::policy::engine::CachePolicy;
use crate::worker::clients::Clients;
use crate::worker::lifecycle::{
    ActivateReport, FetchEvent, FetchOutcome, InstallReport, PrecacheStatus, WorkerLifecycle,
};
use crate::worker::message::{MessageEvent, ReplyPort};
use crate::worker::tasks::BackgroundTasks;

/// swcache - a cache-first resource worker for a single-page site.
#[derive(Parser, Debug)]
#[command(name = "swcache")]
#[command(
    author,
    version,
    about,
    long_about = r#"swcache runs the caching policy of a single-page site's resource worker
against a local site directory and a persistent cache store.

Every command prints a ResultSet in the selected format (default: jsonl).
Logs go to stderr.

Policy summary:
- install: pre-populate the current generation with every non-audio manifest entry
- activate: delete every cache generation except the current one
- fetch: same-origin audio goes to the network first (cache only on failure);
  everything else is served cache-first, and 200 responses for images,
  .css, .js, .woff2 and .ttf are stored in the background

Examples:
    swcache --site ./public install
    swcache --site ./public fetch /style.css /images/logo.png
    swcache status
    swcache clear
"#
)]
pub struct Cli {
    /// Directory holding the cache store.
    #[arg(
        long,
        global = true,
        default_value = ".swcache",
        value_name = "DIR",
        long_help = "Directory holding the persistent cache store. Each cache generation is a\n\
sub-directory with a meta.json and an entries/ directory."
    )]
    pub store: PathBuf,

    /// Keep the cache in memory for this invocation only.
    #[arg(long, global = true)]
    pub ephemeral: bool,

    /// Site directory served as the worker's origin.
    #[arg(
        long,
        global = true,
        default_value = ".",
        value_name = "DIR",
        long_help = "Directory whose files answer network requests for the worker's origin.\n\
Missing files produce 404 responses."
    )]
    pub site: PathBuf,

    /// The worker's own origin.
    #[arg(
        long,
        global = true,
        default_value = DEFAULT_ORIGIN,
        value_name = "URL",
        long_help = "Origin the worker controls. Requests for any other origin are not\n\
intercepted. Root-relative URLs given to fetch are resolved against it."
    )]
    pub origin: String,

    /// Name of the current cache generation.
    #[arg(
        long,
        global = true,
        default_value = CACHE_GENERATION,
        value_name = "NAME",
        long_help = "Name of the current cache generation. Change it whenever the manifest or\n\
the caching rules change; the next activation deletes every other generation."
    )]
    pub generation: String,

    /// Manifest file replacing the built-in static manifest.
    #[arg(
        long,
        global = true,
        value_name = "FILE",
        long_help = "File listing root-relative URLs to pre-populate: either a JSON array of\n\
strings or one URL per line (# starts a comment)."
    )]
    pub manifest: Option<PathBuf>,

    /// Output format (jsonl/json/md/raw).
    #[arg(long, global = true, default_value = "jsonl", value_name = "FORMAT")]
    pub format: String,

    /// Pretty-print JSON/JSONL output with indentation.
    #[arg(long, global = true)]
    pub pretty: bool,

    /// Quiet mode (warnings and errors only on stderr).
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose mode (debug logging on stderr).
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Open page to register as a client (repeatable).
    #[arg(
        long = "page",
        global = true,
        value_name = "URL",
        long_help = "URL of an open page. Each one is registered as a client named page-1,\n\
page-2, ... and is claimed by the worker when it activates."
    )]
    pub pages: Vec<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Install the worker: pre-populate the cache, then activate.
    #[command(
        long_about = "Run the install event: open the current generation and add every\n\
non-audio manifest entry, each independently. Failed entries are reported but\n\
never stop the install. The worker then skips waiting and activates at once,\n\
deleting every other generation.\n\n\
Example:\n\
  swcache --site ./public install\n"
    )]
    Install,

    /// Delete every cache generation except the current one.
    Activate,

    /// Dispatch fetch events for one or more URLs.
    #[command(
        long_about = "Dispatch a fetch event per URL and report where the response came from\n\
(cache, network, stale-cache) or that the request was not intercepted\n\
(passthrough). URLs may be absolute or root-relative.\n\n\
If the current generation does not exist yet the worker is installed first.\n\n\
Examples:\n\
  swcache fetch /style.css\n\
  swcache fetch /audio/bgm.mp3 --show-body\n"
    )]
    Fetch {
        /// URLs to request.
        #[arg(value_name = "URL", required = true, num_args = 1..)]
        urls: Vec<String>,

        /// Request method.
        #[arg(long, default_value = "GET", value_name = "METHOD")]
        method: String,

        /// Id of the client page issuing the requests (e.g. page-1).
        #[arg(long, value_name = "ID")]
        client: Option<String>,

        /// Include a body excerpt in each result.
        #[arg(long)]
        show_body: bool,

        /// Maximum bytes of body to show.
        #[arg(long, default_value = "4096", value_name = "BYTES")]
        max_bytes: usize,
    },

    /// Send a CLEAR_CACHE control message.
    Clear,

    /// Send an arbitrary JSON control message.
    Message {
        /// JSON payload, e.g. '{"type":"CLEAR_CACHE"}'.
        #[arg(value_name = "JSON")]
        payload: String,
    },

    /// List cache generations and the entries of the current one.
    Status,

    /// Show how paths are classified and whether fetched copies are kept.
    Classify {
        /// URL paths to classify.
        #[arg(value_name = "PATH", required = true, num_args = 1..)]
        paths: Vec<String>,
    },
}

/// Everything a command needs, built once from global flags
struct Session {
    config: Arc<WorkerConfig>,
    storage: DynStorage,
    disk: Option<DiskCacheStorage>,
    policy: Arc<CachePolicy>,
    pages: Vec<String>,
}

impl Session {
    fn build(cli: &Cli) -> Result<Self> {
        let mut config = WorkerConfig::default()
            .with_origin(&cli.origin)?
            .with_generation(cli.generation.clone());
        if let Some(path) = &cli.manifest {
            let manifest = config::load_manifest(path)
                .with_context(|| format!("Failed to load manifest: {:?}", path))?;
            config = config.with_manifest(manifest)?;
        }
        let config = Arc::new(config);

        let disk = (!cli.ephemeral).then(|| DiskCacheStorage::new(&cli.store));
        let storage: DynStorage = match &disk {
            Some(disk) => Arc::new(disk.clone()),
            None => Arc::new(MemoryCacheStorage::new()),
        };
        let network = Arc::new(SiteNetwork::new(&config.origin, &cli.site));
        let policy = Arc::new(CachePolicy::new(
            config.clone(),
            storage.clone(),
            network,
            BackgroundTasks::new(),
        ));

        Ok(Self {
            config,
            storage,
            disk,
            policy,
            pages: cli.pages.clone(),
        })
    }

    fn lifecycle(&self) -> WorkerLifecycle<CachePolicy> {
        let clients = Clients::new();
        for (i, url) in self.pages.iter().enumerate() {
            clients.register(format!("page-{}", i + 1), url);
        }
        WorkerLifecycle::new(
            self.policy.clone(),
            self.config.generation.clone(),
            clients,
        )
    }

    async fn activation_items(
        &self,
        worker: &WorkerLifecycle<CachePolicy>,
        report: &ActivateReport,
    ) -> Result<Vec<ResultItem>> {
        let exists = self.storage.has(&report.generation).await?;
        let controlled = worker.clients().controlled_count(&report.generation);
        Ok(activate_items(report, exists, controlled))
    }

    async fn install(
        &self,
        worker: &WorkerLifecycle<CachePolicy>,
        out: &mut ResultSet,
    ) -> Result<()> {
        let outcome = worker.install().await?;
        out.extend(install_items(&outcome.install));
        if let Some(activate) = &outcome.activate {
            out.extend(self.activation_items(worker, activate).await?);
        }
        Ok(())
    }

    /// A worker ready to intercept: resumed if its generation exists,
    /// installed otherwise
    async fn active_worker(&self, out: &mut ResultSet) -> Result<WorkerLifecycle<CachePolicy>> {
        let worker = self.lifecycle();
        if self.storage.has(&self.config.generation).await? {
            worker.resume()?;
        } else {
            info!(generation = %self.config.generation, "no cache generation yet, installing");
            self.install(&worker, out).await?;
        }
        Ok(worker)
    }
}

fn install_items(report: &InstallReport) -> Vec<ResultItem> {
    report
        .entries
        .iter()
        .map(|entry| match &entry.status {
            PrecacheStatus::Cached => ResultItem::precache(&entry.url, "cached"),
            PrecacheStatus::SkippedAudio => ResultItem::precache(&entry.url, "skipped-audio"),
            PrecacheStatus::Failed(reason) => ResultItem::precache(&entry.url, "failed")
                .with_error(ItemError::new("PRECACHE_FAILED", reason.clone())),
        })
        .collect()
}

/// The current generation is labelled `missing` when activation ran
/// without an install having created it
fn activate_items(report: &ActivateReport, exists: bool, controlled: usize) -> Vec<ResultItem> {
    let label = if exists { "current" } else { "missing" };
    let mut items = vec![ResultItem::generation(&report.generation, label).with_data(
        serde_json::json!({ "claimed": report.claimed, "controlled": controlled }),
    )];
    items.extend(
        report
            .deleted
            .iter()
            .map(|name| ResultItem::generation(name, "deleted")),
    );
    items
}

fn response_meta(response: &Response) -> Meta {
    Meta {
        size: Some(response.body.len() as u64),
        content_type: response.headers.get("content-type").map(str::to_string),
        digest: Some(hash_bytes(&response.body, HashAlgorithm::Sha1)),
        ..Default::default()
    }
}

fn fetch_item(url: &str, outcome: FetchOutcome, show_body: bool, max_bytes: usize) -> ResultItem {
    match outcome {
        FetchOutcome::Passthrough => ResultItem::fetch(url, "passthrough"),
        FetchOutcome::Respond { response, source } => {
            let mut meta = response_meta(&response);
            let mut item = ResultItem::fetch(url, source.as_str()).with_status(response.status);
            if show_body {
                let (excerpt, truncated) = body_excerpt(&response.body, max_bytes);
                meta.truncated = truncated;
                item = item.with_excerpt(excerpt);
            }
            item.with_meta(meta)
        }
        FetchOutcome::Failed(e) => ResultItem::fetch(url, "failed")
            .with_error(ItemError::new("NETWORK_ERROR", e.to_string())),
    }
}

async fn send_message(ctx: &Session, data: serde_json::Value) -> ResultItem {
    let worker = ctx.lifecycle();
    let (port, reply) = ReplyPort::channel();
    worker
        .dispatch_message(MessageEvent {
            data,
            reply: Some(port),
        })
        .await;
    match reply.await {
        Ok(value) => ResultItem::reply(value),
        Err(_) => ResultItem::error(ItemError::new(
            "NO_REPLY",
            "the worker did not acknowledge the message",
        )),
    }
}

async fn status_items(ctx: &Session) -> Result<Vec<ResultItem>> {
    let current = &ctx.config.generation;
    let mut items: Vec<ResultItem> = ctx
        .storage
        .keys()
        .await?
        .into_iter()
        .map(|name| {
            let label = if &name == current { "current" } else { "stale" };
            ResultItem::generation(name, label)
        })
        .collect();

    if let Some(disk) = &ctx.disk {
        if let Some((_, entries)) = disk.inspect(current).await? {
            items.extend(entries.into_iter().map(|entry| {
                let meta = Meta {
                    size: Some(entry.size),
                    content_type: entry.headers.get("content-type").map(str::to_string),
                    digest: Some(entry.digest),
                    cached_at: Some(entry.cached_at.to_rfc3339()),
                    truncated: false,
                };
                ResultItem::entry(entry.url, entry.status).with_meta(meta)
            }));
        }
        return Ok(items);
    }

    if !ctx.storage.has(current).await? {
        return Ok(items);
    }
    let cache = ctx.storage.open(current).await?;
    for key in cache.keys().await? {
        let url = url::Url::parse(&key).with_context(|| format!("Invalid cache key: {}", key))?;
        if let Some(response) = cache.lookup(&Request::get(url)).await? {
            items.push(ResultItem::entry(&key, response.status).with_meta(response_meta(&response)));
        }
    }
    Ok(items)
}

fn classify_item(config: &WorkerConfig, path: &str) -> ResultItem {
    let class = classify(path);
    let precached = class != ResourceClass::Audio && config.manifest.iter().any(|e| e == path);
    ResultItem::class(path, class.as_str()).with_data(serde_json::json!({
        "cache_first": class != ResourceClass::Audio,
        "persist_on_fetch": should_persist(path),
        "precached": precached,
    }))
}

/// Run the CLI with parsed arguments
pub async fn run(cli: Cli) -> Result<()> {
    let format: OutputFormat = cli.format.parse().unwrap_or_default();
    let render_config = RenderConfig::with_pretty(format, cli.pretty);
    let ctx = Session::build(&cli)?;

    let mut result_set = ResultSet::new();
    match cli.command {
        Commands::Install => {
            let worker = ctx.lifecycle();
            ctx.install(&worker, &mut result_set).await?;
        }

        Commands::Activate => {
            let worker = ctx.lifecycle();
            worker.resume_waiting()?;
            let report = worker.activate().await?;
            result_set.extend(ctx.activation_items(&worker, &report).await?);
        }

        Commands::Fetch {
            urls,
            method,
            client,
            show_body,
            max_bytes,
        } => {
            let method: Method = method.parse().unwrap_or(Method::Get);
            let worker = ctx.active_worker(&mut result_set).await?;
            for input in &urls {
                let url = ctx
                    .config
                    .resolve(input)
                    .with_context(|| format!("Invalid URL: {}", input))?;
                let request = Request::get(url).with_method(method.clone());
                let shown = request.url.to_string();
                let mut event = FetchEvent::new(request);
                if let Some(id) = &client {
                    event = event.with_client(id.clone());
                }
                let outcome = worker.dispatch_fetch(event).await;
                result_set.push(fetch_item(&shown, outcome, show_body, max_bytes));
            }
        }

        Commands::Clear => {
            let item = send_message(&ctx, serde_json::json!({ "type": "CLEAR_CACHE" })).await;
            result_set.push(item);
        }

        Commands::Message { payload } => {
            let data: serde_json::Value =
                serde_json::from_str(&payload).context("Message payload is not valid JSON")?;
            result_set.push(send_message(&ctx, data).await);
        }

        Commands::Status => result_set.extend(status_items(&ctx).await?),

        Commands::Classify { paths } => {
            result_set.extend(paths.iter().map(|p| classify_item(&ctx.config, p)));
        }
    }

    ctx.policy.tasks().drain().await;

    let renderer = Renderer::with_config(render_config);
    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    renderer.render_to(&result_set, &mut handle)?;
    handle.flush()?;

    if result_set.has_errors() {
        warn!("some operations failed; see the errors in the output");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::NetworkError;
    use crate::worker::lifecycle::ResponseSource;

    #[test]
    fn test_cli_parses_fetch() {
        let cli = Cli::try_parse_from([
            "swcache",
            "--site",
            "public",
            "fetch",
            "/style.css",
            "/a.png",
            "--show-body",
        ])
        .unwrap();
        assert_eq!(cli.site, PathBuf::from("public"));
        assert_eq!(cli.generation, "pupu-cosmos-v1");
        match cli.command {
            Commands::Fetch {
                urls, show_body, ..
            } => {
                assert_eq!(urls, vec!["/style.css", "/a.png"]);
                assert!(show_body);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_cli_fetch_requires_url() {
        assert!(Cli::try_parse_from(["swcache", "fetch"]).is_err());
    }

    #[test]
    fn test_fetch_item_labels() {
        let item = fetch_item(
            "http://localhost:8080/a.css",
            FetchOutcome::Respond {
                response: Response::new(200, "h1 {}"),
                source: ResponseSource::Cache,
            },
            true,
            2,
        );
        assert_eq!(item.outcome.as_deref(), Some("cache"));
        assert_eq!(item.status, Some(200));
        assert_eq!(item.excerpt.as_deref(), Some("h1"));
        assert!(item.meta.truncated);

        let failed = fetch_item(
            "http://localhost:8080/a.mp3",
            FetchOutcome::Failed(NetworkError::Unreachable("offline".into())),
            false,
            0,
        );
        assert_eq!(failed.errors[0].code, "NETWORK_ERROR");
    }

    #[test]
    fn test_activate_items_labels_missing_generation() {
        let report = ActivateReport {
            generation: "v2".into(),
            deleted: vec!["v1".into()],
            claimed: 1,
        };
        let items = activate_items(&report, false, 1);
        assert_eq!(items[0].outcome.as_deref(), Some("missing"));
        assert_eq!(items[0].data.as_ref().unwrap()["controlled"], 1);
        assert_eq!(items[1].generation.as_deref(), Some("v1"));
        assert_eq!(items[1].outcome.as_deref(), Some("deleted"));

        let items = activate_items(&report, true, 0);
        assert_eq!(items[0].outcome.as_deref(), Some("current"));
    }

    #[test]
    fn test_classify_item() {
        let config = WorkerConfig::default();
        let item = classify_item(&config, "/style.css");
        assert_eq!(item.outcome.as_deref(), Some("static"));
        let data = item.data.unwrap();
        assert_eq!(data["persist_on_fetch"], true);
        assert_eq!(data["precached"], true);

        let audio = classify_item(&config, "/audio/bgm.mp3").data.unwrap();
        assert_eq!(audio["cache_first"], false);
        assert_eq!(audio["precached"], false);
    }
}
