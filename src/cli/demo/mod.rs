//! Demo command - runs the group scenario through a cached model

use std::sync::Arc;

use chrono::{DateTime, Utc};
use clap::Args;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::domain::cache::CacheEventKind;
use crate::domain::model::{FindArgs, ModelEntity, SortOrder, UpdateArgs};
use crate::domain::DomainError;
use crate::infrastructure::cache::{CacheFacade, CacheFactory, FetchCache, SingleFlight};
use crate::infrastructure::logging;
use crate::infrastructure::metrics;
use crate::infrastructure::model::{CachedModel, ModelFactory, StoreKind};

#[derive(Debug, Args)]
pub struct DemoArgs {
    /// Store groups in PostgreSQL (see `database.url`)
    #[arg(long)]
    pub postgres: bool,

    /// Install the Prometheus recorder and print the scrape output
    #[arg(long)]
    pub metrics: bool,
}

/// A community group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
    pub name: String,
    pub members: u32,
    pub created_at: DateTime<Utc>,
}

impl Group {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            members: 1,
            created_at: Utc::now(),
        }
    }
}

impl ModelEntity for Group {
    const MODEL: &'static str = "Group";
    const FIELDS: &'static [&'static str] = &["id", "name", "members", "created_at"];

    fn id(&self) -> &str {
        &self.id
    }
}

/// Run the demo scenario
pub async fn run(args: DemoArgs) -> anyhow::Result<()> {
    let mut config = AppConfig::load().unwrap_or_default();

    if args.postgres {
        config.models.store = StoreKind::Postgres;
    }
    if args.metrics {
        config.metrics.enabled = true;
    }

    logging::init_logging(&config.logging)?;
    let prometheus = metrics::init_metrics(&config.metrics);

    let cache = CacheFactory::new().create(&config.cache)?;
    cache.on(CacheEventKind::Del, |event| {
        info!(key = ?event.key, "Cache entry removed");
    });

    let mut factory = ModelFactory::new(cache.clone()).with_use_cache(config.models.use_cache);
    if let Some(ttl) = config.models.ttl() {
        factory = factory.with_ttl(ttl);
    }
    if config.models.store == StoreKind::Postgres {
        factory = factory.with_pool(config.database.connect().await?);
    }

    let groups = Arc::new(factory.create::<Group>().await?);

    run_scenario(&groups).await?;
    run_fetch(&cache, &groups).await?;

    let summary: SingleFlight<u64, DomainError> = SingleFlight::new();
    let total = {
        let groups = groups.clone();
        summary
            .get(move || async move { groups.count(&FindArgs::new()).await })
            .await?
    };
    println!("groups stored: {}", total);

    print_report(&cache, &groups);

    if let Some(prometheus) = prometheus {
        println!("\n{}", prometheus.render());
    }

    cache.disconnect().await?;
    Ok(())
}

async fn run_scenario(groups: &CachedModel<Group>) -> anyhow::Result<()> {
    let gardening = groups.create(Group::new("Gardening")).await?;
    groups.create(Group::new("Chess")).await?;

    let by_name = FindArgs::new().order_by("name", SortOrder::Asc);
    let listed = groups.find_many(&by_name).await?;
    info!(count = listed.len(), "Listed groups");

    groups.find_many(&by_name).await?;
    groups.find_by_id(&gardening.id).await?;

    let renamed = groups
        .update(&UpdateArgs::by_id(&gardening.id).set("name", "Gardening Club"))
        .await?;
    info!(id = %renamed.id, name = %renamed.name, "Renamed group");

    let relisted = groups.find_many(&by_name).await?;
    for group in &relisted {
        println!("{:<16} {:>3} members  {}", group.name, group.members, group.id);
    }

    Ok(())
}

async fn run_fetch(cache: &Arc<CacheFacade>, groups: &Arc<CachedModel<Group>>) -> anyhow::Result<()> {
    let source = groups.clone();
    let sizes: FetchCache<u32> = FetchCache::new(cache.clone(), move |key: String| {
        let groups = source.clone();
        async move {
            let id = key.trim_start_matches("GroupSize:");
            let group = groups.find_by_id(id).await?;
            Ok::<_, DomainError>(group.map(|group| group.members))
        }
    });

    let Some(first) = groups.find_first(&FindArgs::new()).await? else {
        return Ok(());
    };
    let key = format!("GroupSize:{}", first.id);

    for _ in 0..2 {
        let fetched = sizes.get_with_details(&key).await?;
        println!(
            "{} -> {:?} from {:?} ({:?})",
            key, fetched.value, fetched.source, fetched.cached_for
        );
    }

    Ok(())
}

fn print_report(cache: &CacheFacade, groups: &CachedModel<Group>) {
    let stats = cache.stats();
    println!(
        "\ncache {}: hits={} misses={} added={} deleted={} cleared={} hit_ratio={:.2}",
        cache.name(),
        stats.hits,
        stats.misses,
        stats.added,
        stats.deleted,
        stats.cleared,
        stats.hit_ratio()
    );

    for (operation, timing) in groups.latency_report() {
        println!(
            "{:<24} runs={:<3} avg={:?} longest={:?}",
            operation, timing.runs, timing.average, timing.longest
        );
    }
}
