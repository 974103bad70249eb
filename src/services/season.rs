//! Season orchestration.
//!
//! A run is three sequential phases, each fanning out one task per entity:
//!
//! 1. **Teams**: fetch the season's team listing, then every team page.
//! 2. **Riders**: fetch every rider on a retained team's roster.
//! 3. **Races**: fetch every race with its start list and stage pages, and
//!    resolve results against the teams and riders of phases 1 and 2.
//!
//! The whole run shares one deadline. When it passes, the run's cancellation
//! token fires, which ends every outstanding fetch-retry loop, and the run
//! fails with `DeadlineExceeded`. No partial snapshot is ever returned.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::try_join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::ScrapeConfig;
use crate::entities::{Race, Rider, Snapshot};
use crate::errors::ScrapeError;
use crate::extract::{
    RawRace, RawRosterEntry, RawStage, RawTeam, RawTeamParticipation, RecordExtractor,
};
use crate::services::assembler::{self, RaceAssembler};
use crate::services::cache::{DocumentCache, FsDocumentCache};
use crate::services::fetcher::{DocumentFetcher, PageOptions, ParsedDocument};
use crate::services::resolver::{season_aliases, LenientResolver, StrictResolver};

/// Consumer of a finished snapshot (file writer, database, object store…).
#[async_trait]
pub trait SnapshotExporter: Send + Sync {
    async fn export(&self, snapshot: &Snapshot) -> Result<(), ScrapeError>;
}

/// Runs one season scrape and hands the snapshot to exporters.
pub struct SeasonScraper<E: RecordExtractor + 'static> {
    config: ScrapeConfig,
    extractor: Arc<E>,
    fetcher: DocumentFetcher,
    base_url: Url,
    team_aliases: Vec<(String, Option<String>)>,
    exporters: Vec<Arc<dyn SnapshotExporter>>,
}

impl<E: RecordExtractor + 'static> SeasonScraper<E> {
    /// Build a scraper from configuration. A filesystem cache is attached
    /// when `cache_dir` is set, and the season's built-in team aliases are
    /// loaded.
    pub fn new(config: ScrapeConfig, extractor: E) -> Result<Self, ScrapeError> {
        let base_url = Url::parse(&config.base_url)?;
        let client = DocumentFetcher::build_client(&config.user_agent)?;

        let mut fetcher = DocumentFetcher::new(client, config.retry_delay)
            .with_empty_page_predicate(extractor.empty_page_predicate());
        if let Some(dir) = &config.cache_dir {
            fetcher = fetcher.with_cache(Arc::new(FsDocumentCache::new(dir)), config.skip_cache);
        }

        let team_aliases = season_aliases(config.season)
            .iter()
            .map(|(from, to)| (from.to_string(), to.map(str::to_string)))
            .collect();

        Ok(Self {
            config,
            extractor: Arc::new(extractor),
            fetcher,
            base_url,
            team_aliases,
            exporters: Vec::new(),
        })
    }

    /// Replace the configured cache (e.g. with an in-memory one).
    pub fn with_cache(mut self, cache: Arc<dyn DocumentCache>) -> Self {
        self.fetcher = self.fetcher.with_cache(cache, self.config.skip_cache);
        self
    }

    /// Add team id aliases on top of the built-in ones.
    pub fn with_team_aliases<K, V>(mut self, aliases: impl IntoIterator<Item = (K, Option<V>)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.team_aliases
            .extend(aliases.into_iter().map(|(from, to)| (from.into(), to.map(Into::into))));
        self
    }

    pub fn with_exporter(mut self, exporter: Arc<dyn SnapshotExporter>) -> Self {
        self.exporters.push(exporter);
        self
    }

    pub fn config(&self) -> &ScrapeConfig {
        &self.config
    }

    /// Scrape the configured season under the run deadline.
    pub async fn run(&self) -> Result<Snapshot, ScrapeError> {
        let cancel = CancellationToken::new();
        // Cancels on every exit path, so tasks detached by an early failure
        // stop retrying as well.
        let _cancel_on_exit = cancel.clone().drop_guard();

        let site = Arc::new(Site {
            extractor: Arc::clone(&self.extractor),
            fetcher: self.fetcher.clone().with_cancellation(cancel.clone()),
            base_url: self.base_url.clone(),
        });

        let timeout = self.config.scrape_timeout;
        match tokio::time::timeout(timeout, self.scrape(site)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::error!(
                    "Scrape: season {} did not finish within {:?}",
                    self.config.season,
                    timeout
                );
                Err(ScrapeError::DeadlineExceeded(timeout))
            }
        }
    }

    /// Hand a snapshot to every exporter concurrently.
    pub async fn export(&self, snapshot: &Snapshot) -> Result<(), ScrapeError> {
        try_join_all(self.exporters.iter().map(|e| e.export(snapshot))).await?;
        tracing::info!("Scrape: snapshot exported to {} sinks", self.exporters.len());
        Ok(())
    }

    async fn scrape(&self, site: Arc<Site<E>>) -> Result<Snapshot, ScrapeError> {
        let season = self.config.season;

        // --- Teams ---
        tracing::info!("Scrape: scraping teams for {} season", season);
        let raw_teams = self.scrape_teams(&site).await?;
        let mut teams = Vec::with_capacity(raw_teams.len());
        let mut rosters: Vec<RawRosterEntry> = Vec::new();
        for raw in &raw_teams {
            if let Some(team) = assembler::build_team(raw)? {
                rosters.extend(raw.roster.iter().cloned());
                teams.push(team);
            }
        }
        assembler::sort_teams(&mut teams);
        tracing::info!("Scrape: {} teams", teams.len());

        // --- Riders ---
        tracing::info!("Scrape: scraping riders for {} season", season);
        let mut riders = self.scrape_riders(&site, rosters).await?;
        assembler::sort_riders(&mut riders);
        tracing::info!("Scrape: {} riders", riders.len());

        // --- Races ---
        tracing::info!("Scrape: scraping races for {} season", season);
        let team_resolver = Arc::new(
            StrictResolver::from_teams(&teams)
                .with_aliases(self.team_aliases.iter().cloned())
                .with_policy(self.config.unknown_team_policy),
        );
        let rider_resolver = Arc::new(LenientResolver::from_riders(&riders));
        let mut races = self
            .scrape_races(&site, team_resolver, rider_resolver)
            .await?;
        assembler::sort_races(&mut races);
        tracing::info!("Scrape: {} races", races.len());

        Ok(Snapshot {
            teams,
            riders,
            races,
        })
    }

    async fn scrape_teams(&self, site: &Arc<Site<E>>) -> Result<Vec<RawTeam>, ScrapeError> {
        let index = site
            .page(&self.extractor.teams_index_path(self.config.season))
            .await?;
        let team_paths = self.extractor.team_urls(&index.html());

        let handles = team_paths
            .into_iter()
            .map(|path| {
                let site = Arc::clone(site);
                tokio::spawn(async move {
                    let doc = site.page(&path).await?;
                    let page = doc.html();
                    site.extractor.team(&path, &page)
                })
            })
            .collect();
        join_phase(handles).await
    }

    async fn scrape_riders(
        &self,
        site: &Arc<Site<E>>,
        rosters: Vec<RawRosterEntry>,
    ) -> Result<Vec<Rider>, ScrapeError> {
        // A rider transferred mid-season can appear on two rosters.
        let mut seen = HashSet::new();
        let entries: Vec<RawRosterEntry> = rosters
            .into_iter()
            .filter(|entry| seen.insert(assembler::rider_id(&entry.rider_url)))
            .collect();

        let handles = entries
            .into_iter()
            .map(|entry| {
                let site = Arc::clone(site);
                tokio::spawn(async move {
                    let doc = site.page(&entry.rider_url).await?;
                    let raw = {
                        let page = doc.html();
                        site.extractor.rider(&entry.rider_url, &page)?
                    };
                    assembler::build_rider(&raw, Some(&entry.full_name), &site.base_url)
                })
            })
            .collect();
        join_phase(handles).await
    }

    async fn scrape_races(
        &self,
        site: &Arc<Site<E>>,
        teams: Arc<StrictResolver>,
        riders: Arc<LenientResolver>,
    ) -> Result<Vec<Race>, ScrapeError> {
        let season = self.config.season;
        let index = site.page(&self.extractor.races_index_path(season)).await?;
        let race_paths = self.extractor.race_urls(&index.html(), season);

        let event_offset = self.config.event_offset;
        let handles = race_paths
            .into_iter()
            .map(|path| {
                let site = Arc::clone(site);
                let teams = Arc::clone(&teams);
                let riders = Arc::clone(&riders);
                tokio::spawn(async move {
                    let (raw, stages, start_list) = site.race_pages(&path).await?;
                    RaceAssembler::new(&teams, &riders, event_offset)
                        .build_race(&raw, &stages, &start_list)
                })
            })
            .collect();
        join_phase(handles).await
    }
}

/// What every phase task needs to fetch and extract a page.
struct Site<E> {
    extractor: Arc<E>,
    fetcher: DocumentFetcher,
    base_url: Url,
}

impl<E: RecordExtractor> Site<E> {
    async fn page(&self, path: &str) -> Result<ParsedDocument, ScrapeError> {
        let url = self.base_url.join(path)?;
        self.fetcher.get_document(&url, PageOptions::default()).await
    }

    /// Race page, its stage pages (fetched concurrently) and its start list.
    async fn race_pages(
        &self,
        path: &str,
    ) -> Result<(RawRace, Vec<RawStage>, Vec<RawTeamParticipation>), ScrapeError> {
        let doc = self.page(path).await?;
        let raw = {
            let page = doc.html();
            self.extractor.race(path, &page)?
        };

        let start_list = match &raw.start_list_url {
            Some(start_list_path) => {
                let doc = self.page(start_list_path).await?;
                let page = doc.html();
                self.extractor.start_list(start_list_path, &page)?
            }
            None => Vec::new(),
        };

        let single_day = raw.is_single_day();
        let stage_links: Vec<(String, Option<String>)> = if single_day {
            vec![(self.extractor.single_day_result_path(&raw.url), None)]
        } else {
            raw.stages
                .iter()
                .map(|link| (link.url.clone(), link.parcours.clone()))
                .collect()
        };
        tracing::info!("Scrape: race {} with {} stages", raw.name, stage_links.len());

        let stages = try_join_all(stage_links.iter().map(|(stage_path, parcours)| async move {
            let doc = self.page(stage_path).await?;
            let page = doc.html();
            let mut stage = self.extractor.stage(stage_path, &page, single_day)?;
            if stage.parcours.is_none() {
                stage.parcours = parcours.clone();
            }
            Ok::<RawStage, ScrapeError>(stage)
        }))
        .await?;

        Ok((raw, stages, start_list))
    }
}

/// Await every task of a phase, failing on the first error.
async fn join_phase<T>(
    handles: Vec<JoinHandle<Result<T, ScrapeError>>>,
) -> Result<Vec<T>, ScrapeError> {
    try_join_all(handles.into_iter().map(|handle| async move {
        match handle.await {
            Ok(result) => result,
            Err(e) => Err(ScrapeError::Task(e)),
        }
    }))
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::cache::MemoryDocumentCache;
    use crate::services::fetcher::{BlankBody, EmptyPagePredicate};
    use crate::extract::RawRider;
    use scraper::Html;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Extractor for a site with no teams and no races.
    struct EmptySeason;

    impl RecordExtractor for EmptySeason {
        fn teams_index_path(&self, season: i32) -> String {
            format!("teams.php?year={}", season)
        }

        fn races_index_path(&self, season: i32) -> String {
            format!("races.php?season={}", season)
        }

        fn empty_page_predicate(&self) -> Arc<dyn EmptyPagePredicate> {
            Arc::new(BlankBody)
        }

        fn team_urls(&self, _index: &Html) -> Vec<String> {
            Vec::new()
        }

        fn team(&self, url: &str, _page: &Html) -> Result<RawTeam, ScrapeError> {
            Err(ScrapeError::extraction(url, "unexpected"))
        }

        fn rider(&self, url: &str, _page: &Html) -> Result<RawRider, ScrapeError> {
            Err(ScrapeError::extraction(url, "unexpected"))
        }

        fn race_urls(&self, _index: &Html, _season: i32) -> Vec<String> {
            Vec::new()
        }

        fn race(&self, url: &str, _page: &Html) -> Result<RawRace, ScrapeError> {
            Err(ScrapeError::extraction(url, "unexpected"))
        }

        fn start_list(
            &self,
            url: &str,
            _page: &Html,
        ) -> Result<Vec<RawTeamParticipation>, ScrapeError> {
            Err(ScrapeError::extraction(url, "unexpected"))
        }

        fn stage(&self, url: &str, _page: &Html, _single_day: bool) -> Result<RawStage, ScrapeError> {
            Err(ScrapeError::extraction(url, "unexpected"))
        }
    }

    #[derive(Default)]
    struct CountingExporter {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SnapshotExporter for CountingExporter {
        async fn export(&self, _snapshot: &Snapshot) -> Result<(), ScrapeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingExporter;

    #[async_trait]
    impl SnapshotExporter for FailingExporter {
        async fn export(&self, _snapshot: &Snapshot) -> Result<(), ScrapeError> {
            Err(ScrapeError::Export("disk full".to_string()))
        }
    }

    fn config(server: &MockServer) -> ScrapeConfig {
        let mut config = ScrapeConfig::new(2025);
        config.base_url = server.uri();
        config.retry_delay = Duration::from_millis(20);
        config
    }

    #[tokio::test]
    async fn test_empty_season() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<p>index</p>"))
            .mount(&server)
            .await;

        let scraper = SeasonScraper::new(config(&server), EmptySeason).unwrap();
        let snapshot = scraper.run().await.unwrap();

        assert_eq!(snapshot, Snapshot::default());
        assert_eq!(server.received_requests().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_deadline_exceeded_stops_fetching() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/teams.php"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let mut config = config(&server);
        config.scrape_timeout = Duration::from_millis(200);
        let scraper = SeasonScraper::new(config, EmptySeason).unwrap();

        let err = scraper.run().await.unwrap_err();
        assert!(matches!(err, ScrapeError::DeadlineExceeded(d) if d == Duration::from_millis(200)));

        let after_deadline = server.received_requests().await.unwrap().len();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(server.received_requests().await.unwrap().len(), after_deadline);
    }

    #[tokio::test]
    async fn test_second_run_served_from_cache() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<p>index</p>"))
            .expect(2)
            .mount(&server)
            .await;

        let cache = Arc::new(MemoryDocumentCache::new());
        let scraper = SeasonScraper::new(config(&server), EmptySeason)
            .unwrap()
            .with_cache(cache.clone());

        scraper.run().await.unwrap();
        scraper.run().await.unwrap();
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn test_export_runs_every_exporter() {
        let counting = Arc::new(CountingExporter::default());
        let scraper = SeasonScraper::new(ScrapeConfig::new(2025), EmptySeason)
            .unwrap()
            .with_exporter(counting.clone())
            .with_exporter(counting.clone());

        scraper.export(&Snapshot::default()).await.unwrap();
        assert_eq!(counting.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_export_failure_propagates() {
        let scraper = SeasonScraper::new(ScrapeConfig::new(2025), EmptySeason)
            .unwrap()
            .with_exporter(Arc::new(CountingExporter::default()))
            .with_exporter(Arc::new(FailingExporter));

        let err = scraper.export(&Snapshot::default()).await.unwrap_err();
        assert!(matches!(err, ScrapeError::Export(_)));
    }

    #[test]
    fn test_builtin_aliases_follow_season() {
        let scraper = SeasonScraper::new(ScrapeConfig::new(2025), EmptySeason).unwrap();
        assert!(scraper.team_aliases.is_empty());

        let scraper = SeasonScraper::new(ScrapeConfig::new(2023), EmptySeason).unwrap();
        assert!(scraper
            .team_aliases
            .contains(&("switzerland-2023".to_string(), None)));
    }

    #[test]
    fn test_invalid_base_url() {
        let mut config = ScrapeConfig::new(2025);
        config.base_url = "not a url".to_string();
        assert!(matches!(
            SeasonScraper::new(config, EmptySeason),
            Err(ScrapeError::Url(_))
        ));
    }
}
