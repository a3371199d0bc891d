use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context as _, Result};
use reqwest::Url;
use serde::Serialize;
use statpull_lib::{
    Aggregator, Collection, DispatchStats, Dispatcher, ErrorKind, RetryPolicy, RunSummary,
};

use crate::options::Config;
use crate::platform::{Match, Platform, StatLine, Team};

/// Records of one team, merged by the aggregator
type TeamBatch = (Vec<Team>, Vec<Match>, Vec<StatLine>);

/// Everything a collection run produced
#[derive(Debug, Serialize)]
pub(crate) struct Report {
    pub(crate) teams: Collection<Team>,
    pub(crate) matches: Collection<Match>,
    pub(crate) stats: Collection<StatLine>,
    pub(crate) summary: RunSummary,
    pub(crate) dispatch: DispatchStats,
    pub(crate) duration_secs: u64,
}

/// Handles shared by all aggregation workers
struct Sources {
    platform: Platform,
    dispatcher: Dispatcher,
    retry: RetryPolicy,
}

impl Sources {
    /// Fetch a team and its matches.
    ///
    /// Every request goes through the rate-limited dispatcher and is retried
    /// while the platform throttles us.
    async fn team(&self, id: String) -> statpull_lib::Result<TeamBatch> {
        let team = self
            .retry
            .call_with_retry(|| {
                let platform = self.platform.clone();
                let id = id.clone();
                self.dispatcher
                    .submit_with_id(format!("team {id}"), move || async move {
                        Ok(platform.team(&id).await)
                    })
            })
            .await
            .ok_or_else(|| ErrorKind::call(format!("no team data for `{id}`")))?;

        let payloads = self
            .retry
            .call_with_retry(|| {
                let platform = self.platform.clone();
                let id = id.clone();
                self.dispatcher
                    .submit_with_id(format!("matches {id}"), move || async move {
                        Ok(platform.matches(&id).await)
                    })
            })
            .await
            .ok_or_else(|| ErrorKind::call(format!("no match data for `{id}`")))?;

        let mut matches = Vec::with_capacity(payloads.len());
        let mut lines = Vec::new();
        for payload in payloads {
            let (record, stat_lines) = payload.into_records();
            matches.push(record);
            lines.extend(stat_lines);
        }
        log::info!(
            "Team {id}: {} match(es), {} stat line(s)",
            matches.len(),
            lines.len()
        );
        Ok((vec![team], matches, lines))
    }
}

/// Collect the given teams, their matches and the players' stat lines
pub(crate) async fn collect(team_ids: Vec<String>, cfg: &Config) -> Result<Report> {
    let base_url = cfg
        .base_url
        .as_deref()
        .context("No base URL given. Use `--base-url` or set `base_url` in the config file")?;
    let base_url =
        Url::parse(base_url).with_context(|| format!("Invalid base URL `{base_url}`"))?;
    let platform = Platform::new(base_url, &cfg.user_agent, cfg.timeout)?;

    let dispatcher = Dispatcher::new(cfg.dispatcher_config())?;
    let retry = RetryPolicy::from_config(&cfg.retry_config())?;
    let aggregator = Aggregator::new(cfg.aggregator_config());

    let guard = dispatcher.scoped();
    let sources = Arc::new(Sources {
        platform,
        dispatcher: dispatcher.clone(),
        retry,
    });

    let start = Instant::now();
    let harvest = aggregator
        .run(team_ids, move |id: String| {
            let sources = Arc::clone(&sources);
            async move { sources.team(id).await }
        })
        .await?;
    guard.stop().await;

    let (teams, matches, stats) = harvest.collections;
    Ok(Report {
        teams,
        matches,
        stats,
        summary: harvest.summary,
        dispatch: dispatcher.stats(),
        duration_secs: start.elapsed().as_secs(),
    })
}
