use std::collections::BTreeSet;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::client::WikiApi;
use crate::fetch::PageFetcher;
use crate::mirror::MirrorLayout;
use crate::names::{normalize_to_local, to_local};

pub const DEFAULT_STOPPING_THRESHOLD: usize = 100;
pub const DEFAULT_THROTTLE_MS: u64 = 50;

#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Stop the update sweep after this many consecutive up-to-date pages. Zero walks the
    /// whole list.
    pub stopping_threshold: usize,
    pub throttle: Duration,
    pub abort_on_attachment_error: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            stopping_threshold: DEFAULT_STOPPING_THRESHOLD,
            throttle: Duration::from_millis(DEFAULT_THROTTLE_MS),
            abort_on_attachment_error: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    #[default]
    Incremental,
    Override,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct SyncReport {
    pub mode: SyncMode,
    pub remote_pages: usize,
    pub local_pages: usize,
    pub downloaded: usize,
    pub up_to_date: usize,
    pub stopped_early: bool,
    pub missing: Vec<String>,
    pub missing_downloaded: usize,
    pub deleted: Vec<String>,
    pub failures: Vec<String>,
    pub attachment_failures: Vec<String>,
    pub attachments_saved: usize,
    pub request_count: usize,
}

/// Run one mirror pass. When an override list is given only those pages are fetched.
pub fn mirror_site<A: WikiApi>(
    api: &mut A,
    layout: &MirrorLayout,
    options: &SyncOptions,
    override_pages: Option<&[String]>,
) -> Result<SyncReport> {
    layout.ensure_root()?;
    match override_pages {
        Some(pages) => fetch_override(api, layout, options, pages),
        None => sync_incremental(api, layout, options),
    }
}

/// Fetch an explicit page list unconditionally, in first-seen order.
pub fn fetch_override<A: WikiApi>(
    api: &mut A,
    layout: &MirrorLayout,
    options: &SyncOptions,
    pages: &[String],
) -> Result<SyncReport> {
    let pages = dedupe_pages(pages);
    log::info!("Downloading {} override pages...", pages.len());

    let mut report = SyncReport {
        mode: SyncMode::Override,
        ..SyncReport::default()
    };
    let mut fetcher = new_fetcher(api, layout, options);
    for page in &pages {
        if fetcher.fetch(page, false)? {
            report.downloaded += 1;
        }
    }
    finish(report, fetcher)
}

/// Update sweep, missing-page sweep and deletion sweep against the full remote listing.
pub fn sync_incremental<A: WikiApi>(
    api: &mut A,
    layout: &MirrorLayout,
    options: &SyncOptions,
) -> Result<SyncReport> {
    log::info!("Get list of all pages, sorted from most- to least-recently-updated");
    let remote_pages: Vec<String> = api
        .list_pages_newest_first()
        .context("failed to list remote pages")?
        .iter()
        .map(|name| to_local(name))
        .collect();

    let mut report = SyncReport {
        remote_pages: remote_pages.len(),
        ..SyncReport::default()
    };
    let mut fetcher = new_fetcher(api, layout, options);

    log::info!("Downloading recently updated pages...");
    let mut consecutive_current = 0usize;
    for page in &remote_pages {
        if fetcher.fetch(page, true)? {
            report.downloaded += 1;
            consecutive_current = 0;
            continue;
        }
        report.up_to_date += 1;
        consecutive_current += 1;
        if options.stopping_threshold > 0 && consecutive_current > options.stopping_threshold {
            report.stopped_early = true;
            log::info!("      {} pages downloaded", report.downloaded);
            log::info!(
                "      Ending downloads. {} up-to-date pages found",
                options.stopping_threshold
            );
            break;
        }
    }

    log::info!("Creating list of local files");
    let local_pages = layout.list_local_pages()?;
    report.local_pages = local_pages.len();
    let plan = plan_sweeps(&remote_pages, &local_pages);

    log::info!("Downloading missing pages...");
    if plan.missing.is_empty() {
        log::info!("   There are no missing pages");
    }
    for page in &plan.missing {
        if fetcher.fetch(page, true)? {
            report.missing_downloaded += 1;
        }
    }
    report.missing = plan.missing;

    log::info!("Removing deleted pages...");
    if plan.deleted.is_empty() {
        log::info!("   There are no pages to delete");
    }
    for page in &plan.deleted {
        log::info!("   Removing: {page}");
        layout.remove_page(page)?;
    }
    report.deleted = plan.deleted;

    finish(report, fetcher)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepPlan {
    /// Remote pages with no local content file, in remote order.
    pub missing: Vec<String>,
    /// Local pages absent from the remote listing, sorted.
    pub deleted: Vec<String>,
}

/// Set differences between the remote listing and the local mirror, both in local-name form.
pub fn plan_sweeps(remote_pages: &[String], local_pages: &[String]) -> SweepPlan {
    let remote: BTreeSet<&str> = remote_pages.iter().map(String::as_str).collect();
    let local: BTreeSet<&str> = local_pages.iter().map(String::as_str).collect();

    let mut seen = BTreeSet::new();
    let missing = remote_pages
        .iter()
        .filter(|page| !local.contains(page.as_str()))
        .filter(|page| seen.insert(page.as_str()))
        .cloned()
        .collect();
    let deleted = local
        .iter()
        .filter(|page| !remote.contains(*page))
        .map(|page| page.to_string())
        .collect();

    SweepPlan { missing, deleted }
}

/// Normalize to local form and drop repeats, keeping the first occurrence.
pub fn dedupe_pages(pages: &[String]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut output = Vec::with_capacity(pages.len());
    for page in pages {
        let local = normalize_to_local(page);
        if local.is_empty() {
            continue;
        }
        if seen.insert(local.clone()) {
            output.push(local);
        }
    }
    output
}

fn new_fetcher<'a, A: WikiApi>(
    api: &'a mut A,
    layout: &'a MirrorLayout,
    options: &SyncOptions,
) -> PageFetcher<'a, A> {
    PageFetcher::new(
        api,
        layout,
        options.throttle,
        options.abort_on_attachment_error,
    )
}

fn finish<A: WikiApi>(mut report: SyncReport, fetcher: PageFetcher<'_, A>) -> Result<SyncReport> {
    report.request_count = fetcher.request_count();
    let log = fetcher.into_log();
    report.failures = log.failures;
    report.attachment_failures = log.attachment_failures;
    report.attachments_saved = log.attachments_saved;
    log::info!("Done");
    Ok(report)
}
