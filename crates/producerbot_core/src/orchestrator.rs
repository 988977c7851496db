use anyhow::{Context, Result};
use serde::Serialize;
use similar::TextDiff;
use tracing::{debug, info, warn};

use crate::config::BotConfig;
use crate::dpl::{album_query, extract_titles, song_query};
use crate::error::PageError;
use crate::mediawiki::{CategoryMembersRequest, Paginator, ProducerPage, ProducerWikiApi};
use crate::merge::{merge_albums, merge_songs};
use crate::producer::producer_category;
use crate::transclusion::{AlbumCandidate, untranscluded_albums, untranscluded_songs};

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub producers_category: String,
    pub compilation_category: String,
    pub edit_summary: String,
    pub page_size: usize,
    /// Start the category walk at this sort key prefix.
    pub start_from: Option<String>,
    /// Process this page only instead of walking the category.
    pub only_page: Option<String>,
    pub dry_run: bool,
    pub capture_diffs: bool,
}

impl RunOptions {
    pub fn from_config(config: &BotConfig) -> Self {
        Self {
            producers_category: config.producers_category(),
            compilation_category: config.compilation_category(),
            edit_summary: config.edit_summary().to_string(),
            page_size: config.page_size(),
            start_from: None,
            only_page: None,
            dry_run: false,
            capture_diffs: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PageAction {
    Saved,
    WouldSave,
    Unchanged,
}

#[derive(Debug, Clone, Serialize)]
pub struct PageResult {
    pub title: String,
    pub action: PageAction,
    pub songs_added: Vec<String>,
    pub albums_added: Vec<AlbumCandidate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PageFailure {
    pub title: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub success: bool,
    pub dry_run: bool,
    pub scanned: usize,
    pub saved: usize,
    pub would_save: usize,
    pub unchanged: usize,
    pub pages: Vec<PageResult>,
    pub failures: Vec<PageFailure>,
    pub request_count: usize,
}

impl RunReport {
    fn new(dry_run: bool) -> Self {
        Self {
            success: true,
            dry_run,
            scanned: 0,
            saved: 0,
            would_save: 0,
            unchanged: 0,
            pages: Vec::new(),
            failures: Vec::new(),
            request_count: 0,
        }
    }

    fn record(&mut self, title: &str, outcome: std::result::Result<PageResult, PageError>) {
        self.scanned += 1;
        match outcome {
            Ok(result) => {
                match result.action {
                    PageAction::Saved => self.saved += 1,
                    PageAction::WouldSave => self.would_save += 1,
                    PageAction::Unchanged => self.unchanged += 1,
                }
                self.pages.push(result);
            }
            Err(error) => {
                warn!(title, error = %error, "skipping producer page");
                self.success = false;
                self.failures.push(PageFailure {
                    title: title.to_string(),
                    message: error.to_string(),
                });
            }
        }
    }
}

/// Bring every producer page's discography tables up to date.
///
/// Pages are handled one at a time in category order. A failing page is
/// recorded in the report and the run moves on; only a failure to enumerate
/// the category aborts the run.
pub fn run_producer_pages<A: ProducerWikiApi>(
    api: &mut A,
    options: &RunOptions,
) -> Result<RunReport> {
    let mut report = RunReport::new(options.dry_run);

    if let Some(title) = &options.only_page {
        let outcome = match api
            .page_content(title)
            .with_context(|| format!("failed to load {title}"))
        {
            Ok(Some(page)) => treat_page(api, &page, options),
            Ok(None) => Err(PageError::PageNotFound),
            Err(error) => Err(PageError::from(error)),
        };
        report.record(title, outcome);
        report.request_count = api.request_count();
        return Ok(report);
    }

    let request = CategoryMembersRequest {
        category: options.producers_category.clone(),
        page_size: options.page_size,
        start_sortkey_prefix: options.start_from.clone(),
    };
    let mut paginator = Paginator::new();
    while let Some(pages) = paginator
        .next_batch(|continuation| api.category_members(&request, continuation))
        .with_context(|| format!("failed to list {}", request.category))?
    {
        debug!(count = pages.len(), "processing producer page batch");
        for page in pages {
            let outcome = treat_page(api, &page, options);
            report.record(&page.title, outcome);
        }
    }

    report.request_count = api.request_count();
    Ok(report)
}

/// Add missing songs and albums to one producer page, saving it if it changed.
pub fn treat_page<A: ProducerWikiApi>(
    api: &mut A,
    page: &ProducerPage,
    options: &RunOptions,
) -> std::result::Result<PageResult, PageError> {
    let category = producer_category(&page.content)?;
    let songs = find_missing_songs(api, &category, &page.title)?;
    let albums = find_missing_albums(api, &category, &page.title, &options.compilation_category)?;

    let with_songs = merge_songs(&page.content, &songs)?;
    let updated = merge_albums(&with_songs, &albums)?;

    let action = if updated == page.content {
        PageAction::Unchanged
    } else if options.dry_run {
        PageAction::WouldSave
    } else {
        api.save_page(&page.title, &updated, &options.edit_summary)
            .with_context(|| format!("failed to save {}", page.title))?;
        PageAction::Saved
    };

    let diff = (options.capture_diffs && action != PageAction::Unchanged)
        .then(|| unified_diff(&page.title, &page.content, &updated));

    if action != PageAction::Unchanged {
        info!(
            title = %page.title,
            songs = songs.len(),
            albums = albums.len(),
            dry_run = options.dry_run,
            "updated producer page"
        );
    }

    Ok(PageResult {
        title: page.title.clone(),
        action,
        songs_added: songs,
        albums_added: albums,
        diff,
    })
}

/// Songs in the producer's categories that the page neither links nor
/// transcludes.
pub fn find_missing_songs<A: ProducerWikiApi>(
    api: &mut A,
    category: &str,
    producer_title: &str,
) -> Result<Vec<String>> {
    let rendered = api
        .expand_dynamic_list(&song_query(category, producer_title))
        .context("song query failed")?;
    let candidates = extract_titles(&rendered);
    untranscluded_songs(api, &candidates, producer_title)
}

/// Albums in the producer's album category that the page neither links nor
/// transcludes.
pub fn find_missing_albums<A: ProducerWikiApi>(
    api: &mut A,
    category: &str,
    producer_title: &str,
    compilation_category: &str,
) -> Result<Vec<AlbumCandidate>> {
    let rendered = api
        .expand_dynamic_list(&album_query(category, producer_title))
        .context("album query failed")?;
    let candidates = extract_titles(&rendered);
    untranscluded_albums(api, &candidates, producer_title, compilation_category)
}

fn unified_diff(title: &str, before: &str, after: &str) -> String {
    TextDiff::from_lines(before, after)
        .unified_diff()
        .context_radius(3)
        .header(title, title)
        .to_string()
}
