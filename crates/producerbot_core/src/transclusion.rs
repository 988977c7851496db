use std::collections::HashMap;

use anyhow::Result;
use serde::Serialize;

use crate::mediawiki::{Paginator, ProducerWikiApi, TITLES_PER_REQUEST, TranscludedPage};

/// An album page missing from the producer page, and which table it goes to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlbumCandidate {
    pub title: String,
    pub is_compilation: bool,
}

impl AlbumCandidate {
    pub fn new(title: impl Into<String>, is_compilation: bool) -> Self {
        Self {
            title: title.into(),
            is_compilation,
        }
    }
}

/// Song titles not yet transcluded on `producer_title`.
pub fn untranscluded_songs<A: ProducerWikiApi>(
    api: &mut A,
    candidates: &[String],
    producer_title: &str,
) -> Result<Vec<String>> {
    let pages = collect_transclusions(api, candidates, None)?;
    Ok(pages
        .into_iter()
        .filter(|page| !is_transcluded_on(page, producer_title))
        .map(|page| page.title)
        .collect())
}

/// Album titles not yet transcluded on `producer_title`.
///
/// Albums in `compilation_category` are flagged for the compilation table.
pub fn untranscluded_albums<A: ProducerWikiApi>(
    api: &mut A,
    candidates: &[String],
    producer_title: &str,
    compilation_category: &str,
) -> Result<Vec<AlbumCandidate>> {
    let pages = collect_transclusions(api, candidates, Some(compilation_category))?;
    Ok(pages
        .into_iter()
        .filter(|page| !is_transcluded_on(page, producer_title))
        .map(|page| AlbumCandidate {
            is_compilation: !page.categories.is_empty(),
            title: page.title,
        })
        .collect())
}

fn is_transcluded_on(page: &TranscludedPage, producer_title: &str) -> bool {
    page.transcluded_in
        .iter()
        .any(|title| title == producer_title)
}

/// Merge every continuation batch per title before anything is filtered, so
/// a title whose transclusions span several batches is judged on all of them.
fn collect_transclusions<A: ProducerWikiApi>(
    api: &mut A,
    candidates: &[String],
    category: Option<&str>,
) -> Result<Vec<TranscludedPage>> {
    let mut pages: Vec<TranscludedPage> = Vec::new();
    let mut index_by_title: HashMap<String, usize> = HashMap::new();

    for chunk in candidates.chunks(TITLES_PER_REQUEST) {
        let mut paginator = Paginator::new();
        while let Some(items) = paginator
            .next_batch(|continuation| api.transclusions(chunk, category, continuation))?
        {
            for item in items {
                match index_by_title.get(&item.title) {
                    Some(&index) => {
                        let existing = &mut pages[index];
                        existing.transcluded_in.extend(item.transcluded_in);
                        existing.categories.extend(item.categories);
                    }
                    None => {
                        index_by_title.insert(item.title.clone(), pages.len());
                        pages.push(item);
                    }
                }
            }
        }
    }

    Ok(pages)
}
