use std::collections::HashSet;

use scraper::{ElementRef, Html};
use url::Url;

use super::{ExtractError, ExtractionProfile, Extraction, Outcome, Strategy};
use crate::formats::CatalogEntry;
use crate::urlnorm;

pub const STRATEGIES: &[Strategy<Vec<CatalogEntry>>] = &[
    Strategy {
        name: "listing-cards",
        apply: listing_cards,
    },
    Strategy {
        name: "series-links",
        apply: series_links,
    },
    Strategy {
        name: "manga-anchors",
        apply: manga_anchors,
    },
];

pub fn extract(markup: &str, page_url: &Url) -> Result<Extraction<Vec<CatalogEntry>>, ExtractError> {
    super::run_strategies(ExtractionProfile::CatalogListing, markup, page_url, STRATEGIES)
}

/// Title links of the listing cards on the catalog page.
fn listing_cards(document: &Html, page_url: &Url) -> Outcome<Vec<CatalogEntry>> {
    let anchors = super::select_all(document.root_element(), ".ls4 .ls4j h4 a, .ls4j h3 a");
    collect_entries(anchors, page_url, |_| true)
}

/// Series links used by the alphabetical index and history widgets.
fn series_links(document: &Html, page_url: &Url) -> Outcome<Vec<CatalogEntry>> {
    let anchors = super::select_all(document.root_element(), "#history a.series, a.series");
    collect_entries(anchors, page_url, |_| true)
}

/// Any anchor pointing at an item page.
fn manga_anchors(document: &Html, page_url: &Url) -> Outcome<Vec<CatalogEntry>> {
    let anchors = super::select_all(document.root_element(), r#"a[href*="/manga/"]"#);
    collect_entries(anchors, page_url, |url| urlnorm::item_slug(url).is_some())
}

fn collect_entries(
    anchors: Vec<ElementRef<'_>>,
    page_url: &Url,
    accept: impl Fn(&Url) -> bool,
) -> Outcome<Vec<CatalogEntry>> {
    let matched = anchors.len();
    let mut seen = HashSet::new();
    let mut entries = Vec::new();

    for anchor in anchors {
        let Some(url) = anchor
            .value()
            .attr("href")
            .and_then(|href| urlnorm::normalize_url(page_url, href))
        else {
            continue;
        };
        if !accept(&url) {
            continue;
        }

        let mut title = super::clean_text(anchor);
        if title.is_empty() {
            title = anchor
                .value()
                .attr("title")
                .map(super::collapse_whitespace)
                .unwrap_or_default();
        }
        if title.is_empty() {
            continue;
        }

        if !seen.insert(urlnorm::dedup_key(&url)) {
            continue;
        }

        entries.push(CatalogEntry {
            entity_id: urlnorm::item_slug(&url),
            origin_url: url.to_string(),
            title,
        });
    }

    Outcome {
        value: entries,
        matched,
    }
}
