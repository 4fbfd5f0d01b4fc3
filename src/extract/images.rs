use std::collections::HashSet;

use scraper::{ElementRef, Html};
use serde::Serialize;
use url::Url;

use super::{Candidate, ExtractError, ExtractionProfile, Extraction, Outcome, Strategy};
use crate::urlnorm;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemImagesRecord {
    pub title: String,
    pub pages: Vec<PageImage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageImage {
    pub origin_url: Url,
    pub alt_text: String,
}

impl Candidate for ItemImagesRecord {
    fn is_usable(&self) -> bool {
        !self.pages.is_empty()
    }

    fn produced(&self) -> usize {
        self.pages.len()
    }
}

pub const STRATEGIES: &[Strategy<ItemImagesRecord>] = &[
    Strategy {
        name: "reader-container",
        apply: reader_container,
    },
    Strategy {
        name: "reader-fallback",
        apply: reader_fallback,
    },
];

/// Ad banners are served from the same reader container.
const AD_MARKER: &str = "iklan";

pub fn extract(markup: &str, page_url: &Url) -> Result<Extraction<ItemImagesRecord>, ExtractError> {
    super::run_strategies(ExtractionProfile::ItemImages, markup, page_url, STRATEGIES)
}

fn reader_container(document: &Html, page_url: &Url) -> Outcome<ItemImagesRecord> {
    let images = super::select_all(document.root_element(), "#Baca_Komik img");
    collect_pages(document, images, page_url)
}

fn reader_fallback(document: &Html, page_url: &Url) -> Outcome<ItemImagesRecord> {
    let images = super::select_all(
        document.root_element(),
        ".main-reading-area img, #readerarea img, .reading-content img",
    );
    collect_pages(document, images, page_url)
}

fn collect_pages(
    document: &Html,
    images: Vec<ElementRef<'_>>,
    page_url: &Url,
) -> Outcome<ItemImagesRecord> {
    let matched = images.len();
    let mut seen = HashSet::new();
    let mut pages = Vec::new();

    for img in images {
        let Some(origin_url) = super::url_attr(img, super::IMAGE_SOURCE_ATTRS, page_url) else {
            continue;
        };
        if origin_url.as_str().to_ascii_lowercase().contains(AD_MARKER) {
            continue;
        }
        if !seen.insert(urlnorm::dedup_key(&origin_url)) {
            continue;
        }
        let alt_text = img
            .value()
            .attr("alt")
            .map(super::collapse_whitespace)
            .unwrap_or_default();
        pages.push(PageImage {
            origin_url,
            alt_text,
        });
    }

    let title = if pages.is_empty() {
        String::new()
    } else {
        super::first_text(
            document.root_element(),
            &["#Baca_Komik h1", "#Judul h1", "h1", "title"],
        )
    };

    Outcome {
        value: ItemImagesRecord { title, pages },
        matched,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chapter_url() -> Url {
        Url::parse("https://komiku.id/naruto-chapter-1/").unwrap()
    }

    #[test]
    fn reader_images_keep_reading_order() {
        let html = r#"
<html><head><title>Naruto Chapter 1 - Komiku</title></head>
<body>
<div id="Judul"><h1>Naruto   Chapter 1</h1></div>
<div id="Baca_Komik">
  <img src="https://img.komiku.id/naruto/1/01.jpg" alt="Naruto Chapter 1 page 1">
  <img data-src="//img.komiku.id/naruto/1/02.webp" alt="">
  <img src="https://img.komiku.id/iklan/banner.gif">
  <img src="https://img.komiku.id/naruto/1/01.jpg">
  <img src="/naruto/1/03.png" alt="p3">
</div>
</body></html>"#;
        let extraction = extract(html, &chapter_url()).unwrap();
        assert_eq!(extraction.strategy, "reader-container");

        let record = extraction.record;
        assert_eq!(record.title, "Naruto Chapter 1");
        let urls = record
            .pages
            .iter()
            .map(|p| p.origin_url.as_str())
            .collect::<Vec<_>>();
        assert_eq!(
            urls,
            vec![
                "https://img.komiku.id/naruto/1/01.jpg",
                "https://img.komiku.id/naruto/1/02.webp",
                "https://komiku.id/naruto/1/03.png",
            ]
        );
        assert_eq!(record.pages[0].alt_text, "Naruto Chapter 1 page 1");
        assert_eq!(record.pages[1].alt_text, "");

        let attempt = extraction.diagnostics.attempt("reader-container").unwrap();
        assert_eq!(attempt.candidates, 5);
        assert_eq!(attempt.produced, 3);
    }

    #[test]
    fn fallback_container_is_tried_second() {
        let html = r#"
<h1>Bleach 3</h1>
<div id="Baca_Komik"><p>Memuat...</p></div>
<div id="readerarea"><img data-lazy-src="https://cdn.example/b/3/1.jpg"></div>"#;
        let extraction = extract(html, &chapter_url()).unwrap();
        assert_eq!(extraction.strategy, "reader-fallback");
        assert_eq!(extraction.record.title, "Bleach 3");
        assert_eq!(extraction.record.pages.len(), 1);
        assert_eq!(
            extraction.diagnostics.attempt("reader-container").unwrap().candidates,
            0
        );
    }

    #[test]
    fn lazy_source_wins_over_placeholder_src() {
        let html = r#"
<h1>Naruto Chapter 1</h1>
<div id="Baca_Komik">
  <img src="/asset/lazy.gif" data-src="https://img.komiku.id/naruto/1/01.jpg">
  <img src="/asset/lazy.gif" data-src="https://img.komiku.id/naruto/1/02.jpg">
  <img src="/asset/lazy.gif" data-lazy-src="https://img.komiku.id/naruto/1/03.jpg">
</div>"#;
        let record = extract(html, &chapter_url()).unwrap().record;
        let urls = record
            .pages
            .iter()
            .map(|p| p.origin_url.as_str())
            .collect::<Vec<_>>();
        assert_eq!(
            urls,
            vec![
                "https://img.komiku.id/naruto/1/01.jpg",
                "https://img.komiku.id/naruto/1/02.jpg",
                "https://img.komiku.id/naruto/1/03.jpg",
            ]
        );
    }

    #[test]
    fn images_without_sources_do_not_count() {
        let html = r#"<div id="Baca_Komik"><img alt="lost"><img src=""></div>"#;
        let Err(ExtractError::NoMatch { diagnostics, .. }) = extract(html, &chapter_url()) else {
            panic!("expected NoMatch");
        };
        assert_eq!(diagnostics.images, 2);
        assert_eq!(diagnostics.attempt("reader-container").unwrap().candidates, 2);
        assert_eq!(diagnostics.attempt("reader-container").unwrap().produced, 0);
    }
}
