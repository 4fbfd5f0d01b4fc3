//! Maps origin markup onto fixed record shapes.
//!
//! Every profile owns an ordered list of [`Strategy`]s. They run in order over
//! the same parsed document and the first one producing a usable record wins,
//! so a layout change on the origin site only has to be absorbed by a later,
//! broader strategy. Each attempt is recorded in [`Diagnostics`].

pub mod catalog;
pub mod detail;
pub mod images;

use std::fmt;
use std::path::PathBuf;

use anyhow::Context as _;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::cli::ExtractArgs;
use crate::urlnorm;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionProfile {
    CatalogListing,
    ItemDetail,
    ItemImages,
}

impl ExtractionProfile {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CatalogListing => "catalog-listing",
            Self::ItemDetail => "item-detail",
            Self::ItemImages => "item-images",
        }
    }
}

impl fmt::Display for ExtractionProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostics {
    /// `<a>` elements in the document.
    pub anchors: usize,
    /// `<img>` elements in the document.
    pub images: usize,
    pub attempts: Vec<StrategyAttempt>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyAttempt {
    pub strategy: String,
    /// Elements the strategy's selectors matched before filtering.
    pub candidates: usize,
    /// Records the strategy produced from them.
    pub produced: usize,
}

impl Diagnostics {
    fn survey(document: &Html) -> Self {
        Self {
            anchors: select_all(document.root_element(), "a").len(),
            images: select_all(document.root_element(), "img").len(),
            attempts: Vec::new(),
        }
    }

    pub fn attempt(&self, strategy: &str) -> Option<&StrategyAttempt> {
        self.attempts.iter().find(|a| a.strategy == strategy)
    }
}

#[derive(Debug, Clone)]
pub struct Extraction<T> {
    pub record: T,
    pub strategy: &'static str,
    pub diagnostics: Diagnostics,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ExtractError {
    #[error("markup could not be parsed: {0}")]
    Parse(String),
    #[error("no {profile} strategy matched ({} tried)", diagnostics.attempts.len())]
    NoMatch {
        profile: ExtractionProfile,
        diagnostics: Diagnostics,
    },
}

/// Record shapes a strategy can produce.
pub trait Candidate {
    /// Whether the record is good enough to stop trying further strategies.
    fn is_usable(&self) -> bool;

    /// Number of items produced, for diagnostics.
    fn produced(&self) -> usize;
}

impl<T> Candidate for Vec<T> {
    fn is_usable(&self) -> bool {
        !self.is_empty()
    }

    fn produced(&self) -> usize {
        self.len()
    }
}

pub struct Outcome<T> {
    pub value: T,
    /// Elements matched by the strategy's selectors, usable or not.
    pub matched: usize,
}

pub struct Strategy<T> {
    pub name: &'static str,
    pub apply: fn(&Html, &Url) -> Outcome<T>,
}

pub fn run_strategies<T: Candidate>(
    profile: ExtractionProfile,
    markup: &str,
    page_url: &Url,
    strategies: &[Strategy<T>],
) -> Result<Extraction<T>, ExtractError> {
    ensure_markup(markup)?;
    let document = Html::parse_document(markup);
    let mut diagnostics = Diagnostics::survey(&document);

    for strategy in strategies {
        let outcome = (strategy.apply)(&document, page_url);
        diagnostics.attempts.push(StrategyAttempt {
            strategy: strategy.name.to_owned(),
            candidates: outcome.matched,
            produced: outcome.value.produced(),
        });

        if outcome.value.is_usable() {
            return Ok(Extraction {
                record: outcome.value,
                strategy: strategy.name,
                diagnostics,
            });
        }
        tracing::debug!(
            %profile,
            strategy = strategy.name,
            candidates = outcome.matched,
            "strategy produced nothing usable"
        );
    }

    tracing::warn!(
        %profile,
        anchors = diagnostics.anchors,
        images = diagnostics.images,
        "no extraction strategy matched"
    );
    Err(ExtractError::NoMatch {
        profile,
        diagnostics,
    })
}

/// Output of [`extract`], one variant per profile.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Record {
    Catalog(Vec<crate::formats::CatalogEntry>),
    Detail(detail::ItemDetailRecord),
    Images(images::ItemImagesRecord),
}

pub fn extract(
    profile: ExtractionProfile,
    markup: &str,
    page_url: &Url,
) -> Result<Extraction<Record>, ExtractError> {
    match profile {
        ExtractionProfile::CatalogListing => {
            catalog::extract(markup, page_url).map(|e| e.map(Record::Catalog))
        }
        ExtractionProfile::ItemDetail => {
            detail::extract(markup, page_url).map(|e| e.map(Record::Detail))
        }
        ExtractionProfile::ItemImages => {
            images::extract(markup, page_url).map(|e| e.map(Record::Images))
        }
    }
}

impl<T> Extraction<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Extraction<U> {
        Extraction {
            record: f(self.record),
            strategy: self.strategy,
            diagnostics: self.diagnostics,
        }
    }
}

#[derive(Debug, Serialize)]
struct ExtractReport {
    profile: ExtractionProfile,
    #[serde(skip_serializing_if = "Option::is_none")]
    strategy: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    record: Option<Record>,
    diagnostics: Diagnostics,
}

/// Runs one profile over a saved page and prints the record with its
/// diagnostics, for checking selectors against captured markup.
pub fn run(args: ExtractArgs) -> anyhow::Result<()> {
    let input = PathBuf::from(&args.input);
    let bytes =
        std::fs::read(&input).with_context(|| format!("read markup: {}", input.display()))?;
    let markup = String::from_utf8_lossy(&bytes);
    let page_url = Url::parse(&args.page_url).context("parse --page-url")?;

    let report = match extract(args.profile, &markup, &page_url) {
        Ok(extraction) => ExtractReport {
            profile: args.profile,
            strategy: Some(extraction.strategy),
            record: Some(extraction.record),
            diagnostics: extraction.diagnostics,
        },
        Err(ExtractError::NoMatch {
            profile,
            diagnostics,
        }) => ExtractReport {
            profile,
            strategy: None,
            record: None,
            diagnostics,
        },
        Err(err) => return Err(err).context("extract"),
    };

    crate::formats::print_json(&report)
}

fn ensure_markup(markup: &str) -> Result<(), ExtractError> {
    if markup.trim().is_empty() {
        return Err(ExtractError::Parse("empty document".to_owned()));
    }
    if markup.contains('\0') {
        return Err(ExtractError::Parse("binary content".to_owned()));
    }
    if !markup.contains('<') {
        return Err(ExtractError::Parse("no markup tags".to_owned()));
    }
    Ok(())
}

pub(crate) fn selector(css: &str) -> Option<Selector> {
    match Selector::parse(css) {
        Ok(selector) => Some(selector),
        Err(err) => {
            tracing::warn!(css, %err, "invalid selector");
            None
        }
    }
}

pub(crate) fn select_all<'a>(scope: ElementRef<'a>, css: &str) -> Vec<ElementRef<'a>> {
    match selector(css) {
        Some(selector) => scope.select(&selector).collect(),
        None => Vec::new(),
    }
}

pub(crate) fn select_first<'a>(scope: ElementRef<'a>, css: &str) -> Option<ElementRef<'a>> {
    let selector = selector(css)?;
    scope.select(&selector).next()
}

/// Text content with whitespace runs collapsed and ends trimmed.
pub(crate) fn clean_text(element: ElementRef<'_>) -> String {
    collapse_whitespace(&element.text().collect::<String>())
}

pub(crate) fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// First text among the given selectors that is non-blank.
pub(crate) fn first_text(scope: ElementRef<'_>, selectors: &[&str]) -> String {
    selectors
        .iter()
        .flat_map(|css| select_all(scope, css))
        .map(clean_text)
        .find(|text| !text.is_empty())
        .unwrap_or_default()
}

/// Image source attributes, lazy-loading ones first: when present they carry
/// the real image while `src` holds a placeholder.
pub(crate) const IMAGE_SOURCE_ATTRS: &[&str] = &["data-src", "data-lazy-src", "src"];

/// First attribute among `attrs` on `element` that completes to an http(s) URL.
pub(crate) fn url_attr(element: ElementRef<'_>, attrs: &[&str], base: &Url) -> Option<Url> {
    attrs
        .iter()
        .filter_map(|attr| element.value().attr(attr))
        .find_map(|raw| urlnorm::normalize_url(base, raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page_url() -> Url {
        Url::parse("https://komiku.id/").unwrap()
    }

    #[test]
    fn blank_and_binary_input_is_a_parse_error() {
        assert!(matches!(
            extract(ExtractionProfile::CatalogListing, "   ", &page_url()),
            Err(ExtractError::Parse(_))
        ));
        assert!(matches!(
            extract(ExtractionProfile::ItemImages, "\u{0}\u{1}PNG", &page_url()),
            Err(ExtractError::Parse(_))
        ));
        assert!(matches!(
            extract(ExtractionProfile::ItemDetail, "plain words only", &page_url()),
            Err(ExtractError::Parse(_))
        ));
    }

    #[test]
    fn nothing_found_is_no_match_with_counts() {
        let html = r#"<html><body><a href="/about">About</a><img src="/logo.png"></body></html>"#;
        let err = extract(ExtractionProfile::ItemImages, html, &page_url()).unwrap_err();
        let ExtractError::NoMatch {
            profile,
            diagnostics,
        } = err
        else {
            panic!("expected NoMatch");
        };
        assert_eq!(profile, ExtractionProfile::ItemImages);
        assert_eq!(diagnostics.anchors, 1);
        assert_eq!(diagnostics.images, 1);
        assert_eq!(diagnostics.attempts.len(), images::STRATEGIES.len());
    }

    #[test]
    fn whitespace_is_collapsed() {
        assert_eq!(collapse_whitespace("  One \n\t Piece  "), "One Piece");
    }
}
