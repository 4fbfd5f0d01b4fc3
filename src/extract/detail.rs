use std::collections::{HashMap, HashSet};

use scraper::{ElementRef, Html};
use serde::Serialize;
use url::Url;

use super::{Candidate, ExtractError, ExtractionProfile, Extraction, Outcome, Strategy};
use crate::urlnorm;

/// Item page as found on the origin, before the cover is virtualized.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemDetailRecord {
    pub title: String,
    pub localized_title: String,
    pub category: String,
    pub concept: String,
    pub synopsis: String,
    pub author: String,
    pub status: String,
    pub age_rating: String,
    pub reading_direction: String,
    pub genres: Vec<String>,
    pub cover_url: Option<Url>,
    pub chapters: Vec<ChapterLink>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChapterLink {
    pub url: Url,
    pub title: String,
    pub date: String,
}

impl Candidate for ItemDetailRecord {
    fn is_usable(&self) -> bool {
        !self.title.trim().is_empty()
    }

    fn produced(&self) -> usize {
        usize::from(self.is_usable())
    }
}

pub const STRATEGIES: &[Strategy<ItemDetailRecord>] = &[
    Strategy {
        name: "info-table",
        apply: info_table,
    },
    Strategy {
        name: "any-table",
        apply: any_table,
    },
];

const TITLE_KEY: &str = "judul komik";
const LOCALIZED_TITLE_KEY: &str = "judul indonesia";
const CATEGORY_KEY: &str = "jenis komik";
const CONCEPT_KEY: &str = "konsep cerita";
const AUTHOR_KEY: &str = "pengarang";
const STATUS_KEY: &str = "status";
const AGE_RATING_KEY: &str = "umur pembaca";
const READING_DIRECTION_KEY: &str = "cara baca";

pub fn extract(markup: &str, page_url: &Url) -> Result<Extraction<ItemDetailRecord>, ExtractError> {
    super::run_strategies(ExtractionProfile::ItemDetail, markup, page_url, STRATEGIES)
}

/// The labelled information table of the item page.
fn info_table(document: &Html, page_url: &Url) -> Outcome<ItemDetailRecord> {
    let rows = super::select_all(
        document.root_element(),
        "#Informasi table.inftable tr, table.inftable tr",
    );
    let matched = rows.len();
    let fields = parse_key_values(&rows);
    let title = field(&fields, TITLE_KEY);

    Outcome {
        value: build_record(document, page_url, &fields, title),
        matched,
    }
}

/// Any two-cell table row, with the page heading standing in for a missing title.
fn any_table(document: &Html, page_url: &Url) -> Outcome<ItemDetailRecord> {
    let rows = super::select_all(document.root_element(), "table tr");
    let matched = rows.len();
    let fields = parse_key_values(&rows);

    let mut title = field(&fields, TITLE_KEY);
    if title.is_empty() {
        title = field(&fields, "judul");
    }
    if title.is_empty() {
        title = super::first_text(document.root_element(), &["#Judul h1", "h1"]);
        if let Some(stripped) = title.strip_prefix("Komik ") {
            title = stripped.to_owned();
        }
    }

    Outcome {
        value: build_record(document, page_url, &fields, title),
        matched,
    }
}

fn build_record(
    document: &Html,
    page_url: &Url,
    fields: &HashMap<String, String>,
    title: String,
) -> ItemDetailRecord {
    let root = document.root_element();
    ItemDetailRecord {
        title,
        localized_title: field(fields, LOCALIZED_TITLE_KEY),
        category: alphabetic_only(&field(fields, CATEGORY_KEY)),
        concept: field(fields, CONCEPT_KEY),
        synopsis: synopsis(root),
        author: field(fields, AUTHOR_KEY),
        status: field(fields, STATUS_KEY),
        age_rating: field(fields, AGE_RATING_KEY),
        reading_direction: field(fields, READING_DIRECTION_KEY),
        genres: genres(root),
        cover_url: cover_url(root, page_url),
        chapters: chapters(root, page_url),
    }
}

/// First cell of each row becomes the key, second the value. Keys are
/// lowercased with whitespace collapsed and a trailing colon removed.
fn parse_key_values(rows: &[ElementRef<'_>]) -> HashMap<String, String> {
    let mut fields = HashMap::new();
    for row in rows {
        let cells = super::select_all(*row, "td, th");
        let [key, value, ..] = cells.as_slice() else {
            continue;
        };
        let key = super::clean_text(*key)
            .trim_end_matches(':')
            .trim()
            .to_lowercase();
        if key.is_empty() {
            continue;
        }
        fields
            .entry(key)
            .or_insert_with(|| super::clean_text(*value));
    }
    fields
}

fn field(fields: &HashMap<String, String>, key: &str) -> String {
    fields.get(key).cloned().unwrap_or_default()
}

/// Keeps alphabetic characters only, in order.
pub fn alphabetic_only(text: &str) -> String {
    text.chars().filter(|c| c.is_alphabetic()).collect()
}

fn synopsis(root: ElementRef<'_>) -> String {
    let text = super::first_text(root, &["#Judul p.desc", "p.desc", ".sinopsis p", "#Sinopsis p"]);
    if !text.is_empty() {
        return text;
    }
    super::select_first(root, r#"meta[name="description"]"#)
        .and_then(|meta| meta.value().attr("content"))
        .map(super::collapse_whitespace)
        .unwrap_or_default()
}

fn genres(root: ElementRef<'_>) -> Vec<String> {
    let mut items = super::select_all(root, "ul.genre li.genre");
    if items.is_empty() {
        items = super::select_all(root, "ul.genre li, .genre a");
    }

    let mut seen = HashSet::new();
    items
        .into_iter()
        .map(super::clean_text)
        .filter(|genre| !genre.is_empty())
        .filter(|genre| seen.insert(genre.clone()))
        .collect()
}

fn cover_url(root: ElementRef<'_>, page_url: &Url) -> Option<Url> {
    ["#Informasi .ims img", ".ims img", "#Informasi img"]
        .iter()
        .flat_map(|css| super::select_all(root, css))
        .find_map(|img| super::url_attr(img, super::IMAGE_SOURCE_ATTRS, page_url))
        .or_else(|| {
            super::select_first(root, r#"meta[property="og:image"]"#)
                .and_then(|meta| super::url_attr(meta, &["content"], page_url))
        })
}

fn chapters(root: ElementRef<'_>, page_url: &Url) -> Vec<ChapterLink> {
    let mut rows = super::select_all(root, "#Daftar_Chapter tr");
    if rows.is_empty() {
        rows = super::select_all(root, "table.chapter tr, #daftarChapter tr");
    }

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for row in rows {
        let Some(anchor) = super::select_first(row, "td.judulseries a")
            .or_else(|| super::select_first(row, "a[href]"))
        else {
            continue;
        };
        let Some(url) = anchor
            .value()
            .attr("href")
            .and_then(|href| urlnorm::normalize_url(page_url, href))
        else {
            continue;
        };
        if !seen.insert(urlnorm::dedup_key(&url)) {
            continue;
        }

        let title = super::clean_text(anchor);
        let date = super::first_text(row, &["td.tanggalseries", "td:last-child"]);
        // A single-cell row would report its title as the date.
        let date = if date == title { String::new() } else { date };

        out.push(ChapterLink { url, title, date });
    }
    out
}
