use serde::{Deserialize, Serialize};

use crate::extract::Diagnostics;
use crate::virtualize::VirtualResourceId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    pub origin_url: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogListing {
    pub entries: Vec<CatalogEntry>,
    /// Strategy that produced `entries`; absent when nothing matched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
    pub diagnostics: Diagnostics,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chapter {
    pub origin_url: String,
    /// Reference accepted by the chapter images operation; absent for
    /// chapter links that leave the origin site.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chapter_ref: Option<String>,
    pub title: String,
    pub date: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemDetail {
    pub entity_id: String,
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
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_resource_id: Option<VirtualResourceId>,
    pub chapters: Vec<Chapter>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemImages {
    pub entity_id: String,
    pub chapter_ref: String,
    pub title: String,
    pub pages: Vec<ImagePage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImagePage {
    pub resource_id: VirtualResourceId,
    pub alt_text: String,
}

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    use std::io::Write as _;

    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value)?;
    writeln!(stdout)?;
    Ok(())
}
