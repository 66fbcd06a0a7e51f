//! Galleries, images, and the content-sensitivity scale.
//!
//! Galleries come from an external data provider and are read-only for the
//! duration of a selection request. Field names follow the provider's
//! camelCase JSON.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Ordered content rating: `general < sensitive < questionable < explicit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensitivityLevel {
    General,
    Sensitive,
    Questionable,
    Explicit,
}

impl SensitivityLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Sensitive => "sensitive",
            Self::Questionable => "questionable",
            Self::Explicit => "explicit",
        }
    }

    /// Image levels that may be shown for a scene rated at `self`.
    ///
    /// `general` and `sensitive` share one bucket; `questionable` and
    /// `explicit` each admit only themselves.
    pub fn allowed_bucket(&self) -> &'static [SensitivityLevel] {
        match self {
            Self::General | Self::Sensitive => &[Self::General, Self::Sensitive],
            Self::Questionable => &[Self::Questionable],
            Self::Explicit => &[Self::Explicit],
        }
    }

    /// Whether an image rated `image_level` passes the gate for this scene level.
    pub fn admits(&self, image_level: SensitivityLevel) -> bool {
        self.allowed_bucket().contains(&image_level)
    }
}

impl std::fmt::Display for SensitivityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SensitivityLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "general" => Ok(Self::General),
            "sensitive" => Ok(Self::Sensitive),
            "questionable" => Ok(Self::Questionable),
            "explicit" => Ok(Self::Explicit),
            other => Err(format!("unknown sensitivity level: {other}")),
        }
    }
}

/// A tagged candidate image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    pub id: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub sensitivity_level: SensitivityLevel,
    pub image_url: String,
    #[serde(default)]
    pub thumbnail_url: String,
}

impl Image {
    /// URL used for image embeddings: the thumbnail when present, else the full image.
    pub fn representative_url(&self) -> &str {
        if self.thumbnail_url.trim().is_empty() {
            &self.image_url
        } else {
            &self.thumbnail_url
        }
    }
}

/// A named collection of candidate images for one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gallery {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub images: Vec<Image>,
}

impl Gallery {
    /// Copy of this gallery keeping only images admitted at `level`.
    pub fn gated(&self, level: SensitivityLevel) -> Gallery {
        Gallery {
            id: self.id.clone(),
            name: self.name.clone(),
            images: self
                .images
                .iter()
                .filter(|img| level.admits(img.sensitivity_level))
                .cloned()
                .collect(),
        }
    }
}

// ── Aliases ──

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
enum AliasTarget {
    Name(String),
    #[serde(rename_all = "camelCase")]
    Target {
        target_gallery_name: String,
    },
}

impl AliasTarget {
    fn name(&self) -> &str {
        match self {
            Self::Name(n) => n,
            Self::Target {
                target_gallery_name,
            } => target_gallery_name,
        }
    }
}

/// Alias → gallery-name substitutions applied before matching.
///
/// Accepts both `{"alias": "Target"}` and
/// `{"alias": {"targetGalleryName": "Target"}}` in configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AliasTable {
    entries: BTreeMap<String, AliasTarget>,
}

impl AliasTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, alias: impl Into<String>, target: impl Into<String>) {
        self.entries
            .insert(alias.into(), AliasTarget::Name(target.into()));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Substitute `name` through the table.
    ///
    /// Exact key first, then the first key (in key order) equal ignoring case.
    /// Unknown names, and aliases with a blank target, pass through unchanged.
    pub fn resolve<'a>(&'a self, name: &'a str) -> &'a str {
        let target = match self.entries.get(name) {
            Some(target) => Some(target),
            None => {
                let lowered = name.to_lowercase();
                self.entries
                    .iter()
                    .find(|(alias, _)| alias.to_lowercase() == lowered)
                    .map(|(_, target)| target)
            }
        };
        target
            .map(AliasTarget::name)
            .filter(|t| !t.trim().is_empty())
            .unwrap_or(name)
    }

    /// Aliases whose target gallery name is blank.
    pub fn blank_aliases(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(|(_, target)| target.name().trim().is_empty())
            .map(|(alias, _)| alias.as_str())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for AliasTable {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut table = AliasTable::new();
        for (k, v) in iter {
            table.insert(k, v);
        }
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(id: &str, level: SensitivityLevel) -> Image {
        Image {
            id: id.into(),
            tags: vec![],
            sensitivity_level: level,
            image_url: format!("https://img.example/{id}.png"),
            thumbnail_url: String::new(),
        }
    }

    #[test]
    fn general_scene_admits_sensitive_but_not_explicit() {
        let level = SensitivityLevel::General;
        assert!(level.admits(SensitivityLevel::General));
        assert!(level.admits(SensitivityLevel::Sensitive));
        assert!(!level.admits(SensitivityLevel::Questionable));
        assert!(!level.admits(SensitivityLevel::Explicit));
    }

    #[test]
    fn upper_levels_are_singleton_buckets() {
        assert_eq!(
            SensitivityLevel::Questionable.allowed_bucket(),
            &[SensitivityLevel::Questionable]
        );
        assert!(!SensitivityLevel::Explicit.admits(SensitivityLevel::General));
        assert!(!SensitivityLevel::Questionable.admits(SensitivityLevel::Sensitive));
    }

    #[test]
    fn levels_are_ordered() {
        assert!(SensitivityLevel::General < SensitivityLevel::Sensitive);
        assert!(SensitivityLevel::Sensitive < SensitivityLevel::Questionable);
        assert!(SensitivityLevel::Questionable < SensitivityLevel::Explicit);
    }

    #[test]
    fn gated_keeps_order_and_drops_disallowed() {
        let gallery = Gallery {
            id: "g1".into(),
            name: "레이".into(),
            images: vec![
                image("a", SensitivityLevel::Explicit),
                image("b", SensitivityLevel::Sensitive),
                image("c", SensitivityLevel::General),
            ],
        };
        let gated = gallery.gated(SensitivityLevel::Sensitive);
        let ids: Vec<&str> = gated.images.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
        assert_eq!(gated.id, "g1");
    }

    #[test]
    fn representative_url_prefers_thumbnail() {
        let mut img = image("a", SensitivityLevel::General);
        assert_eq!(img.representative_url(), "https://img.example/a.png");
        img.thumbnail_url = "https://img.example/a_thumb.png".into();
        assert_eq!(img.representative_url(), "https://img.example/a_thumb.png");
    }

    #[test]
    fn image_decodes_provider_json() {
        let json = r#"{
            "id": "img-7",
            "tags": ["smile", "school uniform"],
            "sensitivityLevel": "questionable",
            "imageUrl": "https://cdn.example/7.webp",
            "thumbnailUrl": "https://cdn.example/7_t.webp"
        }"#;
        let img: Image = serde_json::from_str(json).unwrap();
        assert_eq!(img.sensitivity_level, SensitivityLevel::Questionable);
        assert_eq!(img.tags.len(), 2);
    }

    #[test]
    fn alias_exact_then_case_insensitive() {
        let table: AliasTable = [("Gaon", "레이"), ("가온", "레이")].into_iter().collect();
        assert_eq!(table.resolve("가온"), "레이");
        assert_eq!(table.resolve("gaon"), "레이");
        assert_eq!(table.resolve("엔비"), "엔비");
    }

    #[test]
    fn alias_table_accepts_both_shapes() {
        let json = r#"{"가온": "레이", "Envy": {"targetGalleryName": "엔비 스텔라"}}"#;
        let table: AliasTable = serde_json::from_str(json).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.resolve("envy"), "엔비 스텔라");
        assert_eq!(table.resolve("가온"), "레이");
    }

    #[test]
    fn blank_alias_target_is_ignored() {
        let json = r#"{"가온": "", "Envy": {"targetGalleryName": "  "}, "레이짱": "레이"}"#;
        let table: AliasTable = serde_json::from_str(json).unwrap();
        assert_eq!(table.resolve("가온"), "가온");
        assert_eq!(table.resolve("envy"), "envy");
        assert_eq!(table.resolve("레이짱"), "레이");
        let blank: Vec<&str> = table.blank_aliases().collect();
        assert_eq!(blank, vec!["Envy", "가온"]);
    }

    #[test]
    fn sensitivity_parses_case_insensitively() {
        assert_eq!(
            "Explicit".parse::<SensitivityLevel>().unwrap(),
            SensitivityLevel::Explicit
        );
        assert!("spicy".parse::<SensitivityLevel>().is_err());
    }
}
