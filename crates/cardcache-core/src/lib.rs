//! Core domain model and derived-field computation for the card cache.

use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "cardcache-core";

/// Face marker on the single entry that may represent a card canonically.
pub const ACCEPTED_FACE: &str = "";
/// Known alternate-face markers; entries carrying these are never canonical.
pub const MODAL_DFC_FACE: &str = "modal_dfc";
pub const FLIP_FACE: &str = "flip";
pub const TRANSFORM_FACE: &str = "transform";

/// Separator used when flattening a color list into a single summary string.
pub const COLOR_SEPARATOR: &str = ",";

/// One printing/face exactly as it appears in the bulk document. Transient:
/// lives only between parse and dedup within a single sync cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawCardEntry {
    #[serde(rename = "uuid")]
    pub oracle_id: String,
    pub name: String,
    #[serde(rename = "text", default)]
    pub oracle_text: String,
    #[serde(default)]
    pub layout: String,
    #[serde(default)]
    pub colors: Vec<String>,
    #[serde(rename = "colorIdentity", default)]
    pub color_identity: Vec<String>,
    #[serde(default)]
    pub types: Vec<String>,
    #[serde(rename = "convertedManaCost", default)]
    pub cmc: f64,
    #[serde(rename = "manaCost", default)]
    pub mana_cost: String,
    #[serde(default)]
    pub face: String,
}

/// A published set's card list. Parsing artifact, discarded after flattening.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SetGroup {
    #[serde(default)]
    pub cards: Vec<RawCardEntry>,
}

/// The deduplicated, enriched record that is the unit of persistence.
/// Keyed by `oracle_id`; at most one exists per distinct `name` per cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalCard {
    pub oracle_id: String,
    pub name: String,
    pub search_uri: String,
    pub color: String,
    pub color_identity: String,
    pub types: Vec<String>,
    pub cmc: f64,
    pub mana_cost: String,
    pub oracle_text: String,
    pub filtered_name: String,
}

impl CanonicalCard {
    /// Enrich a surviving raw entry into its persisted form.
    pub fn from_entry(entry: RawCardEntry) -> Self {
        let search_uri = search_uri(&entry.name);
        let filtered_name = normalize_name(&entry.name);
        Self {
            oracle_id: entry.oracle_id,
            search_uri,
            color: flatten_colors(&entry.colors),
            color_identity: flatten_colors(&entry.color_identity),
            types: entry.types,
            cmc: entry.cmc,
            mana_cost: entry.mana_cost,
            oracle_text: entry.oracle_text,
            filtered_name,
            name: entry.name,
        }
    }
}

/// Lossy search-key generator: ASCII letters are kept lower-cased, `û` maps
/// to `u`, everything else is dropped. Two distinct names can collide.
pub fn normalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        match c {
            'û' => out.push('u'),
            'A'..='Z' => out.push(c.to_ascii_lowercase()),
            'a'..='z' => out.push(c),
            _ => {}
        }
    }
    out
}

/// Scryfall exact-name search URI for a card. The query anchors on exact
/// name match (`name=/^...$/`), one result per unique card, grid layout,
/// ordered by name.
pub fn search_uri(name: &str) -> String {
    let encoded = urlencoding::encode(name);
    format!(
        "https://scryfall.com/search?q=name%3D%2F%5E{encoded}%24%2F&unique=cards&as=grid&order=name"
    )
}

/// Flatten a color list into one summary string, input order preserved.
pub fn flatten_colors(colors: &[String]) -> String {
    colors.join(COLOR_SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn normalize_drops_punctuation_and_maps_the_accented_u() {
        assert_eq!(normalize_name("Lim-Dûl's Paladin"), "limdulspaladin");
    }

    #[test]
    fn normalize_lowercases_and_keeps_ascii_letters_only() {
        assert_eq!(normalize_name("Fire // Ice"), "fireice");
        assert_eq!(normalize_name("Borborygmos Enraged"), "borborygmosenraged");
        assert_eq!(normalize_name("1996 World Champion"), "worldchampion");
        assert_eq!(normalize_name(""), "");
    }

    #[test]
    fn normalize_drops_other_non_ascii() {
        assert_eq!(normalize_name("Æther Vial"), "thervial");
        assert_eq!(normalize_name("日本語"), "");
    }

    proptest! {
        #[test]
        fn normalize_is_total_and_outputs_lowercase_ascii(name in any::<String>()) {
            let out = normalize_name(&name);
            prop_assert!(out.chars().all(|c| c.is_ascii_lowercase()));
        }
    }

    #[test]
    fn search_uri_embeds_the_encoded_name_in_the_exact_match_template() {
        let uri = search_uri("Fire // Ice");
        assert_eq!(
            uri,
            "https://scryfall.com/search?q=name%3D%2F%5EFire%20%2F%2F%20Ice%24%2F&unique=cards&as=grid&order=name"
        );
    }

    #[test]
    fn flatten_joins_with_an_explicit_separator_in_input_order() {
        let colors = vec!["W".to_string(), "U".to_string(), "B".to_string()];
        assert_eq!(flatten_colors(&colors), "W,U,B");
        assert_eq!(flatten_colors(&[]), "");
        assert_eq!(flatten_colors(&["G".to_string()]), "G");
    }

    #[test]
    fn canonical_card_copies_fields_and_computes_derived_ones() {
        let entry = RawCardEntry {
            oracle_id: "id-1".into(),
            name: "Lim-Dûl's Paladin".into(),
            oracle_text: "Trample".into(),
            layout: "normal".into(),
            colors: vec!["B".into(), "R".into()],
            color_identity: vec!["B".into(), "R".into()],
            types: vec!["Creature".into()],
            cmc: 4.0,
            mana_cost: "{2}{B}{R}".into(),
            face: ACCEPTED_FACE.into(),
        };
        let card = CanonicalCard::from_entry(entry);
        assert_eq!(card.oracle_id, "id-1");
        assert_eq!(card.filtered_name, "limdulspaladin");
        assert_eq!(card.color, "B,R");
        assert!(card.search_uri.contains("Lim-D%C3%BBl%27s%20Paladin"));
        assert_eq!(card.cmc, 4.0);
    }
}
