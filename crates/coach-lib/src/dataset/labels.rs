//! Canonical technique-error labels
//!
//! Free-text captions are mapped onto a closed label set through a fixed
//! synonym table. A caption may name several errors separated by `,`, `;`,
//! `+` or `/`. A single unknown token rejects the whole caption.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Technique errors a squat can be annotated with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Label {
    KneesIn,
    ShallowDepth,
    HeelsOff,
    ForwardLean,
}

impl Label {
    /// Labels in their canonical vector order
    pub const ALL: [Label; 4] = [
        Label::KneesIn,
        Label::ShallowDepth,
        Label::HeelsOff,
        Label::ForwardLean,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Label::KneesIn => "knees_in",
            Label::ShallowDepth => "shallow_depth",
            Label::HeelsOff => "heels_off",
            Label::ForwardLean => "forward_lean",
        }
    }
}

/// Multi-label annotation: one flag per [`Label`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LabelSet {
    pub knees_in: bool,
    pub shallow_depth: bool,
    pub heels_off: bool,
    pub forward_lean: bool,
}

impl LabelSet {
    pub fn insert(&mut self, label: Label) {
        *self.slot(label) = true;
    }

    pub fn contains(&self, label: Label) -> bool {
        match label {
            Label::KneesIn => self.knees_in,
            Label::ShallowDepth => self.shallow_depth,
            Label::HeelsOff => self.heels_off,
            Label::ForwardLean => self.forward_lean,
        }
    }

    /// Flags in [`Label::ALL`] order
    pub fn to_vector(&self) -> [bool; 4] {
        Label::ALL.map(|l| self.contains(l))
    }

    pub fn is_clean(&self) -> bool {
        !self.to_vector().iter().any(|f| *f)
    }

    fn slot(&mut self, label: Label) -> &mut bool {
        match label {
            Label::KneesIn => &mut self.knees_in,
            Label::ShallowDepth => &mut self.shallow_depth,
            Label::HeelsOff => &mut self.heels_off,
            Label::ForwardLean => &mut self.forward_lean,
        }
    }
}

/// The caption could not be mapped onto the label set
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("label {raw:?} is not recognized")]
pub struct LabelInvalid {
    pub raw: String,
}

/// `None` marks a rep annotated as technically clean
const SYNONYMS: &[(&str, Option<Label>)] = &[
    ("knees in", Some(Label::KneesIn)),
    ("valgus", Some(Label::KneesIn)),
    ("knee valgus", Some(Label::KneesIn)),
    ("knee cave", Some(Label::KneesIn)),
    ("колени внутрь", Some(Label::KneesIn)),
    ("shallow depth", Some(Label::ShallowDepth)),
    ("shallow", Some(Label::ShallowDepth)),
    ("not deep", Some(Label::ShallowDepth)),
    ("half squat", Some(Label::ShallowDepth)),
    ("неглубоко", Some(Label::ShallowDepth)),
    ("heels off", Some(Label::HeelsOff)),
    ("heel lift", Some(Label::HeelsOff)),
    ("heels up", Some(Label::HeelsOff)),
    ("пятки", Some(Label::HeelsOff)),
    ("forward lean", Some(Label::ForwardLean)),
    ("lean", Some(Label::ForwardLean)),
    ("torso lean", Some(Label::ForwardLean)),
    ("наклон", Some(Label::ForwardLean)),
    ("ok", None),
    ("good", None),
    ("correct", None),
    ("clean", None),
    ("норм", None),
];

const SEPARATORS: &[char] = &[',', ';', '+', '/'];

/// Map a raw caption onto the closed label set.
///
/// Pure: the same text always yields the same result.
pub fn canonicalize(raw: &str) -> Result<LabelSet, LabelInvalid> {
    let invalid = || LabelInvalid {
        raw: raw.to_string(),
    };

    let tokens: Vec<String> = raw
        .split(SEPARATORS)
        .map(normalize)
        .filter(|t| !t.is_empty())
        .collect();
    if tokens.is_empty() {
        return Err(invalid());
    }

    let mut labels = LabelSet::default();
    let mut clean = false;
    for token in &tokens {
        match lookup(token).ok_or_else(invalid)? {
            Some(label) => labels.insert(label),
            None => clean = true,
        }
    }

    // "ok, valgus" contradicts itself
    if clean && !labels.is_clean() {
        return Err(invalid());
    }
    Ok(labels)
}

fn lookup(token: &str) -> Option<Option<Label>> {
    SYNONYMS
        .iter()
        .find(|(synonym, _)| *synonym == token)
        .map(|(_, label)| *label)
}

/// Lowercase, treat `_`/`-` as spaces and collapse whitespace
fn normalize(token: &str) -> String {
    token
        .to_lowercase()
        .replace(['_', '-'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valgus_maps_to_knees_in_only() {
        let labels = canonicalize("valgus").unwrap();
        assert_eq!(
            labels,
            LabelSet {
                knees_in: true,
                shallow_depth: false,
                heels_off: false,
                forward_lean: false,
            }
        );
    }

    #[test]
    fn test_case_and_separator_insensitive() {
        assert_eq!(canonicalize("  Knees_In ").unwrap(), canonicalize("knees-in").unwrap());
        assert_eq!(
            canonicalize("SHALLOW + heel lift").unwrap().to_vector(),
            [false, true, true, false]
        );
    }

    #[test]
    fn test_canonical_names_round_trip() {
        for label in Label::ALL {
            let set = canonicalize(label.name()).unwrap();
            assert!(set.contains(label));
            assert_eq!(set.to_vector().iter().filter(|f| **f).count(), 1);
        }
    }

    #[test]
    fn test_clean_label_is_all_false() {
        let set = canonicalize("OK").unwrap();
        assert!(set.is_clean());
    }

    #[test]
    fn test_unknown_text_is_invalid_never_partial() {
        assert_eq!(
            canonicalize("valgus, wobbly bar"),
            Err(LabelInvalid {
                raw: "valgus, wobbly bar".to_string()
            })
        );
        assert!(canonicalize("nice squat bro").is_err());
        assert!(canonicalize("   ").is_err());
        assert!(canonicalize("ok, lean").is_err());
    }

    #[test]
    fn test_cyrillic_synonyms() {
        assert!(canonicalize("Колени внутрь").unwrap().knees_in);
        assert!(canonicalize("наклон").unwrap().forward_lean);
    }

    #[test]
    fn test_deterministic() {
        let a = canonicalize("lean; shallow");
        let b = canonicalize("lean; shallow");
        assert_eq!(a, b);
    }

    #[test]
    fn test_serialized_as_label_map() {
        let json = serde_json::to_value(canonicalize("heels up").unwrap()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "knees_in": false,
                "shallow_depth": false,
                "heels_off": true,
                "forward_lean": false
            })
        );
    }
}
