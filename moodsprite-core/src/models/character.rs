//! Character definitions served by the upstream sprite service, and the
//! camelCase shapes the dashboard consumes.

use serde::{Deserialize, Serialize};

// ============================================================================
// Upstream shapes
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpriteKeyframe {
    pub uuid: String,
    #[serde(default)]
    pub description: String,
    /// Base64 image payload
    #[serde(default)]
    pub image_data: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpriteMood {
    pub uuid: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub keyframes: Vec<SpriteKeyframe>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpriteCharacterVersion {
    pub name: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub changelog: String,
    #[serde(default)]
    pub subject_image: Option<SpriteKeyframe>,
    #[serde(default)]
    pub moods: Vec<SpriteMood>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpriteCharacter {
    pub semantic_version: String,
    pub character: SpriteCharacterVersion,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpriteCharacterHistory {
    pub current_name: String,
    pub latest_version: String,
    #[serde(default)]
    pub versions: Vec<SpriteCharacterVersion>,
}

/// Which part of the history to fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryQuery {
    /// Ask upstream for image bytes and pass them through to the dashboard.
    pub include_data: bool,
    /// Restrict the history to one semantic version.
    pub version: Option<String>,
}

// ============================================================================
// Dashboard shapes
// ============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyframeView {
    pub uuid: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_data: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MoodView {
    pub uuid: String,
    pub description: String,
    pub notes: String,
    pub keyframes: Vec<KeyframeView>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterVersionView {
    pub name: String,
    pub notes: String,
    pub changelog: String,
    /// Serialized as `null` when the character has no subject image.
    pub subject_image: Option<KeyframeView>,
    pub moods: Vec<MoodView>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterView {
    pub semantic_version: String,
    pub character: CharacterVersionView,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryView {
    pub current_name: String,
    pub latest_version: String,
    pub versions: Vec<CharacterVersionView>,
}

impl KeyframeView {
    fn from_keyframe(kf: &SpriteKeyframe, include_data: bool) -> Self {
        Self {
            uuid: kf.uuid.clone(),
            description: kf.description.clone(),
            image_data: if include_data { kf.image_data.clone() } else { None },
        }
    }
}

impl CharacterVersionView {
    pub fn from_version(v: &SpriteCharacterVersion, include_data: bool) -> Self {
        Self {
            name: v.name.clone(),
            notes: v.notes.clone(),
            changelog: v.changelog.clone(),
            subject_image: v
                .subject_image
                .as_ref()
                .map(|kf| KeyframeView::from_keyframe(kf, include_data)),
            moods: v
                .moods
                .iter()
                .map(|m| MoodView {
                    uuid: m.uuid.clone(),
                    description: m.description.clone(),
                    notes: m.notes.clone(),
                    keyframes: m
                        .keyframes
                        .iter()
                        .map(|kf| KeyframeView::from_keyframe(kf, include_data))
                        .collect(),
                })
                .collect(),
        }
    }

    pub fn keyframe_count(&self) -> usize {
        self.moods.iter().map(|m| m.keyframes.len()).sum()
    }
}

impl From<&SpriteCharacter> for CharacterView {
    fn from(c: &SpriteCharacter) -> Self {
        Self {
            semantic_version: c.semantic_version.clone(),
            character: CharacterVersionView::from_version(&c.character, true),
        }
    }
}

impl HistoryView {
    pub fn from_history(h: &SpriteCharacterHistory, include_data: bool) -> Self {
        Self {
            current_name: h.current_name.clone(),
            latest_version: h.latest_version.clone(),
            versions: h
                .versions
                .iter()
                .map(|v| CharacterVersionView::from_version(v, include_data))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_character() -> SpriteCharacter {
        SpriteCharacter {
            semantic_version: "1.0.0".to_string(),
            character: SpriteCharacterVersion {
                name: "Sera".to_string(),
                notes: "empathic interface".to_string(),
                changelog: "initial".to_string(),
                subject_image: None,
                moods: vec![SpriteMood {
                    uuid: "m1".to_string(),
                    description: "helpful".to_string(),
                    notes: String::new(),
                    keyframes: vec![
                        SpriteKeyframe {
                            uuid: "k1".to_string(),
                            description: "smiling".to_string(),
                            image_data: Some("aGVsbG8=".to_string()),
                        },
                        SpriteKeyframe {
                            uuid: "k2".to_string(),
                            description: "waving".to_string(),
                            image_data: Some("d29ybGQ=".to_string()),
                        },
                    ],
                }],
            },
        }
    }

    #[test]
    fn test_character_view_is_camel_case_with_null_subject() {
        let view = CharacterView::from(&sample_character());
        let json = serde_json::to_value(&view).unwrap();

        assert_eq!(json["semanticVersion"], "1.0.0");
        assert!(json["character"]["subjectImage"].is_null());
        assert_eq!(json["character"]["moods"][0]["keyframes"][1]["imageData"], "d29ybGQ=");
        assert_eq!(view.character.keyframe_count(), 2);
    }

    #[test]
    fn test_history_view_strips_image_data_unless_requested() {
        let history = SpriteCharacterHistory {
            current_name: "Sera".to_string(),
            latest_version: "1.0.0".to_string(),
            versions: vec![sample_character().character],
        };

        let bare = serde_json::to_value(HistoryView::from_history(&history, false)).unwrap();
        let kf = bare["versions"][0]["moods"][0]["keyframes"][0].as_object().unwrap();
        assert!(!kf.contains_key("imageData"));

        let full = serde_json::to_value(HistoryView::from_history(&history, true)).unwrap();
        assert_eq!(full["versions"][0]["moods"][0]["keyframes"][0]["imageData"], "aGVsbG8=");
        assert_eq!(full["latestVersion"], "1.0.0");
    }
}
