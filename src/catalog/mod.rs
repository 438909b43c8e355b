//! Built-in posture catalog grouped by therapy type.
//!
//! The catalog is embedded at compile time and parsed once on first use.
//! Series creation only accepts posture ids listed under the chosen
//! therapy type.

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single posture in the catalog
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Posture {
    pub id: i64,
    pub name: String,
    pub sanskrit: String,
    pub instructions: String,
    pub benefits: String,
    pub modifications: String,
    pub video_url: String,
    pub image_url: String,
    /// Suggested minutes to hold the posture within a session
    pub duration_hint: i64,
}

/// Catalog entry as exposed by the therapy-types endpoint
#[derive(Debug, Clone, Serialize)]
pub struct TherapyType {
    pub id: &'static str,
    pub name: String,
    pub postures: &'static [Posture],
}

lazy_static! {
    /// Therapy type key -> postures, ordered by key
    static ref CATALOG: BTreeMap<String, Vec<Posture>> =
        serde_json::from_str(include_str!("postures.json")).unwrap();
}

/// Keys of every therapy type, in catalog order
pub fn therapy_type_keys() -> Vec<&'static str> {
    CATALOG.iter().map(|(key, _)| key.as_str()).collect()
}

/// Whether `key` names a therapy type in the catalog
pub fn is_therapy_type(key: &str) -> bool {
    CATALOG.contains_key(key)
}

/// Postures listed under a therapy type
pub fn postures_for(key: &str) -> Option<&'static [Posture]> {
    CATALOG.get(key).map(|postures| postures.as_slice())
}

/// Look up a posture by id within a therapy type
pub fn find_posture(therapy_type: &str, posture_id: i64) -> Option<&'static Posture> {
    postures_for(therapy_type)?.iter().find(|p| p.id == posture_id)
}

/// Human-readable name for a therapy-type key (`back_pain` -> `Back Pain`)
pub fn display_name(key: &str) -> String {
    key.split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// The whole catalog, for the therapy-types endpoint
pub fn therapy_types() -> Vec<TherapyType> {
    CATALOG
        .iter()
        .map(|(key, postures)| TherapyType {
            id: key.as_str(),
            name: display_name(key),
            postures: postures.as_slice(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_has_expected_types() {
        let keys = therapy_type_keys();
        assert!(keys.contains(&"anxiety"));
        assert!(keys.contains(&"arthritis"));
        assert!(keys.contains(&"back_pain"));
    }

    #[test]
    fn test_posture_lookup_is_scoped_to_type() {
        // Posture 1 belongs to anxiety, 13 to arthritis
        assert!(find_posture("anxiety", 1).is_some());
        assert!(find_posture("arthritis", 1).is_none());
        assert!(find_posture("arthritis", 13).is_some());
        assert!(find_posture("unknown", 1).is_none());
    }

    #[test]
    fn test_posture_ids_unique() {
        let mut ids: Vec<i64> = CATALOG
            .iter()
            .flat_map(|(_, postures)| postures.iter().map(|p| p.id))
            .collect();
        let total = ids.len();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), total);
    }

    #[test]
    fn test_duration_hints_positive() {
        for (_, postures) in CATALOG.iter() {
            for posture in postures {
                assert!(posture.duration_hint > 0, "posture {} has no duration", posture.id);
            }
        }
    }

    #[test]
    fn test_display_name() {
        assert_eq!(display_name("back_pain"), "Back Pain");
        assert_eq!(display_name("anxiety"), "Anxiety");
    }

    #[test]
    fn test_is_therapy_type() {
        assert!(is_therapy_type("back_pain"));
        assert!(!is_therapy_type("Back Pain"));
        assert!(!is_therapy_type(""));
    }
}
