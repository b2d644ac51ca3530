use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

use crate::error::HarvestError;

pub const CIF_EXTENSION: &str = "cif";
pub const CASEFIX_MARKER: &str = "__casefix-";

/// Opaque QPOD material identifier, e.g. `2AgBrSe2-1.Ag_Br.0.1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MaterialId(String);

impl MaterialId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MaterialId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MaterialId {
    type Err = HarvestError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let is_valid = !trimmed.is_empty()
            && !trimmed.starts_with('#')
            && !trimmed
                .chars()
                .any(|ch| ch.is_whitespace() || ch == '/' || ch == '\\');
        if !is_valid {
            return Err(HarvestError::InvalidMaterialId(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

pub fn cif_file_name(id: &MaterialId) -> String {
    format!("{id}.{CIF_EXTENSION}")
}

/// First eight hex digits of the SHA-1 of the id, matching names already on
/// disk from earlier runs.
pub fn casefix_suffix(id: &MaterialId) -> String {
    let digest = Sha1::digest(id.as_str().as_bytes());
    hex::encode(digest)[..8].to_string()
}

pub fn casefix_file_name(id: &MaterialId) -> String {
    format!("{id}{CASEFIX_MARKER}{}.{CIF_EXTENSION}", casefix_suffix(id))
}

/// Material stem of a CIF file name, with any case-fix tail removed.
/// Returns `None` for names that do not carry a `.cif` extension.
pub fn material_stem(file_name: &str) -> Option<&str> {
    let (stem, ext) = file_name.rsplit_once('.')?;
    if !ext.eq_ignore_ascii_case(CIF_EXTENSION) || stem.is_empty() {
        return None;
    }
    match stem.split_once(CASEFIX_MARKER) {
        Some((base, _)) => Some(base),
        None => Some(stem),
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_material_id_trims() {
        let id: MaterialId = "  2AgBrSe2-1.Ag_Br.0.1\n".parse().unwrap();
        assert_eq!(id.as_str(), "2AgBrSe2-1.Ag_Br.0.1");
    }

    #[test]
    fn parse_material_id_rejects_comment_and_blank() {
        assert_matches!(
            "# header".parse::<MaterialId>(),
            Err(HarvestError::InvalidMaterialId(_))
        );
        assert_matches!(
            "   ".parse::<MaterialId>(),
            Err(HarvestError::InvalidMaterialId(_))
        );
        assert_matches!(
            "a/b".parse::<MaterialId>(),
            Err(HarvestError::InvalidMaterialId(_))
        );
    }

    #[test]
    fn casefix_suffix_is_stable_hex() {
        let id: MaterialId = "ABC".parse().unwrap();
        let first = casefix_suffix(&id);
        assert_eq!(first, casefix_suffix(&id));
        assert_eq!(first.len(), 8);
        assert!(first.chars().all(|ch| ch.is_ascii_hexdigit()));

        let other: MaterialId = "abc".parse().unwrap();
        assert_ne!(first, casefix_suffix(&other));
    }

    #[test]
    fn casefix_suffix_known_values() {
        let id: MaterialId = "ABC".parse().unwrap();
        assert_eq!(casefix_suffix(&id), "3c01bdbb");
        assert_eq!(casefix_file_name(&id), "ABC__casefix-3c01bdbb.cif");
    }

    #[test]
    fn casefix_name_layout() {
        let id: MaterialId = "ABC".parse().unwrap();
        let name = casefix_file_name(&id);
        assert!(name.starts_with("ABC__casefix-"));
        assert!(name.ends_with(".cif"));
        assert_eq!(material_stem(&name), Some("ABC"));
    }

    #[test]
    fn stems_ignore_other_extensions() {
        assert_eq!(material_stem("A.cif"), Some("A"));
        assert_eq!(material_stem("A.1.CIF"), Some("A.1"));
        assert_eq!(material_stem("B__casefix-1a2b3c4d.cif"), Some("B"));
        assert_eq!(material_stem("notes.txt"), None);
        assert_eq!(material_stem("cif"), None);
        assert_eq!(material_stem(".cif"), None);
    }
}
