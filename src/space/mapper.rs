//! Metadata -> coordinate mapping through fixed lookup tables.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::coordinate::{Coordinate4D, BRANCH_MAX, EXPERTISE_RANGE, LEVEL_RANGE, PILLAR_RANGE};
use crate::error::{Error, Result};

/// Largest section number that still fits under the branch ceiling.
const MAX_SECTION: u32 = 5;

/// Categorical metadata that positions a regulatory item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemMetadata {
    /// Regulatory domain, e.g. "COMPLIANCE"
    #[serde(default)]
    pub domain: Option<String>,
    /// Structural complexity tier, e.g. "INTERMEDIATE"
    #[serde(default)]
    pub complexity: Option<String>,
    #[serde(default)]
    pub section: u32,
    #[serde(default)]
    pub subsection: u32,
    /// Required reader expertise, e.g. "ADVANCED"
    #[serde(default)]
    pub expertise: Option<String>,
}

/// Lookup tables for the three categorical axes plus their fallbacks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinateTables {
    pub pillars: BTreeMap<String, u8>,
    pub levels: BTreeMap<String, u8>,
    pub expertise: BTreeMap<String, u8>,
    pub default_pillar: u8,
    pub default_level: u8,
    pub default_expertise: u8,
}

fn table(entries: &[(&str, u8)]) -> BTreeMap<String, u8> {
    entries.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}

impl Default for CoordinateTables {
    fn default() -> Self {
        Self {
            pillars: table(&[
                ("SAFETY", 1),
                ("QUALITY", 2),
                ("COMPLIANCE", 3),
                ("OPERATIONS", 4),
                ("GOVERNANCE", 5),
            ]),
            levels: table(&[
                ("FOUNDATIONAL", 1),
                ("INTERMEDIATE", 2),
                ("ADVANCED", 3),
                ("EXPERT", 4),
            ]),
            expertise: table(&[
                ("ENTRY", 1),
                ("INTERMEDIATE", 2),
                ("ADVANCED", 3),
                ("EXPERT", 4),
                ("SPECIALIST", 5),
            ]),
            default_pillar: 3,
            default_level: 2,
            default_expertise: 3,
        }
    }
}

impl CoordinateTables {
    /// Check every table value and fallback against its axis range.
    pub fn validate(&self) -> Result<()> {
        let axes = [
            ("coordinates.pillars", &self.pillars, self.default_pillar, PILLAR_RANGE),
            ("coordinates.levels", &self.levels, self.default_level, LEVEL_RANGE),
            ("coordinates.expertise", &self.expertise, self.default_expertise, EXPERTISE_RANGE),
        ];

        for (field, entries, fallback, (lo, hi)) in axes {
            let in_range = |v: u8| v >= lo && v <= hi;
            if let Some((name, value)) = entries.iter().find(|(_, v)| !in_range(**v)) {
                return Err(Error::config_field_invalid(
                    field,
                    format!("'{}' maps to {} (must be {}..={})", name, value, lo, hi),
                ));
            }
            if !in_range(fallback) {
                return Err(Error::config_field_invalid(
                    field,
                    format!("fallback {} must be {}..={}", fallback, lo, hi),
                ));
            }
        }
        Ok(())
    }
}

/// Pure mapping from metadata to a coordinate.
///
/// Unknown or missing categorical values resolve to the configured
/// fallback instead of failing, so the same metadata always lands on the
/// same point.
#[derive(Debug, Clone)]
pub struct CoordinateMapper {
    tables: CoordinateTables,
}

impl CoordinateMapper {
    pub fn new(tables: CoordinateTables) -> Result<Self> {
        tables.validate()?;
        // Keys compare upper-cased
        let upper = |m: BTreeMap<String, u8>| -> BTreeMap<String, u8> {
            m.into_iter().map(|(k, v)| (k.to_uppercase(), v)).collect()
        };
        Ok(Self {
            tables: CoordinateTables {
                pillars: upper(tables.pillars),
                levels: upper(tables.levels),
                expertise: upper(tables.expertise),
                ..tables
            },
        })
    }

    pub fn tables(&self) -> &CoordinateTables {
        &self.tables
    }

    fn lookup(map: &BTreeMap<String, u8>, key: Option<&str>, fallback: u8) -> u8 {
        key.and_then(|k| map.get(k.trim().to_uppercase().as_str()).copied())
            .unwrap_or(fallback)
    }

    pub fn pillar_for(&self, domain: Option<&str>) -> u8 {
        Self::lookup(&self.tables.pillars, domain, self.tables.default_pillar)
    }

    pub fn level_for(&self, complexity: Option<&str>) -> u8 {
        Self::lookup(&self.tables.levels, complexity, self.tables.default_level)
    }

    pub fn expertise_for(&self, expertise: Option<&str>) -> u8 {
        Self::lookup(&self.tables.expertise, expertise, self.tables.default_expertise)
    }

    /// `section.subsection` as one decimal, clamped under the branch ceiling.
    pub fn branch_for(section: u32, subsection: u32) -> f64 {
        let section = section.min(MAX_SECTION);
        let branch = format!("{}.{}", section, subsection)
            .parse::<f64>()
            .unwrap_or(f64::from(section));
        branch.min(BRANCH_MAX)
    }

    pub fn map(&self, metadata: &ItemMetadata) -> Result<Coordinate4D> {
        Coordinate4D::new(
            self.pillar_for(metadata.domain.as_deref()),
            self.level_for(metadata.complexity.as_deref()),
            Self::branch_for(metadata.section, metadata.subsection),
            self.expertise_for(metadata.expertise.as_deref()),
        )
    }
}

impl Default for CoordinateMapper {
    fn default() -> Self {
        Self {
            tables: CoordinateTables::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(domain: &str, complexity: &str, section: u32, subsection: u32, expertise: &str) -> ItemMetadata {
        ItemMetadata {
            domain: Some(domain.to_string()),
            complexity: Some(complexity.to_string()),
            section,
            subsection,
            expertise: Some(expertise.to_string()),
        }
    }

    #[test]
    fn test_map_known_values() {
        let mapper = CoordinateMapper::default();
        let coord = mapper
            .map(&meta("compliance", "Intermediate", 1, 5, "INTERMEDIATE"))
            .unwrap();
        assert_eq!(coord, Coordinate4D::new(3, 2, 1.5, 2).unwrap());
    }

    #[test]
    fn test_unknown_values_fall_back() {
        let mapper = CoordinateMapper::default();
        let coord = mapper.map(&meta("astrology", "byzantine", 2, 0, "guru")).unwrap();
        assert_eq!(coord, Coordinate4D::new(3, 2, 2.0, 3).unwrap());

        let empty = mapper.map(&ItemMetadata::default()).unwrap();
        assert_eq!(empty, Coordinate4D::new(3, 2, 0.0, 3).unwrap());
    }

    #[test]
    fn test_branch_clamps() {
        assert_eq!(CoordinateMapper::branch_for(9, 0), 5.0);
        assert_eq!(CoordinateMapper::branch_for(5, 7), 5.0);
        assert_eq!(CoordinateMapper::branch_for(4, 25), 4.25);
    }

    #[test]
    fn test_map_is_deterministic() {
        let mapper = CoordinateMapper::default();
        let m = meta("SAFETY", "EXPERT", 3, 14, "SPECIALIST");
        let first = mapper.map(&m).unwrap();
        for _ in 0..10 {
            assert_eq!(mapper.map(&m).unwrap(), first);
        }
    }

    #[test]
    fn test_custom_tables_are_case_insensitive() {
        let mut tables = CoordinateTables::default();
        tables.pillars.insert("privacy".to_string(), 5);
        let mapper = CoordinateMapper::new(tables).unwrap();
        assert_eq!(mapper.pillar_for(Some("PRIVACY")), 5);
        assert_eq!(mapper.pillar_for(Some("Privacy")), 5);
    }

    #[test]
    fn test_invalid_tables_rejected() {
        let mut tables = CoordinateTables::default();
        tables.levels.insert("IMPOSSIBLE".to_string(), 9);
        assert!(CoordinateMapper::new(tables).is_err());

        let tables = CoordinateTables {
            default_expertise: 0,
            ..Default::default()
        };
        assert!(CoordinateMapper::new(tables).is_err());
    }
}
