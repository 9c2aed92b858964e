//! Points in the 4D regulatory space and their Nuremberg codes.
//!
//! Axes: pillar (regulatory domain), level (structural complexity),
//! branch (section.subsection packed into one decimal) and expertise
//! (required reader expertise).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const PILLAR_RANGE: (u8, u8) = (1, 5);
pub const LEVEL_RANGE: (u8, u8) = (1, 4);
pub const EXPERTISE_RANGE: (u8, u8) = (1, 5);
pub const BRANCH_MAX: f64 = 5.0;

// ─────────────────────────────────────────────────────────────────
// Coordinate4D
// ─────────────────────────────────────────────────────────────────

/// A fully populated, range-checked position in the regulatory space.
///
/// Fields are private so every value in circulation went through
/// [`Coordinate4D::new`]; deserialization is checked the same way.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawCoordinate")]
pub struct Coordinate4D {
    pillar: u8,
    level: u8,
    branch: f64,
    expertise: u8,
}

#[derive(Deserialize)]
struct RawCoordinate {
    pillar: u8,
    level: u8,
    branch: f64,
    expertise: u8,
}

impl TryFrom<RawCoordinate> for Coordinate4D {
    type Error = Error;

    fn try_from(raw: RawCoordinate) -> Result<Self> {
        Coordinate4D::new(raw.pillar, raw.level, raw.branch, raw.expertise)
    }
}

fn check_axis(name: &str, value: u8, (lo, hi): (u8, u8)) -> Result<()> {
    if value < lo || value > hi {
        return Err(Error::invalid_coordinate(format!(
            "{} {} outside {}..={}",
            name, value, lo, hi
        )));
    }
    Ok(())
}

impl Coordinate4D {
    pub fn new(pillar: u8, level: u8, branch: f64, expertise: u8) -> Result<Self> {
        check_axis("pillar", pillar, PILLAR_RANGE)?;
        check_axis("level", level, LEVEL_RANGE)?;
        check_axis("expertise", expertise, EXPERTISE_RANGE)?;
        if !branch.is_finite() || !(0.0..=BRANCH_MAX).contains(&branch) {
            return Err(Error::invalid_coordinate(format!(
                "branch {} outside 0.0..={}",
                branch, BRANCH_MAX
            )));
        }

        Ok(Self {
            pillar,
            level,
            branch,
            expertise,
        })
    }

    pub fn pillar(&self) -> u8 {
        self.pillar
    }

    pub fn level(&self) -> u8 {
        self.level
    }

    pub fn branch(&self) -> f64 {
        self.branch
    }

    pub fn expertise(&self) -> u8 {
        self.expertise
    }

    /// All four axes as homogeneous reals.
    pub fn as_array(&self) -> [f64; 4] {
        [
            f64::from(self.pillar),
            f64::from(self.level),
            self.branch,
            f64::from(self.expertise),
        ]
    }

    /// Euclidean distance over the four axes.
    pub fn distance(&self, other: &Coordinate4D) -> f64 {
        self.as_array()
            .iter()
            .zip(other.as_array().iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f64>()
            .sqrt()
    }

    /// The Nuremberg code addressing this coordinate.
    pub fn nuremberg(&self) -> NurembergNumber {
        NurembergNumber(*self)
    }
}

impl fmt::Display for Coordinate4D {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}, {}, {})",
            self.pillar, self.level, self.branch, self.expertise
        )
    }
}

// ─────────────────────────────────────────────────────────────────
// Nuremberg Number
// ─────────────────────────────────────────────────────────────────

/// Four dot-separated integer groups `P.L.B.E` mapping onto a coordinate.
///
/// The first digit of `B` is the section and the remaining digits are the
/// subsection, so `3.2.15.2` addresses branch 1.5 and `1.1.4.3` branch 4.0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NurembergNumber(Coordinate4D);

impl NurembergNumber {
    pub fn coordinate(&self) -> Coordinate4D {
        self.0
    }
}

impl From<NurembergNumber> for Coordinate4D {
    fn from(n: NurembergNumber) -> Self {
        n.0
    }
}

fn parse_group(code: &str, group: &str, name: &str) -> Result<u8> {
    if group.is_empty() || !group.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::invalid_coordinate(format!(
            "Nuremberg number '{}' has a non-numeric {} group",
            code, name
        )));
    }
    group.parse::<u8>().map_err(|_| {
        Error::invalid_coordinate(format!(
            "Nuremberg number '{}' has an oversized {} group",
            code, name
        ))
    })
}

fn parse_branch(code: &str, group: &str) -> Result<f64> {
    if group.is_empty() || !group.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::invalid_coordinate(format!(
            "Nuremberg number '{}' has a non-numeric branch group",
            code
        )));
    }
    let (section, subsection) = group.split_at(1);
    let decimal = if subsection.is_empty() {
        section.to_string()
    } else {
        format!("{}.{}", section, subsection)
    };
    decimal.parse::<f64>().map_err(|e| {
        Error::invalid_coordinate(format!("Nuremberg number '{}': {}", code, e))
    })
}

impl FromStr for NurembergNumber {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let code = s.trim();
        let groups: Vec<&str> = code.split('.').collect();
        if groups.len() != 4 {
            return Err(Error::invalid_coordinate(format!(
                "Nuremberg number '{}' must have four groups, found {}",
                code,
                groups.len()
            )));
        }

        let pillar = parse_group(code, groups[0], "pillar")?;
        let level = parse_group(code, groups[1], "level")?;
        let branch = parse_branch(code, groups[2])?;
        let expertise = parse_group(code, groups[3], "expertise")?;

        Coordinate4D::new(pillar, level, branch, expertise).map(NurembergNumber)
    }
}

impl fmt::Display for NurembergNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = self.0;
        // Shortest round-tripping decimal, dot removed: 1.5 -> "15", 4.0 -> "4"
        let branch = format!("{}", c.branch).replace('.', "");
        write!(f, "{}.{}.{}.{}", c.pillar, c.level, branch, c.expertise)
    }
}

impl Serialize for NurembergNumber {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for NurembergNumber {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(p: u8, l: u8, b: f64, e: u8) -> Coordinate4D {
        Coordinate4D::new(p, l, b, e).unwrap()
    }

    #[test]
    fn test_rejects_out_of_range_axes() {
        assert!(Coordinate4D::new(0, 2, 1.0, 2).is_err());
        assert!(Coordinate4D::new(6, 2, 1.0, 2).is_err());
        assert!(Coordinate4D::new(3, 5, 1.0, 2).is_err());
        assert!(Coordinate4D::new(3, 2, 5.01, 2).is_err());
        assert!(Coordinate4D::new(3, 2, -0.1, 2).is_err());
        assert!(Coordinate4D::new(3, 2, f64::NAN, 2).is_err());
        assert!(Coordinate4D::new(3, 2, 1.0, 0).is_err());
        assert!(Coordinate4D::new(5, 4, 5.0, 5).is_ok());
    }

    #[test]
    fn test_distance() {
        let a = c(3, 2, 1.5, 2);
        let b = c(3, 2, 1.0, 2);
        assert!((a.distance(&b) - 0.5).abs() < 1e-12);
        assert_eq!(a.distance(&a), 0.0);

        let origin = c(1, 1, 0.0, 1);
        let far = c(2, 2, 1.0, 2);
        assert!((origin.distance(&far) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_nuremberg_parse() {
        let n: NurembergNumber = "3.2.15.2".parse().unwrap();
        assert_eq!(n.coordinate(), c(3, 2, 1.5, 2));

        let whole: NurembergNumber = "1.1.4.3".parse().unwrap();
        assert_eq!(whole.coordinate().branch(), 4.0);

        let leading_zero: NurembergNumber = "2.3.025.1".parse().unwrap();
        assert!((leading_zero.coordinate().branch() - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_nuremberg_rejects_malformed() {
        assert!("3.2.15".parse::<NurembergNumber>().is_err());
        assert!("3.2.x.2".parse::<NurembergNumber>().is_err());
        assert!("3..15.2".parse::<NurembergNumber>().is_err());
        assert!("9.2.15.2".parse::<NurembergNumber>().is_err());
        assert!("3.2.61.2".parse::<NurembergNumber>().is_err());
    }

    #[test]
    fn test_nuremberg_format_is_inverse_of_parse() {
        for code in ["3.2.15.2", "1.1.4.3", "5.4.5.5", "2.3.025.1", "4.1.0.1"] {
            let n: NurembergNumber = code.parse().unwrap();
            assert_eq!(n.to_string(), code);
        }
        assert_eq!(c(3, 2, 1.5, 2).nuremberg().to_string(), "3.2.15.2");
    }

    #[test]
    fn test_deserialize_validates() {
        let ok: Coordinate4D =
            serde_json::from_str(r#"{"pillar":3,"level":2,"branch":1.0,"expertise":2}"#).unwrap();
        assert_eq!(ok, c(3, 2, 1.0, 2));

        let bad = serde_json::from_str::<Coordinate4D>(
            r#"{"pillar":7,"level":2,"branch":1.0,"expertise":2}"#,
        );
        assert!(bad.is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(c(3, 2, 1.5, 2).to_string(), "(3, 2, 1.5, 2)");
    }
}
