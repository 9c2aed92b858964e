//! The set of personas available to the consensus engine.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::types::PersonaProfile;
use crate::error::{Error, Result};

struct Registered {
    profile: PersonaProfile,
    last_used: RwLock<Option<DateTime<Utc>>>,
}

/// Validated, immutable persona set in configuration order.
///
/// The only mutable state is each persona's last-used timestamp, which is
/// advisory; concurrent touches may overwrite each other.
pub struct PersonaRegistry {
    personas: Vec<Registered>,
}

impl std::fmt::Debug for PersonaRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.personas.iter().map(|p| &p.profile.id))
            .finish()
    }
}

fn unit_interval(field: String, value: f64) -> Result<()> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(Error::config_field_invalid(
            field,
            format!("{} must be within [0, 1]", value),
        ));
    }
    Ok(())
}

impl PersonaRegistry {
    pub fn new(profiles: Vec<PersonaProfile>) -> Result<Self> {
        if profiles.is_empty() {
            return Err(Error::config_field_invalid(
                "personas",
                "at least one persona must be configured",
            ));
        }

        let mut seen = BTreeSet::new();
        for (i, p) in profiles.iter().enumerate() {
            let at = |field: &str| format!("personas[{}].{}", i, field);
            if p.id.trim().is_empty() {
                return Err(Error::config_field_invalid(at("id"), "persona id is empty"));
            }
            if !seen.insert(p.id.as_str()) {
                return Err(Error::config_field_invalid(
                    at("id"),
                    format!("duplicate persona id '{}'", p.id),
                ));
            }
            if p.expertise.iter().all(|k| k.trim().is_empty()) {
                return Err(Error::config_field_invalid(
                    at("expertise"),
                    format!("persona '{}' has an empty expertise vocabulary", p.id),
                ));
            }
            unit_interval(at("consensus_weight"), p.consensus_weight)?;
            unit_interval(at("confidence_threshold"), p.confidence_threshold)?;
        }

        Ok(Self {
            personas: profiles
                .into_iter()
                .map(|profile| Registered {
                    profile,
                    last_used: RwLock::new(None),
                })
                .collect(),
        })
    }

    pub fn get(&self, id: &str) -> Option<&PersonaProfile> {
        self.personas
            .iter()
            .find(|p| p.profile.id == id)
            .map(|p| &p.profile)
    }

    /// Profiles in configuration order.
    pub fn iter(&self) -> impl Iterator<Item = &PersonaProfile> {
        self.personas.iter().map(|p| &p.profile)
    }

    pub fn len(&self) -> usize {
        self.personas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.personas.is_empty()
    }

    /// Position in configuration order, used to order fan-out results.
    pub fn position(&self, id: &str) -> Option<usize> {
        self.personas.iter().position(|p| p.profile.id == id)
    }

    pub fn touch(&self, id: &str) {
        if let Some(p) = self.personas.iter().find(|p| p.profile.id == id) {
            *p.last_used.write() = Some(Utc::now());
        }
    }

    pub fn last_used(&self, id: &str) -> Option<DateTime<Utc>> {
        self.personas
            .iter()
            .find(|p| p.profile.id == id)
            .and_then(|p| *p.last_used.read())
    }
}
