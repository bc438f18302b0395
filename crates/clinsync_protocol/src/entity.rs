//! Tracked entity kinds.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A logical collection tracked by the sync engine.
///
/// Entity kinds form a closed set: an unknown collection name is rejected
/// at the submit boundary rather than flowing through the queue as an
/// untyped string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    /// Patient master records.
    Patients,
    /// Scheduled appointments.
    Appointments,
    /// Treatment cost estimates.
    Estimates,
    /// Performed treatments.
    Treatments,
    /// Issued invoices.
    Invoices,
}

impl EntityKind {
    /// All tracked entity kinds, in subscription order.
    pub const ALL: [EntityKind; 5] = [
        EntityKind::Patients,
        EntityKind::Appointments,
        EntityKind::Estimates,
        EntityKind::Treatments,
        EntityKind::Invoices,
    ];

    /// Returns the canonical collection name.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Patients => "patients",
            EntityKind::Appointments => "appointments",
            EntityKind::Estimates => "estimates",
            EntityKind::Treatments => "treatments",
            EntityKind::Invoices => "invoices",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown collection name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown entity kind: {0}")]
pub struct UnknownEntity(pub String);

impl FromStr for EntityKind {
    type Err = UnknownEntity;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityKind::ALL
            .iter()
            .find(|kind| kind.as_str() == s)
            .copied()
            .ok_or_else(|| UnknownEntity(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_str() {
        for kind in EntityKind::ALL {
            assert_eq!(kind.as_str().parse::<EntityKind>().unwrap(), kind);
        }
    }

    #[test]
    fn rejects_unknown_names() {
        let err = "prescriptions".parse::<EntityKind>().unwrap_err();
        assert_eq!(err, UnknownEntity("prescriptions".into()));
    }

    #[test]
    fn serializes_as_lowercase_name() {
        let json = serde_json::to_string(&EntityKind::Estimates).unwrap();
        assert_eq!(json, "\"estimates\"");

        let back: EntityKind = serde_json::from_str(&json).unwrap();
        assert_eq!(back, EntityKind::Estimates);
    }
}
