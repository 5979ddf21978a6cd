//! Builds the per-candidate session lookup used to populate the upload form.
//!
//! The store hands back one flat row per (candidate, visit, instrument)
//! combination. The form needs, for each PSCID, the sites the candidate was
//! seen at, the visits it has, and the instruments administered per visit plus
//! across all visits. Everything here is pure so it can be exercised without a
//! database.

use indexmap::{IndexMap, IndexSet};
use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::structs::SessionJoinRow;

/// Key under which the union of every visit's instruments is reported.
pub const ALL_VISITS_KEY: &str = "all";

/// Aggregated session data keyed by PSCID, in first-seen order.
pub type SessionData = IndexMap<String, CandidateAggregate>;

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct CandidateAggregate {
    pub sites: IndexMap<i32, String>,
    #[serde(serialize_with = "serialize_self_keyed")]
    pub visits: IndexSet<String>,
    pub instruments: InstrumentScopes,
}

/// Instruments grouped per visit label, plus the cross-visit union.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstrumentScopes {
    by_visit: IndexMap<String, IndexSet<String>>,
    all: IndexSet<String>,
}

impl InstrumentScopes {
    pub fn visit(&self, visit_label: &str) -> Option<&IndexSet<String>> {
        self.by_visit.get(visit_label)
    }

    pub fn all(&self) -> &IndexSet<String> {
        &self.all
    }

    pub fn visit_labels(&self) -> impl Iterator<Item = &str> {
        self.by_visit.keys().map(String::as_str)
    }
}

impl Serialize for InstrumentScopes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.by_visit.len() + 1))?;
        for (visit, tests) in &self.by_visit {
            map.serialize_entry(visit, &SelfKeyed(tests))?;
        }
        map.serialize_entry(ALL_VISITS_KEY, &SelfKeyed(&self.all))?;
        map.end()
    }
}

// The form consumes option lists as `{value: label}` objects; for visits and
// instruments the label is the value itself.
struct SelfKeyed<'a>(&'a IndexSet<String>);

impl Serialize for SelfKeyed<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.iter().map(|v| (v, v)))
    }
}

fn serialize_self_keyed<S: Serializer>(set: &IndexSet<String>, serializer: S) -> Result<S::Ok, S::Error> {
    SelfKeyed(set).serialize(serializer)
}

/// Fold the flat join rows into per-candidate sites, visits and instruments.
///
/// `site_labels` resolves a center id to its display name; a center missing
/// from it is reported with an empty label. Rows are consumed in order, so
/// the output preserves first-seen order at every level.
#[must_use]
pub fn aggregate_sessions(rows: &[SessionJoinRow], site_labels: &IndexMap<i32, String>) -> SessionData {
    let mut sessions = SessionData::new();

    for row in rows {
        let candidate = sessions.entry(row.pscid.clone()).or_default();

        if let Some(center_id) = row.center_id {
            candidate.sites.entry(center_id).or_insert_with(|| {
                site_labels.get(&center_id).cloned().unwrap_or_default()
            });
        }

        if let Some(visit_label) = &row.visit_label {
            candidate.visits.insert(visit_label.clone());
        }

        // A visit literally labelled "all" shares the union scope's key.
        let InstrumentScopes { by_visit, all } = &mut candidate.instruments;
        let visit_tests = row
            .visit_label
            .as_ref()
            .filter(|visit| visit.as_str() != ALL_VISITS_KEY)
            .map(|visit| by_visit.entry(visit.clone()).or_default());

        if let Some(test_name) = &row.test_name {
            if let Some(tests) = visit_tests {
                tests.insert(test_name.clone());
            }
            all.insert(test_name.clone());
        }
    }

    sessions
}
