//! Entity Resolver: new-vs-existing decisions and upstream → local id translation.

use std::collections::{HashMap, HashSet};

use tracing::{debug, info, warn};

use crate::error::AppError;
use crate::lookup::{load_countries, LookupTables};
use crate::models::{
    new_local_id, Entity, SchoolRow, Table, UpstreamSchool, MISSING_MARKER, NO_STATE_MARKER,
};
use crate::traits::RecordStore;

/// Outcome of [`resolve_school`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchoolResolution {
    pub is_new: bool,
    pub local_id: String,
}

/// Finds the school by upstream id, inserting it if absent.
///
/// An existing school is never re-inserted. A new school gets a fresh local
/// id and its country resolved against the Country table; an unknown country
/// is stored as a `"<name> not in list"` marker.
///
/// # Errors
///
/// Returns `AppError::Resolution` if the existence query, the country read,
/// or the insert fails.
pub async fn resolve_school<S>(
    store: &S,
    school: &UpstreamSchool,
) -> Result<SchoolResolution, AppError>
where
    S: RecordStore + ?Sized,
{
    let existing = store
        .query_by_upstream_id(Table::School, &school.upstream_id)
        .await
        .map_err(|e| AppError::Resolution(e.to_string()))?;

    if let Some(found) = existing.into_iter().next() {
        info!(
            "School {} already exists as {}",
            school.upstream_id, found.id
        );
        return Ok(SchoolResolution {
            is_new: false,
            local_id: found.id,
        });
    }

    let countries = load_countries(store)
        .await
        .map_err(|e| AppError::Resolution(e.to_string()))?;
    let lookups = LookupTables {
        countries,
        ..LookupTables::default()
    };

    let row = SchoolRow {
        id: new_local_id(),
        upstream_id: school.upstream_id.clone(),
        school_name: school.name.clone(),
        address: school.address1.clone(),
        town: school.town.clone(),
        country: school.country.clone(),
        country_id: lookups.country_id_or_marker(&school.country),
        state_id: NO_STATE_MARKER.to_string(),
        student_login_enabled: false,
    };

    let record = row.to_record()?;
    store
        .put(Table::School, &record)
        .await
        .map_err(|e| AppError::Resolution(e.to_string()))?;

    info!("School {} saved as {}", school.upstream_id, row.id);
    Ok(SchoolResolution {
        is_new: true,
        local_id: row.id,
    })
}

/// Transient upstream id → local id translation for one entity kind.
///
/// Lives for a single sync run and is never persisted.
#[derive(Debug, Clone, Default)]
pub struct IdMap {
    kind: &'static str,
    entries: HashMap<String, String>,
}

impl IdMap {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            entries: HashMap::new(),
        }
    }

    /// Mints a fresh local id for every distinct upstream id.
    pub fn mint<'a, I>(kind: &'static str, upstream_ids: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut map = Self::new(kind);
        for upstream_id in upstream_ids {
            map.entries
                .entry(upstream_id.to_string())
                .or_insert_with(new_local_id);
        }
        map
    }

    pub fn insert(&mut self, upstream_id: impl Into<String>, local_id: impl Into<String>) {
        self.entries.insert(upstream_id.into(), local_id.into());
    }

    pub fn get(&self, upstream_id: &str) -> Option<&str> {
        self.entries.get(upstream_id).map(String::as_str)
    }

    /// Local id, or [`MISSING_MARKER`] if the upstream id was never translated.
    pub fn resolve_or_missing(&self, upstream_id: &str) -> String {
        match self.get(upstream_id) {
            Some(id) => id.to_string(),
            None => {
                warn!(
                    "No local {} id for upstream id {}, writing '{}'",
                    self.kind, upstream_id, MISSING_MARKER
                );
                MISSING_MARKER.to_string()
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Local ids for a set of people (students or teachers).
#[derive(Debug, Clone, Default)]
pub struct PeopleIds {
    pub ids: IdMap,
    /// Upstream ids already present in the store; these are not re-inserted.
    pub existing: HashSet<String>,
}

/// Assigns local ids to people, optionally reusing those already stored.
///
/// With `reuse_existing` off every person gets a fresh id, so repeated runs
/// insert duplicates.
pub async fn resolve_people<'a, S, I>(
    store: &S,
    table: Table,
    upstream_ids: I,
    reuse_existing: bool,
) -> Result<PeopleIds, AppError>
where
    S: RecordStore + ?Sized,
    I: IntoIterator<Item = &'a str>,
{
    let kind = table.as_str();
    let mut people = PeopleIds {
        ids: IdMap::new(kind),
        existing: HashSet::new(),
    };

    for upstream_id in upstream_ids {
        if people.ids.get(upstream_id).is_some() {
            continue;
        }
        if reuse_existing {
            let found = store.query_by_upstream_id(table, upstream_id).await?;
            if let Some(record) = found.into_iter().next() {
                debug!("{} {} already stored as {}", kind, upstream_id, record.id);
                people.ids.insert(upstream_id, record.id);
                people.existing.insert(upstream_id.to_string());
                continue;
            }
        }
        people.ids.insert(upstream_id, new_local_id());
    }

    Ok(people)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lookup::seed_lookups;
    use crate::lookup::tests::sample_lookups;
    use crate::memory::InMemoryStore;
    use crate::models::Record;
    use serde_json::json;

    fn school() -> UpstreamSchool {
        UpstreamSchool {
            upstream_id: "A5960542".to_string(),
            name: "Wonde ANZ Testing School".to_string(),
            urn: Some(999939),
            address1: Some("1 George St".to_string()),
            address2: None,
            town: Some("Sydney".to_string()),
            country: "Australia".to_string(),
        }
    }

    #[tokio::test]
    async fn test_resolve_school_is_idempotent() {
        let store = InMemoryStore::new();
        seed_lookups(&store, &sample_lookups(), 25).await.unwrap();

        let first = resolve_school(&store, &school()).await.unwrap();
        let second = resolve_school(&store, &school()).await.unwrap();

        assert!(first.is_new);
        assert!(!second.is_new);
        assert_eq!(first.local_id, second.local_id);
        assert_eq!(store.count(Table::School), 1);
        assert_eq!(store.batch_sizes(Table::School), vec![1]);

        let saved = &store.records(Table::School)[0];
        assert_eq!(saved.item["countryId"], "country-au");
        assert_eq!(saved.item["stateId"], "Wonde has no states");
    }

    #[tokio::test]
    async fn test_unknown_country_gets_marker() {
        let store = InMemoryStore::new();
        let mut upstream = school();
        upstream.country = "Narnia".to_string();

        let resolution = resolve_school(&store, &upstream).await.unwrap();
        assert!(resolution.is_new);
        let saved = &store.records(Table::School)[0];
        assert_eq!(saved.item["countryId"], "Narnia not in list");
    }

    #[tokio::test]
    async fn test_write_failure_is_resolution_error() {
        let store = InMemoryStore::new();
        store.fail_after(Table::School, 0);
        let err = resolve_school(&store, &school()).await.unwrap_err();
        assert!(matches!(err, AppError::Resolution(_)));
    }

    #[test]
    fn test_id_map_mint_dedups() {
        let map = IdMap::mint("Classroom", ["c1", "c2", "c1"]);
        assert_eq!(map.len(), 2);
        assert_ne!(map.get("c1"), map.get("c2"));
        assert_eq!(map.resolve_or_missing("zz"), MISSING_MARKER);
    }

    #[tokio::test]
    async fn test_resolve_people_reuses_existing_when_enabled() {
        let store = InMemoryStore::new();
        store
            .put(
                Table::Student,
                &Record {
                    id: "local-s1".to_string(),
                    upstream_id: Some("S1".to_string()),
                    item: json!({}),
                },
            )
            .await
            .unwrap();

        let reused = resolve_people(&store, Table::Student, ["S1", "S2"], true)
            .await
            .unwrap();
        assert_eq!(reused.ids.get("S1"), Some("local-s1"));
        assert!(reused.existing.contains("S1"));
        assert!(!reused.existing.contains("S2"));

        let fresh = resolve_people(&store, Table::Student, ["S1", "S2"], false)
            .await
            .unwrap();
        assert_ne!(fresh.ids.get("S1"), Some("local-s1"));
        assert!(fresh.existing.is_empty());
    }
}
