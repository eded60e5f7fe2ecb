//! Lookup Cache: reference tables used to turn names into stable ids.
//!
//! The tables are read once per sync run and passed explicitly to every
//! stage that needs them.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{info, warn};

use crate::batch::{batch_persist, BatchOutcome};
use crate::error::AppError;
use crate::models::{
    not_in_list, CountryRow, LearningAreaRow, StateRow, Table, YearLevelRow,
};
use crate::subject::LearningAreaKind;
use crate::traits::RecordStore;

/// Snapshot of the four lookup tables.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LookupTables {
    pub countries: Vec<CountryRow>,
    pub states: Vec<StateRow>,
    pub learning_areas: Vec<LearningAreaRow>,
    pub year_levels: Vec<YearLevelRow>,
}

impl LookupTables {
    /// Country id by exact name.
    pub fn country_id(&self, name: &str) -> Option<&str> {
        self.countries
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.id.as_str())
    }

    /// Year level id for an upstream year code (`"6"` matches `Y6`).
    pub fn year_level_id(&self, year_code: &str) -> Option<&str> {
        let wanted = year_level_code(year_code);
        self.year_levels
            .iter()
            .find(|y| y.year_code == wanted)
            .map(|y| y.id.as_str())
    }

    pub fn learning_area_id(&self, area: LearningAreaKind) -> Option<&str> {
        self.learning_areas
            .iter()
            .find(|a| a.area_name == area.area_name())
            .map(|a| a.id.as_str())
    }

    /// Country id, or a `"<name> not in list"` marker.
    pub fn country_id_or_marker(&self, name: &str) -> String {
        match self.country_id(name) {
            Some(id) => id.to_string(),
            None => {
                warn!("Country '{}' not found in lookups", name);
                not_in_list(name)
            }
        }
    }

    pub fn year_level_id_or_marker(&self, year_code: &str) -> String {
        match self.year_level_id(year_code) {
            Some(id) => id.to_string(),
            None => {
                let code = year_level_code(year_code);
                warn!("Year level '{}' not found in lookups", code);
                not_in_list(&code)
            }
        }
    }

    pub fn learning_area_id_or_marker(&self, area: LearningAreaKind) -> String {
        match self.learning_area_id(area) {
            Some(id) => id.to_string(),
            None => {
                warn!("Learning area '{}' not found in lookups", area);
                not_in_list(area.area_name())
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.countries.is_empty()
            && self.states.is_empty()
            && self.learning_areas.is_empty()
            && self.year_levels.is_empty()
    }
}

/// Lookup-table code for an upstream year code.
pub fn year_level_code(year_code: &str) -> String {
    format!("Y{}", year_code.trim())
}

async fn read_table<S, T>(store: &S, table: Table) -> Result<Vec<T>, AppError>
where
    S: RecordStore + ?Sized,
    T: DeserializeOwned,
{
    let records = store
        .scan(table)
        .await
        .map_err(|e| AppError::LookupRead(format!("{}: {}", table, e)))?;

    records
        .into_iter()
        .map(|r| {
            serde_json::from_value(r.item)
                .map_err(|e| AppError::LookupRead(format!("{} row {}: {}", table, r.id, e)))
        })
        .collect()
}

/// Reads only the Country table.
pub async fn load_countries<S>(store: &S) -> Result<Vec<CountryRow>, AppError>
where
    S: RecordStore + ?Sized,
{
    read_table(store, Table::Country).await
}

/// Reads all four lookup tables.
///
/// # Errors
///
/// Returns `AppError::LookupRead` if any table cannot be read or a row does
/// not parse. No partial snapshot is returned.
pub async fn load_lookups<S>(store: &S) -> Result<LookupTables, AppError>
where
    S: RecordStore + ?Sized,
{
    let lookups = LookupTables {
        countries: read_table(store, Table::Country).await?,
        states: read_table(store, Table::State).await?,
        learning_areas: read_table(store, Table::LearningArea).await?,
        year_levels: read_table(store, Table::YearLevel).await?,
    };

    info!(
        "Lookups read: {} countries, {} states, {} learning areas, {} year levels",
        lookups.countries.len(),
        lookups.states.len(),
        lookups.learning_areas.len(),
        lookups.year_levels.len()
    );
    Ok(lookups)
}

/// Populates the lookup tables from a snapshot, e.g. one parsed from a seed file.
///
/// Stops at the first table whose write fails.
pub async fn seed_lookups<S>(
    store: &S,
    seed: &LookupTables,
    batch_size: usize,
) -> Result<Vec<BatchOutcome>, AppError>
where
    S: RecordStore + ?Sized,
{
    let outcomes = vec![
        batch_persist(store, &seed.countries, batch_size)
            .await
            .into_result()?,
        batch_persist(store, &seed.states, batch_size)
            .await
            .into_result()?,
        batch_persist(store, &seed.learning_areas, batch_size)
            .await
            .into_result()?,
        batch_persist(store, &seed.year_levels, batch_size)
            .await
            .into_result()?,
    ];
    Ok(outcomes)
}
