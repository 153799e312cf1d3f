//! Built-in entity registry
//!
//! Per-source entity definitions with their pagination, chunking and key
//! tuning. New sources register here; the engine itself never hardcodes
//! entity knowledge.

use crate::entity::{EntityConfig, KeySpec};
use crate::partition::ChunkSize;
use datalift_common::{DataliftError, Result};

/// All entities registered for a source, by its lake name.
pub fn entities_for(source: &str) -> Result<Vec<EntityConfig>> {
    match source {
        "evo" => Ok(evo_entities()),
        "pipedrive" => Ok(pipedrive_entities()),
        "zendesk" => Ok(zendesk_entities()),
        other => Err(DataliftError::config(format!(
            "unknown source: {} (registered: evo, pipedrive, zendesk)",
            other
        ))),
    }
}

/// Resolve a requested subset by name, or every entity when none are named.
pub fn select(source: &str, names: &[String]) -> Result<Vec<EntityConfig>> {
    let all = entities_for(source)?;
    if names.is_empty() {
        return Ok(all);
    }
    names
        .iter()
        .map(|name| {
            all.iter().find(|e| &e.name == name).cloned().ok_or_else(|| {
                DataliftError::config(format!("unknown entity {} for source {}", name, source))
            })
        })
        .collect()
}

/// Gym management API: skip/take paging, dense activity streams. Entry-level
/// volume is high enough that weekly chunks keep task runtimes bounded.
fn evo_entities() -> Vec<EntityConfig> {
    vec![
        EntityConfig::offset("entries", "/api/v1/entries", 1000)
            .with_chunk_size(ChunkSize::Week)
            .with_date_filter("registerDateStart", "registerDateEnd")
            .with_key(KeySpec::Derived(vec![
                "date".to_string(),
                "idMember".to_string(),
                "idBranch".to_string(),
            ]))
            .with_table("stg_evo.entries_raw"),
        EntityConfig::offset("members", "/api/v1/members", 50)
            .with_date_filter("conversionDateStart", "conversionDateEnd")
            .with_key(KeySpec::Natural("idMember".to_string()))
            .with_table("stg_evo.members_raw"),
        EntityConfig::offset("receivables", "/api/v1/receivables", 100)
            .with_chunk_size(ChunkSize::Month)
            .with_date_filter("registrationDateStart", "registrationDateEnd")
            .with_key(KeySpec::Natural("idReceivable".to_string()))
            .with_table("stg_evo.receivables_raw"),
        // Small dimension, no update-time filter upstream: full snapshot.
        EntityConfig::offset("activities", "/api/v1/activities", 100)
            .with_key(KeySpec::Natural("idActivity".to_string()))
            .with_table("stg_evo.activities_raw"),
    ]
}

/// CRM API: cursor paging with `additional_data.next_cursor`, soft-deleted
/// records filtered at extraction. Cursors only span one run; across runs
/// these entities are windowed by `updated_since`/`updated_until` from the
/// timestamp watermark.
fn pipedrive_entities() -> Vec<EntityConfig> {
    vec![
        EntityConfig::cursor("deals", "/api/v2/deals", 500)
            .with_date_filter("updated_since", "updated_until")
            .with_key(KeySpec::Natural("id".to_string()))
            .with_table("stg_pipedrive.deals_raw"),
        EntityConfig::cursor("persons", "/api/v2/persons", 500)
            .with_date_filter("updated_since", "updated_until")
            .with_key(KeySpec::Natural("id".to_string()))
            .with_table("stg_pipedrive.persons_raw"),
        EntityConfig::cursor("organizations", "/api/v2/organizations", 500)
            .with_date_filter("updated_since", "updated_until")
            .with_key(KeySpec::Natural("id".to_string()))
            .with_table("stg_pipedrive.organizations_raw"),
        EntityConfig::offset("pipelines", "/api/v2/pipelines", 100)
            .with_key(KeySpec::Natural("id".to_string()))
            .with_table("stg_pipedrive.pipelines_raw"),
    ]
}

/// Support desk API: incremental cursor exports with `after_cursor` and an
/// explicit `end_of_stream` flag.
fn zendesk_entities() -> Vec<EntityConfig> {
    vec![
        EntityConfig::cursor("tickets", "/api/v2/incremental/tickets/cursor", 1000)
            .with_key(KeySpec::Natural("id".to_string()))
            .with_table("stg_zendesk.tickets_raw"),
        EntityConfig::cursor("users", "/api/v2/incremental/users/cursor", 1000)
            .with_key(KeySpec::Natural("id".to_string()))
            .with_table("stg_zendesk.users_raw"),
    ]
}
