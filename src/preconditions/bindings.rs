//! Database bindings and annotation versions.
//!
//! Both are resolved once per assembly and cached in the checkpoint under
//! `ingestion.database.<assembly>` and `ingestion.vep.<assembly>`. A cached
//! value is never recomputed and causes no catalog call.

use super::PreconditionError;
use crate::catalog::{InsertOutcome, MetadataCatalog};
use crate::checkpoint::CheckpointStore;
use crate::models::{DatabaseBinding, UnitOfWork};
use tracing::{debug, info, warn};

/// Resolves `(taxonomy, assembly)` to a variant warehouse database.
pub struct BindingResolver<'a> {
    catalog: &'a dyn MetadataCatalog,
}

impl<'a> BindingResolver<'a> {
    /// Resolver backed by a catalog.
    #[must_use]
    pub fn new(catalog: &'a dyn MetadataCatalog) -> Self {
        Self { catalog }
    }

    /// Binding for every assembly the unit of work names.
    ///
    /// New bindings are written to the checkpoint and flushed before this
    /// returns.
    ///
    /// # Errors
    ///
    /// Returns `PreconditionError::MetadataInconsistency` if the catalog has
    /// no database name for an assembly, or a catalog/checkpoint error.
    pub async fn resolve_all(
        &self,
        store: &mut CheckpointStore,
        unit: &UnitOfWork,
    ) -> Result<Vec<DatabaseBinding>, PreconditionError> {
        let mut bindings = Vec::new();
        for assembly in unit.assembly_accessions() {
            bindings.push(self.resolve(store, unit.taxonomy_id, &assembly).await?);
        }
        Ok(bindings)
    }

    /// Binding for one assembly.
    ///
    /// # Errors
    ///
    /// See [`BindingResolver::resolve_all`].
    pub async fn resolve(
        &self,
        store: &mut CheckpointStore,
        taxonomy_id: u32,
        assembly_accession: &str,
    ) -> Result<DatabaseBinding, PreconditionError> {
        if let Some(db_name) =
            store.get_as::<String>(&["ingestion", "database", assembly_accession, "db_name"])?
        {
            debug!(assembly = assembly_accession, db_name = %db_name, "database binding cached");
            return Ok(DatabaseBinding {
                taxonomy_id,
                assembly_accession: assembly_accession.to_string(),
                db_name,
            });
        }

        let db_name = self
            .catalog
            .resolve_database_name(taxonomy_id, assembly_accession)
            .await?
            .ok_or_else(|| {
                PreconditionError::MetadataInconsistency(format!(
                    "database name for taxonomy {taxonomy_id} and assembly \
                     {assembly_accession} could not be retrieved or constructed"
                ))
            })?;

        match self
            .catalog
            .insert_assembly_and_taxonomy(taxonomy_id, assembly_accession)
            .await?
        {
            InsertOutcome::Inserted => {
                info!(assembly = assembly_accession, taxonomy_id, "registered assembly");
            }
            InsertOutcome::AlreadyExists => {
                warn!(
                    assembly = assembly_accession,
                    taxonomy_id, "assembly set already exists"
                );
            }
        }

        if self.catalog.provision_variant_database(&db_name).await? == InsertOutcome::Inserted {
            info!(db_name = %db_name, "provisioned variant database");
        }

        store.set_ingestion(&["database", assembly_accession, "db_name"], &db_name)?;
        store.flush()?;
        Ok(DatabaseBinding {
            taxonomy_id,
            assembly_accession: assembly_accession.to_string(),
            db_name,
        })
    }
}

/// Look up annotation versions for each brokered assembly that has none
/// recorded yet.
///
/// # Errors
///
/// Returns `PreconditionError::MetadataInconsistency` if an assembly has no
/// database binding, or a catalog/checkpoint error.
pub async fn fill_vep_versions(
    catalog: &dyn MetadataCatalog,
    store: &mut CheckpointStore,
    unit: &UnitOfWork,
    cache_assembly_name: Option<&str>,
) -> Result<(), PreconditionError> {
    let mut changed = false;
    for grouping in &unit.groupings {
        let assembly = grouping.assembly_accession.as_str();
        if store.ingestion(&["vep", assembly]).is_some() {
            continue;
        }
        let db_name = store
            .get_as::<String>(&["ingestion", "database", assembly, "db_name"])?
            .ok_or_else(|| {
                PreconditionError::MetadataInconsistency(format!(
                    "no database binding recorded for assembly {assembly}"
                ))
            })?;
        let versions = catalog
            .vep_versions(&db_name, assembly, cache_assembly_name)
            .await?;
        if versions.version.is_none() || versions.cache_version.is_none() {
            warn!(assembly, "no VEP version found, annotation will be skipped");
        }
        store.set_ingestion(&["vep", assembly, "version"], versions.version)?;
        store.set_ingestion(&["vep", assembly, "cache_version"], versions.cache_version)?;
        store.set_ingestion(&["vep", assembly, "species"], &versions.species)?;
        changed = true;
    }
    if changed {
        store.flush()?;
    }
    Ok(())
}
