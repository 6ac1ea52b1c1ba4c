use crate::config::ImportConfig;
use crate::error::ImportError;
use crate::size_guard::SizeGuard;
use crate::taxonomy::{ReferenceTaxonomy, RemoteTaxonomy, TaxonResolver, TaxonomySource};
use genome_import_protocol::{GenomeRecord, TaxonRecord};

/// Entry point for the import pipeline: taxon lookup plus the size check.
pub struct GenomeImporter {
    resolver: TaxonResolver,
    guard: SizeGuard,
}

impl GenomeImporter {
    pub fn new(resolver: TaxonResolver, guard: SizeGuard) -> Self {
        Self { resolver, guard }
    }

    /// Uses the taxonomy service when one is configured, the reference
    /// snapshot otherwise.
    pub fn from_config(config: &ImportConfig) -> Result<Self, ImportError> {
        let problems = config.validate();
        if !problems.is_empty() {
            return Err(ImportError::Config(problems.join("; ")));
        }
        let source: Box<dyn TaxonomySource> = match &config.taxonomy_service_url {
            Some(url) => Box::new(RemoteTaxonomy::new(url, config.http_timeout())?),
            None => Box::new(ReferenceTaxonomy::from_path_or_url(
                &config.taxonomy_source,
                config.http_timeout(),
            )?),
        };
        tracing::debug!(
            taxonomy = %source.describe(),
            max_genome_size = config.max_genome_size,
            "genome importer ready"
        );
        Ok(Self::new(
            TaxonResolver::from_boxed(source),
            SizeGuard::new(config.max_genome_size),
        ))
    }

    pub fn resolver(&self) -> &TaxonResolver {
        &self.resolver
    }

    pub fn guard(&self) -> &SizeGuard {
        &self.guard
    }

    pub fn retrieve_taxon(
        &self,
        namespace: &str,
        organism_name: &str,
    ) -> Result<TaxonRecord, ImportError> {
        self.resolver.resolve(namespace, organism_name)
    }

    /// Resolves `organism_name` and writes the taxon fields onto `genome`.
    pub fn apply_taxon(
        &self,
        genome: &mut GenomeRecord,
        namespace: &str,
        organism_name: &str,
    ) -> Result<TaxonRecord, ImportError> {
        let taxon = self.retrieve_taxon(namespace, organism_name)?;
        if taxon.is_unconfirmed() {
            tracing::warn!(
                organism = organism_name,
                "organism not found in reference taxonomy, using unknown taxon"
            );
        }
        genome.taxon_ref = taxon.reference.clone();
        genome.domain = taxon.domain.to_string();
        genome.taxonomy = Some(taxon.lineage_string());
        genome.genetic_code = Some(taxon.genetic_code);
        genome.scientific_name = Some(organism_name.to_string());
        Ok(taxon)
    }

    pub fn validate_genome(&self, genome: &GenomeRecord) -> Result<(), ImportError> {
        self.guard.validate(genome)
    }
}
