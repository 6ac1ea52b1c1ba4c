pub mod config;
pub mod error;
pub mod importer;
pub mod size_guard;
pub mod taxonomy;

pub use config::ImportConfig;
pub use error::ImportError;
pub use genome_import_protocol as protocol;
pub use genome_import_protocol::{Domain, GenomeRecord, TaxonRecord};
pub use importer::GenomeImporter;
pub use size_guard::SizeGuard;
pub use taxonomy::{ReferenceTaxonomy, RemoteTaxonomy, TaxonResolver, TaxonomySource};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
