use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Reference returned for organisms with no matching taxon.
pub const UNKNOWN_TAXON_REF: &str = "ReferenceTaxons/unknown_taxon";
/// Prefix of the lineage reported for organisms with no matching taxon.
pub const UNCONFIRMED_ORGANISM_PREFIX: &str = "Unconfirmed Organism: ";
/// Standard genetic code (NCBI translation table 11).
pub const DEFAULT_GENETIC_CODE: u32 = 11;
pub const LINEAGE_SEPARATOR: &str = "; ";

/// Top-level classification of a taxon.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Domain {
    Eukaryota,
    Bacteria,
    Archaea,
    Viruses,
    #[default]
    Unknown,
}

impl Domain {
    pub const KNOWN: [Domain; 4] = [
        Domain::Eukaryota,
        Domain::Bacteria,
        Domain::Archaea,
        Domain::Viruses,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Eukaryota => "Eukaryota",
            Domain::Bacteria => "Bacteria",
            Domain::Archaea => "Archaea",
            Domain::Viruses => "Viruses",
            Domain::Unknown => "Unknown",
        }
    }

    /// First rank of a lineage that names a domain, if any.
    pub fn from_lineage<S: AsRef<str>>(ranks: &[S]) -> Option<Domain> {
        ranks.iter().find_map(|rank| {
            Domain::KNOWN
                .iter()
                .copied()
                .find(|d| d.as_str().eq_ignore_ascii_case(rank.as_ref().trim()))
        })
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Domain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Domain::KNOWN
            .iter()
            .copied()
            .chain(std::iter::once(Domain::Unknown))
            .find(|d| d.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| format!("Unrecognized taxonomic domain '{trimmed}'"))
    }
}

/// Resolved taxonomy for one organism.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxonRecord {
    /// Ranks from the root of the classification down to the taxon.
    pub lineage: Vec<String>,
    pub reference: String,
    pub domain: Domain,
    pub genetic_code: u32,
}

impl TaxonRecord {
    /// Placeholder used when no taxon matches `organism_name`.
    pub fn unconfirmed(organism_name: &str) -> Self {
        Self {
            lineage: vec![format!("{UNCONFIRMED_ORGANISM_PREFIX}{organism_name}")],
            reference: UNKNOWN_TAXON_REF.to_string(),
            domain: Domain::Unknown,
            genetic_code: DEFAULT_GENETIC_CODE,
        }
    }

    pub fn lineage_string(&self) -> String {
        self.lineage.join(LINEAGE_SEPARATOR)
    }

    pub fn is_unconfirmed(&self) -> bool {
        self.reference == UNKNOWN_TAXON_REF && self.domain == Domain::Unknown
    }
}

/// Genome object as assembled by the import pipeline. Only the taxon
/// fields are typed; everything else is carried through untouched.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GenomeRecord {
    #[serde(default)]
    pub taxon_ref: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scientific_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub taxonomy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genetic_code: Option<u32>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl GenomeRecord {
    pub fn from_json_str(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unconfirmed_record_uses_sentinel_values() {
        let record = TaxonRecord::unconfirmed("foo");
        assert_eq!(record.lineage_string(), "Unconfirmed Organism: foo");
        assert_eq!(record.reference, "ReferenceTaxons/unknown_taxon");
        assert_eq!(record.domain, Domain::Unknown);
        assert_eq!(record.genetic_code, 11);
        assert!(record.is_unconfirmed());
    }

    #[test]
    fn domain_parses_case_insensitively() {
        assert_eq!("bacteria".parse::<Domain>().unwrap(), Domain::Bacteria);
        assert_eq!(" Viruses ".parse::<Domain>().unwrap(), Domain::Viruses);
        assert_eq!("unknown".parse::<Domain>().unwrap(), Domain::Unknown);
        assert!("Plantae".parse::<Domain>().is_err());
    }

    #[test]
    fn domain_from_lineage_skips_root_ranks() {
        let ranks = ["cellular organisms", "Archaea", "Euryarchaeota"];
        assert_eq!(Domain::from_lineage(&ranks), Some(Domain::Archaea));
        assert_eq!(Domain::from_lineage(&["cellular organisms"]), None);
    }

    #[test]
    fn genome_record_keeps_unknown_fields() {
        let text = r#"{"taxon_ref":"","domain":"","id":"g1","features":[{"id":"f1"}]}"#;
        let genome = GenomeRecord::from_json_str(text).unwrap();
        assert_eq!(genome.extra.get("id").and_then(|v| v.as_str()), Some("g1"));
        let back = serde_json::to_value(&genome).unwrap();
        assert_eq!(back["features"][0]["id"], "f1");
        assert!(back.get("taxonomy").is_none());
    }
}
