use crate::config::is_http_url;
use crate::error::ImportError;
use flate2::read::GzDecoder;
use genome_import_protocol::{DEFAULT_GENETIC_CODE, Domain, TaxonRecord};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::Read;
use std::time::Duration;

pub const REFERENCE_TAXA_SCHEMA: &str = "genome_import.reference_taxa.v1";

/// One taxon of the reference dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceTaxon {
    pub taxon_id: u64,
    pub scientific_name: String,
    /// Ranks from root to taxon, `;`-delimited.
    pub scientific_lineage: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<Domain>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genetic_code: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
}

impl ReferenceTaxon {
    pub fn lineage_ranks(&self) -> Vec<String> {
        self.scientific_lineage
            .split(';')
            .map(str::trim)
            .filter(|rank| !rank.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn to_record(&self, namespace: &str) -> TaxonRecord {
        let lineage = self.lineage_ranks();
        let domain = self
            .domain
            .or_else(|| Domain::from_lineage(&lineage))
            .unwrap_or_default();
        TaxonRecord {
            lineage,
            reference: format!("{namespace}/{}_taxon", self.taxon_id),
            domain,
            genetic_code: self.genetic_code.unwrap_or(DEFAULT_GENETIC_CODE),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ReferenceTaxaSnapshot {
    #[serde(default)]
    schema: Option<String>,
    #[serde(default)]
    source: Option<String>,
    taxa: Vec<ReferenceTaxon>,
}

/// Backend answering "which taxon is called this?".
///
/// `Ok(None)` means the backend answered and knows no such organism;
/// `Err` means it could not answer at all.
pub trait TaxonomySource: Send + Sync {
    fn describe(&self) -> String;

    fn lookup(
        &self,
        namespace: &str,
        organism_name: &str,
    ) -> Result<Option<ReferenceTaxon>, ImportError>;
}

/// Lower-cases and collapses whitespace/underscores so that
/// "Escherichia_coli" and " escherichia  COLI" share a key.
pub fn normalize_name(name: &str) -> String {
    name.split(|c: char| c.is_whitespace() || c == '_')
        .filter(|part| !part.is_empty())
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Genus and species of a longer name, e.g. a strain designation.
/// Splits on the same separators as `normalize_name`.
fn binomial(name: &str) -> Option<String> {
    let words = name
        .split(|c: char| c.is_whitespace() || c == '_')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>();
    if words.len() > 2 {
        Some(words[..2].join(" "))
    } else {
        None
    }
}

pub fn validate_namespace(namespace: &str) -> Result<(), ImportError> {
    let reason = if namespace.trim().is_empty() {
        Some("namespace is empty")
    } else if namespace.contains('/') {
        Some("namespace must not contain '/'")
    } else if namespace.chars().any(char::is_whitespace) {
        Some("namespace must not contain whitespace")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(ImportError::InvalidNamespace {
            namespace: namespace.to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}

/// Taxonomy held in memory, loaded once from a snapshot.
#[derive(Debug, Clone, Default)]
pub struct ReferenceTaxonomy {
    source: String,
    taxa: Vec<ReferenceTaxon>,
    index: HashMap<String, usize>,
}

impl ReferenceTaxonomy {
    pub fn from_taxa(source: &str, taxa: Vec<ReferenceTaxon>) -> Self {
        let mut index: HashMap<String, usize> = HashMap::new();
        for (pos, taxon) in taxa.iter().enumerate() {
            let names = std::iter::once(&taxon.scientific_name).chain(taxon.aliases.iter());
            for name in names {
                let key = normalize_name(name);
                if key.is_empty() {
                    continue;
                }
                if let Some(&existing) = index.get(&key) {
                    if existing != pos {
                        tracing::warn!(
                            organism = %name,
                            kept = taxa[existing].taxon_id,
                            ignored = taxon.taxon_id,
                            "duplicate taxon name in '{source}'"
                        );
                    }
                    continue;
                }
                index.insert(key, pos);
            }
        }
        Self {
            source: source.to_string(),
            taxa,
            index,
        }
    }

    pub fn from_json_str(text: &str, source: &str) -> Result<Self, ImportError> {
        let snapshot: ReferenceTaxaSnapshot = serde_json::from_str(text).map_err(|e| {
            ImportError::Dataset(format!("Could not parse reference taxa '{source}': {e}"))
        })?;
        if let Some(schema) = &snapshot.schema {
            if schema != REFERENCE_TAXA_SCHEMA {
                return Err(ImportError::Dataset(format!(
                    "Reference taxa '{source}' has schema '{schema}', expected '{REFERENCE_TAXA_SCHEMA}'"
                )));
            }
        }
        let label = snapshot.source.as_deref().unwrap_or(source);
        Ok(Self::from_taxa(label, snapshot.taxa))
    }

    /// Loads a snapshot from a local path, a `file://` URL or an http(s)
    /// URL. Gzip-compressed snapshots are detected by their magic bytes.
    pub fn from_path_or_url(path_or_url: &str, timeout: Duration) -> Result<Self, ImportError> {
        let bytes = read_snapshot_bytes(path_or_url, timeout)?;
        let text = decode_snapshot(&bytes, path_or_url)?;
        let taxonomy = Self::from_json_str(&text, path_or_url)?;
        tracing::info!(
            source = path_or_url,
            taxa = taxonomy.len(),
            "loaded reference taxonomy"
        );
        Ok(taxonomy)
    }

    pub fn len(&self) -> usize {
        self.taxa.len()
    }

    pub fn is_empty(&self) -> bool {
        self.taxa.is_empty()
    }

    pub fn get(&self, organism_name: &str) -> Option<&ReferenceTaxon> {
        self.index
            .get(&normalize_name(organism_name))
            .map(|&pos| &self.taxa[pos])
    }
}

impl TaxonomySource for ReferenceTaxonomy {
    fn describe(&self) -> String {
        self.source.clone()
    }

    fn lookup(
        &self,
        _namespace: &str,
        organism_name: &str,
    ) -> Result<Option<ReferenceTaxon>, ImportError> {
        Ok(self.get(organism_name).cloned())
    }
}

fn read_snapshot_bytes(path_or_url: &str, timeout: Duration) -> Result<Vec<u8>, ImportError> {
    if is_http_url(path_or_url) {
        let client = http_client(timeout)?;
        let response = client
            .get(path_or_url)
            .send()
            .map_err(|e| ImportError::transport(path_or_url, e))?;
        if !response.status().is_success() {
            return Err(ImportError::transport(
                path_or_url,
                format!("HTTP {}", response.status()),
            ));
        }
        let bytes = response
            .bytes()
            .map_err(|e| ImportError::transport(path_or_url, e))?;
        Ok(bytes.to_vec())
    } else {
        let path = path_or_url.strip_prefix("file://").unwrap_or(path_or_url);
        fs::read(path).map_err(|e| {
            ImportError::Dataset(format!("Could not read reference taxa '{path}': {e}"))
        })
    }
}

fn decode_snapshot(bytes: &[u8], source: &str) -> Result<String, ImportError> {
    if bytes.starts_with(&[0x1f, 0x8b]) {
        let mut text = String::new();
        GzDecoder::new(bytes)
            .read_to_string(&mut text)
            .map_err(|e| {
                ImportError::Dataset(format!("Could not decompress reference taxa '{source}': {e}"))
            })?;
        Ok(text)
    } else {
        String::from_utf8(bytes.to_vec()).map_err(|e| {
            ImportError::Dataset(format!("Reference taxa '{source}' is not UTF-8: {e}"))
        })
    }
}

fn http_client(timeout: Duration) -> Result<reqwest::blocking::Client, ImportError> {
    reqwest::blocking::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ImportError::Config(format!("Could not build HTTP client: {e}")))
}

#[derive(Debug, Deserialize)]
struct TaxaResponse {
    #[serde(default)]
    taxa: Vec<ReferenceTaxon>,
}

/// Taxonomy service queried once per lookup:
/// `GET <base_url>/taxa?scientific_name=..&namespace=..` answering
/// `{"taxa": [...]}`.
#[derive(Debug, Clone)]
pub struct RemoteTaxonomy {
    base_url: String,
    client: reqwest::blocking::Client,
}

impl RemoteTaxonomy {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ImportError> {
        Ok(Self::with_client(base_url, http_client(timeout)?))
    }

    pub fn with_client(base_url: &str, client: reqwest::blocking::Client) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    fn endpoint(&self, namespace: &str, organism_name: &str) -> Result<reqwest::Url, ImportError> {
        reqwest::Url::parse_with_params(
            &format!("{}/taxa", self.base_url),
            &[("scientific_name", organism_name), ("namespace", namespace)],
        )
        .map_err(|e| ImportError::transport(&self.base_url, format!("bad service URL: {e}")))
    }
}

impl TaxonomySource for RemoteTaxonomy {
    fn describe(&self) -> String {
        self.base_url.clone()
    }

    fn lookup(
        &self,
        namespace: &str,
        organism_name: &str,
    ) -> Result<Option<ReferenceTaxon>, ImportError> {
        let url = self.endpoint(namespace, organism_name)?;
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| ImportError::transport(&self.base_url, e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ImportError::transport(
                &self.base_url,
                format!("HTTP {status}"),
            ));
        }
        let body: TaxaResponse = response
            .json()
            .map_err(|e| ImportError::transport(&self.base_url, format!("bad response: {e}")))?;
        Ok(body.taxa.into_iter().next())
    }
}

/// Maps organism names to taxon records, falling back to the
/// "Unconfirmed Organism" sentinel when nothing matches.
pub struct TaxonResolver {
    source: Box<dyn TaxonomySource>,
}

impl TaxonResolver {
    pub fn new(source: impl TaxonomySource + 'static) -> Self {
        Self {
            source: Box::new(source),
        }
    }

    pub fn from_boxed(source: Box<dyn TaxonomySource>) -> Self {
        Self { source }
    }

    pub fn source_description(&self) -> String {
        self.source.describe()
    }

    pub fn resolve(&self, namespace: &str, organism_name: &str) -> Result<TaxonRecord, ImportError> {
        validate_namespace(namespace)?;
        let found = self.find(namespace, organism_name)?;
        match found {
            Some(taxon) => {
                tracing::debug!(
                    organism = organism_name,
                    taxon_id = taxon.taxon_id,
                    "resolved taxon"
                );
                Ok(taxon.to_record(namespace))
            }
            None => {
                tracing::debug!(organism = organism_name, "no taxon found");
                Ok(TaxonRecord::unconfirmed(organism_name))
            }
        }
    }

    fn find(
        &self,
        namespace: &str,
        organism_name: &str,
    ) -> Result<Option<ReferenceTaxon>, ImportError> {
        let name = organism_name.trim();
        if name.is_empty() {
            return Ok(None);
        }
        if let Some(taxon) = self.source.lookup(namespace, name)? {
            return Ok(Some(taxon));
        }
        match binomial(name) {
            Some(short) => self.source.lookup(namespace, &short),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::{Compression, write::GzEncoder};
    use std::io::Write;
    use std::net::TcpListener;
    use std::thread;
    use tempfile::tempdir;

    const REFERENCE_TAXA: &str = include_str!("../assets/reference_taxa.json");

    fn resolver() -> TaxonResolver {
        TaxonResolver::new(
            ReferenceTaxonomy::from_json_str(REFERENCE_TAXA, "reference_taxa.json").unwrap(),
        )
    }

    fn unconfirmed(name: &str) -> (String, String, String, u32) {
        (
            format!("Unconfirmed Organism: {name}"),
            "ReferenceTaxons/unknown_taxon".to_string(),
            "Unknown".to_string(),
            11,
        )
    }

    fn as_tuple(record: &TaxonRecord) -> (String, String, String, u32) {
        (
            record.lineage_string(),
            record.reference.clone(),
            record.domain.to_string(),
            record.genetic_code,
        )
    }

    #[test]
    fn test_retrieve_taxon() {
        let resolver = resolver();
        let arabidopsis = resolver.resolve("meh", "Arabidopsis thaliana").unwrap();
        assert_eq!(
            as_tuple(&arabidopsis),
            (
                "cellular organisms; Eukaryota; Viridiplantae; Streptophyta; Streptophytina; \
                 Embryophyta; Tracheophyta; Euphyllophyta; Spermatophyta; Magnoliophyta; \
                 Mesangiospermae; eudicotyledons; Gunneridae; Pentapetalae; rosids; malvids; \
                 Brassicales; Brassicaceae; Camelineae; Arabidopsis"
                    .to_string(),
                "meh/3702_taxon".to_string(),
                "Eukaryota".to_string(),
                11
            )
        );

        let coli = resolver.resolve("meh", "Escherichia coli").unwrap();
        assert_eq!(
            as_tuple(&coli),
            (
                "cellular organisms; Bacteria; Proteobacteria; Gammaproteobacteria; \
                 Enterobacterales; Enterobacteriaceae; Escherichia"
                    .to_string(),
                "meh/562_taxon".to_string(),
                "Bacteria".to_string(),
                11
            )
        );

        for name in ["rhodobacter", "foo"] {
            let record = resolver.resolve("meh", name).unwrap();
            assert_eq!(as_tuple(&record), unconfirmed(name));
        }
    }

    #[test]
    fn sentinel_does_not_depend_on_namespace() {
        let resolver = resolver();
        let a = resolver.resolve("meh", "foo").unwrap();
        let b = resolver.resolve("OtherSpace", "foo").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn repeated_lookups_are_identical() {
        let resolver = resolver();
        let first = resolver.resolve("ws", "Homo sapiens").unwrap();
        let second = resolver.resolve("ws", "Homo sapiens").unwrap();
        assert_eq!(first, second);
        assert_eq!(first.genetic_code, 1);
        assert_eq!(first.reference, "ws/9606_taxon");
    }

    #[test]
    fn matching_ignores_case_whitespace_and_underscores() {
        let resolver = resolver();
        for name in ["escherichia coli", "  ESCHERICHIA   Coli ", "Escherichia_coli"] {
            let record = resolver.resolve("meh", name).unwrap();
            assert_eq!(record.reference, "meh/562_taxon", "{name}");
        }
    }

    #[test]
    fn aliases_match() {
        let record = resolver().resolve("meh", "E. coli").unwrap();
        assert_eq!(record.reference, "meh/562_taxon");
    }

    #[test]
    fn strain_names_fall_back_to_binomial() {
        let record = resolver()
            .resolve("meh", "Escherichia coli str. K-12 substr. MG1655")
            .unwrap();
        assert_eq!(record.reference, "meh/562_taxon");
        assert_eq!(record.domain, Domain::Bacteria);
    }

    #[test]
    fn underscore_joined_strain_names_fall_back_to_binomial() {
        let record = resolver().resolve("meh", "Escherichia_coli_K-12").unwrap();
        assert_eq!(record.reference, "meh/562_taxon");
        assert_eq!(binomial("Escherichia_coli_K-12").as_deref(), Some("Escherichia coli"));
        assert_eq!(binomial("Escherichia_coli"), None);
    }

    #[test]
    fn domain_and_genetic_code_fall_back_when_entry_omits_them() {
        let record = resolver().resolve("meh", "Haloferax volcanii").unwrap();
        assert_eq!(record.domain, Domain::Archaea);
        assert_eq!(record.genetic_code, 11);
    }

    #[test]
    fn viruses_keep_their_domain() {
        let record = resolver().resolve("meh", "Escherichia virus Lambda").unwrap();
        assert_eq!(record.domain, Domain::Viruses);
        assert_eq!(record.lineage.first().map(String::as_str), Some("Viruses"));
    }

    #[test]
    fn empty_organism_name_gives_sentinel() {
        let record = resolver().resolve("meh", "   ").unwrap();
        assert_eq!(
            record.lineage_string(),
            format!("Unconfirmed Organism: {}", "   ")
        );
        assert!(record.is_unconfirmed());
    }

    #[test]
    fn malformed_namespaces_are_rejected() {
        let resolver = resolver();
        for namespace in ["", "  ", "a/b", "a b"] {
            let err = resolver.resolve(namespace, "Escherichia coli").unwrap_err();
            assert!(
                matches!(err, ImportError::InvalidNamespace { .. }),
                "{namespace:?}: {err}"
            );
        }
    }

    #[test]
    fn first_duplicate_wins() {
        let text = r#"{
  "taxa": [
    {"taxon_id": 1, "scientific_name": "Dup", "scientific_lineage": "Bacteria; A"},
    {"taxon_id": 2, "scientific_name": "dup", "scientific_lineage": "Bacteria; B"}
  ]
}"#;
        let taxonomy = ReferenceTaxonomy::from_json_str(text, "inline").unwrap();
        assert_eq!(taxonomy.len(), 2);
        assert_eq!(taxonomy.get("DUP").map(|t| t.taxon_id), Some(1));
    }

    #[test]
    fn wrong_schema_is_rejected() {
        let text = r#"{"schema": "something.else", "taxa": []}"#;
        let err = ReferenceTaxonomy::from_json_str(text, "inline").unwrap_err();
        assert!(err.to_string().contains("something.else"), "{err}");
    }

    #[test]
    fn loads_gzip_snapshot_from_disk() {
        let td = tempdir().unwrap();
        let path = td.path().join("taxa.json.gz");
        let file = fs::File::create(&path).unwrap();
        let mut encoder = GzEncoder::new(file, Compression::default());
        encoder.write_all(REFERENCE_TAXA.as_bytes()).unwrap();
        encoder.finish().unwrap();

        let url = format!("file://{}", path.display());
        let taxonomy = ReferenceTaxonomy::from_path_or_url(&url, Duration::from_secs(5)).unwrap();
        assert!(taxonomy.get("Arabidopsis thaliana").is_some());
    }

    #[test]
    fn missing_snapshot_is_a_dataset_error() {
        let td = tempdir().unwrap();
        let path = td.path().join("absent.json");
        let err = ReferenceTaxonomy::from_path_or_url(&path.to_string_lossy(), Duration::from_secs(5))
            .unwrap_err();
        assert!(matches!(err, ImportError::Dataset(_)), "{err}");
    }

    fn local_client() -> reqwest::blocking::Client {
        local_client_with_timeout(Duration::from_secs(5))
    }

    fn local_client_with_timeout(timeout: Duration) -> reqwest::blocking::Client {
        reqwest::blocking::Client::builder()
            .no_proxy()
            .timeout(timeout)
            .build()
            .unwrap()
    }

    /// Accepts one connection and holds it open without answering.
    fn serve_silently(hold: Duration) -> (String, thread::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = thread::spawn(move || {
            let (_stream, _) = listener.accept().unwrap();
            thread::sleep(hold);
        });
        (format!("http://{addr}"), handle)
    }

    /// Answers exactly one HTTP request and hands back what it received.
    fn serve_once(status_line: &'static str, body: String) -> (String, thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 8192];
            let n = stream.read(&mut buf).unwrap();
            let request = String::from_utf8_lossy(&buf[..n]).to_string();
            let response = format!(
                "HTTP/1.1 {status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).unwrap();
            request
        });
        (format!("http://{addr}"), handle)
    }

    #[test]
    fn remote_lookup_returns_first_taxon() {
        let body = r#"{"taxa": [{"taxon_id": 562, "scientific_name": "Escherichia coli",
            "scientific_lineage": "cellular organisms; Bacteria; Proteobacteria; Gammaproteobacteria; Enterobacterales; Enterobacteriaceae; Escherichia",
            "domain": "Bacteria", "genetic_code": 11}]}"#;
        let (url, server) = serve_once("200 OK", body.to_string());
        let resolver = TaxonResolver::new(RemoteTaxonomy::with_client(&url, local_client()));
        let record = resolver.resolve("meh", "Escherichia coli").unwrap();
        assert_eq!(record.reference, "meh/562_taxon");
        assert_eq!(record.domain, Domain::Bacteria);

        let request = server.join().unwrap();
        assert!(request.starts_with("GET /taxa?"), "{request}");
        assert!(request.contains("scientific_name=Escherichia+coli"), "{request}");
        assert!(request.contains("namespace=meh"), "{request}");
    }

    #[test]
    fn remote_empty_answer_gives_sentinel() {
        let (url, server) = serve_once("200 OK", r#"{"taxa": []}"#.to_string());
        let resolver = TaxonResolver::new(RemoteTaxonomy::with_client(&url, local_client()));
        let record = resolver.resolve("meh", "foo").unwrap();
        assert!(record.is_unconfirmed());
        server.join().unwrap();
    }

    #[test]
    fn remote_http_error_is_not_masked() {
        let (url, server) = serve_once("503 Service Unavailable", "{}".to_string());
        let resolver = TaxonResolver::new(RemoteTaxonomy::with_client(&url, local_client()));
        let err = resolver.resolve("meh", "foo").unwrap_err();
        assert!(matches!(err, ImportError::Transport { .. }), "{err}");
        assert!(err.to_string().contains("503"), "{err}");
        server.join().unwrap();
    }

    #[test]
    fn non_json_answer_is_a_transport_error() {
        let (url, server) = serve_once("200 OK", "<html>maintenance</html>".to_string());
        let resolver = TaxonResolver::new(RemoteTaxonomy::with_client(&url, local_client()));
        let err = resolver.resolve("meh", "foo").unwrap_err();
        assert!(matches!(err, ImportError::Transport { .. }), "{err}");
        assert!(err.to_string().contains("bad response"), "{err}");
        server.join().unwrap();
    }

    #[test]
    fn silent_service_times_out_as_transport_error() {
        let (url, server) = serve_silently(Duration::from_secs(2));
        let client = local_client_with_timeout(Duration::from_millis(300));
        let resolver = TaxonResolver::new(RemoteTaxonomy::with_client(&url, client));
        let err = resolver.resolve("meh", "foo").unwrap_err();
        assert!(matches!(err, ImportError::Transport { .. }), "{err}");
        server.join().unwrap();
    }

    #[test]
    fn unreachable_service_is_a_transport_error() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let url = format!("http://127.0.0.1:{port}");
        let resolver = TaxonResolver::new(RemoteTaxonomy::with_client(&url, local_client()));
        let err = resolver.resolve("meh", "Escherichia coli").unwrap_err();
        assert!(matches!(err, ImportError::Transport { .. }), "{err}");
    }
}
