//! Extraction: fetching open-data payloads and decoding them into frames.
//!
//! Portals publish CSVs with whatever encoding and delimiter their exporter
//! happened to use, so `decode_csv` probes a small matrix of both and keeps
//! the first combination that yields a real table.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use encoding_rs::{Encoding, UTF_8, WINDOWS_1252};
use sha2::{Digest, Sha256};

use crate::error::{EtlError, Result};

pub const USER_AGENT: &str = "SIPI-ETL/1.0 (registro de patrimonio; carga de administraciones)";

/// Encodings tried, in order. WHATWG maps the `latin-1` label to windows-1252.
const ENCODINGS: &[(&str, &Encoding)] = &[("utf-8", UTF_8), ("latin-1", WINDOWS_1252)];
const DELIMITERS: &[u8] = b";,";

/// Values pandas reads as NaN by default.
const MISSING_MARKERS: &[&str] = &["", "NA", "N/A", "NULL", "null", "NaN", "nan", "#N/A", "None"];

/// The single seam through which extractors reach the network.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|source| EtlError::Fetch {
                url: String::from("<client>"),
                source,
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        tracing::info!(%url, "fetching");
        let fetch_error = |source| EtlError::Fetch {
            url: url.to_string(),
            source,
        };
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(fetch_error)?;
        let bytes = resp.bytes().await.map_err(fetch_error)?;

        tracing::info!(
            %url,
            size_bytes = bytes.len(),
            hash = %content_hash(&bytes),
            "downloaded"
        );
        Ok(bytes.to_vec())
    }
}

pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("sha256:{:x}", hasher.finalize())
}

/// Raw tables pulled from a region. Not every region publishes titulares.
#[derive(Debug, Clone)]
pub struct RawDataset {
    pub estructura: Frame,
    pub titulares: Option<Frame>,
}

#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, fetch: &dyn Fetch) -> Result<RawDataset>;
}

/// A decoded CSV table. Header names are kept verbatim: column lookups are
/// exact and case-sensitive.
#[derive(Debug, Clone)]
pub struct Frame {
    headers: Vec<String>,
    index: HashMap<String, usize>,
    records: Vec<csv::StringRecord>,
    pub encoding: &'static str,
    pub delimiter: u8,
}

impl Frame {
    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn rows(&self) -> impl Iterator<Item = Row<'_>> {
        self.records.iter().map(move |record| Row {
            frame: self,
            record,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
    frame: &'a Frame,
    record: &'a csv::StringRecord,
}

impl<'a> Row<'a> {
    /// Cell under `column`, or `None` if the column is absent or the value
    /// is one of the null markers.
    pub fn get(&self, column: &str) -> Option<&'a str> {
        let idx = *self.frame.index.get(column)?;
        self.record
            .get(idx)
            .filter(|value| !MISSING_MARKERS.contains(value))
    }

    /// First non-missing value among `aliases`, probed in order.
    pub fn probe(&self, aliases: &[&str]) -> Option<&'a str> {
        aliases.iter().find_map(|alias| self.get(alias))
    }
}

/// Detects encoding and delimiter from the encoding × delimiter matrix.
pub fn decode_csv(bytes: &[u8], dataset: &str) -> Result<Frame> {
    for &(label, encoding) in ENCODINGS {
        let Some(text) = decode_text(bytes, encoding) else {
            tracing::debug!(dataset, encoding = label, "not valid for this encoding");
            continue;
        };
        for &delimiter in DELIMITERS {
            match parse_frame(&text, delimiter, label) {
                Ok(frame) if frame.headers.len() > 1 => {
                    tracing::info!(
                        dataset,
                        encoding = label,
                        delimiter = %(delimiter as char),
                        rows = frame.len(),
                        "CSV format detected"
                    );
                    return Ok(frame);
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(dataset, encoding = label, delimiter = %(delimiter as char), error = %e, "CSV parse attempt failed");
                }
            }
        }
    }
    Err(EtlError::CsvFormat {
        dataset: dataset.to_string(),
    })
}

/// Decodes with a known format, for portals that always publish the same one.
pub fn decode_csv_with(
    bytes: &[u8],
    dataset: &str,
    encoding: &'static Encoding,
    delimiter: u8,
) -> Result<Frame> {
    let label = ENCODINGS
        .iter()
        .find(|(_, e)| *e == encoding)
        .map(|(label, _)| *label)
        .unwrap_or("utf-8");
    let text = decode_text(bytes, encoding).ok_or_else(|| EtlError::CsvFormat {
        dataset: dataset.to_string(),
    })?;
    let frame = parse_frame(&text, delimiter, label).map_err(|source| EtlError::Csv {
        dataset: dataset.to_string(),
        source,
    })?;
    tracing::info!(dataset, rows = frame.len(), "CSV decoded");
    Ok(frame)
}

fn decode_text(bytes: &[u8], encoding: &'static Encoding) -> Option<String> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    if encoding == UTF_8 {
        return encoding
            .decode_without_bom_handling_and_without_replacement(bytes)
            .map(|text| text.into_owned());
    }
    let (text, had_errors) = encoding.decode_without_bom_handling(bytes);
    (!had_errors).then(|| text.into_owned())
}

fn parse_frame(text: &str, delimiter: u8, encoding: &'static str) -> Result<Frame, csv::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    let mut index = HashMap::with_capacity(headers.len());
    for (idx, header) in headers.iter().enumerate() {
        index.entry(header.clone()).or_insert(idx);
    }
    let records = reader.records().collect::<Result<Vec<_>, _>>()?;

    Ok(Frame {
        headers,
        index,
        records,
        encoding,
        delimiter,
    })
}
