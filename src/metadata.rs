//! Table Metadata Store
//!
//! Read-only catalog of the statistical tables the agent can answer from.
//! One JSON file per table; the file stem is the table name.

use crate::error::{AgentError, Result};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A single column as declared in a table's metadata file
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnSpec {
    pub name: String,
    /// Semantic type (e.g. "integer", "string", "year")
    pub column_type: String,
    pub description: String,
}

/// Column entries may be a bare description or a `{type, description}` object
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawColumn {
    Detailed {
        #[serde(rename = "type", default = "default_column_type")]
        column_type: String,
        #[serde(default)]
        description: String,
    },
    Description(String),
}

fn default_column_type() -> String {
    "unknown".to_string()
}

fn deserialize_columns<'de, D>(deserializer: D) -> std::result::Result<Vec<ColumnSpec>, D::Error>
where
    D: Deserializer<'de>,
{
    // serde_json is built with `preserve_order`, so the map keeps file order
    let raw: Map<String, Value> = Map::deserialize(deserializer)?;
    raw.into_iter()
        .map(|(name, value)| {
            let column: RawColumn = serde_json::from_value(value).map_err(serde::de::Error::custom)?;
            Ok(match column {
                RawColumn::Detailed { column_type, description } => ColumnSpec {
                    name,
                    column_type,
                    description,
                },
                RawColumn::Description(description) => ColumnSpec {
                    name,
                    column_type: "string".to_string(),
                    description,
                },
            })
        })
        .collect()
}

/// Metadata for one table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableMetadata {
    /// Filled from the file stem when loading from disk
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default, deserialize_with = "deserialize_columns")]
    pub columns: Vec<ColumnSpec>,

    /// Column used for row-level scope restriction
    #[serde(default)]
    pub access_column: Option<String>,

    #[serde(default)]
    pub example_rows: Vec<Map<String, Value>>,
}

impl TableMetadata {
    /// The access column, if the table declares a usable one.
    /// `null`, empty, "none" and "null" all mean "no access column".
    pub fn access_column(&self) -> Option<&str> {
        self.access_column
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty() && !c.eq_ignore_ascii_case("none") && !c.eq_ignore_ascii_case("null"))
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Columns whose name marks them as holding a year
    pub fn year_columns(&self) -> Vec<&str> {
        self.columns
            .iter()
            .map(|c| c.name.as_str())
            .filter(|name| is_year_like(name))
            .collect()
    }

    /// Render the table's schema for a generation prompt
    pub fn build_schema_prompt(&self) -> String {
        let schema_lines: Vec<String> = self
            .columns
            .iter()
            .map(|c| format!("  - {} ({}): {}", c.name, c.column_type, describe(&c.description)))
            .collect();

        format!(
            "Table: {}\nDescription: {}\nColumns:\n{}\nAccess Column: {}\nExample Data: {}",
            self.name,
            if self.description.is_empty() { "No description" } else { &self.description },
            schema_lines.join("\n"),
            self.access_column().unwrap_or("None"),
            self.example_rows_json(2)
        )
    }

    /// First `n` example rows as compact JSON
    pub fn example_rows_json(&self, n: usize) -> String {
        let rows: Vec<&Map<String, Value>> = self.example_rows.iter().take(n).collect();
        serde_json::to_string(&rows).unwrap_or_else(|_| "[]".to_string())
    }
}

fn describe(description: &str) -> &str {
    if description.is_empty() {
        "no description"
    } else {
        description
    }
}

/// Whether a column name marks a year column ("tahun" or "year")
pub fn is_year_like(column: &str) -> bool {
    let lower = column.to_lowercase();
    lower.contains("tahun") || lower.contains("year")
}

/// The full set of tables, in catalog order
#[derive(Debug, Clone, Default)]
pub struct MetadataCatalog {
    tables: Vec<TableMetadata>,
}

impl MetadataCatalog {
    /// Build a catalog from tables already in memory. Order is preserved.
    pub fn from_tables(tables: Vec<TableMetadata>) -> Self {
        Self { tables }
    }

    /// Load every `*.json` file in `dir`, visiting files in name order.
    /// Malformed files are skipped; a missing directory yields an empty catalog.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();

        if !dir.exists() {
            warn!("Metadata directory not found: {:?}", dir);
            return Ok(Self::default());
        }

        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
            .collect();
        files.sort();

        if files.is_empty() {
            warn!("No JSON files in {:?}", dir);
        }

        let mut tables = Vec::with_capacity(files.len());
        for path in files {
            match Self::load_table(&path) {
                Ok(table) => {
                    debug!("Loaded metadata for table {}", table.name);
                    tables.push(table);
                }
                Err(e) => warn!("Skipping metadata file {:?}: {}", path, e),
            }
        }

        info!(
            "Metadata load complete: {} tables ({})",
            tables.len(),
            tables.iter().map(|t| t.name.as_str()).collect::<Vec<_>>().join(", ")
        );

        Ok(Self { tables })
    }

    fn load_table(path: &Path) -> Result<TableMetadata> {
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| AgentError::Metadata(format!("Invalid metadata file name: {:?}", path)))?;

        let content = std::fs::read_to_string(path)?;
        let mut table: TableMetadata = serde_json::from_str(&content)
            .map_err(|e| AgentError::Metadata(format!("Failed to parse {:?}: {}", path, e)))?;
        table.name = stem.to_string();
        Ok(table)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TableMetadata> {
        self.tables.iter()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// Lazily loaded, process-wide catalog. Loading happens at most once;
/// concurrent first callers block on the same initialization.
pub struct MetadataStore {
    dir: PathBuf,
    cache: OnceCell<Arc<MetadataCatalog>>,
}

impl MetadataStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: OnceCell::new(),
        }
    }

    /// A store whose catalog is already populated
    pub fn from_catalog(catalog: MetadataCatalog) -> Self {
        let cache = OnceCell::new();
        let _ = cache.set(Arc::new(catalog));
        Self {
            dir: PathBuf::new(),
            cache,
        }
    }

    pub fn catalog(&self) -> Result<Arc<MetadataCatalog>> {
        self.cache
            .get_or_try_init(|| MetadataCatalog::load(&self.dir).map(Arc::new))
            .map(Arc::clone)
    }

    /// Fresh store for the same directory; the next access reloads from disk
    pub fn reload(&self) -> Self {
        Self::new(self.dir.clone())
    }
}
