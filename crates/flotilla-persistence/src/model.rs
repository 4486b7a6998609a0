//! Storage layout types
//!
//! These types describe the logical tables and storage backends,
//! decoupled from any specific backend implementation.

use serde::{Deserialize, Serialize};

/// Logical tables (RocksDB column families)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Table {
    Environments,
    EnvironmentGroups,
    EdgeGroups,
    EdgeStacks,
    EdgeStackStatus,
    EndpointRelations,
    /// Sequences and other bookkeeping
    Meta,
}

impl Table {
    pub const ALL: [Table; 7] = [
        Table::Environments,
        Table::EnvironmentGroups,
        Table::EdgeGroups,
        Table::EdgeStacks,
        Table::EdgeStackStatus,
        Table::EndpointRelations,
        Table::Meta,
    ];

    /// Column family name
    pub fn name(self) -> &'static str {
        match self {
            Table::Environments => "environments",
            Table::EnvironmentGroups => "environment_groups",
            Table::EdgeGroups => "edge_groups",
            Table::EdgeStacks => "edge_stacks",
            Table::EdgeStackStatus => "edge_stack_status",
            Table::EndpointRelations => "endpoint_relations",
            Table::Meta => "meta",
        }
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Storage backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageMode {
    /// Process-local maps, lost on restart
    Memory,
    /// Standalone embedded RocksDB
    #[default]
    Embedded,
}

impl std::fmt::Display for StorageMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageMode::Memory => write!(f, "memory"),
            StorageMode::Embedded => write!(f, "embedded"),
        }
    }
}

impl std::str::FromStr for StorageMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "memory" => Ok(StorageMode::Memory),
            "embedded" => Ok(StorageMode::Embedded),
            _ => Err(format!("Invalid storage mode: {}", s)),
        }
    }
}
