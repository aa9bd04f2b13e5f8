//! Node blacklist applied to every graph snapshot.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};

/// Application and node names that never appear in a snapshot.
///
/// Both lists are exact, case-sensitive matches kept in the order they were
/// configured. A node is dropped when *either* its application name or its
/// node name is listed. A list missing from configuration keeps its
/// default entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Blacklist {
    /// Excluded `application.name` values
    pub applications: Vec<String>,
    /// Excluded `node.name` values
    pub nodes: Vec<String>,
}

impl Blacklist {
    /// Create a blacklist from two ordered lists.
    #[must_use]
    pub fn new(applications: Vec<String>, nodes: Vec<String>) -> Self {
        Self { applications, nodes }
    }

    /// A blacklist that lets every node through.
    #[must_use]
    pub fn empty() -> Self {
        Self { applications: Vec::new(), nodes: Vec::new() }
    }

    /// Reject entries that can never match anything.
    ///
    /// # Errors
    /// Returns [`Error::InvalidBlacklistEntry`] for empty or whitespace-only names.
    pub fn validate(&self) -> Result<()> {
        for entry in self.applications.iter().chain(&self.nodes) {
            if entry.trim().is_empty() {
                return Err(Error::InvalidBlacklistEntry(entry.clone()));
            }
            if entry.trim() != entry {
                warn!(entry = %entry, "Blacklist entry has surrounding whitespace and is matched verbatim");
            }
        }
        Ok(())
    }

    /// Check if an application name is excluded.
    #[must_use]
    pub fn blocks_application(&self, app_name: &str) -> bool {
        self.applications.iter().any(|a| a == app_name)
    }

    /// Check if a node name is excluded.
    #[must_use]
    pub fn blocks_node(&self, node_name: &str) -> bool {
        self.nodes.iter().any(|n| n == node_name)
    }

    /// Check if a node with these names is excluded.
    #[must_use]
    pub fn blocks(&self, app_name: &str, node_name: &str) -> bool {
        self.blocks_application(app_name) || self.blocks_node(node_name)
    }
}

impl Default for Blacklist {
    /// The server's own utility nodes, which are never useful routing targets.
    fn default() -> Self {
        Self {
            applications: vec!["WirePlumber".to_string(), "PipeWire".to_string()],
            nodes: vec![
                "Dummy-Driver".to_string(),
                "Freewheel-Driver".to_string(),
                "Midi-Bridge".to_string(),
            ],
        }
    }
}
