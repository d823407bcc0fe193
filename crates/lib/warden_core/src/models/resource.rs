//! Protected API resource definitions.

use serde::{Deserialize, Serialize};

/// A protected API and the scopes it declares.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiResource {
    /// Logical name, usually the API's URL. Unique.
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub scopes: Vec<String>,
}

fn default_true() -> bool {
    true
}
