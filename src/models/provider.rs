use std::collections::BTreeMap;

/// A validated provider registry entry.
///
/// `base_url` carries no trailing slash; the registry strips it at build
/// time so proxy URL assembly can always join with a single `/`.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub slug: String,
    pub display_name: String,
    pub base_url: String,
    pub auth_url: String,
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub scopes: Vec<String>,
    /// Extra query parameters appended to the authorization URL
    /// (e.g. `access_type=offline` for Google).
    pub extra_params: BTreeMap<String, String>,
}
