use serde::{Deserialize, Serialize};

/// Formatting configuration for document output. Deserializable so a host
/// can load it from its own config file; defaults match US lease documents.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Prefix for currency-formatted numbers.
    pub currency_symbol: String,
    /// Variable-name fragments that mark a numeric value as money.
    /// Matched case-insensitively as substrings, so `monthly_rent` is money.
    pub money_fields: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            currency_symbol: "$".to_string(),
            money_fields: vec![
                "amount".to_string(),
                "rent".to_string(),
                "deposit".to_string(),
            ],
        }
    }
}

impl EngineConfig {
    pub fn is_money_field(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        self.money_fields
            .iter()
            .any(|frag| name.contains(&frag.to_lowercase()))
    }
}
