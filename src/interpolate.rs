use crate::config::EngineConfig;
use crate::types::{VariableMap, VariableValue};
use regex::{Captures, Regex};
use rust_decimal::Decimal;
use std::sync::OnceLock;

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Whole-token match: `{{ name }}` with optional inner whitespace. The
    // name is captured in full, so `rent` can never fire inside
    // `{{rent_due_day}}`.
    RE.get_or_init(|| Regex::new(r"\{\{\s*([A-Za-z0-9_.-]+)\s*\}\}").expect("placeholder regex"))
}

/// Substitute `{{name}}` placeholders with display-formatted values.
///
/// Placeholders whose name has no entry in `variables` are left untouched —
/// a half-filled document is more useful to a reviewer than an error here.
pub fn interpolate(text: &str, variables: &VariableMap, config: &EngineConfig) -> String {
    placeholder_re()
        .replace_all(text, |caps: &Captures<'_>| {
            let name = &caps[1];
            match variables.get(name) {
                Some(value) => display_value(name, value, config),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Human-readable form of one value, keyed by the variable name because
/// money formatting depends on the name, not the value.
fn display_value(name: &str, value: &VariableValue, config: &EngineConfig) -> String {
    match value {
        VariableValue::Text(s) => s.clone(),
        VariableValue::Bool(true) => "Yes".to_string(),
        VariableValue::Bool(false) => "No".to_string(),
        VariableValue::Date(d) => d.format("%B %-d, %Y").to_string(),
        VariableValue::Number(n) => {
            if config.is_money_field(name) {
                format_currency(*n, &config.currency_symbol)
            } else {
                n.normalize().to_string()
            }
        }
    }
}

/// `2500` → `$2,500.00`. Two decimal places, thousands grouping.
fn format_currency(value: Decimal, symbol: &str) -> String {
    let rounded = value.round_dp(2);
    let negative = rounded.is_sign_negative();
    let fixed = format!("{:.2}", rounded.abs());
    let (int_part, frac_part) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, ch) in int_part.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    let grouped: String = grouped.chars().rev().collect();

    if negative {
        format!("-{symbol}{grouped}.{frac_part}")
    } else {
        format!("{symbol}{grouped}.{frac_part}")
    }
}
