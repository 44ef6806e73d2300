use crate::config::ConversationConfig;
use crate::errors::DomainError;

/// Canonical form for channel contact addresses: digits only, with the default
/// country code prepended to bare local numbers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AddressNormalizer {
    country_code: String,
    local_digits: usize,
}

impl AddressNormalizer {
    pub fn new(country_code: impl Into<String>, local_digits: usize) -> Self {
        Self { country_code: country_code.into(), local_digits }
    }

    pub fn from_config(config: &ConversationConfig) -> Self {
        Self::new(config.default_country_code.trim(), config.local_number_digits)
    }

    /// Idempotent: feeding the output back in returns it unchanged.
    pub fn normalize(&self, raw: &str) -> Result<String, DomainError> {
        let trimmed = raw.trim();
        // Transport suffix such as `@c.us`.
        let local = trimmed.split('@').next().unwrap_or_default().trim();
        let expanded = expand_exponent(local).unwrap_or_else(|| local.to_string());
        let digits: String = expanded.chars().filter(char::is_ascii_digit).collect();

        if digits.is_empty() {
            return Err(DomainError::InvalidAddress(raw.to_string()));
        }

        if digits.len() == self.local_digits && !digits.starts_with(&self.country_code) {
            return Ok(format!("{}{digits}", self.country_code));
        }

        Ok(digits)
    }
}

impl Default for AddressNormalizer {
    fn default() -> Self {
        Self::new("263", 9)
    }
}

/// Spreadsheet exports turn long numbers into `2.63771234567E+11`.
fn expand_exponent(value: &str) -> Option<String> {
    if !value.contains(['e', 'E']) {
        return None;
    }
    let parsed = value.parse::<f64>().ok()?;
    if !parsed.is_finite() || parsed < 0.0 {
        return None;
    }
    Some(format!("{parsed:.0}"))
}
