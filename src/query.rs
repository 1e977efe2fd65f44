//! Lookup query: the typed hints the scorer reads plus an opaque remainder.

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ResolveError;

/// Rarity hint supplied by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rarity {
    Common,
    Scarce,
    Rare,
    #[serde(alias = "ultra-rare", alias = "ultrarare")]
    UltraRare,
    /// Any word outside the scale; scored as type-agnostic.
    #[serde(other)]
    Unknown,
}

/// Structured lookup request. Immutable for the duration of one resolution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Query {
    /// Category / type hint, e.g. "error", "variety", "commemorative".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Geographic origin of the item.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rarity: Option<Rarity>,
    /// Free-text item name, e.g. "1909-S VDB Lincoln cent".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Accepts `1909` or `"1909"`; anything else is dropped.
    #[serde(
        default,
        deserialize_with = "lenient_year",
        skip_serializing_if = "Option::is_none"
    )]
    pub year: Option<i32>,
    /// Fields the core does not read; passed through to executors untouched.
    #[serde(default, flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Coarse query class driving the type-relevance table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryProfile {
    /// Rare / ultra-rare items.
    Rare,
    /// Mint errors and die varieties.
    ErrorVariety,
    /// Everything else; type-agnostic.
    Common,
}

impl Query {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_country(mut self, country: impl Into<String>) -> Self {
        self.country = Some(country.into());
        self
    }

    pub fn with_rarity(mut self, rarity: Rarity) -> Self {
        self.rarity = Some(rarity);
        self
    }

    /// Category hint wins over rarity: an "error" coin is researched on
    /// forums and databases even when it is also rare.
    pub fn profile(&self) -> QueryProfile {
        let category = self
            .category
            .as_deref()
            .map(|c| c.to_ascii_lowercase())
            .unwrap_or_default();
        if category.contains("error") || category.contains("variety") {
            return QueryProfile::ErrorVariety;
        }
        match self.rarity {
            Some(Rarity::Rare) | Some(Rarity::UltraRare) => QueryProfile::Rare,
            _ => QueryProfile::Common,
        }
    }

    fn has_identifying_hint(&self) -> bool {
        let filled = |s: &Option<String>| s.as_deref().is_some_and(|v| !v.trim().is_empty());
        let rarity = self.rarity.is_some_and(|r| r != Rarity::Unknown);
        filled(&self.name) || filled(&self.category) || filled(&self.country) || rarity
    }
}

fn lenient_year<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i32>, D::Error> {
    use serde_json::Value;
    let raw = Option::<Value>::deserialize(d)?;
    Ok(raw.and_then(|v| match v {
        Value::Number(n) => n.as_i64().and_then(|y| i32::try_from(y).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }))
}

/// Reject a missing query or one that carries no hint at all.
pub fn validate_query(query: Option<&Query>) -> Result<&Query, ResolveError> {
    let q = query.ok_or_else(|| ResolveError::InvalidQuery("query is required".to_string()))?;
    if !q.has_identifying_hint() {
        return Err(ResolveError::InvalidQuery(
            "query needs at least one of name, category, country, rarity".to_string(),
        ));
    }
    Ok(q)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_query_is_invalid() {
        let err = validate_query(None).unwrap_err();
        assert!(matches!(err, ResolveError::InvalidQuery(_)));
    }

    #[test]
    fn blank_hints_are_invalid() {
        let q = Query {
            name: Some("   ".into()),
            ..Query::default()
        };
        assert!(validate_query(Some(&q)).is_err());
        assert!(validate_query(Some(&Query::named("Morgan dollar"))).is_ok());
    }

    #[test]
    fn profile_prefers_error_category() {
        let q = Query::named("1955 doubled die")
            .with_category("Error")
            .with_rarity(Rarity::UltraRare);
        assert_eq!(q.profile(), QueryProfile::ErrorVariety);
        let q = Query::named("1804 dollar").with_rarity(Rarity::UltraRare);
        assert_eq!(q.profile(), QueryProfile::Rare);
        assert_eq!(Query::named("cent").profile(), QueryProfile::Common);
    }

    #[test]
    fn unknown_fields_pass_through() {
        let q: Query =
            serde_json::from_str(r#"{"name":"x","rarity":"ultra-rare","grade":"MS65"}"#).unwrap();
        assert_eq!(q.rarity, Some(Rarity::UltraRare));
        assert_eq!(q.extra.get("grade"), Some(&serde_json::json!("MS65")));
    }

    #[test]
    fn unfamiliar_hints_do_not_reject_the_query() {
        let q: Query = serde_json::from_value(serde_json::json!({
            "name": "1804 dollar",
            "rarity": "very_rare",
            "year": "1804"
        }))
        .unwrap();
        assert_eq!(q.rarity, Some(Rarity::Unknown));
        assert_eq!(q.year, Some(1804));
        assert_eq!(q.profile(), QueryProfile::Common);
        assert!(validate_query(Some(&q)).is_ok());

        let q: Query =
            serde_json::from_str(r#"{"name":"cent","year":"nineteen oh nine"}"#).unwrap();
        assert_eq!(q.year, None);
        let q: Query = serde_json::from_str(r#"{"name":"cent","year":1909}"#).unwrap();
        assert_eq!(q.year, Some(1909));

        // An unrecognised rarity word alone identifies nothing.
        let q: Query = serde_json::from_str(r#"{"rarity":"uncommon"}"#).unwrap();
        assert!(validate_query(Some(&q)).is_err());
    }
}
