//! Entity type vocabulary
//!
//! Entity types are plain strings so that recognizers contributed by an
//! external engine and by the pattern registry share one namespace. This
//! module names the types the pipeline has behavior for and normalizes
//! the aliases external recognizers tend to emit.

pub const PERSON: &str = "PERSON";
pub const LOCATION: &str = "LOCATION";
pub const ORGANIZATION: &str = "ORGANIZATION";
pub const EMAIL_ADDRESS: &str = "EMAIL_ADDRESS";
pub const PHONE_NUMBER: &str = "PHONE_NUMBER";
pub const DATE_TIME: &str = "DATE_TIME";
pub const DATE: &str = "DATE";
pub const TIME: &str = "TIME";
pub const DURATION_TIME: &str = "DURATION_TIME";
pub const CREDIT_CARD: &str = "CREDIT_CARD";
pub const IP_ADDRESS: &str = "IP_ADDRESS";
pub const URL: &str = "URL";
pub const MAC_ADDRESS: &str = "MAC_ADDRESS";
pub const US_SSN: &str = "US_SSN";
pub const UK_NHS: &str = "UK_NHS";
pub const TW_ID_NUMBER: &str = "TW_ID_NUMBER";
pub const TW_PHONE_NUMBER: &str = "TW_PHONE_NUMBER";
pub const TW_HOME_NUMBER: &str = "TW_HOME_NUMBER";
pub const TW_NHI_NUMBER: &str = "TW_NHI_NUMBER";
pub const TW_HEALTH_INSURANCE: &str = "TW_HEALTH_INSURANCE";
pub const TW_PASSPORT_NUMBER: &str = "TW_PASSPORT_NUMBER";
pub const UNIFIED_BUSINESS_NO: &str = "UNIFIED_BUSINESS_NO";

/// Labels a remote generator must never echo back as a "replacement"
pub const LABEL_KEYWORDS: &[&str] = &[PERSON, LOCATION, ORGANIZATION];

/// Normalize an entity type label: trim, upper-case, resolve aliases.
pub fn normalize_entity_type(entity_type: &str) -> String {
    let upper = entity_type.trim().to_uppercase();
    match upper.as_str() {
        "EMAIL" | "E_MAIL" => EMAIL_ADDRESS.to_string(),
        "PHONE" | "TEL" => PHONE_NUMBER.to_string(),
        "DATE" => DATE_TIME.to_string(),
        _ => upper,
    }
}

/// Types whose values are digit/character skeletons (IDs, numbers)
pub fn is_skeleton_type(entity_type: &str) -> bool {
    matches!(
        entity_type,
        PHONE_NUMBER
            | TW_PHONE_NUMBER
            | TW_HOME_NUMBER
            | CREDIT_CARD
            | US_SSN
            | UK_NHS
            | TW_ID_NUMBER
            | TW_NHI_NUMBER
            | TW_HEALTH_INSURANCE
            | TW_PASSPORT_NUMBER
            | UNIFIED_BUSINESS_NO
    )
}

/// Phone-like types, validated by digit count and shape
pub fn is_phone_type(entity_type: &str) -> bool {
    matches!(entity_type, PHONE_NUMBER | TW_PHONE_NUMBER | TW_HOME_NUMBER)
}

/// Types produced by statistical NER rather than patterns
pub fn is_named_type(entity_type: &str) -> bool {
    matches!(entity_type, PERSON | LOCATION | ORGANIZATION)
}
