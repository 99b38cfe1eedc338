use std::str::FromStr;

use alloy::primitives::U256;
use serde_json::Value;
use warp_core::{EventName, EventRecord};

use crate::StoreError;

/// Rejects field names the event does not carry, before any read happens.
pub fn validate_fields(event: EventName, fields: &[&str]) -> Result<(), StoreError> {
    if fields.is_empty() {
        return Err(StoreError::InvalidQuery(format!(
            "no fields given for {event}"
        )));
    }
    let known = event.field_names();
    if let Some(unknown) = fields.iter().find(|field| !known.contains(field)) {
        return Err(StoreError::InvalidQuery(format!(
            "{event} has no field {unknown}"
        )));
    }
    Ok(())
}

/// Whether any of `fields` of the record's payload equals `value`.
///
/// Hex strings compare case-insensitively and numbers compare by value, so an address
/// matches in any casing and `"16"` matches a quantity stored as `0x10`.
pub fn record_matches(
    record: &EventRecord,
    fields: &[&str],
    value: &str,
) -> Result<bool, StoreError> {
    let json = serde_json::to_value(&record.payload)?;
    let Some(body) = json.get(record.name().as_str()) else {
        return Ok(false);
    };
    Ok(fields
        .iter()
        .filter_map(|field| body.get(*field))
        .any(|candidate| value_matches(candidate, value)))
}

fn value_matches(candidate: &Value, needle: &str) -> bool {
    match candidate {
        Value::String(s) => {
            s.eq_ignore_ascii_case(needle)
                || matches!(
                    (U256::from_str(s), U256::from_str(needle)),
                    (Ok(a), Ok(b)) if a == b
                )
        }
        Value::Number(n) => {
            n.to_string() == needle
                || matches!(
                    (n.as_u64(), U256::from_str(needle)),
                    (Some(a), Ok(b)) if U256::from(a) == b
                )
        }
        Value::Bool(b) => b.to_string() == needle,
        Value::Array(items) => items.iter().any(|item| value_matches(item, needle)),
        Value::Null | Value::Object(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warp_core::testing::{self, SHARE_TOKEN, addr};

    #[test]
    fn unknown_field_is_rejected() {
        assert!(validate_fields(EventName::TransferSingle, &["to", "from"]).is_ok());
        assert!(matches!(
            validate_fields(EventName::TransferSingle, &["recipient"]),
            Err(StoreError::InvalidQuery(_))
        ));
        assert!(validate_fields(EventName::TransferSingle, &[]).is_err());
    }

    #[test]
    fn matches_addresses_in_any_case_and_numbers_by_value() {
        let record = testing::record(
            3,
            0,
            SHARE_TOKEN,
            testing::transfer_single(addr(0xab), addr(0xcd), 16, 2),
        );
        let upper = format!("{:#x}", addr(0xcd)).to_uppercase().replace("0X", "0x");
        assert!(record_matches(&record, &["to", "from"], &upper).unwrap());
        assert!(record_matches(&record, &["id"], "16").unwrap());
        assert!(record_matches(&record, &["id"], "0x10").unwrap());
        assert!(!record_matches(&record, &["value"], "16").unwrap());
    }
}
