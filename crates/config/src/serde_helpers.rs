use serde::Deserializer;
use serde::de::{self, Visitor};
use std::fmt;

/// Block numbers given as an integer, a decimal string, or a `0x` hex string.
pub(crate) mod block_number {
    use super::{Deserializer, Visitor, de, fmt};

    pub(crate) fn parse_block_number(value: &str) -> Result<u64, String> {
        let value = value.trim();
        if let Some(hex) = value
            .strip_prefix("0x")
            .or_else(|| value.strip_prefix("0X"))
        {
            return u64::from_str_radix(hex, 16).map_err(|err| err.to_string());
        }
        value
            .replace('_', "")
            .parse::<u64>()
            .map_err(|err| err.to_string())
    }

    pub(crate) fn deserialize<'de, D>(deserializer: D) -> Result<u64, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(BlockNumberVisitor)
    }

    struct BlockNumberVisitor;

    #[allow(clippy::elidable_lifetime_names)]
    impl<'de> Visitor<'de> for BlockNumberVisitor {
        type Value = u64;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a block number as integer, decimal string or 0x-hex string")
        }

        fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            u64::try_from(value).map_err(|_| E::custom("block number must be non-negative"))
        }

        fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(value)
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            parse_block_number(value).map_err(E::custom)
        }

        fn visit_string<E>(self, value: String) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            self.visit_str(&value)
        }
    }
}
