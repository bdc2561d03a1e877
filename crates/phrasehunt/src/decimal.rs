//! Serde helpers for arbitrary-precision indices.
//!
//! Indices routinely exceed `u64` (a 24-word full search has `2^264`
//! candidates), so they travel as base-10 strings in every JSON document. Plain
//! JSON integers are still accepted on input when they fit in a `u64`.

use core::fmt;
use num_bigint::BigUint;
use serde::{Deserializer, Serializer, de};

struct DecimalVisitor;

impl de::Visitor<'_> for DecimalVisitor {
    type Value = BigUint;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a non-negative integer as a decimal string")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        v.trim()
            .parse::<BigUint>()
            .map_err(|e| E::custom(format_args!("invalid decimal {v:?}: {e}")))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        Ok(BigUint::from(v))
    }
}

pub mod as_decimal {
    use super::{BigUint, DecimalVisitor, Deserializer, Serializer};

    /// Serialize a big integer as a decimal string.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying serializer fails.
    pub fn serialize<S: Serializer>(value: &BigUint, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(value)
    }

    /// Deserialize a big integer from a decimal string or a JSON integer.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is neither.
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<BigUint, D::Error> {
        d.deserialize_any(DecimalVisitor)
    }
}

pub mod as_decimal_opt {
    use super::{BigUint, DecimalVisitor, Deserializer, Serializer, de};
    use core::fmt;

    /// Serialize an optional big integer as a decimal string or `null`.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying serializer fails.
    pub fn serialize<S: Serializer>(value: &Option<BigUint>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => s.collect_str(v),
            None => s.serialize_none(),
        }
    }

    struct OptVisitor;

    impl<'de> de::Visitor<'de> for OptVisitor {
        type Value = Option<BigUint>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("an optional decimal string")
        }

        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_some<D: Deserializer<'de>>(self, d: D) -> Result<Self::Value, D::Error> {
            d.deserialize_any(DecimalVisitor).map(Some)
        }
    }

    /// Deserialize an optional big integer.
    ///
    /// # Errors
    ///
    /// Returns an error if a present value is not a valid decimal.
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<BigUint>, D::Error> {
        d.deserialize_option(OptVisitor)
    }
}
