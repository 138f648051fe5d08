//! Scalar formatters: null, booleans, strings, numbers, bytes.

use super::node::float_to_string;
use super::{Encoder, Format, FormatError, FormatNode};
use crate::value::{HostValue, Integer};

#[derive(Debug, Clone, Copy, Default)]
pub struct NoneFormat;

impl<V: HostValue> Format<V> for NoneFormat {
    fn format(&self, value: &V, _: &Encoder<V>) -> Result<FormatNode, FormatError> {
        if value.is_none() {
            Ok(FormatNode::Null)
        } else {
            Err(FormatError::mismatch("expecting None"))
        }
    }
}

/// Truthiness of the value.
#[derive(Debug, Clone, Copy, Default)]
pub struct BoolFormat;

impl<V: HostValue> Format<V> for BoolFormat {
    fn format(&self, value: &V, _: &Encoder<V>) -> Result<FormatNode, FormatError> {
        Ok(FormatNode::Bool(value.to_bool()?))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StrFormat;

impl<V: HostValue> Format<V> for StrFormat {
    fn format(&self, value: &V, _: &Encoder<V>) -> Result<FormatNode, FormatError> {
        Ok(FormatNode::Str(value.to_str()?))
    }
}

/// Inlines small integers; boxes the rest as decimal strings.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntFormat;

impl IntFormat {
    pub fn node(value: &Integer) -> FormatNode {
        match value.inline() {
            Some(n) => FormatNode::Int(n),
            None => FormatNode::BigInt(value.to_string()),
        }
    }
}

impl<V: HostValue> Format<V> for IntFormat {
    fn format(&self, value: &V, _: &Encoder<V>) -> Result<FormatNode, FormatError> {
        Ok(Self::node(&value.to_int()?))
    }
}

/// Always boxed as a decimal string, never inlined.
#[derive(Debug, Clone, Copy, Default)]
pub struct FloatFormat;

impl<V: HostValue> Format<V> for FloatFormat {
    fn format(&self, value: &V, _: &Encoder<V>) -> Result<FormatNode, FormatError> {
        Ok(FormatNode::Float(float_to_string(value.to_float()?)))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RationalFormat;

impl<V: HostValue> Format<V> for RationalFormat {
    fn format(&self, value: &V, _: &Encoder<V>) -> Result<FormatNode, FormatError> {
        let (numerator, denominator) = value.to_rational()?;
        if denominator.is_zero() {
            return Err(FormatError::Domain(
                "rational with zero denominator".to_string(),
            ));
        }
        Ok(FormatNode::Rational {
            numerator: numerator.to_string(),
            denominator: denominator.to_string(),
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BytesFormat;

impl<V: HostValue> Format<V> for BytesFormat {
    fn format(&self, value: &V, _: &Encoder<V>) -> Result<FormatNode, FormatError> {
        Ok(FormatNode::Bytes(value.to_bytes()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Native, native_encoder};

    #[test]
    fn small_integers_are_inlined() {
        let encoder = native_encoder();
        for n in [0i64, 1, -1, (1 << 20) - 1, -(1 << 20) + 1] {
            let node = IntFormat.format(&Native::Int(n.into()), &encoder).unwrap();
            assert_eq!(node, FormatNode::Int(n));
        }
    }

    #[test]
    fn large_integers_are_boxed() {
        let encoder = native_encoder();
        let node = IntFormat.format(&Native::Int((1i64 << 30).into()), &encoder).unwrap();
        assert_eq!(node, FormatNode::BigInt("1073741824".into()));

        let node = IntFormat
            .format(&Native::Int((-(1i64 << 20)).into()), &encoder)
            .unwrap();
        assert_eq!(node, FormatNode::BigInt("-1048576".into()));

        let huge = Integer::parse("123456789012345678901234567890").unwrap();
        let node = IntFormat.format(&Native::Int(huge), &encoder).unwrap();
        assert_eq!(node, FormatNode::BigInt("123456789012345678901234567890".into()));
    }

    #[test]
    fn floats_are_never_inlined() {
        let encoder = native_encoder();
        let node = FloatFormat.format(&Native::Float(1.0), &encoder).unwrap();
        assert_eq!(node, FormatNode::Float("1.0".into()));

        let node = FloatFormat.format(&Native::Float(f64::NEG_INFINITY), &encoder).unwrap();
        assert_eq!(node, FormatNode::Float("-inf".into()));

        let node = FloatFormat.format(&Native::Float(f64::NAN), &encoder).unwrap();
        assert_eq!(node, FormatNode::Float("nan".into()));
    }

    #[test]
    fn none_format_only_accepts_null() {
        let encoder = native_encoder();
        assert_eq!(NoneFormat.format(&Native::None, &encoder).unwrap(), FormatNode::Null);
        assert!(NoneFormat.format(&Native::Bool(false), &encoder).is_err());
    }

    #[test]
    fn bool_format_uses_truthiness() {
        let encoder = native_encoder();
        assert_eq!(
            BoolFormat.format(&Native::List(vec![]), &encoder).unwrap(),
            FormatNode::Bool(false)
        );
        assert_eq!(
            BoolFormat.format(&Native::Str("x".into()), &encoder).unwrap(),
            FormatNode::Bool(true)
        );
    }

    #[test]
    fn rational_zero_denominator_is_domain_error() {
        let encoder = native_encoder();
        let err = RationalFormat
            .format(&Native::Rational(3.into(), 0.into()), &encoder)
            .unwrap_err();
        assert!(matches!(err, FormatError::Domain(_)));

        let node = RationalFormat
            .format(&Native::Rational((-3).into(), 4.into()), &encoder)
            .unwrap();
        assert_eq!(
            node,
            FormatNode::Rational {
                numerator: "-3".into(),
                denominator: "4".into()
            }
        );
    }

    #[test]
    fn bytes_coercion_mismatch() {
        let encoder = native_encoder();
        let err = BytesFormat.format(&Native::Float(1.5), &encoder).unwrap_err();
        assert!(matches!(err, FormatError::Mismatch(_)));
    }
}
