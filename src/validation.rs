//! Declarative field rules.
//!
//! Fields are checked in declaration order and each field's rules in the
//! order they were added; the first violation is the whole diagnostic.

use std::fmt;

use crate::binding::{Bind, Schema};

/// A rule attached to a [`Field`](crate::binding::Field).
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Rule {
    /// The value must not be the zero value of its type.
    Required,
    /// Numbers must be `<= N`; strings must have at most `N` characters.
    Max(f64),
}

impl Rule {
    /// The tag name reported in [`ValidationError`].
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Required => "required",
            Self::Max(_) => "max",
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Required => f.write_str("required"),
            Self::Max(n) => write!(f, "max={n}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("Field validation for '{field}' failed on the '{tag}' tag")]
pub struct ValidationError {
    pub field: &'static str,
    pub tag: &'static str,
}

impl<T> Schema<T> {
    /// Check every field's rules against `target`.
    pub fn validate(&self, target: &T) -> Result<(), ValidationError> {
        for field in &self.fields {
            for rule in field.rules() {
                let ok = match *rule {
                    Rule::Required => !field.is_zero(target),
                    Rule::Max(limit) => !field.exceeds(target, limit),
                };
                if !ok {
                    return Err(ValidationError { field: field.name(), tag: rule.tag() });
                }
            }
        }
        Ok(())
    }
}

/// Validate a value against its type's schema.
pub fn validate<T: Bind>(target: &T) -> Result<(), ValidationError> {
    T::schema().validate(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::Field;

    #[derive(Default)]
    struct Order {
        sku: String,
        qty: u32,
        note: Option<String>,
    }

    fn schema() -> Schema<Order> {
        Schema::new()
            .field(Field::new("SKU", |o: &Order| &o.sku, |o: &mut Order| &mut o.sku).required().max(8.0))
            .field(Field::new("Qty", |o: &Order| &o.qty, |o: &mut Order| &mut o.qty).required().max(10.0))
            .field(Field::new("Note", |o: &Order| &o.note, |o: &mut Order| &mut o.note).max(5.0))
    }

    #[test]
    fn passing_order() {
        let order = Order { sku: "A-1".into(), qty: 10, note: None };
        assert_eq!(schema().validate(&order), Ok(()));
    }

    #[test]
    fn first_failing_field_wins() {
        let order = Order { sku: String::new(), qty: 0, note: Some("far too long".into()) };
        let err = schema().validate(&order).unwrap_err();
        assert_eq!(err.to_string(), "Field validation for 'SKU' failed on the 'required' tag");
    }

    #[test]
    fn max_on_numbers_and_strings() {
        let err = schema().validate(&Order { sku: "A".into(), qty: 11, note: None }).unwrap_err();
        assert_eq!(err, ValidationError { field: "Qty", tag: "max" });

        let err = schema().validate(&Order { sku: "ABCDEFGHI".into(), qty: 1, note: None }).unwrap_err();
        assert_eq!(err, ValidationError { field: "SKU", tag: "max" });
    }

    #[test]
    fn max_counts_characters_not_bytes() {
        let order = Order { sku: "ÅÅÅÅÅÅÅÅ".into(), qty: 1, note: None };
        assert_eq!(schema().validate(&order), Ok(()));
    }

    #[test]
    fn max_on_wide_integers_is_exact() {
        struct Ledger {
            total: u64,
        }
        let schema = Schema::new()
            .field(Field::new("Total", |l: &Ledger| &l.total, |l: &mut Ledger| &mut l.total)
                .max(9_007_199_254_740_992.0));

        assert!(schema.validate(&Ledger { total: 9_007_199_254_740_992 }).is_ok());
        let err = schema.validate(&Ledger { total: 9_007_199_254_740_993 }).unwrap_err();
        assert_eq!(err, ValidationError { field: "Total", tag: "max" });
    }

    #[test]
    fn optional_field_checked_only_when_present() {
        let order = Order { sku: "A".into(), qty: 1, note: Some("toolong".into()) };
        assert_eq!(schema().validate(&order).unwrap_err().field, "Note");
    }

    #[test]
    fn rule_display() {
        assert_eq!(Rule::Max(3.0).to_string(), "max=3");
        assert_eq!(Rule::Required.to_string(), "required");
    }
}
