//! OData `$filter` expression builder.
//!
//! Identifiers (property paths, lambda variables) are validated and string
//! literals are escaped before they are embedded, so a caller-supplied
//! value such as a group id can never terminate the literal and inject
//! further filter syntax.
//!
//! ```ignore
//! let inner = Filter::eq("g/id", "42")?;
//! let f = Filter::any("machineGroups", "g", &inner)?;
//! assert_eq!(f.as_str(), "machineGroups/any(g:g/id eq '42')");
//! ```

use std::fmt;

use crate::error::{Error, Result};

/// A validated OData filter expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter(String);

impl Filter {
    /// `property eq 'value'`.
    pub fn eq(property: &str, value: &str) -> Result<Self> {
        validate_path(property)?;
        Ok(Filter(format!("{property} eq {}", quote(value)?)))
    }

    /// `collection/any(var:inner)`. `inner` should reference `var`.
    pub fn any(collection: &str, variable: &str, inner: &Filter) -> Result<Self> {
        validate_path(collection)?;
        validate_identifier(variable)?;
        Ok(Filter(format!("{collection}/any({variable}:{})", inner.0)))
    }

    /// `(a) and (b)`.
    pub fn and(a: &Filter, b: &Filter) -> Self {
        Filter(format!("({}) and ({})", a.0, b.0))
    }

    /// The expression text, unencoded. Attach it as a query parameter and
    /// let the HTTP layer percent-encode it.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Wraps a value in single quotes, doubling embedded quotes.
fn quote(value: &str) -> Result<String> {
    if value.chars().any(char::is_control) {
        return Err(Error::InvalidFilter(format!(
            "literal {value:?} contains control characters"
        )));
    }
    Ok(format!("'{}'", value.replace('\'', "''")))
}

fn validate_identifier(ident: &str) -> Result<()> {
    let mut chars = ident.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidFilter(format!("{ident:?} is not a valid identifier")))
    }
}

fn validate_path(path: &str) -> Result<()> {
    path.split('/').try_for_each(validate_identifier)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_group_membership_filter() {
        let inner = Filter::eq("g/id", "42").unwrap();
        let f = Filter::any("machineGroups", "g", &inner).unwrap();
        assert_eq!(f.as_str(), "machineGroups/any(g:g/id eq '42')");
    }

    #[test]
    fn quotes_are_doubled() {
        let f = Filter::eq("name", "O'Brien').or(1 eq 1").unwrap();
        assert_eq!(f.as_str(), "name eq 'O''Brien'').or(1 eq 1'");
    }

    #[test]
    fn control_characters_are_rejected() {
        assert!(matches!(
            Filter::eq("name", "a\nb"),
            Err(Error::InvalidFilter(_))
        ));
    }

    #[test]
    fn invalid_property_paths_are_rejected() {
        for bad in ["", "1abc", "a b", "a//b", "a/", "id eq 1"] {
            assert!(Filter::eq(bad, "x").is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn lambda_variable_must_be_single_identifier() {
        let inner = Filter::eq("g/id", "1").unwrap();
        assert!(Filter::any("machineGroups", "g/x", &inner).is_err());
    }

    #[test]
    fn and_parenthesizes_operands() {
        let a = Filter::eq("healthStatus", "Active").unwrap();
        let b = Filter::eq("osPlatform", "Windows11").unwrap();
        assert_eq!(
            Filter::and(&a, &b).to_string(),
            "(healthStatus eq 'Active') and (osPlatform eq 'Windows11')"
        );
    }
}
