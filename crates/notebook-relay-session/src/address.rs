//! Canonical identity of a notebook document.

use std::fmt;

use thiserror::Error;

/// Address parsing failure.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("document address is empty")]
    Empty,
}

/// The address of one notebook document.
///
/// Equality of two addresses is equality of their canonical string
/// forms; the scheme is case-insensitive, the path is not.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentAddress {
    scheme: String,
    path: String,
}

impl DocumentAddress {
    /// Build an address from a scheme and path.
    #[must_use]
    pub fn new<S: Into<String>, P: Into<String>>(scheme: S, path: P) -> Self {
        Self {
            scheme: scheme.into().to_ascii_lowercase(),
            path: path.into(),
        }
    }

    /// Parse an address of the form `scheme:path`.
    ///
    /// A bare path with no scheme is treated as a `file` address.
    ///
    /// # Errors
    /// Returns [`AddressError::Empty`] for a blank input.
    pub fn parse(input: &str) -> Result<Self, AddressError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(AddressError::Empty);
        }
        match trimmed.split_once(':') {
            Some((scheme, path)) if !scheme.is_empty() => Ok(Self::new(scheme, path)),
            _ => Ok(Self::new("file", trimmed)),
        }
    }

    #[must_use]
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The canonical string form, stable for the lifetime of a session.
    #[must_use]
    pub fn canonical(&self) -> String {
        format!("{}:{}", self.scheme, self.path)
    }
}

impl fmt::Display for DocumentAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scheme, self.path)
    }
}

/// Map key identifying one session: a document address in canonical
/// form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey(String);

impl SessionKey {
    /// Derive the key for a document address.
    #[must_use]
    pub fn from_address(address: &DocumentAddress) -> Self {
        Self(address.canonical())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&DocumentAddress> for SessionKey {
    fn from(address: &DocumentAddress) -> Self {
        Self::from_address(address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheme_is_case_insensitive() {
        let lower = DocumentAddress::parse("file:///tmp/demo.ipynb").unwrap();
        let upper = DocumentAddress::parse("FILE:///tmp/demo.ipynb").unwrap();
        assert_eq!(lower, upper);
        assert_eq!(SessionKey::from_address(&lower), SessionKey::from_address(&upper));
    }

    #[test]
    fn path_is_case_sensitive() {
        let a = DocumentAddress::parse("file:///tmp/A.ipynb").unwrap();
        let b = DocumentAddress::parse("file:///tmp/a.ipynb").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn bare_path_defaults_to_file_scheme() {
        let address = DocumentAddress::parse("/tmp/demo.ipynb").unwrap();
        assert_eq!(address.scheme(), "file");
        assert_eq!(address.canonical(), "file:/tmp/demo.ipynb");
    }

    #[test]
    fn untitled_documents_keep_their_scheme() {
        let address = DocumentAddress::parse("untitled:Untitled-1").unwrap();
        assert_eq!(address.scheme(), "untitled");
        assert_eq!(address.path(), "Untitled-1");
    }

    #[test]
    fn empty_input_is_rejected() {
        assert_eq!(DocumentAddress::parse("   "), Err(AddressError::Empty));
    }
}
