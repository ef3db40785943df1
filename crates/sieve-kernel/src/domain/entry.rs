//! Domain Model: Entry Point Resolution
//!
//! A transformation must define exactly one of the recognized top-level
//! functions. Resolution happens once per sandbox, right after the user
//! source has run, and its result is fixed for the sandbox's lifetime.

use std::fmt;

use sieve_core::{SieveError, SieveResult};

/// The recognized entry points, in the order they are checked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryPoint {
    /// `transform(events)`: one output per input
    Transform,
    /// `transformEvent(events)`: one output per input
    TransformEvent,
    /// `transformBatch(events)`: free-form batch in, batch out
    TransformBatch,
}

impl EntryPoint {
    pub const RECOGNIZED: [EntryPoint; 3] = [
        EntryPoint::Transform,
        EntryPoint::TransformEvent,
        EntryPoint::TransformBatch,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Transform => "transform",
            Self::TransformEvent => "transformEvent",
            Self::TransformBatch => "transformBatch",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::RECOGNIZED.into_iter().find(|entry| entry.name() == name)
    }

    /// Whether output order and length must mirror the input batch
    pub fn is_one_to_one(self) -> bool {
        matches!(self, Self::Transform | Self::TransformEvent)
    }

    /// Pick the entry point from the function names found on the global scope.
    ///
    /// Unknown names are ignored; zero or several recognized names fail.
    pub fn resolve<S: AsRef<str>>(found: &[S]) -> SieveResult<Self> {
        let mut matches = found.iter().filter_map(|name| Self::from_name(name.as_ref()));

        match (matches.next(), matches.next()) {
            (Some(entry), None) => Ok(entry),
            _ => {
                let expected: Vec<&str> = Self::RECOGNIZED.iter().map(|e| e.name()).collect();
                let found: Vec<&str> = found.iter().map(|name| name.as_ref()).collect();
                Err(SieveError::Resolution(format!(
                    "Expected exactly one of {}. Found [{}]",
                    expected.join(","),
                    found.join(",")
                )))
            }
        }
    }
}

impl fmt::Display for EntryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_entry_resolves() {
        assert_eq!(EntryPoint::resolve(&["transformBatch"]).unwrap(), EntryPoint::TransformBatch);
        assert_eq!(EntryPoint::resolve(&["transform"]).unwrap(), EntryPoint::Transform);
    }

    #[test]
    fn zero_entries_fail() {
        let err = EntryPoint::resolve::<&str>(&[]).unwrap_err();
        assert!(matches!(err, SieveError::Resolution(_)));
        assert!(err.to_string().contains("transform,transformEvent,transformBatch"));
    }

    #[test]
    fn two_entries_fail_and_are_named() {
        let err = EntryPoint::resolve(&["transform", "transformEvent"]).unwrap_err();
        assert!(err.to_string().contains("Found [transform,transformEvent]"));
    }

    #[test]
    fn one_to_one_entries() {
        assert!(EntryPoint::Transform.is_one_to_one());
        assert!(EntryPoint::TransformEvent.is_one_to_one());
        assert!(!EntryPoint::TransformBatch.is_one_to_one());
    }
}
