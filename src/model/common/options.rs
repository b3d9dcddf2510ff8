use std::collections::HashSet;
use std::ops::Deref;

use rocket::serde::json::serde_json::{self, Value};
use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Fewest options a poll may have.
pub const MIN_OPTIONS: usize = 2;
/// Most options a poll may have.
pub const MAX_OPTIONS: usize = 4;

/// The two fixed options of a binary poll.
pub const BINARY_OPTIONS: [&str; 2] = ["Yes", "No"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OptionsError {
    #[error("a poll needs between {MIN_OPTIONS} and {MAX_OPTIONS} options, got {0}")]
    Count(usize),
    #[error("option {0} is blank")]
    Blank(usize),
    #[error("option \"{0}\" appears more than once")]
    Duplicate(String),
    #[error("options are not an encoded array of strings: {0}")]
    Encoding(String),
}

impl From<serde_json::Error> for OptionsError {
    fn from(err: serde_json::Error) -> Self {
        Self::Encoding(err.to_string())
    }
}

/// The ordered, validated option texts of a poll.
///
/// Votes refer to options by 1-based index into this list. In the database
/// the list is stored as a JSON-encoded string; older documents may be
/// encoded twice, or hold a native array, and all three shapes are accepted
/// when reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollOptions(Vec<String>);

impl PollOptions {
    /// Validate a list of option texts. Surrounding whitespace is trimmed.
    pub fn new<I, S>(options: I) -> Result<Self, OptionsError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let options: Vec<String> = options
            .into_iter()
            .map(|o| o.into().trim().to_string())
            .collect();
        if !(MIN_OPTIONS..=MAX_OPTIONS).contains(&options.len()) {
            return Err(OptionsError::Count(options.len()));
        }
        let mut seen = HashSet::new();
        for (i, option) in options.iter().enumerate() {
            if option.is_empty() {
                return Err(OptionsError::Blank(i + 1));
            }
            if !seen.insert(option.as_str()) {
                return Err(OptionsError::Duplicate(option.clone()));
            }
        }
        Ok(Self(options))
    }

    /// The fixed options of a binary poll.
    pub fn binary() -> Self {
        Self(BINARY_OPTIONS.iter().map(|o| o.to_string()).collect())
    }

    /// Decode options from their stored representation.
    pub fn decode(encoded: &str) -> Result<Self, OptionsError> {
        let value: Value = serde_json::from_str(encoded)?;
        Self::from_value(value)
    }

    /// Encode options into their stored representation.
    pub fn encode(&self) -> String {
        serde_json::to_string(&self.0).expect("Serialisation is infallible")
    }

    /// Get the text of the option with the given 1-based index.
    pub fn get(&self, index: u32) -> Option<&str> {
        let index = usize::try_from(index).ok()?.checked_sub(1)?;
        self.0.get(index).map(String::as_str)
    }

    /// Is `index` a valid 1-based option index?
    pub fn contains_index(&self, index: u32) -> bool {
        self.get(index).is_some()
    }

    pub fn into_inner(self) -> Vec<String> {
        self.0
    }

    /// Unwrap at most one extra layer of string encoding, then validate.
    fn from_value(value: Value) -> Result<Self, OptionsError> {
        let value = match value {
            Value::String(inner) => serde_json::from_str(&inner)?,
            other => other,
        };
        let options: Vec<String> = serde_json::from_value(value)?;
        Self::new(options)
    }
}

impl Deref for PollOptions {
    type Target = [String];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Serialize for PollOptions {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.encode())
    }
}

impl<'de> Deserialize<'de> for PollOptions {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Stored {
            Encoded(String),
            List(Vec<String>),
        }

        match Stored::deserialize(deserializer)? {
            Stored::Encoded(encoded) => PollOptions::decode(&encoded),
            Stored::List(list) => PollOptions::new(list),
        }
        .map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use mongodb::bson::{self, doc};

    use super::*;

    #[test]
    fn validates_count_and_content() {
        assert_eq!(PollOptions::new(["A"]), Err(OptionsError::Count(1)));
        assert_eq!(
            PollOptions::new(["A", "B", "C", "D", "E"]),
            Err(OptionsError::Count(5))
        );
        assert_eq!(PollOptions::new(["A", "  "]), Err(OptionsError::Blank(2)));
        assert_eq!(
            PollOptions::new(["A", "B", " A "]),
            Err(OptionsError::Duplicate("A".to_string()))
        );
        let options = PollOptions::new([" A", "B "]).unwrap();
        assert_eq!(&*options, &["A".to_string(), "B".to_string()]);
    }

    #[test]
    fn indexes_are_one_based() {
        let options = PollOptions::new(["A", "B", "C"]).unwrap();
        assert_eq!(options.get(0), None);
        assert_eq!(options.get(1), Some("A"));
        assert_eq!(options.get(3), Some("C"));
        assert!(!options.contains_index(4));
    }

    #[test]
    fn decodes_single_and_double_encoding() {
        let single = r#"["A","B"]"#;
        let double = serde_json::to_string(single).unwrap();
        let expected = PollOptions::new(["A", "B"]).unwrap();
        assert_eq!(PollOptions::decode(single).unwrap(), expected);
        assert_eq!(PollOptions::decode(&double).unwrap(), expected);
    }

    #[test]
    fn rejects_garbage_and_triple_encoding() {
        assert!(matches!(
            PollOptions::decode("not json"),
            Err(OptionsError::Encoding(_))
        ));
        let triple = serde_json::to_string(&serde_json::to_string(r#"["A","B"]"#).unwrap()).unwrap();
        assert!(matches!(
            PollOptions::decode(&triple),
            Err(OptionsError::Encoding(_))
        ));
    }

    #[test]
    fn stored_as_an_encoded_string() {
        #[derive(Serialize, Deserialize)]
        struct Holder {
            options: PollOptions,
        }

        let holder = Holder {
            options: PollOptions::binary(),
        };
        let document = bson::to_document(&holder).unwrap();
        assert_eq!(document, doc! { "options": r#"["Yes","No"]"# });

        // Legacy shapes read back the same.
        let native = doc! { "options": ["Yes", "No"] };
        let double = doc! { "options": serde_json::to_string(r#"["Yes","No"]"#).unwrap() };
        for document in [document, native, double] {
            let holder: Holder = bson::from_document(document).unwrap();
            assert_eq!(holder.options, PollOptions::binary());
        }
    }
}
