//! Label vocabulary shared by the classifier and the decision logic.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// UCF-Crime event labels, in model output order.
pub const UCF_CRIME_LABELS: &[&str] = &[
    "Abuse",
    "Arrest",
    "Arson",
    "Assault",
    "Burglary",
    "Explosion",
    "Fighting",
    "Normal",
    "RoadAccidents",
    "Robbery",
    "Shooting",
    "Shoplifting",
    "Stealing",
    "Vandalism",
];

/// Errors building a label set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LabelSetError {
    #[error("Label set is empty")]
    Empty,

    #[error("Duplicate label: {0}")]
    Duplicate(String),
}

/// Ordered, fixed-size label vocabulary.
///
/// Defines the index <-> name mapping used by every probability vector.
/// Clones share the same backing storage.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct LabelSet {
    names: Arc<[String]>,
}

impl LabelSet {
    /// Build a label set from names in index order.
    pub fn new<I, S>(names: I) -> Result<Self, LabelSetError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        if names.is_empty() {
            return Err(LabelSetError::Empty);
        }

        let mut seen = HashSet::with_capacity(names.len());
        for name in &names {
            if !seen.insert(name.as_str()) {
                return Err(LabelSetError::Duplicate(name.clone()));
            }
        }

        Ok(Self {
            names: names.into(),
        })
    }

    /// Synthetic label set of stringified indices ("0", "1", ...).
    ///
    /// Used when a model ships without its own label mapping. A size of zero
    /// is clamped to one label so the set is never empty.
    pub fn synthetic(size: usize) -> Self {
        let names: Vec<String> = (0..size.max(1)).map(|i| i.to_string()).collect();
        Self {
            names: names.into(),
        }
    }

    /// The 14-label UCF-Crime vocabulary.
    pub fn ucf_crime() -> Self {
        let names: Vec<String> = UCF_CRIME_LABELS.iter().map(|s| s.to_string()).collect();
        Self {
            names: names.into(),
        }
    }

    /// Number of labels.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Always false; a label set holds at least one label.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Label name for an index.
    pub fn name(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    /// Index of a label name.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// Iterate over names in index order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    /// Names as a slice.
    pub fn as_slice(&self) -> &[String] {
        &self.names
    }
}

impl Default for LabelSet {
    fn default() -> Self {
        Self::ucf_crime()
    }
}

impl fmt::Debug for LabelSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names.iter()).finish()
    }
}

impl TryFrom<Vec<String>> for LabelSet {
    type Error = LabelSetError;

    fn try_from(names: Vec<String>) -> Result<Self, Self::Error> {
        Self::new(names)
    }
}

impl From<LabelSet> for Vec<String> {
    fn from(labels: LabelSet) -> Self {
        labels.names.to_vec()
    }
}
