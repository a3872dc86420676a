//! # Label Space
//!
//! The fixed label table shared by every CRF call. Real labels occupy indices
//! `0..len()`; the START and STOP sentinels occupy the last two indices of the
//! transition dimension and never appear as emitted or gold labels.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{CrfError, Result};
use crate::labels::iobes::{Scheme, Tag};

/// Display name of the START sentinel.
pub const START_TAG: &str = "<START>";
/// Display name of the STOP sentinel.
pub const STOP_TAG: &str = "<STOP>";

/// Immutable label <-> index table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct LabelSpace {
    labels: Vec<String>,
    index: HashMap<String, usize>,
}

impl LabelSpace {
    /// Build a label space from an ordered list of distinct labels.
    pub fn new(labels: Vec<String>) -> Result<Self> {
        if labels.is_empty() {
            return Err(CrfError::EmptyLabelSpace);
        }

        let mut index = HashMap::with_capacity(labels.len());
        for (idx, label) in labels.iter().enumerate() {
            if label == START_TAG || label == STOP_TAG {
                return Err(CrfError::ReservedLabel(label.clone()));
            }
            if index.insert(label.clone(), idx).is_some() {
                return Err(CrfError::DuplicateLabel(label.clone()));
            }
        }

        Ok(Self { labels, index })
    }

    /// Build a label space from training label sequences, in first-seen order.
    pub fn from_sequences<I, S, L>(sequences: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: IntoIterator<Item = L>,
        L: AsRef<str>,
    {
        let mut labels: Vec<String> = Vec::new();
        let mut seen = std::collections::HashSet::new();

        for sequence in sequences {
            for label in sequence {
                let label = label.as_ref();
                if seen.insert(label.to_string()) {
                    labels.push(label.to_string());
                }
            }
        }

        Self::new(labels)
    }

    /// Number of real labels (excluding START and STOP).
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Always false: construction rejects empty label lists.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Index of the START sentinel in transition space.
    pub fn start(&self) -> usize {
        self.labels.len()
    }

    /// Index of the STOP sentinel in transition space.
    pub fn stop(&self) -> usize {
        self.labels.len() + 1
    }

    /// Side length of the transition matrix (`len() + 2`).
    pub fn transition_dim(&self) -> usize {
        self.labels.len() + 2
    }

    /// Look up the index of a real label.
    pub fn index_of(&self, label: &str) -> Option<usize> {
        self.index.get(label).copied()
    }

    /// Name of a transition-space index, including the sentinels.
    pub fn name(&self, idx: usize) -> Option<&str> {
        match idx {
            i if i < self.labels.len() => Some(self.labels[i].as_str()),
            i if i == self.start() => Some(START_TAG),
            i if i == self.stop() => Some(STOP_TAG),
            _ => None,
        }
    }

    /// Iterate over the real labels in index order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.labels.iter().map(String::as_str)
    }

    /// Map label strings to indices.
    pub fn encode<S: AsRef<str>>(&self, labels: &[S]) -> Result<Vec<usize>> {
        labels
            .iter()
            .map(|label| {
                let label = label.as_ref();
                self.index_of(label)
                    .ok_or_else(|| CrfError::UnknownLabel(label.to_string()))
            })
            .collect()
    }

    /// Map real-label indices back to names.
    pub fn decode(&self, indices: &[usize]) -> Result<Vec<&str>> {
        indices
            .iter()
            .map(|&idx| {
                self.labels
                    .get(idx)
                    .map(String::as_str)
                    .ok_or(CrfError::LabelIndexOutOfRange {
                        index: idx,
                        num_labels: self.labels.len(),
                    })
            })
            .collect()
    }

    /// Tagging scheme used by the real labels.
    pub fn scheme(&self) -> Scheme {
        Scheme::detect(self.iter())
    }

    /// Parsed span tag for a transition-space index; `None` for the sentinels
    /// and for labels that are not span tags.
    pub(crate) fn tag(&self, idx: usize) -> Option<Tag<'_>> {
        self.labels.get(idx).and_then(|label| Tag::parse(label))
    }
}

impl TryFrom<Vec<String>> for LabelSpace {
    type Error = CrfError;

    fn try_from(labels: Vec<String>) -> Result<Self> {
        Self::new(labels)
    }
}

impl From<LabelSpace> for Vec<String> {
    fn from(space: LabelSpace) -> Self {
        space.labels
    }
}
