//! # IOBES Tags
//!
//! Parsing of span tags (`B-PER`, `I-ORG`, `E-LOC`, `S-MISC`, `O`), BIO to
//! IOBES conversion, and the transition rules each tagging scheme allows.

use std::fmt;

/// Position of a token inside an entity span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Prefix {
    Begin,
    Inside,
    End,
    Single,
    Outside,
}

impl Prefix {
    fn as_str(&self) -> &'static str {
        match self {
            Prefix::Begin => "B",
            Prefix::Inside => "I",
            Prefix::End => "E",
            Prefix::Single => "S",
            Prefix::Outside => "O",
        }
    }
}

/// A parsed span tag borrowing its entity type from the label string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tag<'a> {
    pub prefix: Prefix,
    pub entity: Option<&'a str>,
}

impl<'a> Tag<'a> {
    /// Parse a label such as `B-PER` or `O`.
    ///
    /// Returns `None` for strings that are not span tags.
    pub fn parse(label: &'a str) -> Option<Self> {
        if label == "O" {
            return Some(Self {
                prefix: Prefix::Outside,
                entity: None,
            });
        }

        let (prefix, entity) = label.split_once('-')?;
        if entity.is_empty() {
            return None;
        }
        let prefix = match prefix {
            "B" => Prefix::Begin,
            "I" => Prefix::Inside,
            "E" => Prefix::End,
            "S" => Prefix::Single,
            _ => return None,
        };

        Some(Self {
            prefix,
            entity: Some(entity),
        })
    }

    /// Check if this tag continues an open span (`I-*` or `E-*`).
    pub fn continues_span(&self) -> bool {
        matches!(self.prefix, Prefix::Inside | Prefix::End)
    }

    /// Check if this tag leaves a span open for the next token (`B-*` or `I-*`).
    pub fn opens_span(&self) -> bool {
        matches!(self.prefix, Prefix::Begin | Prefix::Inside)
    }
}

impl fmt::Display for Tag<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.entity {
            Some(entity) => write!(f, "{}-{}", self.prefix.as_str(), entity),
            None => write!(f, "{}", self.prefix.as_str()),
        }
    }
}

/// Span tagging scheme of a label set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Bio,
    Iobes,
}

impl Scheme {
    /// IOBES if any `E-*` or `S-*` tag is present, otherwise BIO.
    pub fn detect<'a, I>(labels: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let iobes = labels.into_iter().filter_map(Tag::parse).any(|tag| {
            matches!(tag.prefix, Prefix::End | Prefix::Single)
        });
        if iobes { Scheme::Iobes } else { Scheme::Bio }
    }

    /// Check if `to` may follow `from` under this scheme.
    ///
    /// `None` stands for the sequence boundary: START as `from`, STOP as `to`.
    pub fn is_valid_transition(&self, from: Option<Tag<'_>>, to: Option<Tag<'_>>) -> bool {
        match self {
            Scheme::Iobes => match (from, to) {
                // An open span must continue with the same entity type
                (Some(prev), next) if prev.opens_span() => match next {
                    Some(next) => next.continues_span() && next.entity == prev.entity,
                    None => false,
                },
                // Nothing is open, so nothing may continue
                (_, Some(next)) => !next.continues_span(),
                (_, None) => true,
            },
            Scheme::Bio => match to {
                Some(next) if next.prefix == Prefix::Inside => match from {
                    Some(prev) => prev.opens_span() && prev.entity == next.entity,
                    None => false,
                },
                _ => true,
            },
        }
    }
}

/// Convert a BIO label sequence to IOBES.
///
/// A `B-X` that is not followed by `I-X` becomes `S-X`, and an `I-X` that is
/// not followed by `I-X` becomes `E-X`. Other labels are copied unchanged.
pub fn bio_to_iobes<S: AsRef<str>>(labels: &[S]) -> Vec<String> {
    let tags: Vec<Option<Tag<'_>>> = labels.iter().map(|l| Tag::parse(l.as_ref())).collect();

    labels
        .iter()
        .enumerate()
        .map(|(pos, label)| {
            let Some(tag) = tags[pos] else {
                return label.as_ref().to_string();
            };
            let continued = matches!(
                tags.get(pos + 1),
                Some(Some(next)) if next.prefix == Prefix::Inside && next.entity == tag.entity
            );

            let prefix = match (tag.prefix, continued) {
                (Prefix::Begin, false) => Prefix::Single,
                (Prefix::Inside, false) => Prefix::End,
                (prefix, _) => prefix,
            };
            Tag { prefix, ..tag }.to_string()
        })
        .collect()
}
