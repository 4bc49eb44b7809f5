//! Glob expressions used for paths, header/query names and values.

use crate::error::Error;
use globset::{Glob, GlobMatcher};
use serde::de::{self, Deserialize, Deserializer, MapAccess, Visitor};
use std::collections::HashSet;
use std::fmt;
use std::marker::PhantomData;

/// A compiled glob pattern.
///
/// The default value is uninitialized and matches every candidate,
/// including the empty string. It stands for "no constraint" wherever a
/// pattern was omitted from the configuration.
#[derive(Clone, Default)]
pub struct GlobExpression {
    matcher: Option<GlobMatcher>,
}

impl GlobExpression {
    /// Compile `pattern`.
    pub fn new(pattern: &str) -> Result<Self, Error> {
        let glob = Glob::new(pattern).map_err(|e| Error::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.kind().to_string(),
        })?;
        Ok(Self {
            matcher: Some(glob.compile_matcher()),
        })
    }

    /// Compile a pattern given as raw bytes, which must be valid UTF-8.
    pub fn from_bytes(pattern: &[u8]) -> Result<Self, Error> {
        let pattern = std::str::from_utf8(pattern).map_err(|e| Error::InvalidPattern {
            pattern: String::from_utf8_lossy(pattern).into_owned(),
            reason: e.to_string(),
        })?;
        Self::new(pattern)
    }

    /// Whether `candidate` matches. Always true when uninitialized.
    pub fn is_match(&self, candidate: &str) -> bool {
        match &self.matcher {
            Some(m) => m.is_match(candidate),
            None => true,
        }
    }

    /// The source pattern, or `None` when uninitialized.
    pub fn as_str(&self) -> Option<&str> {
        self.matcher.as_ref().map(|m| m.glob().glob())
    }

    pub fn is_initialized(&self) -> bool {
        self.matcher.is_some()
    }
}

impl fmt::Debug for GlobExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_str() {
            Some(p) => write!(f, "GlobExpression({p:?})"),
            None => f.write_str("GlobExpression(<any>)"),
        }
    }
}

impl fmt::Display for GlobExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str().unwrap_or("<any>"))
    }
}

/// Two expressions are equal when they were compiled from the same source.
impl PartialEq for GlobExpression {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for GlobExpression {}

impl<'de> Deserialize<'de> for GlobExpression {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct GlobVisitor;

        impl Visitor<'_> for GlobVisitor {
            type Value = GlobExpression;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a glob pattern string")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<GlobExpression, E> {
                GlobExpression::new(v).map_err(E::custom)
            }

            fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<GlobExpression, E> {
                GlobExpression::from_bytes(v).map_err(E::custom)
            }
        }

        deserializer.deserialize_str(GlobVisitor)
    }
}

/// Ordered mapping from a name glob to a value.
///
/// Kept as a list so iteration follows the configured order. Uniqueness of
/// keys is checked by [`GlobMap::find_duplicate`], not on insertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobMap<T> {
    entries: Vec<(GlobExpression, T)>,
}

impl<T> Default for GlobMap<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<T> GlobMap<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: GlobExpression, value: T) {
        self.entries.push((key, value));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&GlobExpression, &T)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The first key whose source pattern repeats an earlier key.
    ///
    /// Keys are compared by pattern text only; two different patterns that
    /// accept the same strings are not duplicates.
    pub fn find_duplicate(&self) -> Option<&GlobExpression> {
        let mut seen = HashSet::with_capacity(self.entries.len());
        self.entries
            .iter()
            .map(|(k, _)| k)
            .find(|k| !seen.insert(k.as_str()))
    }
}

impl<T> FromIterator<(GlobExpression, T)> for GlobMap<T> {
    fn from_iter<I: IntoIterator<Item = (GlobExpression, T)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl<'de, T> Deserialize<'de> for GlobMap<T>
where
    T: Deserialize<'de>,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct GlobMapVisitor<T>(PhantomData<T>);

        impl<'de, T> Visitor<'de> for GlobMapVisitor<T>
        where
            T: Deserialize<'de>,
        {
            type Value = GlobMap<T>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a mapping keyed by glob patterns")
            }

            fn visit_map<A>(self, mut map: A) -> Result<GlobMap<T>, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((key, value)) = map.next_entry()? {
                    entries.push((key, value));
                }
                Ok(GlobMap { entries })
            }

            fn visit_unit<E: de::Error>(self) -> Result<GlobMap<T>, E> {
                Ok(GlobMap::default())
            }
        }

        deserializer.deserialize_map(GlobMapVisitor(PhantomData))
    }
}
