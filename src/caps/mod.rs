//! Capabilities: sets of alternative format descriptions.
//!
//! A [`Caps`] value is either ANY (accepts everything) or a list of
//! [`Structure`]s, each naming a media type and constraining its fields with
//! fixed values, ranges or lists. An empty list is EMPTY and accepts
//! nothing.
//!
//! - [`Caps::intersect`]: common subset of two caps
//! - [`Caps::is_fixed`]: one structure, every field a single value
//! - [`Caps::fixate`]: deterministic collapse to a fixed caps
//!
//! ```rust
//! use padflow::caps::Caps;
//!
//! let template: Caps = "video/x-raw, format=A, width=[1, 100]".parse().unwrap();
//! let peer: Caps = "video/x-raw, format=A, width=50".parse().unwrap();
//!
//! let common = template.intersect(&peer);
//! assert!(common.is_fixed());
//! assert_eq!(common.structure(0).unwrap().get_int("width"), Some(50));
//! ```

mod parse;
mod structure;
mod value;

pub use structure::Structure;
pub use value::{FieldValue, Fraction, Value};

use crate::error::Error;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Debug, PartialEq, Eq)]
enum CapsInner {
    Any,
    Structures(Vec<Structure>),
}

/// Immutable, cheaply clonable set of format alternatives.
///
/// Caps are replaced, never mutated, once shared: builders produce a new
/// value and every operation returns a fresh `Caps`.
#[derive(Clone, PartialEq, Eq)]
pub struct Caps {
    inner: Arc<CapsInner>,
}

impl Caps {
    /// Caps accepting any format.
    pub fn new_any() -> Self {
        Self {
            inner: Arc::new(CapsInner::Any),
        }
    }

    /// Caps accepting nothing.
    pub fn new_empty() -> Self {
        Self::from_structures(Vec::new())
    }

    /// Caps holding a single structure.
    pub fn new(structure: Structure) -> Self {
        Self::from_structures(vec![structure])
    }

    /// Caps holding the given alternatives, in preference order.
    pub fn from_structures(structures: impl IntoIterator<Item = Structure>) -> Self {
        Self {
            inner: Arc::new(CapsInner::Structures(structures.into_iter().collect())),
        }
    }

    /// Start building a single-structure caps.
    pub fn builder(name: impl Into<String>) -> CapsBuilder {
        CapsBuilder {
            structure: Structure::new(name),
        }
    }

    /// Check if this is ANY.
    pub fn is_any(&self) -> bool {
        matches!(*self.inner, CapsInner::Any)
    }

    /// Check if this is EMPTY.
    pub fn is_empty(&self) -> bool {
        matches!(&*self.inner, CapsInner::Structures(s) if s.is_empty())
    }

    /// Number of structures. ANY has none.
    pub fn size(&self) -> usize {
        self.structures().len()
    }

    /// Structures in preference order. Empty for ANY.
    pub fn structures(&self) -> &[Structure] {
        match &*self.inner {
            CapsInner::Any => &[],
            CapsInner::Structures(s) => s,
        }
    }

    /// Structure by index.
    pub fn structure(&self, index: usize) -> Option<&Structure> {
        self.structures().get(index)
    }

    /// True if there is exactly one structure and all its fields are single
    /// values.
    pub fn is_fixed(&self) -> bool {
        match self.structures() {
            [only] => !self.is_any() && only.is_fixed(),
            _ => false,
        }
    }

    /// Intersect two caps.
    ///
    /// Every structure of `self` is intersected with every structure of
    /// `other`; pairs with different names or disjoint fields contribute
    /// nothing. The result is EMPTY (not an error) if no pair intersects.
    pub fn intersect(&self, other: &Caps) -> Caps {
        if self.is_any() {
            return other.clone();
        }
        if other.is_any() {
            return self.clone();
        }

        let mut result: Vec<Structure> = Vec::new();
        for ours in self.structures() {
            for theirs in other.structures() {
                match ours.intersect(theirs) {
                    Some(s) if !result.contains(&s) => result.push(s),
                    _ => {}
                }
            }
        }
        Caps::from_structures(result)
    }

    /// Check for a non-empty intersection without building it.
    pub fn can_intersect(&self, other: &Caps) -> bool {
        if self.is_any() || other.is_any() {
            return !self.is_empty() && !other.is_empty();
        }
        self.structures()
            .iter()
            .any(|a| other.structures().iter().any(|b| a.can_intersect(b)))
    }

    /// Check if every format described by `self` is described by `other`.
    pub fn is_subset(&self, other: &Caps) -> bool {
        if other.is_any() || self.is_empty() {
            return true;
        }
        if self.is_any() {
            return false;
        }
        self.normalize().structures().iter().all(|ours| {
            other
                .structures()
                .iter()
                .any(|theirs| ours.is_subset(theirs))
        })
    }

    /// Check if both caps describe the same set of formats, regardless of
    /// structure and field order.
    pub fn is_equal(&self, other: &Caps) -> bool {
        self.is_subset(other) && other.is_subset(self)
    }

    /// Union of two caps. Structures of `other` already covered by `self`
    /// are dropped.
    pub fn merge(&self, other: &Caps) -> Caps {
        if self.is_any() || other.is_any() {
            return Caps::new_any();
        }
        let mut result = self.structures().to_vec();
        for theirs in other.structures() {
            if !result.iter().any(|ours| theirs.is_subset(ours)) {
                result.push(theirs.clone());
            }
        }
        Caps::from_structures(result)
    }

    /// Expand every list field into separate structures, so that no
    /// structure contains a list.
    pub fn normalize(&self) -> Caps {
        if self.is_any() {
            return self.clone();
        }
        let mut result: Vec<Structure> = Vec::new();
        for s in self.structures().iter().flat_map(Structure::expand_lists) {
            if !result.contains(&s) {
                result.push(s);
            }
        }
        Caps::from_structures(result)
    }

    /// Collapse to one fixed structure: the first alternative, with every
    /// range at its minimum and every list at its first entry.
    ///
    /// Deterministic for a given input. Returns `None` for ANY and EMPTY,
    /// which have no structure to pick, and when the first structure has a
    /// field that admits no value.
    pub fn fixate(&self) -> Option<Caps> {
        if self.is_fixed() {
            return Some(self.clone());
        }
        self.structure(0).and_then(Structure::fixate).map(Caps::new)
    }

    /// Replace the first structure, for element-directed fixation.
    pub fn with_first_structure(&self, f: impl FnOnce(&mut Structure)) -> Caps {
        let mut structures = self.structures().to_vec();
        if let Some(first) = structures.first_mut() {
            f(first);
        }
        if self.is_any() {
            return self.clone();
        }
        Caps::from_structures(structures)
    }
}

/// Builder for single-structure caps.
#[derive(Debug)]
pub struct CapsBuilder {
    structure: Structure,
}

impl CapsBuilder {
    /// Add a field.
    pub fn field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.structure.set(name, value);
        self
    }

    /// Finish.
    pub fn build(self) -> Caps {
        Caps::new(self.structure)
    }
}

impl fmt::Display for Caps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.inner {
            CapsInner::Any => f.write_str("ANY"),
            CapsInner::Structures(s) if s.is_empty() => f.write_str("EMPTY"),
            CapsInner::Structures(s) => {
                for (i, structure) in s.iter().enumerate() {
                    if i > 0 {
                        f.write_str("; ")?;
                    }
                    write!(f, "{structure}")?;
                }
                Ok(())
            }
        }
    }
}

impl fmt::Debug for Caps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Caps({self})")
    }
}

impl FromStr for Caps {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse::parse_caps(s)
    }
}

impl From<Structure> for Caps {
    fn from(structure: Structure) -> Self {
        Caps::new(structure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(s: &str) -> Caps {
        s.parse().unwrap()
    }

    #[test]
    fn test_any_and_empty() {
        let any = Caps::new_any();
        let empty = Caps::new_empty();
        let video = caps("video/x-raw, width=320");

        assert_eq!(any.intersect(&video), video);
        assert!(empty.intersect(&video).is_empty());
        assert!(!any.is_fixed());
        assert!(!empty.is_fixed());
        assert!(video.is_subset(&any));
        assert!(empty.is_subset(&video));
    }

    #[test]
    fn test_intersect_pairs_all_structures() {
        let a = caps("video/x-raw, width=[1, 100]; audio/x-raw, rate={44100, 48000}");
        let b = caps("audio/x-raw, rate=48000; video/x-raw, width=50");
        let result = a.intersect(&b);
        assert_eq!(result.size(), 2);
        assert!(result.is_equal(&b));
    }

    #[test]
    fn test_intersect_disjoint_is_empty() {
        let a = caps("video/x-raw, width=[1, 100]");
        let b = caps("video/x-raw, width=[200, 300]");
        assert!(a.intersect(&b).is_empty());
        assert!(!a.can_intersect(&b));
    }

    #[test]
    fn test_intersect_commutes() {
        let a = caps("video/x-raw, format={A, B, C}, width=[1, 100]; image/jpeg");
        let b = caps("video/x-raw, format={C, A}, height=10; image/jpeg, width=5");
        assert!(a.intersect(&b).is_equal(&b.intersect(&a)));
    }

    #[test]
    fn test_is_fixed() {
        assert!(caps("video/x-raw, format=A, width=50").is_fixed());
        assert!(!caps("video/x-raw, width=[1, 2]").is_fixed());
        assert!(!caps("video/x-raw; audio/x-raw").is_fixed());
    }

    #[test]
    fn test_fixate_is_deterministic() {
        let c = caps("video/x-raw, format={B, A}, width=[16, 4096]; audio/x-raw");
        let fixed = c.fixate().unwrap();
        assert!(fixed.is_fixed());
        assert_eq!(fixed, c.fixate().unwrap());
        let s = fixed.structure(0).unwrap();
        assert_eq!(s.get_str("format"), Some("B"));
        assert_eq!(s.get_int("width"), Some(16));
        assert!(Caps::new_any().fixate().is_none());
    }

    #[test]
    fn test_empty_field_does_not_fixate() {
        let c = Caps::new(Structure::new("x/y").with_field("f", FieldValue::List(Vec::new())));
        assert!(c.fixate().is_none());
        assert!(c.intersect(&caps("x/y, f=1")).is_empty());
        assert!(Caps::new_any().intersect(&c).fixate().is_none());
    }

    #[test]
    fn test_merge_and_normalize() {
        let a = caps("video/x-raw, format={A, B}");
        let b = caps("video/x-raw, format=A; audio/x-raw");
        let merged = a.merge(&b);
        assert_eq!(merged.size(), 2);

        let normalized = a.normalize();
        assert_eq!(normalized.size(), 2);
        assert!(normalized.structures().iter().all(Structure::is_fixed));
        assert!(normalized.is_equal(&a));
    }

    #[test]
    fn test_element_directed_fixation() {
        let c = caps("video/x-raw, width=[16, 1920]");
        let fixed = c.with_first_structure(|s| {
            s.fixate_field_nearest_int("width", 640);
        });
        assert!(fixed.is_fixed());
        assert_eq!(fixed.structure(0).unwrap().get_int("width"), Some(640));
    }
}
