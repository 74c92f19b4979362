//! Named field maps, the building blocks of caps.

use super::value::{FieldValue, Fraction, Value};
use smallvec::SmallVec;
use std::fmt;

/// A media type name plus an ordered mapping of field names to constraints.
///
/// Equality ignores field order.
#[derive(Clone, Debug)]
pub struct Structure {
    name: String,
    fields: SmallVec<[(String, FieldValue); 4]>,
}

impl Structure {
    /// Create a structure without fields.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: SmallVec::new(),
        }
    }

    /// Builder-style field setter.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.set(name, value);
        self
    }

    /// Media type name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Set or replace a field, keeping its position if it already exists.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) {
        let name = name.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((name, value)),
        }
    }

    /// Remove a field, returning its constraint.
    pub fn remove(&mut self, name: &str) -> Option<FieldValue> {
        let idx = self.fields.iter().position(|(n, _)| n == name)?;
        Some(self.fields.remove(idx).1)
    }

    /// Field constraint by name.
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Check if a field exists.
    pub fn has_field(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Fixed int field.
    pub fn get_int(&self, name: &str) -> Option<i64> {
        self.get(name)?.as_fixed()?.as_int()
    }

    /// Fixed fraction field.
    pub fn get_fraction(&self, name: &str) -> Option<Fraction> {
        self.get(name)?.as_fixed()?.as_fraction()
    }

    /// Fixed string field.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name)?.as_fixed()?.as_str()
    }

    /// Fixed boolean field.
    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.get(name)?.as_fixed()?.as_bool()
    }

    /// Fields in insertion order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Number of fields.
    pub fn n_fields(&self) -> usize {
        self.fields.len()
    }

    /// Check if every field holds a single value.
    pub fn is_fixed(&self) -> bool {
        self.fields.iter().all(|(_, v)| v.is_fixed())
    }

    /// Intersect two structures.
    ///
    /// Names must match. Fields present in both are intersected; fields
    /// present on one side only are copied, since the other side does not
    /// constrain them.
    pub fn intersect(&self, other: &Structure) -> Option<Structure> {
        if self.name != other.name {
            return None;
        }

        let mut result = Structure::new(self.name.clone());
        for (name, value) in &self.fields {
            let merged = match other.get(name) {
                Some(theirs) => value.intersect(theirs)?,
                None => value.clone(),
            };
            result.fields.push((name.clone(), merged));
        }
        for (name, value) in &other.fields {
            if !self.has_field(name) {
                result.fields.push((name.clone(), value.clone()));
            }
        }
        Some(result)
    }

    /// Check for a non-empty intersection without building it.
    pub fn can_intersect(&self, other: &Structure) -> bool {
        self.name == other.name
            && self.fields.iter().all(|(name, value)| match other.get(name) {
                Some(theirs) => value.intersect(theirs).is_some(),
                None => true,
            })
    }

    /// Check if `self` describes a subset of `other`.
    ///
    /// Every field constrained by `other` must be constrained at least as
    /// tightly by `self`.
    pub fn is_subset(&self, other: &Structure) -> bool {
        self.name == other.name
            && other.fields.iter().all(|(name, theirs)| match self.get(name) {
                Some(ours) => ours.is_subset(theirs),
                None => false,
            })
    }

    /// Collapse every field to a single value. `None` if a field is empty.
    pub fn fixate(&self) -> Option<Structure> {
        let fields = self
            .fields
            .iter()
            .map(|(n, v)| Some((n.clone(), FieldValue::Fixed(v.fixate()?))))
            .collect::<Option<_>>()?;
        Some(Structure {
            name: self.name.clone(),
            fields,
        })
    }

    /// Fix an int field to the accepted value nearest `target`.
    ///
    /// Returns false if the field is missing or not an int.
    pub fn fixate_field_nearest_int(&mut self, name: &str, target: i64) -> bool {
        let Some(value) = self.get(name).and_then(|v| v.fixate_nearest_int(target)) else {
            return false;
        };
        self.set(name, value);
        true
    }

    /// Fix a fraction field to the accepted value nearest `target`.
    ///
    /// Returns false if the field is missing or not a fraction.
    pub fn fixate_field_nearest_fraction(&mut self, name: &str, target: Fraction) -> bool {
        let Some(value) = self
            .get(name)
            .and_then(|v| v.fixate_nearest_fraction(target))
        else {
            return false;
        };
        self.set(name, value);
        true
    }

    /// Expand list fields into one structure per combination.
    pub(crate) fn expand_lists(&self) -> Vec<Structure> {
        let mut expanded = vec![Structure::new(self.name.clone())];
        for (name, value) in &self.fields {
            match value {
                FieldValue::List(values) => {
                    expanded = expanded
                        .into_iter()
                        .flat_map(|s| {
                            values.iter().map(move |v: &Value| {
                                s.clone().with_field(name.clone(), v.clone())
                            })
                        })
                        .collect();
                }
                other => {
                    for s in &mut expanded {
                        s.fields.push((name.clone(), other.clone()));
                    }
                }
            }
        }
        expanded
    }
}

impl PartialEq for Structure {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.fields.len() == other.fields.len()
            && self
                .fields
                .iter()
                .all(|(name, value)| other.get(name) == Some(value))
    }
}

impl Eq for Structure {}

impl fmt::Display for Structure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        for (name, value) in &self.fields {
            write!(f, ", {name}={value}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_video() -> Structure {
        Structure::new("video/x-raw")
            .with_field("format", FieldValue::list(["I420", "NV12"]).unwrap())
            .with_field("width", 1i64..=1920)
    }

    #[test]
    fn test_intersect_copies_one_sided_fields() {
        let other = Structure::new("video/x-raw")
            .with_field("width", 640i64)
            .with_field("height", 480i64);
        let result = raw_video().intersect(&other).unwrap();
        assert_eq!(result.get_int("width"), Some(640));
        assert_eq!(result.get_int("height"), Some(480));
        assert!(!result.is_fixed());
    }

    #[test]
    fn test_intersect_name_mismatch() {
        let other = Structure::new("audio/x-raw");
        assert!(raw_video().intersect(&other).is_none());
        assert!(!raw_video().can_intersect(&other));
    }

    #[test]
    fn test_equality_ignores_field_order() {
        let a = Structure::new("x").with_field("a", 1i64).with_field("b", 2i64);
        let b = Structure::new("x").with_field("b", 2i64).with_field("a", 1i64);
        assert_eq!(a, b);
    }

    #[test]
    fn test_subset() {
        let fixed = Structure::new("video/x-raw")
            .with_field("format", "I420")
            .with_field("width", 320i64)
            .with_field("height", 240i64);
        assert!(fixed.is_subset(&raw_video()));
        assert!(!raw_video().is_subset(&fixed));
    }

    #[test]
    fn test_fixate_and_nearest() {
        let mut s = raw_video();
        assert!(s.fixate_field_nearest_int("width", 4096));
        assert_eq!(s.get_int("width"), Some(1920));
        assert!(!s.fixate_field_nearest_int("format", 1));

        let fixed = s.fixate().unwrap();
        assert!(fixed.is_fixed());
        assert_eq!(fixed.get_str("format"), Some("I420"));
    }

    #[test]
    fn test_expand_lists() {
        let s = Structure::new("x")
            .with_field("a", FieldValue::list([1i64, 2]).unwrap())
            .with_field("b", FieldValue::list(["p", "q"]).unwrap());
        let expanded = s.expand_lists();
        assert_eq!(expanded.len(), 4);
        assert!(expanded.iter().all(Structure::is_fixed));
    }

    #[test]
    fn test_display() {
        let s = Structure::new("video/x-raw")
            .with_field("format", "I420")
            .with_field("width", 1i64..=100);
        assert_eq!(
            s.to_string(),
            "video/x-raw, format=(string)I420, width=(int)[1, 100]"
        );
    }
}
