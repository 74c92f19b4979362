//! Typed field values and their constraint forms.

use std::cmp::Ordering;
use std::fmt;

// ============================================================================
// Fraction
// ============================================================================

/// A reduced rational number (framerates, pixel aspect ratios).
///
/// The denominator is always positive, so derived equality matches
/// numeric equality.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Fraction {
    num: i32,
    den: i32,
}

impl Fraction {
    /// Create a fraction, reducing it.
    ///
    /// # Panics
    ///
    /// Panics if `den` is zero.
    pub fn new(num: i32, den: i32) -> Self {
        assert!(den != 0, "fraction with zero denominator");
        let g = gcd(num.unsigned_abs(), den.unsigned_abs()).max(1) as i64;
        let sign = if den < 0 { -1 } else { 1 };
        Self {
            num: (sign * num as i64 / g) as i32,
            den: (sign * den as i64 / g) as i32,
        }
    }

    /// Numerator.
    pub const fn numer(self) -> i32 {
        self.num
    }

    /// Denominator (always positive).
    pub const fn denom(self) -> i32 {
        self.den
    }

    /// Approximate floating point value.
    pub fn to_f64(self) -> f64 {
        self.num as f64 / self.den as f64
    }

    /// Absolute distance to `other`, as an unreduced fraction numerator over
    /// the product of denominators. Only used for comparisons.
    fn distance(self, other: Self) -> (i128, i128) {
        let n = (self.num as i128 * other.den as i128 - other.num as i128 * self.den as i128).abs();
        (n, self.den as i128 * other.den as i128)
    }
}

fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

impl Ord for Fraction {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.num as i64 * other.den as i64).cmp(&(other.num as i64 * self.den as i64))
    }
}

impl PartialOrd for Fraction {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Fraction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

// ============================================================================
// Value
// ============================================================================

/// A single concrete field value.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Value {
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Rational number.
    Fraction(Fraction),
    /// String.
    Str(String),
}

impl Value {
    /// Type name as used in caps descriptions.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "boolean",
            Value::Int(_) => "int",
            Value::Fraction(_) => "fraction",
            Value::Str(_) => "string",
        }
    }

    /// Compare two values of the same type. `None` across types.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Fraction(a), Value::Fraction(b)) => Some(a.cmp(b)),
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Can this type form a range.
    fn is_orderable(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Fraction(_))
    }

    /// Integer payload.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Fraction payload.
    pub fn as_fraction(&self) -> Option<Fraction> {
        match self {
            Value::Fraction(v) => Some(*v),
            _ => None,
        }
    }

    /// String payload.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(v) => Some(v),
            _ => None,
        }
    }

    /// Boolean payload.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    fn in_range(&self, min: &Value, max: &Value) -> bool {
        matches!(
            (self.compare(min), self.compare(max)),
            (Some(Ordering::Greater | Ordering::Equal), Some(Ordering::Less | Ordering::Equal))
        )
    }
}

/// Strings made only of these characters are written without quotes.
pub(crate) fn is_bare_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '+' | '/' | ':')
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Fraction(v) => write!(f, "{v}"),
            Value::Str(v) if !v.is_empty() && v.chars().all(is_bare_char) => f.write_str(v),
            Value::Str(v) => {
                f.write_str("\"")?;
                for c in v.chars() {
                    if matches!(c, '"' | '\\') {
                        f.write_str("\\")?;
                    }
                    write!(f, "{c}")?;
                }
                f.write_str("\"")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<Fraction> for Value {
    fn from(v: Fraction) -> Self {
        Value::Fraction(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

// ============================================================================
// FieldValue - constraint form
// ============================================================================

/// A field constraint: one value, an inclusive range, or a preference-ordered
/// list of alternatives.
///
/// Ranges only exist for int and fraction values, with `min < max`; a range
/// that narrows to a single value collapses to `Fixed`. Lists hold values
/// of one type and at least two entries; a single-entry list collapses to
/// `Fixed`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum FieldValue {
    /// Exactly one value.
    Fixed(Value),
    /// Inclusive range of int or fraction values.
    Range {
        /// Lower bound.
        min: Value,
        /// Upper bound.
        max: Value,
    },
    /// Alternatives, first is preferred.
    List(Vec<Value>),
}

impl FieldValue {
    /// Build an int range. Collapses to `Fixed` when `min == max`.
    ///
    /// # Panics
    ///
    /// Panics if `min > max`.
    pub fn int_range(min: i64, max: i64) -> Self {
        assert!(min <= max, "int range [{min}, {max}] is inverted");
        Self::range_unchecked(Value::Int(min), Value::Int(max))
    }

    /// Build a fraction range. Collapses to `Fixed` when `min == max`.
    ///
    /// # Panics
    ///
    /// Panics if `min > max`.
    pub fn fraction_range(min: Fraction, max: Fraction) -> Self {
        assert!(min <= max, "fraction range [{min}, {max}] is inverted");
        Self::range_unchecked(Value::Fraction(min), Value::Fraction(max))
    }

    fn range_unchecked(min: Value, max: Value) -> Self {
        if min == max {
            Self::Fixed(min)
        } else {
            Self::Range { min, max }
        }
    }

    /// Build a list. Returns `None` for an empty list.
    pub fn list<V: Into<Value>>(values: impl IntoIterator<Item = V>) -> Option<Self> {
        Self::from_values(values.into_iter().map(Into::into).collect())
    }

    fn from_values(mut values: Vec<Value>) -> Option<Self> {
        let mut seen = Vec::with_capacity(values.len());
        values.retain(|v| {
            if seen.contains(v) {
                false
            } else {
                seen.push(v.clone());
                true
            }
        });
        match values.len() {
            0 => None,
            1 => values.pop().map(Self::Fixed),
            _ => Some(Self::List(values)),
        }
    }

    /// Check if this is a single value.
    #[inline]
    pub fn is_fixed(&self) -> bool {
        matches!(self, Self::Fixed(_))
    }

    /// The value if fixed.
    pub fn as_fixed(&self) -> Option<&Value> {
        match self {
            Self::Fixed(v) => Some(v),
            _ => None,
        }
    }

    /// Type name of the contained values.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Fixed(v) | Self::Range { min: v, .. } => v.type_name(),
            Self::List(values) => values.first().map_or("string", Value::type_name),
        }
    }

    /// Check if a concrete value satisfies this constraint.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            Self::Fixed(v) => v == value,
            Self::Range { min, max } => value.in_range(min, max),
            Self::List(values) => values.contains(value),
        }
    }

    /// Check if no value satisfies this constraint: an empty list, or a
    /// range whose bounds are inverted or not comparable.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Fixed(_) => false,
            Self::Range { min, max } => !matches!(
                min.compare(max),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Self::List(values) => values.is_empty(),
        }
    }

    /// Intersect two constraints. `None` when they share no value, including
    /// when the types differ or either side is empty.
    pub fn intersect(&self, other: &Self) -> Option<Self> {
        if self.is_empty() || other.is_empty() {
            return None;
        }
        match (self, other) {
            (Self::Fixed(a), Self::Fixed(b)) => (a == b).then(|| Self::Fixed(a.clone())),

            (Self::Fixed(v), range @ Self::Range { .. })
            | (range @ Self::Range { .. }, Self::Fixed(v)) => {
                range.accepts(v).then(|| Self::Fixed(v.clone()))
            }

            (Self::Fixed(v), Self::List(list)) | (Self::List(list), Self::Fixed(v)) => {
                list.contains(v).then(|| Self::Fixed(v.clone()))
            }

            (
                Self::Range {
                    min: min1,
                    max: max1,
                },
                Self::Range {
                    min: min2,
                    max: max2,
                },
            ) => {
                let new_min = match min1.compare(min2)? {
                    Ordering::Less => min2,
                    _ => min1,
                };
                let new_max = match max1.compare(max2)? {
                    Ordering::Greater => max2,
                    _ => max1,
                };
                match new_min.compare(new_max)? {
                    Ordering::Greater => None,
                    _ => Some(Self::range_unchecked(new_min.clone(), new_max.clone())),
                }
            }

            (Self::Range { min, max }, Self::List(list))
            | (Self::List(list), Self::Range { min, max }) => Self::from_values(
                list.iter()
                    .filter(|v| v.in_range(min, max))
                    .cloned()
                    .collect(),
            ),

            (Self::List(list1), Self::List(list2)) => Self::from_values(
                list1
                    .iter()
                    .filter(|v| list2.contains(v))
                    .cloned()
                    .collect(),
            ),
        }
    }

    /// Check if every value accepted by `self` is accepted by `other`.
    pub fn is_subset(&self, other: &Self) -> bool {
        self.intersect(other).as_ref() == Some(self)
    }

    /// Choose one value: the range minimum or the first list entry.
    /// `None` if the constraint is empty.
    pub fn fixate(&self) -> Option<Value> {
        if self.is_empty() {
            return None;
        }
        match self {
            Self::Fixed(v) => Some(v.clone()),
            Self::Range { min, .. } => Some(min.clone()),
            Self::List(values) => values.first().cloned(),
        }
    }

    /// Choose the accepted int value nearest to `target`. Ties go to the
    /// earlier list entry. `None` if the values are not ints.
    pub fn fixate_nearest_int(&self, target: i64) -> Option<i64> {
        match self {
            Self::Fixed(v) => v.as_int(),
            Self::Range { min, max } => Some(target.clamp(min.as_int()?, max.as_int()?)),
            Self::List(values) => values
                .iter()
                .filter_map(Value::as_int)
                .min_by_key(|v| v.abs_diff(target)),
        }
    }

    /// Choose the accepted fraction nearest to `target`. Ties go to the
    /// earlier list entry. `None` if the values are not fractions.
    pub fn fixate_nearest_fraction(&self, target: Fraction) -> Option<Fraction> {
        let closer = |a: Fraction, b: Fraction| {
            let (an, ad) = a.distance(target);
            let (bn, bd) = b.distance(target);
            an * bd <= bn * ad
        };
        match self {
            Self::Fixed(v) => v.as_fraction(),
            Self::Range { min, max } => {
                let (min, max) = (min.as_fraction()?, max.as_fraction()?);
                Some(target.clamp(min, max))
            }
            Self::List(values) => values
                .iter()
                .filter_map(Value::as_fraction)
                .reduce(|best, v| if closer(best, v) { best } else { v }),
        }
    }

    /// Check if this constraint is internally consistent.
    pub(crate) fn is_valid(&self) -> bool {
        match self {
            Self::Fixed(_) => true,
            Self::Range { min, max } => {
                min.is_orderable() && min.compare(max) == Some(Ordering::Less)
            }
            Self::List(values) => {
                values.len() >= 2 && values.iter().all(|v| v.type_name() == values[0].type_name())
            }
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({})", self.type_name())?;
        match self {
            Self::Fixed(v) => write!(f, "{v}"),
            Self::Range { min, max } => write!(f, "[{min}, {max}]"),
            Self::List(values) => {
                f.write_str("{")?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{v}")?;
                }
                f.write_str("}")
            }
        }
    }
}

macro_rules! fixed_from {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for FieldValue {
                fn from(value: $ty) -> Self {
                    Self::Fixed(value.into())
                }
            }
        )*
    };
}

fixed_from!(Value, bool, i64, i32, Fraction, &str, String);

impl From<std::ops::RangeInclusive<i64>> for FieldValue {
    fn from(range: std::ops::RangeInclusive<i64>) -> Self {
        let (min, max) = range.into_inner();
        Self::int_range(min, max)
    }
}

impl From<std::ops::RangeInclusive<Fraction>> for FieldValue {
    fn from(range: std::ops::RangeInclusive<Fraction>) -> Self {
        let (min, max) = range.into_inner();
        Self::fraction_range(min, max)
    }
}
