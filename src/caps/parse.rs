//! Caps string parser using winnow.
//!
//! ```text
//! video/x-raw, format=(string){I420, NV12}, width=[1, 1920], framerate=30/1; audio/x-raw
//! ANY
//! EMPTY
//! ```
//!
//! # Syntax
//!
//! - Structures are separated by `;`, fields by `,`
//! - A field is `name=value`, optionally typed: `name=(int)5`
//! - `[min, max]` is an inclusive int or fraction range
//! - `{a, b, c}` is a preference-ordered list
//! - Untyped values are inferred: `true`/`false`, integers, `n/d`
//!   fractions, everything else is a string; quoted values are strings

use super::structure::Structure;
use super::value::{FieldValue, Fraction, Value, is_bare_char};
use super::Caps;
use crate::error::{Error, Result};
use std::borrow::Cow;
use winnow::Parser;
use winnow::ascii::multispace0;
use winnow::combinator::{alt, delimited, eof, opt, preceded, separated};
use winnow::error::ContextError;
use winnow::token::take_while;

type WResult<T> = std::result::Result<T, ContextError>;

/// A scalar token before type resolution.
struct RawScalar<'a> {
    text: Cow<'a, str>,
    quoted: bool,
}

/// Parse a caps description.
pub(crate) fn parse_caps(input: &str) -> Result<Caps> {
    caps.parse(input.trim()).map_err(|e| Error::CapsParse {
        input: input.to_string(),
        reason: e.to_string(),
    })
}

fn caps(input: &mut &str) -> WResult<Caps> {
    let caps = alt((
        keyword,
        separated(1.., structure, structure_separator)
            .map(|structures: Vec<Structure>| Caps::from_structures(structures)),
    ))
    .parse_next(input)?;

    let _ = opt((multispace0, ';')).parse_next(input)?;
    let _ = multispace0.parse_next(input)?;
    if !input.is_empty() {
        return Err(ContextError::new());
    }
    Ok(caps)
}

/// `ANY`, `EMPTY` or `NONE`, alone on the input.
fn keyword(input: &mut &str) -> WResult<Caps> {
    let word: &str = take_while(1.., |c: char| c.is_ascii_alphabetic()).parse_next(input)?;
    let _ = (multispace0, opt(';'), multispace0, eof).parse_next(input)?;
    match word {
        "ANY" => Ok(Caps::new_any()),
        "EMPTY" | "NONE" => Ok(Caps::new_empty()),
        _ => Err(ContextError::new()),
    }
}

fn structure_separator(input: &mut &str) -> WResult<()> {
    let _ = (multispace0, ';', multispace0).parse_next(input)?;
    Ok(())
}

fn structure(input: &mut &str) -> WResult<Structure> {
    let name = media_type.parse_next(input)?;
    let mut structure = Structure::new(name);

    loop {
        let checkpoint = *input;
        let separator: WResult<&str> = preceded((multispace0, ','), multispace0).parse_next(input);
        if separator.is_err() {
            *input = checkpoint;
            break;
        }
        let (key, value) = field.parse_next(input)?;
        structure.set(key, value);
    }
    Ok(structure)
}

/// Media type names: `video/x-raw`, `application/x-rtp`.
fn media_type<'a>(input: &mut &'a str) -> WResult<&'a str> {
    take_while(1.., |c: char| {
        c.is_ascii_alphanumeric() || matches!(c, '/' | '-' | '_' | '.' | '+')
    })
    .parse_next(input)
}

fn field_name<'a>(input: &mut &'a str) -> WResult<&'a str> {
    take_while(1.., |c: char| {
        c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')
    })
    .parse_next(input)
}

fn field(input: &mut &str) -> WResult<(String, FieldValue)> {
    let key = field_name.parse_next(input)?;
    let _ = (multispace0, '=', multispace0).parse_next(input)?;
    let hint = opt(delimited(
        ('(', multispace0),
        take_while(1.., |c: char| c.is_ascii_alphabetic()),
        (multispace0, ')', multispace0),
    ))
    .parse_next(input)?;

    let value = alt((
        range.map(|(min, max)| FieldShape::Range(min, max)),
        list.map(FieldShape::List),
        scalar.map(FieldShape::Fixed),
    ))
    .parse_next(input)?;

    let value = resolve(value, hint).ok_or_else(ContextError::new)?;
    Ok((key.to_string(), value))
}

enum FieldShape<'a> {
    Fixed(RawScalar<'a>),
    Range(RawScalar<'a>, RawScalar<'a>),
    List(Vec<RawScalar<'a>>),
}

fn range<'a>(input: &mut &'a str) -> WResult<(RawScalar<'a>, RawScalar<'a>)> {
    let _ = ('[', multispace0).parse_next(input)?;
    let min = scalar.parse_next(input)?;
    let _ = (multispace0, ',', multispace0).parse_next(input)?;
    let max = scalar.parse_next(input)?;
    let _ = (multispace0, ']').parse_next(input)?;
    Ok((min, max))
}

fn list<'a>(input: &mut &'a str) -> WResult<Vec<RawScalar<'a>>> {
    delimited(
        ('{', multispace0),
        separated(1.., scalar, (multispace0, ',', multispace0)),
        (multispace0, '}'),
    )
    .parse_next(input)
}

fn scalar<'a>(input: &mut &'a str) -> WResult<RawScalar<'a>> {
    alt((
        quoted_string.map(|text| RawScalar {
            text: Cow::Owned(text),
            quoted: true,
        }),
        take_while(1.., is_bare_char).map(|text: &'a str| RawScalar {
            text: Cow::Borrowed(text),
            quoted: false,
        }),
    ))
    .parse_next(input)
}

/// A double-quoted string; `\"` and `\\` escape the next character.
fn quoted_string(input: &mut &str) -> WResult<String> {
    let _ = '"'.parse_next(input)?;
    let rest: &str = *input;
    let mut text = String::new();
    let mut chars = rest.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '"' => {
                *input = &rest[i + 1..];
                return Ok(text);
            }
            '\\' => match chars.next() {
                Some((_, escaped)) => text.push(escaped),
                None => break,
            },
            c => text.push(c),
        }
    }
    Err(ContextError::new())
}

/// Turn a raw field into a typed constraint, validating ranges and lists.
fn resolve(shape: FieldShape<'_>, hint: Option<&str>) -> Option<FieldValue> {
    let value = match shape {
        FieldShape::Fixed(raw) => FieldValue::Fixed(typed(&raw, hint)?),
        FieldShape::Range(min, max) => {
            let (min, max) = (typed(&min, hint)?, typed(&max, hint)?);
            match (min, max) {
                (Value::Int(min), Value::Int(max)) if min <= max => FieldValue::int_range(min, max),
                (Value::Fraction(min), Value::Fraction(max)) if min <= max => {
                    FieldValue::fraction_range(min, max)
                }
                _ => return None,
            }
        }
        FieldShape::List(raws) => {
            // Infer the list type from its first entry so `{1, 2}` stays int.
            let hint = match hint {
                Some(h) => h,
                None => typed(raws.first()?, None)?.type_name(),
            };
            let values = raws
                .iter()
                .map(|raw| typed(raw, Some(hint)))
                .collect::<Option<Vec<_>>>()?;
            FieldValue::list(values)?
        }
    };
    value.is_valid().then_some(value)
}

fn typed(raw: &RawScalar<'_>, hint: Option<&str>) -> Option<Value> {
    let text: &str = &raw.text;
    match hint {
        Some("string" | "s") => Some(Value::Str(text.to_string())),
        Some("int" | "i") => text.parse().ok().map(Value::Int),
        Some("boolean" | "bool" | "b") => parse_bool(text).map(Value::Bool),
        Some("fraction") => parse_fraction(text).map(Value::Fraction),
        Some(_) => None,
        None if raw.quoted => Some(Value::Str(text.to_string())),
        None => Some(
            parse_bool(text)
                .map(Value::Bool)
                .or_else(|| text.parse().ok().map(Value::Int))
                .or_else(|| parse_fraction(text).map(Value::Fraction))
                .unwrap_or_else(|| Value::Str(text.to_string())),
        ),
    }
}

fn parse_bool(text: &str) -> Option<bool> {
    match text {
        "true" | "TRUE" => Some(true),
        "false" | "FALSE" => Some(false),
        _ => None,
    }
}

fn parse_fraction(text: &str) -> Option<Fraction> {
    let (num, den) = text.split_once('/')?;
    let (num, den): (i32, i32) = (num.parse().ok()?, den.parse().ok()?);
    (den != 0).then(|| Fraction::new(num, den))
}
