//! Lenient parser for dictionary literals that are almost, but not quite, JSON.
//!
//! Oracles regularly answer with Python-style literals: single-quoted strings,
//! `True`/`False`/`None`, tuples and trailing commas. This accepts that syntax
//! (and plain JSON) and produces a `serde_json::Value`.

use nom::{
    branch::alt,
    bytes::complete::tag,
    character::complete::{char, digit0, digit1, multispace0, one_of},
    combinator::{all_consuming, map, opt, recognize, value},
    multi::separated_list0,
    sequence::{delimited, pair, preceded, separated_pair, terminated, tuple},
    IResult,
};
use serde_json::{Map, Number, Value};

/// Parses a whole literal, returning `None` if any part of the input is not understood.
pub fn parse_literal(input: &str) -> Option<Value> {
    all_consuming(delimited(multispace0, literal, multispace0))(input)
        .ok()
        .map(|(_, v)| v)
}

fn ws_char<'a>(c: char) -> impl FnMut(&'a str) -> IResult<&'a str, char> {
    delimited(multispace0, char(c), multispace0)
}

fn literal(input: &str) -> IResult<&str, Value> {
    alt((dict, list, tuple_literal, string_value, keyword, number))(input)
}

fn items<'a>(open: char, close: char) -> impl FnMut(&'a str) -> IResult<&'a str, Vec<Value>> {
    delimited(
        ws_char(open),
        terminated(separated_list0(ws_char(','), literal), opt(ws_char(','))),
        preceded(multispace0, char(close)),
    )
}

fn list(input: &str) -> IResult<&str, Value> {
    map(items('[', ']'), Value::Array)(input)
}

fn tuple_literal(input: &str) -> IResult<&str, Value> {
    map(items('(', ')'), Value::Array)(input)
}

fn dict(input: &str) -> IResult<&str, Value> {
    let entry = separated_pair(literal, ws_char(':'), literal);
    map(
        delimited(
            ws_char('{'),
            terminated(separated_list0(ws_char(','), entry), opt(ws_char(','))),
            preceded(multispace0, char('}')),
        ),
        |entries| {
            let mut map = Map::new();
            for (key, val) in entries {
                let key = match key {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                map.insert(key, val);
            }
            Value::Object(map)
        },
    )(input)
}

fn keyword(input: &str) -> IResult<&str, Value> {
    alt((
        value(Value::Bool(true), alt((tag("True"), tag("true")))),
        value(Value::Bool(false), alt((tag("False"), tag("false")))),
        value(Value::Null, alt((tag("None"), tag("null")))),
    ))(input)
}

fn number(input: &str) -> IResult<&str, Value> {
    let (rest, text) = recognize(tuple((
        opt(one_of("+-")),
        alt((
            recognize(pair(digit1, opt(pair(char('.'), digit0)))),
            recognize(pair(char('.'), digit1)),
        )),
        opt(tuple((one_of("eE"), opt(one_of("+-")), digit1))),
    )))(input)?;

    let text = text.strip_prefix('+').unwrap_or(text);
    let is_float = text.contains(['.', 'e', 'E']);
    let parsed = if is_float {
        None
    } else {
        text.parse::<i64>().ok().map(Number::from)
    };
    let parsed = parsed.or_else(|| text.parse::<f64>().ok().and_then(Number::from_f64));

    match parsed {
        Some(n) => Ok((rest, Value::Number(n))),
        None => Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Float,
        ))),
    }
}

fn string_value(input: &str) -> IResult<&str, Value> {
    map(quoted_string, Value::String)(input)
}

/// Single- or double-quoted string with Python's common escapes.
fn quoted_string(input: &str) -> IResult<&str, String> {
    let fail = || nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Char));

    let mut chars = input.char_indices();
    let quote = match chars.next() {
        Some((_, q @ ('\'' | '"'))) => q,
        _ => return Err(fail()),
    };

    let mut out = String::new();
    while let Some((idx, c)) = chars.next() {
        match c {
            c if c == quote => return Ok((&input[idx + c.len_utf8()..], out)),
            '\\' => {
                let (_, esc) = chars.next().ok_or_else(fail)?;
                match esc {
                    'n' => out.push('\n'),
                    't' => out.push('\t'),
                    'r' => out.push('\r'),
                    'b' => out.push('\u{8}'),
                    'f' => out.push('\u{c}'),
                    '0' => out.push('\0'),
                    '\\' | '\'' | '"' | '/' => out.push(esc),
                    '\n' => {}
                    'x' | 'u' => {
                        let len = if esc == 'x' { 2 } else { 4 };
                        let mut code = 0u32;
                        for _ in 0..len {
                            let (_, h) = chars.next().ok_or_else(fail)?;
                            code = code * 16 + h.to_digit(16).ok_or_else(fail)?;
                        }
                        out.push(char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER));
                    }
                    other => {
                        out.push('\\');
                        out.push(other);
                    }
                }
            }
            c => out.push(c),
        }
    }
    Err(fail())
}
