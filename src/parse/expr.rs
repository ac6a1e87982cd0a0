//! Nom parser for the compact expression syntax.
//!
//! ```text
//! status IN ('draft', 'review') AND NOT archived
//! input.email IS NOT NULL
//! :amount > 0 OR $user = owner_id
//! cardinality(@missing) = 0
//! ```
//!
//! Bare identifiers are record fields, `input.x` reads the payload through a
//! declared field, `payload.x` reads a raw payload key, `:x` an action
//! parameter, `@x` or `x.y` a local, and `$user`, `$tenant`, `$now`, `$pk`
//! the caller context.

use nom::{
    IResult,
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_while},
    character::complete::{char, digit1, multispace0, satisfy},
    combinator::{all_consuming, map, map_res, not, opt, recognize, value, verify},
    error::{Error as NomError, ErrorKind as NomErrorKind},
    multi::{many0, separated_list0, separated_list1},
    sequence::{delimited, pair, preceded, terminated, tuple},
};
use serde_json::Value;

use super::types::{ContextValue, Expression, FieldSource};

type PResult<'a, T> = IResult<&'a str, T>;

const RESERVED: &[&str] = &[
    "and", "or", "not", "in", "is", "like", "ilike", "null", "true", "false",
];

/// Parse a complete expression; trailing input is an error.
pub fn parse_expression(text: &str) -> Result<Expression, String> {
    match all_consuming(ws(or_expr))(text) {
        Ok((_, expr)) => Ok(expr),
        Err(e) => Err(format!("invalid expression '{}': {}", text, e)),
    }
}

// =============================================================================
// LEXICAL HELPERS
// =============================================================================

fn ws<'a, O, F>(inner: F) -> impl FnMut(&'a str) -> PResult<'a, O>
where
    F: FnMut(&'a str) -> PResult<'a, O>,
{
    delimited(multispace0, inner, multispace0)
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Case-insensitive keyword that must not run into an identifier.
fn keyword<'a>(kw: &'static str) -> impl FnMut(&'a str) -> PResult<'a, &'a str> {
    ws(terminated(tag_no_case(kw), not(satisfy(is_ident_char))))
}

fn identifier(input: &str) -> PResult<&str> {
    verify(
        recognize(pair(
            satisfy(|c| c.is_ascii_alphabetic() || c == '_'),
            take_while(is_ident_char),
        )),
        |s: &str| !RESERVED.contains(&s.to_ascii_lowercase().as_str()),
    )(input)
}

// =============================================================================
// PRECEDENCE LEVELS
// =============================================================================

fn or_expr(input: &str) -> PResult<Expression> {
    let (input, first) = and_expr(input)?;
    let (input, rest) = many0(preceded(keyword("or"), and_expr))(input)?;
    Ok((input, logical(first, rest, |operands| Expression::Or { operands })))
}

fn and_expr(input: &str) -> PResult<Expression> {
    let (input, first) = not_expr(input)?;
    let (input, rest) = many0(preceded(keyword("and"), not_expr))(input)?;
    Ok((input, logical(first, rest, |operands| Expression::And { operands })))
}

fn logical(
    first: Expression,
    rest: Vec<Expression>,
    build: fn(Vec<Expression>) -> Expression,
) -> Expression {
    if rest.is_empty() {
        return first;
    }
    let mut operands = Vec::with_capacity(rest.len() + 1);
    operands.push(first);
    operands.extend(rest);
    build(operands)
}

fn not_expr(input: &str) -> PResult<Expression> {
    alt((
        map(preceded(keyword("not"), not_expr), |operand| Expression::Not {
            operand: Box::new(operand),
        }),
        comparison,
    ))(input)
}

fn comparison(input: &str) -> PResult<Expression> {
    let (input, left) = additive(input)?;
    let (input, tail) = opt(comparison_tail)(input)?;
    Ok((
        input,
        match tail {
            Some((op, right)) => Expression::binary(op, left, right),
            None => left,
        },
    ))
}

fn comparison_tail(input: &str) -> PResult<(&'static str, Expression)> {
    alt((
        map(
            tuple((keyword("is"), keyword("not"), keyword("null"))),
            |_| ("is_not", Expression::null()),
        ),
        map(pair(keyword("is"), keyword("null")), |_| {
            ("is", Expression::null())
        }),
        map(preceded(pair(keyword("not"), keyword("in")), in_operand), |e| {
            ("not_in", e)
        }),
        map(preceded(keyword("in"), in_operand), |e| ("in", e)),
        map(preceded(keyword("ilike"), additive), |e| ("ilike", e)),
        map(preceded(keyword("like"), additive), |e| ("like", e)),
        pair(compare_op, additive),
    ))(input)
}

fn compare_op(input: &str) -> PResult<&'static str> {
    ws(alt((
        value("<=", tag("<=")),
        value(">=", tag(">=")),
        value("!=", tag("!=")),
        value("!=", tag("<>")),
        value("=", tag("=")),
        value("<", tag("<")),
        value(">", tag(">")),
    )))(input)
}

fn in_operand(input: &str) -> PResult<Expression> {
    alt((
        map(
            delimited(
                ws(char('(')),
                separated_list1(ws(char(',')), or_expr),
                ws(char(')')),
            ),
            |items| Expression::List { items },
        ),
        additive,
    ))(input)
}

fn additive(input: &str) -> PResult<Expression> {
    let (input, first) = multiplicative(input)?;
    let (input, rest) = many0(pair(
        ws(alt((
            value("||", tag("||")),
            value("+", tag("+")),
            value("-", tag("-")),
        ))),
        multiplicative,
    ))(input)?;
    Ok((
        input,
        rest.into_iter()
            .fold(first, |acc, (op, rhs)| Expression::binary(op, acc, rhs)),
    ))
}

fn multiplicative(input: &str) -> PResult<Expression> {
    let (input, first) = primary(input)?;
    let (input, rest) = many0(pair(
        ws(alt((value("*", tag("*")), value("/", tag("/"))))),
        primary,
    ))(input)?;
    Ok((
        input,
        rest.into_iter()
            .fold(first, |acc, (op, rhs)| Expression::binary(op, acc, rhs)),
    ))
}

// =============================================================================
// PRIMARIES
// =============================================================================

fn primary(input: &str) -> PResult<Expression> {
    ws(alt((
        delimited(char('('), ws(or_expr), char(')')),
        string_literal,
        number_literal,
        value(Expression::literal(true), keyword("true")),
        value(Expression::literal(false), keyword("false")),
        value(Expression::null(), keyword("null")),
        param_ref,
        context_ref,
        local_ref,
        call,
        input_ref,
        payload_ref,
        path_ref,
    )))(input)
}

/// `'it''s'` → `it's`
fn string_literal(input: &str) -> PResult<Expression> {
    let (mut rest, _) = char('\'')(input)?;
    let mut out = String::new();
    loop {
        let Some(idx) = rest.find('\'') else {
            return Err(nom::Err::Error(NomError::new(rest, NomErrorKind::Char)));
        };
        out.push_str(&rest[..idx]);
        let after = &rest[idx + 1..];
        match after.strip_prefix('\'') {
            Some(escaped) => {
                out.push('\'');
                rest = escaped;
            }
            None => return Ok((after, Expression::literal(out))),
        }
    }
}

fn number_literal(input: &str) -> PResult<Expression> {
    map_res(
        recognize(tuple((
            opt(char('-')),
            digit1,
            opt(pair(char('.'), digit1)),
        ))),
        |text: &str| serde_json::from_str::<Value>(text).map(|value| Expression::Literal { value }),
    )(input)
}

fn param_ref(input: &str) -> PResult<Expression> {
    map(preceded(char(':'), identifier), |name| Expression::Param {
        name: name.to_string(),
    })(input)
}

fn context_ref(input: &str) -> PResult<Expression> {
    map(
        preceded(
            char('$'),
            terminated(
                alt((
                    value(ContextValue::User, tag_no_case("user")),
                    value(ContextValue::Tenant, tag_no_case("tenant")),
                    value(ContextValue::Now, tag_no_case("now")),
                    value(ContextValue::Pk, tag_no_case("pk")),
                )),
                not(satisfy(is_ident_char)),
            ),
        ),
        |value| Expression::Context { value },
    )(input)
}

fn local_ref(input: &str) -> PResult<Expression> {
    map(
        preceded(char('@'), separated_list1(char('.'), identifier)),
        local_from_path,
    )(input)
}

fn call(input: &str) -> PResult<Expression> {
    map(
        pair(
            identifier,
            delimited(
                ws(char('(')),
                separated_list0(ws(char(',')), or_expr),
                ws(char(')')),
            ),
        ),
        |(function, args)| Expression::Call {
            function: function.to_ascii_lowercase(),
            args,
        },
    )(input)
}

fn input_ref(input: &str) -> PResult<Expression> {
    map(
        preceded(pair(tag_no_case("input"), char('.')), identifier),
        |field| Expression::Field {
            field: field.to_string(),
            source: FieldSource::Input,
        },
    )(input)
}

fn payload_ref(input: &str) -> PResult<Expression> {
    map(
        preceded(pair(tag_no_case("payload"), char('.')), identifier),
        |key| Expression::Payload {
            key: key.to_string(),
            as_type: None,
        },
    )(input)
}

/// `status` is a record field; `item.sku` is a path into a local.
fn path_ref(input: &str) -> PResult<Expression> {
    map(separated_list1(char('.'), identifier), |segments| {
        if segments.len() == 1 {
            Expression::field(segments[0])
        } else {
            local_from_path(segments)
        }
    })(input)
}

fn local_from_path(segments: Vec<&str>) -> Expression {
    let mut iter = segments.into_iter().map(str::to_string);
    let name = iter.next().unwrap_or_default();
    Expression::Local {
        name,
        path: iter.collect(),
    }
}
