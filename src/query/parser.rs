//! Query Parser
//!
//! Parses Tally query text into a syntax tree. Clause resolution and name
//! binding happen afterwards in `compile`.
//!
//! # Supported Syntax
//!
//! ```text
//! program    := statement (sep statement)*          sep: ';' ',' or newline
//! statement  := clause | '{' program '}' | [name ':'] expr
//! clause     := '*WHERE' match | ('*GROUP' | '*BY') '{' group_arg, ... '}' | '*OFFSET' '[' n ':' unit ']'
//! expr       := term (('+' | '-') term)*
//! term       := postfix (('*' | '/') postfix)*
//! postfix    := primary ('[' n ':' unit ']' | '[' [n] unit ']')*
//! primary    := number | '(' expr ')' | '!' name '{' expr, ... '}' | event [match]
//! match      := '{' label ':' pred ('|' pred)*, ... '}'
//! pred       := value | '!regexp(' p ')' | '!prefix(' p ')' | '!suffix(' p ')'
//! ```
//!
//! # Examples
//!
//! ```text
//! foo{color: blue}
//! foo + bar; *BY{size}; *WHERE{color: blue|red}
//! !zipavg{foo, bar}[-1:d]
//! total: !vsum{foo} / 2
//! ```

use nom::{
    branch::alt,
    bytes::complete::{tag_no_case, take_till1, take_while, take_while1},
    character::complete::{char, digit1, multispace0, one_of, space0},
    combinator::{cut, map, map_res, opt, recognize, value},
    multi::{separated_list0, separated_list1},
    sequence::{delimited, pair, preceded, terminated, tuple},
    IResult,
};
use std::fmt;

use crate::model::{DAY, HOUR, MINUTE, SECOND, WEEK};
use crate::query::aggregate::Merger;
use crate::query::error::{Position, QueryError, QueryResult};

/// A syntax node and where it starts.
///
/// `tail` is the number of source bytes from the node's start to the end of
/// the input, which stays valid for every suffix nom hands around.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned<T> {
    pub tail: usize,
    pub node: T,
}

impl<T> Spanned<T> {
    fn new(input: &str, node: T) -> Self {
        Self {
            tail: input.len(),
            node,
        }
    }

    /// Position of this node within `source`
    pub fn pos(&self, source: &str) -> Position {
        Position::locate(source, source.len().saturating_sub(self.tail))
    }
}

/// Expressions
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Event reference with an optional match literal
    Event { name: String, labels: Vec<LabelMatch> },
    Number(f64),
    /// `!name{args}`
    Call {
        name: String,
        args: Vec<Spanned<Expr>>,
    },
    Binary {
        op: Merger,
        lhs: Box<Spanned<Expr>>,
        rhs: Box<Spanned<Expr>>,
    },
    /// `expr[...]`
    Shift {
        expr: Box<Spanned<Expr>>,
        bracket: Bracket,
    },
    Paren(Box<Spanned<Expr>>),
}

/// Offset or step bracket, in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bracket {
    Offset(i64),
    Step(i64),
}

/// Predicates for one label in a match literal
#[derive(Debug, Clone, PartialEq)]
pub struct LabelMatch {
    pub label: String,
    pub preds: Vec<Spanned<Pred>>,
}

/// Single predicate, unresolved
#[derive(Debug, Clone, PartialEq)]
pub enum Pred {
    Value(String),
    /// `!name(arg)`
    Func { name: String, arg: String },
}

/// Arguments of a `*GROUP` / `*BY` clause
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GroupArgs {
    pub labels: Vec<String>,
    pub agg: Option<Spanned<String>>,
    pub empty: Option<String>,
}

enum GroupArg {
    Label(String),
    Agg(Spanned<String>),
    Empty(String),
}

/// Statements
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Expr {
        name: Option<String>,
        expr: Spanned<Expr>,
    },
    Block(Vec<Spanned<Stmt>>),
    Where(Vec<LabelMatch>),
    Group(GroupArgs),
    Offset(i64),
}

/// Parse query text into its top-level statements
pub fn parse_program(input: &str) -> QueryResult<Vec<Spanned<Stmt>>> {
    let (rest, stmts) = statements(input).map_err(|e| nom_error(input, e))?;
    let rest = rest.trim_start();
    if !rest.is_empty() {
        return Err(QueryError::Parse {
            pos: Position::locate(input, input.len() - rest.len()),
            message: format!("unexpected input: '{}'", snippet(rest)),
        });
    }
    Ok(stmts)
}

fn nom_error(input: &str, err: nom::Err<nom::error::Error<&str>>) -> QueryError {
    match err {
        nom::Err::Error(e) | nom::Err::Failure(e) => QueryError::Parse {
            pos: Position::locate(input, input.len() - e.input.len()),
            message: if e.input.is_empty() {
                "unexpected end of input".to_string()
            } else {
                format!("unexpected input: '{}'", snippet(e.input))
            },
        },
        nom::Err::Incomplete(_) => QueryError::Parse {
            pos: Position::locate(input, input.len()),
            message: "unexpected end of input".to_string(),
        },
    }
}

fn snippet(s: &str) -> &str {
    let line = s.lines().next().unwrap_or(s);
    match line.char_indices().nth(24) {
        Some((i, _)) => &line[..i],
        None => line,
    }
}

/// Parse statements up to end of input or a closing brace
fn statements(input: &str) -> IResult<&str, Vec<Spanned<Stmt>>> {
    let mut out = Vec::new();
    let (mut input, _) = separators(input)?;
    loop {
        if input.is_empty() || input.starts_with('}') {
            return Ok((input, out));
        }
        let (rest, stmt) = statement(input)?;
        out.push(stmt);

        let (rest, _) = space0(rest)?;
        if rest.is_empty() || rest.starts_with('}') {
            return Ok((rest, out));
        }
        // A statement must be followed by a separator
        let (rest, _) = one_of(";,\n\r")(rest)?;
        let (rest, _) = separators(rest)?;
        input = rest;
    }
}

fn separators(input: &str) -> IResult<&str, &str> {
    take_while(|c: char| c.is_whitespace() || c == ';' || c == ',')(input)
}

fn statement(input: &str) -> IResult<&str, Spanned<Stmt>> {
    let start = input;
    let (input, stmt) = alt((clause, block, named_statement, expr_statement))(input)?;
    Ok((input, Spanned::new(start, stmt)))
}

fn block(input: &str) -> IResult<&str, Stmt> {
    let (input, _) = char('{')(input)?;
    let (input, stmts) = cut(statements)(input)?;
    let (input, _) = cut(char('}'))(input)?;
    Ok((input, Stmt::Block(stmts)))
}

fn named_statement(input: &str) -> IResult<&str, Stmt> {
    let (input, name) = identifier(input)?;
    let (input, _) = space0(input)?;
    let (input, _) = char(':')(input)?;
    let (input, _) = multispace0(input)?;
    let (input, expr) = cut(expr)(input)?;
    Ok((
        input,
        Stmt::Expr {
            name: Some(name.to_string()),
            expr,
        },
    ))
}

fn expr_statement(input: &str) -> IResult<&str, Stmt> {
    map(expr, |expr| Stmt::Expr { name: None, expr })(input)
}

/// Parse `*WHERE`, `*GROUP` / `*BY` and `*OFFSET` clauses
fn clause(input: &str) -> IResult<&str, Stmt> {
    let (input, _) = char('*')(input)?;
    cut(alt((where_clause, group_clause, offset_clause)))(input)
}

fn where_clause(input: &str) -> IResult<&str, Stmt> {
    let (input, _) = tag_no_case("WHERE")(input)?;
    let (input, _) = multispace0(input)?;
    let (input, labels) = match_body(input)?;
    Ok((input, Stmt::Where(labels)))
}

fn group_clause(input: &str) -> IResult<&str, Stmt> {
    let (input, _) = alt((tag_no_case("GROUP"), tag_no_case("BY")))(input)?;
    let (input, _) = multispace0(input)?;
    let (input, args) = delimited(
        terminated(char('{'), multispace0),
        separated_list0(comma, group_arg),
        preceded(multispace0, char('}')),
    )(input)?;

    let mut group = GroupArgs::default();
    for arg in args {
        match arg {
            GroupArg::Label(label) => group.labels.push(label),
            GroupArg::Agg(name) => group.agg = Some(name),
            GroupArg::Empty(empty) => group.empty = Some(empty),
        }
    }
    Ok((input, Stmt::Group(group)))
}

fn group_arg(input: &str) -> IResult<&str, GroupArg> {
    alt((
        map(quoted_string, GroupArg::Empty),
        map(preceded(char('!'), identifier), |name| {
            GroupArg::Agg(Spanned::new(input, name.to_string()))
        }),
        map(identifier, |label| GroupArg::Label(label.to_string())),
    ))(input)
}

fn offset_clause(input: &str) -> IResult<&str, Stmt> {
    let (input, _) = tag_no_case("OFFSET")(input)?;
    let (input, _) = space0(input)?;
    let (input, offset) = delimited(
        terminated(char('['), space0),
        offset_bracket,
        preceded(space0, char(']')),
    )(input)?;
    Ok((input, Stmt::Offset(offset)))
}

/// Parse an arithmetic expression
pub fn expr(input: &str) -> IResult<&str, Spanned<Expr>> {
    binary(input, term, "+-")
}

fn term(input: &str) -> IResult<&str, Spanned<Expr>> {
    binary(input, postfix, "*/")
}

/// Left-associative chain of `operand (op operand)*`.
///
/// Operators must appear on the same line as their left operand so that a
/// newline can end a statement.
fn binary<'a>(
    input: &'a str,
    operand: fn(&'a str) -> IResult<&'a str, Spanned<Expr>>,
    ops: &'static str,
) -> IResult<&'a str, Spanned<Expr>> {
    let start = input;
    let (mut input, mut lhs) = operand(input)?;
    loop {
        let op = preceded(space0::<&str, nom::error::Error<&str>>, one_of(ops))(input);
        let (rest, op) = match op {
            Ok(ok) => ok,
            Err(nom::Err::Error(_)) => return Ok((input, lhs)),
            Err(e) => return Err(e),
        };
        let (rest, _) = multispace0(rest)?;
        let (rest, rhs) = cut(operand)(rest)?;
        let op = match op {
            '+' => Merger::Add,
            '-' => Merger::Sub,
            '*' => Merger::Mul,
            _ => Merger::Div,
        };
        lhs = Spanned::new(
            start,
            Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
        );
        input = rest;
    }
}

fn postfix(input: &str) -> IResult<&str, Spanned<Expr>> {
    let start = input;
    let (mut input, mut expr) = primary(input)?;
    loop {
        let (rest, shift) = match bracket(input) {
            Ok(parsed) => parsed,
            Err(nom::Err::Error(_)) => break,
            Err(e) => return Err(e),
        };
        expr = Spanned::new(
            start,
            Expr::Shift {
                expr: Box::new(expr),
                bracket: shift,
            },
        );
        input = rest;
    }
    Ok((input, expr))
}

fn primary(input: &str) -> IResult<&str, Spanned<Expr>> {
    let start = input;
    let (input, expr) = alt((number_expr, paren, call, event))(input)?;
    Ok((input, Spanned::new(start, expr)))
}

fn number_expr(input: &str) -> IResult<&str, Expr> {
    map(parse_number, Expr::Number)(input)
}

fn paren(input: &str) -> IResult<&str, Expr> {
    let (input, _) = terminated(char('('), multispace0)(input)?;
    let (input, inner) = cut(expr)(input)?;
    let (input, _) = cut(preceded(multispace0, char(')')))(input)?;
    Ok((input, Expr::Paren(Box::new(inner))))
}

/// Parse an aggregate call like `!avg{foo}` or `!zipavg{foo, bar}`
fn call(input: &str) -> IResult<&str, Expr> {
    let (input, _) = char('!')(input)?;
    let (input, name) = cut(identifier)(input)?;
    let (input, _) = space0(input)?;
    let (input, args) = cut(delimited(
        terminated(char('{'), multispace0),
        terminated(separated_list0(comma, expr), opt(comma)),
        preceded(multispace0, char('}')),
    ))(input)?;
    Ok((
        input,
        Expr::Call {
            name: name.to_string(),
            args,
        },
    ))
}

/// Parse an event reference like `foo` or `foo{color: blue|red}`
fn event(input: &str) -> IResult<&str, Expr> {
    let (input, name) = identifier(input)?;
    let (input, labels) = opt(preceded(space0, match_body))(input)?;
    Ok((
        input,
        Expr::Event {
            name: name.to_string(),
            labels: labels.unwrap_or_default(),
        },
    ))
}

/// Parse `{label: pred|pred, ...}`
fn match_body(input: &str) -> IResult<&str, Vec<LabelMatch>> {
    let (input, _) = terminated(char('{'), multispace0)(input)?;
    cut(terminated(
        terminated(separated_list0(comma, label_match), opt(comma)),
        preceded(multispace0, char('}')),
    ))(input)
}

fn label_match(input: &str) -> IResult<&str, LabelMatch> {
    let (input, label) = identifier(input)?;
    let (input, _) = tuple((space0, char(':'), space0))(input)?;
    let (input, preds) = separated_list1(tuple((space0, char('|'), space0)), pred)(input)?;
    Ok((
        input,
        LabelMatch {
            label: label.to_string(),
            preds,
        },
    ))
}

fn pred(input: &str) -> IResult<&str, Spanned<Pred>> {
    let start = input;
    let (input, pred) = alt((pred_func, map(match_value, Pred::Value)))(input)?;
    Ok((input, Spanned::new(start, pred)))
}

/// Parse `!regexp(...)`, `!prefix(...)`, `!suffix(...)`
fn pred_func(input: &str) -> IResult<&str, Pred> {
    let (input, _) = char('!')(input)?;
    let (input, name) = cut(identifier)(input)?;
    let (input, arg) = cut(delimited(
        terminated(char('('), space0),
        alt((quoted_string, map(take_till1(|c| c == ')'), |s: &str| s.trim_end().to_string()))),
        preceded(space0, char(')')),
    ))(input)?;
    Ok((
        input,
        Pred::Func {
            name: name.to_string(),
            arg,
        },
    ))
}

fn match_value(input: &str) -> IResult<&str, String> {
    alt((
        quoted_string,
        map(
            take_while1(|c: char| c.is_alphanumeric() || "_.-/@".contains(c)),
            |s: &str| s.to_string(),
        ),
    ))(input)
}

fn bracket(input: &str) -> IResult<&str, Bracket> {
    delimited(
        terminated(char('['), space0),
        alt((
            map(offset_bracket, Bracket::Offset),
            map(step_bracket, Bracket::Step),
        )),
        preceded(space0, char(']')),
    )(input)
}

/// Parse `n:unit` into milliseconds
fn offset_bracket(input: &str) -> IResult<&str, i64> {
    let start = input;
    let (input, n) = signed_integer(input)?;
    let (input, _) = tuple((space0, char(':'), space0))(input)?;
    let (input, unit) = duration_unit(input)?;
    Ok((input, scale(start, n, unit)?))
}

/// Parse `unit` or `n unit` into milliseconds
fn step_bracket(input: &str) -> IResult<&str, i64> {
    let start = input;
    let (input, n) = opt(terminated(
        map_res(digit1, |s: &str| s.parse::<i64>()),
        space0,
    ))(input)?;
    let (input, unit) = duration_unit(input)?;
    let step = scale(start, n.unwrap_or(1), unit)?;
    if step <= 0 {
        return Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Verify,
        )));
    }
    Ok((input, step))
}

/// `n * unit`, failing at `input` when the product does not fit
fn scale(input: &str, n: i64, unit: i64) -> Result<i64, nom::Err<nom::error::Error<&str>>> {
    n.checked_mul(unit).ok_or_else(|| {
        nom::Err::Failure(nom::error::Error::new(input, nom::error::ErrorKind::Verify))
    })
}

fn duration_unit(input: &str) -> IResult<&str, i64> {
    alt((
        value(SECOND, char('s')),
        value(MINUTE, char('m')),
        value(HOUR, char('h')),
        value(DAY, char('d')),
        value(WEEK, char('w')),
    ))(input)
}

fn signed_integer(input: &str) -> IResult<&str, i64> {
    map_res(
        recognize(pair(opt(one_of("+-")), digit1)),
        |s: &str| s.parse::<i64>(),
    )(input)
}

fn comma(input: &str) -> IResult<&str, char> {
    delimited(multispace0, char(','), multispace0)(input)
}

/// Parse identifier (event name, label, aggregator)
fn identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(|c: char| c.is_alphabetic() || c == '_'),
        take_while(|c: char| c.is_alphanumeric() || c == '_' || c == '.'),
    ))(input)
}

/// Parse quoted string
fn quoted_string(input: &str) -> IResult<&str, String> {
    alt((
        delimited(char('"'), take_while(|c| c != '"'), char('"')),
        delimited(char('\''), take_while(|c| c != '\''), char('\'')),
    ))(input)
    .map(|(input, s)| (input, s.to_string()))
}

/// Parse floating point number
fn parse_number(input: &str) -> IResult<&str, f64> {
    map_res(
        recognize(tuple((
            opt(char('-')),
            digit1,
            opt(pair(char('.'), digit1)),
        ))),
        |s: &str| s.parse::<f64>(),
    )(input)
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Event { name, labels } => {
                write!(f, "{}", name)?;
                if labels.is_empty() {
                    return Ok(());
                }
                write!(f, "{{")?;
                for (i, m) in labels.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: ", m.label)?;
                    for (j, p) in m.preds.iter().enumerate() {
                        if j > 0 {
                            write!(f, "|")?;
                        }
                        write!(f, "{}", p.node)?;
                    }
                }
                write!(f, "}}")
            }
            Expr::Number(v) => write!(f, "{}", v),
            Expr::Call { name, args } => {
                write!(f, "!{}{{", name)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg.node)?;
                }
                write!(f, "}}")
            }
            Expr::Binary { op, lhs, rhs } => write!(f, "{} {} {}", lhs.node, op, rhs.node),
            Expr::Shift { expr, bracket } => write!(f, "{}{}", expr.node, bracket),
            Expr::Paren(inner) => write!(f, "({})", inner.node),
        }
    }
}

impl fmt::Display for Pred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pred::Value(v) if !v.is_empty() && v.chars().all(|c| c.is_alphanumeric() || "_.-/@".contains(c)) => {
                write!(f, "{}", v)
            }
            Pred::Value(v) => write!(f, "{:?}", v),
            Pred::Func { name, arg } => write!(f, "!{}({:?})", name, arg),
        }
    }
}

impl fmt::Display for Bracket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Bracket::Offset(ms) => {
                let (n, unit) = split_duration(ms);
                write!(f, "[{}:{}]", n, unit)
            }
            Bracket::Step(ms) => match split_duration(ms) {
                (1, unit) => write!(f, "[{}]", unit),
                (n, unit) => write!(f, "[{}{}]", n, unit),
            },
        }
    }
}

/// Largest unit that divides `ms` evenly
fn split_duration(ms: i64) -> (i64, char) {
    for (unit, c) in [(WEEK, 'w'), (DAY, 'd'), (HOUR, 'h'), (MINUTE, 'm')] {
        if ms != 0 && ms % unit == 0 {
            return (ms / unit, c);
        }
    }
    (ms / SECOND, 's')
}
