//! Query Compiler
//!
//! Turns parsed statements into an evaluation tree:
//!
//! - Clauses (`*WHERE`, `*GROUP`/`*BY`, `*OFFSET`) apply to the whole block
//!   they appear in and to nested blocks, wherever they are written.
//! - Outside a group, a bare event passes its raw series through.
//! - Every other statement becomes a named aggregate in the block's group.
//! - Aggregator names, arities and regexps are checked here, so a bad query
//!   fails before any data is requested.

use crate::model::{MatchFields, Matcher};
use crate::query::aggregate::AggregationFunc;
use crate::query::ast::{
    AggNode, AggOp, BlockNode, Collapse, GroupNode, Named, Node, Query, ScanAgg, ScanEval,
    ScanLeaf, Shift, ValueNode, ZipAgg,
};
use crate::query::error::{QueryError, QueryResult};
use crate::query::parser::{self, Bracket, Expr, GroupArgs, LabelMatch, Pred, Spanned, Stmt};

/// Parse and compile query text
pub fn compile(source: &str, default_empty: &str) -> QueryResult<Query> {
    let stmts = parser::parse_program(source)?;
    let compiler = Compiler {
        source,
        default_empty,
    };
    let root = compiler.block(&stmts, &Scope::default())?;
    Ok(Query { root })
}

/// Clause state in effect for a block
#[derive(Debug, Clone, Default)]
struct Scope {
    filter: MatchFields,
    group: Option<Group>,
    offset: i64,
}

#[derive(Debug, Clone)]
struct Group {
    labels: Vec<String>,
    func: AggregationFunc,
    empty: Option<String>,
}

impl Scope {
    /// Aggregator for bare events used in an expression
    fn func(&self) -> AggregationFunc {
        self.group
            .as_ref()
            .map_or(AggregationFunc::Sum, |g| g.func)
    }
}

struct Compiler<'a> {
    source: &'a str,
    default_empty: &'a str,
}

impl<'a> Compiler<'a> {
    fn block(&self, stmts: &[Spanned<Stmt>], parent: &Scope) -> QueryResult<BlockNode> {
        let scope = self.scope(stmts, parent)?;
        let mut nodes = Vec::new();
        let mut group_at: Option<usize> = None;

        for stmt in stmts {
            match &stmt.node {
                Stmt::Where(_) | Stmt::Group(_) | Stmt::Offset(_) => {}
                Stmt::Block(inner) => nodes.push(Node::Block(self.block(inner, &scope)?)),
                Stmt::Expr { name, expr } => {
                    if scope.group.is_none() && name.is_none() {
                        if let Some(leaf) = self.bare_leaf(expr, &scope)? {
                            nodes.push(Node::Scan(ScanEval { leaf }));
                            continue;
                        }
                    }

                    let named = Named {
                        name: name.clone().unwrap_or_else(|| expr.node.to_string()),
                        node: self.agg(expr, &scope)?,
                    };
                    let idx = match group_at {
                        Some(idx) => idx,
                        None => {
                            nodes.push(Node::Group(self.group_node(&scope)));
                            group_at = Some(nodes.len() - 1);
                            nodes.len() - 1
                        }
                    };
                    if let Node::Group(group) = &mut nodes[idx] {
                        group.nodes.push(named);
                    }
                }
            }
        }

        Ok(BlockNode { nodes })
    }

    /// Collect the clauses of a block on top of the inherited scope
    fn scope(&self, stmts: &[Spanned<Stmt>], parent: &Scope) -> QueryResult<Scope> {
        let mut scope = parent.clone();
        let mut filter: Option<MatchFields> = None;

        for stmt in stmts {
            match &stmt.node {
                Stmt::Where(labels) => {
                    let m = self.match_fields(labels)?;
                    filter = Some(match filter {
                        Some(f) => f.and(&m),
                        None => m,
                    });
                }
                Stmt::Group(args) => scope.group = Some(self.group(args)?),
                Stmt::Offset(offset) => scope.offset = *offset,
                _ => {}
            }
        }

        if let Some(filter) = filter {
            scope.filter = filter;
        }
        Ok(scope)
    }

    fn group(&self, args: &GroupArgs) -> QueryResult<Group> {
        let func = match &args.agg {
            Some(name) => self.aggregator(name)?,
            None => AggregationFunc::Sum,
        };
        Ok(Group {
            labels: args.labels.clone(),
            func,
            empty: args.empty.clone(),
        })
    }

    fn group_node(&self, scope: &Scope) -> GroupNode {
        let (labels, empty) = match &scope.group {
            Some(g) => (g.labels.clone(), g.empty.clone()),
            None => (Vec::new(), None),
        };
        GroupNode {
            nodes: Vec::new(),
            labels,
            empty: empty.unwrap_or_else(|| self.default_empty.to_string()),
            func: scope.func(),
        }
    }

    fn offset_overflow(&self, expr: &Spanned<Expr>) -> QueryError {
        QueryError::Parse {
            pos: expr.pos(self.source),
            message: format!("offset out of range in '{}'", expr.node),
        }
    }

    fn aggregator(&self, name: &Spanned<String>) -> QueryResult<AggregationFunc> {
        AggregationFunc::from_name(&name.node).ok_or_else(|| QueryError::InvalidOperator {
            pos: name.pos(self.source),
            name: name.node.clone(),
        })
    }

    /// The leaf of a bare (possibly shifted) event reference
    fn bare_leaf(&self, expr: &Spanned<Expr>, scope: &Scope) -> QueryResult<Option<ScanLeaf>> {
        match &expr.node {
            Expr::Event { name, labels } => self.leaf(name, labels, scope).map(Some),
            Expr::Paren(inner) => self.bare_leaf(inner, scope),
            Expr::Shift { expr: inner, bracket } => {
                let Some(mut leaf) = self.bare_leaf(inner, scope)? else {
                    return Ok(None);
                };
                match *bracket {
                    Bracket::Offset(offset) => leaf
                        .shift
                        .add_offset(offset)
                        .ok_or_else(|| self.offset_overflow(expr))?,
                    Bracket::Step(step) => leaf.shift.set_step(step),
                }
                Ok(Some(leaf))
            }
            _ => Ok(None),
        }
    }

    fn leaf(&self, event: &str, labels: &[LabelMatch], scope: &Scope) -> QueryResult<ScanLeaf> {
        let literal = self.match_fields(labels)?;
        let mut leaf = ScanLeaf::new(event, literal.and(&scope.filter));
        leaf.shift = Shift::new(scope.offset);
        Ok(leaf)
    }

    fn agg(&self, expr: &Spanned<Expr>, scope: &Scope) -> QueryResult<AggNode> {
        match &expr.node {
            Expr::Event { name, labels } => Ok(AggNode::Scan(ScanAgg {
                leaf: self.leaf(name, labels, scope)?,
                func: scope.func(),
            })),
            Expr::Number(value) => Ok(AggNode::Value(ValueNode {
                value: *value,
                shift: Shift::new(scope.offset),
            })),
            Expr::Paren(inner) => self.agg(inner, scope),
            Expr::Binary { op, lhs, rhs } => Ok(AggNode::Op(AggOp {
                x: Box::new(self.agg(lhs, scope)?),
                y: Box::new(self.agg(rhs, scope)?),
                op: *op,
            })),
            Expr::Shift { expr: inner, bracket } => {
                let mut node = self.agg(inner, scope)?;
                match *bracket {
                    Bracket::Offset(offset) => node
                        .shift_offset(offset)
                        .ok_or_else(|| self.offset_overflow(expr))?,
                    Bracket::Step(step) => node.shift_step(step),
                }
                Ok(node)
            }
            Expr::Call { name, args } => self.call(expr, name, args, scope),
        }
    }

    /// Resolve `!name{args}`: a plain aggregator, `zip<agg>` or `v<agg>`
    fn call(
        &self,
        expr: &Spanned<Expr>,
        name: &str,
        args: &[Spanned<Expr>],
        scope: &Scope,
    ) -> QueryResult<AggNode> {
        let lower = name.to_lowercase();
        let arity = |expected: &'static str| QueryError::InvalidArity {
            pos: expr.pos(self.source),
            name: name.to_string(),
            expected,
            got: args.len(),
        };

        if let Some(func) = AggregationFunc::from_name(&lower) {
            let [arg] = args else {
                return Err(arity("exactly 1 argument"));
            };
            let Some(leaf) = self.bare_leaf(arg, scope)? else {
                return Err(QueryError::Parse {
                    pos: arg.pos(self.source),
                    message: format!(
                        "!{} takes an event; use !zip{} or !v{} for expressions",
                        name, lower, lower
                    ),
                });
            };
            return Ok(AggNode::Scan(ScanAgg { leaf, func }));
        }

        if let Some(func) = lower.strip_prefix("zip").and_then(AggregationFunc::from_name) {
            if args.is_empty() {
                return Err(arity("at least 1 argument"));
            }
            let nodes = args
                .iter()
                .map(|arg| self.agg(arg, scope))
                .collect::<QueryResult<Vec<_>>>()?;
            return Ok(AggNode::Zip(ZipAgg {
                nodes,
                func,
                shift: Shift::default(),
            }));
        }

        if let Some(func) = lower.strip_prefix('v').and_then(AggregationFunc::from_name) {
            let [arg] = args else {
                return Err(arity("exactly 1 argument"));
            };
            return Ok(AggNode::Collapse(Collapse {
                node: Box::new(self.agg(arg, scope)?),
                func,
            }));
        }

        Err(QueryError::InvalidOperator {
            pos: expr.pos(self.source),
            name: name.to_string(),
        })
    }

    fn match_fields(&self, labels: &[LabelMatch]) -> QueryResult<MatchFields> {
        let mut fields = MatchFields::new();
        for label in labels {
            let mut matchers = label
                .preds
                .iter()
                .map(|p| self.matcher(p))
                .collect::<QueryResult<Vec<_>>>()?;
            let matcher = if matchers.len() == 1 {
                matchers.remove(0)
            } else {
                Matcher::Any(matchers)
            };
            fields = fields.and(&MatchFields::new().with(label.label.clone(), matcher));
        }
        Ok(fields)
    }

    fn matcher(&self, pred: &Spanned<Pred>) -> QueryResult<Matcher> {
        match &pred.node {
            Pred::Value(v) => Ok(Matcher::Equals(v.clone())),
            Pred::Func { name, arg } => match name.to_lowercase().as_str() {
                "prefix" => Ok(Matcher::Prefix(arg.clone())),
                "suffix" => Ok(Matcher::Suffix(arg.clone())),
                "regexp" | "regex" => regex::Regex::new(arg).map(Matcher::Regex).map_err(|e| {
                    QueryError::InvalidRegex {
                        pos: pred.pos(self.source),
                        pattern: arg.clone(),
                        message: e.to_string(),
                    }
                }),
                _ => Err(QueryError::InvalidOperator {
                    pos: pred.pos(self.source),
                    name: name.clone(),
                }),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DAY, HOUR};

    fn root(src: &str) -> Vec<Node> {
        compile(src, "").unwrap().root.nodes
    }

    fn group(node: &Node) -> &GroupNode {
        match node {
            Node::Group(g) => g,
            other => panic!("expected group, got {:?}", other),
        }
    }

    #[test]
    fn test_bare_event_is_raw_scan() {
        let nodes = root("foo{color: blue}");
        let [Node::Scan(scan)] = nodes.as_slice() else {
            panic!("expected single scan");
        };
        assert_eq!(scan.leaf.event, "foo");
        assert_eq!(scan.leaf.matcher, MatchFields::new().equals("color", "blue"));
    }

    #[test]
    fn test_expression_gets_named_group() {
        let nodes = root("foo + bar; *BY{size}; *WHERE{color: blue|red}");
        assert_eq!(nodes.len(), 1);
        let g = group(&nodes[0]);
        assert_eq!(g.labels, vec!["size".to_string()]);
        assert_eq!(g.nodes[0].name, "foo + bar");

        let AggNode::Op(op) = &g.nodes[0].node else {
            panic!("expected op");
        };
        let AggNode::Scan(x) = op.x.as_ref() else {
            panic!("expected scan");
        };
        // *WHERE applies even though it appears after the expression
        assert_eq!(
            x.leaf.matcher,
            MatchFields::new().with(
                "color",
                Matcher::Any(vec![
                    Matcher::Equals("blue".into()),
                    Matcher::Equals("red".into())
                ])
            )
        );
    }

    #[test]
    fn test_bare_event_under_group_uses_group_aggregator() {
        let nodes = root("foo; *BY{size, !max, \"n/a\"}");
        let g = group(&nodes[0]);
        assert_eq!(g.empty, "n/a");
        assert_eq!(g.func, AggregationFunc::Max);
        assert!(matches!(
            &g.nodes[0].node,
            AggNode::Scan(ScanAgg { func: AggregationFunc::Max, .. })
        ));
    }

    #[test]
    fn test_aggregates_share_one_group_per_block() {
        let nodes = root("foo; a: !avg{foo}; bar; b: foo * 2");
        assert_eq!(nodes.len(), 3);
        assert!(matches!(nodes[0], Node::Scan(_)));
        assert_eq!(group(&nodes[1]).nodes.len(), 2);
        assert!(matches!(nodes[2], Node::Scan(_)));
        assert!(group(&nodes[1]).labels.is_empty());
    }

    #[test]
    fn test_call_kinds() {
        let nodes = root("!ZIPAVG{foo, bar}; !vmax{foo + 1}; !count{foo}");
        let g = group(&nodes[0]);
        assert!(matches!(&g.nodes[0].node, AggNode::Zip(z) if z.func == AggregationFunc::Avg && z.nodes.len() == 2));
        assert!(matches!(&g.nodes[1].node, AggNode::Collapse(c) if c.func == AggregationFunc::Max));
        assert!(matches!(&g.nodes[2].node, AggNode::Scan(s) if s.func == AggregationFunc::Count));
    }

    #[test]
    fn test_offsets_compose() {
        let nodes = root("*OFFSET[-1:d]; foo[-2:h]; x: !zipsum{bar}[-1:h]");
        let Node::Scan(scan) = &nodes[0] else {
            panic!("expected scan");
        };
        assert_eq!(scan.leaf.shift.offset, -DAY - 2 * HOUR);

        let AggNode::Zip(zip) = &group(&nodes[1]).nodes[0].node else {
            panic!("expected zip");
        };
        assert_eq!(zip.shift.offset, -HOUR);
        let AggNode::Scan(inner) = &zip.nodes[0] else {
            panic!("expected scan");
        };
        assert_eq!(inner.leaf.shift.offset, -DAY);
    }

    #[test]
    fn test_nested_block_overrides_clauses() {
        let nodes = root("*WHERE{color: blue}; *BY{size}; { *WHERE{color: red}; foo }; bar");
        let Node::Block(block) = &nodes[0] else {
            panic!("expected block");
        };
        let inner = group(&block.nodes[0]);
        assert_eq!(inner.labels, vec!["size".to_string()]);
        let AggNode::Scan(s) = &inner.nodes[0].node else {
            panic!("expected scan");
        };
        assert_eq!(s.leaf.matcher, MatchFields::new().equals("color", "red"));
    }

    #[test]
    fn test_multiple_where_clauses_and() {
        let nodes = root("*WHERE{color: blue}; *WHERE{size: s}; foo");
        let Node::Scan(scan) = &nodes[0] else {
            panic!("expected scan");
        };
        assert_eq!(
            scan.leaf.matcher,
            MatchFields::new().equals("color", "blue").equals("size", "s")
        );
    }

    #[test]
    fn test_default_empty_placeholder() {
        let query = compile("x: foo; *BY{size}", "none").unwrap();
        assert_eq!(group(&query.root.nodes[0]).empty, "none");
    }

    #[test]
    fn test_errors() {
        assert!(matches!(
            compile("!median{foo}", ""),
            Err(QueryError::InvalidOperator { name, .. }) if name == "median"
        ));
        assert!(matches!(
            compile("!avg{foo, bar}", ""),
            Err(QueryError::InvalidArity { got: 2, .. })
        ));
        assert!(matches!(
            compile("!zipavg{}", ""),
            Err(QueryError::InvalidArity { got: 0, .. })
        ));
        assert!(matches!(
            compile("!vsum{}", ""),
            Err(QueryError::InvalidArity { .. })
        ));
        assert!(matches!(
            compile("foo; *BY{size, !median}", ""),
            Err(QueryError::InvalidOperator { .. })
        ));
        assert!(matches!(
            compile("foo{path: !regexp(\"(\")}", ""),
            Err(QueryError::InvalidRegex { .. })
        ));
        assert!(matches!(
            compile("foo{path: !glob(x)}", ""),
            Err(QueryError::InvalidOperator { .. })
        ));
        assert!(matches!(
            compile("!avg{foo + bar}", ""),
            Err(QueryError::Parse { .. })
        ));

        // Each offset fits on its own; their sum does not
        for source in [
            "foo[-10000000000:w]; *OFFSET[-10000000000:w]",
            "x: !zipsum{foo}[-10000000000:w][-10000000000:w]",
            "x: (foo + 1)[10000000000:w]; *OFFSET[10000000000:w]",
        ] {
            assert!(
                matches!(compile(source, ""), Err(QueryError::Parse { .. })),
                "{}",
                source
            );
        }

        let err = compile("foo;\n  !median{foo}", "").unwrap_err();
        let pos = err.position().unwrap();
        assert_eq!((pos.line, pos.column), (2, 3));
    }
}
