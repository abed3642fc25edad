//! Query Evaluation Tree
//!
//! A compiled query is a tree of two kinds of nodes:
//!
//! - **Evaluators** (`Node`) append outputs to the result list: raw scans,
//!   groups of computed series and nested blocks.
//! - **Aggregates** (`AggNode`) turn the scanned results into exactly one
//!   series sampled over their window.
//!
//! Nodes are immutable once compiled. Evaluation takes `&self` and keeps all
//! per-call state (group buckets, aggregator instances) on the stack, so one
//! `Query` can be evaluated concurrently over different windows.

use serde::Serialize;
use std::borrow::Cow;
use std::collections::HashSet;

use crate::backend::ScanQuery;
use crate::model::{DataPoints, Fields, MatchFields, Rel, Series, TimeRange};
use crate::query::aggregate::{AggregationFunc, Merger};
use crate::query::error::{QueryError, QueryResult};

/// Window shift applied by `[n:unit]` and `[unit]` brackets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Shift {
    /// Milliseconds added to both window bounds
    pub offset: i64,
    /// Replacement sampling interval
    pub step: Option<i64>,
}

impl Shift {
    pub fn new(offset: i64) -> Self {
        Self { offset, step: None }
    }

    /// Window seen by the shifted node
    pub fn apply(&self, window: &TimeRange) -> TimeRange {
        let shifted = window.offset(self.offset);
        match self.step {
            Some(step) => shifted.with_step(step),
            None => shifted,
        }
    }

    /// Add an offset; `None` when the total does not fit
    pub fn add_offset(&mut self, offset: i64) -> Option<()> {
        self.offset = self.offset.checked_add(offset)?;
        Some(())
    }

    /// Override the step
    pub fn set_step(&mut self, step: i64) {
        self.step = Some(step);
    }
}

/// The part shared by every node that reads scanned data
#[derive(Debug, Clone, PartialEq)]
pub struct ScanLeaf {
    pub event: String,
    /// Literal match AND-ed with the enclosing `*WHERE` filter
    pub matcher: MatchFields,
    pub shift: Shift,
}

impl ScanLeaf {
    pub fn new(event: impl Into<String>, matcher: MatchFields) -> Self {
        Self {
            event: event.into(),
            matcher,
            shift: Shift::default(),
        }
    }

    pub fn window(&self, window: &TimeRange) -> TimeRange {
        self.shift.apply(window)
    }

    /// Backend request for this leaf under `window`
    pub fn query(&self, window: &TimeRange) -> ScanQuery {
        ScanQuery {
            range: self.window(window),
            event: self.event.clone(),
            matcher: self.matcher.clone(),
        }
    }

    /// Whether a scanned series belongs to this leaf, ignoring time
    pub fn accepts(&self, series: &Series) -> bool {
        series.event == self.event && self.matcher.matches(&series.fields)
    }

    /// Series of this leaf that cover its window.
    ///
    /// Series sampled exactly over the window (or inside it) are used as is;
    /// series covering a wider range are narrowed to the window. Everything
    /// else (other step, partial overlap) is ignored.
    pub fn select<'a>(&self, results: &[&'a Series], window: &TimeRange) -> Vec<Cow<'a, Series>> {
        let window = self.window(window);
        results
            .iter()
            .filter(|s| self.accepts(s))
            .filter_map(|s| match window.rel(&s.range) {
                Rel::Equal | Rel::Between => Some(Cow::Borrowed(*s)),
                Rel::Around => Some(Cow::Owned(s.slice(&window))),
                _ => None,
            })
            .collect()
    }
}

/// Evaluator nodes
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Passes matching scanned series through unchanged
    Scan(ScanEval),
    /// Computes named aggregates per group of series
    Group(GroupNode),
    /// Evaluates children in order
    Block(BlockNode),
}

impl Node {
    pub fn scan_queries(&self, window: &TimeRange, out: &mut Vec<ScanQuery>) {
        match self {
            Node::Scan(n) => out.push(n.leaf.query(window)),
            Node::Group(n) => {
                for named in &n.nodes {
                    named.node.scan_queries(window, out);
                }
            }
            Node::Block(n) => n.scan_queries(window, out),
        }
    }

    pub fn eval(&self, window: &TimeRange, results: &[&Series], out: &mut Vec<Output>) -> QueryResult<()> {
        match self {
            Node::Scan(n) => {
                n.eval(window, results, out);
                Ok(())
            }
            Node::Group(n) => n.eval(window, results, out),
            Node::Block(n) => n.eval(window, results, out),
        }
    }
}

/// Raw pass-through of scanned series
#[derive(Debug, Clone, PartialEq)]
pub struct ScanEval {
    pub leaf: ScanLeaf,
}

impl ScanEval {
    pub fn eval(&self, window: &TimeRange, results: &[&Series], out: &mut Vec<Output>) {
        out.extend(
            self.leaf
                .select(results, window)
                .into_iter()
                .map(|s| Output::Raw(s.into_owned())),
        );
    }
}

/// Sequence of evaluators
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BlockNode {
    pub nodes: Vec<Node>,
}

impl BlockNode {
    pub fn scan_queries(&self, window: &TimeRange, out: &mut Vec<ScanQuery>) {
        for node in &self.nodes {
            node.scan_queries(window, out);
        }
    }

    pub fn eval(&self, window: &TimeRange, results: &[&Series], out: &mut Vec<Output>) -> QueryResult<()> {
        for node in &self.nodes {
            node.eval(window, results, out)?;
        }
        Ok(())
    }
}

/// An aggregate with its output name
#[derive(Debug, Clone, PartialEq)]
pub struct Named {
    pub name: String,
    pub node: AggNode,
}

/// Partitions series by label values and computes every aggregate per group
#[derive(Debug, Clone, PartialEq)]
pub struct GroupNode {
    pub nodes: Vec<Named>,
    /// Labels to group by; empty means a single group
    pub labels: Vec<String>,
    /// Value used for missing labels
    pub empty: String,
    /// Aggregator applied to bare events in this group
    pub func: AggregationFunc,
}

impl GroupNode {
    /// Split the series this group reads into buckets, in first-seen order
    pub fn partition<'a>(&self, results: &[&'a Series]) -> Vec<(Fields, Vec<&'a Series>)> {
        let mut buckets: Vec<(Fields, Vec<&'a Series>)> = Vec::new();
        if self.labels.is_empty() {
            buckets.push((Fields::new(), Vec::new()));
        }

        for series in results {
            if !self.nodes.iter().any(|n| n.node.accepts(series)) {
                continue;
            }
            let key = series.fields.group_by(&self.empty, &self.labels);
            match buckets.iter_mut().find(|(k, _)| *k == key) {
                Some((_, members)) => members.push(series),
                None => buckets.push((key, vec![series])),
            }
        }
        buckets
    }

    pub fn eval(&self, window: &TimeRange, results: &[&Series], out: &mut Vec<Output>) -> QueryResult<()> {
        for (key, members) in self.partition(results) {
            for named in &self.nodes {
                let mut series = named.node.aggregate(window, &members)?;
                series.event = named.name.clone();
                series.fields = key.clone();
                series.range = *window;
                out.push(Output::Computed(series));
            }
        }
        Ok(())
    }
}

/// Aggregate nodes
#[derive(Debug, Clone, PartialEq)]
pub enum AggNode {
    /// Reduces all series of one event per time step
    Scan(ScanAgg),
    /// Reduces several aggregates index by index
    Zip(ZipAgg),
    /// Reduces one aggregate to a constant series
    Collapse(Collapse),
    /// Combines two aggregates pointwise
    Op(AggOp),
    /// Constant series
    Value(ValueNode),
}

impl AggNode {
    pub fn scan_queries(&self, window: &TimeRange, out: &mut Vec<ScanQuery>) {
        match self {
            AggNode::Scan(n) => out.push(n.leaf.query(window)),
            AggNode::Zip(n) => {
                let window = n.shift.apply(window);
                for node in &n.nodes {
                    node.scan_queries(&window, out);
                }
            }
            AggNode::Collapse(n) => n.node.scan_queries(window, out),
            AggNode::Op(n) => {
                n.x.scan_queries(window, out);
                n.y.scan_queries(window, out);
            }
            AggNode::Value(_) => {}
        }
    }

    /// Whether any leaf below this node reads `series`
    pub fn accepts(&self, series: &Series) -> bool {
        match self {
            AggNode::Scan(n) => n.leaf.accepts(series),
            AggNode::Zip(n) => n.nodes.iter().any(|node| node.accepts(series)),
            AggNode::Collapse(n) => n.node.accepts(series),
            AggNode::Op(n) => n.x.accepts(series) || n.y.accepts(series),
            AggNode::Value(_) => false,
        }
    }

    /// Apply a bracket to this node and everything it reads.
    ///
    /// Returns `None` when a composed offset overflows.
    pub fn shift_offset(&mut self, offset: i64) -> Option<()> {
        match self {
            AggNode::Scan(n) => n.leaf.shift.add_offset(offset),
            AggNode::Zip(n) => n.shift.add_offset(offset),
            AggNode::Value(n) => n.shift.add_offset(offset),
            AggNode::Collapse(n) => n.node.shift_offset(offset),
            AggNode::Op(n) => {
                n.x.shift_offset(offset)?;
                n.y.shift_offset(offset)
            }
        }
    }

    pub fn shift_step(&mut self, step: i64) {
        match self {
            AggNode::Scan(n) => n.leaf.shift.set_step(step),
            AggNode::Zip(n) => n.shift.set_step(step),
            AggNode::Value(n) => n.shift.set_step(step),
            AggNode::Collapse(n) => n.node.shift_step(step),
            AggNode::Op(n) => {
                n.x.shift_step(step);
                n.y.shift_step(step);
            }
        }
    }

    /// Compute this node's series over `window` from `results`
    pub fn aggregate(&self, window: &TimeRange, results: &[&Series]) -> QueryResult<Series> {
        match self {
            AggNode::Scan(n) => Ok(n.aggregate(window, results)),
            AggNode::Zip(n) => n.aggregate(window, results),
            AggNode::Collapse(n) => n.aggregate(window, results),
            AggNode::Op(n) => n.aggregate(window, results),
            AggNode::Value(n) => Ok(n.aggregate(window)),
        }
    }
}

/// `!agg{event}`
#[derive(Debug, Clone, PartialEq)]
pub struct ScanAgg {
    pub leaf: ScanLeaf,
    pub func: AggregationFunc,
}

impl ScanAgg {
    pub fn aggregate(&self, window: &TimeRange, results: &[&Series]) -> Series {
        let window_used = self.leaf.window(window);
        let members = self.leaf.select(results, window);

        let mut agg = self.func.blank();
        let mut data = DataPoints::blank(&window_used, agg.zero());
        for (ts, i) in window_used.each() {
            agg.reset();
            let mut acc = agg.zero();
            for series in &members {
                acc = agg.aggregate(acc, series.data.value_at(ts));
            }
            data[i].value = acc;
        }

        Series::new(self.leaf.event.clone(), Fields::new(), window_used).with_data(data)
    }
}

/// `!zipagg{a, b, ...}`
#[derive(Debug, Clone, PartialEq)]
pub struct ZipAgg {
    pub nodes: Vec<AggNode>,
    pub func: AggregationFunc,
    pub shift: Shift,
}

impl ZipAgg {
    pub fn aggregate(&self, window: &TimeRange, results: &[&Series]) -> QueryResult<Series> {
        let window = self.shift.apply(window);
        if let [only] = self.nodes.as_slice() {
            return only.aggregate(&window, results);
        }

        let parts = self
            .nodes
            .iter()
            .map(|node| node.aggregate(&window, results))
            .collect::<QueryResult<Vec<_>>>()?;

        let mut agg = self.func.blank();
        let mut data = DataPoints::blank(&window, agg.zero());
        for (_, i) in window.each() {
            agg.reset();
            let mut acc = agg.zero();
            for part in &parts {
                let v = part.data.get(i).map_or(f64::NAN, |p| p.value);
                acc = agg.aggregate(acc, v);
            }
            data[i].value = acc;
        }

        Ok(Series::new(String::new(), Fields::new(), window).with_data(data))
    }
}

/// `!vagg{expr}`: one value for the whole window
#[derive(Debug, Clone, PartialEq)]
pub struct Collapse {
    pub node: Box<AggNode>,
    pub func: AggregationFunc,
}

impl Collapse {
    pub fn aggregate(&self, window: &TimeRange, results: &[&Series]) -> QueryResult<Series> {
        let mut series = self.node.aggregate(window, results)?;
        let mut agg = self.func.blank();
        let total = series
            .data
            .values()
            .fold(agg.zero(), |acc, v| agg.aggregate(acc, v));
        series.data.fill(total);
        Ok(series)
    }
}

/// `x op y`
#[derive(Debug, Clone, PartialEq)]
pub struct AggOp {
    pub x: Box<AggNode>,
    pub y: Box<AggNode>,
    pub op: Merger,
}

impl AggOp {
    pub fn aggregate(&self, window: &TimeRange, results: &[&Series]) -> QueryResult<Series> {
        let mut x = self.x.aggregate(window, results)?;
        let y = self.y.aggregate(window, results)?;
        if x.data.len() != y.data.len() {
            return Err(QueryError::InvalidOperandSize {
                left: x.data.len(),
                right: y.data.len(),
            });
        }
        for (a, b) in x.data.iter_mut().zip(y.data.iter()) {
            a.value = self.op.merge(a.value, b.value);
        }
        Ok(x)
    }
}

/// Numeric literal
#[derive(Debug, Clone, PartialEq)]
pub struct ValueNode {
    pub value: f64,
    pub shift: Shift,
}

impl ValueNode {
    pub fn aggregate(&self, window: &TimeRange) -> Series {
        let window = self.shift.apply(window);
        Series::new(String::new(), Fields::new(), window)
            .with_data(DataPoints::blank(&window, self.value))
    }
}

/// One entry of a query's output
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "series", rename_all = "lowercase")]
pub enum Output {
    /// Scanned series passed through
    Raw(Series),
    /// Series computed by a group
    Computed(Series),
}

impl Output {
    pub fn series(&self) -> &Series {
        match self {
            Output::Raw(s) | Output::Computed(s) => s,
        }
    }

    pub fn into_series(self) -> Series {
        match self {
            Output::Raw(s) | Output::Computed(s) => s,
        }
    }

    pub fn is_raw(&self) -> bool {
        matches!(self, Output::Raw(_))
    }
}

/// A compiled query
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub root: BlockNode,
}

impl Query {
    /// Every backend request needed to evaluate over `window`, in tree order.
    ///
    /// Duplicates are kept; callers decide whether to merge them.
    pub fn scan_queries(&self, window: &TimeRange) -> Vec<ScanQuery> {
        let mut out = Vec::new();
        self.root.scan_queries(window, &mut out);
        out
    }

    /// Evaluate over `window` using previously scanned `results`.
    ///
    /// Repeated `(event, fields, range)` series are read once.
    pub fn eval<'a, I>(&self, window: &TimeRange, results: I) -> QueryResult<Vec<Output>>
    where
        I: IntoIterator<Item = &'a Series>,
    {
        let mut seen = HashSet::new();
        let results: Vec<&Series> = results
            .into_iter()
            .filter(|&s| seen.insert((s.event.as_str(), &s.fields, s.range)))
            .collect();
        let mut out = Vec::new();
        self.root.eval(window, &results, &mut out)?;
        Ok(out)
    }
}
