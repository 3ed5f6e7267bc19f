// Copyright (C) 2025-present The NetGauze Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Location-path subset of `stream-xpath-filter`.
//!
//! Supported expressions are absolute paths made of child steps, each step
//! optionally followed by equality predicates on child leafs, and unions of
//! such paths:
//!
//! ```text
//! /example-toaster:inventory/entry[name='wheat'][id=1]/tags
//! /example-toaster:toasterRestocked | /example-toaster:toasterOutOfBread
//! ```
//!
//! Step prefixes are YANG module names, as in RFC 7951 and RESTCONF paths.
//! The expression is compiled to an equivalent [SubtreeFilter]; an XPath
//! filter only decides whether a notification is delivered, it never prunes.

use crate::{
    filter::{FilterNode, SubtreeFilter},
    node::{Node, NodeName},
};
use std::str::FromStr;

#[derive(Debug, strum_macros::Display, PartialEq, Eq, Clone)]
pub enum XPathError {
    #[strum(to_string = "empty XPath expression")]
    Empty,

    #[strum(to_string = "XPath expression must be an absolute location path: `{0}`")]
    NotAbsolute(String),

    #[strum(to_string = "empty location step in `{0}`")]
    EmptyStep(String),

    #[strum(to_string = "invalid node name `{0}`")]
    InvalidName(String),

    #[strum(to_string = "unsupported predicate `{0}`, only `[name='value']` is supported")]
    UnsupportedPredicate(String),

    #[strum(to_string = "unterminated predicate or literal in `{0}`")]
    Unterminated(String),
}

impl std::error::Error for XPathError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XPathFilter {
    expression: String,
    filter: SubtreeFilter,
}

impl XPathFilter {
    pub fn parse(expression: &str) -> Result<Self, XPathError> {
        let trimmed = expression.trim();
        if trimmed.is_empty() {
            return Err(XPathError::Empty);
        }
        let roots = split_outside_brackets(trimmed, '|')?
            .into_iter()
            .map(|path| parse_path(path.trim()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            expression: trimmed.to_string(),
            filter: SubtreeFilter::new(roots),
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// The equivalent subtree filter.
    pub const fn filter(&self) -> &SubtreeFilter {
        &self.filter
    }

    pub fn matches(&self, body: &Node) -> bool {
        self.filter.matches(body)
    }
}

impl FromStr for XPathFilter {
    type Err = XPathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

struct Step {
    name: NodeName,
    predicates: Vec<FilterNode>,
}

fn parse_path(path: &str) -> Result<FilterNode, XPathError> {
    let Some(relative) = path.strip_prefix('/') else {
        return Err(XPathError::NotAbsolute(path.to_string()));
    };
    if relative.starts_with('/') {
        // descendant axis
        return Err(XPathError::NotAbsolute(path.to_string()));
    }
    let steps = split_outside_brackets(relative, '/')?
        .into_iter()
        .map(|step| parse_step(step.trim(), path))
        .collect::<Result<Vec<_>, _>>()?;

    let mut compiled: Option<FilterNode> = None;
    for step in steps.into_iter().rev() {
        let mut children = step.predicates;
        children.extend(compiled.take());
        compiled = Some(if children.is_empty() {
            FilterNode::selection(step.name)
        } else {
            FilterNode::containment(step.name, children)
        });
    }
    compiled.ok_or_else(|| XPathError::EmptyStep(path.to_string()))
}

fn parse_step(step: &str, path: &str) -> Result<Step, XPathError> {
    if step.is_empty() {
        return Err(XPathError::EmptyStep(path.to_string()));
    }
    let (name, mut rest) = match step.find('[') {
        Some(position) => (step[..position].trim(), &step[position..]),
        None => (step, ""),
    };
    let name = parse_name(name)?;
    let mut predicates = vec![];
    while !rest.is_empty() {
        let end = closing_bracket(rest).ok_or_else(|| XPathError::Unterminated(step.to_string()))?;
        predicates.push(parse_predicate(&rest[1..end])?);
        rest = rest[end + 1..].trim_start();
        if !rest.is_empty() && !rest.starts_with('[') {
            return Err(XPathError::UnsupportedPredicate(rest.to_string()));
        }
    }
    Ok(Step { name, predicates })
}

fn parse_predicate(predicate: &str) -> Result<FilterNode, XPathError> {
    let unsupported = || XPathError::UnsupportedPredicate(predicate.to_string());
    let (name, literal) = predicate.split_once('=').ok_or_else(unsupported)?;
    let name = parse_name(name.trim()).map_err(|_| unsupported())?;
    let literal = literal.trim();
    let value = if let Some(quoted) = literal
        .strip_prefix('\'')
        .and_then(|rest| rest.strip_suffix('\''))
        .or_else(|| {
            literal
                .strip_prefix('"')
                .and_then(|rest| rest.strip_suffix('"'))
        }) {
        quoted
    } else if literal.parse::<f64>().is_ok() {
        literal
    } else {
        return Err(unsupported());
    };
    Ok(FilterNode::content_match(name, value))
}

fn parse_name(name: &str) -> Result<NodeName, XPathError> {
    let is_identifier = |identifier: &str| {
        let mut chars = identifier.chars();
        chars
            .next()
            .is_some_and(|first| first.is_ascii_alphabetic() || first == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
    };
    match name.split_once(':') {
        Some((prefix, local)) if is_identifier(prefix) && is_identifier(local) => {
            Ok(NodeName::qualified(prefix, local))
        }
        None if is_identifier(name) => Ok(NodeName::local(name)),
        _ => Err(XPathError::InvalidName(name.to_string())),
    }
}

/// Position of the `]` closing the predicate `input` starts with.
fn closing_bracket(input: &str) -> Option<usize> {
    let mut quote = None;
    for (position, c) in input.char_indices().skip(1) {
        match (quote, c) {
            (Some(open), c) if c == open => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, ']') => return Some(position),
            (None, '[') => return None,
            _ => {}
        }
    }
    None
}

/// Splits on `separator` when it appears outside predicates and literals.
fn split_outside_brackets(input: &str, separator: char) -> Result<Vec<&str>, XPathError> {
    let mut parts = vec![];
    let mut depth = 0usize;
    let mut quote = None;
    let mut start = 0;
    for (position, c) in input.char_indices() {
        match (quote, c) {
            (Some(open), c) if c == open => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') if depth > 0 => quote = Some(c),
            (None, '[') => depth += 1,
            (None, ']') => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| XPathError::Unterminated(input.to_string()))?;
            }
            (None, c) if c == separator && depth == 0 => {
                parts.push(&input[start..position]);
                start = position + c.len_utf8();
            }
            _ => {}
        }
    }
    if depth != 0 || quote.is_some() {
        return Err(XPathError::Unterminated(input.to_string()));
    }
    parts.push(&input[start..]);
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{inventory, toaster_out_of_bread, toaster_restocked, TOASTER_MODULE};
    use rstest::rstest;

    #[test]
    fn test_compile_simple_path() {
        let xpath = XPathFilter::parse("/example-toaster:toasterRestocked").unwrap();
        assert_eq!(
            xpath.filter(),
            &SubtreeFilter::new(vec![FilterNode::selection(NodeName::qualified(
                TOASTER_MODULE,
                "toasterRestocked"
            ))])
        );
        assert!(xpath.matches(&toaster_restocked(1)));
        assert!(!xpath.matches(&toaster_out_of_bread()));
    }

    #[test]
    fn test_compile_predicates() {
        let xpath: XPathFilter = "/example-toaster:inventory/entry[name='wheat'][id=1]/tags"
            .parse()
            .unwrap();
        let expected = FilterNode::containment(
            NodeName::qualified(TOASTER_MODULE, "inventory"),
            vec![FilterNode::containment(
                NodeName::local("entry"),
                vec![
                    FilterNode::content_match(NodeName::local("name"), "wheat"),
                    FilterNode::content_match(NodeName::local("id"), "1"),
                    FilterNode::selection(NodeName::local("tags")),
                ],
            )],
        );
        assert_eq!(xpath.filter().roots(), &[expected]);
        assert!(xpath.matches(&inventory()));

        let no_match = XPathFilter::parse("/example-toaster:inventory/entry[name=\"rye\"]/tags")
            .unwrap();
        // rye has no tags
        assert!(!no_match.matches(&inventory()));
    }

    #[test]
    fn test_union() {
        let xpath = XPathFilter::parse(
            "/example-toaster:toasterRestocked[amountOfBread=3] | /example-toaster:toasterOutOfBread",
        )
        .unwrap();
        assert_eq!(xpath.filter().roots().len(), 2);
        assert!(xpath.matches(&toaster_restocked(3)));
        assert!(!xpath.matches(&toaster_restocked(4)));
        assert!(xpath.matches(&toaster_out_of_bread()));
    }

    #[test]
    fn test_literal_with_separators() {
        let xpath = XPathFilter::parse("/m:event[text='a/b|c]']").unwrap();
        assert_eq!(
            xpath.filter().roots()[0].children()[0].content(),
            Some("a/b|c]")
        );
    }

    #[rstest]
    #[case("", XPathError::Empty)]
    #[case("toasterRestocked", XPathError::NotAbsolute("toasterRestocked".to_string()))]
    #[case("//entry", XPathError::NotAbsolute("//entry".to_string()))]
    #[case("/a//b", XPathError::EmptyStep("/a//b".to_string()))]
    #[case("/a/*", XPathError::InvalidName("*".to_string()))]
    #[case("/a[count(b)>1]", XPathError::UnsupportedPredicate("count(b)>1".to_string()))]
    #[case("/a[b='v'", XPathError::Unterminated("/a[b='v'".to_string()))]
    #[case("/a[b=v]", XPathError::UnsupportedPredicate("b=v".to_string()))]
    fn test_invalid_expressions(#[case] expression: &str, #[case] expected: XPathError) {
        assert_eq!(XPathFilter::parse(expression), Err(expected));
    }
}
