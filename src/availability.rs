use anyhow::Context;
use serde::Deserialize;

use crate::models::GroupId;

/// What a restriction tree is evaluated against.
#[derive(Debug, Clone, Default)]
pub struct UserScope {
    pub now: i64,
    pub group_ids: Vec<GroupId>,
    pub grouping_ids: Vec<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Node {
    Tree(Tree),
    Condition(Condition),
}

#[derive(Debug, Deserialize)]
struct Tree {
    op: Op,
    #[serde(default)]
    c: Vec<Node>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
enum Op {
    #[serde(rename = "&")]
    All,
    #[serde(rename = "|")]
    Any,
    #[serde(rename = "!&")]
    NotAll,
    #[serde(rename = "!|")]
    NotAny,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum Condition {
    Date {
        d: String,
        t: i64,
    },
    Group {
        #[serde(default)]
        id: Option<GroupId>,
    },
    Grouping {
        id: i64,
    },
    #[serde(other)]
    Unknown,
}

/// Returns whether a module with the given availability JSON is open to the
/// user. An empty or missing rule is always available.
pub fn is_available(rule: Option<&str>, scope: &UserScope) -> anyhow::Result<bool> {
    let Some(rule) = rule.map(str::trim).filter(|r| !r.is_empty() && *r != "null") else {
        return Ok(true);
    };

    let tree: Tree = serde_json::from_str(rule).context("invalid availability rule")?;
    match evaluate_tree(&tree, scope) {
        Some(available) => Ok(available),
        None => {
            tracing::debug!("availability rule has conditions that cannot be evaluated");
            Ok(false)
        }
    }
}

/// `None` when some condition in the tree cannot be evaluated. That result
/// survives negation so the module stays unavailable.
fn evaluate_tree(tree: &Tree, scope: &UserScope) -> Option<bool> {
    // An empty tree places no restriction, whatever the operator.
    if tree.c.is_empty() {
        return Some(true);
    }

    let results = tree
        .c
        .iter()
        .map(|node| evaluate_node(node, scope))
        .collect::<Option<Vec<bool>>>()?;
    let result = match tree.op {
        Op::All => results.iter().all(|r| *r),
        Op::Any => results.iter().any(|r| *r),
        Op::NotAll => !results.iter().all(|r| *r),
        Op::NotAny => !results.iter().any(|r| *r),
    };
    Some(result)
}

fn evaluate_node(node: &Node, scope: &UserScope) -> Option<bool> {
    match node {
        Node::Tree(tree) => evaluate_tree(tree, scope),
        Node::Condition(condition) => evaluate_condition(condition, scope),
    }
}

fn evaluate_condition(condition: &Condition, scope: &UserScope) -> Option<bool> {
    match condition {
        Condition::Date { d, t } => match d.as_str() {
            ">=" => Some(scope.now >= *t),
            "<" => Some(scope.now < *t),
            _ => None,
        },
        Condition::Group { id: Some(id) } => Some(scope.group_ids.contains(id)),
        Condition::Group { id: None } => Some(!scope.group_ids.is_empty()),
        Condition::Grouping { id } => Some(scope.grouping_ids.contains(id)),
        Condition::Unknown => None,
    }
}
