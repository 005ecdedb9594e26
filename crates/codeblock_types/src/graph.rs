// Code Block Graph - Arena of blocks connected by explicit edges
//
// A graph is normally a chain or tree rooted at trigger blocks, but linker
// tooling can create arbitrary edges between any two blocks, cycles included.
// Nothing here rejects cycles; execution bounds them with budgets instead.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ids::BlockId;
use crate::value::{DataValue, Location};

// ─────────────────────────────────────────────────────────────────────────────
// Block Category
// ─────────────────────────────────────────────────────────────────────────────

/// The fixed set of block categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockCategory {
    /// Entry point fired by a host event
    Trigger,
    /// Evaluates to a boolean and branches
    Condition,
    /// Performs an effect
    Action,
    /// Drives its children (loops, groups)
    Control,
}

impl fmt::Display for BlockCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockCategory::Trigger => write!(f, "trigger"),
            BlockCategory::Condition => write!(f, "condition"),
            BlockCategory::Action => write!(f, "action"),
            BlockCategory::Control => write!(f, "control"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Parameters
// ─────────────────────────────────────────────────────────────────────────────

/// A single named parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub value: DataValue,
}

/// Insertion-ordered parameter map of a block
///
/// Names are matched case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Parameters(Vec<Parameter>);

impl Parameters {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Get a parameter value by name
    pub fn get(&self, name: &str) -> Option<&DataValue> {
        self.0
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
            .map(|p| &p.value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Insert or replace a parameter, keeping its original position on replace
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        value: impl Into<DataValue>,
    ) -> Option<DataValue> {
        let name = name.into();
        let value = value.into();
        match self.0.iter_mut().find(|p| p.name.eq_ignore_ascii_case(&name)) {
            Some(existing) => Some(std::mem::replace(&mut existing.value, value)),
            None => {
                self.0.push(Parameter { name, value });
                None
            }
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<DataValue> {
        let index = self.0.iter().position(|p| p.name.eq_ignore_ascii_case(name))?;
        Some(self.0.remove(index).value)
    }

    /// Iterate in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &DataValue)> {
        self.0.iter().map(|p| (p.name.as_str(), &p.value))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<DataValue>> FromIterator<(K, V)> for Parameters {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Parameters::new();
        for (k, v) in iter {
            params.insert(k, v);
        }
        params
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Code Block
// ─────────────────────────────────────────────────────────────────────────────

/// One node of an authored program
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeBlock {
    pub id: BlockId,
    pub category: BlockCategory,
    /// Action id resolved through the dispatch registry
    pub action: String,
    #[serde(default)]
    pub parameters: Parameters,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<BlockId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<BlockId>,
    /// Followed by conditions that evaluate to false
    #[serde(default, rename = "else", skip_serializing_if = "Option::is_none")]
    pub else_branch: Option<BlockId>,
    /// Where the block was placed in the world
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
}

impl CodeBlock {
    pub fn new(category: BlockCategory, action: impl Into<String>) -> Self {
        Self {
            id: BlockId::new(),
            category,
            action: action.into(),
            parameters: Parameters::new(),
            children: Vec::new(),
            next: None,
            else_branch: None,
            location: None,
        }
    }

    pub fn trigger(action: impl Into<String>) -> Self {
        Self::new(BlockCategory::Trigger, action)
    }

    pub fn action(action: impl Into<String>) -> Self {
        Self::new(BlockCategory::Action, action)
    }

    pub fn condition(action: impl Into<String>) -> Self {
        Self::new(BlockCategory::Condition, action)
    }

    pub fn control(action: impl Into<String>) -> Self {
        Self::new(BlockCategory::Control, action)
    }

    /// Builder-style parameter insert
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<DataValue>) -> Self {
        self.parameters.insert(name, value);
        self
    }

    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    pub fn param(&self, name: &str) -> Option<&DataValue> {
        self.parameters.get(name)
    }

    pub fn is_trigger(&self) -> bool {
        self.category == BlockCategory::Trigger
    }

    pub fn is_condition(&self) -> bool {
        self.category == BlockCategory::Condition
    }

    /// All outgoing edges of this block
    pub fn edges(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.children
            .iter()
            .copied()
            .chain(self.next)
            .chain(self.else_branch)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Code Graph
// ─────────────────────────────────────────────────────────────────────────────

/// Errors raised when editing a graph
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GraphError {
    #[error("Block not found: {0}")]
    BlockNotFound(BlockId),
}

/// An authored program: blocks addressed by id with explicit edges
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeGraph {
    pub id: String,
    pub name: String,
    /// World position the program is anchored at
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor: Option<Location>,
    #[serde(default, with = "block_list")]
    blocks: HashMap<BlockId, CodeBlock>,
}

impl CodeGraph {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            anchor: None,
            blocks: HashMap::new(),
        }
    }

    pub fn with_anchor(mut self, anchor: Location) -> Self {
        self.anchor = Some(anchor);
        self
    }

    /// Add a block, replacing any block with the same id
    pub fn add_block(&mut self, block: CodeBlock) -> BlockId {
        let id = block.id;
        self.blocks.insert(id, block);
        id
    }

    pub fn block(&self, id: BlockId) -> Option<&CodeBlock> {
        self.blocks.get(&id)
    }

    pub fn block_mut(&mut self, id: BlockId) -> Option<&mut CodeBlock> {
        self.blocks.get_mut(&id)
    }

    pub fn contains(&self, id: BlockId) -> bool {
        self.blocks.contains_key(&id)
    }

    /// Remove a block and scrub every edge pointing at it
    pub fn remove_block(&mut self, id: BlockId) -> Option<CodeBlock> {
        let removed = self.blocks.remove(&id)?;
        for block in self.blocks.values_mut() {
            block.children.retain(|c| *c != id);
            if block.next == Some(id) {
                block.next = None;
            }
            if block.else_branch == Some(id) {
                block.else_branch = None;
            }
        }
        Some(removed)
    }

    fn require(&self, id: BlockId) -> Result<(), GraphError> {
        if self.blocks.contains_key(&id) {
            Ok(())
        } else {
            Err(GraphError::BlockNotFound(id))
        }
    }

    /// Point `from.next` at `to`
    pub fn link_next(&mut self, from: BlockId, to: BlockId) -> Result<(), GraphError> {
        self.require(to)?;
        let block = self.blocks.get_mut(&from).ok_or(GraphError::BlockNotFound(from))?;
        block.next = Some(to);
        Ok(())
    }

    /// Clear `from.next`, returning the previous target
    pub fn unlink_next(&mut self, from: BlockId) -> Result<Option<BlockId>, GraphError> {
        let block = self.blocks.get_mut(&from).ok_or(GraphError::BlockNotFound(from))?;
        Ok(block.next.take())
    }

    /// Append `child` to the children of `parent`
    pub fn add_child(&mut self, parent: BlockId, child: BlockId) -> Result<(), GraphError> {
        self.require(child)?;
        let block = self
            .blocks
            .get_mut(&parent)
            .ok_or(GraphError::BlockNotFound(parent))?;
        block.children.push(child);
        Ok(())
    }

    /// Set or clear the else edge of a condition
    pub fn set_else(&mut self, block: BlockId, target: Option<BlockId>) -> Result<(), GraphError> {
        if let Some(target) = target {
            self.require(target)?;
        }
        let block = self.blocks.get_mut(&block).ok_or(GraphError::BlockNotFound(block))?;
        block.else_branch = target;
        Ok(())
    }

    /// Trigger blocks (script entry points)
    pub fn triggers(&self) -> impl Iterator<Item = &CodeBlock> {
        self.blocks.values().filter(|b| b.is_trigger())
    }

    pub fn blocks(&self) -> impl Iterator<Item = &CodeBlock> {
        self.blocks.values()
    }

    /// Edges whose target no longer exists, as `(from, to)`
    pub fn dangling_edges(&self) -> Vec<(BlockId, BlockId)> {
        self.blocks
            .values()
            .flat_map(|b| b.edges().map(move |to| (b.id, to)))
            .filter(|(_, to)| !self.blocks.contains_key(to))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

/// Blocks are stored on disk as a plain list
mod block_list {
    use std::collections::HashMap;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::CodeBlock;
    use crate::ids::BlockId;

    pub fn serialize<S: Serializer>(
        blocks: &HashMap<BlockId, CodeBlock>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let mut list: Vec<&CodeBlock> = blocks.values().collect();
        list.sort_by_key(|b| b.id);
        list.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<HashMap<BlockId, CodeBlock>, D::Error> {
        let list = Vec::<CodeBlock>::deserialize(deserializer)?;
        Ok(list.into_iter().map(|b| (b.id, b)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> (CodeGraph, BlockId, BlockId, BlockId) {
        let mut graph = CodeGraph::new("test", "Test");
        let t = graph.add_block(CodeBlock::trigger("on_join"));
        let a = graph.add_block(CodeBlock::action("send_message").with_param("message", "hi"));
        let b = graph.add_block(CodeBlock::action("broadcast"));
        graph.link_next(t, a).unwrap();
        graph.link_next(a, b).unwrap();
        (graph, t, a, b)
    }

    #[test]
    fn test_parameters_keep_insertion_order() {
        let mut params = Parameters::new();
        params.insert("z", 1);
        params.insert("a", 2);
        params.insert("Z", 3);

        let names: Vec<_> = params.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["z", "a"]);
        assert_eq!(params.get("z"), Some(&DataValue::from(3)));
        assert_eq!(params.remove("A"), Some(DataValue::from(2)));
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn test_link_requires_existing_blocks() {
        let (mut graph, _, a, _) = chain();
        let ghost = BlockId::new();
        assert_eq!(graph.link_next(a, ghost), Err(GraphError::BlockNotFound(ghost)));
        assert_eq!(graph.add_child(ghost, a), Err(GraphError::BlockNotFound(ghost)));
    }

    #[test]
    fn test_cycles_are_allowed() {
        let (mut graph, _, a, b) = chain();
        graph.link_next(b, a).unwrap();
        graph.link_next(a, a).unwrap();
        assert_eq!(graph.block(a).unwrap().next, Some(a));
        assert!(graph.dangling_edges().is_empty());
    }

    #[test]
    fn test_remove_block_scrubs_edges() {
        let (mut graph, t, a, b) = chain();
        graph.add_child(t, b).unwrap();
        graph.remove_block(b).unwrap();

        assert_eq!(graph.block(a).unwrap().next, None);
        assert!(graph.block(t).unwrap().children.is_empty());
        assert_eq!(graph.len(), 2);
    }

    #[test]
    fn test_json_roundtrip() {
        let (graph, t, a, _) = chain();
        let json = serde_json::to_string(&graph).unwrap();
        let back: CodeGraph = serde_json::from_str(&json).unwrap();

        assert_eq!(back.len(), 3);
        assert_eq!(back.block(t).unwrap().next, Some(a));
        assert_eq!(
            back.block(a).unwrap().param("message"),
            Some(&DataValue::from("hi"))
        );
        assert_eq!(back.triggers().count(), 1);
    }
}
