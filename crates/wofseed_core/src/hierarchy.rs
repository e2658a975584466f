use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use serde::Serialize;
use tracing::debug;

use crate::error::HierarchyError;
use crate::record::CanonicalRecord;
use crate::sanitize::{disambiguate_segment, join_segment, sanitize_segment};

pub const DEFAULT_ROOT_PLACETYPE: &str = "country";

pub const DEFAULT_PLACETYPES: [&str; 6] = [
    "country",
    "region",
    "county",
    "locality",
    "neighbourhood",
    "microhood",
];

const DEFAULT_TRANSITIONS: [(&str, &[&str]); 5] = [
    ("country", &["region"]),
    ("region", &["county", "locality"]),
    ("county", &["locality"]),
    ("locality", &["neighbourhood"]),
    ("neighbourhood", &["microhood"]),
];

/// Which placetypes exist, which parent→child steps are legal, and where
/// trees start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacetypeRules {
    pub allowed: BTreeSet<String>,
    pub transitions: BTreeMap<String, BTreeSet<String>>,
    pub root: String,
}

impl Default for PlacetypeRules {
    fn default() -> Self {
        Self {
            allowed: DEFAULT_PLACETYPES
                .iter()
                .map(|item| (*item).to_string())
                .collect(),
            transitions: DEFAULT_TRANSITIONS
                .iter()
                .map(|(parent, children)| {
                    (
                        (*parent).to_string(),
                        children.iter().map(|item| (*item).to_string()).collect(),
                    )
                })
                .collect(),
            root: DEFAULT_ROOT_PLACETYPE.to_string(),
        }
    }
}

impl PlacetypeRules {
    pub fn validate(&self) -> Result<(), HierarchyError> {
        if self.allowed.is_empty() {
            return Err(HierarchyError::EmptyAllowSet);
        }
        if !self.allowed.contains(&self.root) {
            return Err(HierarchyError::RootNotAllowed(self.root.clone()));
        }
        if !self.transitions.contains_key(&self.root) {
            return Err(HierarchyError::MissingRootTransitions(self.root.clone()));
        }
        Ok(())
    }

    pub fn permits(&self, parent: &str, child: &str) -> bool {
        self.transitions
            .get(parent)
            .is_some_and(|children| children.contains(child))
    }
}

/// What to do when the same id appears more than once in one build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DuplicatePolicy {
    /// Later records replace the fields of earlier ones; the node keeps the
    /// position of its first appearance.
    #[default]
    LastWriteWins,
    Reject,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HierarchyConfig {
    /// `None` disables placetype filtering and transition checks; roots are
    /// then the nodes without a resolvable parent.
    pub rules: Option<PlacetypeRules>,
    pub duplicates: DuplicatePolicy,
}

impl Default for HierarchyConfig {
    fn default() -> Self {
        Self {
            rules: Some(PlacetypeRules::default()),
            duplicates: DuplicatePolicy::default(),
        }
    }
}

impl HierarchyConfig {
    pub fn permissive() -> Self {
        Self {
            rules: None,
            duplicates: DuplicatePolicy::default(),
        }
    }

    pub fn allowed_placetypes(&self) -> Option<&BTreeSet<String>> {
        self.rules.as_ref().map(|rules| &rules.allowed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HierarchyNode {
    pub id: String,
    pub parent_id: Option<String>,
    pub placetype: String,
    pub name: String,
    children: Vec<String>,
}

impl HierarchyNode {
    fn from_record(record: CanonicalRecord) -> Self {
        Self {
            id: record.id,
            parent_id: record.parent_id,
            placetype: record.placetype,
            name: record.name,
            children: Vec::new(),
        }
    }

    /// Child ids in input order.
    pub fn children(&self) -> &[String] {
        &self.children
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildReport {
    pub records: usize,
    pub nodes: usize,
    pub roots: usize,
    pub linked: usize,
    pub duplicates: usize,
    pub filtered_placetypes: usize,
    pub missing_parents: usize,
    pub disallowed_transitions: usize,
    pub detached: usize,
}

/// Node map plus resolved roots for one source batch.
#[derive(Debug, Clone)]
pub struct Hierarchy {
    nodes: HashMap<String, HierarchyNode>,
    roots: Vec<String>,
    report: BuildReport,
}

enum ParentLink {
    Linked(String),
    Unresolved,
    Disallowed,
}

pub fn build_hierarchy(
    records: Vec<CanonicalRecord>,
    config: &HierarchyConfig,
) -> Result<Hierarchy, HierarchyError> {
    if let Some(rules) = &config.rules {
        rules.validate()?;
    }

    let mut report = BuildReport {
        records: records.len(),
        ..BuildReport::default()
    };
    let mut nodes: HashMap<String, HierarchyNode> = HashMap::with_capacity(records.len());
    let mut order = Vec::with_capacity(records.len());

    for record in records {
        if let Some(rules) = &config.rules
            && !rules.allowed.contains(&record.placetype)
        {
            report.filtered_placetypes += 1;
            continue;
        }
        if let Some(existing) = nodes.get_mut(&record.id) {
            if config.duplicates == DuplicatePolicy::Reject {
                return Err(HierarchyError::DuplicateId(record.id));
            }
            debug!(id = %record.id, "duplicate record id, keeping the later record");
            report.duplicates += 1;
            let children = std::mem::take(&mut existing.children);
            *existing = HierarchyNode {
                children,
                ..HierarchyNode::from_record(record)
            };
            continue;
        }
        order.push(record.id.clone());
        nodes.insert(record.id.clone(), HierarchyNode::from_record(record));
    }

    let mut links = Vec::with_capacity(order.len());
    for id in &order {
        let Some(node) = nodes.get(id) else {
            continue;
        };
        links.push((id.clone(), resolve_parent(node, &nodes, config, &mut report)));
    }

    let mut linked = HashSet::new();
    for (child, link) in &links {
        if let ParentLink::Linked(parent) = link
            && let Some(parent_node) = nodes.get_mut(parent)
        {
            parent_node.children.push(child.clone());
            linked.insert(child.as_str());
        }
    }
    report.linked = linked.len();

    let mut roots = Vec::new();
    for (id, link) in &links {
        if linked.contains(id.as_str()) {
            continue;
        }
        let is_root = match &config.rules {
            Some(rules) => nodes.get(id).is_some_and(|node| node.placetype == rules.root),
            None => matches!(link, ParentLink::Unresolved),
        };
        if is_root {
            roots.push(id.clone());
        } else {
            report.detached += 1;
        }
    }

    report.nodes = nodes.len();
    report.roots = roots.len();
    Ok(Hierarchy {
        nodes,
        roots,
        report,
    })
}

fn resolve_parent(
    node: &HierarchyNode,
    nodes: &HashMap<String, HierarchyNode>,
    config: &HierarchyConfig,
    report: &mut BuildReport,
) -> ParentLink {
    let Some(parent_id) = node.parent_id.as_deref() else {
        return ParentLink::Unresolved;
    };
    if parent_id == node.id {
        debug!(id = %node.id, "record names itself as parent");
        return ParentLink::Unresolved;
    }
    let Some(parent) = nodes.get(parent_id) else {
        report.missing_parents += 1;
        return ParentLink::Unresolved;
    };
    if let Some(rules) = &config.rules
        && !rules.permits(&parent.placetype, &node.placetype)
    {
        debug!(
            id = %node.id,
            parent = %parent_id,
            from = %parent.placetype,
            to = %node.placetype,
            "excluding record with a forbidden placetype transition"
        );
        report.disallowed_transitions += 1;
        return ParentLink::Disallowed;
    }
    ParentLink::Linked(parent_id.to_string())
}

impl Hierarchy {
    pub fn node(&self, id: &str) -> Option<&HierarchyNode> {
        self.nodes.get(id)
    }

    pub fn nodes_by_id(&self) -> &HashMap<String, HierarchyNode> {
        &self.nodes
    }

    pub fn roots(&self) -> &[String] {
        &self.roots
    }

    pub fn root_nodes(&self) -> impl Iterator<Item = &HierarchyNode> {
        self.roots.iter().filter_map(|id| self.nodes.get(id))
    }

    pub fn report(&self) -> &BuildReport {
        &self.report
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Walk every root in order.
    pub fn walk(&self) -> Walk<'_> {
        Walk::new(self, self.root_nodes())
    }

    /// Walk starting from explicit node ids; unknown ids are ignored.
    pub fn walk_from<'a>(&'a self, start: &[&str]) -> Walk<'a> {
        Walk::new(self, start.iter().filter_map(|id| self.nodes.get(*id)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalkEvent<'a> {
    Folder {
        path: String,
        node: &'a HierarchyNode,
    },
    Leaf {
        path: String,
        node: &'a HierarchyNode,
    },
}

impl<'a> WalkEvent<'a> {
    pub fn path(&self) -> &str {
        match self {
            Self::Folder { path, .. } | Self::Leaf { path, .. } => path,
        }
    }

    pub fn node(&self) -> &'a HierarchyNode {
        match self {
            Self::Folder { node, .. } | Self::Leaf { node, .. } => node,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Self::Leaf { .. })
    }
}

struct Frame<'a> {
    node: &'a HierarchyNode,
    path: String,
}

/// Folder names for one sibling group, in sibling order. The first node to
/// claim a sanitized name keeps it; later siblings whose names sanitize to
/// the same segment (compared case-insensitively) get their id appended.
fn sibling_segments(siblings: &[&HierarchyNode]) -> Vec<String> {
    let mut taken = HashSet::new();
    siblings
        .iter()
        .map(|node| {
            let plain = sanitize_segment(&node.name);
            let mut segment = plain.clone();
            while !taken.insert(segment.to_lowercase()) {
                segment = disambiguate_segment(&segment, &node.id);
            }
            if segment != plain {
                debug!(id = %node.id, %plain, %segment, "sibling folder name already taken");
            }
            segment
        })
        .collect()
}

fn frames<'a>(base: &str, siblings: &[&'a HierarchyNode]) -> Vec<Frame<'a>> {
    sibling_segments(siblings)
        .into_iter()
        .zip(siblings.iter().copied())
        .map(|(segment, node)| Frame {
            node,
            path: join_segment(base, &segment),
        })
        .collect()
}

/// Pre-order depth-first traversal driven by an explicit work-list.
///
/// Each node yields a `Folder` event and, when it has no children, a `Leaf`
/// event right after. Siblings never share a path. A node reached a second
/// time in the same walk is skipped along with its subtree, which keeps
/// malformed parent cycles finite.
pub struct Walk<'a> {
    hierarchy: &'a Hierarchy,
    stack: Vec<Frame<'a>>,
    visited: HashSet<&'a str>,
    pending_leaf: Option<WalkEvent<'a>>,
}

impl<'a> Walk<'a> {
    fn new<I>(hierarchy: &'a Hierarchy, start: I) -> Self
    where
        I: Iterator<Item = &'a HierarchyNode>,
    {
        let roots = start.collect::<Vec<_>>();
        let mut stack = frames("", &roots);
        stack.reverse();
        Self {
            hierarchy,
            stack,
            visited: HashSet::new(),
            pending_leaf: None,
        }
    }
}

impl<'a> Iterator for Walk<'a> {
    type Item = WalkEvent<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(leaf) = self.pending_leaf.take() {
            return Some(leaf);
        }

        while let Some(Frame { node, path }) = self.stack.pop() {
            if !self.visited.insert(node.id.as_str()) {
                debug!(id = %node.id, "skipping node already visited in this walk");
                continue;
            }
            if node.children.is_empty() {
                self.pending_leaf = Some(WalkEvent::Leaf {
                    path: path.clone(),
                    node,
                });
            } else {
                let children = node
                    .children
                    .iter()
                    .filter_map(|child| self.hierarchy.nodes.get(child))
                    .collect::<Vec<_>>();
                self.stack.extend(frames(&path, &children).into_iter().rev());
            }
            return Some(WalkEvent::Folder { path, node });
        }
        None
    }
}
