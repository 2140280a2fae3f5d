use serde::{Deserialize, Serialize};

// Handles are only meaningful for the tree that issued them. A removed
// node's slot may be handed out again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(usize);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigNode {
    pub name: String,
    pub cdata: Option<String>,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
}

// Arena backed, so parent links are plain handles.
#[derive(Debug, Clone, Default)]
pub struct ConfigTree {
    nodes: Vec<Option<ConfigNode>>,
    free: Vec<usize>,
}

impl ConfigTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_root(&mut self, name: &str) -> NodeId {
        self.push(name, None)
    }

    pub fn add_child(&mut self, parent: NodeId, name: &str) -> Result<NodeId, TreeError> {
        self.node(parent)?;
        let id = self.push(name, Some(parent));
        if let Some(node) = self.slot_mut(parent) {
            node.children.push(id);
        }
        Ok(id)
    }

    fn push(&mut self, name: &str, parent: Option<NodeId>) -> NodeId {
        let node = ConfigNode {
            name: name.to_string(),
            cdata: None,
            parent,
            children: Vec::new(),
        };
        match self.free.pop() {
            Some(slot) => {
                self.nodes[slot] = Some(node);
                NodeId(slot)
            }
            None => {
                self.nodes.push(Some(node));
                NodeId(self.nodes.len() - 1)
            }
        }
    }

    fn slot(&self, id: NodeId) -> Option<&ConfigNode> {
        self.nodes.get(id.0).and_then(Option::as_ref)
    }

    fn slot_mut(&mut self, id: NodeId) -> Option<&mut ConfigNode> {
        self.nodes.get_mut(id.0).and_then(Option::as_mut)
    }

    // Detach `id` from its parent and free it along with every descendant.
    pub fn remove_subtree(&mut self, id: NodeId) -> Result<usize, TreeError> {
        let parent = self.node(id)?.parent;
        if let Some(node) = parent.and_then(|p| self.slot_mut(p)) {
            node.children.retain(|c| *c != id);
        }

        let mut removed = 0;
        let mut pending = vec![id];
        while let Some(next) = pending.pop() {
            if let Some(node) = self.nodes.get_mut(next.0).and_then(Option::take) {
                pending.extend(node.children);
                self.free.push(next.0);
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub fn node(&self, id: NodeId) -> Result<&ConfigNode, TreeError> {
        self.slot(id).ok_or(TreeError::NoSuchNode(id.0))
    }

    pub fn name(&self, id: NodeId) -> Option<&str> {
        self.slot(id).map(|n| n.name.as_str())
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.slot(id).and_then(|n| n.parent)
    }

    pub fn cdata(&self, id: NodeId) -> Option<&str> {
        self.slot(id).and_then(|n| n.cdata.as_deref())
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.slot(id).map(|n| n.children.as_slice()).unwrap_or(&[])
    }

    pub fn set_cdata(&mut self, id: NodeId, value: &str) -> Result<(), TreeError> {
        let node = self.slot_mut(id).ok_or(TreeError::NoSuchNode(id.0))?;
        node.cdata = Some(value.to_string());
        Ok(())
    }

    pub fn child_by_name(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        self.children(parent)
            .iter()
            .copied()
            .find(|c| self.name(*c) == Some(name))
    }

    // Walk a slash separated path below `root`, creating missing elements.
    pub fn ensure_path(&mut self, root: NodeId, path: &str) -> Result<NodeId, TreeError> {
        let mut current = root;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current = match self.child_by_name(current, segment) {
                Some(existing) => existing,
                None => self.add_child(current, segment)?,
            };
        }
        Ok(current)
    }

    // Live nodes only.
    pub fn len(&self) -> usize {
        self.nodes.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TreeError {
    #[error("No such configuration node: #{0}")]
    NoSuchNode(usize),
}
