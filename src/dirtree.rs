use std::collections::{BTreeSet, HashMap, HashSet};

use log::warn;
use serde::Serialize;

use crate::inode::InodeRecord;

pub const ROOT_INODE: u32 = 2;
pub const LOST_FOUND_INODE: u32 = 11;

/// One node of the reconstructed namespace. Children are identified by inode
/// number only; ownership stays in the flat table.
#[derive(Debug, Clone, Serialize)]
pub struct DirectoryNode {
    pub inode: u32,
    pub parent_inode: u32,
    pub name: String,
    pub is_directory: bool,
    pub children: BTreeSet<u32>,
}

/// Accumulates parent→child edges observed across journal transactions and
/// resolves inode numbers to paths. Nodes are never removed during a run.
#[derive(Debug, Default)]
pub struct DirectoryTreeBuilder {
    nodes: HashMap<u32, DirectoryNode>,
    by_parent_name: HashMap<(u32, String), u32>,
    path_cache: HashMap<u32, String>,
}

impl DirectoryTreeBuilder {
    pub fn new() -> Self {
        DirectoryTreeBuilder::default()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn get(&self, inode: u32) -> Option<&DirectoryNode> {
        self.nodes.get(&inode)
    }

    /// Record one directory entry. Self/parent entries and empty names are
    /// ignored. Any mutation drops the whole path cache: an edge change can
    /// move an entire subtree.
    pub fn add_entry(&mut self, dir_inode: u32, child_inode: u32, name: &str, is_dir: bool) {
        if child_inode == 0 || name.is_empty() || name == "." || name == ".." {
            return;
        }
        if name.contains('/') {
            warn!("Skipping directory entry with '/' in name: {:?}", name);
            return;
        }

        self.path_cache.clear();

        let parent = self
            .nodes
            .entry(dir_inode)
            .or_insert_with(|| DirectoryNode {
                inode: dir_inode,
                parent_inode: if dir_inode == ROOT_INODE { ROOT_INODE } else { 0 },
                name: String::new(),
                is_directory: true,
                children: BTreeSet::new(),
            });
        parent.is_directory = true;
        parent.children.insert(child_inode);

        let child = self
            .nodes
            .entry(child_inode)
            .or_insert_with(|| DirectoryNode {
                inode: child_inode,
                parent_inode: dir_inode,
                name: String::new(),
                is_directory: is_dir,
                children: BTreeSet::new(),
            });
        if child_inode == ROOT_INODE {
            // The root is its own parent, whatever the journal claims.
            child.parent_inode = ROOT_INODE;
        } else {
            child.parent_inode = dir_inode;
        }
        child.name = name.to_string();
        child.is_directory = is_dir;

        self.by_parent_name
            .insert((dir_inode, name.to_string()), child_inode);
    }

    /// Refine a node's directory bit from an inode observed in the journal.
    pub fn add_inode_info(&mut self, inode: u32, record: &InodeRecord) {
        if let Some(node) = self.nodes.get_mut(&inode) {
            node.is_directory = record.is_dir();
        }
    }

    pub fn lookup(&self, parent: u32, name: &str) -> Option<u32> {
        self.by_parent_name.get(&(parent, name.to_string())).copied()
    }

    /// Resolve an inode to an absolute path.
    ///
    /// Placeholders: `/unknown_inode_<n>` when the walk leaves the known
    /// table, `/cycle_detected_<n>` when parent pointers loop. The walk is
    /// iterative with a local visited set, so a cycle can never overflow
    /// the stack.
    pub fn build_full_path(&mut self, inode: u32) -> String {
        if let Some(cached) = self.path_cache.get(&inode) {
            return cached.clone();
        }

        let path = self.resolve_path(inode);
        self.path_cache.insert(inode, path.clone());
        path
    }

    fn resolve_path(&self, inode: u32) -> String {
        if inode == ROOT_INODE {
            return "/".to_string();
        }

        let mut components: Vec<String> = Vec::new();
        let mut visited: HashSet<u32> = HashSet::new();
        let mut current = inode;

        loop {
            if current == ROOT_INODE {
                break;
            }
            if !visited.insert(current) {
                warn!("Cycle detected while resolving inode {}", inode);
                return format!("/cycle_detected_{}", inode);
            }
            match self.nodes.get(&current) {
                Some(node) if !node.name.is_empty() && current != LOST_FOUND_INODE => {
                    components.push(node.name.clone());
                    current = node.parent_inode;
                }
                _ => {
                    // The walk left the observed namespace (or reached the
                    // well-known lost+found inode).
                    let prefix = if current == LOST_FOUND_INODE {
                        "/lost+found".to_string()
                    } else {
                        format!("/unknown_inode_{}", current)
                    };
                    return join_components(&prefix, &components);
                }
            }
        }

        join_components("", &components)
    }
}

fn join_components(prefix: &str, reversed_components: &[String]) -> String {
    let mut path = String::from(prefix);
    for component in reversed_components.iter().rev() {
        path.push('/');
        path.push_str(component);
    }
    if path.is_empty() {
        "/".to_string()
    } else {
        path
    }
}
