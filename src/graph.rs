//! Folder/file graph of an ingested repository.
//!
//! Every path prefix becomes a node (`folder` for inner segments, `file`
//! for the last one) hanging off a single `ROOT` node named after the
//! repository. Node ids are the normalized path prefixes, the same form
//! used for answer attribution, so a client can jump from an answer to
//! its node.

use serde::Serialize;
use std::collections::HashSet;

use crate::models::RepoFile;
use crate::walker::normalize_relative;

pub const ROOT_ID: &str = "ROOT";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphNodeKind {
    Root,
    Folder,
    File,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphNode {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: GraphNodeKind,
    pub label: String,
    /// File record id; only set on file nodes.
    pub db_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphEdge {
    pub id: String,
    pub source: String,
    pub target: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FileGraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

/// Build the graph for `files`, keeping first-seen order.
pub fn build_file_graph(repo_name: &str, files: &[RepoFile]) -> FileGraph {
    let mut graph = FileGraph::default();
    let mut seen_nodes = HashSet::new();
    let mut seen_edges = HashSet::new();

    graph.nodes.push(GraphNode {
        id: ROOT_ID.to_string(),
        kind: GraphNodeKind::Root,
        label: repo_name.to_string(),
        db_id: None,
    });
    seen_nodes.insert(ROOT_ID.to_string());

    for file in files {
        let path = normalize_relative(&file.file_path);
        let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
        let mut current = String::new();

        for (index, part) in parts.iter().enumerate() {
            let parent = if current.is_empty() {
                ROOT_ID.to_string()
            } else {
                current.clone()
            };
            if !current.is_empty() {
                current.push('/');
            }
            current.push_str(part);
            let is_file = index == parts.len() - 1;

            if seen_nodes.insert(current.clone()) {
                graph.nodes.push(GraphNode {
                    id: current.clone(),
                    kind: if is_file {
                        GraphNodeKind::File
                    } else {
                        GraphNodeKind::Folder
                    },
                    label: part.to_string(),
                    db_id: is_file.then(|| file.id.clone()),
                });
            }

            let edge_id = format!("e-{}-{}", parent, current);
            if seen_edges.insert(edge_id.clone()) {
                graph.edges.push(GraphEdge {
                    id: edge_id,
                    source: parent,
                    target: current.clone(),
                });
            }
        }
    }

    graph
}
