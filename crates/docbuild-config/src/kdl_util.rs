//! Helper functions for extracting values from KDL nodes.

use crate::{ConfigError, ConfigResult};
use kdl::{KdlDocument, KdlNode};
use std::path::Path;

pub(crate) fn parse_file(path: &Path) -> ConfigResult<KdlDocument> {
    let text = std::fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
            ConfigError::NotFound(path.to_path_buf())
        }
        _ => ConfigError::Io(e),
    })?;
    text.parse::<KdlDocument>()
        .map_err(|source| ConfigError::Syntax {
            path: path.to_path_buf(),
            source,
        })
}

pub(crate) fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

pub(crate) fn get_all_string_args(node: &KdlNode) -> Vec<String> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .filter_map(|e| e.value().as_string())
        .map(|s| s.to_string())
        .collect()
}

pub(crate) fn get_first_int_arg(node: &KdlNode) -> Option<i128> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_integer())
}

pub(crate) fn get_first_bool_arg(node: &KdlNode) -> Option<bool> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_bool())
}

/// Child node `name` of `node`, if `node` has a children block.
pub(crate) fn child<'a>(node: &'a KdlNode, name: &str) -> Option<&'a KdlNode> {
    node.children()
        .and_then(|children| children.nodes().iter().find(|c| c.name().value() == name))
}

/// All string arguments of child `name`; empty if absent.
pub(crate) fn child_strings(node: &KdlNode, name: &str) -> Vec<String> {
    node.children()
        .map(|children| {
            children
                .nodes()
                .iter()
                .filter(|c| c.name().value() == name)
                .flat_map(get_all_string_args)
                .collect()
        })
        .unwrap_or_default()
}
