//! Inspectable, named view of an object graph built by MAP mode.

use std::collections::HashMap;
use std::fmt;

/// One node of a mapped object graph.
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectMap {
    /// A leaf holding a rendered primitive value.
    Fundamental { type_name: String, value: String },
    /// A node whose entries are named and kept in visit order.
    Container {
        type_name: String,
        entries: Vec<(String, ObjectMap)>,
    },
    /// A repeated sighting of a shared object; `target` is the path of the
    /// first sighting relative to the map root.
    Alias { target: String },
}

impl ObjectMap {
    pub fn type_name(&self) -> Option<&str> {
        match self {
            ObjectMap::Fundamental { type_name, .. } | ObjectMap::Container { type_name, .. } => {
                Some(type_name)
            }
            ObjectMap::Alias { .. } => None,
        }
    }

    /// Rendered value of a fundamental node.
    pub fn value(&self) -> Option<&str> {
        match self {
            ObjectMap::Fundamental { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn entries(&self) -> &[(String, ObjectMap)] {
        match self {
            ObjectMap::Container { entries, .. } => entries,
            _ => &[],
        }
    }

    /// Direct child named `name`.
    pub fn get(&self, name: &str) -> Option<&ObjectMap> {
        self.entries()
            .iter()
            .find(|(entry, _)| entry == name)
            .map(|(_, node)| node)
    }

    /// Follows a `/`-separated path of entry names.
    pub fn lookup(&self, path: &str) -> Option<&ObjectMap> {
        path.split('/')
            .filter(|segment| !segment.is_empty())
            .try_fold(self, |node, segment| node.get(segment))
    }

    fn write_tree(&self, f: &mut fmt::Formatter<'_>, name: &str, depth: usize) -> fmt::Result {
        let indent = "  ".repeat(depth);
        match self {
            ObjectMap::Fundamental { type_name, value } => {
                writeln!(f, "{indent}{name} ({type_name}) = {value}")
            }
            ObjectMap::Alias { target } => writeln!(f, "{indent}{name} -> {target}"),
            ObjectMap::Container { type_name, entries } => {
                writeln!(f, "{indent}{name} ({type_name})")?;
                for (child, node) in entries {
                    node.write_tree(f, child, depth + 1)?;
                }
                Ok(())
            }
        }
    }
}

impl fmt::Display for ObjectMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_tree(f, "/", 0)
    }
}

#[derive(Debug)]
struct Frame {
    name: String,
    type_name: String,
    value: Option<String>,
    alias: Option<String>,
    entries: Vec<(String, ObjectMap)>,
}

impl Frame {
    fn new(name: &str, type_name: &str) -> Self {
        Self {
            name: name.to_owned(),
            type_name: type_name.to_owned(),
            value: None,
            alias: None,
            entries: Vec::new(),
        }
    }

    fn into_node(self) -> (String, ObjectMap) {
        let node = match (self.alias, self.value) {
            (Some(target), _) => ObjectMap::Alias { target },
            (None, Some(value)) if self.entries.is_empty() => ObjectMap::Fundamental {
                type_name: self.type_name,
                value,
            },
            (None, _) => ObjectMap::Container {
                type_name: self.type_name,
                entries: self.entries,
            },
        };
        (self.name, node)
    }
}

/// Frame stack driven by [`crate::Serializer`] while in MAP mode.
#[derive(Debug, Default)]
pub(crate) struct ObjectMapBuilder {
    stack: Vec<Frame>,
    seen: HashMap<u64, String>,
}

impl ObjectMapBuilder {
    pub(crate) fn start(&mut self, root_name: &str) {
        self.stack.clear();
        self.seen.clear();
        self.stack.push(Frame::new(root_name, ""));
    }

    pub(crate) fn push(&mut self, name: &str, type_name: &str) {
        self.stack.push(Frame::new(name, type_name));
    }

    pub(crate) fn pop(&mut self) {
        // the root frame is only removed by finish()
        if self.stack.len() < 2 {
            return;
        }
        if let Some(frame) = self.stack.pop() {
            let entry = frame.into_node();
            if let Some(parent) = self.stack.last_mut() {
                parent.entries.push(entry);
            }
        }
    }

    pub(crate) fn set_value(&mut self, type_name: &str, value: String) {
        if let Some(top) = self.stack.last_mut() {
            top.type_name = type_name.to_owned();
            top.value = Some(value);
        }
    }

    pub(crate) fn set_type(&mut self, type_name: &str) {
        if let Some(top) = self.stack.last_mut() {
            top.type_name = type_name.to_owned();
        }
    }

    /// Records the current path as the first sighting of `token`, or returns
    /// the path of the earlier sighting.
    pub(crate) fn sighting(&mut self, token: u64) -> Option<String> {
        if let Some(path) = self.seen.get(&token) {
            return Some(path.clone());
        }
        let path = self.path();
        self.seen.insert(token, path);
        None
    }

    pub(crate) fn set_alias(&mut self, target: String) {
        if let Some(top) = self.stack.last_mut() {
            top.alias = Some(target);
        }
    }

    fn path(&self) -> String {
        let names: Vec<&str> = self
            .stack
            .iter()
            .skip(1)
            .map(|frame| frame.name.as_str())
            .collect();
        format!("/{}", names.join("/"))
    }

    pub(crate) fn finish(&mut self) -> Option<ObjectMap> {
        while self.stack.len() > 1 {
            self.pop();
        }
        self.seen.clear();
        self.stack.pop().map(|root| root.into_node().1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_fold_into_tree() {
        let mut builder = ObjectMapBuilder::default();
        builder.start("root");
        builder.push("count", "u32");
        builder.set_value("u32", "7".into());
        builder.pop();
        builder.push("inner", "Inner");
        builder.push("flag", "bool");
        builder.set_value("bool", "true".into());
        builder.pop();
        builder.pop();

        let map = builder.finish().unwrap();
        assert_eq!(map.lookup("count").and_then(ObjectMap::value), Some("7"));
        assert_eq!(map.lookup("inner/flag").and_then(ObjectMap::value), Some("true"));
        assert_eq!(map.get("inner").and_then(ObjectMap::type_name), Some("Inner"));
    }

    #[test]
    fn second_sighting_reports_first_path() {
        let mut builder = ObjectMapBuilder::default();
        builder.start("root");
        builder.push("a", "Node");
        assert_eq!(builder.sighting(0xbeef), None);
        builder.pop();
        builder.push("b", "Node");
        assert_eq!(builder.sighting(0xbeef).as_deref(), Some("/a"));
    }

    #[test]
    fn finish_without_start_yields_nothing() {
        let mut builder = ObjectMapBuilder::default();
        assert!(builder.finish().is_none());
    }

    #[test]
    fn display_renders_indented_tree() {
        let map = ObjectMap::Container {
            type_name: "Root".into(),
            entries: vec![(
                "x".into(),
                ObjectMap::Fundamental {
                    type_name: "i32".into(),
                    value: "-1".into(),
                },
            )],
        };
        assert_eq!(map.to_string(), "/ (Root)\n  x (i32) = -1\n");
    }
}
