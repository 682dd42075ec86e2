use crate::bindings::SlotId;
use crate::models::SelectOptions;
use serde_json::Value as SlotValue;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Static page structure. Input nodes own input slots named by their id,
/// output nodes own output slots.
#[derive(Debug, Clone)]
pub enum Node {
    Banner {
        title: String,
        image: Option<String>,
    },
    Heading(String),
    Dropdown {
        id: &'static str,
        options: SelectOptions,
        clearable: bool,
    },
    DatePicker {
        id: &'static str,
        placeholder: &'static str,
        default: Option<String>,
    },
    DateRange {
        start_id: &'static str,
        end_id: &'static str,
        start: Option<String>,
        end: Option<String>,
    },
    TimeInput {
        id: &'static str,
        default: Option<String>,
    },
    Divider,
    Text {
        id: &'static str,
    },
    Graph {
        id: &'static str,
    },
    Status,
    Section {
        title: Option<String>,
        children: Vec<Node>,
    },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LayoutError {
    #[error("slot '{0}' is bound but not on the page")]
    NotOnPage(SlotId),
    #[error("page slot '{0}' is not bound")]
    Unbound(SlotId),
}

#[derive(Debug, Clone)]
pub struct Layout {
    pub title: String,
    pub nodes: Vec<Node>,
}

impl Layout {
    /// Input slots with the value each starts with.
    pub fn defaults(&self) -> BTreeMap<SlotId, SlotValue> {
        let mut out = BTreeMap::new();
        walk(&self.nodes, &mut |node| {
            let mut put = |id: &str, value: Option<&String>| {
                let value = value.map(|v| SlotValue::String(v.clone())).unwrap_or(SlotValue::Null);
                out.insert(SlotId::from(id), value);
            };
            match node {
                Node::Dropdown { id, options, .. } => put(*id, options.default.as_ref()),
                Node::DatePicker { id, default, .. } | Node::TimeInput { id, default } => {
                    put(*id, default.as_ref())
                }
                Node::DateRange {
                    start_id,
                    end_id,
                    start,
                    end,
                } => {
                    put(*start_id, start.as_ref());
                    put(*end_id, end.as_ref());
                }
                _ => {}
            }
        });
        out
    }

    pub fn input_slots(&self) -> BTreeSet<SlotId> {
        self.defaults().into_keys().collect()
    }

    pub fn output_slots(&self) -> BTreeSet<SlotId> {
        let mut out = BTreeSet::new();
        walk(&self.nodes, &mut |node| {
            if let Node::Text { id } | Node::Graph { id } = node {
                out.insert(SlotId::from(*id));
            }
        });
        out
    }

    /// Every slot the bindings use must be on the page and every page slot
    /// must be bound.
    pub fn check(&self, inputs: &BTreeSet<SlotId>, outputs: &BTreeSet<SlotId>) -> Result<(), LayoutError> {
        for (declared, on_page) in [(inputs, self.input_slots()), (outputs, self.output_slots())] {
            if let Some(slot) = declared.difference(&on_page).next() {
                return Err(LayoutError::NotOnPage(slot.clone()));
            }
            if let Some(slot) = on_page.difference(declared).next() {
                return Err(LayoutError::Unbound(slot.clone()));
            }
        }
        Ok(())
    }
}

fn walk<'a>(nodes: &'a [Node], visit: &mut dyn FnMut(&'a Node)) {
    for node in nodes {
        visit(node);
        if let Node::Section { children, .. } = node {
            walk(children, visit);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> Layout {
        Layout {
            title: "Test".into(),
            nodes: vec![
                Node::Heading("Pick".into()),
                Node::Dropdown {
                    id: "site",
                    options: SelectOptions {
                        options: Vec::new(),
                        default: Some("north".into()),
                    },
                    clearable: false,
                },
                Node::Section {
                    title: None,
                    children: vec![
                        Node::DateRange {
                            start_id: "start",
                            end_id: "end",
                            start: Some("2024-01-01".into()),
                            end: None,
                        },
                        Node::Graph { id: "graph" },
                    ],
                },
                Node::Text { id: "summary" },
            ],
        }
    }

    #[test]
    fn slots_come_from_nested_nodes() {
        let layout = layout();
        let defaults = layout.defaults();
        assert_eq!(defaults[&SlotId::from("site")], SlotValue::from("north"));
        assert_eq!(defaults[&SlotId::from("end")], SlotValue::Null);
        assert_eq!(layout.input_slots().len(), 3);
        assert_eq!(
            layout.output_slots(),
            BTreeSet::from([SlotId::from("graph"), SlotId::from("summary")])
        );
    }

    #[test]
    fn check_finds_missing_and_unbound_slots() {
        let layout = layout();
        let inputs = layout.input_slots();
        let mut outputs = BTreeSet::from([SlotId::from("graph")]);
        assert_eq!(
            layout.check(&inputs, &outputs),
            Err(LayoutError::Unbound(SlotId::from("summary")))
        );
        outputs.insert(SlotId::from("summary"));
        outputs.insert(SlotId::from("extra"));
        assert_eq!(
            layout.check(&inputs, &outputs),
            Err(LayoutError::NotOnPage(SlotId::from("extra")))
        );
    }
}
