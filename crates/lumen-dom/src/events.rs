//! DOM Events
//!
//! Event listeners attached to nodes. Events bubble from the target to the
//! root of its subtree.

use crate::NodeId;
use std::rc::Rc;

/// Event listener callback
pub type Listener = Rc<dyn Fn(&Event) -> anyhow::Result<()>>;

/// Handle returned by `add_event_listener`, used to remove the listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub(crate) u64);

/// A dispatched event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Event type, e.g. `input` or `click`
    pub kind: String,
    /// Node the event was dispatched at
    pub target: NodeId,
}

impl Event {
    pub fn new(kind: &str, target: NodeId) -> Self {
        Self {
            kind: kind.to_string(),
            target,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::Dom;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_event_bubbles_to_ancestors() {
        let dom = Dom::new();
        let outer = dom.create_element("div");
        let button = dom.create_element("button");
        dom.append_child(outer, button).unwrap();

        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = seen.clone();
        dom.add_event_listener(outer, "click", Rc::new(move |e: &super::Event| -> anyhow::Result<()> {
            s.borrow_mut().push(("outer", e.target));
            Ok(())
        }));
        let s = seen.clone();
        dom.add_event_listener(button, "click", Rc::new(move |e: &super::Event| -> anyhow::Result<()> {
            s.borrow_mut().push(("button", e.target));
            Ok(())
        }));

        dom.dispatch_event(button, "click").unwrap();
        assert_eq!(*seen.borrow(), vec![("button", button), ("outer", button)]);
    }

    #[test]
    fn test_listener_may_mutate_tree() {
        let dom = Dom::new();
        let input = dom.create_element("input");
        let d = dom.clone();
        let id = dom.add_event_listener(input, "input", Rc::new(move |e: &super::Event| -> anyhow::Result<()> {
            d.set_attribute(e.target, "data-seen", "1")?;
            Ok(())
        }));
        dom.dispatch_event(input, "input").unwrap();
        assert_eq!(dom.get_attribute(input, "data-seen").as_deref(), Some("1"));

        assert!(dom.remove_event_listener(id));
        assert!(!dom.remove_event_listener(id));
    }
}
