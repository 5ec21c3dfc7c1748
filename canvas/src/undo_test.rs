use std::cell::RefCell;
use std::rc::Rc;

use serde_json::json;

use super::*;

fn record(id: &str) -> UndoRecord {
    UndoRecord { id: id.into(), descriptor: json!({"type": "rect"}) }
}

fn recording_listener(stack: &mut UndoStack) -> Rc<RefCell<Vec<bool>>> {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    stack.set_listener(Box::new(move |can_undo| sink.borrow_mut().push(can_undo)));
    seen
}

#[test]
fn pop_returns_newest_first() {
    let mut stack = UndoStack::new();
    stack.push(record("a"));
    stack.push(record("b"));
    assert_eq!(stack.len(), 2);
    assert_eq!(stack.pop().map(|r| r.id), Some("b".to_owned()));
    assert_eq!(stack.pop().map(|r| r.id), Some("a".to_owned()));
    assert_eq!(stack.pop(), None);
    assert!(stack.is_empty());
}

#[test]
fn listener_is_told_immediately_and_on_change() {
    let mut stack = UndoStack::new();
    let seen = recording_listener(&mut stack);
    stack.push(record("a"));
    stack.pop();
    assert_eq!(*seen.borrow(), vec![false, true, false]);
}

#[test]
fn popping_empty_stack_does_not_notify() {
    let mut stack = UndoStack::new();
    let seen = recording_listener(&mut stack);
    assert!(stack.pop().is_none());
    assert_eq!(*seen.borrow(), vec![false]);
}

#[test]
fn clear_empties_and_notifies() {
    let mut stack = UndoStack::new();
    stack.push(record("a"));
    let seen = recording_listener(&mut stack);
    stack.clear();
    assert!(!stack.can_undo());
    assert_eq!(*seen.borrow(), vec![true, false]);
}

#[test]
fn debug_hides_listener() {
    let mut stack = UndoStack::new();
    stack.set_listener(Box::new(|_| {}));
    let text = format!("{stack:?}");
    assert!(text.contains("listener: true"));
}
