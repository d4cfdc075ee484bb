//! Reactive Buffer Tests
//!
//! Tests for:
//! - BufferData: dispatch order, targeted unsubscribe, non-float element types
//! - ChangeMonitor: shadow resync when the first subscriber arrives

use std::cell::RefCell;
use std::ops::Range;
use std::rc::Rc;

use sigil::buffer::{BufferData, ChangeCallback, ChangeMonitor};

type Log = Rc<RefCell<Vec<(&'static str, Range<usize>)>>>;

fn tagged<T: bytemuck::Pod>(tag: &'static str, log: &Log) -> ChangeCallback<T> {
    let sink = Rc::clone(log);
    Rc::new(move |_data: &[T], range: Range<usize>| sink.borrow_mut().push((tag, range)))
}

#[test]
fn subscribers_run_in_registration_order() {
    let log: Log = Rc::default();
    let mut buffer = BufferData::<f32>::new(4);
    buffer.subscribe(tagged("first", &log));
    buffer.subscribe(tagged("second", &log));

    buffer.set_at(3, 1.0).unwrap();
    assert_eq!(*log.borrow(), vec![("first", 3..4), ("second", 3..4)]);
}

#[test]
fn unsubscribe_removes_only_the_given_callback() {
    let log: Log = Rc::default();
    let mut buffer = BufferData::<u32>::new(4);
    let a = tagged("a", &log);
    let b = tagged("b", &log);
    buffer.subscribe(Rc::clone(&a));
    buffer.subscribe(b);

    assert_eq!(buffer.unsubscribe(Some(&a)), 1);
    assert!(buffer.has_subscribers());
    buffer.fill(7, 0..4).unwrap();
    assert_eq!(*log.borrow(), vec![("b", 0..4)]);
}

#[test]
fn subscribers_see_the_written_data() {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    let mut buffer = BufferData::<f32>::new(3);
    buffer.subscribe(Rc::new(move |data: &[f32], range: Range<usize>| {
        sink.borrow_mut().extend_from_slice(&data[range]);
    }));

    buffer.set(&[4.0, 5.0], 1).unwrap();
    assert_eq!(*seen.borrow(), vec![4.0, 5.0]);
}

#[test]
fn rewriting_identical_bytes_is_silent() {
    let log: Log = Rc::default();
    let mut buffer = BufferData::from_vec(vec![1.0f32, 2.0, 3.0]);
    buffer.subscribe(tagged("x", &log));

    assert!(!buffer.set(&[1.0, 2.0, 3.0], 0).unwrap());
    assert!(!buffer.fill(2.0, 1..2).unwrap());
    assert!(log.borrow().is_empty());
}

#[test]
fn monitor_resyncs_shadow_for_first_subscriber() {
    let log: Log = Rc::default();
    let mut monitor = ChangeMonitor::<f32>::new();
    let data = vec![9.0f32, 9.0];

    assert!(!monitor.check(&data, 0..2));
    assert!(monitor.subscribe(tagged("m", &log), &data));
    assert!(!monitor.check(&data, 0..2));

    let changed = vec![9.0f32, 1.0];
    assert!(monitor.check(&changed, 0..2));
    assert_eq!(monitor.subscriber_count(), 1);
    assert_eq!(*log.borrow(), vec![("m", 0..2)]);
}
