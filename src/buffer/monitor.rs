//! Change detection for [`BufferData`](super::BufferData).

use std::fmt;
use std::ops::Range;
use std::rc::Rc;

use bytemuck::Pod;

/// Subscriber invoked with the full buffer contents and the element range
/// that changed.
pub type ChangeCallback<T> = Rc<dyn Fn(&[T], Range<usize>)>;

/// Compares written windows against a shadow copy and notifies subscribers
/// when a window actually changed.
///
/// The shadow is only maintained while at least one subscriber is
/// registered; the first subscription resynchronizes it from the buffer.
pub struct ChangeMonitor<T: Pod> {
    shadow: Vec<T>,
    subscribers: Vec<ChangeCallback<T>>,
}

impl<T: Pod> Default for ChangeMonitor<T> {
    fn default() -> Self {
        Self {
            shadow: Vec::new(),
            subscribers: Vec::new(),
        }
    }
}

impl<T: Pod> fmt::Debug for ChangeMonitor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeMonitor")
            .field("shadow_len", &self.shadow.len())
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

impl<T: Pod> ChangeMonitor<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    #[must_use]
    pub fn has_subscribers(&self) -> bool {
        !self.subscribers.is_empty()
    }

    #[inline]
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Registers `callback`. Returns `false` if the same callback is
    /// already registered.
    pub fn subscribe(&mut self, callback: ChangeCallback<T>, current: &[T]) -> bool {
        if self.subscribers.iter().any(|s| Rc::ptr_eq(s, &callback)) {
            return false;
        }
        if self.subscribers.is_empty() {
            self.shadow.clear();
            self.shadow.extend_from_slice(current);
        }
        self.subscribers.push(callback);
        true
    }

    /// Removes `callback`, or every subscriber when `None`.
    /// Returns the number of subscribers removed.
    pub fn unsubscribe(&mut self, callback: Option<&ChangeCallback<T>>) -> usize {
        let before = self.subscribers.len();
        match callback {
            Some(callback) => self.subscribers.retain(|s| !Rc::ptr_eq(s, callback)),
            None => self.subscribers.clear(),
        }
        if self.subscribers.is_empty() {
            self.shadow = Vec::new();
        }
        before - self.subscribers.len()
    }

    /// Compares `data[range]` with the shadow. When subscribers exist and the
    /// window differs, the shadow is updated and every subscriber is called
    /// in registration order. Returns whether a dispatch happened.
    pub fn check(&mut self, data: &[T], range: Range<usize>) -> bool {
        if self.subscribers.is_empty() || range.is_empty() {
            return false;
        }
        if self.shadow.len() != data.len() {
            self.shadow.resize(data.len(), T::zeroed());
        }

        let current = &data[range.clone()];
        let shadow = &mut self.shadow[range.clone()];
        if bytemuck::cast_slice::<T, u8>(current) == bytemuck::cast_slice::<T, u8>(shadow) {
            return false;
        }
        shadow.copy_from_slice(current);

        for subscriber in &self.subscribers {
            subscriber(data, range.clone());
        }
        true
    }
}
