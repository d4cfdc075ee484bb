//! Reactive Buffer
//!
//! [`BufferData`] is a fixed-length numeric container. Every notifying
//! mutation compares the written window against a shadow copy held by its
//! [`ChangeMonitor`] and, only if something actually changed and someone is
//! listening, calls each subscriber with the element range that changed.
//!
//! # Silent writes
//!
//! The `*_silent` methods skip comparison, shadow update and dispatch
//! entirely. They are meant for batched hot paths that follow up with a
//! single [`BufferData::notify`] over the whole batch. Any other caller
//! should use the notifying variant, otherwise subscribers such as the
//! upload path of a uniform set never learn about the write.

mod monitor;

use std::ops::Range;

use bytemuck::Pod;

use crate::errors::{Result, SigilError};

pub use monitor::{ChangeCallback, ChangeMonitor};

#[derive(Debug)]
pub struct BufferData<T: Pod> {
    data: Vec<T>,
    monitor: ChangeMonitor<T>,
}

impl<T: Pod> BufferData<T> {
    /// Zero-filled buffer of `len` elements.
    #[must_use]
    pub fn new(len: usize) -> Self {
        Self::from_vec(vec![T::zeroed(); len])
    }

    #[must_use]
    pub fn from_vec(data: Vec<T>) -> Self {
        Self {
            data,
            monitor: ChangeMonitor::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.data)
    }

    #[inline]
    #[must_use]
    pub fn get(&self, index: usize) -> Option<T> {
        self.data.get(index).copied()
    }

    #[must_use]
    pub fn window(&self, range: Range<usize>) -> Option<&[T]> {
        self.data.get(range)
    }

    // ========================================================================
    // Notifying mutation
    // ========================================================================

    /// Writes `values` starting at element `offset`.
    ///
    /// Returns `Ok(true)` when subscribers were notified.
    pub fn set(&mut self, values: &[T], offset: usize) -> Result<bool> {
        let range = self.set_silent(values, offset)?;
        Ok(self.monitor.check(&self.data, range))
    }

    pub fn set_at(&mut self, index: usize, value: T) -> Result<bool> {
        self.set(std::slice::from_ref(&value), index)
    }

    /// Fills `range` with `value`.
    pub fn fill(&mut self, value: T, range: Range<usize>) -> Result<bool> {
        self.fill_silent(value, range.clone())?;
        Ok(self.monitor.check(&self.data, range))
    }

    /// Copies the elements in `src` so they start at `dest`.
    pub fn copy_within(&mut self, src: Range<usize>, dest: usize) -> Result<bool> {
        let range = self.copy_within_silent(src, dest)?;
        Ok(self.monitor.check(&self.data, range))
    }

    /// Runs change detection over `range` without writing, typically after a
    /// batch of silent writes.
    pub fn notify(&mut self, range: Range<usize>) -> Result<bool> {
        self.check_range(&range)?;
        Ok(self.monitor.check(&self.data, range))
    }

    // ========================================================================
    // Silent mutation
    // ========================================================================

    /// Writes without change detection. Returns the written element range.
    pub fn set_silent(&mut self, values: &[T], offset: usize) -> Result<Range<usize>> {
        let range = offset..offset.saturating_add(values.len());
        self.check_range(&range)?;
        self.data[range.clone()].copy_from_slice(values);
        Ok(range)
    }

    pub fn fill_silent(&mut self, value: T, range: Range<usize>) -> Result<()> {
        self.check_range(&range)?;
        self.data[range].fill(value);
        Ok(())
    }

    pub fn copy_within_silent(&mut self, src: Range<usize>, dest: usize) -> Result<Range<usize>> {
        self.check_range(&src)?;
        let range = dest..dest.saturating_add(src.len());
        self.check_range(&range)?;
        self.data.copy_within(src, dest);
        Ok(range)
    }

    // ========================================================================
    // Subscription
    // ========================================================================

    /// Subscribes `callback`. Subscribing the same callback twice is a no-op
    /// and returns `false`.
    pub fn subscribe(&mut self, callback: ChangeCallback<T>) -> bool {
        self.monitor.subscribe(callback, &self.data)
    }

    /// Unsubscribes `callback`, or every subscriber when `None`.
    pub fn unsubscribe(&mut self, callback: Option<&ChangeCallback<T>>) -> usize {
        self.monitor.unsubscribe(callback)
    }

    #[inline]
    #[must_use]
    pub fn has_subscribers(&self) -> bool {
        self.monitor.has_subscribers()
    }

    fn check_range(&self, range: &Range<usize>) -> Result<()> {
        if range.start > range.end || range.end > self.data.len() {
            return Err(SigilError::CapacityExceeded {
                what: format!("buffer window {}..{}", range.start, range.end),
                capacity: self.data.len(),
            });
        }
        Ok(())
    }
}
