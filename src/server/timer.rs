//! Sorted expiry list for idle connection eviction.
//!
//! Entries live in a slab and are threaded into a doubly linked list in
//! ascending deadline order, so the earliest deadline is always at the head
//! and a sweep stops at the first entry that has not expired yet.

use std::time::{Duration, Instant};

/// Handle to an entry in an [`ExpiryList`].
///
/// Slots are reused, so a handle also carries the generation of the slot it
/// was issued for. Operations on a handle whose entry has been removed or
/// swept do nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId {
    index: usize,
    generation: u64,
}

#[derive(Debug)]
struct Slot<T> {
    generation: u64,
    deadline: Instant,
    prev: Option<usize>,
    next: Option<usize>,
    // None while the slot is on the free list
    data: Option<T>,
}

/// Time-ordered list of deadlines, each carrying a piece of data.
#[derive(Debug)]
pub struct ExpiryList<T> {
    slots: Vec<Slot<T>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
}

impl<T> Default for ExpiryList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ExpiryList<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Adds an entry expiring `timeout` from now.
    pub fn attach(&mut self, data: T, timeout: Duration) -> TimerId {
        self.attach_at(data, Instant::now() + timeout)
    }

    /// Adds an entry with an absolute deadline.
    ///
    /// The entry goes after any existing entries with the same deadline.
    pub fn attach_at(&mut self, data: T, deadline: Instant) -> TimerId {
        let index = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index];
                slot.deadline = deadline;
                slot.data = Some(data);
                index
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    deadline,
                    prev: None,
                    next: None,
                    data: Some(data),
                });
                self.slots.len() - 1
            }
        };
        self.link_from(index, self.head);
        self.len += 1;
        TimerId {
            index,
            generation: self.slots[index].generation,
        }
    }

    /// Pushes an entry's deadline to `timeout` from now.
    pub fn refresh(&mut self, id: TimerId, timeout: Duration) -> bool {
        self.refresh_at(id, Instant::now() + timeout)
    }

    /// Moves an entry to a new absolute deadline, keeping the list sorted.
    ///
    /// Returns `false` for a stale id.
    pub fn refresh_at(&mut self, id: TimerId, deadline: Instant) -> bool {
        if !self.contains(id) {
            return false;
        }
        let index = id.index;
        let prev = self.slots[index].prev;
        let next = self.slots[index].next;
        self.slots[index].deadline = deadline;

        if prev.is_some_and(|p| deadline < self.slots[p].deadline) {
            self.unlink(index);
            self.link_from(index, self.head);
            return true;
        }
        match next {
            Some(n) if self.slots[n].deadline <= deadline => {
                // Everything before the old successor is still earlier
                self.unlink(index);
                self.link_from(index, Some(n));
            }
            _ => {}
        }
        true
    }

    /// Unlinks an entry and returns its data. `None` for a stale id.
    pub fn remove(&mut self, id: TimerId) -> Option<T> {
        if !self.contains(id) {
            return None;
        }
        self.unlink(id.index);
        self.release(id.index)
    }

    /// Removes every entry whose deadline is at or before `now`, in deadline
    /// order, handing each one's data to `on_expire` after it is unlinked.
    ///
    /// Returns the number of entries removed.
    pub fn sweep<F>(&mut self, now: Instant, mut on_expire: F) -> usize
    where
        F: FnMut(T),
    {
        let mut expired = 0;
        while let Some(head) = self.head {
            if self.slots[head].deadline > now {
                break;
            }
            self.unlink(head);
            if let Some(data) = self.release(head) {
                on_expire(data);
                expired += 1;
            }
        }
        expired
    }

    pub fn deadline(&self, id: TimerId) -> Option<Instant> {
        self.contains(id).then(|| self.slots[id.index].deadline)
    }

    /// The earliest deadline in the list.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.head.map(|head| self.slots[head].deadline)
    }

    /// Entries in ascending deadline order.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            list: self,
            cursor: self.head,
        }
    }

    fn contains(&self, id: TimerId) -> bool {
        self.slots
            .get(id.index)
            .is_some_and(|slot| slot.generation == id.generation && slot.data.is_some())
    }

    /// Links an unlinked slot before the first entry, scanning from `start`,
    /// whose deadline is strictly later than its own.
    fn link_from(&mut self, index: usize, start: Option<usize>) {
        let deadline = self.slots[index].deadline;
        let mut cursor = start;
        while let Some(i) = cursor {
            if self.slots[i].deadline > deadline {
                break;
            }
            cursor = self.slots[i].next;
        }

        let prev = match cursor {
            Some(next) => {
                let prev = self.slots[next].prev;
                self.slots[next].prev = Some(index);
                prev
            }
            None => {
                let prev = self.tail;
                self.tail = Some(index);
                prev
            }
        };
        match prev {
            Some(p) => self.slots[p].next = Some(index),
            None => self.head = Some(index),
        }
        self.slots[index].prev = prev;
        self.slots[index].next = cursor;
    }

    fn unlink(&mut self, index: usize) {
        let prev = self.slots[index].prev.take();
        let next = self.slots[index].next.take();
        match prev {
            Some(p) => self.slots[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.slots[n].prev = prev,
            None => self.tail = prev,
        }
    }

    fn release(&mut self, index: usize) -> Option<T> {
        let slot = &mut self.slots[index];
        let data = slot.data.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(index);
        self.len -= 1;
        Some(data)
    }
}

/// Iterator over an [`ExpiryList`] in deadline order.
pub struct Iter<'a, T> {
    list: &'a ExpiryList<T>,
    cursor: Option<usize>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = (TimerId, Instant, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let index = self.cursor?;
            let slot = &self.list.slots[index];
            self.cursor = slot.next;
            if let Some(data) = slot.data.as_ref() {
                let id = TimerId {
                    index,
                    generation: slot.generation,
                };
                return Some((id, slot.deadline, data));
            }
        }
    }
}
