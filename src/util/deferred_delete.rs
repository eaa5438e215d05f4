//! A deletion queue holds objects that may still be referenced by in-flight GPU work and
//! drops them once enough frames have passed.

#[derive(Debug)]
struct Item<T> {
    value: T,
    // Time to live
    ttl: u32,
}

/// Queue of values destroyed after a fixed number of [`next_frame`](DeletionQueue::next_frame)
/// calls. Dropping the value performs the actual destruction, so the stored type's `Drop` must
/// be safe to run by the time the time-to-live expires. That safety is the caller's contract:
/// the queue itself never inspects GPU state.
#[derive(Debug)]
pub struct DeletionQueue<T> {
    max_ttl: u32,
    items: Vec<Item<T>>,
}

impl<T> DeletionQueue<T> {
    pub fn new(max_ttl: u32) -> DeletionQueue<T> {
        debug_assert!(max_ttl > 0);
        DeletionQueue {
            max_ttl,
            items: vec![],
        }
    }

    /// Pushes a value onto the deletion queue. Note that this moves out of the parameter so
    /// that you can't access an object after it is pushed.
    pub fn push(&mut self, value: T) {
        self.items.push(Item {
            value,
            ttl: self.max_ttl,
        });
    }

    /// Advance the frame counter by one, decreasing time to live by one on each element.
    /// If time to live of an element reaches zero, it is dropped.
    pub fn next_frame(&mut self) {
        self.items.iter_mut().for_each(|item| item.ttl -= 1);
        self.items.retain(|item| item.ttl != 0);
    }

    /// Drop every queued value immediately. Shutdown path: only sound once no GPU work can
    /// reference the queued objects.
    pub fn drain(&mut self) {
        self.items.clear();
    }

    /// Number of values still waiting for destruction.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the queue is currently empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;

    struct Tracked(Rc<Cell<u32>>);

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.0.set(self.0.get() + 1);
        }
    }

    #[test]
    fn value_lives_until_ttl_expires() {
        let drops = Rc::new(Cell::new(0));
        let mut queue = DeletionQueue::new(3);
        queue.push(Tracked(drops.clone()));
        queue.next_frame();
        queue.next_frame();
        assert_eq!(drops.get(), 0);
        queue.next_frame();
        assert_eq!(drops.get(), 1);
        assert!(queue.is_empty());
    }

    #[test]
    fn drain_drops_everything_at_once() {
        let drops = Rc::new(Cell::new(0));
        let mut queue = DeletionQueue::new(16);
        queue.push(Tracked(drops.clone()));
        queue.push(Tracked(drops.clone()));
        queue.drain();
        assert_eq!(drops.get(), 2);
    }
}
