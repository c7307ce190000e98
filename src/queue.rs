//! Bounded FIFO of pending switch commands.
//!
//! The queue sits between the broker transport (producer) and the switch
//! engine (consumer). Both run in the same cooperative loop, so no locking
//! is needed.
//!
//! When the backend floods the device, the oldest command is dropped so the
//! most recent intent survives:
//!
//! ```rust
//! use relay_bank::queue::CommandQueue;
//! use relay_bank::commands::{Command, Desired, Target};
//!
//! let mut queue: CommandQueue<2> = CommandQueue::new();
//! assert!(queue.offer(Command::remote(Target::Switch(0), Desired::On, 0)));
//! assert!(queue.offer(Command::remote(Target::Switch(1), Desired::On, 1)));
//! assert!(!queue.offer(Command::remote(Target::Switch(2), Desired::On, 2)));
//!
//! let evicted = queue.offer_evicting(Command::remote(Target::Switch(2), Desired::On, 2));
//! assert_eq!(evicted.map(|c| c.enqueued_at), Some(0));
//! assert_eq!(queue.poll().map(|c| c.enqueued_at), Some(1));
//! ```

use crate::commands::Command;
use heapless::Deque;

/// Command queue with first-in, first-out ordering.
///
/// # Capacity
///
/// The queue has a fixed capacity `N` (const generic). When full:
/// - [`offer`](Self::offer) rejects the new command
/// - [`offer_evicting`](Self::offer_evicting) drops the oldest command to make room
pub struct CommandQueue<const N: usize> {
    ring: Deque<Command, N>,
}

impl<const N: usize> CommandQueue<N> {
    /// Creates a new empty command queue with capacity N.
    pub const fn new() -> Self {
        Self { ring: Deque::new() }
    }

    /// Append a command.
    ///
    /// Returns `false` without modifying the queue if it is full.
    #[must_use]
    pub fn offer(&mut self, cmd: Command) -> bool {
        self.ring.push_back(cmd).is_ok()
    }

    /// Append a command, dropping the oldest queued command if full.
    ///
    /// Returns the evicted command, if any.
    pub fn offer_evicting(&mut self, cmd: Command) -> Option<Command> {
        let mut evicted = None;
        if self.ring.is_full() {
            evicted = self.ring.pop_front();
        }
        if self.offer(cmd) {
            evicted
        } else {
            // Zero-capacity queue; the new command is the one dropped
            Some(cmd)
        }
    }

    /// Remove and return the oldest command.
    pub fn poll(&mut self) -> Option<Command> {
        self.ring.pop_front()
    }

    /// Peek at the oldest command without removing it.
    pub fn peek(&self) -> Option<&Command> {
        self.ring.front()
    }

    /// Clear all commands.
    pub fn clear(&mut self) {
        self.ring.clear();
    }

    /// Returns the number of commands in the queue.
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// Returns true if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Returns true if the queue is at capacity.
    pub fn is_full(&self) -> bool {
        self.ring.is_full()
    }

    /// Maximum number of queued commands.
    pub const fn capacity(&self) -> usize {
        N
    }
}

impl<const N: usize> Default for CommandQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================
