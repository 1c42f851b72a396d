use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, channel::Channel};
use portable_atomic::{AtomicU32, Ordering};

/// A fixed-capacity FIFO between one producer and one consumer.
///
/// Sending never waits: when the mailbox is full the new item is dropped and
/// counted. Receiving waits until an item is available.
pub struct Mailbox<T, const N: usize> {
    channel: Channel<CriticalSectionRawMutex, T, N>,
    accepted: AtomicU32,
    dropped: AtomicU32,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "no-std", derive(defmt::Format))]
pub struct MailboxStatistics {
    pub accepted: u32,
    pub dropped: u32,
}

impl<T, const N: usize> Default for Mailbox<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize> Mailbox<T, N> {
    pub const fn new() -> Self {
        Self {
            channel: Channel::new(),
            accepted: AtomicU32::new(0),
            dropped: AtomicU32::new(0),
        }
    }

    /// Enqueues `item`, returning false if it was dropped because the mailbox is full.
    pub fn try_send(&self, item: T) -> bool {
        match self.channel.try_send(item) {
            Ok(()) => {
                self.accepted.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    pub async fn receive(&self) -> T {
        self.channel.receive().await
    }

    pub fn try_receive(&self) -> Option<T> {
        self.channel.try_receive().ok()
    }

    pub fn len(&self) -> usize {
        self.channel.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channel.is_empty()
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    pub fn statistics(&self) -> MailboxStatistics {
        MailboxStatistics {
            accepted: self.accepted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn overfill_never_blocks() {
        let mailbox = Mailbox::<u32, 4>::new();

        let accepted: usize = (0..10).map(|i| mailbox.try_send(i)).filter(|ok| *ok).count();
        assert_eq!(accepted, 4);
        assert_eq!(mailbox.len(), 4);
        assert_eq!(
            mailbox.statistics(),
            MailboxStatistics {
                accepted: 4,
                dropped: 6
            }
        );
    }

    #[test]
    fn retained_items_are_fifo() {
        let mailbox = Mailbox::<u32, 3>::new();
        for i in 0..5 {
            mailbox.try_send(i);
        }

        assert_eq!(mailbox.try_receive(), Some(0));
        assert_eq!(mailbox.try_receive(), Some(1));
        assert_eq!(mailbox.try_receive(), Some(2));
        assert_eq!(mailbox.try_receive(), None);
    }

    #[test]
    fn space_frees_after_receive() {
        let mailbox = Mailbox::<u32, 2>::new();
        assert!(mailbox.try_send(1));
        assert!(mailbox.try_send(2));
        assert!(!mailbox.try_send(3));

        assert_eq!(mailbox.try_receive(), Some(1));
        assert!(mailbox.try_send(4));

        assert_eq!(mailbox.try_receive(), Some(2));
        assert_eq!(mailbox.try_receive(), Some(4));
        assert!(mailbox.is_empty());
    }

    #[tokio::test]
    async fn receive_waits_for_item() {
        let mailbox = Mailbox::<u32, 2>::new();

        let producer = async {
            embassy_time::Timer::after_millis(10).await;
            mailbox.try_send(7);
        };

        let ((), item) = tokio::join!(producer, mailbox.receive());
        assert_eq!(item, 7);
    }
}
