// Real-time result feed: producer thread → render thread.
//
// A bounded, lock-free single-producer/single-consumer ring (`rtrb`) of
// `Arc<ResolutionResult>`. Neither side ever blocks:
//
// - `FeedProducer::offer` drops the result when the ring is full and counts
//   the drop. The producer is expected to run ahead of the renderer, so a
//   full ring just means it is far enough ahead.
// - `FeedConsumer::next_for_render` drains everything available and keeps
//   the newest. If nothing new arrived it repeats the last result and counts
//   an underrun, so the renderer always has something to play once the first
//   result is in.
//
// Only `Arc` clones and drops happen on the render side. The final drop of a
// result happens on whichever side releases it last.

use concord_core::ResolutionResult;
use rtrb::{Consumer, Producer, RingBuffer};
use std::sync::Arc;
use tracing::trace;

pub fn result_feed(capacity: usize) -> (FeedProducer, FeedConsumer) {
    let (producer, consumer) = RingBuffer::new(capacity.max(1));
    (
        FeedProducer { producer, dropped: 0 },
        FeedConsumer {
            consumer,
            last: None,
            underruns: 0,
        },
    )
}

pub struct FeedProducer {
    producer: Producer<Arc<ResolutionResult>>,
    dropped: u64,
}

impl FeedProducer {
    /// Hand a result over. Returns `false` (and counts a drop) when full.
    pub fn offer(&mut self, result: Arc<ResolutionResult>) -> bool {
        match self.producer.push(result) {
            Ok(()) => true,
            Err(_) => {
                self.dropped += 1;
                trace!(dropped = self.dropped, "feed full; result dropped");
                false
            }
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

pub struct FeedConsumer {
    consumer: Consumer<Arc<ResolutionResult>>,
    last: Option<Arc<ResolutionResult>>,
    underruns: u64,
}

impl FeedConsumer {
    /// The newest available result, or the last one again on underrun.
    /// `None` only before the first result has arrived.
    pub fn next_for_render(&mut self) -> Option<Arc<ResolutionResult>> {
        let mut fresh = false;
        while let Ok(result) = self.consumer.pop() {
            self.last = Some(result);
            fresh = true;
        }
        if !fresh && self.last.is_some() {
            self.underruns += 1;
        }
        self.last.clone()
    }

    pub fn underruns(&self) -> u64 {
        self.underruns
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use concord_core::{ConstraintRegistry, DependencyGraph, EngineConfig, Session, VarDecl};

    fn session() -> Session {
        let mut g = DependencyGraph::new(Arc::new(ConstraintRegistry::with_builtins()));
        g.add_variable(VarDecl::int_range("x", 0, 3)).unwrap();
        Session::new(g, EngineConfig::default())
    }

    #[test]
    fn drops_when_full_and_repeats_on_underrun() {
        let mut s = session();
        let (mut tx, mut rx) = result_feed(2);
        assert!(rx.next_for_render().is_none());
        assert_eq!(rx.underruns(), 0);

        assert!(tx.offer(s.advance().unwrap()));
        assert!(tx.offer(s.advance().unwrap()));
        assert!(!tx.offer(s.advance().unwrap()));
        assert_eq!(tx.dropped(), 1);

        // Newest available wins.
        assert_eq!(rx.next_for_render().unwrap().step(), 2);
        // Nothing new: repeat.
        assert_eq!(rx.next_for_render().unwrap().step(), 2);
        assert_eq!(rx.underruns(), 1);

        assert!(tx.offer(s.advance().unwrap()));
        assert_eq!(rx.next_for_render().unwrap().step(), 4);
        assert_eq!(rx.underruns(), 1);
    }

    #[test]
    fn works_across_threads() {
        let (mut tx, mut rx) = result_feed(4);
        let producer = std::thread::spawn(move || {
            let mut s = session();
            for _ in 0..100 {
                while !tx.offer(s.advance().unwrap()) {
                    std::thread::yield_now();
                }
            }
        });
        let mut last_step = 0;
        while last_step < 100 {
            if let Some(r) = rx.next_for_render() {
                assert!(r.step() >= last_step);
                last_step = r.step();
            }
        }
        producer.join().unwrap();
    }
}
