//! Serial timed message queue
//!
//! Messages are posted from any thread with a delay and dispatched one at a
//! time, in due order, by whichever thread calls `wait_and_dispatch`. Pending
//! messages can be removed before they fire, which is how a scheduled tick is
//! cancelled.

use std::time::{ Duration, Instant };

use parking_lot::{ Condvar, Mutex };


struct Pending<M> {
    due: Instant,
    /// Posting order, breaks ties between messages due at the same instant
    seq: u64,
    message: M,
}


struct QueueState<M> {
    pending: Vec<Pending<M>>,
    next_seq: u64,
    closed: bool,
}


/// Timed message queue drained by a single dispatcher thread.
pub struct MessageQueue<M> {
    state: Mutex<QueueState<M>>,
    wake: Condvar,
}


impl<M> MessageQueue<M> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new( QueueState {
                pending: Vec::new(),
                next_seq: 0,
                closed: false,
            }),
            wake: Condvar::new(),
        }
    }


    /// Schedules `message` for dispatch after `delay`. Dropped if the queue
    /// has been shut down.
    pub fn post( &self, message: M, delay: Duration ) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        state.pending.push( Pending {
            due: Instant::now() + delay,
            seq,
            message,
        });

        self.wake.notify_one();
    }


    /// Removes every pending message matching `predicate`.
    ///
    /// Returns the number of messages removed.
    pub fn remove( &self, predicate: impl Fn( &M ) -> bool ) -> usize {
        let mut state = self.state.lock();
        let before = state.pending.len();
        state.pending.retain( |p| !predicate( &p.message ) );
        before - state.pending.len()
    }


    /// Number of messages waiting to be dispatched.
    pub fn len( &self ) -> usize {
        self.state.lock().pending.len()
    }


    pub fn is_empty( &self ) -> bool {
        self.len() == 0
    }


    /// Closes the queue: pending messages are dropped, later posts are
    /// ignored and the dispatcher is woken up.
    pub fn shutdown( &self ) {
        let mut state = self.state.lock();
        state.closed = true;
        state.pending.clear();
        self.wake.notify_all();
    }


    /// Blocks until the earliest message is due, then hands it to `handler`.
    ///
    /// The handler runs without the queue lock held, so it may post or remove
    /// messages. Returns false once the queue is shut down.
    pub fn wait_and_dispatch( &self, handler: impl FnOnce( M ) ) -> bool {
        let mut state = self.state.lock();

        loop {
            if state.closed {
                return false;
            }

            let next = state
                .pending
                .iter()
                .enumerate()
                .min_by_key( |( _, p )| ( p.due, p.seq ) )
                .map( |( index, p )| ( index, p.due ) );

            match next {
                None => {
                    self.wake.wait( &mut state );
                }
                Some( ( index, due ) ) if due <= Instant::now() => {
                    let pending = state.pending.swap_remove( index );
                    drop( state );
                    handler( pending.message );
                    return true;
                }
                Some( ( _, due ) ) => {
                    self.wake.wait_until( &mut state, due );
                }
            }
        }
    }
}


impl<M> Default for MessageQueue<M> {
    fn default() -> Self {
        Self::new()
    }
}


#[cfg( test )]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::thread;


    fn next( queue: &MessageQueue<u32> ) -> Option<u32> {
        let mut received = None;
        queue.wait_and_dispatch( |m| received = Some( m ) );
        received
    }


    #[test]
    fn test_dispatches_in_due_order() {
        let queue = MessageQueue::new();
        queue.post( 1, Duration::from_millis( 30 ) );
        queue.post( 2, Duration::ZERO );
        queue.post( 3, Duration::from_millis( 10 ) );

        assert_eq!( next( &queue ), Some( 2 ) );
        assert_eq!( next( &queue ), Some( 3 ) );
        assert_eq!( next( &queue ), Some( 1 ) );
        assert!( queue.is_empty() );
    }


    #[test]
    fn test_same_deadline_keeps_posting_order() {
        let queue = MessageQueue::new();
        for i in 0..5 {
            queue.post( i, Duration::ZERO );
        }
        // Zero-delay posts can land on the same Instant; seq decides.
        let order: Vec<_> = ( 0..5 ).filter_map( |_| next( &queue ) ).collect();
        assert_eq!( order, vec![ 0, 1, 2, 3, 4 ] );
    }


    #[test]
    fn test_waits_for_delay() {
        let queue = MessageQueue::new();
        let start = Instant::now();
        queue.post( 7, Duration::from_millis( 20 ) );

        assert_eq!( next( &queue ), Some( 7 ) );
        assert!( start.elapsed() >= Duration::from_millis( 20 ) );
    }


    #[test]
    fn test_remove_by_predicate() {
        let queue = MessageQueue::new();
        queue.post( 1, Duration::from_secs( 60 ) );
        queue.post( 2, Duration::ZERO );
        queue.post( 1, Duration::ZERO );

        assert_eq!( queue.remove( |m| *m == 1 ), 2 );
        assert_eq!( queue.len(), 1 );
        assert_eq!( next( &queue ), Some( 2 ) );
    }


    #[test]
    fn test_shutdown_wakes_waiter() {
        let queue = Arc::new( MessageQueue::<u32>::new() );
        let waiter = {
            let queue = Arc::clone( &queue );
            thread::spawn( move || queue.wait_and_dispatch( |_| {} ) )
        };

        thread::sleep( Duration::from_millis( 20 ) );
        queue.shutdown();

        assert!( !waiter.join().unwrap() );
    }


    #[test]
    fn test_post_after_shutdown_is_dropped() {
        let queue = MessageQueue::new();
        queue.post( 1, Duration::from_secs( 60 ) );
        queue.shutdown();
        queue.post( 2, Duration::ZERO );

        assert!( queue.is_empty() );
        assert!( !queue.wait_and_dispatch( |_| panic!( "dispatched after shutdown" ) ) );
    }
}
