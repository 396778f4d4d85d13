//! Background completion driver.
//!
//! Waiters only sleep on a condition variable; nothing on their side moves a
//! pending operation forward. This driver runs on a dedicated thread, polls
//! the native handles of every descriptor with queued operations and resolves
//! whatever the backends can finish, then wakes the waiters.
//!
//! The poll is bounded by the configured interval. A timeout re-attempts every
//! watched descriptor, which picks up operations that were deferred because a
//! caller held one of their buffers.

use crate::engine::{Shared, Watch};
use crate::reactor::event::{Event, Interest};

use std::io;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::{self, JoinHandle};
use tracing::{trace, warn};

/// Starts the driver thread for `shared`.
pub(crate) fn spawn(shared: Arc<Shared>) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(shared.config.thread_name.clone())
        .spawn(move || run(&shared))
}

fn run(shared: &Shared) {
    let interval = shared.config.poll_interval;

    loop {
        if shared.shutdown.load(Ordering::Acquire) {
            break;
        }

        let watches = shared.state.lock().watches();

        // Slot 0 is the wake pipe.
        let mut events = Vec::with_capacity(watches.len() + 1);
        events.push(Event::new(shared.wake.read_fd(), Interest::READABLE));
        events.extend(
            watches
                .iter()
                .map(|watch| Event::new(watch.fd, watch.interest)),
        );

        let ready = match Event::wait(&mut events, Some(interval)) {
            Ok(ready) => ready,
            Err(err) => {
                warn!(error = %err, "driver poll failed");
                thread::sleep(interval);
                continue;
            }
        };

        if events[0].is_ready() {
            shared.wake.drain();
        }

        if shared.shutdown.load(Ordering::Acquire) {
            break;
        }

        let due: Vec<&Watch> = if ready == 0 {
            watches.iter().collect()
        } else {
            watches
                .iter()
                .zip(&events[1..])
                .filter(|(_, event)| event.is_ready())
                .map(|(watch, _)| watch)
                .collect()
        };

        if due.is_empty() {
            continue;
        }

        let resolved = {
            let mut state = shared.state.lock();
            due.iter()
                .map(|watch| state.progress(watch.qd, watch.epoch))
                .sum::<usize>()
        };

        if resolved > 0 {
            trace!(resolved, "driver resolved operations");
            shared.completed.notify_all();
        } else if ready > 0 {
            // Ready handles whose operations still cannot move are waiting on
            // caller-held buffers; polling again at once would spin.
            thread::sleep(interval);
        }
    }

    trace!("driver stopped");
}
