use std::io;
use std::time::{Duration, Instant};

use crossterm::event::{Event, EventStream, KeyEvent};
use futures::{Stream, StreamExt};
use log::warn;
use tokio::sync::mpsc;
use tokio::time::{self, Interval, MissedTickBehavior};

use super::message::LinkEvent;

/// Status refresh rate (~20 FPS).
const TICK: Duration = Duration::from_millis(50);

/// Unified application event.
#[derive(Debug)]
pub enum AppEvent {
    Key(KeyEvent),
    Link(LinkEvent),
    Tick,
    Resize(u16, u16),
    /// Foreground work (a reconnect attempt, a data handler) is due.
    Foreground,
}

enum Wake {
    Terminal(Option<io::Result<Event>>),
    Link(Option<LinkEvent>),
    Tick,
    Deadline,
}

/// Waits on terminal input, link events, the tick timer and the foreground
/// queue's next deadline, whichever comes first.
pub struct EventHandler<S = EventStream> {
    terminal: S,
    link_rx: mpsc::UnboundedReceiver<LinkEvent>,
    tick: Interval,
    terminal_open: bool,
    link_open: bool,
}

impl EventHandler {
    pub fn new(link_rx: mpsc::UnboundedReceiver<LinkEvent>) -> Self {
        Self::with_terminal(EventStream::new(), link_rx)
    }
}

impl<S> EventHandler<S>
where
    S: Stream<Item = io::Result<Event>> + Unpin,
{
    pub fn with_terminal(terminal: S, link_rx: mpsc::UnboundedReceiver<LinkEvent>) -> Self {
        let mut tick = time::interval_at(time::Instant::now() + TICK, TICK);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self {
            terminal,
            link_rx,
            tick,
            terminal_open: true,
            link_open: true,
        }
    }

    /// Wait for the next event. `wake_at` is the foreground queue's next
    /// deadline; reaching it yields [`AppEvent::Foreground`].
    pub async fn next(&mut self, wake_at: Option<Instant>) -> AppEvent {
        loop {
            let deadline = async {
                match wake_at {
                    Some(at) => time::sleep_until(time::Instant::from_std(at)).await,
                    None => std::future::pending::<()>().await,
                }
            };

            let wake = tokio::select! {
                event = self.terminal.next(), if self.terminal_open => Wake::Terminal(event),
                event = self.link_rx.recv(), if self.link_open => Wake::Link(event),
                _ = self.tick.tick() => Wake::Tick,
                () = deadline => Wake::Deadline,
            };

            match wake {
                Wake::Terminal(Some(Ok(Event::Key(key)))) => return AppEvent::Key(key),
                Wake::Terminal(Some(Ok(Event::Resize(w, h)))) => return AppEvent::Resize(w, h),
                Wake::Terminal(Some(Ok(_))) => {}
                Wake::Terminal(Some(Err(e))) => {
                    warn!("terminal event stream failed: {e}");
                    self.terminal_open = false;
                }
                Wake::Terminal(None) => self.terminal_open = false,
                Wake::Link(Some(event)) => return AppEvent::Link(event),
                Wake::Link(None) => self.link_open = false,
                Wake::Tick => return AppEvent::Tick,
                Wake::Deadline => return AppEvent::Foreground,
            }
        }
    }
}
