use std::collections::VecDeque;
use std::time::Instant;

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use log::info;

use serlink_core::{Line, SerialLink, WriteStatus};

use super::message::LinkEvent;

/// Number of received lines kept for display.
pub const SCROLLBACK: usize = 1000;

/// Who produced a scrollback entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Rx,
    Tx,
}

/// One scrollback entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub direction: Direction,
    pub text: String,
    /// Received bytes were not valid UTF-8.
    pub undecodable: bool,
}

/// Application state.
pub struct App {
    pub scrollback: VecDeque<Entry>,
    pub input: String,
    pub connected: bool,
    pub device: String,
    pub baud_rate: u32,
    pub rx_lines: u64,
    pub tx_lines: u64,
    /// Last status or warning message and when it was set.
    pub status: Option<(Instant, String)>,
    pub should_quit: bool,

    link: SerialLink,
}

impl App {
    pub fn new(link: SerialLink, baud_rate: u32) -> Self {
        Self {
            scrollback: VecDeque::with_capacity(SCROLLBACK),
            input: String::new(),
            connected: !link.is_disconnected(),
            device: link.device(),
            baud_rate,
            rx_lines: 0,
            tx_lines: 0,
            status: None,
            should_quit: false,
            link,
        }
    }

    /// Handle an event sent by a link callback.
    pub fn handle_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::DataReady => self.drain_lines(),
        }
    }

    /// Sync connection status with the link.
    pub fn tick(&mut self) {
        let connected = !self.link.is_disconnected();
        if connected != self.connected {
            self.device = self.link.device();
            let msg = if connected {
                format!("reconnected to {}", self.device)
            } else {
                format!("{} disconnected, trying to reconnect", self.device)
            };
            info!("{msg}");
            self.set_status(msg);
            self.connected = connected;
        }
    }

    /// Handle a key event.
    pub fn handle_key(&mut self, key: KeyEvent) {
        if key.modifiers.contains(KeyModifiers::CONTROL) {
            match key.code {
                KeyCode::Char('c') | KeyCode::Char('q') => self.should_quit = true,
                KeyCode::Char('l') => {
                    self.link.clear_buffer(false);
                    self.set_status("receive buffer cleared".to_string());
                }
                KeyCode::Char('k') => {
                    self.link.clear_buffer(true);
                    self.set_status("complete lines dropped from receive buffer".to_string());
                }
                _ => {}
            }
            return;
        }

        match key.code {
            KeyCode::Enter => self.send_input(),
            KeyCode::Backspace => {
                self.input.pop();
            }
            KeyCode::Esc => self.input.clear(),
            KeyCode::Char(c) => self.input.push(c),
            _ => {}
        }
    }

    fn drain_lines(&mut self) {
        while let Some(line) = self.link.read_line() {
            let undecodable = matches!(line, Line::Undecodable(_));
            self.rx_lines += 1;
            self.push_entry(Entry {
                direction: Direction::Rx,
                text: line.to_string(),
                undecodable,
            });
        }
    }

    fn send_input(&mut self) {
        match self.link.write_line(&self.input) {
            WriteStatus::Sent => {
                self.tx_lines += 1;
                let text = std::mem::take(&mut self.input);
                self.push_entry(Entry {
                    direction: Direction::Tx,
                    text,
                    undecodable: false,
                });
            }
            WriteStatus::LinkClosed => {
                self.set_status("port is closed, nothing sent".to_string());
            }
            WriteStatus::Failed => {
                self.set_status("write failed, the port probably just closed".to_string());
            }
        }
    }

    fn push_entry(&mut self, entry: Entry) {
        if self.scrollback.len() == SCROLLBACK {
            self.scrollback.pop_front();
        }
        self.scrollback.push_back(entry);
    }

    fn set_status(&mut self, msg: String) {
        self.status = Some((Instant::now(), msg));
    }
}
