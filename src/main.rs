use std::io;
use std::panic;
use std::sync::Arc;

use clap::Parser;
use crossterm::event::{DisableMouseCapture, EnableMouseCapture};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use tokio::sync::mpsc as tokio_mpsc;

use serlink::cli::Args;
use serlink::tui::app::App;
use serlink::tui::event::{AppEvent, EventHandler};
use serlink::tui::message::LinkEvent;
use serlink::tui::ui;
use serlink_core::transport::Backend;
use serlink_core::transport::serial::SerialBackend;
use serlink_core::{ForegroundQueue, SerialLink};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::parse();
    let backend = Arc::new(SerialBackend::new(args.serial_settings()));
    let baud_rate = backend.settings().baud_rate;

    if args.list {
        match backend.available_ports() {
            Ok(ports) => {
                for (i, port) in ports.iter().enumerate() {
                    println!("{i:>3}  {port}");
                }
            }
            Err(e) => {
                eprintln!("Failed to list ports: {e}");
                std::process::exit(1);
            }
        }
        return;
    }

    // Open the link in plain sync context (before tokio runtime starts).
    println!("Opening {}...", args.device);

    let queue = ForegroundQueue::new();
    let link = match SerialLink::open(
        backend,
        Arc::new(queue.handle()),
        args.device(),
        &args.handshake(),
        args.link_config(),
    ) {
        Ok(link) => {
            println!("Connected to {}.", link.device());
            link
        }
        Err(e) => {
            eprintln!("Failed to connect: {e}");
            eprintln!();
            eprintln!("Troubleshooting:");
            eprintln!("  1. Un- and replug the device");
            eprintln!("  2. Run with --list and pass the port with --device");
            eprintln!("  3. In auto mode the first listed port is never probed");
            eprintln!("  4. Check --probe/--expect: the answer must match exactly, terminator included");
            std::process::exit(1);
        }
    };

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create tokio runtime: {e}");
            std::process::exit(1);
        }
    };
    rt.block_on(async {
        // Link -> TUI: tokio unbounded (async-compatible).
        let (link_tx, link_rx) = tokio_mpsc::unbounded_channel::<LinkEvent>();

        // No refresh hook: the loop redraws after every event, so nothing
        // is pending when a key handler clears the buffer.
        if let Err(e) = link.start(args.capacity, move |_| {
            let _ = link_tx.send(LinkEvent::DataReady);
        }) {
            eprintln!("Failed to start reader: {e}");
            std::process::exit(1);
        }

        if let Err(e) = run_tui(link, queue, link_rx, baud_rate).await {
            eprintln!("TUI error: {e}");
            std::process::exit(1);
        }
    });
}

async fn run_tui(
    link: SerialLink,
    mut queue: ForegroundQueue,
    link_rx: tokio_mpsc::UnboundedReceiver<LinkEvent>,
    baud_rate: u32,
) -> io::Result<()> {
    // Setup terminal.
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    // Install panic hook to restore terminal on panic.
    let original_hook = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen, DisableMouseCapture);
        original_hook(info);
    }));

    let mut app = App::new(link, baud_rate);
    let mut events = EventHandler::new(link_rx);

    // Main event loop. This is the foreground context: link handlers and
    // reconnect attempts run here, between events, and the loop wakes up for
    // the next delayed attempt.
    loop {
        queue.run_pending();
        terminal.draw(|frame| ui::draw(frame, &app))?;

        match events.next(queue.next_deadline()).await {
            AppEvent::Key(key) => {
                // crossterm 0.28 sends both Press and Release on some platforms.
                if key.kind == crossterm::event::KeyEventKind::Press {
                    app.handle_key(key);
                }
            }
            AppEvent::Link(link_event) => {
                app.handle_link_event(link_event);
            }
            AppEvent::Tick => {
                app.tick();
            }
            AppEvent::Foreground => {
                // Pumped at the top of the loop.
            }
            AppEvent::Resize(_, _) => {
                // Terminal auto-resizes on next draw.
            }
        }

        if app.should_quit {
            break;
        }
    }

    // Restore terminal.
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    Ok(())
}
