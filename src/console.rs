//! # Console Interface Module
//!
//! Interactive terminal view of the emulated remote.
//!
//! ## Features
//! - Live register image and attention line level per bus
//! - Engine counters and master poll counters
//! - Presses and slider frames latched by the simulated master
//! - Command line feeding the dispatcher (`general_on`, `press 1 0x10`, ...)

use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::{Backend, CrosstermBackend},
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Wrap},
    Frame, Terminal,
};
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::components::master::{LatchedEvent, LatchedKind};
use crate::dispatch::CommandDispatcher;
use crate::error::BusErrorKind;
use crate::system_config::ConsoleConfig;
use crate::systems::simulated_remote::{BusStatus, SimulatedRemote};

/// Latched events shown in the event pane
const EVENT_ROWS: usize = 12;

pub fn describe_event(remote: &SimulatedRemote, event: &LatchedEvent) -> String {
    match event.kind {
        LatchedKind::Press(mask) => {
            let names = remote
                .controller()
                .channel(event.bus)
                .map(|channel| {
                    channel
                        .sequencer()
                        .keys()
                        .names_for(mask)
                        .into_iter()
                        .map(str::to_string)
                        .collect::<Vec<_>>()
                        .join("+")
                })
                .unwrap_or_default();
            if names.is_empty() {
                format!("{}: press 0x{:02X}", event.bus, mask)
            } else {
                format!("{}: press {} (0x{:02X})", event.bus, names, mask)
            }
        }
        LatchedKind::Release => format!("{}: release", event.bus),
        LatchedKind::Slider(frame) => format!("{}: slider {}", event.bus, frame),
    }
}

fn status_lines(status: &BusStatus) -> Vec<Line<'static>> {
    let attention_style = if status.attention_asserted {
        Style::default().fg(Color::Red).add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(Color::Green)
    };
    let errors = BusErrorKind::ALL
        .iter()
        .map(|kind| format!("{}={}", kind.name(), status.stats.error_count(*kind)))
        .collect::<Vec<_>>()
        .join(", ");

    vec![
        Line::from(vec![
            Span::raw("Image:     "),
            Span::styled(
                status.image.to_string(),
                Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
            ),
        ]),
        Line::from(vec![
            Span::raw("Attention: "),
            Span::styled(status.attention.to_string(), attention_style),
            Span::raw(if status.busy { "  (sequence running)" } else { "" }),
        ]),
        Line::from(format!(
            "Reads: {}  Writes: {}",
            status.stats.read_transactions, status.stats.write_transactions
        )),
        Line::from(format!(
            "Served: {} bytes  Drained: {} bytes",
            status.stats.bytes_served, status.stats.bytes_drained
        )),
        Line::from(format!("Errors: {}", errors)),
        Line::from(format!(
            "Master polls: {}  faults: {}",
            status.master.polls, status.master.faults
        )),
    ]
}

/// Console UI application state
pub struct ConsoleApp<'a> {
    remote: &'a SimulatedRemote,
    dispatcher: Arc<CommandDispatcher>,
    runtime: tokio::runtime::Handle,
    config: ConsoleConfig,
    running: bool,
    command_buffer: String,
    last_message: String,
    show_help: bool,
}

impl<'a> ConsoleApp<'a> {
    pub fn new(
        remote: &'a SimulatedRemote,
        runtime: tokio::runtime::Handle,
        config: ConsoleConfig,
    ) -> Self {
        Self {
            remote,
            dispatcher: Arc::new(remote.dispatcher()),
            runtime,
            config,
            running: false,
            command_buffer: String::new(),
            last_message: String::new(),
            show_help: false,
        }
    }

    pub fn run(&mut self) -> anyhow::Result<()> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;

        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;
        let result = self.event_loop(&mut terminal);

        disable_raw_mode()?;
        execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
        terminal.show_cursor()?;
        result
    }

    fn event_loop<B: Backend>(&mut self, terminal: &mut Terminal<B>) -> anyhow::Result<()> {
        self.running = true;
        let refresh = Duration::from_millis(self.config.refresh_rate_ms);
        let mut last_draw: Option<Instant> = None;

        while self.running {
            if event::poll(Duration::from_millis(10))? {
                if let Event::Key(key) = event::read()? {
                    if key.kind == KeyEventKind::Press {
                        self.handle_key_event(key.code);
                    }
                }
            }

            let due = last_draw.map_or(true, |at| at.elapsed() >= refresh);
            if due {
                terminal.draw(|f| self.draw_ui(f))?;
                last_draw = Some(Instant::now());
            }
        }
        Ok(())
    }

    fn handle_key_event(&mut self, key: KeyCode) {
        if self.show_help {
            self.show_help = false;
            return;
        }
        match key {
            KeyCode::Esc => self.running = false,
            KeyCode::F(1) => self.show_help = true,
            KeyCode::Backspace => {
                self.command_buffer.pop();
            }
            KeyCode::Enter => {
                self.execute_command();
                self.command_buffer.clear();
            }
            KeyCode::Char(c) => {
                if c.is_ascii_alphanumeric() || c == ' ' || c == '_' {
                    self.command_buffer.push(c);
                }
            }
            _ => {}
        }
    }

    fn execute_command(&mut self) {
        let cmd = self.command_buffer.trim().to_lowercase();

        match cmd.as_str() {
            "quit" | "exit" | "q" => self.running = false,
            "help" | "h" => self.show_help = true,
            "" => {}
            _ => {
                if let Err(e) = self.dispatcher.parse(&cmd) {
                    self.last_message = e.to_string();
                    return;
                }
                let dispatcher = self.dispatcher.clone();
                self.last_message = format!("sent '{}'", cmd);
                self.runtime.spawn(async move {
                    dispatcher.dispatch_and_log(&cmd).await;
                });
            }
        }
    }

    fn draw_ui(&self, f: &mut Frame) {
        let size = f.size();

        if self.show_help {
            self.draw_help_screen(f);
            return;
        }

        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(4),
                Constraint::Min(8),
                Constraint::Length(3),
            ])
            .split(size);

        let info = self.remote.get_system_info();
        let title_text = vec![
            Line::from(vec![Span::styled(
                format!("{} ({} buses)", info.name, info.bus_count),
                Style::default()
                    .fg(Color::Cyan)
                    .add_modifier(Modifier::BOLD),
            )]),
            Line::from(vec![
                Span::styled("Esc", Style::default().fg(Color::Yellow)),
                Span::raw("=quit, "),
                Span::styled("F1", Style::default().fg(Color::Yellow)),
                Span::raw("=help  "),
                Span::styled(self.last_message.clone(), Style::default().fg(Color::Gray)),
            ]),
        ];
        let title = Paragraph::new(title_text)
            .block(Block::default().borders(Borders::ALL).title("Status"))
            .wrap(Wrap { trim: true });
        f.render_widget(title, chunks[0]);

        let content_chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
            .split(chunks[1]);

        self.draw_buses(f, content_chunks[0]);
        self.draw_events(f, content_chunks[1]);

        let command_text = if self.command_buffer.is_empty() {
            "Enter command (type 'help' for help)..."
        } else {
            &self.command_buffer
        };
        let command_bar = Paragraph::new(command_text)
            .style(Style::default().fg(Color::White))
            .block(Block::default().borders(Borders::ALL).title("Command"));
        f.render_widget(command_bar, chunks[2]);
    }

    fn draw_buses(&self, f: &mut Frame, area: Rect) {
        let statuses = self.remote.bus_status();
        if statuses.is_empty() {
            return;
        }
        let constraints: Vec<Constraint> = statuses
            .iter()
            .map(|_| Constraint::Ratio(1, statuses.len() as u32))
            .collect();
        let panes = Layout::default()
            .direction(Direction::Vertical)
            .constraints(constraints)
            .split(area);

        for (status, pane) in statuses.iter().zip(panes.iter()) {
            let widget = Paragraph::new(status_lines(status))
                .block(
                    Block::default()
                        .borders(Borders::ALL)
                        .title(status.id.to_string()),
                )
                .wrap(Wrap { trim: true });
            f.render_widget(widget, *pane);
        }
    }

    fn draw_events(&self, f: &mut Frame, area: Rect) {
        let events = self.remote.latched_events();
        let lines: Vec<Line> = events
            .iter()
            .rev()
            .take(EVENT_ROWS)
            .map(|event| Line::from(describe_event(self.remote, event)))
            .collect();

        let widget = Paragraph::new(lines)
            .block(Block::default().borders(Borders::ALL).title("Latched by master"))
            .wrap(Wrap { trim: true });
        f.render_widget(widget, area);
    }

    fn draw_help_screen(&self, f: &mut Frame) {
        let size = f.size();
        let mut help_text = vec![
            Line::from(vec![Span::styled(
                "Remote Console Help",
                Style::default()
                    .fg(Color::Cyan)
                    .add_modifier(Modifier::BOLD),
            )]),
            Line::from(""),
            Line::from(vec![
                Span::styled("  <control>", Style::default().fg(Color::Yellow)),
                Span::raw(" - press and release a named control"),
            ]),
            Line::from(vec![
                Span::styled("  press <bus> <mask>", Style::default().fg(Color::Yellow)),
                Span::raw(" - press raw flag bits, e.g. press 1 0x10"),
            ]),
            Line::from(vec![
                Span::styled("  slider <name> <level>", Style::default().fg(Color::Yellow)),
                Span::raw(" - show a slider frame, e.g. slider colour 60"),
            ]),
            Line::from(vec![
                Span::styled("  quit", Style::default().fg(Color::Yellow)),
                Span::raw(" - exit"),
            ]),
            Line::from(""),
            Line::from(vec![Span::styled(
                "Known names:",
                Style::default().add_modifier(Modifier::BOLD),
            )]),
        ];
        help_text.push(Line::from(self.dispatcher.known_names().join(", ")));
        help_text.push(Line::from(""));
        help_text.push(Line::from("Press any key to return to main view..."));

        let help = Paragraph::new(help_text)
            .style(Style::default().fg(Color::White))
            .wrap(Wrap { trim: true })
            .block(Block::default().borders(Borders::ALL).title("Help"));
        f.render_widget(help, size);
    }
}

/// Public interface for launching the console
pub fn run_console(
    remote: &SimulatedRemote,
    runtime: tokio::runtime::Handle,
    config: ConsoleConfig,
) -> anyhow::Result<()> {
    let mut app = ConsoleApp::new(remote, runtime, config);
    app.run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system_config::EmulatorConfig;
    use crate::types::BusId;
    use ratatui::backend::TestBackend;

    fn remote() -> SimulatedRemote {
        SimulatedRemote::new(EmulatorConfig::default()).unwrap()
    }

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap()
    }

    #[test]
    fn test_describe_press_uses_control_names() {
        let remote = remote();
        let event = LatchedEvent {
            bus: BusId::new(0),
            kind: LatchedKind::Press(0x08),
        };
        assert_eq!(
            describe_event(&remote, &event),
            "bus0: press general_on (0x08)"
        );

        let event = LatchedEvent {
            bus: BusId::new(1),
            kind: LatchedKind::Release,
        };
        assert_eq!(describe_event(&remote, &event), "bus1: release");
    }

    #[test]
    fn test_typing_builds_command() {
        let remote = remote();
        let runtime = runtime();
        let mut app = ConsoleApp::new(&remote, runtime.handle().clone(), ConsoleConfig::default());

        for c in "mode!".chars() {
            app.handle_key_event(KeyCode::Char(c));
        }
        assert_eq!(app.command_buffer, "mode");
        app.handle_key_event(KeyCode::Backspace);
        assert_eq!(app.command_buffer, "mod");
    }

    #[test]
    fn test_unknown_command_reported() {
        let remote = remote();
        let runtime = runtime();
        let mut app = ConsoleApp::new(&remote, runtime.handle().clone(), ConsoleConfig::default());

        app.command_buffer = "disco".to_string();
        app.execute_command();
        assert_eq!(app.last_message, "unknown command 'disco'");
    }

    #[test]
    fn test_quit_and_help_commands() {
        let remote = remote();
        let runtime = runtime();
        let mut app = ConsoleApp::new(&remote, runtime.handle().clone(), ConsoleConfig::default());
        app.running = true;

        app.command_buffer = "help".to_string();
        app.execute_command();
        assert!(app.show_help);
        app.handle_key_event(KeyCode::Char('x'));
        assert!(!app.show_help);

        app.command_buffer = "quit".to_string();
        app.execute_command();
        assert!(!app.running);
    }

    #[test]
    fn test_draws_both_buses() {
        let remote = remote();
        let runtime = runtime();
        let app = ConsoleApp::new(&remote, runtime.handle().clone(), ConsoleConfig::default());

        let mut terminal = Terminal::new(TestBackend::new(100, 30)).unwrap();
        terminal.draw(|f| app.draw_ui(f)).unwrap();

        let buffer = terminal.backend().buffer().clone();
        let text: String = buffer.content().iter().map(|cell| cell.symbol.as_str()).collect();
        assert!(text.contains("bus0"));
        assert!(text.contains("bus1"));
        assert!(text.contains("[02 00 00 00 00]"));
    }
}
