//! Terminal readout.
//!
//! Shows the connection status, the current reading as the LCD draws it, and
//! a chart of recent samples. Keys:
//!   c  connect / disconnect
//!   d  switch to the next detected device
//!   e  export the frame log to CSV
//!   q  quit (Esc works too)

use std::io::{self, Stdout};
use std::path::PathBuf;
use std::sync::mpsc::{Receiver, TryRecvError};
use std::time::Duration;

use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use log::{info, warn};
use mm_reader::{export, Error, Frame, NativeBackend, Notification, SerialDevice, Severity, Supervisor};
use ratatui::{prelude::*, widgets::*};

const CHART_SAMPLES: usize = 120;
const TICK: Duration = Duration::from_millis(50);

type Term = Terminal<CrosstermBackend<Stdout>>;

pub fn run(supervisor: Supervisor<NativeBackend>, devices: Vec<SerialDevice>, export_path: PathBuf) -> Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout))?;

    let mut app = App::new(supervisor, devices, export_path);
    let result = app.run(&mut terminal);

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    // Waits for the worker, at most one read timeout. A failed device switch
    // may already have stopped it.
    match app.supervisor.shutdown() {
        Ok(_) | Err(Error::WorkerStopped) => {}
        Err(e) => return Err(e.into()),
    }
    result
}

struct App {
    supervisor: Supervisor<NativeBackend>,
    updates: Receiver<Notification>,
    devices: Vec<SerialDevice>,
    export_path: PathBuf,
    message: Option<String>,
    quit: bool,
}

impl App {
    fn new(supervisor: Supervisor<NativeBackend>, devices: Vec<SerialDevice>, export_path: PathBuf) -> Self {
        let updates = supervisor.session().subscribe();
        Self {
            supervisor,
            updates,
            devices,
            export_path,
            message: None,
            quit: false,
        }
    }

    fn run(&mut self, terminal: &mut Term) -> Result<()> {
        let mut dirty = true;
        while !self.quit {
            match self.updates.try_recv() {
                Ok(_) => dirty = true,
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => {
                    self.updates = self.supervisor.session().subscribe();
                    dirty = true;
                }
            }

            if dirty {
                terminal.draw(|f| self.draw(f))?;
                dirty = false;
            }

            if event::poll(TICK)? {
                if let Event::Key(key) = event::read()? {
                    if key.kind == KeyEventKind::Press {
                        self.handle_key(key.code);
                    }
                }
                dirty = true;
            }
        }
        Ok(())
    }

    fn handle_key(&mut self, code: KeyCode) {
        match code {
            KeyCode::Char('q') | KeyCode::Esc => self.quit = true,
            KeyCode::Char('c') => {
                let wanted = self.supervisor.toggle();
                self.message = Some(if wanted { "Connecting".into() } else { "Disconnecting".into() });
            }
            KeyCode::Char('d') => self.next_device(),
            KeyCode::Char('e') => self.export(),
            _ => {}
        }
    }

    fn next_device(&mut self) {
        if self.devices.is_empty() {
            self.message = Some("No devices detected".into());
            return;
        }
        let current = self.supervisor.session().device().to_string();
        let next = match self.devices.iter().position(|d| d.path == current) {
            Some(i) => (i + 1) % self.devices.len(),
            None => 0,
        };
        let device = self.devices[next].path.clone();

        info!("[monitor] switching to {}", device);
        match self.supervisor.rebind(device.clone()) {
            Ok(()) => {
                self.updates = self.supervisor.session().subscribe();
                self.message = Some(format!("Selected {}", device));
            }
            Err(e) => {
                warn!("[monitor] could not switch device: {}", e);
                self.message = Some(format!("Could not switch device: {}", e));
                self.quit = true;
            }
        }
    }

    fn export(&mut self) {
        self.message = Some(match export::export_to_path(&self.export_path, self.supervisor.session().frames()) {
            Ok(rows) => format!("Exported {} readings to {}", rows, self.export_path.display()),
            Err(e) => format!("Export failed: {}", e),
        });
    }

    fn draw(&self, f: &mut ratatui::Frame) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3),
                Constraint::Length(4),
                Constraint::Min(6),
                Constraint::Length(1),
            ])
            .split(f.size());

        f.render_widget(self.status_panel(), chunks[0]);

        let latest = self.supervisor.session().frames().latest();
        f.render_widget(readout(latest.as_ref()), chunks[1]);

        let samples = self.supervisor.session().frames().tail(CHART_SAMPLES);
        let points: Vec<(f64, f64)> = samples
            .iter()
            .enumerate()
            .map(|(i, frame)| (i as f64, frame.value_or_zero()))
            .collect();
        f.render_widget(chart(&points), chunks[2]);

        let help = self.message.as_deref().unwrap_or("c connect/disconnect  d next device  e export  q quit");
        f.render_widget(Paragraph::new(help).style(Style::default().fg(Color::DarkGray)), chunks[3]);
    }

    fn status_panel(&self) -> Paragraph<'static> {
        let session = self.supervisor.session();
        let status = session.status();

        let mut spans = vec![
            Span::raw(format!("{}  ", session.device())),
            Span::styled(
                status.as_str(),
                Style::default().fg(severity_color(status.severity())).add_modifier(Modifier::BOLD),
            ),
        ];
        if let Some(failure) = session.last_failure() {
            if failure != status {
                spans.push(Span::styled(
                    format!("  (last: {})", failure),
                    Style::default().fg(severity_color(failure.severity())),
                ));
            }
        }
        spans.push(Span::raw(format!("  {} readings", session.frames().len())));

        Paragraph::new(Line::from(spans)).block(Block::default().borders(Borders::ALL).title("Link"))
    }
}

fn readout(frame: Option<&Frame>) -> Paragraph<'static> {
    let block = Block::default().borders(Borders::ALL).title("Reading");
    let Some(frame) = frame else {
        return Paragraph::new("  ----").block(block);
    };

    let value = Line::from(vec![
        Span::styled(frame.display_digits(), Style::default().add_modifier(Modifier::BOLD)),
        Span::raw(" "),
        Span::styled(frame.unit_symbol(), Style::default().fg(Color::Cyan)),
    ]);

    let s = &frame.status;
    let indicators: Vec<&str> = [
        (s.auto, "AUTO"),
        (s.dc, "DC"),
        (s.ac, "AC"),
        (s.hold, "HOLD"),
        (s.rel, "REL"),
        (s.diode, "DIODE"),
        (s.beep, "BEEP"),
        (s.battery, "BAT"),
    ]
    .iter()
    .filter(|(on, _)| *on)
    .map(|(_, name)| *name)
    .collect();
    let flags = Line::from(Span::styled(indicators.join(" "), Style::default().fg(Color::Yellow)));

    Paragraph::new(vec![value, flags]).block(block)
}

fn chart(points: &[(f64, f64)]) -> Chart<'_> {
    let (lo, hi) = points
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &(_, y)| (lo.min(y), hi.max(y)));
    let (lo, hi) = if lo.is_finite() && hi > lo {
        let pad = (hi - lo) * 0.1;
        (lo - pad, hi + pad)
    } else if lo.is_finite() {
        (lo - 1.0, lo + 1.0)
    } else {
        (-1.0, 1.0)
    };

    let dataset = Dataset::default()
        .marker(symbols::Marker::Braille)
        .graph_type(GraphType::Line)
        .style(Style::default().fg(Color::LightGreen))
        .data(points);

    Chart::new(vec![dataset])
        .block(Block::default().borders(Borders::ALL).title("History"))
        .x_axis(Axis::default().bounds([0.0, CHART_SAMPLES as f64]))
        .y_axis(
            Axis::default()
                .bounds([lo, hi])
                .labels(vec![Span::raw(format!("{:.2}", lo)), Span::raw(format!("{:.2}", hi))]),
        )
}

fn severity_color(severity: Severity) -> Color {
    match severity {
        Severity::Neutral => Color::Gray,
        Severity::Pending => Color::Yellow,
        Severity::Good => Color::Green,
        Severity::Bad => Color::Red,
    }
}
