use std::{
    io::{self, Stdout},
    time::{Duration, Instant},
};

use anyhow::Result;
use courier_world_core::{
    Agent, Environment, Playback, Position,
    environment::{AgentState, Terminal as TerminalState},
};
use ratatui::{
    crossterm::{
        self,
        event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode},
        execute,
        terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
    },
    prelude::*,
    widgets::*,
};

const AGENT_COLORS: [Color; 6] = [
    Color::Red,
    Color::Cyan,
    Color::Magenta,
    Color::Blue,
    Color::LightRed,
    Color::LightCyan,
];

pub struct App {
    /// Environment plus one behaviour per agent.
    playback: Playback,
    /// Flag to control the main loop.
    should_quit: bool,
    paused: bool,
    episode: usize,
}

impl App {
    pub fn new(environment: Environment, agents: Vec<Box<dyn Agent>>) -> Result<Self> {
        Ok(App {
            playback: Playback::new(environment, agents)?,
            should_quit: false,
            paused: false,
            episode: 1,
        })
    }

    /// Handles one step of the simulation.
    fn tick(&mut self) -> Result<()> {
        if self.paused || self.playback.is_finished() {
            return Ok(());
        }
        self.playback.process_turn()?;
        Ok(())
    }

    fn reset(&mut self) {
        self.playback.reset();
        self.episode += 1;
    }

    fn quit(&mut self) {
        self.should_quit = true;
    }
}

/// Configures the terminal for TUI interaction.
pub fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>> {
    let mut stdout = io::stdout();
    enable_raw_mode()?;
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    Terminal::new(backend).map_err(Into::into)
}

/// Restores the terminal to its original state.
pub fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;
    Ok(())
}

/// Runs the main loop of the TUI application.
pub fn run_app(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    app: &mut App,
    tick_ms: u64,
) -> Result<()> {
    let tick_rate = Duration::from_millis(tick_ms);
    let mut last_tick = Instant::now();

    loop {
        terminal.draw(|f| ui(f, app))?;

        let timeout = tick_rate
            .checked_sub(last_tick.elapsed())
            .unwrap_or_else(|| Duration::from_secs(0));

        if crossterm::event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                match key.code {
                    KeyCode::Char('q') | KeyCode::Esc => app.quit(),
                    KeyCode::Char('r') => app.reset(),
                    KeyCode::Char(' ') => app.paused = !app.paused,
                    _ => {}
                }
            }
        }

        if last_tick.elapsed() >= tick_rate {
            app.tick()?;
            last_tick = Instant::now();
        }

        if app.should_quit {
            break;
        }
    }
    Ok(())
}

/// Renders the user interface.
fn ui(frame: &mut Frame, app: &App) {
    let agent_rows = app.playback.environment().agents().len() as u16;
    let main_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(7),                 // Area for the map
            Constraint::Length(agent_rows + 2), // Area for agent status
            Constraint::Length(2),              // Area for status/help
        ])
        .split(frame.area());

    render_map(frame, main_layout[0], app.playback.environment());
    render_agents(frame, main_layout[1], &app.playback);

    let state = if app.playback.is_finished() {
        "finished"
    } else if app.paused {
        "paused"
    } else {
        "running"
    };
    let help_text = Paragraph::new(format!(
        "Episode {} turn {} ({state}). 'space' pause, 'r' reset, 'q' or 'Esc' quit.",
        app.episode,
        app.playback.turn()
    ))
    .alignment(Alignment::Center)
    .block(Block::default().borders(Borders::TOP));
    frame.render_widget(help_text, main_layout[2]);
}

fn agent_style(id: usize) -> Style {
    Style::default().fg(AGENT_COLORS[id % AGENT_COLORS.len()]).bold()
}

/// Renders one status line per agent.
fn render_agents(frame: &mut Frame, area: Rect, playback: &Playback) {
    let last_actions = playback.last_actions();
    let items: Vec<ListItem> = playback
        .environment()
        .agents()
        .iter()
        .map(|agent: &AgentState| {
            let status = match agent.terminal {
                Some(TerminalState::Delivered) => "delivered",
                Some(TerminalState::OutOfFuel) => "out of fuel",
                None if agent.carrying.is_some() => "carrying",
                None => "searching",
            };
            let last = last_actions
                .get(agent.id)
                .copied()
                .flatten()
                .map_or_else(|| "-".to_string(), |action| action.to_string());
            ListItem::from(Line::from(vec![
                Span::styled(format!("Agent {}", agent.id), agent_style(agent.id)),
                Span::raw(format!(
                    "  pos {}  fuel {}  reward {:.0}  last {last}  {status}",
                    agent.position, agent.fuel_remaining, agent.total_reward
                )),
            ]))
        })
        .collect();

    let list = List::new(items).block(Block::default().borders(Borders::ALL).title("Agents"));
    frame.render_widget(list, area);
}

/// Renders the environment map onto the frame.
fn render_map(frame: &mut Frame, area: Rect, environment: &Environment) {
    let terrain = environment.terrain();
    let agents = environment.agents();
    let packages = environment.packages();
    let goal = environment.goal();

    let mut lines: Vec<Line> = Vec::with_capacity(terrain.size());
    for row in 0..terrain.size() {
        let mut spans: Vec<Span> = Vec::with_capacity(terrain.size() * 2);
        for col in 0..terrain.size() {
            let pos = Position::new(row, col);
            let agent_span = agents
                .iter()
                .find(|a| a.position == pos && !a.is_done())
                .map(|a| Span::styled(a.id.to_string(), agent_style(a.id)));
            let package_waiting = packages
                .iter()
                .any(|p| p.position == pos && !p.picked_up && !p.delivered);

            let span = if let Some(agent_span) = agent_span {
                agent_span
            } else if package_waiting {
                Span::styled("p", Style::default().fg(Color::Yellow))
            } else if pos == goal {
                Span::styled("g", Style::default().fg(Color::Green))
            } else if !terrain.is_walkable(pos) {
                Span::styled("#", Style::default().fg(Color::DarkGray))
            } else {
                Span::raw(".")
            };
            spans.push(span);
            spans.push(Span::raw(" "));
        }
        lines.push(Line::from(spans));
    }

    let map_paragraph = Paragraph::new(lines)
        .block(Block::default().title("Courier World").borders(Borders::ALL))
        .alignment(Alignment::Center);

    frame.render_widget(map_paragraph, area);
}
