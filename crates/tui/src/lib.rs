use std::collections::BTreeSet;
use std::io::{self, Stdout};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind,
    KeyModifiers,
};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use nlq_adapters::export::save_artifact;
use nlq_core::backend::ApiBackend;
use nlq_core::connection_store::{DeleteConfirmation, TestStatus, ValidationError};
use nlq_core::export::{ExportError, ExportFormat};
use nlq_core::masking::mask_connection_string;
use nlq_core::model::{scalar_text, Connection, ConnectionId, Scalar};
use nlq_core::notifications::Severity;
use nlq_core::orchestrator::Phase;
use nlq_core::schema_cache::SchemaState;
use nlq_core::session::{Session, SessionOptions};
use nlq_core::settings::ClientSettings;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, Paragraph, Wrap};
use ratatui::{Frame, Terminal};
use thiserror::Error;
use tokio::runtime::Runtime;
use tracing::{debug, info};

const TICK_RATE: Duration = Duration::from_millis(120);
const MAX_CELL_WIDTH: usize = 32;
const MAX_VISIBLE_TOASTS: usize = 4;
const NULL_TEXT: &str = "NULL";

#[derive(Debug, Error)]
pub enum TuiError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pane {
    Connections,
    Schema,
    Query,
    Sql,
    Results,
}

impl Pane {
    fn next(self) -> Self {
        match self {
            Self::Connections => Self::Schema,
            Self::Schema => Self::Query,
            Self::Query => Self::Sql,
            Self::Sql => Self::Results,
            Self::Results => Self::Connections,
        }
    }

    fn previous(self) -> Self {
        match self {
            Self::Connections => Self::Results,
            Self::Schema => Self::Connections,
            Self::Query => Self::Schema,
            Self::Sql => Self::Query,
            Self::Results => Self::Sql,
        }
    }

    fn title(self) -> &'static str {
        match self {
            Self::Connections => "Connections",
            Self::Schema => "Schema",
            Self::Query => "Ask",
            Self::Sql => "SQL",
            Self::Results => "Results",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FormField {
    Name,
    ConnectionString,
}

impl FormField {
    fn next(self) -> Self {
        match self {
            Self::Name => Self::ConnectionString,
            Self::ConnectionString => Self::Name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ConnectionForm {
    name: String,
    connection_string: String,
    active_field: FormField,
    errors: Vec<ValidationError>,
}

impl Default for ConnectionForm {
    fn default() -> Self {
        Self {
            name: String::new(),
            connection_string: "postgresql://".to_string(),
            active_field: FormField::Name,
            errors: Vec::new(),
        }
    }
}

impl ConnectionForm {
    fn active_value(&mut self) -> &mut String {
        match self.active_field {
            FormField::Name => &mut self.name,
            FormField::ConnectionString => &mut self.connection_string,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DirectionKey {
    Up,
    Down,
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Msg {
    Quit,
    ToggleHelp,
    NextPane,
    PreviousPane,
    Submit,
    Cancel,
    Refresh,
    Export(ExportFormat),
    Navigate(DirectionKey),
    Input(char),
    Backspace,
    Tick,
}

#[derive(Debug)]
struct TuiApp {
    session: Session,
    export_dir: PathBuf,
    pane: Pane,
    connection_cursor: usize,
    form: Option<ConnectionForm>,
    pending_delete: Option<DeleteConfirmation>,
    schema_cursor: usize,
    expanded_tables: BTreeSet<String>,
    schema_owner: Option<ConnectionId>,
    question: String,
    results_cursor: usize,
    show_help: bool,
    should_quit: bool,
    status_line: String,
}

impl TuiApp {
    fn new(mut session: Session, export_dir: PathBuf) -> Self {
        session.refresh_connections();
        Self {
            session,
            export_dir,
            pane: Pane::Connections,
            connection_cursor: 0,
            form: None,
            pending_delete: None,
            schema_cursor: 0,
            expanded_tables: BTreeSet::new(),
            schema_owner: None,
            question: String::new(),
            results_cursor: 0,
            show_help: false,
            should_quit: false,
            status_line: "Select a connection with Enter".to_string(),
        }
    }

    fn handle(&mut self, msg: Msg) {
        match msg {
            Msg::Quit => self.should_quit = true,
            Msg::ToggleHelp => self.show_help = !self.show_help,
            Msg::NextPane => {
                if let Some(form) = self.form.as_mut() {
                    form.active_field = form.active_field.next();
                } else {
                    self.pane = self.pane.next();
                }
            }
            Msg::PreviousPane => {
                if let Some(form) = self.form.as_mut() {
                    form.active_field = form.active_field.next();
                } else {
                    self.pane = self.pane.previous();
                }
            }
            Msg::Submit => self.submit(),
            Msg::Cancel => self.cancel(),
            Msg::Refresh => self.refresh(),
            Msg::Export(format) => self.export(format),
            Msg::Navigate(direction) => self.navigate(direction),
            Msg::Input(character) => self.input(character),
            Msg::Backspace => self.backspace(),
            Msg::Tick => self.on_tick(),
        }
    }

    fn on_tick(&mut self) {
        let applied = self.session.drain_completions();
        if applied > 0 {
            debug!(applied, "completions applied");
        }
        self.session.sweep_notifications();
        self.sync_view_state();
    }

    /// Keeps cursors and schema view state consistent with whatever the session holds now.
    fn sync_view_state(&mut self) {
        let connection_count = self.session.store().connections().len();
        self.connection_cursor = self
            .connection_cursor
            .min(connection_count.saturating_sub(1));

        let owner = self.session.orchestrator().schema().connection_id();
        if owner != self.schema_owner {
            self.schema_owner = owner;
            self.schema_cursor = 0;
            self.expanded_tables.clear();
        }
        let table_count = self.session.orchestrator().tables().len();
        self.schema_cursor = self.schema_cursor.min(table_count.saturating_sub(1));

        let row_count = self
            .session
            .orchestrator()
            .result()
            .map_or(0, |result| result.rows.len());
        self.results_cursor = self.results_cursor.min(row_count.saturating_sub(1));
    }

    fn submit(&mut self) {
        if self.form.is_some() {
            self.submit_form();
            return;
        }

        match self.pane {
            Pane::Connections => self.select_highlighted_connection(),
            Pane::Schema => self.toggle_highlighted_table(),
            Pane::Query => {
                if self.session.generate(&self.question) {
                    self.status_line = "Generating SQL...".to_string();
                } else {
                    self.status_line = self.blocked_reason(&self.question, "a question");
                }
            }
            Pane::Sql => {
                let sql = self.session.orchestrator().sql().to_string();
                if self.session.execute_current() {
                    self.results_cursor = 0;
                    self.status_line = "Executing query...".to_string();
                } else {
                    self.status_line = self.blocked_reason(&sql, "SQL");
                }
            }
            Pane::Results => {
                self.status_line = "F5 exports CSV, F6 exports JSON".to_string();
            }
        }
    }

    fn blocked_reason(&self, text: &str, what: &str) -> String {
        let orchestrator = self.session.orchestrator();
        if orchestrator.selected_connection().is_none() {
            "Select a connection first".to_string()
        } else if text.trim().is_empty() {
            format!("Enter {what} first")
        } else if orchestrator.is_generating() || orchestrator.is_executing() {
            "A request is already running".to_string()
        } else {
            "Nothing to do".to_string()
        }
    }

    fn submit_form(&mut self) {
        let Some(form) = self.form.as_mut() else {
            return;
        };
        match self
            .session
            .create_connection(&form.name, &form.connection_string)
        {
            Ok(true) => {
                self.form = None;
                self.status_line = "Adding connection...".to_string();
            }
            Ok(false) => {
                self.status_line = "A connection is already being added".to_string();
            }
            Err(errors) => {
                form.errors = errors;
                self.status_line = "Fix the highlighted fields".to_string();
            }
        }
    }

    fn select_highlighted_connection(&mut self) {
        let Some(connection) = self.highlighted_connection() else {
            self.status_line = "No connections yet, press `a` to add one".to_string();
            return;
        };
        let (id, name) = (connection.id, connection.name.clone());
        if self.session.select_connection(id) {
            info!(%id, "connection selected");
            self.question.clear();
            self.status_line = format!("Using `{name}`, loading schema...");
        } else {
            self.status_line = format!("`{name}` is already selected");
        }
    }

    fn toggle_highlighted_table(&mut self) {
        let Some(table) = self
            .session
            .orchestrator()
            .tables()
            .get(self.schema_cursor)
            .map(|table| table.name.clone())
        else {
            return;
        };
        if !self.expanded_tables.remove(&table) {
            self.expanded_tables.insert(table);
        }
    }

    fn cancel(&mut self) {
        if self.form.take().is_some() {
            self.status_line = "Add connection cancelled".to_string();
        } else if let Some(confirmation) = self.pending_delete.take() {
            self.session.decline_delete(&confirmation);
            self.status_line = "Delete cancelled".to_string();
        } else if self.show_help {
            self.show_help = false;
        } else {
            self.session.dismiss_latest();
        }
    }

    fn refresh(&mut self) {
        match self.pane {
            Pane::Connections => {
                if self.session.refresh_connections() {
                    self.status_line = "Refreshing connections...".to_string();
                }
            }
            _ => {
                if self.session.refresh_schema() {
                    self.status_line = "Reloading schema...".to_string();
                } else {
                    self.status_line = "Select a connection first".to_string();
                }
            }
        }
    }

    fn export(&mut self, format: ExportFormat) {
        let artifact = match self.session.export(format) {
            Ok(artifact) => artifact,
            Err(ExportError::NothingToExport) => {
                self.session
                    .notifications_mut()
                    .push(Severity::Warning, "Run a query before exporting");
                return;
            }
            Err(error) => {
                self.session
                    .notifications_mut()
                    .error(format!("Export failed: {error}"));
                return;
            }
        };

        match save_artifact(&self.export_dir, &artifact) {
            Ok(path) => {
                self.session
                    .notifications_mut()
                    .success(format!("Exported to {}", path.display()));
            }
            Err(error) => {
                self.session
                    .notifications_mut()
                    .error(format!("Export failed: {error}"));
            }
        }
    }

    fn navigate(&mut self, direction: DirectionKey) {
        if let Some(form) = self.form.as_mut() {
            form.active_field = form.active_field.next();
            return;
        }

        match self.pane {
            Pane::Connections => {
                let count = self.session.store().connections().len();
                self.connection_cursor = step(self.connection_cursor, count, direction);
            }
            Pane::Schema => match direction {
                DirectionKey::Right => {
                    if let Some(table) = self.highlighted_table_name() {
                        self.expanded_tables.insert(table);
                    }
                }
                DirectionKey::Left => {
                    if let Some(table) = self.highlighted_table_name() {
                        self.expanded_tables.remove(&table);
                    }
                }
                DirectionKey::Up | DirectionKey::Down => {
                    let count = self.session.orchestrator().tables().len();
                    self.schema_cursor = step(self.schema_cursor, count, direction);
                }
            },
            Pane::Results => {
                let count = self
                    .session
                    .orchestrator()
                    .result()
                    .map_or(0, |result| result.rows.len());
                self.results_cursor = step(self.results_cursor, count, direction);
            }
            Pane::Query | Pane::Sql => {}
        }
    }

    fn input(&mut self, character: char) {
        if let Some(form) = self.form.as_mut() {
            form.active_value().push(character);
            return;
        }
        if let Some(confirmation) = self.pending_delete.take() {
            if matches!(character, 'y' | 'Y') {
                if self.session.confirm_delete(&confirmation) {
                    self.status_line =
                        format!("Deleting `{}`...", confirmation.connection_name);
                }
            } else {
                self.session.decline_delete(&confirmation);
                self.status_line = "Delete cancelled".to_string();
            }
            return;
        }

        match self.pane {
            Pane::Connections => self.connection_command(character),
            Pane::Query => self.question.push(character),
            Pane::Sql => {
                let mut sql = self.session.orchestrator().sql().to_string();
                sql.push(character);
                self.session.edit_sql(sql);
            }
            Pane::Schema | Pane::Results => {}
        }
    }

    fn connection_command(&mut self, character: char) {
        match character {
            'a' => {
                self.form = Some(ConnectionForm::default());
                self.status_line = "Tab switches field, Enter saves, Esc cancels".to_string();
            }
            't' => {
                if let Some(id) = self.highlighted_connection().map(|connection| connection.id) {
                    if self.session.test_connection(id) {
                        self.status_line = "Testing connection...".to_string();
                    }
                }
            }
            'd' => {
                if let Some(id) = self.highlighted_connection().map(|connection| connection.id) {
                    if let Some(confirmation) = self.session.request_delete(id) {
                        self.status_line = format!(
                            "Delete `{}`? y to confirm, any other key cancels",
                            confirmation.connection_name
                        );
                        self.pending_delete = Some(confirmation);
                    }
                }
            }
            _ => {}
        }
    }

    fn backspace(&mut self) {
        if let Some(form) = self.form.as_mut() {
            form.active_value().pop();
            return;
        }
        match self.pane {
            Pane::Query => {
                self.question.pop();
            }
            Pane::Sql => {
                let mut sql = self.session.orchestrator().sql().to_string();
                sql.pop();
                self.session.edit_sql(sql);
            }
            Pane::Connections | Pane::Schema | Pane::Results => {}
        }
    }

    fn highlighted_connection(&self) -> Option<&Connection> {
        self.session
            .store()
            .connections()
            .get(self.connection_cursor)
    }

    fn highlighted_table_name(&self) -> Option<String> {
        self.session
            .orchestrator()
            .tables()
            .get(self.schema_cursor)
            .map(|table| table.name.clone())
    }

    fn selected_connection_name(&self) -> Option<&str> {
        let id = self.session.orchestrator().selected_connection()?;
        self.session
            .store()
            .connection(id)
            .map(|connection| connection.name.as_str())
    }
}

fn step(cursor: usize, count: usize, direction: DirectionKey) -> usize {
    if count == 0 {
        return 0;
    }
    match direction {
        DirectionKey::Up | DirectionKey::Left => cursor.saturating_sub(1),
        DirectionKey::Down | DirectionKey::Right => (cursor + 1).min(count - 1),
    }
}

/// Runs the interactive client against `backend` until the user quits.
pub fn run(backend: Arc<dyn ApiBackend>, settings: &ClientSettings) -> Result<(), TuiError> {
    let runtime = Runtime::new()?;
    let session = Session::new(
        backend,
        runtime.handle().clone(),
        SessionOptions::from(settings),
    );
    let mut app = TuiApp::new(session, settings.export_dir());

    let mut terminal = setup_terminal()?;
    let run_result = run_loop(&mut terminal, &mut app);
    let restore_result = restore_terminal(&mut terminal);

    if let Err(error) = run_result {
        restore_result?;
        return Err(error);
    }

    restore_result?;
    Ok(())
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>, TuiError> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;
    Ok(terminal)
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<(), TuiError> {
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;
    Ok(())
}

fn run_loop(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    app: &mut TuiApp,
) -> Result<(), TuiError> {
    let mut last_tick = Instant::now();

    loop {
        terminal.draw(|frame| render(frame, app))?;

        let timeout = TICK_RATE
            .checked_sub(last_tick.elapsed())
            .unwrap_or(Duration::ZERO);
        if event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    if let Some(message) = map_key_event(key) {
                        app.handle(message);
                    }
                }
            }
        }

        if last_tick.elapsed() >= TICK_RATE {
            app.handle(Msg::Tick);
            last_tick = Instant::now();
        }

        if app.should_quit {
            break;
        }
    }

    Ok(())
}

fn render(frame: &mut Frame<'_>, app: &TuiApp) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(10),
            Constraint::Length(3),
        ])
        .split(frame.area());

    render_header(frame, app, rows[0]);

    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(30), Constraint::Percentage(70)])
        .split(rows[1]);
    let sidebar = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Percentage(40), Constraint::Percentage(60)])
        .split(columns[0]);
    let workspace = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(7),
            Constraint::Min(5),
        ])
        .split(columns[1]);

    render_pane(frame, app, Pane::Connections, connections_lines(app), sidebar[0]);
    render_pane(frame, app, Pane::Schema, schema_lines(app), sidebar[1]);
    render_pane(frame, app, Pane::Query, query_lines(app), workspace[0]);
    render_pane(frame, app, Pane::Sql, sql_lines(app), workspace[1]);
    let visible_rows = usize::from(workspace[2].height.saturating_sub(4)).max(1);
    render_pane(
        frame,
        app,
        Pane::Results,
        results_lines(app, visible_rows),
        workspace[2],
    );

    let footer = Paragraph::new(vec![
        Line::from(footer_hint(app)),
        Line::from(format!("Status: {}", app.status_line)),
    ])
    .block(Block::default().borders(Borders::ALL).title("Keys"));
    frame.render_widget(footer, rows[2]);

    if let Some(form) = &app.form {
        render_connection_form(frame, form);
    }
    render_toasts(frame, app);
    if app.show_help {
        render_help_popup(frame);
    }
}

fn render_header(frame: &mut Frame<'_>, app: &TuiApp, area: Rect) {
    let phase = match app.session.orchestrator().phase() {
        Phase::NoConnection => "no connection",
        Phase::Idle => "ready",
        Phase::Generating => "generating",
        Phase::Generated => "sql ready",
        Phase::Executing => "executing",
        Phase::Executed => "results ready",
    };
    let header = Paragraph::new(Line::from(vec![
        Span::styled(
            format!(" Pane: {} ", app.pane.title()),
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(" | "),
        Span::raw(format!(
            "Connection: {}",
            app.selected_connection_name().unwrap_or("none")
        )),
        Span::raw(" | "),
        Span::raw(format!("State: {phase}")),
    ]))
    .block(
        Block::default()
            .borders(Borders::ALL)
            .title("Natural Language Query"),
    );
    frame.render_widget(header, area);
}

fn render_pane(frame: &mut Frame<'_>, app: &TuiApp, pane: Pane, lines: Vec<Line<'_>>, area: Rect) {
    let border_style = if app.pane == pane {
        Style::default().fg(Color::Cyan)
    } else {
        Style::default()
    };
    let widget = Paragraph::new(lines)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(border_style)
                .title(pane.title()),
        )
        .alignment(Alignment::Left);
    frame.render_widget(widget, area);
}

fn connections_lines(app: &TuiApp) -> Vec<Line<'static>> {
    let store = app.session.store();
    if store.connections().is_empty() {
        let message = if store.is_loading() {
            "Loading..."
        } else {
            "No connections. Press `a` to add one."
        };
        return vec![Line::from(message)];
    }

    let selected = app.session.orchestrator().selected_connection();
    let mut lines = Vec::with_capacity(store.connections().len() * 2);
    for (index, connection) in store.connections().iter().enumerate() {
        let cursor = if index == app.connection_cursor { ">" } else { " " };
        let active = if selected == Some(connection.id) { "*" } else { " " };
        let status = match store.test_status(connection.id) {
            Some(TestStatus::Testing) => " [testing]",
            Some(TestStatus::Passed(_)) => " [ok]",
            Some(TestStatus::Failed(_)) => " [failed]",
            None => "",
        };
        lines.push(Line::from(format!(
            "{cursor}{active} {}{status}",
            connection.name
        )));
        lines.push(Line::from(Span::styled(
            format!("    {}", mask_connection_string(&connection.connection_string)),
            Style::default().fg(Color::DarkGray),
        )));
    }
    lines
}

fn schema_lines(app: &TuiApp) -> Vec<Line<'static>> {
    let orchestrator = app.session.orchestrator();
    match orchestrator.schema_state() {
        SchemaState::Idle => return vec![Line::from("Select a connection")],
        SchemaState::Loading => return vec![Line::from("Loading schema...")],
        SchemaState::Empty => return vec![Line::from("Schema unavailable")],
        SchemaState::Ready if orchestrator.tables().is_empty() => {
            return vec![Line::from("No tables found")];
        }
        SchemaState::Ready => {}
    }

    let mut lines = Vec::new();
    for (index, table) in orchestrator.tables().iter().enumerate() {
        let cursor = if index == app.schema_cursor { ">" } else { " " };
        let expanded = app.expanded_tables.contains(&table.name);
        let marker = if expanded { "v" } else { "+" };
        lines.push(Line::from(format!(
            "{cursor}{marker} {} ({})",
            table.name,
            table.columns.len()
        )));
        if expanded {
            for column in &table.columns {
                let nullable = if column.nullable { "" } else { " not null" };
                lines.push(Line::from(Span::styled(
                    format!("     {}: {}{nullable}", column.name, column.data_type),
                    Style::default().fg(Color::DarkGray),
                )));
            }
        }
    }
    lines
}

fn query_lines(app: &TuiApp) -> Vec<Line<'static>> {
    if app.session.orchestrator().is_generating() {
        return vec![Line::from(format!("{} (generating...)", app.question))];
    }
    if app.question.is_empty() {
        return vec![Line::from(Span::styled(
            "Describe the data you want, then press Enter",
            Style::default().fg(Color::DarkGray),
        ))];
    }
    vec![Line::from(app.question.clone())]
}

fn sql_lines(app: &TuiApp) -> Vec<Line<'static>> {
    let orchestrator = app.session.orchestrator();
    let mut lines: Vec<Line<'static>> = orchestrator
        .sql()
        .lines()
        .map(|line| Line::from(line.to_string()))
        .collect();
    if lines.is_empty() {
        lines.push(Line::from(Span::styled(
            "Generated SQL appears here. Type to write your own.",
            Style::default().fg(Color::DarkGray),
        )));
    }
    if orchestrator.is_executing() {
        lines.push(Line::from("Executing..."));
    }
    if let Some(generated) = orchestrator.generated() {
        if !generated.explanation.is_empty() {
            lines.push(Line::from(Span::styled(
                format!("-- {}", generated.explanation),
                Style::default().fg(Color::Green),
            )));
        }
    }
    lines
}

fn results_lines(app: &TuiApp, visible_rows: usize) -> Vec<Line<'static>> {
    let orchestrator = app.session.orchestrator();
    let Some(result) = orchestrator.result() else {
        let message = if orchestrator.is_executing() {
            "Executing..."
        } else {
            "Run a query to see results"
        };
        return vec![Line::from(message)];
    };

    let mut lines = vec![Line::from(format!("{} rows", result.row_count))];
    if result.rows.is_empty() {
        lines.push(Line::from("Query returned no rows"));
        return lines;
    }

    let widths = column_widths(&result.columns, &result.rows);
    lines.push(Line::from(Span::styled(
        format!("  {}", format_cells(result.columns.iter().map(String::as_str), &widths)),
        Style::default().add_modifier(Modifier::BOLD),
    )));

    let window_start = app.results_cursor.saturating_sub(visible_rows / 2);
    for (offset, row) in result.rows.iter().skip(window_start).take(visible_rows).enumerate() {
        let index = window_start + offset;
        let cursor = if index == app.results_cursor { ">" } else { " " };
        let texts: Vec<String> = (0..result.columns.len())
            .map(|column| cell_text(row.get(column)))
            .collect();
        lines.push(Line::from(format!(
            "{cursor} {}",
            format_cells(texts.iter().map(String::as_str), &widths)
        )));
    }
    lines
}

/// A cell missing from a short row is blank; a null value reads `NULL`.
fn cell_text(value: Option<&Scalar>) -> String {
    match value {
        Some(value) => scalar_text(value).unwrap_or_else(|| NULL_TEXT.to_string()),
        None => String::new(),
    }
}

fn column_widths(columns: &[String], rows: &[Vec<Scalar>]) -> Vec<usize> {
    columns
        .iter()
        .enumerate()
        .map(|(index, column)| {
            rows.iter()
                .map(|row| cell_text(row.get(index)).chars().count())
                .chain(std::iter::once(column.chars().count()))
                .max()
                .unwrap_or(0)
                .min(MAX_CELL_WIDTH)
        })
        .collect()
}

fn format_cells<'a>(cells: impl Iterator<Item = &'a str>, widths: &[usize]) -> String {
    cells
        .zip(widths)
        .map(|(cell, &width)| {
            let truncated: String = cell
                .chars()
                .map(|character| if character.is_control() { ' ' } else { character })
                .take(width)
                .collect();
            format!("{truncated:<width$}")
        })
        .collect::<Vec<_>>()
        .join(" | ")
}

fn footer_hint(app: &TuiApp) -> String {
    if app.form.is_some() {
        return "Tab: next field | Enter: save | Esc: cancel".to_string();
    }
    if app.pending_delete.is_some() {
        return "y: confirm delete | any other key: cancel".to_string();
    }
    match app.pane {
        Pane::Connections => "Enter: use | a: add | t: test | d: delete | Ctrl+R: reload",
        Pane::Schema => "Enter/Right: expand | Left: collapse | Ctrl+R: reload schema",
        Pane::Query => "Type a question | Enter: generate SQL",
        Pane::Sql => "Edit SQL | Enter: execute",
        Pane::Results => "Arrows: scroll | F5: export CSV | F6: export JSON",
    }
    .to_string()
}

fn render_connection_form(frame: &mut Frame<'_>, form: &ConnectionForm) {
    let area = centered_rect(60, 40, frame.area());
    frame.render_widget(Clear, area);

    let marker = |field: FormField| if form.active_field == field { ">" } else { " " };
    let mut lines = vec![
        Line::from(format!("{} Name: {}", marker(FormField::Name), form.name)),
        Line::from(format!(
            "{} Connection string: {}",
            marker(FormField::ConnectionString),
            form.connection_string
        )),
        Line::from(""),
    ];
    for error in &form.errors {
        lines.push(Line::from(Span::styled(
            error.to_string(),
            Style::default().fg(Color::Red),
        )));
    }

    let widget = Paragraph::new(lines)
        .wrap(Wrap { trim: false })
        .block(Block::default().borders(Borders::ALL).title("Add connection"));
    frame.render_widget(widget, area);
}

fn render_toasts(frame: &mut Frame<'_>, app: &TuiApp) {
    let notifications = app.session.notifications();
    let skip = notifications.len().saturating_sub(MAX_VISIBLE_TOASTS);
    let area = frame.area();
    let width = (area.width / 3).max(30).min(area.width);
    let mut y = area.y + 1;

    for notification in notifications.active().skip(skip) {
        if y + 3 > area.bottom() {
            break;
        }
        let color = match notification.severity {
            Severity::Success => Color::Green,
            Severity::Error => Color::Red,
            Severity::Info => Color::Blue,
            Severity::Warning => Color::Yellow,
        };
        let toast_area = Rect::new(area.right().saturating_sub(width + 1), y, width, 3);
        frame.render_widget(Clear, toast_area);
        let toast = Paragraph::new(notification.text.clone()).block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(color))
                .title(notification.severity.label()),
        );
        frame.render_widget(toast, toast_area);
        y += 3;
    }
}

fn render_help_popup(frame: &mut Frame<'_>) {
    let area = centered_rect(70, 60, frame.area());
    frame.render_widget(Clear, area);
    let help = Paragraph::new(vec![
        Line::from("Global keymap"),
        Line::from("Ctrl+Q: quit"),
        Line::from("F1: toggle help"),
        Line::from("Tab / Shift+Tab: cycle panes"),
        Line::from("Enter: act on the focused pane"),
        Line::from("Esc: cancel dialog or dismiss newest notification"),
        Line::from("Ctrl+R: reload connections or schema"),
        Line::from("F5 / F6: export results as CSV / JSON"),
        Line::from("Arrows: navigation"),
    ])
    .block(Block::default().borders(Borders::ALL).title("Help"));
    frame.render_widget(help, area);
}

fn centered_rect(width_percent: u16, height_percent: u16, area: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100_u16 - height_percent) / 2),
            Constraint::Percentage(height_percent),
            Constraint::Percentage((100_u16 - height_percent) / 2),
        ])
        .split(area);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100_u16 - width_percent) / 2),
            Constraint::Percentage(width_percent),
            Constraint::Percentage((100_u16 - width_percent) / 2),
        ])
        .split(vertical[1])[1]
}

fn map_key_event(key: KeyEvent) -> Option<Msg> {
    match (key.modifiers, key.code) {
        (KeyModifiers::CONTROL, KeyCode::Char('q')) => Some(Msg::Quit),
        (KeyModifiers::CONTROL, KeyCode::Char('r')) => Some(Msg::Refresh),
        (_, KeyCode::F(1)) => Some(Msg::ToggleHelp),
        (_, KeyCode::F(5)) => Some(Msg::Export(ExportFormat::Csv)),
        (_, KeyCode::F(6)) => Some(Msg::Export(ExportFormat::Json)),
        (_, KeyCode::Tab) => Some(Msg::NextPane),
        (_, KeyCode::BackTab) => Some(Msg::PreviousPane),
        (_, KeyCode::Enter) => Some(Msg::Submit),
        (_, KeyCode::Esc) => Some(Msg::Cancel),
        (_, KeyCode::Backspace) => Some(Msg::Backspace),
        (_, KeyCode::Up) => Some(Msg::Navigate(DirectionKey::Up)),
        (_, KeyCode::Down) => Some(Msg::Navigate(DirectionKey::Down)),
        (_, KeyCode::Left) => Some(Msg::Navigate(DirectionKey::Left)),
        (_, KeyCode::Right) => Some(Msg::Navigate(DirectionKey::Right)),
        (KeyModifiers::NONE | KeyModifiers::SHIFT, KeyCode::Char(character)) => {
            Some(Msg::Input(character))
        }
        _ => None,
    }
}
