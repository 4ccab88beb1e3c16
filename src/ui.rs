use anyhow::Result;
use bank_marketing::{
    analysis::{self, Exploration},
    check_integrity, get_all_marketing_rows, IntegrityReport, MarketingRow, AGE_GROUPS,
};
use crossterm::{
    event::{self, Event, KeyCode, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table, TableState},
    Frame, Terminal,
};
use rusqlite::Connection;
use std::io;

const PAGE_STEP: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    Facts,
    Exploration,
    Integrity,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterType {
    None,
    AgeGroup(String),
    Subscribed,
    NotSubscribed,
}

impl FilterType {
    fn matches(&self, row: &MarketingRow) -> bool {
        match self {
            FilterType::None => true,
            FilterType::AgeGroup(group) => &row.age_group == group,
            FilterType::Subscribed => row.subscribed,
            FilterType::NotSubscribed => !row.subscribed,
        }
    }

    fn label(&self) -> String {
        match self {
            FilterType::None => "All".to_string(),
            FilterType::AgeGroup(group) => format!("Age {}", group),
            FilterType::Subscribed => "Subscribed".to_string(),
            FilterType::NotSubscribed => "Not Subscribed".to_string(),
        }
    }
}

impl Page {
    pub fn next(&self) -> Self {
        match self {
            Page::Facts => Page::Exploration,
            Page::Exploration => Page::Integrity,
            Page::Integrity => Page::Facts,
        }
    }

    pub fn previous(&self) -> Self {
        match self {
            Page::Facts => Page::Integrity,
            Page::Exploration => Page::Facts,
            Page::Integrity => Page::Exploration,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            Page::Facts => "Facts",
            Page::Exploration => "Exploration",
            Page::Integrity => "Integrity",
        }
    }
}

pub struct App {
    pub rows: Vec<MarketingRow>,
    /// Indexes into `rows` passing the active filter
    pub visible: Vec<usize>,
    pub state: TableState,
    pub current_page: Page,
    pub show_detail: bool,
    pub filter: FilterType,
    pub exploration: Option<Exploration>,
    pub integrity: Option<IntegrityReport>,
}

impl App {
    pub fn new(rows: Vec<MarketingRow>) -> Self {
        let mut state = TableState::default();
        if !rows.is_empty() {
            state.select(Some(0));
        }
        let visible = (0..rows.len()).collect();

        Self {
            rows,
            visible,
            state,
            current_page: Page::Facts,
            show_detail: false,
            filter: FilterType::None,
            exploration: None,
            integrity: None,
        }
    }

    /// Facts plus the exploration and integrity snapshots
    pub fn load(conn: &Connection) -> Result<Self> {
        let mut app = App::new(get_all_marketing_rows(conn)?);
        app.exploration = Some(analysis::explore(conn)?);
        app.integrity = Some(check_integrity(conn)?);
        Ok(app)
    }

    pub fn toggle_detail(&mut self) {
        self.show_detail = !self.show_detail;
    }

    pub fn selected_row(&self) -> Option<&MarketingRow> {
        self.state
            .selected()
            .and_then(|i| self.visible.get(i))
            .and_then(|&idx| self.rows.get(idx))
    }

    pub fn apply_filter(&mut self, filter: FilterType) {
        self.visible = self
            .rows
            .iter()
            .enumerate()
            .filter(|(_, row)| filter.matches(row))
            .map(|(i, _)| i)
            .collect();
        self.filter = filter;

        // Reset selection to first item
        if self.visible.is_empty() {
            self.state.select(None);
        } else {
            self.state.select(Some(0));
        }
    }

    pub fn clear_filter(&mut self) {
        self.apply_filter(FilterType::None);
    }

    pub fn next_page(&mut self) {
        self.current_page = self.current_page.next();
    }

    pub fn previous_page(&mut self) {
        self.current_page = self.current_page.previous();
    }

    pub fn next(&mut self) {
        let len = self.visible.len();
        if len == 0 {
            return;
        }
        let i = match self.state.selected() {
            Some(i) if i + 1 < len => i + 1,
            _ => 0,
        };
        self.state.select(Some(i));
    }

    pub fn previous(&mut self) {
        let len = self.visible.len();
        if len == 0 {
            return;
        }
        let i = match self.state.selected() {
            Some(0) | None => len - 1,
            Some(i) => i - 1,
        };
        self.state.select(Some(i));
    }

    pub fn page_down(&mut self) {
        let len = self.visible.len();
        if len == 0 {
            return;
        }
        let i = self
            .state
            .selected()
            .map(|i| (i + PAGE_STEP).min(len - 1))
            .unwrap_or(0);
        self.state.select(Some(i));
    }

    pub fn page_up(&mut self) {
        if self.visible.is_empty() {
            return;
        }
        let i = self
            .state
            .selected()
            .map(|i| i.saturating_sub(PAGE_STEP))
            .unwrap_or(0);
        self.state.select(Some(i));
    }

    pub fn last(&mut self) {
        if !self.visible.is_empty() {
            self.state.select(Some(self.visible.len() - 1));
        }
    }

    /// (subscribed, not subscribed) over the visible rows
    pub fn outcome_counts(&self) -> (usize, usize) {
        let subscribed = self
            .visible
            .iter()
            .filter(|&&i| self.rows[i].subscribed)
            .count();
        (subscribed, self.visible.len() - subscribed)
    }
}

pub fn run_ui(app: &mut App) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let res = run_app(&mut terminal, app);

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        println!("Error: {:?}", err);
    }

    Ok(())
}

fn run_app<B: ratatui::backend::Backend>(
    terminal: &mut Terminal<B>,
    app: &mut App,
) -> io::Result<()> {
    loop {
        terminal.draw(|f| ui(f, app))?;

        if let Event::Key(key) = event::read()? {
            match key.code {
                KeyCode::Char('q') | KeyCode::Esc => return Ok(()),
                KeyCode::Enter => app.toggle_detail(),
                KeyCode::Tab => {
                    if key.modifiers.contains(KeyModifiers::SHIFT) {
                        app.previous_page();
                    } else {
                        app.next_page();
                    }
                }
                KeyCode::BackTab => app.previous_page(),
                KeyCode::Char('c') => app.clear_filter(),
                KeyCode::Char(c @ '1'..='4') => {
                    let idx = c as usize - '1' as usize;
                    app.apply_filter(FilterType::AgeGroup(AGE_GROUPS[idx].to_string()));
                    app.current_page = Page::Facts;
                }
                KeyCode::Char('y') => {
                    app.apply_filter(FilterType::Subscribed);
                    app.current_page = Page::Facts;
                }
                KeyCode::Char('n') => {
                    app.apply_filter(FilterType::NotSubscribed);
                    app.current_page = Page::Facts;
                }
                KeyCode::Down | KeyCode::Char('j') => app.next(),
                KeyCode::Up | KeyCode::Char('k') => app.previous(),
                KeyCode::PageDown => app.page_down(),
                KeyCode::PageUp => app.page_up(),
                KeyCode::Home => app.state.select(Some(0)),
                KeyCode::End => app.last(),
                _ => {}
            }
        }
    }
}

fn ui(f: &mut Frame, app: &mut App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header with navigation
            Constraint::Min(0),    // Content area
            Constraint::Length(3), // Status bar
        ])
        .split(f.size());

    render_header(f, chunks[0], app);

    if app.show_detail && app.current_page == Page::Facts {
        let content_chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
            .split(chunks[1]);

        render_table(f, content_chunks[0], app);
        render_detail_panel(f, content_chunks[1], app);
    } else {
        match app.current_page {
            Page::Facts => render_table(f, chunks[1], app),
            Page::Exploration => render_exploration(f, chunks[1], app),
            Page::Integrity => render_integrity(f, chunks[1], app),
        }
    }

    render_status_bar(f, chunks[2], app);
}

fn render_header(f: &mut Frame, area: Rect, app: &App) {
    let (subscribed, not_subscribed) = app.outcome_counts();

    let mut tab_spans = vec![];
    for (i, page) in [Page::Facts, Page::Exploration, Page::Integrity].iter().enumerate() {
        if i > 0 {
            tab_spans.push(Span::raw(" │ "));
        }

        let style = if *page == app.current_page {
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD | Modifier::UNDERLINED)
        } else {
            Style::default().fg(Color::DarkGray)
        };

        tab_spans.push(Span::styled(page.title().to_string(), style));
    }

    tab_spans.push(Span::raw("  |  "));
    tab_spans.push(Span::styled(
        format!("Facts: {}", app.rows.len()),
        Style::default().fg(Color::White),
    ));
    tab_spans.push(Span::raw("  |  "));
    tab_spans.push(Span::styled(
        format!("✓ {}", subscribed),
        Style::default().fg(Color::Green),
    ));
    tab_spans.push(Span::raw("  "));
    tab_spans.push(Span::styled(
        format!("✗ {}", not_subscribed),
        Style::default().fg(Color::Red),
    ));

    let header = Paragraph::new(vec![Line::from(tab_spans)]).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Cyan)),
    );

    f.render_widget(header, area);
}

fn outcome_color(subscribed: bool) -> Color {
    if subscribed {
        Color::Green
    } else {
        Color::Red
    }
}

fn render_table(f: &mut Frame, area: Rect, app: &mut App) {
    let header_cells = ["Fact", "Age", "Group", "Job", "Contact", "Month", "Duration", "Outcome"]
        .iter()
        .map(|h| {
            Cell::from(*h).style(
                Style::default()
                    .fg(Color::Yellow)
                    .add_modifier(Modifier::BOLD),
            )
        });

    let header = Row::new(header_cells)
        .style(Style::default().bg(Color::DarkGray))
        .height(1);

    let rows = app.visible.iter().map(|&i| {
        let row = &app.rows[i];
        let color = outcome_color(row.subscribed);

        Row::new(vec![
            Cell::from(row.fact_id.to_string()),
            Cell::from(row.age.to_string()),
            Cell::from(row.age_group.clone()),
            Cell::from(truncate(&row.job, 14)),
            Cell::from(row.contact.clone()),
            Cell::from(row.month.clone()),
            Cell::from(format!("{}s {}", row.duration, row.duration_length)),
            Cell::from(row.subscribed_label.clone()).style(Style::default().fg(color)),
        ])
        .height(1)
    });

    let title = format!(" Marketing Facts - {} ", app.filter.label());
    let table = Table::new(
        rows,
        [
            Constraint::Length(8),
            Constraint::Length(5),
            Constraint::Length(7),
            Constraint::Length(15),
            Constraint::Length(10),
            Constraint::Length(6),
            Constraint::Length(14),
            Constraint::Length(15),
        ],
    )
    .header(header)
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White))
            .title(title),
    )
    .highlight_style(
        Style::default()
            .bg(Color::DarkGray)
            .add_modifier(Modifier::BOLD),
    )
    .highlight_symbol("→ ");

    f.render_stateful_widget(table, area, &mut app.state);
}

fn render_status_bar(f: &mut Frame, area: Rect, app: &App) {
    let selected = app.state.selected().map(|i| i + 1).unwrap_or(0);

    let mut status_spans = vec![Span::styled(
        format!(" Row: {}/{} ", selected, app.visible.len()),
        Style::default().fg(Color::Cyan),
    )];

    if app.filter != FilterType::None {
        status_spans.push(Span::raw(" | "));
        status_spans.push(Span::styled(
            format!("Filter: {}", app.filter.label()),
            Style::default().fg(Color::Green),
        ));
        status_spans.push(Span::raw(" ("));
        status_spans.push(Span::styled("c", Style::default().fg(Color::Yellow)));
        status_spans.push(Span::raw(" clear)"));
    }

    status_spans.push(Span::raw(" | "));
    for (key, action) in [
        ("1-4", " Age | "),
        ("y/n", " Outcome | "),
        ("Enter", " Details | "),
        ("Tab", " Page | "),
        ("↑/↓", " Nav | "),
    ] {
        status_spans.push(Span::styled(key, Style::default().fg(Color::Yellow)));
        status_spans.push(Span::raw(action));
    }
    status_spans.push(Span::styled("q", Style::default().fg(Color::Red)));
    status_spans.push(Span::raw(" Quit"));

    let status_bar = Paragraph::new(vec![Line::from(status_spans)]).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White)),
    );

    f.render_widget(status_bar, area);
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}

fn heading(text: &str) -> Line<'static> {
    Line::from(Span::styled(
        format!("  {}", text),
        Style::default()
            .fg(Color::Cyan)
            .add_modifier(Modifier::BOLD),
    ))
}

/// Horizontal bar scaled to `max`
fn bar(value: f64, max: f64, width: usize) -> String {
    if max <= 0.0 {
        return String::new();
    }
    let filled = ((value / max) * width as f64).round() as usize;
    "█".repeat(filled.min(width))
}

fn render_exploration(f: &mut Frame, area: Rect, app: &App) {
    let Some(exploration) = &app.exploration else {
        let empty = Paragraph::new("  No exploration data loaded").block(
            Block::default()
                .borders(Borders::ALL)
                .title(" Exploration "),
        );
        f.render_widget(empty, area);
        return;
    };

    let mut content = vec![
        Line::from(""),
        heading(&format!(
            "Contacts: {}   Subscription rate: {:.1}%",
            exploration.total_contacts,
            exploration.subscription_rate * 100.0
        )),
        Line::from(""),
        heading("Age groups"),
    ];

    let max_group = exploration
        .age_groups
        .iter()
        .map(|g| g.count)
        .max()
        .unwrap_or(0) as f64;
    for group in &exploration.age_groups {
        content.push(Line::from(vec![
            Span::raw(format!("    {:<6} {:>7} ", group.label, group.count)),
            Span::styled(bar(group.count as f64, max_group, 30), Style::default().fg(Color::Blue)),
        ]));
    }

    content.push(Line::from(""));
    content.push(heading("Contact duration vs outcome"));
    for d in &exploration.durations {
        content.push(Line::from(vec![
            Span::raw(format!("    {:<7} {:>7} contacts  ", d.duration_length, d.contacts)),
            Span::styled(
                format!("{:>5.1}% subscribed", d.subscription_rate * 100.0),
                Style::default().fg(Color::Green),
            ),
        ]));
    }

    content.push(Line::from(""));
    content.push(heading("Subscription by job"));
    for job in &exploration.jobs {
        content.push(Line::from(vec![
            Span::raw(format!("    {:<14} ", job.job)),
            Span::styled(format!("{:>6}", job.subscribed), Style::default().fg(Color::Green)),
            Span::raw(" / "),
            Span::styled(format!("{:<6}", job.not_subscribed), Style::default().fg(Color::Red)),
            Span::styled(
                bar(job.subscription_rate, 1.0, 20),
                Style::default().fg(Color::Green),
            ),
        ]));
    }

    content.push(Line::from(""));
    content.push(heading("Numeric columns (mean / median / max)"));
    for s in &exploration.summary {
        content.push(Line::from(format!(
            "    {:<10} {:>10} {:>10} {:>10}",
            s.column,
            s.mean.map(|v| format!("{:.2}", v)).unwrap_or_default(),
            s.median.map(|v| format!("{:.1}", v)).unwrap_or_default(),
            s.max.map(|v| format!("{:.0}", v)).unwrap_or_default(),
        )));
    }

    let paragraph = Paragraph::new(content).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White))
            .title(" Exploration "),
    );

    f.render_widget(paragraph, area);
}

fn render_integrity(f: &mut Frame, area: Rect, app: &App) {
    let Some(report) = &app.integrity else {
        let empty = Paragraph::new("  Integrity not checked").block(
            Block::default()
                .borders(Borders::ALL)
                .title(" Integrity "),
        );
        f.render_widget(empty, area);
        return;
    };

    let header = Row::new(["", "Check", "Table", "Violations"].iter().map(|h| {
        Cell::from(*h).style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD))
    }))
    .style(Style::default().bg(Color::DarkGray));

    let rows = report.checks.iter().map(|check| {
        let (mark, color) = if check.passed() {
            ("✓", Color::Green)
        } else {
            ("✗", Color::Red)
        };
        Row::new(vec![
            Cell::from(mark).style(Style::default().fg(color)),
            Cell::from(check.description.clone()),
            Cell::from(check.table.clone()),
            Cell::from(check.violations.to_string()).style(Style::default().fg(color)),
        ])
    });

    let table = Table::new(
        rows,
        [
            Constraint::Length(2),
            Constraint::Min(40),
            Constraint::Length(12),
            Constraint::Length(10),
        ],
    )
    .header(header)
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White))
            .title(format!(" {} ", report.summary())),
    );

    f.render_widget(table, area);
}

fn detail_line(label: &str, value: String) -> Line<'static> {
    Line::from(vec![
        Span::styled(
            format!("  {}: ", label),
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        ),
        Span::raw(value),
    ])
}

fn section(title: &str) -> Vec<Line<'static>> {
    vec![
        Line::from(""),
        Line::from(Span::styled(
            format!("  {}", title),
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD | Modifier::UNDERLINED),
        )),
    ]
}

fn render_detail_panel(f: &mut Frame, area: Rect, app: &App) {
    let Some(row) = app.selected_row() else {
        let no_selection = Paragraph::new("No fact selected").block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Yellow))
                .title(" Fact Details "),
        );
        f.render_widget(no_selection, area);
        return;
    };

    let mut content = section("CLIENT");
    content.extend([
        detail_line("Client ID", row.client_id.to_string()),
        detail_line("Age", format!("{} ({})", row.age, row.age_group)),
        detail_line("Job", row.job.clone()),
        detail_line("Marital", row.marital.clone()),
        detail_line("Education", row.education.clone()),
        detail_line("Default", row.credit_default.clone()),
        detail_line(
            "Balance",
            row.balance.map(|b| b.to_string()).unwrap_or_else(|| "-".to_string()),
        ),
        detail_line("Housing", row.housing.clone()),
        detail_line("Loan", row.loan.clone()),
    ]);

    content.extend(section("CONTACT"));
    content.extend([
        detail_line("Contact ID", row.contact_id.to_string()),
        detail_line("Channel", row.contact.clone()),
        detail_line("Date", format!("{} {}", row.day, row.month)),
        detail_line("Duration", format!("{}s ({})", row.duration, row.duration_length)),
    ]);

    content.extend(section("CAMPAIGN"));
    content.extend([
        detail_line("Campaign ID", row.campaign_id.to_string()),
        detail_line("Contacts", row.campaign.to_string()),
        detail_line("Days since", row.pdays.to_string()),
        detail_line("Previous", row.previous.to_string()),
        detail_line("Prev outcome", row.poutcome.clone()),
    ]);

    content.push(Line::from(""));
    content.push(Line::from(vec![
        Span::styled(
            "  Outcome: ",
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        ),
        Span::styled(
            row.subscribed_label.clone(),
            Style::default()
                .fg(outcome_color(row.subscribed))
                .add_modifier(Modifier::BOLD),
        ),
    ]));
    content.push(Line::from(""));
    content.push(Line::from(Span::styled(
        "  Press Enter to close",
        Style::default()
            .fg(Color::DarkGray)
            .add_modifier(Modifier::ITALIC),
    )));

    let detail_panel = Paragraph::new(content).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Yellow))
            .title(format!(" Fact {} ", row.fact_id)),
    );

    f.render_widget(detail_panel, area);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(fact_id: i64, age_group: &str, subscribed: bool) -> MarketingRow {
        MarketingRow {
            fact_id,
            client_id: fact_id,
            contact_id: fact_id,
            campaign_id: fact_id,
            age: 40,
            age_group: age_group.to_string(),
            job: "admin.".to_string(),
            marital: "married".to_string(),
            education: "secondary".to_string(),
            credit_default: "no".to_string(),
            balance: Some(100),
            housing: "yes".to_string(),
            loan: "no".to_string(),
            contact: "cellular".to_string(),
            month: "may".to_string(),
            day: 5,
            duration: 200,
            duration_length: "medium".to_string(),
            campaign: 1,
            pdays: -1,
            previous: 0,
            poutcome: "unknown".to_string(),
            subscribed,
            subscribed_label: if subscribed { "Subscribed" } else { "Not Subscribed" }.to_string(),
        }
    }

    fn app() -> App {
        App::new(vec![
            row(1, "18-29", false),
            row(2, "30-44", true),
            row(3, "30-44", false),
            row(4, "60+", true),
        ])
    }

    #[test]
    fn test_filters() {
        let mut app = app();

        app.apply_filter(FilterType::AgeGroup("30-44".to_string()));
        assert_eq!(app.visible, vec![1, 2]);
        assert_eq!(app.selected_row().map(|r| r.fact_id), Some(2));

        app.apply_filter(FilterType::Subscribed);
        assert_eq!(app.outcome_counts(), (2, 0));

        app.apply_filter(FilterType::AgeGroup("45-59".to_string()));
        assert!(app.visible.is_empty());
        assert!(app.selected_row().is_none());

        app.clear_filter();
        assert_eq!(app.visible.len(), 4);
    }

    #[test]
    fn test_navigation_wraps() {
        let mut app = app();

        app.previous();
        assert_eq!(app.state.selected(), Some(3));
        app.next();
        assert_eq!(app.state.selected(), Some(0));

        app.page_down();
        assert_eq!(app.state.selected(), Some(3));
        app.page_up();
        assert_eq!(app.state.selected(), Some(0));
    }

    #[test]
    fn test_page_cycle() {
        let mut app = app();

        app.next_page();
        assert_eq!(app.current_page, Page::Exploration);
        app.next_page();
        app.next_page();
        assert_eq!(app.current_page, Page::Facts);
        app.previous_page();
        assert_eq!(app.current_page, Page::Integrity);
    }

    #[test]
    fn test_bar_and_truncate() {
        assert_eq!(bar(5.0, 10.0, 10), "█████");
        assert_eq!(bar(1.0, 0.0, 10), "");
        assert_eq!(truncate("blue-collar", 8), "blue-...");
        assert_eq!(truncate("admin.", 8), "admin.");
    }
}
