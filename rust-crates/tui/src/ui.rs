use chrono::{
    DateTime,
    Local,
};
use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use crossterm::{
    event::{
        self,
        Event,
        KeyCode,
        KeyEvent,
        KeyEventKind,
        KeyModifiers,
    },
    terminal::{
        disable_raw_mode,
        enable_raw_mode,
    },
};
use guess_client::{
    actions::{
        ActionKind,
        ActionState,
    },
    commitment::GuessInput,
    coordinator::Command,
    notification::{
        Notification,
        NotificationLevel,
    },
    phase::Phase,
    snapshot::GameSnapshot,
};
use guess_game::wallets;
use ratatui::{
    prelude::*,
    widgets::*,
};
use std::{
    collections::VecDeque,
    io::stdout,
};
use tokio::sync::mpsc;

const MAX_NOTIFICATIONS: usize = 50;
const MAX_GUESS_DIGITS: usize = 4;
const MAX_SALT_DIGITS: usize = 78;

const RULES: &str = "Long time ago in the Ethereum universe... Only the master jedi can \
start the game, but every padavan can play. To join the quest, connect your wallet. \
If the game has started, enter your guess and your salt, a mysterious number that \
makes your guess secure. Every player has a fixed number of blocks to submit the \
guess, and after that, the same to reveal it. The force will be strong with the one \
who guesses right. The winner gets the prize, minus the master jedi's fee. May the \
force be with you.";

pub enum UserEvent {
    Quit,
    Redraw,
    Command(Command),
    /// Input the form refused; shown as a warning.
    Rejected(String),
}

pub type InputEventReceiver = mpsc::UnboundedReceiver<std::io::Result<Event>>;

#[derive(Debug, Default)]
pub struct UiState {
    mode: Mode,
    notifications: VecDeque<LoggedNotification>,
    terminal: Option<Terminal<CrosstermBackend<std::io::Stdout>>>,
}

#[derive(Clone, Debug)]
struct LoggedNotification {
    at: DateTime<Local>,
    notification: Notification,
}

impl UiState {
    pub fn push_notification(&mut self, notification: Notification) {
        self.notifications.push_front(LoggedNotification {
            at: Local::now(),
            notification,
        });
        self.notifications.truncate(MAX_NOTIFICATIONS);
    }
}

#[derive(Clone, Default)]
enum Mode {
    #[default]
    Normal,
    PassphraseModal(PassphraseState),
    GuessModal(GuessForm),
    QuitModal,
}

impl std::fmt::Debug for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // never print typed secrets
        let name = match self {
            Mode::Normal => "Normal",
            Mode::PassphraseModal(_) => "PassphraseModal",
            Mode::GuessModal(_) => "GuessModal",
            Mode::QuitModal => "QuitModal",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Default)]
struct PassphraseState {
    input: String,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum GuessField {
    #[default]
    Guess,
    Salt,
}

impl GuessField {
    fn toggled(self) -> Self {
        match self {
            GuessField::Guess => GuessField::Salt,
            GuessField::Salt => GuessField::Guess,
        }
    }
}

#[derive(Clone, Default)]
struct GuessForm {
    reveal: bool,
    guess: String,
    salt: String,
    focus: GuessField,
    visible: bool,
}

impl GuessForm {
    fn new(reveal: bool) -> Self {
        GuessForm {
            reveal,
            // revealing happens in the open
            visible: reveal,
            ..GuessForm::default()
        }
    }

    fn focused_mut(&mut self) -> (&mut String, usize) {
        match self.focus {
            GuessField::Guess => (&mut self.guess, MAX_GUESS_DIGITS),
            GuessField::Salt => (&mut self.salt, MAX_SALT_DIGITS),
        }
    }

    fn submit(&self) -> std::result::Result<Command, String> {
        let input = GuessInput::parse(&self.guess, &self.salt).map_err(|e| e.to_string())?;
        Ok(if self.reveal {
            Command::RevealSaltAndGuess(input)
        } else {
            Command::EnterGuess(input)
        })
    }

    fn display(&self, value: &str) -> String {
        if self.visible {
            value.to_string()
        } else {
            "*".repeat(value.len())
        }
    }
}

pub fn terminal_enter(state: &mut UiState) -> Result<()> {
    enable_raw_mode()?;
    crossterm::execute!(std::io::stdout(), crossterm::terminal::EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout());
    let terminal = Terminal::new(backend)?;
    state.terminal = Some(terminal);
    Ok(())
}

pub fn terminal_exit() -> Result<()> {
    disable_raw_mode()?;
    crossterm::execute!(std::io::stdout(), crossterm::terminal::LeaveAlternateScreen)?;
    Ok(())
}

pub fn draw(state: &mut UiState, snap: &GameSnapshot) -> Result<()> {
    if let Some(mut term) = state.terminal.take() {
        term.draw(|f| ui(f, state, snap))?;
        state.terminal = Some(term);
    }
    Ok(())
}

/// Terminal input is read on a dedicated thread; `event::read` blocks.
pub fn input_event_stream() -> InputEventReceiver {
    let (tx, rx) = mpsc::unbounded_channel();
    let spawned = std::thread::Builder::new()
        .name("terminal-input".to_string())
        .spawn(move || {
            loop {
                let event = event::read();
                let failed = event.is_err();
                if tx.send(event).is_err() || failed {
                    break;
                }
            }
        });
    if let Err(err) = spawned {
        tracing::error!(%err, "failed to start terminal input thread");
    }
    rx
}

pub async fn next_raw_event(input_events: &mut InputEventReceiver) -> Result<Event> {
    match input_events.recv().await {
        Some(event) => event.wrap_err("reading terminal input failed"),
        None => Err(eyre!("terminal input stream closed")),
    }
}

pub fn interpret_event(
    state: &mut UiState,
    snap: &GameSnapshot,
    event: Event,
) -> Option<UserEvent> {
    let key = match event {
        Event::Key(key) if key.kind == KeyEventKind::Press => key,
        Event::Resize(_, _) => return Some(UserEvent::Redraw),
        _ => return None,
    };
    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        return Some(UserEvent::Quit);
    }

    match &mut state.mode {
        Mode::PassphraseModal(ps) => match key.code {
            KeyCode::Esc => {
                state.mode = Mode::Normal;
                Some(UserEvent::Redraw)
            }
            KeyCode::Enter => {
                let passphrase = std::mem::take(&mut ps.input);
                state.mode = Mode::Normal;
                Some(UserEvent::Command(Command::Connect { passphrase }))
            }
            KeyCode::Backspace => {
                ps.input.pop();
                Some(UserEvent::Redraw)
            }
            KeyCode::Char(c) => {
                ps.input.push(c);
                Some(UserEvent::Redraw)
            }
            _ => None,
        },
        Mode::GuessModal(form) => interpret_guess_key(form, key).map(|outcome| {
            if matches!(outcome, FormOutcome::Close | FormOutcome::Submitted(_)) {
                state.mode = Mode::Normal;
            }
            match outcome {
                FormOutcome::Submitted(command) => UserEvent::Command(command),
                FormOutcome::Rejected(message) => UserEvent::Rejected(message),
                FormOutcome::Close | FormOutcome::Edited => UserEvent::Redraw,
            }
        }),
        Mode::QuitModal => match key.code {
            KeyCode::Char('y') | KeyCode::Char('Y') | KeyCode::Enter => Some(UserEvent::Quit),
            KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => {
                state.mode = Mode::Normal;
                Some(UserEvent::Redraw)
            }
            _ => None,
        },
        Mode::Normal => interpret_normal_key(state, snap, key),
    }
}

enum FormOutcome {
    Edited,
    Close,
    Submitted(Command),
    Rejected(String),
}

fn interpret_guess_key(form: &mut GuessForm, key: KeyEvent) -> Option<FormOutcome> {
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    match key.code {
        KeyCode::Esc => Some(FormOutcome::Close),
        KeyCode::Enter => Some(match form.submit() {
            Ok(command) => FormOutcome::Submitted(command),
            Err(message) => FormOutcome::Rejected(message),
        }),
        KeyCode::Tab | KeyCode::BackTab | KeyCode::Up | KeyCode::Down => {
            form.focus = form.focus.toggled();
            Some(FormOutcome::Edited)
        }
        KeyCode::Char('r') if ctrl => {
            form.salt = wallets::random_salt().to_string();
            Some(FormOutcome::Edited)
        }
        KeyCode::Char('v') if ctrl => {
            form.visible = !form.visible;
            Some(FormOutcome::Edited)
        }
        KeyCode::Backspace => {
            form.focused_mut().0.pop();
            Some(FormOutcome::Edited)
        }
        KeyCode::Char(c) if c.is_ascii_digit() && !ctrl => {
            let (field, max_len) = form.focused_mut();
            if field.len() < max_len {
                field.push(c);
            }
            Some(FormOutcome::Edited)
        }
        _ => None,
    }
}

fn interpret_normal_key(
    state: &mut UiState,
    snap: &GameSnapshot,
    key: KeyEvent,
) -> Option<UserEvent> {
    let action = |kind: ActionKind, command: Command| {
        snap.is_available(kind).then_some(UserEvent::Command(command))
    };
    match key.code {
        KeyCode::Char('q') | KeyCode::Esc => {
            state.mode = Mode::QuitModal;
            Some(UserEvent::Redraw)
        }
        KeyCode::Char('c') if can_connect(snap) => {
            state.mode = Mode::PassphraseModal(PassphraseState::default());
            Some(UserEvent::Redraw)
        }
        KeyCode::Char('d') if snap.session.connected => {
            Some(UserEvent::Command(Command::Disconnect))
        }
        KeyCode::Char('s') => action(ActionKind::StartGame, Command::StartGame),
        KeyCode::Char('g') => {
            let form = if snap.is_available(ActionKind::EnterGuess) {
                GuessForm::new(false)
            } else if snap.is_available(ActionKind::RevealSaltAndGuess) {
                GuessForm::new(true)
            } else {
                return None;
            };
            state.mode = Mode::GuessModal(form);
            Some(UserEvent::Redraw)
        }
        KeyCode::Char('w') => action(
            ActionKind::CalculateWinningGuess,
            Command::CalculateWinningGuess,
        ),
        KeyCode::Char('x') => action(ActionKind::SelectWinner, Command::SelectWinner),
        KeyCode::Char('r') if !snap.is_inert() => {
            Some(UserEvent::Command(Command::RefreshWinners))
        }
        _ => None,
    }
}

fn can_connect(snap: &GameSnapshot) -> bool {
    !snap.is_inert() && !snap.session.connected && !snap.session.connecting
}

/// Key help for what can be done right now.
fn available_keys(snap: &GameSnapshot) -> Vec<&'static str> {
    let mut keys = Vec::new();
    if can_connect(snap) {
        keys.push("c connect");
    }
    if snap.session.connected {
        keys.push("d disconnect");
    }
    if snap.is_available(ActionKind::StartGame) {
        keys.push("s start game");
    }
    if snap.is_available(ActionKind::EnterGuess) {
        keys.push("g enter guess");
    } else if snap.is_available(ActionKind::RevealSaltAndGuess) {
        keys.push("g reveal guess");
    }
    if snap.is_available(ActionKind::CalculateWinningGuess) {
        keys.push("w calculate winning guess");
    }
    if snap.is_available(ActionKind::SelectWinner) {
        keys.push("x select winner");
    }
    if !snap.is_inert() {
        keys.push("r refresh winners");
    }
    keys.push("q/Esc quit");
    keys
}

fn countdown_text(blocks: u64) -> Option<String> {
    match blocks {
        0 => None,
        1 => Some("1 block is remaining".to_string()),
        n => Some(format!("{n} blocks are remaining")),
    }
}

fn wallet_status(snap: &GameSnapshot) -> String {
    let session = &snap.session;
    if session.connecting {
        return "Connecting...".to_string();
    }
    match session.primary_account() {
        Some(account) => format!("Connected {account}"),
        None => "Disconnected".to_string(),
    }
}

fn action_state_text(state: &ActionState) -> String {
    match state {
        ActionState::Idle => "-".to_string(),
        ActionState::Pending { tx_hash: Some(hash) } => format!("pending {hash}"),
        ActionState::Pending { tx_hash: None } => "awaiting signature".to_string(),
        ActionState::Confirmed { block } => format!("confirmed in block {block}"),
        ActionState::Failed { reason } => format!("failed: {reason}"),
    }
}

fn level_style(level: NotificationLevel) -> Style {
    match level {
        NotificationLevel::Info => Style::default(),
        NotificationLevel::Pending => Style::default().fg(Color::Cyan),
        NotificationLevel::Success => Style::default().fg(Color::Green),
        NotificationLevel::Warning => Style::default().fg(Color::Yellow),
        NotificationLevel::Error => Style::default().fg(Color::Red),
    }
}

fn yes_no(flag: bool) -> &'static str {
    if flag { "yes" } else { "no" }
}

fn winning_guess_text(snap: &GameSnapshot) -> String {
    snap.winning_guess
        .map_or_else(|| "N/A".to_string(), |guess| guess.to_string())
}

/// Owner-only actions are hidden from players.
fn listed_actions(snap: &GameSnapshot) -> Vec<ActionKind> {
    ActionKind::ALL
        .into_iter()
        .filter(|kind| !kind.owner_only() || snap.is_contract_owner)
        .collect()
}

fn ui(f: &mut Frame, state: &UiState, snap: &GameSnapshot) {
    f.render_widget(Clear, f.area());
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // wallet + block
            Constraint::Length(7), // rules
            Constraint::Length(5), // phase banner + countdown
            Constraint::Min(8),    // round, winners, actions
            Constraint::Length(9), // notifications
            Constraint::Length(3), // help
        ])
        .split(f.area());

    draw_header(f, chunks[0], snap);
    draw_rules(f, chunks[1]);
    draw_phase(f, chunks[2], snap);
    draw_round(f, chunks[3], snap);
    draw_notifications(f, state, chunks[4]);
    draw_help(f, chunks[5], snap);
    draw_modals(f, state, snap);
}

fn draw_header(f: &mut Frame, area: Rect, snap: &GameSnapshot) {
    let block_text = snap
        .current_block
        .map_or_else(|| "N/A".to_string(), |b| b.to_string());
    let mut spans = vec![Span::raw(format!("Wallet: {}", wallet_status(snap)))];
    if snap.is_contract_owner {
        spans.push(Span::raw(" | "));
        spans.push(Span::styled(
            "Owner",
            Style::default().fg(Color::Magenta).add_modifier(Modifier::BOLD),
        ));
    }
    spans.push(Span::raw(format!(" | Block: {block_text}")));
    let widget = Paragraph::new(Line::from(spans))
        .block(Block::default().borders(Borders::ALL).title("Guessing game"));
    f.render_widget(widget, area);
}

fn draw_rules(f: &mut Frame, area: Rect) {
    let widget = Paragraph::new(RULES)
        .wrap(Wrap { trim: true })
        .block(Block::default().borders(Borders::ALL).title("Rules"));
    f.render_widget(widget, area);
}

fn draw_phase(f: &mut Frame, area: Rect, snap: &GameSnapshot) {
    let mut lines: Vec<Line> = Vec::new();
    if let Some(notice) = &snap.provider_notice {
        lines.push(Line::styled(
            notice.clone(),
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        ));
        lines.push(Line::from("The game cannot be reached. Press q to quit."));
    } else {
        match snap.phase {
            Phase::Submission => lines.push(Line::styled(
                "SUBMISSION PHASE IS OPEN",
                Style::default().fg(Color::Green).add_modifier(Modifier::BOLD),
            )),
            Phase::Reveal => lines.push(Line::styled(
                "REVEAL PHASE IS OPEN",
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
            )),
            Phase::Idle => lines.push(Line::styled(
                "No phase is open",
                Style::default().fg(Color::DarkGray),
            )),
        }
        if !snap.phase.is_idle() {
            if let Some(text) = snap.blocks_remaining.and_then(countdown_text) {
                lines.push(Line::from(text));
            }
        }
        if let Some(window) = snap.window {
            lines.push(Line::from(format!(
                "Round started at block {} | submission ends at {} | reveal ends at {}",
                window.start_block,
                window.end_submission_block(),
                window.end_reveal_block()
            )));
        }
    }
    let widget = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title("Phase"));
    f.render_widget(widget, area);
}

fn draw_round(f: &mut Frame, area: Rect, snap: &GameSnapshot) {
    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(30),
            Constraint::Percentage(35),
            Constraint::Percentage(35),
        ])
        .split(area);

    let min_players = snap
        .min_num_players
        .map_or_else(|| "N/A".to_string(), |n| n.to_string());
    let fee = snap
        .participation_fee
        .map_or_else(|| "N/A".to_string(), |fee| format!("{fee} wei"));
    let round = Paragraph::new(vec![
        Line::from(format!("Players: {} (min {min_players})", snap.players.len())),
        Line::from(format!("Participation fee: {fee}")),
        Line::from(format!(
            "Guesses submitted: {}",
            yes_no(snap.progress.is_guesses_submitted)
        )),
        Line::from(format!(
            "Winning guess calculated: {}",
            yes_no(snap.progress.is_winning_guess_calculated)
        )),
        Line::from(format!("Winning guess: {}", winning_guess_text(snap))),
    ])
    .block(Block::default().borders(Borders::ALL).title("Round"));
    f.render_widget(round, cols[0]);

    let winners: Vec<ListItem> = if snap.winners.is_empty() {
        vec![ListItem::new("No winners yet")]
    } else {
        snap.winners
            .iter()
            .map(|winner| ListItem::new(format!("{winner:?}")))
            .collect()
    };
    let winners =
        List::new(winners).block(Block::default().borders(Borders::ALL).title("Winners"));
    f.render_widget(winners, cols[1]);

    let actions: Vec<Line> = listed_actions(snap)
        .into_iter()
        .map(|kind| {
            let state = snap.action_state(kind);
            let style = match state {
                ActionState::Pending { .. } => Style::default().fg(Color::Cyan),
                ActionState::Confirmed { .. } => Style::default().fg(Color::Green),
                ActionState::Failed { .. } => Style::default().fg(Color::Red),
                ActionState::Idle => Style::default(),
            };
            Line::styled(format!("{kind}: {}", action_state_text(state)), style)
        })
        .collect();
    let actions = Paragraph::new(actions)
        .wrap(Wrap { trim: false })
        .block(Block::default().borders(Borders::ALL).title("Actions"));
    f.render_widget(actions, cols[2]);
}

fn draw_notifications(f: &mut Frame, state: &UiState, area: Rect) {
    let lines: Vec<Line> = if state.notifications.is_empty() {
        vec![Line::from("Ready")]
    } else {
        state
            .notifications
            .iter()
            .map(|logged| {
                Line::styled(
                    format!("{} {}", logged.at.format("%H:%M:%S"), logged.notification),
                    level_style(logged.notification.level),
                )
            })
            .collect()
    };
    let widget = Paragraph::new(lines)
        .wrap(Wrap { trim: false })
        .block(Block::default().borders(Borders::ALL).title("Notifications"));
    f.render_widget(widget, area);
}

fn draw_help(f: &mut Frame, area: Rect, snap: &GameSnapshot) {
    let help = Paragraph::new(available_keys(snap).join(" | "))
        .block(Block::default().borders(Borders::ALL).title("Help"));
    f.render_widget(help, area);
}

fn draw_modals(f: &mut Frame, state: &UiState, snap: &GameSnapshot) {
    match &state.mode {
        Mode::PassphraseModal(ps) => {
            let area = centered_rect(50, 20, f.area());
            let block = Block::default()
                .borders(Borders::ALL)
                .title("Unlock keystore");
            let lines = vec![
                Line::from(format!("Passphrase: {}", "*".repeat(ps.input.chars().count()))),
                Line::from(""),
                Line::from("Enter=connect, Esc=cancel"),
            ];
            f.render_widget(Clear, area);
            f.render_widget(block.clone(), area);
            f.render_widget(Paragraph::new(lines), block.inner(area));
        }
        Mode::GuessModal(form) => {
            let area = centered_rect(60, 35, f.area());
            let title = if form.reveal {
                "Reveal your guess"
            } else {
                "Submit your guess"
            };
            let block = Block::default().borders(Borders::ALL).title(title);
            let marker = |field: GuessField| if form.focus == field { "> " } else { "  " };
            let mut lines = vec![
                Line::from(format!(
                    "{}Your guess: {}",
                    marker(GuessField::Guess),
                    form.display(&form.guess)
                )),
                Line::from(format!(
                    "{}Your salt:  {}",
                    marker(GuessField::Salt),
                    form.display(&form.salt)
                )),
                Line::from(""),
            ];
            if !form.reveal {
                if let Some(fee) = snap.participation_fee {
                    lines.push(Line::from(format!("Entering costs {fee} wei")));
                }
                lines.push(Line::from(
                    "Keep your guess and salt: both are needed to reveal.",
                ));
            }
            lines.push(Line::from(
                "Tab=switch field, Ctrl-r=random salt, Ctrl-v=show/hide, Enter=confirm, Esc=cancel",
            ));
            f.render_widget(Clear, area);
            f.render_widget(block.clone(), area);
            f.render_widget(
                Paragraph::new(lines).wrap(Wrap { trim: false }),
                block.inner(area),
            );
        }
        Mode::QuitModal => {
            let area = centered_rect(40, 20, f.area());
            let block = Block::default().borders(Borders::ALL).title("Confirm Quit");
            let p = Paragraph::new("Quit the game? (Y/N)");
            f.render_widget(Clear, area);
            f.render_widget(block.clone(), area);
            f.render_widget(p, block.inner(area));
        }
        Mode::Normal => {}
    }
}

fn centered_rect(w_percent: u16, h_percent: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - h_percent) / 2),
            Constraint::Percentage(h_percent),
            Constraint::Percentage((100 - h_percent) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - w_percent) / 2),
            Constraint::Percentage(w_percent),
            Constraint::Percentage((100 - w_percent) / 2),
        ])
        .split(popup_layout[1])[1]
}
