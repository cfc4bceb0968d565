use std::io::Write;

use crossterm::{
    cursor,
    event::{self, Event as CrossTermEvent, KeyCode, KeyEvent, KeyEventKind},
    style, terminal, ExecutableCommand, QueueableCommand,
};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::engine::direction::Direction;
use crate::engine::game::GameStatus;
use crate::error::{Error, Result};
use crate::session::{Session, SessionView};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum UserInput {
    Direction(Direction),
    NewGame,
    Quit,
}

/// Terminal puts the terminal into raw mode on an alternate screen for as long as it lives.
pub(crate) struct Terminal<T: Write> {
    w: T,
}

impl<T: Write> Terminal<T> {
    pub(crate) fn new(mut w: T) -> Result<Self> {
        terminal::enable_raw_mode()?;
        w.execute(terminal::EnterAlternateScreen)?;
        Ok(Self { w })
    }

    fn render(&mut self, view: &SessionView, status_line: &str) -> Result<()> {
        self.w.queue(terminal::BeginSynchronizedUpdate)?;
        self.w.queue(terminal::Clear(terminal::ClearType::All))?;
        for (y, line) in screen(view, status_line).iter().enumerate() {
            self.w.queue(cursor::MoveTo(0, y as u16))?;
            self.w.queue(style::Print(line))?;
        }
        self.w.queue(terminal::EndSynchronizedUpdate)?;
        self.w.flush()?;
        Ok(())
    }
}

impl<T: Write> Drop for Terminal<T> {
    fn drop(&mut self) {
        if let Err(e) = self.w.execute(terminal::LeaveAlternateScreen) {
            log::error!("leaving alternate screen: {e}");
        }
        if let Err(e) = terminal::disable_raw_mode() {
            log::error!("disabling raw mode: {e}");
        }
    }
}

/// Play drives a session from the keyboard.
pub(crate) struct Play {
    session: Session,
    rng: StdRng,
}

impl Play {
    pub(crate) fn new(session: Session, rng: StdRng) -> Self {
        Self { session, rng }
    }

    pub(crate) fn run<T: Write>(mut self, terminal: &mut Terminal<T>) -> Result<Session> {
        self.new_game()?;
        let mut status_line = String::from("arrows or hjkl to move, n for a new game, q to quit");
        loop {
            terminal.render(&self.session.view(), &status_line)?;
            match next_input()? {
                UserInput::Direction(direction) => {
                    status_line = match self.session.play(direction) {
                        Ok(Some(applied)) => format!("{direction}: +{}", applied.score_delta),
                        Ok(None) => format!("{direction} does not move anything"),
                        Err(Error::GameOver) => "game over, press n for a new game".to_string(),
                        Err(e) => return Err(e),
                    };
                }
                UserInput::NewGame => {
                    self.new_game()?;
                    status_line = "new game".to_string();
                }
                UserInput::Quit => break,
            }
        }
        Ok(self.session)
    }

    fn new_game(&mut self) -> Result<()> {
        let rng = StdRng::from_rng(&mut self.rng).map_err(anyhow::Error::from)?;
        self.session.new_game(rng)
    }
}

/// The lines shown for a session view.
pub(crate) fn screen(view: &SessionView, status_line: &str) -> Vec<String> {
    let mut lines = vec![format!(
        "score {}  moves {}  {}",
        view.score, view.moves, view.status
    )];
    if let Some(board) = view.board {
        lines.push(String::new());
        lines.extend(board.to_string().lines().map(str::to_string));
        lines.push(String::new());
    }
    if view.status == GameStatus::Playing {
        lines.push(format!("legal: {}", view.allowed));
    }
    if let Some(previous) = view.previous_move {
        lines.push(format!("last move: {previous}"));
    }
    lines.push(status_line.to_string());
    lines
}

/// Block until the next key press that means something.
fn next_input() -> Result<UserInput> {
    loop {
        if let CrossTermEvent::Key(ke) = event::read()? {
            if let Some(input) = handle_key_event(ke) {
                return Ok(input);
            }
        }
    }
}

fn handle_key_event(ke: KeyEvent) -> Option<UserInput> {
    if ke.kind != KeyEventKind::Press {
        return None;
    }
    match ke.code {
        KeyCode::Left | KeyCode::Char('h') => Some(UserInput::Direction(Direction::Left)),
        KeyCode::Right | KeyCode::Char('l') => Some(UserInput::Direction(Direction::Right)),
        KeyCode::Up | KeyCode::Char('k') => Some(UserInput::Direction(Direction::Up)),
        KeyCode::Down | KeyCode::Char('j') => Some(UserInput::Direction(Direction::Down)),
        KeyCode::Char('n') => Some(UserInput::NewGame),
        KeyCode::Char('q') | KeyCode::Esc => Some(UserInput::Quit),
        _ => None,
    }
}
