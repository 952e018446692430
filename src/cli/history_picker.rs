use std::io::{self, Write};

use anyhow::Result;
use chrono::Local;
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use tracing::debug;
use uuid::Uuid;

use crate::history::{HistoryEntry, HistoryStore};

const PREVIEW_CHARS: usize = 70;

/// Full-screen history browser.
///
/// Typing narrows the list, Space marks entries, Enter picks the marked
/// entries (or the highlighted one when nothing is marked).
pub struct HistoryPicker<'a> {
    store: &'a mut HistoryStore,
    selected_index: usize,
    search_term: String,
}

impl<'a> HistoryPicker<'a> {
    pub fn new(store: &'a mut HistoryStore) -> Self {
        store.clear_selection();
        Self {
            store,
            selected_index: 0,
            search_term: String::new(),
        }
    }

    /// Run the picker. Returns the chosen ids, or `None` if it was dismissed.
    pub fn show(&mut self) -> Result<Option<Vec<Uuid>>> {
        enable_raw_mode()?;
        execute!(io::stdout(), EnterAlternateScreen)?;

        let result = self.run_picker();

        disable_raw_mode()?;
        execute!(io::stdout(), LeaveAlternateScreen)?;

        result
    }

    fn run_picker(&mut self) -> Result<Option<Vec<Uuid>>> {
        loop {
            self.draw()?;

            if let Event::Key(key_event) = event::read()? {
                match self.handle_key_event(key_event) {
                    PickerAction::Exit => return Ok(None),
                    PickerAction::Select => {
                        let chosen = self.chosen();
                        if !chosen.is_empty() {
                            debug!("Picked {} entries", chosen.len());
                            return Ok(Some(chosen));
                        }
                    }
                    PickerAction::Continue => {}
                }
            }
        }
    }

    fn visible_entries(&self) -> Vec<&HistoryEntry> {
        self.store.search(&self.search_term)
    }

    fn highlighted(&self) -> Option<Uuid> {
        self.visible_entries()
            .get(self.selected_index)
            .map(|entry| entry.id())
    }

    fn chosen(&self) -> Vec<Uuid> {
        let marked = self.store.selected_ids();
        if marked.is_empty() {
            self.highlighted().into_iter().collect()
        } else {
            marked
        }
    }

    fn draw(&self) -> Result<()> {
        let mut out = io::stdout();
        write!(out, "\x1B[2J\x1B[H")?; // Clear screen and move cursor to top

        write!(out, "ClipKeep History\r\n")?;
        write!(out, "================\r\n")?;
        write!(
            out,
            "Type to search, Up/Down to move, Space to mark, Enter to copy, Esc to exit\r\n"
        )?;
        if !self.search_term.is_empty() {
            write!(out, "Search: {}\r\n", self.search_term)?;
        }
        write!(out, "\r\n")?;

        for (i, entry) in self.visible_entries().iter().enumerate() {
            let cursor = if i == self.selected_index { "> " } else { "  " };
            let mark = if self.store.is_selected(entry.id()) { "[x]" } else { "[ ]" };
            let pin = if entry.is_pinned { "*" } else { " " };

            write!(
                out,
                "{}{} {}{} {:<7} | {}\r\n",
                cursor,
                mark,
                pin,
                entry.timestamp.with_timezone(&Local).format("%m-%d %H:%M"),
                entry.category(),
                entry.label(PREVIEW_CHARS)
            )?;
        }

        out.flush()?;
        Ok(())
    }

    fn handle_key_event(&mut self, key_event: KeyEvent) -> PickerAction {
        if key_event.kind == KeyEventKind::Release {
            return PickerAction::Continue;
        }

        match key_event.code {
            KeyCode::Esc => PickerAction::Exit,
            KeyCode::Enter => PickerAction::Select,
            KeyCode::Up => {
                self.selected_index = self.selected_index.saturating_sub(1);
                PickerAction::Continue
            }
            KeyCode::Down => {
                let visible = self.visible_entries().len();
                if self.selected_index + 1 < visible {
                    self.selected_index += 1;
                }
                PickerAction::Continue
            }
            KeyCode::Char(' ') => {
                if let Some(id) = self.highlighted() {
                    self.store.toggle_selection(id);
                }
                PickerAction::Continue
            }
            KeyCode::Char(c) => {
                self.search_term.push(c);
                self.selected_index = 0;
                PickerAction::Continue
            }
            KeyCode::Backspace => {
                self.search_term.pop();
                self.selected_index = 0;
                PickerAction::Continue
            }
            _ => PickerAction::Continue,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum PickerAction {
    Continue,
    Select,
    Exit,
}

impl Drop for HistoryPicker<'_> {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen);
    }
}
