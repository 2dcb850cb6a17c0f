//! Aggregated status line.

use std::cell::RefCell;
use std::rc::Rc;

/// Separator between the parts of the status line.
const SEPARATOR: &str = "   ";

/// Latest text from each source.
#[derive(Debug, Default)]
pub struct StatusBoard {
    song: Option<String>,
    ups: Option<String>,
    dirty: bool,
}

/// Status shared between the watchers and their task handlers.
pub type SharedStatus = Rc<RefCell<StatusBoard>>;

impl StatusBoard {
    pub fn shared() -> SharedStatus {
        Rc::new(RefCell::new(Self::default()))
    }

    pub fn song(&self) -> Option<&str> {
        self.song.as_deref()
    }

    pub fn ups(&self) -> Option<&str> {
        self.ups.as_deref()
    }

    pub fn set_song(&mut self, song: Option<String>) {
        if self.song != song {
            self.song = song;
            self.dirty = true;
        }
    }

    pub fn set_ups(&mut self, ups: Option<String>) {
        if self.ups != ups {
            self.ups = ups;
            self.dirty = true;
        }
    }

    /// Returns whether anything changed since the last call.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    pub fn render(&self) -> String {
        [self.song.as_deref(), self.ups.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(SEPARATOR)
    }
}
