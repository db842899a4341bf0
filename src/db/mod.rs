//! Database module: entity models, SQL repositories and change notification.
//!
//! - `model`: typed row views returned by repositories.
//! - `repo`: SQL-only functions that map rows into entities.
//!
//! External modules import from `showsync::db`; the repository API is
//! re-exported here.

use tokio::sync::broadcast;
use tracing::debug;

pub mod model;
pub mod repo;

pub use repo::*;

pub use model::{EpisodeRow, SearchHit, ShowRow};

/// What part of the content store changed. Views subscribe to refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeTopic {
    Shows,
    Episodes,
}

/// Broadcasts content store changes to any number of readers.
#[derive(Debug, Clone)]
pub struct ChangeNotifier {
    tx: broadcast::Sender<ChangeTopic>,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(64);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeTopic> {
        self.tx.subscribe()
    }

    pub fn notify(&self, topic: ChangeTopic) {
        // No receivers is fine; nobody is looking.
        if self.tx.send(topic).is_err() {
            debug!(?topic, "change notification without subscribers");
        }
    }
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new()
    }
}
