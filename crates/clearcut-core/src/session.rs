//! Owned review state: the current query, its table and the listeners that
//! mirror it.
//!
//! `Empty → Loading → Loaded`. Edits are committed synchronously and leave
//! the session `Loaded`; exports are side effects only. While `Loading`,
//! every other transition is refused.

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::{AlertError, EditError, ExportError, Result};
use crate::export::{self, ExportFormat};
use crate::pipeline::{AlertQuery, Pipeline};
use crate::table::{AlertPatch, AlertTable, Mutation};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Empty,
    Loading,
    Loaded,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionState::Empty => "empty",
            SessionState::Loading => "loading",
            SessionState::Loaded => "loaded",
        })
    }
}

/// What listeners are told.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The table was dropped.
    Reset,
    Loading,
    Loaded { count: usize },
    Edited { id: u32 },
    Exported { path: PathBuf },
    Failed { message: String },
}

type Listener = Box<dyn Fn(&SessionEvent) + Send + Sync>;

#[derive(Default)]
pub struct AlertSession {
    state: SessionState,
    query: Option<AlertQuery>,
    table: Option<AlertTable>,
    listeners: Vec<Listener>,
}

impl AlertSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn table(&self) -> Option<&AlertTable> {
        self.table.as_ref()
    }

    pub fn subscribe(&mut self, listener: impl Fn(&SessionEvent) + Send + Sync + 'static) {
        self.listeners.push(Box::new(listener));
    }

    fn emit(&self, event: SessionEvent) {
        debug!(?event, state = %self.state, "session event");
        for l in &self.listeners {
            l(&event);
        }
    }

    fn refuse_while_loading(&self, action: &'static str) -> Result<()> {
        if self.state == SessionState::Loading {
            return Err(AlertError::InvalidState { state: self.state.to_string(), action });
        }
        Ok(())
    }

    /// Drop the current table.
    pub fn reset(&mut self) -> Result<()> {
        self.refuse_while_loading("reset")?;
        if self.state != SessionState::Empty {
            self.table = None;
            self.query = None;
            self.state = SessionState::Empty;
            self.emit(SessionEvent::Reset);
        }
        Ok(())
    }

    /// Validate `query`, drop the previous table and enter `Loading`.
    pub fn begin_query(&mut self, query: AlertQuery) -> Result<()> {
        self.refuse_while_loading("start a query")?;
        query.validate()?;
        self.reset()?;
        self.query = Some(query);
        self.state = SessionState::Loading;
        self.emit(SessionEvent::Loading);
        Ok(())
    }

    /// Leave `Loading` with the outcome of the load. A failure returns the
    /// session to `Empty`.
    pub fn finish_query(&mut self, outcome: Result<AlertTable>) -> Result<&AlertTable> {
        if self.state != SessionState::Loading {
            return Err(AlertError::InvalidState { state: self.state.to_string(), action: "finish a query" });
        }
        match outcome {
            Ok(table) => {
                let count = table.len();
                self.state = SessionState::Loaded;
                info!(count, "session loaded");
                self.emit(SessionEvent::Loaded { count });
                let table = &*self.table.insert(table);
                Ok(table)
            }
            Err(e) => {
                warn!(error = %e, "query failed");
                self.state = SessionState::Empty;
                self.query = None;
                self.emit(SessionEvent::Failed { message: e.to_string() });
                Err(e)
            }
        }
    }

    /// Replace the table with the result of `query` run through `pipeline`.
    pub fn query(&mut self, pipeline: &Pipeline, query: AlertQuery) -> Result<&AlertTable> {
        self.begin_query(query)?;
        let outcome = match &self.query {
            Some(q) => pipeline.run(q),
            None => Err(AlertError::MissingInput("query".into())),
        };
        self.finish_query(outcome)
    }

    /// Commit one row mutation; the updated row is returned.
    pub fn edit(&mut self, id: u32, mutation: Mutation) -> std::result::Result<AlertPatch, EditError> {
        if self.state == SessionState::Loading {
            return Err(EditError::Busy(self.state.to_string()));
        }
        let table = self.table.as_mut().ok_or(EditError::NotLoaded)?;
        let row = table.edit(id, mutation)?.clone();
        self.emit(SessionEvent::Edited { id });
        Ok(row)
    }

    /// Write the table to `path`; the state does not change.
    pub fn export(&self, format: ExportFormat, path: &Path) -> Result<()> {
        self.refuse_while_loading("export")?;
        let table = self.table.as_ref().ok_or(ExportError::NotLoaded)?;
        export::write(table, format, path)?;
        self.emit(SessionEvent::Exported { path: path.to_path_buf() });
        Ok(())
    }
}

impl fmt::Debug for AlertSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlertSession")
            .field("state", &self.state)
            .field("rows", &self.table.as_ref().map(AlertTable::len))
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
