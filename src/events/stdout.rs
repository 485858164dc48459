//! Standard output event handler
//!
//! The default handler: prints each change event as pretty JSON. Useful for
//! demos and for verifying a pipeline end to end before wiring a real sink.

use crate::core::{CdcError, CdcResult};
use crate::events::{CdcEvent, EventHandler};
use async_trait::async_trait;
use std::io::{self, Write};
use tracing::debug;

/// Event handler that writes events to standard output
pub struct StdoutHandler;

impl StdoutHandler {
    pub fn new() -> Self {
        Self
    }
}

impl Default for StdoutHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventHandler for StdoutHandler {
    async fn handle(&self, event: CdcEvent) -> CdcResult<()> {
        debug!("Writing {} event for {} to stdout", event.operation, event.qualified_table());

        let json = serde_json::to_string_pretty(&event)
            .map_err(|e| CdcError::handler(format!("event serialization failed: {}", e)))?;

        let mut stdout = io::stdout();
        writeln!(stdout, "{}", json)?;
        stdout.flush()?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Operation;

    #[tokio::test]
    async fn test_stdout_handler_accepts_event() {
        let handler = StdoutHandler::new();
        let event = CdcEvent::new(
            Operation::Insert,
            "public".to_string(),
            "users".to_string(),
            vec!["id".to_string()],
            None,
            Some(Default::default()),
        );

        assert!(handler.handle(event).await.is_ok());
    }
}
