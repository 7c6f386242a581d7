//! Server-Sent Events frame builder.
//!
//! Gives exact control over the wire format: `event:` and `id:` lines when
//! set, a `data:` line per payload line, and the terminating blank line.

use std::fmt;

#[derive(Debug, Default, Clone)]
pub struct Event {
    event: Option<String>,
    id: Option<String>,
    data: Option<String>,
}

impl Event {
    /// Sets the `event` field (the event name).
    pub fn event<T: Into<String>>(mut self, event: T) -> Self {
        self.event = Some(event.into());
        self
    }

    /// Sets the `id` field.
    pub fn id<T: fmt::Display>(mut self, id: T) -> Self {
        self.id = Some(id.to_string());
        self
    }

    /// Sets the `data` field. Embedded newlines become multiple `data:`
    /// lines per the SSE specification.
    pub fn data<T: Into<String>>(mut self, data: T) -> Self {
        self.data = Some(data.into());
        self
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(event) = &self.event {
            write!(f, "event: {}\n", event)?;
        }
        if let Some(id) = &self.id {
            write!(f, "id: {}\n", id)?;
        }
        if let Some(data) = &self.data {
            if data.is_empty() {
                // SSE still requires a data line when the payload is empty
                f.write_str("data: \n")?;
            } else {
                for line in data.lines() {
                    write!(f, "data: {}\n", line)?;
                }
            }
        }
        f.write_str("\n")
    }
}
