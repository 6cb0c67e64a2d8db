//! Event fields posted to the log server.
//!
//! The numeric codes are part of the collector's form contract.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum EventType {
    Generic = 0,
    Boot = 1,
    Shutdown = 2,
    Update = 3,
    Transfer = 4,
    Processing = 5,
    Storage = 6,
    Archive = 7,
    Security = 8,
    Maintenance = 9,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum EventDetail {
    Information = 0,
    Start = 1,
    End = 2,
    Failure = 3,
    Violation = 4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum Severity {
    Success = 0,
    Information = 1,
    Warning = 2,
    Error = 3,
    Critical = 4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum SourceType {
    #[default]
    Generic = 0,
    Client = 1,
    Server = 2,
    Agent = 3,
}

/// One audit event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFields {
    pub event_type: EventType,
    pub detail: EventDetail,
    pub severity: Severity,
    pub info: String,
    pub data: String,
}

impl EventFields {
    pub fn new(event_type: EventType, detail: EventDetail, severity: Severity) -> Self {
        Self {
            event_type,
            detail,
            severity,
            info: String::new(),
            data: String::new(),
        }
    }

    pub fn with_info(mut self, info: impl Into<String>) -> Self {
        self.info = info.into();
        self
    }

    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = data.into();
        self
    }

    /// Form body; `ip` and `time` are filled in by the server
    pub fn to_form(&self, source_id: &str, source_type: SourceType) -> Vec<(&'static str, String)> {
        vec![
            ("ip", "0".to_string()),
            ("time", "0".to_string()),
            ("info", self.info.clone()),
            ("data", self.data.clone()),
            ("type", (self.event_type as u8).to_string()),
            ("detail", (self.detail as u8).to_string()),
            ("severity", (self.severity as u8).to_string()),
            ("source_id", source_id.to_string()),
            ("source_type", (source_type as u8).to_string()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_form_fields() {
        let fields = EventFields::new(EventType::Transfer, EventDetail::Failure, Severity::Warning)
            .with_info("upload failed")
            .with_data("abc-123");

        let form = fields.to_form("scanner-7", SourceType::Client);
        let names: Vec<_> = form.iter().map(|(k, _)| *k).collect();
        assert_eq!(
            names,
            vec!["ip", "time", "info", "data", "type", "detail", "severity", "source_id", "source_type"]
        );
        assert_eq!(form[0].1, "0");
        assert_eq!(form[1].1, "0");
        assert_eq!(form[4].1, "4");
        assert_eq!(form[5].1, "3");
        assert_eq!(form[6].1, "2");
        assert_eq!(form[7].1, "scanner-7");
        assert_eq!(form[8].1, "1");
    }
}
