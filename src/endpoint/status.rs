//! Endpoint status reporting.

use std::fmt;

use serde::Serialize;

use crate::transport::LinkEvent;

/// Status shown to the user for an attached endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "kebab-case")]
pub enum LinkStatus {
    /// Port open.
    Connected,
    /// Port closed or not yet open.
    NotConnected,
    /// Transport error.
    Error(String),
}

impl LinkStatus {
    /// Maps a link event to a status change; data events map to `None`.
    #[must_use]
    pub fn from_event(event: &LinkEvent) -> Option<Self> {
        match event {
            LinkEvent::Ready => Some(Self::Connected),
            LinkEvent::Closed => Some(Self::NotConnected),
            LinkEvent::Error(detail) => Some(Self::Error(detail.clone())),
            LinkEvent::Data(_) => None,
        }
    }
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected => f.write_str("connected"),
            Self::NotConnected => f.write_str("not connected"),
            Self::Error(detail) => write!(f, "error: {detail}"),
        }
    }
}

/// Status callback, invoked on the endpoint's task for every change.
pub type StatusHandler = Box<dyn Fn(LinkStatus) + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    #[test]
    fn test_from_event() {
        assert_eq!(
            LinkStatus::from_event(&LinkEvent::Ready),
            Some(LinkStatus::Connected)
        );
        assert_eq!(
            LinkStatus::from_event(&LinkEvent::Closed),
            Some(LinkStatus::NotConnected)
        );
        assert_eq!(
            LinkStatus::from_event(&LinkEvent::Error("EIO".into())),
            Some(LinkStatus::Error("EIO".into()))
        );
        assert_eq!(
            LinkStatus::from_event(&LinkEvent::Data(Arc::from(&b"x"[..]))),
            None
        );
    }

    #[test]
    fn test_serialize() {
        let json = serde_json::to_value(LinkStatus::Error("busy".into())).unwrap();
        assert_eq!(json, serde_json::json!({ "status": "error", "detail": "busy" }));

        let json = serde_json::to_value(LinkStatus::NotConnected).unwrap();
        assert_eq!(json, serde_json::json!({ "status": "not-connected" }));
    }
}
