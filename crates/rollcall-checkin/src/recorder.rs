use chrono::{DateTime, Local, Utc};
use serde::Serialize;

use crate::store::{RecordStore, StoreError};

/// One attendance fact. Append-only: created once per successful check-in.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendanceEvent {
    pub id: String,
    pub subject_id: String,
    pub identity_id: String,
    pub display_name: String,
    pub timestamp: DateTime<Utc>,
    /// Calendar date (`YYYY-MM-DD`) of `timestamp` on the device's local clock.
    pub date: String,
}

impl AttendanceEvent {
    pub fn new(
        identity_id: &str,
        display_name: &str,
        subject_id: &str,
        at: DateTime<Local>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            subject_id: subject_id.to_string(),
            identity_id: identity_id.to_string(),
            display_name: display_name.to_string(),
            timestamp: at.with_timezone(&Utc),
            date: at.date_naive().format("%Y-%m-%d").to_string(),
        }
    }
}

/// Writes the attendance event that closes a fully verified check-in.
pub struct SessionRecorder<'a, S: RecordStore> {
    store: &'a S,
}

impl<'a, S: RecordStore> SessionRecorder<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Stamp and append one event. The write is not read back.
    pub async fn record(
        &self,
        identity_id: &str,
        display_name: &str,
        subject_id: &str,
    ) -> Result<AttendanceEvent, StoreError> {
        let event = AttendanceEvent::new(identity_id, display_name, subject_id, Local::now());
        self.store.append_attendance(&event).await?;
        tracing::info!(
            event_id = %event.id,
            identity = identity_id,
            subject = subject_id,
            date = %event.date,
            "attendance recorded"
        );
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::AttendanceStore;
    use chrono::TimeZone;
    use std::path::Path;

    #[test]
    fn test_date_uses_local_calendar_day() {
        let at = Local.with_ymd_and_hms(2026, 1, 15, 23, 30, 0).unwrap();
        let event = AttendanceEvent::new("stu-1", "Asha Verma", "cs-301", at);
        assert_eq!(event.date, "2026-01-15");
        assert_eq!(event.timestamp, at.with_timezone(&Utc));
    }

    #[test]
    fn test_events_get_distinct_ids() {
        let at = Local::now();
        let a = AttendanceEvent::new("stu-1", "Asha", "cs-301", at);
        let b = AttendanceEvent::new("stu-1", "Asha", "cs-301", at);
        assert_ne!(a.id, b.id);
    }

    #[tokio::test]
    async fn test_record_appends_exactly_one_event() {
        let store = AttendanceStore::open(Path::new(":memory:")).await.unwrap();
        let recorder = SessionRecorder::new(&store);

        let event = recorder.record("stu-1", "Asha Verma", "cs-301").await.unwrap();
        assert_eq!(event.date, Local::now().date_naive().format("%Y-%m-%d").to_string());

        let history = store.list_attendance("stu-1", Some("cs-301")).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, event.id);
        assert_eq!(history[0].display_name, "Asha Verma");
    }
}
