//! Embedded SQL migrations

/// Migration metadata
pub struct Migration {
    pub id: &'static str,
    pub sql: &'static str,
}

/// All embedded migrations in order
pub fn get_migrations() -> Vec<Migration> {
    vec![
        Migration {
            id: "001_snapshots",
            sql: include_str!("../../migrations/001_snapshots.sql"),
        },
        Migration {
            id: "002_collection_jobs",
            sql: include_str!("../../migrations/002_collection_jobs.sql"),
        },
        Migration {
            id: "003_ingestion_records",
            sql: include_str!("../../migrations/003_ingestion_records.sql"),
        },
        Migration {
            id: "004_devices",
            sql: include_str!("../../migrations/004_devices.sql"),
        },
        Migration {
            id: "005_audit_events",
            sql: include_str!("../../migrations/005_audit_events.sql"),
        },
        Migration {
            id: "006_devices_cadence_day",
            sql: include_str!("../../migrations/006_devices_cadence_day.sql"),
        },
        Migration {
            id: "007_collection_requests",
            sql: include_str!("../../migrations/007_collection_requests.sql"),
        },
    ]
}
