//! Helpers for handler tests.

use axum_test::TestServer;

use crate::config::{Config, ResourceSeed, SchedulerConfig};

/// Two ICU beds and one ventilator, with the scheduler off so tests control every matching pass.
pub fn create_test_config() -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        default_resource_type: "ICU_BED".to_string(),
        resources: vec![
            ResourceSeed {
                resource_type: "ICU_BED".to_string(),
                count: 2,
            },
            ResourceSeed {
                resource_type: "VENTILATOR".to_string(),
                count: 1,
            },
        ],
        scheduler: SchedulerConfig {
            enabled: false,
            ..Default::default()
        },
        ..Default::default()
    }
}

pub async fn create_test_app() -> (TestServer, crate::BackgroundServices) {
    let config = create_test_config();
    let app = crate::Application::new(config).expect("Failed to create application");
    app.into_test_server()
}
