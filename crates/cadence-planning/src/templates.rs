//! Template work items

use crate::work_item::{WorkItem, WorkUnit};
use cadence_core::kinds;

/// A seven-group example work item touching every builtin kind
pub fn example_work_item() -> WorkItem {
    WorkItem {
        name: "order-notifications".to_string(),
        description: "Notify customers by email and SMS when an order changes state".to_string(),
        units: vec![
            WorkUnit::new("order-model", kinds::FOUNDATION_MODEL)
                .with_title("Order aggregate")
                .with_targets(["src/domain/order.rs"]),
            WorkUnit::new("order-events", kinds::FOUNDATION_MODEL)
                .with_title("Order state-change events")
                .with_targets(["src/domain/events.rs"]),
            WorkUnit::new("notifier-port", kinds::CONTRACT)
                .with_title("Notifier port")
                .depends_on(["order-model", "order-events"])
                .with_targets(["src/ports/notifier.rs"]),
            WorkUnit::new("email-adapter", kinds::ADAPTER)
                .with_title("Email notifier")
                .depends_on(["notifier-port"])
                .with_targets(["src/adapters/email.rs", "src/adapters/templates.rs"]),
            WorkUnit::new("sms-adapter", kinds::ADAPTER)
                .with_title("SMS notifier")
                .depends_on(["notifier-port"])
                .with_targets(["src/adapters/sms.rs"]),
            WorkUnit::new("dispatch-flow", kinds::ORCHESTRATION_LOGIC)
                .with_title("Notification dispatch")
                .depends_on(["email-adapter", "sms-adapter"])
                .with_targets(["src/app/dispatch.rs"]),
            WorkUnit::new("order-webhook", kinds::INBOUND_ADAPTER)
                .with_title("Order webhook endpoint")
                .depends_on(["dispatch-flow"])
                .with_targets(["src/http/webhook.rs"]),
            WorkUnit::new("dispatch-metrics", kinds::OBSERVABILITY)
                .with_title("Dispatch metrics")
                .depends_on(["dispatch-flow"])
                .with_targets(["src/telemetry.rs"]),
            WorkUnit::new("notification-tests", kinds::TEST)
                .with_title("End-to-end notification tests")
                .depends_on(["order-webhook"])
                .with_targets(["tests/notifications.rs"]),
        ],
    }
}
