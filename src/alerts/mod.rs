// =============================================================================
// Alerts Module — scheduled-event alert gating and push delivery
// =============================================================================
//
//   calendar — scheduled events and the catalog collaborator
//   gate     — firing window, seen-set dedup, quiet-window admission
//   notify   — push delivery collaborator
// =============================================================================

pub mod calendar;
pub mod gate;
pub mod notify;

pub use calendar::{EventCatalog, ImpactLevel, ScheduledEvent, WeeklyCalendarClient};
pub use gate::{
    evaluate_alerts, is_admitted, todays_events, AlertSeenSet, AlertWindow, EventFilter,
    QuietWindow, SeverityFilter,
};
pub use notify::{DeliveryReceipt, NotificationSink, ServerChanSink};
