use crate::analysis::HealthAggregator;
use crate::detect::IncidentManager;
use crate::scheduler::MonitorScheduler;

#[derive(Clone)]
pub struct AppState {
    pub scheduler: MonitorScheduler,
    pub aggregator: HealthAggregator,
    pub incidents: IncidentManager,
}
