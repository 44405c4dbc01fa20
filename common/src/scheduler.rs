use crate::config::ReportConfig;

/// Tracks the next allowed report time.
///
/// Two deadlines fold into one clock value: the coarse periodic resend and
/// the short post-activity deadline. Whichever is earlier wins; sending
/// re-arms the periodic interval.
#[derive(Debug, Clone, Copy)]
pub struct ReportScheduler {
    periodic_interval_ms: u64,
    activity_delay_ms: u64,
    next_send_ms: u64,
}

impl ReportScheduler {
    pub fn new(config: &ReportConfig, now_ms: u64) -> Self {
        Self {
            periodic_interval_ms: config.periodic_interval_ms,
            activity_delay_ms: config.activity_delay_ms,
            next_send_ms: now_ms.saturating_add(config.startup_delay_ms),
        }
    }

    /// Called on every accepted input transition so the change is reported
    /// promptly instead of waiting out the periodic interval.
    pub fn record_activity(&mut self, now_ms: u64) {
        let activity_deadline = now_ms.saturating_add(self.activity_delay_ms);
        self.next_send_ms = self.next_send_ms.min(activity_deadline);
    }

    pub fn is_due(&self, now_ms: u64) -> bool {
        now_ms >= self.next_send_ms
    }

    pub fn mark_sent(&mut self, now_ms: u64) {
        self.next_send_ms = now_ms.saturating_add(self.periodic_interval_ms);
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::config::ReportConfig;

    fn config() -> ReportConfig {
        ReportConfig {
            startup_delay_ms: 30_000,
            periodic_interval_ms: 3_600_000,
            activity_delay_ms: 5_000,
            ..ReportConfig::default()
        }
    }

    #[test]
    fn first_report_waits_for_startup_delay() {
        let scheduler = ReportScheduler::new(&config(), 0);

        assert!(!scheduler.is_due(29_999));
        assert!(scheduler.is_due(30_000));
    }

    #[test]
    fn periodic_resend_fires_without_activity() {
        let mut scheduler = ReportScheduler::new(&config(), 0);
        scheduler.mark_sent(30_000);

        assert!(!scheduler.is_due(3_629_999));
        assert!(scheduler.is_due(3_630_000));
    }

    #[test]
    fn activity_pulls_the_deadline_in() {
        let mut scheduler = ReportScheduler::new(&config(), 0);
        scheduler.mark_sent(30_000);

        scheduler.record_activity(100_000);

        assert!(!scheduler.is_due(104_999));
        assert!(scheduler.is_due(105_000));
    }

    #[test]
    fn activity_never_postpones_an_earlier_deadline() {
        let mut scheduler = ReportScheduler::new(&config(), 0);
        scheduler.mark_sent(0);

        scheduler.record_activity(3_599_000);

        // The periodic deadline at 3_600_000 is earlier than 3_604_000.
        assert!(scheduler.is_due(3_600_000));
    }

    #[test]
    fn sending_rearms_the_periodic_interval() {
        let mut scheduler = ReportScheduler::new(&config(), 0);
        scheduler.record_activity(1_000);
        assert!(scheduler.is_due(6_000));

        scheduler.mark_sent(6_000);

        assert!(!scheduler.is_due(6_001));
        assert!(scheduler.is_due(3_606_000));
    }
}
