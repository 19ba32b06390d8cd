//! Running aggregates across streaming calls.

use serde::Serialize;

/// Process-wide streaming statistics, recorded once per settled call.
///
/// Averages are simple moving averages over every call since the last
/// reset.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct StreamStats {
    /// Total streaming calls settled (success or failure)
    pub total_messages: u64,
    /// Moving average wall-clock duration per call, in milliseconds
    pub average_duration_ms: f64,
    /// Moving fraction of calls that succeeded, in [0, 1]
    pub success_rate: f64,
    /// Total tool executions observed across all calls
    pub tool_executions: u64,
}

impl StreamStats {
    /// Fold one settled call into the aggregates.
    pub(crate) fn record(&mut self, duration_ms: f64, success: bool, tool_count: u64) {
        self.total_messages += 1;
        let n = self.total_messages as f64;
        self.average_duration_ms += (duration_ms - self.average_duration_ms) / n;
        let outcome = if success { 1.0 } else { 0.0 };
        self.success_rate += (outcome - self.success_rate) / n;
        self.tool_executions += tool_count;
    }

    /// Reset all aggregates to zero.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
