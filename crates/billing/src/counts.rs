//! Resource counting for billable quantities

/// Devices billed beyond the plan's free allocation, floored at zero.
///
/// Always derived from the current totals rather than tracked incrementally,
/// so the result is consistent with persisted state regardless of how calls
/// interleave.
pub fn billable_device_count(total_devices: i64, free_allocation: i64) -> u64 {
    (total_devices - free_allocation).max(0) as u64
}
