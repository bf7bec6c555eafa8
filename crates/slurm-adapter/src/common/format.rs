use crate::resources::record::Capacity;

/// Formats an amount of memory given in megabytes.
pub fn human_mem_mb(amount: u64) -> String {
    if amount < 2048 {
        format!("{amount} MiB")
    } else if amount < 2 * 1024 * 1024 {
        format!("{:.2} GiB", amount as f64 / 1024.0)
    } else {
        format!("{:.2} TiB", amount as f64 / (1024 * 1024) as f64)
    }
}

/// `<idle>/<total>`
pub fn idle_of_total(capacity: &Capacity) -> String {
    format!("{}/{}", capacity.idle(), capacity.total())
}

/// `<idle>/<total>` memory in human readable units.
pub fn idle_of_total_mem(capacity: &Capacity) -> String {
    format!(
        "{}/{}",
        human_mem_mb(capacity.idle()),
        human_mem_mb(capacity.total())
    )
}
