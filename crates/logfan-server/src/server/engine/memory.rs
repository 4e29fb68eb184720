use sysinfo::System;

/// Available system memory in bytes, or `None` where the platform does not
/// report it.
pub async fn available_memory() -> Option<u64> {
    let task = tokio::task::spawn_blocking(|| {
        let mut system = System::new();
        system.refresh_memory();
        system.available_memory()
    });

    match task.await {
        Ok(0) => None,
        Ok(available) => Some(available),
        Err(e) => {
            tracing::warn!("Memory refresh task failed: {e}");
            None
        }
    }
}

/// Logs the memory diagnostic published once per run start. Never fails.
pub async fn log_available_memory(source_bytes: u64) {
    let Some(available) = available_memory().await else {
        tracing::warn!("Could not read available memory");
        return;
    };

    tracing::info!(
        available_memory_bytes = available,
        source_bytes,
        "Available system memory: {available} bytes"
    );
    if available < source_bytes {
        tracing::info!("Source is larger than available memory, reading in chunks");
    }
}
