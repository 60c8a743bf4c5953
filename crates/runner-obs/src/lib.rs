//! Observability: Prometheus gauges for the scheduler/block-pool state plus
//! host and (optionally) GPU telemetry.

use once_cell::sync::Lazy;
use prometheus::{Gauge, IntCounter, IntGauge};

static KV_FREE_BLOCKS: Lazy<IntGauge> = Lazy::new(|| {
    prometheus::register_int_gauge!("runner_kv_free_blocks", "Free KV-cache blocks").unwrap()
});
static KV_USED_BLOCKS: Lazy<IntGauge> = Lazy::new(|| {
    prometheus::register_int_gauge!("runner_kv_used_blocks", "Used KV-cache blocks").unwrap()
});
static KV_HASH_CACHE_ENTRIES: Lazy<IntGauge> = Lazy::new(|| {
    prometheus::register_int_gauge!(
        "runner_kv_hash_cache_entries",
        "Entries in the prefix-cache hash table"
    )
    .unwrap()
});
static SCHEDULER_QUEUE_DEPTH: Lazy<IntGauge> = Lazy::new(|| {
    prometheus::register_int_gauge!("runner_scheduler_queue_depth", "Waiting-queue length").unwrap()
});
static SCHEDULER_BATCH_SIZE: Lazy<IntGauge> = Lazy::new(|| {
    prometheus::register_int_gauge!("runner_scheduler_batch_size", "Last scheduled batch size")
        .unwrap()
});
static SCHEDULER_PREEMPTIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    prometheus::register_int_counter!(
        "runner_scheduler_preemptions_total",
        "Total sequences preempted back to waiting"
    )
    .unwrap()
});

static GPU_UTIL: Lazy<Gauge> = Lazy::new(|| {
    prometheus::register_gauge!("runner_gpu_utilization", "GPU utilization percent").unwrap()
});
static GPU_MEM_USED: Lazy<IntGauge> = Lazy::new(|| {
    prometheus::register_int_gauge!("runner_gpu_memory_bytes", "GPU memory used (bytes)").unwrap()
});
static GPU_TEMP: Lazy<Gauge> = Lazy::new(|| {
    prometheus::register_gauge!("runner_gpu_temperature_celsius", "GPU temperature in C").unwrap()
});

/// Registers every gauge/counter up front so `/metrics` reports a zero value
/// instead of omitting the series before the first scheduler step runs.
pub fn init() {
    let _ = &*KV_FREE_BLOCKS;
    let _ = &*KV_USED_BLOCKS;
    let _ = &*KV_HASH_CACHE_ENTRIES;
    let _ = &*SCHEDULER_QUEUE_DEPTH;
    let _ = &*SCHEDULER_BATCH_SIZE;
    let _ = &*SCHEDULER_PREEMPTIONS_TOTAL;
    let _ = &*GPU_UTIL;
    let _ = &*GPU_MEM_USED;
    let _ = &*GPU_TEMP;
}

/// Snapshot the engine publishes to Prometheus after every step.
pub struct SchedulerSnapshot {
    pub kv_free_blocks: usize,
    pub kv_used_blocks: usize,
    pub kv_hash_cache_entries: usize,
    pub queue_depth: usize,
    pub batch_size: usize,
    pub preemptions_this_step: usize,
}

pub fn observe_scheduler(snapshot: &SchedulerSnapshot) {
    KV_FREE_BLOCKS.set(snapshot.kv_free_blocks as i64);
    KV_USED_BLOCKS.set(snapshot.kv_used_blocks as i64);
    KV_HASH_CACHE_ENTRIES.set(snapshot.kv_hash_cache_entries as i64);
    SCHEDULER_QUEUE_DEPTH.set(snapshot.queue_depth as i64);
    SCHEDULER_BATCH_SIZE.set(snapshot.batch_size as i64);
    if snapshot.preemptions_this_step > 0 {
        SCHEDULER_PREEMPTIONS_TOTAL.inc_by(snapshot.preemptions_this_step as u64);
    }
}

pub fn spawn_gpu_polling() {
    #[cfg(feature = "nvidia")]
    tokio::spawn(async move {
        let nvml = match nvml_wrapper::Nvml::init() {
            Ok(n) => n,
            Err(_) => return,
        };
        let device = match nvml.device_by_index(0) {
            Ok(d) => d,
            Err(_) => return,
        };
        loop {
            if let Ok(util) = device.utilization_rates() {
                GPU_UTIL.set(util.gpu as f64);
            }
            if let Ok(mem) = device.memory_info() {
                GPU_MEM_USED.set(mem.used as i64);
            }
            if let Ok(temp) =
                device.temperature(nvml_wrapper::enum_wrappers::device::TemperatureSensor::Gpu)
            {
                GPU_TEMP.set(temp as f64);
            }
            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        }
    });
}

/// One-shot host stats used by `runner-cli stats`.
pub struct HostStats {
    pub cpu_avg_percent: f32,
    pub used_memory_mib: u64,
    pub total_memory_mib: u64,
}

pub fn host_stats() -> HostStats {
    use sysinfo::System;
    let mut sys = System::new_all();
    sys.refresh_all();
    let cpu_avg_percent = if sys.cpus().is_empty() {
        0.0
    } else {
        sys.cpus().iter().map(|c| c.cpu_usage()).sum::<f32>() / sys.cpus().len() as f32
    };
    HostStats {
        cpu_avg_percent,
        used_memory_mib: sys.used_memory() / 1024 / 1024,
        total_memory_mib: sys.total_memory() / 1024 / 1024,
    }
}
